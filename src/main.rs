//! permitwatch - building-permit ingestion and roofing classification.
//!
//! Ingests permit records from heterogeneous public data portals, normalizes
//! them into a single schema, flags roofing work, deduplicates against prior
//! runs, and persists everything for downstream spatial querying.

mod classify;
mod cli;
mod config;
mod connectors;
mod geocode;
mod ingest;
mod models;
mod normalize;
mod repository;
mod server;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "permitwatch=info"
    } else {
        "permitwatch=warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Run CLI
    cli::run().await
}
