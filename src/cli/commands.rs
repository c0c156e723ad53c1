//! CLI commands implementation.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::classify::RoofingRules;
use crate::config::Settings;
use crate::geocode::GeocodeClient;
use crate::ingest::{IngestMode, Orchestrator};
use crate::models::{NewSource, Platform, SourcePatch};
use crate::repository::Store;
use crate::server::{self, AppState};

#[derive(Parser)]
#[command(name = "permitwatch")]
#[command(about = "Building-permit ingestion and roofing classification")]
#[command(version)]
pub struct Cli {
    /// Path to the roofing-rules YAML document
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema
    Init,

    /// Manage permit data sources
    Source {
        #[command(subcommand)]
        command: SourceCommands,
    },

    /// Run one ingestion for a source
    Ingest {
        /// Source ID to ingest
        source_id: i64,
        /// Ingestion mode
        #[arg(short, long, default_value = "backfill")]
        mode: String,
    },

    /// Run the continuous ingestion sweep in the foreground
    Sweep,

    /// Serve the HTTP API with the background sweep
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Show sources, counts, and run state
    Status,
}

#[derive(Subcommand)]
enum SourceCommands {
    /// Register a new source
    Add {
        /// Display name
        name: String,
        /// Platform: json-dataset or feature-service
        #[arg(short, long)]
        platform: String,
        /// Portal base URL
        #[arg(short, long)]
        endpoint: String,
        /// Platform-specific config as JSON (dataset_id, layer_id, ...)
        #[arg(short, long, default_value = "{}")]
        config: String,
        /// Row budget per run
        #[arg(long, default_value = "1000")]
        max_rows: i64,
        /// Request budget per minute
        #[arg(long, default_value = "60")]
        max_requests: i64,
    },
    /// List registered sources
    List,
    /// Enable a source
    Enable { source_id: i64 },
    /// Disable a source (past records are kept)
    Disable { source_id: i64 },
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env(cli.rules.clone());

    let store = Store::connect(&settings.database_url).await?;
    let rules = Arc::new(RoofingRules::load_or_default(&settings.rules_path)?);
    let geocoder = settings
        .geocoder_url
        .as_deref()
        .map(|url| Arc::new(GeocodeClient::new(url, store.clone())));
    let orchestrator = Arc::new(Orchestrator::new(store.clone(), rules, geocoder));

    match cli.command {
        Commands::Init => {
            // Store::connect already created the schema.
            println!(
                "{} Database ready at {}",
                style("✓").green(),
                settings.database_url
            );
            Ok(())
        }
        Commands::Source { command } => cmd_source(&store, &orchestrator, command).await,
        Commands::Ingest { source_id, mode } => cmd_ingest(&orchestrator, source_id, &mode).await,
        Commands::Sweep => {
            println!("{} Starting continuous sweep (Ctrl-C to stop)", style("→").cyan());
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let sweeper = orchestrator.clone();
            let handle = tokio::spawn(async move { sweeper.run_sweep(shutdown_rx).await });
            tokio::signal::ctrl_c().await?;
            let _ = shutdown_tx.send(true);
            let _ = handle.await;
            store.close().await;
            Ok(())
        }
        Commands::Serve { port } => {
            let state = AppState {
                store: store.clone(),
                orchestrator,
            };
            server::serve(state, port).await
        }
        Commands::Status => cmd_status(&store).await,
    }
}

async fn cmd_source(
    store: &Store,
    orchestrator: &Orchestrator,
    command: SourceCommands,
) -> anyhow::Result<()> {
    match command {
        SourceCommands::Add {
            name,
            platform,
            endpoint,
            config,
            max_rows,
            max_requests,
        } => {
            let Some(platform) = Platform::from_str(&platform) else {
                println!(
                    "{} Unknown platform '{}'. Expected json-dataset or feature-service.",
                    style("✗").red(),
                    platform
                );
                return Ok(());
            };
            let config: serde_json::Value = serde_json::from_str(&config)?;

            let source = store
                .create_source(&NewSource {
                    name,
                    platform,
                    endpoint_url: endpoint,
                    config,
                    enabled: true,
                    max_rows_per_run: max_rows,
                    max_runtime_minutes: 30,
                    max_requests_per_minute: max_requests,
                })
                .await?;
            println!(
                "{} Registered source {} ({})",
                style("✓").green(),
                source.id,
                source.name
            );

            match orchestrator.validate_source(source.id).await {
                Ok(()) => println!("{} Endpoint reachable", style("✓").green()),
                Err(e) => println!(
                    "{} Validation failed (source kept, fix config before ingesting): {}",
                    style("!").yellow(),
                    e
                ),
            }
        }
        SourceCommands::List => {
            let sources = store.get_sources().await?;
            if sources.is_empty() {
                println!("{} No sources registered.", style("○").dim());
                return Ok(());
            }
            for source in sources {
                let marker = if source.enabled {
                    style("●").green()
                } else {
                    style("○").dim()
                };
                println!(
                    "{} {:>4}  {:<16} {:<30} {}",
                    marker,
                    source.id,
                    source.platform.as_str(),
                    source.name,
                    source.endpoint_url
                );
            }
        }
        SourceCommands::Enable { source_id } => {
            store
                .update_source(
                    source_id,
                    &SourcePatch {
                        enabled: Some(true),
                        ..Default::default()
                    },
                )
                .await?;
            println!("{} Source {} enabled", style("✓").green(), source_id);
        }
        SourceCommands::Disable { source_id } => {
            store
                .update_source(
                    source_id,
                    &SourcePatch {
                        enabled: Some(false),
                        ..Default::default()
                    },
                )
                .await?;
            println!("{} Source {} disabled", style("✓").green(), source_id);
        }
    }
    Ok(())
}

async fn cmd_ingest(orchestrator: &Orchestrator, source_id: i64, mode: &str) -> anyhow::Result<()> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("valid progress template"),
    );
    spinner.set_message(format!("Ingesting source {} ({})...", source_id, mode));
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));

    if mode == "deep" {
        let result = orchestrator.run_deep_ingestion(source_id).await;
        spinner.finish_and_clear();
        match result {
            Ok(deep) => println!(
                "{} Deep ingestion done: {} runs, {} fetched, {} saved, {} new permits",
                style("✓").green(),
                deep.runs,
                deep.rows_fetched,
                deep.rows_upserted,
                deep.permits_added
            ),
            Err(e) => println!("{} Ingestion failed: {}", style("✗").red(), e),
        }
        return Ok(());
    }

    let Some(ingest_mode) = IngestMode::from_str(mode) else {
        spinner.finish_and_clear();
        println!(
            "{} Unknown mode '{}'. Expected backfill, incremental or deep.",
            style("✗").red(),
            mode
        );
        return Ok(());
    };

    let result = orchestrator.run_ingestion(source_id, ingest_mode).await;
    spinner.finish_and_clear();
    match result {
        Ok(report) => println!(
            "{} Done: {} fetched, {} saved, {} errors",
            style("✓").green(),
            report.rows_fetched,
            report.rows_upserted,
            report.errors
        ),
        Err(e) => println!("{} Ingestion failed: {}", style("✗").red(), e),
    }
    Ok(())
}

async fn cmd_status(store: &Store) -> anyhow::Result<()> {
    let stats = store.get_permit_stats().await?;
    println!(
        "{} {} permits ({} with coordinates, {} roofing)",
        style("→").cyan(),
        stats.total,
        stats.with_coords,
        stats.roofing
    );

    let sources = store.get_sources().await?;
    for source in sources {
        let count = store.get_source_permit_count(source.id).await?;
        let state = store.get_source_state(source.id).await?;
        let status = state
            .as_ref()
            .and_then(|s| s.status_message.clone())
            .unwrap_or_else(|| "never run".to_string());
        let running = state.as_ref().is_some_and(|s| s.is_running);
        let marker = if running {
            style("●").yellow()
        } else if source.enabled {
            style("●").green()
        } else {
            style("○").dim()
        };
        println!("{} {:>4}  {:<30} {:>8} permits  {}", marker, source.id, source.name, count, status);
    }
    Ok(())
}
