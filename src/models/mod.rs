//! Domain models for permit ingestion.

mod permit;
mod source;
mod state;

pub use permit::{compute_fingerprint, generate_permit_id, ParsedAddress, Permit, Provenance};
pub use source::{NewSource, Platform, Source, SourcePatch};
pub use state::{SourceState, SourceStatePatch};
