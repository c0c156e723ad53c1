//! Runtime configuration.
//!
//! Environment-driven knobs are deliberately few: the database connection
//! string and the geocoder base URL. The roofing-rules document is a YAML
//! file loaded once at startup (see [`crate::classify::RoofingRules`]).

use std::path::PathBuf;

/// Default database file, next to the working directory.
const DEFAULT_DATABASE_URL: &str = "sqlite://permitwatch.db";

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    /// Nominatim-style search endpoint; geocoding is off when unset.
    pub geocoder_url: Option<String>,
    pub rules_path: PathBuf,
}

impl Settings {
    /// Read settings from the environment, applying defaults.
    pub fn from_env(rules_path: Option<PathBuf>) -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            geocoder_url: std::env::var("GEOCODER_URL").ok().filter(|s| !s.is_empty()),
            rules_path: rules_path.unwrap_or_else(|| PathBuf::from("roofing_rules.yaml")),
        }
    }
}
