//! Rule-driven roofing classifier.
//!
//! The rules document is loaded once at startup and immutable afterwards.
//! Classification is a pure function of permit type and work description.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Permit-type matching rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermitTypeRules {
    /// Whole-string matches, checked first.
    #[serde(default)]
    pub exact_matches: Vec<String>,
    /// Substring matches, checked second.
    #[serde(default)]
    pub partial_matches: Vec<String>,
}

/// Work-description token lists, scanned as one union.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkDescriptionTokens {
    #[serde(default)]
    pub primary: Vec<String>,
    #[serde(default)]
    pub materials: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
}

/// The roofing-rules document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoofingRules {
    #[serde(default)]
    pub permit_types: PermitTypeRules,
    #[serde(default)]
    pub work_description_tokens: WorkDescriptionTokens,
    #[serde(default = "default_min_token_matches")]
    pub min_token_matches: usize,
    #[serde(default)]
    pub case_sensitive: bool,
}

fn default_min_token_matches() -> usize {
    1
}

impl Default for RoofingRules {
    fn default() -> Self {
        Self {
            permit_types: PermitTypeRules {
                exact_matches: vec![
                    "Re-Roof".to_string(),
                    "Reroof".to_string(),
                    "Roofing".to_string(),
                    "Roof Replacement".to_string(),
                ],
                partial_matches: vec!["roof".to_string()],
            },
            work_description_tokens: WorkDescriptionTokens {
                primary: vec![
                    "roof".to_string(),
                    "reroof".to_string(),
                    "re-roof".to_string(),
                ],
                materials: vec![
                    "shingle".to_string(),
                    "shingles".to_string(),
                    "tile roof".to_string(),
                    "tpo".to_string(),
                    "torch down".to_string(),
                    "built-up roofing".to_string(),
                ],
                actions: vec![
                    "tear off".to_string(),
                    "tear-off".to_string(),
                    "overlay".to_string(),
                    "resheet".to_string(),
                ],
            },
            min_token_matches: 1,
            case_sensitive: false,
        }
    }
}

impl RoofingRules {
    /// Load rules from a YAML document.
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let rules: RoofingRules = serde_yaml::from_str(&contents)?;
        Ok(rules)
    }

    /// Load rules from `path` if it exists, falling back to the built-in set.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_yaml_file(path)
        } else {
            Ok(Self::default())
        }
    }

    fn fold(&self, s: &str) -> String {
        if self.case_sensitive {
            s.to_string()
        } else {
            s.to_lowercase()
        }
    }

    /// Classify a permit as roofing work.
    ///
    /// Checks short-circuit in order: exact permit-type match, partial
    /// permit-type match, then distinct work-description token hits against
    /// the union of all token lists. Null inputs behave as empty strings;
    /// the function is total.
    pub fn is_roofing(&self, permit_type: Option<&str>, work_description: Option<&str>) -> bool {
        let permit_type = self.fold(permit_type.unwrap_or(""));

        if !permit_type.is_empty() {
            for exact in &self.permit_types.exact_matches {
                if permit_type == self.fold(exact) {
                    return true;
                }
            }
            for partial in &self.permit_types.partial_matches {
                let partial = self.fold(partial);
                if !partial.is_empty() && permit_type.contains(&partial) {
                    return true;
                }
            }
        }

        let description = self.fold(work_description.unwrap_or(""));
        if description.is_empty() {
            return false;
        }

        let mut matched = 0usize;
        let tokens = self
            .work_description_tokens
            .primary
            .iter()
            .chain(&self.work_description_tokens.materials)
            .chain(&self.work_description_tokens.actions);
        for token in tokens {
            let token = self.fold(token);
            if !token.is_empty() && description.contains(&token) {
                matched += 1;
                if matched >= self.min_token_matches {
                    return true;
                }
            }
        }

        false
    }
}
