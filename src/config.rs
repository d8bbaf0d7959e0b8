use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Tunables for one compile. Every field has a default, so `{}` is a valid
/// config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerConfig {
    /// Interpreter steps a single script or expression may take.
    pub max_steps: u64,
    /// Nested script function calls.
    pub max_call_depth: usize,
    /// Longest string a script may build, in UTF-16 units.
    pub max_string_length: usize,
    /// Nested fragment expansions and component imports.
    pub max_depth: usize,
    /// Attributes rewritten by URL rebasing in imported documents.
    pub rebase_attributes: Vec<String>,
    pub strip_comments: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_steps: 10_000_000,
            max_call_depth: 256,
            max_string_length: 1 << 24,
            max_depth: 64,
            rebase_attributes: ["src", "href", "action", "poster", "data"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            strip_comments: false,
        }
    }
}

impl CompilerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn is_rebase_attribute(&self, name: &str) -> bool {
        self.rebase_attributes
            .iter()
            .any(|a| a.eq_ignore_ascii_case(name))
    }
}
