//! TOML-based hub configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use switchboard_core::Category;

use crate::classifier::RoleEntry;
use crate::error::ConfigError;

/// Hub configuration. The config file is this struct, flat, with every
/// field optional except where a default would be meaningless.
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    /// Channel-name namespace this hub admits.
    pub namespace: String,
    /// Handshake watchdog in seconds. Default: 5.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Registry event stream depth. Default: 256.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Per-endpoint readiness buffer cap. Default: 64.
    #[serde(default = "default_pending_cap")]
    pub pending_cap: usize,
    /// Readiness buffer max age in seconds. Default: 30.
    #[serde(default = "default_pending_max_age_secs")]
    pub pending_max_age_secs: u64,
    /// Origin-prefix classification rules, in `[[roles]]` entries.
    #[serde(default)]
    pub roles: Vec<RoleConfig>,
}

/// A `[[roles]]` entry mapping an origin path prefix to a category.
#[derive(Debug, Clone, Deserialize)]
pub struct RoleConfig {
    pub path_prefix: String,
    pub category: String,
}

fn default_handshake_timeout_secs() -> u64 {
    5
}

fn default_event_capacity() -> usize {
    256
}

fn default_pending_cap() -> usize {
    64
}

fn default_pending_max_age_secs() -> u64 {
    30
}

impl HubConfig {
    /// A config with all defaults for the given namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            event_capacity: default_event_capacity(),
            pending_cap: default_pending_cap(),
            pending_max_age_secs: default_pending_max_age_secs(),
            roles: Vec::new(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn pending_max_age(&self) -> Duration {
        Duration::from_secs(self.pending_max_age_secs)
    }

    /// Classifier rules derived from the `[[roles]]` table.
    pub fn role_entries(&self) -> Vec<RoleEntry> {
        self.roles
            .iter()
            .map(|role| RoleEntry {
                path_prefix: role.path_prefix.clone(),
                category: Category::new(role.category.clone()),
            })
            .collect()
    }
}
