//! TOML node configuration.
//!
//! Selects the log filter, the contracts to register and the authorization
//! rules loaded into the in-memory policy:
//!
//! ```toml
//! [logging]
//! filter = "cosigned=debug"
//!
//! [registry]
//! contracts = ["deferred", "coin"]
//!
//! [[rules]]
//! domain = "<64 hex chars>"
//! action = "invoke:coin.transfer"
//! signers = ["ed25519:<hex>"]
//! threshold = 1
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contracts::authorization::{Rule, RulePolicy};
use crate::contracts::registry::ContractRegistry;
use crate::crypto::{CryptoError, Hash};
use crate::types::Identity;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML could not be parsed
    #[error("parse error: {0}")]
    Parse(String),
    /// `registry.contracts` names no built-in contract
    #[error("unknown contract: {0}")]
    UnknownContract(String),
    /// A rule entry is malformed
    #[error("rule {index}: {source}")]
    InvalidRule {
        /// Position in `rules`
        index: usize,
        /// Reason
        #[source]
        source: CryptoError,
    },
    /// Threshold exceeds the number of signers
    #[error("rule {index}: threshold {threshold} exceeds {signers} signers")]
    UnreachableThreshold {
        /// Position in `rules`
        index: usize,
        /// Configured threshold
        threshold: usize,
        /// Number of signers
        signers: usize,
    },
}

/// Node configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Registered contracts
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Authorization rules
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// Log output settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset (default: info)
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

/// Registry settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Built-in contracts to register (default: all)
    #[serde(default = "default_contracts")]
    pub contracts: Vec<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            contracts: default_contracts(),
        }
    }
}

/// One authorization rule
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Domain id, hex
    pub domain: String,
    /// Action string, e.g. `invoke:coin.transfer`
    pub action: String,
    /// Identities in `<scheme>:<hex>` form
    pub signers: Vec<String>,
    /// Signers needed (default: 1)
    #[serde(default = "default_threshold")]
    pub threshold: usize,
}

fn default_filter() -> String {
    "info".to_string()
}

fn default_contracts() -> Vec<String> {
    ContractRegistry::builtin_names()
        .iter()
        .map(ToString::to_string)
        .collect()
}

const fn default_threshold() -> usize {
    1
}

impl NodeConfig {
    /// Parse from a TOML string
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` on malformed TOML
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Save to a TOML file
    ///
    /// # Errors
    /// Returns error if serialization or the write fails
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Registry holding the configured contracts
    ///
    /// # Errors
    /// Returns `ConfigError::UnknownContract` for a name with no built-in
    pub fn build_registry(&self) -> Result<ContractRegistry, ConfigError> {
        let registry = ContractRegistry::new();
        for name in &self.registry.contracts {
            if !registry.register_builtin(name) {
                return Err(ConfigError::UnknownContract(name.clone()));
            }
        }
        Ok(registry)
    }

    /// Policy holding the configured rules
    ///
    /// # Errors
    /// Returns error if a domain or identity does not parse, or a threshold
    /// cannot be met
    pub fn build_policy(&self) -> Result<RulePolicy, ConfigError> {
        let mut policy = RulePolicy::new();
        for (index, rule) in self.rules.iter().enumerate() {
            let invalid = |source| ConfigError::InvalidRule { index, source };
            let domain = Hash::from_hex(&rule.domain).map_err(invalid)?;
            let signers = rule
                .signers
                .iter()
                .map(|s| s.parse::<Identity>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(invalid)?;
            if rule.threshold > signers.len() {
                return Err(ConfigError::UnreachableThreshold {
                    index,
                    threshold: rule.threshold,
                    signers: signers.len(),
                });
            }
            policy.set_rule(domain, rule.action.clone(), Rule::threshold(rule.threshold, signers));
        }
        Ok(policy)
    }
}
