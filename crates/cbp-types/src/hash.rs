//! Configuration hashing.
//!
//! Result directories are keyed by a digest of the configuration, so equal
//! configurations land in the same directory and can be reused.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::config::PredictorConfig;

/// The two identifiers derived from a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigHashes {
    /// Digest over every `name=value` pair; identifies one simulation setup.
    pub config_hash: String,
    /// Digest over parameter names only; identifies the parameter schema.
    pub param_hash: String,
}

impl ConfigHashes {
    pub fn of(config: &PredictorConfig) -> Self {
        let mut config_string = String::new();
        let mut param_string = String::new();

        for (name, spec) in &config.parameters {
            config_string.push_str(name);
            config_string.push('=');
            config_string.push_str(&spec.value().canonical());
            config_string.push(' ');

            param_string.push_str(name);
            param_string.push(' ');
        }

        Self {
            config_hash: sha3_hex(&config_string),
            param_hash: sha3_hex(&param_string),
        }
    }

    /// First characters of the config hash, for log lines.
    pub fn short(&self) -> &str {
        &self.config_hash[..self.config_hash.len().min(12)]
    }
}

fn sha3_hex(input: &str) -> String {
    format!("{:x}", Sha3_256::digest(input.as_bytes()))
}
