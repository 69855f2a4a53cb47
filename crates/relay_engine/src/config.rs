//! Resolved engine configuration.
//!
//! The daemon layer parses YAML into these types; the engine itself
//! only consumes them. `validate()` is the startup gate: it parses both
//! command templates, checks their role-required placeholders, rejects
//! reserved-name collisions, and verifies every referenced parameter is
//! defined, all before any scan or transfer can occur.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use relay_store::RetryPolicy;

use crate::error::ConfigError;
use crate::template::{self, CommandTemplate, RESERVED};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub handoff: HandoffConfig,
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub general: GeneralConfig,
}

/// Local side: where files appear and where they are archived.
#[derive(Debug, Clone, Deserialize)]
pub struct HandoffConfig {
    pub buffer: PathBuf,
    pub holding: PathBuf,
}

/// Remote side: destination paths, credentials-by-name, and the two
/// command templates the engine drives.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub user: String,
    pub host: String,
    pub buffer: String,
    /// Scratch directory that makes remote placement atomic. Files go
    /// straight to the buffer when absent (direct mode).
    #[serde(default)]
    pub staging: Option<String>,
    pub commands: CommandsConfig,
    /// Open set of extra named template parameters (ports, options...).
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandsConfig {
    pub transfer: String,
    pub remote: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub max_attempts: u32,
    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    /// Upper bound on jobs grouped into one {batch} invocation.
    pub batch_size: u32,
    pub num_workers: usize,
    pub scan_interval_secs: u64,
    /// Hard bound on any single external command; unbounded when absent.
    pub command_timeout_secs: Option<u64>,
    /// Empty buffer subdirectories older than this are swept.
    pub expiration_time_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 4,
            backoff_cap_secs: 300,
            batch_size: 10,
            num_workers: 1,
            scan_interval_secs: 1,
            command_timeout_secs: None,
            expiration_time_secs: 86_400,
        }
    }
}

/// Templates that passed startup validation.
#[derive(Debug, Clone)]
pub struct ValidatedCommands {
    pub transfer: CommandTemplate,
    pub remote: CommandTemplate,
    pub batch_mode: bool,
}

impl Config {
    /// Startup validation: fails before any side effect.
    pub fn validate(&self) -> Result<ValidatedCommands, ConfigError> {
        for key in self.endpoint.parameters.keys() {
            if RESERVED.contains(&key.as_str()) {
                return Err(ConfigError::ReservedParameter(key.clone()));
            }
        }

        let transfer = CommandTemplate::parse(&self.endpoint.commands.transfer);
        let remote = CommandTemplate::parse(&self.endpoint.commands.remote);
        let batch_mode = template::validate_transfer(&transfer)?;
        template::validate_remote(&remote)?;

        let defined = self.endpoint_params();
        for tpl in [&transfer, &remote] {
            for name in tpl.placeholders() {
                if !defined.contains_key(name) && !RESERVED.contains(&name) {
                    return Err(ConfigError::UndefinedParameter(name.to_string()));
                }
            }
        }

        Ok(ValidatedCommands {
            transfer,
            remote,
            batch_mode,
        })
    }

    /// The fixed parameter set available to every render: endpoint
    /// fields plus the user-supplied extras.
    pub fn endpoint_params(&self) -> BTreeMap<String, String> {
        let mut params = self.endpoint.parameters.clone();
        params.insert("user".into(), self.endpoint.user.clone());
        params.insert("host".into(), self.endpoint.host.clone());
        params.insert("buffer".into(), self.endpoint.buffer.clone());
        if let Some(staging) = &self.endpoint.staging {
            params.insert("staging".into(), staging.clone());
        }
        params
    }

    /// Remote directory files are staged into before publication.
    pub fn staging_root(&self) -> &str {
        self.endpoint
            .staging
            .as_deref()
            .unwrap_or(&self.endpoint.buffer)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.general.max_attempts,
            backoff_base: Duration::from_secs(self.general.backoff_base_secs),
            backoff_cap: Duration::from_secs(self.general.backoff_cap_secs),
        }
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.general.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.general.scan_interval_secs)
    }
}
