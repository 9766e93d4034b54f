// Bridge Configuration - Recognized options, JSON file loading, validation

use crate::peer::{PeerEndpoint, PeerId, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("Invalid config JSON: {0}")]
    Malformed(String),

    #[error("Invalid option {option}: {reason}")]
    Invalid { option: &'static str, reason: String },
}

/// Options for one bridge node
///
/// JSON keys are camelCase (`syncIntervalMs`, `retryAttempts`, ...). Missing
/// keys take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Where each peer is reached; peers not listed use their default
    #[serde(rename = "perPeerEndpoint")]
    pub endpoints: BTreeMap<PeerId, PeerEndpoint>,
    /// Reconciliation and probing tick
    pub sync_interval_ms: u64,
    /// Backoff attempts, also the queue's per-message attempt budget
    pub retry_attempts: u32,
    /// First backoff delay; doubles each attempt
    pub retry_base_delay_ms: u64,
    /// Bound on one adapter attempt
    pub adapter_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoints: PeerId::ALL
                .iter()
                .map(|p| (*p, PeerEndpoint::default_for(*p)))
                .collect(),
            sync_interval_ms: 5000,
            retry_attempts: 3,
            retry_base_delay_ms: 1000,
            adapter_timeout_ms: 5000,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, peer: PeerId, endpoint: PeerEndpoint) -> Self {
        self.endpoints.insert(peer, endpoint);
        self
    }

    pub fn with_sync_interval_ms(mut self, ms: u64) -> Self {
        self.sync_interval_ms = ms;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.retry_base_delay_ms = ms;
        self
    }

    pub fn with_adapter_timeout_ms(mut self, ms: u64) -> Self {
        self.adapter_timeout_ms = ms;
        self
    }

    /// Every peer pointed at the in-process hub
    pub fn in_process() -> Self {
        let mut config = Self::default();
        for peer in PeerId::ALL {
            config.endpoints.insert(peer, PeerEndpoint::InProcess);
        }
        config
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_base_delay_ms),
            self.retry_attempts,
        )
    }

    /// Endpoint for `peer`, falling back to its default
    pub fn endpoint(&self, peer: PeerId) -> PeerEndpoint {
        self.endpoints
            .get(&peer)
            .cloned()
            .unwrap_or_else(|| PeerEndpoint::default_for(peer))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                option: "syncIntervalMs",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.adapter_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                option: "adapterTimeoutMs",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.retry_attempts > 0 && self.retry_base_delay_ms == 0 {
            return Err(ConfigError::Invalid {
                option: "retryBaseDelayMs",
                reason: "must be greater than 0 when retries are enabled".to_string(),
            });
        }
        if self.retry_attempts > 31 {
            return Err(ConfigError::Invalid {
                option: "retryAttempts",
                reason: format!("{} would overflow the backoff schedule", self.retry_attempts),
            });
        }
        for (peer, endpoint) in &self.endpoints {
            if let PeerEndpoint::Tcp { host, port } = endpoint {
                if host.is_empty() || *port == 0 {
                    return Err(ConfigError::Invalid {
                        option: "perPeerEndpoint",
                        reason: format!("{} has unusable endpoint {}", peer, endpoint),
                    });
                }
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Malformed(e.to_string()))
    }
}
