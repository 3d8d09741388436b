use std::collections::BTreeMap;
use std::str::FromStr;

use alloy_primitives::Address;
use serde::Deserialize;

use crate::error::{RelayError, Result};
use crate::types::WatcherBinding;

#[derive(Debug, Deserialize, Clone)]
pub struct PgCfg {
    pub dsn: String,
    pub schema: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NatsCfg {
    pub nats_enabled: Option<u8>,
    pub url: String,
}

/// What a pass does with a log whose payload fails to decode.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecodeFailurePolicy {
    /// Log it, count it and carry on with the rest of the batch.
    #[default]
    Skip,
    /// Drop the remaining logs of that event for this pass.
    AbortBatch,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ScanCfg {
    pub interval_secs: Option<u64>, // Seconds between two timer ticks, 16 by default
    pub max_concurrent_propagations: Option<usize>, // Worker pool size shared by all watchers, 16 by default
    #[serde(default)]
    pub decode_failure_policy: DecodeFailurePolicy,
}

impl ScanCfg {
    pub const DEFAULT_INTERVAL_SECS: u64 = 16;
    pub const DEFAULT_MAX_CONCURRENT_PROPAGATIONS: usize = 16;

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs.unwrap_or(Self::DEFAULT_INTERVAL_SECS)
    }

    pub fn max_concurrent_propagations(&self) -> usize {
        self.max_concurrent_propagations
            .unwrap_or(Self::DEFAULT_MAX_CONCURRENT_PROPAGATIONS)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatcherCfg {
    pub name: Option<String>,
    pub chain_id: u64,
    pub rpc_url: String,
    pub contract: String, // Contract type tag, must be a key of `interfaces`
    pub contract_address: String,
    #[serde(default)]
    pub events: Vec<String>, // Empty list tracks every event of the interface
    pub topic: String,
}

impl WatcherCfg {
    pub fn binding(&self) -> Result<WatcherBinding> {
        let contract_address = Address::from_str(&self.contract_address).map_err(|e| {
            RelayError::Configuration(format!(
                "Invalid contract address '{}': {}",
                self.contract_address, e
            ))
        })?;

        Ok(WatcherBinding {
            name: self.get_name(),
            chain_id: self.chain_id,
            rpc_url: self.rpc_url.clone(),
            contract_type: self.contract.clone(),
            contract_address,
            events: self.events.clone(),
            topic: self.topic.clone(),
        })
    }

    pub fn get_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.contract, self.contract_address.to_lowercase()))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppCfg {
    pub name: Option<String>,
    pub postgres: PgCfg,
    pub nats: NatsCfg,
    #[serde(default)]
    pub scan: ScanCfg,
    pub interfaces: BTreeMap<String, String>, // Contract type -> JSON ABI path
    pub watchers: Vec<WatcherCfg>,
}

impl AppCfg {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Configuration(format!("Failed to read config file '{}': {}", path, e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| RelayError::Configuration(format!("Malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn get_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "events-relay".to_string())
    }

    pub fn is_nats_enabled(&self) -> bool {
        self.nats.nats_enabled.is_some_and(|enabled| enabled > 0)
    }

    fn validate(&self) -> Result<()> {
        if self.watchers.is_empty() {
            return Err(RelayError::Configuration(
                "At least one watcher must be configured".to_string(),
            ));
        }

        if self.scan.interval_secs == Some(0) {
            return Err(RelayError::Configuration(
                "scan.interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.scan.max_concurrent_propagations == Some(0) {
            return Err(RelayError::Configuration(
                "scan.max_concurrent_propagations must be greater than zero".to_string(),
            ));
        }

        for watcher in &self.watchers {
            if !self.interfaces.contains_key(&watcher.contract) {
                return Err(RelayError::Configuration(format!(
                    "Watcher '{}' refers to unknown contract type '{}'",
                    watcher.get_name(),
                    watcher.contract
                )));
            }

            if watcher.topic.trim().is_empty() {
                return Err(RelayError::Configuration(format!(
                    "Watcher '{}' has an empty topic name",
                    watcher.get_name()
                )));
            }

            watcher.binding()?;
        }

        Ok(())
    }
}
