use std::collections::BTreeMap;

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One configured contract to watch. Built at startup, never mutated.
#[derive(Debug, Clone)]
pub struct WatcherBinding {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub contract_type: String,
    pub contract_address: Address,
    pub events: Vec<String>,
    pub topic: String,
}

impl WatcherBinding {
    pub fn contract_address_hex(&self) -> String {
        format!("{:#x}", self.contract_address)
    }
}

/// Normalized value of one decoded event field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NormalizedValue {
    Integer(i128),
    Bool(bool),
    Text(String),
}

impl From<i128> for NormalizedValue {
    fn from(value: i128) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for NormalizedValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Field name -> normalized value, in field name order.
pub type Payload = BTreeMap<String, NormalizedValue>;

/// A log that was decoded and is ready to be propagated.
#[derive(Debug, Clone)]
pub struct DecodedLog {
    pub event: String,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: B256,
    pub payload: Payload,
}

/// Row of the `ethereum_logs` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogRecord {
    pub id: i64,
    pub chain_id: i64,
    pub from_address: String,
    pub contract_address: String,
    pub event: String,
    pub block_number: i64,
    pub log_index: i64,
    pub hash: String,
    pub data: String,
    pub ack_id: Option<String>,
    pub date_created: DateTime<Utc>,
    pub date_modified: DateTime<Utc>,
}

/// Record to insert. Addresses and hashes are lower-case hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEventLog {
    pub chain_id: i64,
    pub from_address: String,
    pub contract_address: String,
    pub event: String,
    pub block_number: i64,
    pub log_index: i64,
    pub hash: String,
    pub data: String,
}

impl NewEventLog {
    /// Logical identity of an on-chain log: (contract, event, block, log index).
    pub fn logical_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.contract_address, self.event, self.block_number, self.log_index
        )
    }
}

/// JSON message published for every propagated log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub chain_id: u64,
    pub from_address: String,
    pub contract_address: String,
    pub event: String,
    pub block_number: u64,
    pub log_index: u64,
    pub hash: String,
    pub data: Payload,
}
