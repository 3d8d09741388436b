//! Event log store.
//!
//! The relay only needs three things from its store: the most recent record of a
//! (contract, event) pair to resume scanning from, an idempotent insert keyed on the
//! logical identity of a log, and a way to attach the broker acknowledgment afterwards.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::{RelayError, Result};
use crate::types::{EventLogRecord, NewEventLog};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    /// A record with the same (contract, event, block, log index) already exists.
    Duplicate,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Record with the highest block number for the pair, if any.
    async fn latest_for(&self, contract_address: &str, event: &str) -> Result<Option<EventLogRecord>>;

    async fn insert(&self, record: &NewEventLog) -> Result<InsertOutcome>;

    async fn attach_ack(&self, id: i64, ack_id: &str) -> Result<()>;

    async fn get_by_id(&self, id: i64) -> Result<Option<EventLogRecord>>;
}

#[derive(Default)]
struct MemoryInner {
    next_id: i64,
    records: BTreeMap<i64, EventLogRecord>,
    keys: BTreeMap<String, i64>,
}

/// In-process store with the same uniqueness rule as the SQL table.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<MemoryInner>,
    fail_inserts: AtomicBool,
    fail_updates: AtomicBool,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following insert fail with a storage error.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every following `attach_ack` fail with a storage error.
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub async fn records(&self) -> Vec<EventLogRecord> {
        self.inner.lock().await.records.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn latest_for(&self, contract_address: &str, event: &str) -> Result<Option<EventLogRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|r| r.contract_address == contract_address && r.event == event)
            .max_by_key(|r| (r.block_number, r.log_index))
            .cloned())
    }

    async fn insert(&self, record: &NewEventLog) -> Result<InsertOutcome> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(RelayError::Storage("insert rejected by memory store".to_string()));
        }

        let mut inner = self.inner.lock().await;
        let key = record.logical_key();
        if inner.keys.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let now = Utc::now();
        inner.records.insert(
            id,
            EventLogRecord {
                id,
                chain_id: record.chain_id,
                from_address: record.from_address.clone(),
                contract_address: record.contract_address.clone(),
                event: record.event.clone(),
                block_number: record.block_number,
                log_index: record.log_index,
                hash: record.hash.clone(),
                data: record.data.clone(),
                ack_id: None,
                date_created: now,
                date_modified: now,
            },
        );
        inner.keys.insert(key, id);
        Ok(InsertOutcome::Inserted(id))
    }

    async fn attach_ack(&self, id: i64, ack_id: &str) -> Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RelayError::Storage("update rejected by memory store".to_string()));
        }

        let mut inner = self.inner.lock().await;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| RelayError::Storage(format!("no event log with id {}", id)))?;
        record.ack_id = Some(ack_id.to_string());
        record.date_modified = Utc::now();
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<EventLogRecord>> {
        Ok(self.inner.lock().await.records.get(&id).cloned())
    }
}
