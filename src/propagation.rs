//! Propagation sink: store a decoded log, publish it, then correlate the two.
//!
//! The dual write is lenient. A failed insert does not stop the publication and a
//! failed publication leaves the stored record without an acknowledgment id. Every
//! partial state is reported in the [`PropagationOutcome`].

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::chain::ChainReader;
use crate::error::Result;
use crate::store::{EventStore, InsertOutcome};
use crate::types::{BusMessage, DecodedLog, NewEventLog};

/// What happened to one log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationOutcome {
    pub event: String,
    pub block_number: u64,
    pub log_index: u64,
    /// Id of the record created by this propagation, if any.
    pub record_id: Option<i64>,
    /// The log was already stored; nothing else was done.
    pub duplicate: bool,
    pub published: bool,
    pub ack_id: Option<String>,
}

impl PropagationOutcome {
    fn new(log: &DecodedLog) -> Self {
        Self {
            event: log.event.clone(),
            block_number: log.block_number,
            log_index: log.log_index,
            record_id: None,
            duplicate: false,
            published: false,
            ack_id: None,
        }
    }
}

/// A topic that exists on the bus it belongs to.
#[derive(Clone)]
pub struct BoundTopic {
    pub name: String,
    pub bus: Arc<dyn EventBus>,
}

pub struct Propagator {
    chain_id: u64,
    contract_address: String,
    topic: Option<BoundTopic>,
    chain: Arc<dyn ChainReader>,
    store: Arc<dyn EventStore>,
}

impl Propagator {
    /// Without a bound topic logs are stored only.
    pub fn new(
        chain_id: u64,
        contract_address: String,
        topic: Option<BoundTopic>,
        chain: Arc<dyn ChainReader>,
        store: Arc<dyn EventStore>,
    ) -> Self {
        Self {
            chain_id,
            contract_address: contract_address.to_lowercase(),
            topic,
            chain,
            store,
        }
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_ref().map(|t| t.name.as_str())
    }

    /// Broker-side deduplication key of a log.
    pub fn message_id(&self, log: &DecodedLog) -> String {
        format!(
            "{}:{}:{}:{}",
            self.contract_address, log.event, log.block_number, log.log_index
        )
    }

    async fn resolve_sender(&self, log: &DecodedLog) -> String {
        match self.chain.transaction_sender(log.transaction_hash).await {
            Ok(Some(sender)) => format!("{:#x}", sender),
            Ok(None) => {
                warn!(tx = %log.transaction_hash, "Transaction not found, sender left empty");
                String::new()
            }
            Err(e) => {
                warn!(tx = %log.transaction_hash, "Sender lookup failed, sender left empty: {}", e);
                String::new()
            }
        }
    }

    pub async fn propagate(&self, log: DecodedLog) -> Result<PropagationOutcome> {
        let mut outcome = PropagationOutcome::new(&log);
        let data = serde_json::to_string(&log.payload)?;
        let hash = format!("{:#x}", log.transaction_hash);
        let from_address = self.resolve_sender(&log).await;

        let record = NewEventLog {
            chain_id: self.chain_id as i64,
            from_address: from_address.clone(),
            contract_address: self.contract_address.clone(),
            event: log.event.clone(),
            block_number: log.block_number as i64,
            log_index: log.log_index as i64,
            hash: hash.clone(),
            data,
        };

        match self.store.insert(&record).await {
            Ok(InsertOutcome::Inserted(id)) => outcome.record_id = Some(id),
            Ok(InsertOutcome::Duplicate) => {
                debug!(key = %record.logical_key(), "Event log already stored, skipping");
                outcome.duplicate = true;
                return Ok(outcome);
            }
            Err(e) => error!(key = %record.logical_key(), "Failed to store event log: {}", e),
        }

        let Some(BoundTopic { name: topic, bus }) = self.topic.as_ref() else {
            debug!(key = %record.logical_key(), "No topic bound, event log not published");
            return Ok(outcome);
        };

        let message_id = self.message_id(&log);
        let message = BusMessage {
            chain_id: self.chain_id,
            from_address,
            contract_address: self.contract_address.clone(),
            event: log.event.clone(),
            block_number: log.block_number,
            log_index: log.log_index,
            hash,
            data: log.payload,
        };
        let payload = serde_json::to_vec(&message)?;

        let ack = match bus.publish(topic, &message_id, payload).await {
            Ok(ack) => {
                outcome.published = true;
                ack
            }
            Err(e) => {
                error!(topic = %topic, key = %record.logical_key(), "Failed to publish event log: {}", e);
                return Ok(outcome);
            }
        };

        // nothing to correlate the acknowledgment with
        let Some(id) = outcome.record_id else {
            return Ok(outcome);
        };

        let ack_id = match ack.await {
            Ok(ack_id) => ack_id,
            Err(e) => {
                error!(topic = %topic, key = %record.logical_key(), "Publication was not acknowledged: {}", e);
                return Ok(outcome);
            }
        };
        outcome.ack_id = Some(ack_id.clone());

        match self.store.attach_ack(id, &ack_id).await {
            Ok(()) => info!(id, ack_id = %ack_id, "Event log {} relayed", record.logical_key()),
            Err(e) => error!(id, ack_id = %ack_id, "Failed to attach acknowledgment: {}", e),
        }

        Ok(outcome)
    }
}
