//! Log scanner for one configured contract.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::chain::{ChainReader, LogFilter};
use crate::config::DecodeFailurePolicy;
use crate::cursor;
use crate::decoder;
use crate::error::Result;
use crate::propagation::{BoundTopic, PropagationOutcome, Propagator};
use crate::registry::InterfaceDescription;
use crate::store::EventStore;
use crate::types::{DecodedLog, WatcherBinding};

/// Single-flight guard per (contract address, event). A pass that finds its pair already
/// being scanned leaves that pair alone instead of waiting for it.
#[derive(Clone, Default)]
pub struct PairLocks {
    locks: Arc<Mutex<HashMap<(String, String), Arc<Mutex<()>>>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another pass holds the pair.
    pub async fn try_lock(&self, contract_address: &str, event: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry((contract_address.to_string(), event.to_string()))
                .or_default()
                .clone()
        };
        lock.try_lock_owned().ok()
    }
}

/// Collaborators shared by every watcher of a supervisor.
#[derive(Clone)]
pub struct WatcherContext {
    pub store: Arc<dyn EventStore>,
    /// `None` when no broker is configured; logs are then stored only.
    pub bus: Option<Arc<dyn EventBus>>,
    pub locks: PairLocks,
    pub pool: Arc<Semaphore>,
    pub decode_failure_policy: DecodeFailurePolicy,
}

impl WatcherContext {
    pub fn new(
        store: Arc<dyn EventStore>,
        bus: Option<Arc<dyn EventBus>>,
        max_concurrent_propagations: usize,
        decode_failure_policy: DecodeFailurePolicy,
    ) -> Self {
        Self {
            store,
            bus,
            locks: PairLocks::new(),
            pool: Arc::new(Semaphore::new(max_concurrent_propagations)),
            decode_failure_policy,
        }
    }
}

/// Result of one pass of one watcher.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub events_scanned: usize,
    pub logs_fetched: usize,
    /// Tracked events the interface description has no shape for.
    pub skipped_events: Vec<String>,
    /// Tracked events left alone because another pass was still scanning them.
    pub busy_events: Vec<String>,
    pub undecodable_logs: usize,
    pub failed_propagations: usize,
    pub outcomes: Vec<PropagationOutcome>,
    pub stored: usize,
    pub published: usize,
    pub acknowledged: usize,
    pub duplicates: usize,
}

impl PassReport {
    fn record(&mut self, outcome: PropagationOutcome) {
        self.stored += usize::from(outcome.record_id.is_some());
        self.published += usize::from(outcome.published);
        self.acknowledged += usize::from(outcome.ack_id.is_some());
        self.duplicates += usize::from(outcome.duplicate);
        self.outcomes.push(outcome);
    }
}

pub struct Watcher {
    binding: WatcherBinding,
    interface: Arc<InterfaceDescription>,
    chain: Arc<dyn ChainReader>,
    propagator: Arc<Propagator>,
    ctx: WatcherContext,
}

impl Watcher {
    /// Binds the watcher's topic on the bus. Without a bus, or if binding fails, the watcher
    /// still runs, storing logs without publishing them.
    pub async fn bind(
        binding: WatcherBinding,
        interface: Arc<InterfaceDescription>,
        chain: Arc<dyn ChainReader>,
        ctx: WatcherContext,
    ) -> Self {
        let topic = match &ctx.bus {
            Some(bus) => match bus.ensure_topic(&binding.topic).await {
                Ok(()) => Some(BoundTopic {
                    name: binding.topic.clone(),
                    bus: bus.clone(),
                }),
                Err(e) => {
                    error!(watcher = %binding.name, topic = %binding.topic, "Topic unavailable, publishing disabled: {}", e);
                    None
                }
            },
            None => {
                info!(watcher = %binding.name, "No message bus, event logs are stored only");
                None
            }
        };

        let propagator = Arc::new(Propagator::new(
            binding.chain_id,
            binding.contract_address_hex(),
            topic,
            chain.clone(),
            ctx.store.clone(),
        ));

        Self {
            binding,
            interface,
            chain,
            propagator,
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.binding.name
    }

    pub fn binding(&self) -> &WatcherBinding {
        &self.binding
    }

    pub fn topic(&self) -> Option<&str> {
        self.propagator.topic()
    }

    /// The configured events, or every event of the interface when none are configured.
    pub fn tracked_events(&self) -> Vec<String> {
        if self.binding.events.is_empty() {
            self.interface.event_names()
        } else {
            self.binding.events.clone()
        }
    }

    /// One pass over every tracked event. Any RPC or store read failure aborts the pass.
    pub async fn scan(&self) -> Result<PassReport> {
        let contract_address = self.binding.contract_address_hex();
        let mut report = PassReport::default();

        for event in self.tracked_events() {
            let Some(schema) = self.interface.event(&event) else {
                warn!(
                    watcher = %self.binding.name,
                    contract_type = %self.binding.contract_type,
                    "No decode shape for event '{}', skipping it", event
                );
                report.skipped_events.push(event);
                continue;
            };

            let Some(_guard) = self.ctx.locks.try_lock(&contract_address, &event).await else {
                debug!(watcher = %self.binding.name, event = %event, "Previous pass still scanning, skipping");
                report.busy_events.push(event);
                continue;
            };

            let cursor = cursor::resolve(self.ctx.store.as_ref(), &contract_address, &event).await?;
            let filter = LogFilter {
                address: self.binding.contract_address,
                topic: schema.topic,
                from_block: cursor.from_block(),
            };
            let logs = self.chain.filter_logs(&filter).await?;
            debug!(
                watcher = %self.binding.name,
                event = %event,
                from_block = ?filter.from_block,
                "Fetched {} logs", logs.len()
            );

            report.events_scanned += 1;
            report.logs_fetched += logs.len();

            let mut batch = JoinSet::new();
            for log in logs {
                let payload = match decoder::decode_and_normalize(schema, &log) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(
                            event = %event,
                            block = log.block_number,
                            log_index = log.log_index,
                            "Undecodable log: {}", e
                        );
                        report.undecodable_logs += 1;
                        match self.ctx.decode_failure_policy {
                            DecodeFailurePolicy::Skip => continue,
                            DecodeFailurePolicy::AbortBatch => break,
                        }
                    }
                };

                let decoded = DecodedLog {
                    event: event.clone(),
                    block_number: log.block_number,
                    log_index: log.log_index,
                    transaction_hash: log.transaction_hash,
                    payload,
                };

                let propagator = self.propagator.clone();
                let pool = self.ctx.pool.clone();
                batch.spawn(async move {
                    let _permit = pool.acquire_owned().await;
                    propagator.propagate(decoded).await
                });
            }

            while let Some(joined) = batch.join_next().await {
                match joined {
                    Ok(Ok(outcome)) => report.record(outcome),
                    Ok(Err(e)) => {
                        error!(event = %event, "Propagation failed: {}", e);
                        report.failed_propagations += 1;
                    }
                    Err(e) => {
                        error!(event = %event, "Propagation task failed: {}", e);
                        report.failed_propagations += 1;
                    }
                }
            }
        }

        report
            .outcomes
            .sort_by(|a, b| (&a.event, a.block_number, a.log_index).cmp(&(&b.event, b.block_number, b.log_index)));

        info!(
            watcher = %self.binding.name,
            events = report.events_scanned,
            logs = report.logs_fetched,
            stored = report.stored,
            published = report.published,
            duplicates = report.duplicates,
            "Pass finished"
        );
        Ok(report)
    }
}
