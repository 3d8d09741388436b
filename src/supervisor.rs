use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::chain::AlloyChainReader;
use crate::config::AppCfg;
use crate::error::{RelayError, Result};
use crate::registry::SchemaRegistry;
use crate::store::EventStore;
use crate::watcher::{PassReport, Watcher, WatcherContext};

/// Owns every watcher and fires their passes on each timer tick.
pub struct Supervisor {
    watchers: Vec<Arc<Watcher>>,
}

impl Supervisor {
    pub fn new(watchers: Vec<Watcher>) -> Self {
        Self {
            watchers: watchers.into_iter().map(Arc::new).collect(),
        }
    }

    /// One RPC connection and one bound interface per configured watcher. The pair locks
    /// and the propagation worker pool are shared by all of them.
    pub async fn from_config(
        cfg: &AppCfg,
        registry: &SchemaRegistry,
        store: Arc<dyn EventStore>,
        bus: Option<Arc<dyn EventBus>>,
    ) -> Result<Self> {
        let ctx = WatcherContext::new(
            store,
            bus,
            cfg.scan.max_concurrent_propagations(),
            cfg.scan.decode_failure_policy,
        );

        let mut watchers = Vec::with_capacity(cfg.watchers.len());
        for watcher_cfg in &cfg.watchers {
            let binding = watcher_cfg.binding()?;
            let interface = registry.get(&binding.contract_type).ok_or_else(|| {
                RelayError::Configuration(format!(
                    "No interface description for contract type '{}'",
                    binding.contract_type
                ))
            })?;
            let chain = Arc::new(AlloyChainReader::connect(&binding.rpc_url)?);

            info!(
                watcher = %binding.name,
                contract = %binding.contract_address_hex(),
                chain_id = binding.chain_id,
                "Watcher configured"
            );
            watchers.push(Watcher::bind(binding, interface, chain, ctx.clone()).await);
        }

        Ok(Self::new(watchers))
    }

    fn launch(watcher: &Arc<Watcher>) -> JoinHandle<Result<PassReport>> {
        let watcher = Arc::clone(watcher);
        tokio::spawn(async move {
            let result = watcher.scan().await;
            match &result {
                Err(e) if e.is_transport() => {
                    warn!(watcher = %watcher.name(), "Pass aborted, retrying next tick: {}", e)
                }
                Err(e) => error!(watcher = %watcher.name(), "Pass aborted: {}", e),
                Ok(_) => {}
            }
            result
        })
    }

    /// Launches one pass of every watcher and returns without waiting for them.
    pub fn trigger(&self) -> Vec<JoinHandle<Result<PassReport>>> {
        self.watchers.iter().map(Self::launch).collect()
    }

    /// One pass of every watcher, awaited. Results are in watcher order.
    pub async fn run_once(&self) -> Vec<(String, Result<PassReport>)> {
        let handles = self.trigger();
        let mut results = Vec::with_capacity(handles.len());
        for (watcher, handle) in self.watchers.iter().zip(handles) {
            let result = handle
                .await
                .unwrap_or_else(|e| Err(RelayError::Task(e.to_string())));
            results.push((watcher.name().to_string(), result));
        }
        results
    }

    /// Triggers a pass every `interval` until `shutdown` resolves, then waits for the
    /// passes still in flight. A watcher whose previous pass is still running sits the
    /// tick out.
    pub async fn run<F>(&self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        let mut in_flight: Vec<Option<JoinHandle<Result<PassReport>>>> =
            self.watchers.iter().map(|_| None).collect();
        info!("Supervising {} watchers, tick every {:?}", self.watchers.len(), interval);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    for (watcher, slot) in self.watchers.iter().zip(in_flight.iter_mut()) {
                        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
                            debug!(watcher = %watcher.name(), "Previous pass still running, skipping tick");
                            continue;
                        }
                        *slot = Some(Self::launch(watcher));
                    }
                }
            }
        }

        for handle in in_flight.into_iter().flatten() {
            let _ = handle.await;
        }
    }
}
