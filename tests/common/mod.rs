#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;

use events_relay::bus::MemoryBus;
use events_relay::chain::{ChainReader, LogFilter, RawLog};
use events_relay::config::DecodeFailurePolicy;
use events_relay::registry::{InterfaceDescription, SchemaRegistry};
use events_relay::store::MemoryEventStore;
use events_relay::types::WatcherBinding;
use events_relay::watcher::{Watcher, WatcherContext};
use events_relay::{RelayError, Result};

pub const CROWDSALE: &str = "0xabc0000000000000000000000000000000000001";
pub const SENDER: &str = "0x00000000000000000000000000000000000000aa";

/// Chain whose logs are scripted by the test.
#[derive(Default)]
pub struct ScriptedChain {
    logs: Mutex<Vec<RawLog>>,
    senders: Mutex<HashMap<B256, Address>>,
    requested_from: Mutex<Vec<Option<u64>>>,
    fail_rpc: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, log: RawLog, sender: Address) {
        self.senders.lock().unwrap().insert(log.transaction_hash, sender);
        self.logs.lock().unwrap().push(log);
    }

    pub fn fail_rpc(&self, fail: bool) {
        self.fail_rpc.store(fail, Ordering::SeqCst);
    }

    /// Every `filter_logs` call sleeps this long before answering. Calls are recorded on
    /// entry, before the sleep.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn requested_from(&self) -> Vec<Option<u64>> {
        self.requested_from.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainReader for ScriptedChain {
    async fn filter_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>> {
        self.requested_from.lock().unwrap().push(filter.from_block);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_rpc.load(Ordering::SeqCst) {
            return Err(RelayError::Rpc("connection refused".to_string()));
        }

        let from = filter.from_block.unwrap_or(0);
        let logs = self.logs.lock().unwrap();
        Ok(logs
            .iter()
            .filter(|log| {
                log.address == filter.address
                    && log.topics.first() == Some(&filter.topic)
                    && log.block_number >= from
            })
            .cloned()
            .collect())
    }

    async fn transaction_sender(&self, hash: B256) -> Result<Option<Address>> {
        Ok(self.senders.lock().unwrap().get(&hash).copied())
    }
}

pub fn registry() -> SchemaRegistry {
    let crowdsale = InterfaceDescription::from_json_str(
        "crowdsale",
        include_str!("../../abi/crowdsale.json"),
    )
    .unwrap();
    let payable =
        InterfaceDescription::from_json_str("payable", include_str!("../../abi/payable.json")).unwrap();
    SchemaRegistry::from_interfaces([crowdsale, payable])
}

pub fn crowdsale_address() -> Address {
    CROWDSALE.parse().unwrap()
}

pub fn sender() -> Address {
    SENDER.parse().unwrap()
}

pub fn binding(events: &[&str]) -> WatcherBinding {
    WatcherBinding {
        name: "crowdsale-main".to_string(),
        chain_id: 4,
        rpc_url: "http://localhost:8545".to_string(),
        contract_type: "crowdsale".to_string(),
        contract_address: crowdsale_address(),
        events: events.iter().map(|e| e.to_string()).collect(),
        topic: "crowdsale-events".to_string(),
    }
}

pub fn offchain(text: &[u8]) -> B256 {
    let mut word = B256::ZERO;
    word[..text.len()].copy_from_slice(text);
    word
}

/// A `__shake(hid, state, balance, offchain)` log of the crowdsale contract.
pub fn shake_log(block_number: u64, log_index: u64, hid: u64, balance: u64, note: &[u8]) -> RawLog {
    let registry = registry();
    let topic = registry.get("crowdsale").unwrap().event("__shake").unwrap().topic;
    let data = DynSolValue::Tuple(vec![
        DynSolValue::Uint(U256::from(hid), 256),
        DynSolValue::Uint(U256::from(1), 8),
        DynSolValue::Uint(U256::from(balance), 256),
        DynSolValue::FixedBytes(offchain(note), 32),
    ])
    .abi_encode_params();

    RawLog {
        address: crowdsale_address(),
        topics: vec![topic],
        data: data.into(),
        block_number,
        log_index,
        transaction_hash: B256::left_padding_from(&(block_number * 1000 + log_index).to_be_bytes()),
    }
}

/// A `__shake` log whose data section is one word short.
pub fn broken_shake_log(block_number: u64, log_index: u64) -> RawLog {
    let mut log = shake_log(block_number, log_index, 0, 0, b"");
    let mut data = log.data.to_vec();
    data.truncate(96);
    log.data = data.into();
    log
}

pub struct Harness {
    pub chain: Arc<ScriptedChain>,
    pub store: Arc<MemoryEventStore>,
    pub bus: Arc<MemoryBus>,
    pub ctx: WatcherContext,
}

impl Harness {
    pub fn new(policy: DecodeFailurePolicy) -> Self {
        let chain = ScriptedChain::new();
        let store = Arc::new(MemoryEventStore::new());
        let bus = Arc::new(MemoryBus::new());
        let ctx = WatcherContext::new(store.clone(), Some(bus.clone()), 4, policy);
        Self { chain, store, bus, ctx }
    }

    /// Watchers of this harness have no bus at all; `bus` stays untouched.
    pub fn without_bus(policy: DecodeFailurePolicy) -> Self {
        let chain = ScriptedChain::new();
        let store = Arc::new(MemoryEventStore::new());
        let bus = Arc::new(MemoryBus::new());
        let ctx = WatcherContext::new(store.clone(), None, 4, policy);
        Self { chain, store, bus, ctx }
    }

    pub async fn watcher(&self, events: &[&str]) -> Watcher {
        let interface = registry().get("crowdsale").unwrap();
        Watcher::bind(binding(events), interface, self.chain.clone(), self.ctx.clone()).await
    }
}
