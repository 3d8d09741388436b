//! Relays decoded smart contract events from an Ethereum JSON-RPC node to a
//! PostgreSQL table and a NATS JetStream topic.

pub mod bus;
pub mod chain;
pub mod config;
pub mod cursor;
pub mod db;
pub mod decoder;
pub mod error;
pub mod nats;
pub mod propagation;
pub mod registry;
pub mod store;
pub mod supervisor;
pub mod types;
pub mod watcher;

pub use bus::{AckFuture, EventBus, MemoryBus};
pub use chain::{AlloyChainReader, ChainReader, LogFilter, RawLog};
pub use config::{AppCfg, DecodeFailurePolicy};
pub use error::{DecodeError, RelayError, Result};
pub use propagation::{BoundTopic, PropagationOutcome, Propagator};
pub use registry::{EventSchema, InterfaceDescription, SchemaRegistry};
pub use store::{EventStore, InsertOutcome, MemoryEventStore};
pub use supervisor::Supervisor;
pub use types::{BusMessage, DecodedLog, EventLogRecord, NewEventLog, NormalizedValue, Payload};
pub use watcher::{PairLocks, PassReport, Watcher, WatcherContext};
