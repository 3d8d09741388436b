//! Decode schema registry.
//!
//! Maps a contract type tag (e.g. `crowdsale`) to the decode shape of every event the
//! contract emits. Loaded once at startup from JSON ABI files and shared read-only by
//! every watcher of that contract type.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use alloy_dyn_abi::DynSolType;
use alloy_json_abi::{Event, JsonAbi};
use alloy_primitives::B256;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};

/// Primitive ABI kinds the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Uint(usize),
    Int(usize),
    FixedBytes(usize),
    Address,
    Bool,
    String,
    Bytes,
}

impl FieldKind {
    /// Static kinds occupy exactly one 32-byte word in the data section.
    pub fn is_static(&self) -> bool {
        !matches!(self, Self::String | Self::Bytes)
    }

    pub fn sol_type(&self) -> DynSolType {
        match *self {
            Self::Uint(bits) => DynSolType::Uint(bits),
            Self::Int(bits) => DynSolType::Int(bits),
            Self::FixedBytes(len) => DynSolType::FixedBytes(len),
            Self::Address => DynSolType::Address,
            Self::Bool => DynSolType::Bool,
            Self::String => DynSolType::String,
            Self::Bytes => DynSolType::Bytes,
        }
    }

    fn from_sol_type(ty: &DynSolType) -> Option<Self> {
        match *ty {
            DynSolType::Uint(bits) => Some(Self::Uint(bits)),
            DynSolType::Int(bits) => Some(Self::Int(bits)),
            DynSolType::FixedBytes(len) => Some(Self::FixedBytes(len)),
            DynSolType::Address => Some(Self::Address),
            DynSolType::Bool => Some(Self::Bool),
            DynSolType::String => Some(Self::String),
            DynSolType::Bytes => Some(Self::Bytes),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub indexed: bool,
}

/// Decode shape and topic hash of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSchema {
    pub name: String,
    pub topic: B256,
    pub fields: Vec<FieldSpec>,
}

impl EventSchema {
    pub fn from_event(event: &Event) -> std::result::Result<Self, String> {
        if event.anonymous {
            return Err("anonymous events have no topic hash".to_string());
        }

        let mut fields = Vec::with_capacity(event.inputs.len());
        for (position, param) in event.inputs.iter().enumerate() {
            let ty = DynSolType::parse(&param.ty)
                .map_err(|e| format!("unparsable type '{}': {}", param.ty, e))?;
            let kind = FieldKind::from_sol_type(&ty)
                .ok_or_else(|| format!("unsupported type '{}' of field '{}'", param.ty, param.name))?;

            // unnamed inputs still need a stable key in the payload
            let name = if param.name.is_empty() {
                format!("arg{}", position)
            } else {
                param.name.clone()
            };

            fields.push(FieldSpec {
                name,
                kind,
                indexed: param.indexed,
            });
        }

        Ok(Self {
            name: event.name.clone(),
            topic: event.selector(),
            fields,
        })
    }

    pub fn indexed_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.indexed)
    }

    pub fn data_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| !f.indexed)
    }
}

/// Event shapes of one contract type.
#[derive(Debug, Clone)]
pub struct InterfaceDescription {
    pub contract_type: String,
    events: BTreeMap<String, EventSchema>,
}

impl InterfaceDescription {
    pub fn from_abi(contract_type: &str, abi: &JsonAbi) -> Self {
        let mut events = BTreeMap::new();
        for event in abi.events() {
            match EventSchema::from_event(event) {
                Ok(schema) => {
                    debug!(contract_type, event = %event.name, topic = %schema.topic, "Event shape registered");
                    events.insert(event.name.clone(), schema);
                }
                Err(reason) => {
                    warn!(contract_type, event = %event.name, "Event left out of the decode table: {}", reason);
                }
            }
        }

        Self {
            contract_type: contract_type.to_string(),
            events,
        }
    }

    pub fn from_json_slice(contract_type: &str, abi_json: &[u8]) -> Result<Self> {
        let preprocessed = preprocess_abi_json(abi_json)?;
        let abi: JsonAbi = serde_json::from_slice(&preprocessed)
            .map_err(|e| RelayError::AbiLoad(format!("{}: {}", contract_type, e)))?;
        Ok(Self::from_abi(contract_type, &abi))
    }

    pub fn from_json_str(contract_type: &str, abi_json: &str) -> Result<Self> {
        Self::from_json_slice(contract_type, abi_json.as_bytes())
    }

    pub fn from_file(contract_type: &str, abi_path: &Path) -> Result<Self> {
        let abi_json = std::fs::read(abi_path).map_err(|e| {
            RelayError::AbiLoad(format!("{}: cannot read {}: {}", contract_type, abi_path.display(), e))
        })?;
        Self::from_json_slice(contract_type, &abi_json)
    }

    pub fn event(&self, name: &str) -> Option<&EventSchema> {
        self.events.get(name)
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Contract type -> interface description. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    interfaces: BTreeMap<String, Arc<InterfaceDescription>>,
}

impl SchemaRegistry {
    pub fn from_interfaces(interfaces: impl IntoIterator<Item = InterfaceDescription>) -> Self {
        let interfaces = interfaces
            .into_iter()
            .map(|i| (i.contract_type.clone(), Arc::new(i)))
            .collect();
        Self { interfaces }
    }

    /// Load every `contract type -> ABI path` entry of the configuration.
    pub fn load<P: AsRef<Path>>(abi_paths: &BTreeMap<String, P>) -> Result<Self> {
        let mut interfaces = Vec::with_capacity(abi_paths.len());
        for (contract_type, path) in abi_paths {
            let interface = InterfaceDescription::from_file(contract_type, path.as_ref())?;
            info!(
                contract_type = %contract_type,
                events = interface.len(),
                "Loaded interface description from {}",
                path.as_ref().display()
            );
            interfaces.push(interface);
        }
        Ok(Self::from_interfaces(interfaces))
    }

    pub fn get(&self, contract_type: &str) -> Option<Arc<InterfaceDescription>> {
        self.interfaces.get(contract_type).cloned()
    }

    pub fn contract_types(&self) -> impl Iterator<Item = &str> {
        self.interfaces.keys().map(String::as_str)
    }
}

/// Adds `"anonymous": false` to event entries that omit it, so `JsonAbi` accepts
/// ABI files produced by older toolchains.
pub fn preprocess_abi_json(abi_json: &[u8]) -> Result<Vec<u8>> {
    let mut value: Value =
        serde_json::from_slice(abi_json).map_err(|e| RelayError::AbiLoad(e.to_string()))?;

    if let Value::Array(items) = &mut value {
        for item in items.iter_mut() {
            if let Value::Object(obj) = item {
                let is_event = obj.get("type").and_then(Value::as_str) == Some("event");
                if is_event && !obj.contains_key("anonymous") {
                    obj.insert("anonymous".to_string(), Value::Bool(false));
                }
            }
        }
    }

    serde_json::to_vec(&value).map_err(|e| RelayError::AbiLoad(e.to_string()))
}
