//! Event decoder and normalizer.
//!
//! A raw log is first decoded against its [`EventSchema`] into typed [`FieldValue`]s,
//! then normalized into a [`Payload`] (`field -> integer | text | bool`) at the
//! propagation boundary.

use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, Bytes, B256, I256, U256};

use crate::chain::RawLog;
use crate::error::DecodeError;
use crate::registry::{EventSchema, FieldKind, FieldSpec};
use crate::types::{NormalizedValue, Payload};

/// Decoded value of one event field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Uint(U256),
    Int(I256),
    FixedBytes(Vec<u8>),
    Address(Address),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
}

/// Decoded event, fields in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub name: String,
    pub fields: Vec<(String, FieldValue)>,
}

impl DecodedEvent {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Decode indexed fields from the log topics and the others from the data section.
pub fn decode_log(schema: &EventSchema, log: &RawLog) -> Result<DecodedEvent, DecodeError> {
    let data_specs: Vec<&FieldSpec> = schema.data_fields().collect();
    let mut data_values = decode_data(schema, &data_specs, &log.data)?.into_iter();

    // topics[0] is the event signature
    let mut topics = log.topics.iter().skip(1);

    let mut fields = Vec::with_capacity(schema.fields.len());
    for spec in &schema.fields {
        let value = if spec.indexed {
            let topic = topics.next().ok_or_else(|| DecodeError::MissingTopic {
                event: schema.name.clone(),
                field: spec.name.clone(),
            })?;
            check_word(spec.kind, topic.as_slice()).map_err(|reason| DecodeError::Payload {
                event: schema.name.clone(),
                reason: format!("topic of field '{}': {}", spec.name, reason),
            })?;
            decode_topic(spec.kind, topic)
        } else {
            data_values.next().ok_or_else(|| DecodeError::Payload {
                event: schema.name.clone(),
                reason: format!("no value decoded for field '{}'", spec.name),
            })?
        };
        fields.push((spec.name.clone(), value));
    }

    Ok(DecodedEvent {
        name: schema.name.clone(),
        fields,
    })
}

fn decode_data(
    schema: &EventSchema,
    specs: &[&FieldSpec],
    data: &Bytes,
) -> Result<Vec<FieldValue>, DecodeError> {
    if specs.is_empty() {
        return Ok(Vec::new());
    }

    let payload_error = |reason: String| DecodeError::Payload {
        event: schema.name.clone(),
        reason,
    };

    // an all-static tuple has one word per field and nothing else
    if specs.iter().all(|s| s.kind.is_static()) && data.len() != 32 * specs.len() {
        return Err(payload_error(format!(
            "expected {} bytes of data, got {}",
            32 * specs.len(),
            data.len()
        )));
    }

    // head word i belongs to field i; dynamic fields hold an offset there
    for (position, spec) in specs.iter().enumerate() {
        if !spec.kind.is_static() {
            continue;
        }
        if let Some(word) = data.get(32 * position..32 * (position + 1)) {
            check_word(spec.kind, word)
                .map_err(|reason| payload_error(format!("field '{}': {}", spec.name, reason)))?;
        }
    }

    let tuple_type = DynSolType::Tuple(specs.iter().map(|s| s.kind.sol_type()).collect());
    let decoded = tuple_type
        .abi_decode_params(data)
        .map_err(|e| payload_error(format!("failed to decode log data: {}", e)))?;

    let DynSolValue::Tuple(values) = decoded else {
        return Err(payload_error("expected tuple from log data decoding".to_string()));
    };

    specs
        .iter()
        .zip(values)
        .map(|(spec, value)| {
            from_dyn_value(value).ok_or_else(|| {
                payload_error(format!("field '{}' decoded to an unexpected kind", spec.name))
            })
        })
        .collect()
}

/// Checks that a 32-byte word is a valid encoding of `kind`. The decoder itself reads
/// narrow integers, bools and addresses without looking at the padding.
fn check_word(kind: FieldKind, word: &[u8]) -> Result<(), String> {
    match kind {
        FieldKind::Uint(bits) if bits < 256 => {
            if word[..(256 - bits) / 8].iter().any(|&b| b != 0) {
                return Err(format!("value does not fit uint{}", bits));
            }
        }
        FieldKind::Int(bits) if bits < 256 => {
            let pad = (256 - bits) / 8;
            let sign = if word[pad] & 0x80 != 0 { 0xff } else { 0x00 };
            if word[..pad].iter().any(|&b| b != sign) {
                return Err(format!("value does not fit int{}", bits));
            }
        }
        FieldKind::Bool => {
            if word[..31].iter().any(|&b| b != 0) || word[31] > 1 {
                return Err("bool word is neither 0 nor 1".to_string());
            }
        }
        FieldKind::Address => {
            if word[..12].iter().any(|&b| b != 0) {
                return Err("address word has non-zero padding".to_string());
            }
        }
        FieldKind::FixedBytes(len) => {
            if word[len..].iter().any(|&b| b != 0) {
                return Err(format!("bytes{} word has non-zero padding", len));
            }
        }
        _ => {}
    }
    Ok(())
}

fn from_dyn_value(value: DynSolValue) -> Option<FieldValue> {
    match value {
        DynSolValue::Uint(u, _) => Some(FieldValue::Uint(u)),
        DynSolValue::Int(i, _) => Some(FieldValue::Int(i)),
        DynSolValue::FixedBytes(word, len) => Some(FieldValue::FixedBytes(word[..len].to_vec())),
        DynSolValue::Address(addr) => Some(FieldValue::Address(addr)),
        DynSolValue::Bool(b) => Some(FieldValue::Bool(b)),
        DynSolValue::String(s) => Some(FieldValue::String(s)),
        DynSolValue::Bytes(b) => Some(FieldValue::Bytes(b)),
        _ => None,
    }
}

fn decode_topic(kind: FieldKind, topic: &B256) -> FieldValue {
    match kind {
        FieldKind::Uint(_) => FieldValue::Uint(U256::from_be_bytes(topic.0)),
        FieldKind::Int(_) => FieldValue::Int(I256::from_raw(U256::from_be_bytes(topic.0))),
        FieldKind::FixedBytes(len) => FieldValue::FixedBytes(topic[..len].to_vec()),
        FieldKind::Address => FieldValue::Address(Address::from_word(*topic)),
        FieldKind::Bool => FieldValue::Bool(topic[31] != 0),
        // indexed dynamic values are stored as their keccak256 hash only
        FieldKind::String | FieldKind::Bytes => FieldValue::FixedBytes(topic.to_vec()),
    }
}

/// Turn a decoded event into its generic payload.
pub fn normalize(event: &DecodedEvent) -> Result<Payload, DecodeError> {
    let mut payload = Payload::new();
    for (name, value) in &event.fields {
        let normalized = match value {
            FieldValue::Uint(u) => NormalizedValue::Integer(to_i128(name, u.to_string())?),
            FieldValue::Int(i) => NormalizedValue::Integer(to_i128(name, i.to_string())?),
            FieldValue::FixedBytes(bytes) => NormalizedValue::Text(fixed_bytes_to_text(bytes)),
            FieldValue::Address(addr) => NormalizedValue::Text(format!("{:#x}", addr)),
            FieldValue::Bool(b) => NormalizedValue::Bool(*b),
            FieldValue::String(s) => NormalizedValue::Text(s.clone()),
            FieldValue::Bytes(bytes) => NormalizedValue::Text(format!("0x{}", hex::encode(bytes))),
        };
        payload.insert(name.clone(), normalized);
    }
    Ok(payload)
}

pub fn decode_and_normalize(schema: &EventSchema, log: &RawLog) -> Result<Payload, DecodeError> {
    normalize(&decode_log(schema, log)?)
}

fn to_i128(field: &str, decimal: String) -> Result<i128, DecodeError> {
    decimal.parse::<i128>().map_err(|_| DecodeError::IntegerOverflow {
        field: field.to_string(),
        value: decimal,
    })
}

/// Each byte becomes one character; trailing zero bytes are dropped.
///
/// Meant for zero-padded short strings stored in `bytesN`; arbitrary binary values come
/// out as unreadable text.
pub fn fixed_bytes_to_text(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    bytes[..end].iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InterfaceDescription;

    const ABI: &str = r#"[
        {
            "type": "event",
            "name": "__shake",
            "inputs": [
                {"name": "hid", "type": "uint256", "indexed": false},
                {"name": "state", "type": "uint8", "indexed": false},
                {"name": "balance", "type": "uint256", "indexed": false},
                {"name": "offchain", "type": "bytes32", "indexed": false}
            ]
        },
        {
            "type": "event",
            "name": "Transfer",
            "inputs": [
                {"name": "from", "type": "address", "indexed": true},
                {"name": "to", "type": "address", "indexed": true},
                {"name": "value", "type": "uint256", "indexed": false}
            ]
        },
        {
            "type": "event",
            "name": "Note",
            "inputs": [
                {"name": "delta", "type": "int64", "indexed": false},
                {"name": "memo", "type": "string", "indexed": false},
                {"name": "blob", "type": "bytes", "indexed": false},
                {"name": "open", "type": "bool", "indexed": false}
            ]
        }
    ]"#;

    fn interface() -> InterfaceDescription {
        InterfaceDescription::from_json_str("test", ABI).unwrap()
    }

    fn raw_log(topics: Vec<B256>, data: Vec<u8>) -> RawLog {
        RawLog {
            address: Address::repeat_byte(0xab),
            topics,
            data: data.into(),
            block_number: 100,
            log_index: 2,
            transaction_hash: B256::repeat_byte(0xde),
        }
    }

    fn padded(text: &[u8]) -> B256 {
        let mut word = B256::ZERO;
        word[..text.len()].copy_from_slice(text);
        word
    }

    fn shake_data(hid: u64, state: u64, balance: u64, offchain: &[u8]) -> Vec<u8> {
        DynSolValue::Tuple(vec![
            DynSolValue::Uint(U256::from(hid), 256),
            DynSolValue::Uint(U256::from(state), 8),
            DynSolValue::Uint(U256::from(balance), 256),
            DynSolValue::FixedBytes(padded(offchain), 32),
        ])
        .abi_encode_params()
    }

    #[test]
    fn decodes_and_normalizes_shake() {
        let interface = interface();
        let schema = interface.event("__shake").unwrap();
        let log = raw_log(vec![schema.topic], shake_data(7, 1, 500, b"hi"));

        let decoded = decode_log(schema, &log).unwrap();
        assert_eq!(decoded.field("hid"), Some(&FieldValue::Uint(U256::from(7))));
        assert_eq!(decoded.field("offchain").map(|v| match v {
            FieldValue::FixedBytes(b) => b.len(),
            _ => 0,
        }), Some(32));

        let payload = normalize(&decoded).unwrap();
        assert_eq!(payload["hid"], NormalizedValue::Integer(7));
        assert_eq!(payload["state"], NormalizedValue::Integer(1));
        assert_eq!(payload["balance"], NormalizedValue::Integer(500));
        assert_eq!(payload["offchain"], NormalizedValue::Text("hi".to_string()));
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"balance":500,"hid":7,"offchain":"hi","state":1}"#
        );
    }

    #[test]
    fn rejects_payload_of_wrong_length() {
        let interface = interface();
        let schema = interface.event("__shake").unwrap();

        let mut data = shake_data(7, 1, 500, b"hi");
        data.truncate(96);
        let err = decode_log(schema, &raw_log(vec![schema.topic], data)).unwrap_err();
        assert!(matches!(err, DecodeError::Payload { .. }));

        let mut data = shake_data(7, 1, 500, b"hi");
        data.extend_from_slice(&[0u8; 32]);
        assert!(decode_log(schema, &raw_log(vec![schema.topic], data)).is_err());
    }

    #[test]
    fn rejects_out_of_range_narrow_values() {
        let interface = interface();
        let schema = interface.event("__shake").unwrap();

        // `state` is a uint8 but the word carries 1000
        let mut data = shake_data(7, 1, 500, b"hi");
        data[32..64].copy_from_slice(&U256::from(1000).to_be_bytes::<32>());
        let err = decode_log(schema, &raw_log(vec![schema.topic], data)).unwrap_err();
        assert!(matches!(err, DecodeError::Payload { reason, .. } if reason.contains("uint8")));
    }

    #[test]
    fn checks_word_encoding_per_kind() {
        let mut word = [0u8; 32];
        word[31] = 0xff;
        assert!(check_word(FieldKind::Uint(8), &word).is_ok());
        assert!(check_word(FieldKind::Bool, &word).is_err());

        // -1 as int8 is sign-extended over the whole word
        assert!(check_word(FieldKind::Int(8), &[0xff; 32]).is_ok());
        assert!(check_word(FieldKind::Int(8), &word).is_err());
        let mut bad = [0xff; 32];
        bad[31] = 0x7f;
        bad[30] = 0x00;
        assert!(check_word(FieldKind::Int(8), &bad).is_err());

        let mut address = [0u8; 32];
        address[0] = 1;
        assert!(check_word(FieldKind::Address, &address).is_err());
        assert!(check_word(FieldKind::FixedBytes(32), &address).is_ok());

        let mut hi = [0u8; 32];
        hi[..3].copy_from_slice(&[0x68, 0x69, 0x01]);
        assert!(check_word(FieldKind::FixedBytes(2), &hi).is_err());
        assert!(check_word(FieldKind::FixedBytes(3), &hi).is_ok());
    }

    #[test]
    fn decodes_indexed_fields_from_topics() {
        let interface = interface();
        let schema = interface.event("Transfer").unwrap();
        let from = Address::repeat_byte(0xAA);
        let to = Address::repeat_byte(0x0B);
        let data = U256::from(1_000_000_000_000_000_000u128).to_be_bytes::<32>().to_vec();

        let log = raw_log(vec![schema.topic, from.into_word(), to.into_word()], data);
        let payload = decode_and_normalize(schema, &log).unwrap();

        assert_eq!(
            payload["from"],
            NormalizedValue::Text("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string())
        );
        assert_eq!(
            payload["to"],
            NormalizedValue::Text("0x0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b".to_string())
        );
        assert_eq!(payload["value"], NormalizedValue::Integer(1_000_000_000_000_000_000));
    }

    #[test]
    fn missing_topic_for_indexed_field() {
        let interface = interface();
        let schema = interface.event("Transfer").unwrap();
        let data = U256::from(1).to_be_bytes::<32>().to_vec();

        let log = raw_log(vec![schema.topic, Address::ZERO.into_word()], data);
        assert_eq!(
            decode_log(schema, &log).unwrap_err(),
            DecodeError::MissingTopic {
                event: "Transfer".to_string(),
                field: "to".to_string()
            }
        );
    }

    #[test]
    fn normalizes_dynamic_and_signed_fields() {
        let interface = interface();
        let schema = interface.event("Note").unwrap();
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Int("-5".parse::<I256>().unwrap(), 64),
            DynSolValue::String("shaken".to_string()),
            DynSolValue::Bytes(vec![0xca, 0xfe]),
            DynSolValue::Bool(true),
        ])
        .abi_encode_params();

        let payload = decode_and_normalize(schema, &raw_log(vec![schema.topic], data)).unwrap();
        assert_eq!(payload["delta"], NormalizedValue::Integer(-5));
        assert_eq!(payload["memo"], NormalizedValue::Text("shaken".to_string()));
        assert_eq!(payload["blob"], NormalizedValue::Text("0xcafe".to_string()));
        assert_eq!(payload["open"], NormalizedValue::Bool(true));
    }

    #[test]
    fn integer_wider_than_i128_is_rejected() {
        let event = DecodedEvent {
            name: "__shake".to_string(),
            fields: vec![("balance".to_string(), FieldValue::Uint(U256::MAX))],
        };
        assert!(matches!(
            normalize(&event),
            Err(DecodeError::IntegerOverflow { field, .. }) if field == "balance"
        ));
    }

    #[test]
    fn fixed_bytes_trim_trailing_zeros_only() {
        let mut raw = [0u8; 32];
        raw[0] = 0x68;
        raw[1] = 0x69;
        assert_eq!(fixed_bytes_to_text(&raw), "hi");

        assert_eq!(fixed_bytes_to_text(&[0, 0x68, 0x69, 0]), "\u{0}hi");
        assert_eq!(fixed_bytes_to_text(&[0u8; 32]), "");
        assert_eq!(fixed_bytes_to_text(&[0xff]), "\u{ff}");
    }
}
