//! Wire encoding
//!
//! Rows arrive with JSON-encoded key and value; the worker wraps them in an
//! envelope naming the topic. Resolved timestamps are encoded by [`JsonEncoder`].

use bytes::Bytes;
use contracts::{ContractError, Encoder, ResolvedTimestamp};
use serde::Serialize;
use serde_json::value::RawValue;

/// Message body published for every row
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    key: &'a RawValue,
    value: &'a RawValue,
    topic: &'a str,
}

/// Wrap an encoded row for `topic`.
///
/// `key` and `value` are embedded verbatim and must each be one JSON value.
pub fn encode_row(topic: &str, key: &[u8], value: &[u8]) -> Result<Bytes, ContractError> {
    let key: &RawValue = serde_json::from_slice(key)
        .map_err(|e| ContractError::encode(format!("row key is not JSON: {e}")))?;
    let value: &RawValue = serde_json::from_slice(value)
        .map_err(|e| ContractError::encode(format!("row value is not JSON: {e}")))?;

    let body = serde_json::to_vec(&Envelope { key, value, topic })
        .map_err(|e| ContractError::encode(e.to_string()))?;
    Ok(Bytes::from(body))
}

/// JSON encoder for resolved timestamps: `{"resolved":"<wall>.<logical>"}`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

#[derive(Serialize)]
struct ResolvedBody {
    resolved: String,
}

impl Encoder for JsonEncoder {
    fn encode_resolved_timestamp(
        &self,
        _topic: &str,
        resolved: ResolvedTimestamp,
    ) -> Result<Bytes, ContractError> {
        let body = ResolvedBody {
            resolved: resolved.to_string(),
        };
        serde_json::to_vec(&body)
            .map(Bytes::from)
            .map_err(|e| ContractError::encode(e.to_string()))
    }
}
