//! Message envelope codec.
//!
//! Serializes the wire shapes exchanged with the sandboxed engine and the
//! native layer to JSON text, and normalises numbers that cannot cross a
//! JSON boundary safely.
//!
//! # Integer normalisation
//!
//! Integers whose magnitude exceeds `2^53 - 1` are turned into decimal
//! strings; smaller integers stay plain numbers. The conversion is one-way:
//! decoding never reconstructs the original integer type, so a token id
//! minted as a 256-bit integer comes back as a `String`.
//!
//! ```text
//! inbound text ──► decode_inbound ──┬─► Ready
//!                                   ├─► EngineError
//!                                   ├─► Storage(StorageRequest)
//!                                   └─► Response(BridgeResponse)
//! ```

use num_bigint::BigInt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{BridgeError, CodecError};

/// Largest integer representable exactly by an IEEE-754 double.
pub const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

/// Outbound request posted to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Reply to a [`BridgeRequest`], matched by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeResponse {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Collapse into the caller-facing result. `ok` decides which field counts.
    pub fn into_result(self, operation: &str) -> Result<Value, BridgeError> {
        if self.ok {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(BridgeError::remote(
                operation,
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ))
        }
    }
}

/// Storage verb requested by the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Get,
    Set,
    Remove,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "storageGet",
            Self::Set => "storageSet",
            Self::Remove => "storageRemove",
        }
    }
}

/// Storage call issued by the sandboxed engine against host storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRequest {
    pub kind: StorageKind,
    pub id: String,
    pub key: String,
    pub value: Option<String>,
}

/// Host reply to a [`StorageRequest`].
///
/// `value` is always serialized, so a miss reads as `"value": null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageResponse {
    pub id: String,
    pub ok: bool,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StorageResponse {
    pub fn success(id: impl Into<String>, value: Option<String>) -> Self {
        Self {
            id: id.into(),
            ok: true,
            value,
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: false,
            value: None,
            error: Some(error.into()),
        }
    }
}

/// Everything the host posts into the sandbox.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Request(BridgeRequest),
    Storage(StorageResponse),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum TaggedOutbound<'a> {
    StorageResponse(&'a StorageResponse),
}

/// Everything the sandbox may post back to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Ready,
    EngineError(String),
    Storage(StorageRequest),
    Response(BridgeResponse),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum TaggedInbound {
    Ready,
    Error {
        #[serde(default)]
        error: Option<Value>,
    },
    StorageGet {
        id: String,
        key: String,
    },
    StorageSet {
        id: String,
        key: String,
        #[serde(default)]
        value: Option<String>,
    },
    StorageRemove {
        id: String,
        key: String,
    },
}

/// Encode any serializable value as wire text.
pub fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|e| CodecError::Serialize {
        what: std::any::type_name::<T>(),
        reason: e.to_string(),
    })
}

/// Decode wire text into `T`.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode an outbound envelope.
pub fn encode_outbound(message: &OutboundMessage) -> Result<String, CodecError> {
    match message {
        OutboundMessage::Request(request) => encode(request),
        OutboundMessage::Storage(response) => encode(&TaggedOutbound::StorageResponse(response)),
    }
}

/// Decode an inbound envelope.
///
/// Messages with a `type` field are control or storage messages; untyped
/// objects carrying `id` and `ok` are request responses.
pub fn decode_inbound(text: &str) -> Result<InboundMessage, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    let Some(object) = value.as_object() else {
        return Err(CodecError::UnexpectedShape(
            "inbound message is not a JSON object".to_string(),
        ));
    };

    if object.contains_key("type") {
        let tagged: TaggedInbound = serde_json::from_value(value)
            .map_err(|e| CodecError::UnexpectedShape(e.to_string()))?;
        return Ok(match tagged {
            TaggedInbound::Ready => InboundMessage::Ready,
            TaggedInbound::Error { error } => InboundMessage::EngineError(match error {
                Some(Value::String(message)) => message,
                Some(other) => other.to_string(),
                None => "unknown engine error".to_string(),
            }),
            TaggedInbound::StorageGet { id, key } => InboundMessage::Storage(StorageRequest {
                kind: StorageKind::Get,
                id,
                key,
                value: None,
            }),
            TaggedInbound::StorageSet { id, key, value } => {
                InboundMessage::Storage(StorageRequest {
                    kind: StorageKind::Set,
                    id,
                    key,
                    value,
                })
            }
            TaggedInbound::StorageRemove { id, key } => InboundMessage::Storage(StorageRequest {
                kind: StorageKind::Remove,
                id,
                key,
                value: None,
            }),
        });
    }

    if object.contains_key("id") && object.contains_key("ok") {
        let response: BridgeResponse = serde_json::from_value(value)
            .map_err(|e| CodecError::UnexpectedShape(e.to_string()))?;
        return Ok(InboundMessage::Response(response));
    }

    Err(CodecError::UnexpectedShape(
        "message has neither a type nor an id/ok pair".to_string(),
    ))
}

/// Rewrite every integer outside the safe range as a decimal string.
pub fn normalize_numbers(value: Value) -> Value {
    match value {
        Value::Number(number) => normalize_number(number),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, normalize_numbers(value)))
                .collect::<Map<_, _>>(),
        ),
        other => other,
    }
}

fn normalize_number(number: Number) -> Value {
    if let Some(n) = number.as_u64() {
        if n > MAX_SAFE_INTEGER {
            return Value::String(n.to_string());
        }
    } else if let Some(n) = number.as_i64()
        && n.unsigned_abs() > MAX_SAFE_INTEGER
    {
        return Value::String(n.to_string());
    }
    Value::Number(number)
}

/// JSON-safe form of an arbitrary-precision integer.
pub fn big_int_to_json(n: &BigInt) -> Value {
    let limit = BigInt::from(MAX_SAFE_INTEGER);
    if n <= &limit && n >= &-limit {
        // In range, so the i64 conversion cannot fail.
        if let Ok(small) = i64::try_from(n) {
            return Value::from(small);
        }
    }
    Value::String(n.to_string())
}
