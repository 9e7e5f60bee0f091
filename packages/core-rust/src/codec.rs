//! Wire codecs: MsgPack for the RPC transport, JSON objects for the gateway.
//!
//! MsgPack uses the named (map) struct encoding so that `#[serde(default)]`
//! and field order independence hold on both surfaces.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Errors from encoding or decoding wire payloads.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("msgpack encode failed: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),
    #[error("msgpack decode failed: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object, got {found}")]
    NotAnObject { found: &'static str },
}

/// Encodes a value as MsgPack with named struct fields.
///
/// # Errors
///
/// Returns `CodecError::MsgPackEncode` if serialization fails.
pub fn to_msgpack<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decodes a MsgPack payload.
///
/// # Errors
///
/// Returns `CodecError::MsgPackDecode` if the bytes do not decode as `T`.
pub fn from_msgpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Decodes a JSON request body into an object.
///
/// An empty (or all-whitespace) body decodes to an empty object, meaning
/// "no fields set".
///
/// # Errors
///
/// Returns `CodecError::Json` for malformed JSON and
/// `CodecError::NotAnObject` for any non-object top-level value.
pub fn decode_json_object(bytes: &[u8]) -> Result<Map<String, Value>, CodecError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(CodecError::NotAnObject {
            found: json_type_name(&other),
        }),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::messages::{RpcEnvelope, RpcRequest};
    use crate::resource::{ComicFields, ResourceFields, ResourceKind};

    #[test]
    fn empty_body_is_an_empty_object() {
        assert!(decode_json_object(b"").unwrap().is_empty());
        assert!(decode_json_object(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn non_object_body_is_rejected() {
        let err = decode_json_object(b"[1,2]").unwrap_err();
        assert!(matches!(err, CodecError::NotAnObject { found: "array" }));
    }

    #[test]
    fn malformed_body_is_rejected() {
        assert!(matches!(
            decode_json_object(b"{\"title\":"),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn rpc_envelope_survives_msgpack() {
        let envelope = RpcEnvelope {
            call_id: 9,
            timeout_ms: Some(250),
            request: RpcRequest::Update {
                id: 4,
                fields: ResourceFields::Comics(ComicFields {
                    title: "A".to_string(),
                    publisher: None,
                    ..ComicFields::default()
                }),
            },
        };
        let bytes = to_msgpack(&envelope).unwrap();
        let back: RpcEnvelope = from_msgpack(&bytes).unwrap();
        assert_eq!(back, envelope);
        assert_eq!(back.request.kind(), ResourceKind::Comics);
    }

    proptest! {
        #[test]
        fn comic_json_encoding_is_stable(
            title in ".{0,16}",
            year in any::<i32>(),
            quantity in any::<i32>(),
            cents in 0u32..1_000_000,
            publisher in proptest::option::of("[a-zA-Z ]{0,12}"),
        ) {
            let comic = ComicFields {
                title,
                author: "B".to_string(),
                year,
                language: "en".to_string(),
                price: f64::from(cents) / 100.0,
                quantity,
                publisher,
            };
            let first = serde_json::to_vec(&comic).unwrap();
            let decoded: ComicFields = serde_json::from_slice(&first).unwrap();
            prop_assert_eq!(&decoded, &comic);
            let second = serde_json::to_vec(&decoded).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
