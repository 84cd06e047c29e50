//! Identity-preserving codecs for plain value kinds.
//!
//! Text, number, boolean, and JSON payloads travel unchanged; the state
//! codec guards the reserved placeholder kind that never reaches the wire.

use serde_json::Value;

use super::{ComponentCodec, DeserializeContext};
use crate::error::{ClientError, Result};

/// Pass-through codec for textual components.
pub struct TextCodec;

impl ComponentCodec for TextCodec {
    fn serialize(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }

    fn deserialize(&self, value: &Value, _ctx: &DeserializeContext) -> Result<Value> {
        Ok(value.clone())
    }
}

/// Pass-through codec for numeric components.
pub struct NumberCodec;

impl ComponentCodec for NumberCodec {
    fn serialize(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }

    fn deserialize(&self, value: &Value, _ctx: &DeserializeContext) -> Result<Value> {
        Ok(value.clone())
    }
}

/// Pass-through codec for boolean components.
pub struct BooleanCodec;

impl ComponentCodec for BooleanCodec {
    fn serialize(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }

    fn deserialize(&self, value: &Value, _ctx: &DeserializeContext) -> Result<Value> {
        Ok(value.clone())
    }
}

/// Pass-through codec for structured JSON components.
pub struct JsonCodec;

impl ComponentCodec for JsonCodec {
    fn serialize(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }

    fn deserialize(&self, value: &Value, _ctx: &DeserializeContext) -> Result<Value> {
        Ok(value.clone())
    }
}

/// Codec for the reserved state kind.
///
/// State positions are filled with placeholders before serialization and
/// dropped from outputs, so the codec itself must never see a value.
pub struct StateCodec;

impl ComponentCodec for StateCodec {
    fn serialize(&self, _value: &Value) -> Result<Value> {
        Err(ClientError::UnknownComponent(
            "state components are server-tracked and cannot be serialized".into(),
        ))
    }

    fn deserialize(&self, _value: &Value, _ctx: &DeserializeContext) -> Result<Value> {
        Err(ClientError::UnknownComponent(
            "state components are server-tracked and cannot be deserialized".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> DeserializeContext {
        DeserializeContext::new("/tmp", "http://localhost")
    }

    #[test]
    fn test_identity_roundtrip() {
        let cases = vec![
            json!("hello"),
            json!(42),
            json!(2.5),
            json!(true),
            json!({"k": [1, 2, 3]}),
            Value::Null,
        ];
        for v in cases {
            assert_eq!(TextCodec.serialize(&v).unwrap(), v);
            assert_eq!(
                TextCodec.deserialize(&TextCodec.serialize(&v).unwrap(), &ctx()).unwrap(),
                v
            );
            assert_eq!(NumberCodec.serialize(&v).unwrap(), v);
            assert_eq!(BooleanCodec.serialize(&v).unwrap(), v);
            assert_eq!(JsonCodec.serialize(&v).unwrap(), v);
        }
    }

    #[test]
    fn test_state_codec_rejects_everything() {
        assert!(StateCodec.serialize(&json!(null)).is_err());
        assert!(StateCodec.deserialize(&json!(null), &ctx()).is_err());
    }
}
