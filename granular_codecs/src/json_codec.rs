use crate::codec::{unsupported, Codec};
use crate::value::Value;

/// Arbitrary structured values as JSON text. Tag: `json`.
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn tag(&self) -> &str {
        "json"
    }

    fn encode(&self, value: &Value) -> anyhow::Result<Vec<u8>> {
        match value {
            Value::Json(tree) => Ok(serde_json::to_vec(tree)?),
            other => Err(unsupported(self.tag(), other)),
        }
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Value> {
        Ok(Value::Json(serde_json::from_slice(bytes)?))
    }
}
