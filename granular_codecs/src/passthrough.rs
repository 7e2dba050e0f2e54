use crate::codec::{unsupported, Codec};
use crate::value::Value;

/// Raw bytes stored verbatim. Tag: `bytes`.
///
/// Useful for payloads that are already encoded (JPEG, MP4, msgpack produced
/// elsewhere) and for verifying the container independently of any codec.
pub struct PassThroughCodec;

impl Codec for PassThroughCodec {
    fn tag(&self) -> &str {
        "bytes"
    }

    fn encode(&self, value: &Value) -> anyhow::Result<Vec<u8>> {
        match value {
            Value::Bytes(bytes) => Ok(bytes.clone()),
            other => Err(unsupported(self.tag(), other)),
        }
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Value> {
        Ok(Value::Bytes(bytes.to_vec()))
    }
}
