use anyhow::Context;

use crate::codec::{unsupported, Codec};
use crate::value::Value;

/// UTF-8 text. Tag: `utf8`.
pub struct Utf8Codec;

impl Codec for Utf8Codec {
    fn tag(&self) -> &str {
        "utf8"
    }

    fn encode(&self, value: &Value) -> anyhow::Result<Vec<u8>> {
        match value {
            Value::Text(text) => Ok(text.as_bytes().to_vec()),
            other => Err(unsupported(self.tag(), other)),
        }
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Value> {
        let text = std::str::from_utf8(bytes).context("record is not valid utf-8")?;
        Ok(Value::Text(text.to_string()))
    }
}
