use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use crate::codec::{unsupported, Codec};
use crate::value::Value;

/// LZ4-compressed bytes with a size prefix. Tag: `lz4`.
///
/// Fastest decompression of the bundled compressors; pick it for hot fields
/// read on every training step.
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn tag(&self) -> &str {
        "lz4"
    }

    fn encode(&self, value: &Value) -> anyhow::Result<Vec<u8>> {
        match value {
            Value::Bytes(raw) => Ok(compress_prepend_size(raw)),
            other => Err(unsupported(self.tag(), other)),
        }
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Value> {
        let raw = decompress_size_prepended(bytes)
            .map_err(|e| anyhow::anyhow!("lz4 decompress error: {}", e))?;
        Ok(Value::Bytes(raw))
    }
}
