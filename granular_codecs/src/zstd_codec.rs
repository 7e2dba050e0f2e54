use crate::codec::{unsupported, Codec};
use crate::value::Value;

/// Zstandard-compressed bytes. Tag: `zstd`.
///
/// Each record is compressed on its own, so any record can be decoded
/// without touching its neighbours.
///
/// Best for: text-like blobs, serialized arrays, anything not already
/// compressed.
pub struct ZstdCodec {
    /// Compression level (1 = fast / larger, 22 = slow / smallest).
    pub level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Codec for ZstdCodec {
    fn tag(&self) -> &str {
        "zstd"
    }

    fn encode(&self, value: &Value) -> anyhow::Result<Vec<u8>> {
        match value {
            Value::Bytes(raw) => Ok(zstd::bulk::compress(raw, self.level)?),
            other => Err(unsupported(self.tag(), other)),
        }
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Value> {
        // The zstd frame carries its own content size.
        Ok(Value::Bytes(zstd::decode_all(bytes)?))
    }
}
