use crate::value::Value;

/// Encoder/decoder pair for one type tag.
///
/// Each `Codec` implementation:
/// - Is identified by the type tag it is registered under (`utf8`, `int`, ...).
///   A list-valued tag such as `utf8[]` uses the codec of its element tag.
/// - Turns one [`Value`] into one record's bytes and back. The container
///   never looks inside those bytes, only at their length.
/// - Rejects values of a variant it does not handle rather than guessing.
pub trait Codec: Send + Sync {
    /// Type tag this codec is registered under by default.
    fn tag(&self) -> &str;

    /// Encode a single (non-list) value.
    fn encode(&self, value: &Value) -> anyhow::Result<Vec<u8>>;

    /// Decode the bytes of a single record.
    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Value>;
}

/// Error for a value variant a codec does not accept.
pub(crate) fn unsupported(tag: &str, value: &Value) -> anyhow::Error {
    anyhow::anyhow!("codec '{}' cannot encode a {} value", tag, value.kind())
}
