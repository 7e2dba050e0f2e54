use crate::codec::{unsupported, Codec};
use crate::value::Value;

/// Unsigned integer, little-endian, in as few bytes as the value needs.
/// Tag: `int`.
///
/// Zero encodes as an empty record; `u64::MAX` takes eight bytes.
pub struct IntCodec;

impl Codec for IntCodec {
    fn tag(&self) -> &str {
        "int"
    }

    fn encode(&self, value: &Value) -> anyhow::Result<Vec<u8>> {
        match value {
            Value::Int(n) => {
                let width = (64 - n.leading_zeros() as usize + 7) / 8;
                Ok(n.to_le_bytes()[..width].to_vec())
            }
            other => Err(unsupported(self.tag(), other)),
        }
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Value> {
        if bytes.len() > 8 {
            anyhow::bail!("int record is {} bytes, at most 8 fit in a u64", bytes.len());
        }
        let mut word = [0u8; 8];
        word[..bytes.len()].copy_from_slice(bytes);
        Ok(Value::Int(u64::from_le_bytes(word)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_are_minimal() {
        let codec = IntCodec;
        let cases: [(u64, usize); 6] = [(0, 0), (1, 1), (255, 1), (256, 2), (1 << 40, 6), (u64::MAX, 8)];
        for (n, width) in cases {
            let bytes = codec.encode(&Value::Int(n)).unwrap();
            assert_eq!(bytes.len(), width, "width of {}", n);
            assert_eq!(codec.decode(&bytes).unwrap(), Value::Int(n));
        }
    }

    #[test]
    fn rejects_oversized_records_and_wrong_variants() {
        assert!(IntCodec.decode(&[0u8; 9]).is_err());
        assert!(IntCodec.encode(&Value::Text("7".into())).is_err());
    }
}
