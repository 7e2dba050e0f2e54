use crate::array::{pack, unpack};
use crate::codec::{unsupported, Codec};
use crate::value::Value;

/// Any msgpack value. Tag: `msgpack`.
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn tag(&self) -> &str {
        "msgpack"
    }

    fn encode(&self, value: &Value) -> anyhow::Result<Vec<u8>> {
        match value {
            Value::Msgpack(inner) => pack(inner),
            other => Err(unsupported(self.tag(), other)),
        }
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Value> {
        Ok(Value::Msgpack(unpack(bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmpv::Value as Msgpack;

    #[test]
    fn reads_what_other_msgpack_writers_produce() {
        // {"a": [1, -2, 1.5], "b": nil}
        let bytes = [
            0x82, 0xa1, b'a', 0x93, 0x01, 0xfe, 0xcb, 0x3f, 0xf8, 0, 0, 0, 0, 0, 0, 0xa1, b'b', 0xc0,
        ];
        let expected = Msgpack::Map(vec![
            (
                "a".into(),
                Msgpack::Array(vec![1u64.into(), (-2i64).into(), 1.5f64.into()]),
            ),
            ("b".into(), Msgpack::Nil),
        ]);
        assert_eq!(MsgpackCodec.decode(&bytes).unwrap(), Value::Msgpack(expected.clone()));
        assert_eq!(MsgpackCodec.encode(&Value::Msgpack(expected)).unwrap(), bytes.to_vec());
    }

    #[test]
    fn rejects_other_variants_and_garbage() {
        assert!(MsgpackCodec.encode(&Value::Int(1)).is_err());
        assert!(MsgpackCodec.decode(&[0xc1]).is_err());
        assert!(MsgpackCodec.decode(&[0x92, 0x01]).is_err());
    }
}
