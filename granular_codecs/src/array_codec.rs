use crate::array::{pack, unpack, Array, Tree};
use crate::codec::{unsupported, Codec};
use crate::value::Value;

/// One dense array as a msgpack `[dtype, shape, data]` triple. Tag: `array`.
pub struct ArrayCodec;

impl Codec for ArrayCodec {
    fn tag(&self) -> &str {
        "array"
    }

    fn encode(&self, value: &Value) -> anyhow::Result<Vec<u8>> {
        match value {
            Value::Array(array) => pack(&array.to_msgpack()),
            other => Err(unsupported(self.tag(), other)),
        }
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Value> {
        Ok(Value::Array(Array::from_msgpack(&unpack(bytes)?)?))
    }
}

/// Nested lists and maps of arrays and scalars, as msgpack with every array
/// written as `["_", dtype, shape, data]`. Tag: `tree`.
pub struct TreeCodec;

impl Codec for TreeCodec {
    fn tag(&self) -> &str {
        "tree"
    }

    fn encode(&self, value: &Value) -> anyhow::Result<Vec<u8>> {
        match value {
            Value::Tree(tree) => pack(&tree.to_msgpack()),
            other => Err(unsupported(self.tag(), other)),
        }
    }

    fn decode(&self, bytes: &[u8]) -> anyhow::Result<Value> {
        Ok(Value::Tree(Tree::from_msgpack(unpack(bytes)?)?))
    }
}
