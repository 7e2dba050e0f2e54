mod array;
mod array_codec;
mod codec;
mod int_codec;
mod json_codec;
mod lz4_codec;
mod msgpack_codec;
mod passthrough;
mod registry;
mod utf8_codec;
mod value;
mod zstd_codec;

pub use array::{Array, Tree};
pub use array_codec::{ArrayCodec, TreeCodec};
pub use codec::Codec;
pub use int_codec::IntCodec;
pub use json_codec::JsonCodec;
pub use lz4_codec::Lz4Codec;
pub use msgpack_codec::MsgpackCodec;
pub use passthrough::PassThroughCodec;
pub use registry::{Record, Registry};
pub use rmpv;
pub use utf8_codec::Utf8Codec;
pub use value::Value;
pub use zstd_codec::ZstdCodec;
