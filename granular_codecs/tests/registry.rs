/// Integration tests: typed records encoded through the registry survive a
/// trip through a sharded dataset, and tags resolve the way specs use them.
use std::sync::Arc;

use granular_codecs::rmpv::Value as Msgpack;
use granular_codecs::{
    Array, Codec, Lz4Codec, PassThroughCodec, Record, Registry, Tree, Utf8Codec, Value, ZstdCodec,
};
use granular_core::{
    DatasetReader, DatasetWriter, Field, Query, ReaderConfig, ShardedDatasetReader, ShardedDatasetWriter,
    ShardedWriterConfig, Spec,
};
use serde_json::json;
use tempfile::TempDir;

/// Generate `len` highly compressible bytes (repeating pattern).
fn compressible_bytes(len: usize) -> Vec<u8> {
    let pattern = b"the quick brown fox jumps over the lazy dog. ";
    (0..len).map(|i| pattern[i % pattern.len()]).collect()
}

fn spec() -> Spec {
    Spec::new([
        ("id", "int"),
        ("caption", "utf8"),
        ("tokens", "utf8[]"),
        ("meta", "json"),
        ("frames", "zstd[]"),
        ("thumb", "lz4"),
    ])
    .unwrap()
}

fn record(i: u64) -> Record {
    let mut r = Record::new();
    r.insert("id".into(), Value::Int(i * 1000));
    r.insert("caption".into(), Value::from(format!("clip number {}", i)));
    r.insert(
        "tokens".into(),
        Value::list((0..i % 3).map(|k| format!("tok{}", k))),
    );
    r.insert("meta".into(), Value::Json(json!({ "fps": 20, "index": i })));
    r.insert(
        "frames".into(),
        Value::list((0..2).map(|k| compressible_bytes(4096 + k * 10 + i as usize))),
    );
    r.insert("thumb".into(), Value::Bytes(compressible_bytes(512)));
    r
}

#[test]
fn test_typed_roundtrip_through_sharded_dataset() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::default();
    let spec = spec();

    let mut w = ShardedDatasetWriter::create(dir.path(), spec.clone(), ShardedWriterConfig::new(3)).unwrap();
    for i in 0..8 {
        w.append(&registry.encode(&spec, &record(i)).unwrap()).unwrap();
    }
    w.close().unwrap();

    let mut r = ShardedDatasetReader::open(dir.path(), &ReaderConfig::default()).unwrap();
    assert_eq!(r.len(), 8);
    assert_eq!(r.shards(), 3);
    for i in 0..8 {
        let datapoint = r.get(i).unwrap();
        assert_eq!(registry.decode(&spec, &datapoint).unwrap(), record(i));
    }

    // Compressed frames take less room than their raw size.
    let datapoint = r.get(0).unwrap();
    let stored = datapoint["frames"].as_list().unwrap();
    assert!(stored.iter().all(|frame| frame.len() < 4096));

    // Partial reads decode too.
    let partial = r.get_with(5, &Query::new().all("meta").range("frames", 1..2)).unwrap();
    let decoded = registry.decode(&spec, &partial).unwrap();
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded["meta"], Value::Json(json!({ "fps": 20, "index": 5 })));
    assert_eq!(
        decoded["frames"],
        Value::List(vec![Value::Bytes(compressible_bytes(4096 + 10 + 5))])
    );
}

#[test]
fn test_list_tags_resolve_to_element_codec() {
    let registry = Registry::default();
    assert_eq!(registry.get("utf8[]").unwrap().tag(), "utf8");
    assert_eq!(registry.get("bytes").unwrap().tag(), "bytes");
    assert!(registry.get("mp4").is_err());
    assert_eq!(registry.get("tree[]").unwrap().tag(), "tree");
    assert_eq!(
        registry.tags(),
        vec!["array", "bytes", "int", "json", "lz4", "msgpack", "tree", "utf8", "zstd"]
    );
}

#[test]
fn test_encode_rejects_mismatched_records() {
    let registry = Registry::default();
    let spec = spec();

    let mut missing = record(1);
    missing.remove("caption");
    assert!(registry.encode(&spec, &missing).is_err());

    let mut extra = record(1);
    extra.insert("bogus".into(), Value::Int(1));
    assert!(registry.encode(&spec, &extra).is_err());

    let mut not_a_list = record(1);
    not_a_list.insert("tokens".into(), Value::from("single"));
    let err = registry.encode(&spec, &not_a_list).unwrap_err().to_string();
    assert!(err.contains("tokens"), "{err}");

    let mut wrong_variant = record(1);
    wrong_variant.insert("id".into(), Value::from("seven"));
    assert!(registry.encode(&spec, &wrong_variant).is_err());
}

#[test]
fn test_custom_codecs_and_aliases() {
    let mut registry = Registry::empty();
    registry.register(Arc::new(Utf8Codec));
    registry.register_as("mp4", Arc::new(PassThroughCodec));
    registry.register_as("zstd19", Arc::new(ZstdCodec::new(19)));

    let spec = Spec::new([("name", "utf8"), ("clips", "mp4[]"), ("blob", "zstd19")]).unwrap();
    let mut rec = Record::new();
    rec.insert("name".into(), Value::from("a"));
    rec.insert("clips".into(), Value::List(vec![Value::Bytes(b"\x00\x00\x00\x18ftyp".to_vec())]));
    rec.insert("blob".into(), Value::Bytes(compressible_bytes(2048)));

    let datapoint = registry.encode(&spec, &rec).unwrap();
    assert_eq!(
        datapoint["clips"],
        Field::List(vec![b"\x00\x00\x00\x18ftyp".to_vec()])
    );
    assert_eq!(registry.decode(&spec, &datapoint).unwrap(), rec);
}

#[test]
fn test_corrupt_compressed_record_fails_to_decode() {
    assert!(Lz4Codec.decode(b"\x10\x00\x00\x00nope").is_err());
    assert!(ZstdCodec::default().decode(b"not a zstd frame").is_err());
    assert!(Utf8Codec.decode(&[0xff, 0xfe]).is_err());
}

#[test]
fn test_msgpack_array_and_tree_keys_roundtrip() {
    let dir = TempDir::new().unwrap();
    let registry = Registry::default();
    let spec = Spec::new([
        ("foo", "int"),
        ("bar", "utf8[]"),
        ("baz", "msgpack"),
        ("pose", "array"),
        ("frames", "array[]"),
        ("extra", "tree"),
    ])
    .unwrap();

    let floats = |values: &[f32]| -> Vec<u8> { values.iter().flat_map(|v| v.to_le_bytes()).collect() };
    let pose = Array::new("<f4", vec![3], floats(&[0.0, 1.0, -2.5])).unwrap();
    let frames: Vec<Array> = (0..3u8)
        .map(|k| Array::new("|u1", vec![2, 4], vec![k; 8]).unwrap())
        .collect();
    let extra = Tree::Map(vec![
        ("reward".into(), Tree::Leaf(Msgpack::F64(0.25))),
        ("obs".into(), Tree::List(vec![pose.clone().into(), Tree::Leaf(Msgpack::Nil)])),
    ]);

    let mut rec = Record::new();
    rec.insert("foo".into(), Value::Int(42));
    rec.insert("bar".into(), Value::list(["hello", "world"]));
    rec.insert(
        "baz".into(),
        Value::Msgpack(Msgpack::Array(vec![Msgpack::from(1u64), Msgpack::from("two")])),
    );
    rec.insert("pose".into(), Value::Array(pose));
    rec.insert("frames".into(), Value::list(frames.clone()));
    rec.insert("extra".into(), Value::Tree(extra));

    let mut w = DatasetWriter::create(dir.path(), spec.clone()).unwrap();
    w.append(&registry.encode(&spec, &rec).unwrap()).unwrap();
    w.close().unwrap();

    let mut r = DatasetReader::open(dir.path(), &ReaderConfig::default()).unwrap();
    assert_eq!(registry.decode(&spec, &r.get(0).unwrap()).unwrap(), rec);

    let middle = r.get_with(0, &Query::new().range("frames", 1..2)).unwrap();
    let decoded = registry.decode(&spec, &middle).unwrap();
    assert_eq!(decoded["frames"], Value::list(vec![frames[1].clone()]));
}
