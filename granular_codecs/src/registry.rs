use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Context;
use granular_core::spec::LIST_SUFFIX;
use granular_core::{is_list_tag, Datapoint, Field, Spec};

use crate::codec::Codec;
use crate::value::Value;
use crate::{
    ArrayCodec, IntCodec, JsonCodec, Lz4Codec, MsgpackCodec, PassThroughCodec, TreeCodec, Utf8Codec, ZstdCodec,
};

/// Decoded datapoint: key → value.
pub type Record = BTreeMap<String, Value>;

/// Lookup table from type tag to codec.
///
/// Built by the host application and handed to whatever turns values into
/// datapoints; the storage layer never consults it.
#[derive(Clone)]
pub struct Registry {
    codecs: HashMap<String, Arc<dyn Codec>>,
}

impl Default for Registry {
    /// Registry holding every bundled codec under its own tag.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(PassThroughCodec));
        registry.register(Arc::new(Utf8Codec));
        registry.register(Arc::new(IntCodec));
        registry.register(Arc::new(JsonCodec));
        registry.register(Arc::new(MsgpackCodec));
        registry.register(Arc::new(ArrayCodec));
        registry.register(Arc::new(TreeCodec));
        registry.register(Arc::new(ZstdCodec::default()));
        registry.register(Arc::new(Lz4Codec));
        registry
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Register `codec` under its own tag, returning any codec it replaces.
    pub fn register(&mut self, codec: Arc<dyn Codec>) -> Option<Arc<dyn Codec>> {
        let tag = codec.tag().to_string();
        self.register_as(tag, codec)
    }

    /// Register `codec` under `tag`, e.g. a `ZstdCodec` at level 19 as
    /// `"zstd19"`.
    pub fn register_as(&mut self, tag: impl Into<String>, codec: Arc<dyn Codec>) -> Option<Arc<dyn Codec>> {
        self.codecs.insert(tag.into(), codec)
    }

    /// Codec for `tag`; a list tag resolves to its element tag.
    pub fn get(&self, tag: &str) -> anyhow::Result<Arc<dyn Codec>> {
        let element = tag.strip_suffix(LIST_SUFFIX).unwrap_or(tag);
        self.codecs
            .get(element)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no codec registered for type tag '{}'", tag))
    }

    pub fn tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Encode a full record into a datapoint ready for appending. Every spec
    /// key must be present; list-valued keys take a `Value::List`.
    pub fn encode(&self, spec: &Spec, record: &Record) -> anyhow::Result<Datapoint> {
        if let Some(extra) = record.keys().find(|k| !spec.contains(k)) {
            anyhow::bail!("key '{}' is not in the spec", extra);
        }
        let mut datapoint = Datapoint::new();
        for (key, tag) in spec.iter() {
            let value = record
                .get(key)
                .ok_or_else(|| anyhow::anyhow!("record is missing key '{}'", key))?;
            let codec = self.get(tag)?;
            let field = if is_list_tag(tag) {
                let items = value
                    .as_list()
                    .ok_or_else(|| anyhow::anyhow!("key '{}' has list tag '{}' but got a {} value", key, tag, value.kind()))?;
                Field::List(
                    items
                        .iter()
                        .map(|item| codec.encode(item))
                        .collect::<anyhow::Result<_>>()
                        .with_context(|| format!("encoding key '{}'", key))?,
                )
            } else {
                Field::Scalar(codec.encode(value).with_context(|| format!("encoding key '{}'", key))?)
            };
            datapoint.insert(key.to_string(), field);
        }
        Ok(datapoint)
    }

    /// Decode a full or partial datapoint read from a dataset.
    pub fn decode(&self, spec: &Spec, datapoint: &Datapoint) -> anyhow::Result<Record> {
        let mut record = Record::new();
        for (key, field) in datapoint {
            let tag = spec
                .tag(key)
                .ok_or_else(|| anyhow::anyhow!("key '{}' is not in the spec", key))?;
            let codec = self.get(tag)?;
            let value = match field {
                Field::Scalar(bytes) => codec.decode(bytes),
                Field::List(items) => items
                    .iter()
                    .map(|item| codec.decode(item))
                    .collect::<anyhow::Result<Vec<_>>>()
                    .map(Value::List),
            }
            .with_context(|| format!("decoding key '{}'", key))?;
            record.insert(key.clone(), value);
        }
        Ok(record)
    }
}
