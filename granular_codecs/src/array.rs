//! Dense arrays and nested trees of them, laid out in msgpack the way numpy
//! arrays are: an array is `[dtype, shape, data]`, and an array inside a tree
//! is `["_", dtype, shape, data]`.

use anyhow::Context;
use rmpv::Value as Msgpack;

/// First element of an array leaf inside a tree.
const ARRAY_MARKER: &str = "_";

/// A C-ordered array of fixed-size elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Array {
    /// numpy type string, e.g. `<f4`, `|u1`, `<U8`.
    pub dtype: String,
    pub shape: Vec<u64>,
    /// Raw element bytes, row-major.
    pub data: Vec<u8>,
}

impl Array {
    /// Build an array. When the dtype names its item size, `data` must hold
    /// exactly `shape` elements.
    pub fn new(dtype: impl Into<String>, shape: Vec<u64>, data: Vec<u8>) -> anyhow::Result<Self> {
        let array = Self {
            dtype: dtype.into(),
            shape,
            data,
        };
        if let Some(item_size) = array.item_size() {
            let expected = array.elements().and_then(|n| n.checked_mul(item_size));
            if expected != Some(array.data.len() as u64) {
                anyhow::bail!(
                    "array of dtype '{}' and shape {:?} needs {} bytes, got {}",
                    array.dtype,
                    array.shape,
                    expected.map_or_else(|| "too many".to_string(), |n| n.to_string()),
                    array.data.len()
                );
            }
        }
        Ok(array)
    }

    /// Number of elements, or `None` if the shape overflows.
    pub fn elements(&self) -> Option<u64> {
        self.shape.iter().try_fold(1u64, |n, &dim| n.checked_mul(dim))
    }

    /// Bytes per element, read from the dtype. `None` for dtypes whose size
    /// is not a plain number (`<M8[ns]`, `O`).
    pub fn item_size(&self) -> Option<u64> {
        let spec = self.dtype.trim_start_matches(|c| matches!(c, '<' | '>' | '|' | '='));
        let kind = spec.chars().next()?;
        let size: u64 = spec[kind.len_utf8()..].parse().ok()?;
        match kind {
            // Counted in UCS-4 code points.
            'U' => size.checked_mul(4),
            _ => Some(size),
        }
    }

    pub fn to_msgpack(&self) -> Msgpack {
        Msgpack::Array(self.parts())
    }

    pub fn from_msgpack(value: &Msgpack) -> anyhow::Result<Self> {
        match value.as_array().map(Vec::as_slice) {
            Some([dtype, shape, data]) => Self::from_parts(dtype, shape, data),
            _ => anyhow::bail!("array record is not a [dtype, shape, data] triple"),
        }
    }

    fn parts(&self) -> Vec<Msgpack> {
        vec![
            Msgpack::from(self.dtype.as_str()),
            Msgpack::Array(self.shape.iter().map(|&dim| Msgpack::from(dim)).collect()),
            Msgpack::Binary(self.data.clone()),
        ]
    }

    fn from_parts(dtype: &Msgpack, shape: &Msgpack, data: &Msgpack) -> anyhow::Result<Self> {
        let dtype = dtype.as_str().context("array dtype is not a string")?;
        let shape = shape
            .as_array()
            .context("array shape is not a list")?
            .iter()
            .map(|dim| dim.as_u64().context("array dimension is not an unsigned integer"))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let data = data.as_slice().context("array data is not binary")?;
        Self::new(dtype, shape, data.to_vec())
    }
}

/// Nested lists and string-keyed maps with arrays and msgpack scalars at the
/// leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum Tree {
    /// nil, bool, number, string or binary.
    Leaf(Msgpack),
    Array(Array),
    List(Vec<Tree>),
    /// Entries keep their stored order.
    Map(Vec<(String, Tree)>),
}

impl Tree {
    pub fn to_msgpack(&self) -> Msgpack {
        match self {
            Tree::Leaf(value) => value.clone(),
            Tree::Array(array) => {
                let mut items = vec![Msgpack::from(ARRAY_MARKER)];
                items.extend(array.parts());
                Msgpack::Array(items)
            }
            Tree::List(items) => Msgpack::Array(items.iter().map(Tree::to_msgpack).collect()),
            Tree::Map(entries) => Msgpack::Map(
                entries
                    .iter()
                    .map(|(key, value)| (Msgpack::from(key.as_str()), value.to_msgpack()))
                    .collect(),
            ),
        }
    }

    pub fn from_msgpack(value: Msgpack) -> anyhow::Result<Self> {
        match value {
            Msgpack::Array(items) => {
                if let [marker, dtype, shape, data] = items.as_slice() {
                    if marker.as_str() == Some(ARRAY_MARKER) {
                        return Ok(Tree::Array(Array::from_parts(dtype, shape, data)?));
                    }
                }
                items
                    .into_iter()
                    .map(Tree::from_msgpack)
                    .collect::<anyhow::Result<_>>()
                    .map(Tree::List)
            }
            Msgpack::Map(entries) => entries
                .into_iter()
                .map(|(key, value)| {
                    let key = key
                        .as_str()
                        .with_context(|| format!("tree map key {} is not a string", key))?
                        .to_string();
                    Ok((key, Tree::from_msgpack(value)?))
                })
                .collect::<anyhow::Result<_>>()
                .map(Tree::Map),
            leaf => Ok(Tree::Leaf(leaf)),
        }
    }
}

impl From<Array> for Tree {
    fn from(array: Array) -> Self {
        Tree::Array(array)
    }
}

/// Serialize one msgpack value.
pub(crate) fn pack(value: &Msgpack) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    rmpv::encode::write_value(&mut buf, value)?;
    Ok(buf)
}

/// Parse a record holding exactly one msgpack value.
pub(crate) fn unpack(bytes: &[u8]) -> anyhow::Result<Msgpack> {
    let mut rest = bytes;
    let value = rmpv::decode::read_value(&mut rest).context("record is not valid msgpack")?;
    if !rest.is_empty() {
        anyhow::bail!("{} trailing bytes after the msgpack value", rest.len());
    }
    Ok(value)
}
