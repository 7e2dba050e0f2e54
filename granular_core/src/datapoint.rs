use std::collections::BTreeMap;
use std::ops::Range;

/// The already-encoded bytes of one key of one datapoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// Exactly one record.
    Scalar(Vec<u8>),
    /// A run of zero or more records.
    List(Vec<Vec<u8>>),
}

impl Field {
    pub fn as_scalar(&self) -> Option<&[u8]> {
        match self {
            Field::Scalar(bytes) => Some(bytes),
            Field::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Vec<u8>]> {
        match self {
            Field::List(items) => Some(items),
            Field::Scalar(_) => None,
        }
    }

    /// Number of records this field occupies.
    pub fn record_count(&self) -> usize {
        match self {
            Field::Scalar(_) => 1,
            Field::List(items) => items.len(),
        }
    }
}

impl From<Vec<u8>> for Field {
    fn from(bytes: Vec<u8>) -> Self {
        Field::Scalar(bytes)
    }
}

impl From<&[u8]> for Field {
    fn from(bytes: &[u8]) -> Self {
        Field::Scalar(bytes.to_vec())
    }
}

impl From<Vec<Vec<u8>>> for Field {
    fn from(items: Vec<Vec<u8>>) -> Self {
        Field::List(items)
    }
}

/// One logical record: key → encoded field.
pub type Datapoint = BTreeMap<String, Field>;

/// Which part of a key to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slice {
    All,
    /// Elements `[lo, hi)` of a list-valued key.
    Range(Range<u64>),
}

/// Key selection for partial datapoint reads. Keys not named are not read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    keys: BTreeMap<String, Slice>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query reading every element of each key in `keys`.
    pub fn keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(|k| (k.into(), Slice::All)).collect(),
        }
    }

    pub fn all(mut self, key: impl Into<String>) -> Self {
        self.keys.insert(key.into(), Slice::All);
        self
    }

    pub fn range(mut self, key: impl Into<String>, range: Range<u64>) -> Self {
        self.keys.insert(key.into(), Slice::Range(range));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Slice)> {
        self.keys.iter().map(|(k, s)| (k.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
