use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::datapoint::{Datapoint, Field};
use crate::error::{Error, Result};
use crate::layout::{REFS_STEM, SPEC_FILE};

/// Suffix marking a list-valued type tag, e.g. `utf8[]`.
pub const LIST_SUFFIX: &str = "[]";

pub fn is_list_tag(tag: &str) -> bool {
    tag.ends_with(LIST_SUFFIX)
}

/// Dataset schema: key name → type tag.
///
/// Keys iterate in sorted order, which is also the order of the `(start,
/// count)` pairs in every refs record. The container only looks at whether a
/// tag is list-valued; everything else about the tag is for codecs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Spec {
    fields: BTreeMap<String, String>,
}

impl Spec {
    pub fn new<I, K, T>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
        T: Into<String>,
    {
        let spec = Self {
            fields: fields
                .into_iter()
                .map(|(key, tag)| (key.into(), tag.into()))
                .collect(),
        };
        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(Error::Schema("spec declares no keys".into()));
        }
        for key in self.fields.keys() {
            let bad = key.is_empty()
                || key == REFS_STEM
                || key.starts_with('.')
                || key.contains(['/', '\\', '\0']);
            if bad {
                return Err(Error::Schema(format!("'{}' is not a valid key name", key)));
            }
        }
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let spec: Spec = serde_json::from_slice(&fs::read(dir.join(SPEC_FILE))?)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::write(dir.join(SPEC_FILE), serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, t)| (k.as_str(), t.as_str()))
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Position of `key` in spec order.
    pub fn position(&self, key: &str) -> Option<usize> {
        self.fields.keys().position(|k| k == key)
    }

    pub fn is_list(&self, key: &str) -> bool {
        self.tag(key).is_some_and(is_list_tag)
    }

    /// Check that `datapoint` supplies exactly the spec's keys, with a list
    /// for every list-valued tag and a single value for every other tag.
    pub fn check(&self, datapoint: &Datapoint) -> Result<()> {
        let missing: Vec<&str> = self.keys().filter(|k| !datapoint.contains_key(*k)).collect();
        let extra: Vec<&str> = datapoint
            .keys()
            .map(String::as_str)
            .filter(|k| !self.contains(k))
            .collect();
        if !missing.is_empty() || !extra.is_empty() {
            return Err(Error::Schema(format!(
                "datapoint keys do not match spec (missing {:?}, unexpected {:?})",
                missing, extra
            )));
        }
        for (key, tag) in self.iter() {
            match (&datapoint[key], is_list_tag(tag)) {
                (Field::Scalar(_), false) | (Field::List(_), true) => {}
                (Field::Scalar(_), true) => {
                    return Err(Error::Schema(format!(
                        "key '{}' has list tag '{}' but got a single value",
                        key, tag
                    )))
                }
                (Field::List(_), false) => {
                    return Err(Error::Schema(format!(
                        "key '{}' has scalar tag '{}' but got a list",
                        key, tag
                    )))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> Spec {
        Spec::new([("foo", "int"), ("bar", "utf8[]"), ("baz", "msgpack")]).unwrap()
    }

    #[test]
    fn keys_are_sorted() {
        let spec = spec();
        let keys: Vec<&str> = spec.keys().collect();
        assert_eq!(keys, vec!["bar", "baz", "foo"]);
        assert_eq!(spec.position("foo"), Some(2));
        assert!(spec.is_list("bar"));
        assert!(!spec.is_list("foo"));
    }

    #[test]
    fn rejects_unusable_key_names() {
        for key in ["", "refs", "a/b", "..", ".hidden"] {
            assert!(
                matches!(Spec::new([(key, "bytes")]), Err(Error::Schema(_))),
                "key {:?} should be rejected",
                key
            );
        }
        assert!(Spec::new(Vec::<(String, String)>::new()).is_err());
    }

    #[test]
    fn check_reports_missing_extra_and_shape() {
        let spec = spec();
        let mut dp = Datapoint::new();
        dp.insert("foo".into(), Field::from(vec![1u8]));
        dp.insert("bar".into(), Field::List(vec![]));
        let err = spec.check(&dp).unwrap_err().to_string();
        assert!(err.contains("baz"), "{err}");

        dp.insert("baz".into(), Field::from(b"x".to_vec()));
        assert!(spec.check(&dp).is_ok());

        dp.insert("bar".into(), Field::from(b"x".to_vec()));
        assert!(matches!(spec.check(&dp), Err(Error::Schema(_))));

        dp.insert("bar".into(), Field::List(vec![]));
        dp.insert("extra".into(), Field::from(b"x".to_vec()));
        assert!(matches!(spec.check(&dp), Err(Error::Schema(_))));
    }

    #[test]
    fn spec_json_is_a_plain_object() {
        let dir = tempfile::TempDir::new().unwrap();
        spec().save(dir.path()).unwrap();
        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join(SPEC_FILE)).unwrap()).unwrap();
        assert_eq!(raw["bar"], "utf8[]");
        assert_eq!(Spec::load(dir.path()).unwrap(), spec());
    }
}
