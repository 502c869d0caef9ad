//! Tag keys and immutable tag sets.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::error::TagError;

const MAX_LEN: usize = 255;

fn is_printable(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7e).contains(&b))
}

/// Name of a label attached to measurements.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagKey(Arc<str>);

impl TagKey {
    pub fn new(name: &str) -> Result<Self, TagError> {
        if name.is_empty() || name.len() > MAX_LEN || !is_printable(name) {
            return Err(TagError::InvalidKey(name.to_string()));
        }
        Ok(Self(Arc::from(name)))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagKey({})", self.0)
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for TagKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Immutable mapping from tag key to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagSet {
    tags: BTreeMap<TagKey, String>,
}

impl TagSet {
    pub fn builder() -> TagSetBuilder {
        TagSetBuilder::default()
    }

    pub fn get(&self, key: &TagKey) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Look a value up by key name.
    pub fn get_by_name(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k.name() == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TagKey, &str)> {
        self.tags.iter().map(|(k, v)| (k, v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &TagKey> {
        self.tags.keys()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Accumulates validated tags. Insert semantics: a key may be set once.
#[derive(Debug, Default)]
pub struct TagSetBuilder {
    tags: BTreeMap<TagKey, String>,
}

impl TagSetBuilder {
    pub fn insert(mut self, key: &TagKey, value: impl Into<String>) -> Result<Self, TagError> {
        let value = value.into();
        if value.len() > MAX_LEN {
            return Err(TagError::InvalidValue {
                key: key.name().to_string(),
                reason: "longer than 255 bytes",
            });
        }
        if !is_printable(&value) {
            return Err(TagError::InvalidValue {
                key: key.name().to_string(),
                reason: "contains non-printable or non-ASCII characters",
            });
        }
        if self.tags.contains_key(key) {
            return Err(TagError::Duplicate(key.name().to_string()));
        }
        self.tags.insert(key.clone(), value);
        Ok(self)
    }

    pub fn build(self) -> TagSet {
        TagSet { tags: self.tags }
    }
}
