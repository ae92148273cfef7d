//! Per-run execution context
//!
//! The context is the key-value store threading data from earlier steps into
//! later ones within a single run. Extraction only adds or overwrites keys,
//! never removes them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::pipeline::rules::{resolve_segments, JsonPath, PathSegment};

/// Accumulated key-value state for one pipeline run.
///
/// Keys are insertion-ordered so serialized execution records are stable
/// across identical runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Context {
    values: IndexMap<String, JsonValue>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: JsonValue) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.values.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.values.iter()
    }

    /// Merge extracted values into the context, overwriting existing keys.
    pub fn merge(&mut self, extracted: &IndexMap<String, JsonValue>) {
        for (key, value) in extracted {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Resolve a dotted path against the context.
    ///
    /// The first segment names a context key; the remainder descends into
    /// that key's JSON value. `None` if any segment fails to resolve.
    pub fn resolve(&self, path: &JsonPath) -> Option<&JsonValue> {
        let (first, rest) = path.segments().split_first()?;
        let root = match first {
            PathSegment::Key(key) => self.values.get(key.as_str())?,
            PathSegment::Index(_) => return None,
        };
        resolve_segments(root, rest)
    }

    /// The string form of a context value, as used for interpolation and
    /// injection. Strings render without quotes; other values render as
    /// compact JSON.
    pub fn value_string(value: &JsonValue) -> String {
        match value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl FromIterator<(String, JsonValue)> for Context {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
