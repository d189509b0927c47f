//! Typed state carried between the script phases of a job.

use std::collections::BTreeMap;

use ti_core::TypedValue;

/// Values scripts keep between phases and runs of one job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedScriptState {
    values: BTreeMap<String, TypedValue>,
}

impl PersistedScriptState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&TypedValue> {
        self.values.get(key)
    }

    pub fn set<S: Into<String>>(&mut self, key: S, value: TypedValue) {
        self.values.insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypedValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}
