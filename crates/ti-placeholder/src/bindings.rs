//! Opaque ids standing in for `${out:NAME}` markers.

use std::collections::BTreeMap;

use ti_core::OutputDecl;
use uuid::Uuid;

const OUTPUT_ID_PREFIX: &str = "_OUTPUT_";

/// Maps declared output names to the ids substituted for their markers.
///
/// Ids are generated once per render cycle for every declared output, so the
/// same id is used in every template rendered with one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputBindings {
    ids: BTreeMap<String, String>,
}

impl OutputBindings {
    pub fn new(outputs: &[OutputDecl]) -> Self {
        let ids = outputs
            .iter()
            .map(|o| {
                let id = format!("{}{}", OUTPUT_ID_PREFIX, Uuid::new_v4().simple());
                (o.name.clone(), id)
            })
            .collect();
        Self { ids }
    }

    /// Id substituted for `${out:name}`.
    pub fn id_for(&self, name: &str) -> Option<&str> {
        self.ids.get(name).map(String::as_str)
    }

    /// Output name an id was generated for.
    pub fn name_for(&self, id: &str) -> Option<&str> {
        self.ids.iter().find(|(_, v)| v.as_str() == id).map(|(k, _)| k.as_str())
    }

    /// `(output name, id)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.ids.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
