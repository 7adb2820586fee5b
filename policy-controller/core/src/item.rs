use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A source resource as observed by an informer.
///
/// Identity and metadata are extracted once when the item is cached so that filters don't need to
/// walk the JSON document for every admission request.
#[derive(Clone, Debug, PartialEq)]
pub struct CachedItem {
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub object: Value,
}

impl CachedItem {
    /// Returns `None` if the object has no `metadata.name`.
    pub fn from_value(object: Value) -> Option<Self> {
        let metadata = object.get("metadata")?;
        let name = metadata.get("name")?.as_str()?.to_string();
        let namespace = metadata
            .get("namespace")
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);
        let labels = string_map(metadata.get("labels"));
        let annotations = string_map(metadata.get("annotations"));
        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(Self {
            kind,
            namespace,
            name,
            labels,
            annotations,
            object,
        })
    }

    /// Identifies the item within its collection.
    pub fn key(&self) -> (Option<&str>, &str) {
        (self.namespace.as_deref(), &self.name)
    }
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(Map::iter)
        .into_iter()
        .flatten()
        .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
        .collect()
}
