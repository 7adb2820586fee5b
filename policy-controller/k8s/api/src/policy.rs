//! Cluster-scoped policy resources in the `kpolicy.io` group.
//!
//! The resource types only describe the wire format. Values such as engines, operations and
//! regular expressions are carried as strings here and are checked when a resource is converted
//! into its core representation.

pub mod generation;
pub mod mutation;
pub mod validation;

pub use self::{
    generation::{GenerationPolicy, GenerationPolicySpec},
    mutation::{MutationPolicy, MutationPolicySpec},
    validation::{ValidationPolicy, ValidationPolicySpec},
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Selects the resources whose admission requests a policy handles.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WatchedResource {
    /// The API group. Empty or omitted for the core group.
    #[serde(default)]
    pub group: String,
    pub version: String,
    /// The plural resource name, e.g. `deployments`.
    pub resource: String,
    /// One or more of `CREATE`, `UPDATE`, `DELETE`, `CONNECT` or `*`.
    pub operations: Vec<String>,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

/// A collection of resources made available to a policy's templates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub resource: String,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub filter: Option<SourceFilter>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceFilter {
    pub namespace: Option<NameFilter>,
    pub name: Option<NameFilter>,
    pub metadata: Option<MetadataFilter>,
}

/// Matches a name against a list or a regular expression. The list wins when both are set.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NameFilter {
    pub match_list: Option<Vec<String>>,
    pub match_regex: Option<RegexFilter>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegexFilter {
    pub expression: String,
    /// Selects names that do *not* match the expression.
    #[serde(default)]
    pub negative: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetadataFilter {
    pub match_labels: Option<BTreeMap<String, String>>,
    pub match_annotations: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub name: String,
    /// One of `cel` (the default), `script`, `template` or `plain`.
    pub engine: Option<String>,
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub engine: Option<String>,
    pub template: String,
}
