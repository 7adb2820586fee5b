use super::{Condition, Source, Template, WatchedResource};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Creates or updates an object whenever a matching request passes all conditions.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kpolicy.io",
    version = "v1alpha1",
    kind = "GenerationPolicy",
    shortname = "gpol"
)]
#[serde(rename_all = "camelCase")]
pub struct GenerationPolicySpec {
    pub watch: WatchedResource,
    pub sources: Option<Vec<Source>>,
    pub conditions: Option<Vec<Condition>>,
    /// Renders the object to apply, as JSON or YAML.
    pub object: Template,
}
