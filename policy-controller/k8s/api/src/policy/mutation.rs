use super::{Condition, Source, Template, WatchedResource};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Patches admitted objects when all of its conditions pass.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kpolicy.io",
    version = "v1alpha1",
    kind = "MutationPolicy",
    shortname = "mpol"
)]
#[serde(rename_all = "camelCase")]
pub struct MutationPolicySpec {
    pub watch: WatchedResource,
    pub sources: Option<Vec<Source>>,
    pub conditions: Option<Vec<Condition>>,
    /// Renders a JSON patch or a JSON merge patch, as JSON or YAML.
    pub patch: Template,
    /// Either `json` (the default) or `merge`.
    pub patch_type: Option<String>,
    /// Policies are applied in ascending priority order.
    pub priority: Option<i32>,
}
