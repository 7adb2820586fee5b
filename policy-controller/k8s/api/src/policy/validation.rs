use super::{Condition, Source, Template, WatchedResource};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Accepts or rejects admission requests based on a list of conditions.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kpolicy.io",
    version = "v1alpha1",
    kind = "ValidationPolicy",
    shortname = "vpol"
)]
#[serde(rename_all = "camelCase")]
pub struct ValidationPolicySpec {
    pub watch: WatchedResource,
    pub sources: Option<Vec<Source>>,
    pub conditions: Option<Vec<Condition>>,
    /// Rendered into the denial message when a condition fails.
    pub message: Template,
    /// One of `Enforce` (the default), `Permissive` or `Audit`.
    pub failure_action: Option<String>,
}
