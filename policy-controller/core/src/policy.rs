use crate::{Engine, GroupVersionResource, Operation, SourceDescriptor, SourceFilter};
use std::{collections::BTreeSet, fmt, str::FromStr};

/// Selects the resources and operations a policy is consulted for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WatchedResource {
    pub gvr: GroupVersionResource,
    pub operations: BTreeSet<Operation>,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

/// A source collection whose items are injected into a policy's evaluation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceSelector {
    pub descriptor: SourceDescriptor,
    pub filter: SourceFilter,
}

/// A named check: the rendered `key` must equal `value` for the condition to pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Condition {
    pub name: String,
    pub engine: Engine,
    pub key: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Template {
    pub engine: Engine,
    pub template: String,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum FailureAction {
    #[default]
    Enforce,
    Permissive,
    Audit,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PatchType {
    /// An RFC 6902 JSON patch document.
    #[default]
    Json,
    /// An RFC 7386 JSON merge patch.
    Merge,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationPolicy {
    pub name: String,
    pub watched: WatchedResource,
    pub sources: Vec<SourceSelector>,
    pub conditions: Vec<Condition>,
    pub message: Template,
    pub failure_action: FailureAction,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutationPolicy {
    pub name: String,
    pub watched: WatchedResource,
    pub sources: Vec<SourceSelector>,
    pub conditions: Vec<Condition>,
    pub patch: Template,
    pub patch_type: PatchType,
    pub priority: i32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationPolicy {
    pub name: String,
    pub watched: WatchedResource,
    pub sources: Vec<SourceSelector>,
    pub conditions: Vec<Condition>,
    pub object: Template,
}

/// Behavior shared by every policy kind.
pub trait PolicyObject: Send + Sync + 'static {
    const KIND: &'static str;

    /// Whether buckets of this kind are kept sorted by [`PolicyObject::priority`].
    const ORDERED: bool = false;

    fn name(&self) -> &str;

    fn watched(&self) -> &WatchedResource;

    fn sources(&self) -> &[SourceSelector];

    fn conditions(&self) -> &[Condition];

    fn priority(&self) -> i32 {
        0
    }

    /// Identifies this policy as the requester of a source watch.
    fn requester(&self) -> String {
        format!("{}/{}", Self::KIND, self.name())
    }
}

// === impl WatchedResource ===

impl WatchedResource {
    /// Every admission key this resource selector is registered under.
    pub fn routing_keys(&self) -> BTreeSet<String> {
        self.operations
            .iter()
            .map(|op| self.gvr.admission_key(*op))
            .collect()
    }

    /// Tests the request's namespace and name against the optional selector fields.
    pub fn matches_object(&self, namespace: Option<&str>, name: Option<&str>) -> bool {
        fn matches(want: Option<&str>, got: Option<&str>) -> bool {
            match want {
                None | Some("") => true,
                Some(want) => got == Some(want),
            }
        }
        matches(self.namespace.as_deref(), namespace) && matches(self.name.as_deref(), name)
    }
}

// === impl FailureAction ===

impl FailureAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enforce => "Enforce",
            Self::Permissive => "Permissive",
            Self::Audit => "Audit",
        }
    }
}

impl fmt::Display for FailureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureAction {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Enforce, Self::Permissive, Self::Audit]
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseError::new("failure action", s))
    }
}

// === impl PatchType ===

impl PatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Merge => "merge",
        }
    }
}

impl FromStr for PatchType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" | "jsonpatch" => Ok(Self::Json),
            "merge" | "mergepatch" => Ok(Self::Merge),
            _ => Err(ParseError::new("patch type", s)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid {what}: {value:?}")]
pub struct ParseError {
    what: &'static str,
    value: String,
}

impl ParseError {
    fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

// === impl PolicyObject ===

macro_rules! policy_object {
    ($ty:ty, $kind:literal, ordered = $ordered:literal, |$p:ident| $priority:expr) => {
        impl PolicyObject for $ty {
            const KIND: &'static str = $kind;
            const ORDERED: bool = $ordered;

            fn name(&self) -> &str {
                &self.name
            }

            fn watched(&self) -> &WatchedResource {
                &self.watched
            }

            fn sources(&self) -> &[SourceSelector] {
                &self.sources
            }

            fn conditions(&self) -> &[Condition] {
                &self.conditions
            }

            fn priority(&self) -> i32 {
                let $p = self;
                $priority
            }
        }
    };
}

policy_object!(ValidationPolicy, "ValidationPolicy", ordered = false, |_p| 0);
policy_object!(MutationPolicy, "MutationPolicy", ordered = true, |p| p.priority);
policy_object!(GenerationPolicy, "GenerationPolicy", ordered = false, |_p| 0);
