//! Routing keys.
//!
//! Admission keys join a resource's group, version and resource with an operation, e.g.
//! `apps/v1/deployments/CREATE`. Source keys join group, version and resource with an optional
//! namespace and name, e.g. `/v1/configmaps/default/`. Core resources have an empty group.

use std::{fmt, str::FromStr};
use thiserror::Error;

/// An admission operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Connect,
}

#[derive(Debug, Error)]
#[error("invalid operation: {0}")]
pub struct InvalidOperation(String);

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

/// Identifies a watched collection of source resources.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceDescriptor {
    pub gvr: GroupVersionResource,
    pub namespace: Option<String>,
    pub name: Option<String>,
}

// === impl Operation ===

impl Operation {
    /// Every concrete operation. A wildcard operation expands to this set.
    pub const ALL: [Operation; 4] = [
        Operation::Create,
        Operation::Update,
        Operation::Delete,
        Operation::Connect,
    ];

    pub const WILDCARD: &'static str = "*";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Connect => "CONNECT",
        }
    }

    /// Parses an operation list entry, expanding the wildcard.
    pub fn expand(s: &str) -> Result<Vec<Operation>, InvalidOperation> {
        if s.trim() == Self::WILDCARD {
            return Ok(Self::ALL.to_vec());
        }
        s.parse().map(|op| vec![op])
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = InvalidOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| InvalidOperation(s.to_string()))
    }
}

// === impl GroupVersionResource ===

impl GroupVersionResource {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
        }
    }

    /// The key under which policies for `op` on this resource are stored.
    pub fn admission_key(&self, op: Operation) -> String {
        format!("{self}/{op}")
    }
}

impl fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.version, self.resource)
    }
}

// === impl SourceDescriptor ===

impl SourceDescriptor {
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.gvr,
            self.namespace.as_deref().unwrap_or_default(),
            self.name.as_deref().unwrap_or_default()
        )
    }
}
