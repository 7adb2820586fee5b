//! Core policy types and the in-memory policy registry.
//!
//! Policies are indexed by *routing key*: the group, version and resource a policy watches joined
//! with each admission operation it applies to (see [`routing`]). A [`PolicyStore`] holds one
//! bucket of policies per routing key and a [`Registry`] keeps track of which keys each policy is
//! registered under, so that an updated policy never lingers under a key it no longer matches.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod filter;
pub mod item;
pub mod policy;
pub mod registry;
pub mod routing;
pub mod store;

pub use self::{
    filter::{MetadataFilter, NameFilter, RegexFilter, SourceFilter},
    item::CachedItem,
    policy::{
        Condition, FailureAction, GenerationPolicy, MutationPolicy, PatchType, PolicyObject,
        SourceSelector, Template, ValidationPolicy, WatchedResource,
    },
    registry::Registry,
    routing::{GroupVersionResource, Operation, SourceDescriptor},
    store::{Bucket, PolicyStore},
};
pub use kpolicy_template::Engine;

pub const POLICY_API_VERSION: &str = "kpolicy.io/v1alpha1";
