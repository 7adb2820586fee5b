//! kpolicy resource index
//!
//! Maintains the in-memory state that admission decisions are made against:
//!
//! - [`PolicyIndex`] consumes the policy resource watches, converts each resource into its core
//!   representation and registers it under every routing key it applies to.
//! - [`ResourceRegistry`] caches the items of every source collection that a registered policy
//!   references.
//! - [`InformerManager`] keeps the set of running source watches in line with the set of
//!   collections that policies reference.
//!
//! ```text
//! [ Policy watches ] -> [ PolicyIndex ] -> [ Policies ] -> (desired watches)
//!                                                               |
//!                  [ ResourceRegistry ] <- [ InformerManager ] <-
//! ```

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod convert;
pub mod informer;
pub mod metrics;
pub mod policy;
pub mod registry;
pub mod watches;


pub use self::{
    informer::{Config as InformerConfig, Desired, DesiredWatches, InformerManager},
    metrics::InformerMetrics,
    policy::{Policies, PolicyIndex, SharedIndex},
    registry::{Informer, InformerState, Items, Phase, ResourceRegistry, StopConfig},
    watches::{EventStream, KubeWatches, WatchSource},
};
