use crate::{convert, informer::Desired, DesiredWatches};
use anyhow::Result;
use kpolicy_core::{GenerationPolicy, MutationPolicy, PolicyObject, Registry, ValidationPolicy};
use kpolicy_k8s_api::{self as k8s, ResourceExt};
use kpolicy_template::Evaluator;
use kubert::index::ClusterRemoved;
use parking_lot::RwLock;
use std::{collections::BTreeSet, sync::Arc};
use tracing::info_span;

/// The registries of active policies, by kind.
#[derive(Debug, Default)]
pub struct Policies {
    pub validation: Registry<ValidationPolicy>,
    pub mutation: Registry<MutationPolicy>,
    pub generation: Registry<GenerationPolicy>,
}

/// Applies policy resource updates to [`Policies`].
#[derive(Debug)]
pub struct PolicyIndex {
    policies: Arc<Policies>,
    evaluator: Evaluator,
}

pub type SharedIndex = Arc<RwLock<PolicyIndex>>;

// === impl Policies ===

impl Policies {
    /// Returns every source collection referenced by a registered policy, along with the
    /// policies that reference it.
    pub fn desired_watches(&self) -> Desired {
        let mut desired = Desired::new();
        collect_sources(&self.validation, &mut desired);
        collect_sources(&self.mutation, &mut desired);
        collect_sources(&self.generation, &mut desired);
        desired
    }
}

impl DesiredWatches for Policies {
    fn desired_watches(&self) -> Desired {
        Policies::desired_watches(self)
    }
}

fn collect_sources<T: PolicyObject>(registry: &Registry<T>, desired: &mut Desired) {
    for policy in registry.policies() {
        for source in policy.sources() {
            desired
                .entry(source.descriptor.clone())
                .or_default()
                .insert(policy.requester());
        }
    }
}

// === impl PolicyIndex ===

impl PolicyIndex {
    pub fn new(policies: Arc<Policies>) -> Self {
        Self {
            policies,
            evaluator: Evaluator::default(),
        }
    }

    pub fn shared(policies: Arc<Policies>) -> SharedIndex {
        Arc::new(RwLock::new(Self::new(policies)))
    }

    pub fn policies(&self) -> &Arc<Policies> {
        &self.policies
    }
}

/// Registers a converted policy. A policy that fails to convert is removed so that a stale
/// version doesn't remain in effect.
fn apply<T: PolicyObject>(registry: &Registry<T>, name: String, policy: Result<T>) {
    let _span = info_span!("apply", kind = T::KIND, %name).entered();
    match policy {
        Ok(policy) => {
            tracing::debug!("Applying policy");
            registry.apply(policy);
        }
        Err(error) => {
            tracing::warn!(error = format_args!("{error:#}"), "Invalid policy");
            registry.delete(&name);
        }
    }
}

/// Replaces the registry's contents with the live policies listed when a watch (re)starts. Any
/// policy that isn't listed is removed, whether or not its deletion was observed.
fn reset<T: PolicyObject>(registry: &Registry<T>, live: Vec<(String, Result<T>)>) {
    let names = live
        .iter()
        .map(|(name, _)| name.clone())
        .collect::<BTreeSet<_>>();
    registry.retain(&names);
    for (name, policy) in live {
        apply(registry, name, policy);
    }
}

fn delete<T: PolicyObject>(registry: &Registry<T>, name: String) {
    let _span = info_span!("delete", kind = T::KIND, %name).entered();
    if registry.delete(&name) {
        tracing::debug!("Deleted policy");
    }
}

impl kubert::index::IndexClusterResource<k8s::ValidationPolicy> for PolicyIndex {
    fn apply(&mut self, resource: k8s::ValidationPolicy) {
        let name = resource.name_unchecked();
        let policy = convert::validation(name.clone(), resource.spec, &self.evaluator);
        apply(&self.policies.validation, name, policy);
    }

    fn delete(&mut self, name: String) {
        delete(&self.policies.validation, name);
    }

    fn reset(&mut self, resources: Vec<k8s::ValidationPolicy>, _removed: ClusterRemoved) {
        let live = resources
            .into_iter()
            .map(|resource| {
                let name = resource.name_unchecked();
                let policy = convert::validation(name.clone(), resource.spec, &self.evaluator);
                (name, policy)
            })
            .collect();
        reset(&self.policies.validation, live);
    }
}

impl kubert::index::IndexClusterResource<k8s::MutationPolicy> for PolicyIndex {
    fn apply(&mut self, resource: k8s::MutationPolicy) {
        let name = resource.name_unchecked();
        let policy = convert::mutation(name.clone(), resource.spec, &self.evaluator);
        apply(&self.policies.mutation, name, policy);
    }

    fn delete(&mut self, name: String) {
        delete(&self.policies.mutation, name);
    }

    fn reset(&mut self, resources: Vec<k8s::MutationPolicy>, _removed: ClusterRemoved) {
        let live = resources
            .into_iter()
            .map(|resource| {
                let name = resource.name_unchecked();
                let policy = convert::mutation(name.clone(), resource.spec, &self.evaluator);
                (name, policy)
            })
            .collect();
        reset(&self.policies.mutation, live);
    }
}

impl kubert::index::IndexClusterResource<k8s::GenerationPolicy> for PolicyIndex {
    fn apply(&mut self, resource: k8s::GenerationPolicy) {
        let name = resource.name_unchecked();
        let policy = convert::generation(name.clone(), resource.spec, &self.evaluator);
        apply(&self.policies.generation, name, policy);
    }

    fn delete(&mut self, name: String) {
        delete(&self.policies.generation, name);
    }

    fn reset(&mut self, resources: Vec<k8s::GenerationPolicy>, _removed: ClusterRemoved) {
        let live = resources
            .into_iter()
            .map(|resource| {
                let name = resource.name_unchecked();
                let policy = convert::generation(name.clone(), resource.spec, &self.evaluator);
                (name, policy)
            })
            .collect();
        reset(&self.policies.generation, live);
    }
}
