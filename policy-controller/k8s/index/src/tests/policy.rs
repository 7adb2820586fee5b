use super::*;
use kpolicy_core::PolicyObject;
use kpolicy_k8s_api::policy as k8s;
use kubert::index::IndexClusterResource;

fn watch() -> k8s::WatchedResource {
    k8s::WatchedResource {
        group: "apps".to_string(),
        version: "v1".to_string(),
        resource: "deployments".to_string(),
        operations: vec!["CREATE".to_string(), "UPDATE".to_string()],
        namespace: None,
        name: None,
    }
}

fn quota_source() -> k8s::Source {
    k8s::Source {
        group: String::new(),
        version: "v1".to_string(),
        resource: "configmaps".to_string(),
        namespace: Some("default".to_string()),
        ..Default::default()
    }
}

fn mk_validation(name: &str, key: &str) -> k8s::ValidationPolicy {
    k8s::ValidationPolicy::new(
        name,
        k8s::ValidationPolicySpec {
            watch: watch(),
            sources: Some(vec![quota_source()]),
            conditions: Some(vec![k8s::Condition {
                name: "replicas".to_string(),
                engine: None,
                key: key.to_string(),
                value: "true".to_string(),
            }]),
            message: k8s::Template {
                engine: None,
                template: "'too many replicas'".to_string(),
            },
            failure_action: None,
        },
    )
}

fn mk_mutation(name: &str, priority: i32) -> k8s::MutationPolicy {
    k8s::MutationPolicy::new(
        name,
        k8s::MutationPolicySpec {
            watch: watch(),
            sources: Some(vec![quota_source()]),
            conditions: None,
            patch: k8s::Template {
                engine: Some("plain".to_string()),
                template: r#"[{"op": "add", "path": "/metadata/labels/p", "value": "x"}]"#
                    .to_string(),
            },
            patch_type: None,
            priority: Some(priority),
        },
    )
}

fn names<T: PolicyObject>(bucket: &kpolicy_core::Bucket<T>) -> Vec<&str> {
    bucket.iter().map(|p| p.name()).collect()
}

#[test]
fn indexes_policies_by_routing_key() {
    let policies = Arc::new(Policies::default());
    let index = PolicyIndex::shared(policies.clone());

    index
        .write()
        .apply(mk_validation("max-replicas", "object.spec.replicas <= 10"));
    for op in ["CREATE", "UPDATE"] {
        let bucket = policies
            .validation
            .get(&format!("apps/v1/deployments/{op}"));
        assert_eq!(names(&bucket), ["max-replicas"]);
    }
    assert!(policies.validation.get("apps/v1/deployments/DELETE").is_empty());

    IndexClusterResource::<k8s::ValidationPolicy>::delete(
        &mut *index.write(),
        "max-replicas".to_string(),
    );
    assert!(policies.validation.policies().is_empty());
    assert!(policies.validation.store().collection_names().is_empty());
}

#[test]
fn invalid_update_removes_prior_version() {
    let policies = Arc::new(Policies::default());
    let index = PolicyIndex::shared(policies.clone());

    index
        .write()
        .apply(mk_validation("max-replicas", "object.spec.replicas <= 10"));
    assert_eq!(policies.validation.policies().len(), 1);

    index
        .write()
        .apply(mk_validation("max-replicas", "object.spec.replicas <="));
    assert!(policies.validation.policies().is_empty());
    assert!(policies
        .validation
        .get("apps/v1/deployments/CREATE")
        .is_empty());
}

#[test]
fn desired_watches_track_requesters() {
    let policies = Arc::new(Policies::default());
    let index = PolicyIndex::shared(policies.clone());

    index
        .write()
        .apply(mk_validation("max-replicas", "object.spec.replicas <= 10"));
    index.write().apply(mk_mutation("label", 0));

    let desired = policies.desired_watches();
    assert_eq!(
        desired.get(&configmaps("default")),
        Some(&requesters(&[
            "MutationPolicy/label",
            "ValidationPolicy/max-replicas"
        ]))
    );

    IndexClusterResource::<k8s::MutationPolicy>::delete(&mut *index.write(), "label".to_string());
    IndexClusterResource::<k8s::ValidationPolicy>::delete(
        &mut *index.write(),
        "max-replicas".to_string(),
    );
    assert!(policies.desired_watches().is_empty());
}

#[test]
fn mutations_ordered_by_priority() {
    let policies = Arc::new(Policies::default());
    let index = PolicyIndex::shared(policies.clone());

    index.write().apply(mk_mutation("last", 100));
    index.write().apply(mk_mutation("first", -5));
    index.write().apply(mk_mutation("middle", 0));

    let bucket = policies.mutation.get("apps/v1/deployments/CREATE");
    assert_eq!(names(&bucket), ["first", "middle", "last"]);
}

#[test]
fn reset_drops_unlisted_policies() {
    let policies = Arc::new(Policies::default());
    let index = PolicyIndex::shared(policies.clone());

    index
        .write()
        .apply(mk_validation("max-replicas", "object.spec.replicas <= 10"));
    index
        .write()
        .apply(mk_validation("min-replicas", "object.spec.replicas >= 1"));

    // The deletion of `max-replicas` was missed while the watch was down.
    IndexClusterResource::<k8s::ValidationPolicy>::reset(
        &mut *index.write(),
        vec![mk_validation("min-replicas", "object.spec.replicas >= 2")],
        Default::default(),
    );
    let bucket = policies.validation.get("apps/v1/deployments/CREATE");
    assert_eq!(names(&bucket), ["min-replicas"]);
    assert_eq!(
        bucket[0].conditions[0].key,
        "object.spec.replicas >= 2",
        "listed policies are updated"
    );
}
