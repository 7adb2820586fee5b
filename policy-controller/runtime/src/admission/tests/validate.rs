use super::*;
use kpolicy_core::filter::{MetadataFilter, NameFilter, RegexFilter};
use maplit::btreemap;
use pretty_assertions::assert_eq;

fn max_replicas(failure_action: FailureAction) -> ValidationPolicy {
    validation(
        "max-replicas",
        vec![cel("object.spec.replicas <= 10", "true")],
        "'deployment ' + object.metadata.name + ' must not exceed 10 replicas'",
        failure_action,
    )
}

#[test]
fn denies_deployments_with_too_many_replicas() {
    let test = TestConfig::default();
    test.policies
        .validation
        .apply(max_replicas(FailureAction::Enforce));

    let rsp = test.admit(
        Endpoint::Validate,
        request("CREATE", Some(deployment("web", 20, json!({}))), None),
    );
    assert!(!rsp.allowed);
    assert_eq!(
        rsp.result.message,
        "deployment web must not exceed 10 replicas"
    );
    assert_eq!(test.events.policies(), ["ValidationPolicy/max-replicas"]);

    assert_eq!(
        test.events.0.lock()[0],
        AuditEvent {
            policy_kind: "ValidationPolicy",
            policy_name: "max-replicas".to_string(),
            reason: Reason::Violation,
            message: "deployment web must not exceed 10 replicas".to_string(),
            resource: Some(ObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: Some("Deployment".to_string()),
                namespace: Some("default".to_string()),
                name: Some("web".to_string()),
                uid: Some("6c7b6a5e-0c79-4d2b-9d54-3f0a1b9c8d7e".to_string()),
                ..Default::default()
            }),
        }
    );

    let rsp = test.admit(
        Endpoint::Validate,
        request("CREATE", Some(deployment("web", 3, json!({}))), None),
    );
    assert!(rsp.allowed);
    assert_eq!(rsp.warnings, None);
    assert_eq!(test.events.0.lock().len(), 1);
}

#[test]
fn enforce_stops_evaluation() {
    let test = TestConfig::default();
    test.policies.validation.apply(validation(
        "a",
        vec![cel("false", "true")],
        "'denied by a'",
        FailureAction::Enforce,
    ));
    test.policies.validation.apply(validation(
        "b",
        vec![cel("false", "true")],
        "'flagged by b'",
        FailureAction::Permissive,
    ));

    let rsp = test.admit(
        Endpoint::Validate,
        request("CREATE", Some(deployment("web", 1, json!({}))), None),
    );
    assert!(!rsp.allowed);
    assert_eq!(rsp.result.message, "denied by a");
    assert_eq!(rsp.warnings, None);
    assert_eq!(test.events.policies(), ["ValidationPolicy/a"]);
}

#[test]
fn permissive_and_audit_allow() {
    let test = TestConfig::default();
    test.policies
        .validation
        .apply(max_replicas(FailureAction::Permissive));
    test.policies.validation.apply(validation(
        "audited",
        vec![cel("object.spec.replicas < 5", "true")],
        "'audited'",
        FailureAction::Audit,
    ));

    let rsp = test.admit(
        Endpoint::Validate,
        request("CREATE", Some(deployment("web", 20, json!({}))), None),
    );
    assert!(rsp.allowed);
    assert_eq!(
        rsp.warnings,
        Some(vec!["deployment web must not exceed 10 replicas".to_string()])
    );
    assert_eq!(
        test.events.policies(),
        ["ValidationPolicy/max-replicas", "ValidationPolicy/audited"]
    );
}

#[test]
fn evaluation_errors_fail_conditions() {
    let test = TestConfig::default();
    test.policies.validation.apply(validation(
        "typo",
        vec![cel("object.spec.replica <= 10", "true")],
        "object.metadata.missing",
        FailureAction::Enforce,
    ));

    let rsp = test.admit(
        Endpoint::Validate,
        request("CREATE", Some(deployment("web", 1, json!({}))), None),
    );
    assert!(!rsp.allowed, "a condition that errors must not pass");
    assert_eq!(
        rsp.result.message, "request denied by ValidationPolicy/typo",
        "an unrenderable message falls back to a generic one"
    );
}

#[test]
fn routes_by_operation_and_object() {
    let test = TestConfig::default();
    let mut policy = validation(
        "prod-only",
        vec![cel("false", "true")],
        "'denied'",
        FailureAction::Enforce,
    );
    policy.watched.namespace = Some("prod".to_string());
    test.policies.validation.apply(policy);
    test.policies.validation.apply(validation(
        "no-downscale",
        vec![cel(
            "operation == 'UPDATE' ? object.spec.replicas >= oldObject.spec.replicas : true",
            "true",
        )],
        "'replicas may not decrease'",
        FailureAction::Enforce,
    ));

    // The prod-scoped policy doesn't apply to the default namespace.
    let rsp = test.admit(
        Endpoint::Validate,
        request("CREATE", Some(deployment("web", 3, json!({}))), None),
    );
    assert!(rsp.allowed);

    let rsp = test.admit(
        Endpoint::Validate,
        request(
            "UPDATE",
            Some(deployment("web", 2, json!({}))),
            Some(deployment("web", 3, json!({}))),
        ),
    );
    assert!(!rsp.allowed);
    assert_eq!(rsp.result.message, "replicas may not decrease");

    // No policy watches deletes.
    let rsp = test.admit(
        Endpoint::Validate,
        request("DELETE", None, Some(deployment("web", 3, json!({})))),
    );
    assert!(rsp.allowed);
    assert_eq!(test.events.policies(), ["ValidationPolicy/no-downscale"]);
}

#[test]
fn filters_sources() {
    let test = TestConfig::default();
    let cms = configmaps("default");
    test.add_sources(
        &cms,
        &[
            configmap(
                "default",
                "quota-web",
                json!({ "team": "web" }),
                json!({ "frozen": "false" }),
            ),
            configmap(
                "default",
                "quota-db",
                json!({ "team": "db" }),
                json!({ "frozen": "true" }),
            ),
            configmap("default", "other", json!({ "team": "web" }), json!({})),
        ],
    );

    let mut policy = validation(
        "team-quota",
        vec![
            cel("size(sources[0])", "1"),
            cel("sources[0][0].data.frozen", "false"),
        ],
        "'team ' + object.metadata.labels.team + ' is frozen'",
        FailureAction::Enforce,
    );
    policy.sources = vec![source(
        cms.clone(),
        SourceFilter {
            name: Some(NameFilter {
                match_list: vec![],
                match_regex: Some(RegexFilter {
                    expression: "^quota-".to_string(),
                    negative: false,
                }),
            }),
            metadata: Some(MetadataFilter {
                labels: btreemap! {
                    "team".to_string() => "{{expr: object.metadata.labels.team}}".to_string(),
                },
                annotations: Default::default(),
            }),
            ..Default::default()
        },
    )];
    test.policies.validation.apply(policy);

    let team = |team: &str| deployment("web", 1, json!({ "team": team }));
    let rsp = test.admit(Endpoint::Validate, request("CREATE", Some(team("web")), None));
    assert!(rsp.allowed);
    let rsp = test.admit(Endpoint::Validate, request("CREATE", Some(team("db")), None));
    assert!(!rsp.allowed);
    assert_eq!(rsp.result.message, "team db is frozen");

    // No source matches an unknown team.
    let rsp = test.admit(Endpoint::Validate, request("CREATE", Some(team("api")), None));
    assert!(!rsp.allowed);
}

#[test]
fn malformed_updates_are_denied() {
    let test = TestConfig::default();
    let rsp = test.admit(
        Endpoint::Validate,
        request("UPDATE", Some(deployment("web", 1, json!({}))), None),
    );
    assert!(!rsp.allowed);
}
