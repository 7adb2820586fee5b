use super::*;

const QUOTA: &str = r#"
apiVersion: v1
kind: ResourceQuota
metadata:
  name: "{{expr: object.metadata.name}}-quota"
  namespace: default
spec:
  hard:
    pods: "{{expr: string(object.spec.replicas * 2)}}"
"#;

#[test]
fn applies_rendered_objects() {
    let test = TestConfig::default();
    test.policies.generation.apply(generation("quota", QUOTA));

    let rsp = test.admit(
        Endpoint::Generate,
        request("CREATE", Some(deployment("web", 3, json!({}))), None),
    );
    assert!(rsp.allowed);

    let applied = test.applied.0.lock().clone();
    assert_eq!(applied.len(), 1);
    let (requester, object) = &applied[0];
    assert_eq!(requester, "GenerationPolicy/quota");
    assert_eq!(object["kind"], "ResourceQuota");
    assert_eq!(object["metadata"]["name"], "web-quota");
    assert_eq!(object["spec"]["hard"]["pods"], "6");
}

#[test]
fn render_failures_are_recorded() {
    let test = TestConfig::default();
    test.policies.generation.apply(generation(
        "nameless",
        r#"{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {}}"#,
    ));
    test.policies.generation.apply(generation(
        "broken",
        r#"{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "{{expr: object.missing}}"}}"#,
    ));

    let rsp = test.admit(
        Endpoint::Generate,
        request("CREATE", Some(deployment("web", 3, json!({}))), None),
    );
    assert!(rsp.allowed, "generation never denies");
    assert!(test.applied.0.lock().is_empty());
    assert_eq!(
        test.events.policies(),
        ["GenerationPolicy/nameless", "GenerationPolicy/broken"]
    );
}
