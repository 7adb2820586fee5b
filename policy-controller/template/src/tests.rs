use super::*;
use serde_json::json;

fn deployment(replicas: i64) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": "web", "namespace": "default", "labels": { "app": "web" } },
        "spec": { "replicas": replicas },
    })
}

fn data(object: &Value) -> InjectedData<'_> {
    InjectedData {
        operation: "CREATE",
        object: Some(object),
        ..Default::default()
    }
}

#[test]
fn engine_names_round_trip() {
    for engine in Engine::ALL {
        assert_eq!(engine.as_str().parse::<Engine>().unwrap(), engine);
    }
    assert_eq!("CEL".parse::<Engine>().unwrap(), Engine::Cel);
    assert!(matches!(
        "lua".parse::<Engine>(),
        Err(Error::UnknownEngine(name)) if name == "lua"
    ));
    assert_eq!(Engine::default(), Engine::Cel);
}

#[test]
fn cel_compares_integers() {
    let evaluator = Evaluator::default();
    let small = deployment(3);
    let large = deployment(20);

    let expr = "object.spec.replicas <= 10";
    assert_eq!(evaluator.render(Engine::Cel, expr, &data(&small)).unwrap(), "true");
    assert_eq!(evaluator.render(Engine::Cel, expr, &data(&large)).unwrap(), "false");
}

#[test]
fn cel_reads_operation_and_sources() {
    let evaluator = Evaluator::default();
    let object = deployment(1);
    let quota = json!({ "metadata": { "name": "quota" }, "data": { "max": "5" } });
    let data = InjectedData {
        sources: vec![vec![&quota]],
        ..data(&object)
    };

    assert_eq!(
        evaluator
            .render(Engine::Cel, "operation == 'CREATE'", &data)
            .unwrap(),
        "true"
    );
    assert_eq!(
        evaluator
            .render(Engine::Cel, "sources[0][0].data.max", &data)
            .unwrap(),
        "5"
    );
    assert_eq!(
        evaluator.render(Engine::Cel, "size(sources[0])", &data).unwrap(),
        "1"
    );
}

#[test]
fn cel_old_object_is_null_unless_set() {
    let evaluator = Evaluator::default();
    let object = deployment(1);
    assert_eq!(
        evaluator
            .render(Engine::Cel, "oldObject == null", &data(&object))
            .unwrap(),
        "true"
    );
}

#[test]
fn cel_reports_errors() {
    let evaluator = Evaluator::default();
    let object = deployment(1);

    assert!(matches!(
        evaluator.render(Engine::Cel, "object.spec.replicas <=", &data(&object)),
        Err(Error::Syntax { engine: Engine::Cel, .. })
    ));
    assert!(matches!(
        evaluator.render(Engine::Cel, "missing.field == 1", &data(&object)),
        Err(Error::Evaluation { engine: Engine::Cel, .. })
    ));
}

#[test]
fn script_concatenates_prints() {
    let evaluator = Evaluator::default();
    let object = deployment(4);
    let out = evaluator
        .render(
            Engine::Script,
            r#"print("replicas="); print(object.spec.replicas);"#,
            &data(&object),
        )
        .unwrap();
    assert_eq!(out, "replicas=4");
}

#[test]
fn script_returns_final_value_without_prints() {
    let evaluator = Evaluator::default();
    let object = deployment(4);
    let out = evaluator
        .render(Engine::Script, "object.spec.replicas * 2", &data(&object))
        .unwrap();
    assert_eq!(out, "8");
}

#[test]
fn script_assigns_vars() {
    let evaluator = Evaluator::default();
    let object = deployment(4);
    let ev = evaluator
        .evaluate(
            Engine::Script,
            r#"vars.app = object.metadata.labels.app; true"#,
            &data(&object),
        )
        .unwrap();
    assert_eq!(ev.output, "true");
    let vars = ev.vars.expect("scripts must return vars");
    assert_eq!(vars.get("app"), Some(&json!("web")));

    // A later evaluation observes the assignment.
    let data = InjectedData {
        vars,
        ..data(&object)
    };
    assert_eq!(
        evaluator.render(Engine::Cel, "vars.app", &data).unwrap(),
        "web"
    );
}

#[test]
fn script_rejects_undefined_variables_and_runaway_loops() {
    let evaluator = Evaluator::new(ScriptLimits {
        max_operations: 1_000,
        ..Default::default()
    });
    let object = deployment(1);

    assert!(matches!(
        evaluator.render(Engine::Script, "undefined_thing + 1", &data(&object)),
        Err(Error::Syntax { .. }) | Err(Error::Evaluation { .. })
    ));
    assert!(matches!(
        evaluator.render(Engine::Script, "loop { }", &data(&object)),
        Err(Error::Evaluation { engine: Engine::Script, .. })
    ));
}

#[test]
fn template_renders_fields() {
    let evaluator = Evaluator::default();
    let object = deployment(7);
    let out = evaluator
        .render(
            Engine::Template,
            "{{ object.metadata.name }} has {{ object.spec.replicas }} replicas",
            &data(&object),
        )
        .unwrap();
    assert_eq!(out, "web has 7 replicas");
}

#[test]
fn template_rejects_undefined() {
    let evaluator = Evaluator::default();
    let object = deployment(7);
    assert!(matches!(
        evaluator.render(Engine::Template, "{{ object.nope.deeper }}", &data(&object)),
        Err(Error::Evaluation { engine: Engine::Template, .. })
    ));
    assert!(matches!(
        evaluator.render(Engine::Template, "{% if %}", &data(&object)),
        Err(Error::Syntax { engine: Engine::Template, .. })
    ));
}

#[test]
fn plain_substitutes_markers_only() {
    let evaluator = Evaluator::default();
    let object = deployment(20);
    let out = evaluator
        .render(
            Engine::Plain,
            "deployment {{expr: object.metadata.name}} wants {{ expr: object.spec.replicas }} replicas {not an expr}",
            &data(&object),
        )
        .unwrap();
    assert_eq!(out, "deployment web wants 20 replicas {not an expr}");

    assert_eq!(
        evaluator
            .render(Engine::Plain, "no markers", &data(&object))
            .unwrap(),
        "no markers"
    );
    assert!(has_expressions("a {{expr: 1}} b"));
    assert!(!has_expressions("a {{ b }}"));
}

#[test]
fn plain_evaluates_multiline_and_nested_markers() {
    let evaluator = Evaluator::default();
    let object = deployment(3);
    assert_eq!(
        evaluator
            .render(
                Engine::Plain,
                "replicas={{expr: object.spec.replicas\n + 1}}",
                &data(&object)
            )
            .unwrap(),
        "replicas=4"
    );
    assert_eq!(
        evaluator
            .render(Engine::Plain, "x={{expr: {'a': {'b': 1}}.a.b}}", &data(&object))
            .unwrap(),
        "x=1"
    );

    assert!(matches!(
        evaluator.render(Engine::Plain, "x={{expr: object.spec", &data(&object)),
        Err(Error::Syntax { engine: Engine::Plain, .. })
    ));
    assert!(evaluator.check(Engine::Plain, "x={{expr: 1 +\n 1").is_err());
}

#[test]
fn check_validates_without_evaluating() {
    let evaluator = Evaluator::default();
    assert!(evaluator.check(Engine::Cel, "object.spec.replicas <= 10").is_ok());
    assert!(evaluator.check(Engine::Cel, "object.spec.replicas <=").is_err());
    assert!(evaluator.check(Engine::Script, "vars.x = object; 1").is_ok());
    assert!(evaluator.check(Engine::Script, "let = ;").is_err());
    assert!(evaluator.check(Engine::Template, "{{ object }}").is_ok());
    assert!(evaluator.check(Engine::Template, "{% for %}").is_err());
    assert!(evaluator.check(Engine::Plain, "ok {{expr: 1 + }}").is_err());
}
