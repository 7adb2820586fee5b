use crate::{Engine, Error, InjectedData};
use cel_interpreter::{objects::Key, Context, Program, Value};
use serde_json::Value as Json;
use std::{collections::HashMap, sync::Arc};

pub(crate) fn evaluate(expr: &str, data: &InjectedData<'_>) -> Result<String, Error> {
    let program = Program::compile(expr).map_err(|e| Error::syntax(Engine::Cel, e))?;

    let mut ctx = Context::default();
    ctx.add_variable_from_value("operation", Value::String(Arc::new(data.operation.to_string())));
    ctx.add_variable_from_value("object", data.object.map(to_cel).unwrap_or(Value::Null));
    ctx.add_variable_from_value("oldObject", data.old_object.map(to_cel).unwrap_or(Value::Null));
    ctx.add_variable_from_value(
        "sources",
        Value::List(Arc::new(
            data.sources
                .iter()
                .map(|items| Value::List(Arc::new(items.iter().map(|v| to_cel(v)).collect())))
                .collect(),
        )),
    );
    ctx.add_variable_from_value(
        "vars",
        data.vars
            .iter()
            .map(|(k, v)| (k.clone(), to_cel(v)))
            .collect::<HashMap<String, Value>>(),
    );

    let value = program
        .execute(&ctx)
        .map_err(|e| Error::evaluation(Engine::Cel, e))?;
    Ok(stringify(&value))
}

pub(crate) fn check(expr: &str) -> Result<(), Error> {
    Program::compile(expr)
        .map(|_| ())
        .map_err(|e| Error::syntax(Engine::Cel, e))
}

/// Integers are always injected as signed so that comparisons against literals in expressions
/// (which CEL types as `int`) behave as written.
fn to_cel(value: &Json) -> Value {
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else {
                Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        Json::String(s) => Value::String(Arc::new(s.clone())),
        Json::Array(items) => Value::List(Arc::new(items.iter().map(to_cel).collect())),
        Json::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), to_cel(v)))
            .collect::<HashMap<String, Value>>()
            .into(),
    }
}

/// Strings are rendered without quotes. Lists and maps are rendered as JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::UInt(u) => u.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Null => "null".to_string(),
        other => match to_json(other) {
            Json::String(s) => s,
            json => json.to_string(),
        },
    }
}

fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::UInt(u) => Json::from(*u),
        Value::Float(f) => Json::from(*f),
        Value::String(s) => Json::String(s.to_string()),
        Value::Bytes(b) => Json::String(String::from_utf8_lossy(b).into_owned()),
        Value::List(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(map) => Json::Object(
            map.map
                .iter()
                .map(|(k, v)| (key(k), to_json(v)))
                .collect(),
        ),
        Value::Timestamp(ts) => Json::String(ts.to_rfc3339()),
        Value::Duration(d) => Json::String(format!("{}s", d.num_milliseconds() as f64 / 1000.0)),
        // Functions have no data representation.
        Value::Function(..) => Json::Null,
    }
}

fn key(key: &Key) -> String {
    match key {
        Key::String(s) => s.to_string(),
        Key::Int(i) => i.to_string(),
        Key::Uint(u) => u.to_string(),
        Key::Bool(b) => b.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_collections_as_json() {
        let data = InjectedData::default();
        assert_eq!(evaluate("['a', 1, true]", &data).unwrap(), r#"["a",1,true]"#);
        assert_eq!(evaluate("{'a': {'b': 'c'}}", &data).unwrap(), r#"{"a":{"b":"c"}}"#);
        assert_eq!(evaluate("b'abc'", &data).unwrap(), "abc");
        assert_eq!(evaluate("'plain'", &data).unwrap(), "plain");
    }
}
