use crate::{Engine, Error, Evaluation, InjectedData};
use parking_lot::Mutex;
use rhai::{Dynamic, EvalAltResult, Scope};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Bounds the work a single script may perform.
#[derive(Clone, Debug)]
pub struct ScriptLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: 100_000,
            max_call_levels: 32,
            max_expr_depth: 64,
            max_string_size: 1024 * 1024,
            max_array_size: 10_000,
            max_map_size: 10_000,
        }
    }
}

pub(crate) fn evaluate(
    limits: &ScriptLimits,
    script: &str,
    data: &InjectedData<'_>,
) -> Result<Evaluation, Error> {
    let printed = Arc::new(Mutex::new(Vec::<String>::new()));
    let mut engine = engine(limits);
    engine.on_print({
        let printed = printed.clone();
        move |s| printed.lock().push(s.to_string())
    });
    engine.on_debug(|_, _, _| {});

    let mut scope = Scope::new();
    scope.push_constant_dynamic("operation", Dynamic::from(data.operation.to_string()));
    scope.push_constant_dynamic("object", to_dynamic("object", &data.object)?);
    scope.push_constant_dynamic("oldObject", to_dynamic("oldObject", &data.old_object)?);
    scope.push_constant_dynamic("sources", to_dynamic("sources", &data.sources)?);
    scope.push_dynamic("vars", to_dynamic("vars", &data.vars)?);

    let value = engine
        .eval_with_scope::<Dynamic>(&mut scope, script)
        .map_err(error)?;

    let vars = match scope.get_value::<rhai::Map>("vars") {
        Some(vars) => Some(from_dynamic(Dynamic::from_map(vars))?),
        None => None,
    };

    let printed = std::mem::take(&mut *printed.lock());
    let output = if !printed.is_empty() {
        printed.concat()
    } else if value.is_unit() {
        String::new()
    } else {
        value.to_string()
    };

    Ok(Evaluation { output, vars })
}

pub(crate) fn check(limits: &ScriptLimits, script: &str) -> Result<(), Error> {
    let mut scope = Scope::new();
    for name in ["operation", "object", "oldObject", "sources"] {
        scope.push_constant_dynamic(name, Dynamic::UNIT);
    }
    scope.push_dynamic("vars", Dynamic::UNIT);

    engine(limits)
        .compile_with_scope(&scope, script)
        .map(|_| ())
        .map_err(|e| Error::syntax(Engine::Script, e))
}

fn engine(limits: &ScriptLimits) -> rhai::Engine {
    let mut engine = rhai::Engine::new();
    engine.set_strict_variables(true);
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
    engine
}

fn to_dynamic<T: serde::Serialize>(name: &'static str, value: &T) -> Result<Dynamic, Error> {
    rhai::serde::to_dynamic(value).map_err(|e| Error::data(Engine::Script, name, e))
}

fn from_dynamic(vars: Dynamic) -> Result<Map<String, Value>, Error> {
    match rhai::serde::from_dynamic::<Value>(&vars) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Ok(Map::new()),
        Err(e) => Err(Error::data(Engine::Script, "vars", e)),
    }
}

fn error(err: Box<EvalAltResult>) -> Error {
    match *err {
        EvalAltResult::ErrorParsing(..) => Error::syntax(Engine::Script, err),
        _ => Error::evaluation(Engine::Script, err),
    }
}
