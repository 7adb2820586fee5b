//! Template evaluation for policy conditions, messages, patches and generated objects.
//!
//! Every engine is a pure function of a template string and an [`InjectedData`] context. The
//! context exposes the admission `operation`, the reviewed `object`, the `oldObject` (null unless
//! the request is an update), the policy's `sources` (one list per declared source selector) and a
//! `vars` map that carries intermediate values between a policy's conditions.
//!
//! Four engines are supported:
//!
//! - [`Engine::Cel`] (the default) evaluates a single CEL expression.
//! - [`Engine::Script`] runs a sandboxed Rhai script. Output is everything the script `print`s,
//!   or its final value if it prints nothing. Scripts may write to the `vars` map.
//! - [`Engine::Template`] renders a Jinja-style text template with strict undefined handling.
//! - [`Engine::Plain`] copies text through unchanged except for `{{expr: ...}}` markers, each of
//!   which is evaluated as a CEL expression and replaced by its result.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cel;
mod error;
mod plain;
mod script;
mod text;

#[cfg(test)]
mod tests;

pub use self::{error::Error, script::ScriptLimits};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};

/// Selects the evaluation engine for a template.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Cel,
    Script,
    Template,
    Plain,
}

/// The data made available to a template.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectedData<'a> {
    pub operation: &'a str,
    pub object: Option<&'a Value>,
    pub old_object: Option<&'a Value>,
    pub sources: Vec<Vec<&'a Value>>,
    pub vars: Map<String, Value>,
}

/// The result of evaluating a template.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    pub output: String,

    /// Set when the engine supports variable assignment. Replaces the context's `vars` for
    /// subsequent evaluations.
    pub vars: Option<Map<String, Value>>,
}

/// Evaluates templates with any supported engine.
#[derive(Debug)]
pub struct Evaluator {
    text: minijinja::Environment<'static>,
    limits: ScriptLimits,
}

// === impl Engine ===

impl Engine {
    pub const ALL: [Engine; 4] = [Engine::Cel, Engine::Script, Engine::Template, Engine::Plain];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cel => "cel",
            Self::Script => "script",
            Self::Template => "template",
            Self::Plain => "plain",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|engine| engine.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownEngine(s.to_string()))
    }
}

// === impl Evaluator ===

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(ScriptLimits::default())
    }
}

impl Evaluator {
    pub fn new(limits: ScriptLimits) -> Self {
        Self {
            text: text::environment(),
            limits,
        }
    }

    /// Evaluates `template` with `engine` against `data`.
    pub fn evaluate(
        &self,
        engine: Engine,
        template: &str,
        data: &InjectedData<'_>,
    ) -> Result<Evaluation, Error> {
        match engine {
            Engine::Cel => cel::evaluate(template, data).map(Evaluation::output),
            Engine::Script => script::evaluate(&self.limits, template, data),
            Engine::Template => text::render(&self.text, template, data).map(Evaluation::output),
            Engine::Plain => plain::render(template, data).map(Evaluation::output),
        }
    }

    /// Evaluates `template` and returns only its output.
    pub fn render(
        &self,
        engine: Engine,
        template: &str,
        data: &InjectedData<'_>,
    ) -> Result<String, Error> {
        self.evaluate(engine, template, data).map(|ev| ev.output)
    }

    /// Checks that `template` parses for `engine` without evaluating it.
    pub fn check(&self, engine: Engine, template: &str) -> Result<(), Error> {
        match engine {
            Engine::Cel => cel::check(template),
            Engine::Script => script::check(&self.limits, template),
            Engine::Template => text::check(&self.text, template),
            Engine::Plain => plain::check(template),
        }
    }
}

/// Returns true if `text` contains at least one `{{expr: ...}}` marker.
pub fn has_expressions(text: &str) -> bool {
    plain::has_expressions(text)
}

// === impl Evaluation ===

impl Evaluation {
    fn output(output: String) -> Self {
        Self { output, vars: None }
    }
}
