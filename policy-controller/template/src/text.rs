use crate::{Engine, Error, InjectedData};
use minijinja::{Environment, ErrorKind, UndefinedBehavior};

pub(crate) fn environment() -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env
}

pub(crate) fn render(
    env: &Environment<'static>,
    template: &str,
    data: &InjectedData<'_>,
) -> Result<String, Error> {
    env.render_str(template, data).map_err(error)
}

pub(crate) fn check(env: &Environment<'static>, template: &str) -> Result<(), Error> {
    env.template_from_str(template).map(|_| ()).map_err(error)
}

fn error(err: minijinja::Error) -> Error {
    if err.kind() == ErrorKind::SyntaxError {
        Error::syntax(Engine::Template, err)
    } else {
        Error::evaluation(Engine::Template, err)
    }
}
