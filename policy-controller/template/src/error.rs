use crate::Engine;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown template engine: {0}")]
    UnknownEngine(String),

    #[error("{engine} syntax error: {message}")]
    Syntax { engine: Engine, message: String },

    #[error("{engine} evaluation failed: {message}")]
    Evaluation { engine: Engine, message: String },

    #[error("failed to inject `{name}` into the {engine} context: {message}")]
    Data {
        engine: Engine,
        name: &'static str,
        message: String,
    },
}

impl Error {
    pub(crate) fn syntax(engine: Engine, error: impl std::fmt::Display) -> Self {
        Self::Syntax {
            engine,
            message: error.to_string(),
        }
    }

    pub(crate) fn evaluation(engine: Engine, error: impl std::fmt::Display) -> Self {
        Self::Evaluation {
            engine,
            message: error.to_string(),
        }
    }

    pub(crate) fn data(engine: Engine, name: &'static str, error: impl std::fmt::Display) -> Self {
        Self::Data {
            engine,
            name,
            message: error.to_string(),
        }
    }
}
