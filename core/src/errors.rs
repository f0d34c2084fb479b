use thiserror::Error;

use crate::{eval::EvalError, parser::ParseError};

/// Errors that abort an obfuscation run.
///
/// Compile failures of individual functions are not listed here: the driver
/// recovers from those by leaving the function untouched.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Generated interpreter source did not parse back. This is a bug in the
    /// generator, never a property of the input.
    #[error("generated code for `{function}` does not parse: {error}")]
    Generator {
        function: String,
        error: ParseError,
        generated: String,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// Raised only by [`crate::eval::run_source`].
    #[error(transparent)]
    Eval(#[from] EvalError),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;
