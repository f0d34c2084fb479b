//! Evaluation errors.
//!
//! - **Runtime errors** come from the program itself (`error(...)`, calling a
//!   nil value, arithmetic on a table) and can be caught by `pcall`.
//! - **Resource exceeded errors** stop the evaluation outright; `pcall` does
//!   not catch them.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("runtime error: {message}")]
    Runtime { message: String },

    #[error("step limit of {limit} exceeded")]
    StepLimit { limit: u64 },

    #[error("call depth limit of {limit} exceeded")]
    DepthLimit { limit: usize },
}

impl EvalError {
    pub fn runtime(message: impl Into<String>) -> Self {
        EvalError::Runtime {
            message: message.into(),
        }
    }

    /// Whether `pcall` may turn this error into a `false` result.
    pub fn is_catchable(&self) -> bool {
        matches!(self, EvalError::Runtime { .. })
    }
}
