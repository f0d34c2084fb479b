//! Reference evaluator for the accepted Lua dialect.
//!
//! Runs a [`Chunk`] directly from the syntax tree. It exists to check that
//! obfuscated output behaves like its input: run both, compare what they
//! printed and returned.
//!
//! ## Design Principles
//!
//! - **Never panic**: programs that misbehave produce an [`EvalError`]
//! - **Bounded**: a step budget and a call depth limit stop runaway programs
//! - **Configurable host**: [`HostProfile`] removes `getfenv`, `bit32` or
//!   `table.pack` so the generated fallbacks get exercised
//!
//! ## Example
//!
//! ```
//! use veil_core::eval;
//!
//! let outcome = eval::run_source("print(1 + 2) return 'ok'").unwrap();
//! assert_eq!(outcome.output, "3\n");
//! ```
//!
//! `task.spawn`, `task.defer` and `task.delay` run their callback before
//! returning; there is no scheduler.

mod error;
mod interp;
mod stdlib;
pub mod value;

#[cfg(test)]
mod eval_test;

pub use error::EvalError;
pub use interp::Interpreter;
pub use value::{Table, Value};

use crate::{ast::Chunk, parser};

/// Which optional host facilities exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostProfile {
    pub getfenv: bool,
    pub bit32: bool,
    pub table_pack: bool,
    /// Free name `_ENV` resolves to the globals table.
    pub env_global: bool,
}

impl Default for HostProfile {
    fn default() -> Self {
        Self {
            getfenv: true,
            bit32: true,
            table_pack: true,
            env_global: false,
        }
    }
}

impl HostProfile {
    /// A 5.2-style host: `_ENV` instead of `getfenv`.
    pub fn env_only() -> Self {
        Self {
            getfenv: false,
            env_global: true,
            ..Self::default()
        }
    }

    /// No `bit32` and no `table.pack`.
    pub fn minimal() -> Self {
        Self {
            bit32: false,
            table_pack: false,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalLimits {
    /// Statements executed before giving up.
    pub max_steps: u64,
    pub max_depth: usize,
}

impl Default for EvalLimits {
    fn default() -> Self {
        Self {
            max_steps: 10_000_000,
            max_depth: 100,
        }
    }
}

/// What a finished run printed and returned.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub output: String,
    pub values: Vec<Value>,
}

pub fn run_chunk(chunk: &Chunk, host: HostProfile, limits: EvalLimits) -> Result<Outcome, EvalError> {
    let mut interp = Interpreter::new(host, limits);
    let values = interp.exec_chunk(chunk)?;
    Ok(Outcome {
        output: interp.output(),
        values,
    })
}

/// Parse and run `source` on the default host.
pub fn run_source(source: &str) -> crate::Result<Outcome> {
    let chunk = parser::parse(source)?;
    Ok(run_chunk(&chunk, HostProfile::default(), EvalLimits::default())?)
}
