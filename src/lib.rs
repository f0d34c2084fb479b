//! Veil - a virtualizing obfuscator for Lua
//!
//! # Overview
//!
//! Veil rewrites Lua source so that selected functions no longer exist as
//! readable code. Each one is compiled to a private stack bytecode, the
//! bytecode is scrambled, and the function body is replaced by a generated
//! interpreter that runs it. The output is plain Lua again and runs on the
//! same hosts as the input.
//!
//! # Quick Start
//!
//! ```
//! use veil::{Obfuscator, ObfuscatorOptions};
//!
//! let options = ObfuscatorOptions::from_json(r#"{ "seed": "demo" }"#).unwrap();
//! let source = "local function add(a, b) return a + b end print(add(2, 3))";
//! let out = Obfuscator::new(options).obfuscate(source).unwrap();
//!
//! let run = veil::eval::run_source(&out).unwrap();
//! assert_eq!(run.output, "5\n");
//! ```
//!
//! # Extending the pipeline
//!
//! Further AST passes implement [`Pass`] and are appended with
//! [`Obfuscator::with_pass`]. They run after virtualization and must leave
//! statements marked `vm_owned` untouched.

pub use veil_core::{Error, Obfuscator, ObfuscatorOptions, Pass, Result, VmOptions};
pub use veil_core::{ast, driver, eval, options, parser, printer, rng};
pub use veil_core::parser::ParseError;

mod error_renderer;
pub use error_renderer::{render_error, render_error_to, render_error_to_string, render_error_to_string_no_color};
