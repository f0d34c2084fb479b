//! Core of veil: the Lua front-end, the virtualization pass and the
//! reference evaluator.
//!
//! Most users want [`Obfuscator`]; [`driver::Virtualizer`] runs the pass on
//! an already parsed chunk and reports what it did.

pub mod analysis;
pub mod ast;
pub mod codegen;
pub mod driver;
pub mod errors;
pub mod eval;
pub mod lift;
pub mod obfuscate;
pub mod options;
pub mod parser;
pub mod pass;
pub mod printer;
pub mod rng;
pub mod vm;

pub use errors::{Error, Result};
pub use options::{ObfuscatorOptions, VmOptions};
pub use pass::{Obfuscator, Pass};
