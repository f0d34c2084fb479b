//! The private stack machine: instruction set, compiled program value and
//! the compiler that lowers function bodies to it.

pub mod compiler;
pub mod emitter;
pub mod error;
pub mod instruction;
pub mod program;
pub mod scope;

pub use compiler::VmCompiler;
pub use emitter::Emitter;
pub use error::CompileError;
pub use instruction::{Instruction, Opcode};
pub use program::{Constant, Program};
pub use scope::Scope;

#[cfg(test)]
mod compiler_test;
