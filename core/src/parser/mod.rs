pub mod error;
pub mod parser;
mod string_literal;

// Re-export the parser and rule enum for external use
pub use error::{ParseError, ParseErrorKind};
pub use parser::LuaParser;
pub use parser::Rule;
pub use parser::parse;

use crate::ast::Block;

/// Source front-end used by passes that need to turn text back into
/// statements, e.g. after synthesizing code as source.
pub trait Frontend {
    fn parse_block(&self, source: &str) -> Result<Block, ParseError>;
}

/// The pest grammar front-end.
#[derive(Debug, Default, Clone, Copy)]
pub struct PestFrontend;

impl Frontend for PestFrontend {
    fn parse_block(&self, source: &str) -> Result<Block, ParseError> {
        parse(source).map(|chunk| chunk.body)
    }
}

#[cfg(test)]
mod parse_test;
