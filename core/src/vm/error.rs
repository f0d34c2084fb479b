//! Compilation errors.
//!
//! Every variant means "this function cannot be virtualized"; the driver
//! reports it and leaves the function as it was.

use thiserror::Error;

use crate::ast::Span;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("vararg expressions are not supported")]
    Vararg { span: Span },
    #[error("nested function definitions are not supported")]
    NestedFunction { span: Span },
    #[error("unsupported construct: {what}")]
    Unsupported { what: String, span: Span },
    #[error("`break` outside of a loop")]
    BreakOutsideLoop { span: Span },
    #[error("`continue` outside of a loop")]
    ContinueOutsideLoop { span: Span },
    #[error("no visible label `{label}` for goto")]
    UnresolvedGoto { label: String, span: Span },
    #[error("label `{label}` already defined")]
    DuplicateLabel { label: String, span: Span },
    /// A jump was emitted to a label that was never marked.
    #[error("jump to unresolved label `{label}`")]
    UnresolvedLabel { label: String },
}

impl CompileError {
    pub fn span(&self) -> Option<&Span> {
        match self {
            CompileError::Vararg { span }
            | CompileError::NestedFunction { span }
            | CompileError::Unsupported { span, .. }
            | CompileError::BreakOutsideLoop { span }
            | CompileError::ContinueOutsideLoop { span }
            | CompileError::UnresolvedGoto { span, .. }
            | CompileError::DuplicateLabel { span, .. } => Some(span),
            CompileError::UnresolvedLabel { .. } => None,
        }
    }
}
