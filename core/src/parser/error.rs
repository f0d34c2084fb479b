use thiserror::Error;

use crate::ast::Span;
use crate::parser::Rule;

/// Parser error with the location it was raised at.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Span,
}

/// Specific kinds of parse errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseErrorKind {
    #[error("expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
    #[error("invalid number literal '{text}'")]
    InvalidNumber { text: String },
    #[error("invalid escape sequence '{text}'")]
    InvalidEscape { text: String },
    #[error("cannot assign to this expression")]
    InvalidAssignTarget,
    #[error("syntax error: expression statement must be a call")]
    NotACall,
    /// Catch-all for pest errors we don't specifically handle.
    #[error("{message}")]
    Other { message: String },
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Stable short code, shown next to rendered diagnostics.
    pub fn code(&self) -> &'static str {
        match self.kind {
            ParseErrorKind::UnexpectedToken { .. } => "P001",
            ParseErrorKind::InvalidNumber { .. } => "P002",
            ParseErrorKind::InvalidEscape { .. } => "P003",
            ParseErrorKind::InvalidAssignTarget => "P004",
            ParseErrorKind::NotACall => "P005",
            ParseErrorKind::Other { .. } => "P999",
        }
    }

    pub fn help(&self) -> Option<&'static str> {
        match self.kind {
            ParseErrorKind::InvalidEscape { .. } => {
                Some("valid escapes are \\n \\t \\ddd \\xHH \\z \\u{XXX} and friends")
            }
            ParseErrorKind::InvalidAssignTarget => {
                Some("only names, `a.b` and `a[b]` can be assigned")
            }
            _ => None,
        }
    }
}

/// Convert a pest error into a ParseError with a human-readable message.
pub fn convert_pest_error(err: pest::error::Error<Rule>) -> ParseError {
    use pest::error::ErrorVariant;

    let span = match err.location {
        pest::error::InputLocation::Pos(pos) => Span(pos..pos),
        pest::error::InputLocation::Span((start, end)) => Span(start..end),
    };

    let kind = match err.variant {
        ErrorVariant::ParsingError {
            positives,
            negatives,
        } => ParseErrorKind::UnexpectedToken {
            expected: format_expected_rules(&positives),
            found: format_found_rules(&negatives),
        },
        ErrorVariant::CustomError { message } => ParseErrorKind::Other { message },
    };

    ParseError::new(kind, span)
}

/// Group pest rules into the concepts a user thinks in.
fn format_expected_rules(rules: &[Rule]) -> String {
    let mut concepts: Vec<&str> = Vec::new();

    for rule in rules {
        let concept = match rule {
            Rule::expr
            | Rule::exprlist
            | Rule::neg
            | Rule::not_op
            | Rule::len
            | Rule::paren_expr
            | Rule::suffixed_expr
            | Rule::function_expr
            | Rule::table => "expression",
            Rule::nil_lit
            | Rule::true_lit
            | Rule::false_lit
            | Rule::number
            | Rule::dq_string
            | Rule::sq_string
            | Rule::long_string => "literal",
            Rule::name | Rule::name_list => "name",
            Rule::or_op
            | Rule::and_op
            | Rule::eq_op
            | Rule::ne_op
            | Rule::le_op
            | Rule::ge_op
            | Rule::lt_op
            | Rule::gt_op
            | Rule::concat_op
            | Rule::add_op
            | Rule::sub_op
            | Rule::mul_op
            | Rule::idiv_op
            | Rule::div_op
            | Rule::mod_op
            | Rule::pow_op => "operator",
            Rule::member_suffix
            | Rule::index_suffix
            | Rule::method_suffix
            | Rule::call_suffix => "call or index",
            Rule::compound_op => "assignment",
            Rule::EOI => "end of input",
            _ => "statement",
        };
        if !concepts.contains(&concept) {
            concepts.push(concept);
        }
    }

    match concepts.split_last() {
        None => "something else".to_string(),
        Some((only, [])) => only.to_string(),
        Some((last, rest)) => format!("{} or {}", rest.join(", "), last),
    }
}

fn format_found_rules(rules: &[Rule]) -> String {
    match rules.first() {
        None => "unexpected token".to_string(),
        Some(Rule::name) => "name".to_string(),
        Some(Rule::number) => "number".to_string(),
        Some(Rule::dq_string | Rule::sq_string | Rule::long_string) => "string".to_string(),
        Some(Rule::EOI) => "end of input".to_string(),
        Some(rule) => format!("{:?}", rule),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_expected_rules_groups_concepts() {
        assert_eq!(format_expected_rules(&[Rule::number, Rule::dq_string]), "literal");
        assert_eq!(
            format_expected_rules(&[Rule::name, Rule::expr, Rule::EOI]),
            "name, expression or end of input"
        );
        assert_eq!(format_expected_rules(&[]), "something else");
    }

    #[test]
    fn test_code_and_message() {
        let error = ParseError::new(
            ParseErrorKind::InvalidNumber {
                text: "0xZZ".to_string(),
            },
            Span(3..7),
        );
        assert_eq!(error.code(), "P002");
        assert_eq!(error.to_string(), "invalid number literal '0xZZ'");
    }
}
