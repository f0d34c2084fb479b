use crate::ast::{
    BinaryOp, Block, Chunk, Expr, FuncName, FunctionBody, Span, Stmt, StmtKind, TableField,
    UnaryOp,
};
use crate::parser::error::{ParseError, ParseErrorKind, convert_pest_error};
use crate::parser::string_literal;
use lazy_static::lazy_static;
use pest::Parser;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest_derive::Parser;

lazy_static! {
    // Note: precedence is defined lowest to highest.
    static ref PRATT_PARSER: PrattParser<Rule> = PrattParser::new()
        .op(Op::infix(Rule::or_op, Assoc::Left))          // `or`
        .op(Op::infix(Rule::and_op, Assoc::Left))         // `and`
        .op(
            Op::infix(Rule::eq_op, Assoc::Left) |
            Op::infix(Rule::ne_op, Assoc::Left) |
            Op::infix(Rule::lt_op, Assoc::Left) |
            Op::infix(Rule::le_op, Assoc::Left) |
            Op::infix(Rule::gt_op, Assoc::Left) |
            Op::infix(Rule::ge_op, Assoc::Left)
        )                                                 // comparisons
        .op(Op::infix(Rule::concat_op, Assoc::Right))     // `..`
        .op(
            Op::infix(Rule::add_op, Assoc::Left) |
            Op::infix(Rule::sub_op, Assoc::Left)
        )                                                 // `+`, `-`
        .op(
            Op::infix(Rule::mul_op, Assoc::Left) |
            Op::infix(Rule::div_op, Assoc::Left) |
            Op::infix(Rule::idiv_op, Assoc::Left) |
            Op::infix(Rule::mod_op, Assoc::Left)
        )                                                 // `*`, `/`, `//`, `%`
        .op(
            Op::prefix(Rule::neg) |
            Op::prefix(Rule::not_op) |
            Op::prefix(Rule::len)
        )                                                 // `-`, `not`, `#`
        .op(Op::infix(Rule::pow_op, Assoc::Right))        // `^` (binds tighter than unary)
        ;
}

#[derive(Parser)]
#[grammar = "parser/lua.pest"]
pub struct LuaParser;

/// Parse a complete source file.
pub fn parse(source: &str) -> Result<Chunk, ParseError> {
    let mut pairs = LuaParser::parse(Rule::chunk, source).map_err(convert_pest_error)?;
    let chunk = pairs
        .next()
        .ok_or_else(|| missing(Span::new(0, source.len())))?;
    let span = Span::from(chunk.as_span());
    let block = next(&mut chunk.into_inner(), &span)?;
    Ok(Chunk {
        body: parse_block(block)?,
    })
}

fn missing(span: Span) -> ParseError {
    ParseError::new(
        ParseErrorKind::Other {
            message: "missing expected pair in rule".to_string(),
        },
        span,
    )
}

fn next<'i>(pairs: &mut Pairs<'i, Rule>, parent: &Span) -> Result<Pair<'i, Rule>, ParseError> {
    pairs.next().ok_or_else(|| missing(parent.clone()))
}

fn parse_block(pair: Pair<Rule>) -> Result<Block, ParseError> {
    pair.into_inner().map(parse_stmt).collect()
}

fn parse_name_list(pair: Pair<Rule>) -> Vec<String> {
    pair.into_inner().map(|p| p.as_str().to_string()).collect()
}

fn parse_exprlist(pair: Pair<Rule>) -> Result<Vec<Expr>, ParseError> {
    pair.into_inner().map(parse_expr).collect()
}

fn parse_stmt(pair: Pair<Rule>) -> Result<Stmt, ParseError> {
    let span = Span::from(pair.as_span());
    let rule = pair.as_rule();
    let mut inner = pair.into_inner();

    let kind = match rule {
        Rule::label_stat => StmtKind::Label(next(&mut inner, &span)?.as_str().to_string()),
        Rule::break_stat => StmtKind::Break,
        Rule::continue_stat => StmtKind::Continue,
        Rule::goto_stat => StmtKind::Goto(next(&mut inner, &span)?.as_str().to_string()),
        Rule::do_stat => StmtKind::Do(parse_block(next(&mut inner, &span)?)?),
        Rule::while_stat => StmtKind::While {
            cond: parse_expr(next(&mut inner, &span)?)?,
            body: parse_block(next(&mut inner, &span)?)?,
        },
        Rule::repeat_stat => StmtKind::Repeat {
            body: parse_block(next(&mut inner, &span)?)?,
            cond: parse_expr(next(&mut inner, &span)?)?,
        },
        Rule::if_stat => {
            let cond = parse_expr(next(&mut inner, &span)?)?;
            let body = parse_block(next(&mut inner, &span)?)?;
            let mut clauses = vec![(cond, body)];
            let mut else_body = None;
            for clause in inner {
                let clause_span = Span::from(clause.as_span());
                match clause.as_rule() {
                    Rule::elseif_clause => {
                        let mut parts = clause.into_inner();
                        let cond = parse_expr(next(&mut parts, &clause_span)?)?;
                        let body = parse_block(next(&mut parts, &clause_span)?)?;
                        clauses.push((cond, body));
                    }
                    _ => {
                        let body = next(&mut clause.into_inner(), &clause_span)?;
                        else_body = Some(parse_block(body)?);
                    }
                }
            }
            StmtKind::If { clauses, else_body }
        }
        Rule::for_num => {
            let parts: Vec<Pair<Rule>> = inner.collect();
            let (var, rest) = parts.split_first().ok_or_else(|| missing(span.clone()))?;
            let (body, exprs) = rest.split_last().ok_or_else(|| missing(span.clone()))?;
            let mut exprs = exprs
                .iter()
                .cloned()
                .map(parse_expr)
                .collect::<Result<Vec<_>, _>>()?
                .into_iter();
            StmtKind::NumericFor {
                var: var.as_str().to_string(),
                start: exprs.next().ok_or_else(|| missing(span.clone()))?,
                limit: exprs.next().ok_or_else(|| missing(span.clone()))?,
                step: exprs.next(),
                body: parse_block(body.clone())?,
            }
        }
        Rule::for_in => StmtKind::GenericFor {
            vars: parse_name_list(next(&mut inner, &span)?),
            exprs: parse_exprlist(next(&mut inner, &span)?)?,
            body: parse_block(next(&mut inner, &span)?)?,
        },
        Rule::function_stat => StmtKind::Function {
            name: parse_func_name(next(&mut inner, &span)?),
            func: parse_func_body(next(&mut inner, &span)?)?,
        },
        Rule::local_function => StmtKind::LocalFunction {
            name: next(&mut inner, &span)?.as_str().to_string(),
            func: parse_func_body(next(&mut inner, &span)?)?,
        },
        Rule::local_stat => StmtKind::Local {
            names: parse_name_list(next(&mut inner, &span)?),
            values: match inner.next() {
                Some(list) => parse_exprlist(list)?,
                None => Vec::new(),
            },
        },
        Rule::compound_stat => {
            let target = assign_target(next(&mut inner, &span)?)?;
            let op = match next(&mut inner, &span)?.as_str() {
                "+=" => BinaryOp::Add,
                "-=" => BinaryOp::Sub,
                "*=" => BinaryOp::Mul,
                "/=" => BinaryOp::Div,
                "//=" => BinaryOp::IDiv,
                "%=" => BinaryOp::Mod,
                "^=" => BinaryOp::Pow,
                _ => BinaryOp::Concat,
            };
            StmtKind::CompoundAssign {
                op,
                target,
                value: parse_expr(next(&mut inner, &span)?)?,
            }
        }
        Rule::assign_stat => {
            let targets = next(&mut inner, &span)?
                .into_inner()
                .map(assign_target)
                .collect::<Result<_, _>>()?;
            StmtKind::Assign {
                targets,
                values: parse_exprlist(next(&mut inner, &span)?)?,
            }
        }
        Rule::call_stat => {
            let expr = parse_suffixed(next(&mut inner, &span)?)?;
            if !matches!(expr, Expr::Call { .. } | Expr::MethodCall { .. }) {
                return Err(ParseError::new(ParseErrorKind::NotACall, span));
            }
            StmtKind::Call(expr)
        }
        Rule::return_stat => StmtKind::Return(match inner.next() {
            Some(list) => parse_exprlist(list)?,
            None => Vec::new(),
        }),
        other => unreachable!("Unknown statement rule: {:?}", other),
    };

    Ok(Stmt::new(kind, span))
}

fn assign_target(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let span = Span::from(pair.as_span());
    let expr = parse_suffixed(pair)?;
    match expr {
        Expr::Ident(_) | Expr::Index { .. } | Expr::Member { .. } => Ok(expr),
        _ => Err(ParseError::new(ParseErrorKind::InvalidAssignTarget, span)),
    }
}

fn parse_func_name(pair: Pair<Rule>) -> FuncName {
    let mut path = Vec::new();
    let mut method = None;
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::method_name => method = Some(part.as_str().trim().to_string()),
            _ => path.push(part.as_str().to_string()),
        }
    }
    FuncName { path, method }
}

fn parse_func_body(pair: Pair<Rule>) -> Result<FunctionBody, ParseError> {
    let span = Span::from(pair.as_span());
    let mut params = Vec::new();
    let mut is_vararg = false;
    let mut body = Vec::new();

    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::param_list => {
                for param in part.into_inner() {
                    match param.as_rule() {
                        Rule::vararg => is_vararg = true,
                        _ => params.push(param.as_str().to_string()),
                    }
                }
            }
            _ => body = parse_block(part)?,
        }
    }

    Ok(FunctionBody {
        params,
        is_vararg,
        body,
        span,
    })
}

pub(crate) fn parse_expr(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    PRATT_PARSER
        .map_primary(parse_operand)
        .map_prefix(|op, rhs| {
            let op = match op.as_rule() {
                Rule::neg => UnaryOp::Neg,
                Rule::not_op => UnaryOp::Not,
                Rule::len => UnaryOp::Len,
                _ => unreachable!("Unknown prefix operator: {:?}", op.as_rule()),
            };
            Ok(Expr::Unary {
                op,
                expr: Box::new(rhs?),
            })
        })
        .map_infix(|lhs, op, rhs| {
            let op = match op.as_rule() {
                Rule::or_op => BinaryOp::Or,
                Rule::and_op => BinaryOp::And,
                Rule::eq_op => BinaryOp::Eq,
                Rule::ne_op => BinaryOp::Ne,
                Rule::lt_op => BinaryOp::Lt,
                Rule::le_op => BinaryOp::Le,
                Rule::gt_op => BinaryOp::Gt,
                Rule::ge_op => BinaryOp::Ge,
                Rule::concat_op => BinaryOp::Concat,
                Rule::add_op => BinaryOp::Add,
                Rule::sub_op => BinaryOp::Sub,
                Rule::mul_op => BinaryOp::Mul,
                Rule::div_op => BinaryOp::Div,
                Rule::idiv_op => BinaryOp::IDiv,
                Rule::mod_op => BinaryOp::Mod,
                Rule::pow_op => BinaryOp::Pow,
                _ => unreachable!("Unknown binary operator: {:?}", op.as_rule()),
            };
            Ok(Expr::Binary {
                op,
                left: Box::new(lhs?),
                right: Box::new(rhs?),
            })
        })
        .parse(pair.into_inner())
}

fn parse_operand(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let span = Span::from(pair.as_span());
    match pair.as_rule() {
        Rule::nil_lit => Ok(Expr::Nil),
        Rule::true_lit => Ok(Expr::True),
        Rule::false_lit => Ok(Expr::False),
        Rule::vararg => Ok(Expr::Vararg),
        Rule::number => parse_number(pair.as_str(), span),
        Rule::dq_string | Rule::sq_string | Rule::long_string => parse_string(pair),
        Rule::function_expr => {
            let body = next(&mut pair.into_inner(), &span)?;
            Ok(Expr::Function(Box::new(parse_func_body(body)?)))
        }
        Rule::table => parse_table(pair),
        Rule::suffixed_expr => parse_suffixed(pair),
        Rule::expr => parse_expr(pair),
        other => unreachable!("Unknown operand rule: {:?}", other),
    }
}

fn parse_number(text: &str, span: Span) -> Result<Expr, ParseError> {
    let invalid = || {
        ParseError::new(
            ParseErrorKind::InvalidNumber {
                text: text.to_string(),
            },
            span.clone(),
        )
    };

    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u128::from_str_radix(hex, 16).map_err(|_| invalid())? as f64,
        None => text.parse::<f64>().map_err(|_| invalid())?,
    };
    Ok(Expr::Number(value))
}

fn parse_string(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let span = Span::from(pair.as_span());
    let is_long = pair.as_rule() == Rule::long_string;
    let body = next(&mut pair.into_inner(), &span)?;

    if is_long {
        return Ok(Expr::Str(string_literal::long_body(body.as_str())));
    }
    string_literal::unescape(body.as_str())
        .map(Expr::Str)
        .map_err(|text| ParseError::new(ParseErrorKind::InvalidEscape { text }, span))
}

fn parse_table(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let mut fields = Vec::new();
    for field in pair.into_inner() {
        let span = Span::from(field.as_span());
        let rule = field.as_rule();
        let mut parts = field.into_inner();
        fields.push(match rule {
            Rule::keyed_field => TableField::Keyed(
                parse_expr(next(&mut parts, &span)?)?,
                parse_expr(next(&mut parts, &span)?)?,
            ),
            Rule::named_field => TableField::Named(
                next(&mut parts, &span)?.as_str().to_string(),
                parse_expr(next(&mut parts, &span)?)?,
            ),
            _ => TableField::Positional(parse_expr(next(&mut parts, &span)?)?),
        });
    }
    Ok(Expr::Table(fields))
}

fn parse_call_args(pair: Pair<Rule>) -> Result<Vec<Expr>, ParseError> {
    match pair.into_inner().next() {
        None => Ok(Vec::new()),
        Some(arg) => match arg.as_rule() {
            Rule::exprlist => parse_exprlist(arg),
            Rule::table => Ok(vec![parse_table(arg)?]),
            _ => Ok(vec![parse_string(arg)?]),
        },
    }
}

fn parse_suffixed(pair: Pair<Rule>) -> Result<Expr, ParseError> {
    let span = Span::from(pair.as_span());
    let mut inner = pair.into_inner();
    let primary = next(&mut inner, &span)?;

    let mut expr = match primary.as_rule() {
        Rule::name => Expr::Ident(primary.as_str().to_string()),
        _ => {
            let primary_span = Span::from(primary.as_span());
            let inner_expr = next(&mut primary.into_inner(), &primary_span)?;
            Expr::Paren(Box::new(parse_expr(inner_expr)?))
        }
    };

    for suffix in inner {
        let suffix_span = Span::from(suffix.as_span());
        expr = match suffix.as_rule() {
            Rule::member_suffix => Expr::Member {
                object: Box::new(expr),
                name: next(&mut suffix.into_inner(), &suffix_span)?
                    .as_str()
                    .to_string(),
            },
            Rule::index_suffix => Expr::Index {
                object: Box::new(expr),
                key: Box::new(parse_expr(next(&mut suffix.into_inner(), &suffix_span)?)?),
            },
            Rule::method_suffix => {
                let mut parts = suffix.into_inner();
                let method = next(&mut parts, &suffix_span)?.as_str().to_string();
                Expr::MethodCall {
                    receiver: Box::new(expr),
                    method,
                    args: parse_call_args(next(&mut parts, &suffix_span)?)?,
                }
            }
            _ => Expr::Call {
                callee: Box::new(expr),
                args: parse_call_args(suffix)?,
            },
        };
    }

    Ok(expr)
}
