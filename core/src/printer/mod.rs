//! Pretty printer producing source the front-end parses back into the same tree.
//!
//! Parentheses are inserted from operator precedence alone; the printer never
//! relies on the spans of the original text.

use crate::ast::{Chunk, Expr, FunctionBody, Stmt, StmtKind, TableField, UnaryOp};

const INDENT: &str = "    ";

/// Binding power of atoms and suffixed expressions.
const ATOM: u8 = 100;

pub fn print_chunk(chunk: &Chunk) -> String {
    print_block(&chunk.body)
}

pub fn print_block(block: &[Stmt]) -> String {
    let mut printer = Printer::default();
    printer.block(block);
    printer.out
}

pub fn print_expr(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(&mut out, expr);
    out
}

#[derive(Default)]
struct Printer {
    out: String,
    depth: usize,
}

impl Printer {
    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn nested(&mut self, block: &[Stmt]) {
        self.depth += 1;
        self.block(block);
        self.depth -= 1;
    }

    fn block(&mut self, block: &[Stmt]) {
        for stmt in block {
            self.stmt(stmt);
        }
    }

    fn function(&mut self, head: &str, func: &FunctionBody) {
        self.line(&format!("{}({})", head, params(func)));
        self.nested(&func.body);
        self.line("end");
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Local { names, values } => {
                let mut text = format!("local {}", names.join(", "));
                if !values.is_empty() {
                    text.push_str(" = ");
                    text.push_str(&expr_list(values));
                }
                self.line(&text);
            }
            StmtKind::Assign { targets, values } => {
                let text = format!("{} = {}", expr_list(targets), expr_list(values));
                self.line(&guard_paren_start(text));
            }
            StmtKind::CompoundAssign { op, target, value } => {
                let text = format!("{} {}= {}", print_expr(target), op.symbol(), print_expr(value));
                self.line(&guard_paren_start(text));
            }
            StmtKind::Call(call) => self.line(&guard_paren_start(print_expr(call))),
            StmtKind::Do(body) => {
                self.line("do");
                self.nested(body);
                self.line("end");
            }
            StmtKind::While { cond, body } => {
                self.line(&format!("while {} do", print_expr(cond)));
                self.nested(body);
                self.line("end");
            }
            StmtKind::Repeat { body, cond } => {
                self.line("repeat");
                self.nested(body);
                self.line(&format!("until {}", print_expr(cond)));
            }
            StmtKind::If { clauses, else_body } => {
                for (i, (cond, body)) in clauses.iter().enumerate() {
                    let keyword = if i == 0 { "if" } else { "elseif" };
                    self.line(&format!("{} {} then", keyword, print_expr(cond)));
                    self.nested(body);
                }
                if let Some(body) = else_body {
                    self.line("else");
                    self.nested(body);
                }
                self.line("end");
            }
            StmtKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => {
                let mut head = format!("for {} = {}, {}", var, print_expr(start), print_expr(limit));
                if let Some(step) = step {
                    head.push_str(", ");
                    head.push_str(&print_expr(step));
                }
                head.push_str(" do");
                self.line(&head);
                self.nested(body);
                self.line("end");
            }
            StmtKind::GenericFor { vars, exprs, body } => {
                self.line(&format!("for {} in {} do", vars.join(", "), expr_list(exprs)));
                self.nested(body);
                self.line("end");
            }
            StmtKind::Function { name, func } => {
                self.function(&format!("function {}", name.display()), func)
            }
            StmtKind::LocalFunction { name, func } => {
                self.function(&format!("local function {}", name), func)
            }
            StmtKind::Return(values) if values.is_empty() => self.line("return"),
            StmtKind::Return(values) => self.line(&format!("return {}", expr_list(values))),
            StmtKind::Break => self.line("break"),
            StmtKind::Continue => self.line("continue"),
            StmtKind::Goto(label) => self.line(&format!("goto {}", label)),
            StmtKind::Label(label) => self.line(&format!("::{}::", label)),
        }
    }
}

/// A statement starting with `(` would read as a call continuing the previous
/// line, so it gets a leading `;`.
fn guard_paren_start(text: String) -> String {
    if text.starts_with('(') {
        format!(";{}", text)
    } else {
        text
    }
}

fn params(func: &FunctionBody) -> String {
    let mut list = func.params.clone();
    if func.is_vararg {
        list.push("...".to_string());
    }
    list.join(", ")
}

fn expr_list(exprs: &[Expr]) -> String {
    exprs.iter().map(print_expr).collect::<Vec<_>>().join(", ")
}

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Binary { op, .. } => op.precedence(),
        Expr::Unary { .. } => UnaryOp::PRECEDENCE,
        _ => ATOM,
    }
}

fn is_prefix_expr(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Ident(_)
            | Expr::Index { .. }
            | Expr::Member { .. }
            | Expr::Call { .. }
            | Expr::MethodCall { .. }
            | Expr::Paren(_)
    )
}

/// Write `expr` so that it can be followed by a suffix (`.x`, `[k]`, `(...)`).
fn write_prefix(out: &mut String, expr: &Expr) {
    if is_prefix_expr(expr) {
        write_expr(out, expr);
    } else {
        out.push('(');
        write_expr(out, expr);
        out.push(')');
    }
}

fn write_operand(out: &mut String, expr: &Expr, parens: bool) {
    if parens {
        out.push('(');
        write_expr(out, expr);
        out.push(')');
    } else {
        write_expr(out, expr);
    }
}

fn write_args(out: &mut String, args: &[Expr]) {
    out.push('(');
    out.push_str(&expr_list(args));
    out.push(')');
}

fn write_expr(out: &mut String, expr: &Expr) {
    match expr {
        Expr::Nil => out.push_str("nil"),
        Expr::True => out.push_str("true"),
        Expr::False => out.push_str("false"),
        Expr::Number(n) => out.push_str(&format_number(*n)),
        Expr::Str(bytes) => write_string(out, bytes),
        Expr::Vararg => out.push_str("..."),
        Expr::Function(func) => {
            // Literal bodies are indented one level, whatever the nesting.
            out.push_str("function(");
            out.push_str(&params(func));
            out.push_str(")\n");
            let mut printer = Printer {
                out: String::new(),
                depth: 1,
            };
            printer.block(&func.body);
            out.push_str(&printer.out);
            out.push_str("end");
        }
        Expr::Ident(name) => out.push_str(name),
        Expr::Index { object, key } => {
            write_prefix(out, object);
            out.push('[');
            write_expr(out, key);
            out.push(']');
        }
        Expr::Member { object, name } => {
            write_prefix(out, object);
            out.push('.');
            out.push_str(name);
        }
        Expr::Call { callee, args } => {
            write_prefix(out, callee);
            write_args(out, args);
        }
        Expr::MethodCall {
            receiver,
            method,
            args,
        } => {
            write_prefix(out, receiver);
            out.push(':');
            out.push_str(method);
            write_args(out, args);
        }
        Expr::Binary { op, left, right } => {
            let prec = op.precedence();
            let left_prec = precedence(left);
            let right_prec = precedence(right);
            let left_parens = left_prec < prec || (left_prec == prec && op.is_right_assoc());
            let right_parens = right_prec < prec || (right_prec == prec && !op.is_right_assoc());
            write_operand(out, left, left_parens);
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            write_operand(out, right, right_parens);
        }
        Expr::Unary { op, expr } => {
            out.push_str(op.symbol());
            let parens = precedence(expr) < UnaryOp::PRECEDENCE;
            let mut operand = String::new();
            write_operand(&mut operand, expr, parens);
            // `- -x` must not turn into a comment.
            if *op == UnaryOp::Neg && operand.starts_with('-') {
                out.push(' ');
            }
            out.push_str(&operand);
        }
        Expr::Table(fields) => {
            out.push('{');
            for (i, field) in fields.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                match field {
                    TableField::Positional(value) => write_expr(out, value),
                    TableField::Named(name, value) => {
                        out.push_str(name);
                        out.push_str(" = ");
                        write_expr(out, value);
                    }
                    TableField::Keyed(key, value) => {
                        out.push('[');
                        write_expr(out, key);
                        out.push_str("] = ");
                        write_expr(out, value);
                    }
                }
            }
            out.push('}');
        }
        Expr::Paren(inner) => {
            out.push('(');
            write_expr(out, inner);
            out.push(')');
        }
    }
}

/// Numbers print as integers when exact, otherwise in shortest round-trip
/// form. Negative values and NaN are parenthesized so they stay atoms.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "(0/0)".to_string();
    }
    let magnitude = n.abs();
    let text = if magnitude.is_infinite() {
        "1e999".to_string()
    } else if magnitude.fract() == 0.0 && magnitude < 1e15 {
        format!("{}", magnitude as i64)
    } else if (1e-4..1e15).contains(&magnitude) {
        format!("{}", magnitude)
    } else {
        format!("{:e}", magnitude)
    };
    if n.is_sign_negative() {
        format!("(-{})", text)
    } else {
        text
    }
}

fn write_string(out: &mut String, bytes: &[u8]) {
    out.push('"');
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\{:03}", b)),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod printer_test;
