//! Node construction helpers for synthesized code.
//!
//! Everything built here carries a synthetic span. The VM source generator
//! assembles the interpreter entirely through these functions.

use super::{BinaryOp, Block, Expr, Span, Stmt, StmtKind, TableField, UnaryOp};

pub fn num(value: f64) -> Expr {
    Expr::Number(value)
}

pub fn int(value: i64) -> Expr {
    Expr::Number(value as f64)
}

pub fn str(value: &str) -> Expr {
    Expr::Str(value.as_bytes().to_vec())
}

pub fn bytes(value: Vec<u8>) -> Expr {
    Expr::Str(value)
}

pub fn boolean(value: bool) -> Expr {
    if value { Expr::True } else { Expr::False }
}

pub fn ident(name: &str) -> Expr {
    Expr::Ident(name.to_string())
}

pub fn index(object: Expr, key: Expr) -> Expr {
    Expr::Index {
        object: Box::new(object),
        key: Box::new(key),
    }
}

pub fn member(object: Expr, name: &str) -> Expr {
    Expr::Member {
        object: Box::new(object),
        name: name.to_string(),
    }
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::Call {
        callee: Box::new(callee),
        args,
    }
}

pub fn method(receiver: Expr, name: &str, args: Vec<Expr>) -> Expr {
    Expr::MethodCall {
        receiver: Box::new(receiver),
        method: name.to_string(),
        args,
    }
}

pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn unary(op: UnaryOp, expr: Expr) -> Expr {
    Expr::Unary {
        op,
        expr: Box::new(expr),
    }
}

pub fn add(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Add, left, right)
}

pub fn sub(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Sub, left, right)
}

pub fn mul(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Mul, left, right)
}

pub fn div(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Div, left, right)
}

pub fn modulo(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Mod, left, right)
}

pub fn eq(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Eq, left, right)
}

pub fn ne(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Ne, left, right)
}

pub fn lt(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Lt, left, right)
}

pub fn gt(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Gt, left, right)
}

pub fn and(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::And, left, right)
}

pub fn or(left: Expr, right: Expr) -> Expr {
    binary(BinaryOp::Or, left, right)
}

pub fn not(expr: Expr) -> Expr {
    unary(UnaryOp::Not, expr)
}

pub fn len(expr: Expr) -> Expr {
    unary(UnaryOp::Len, expr)
}

pub fn paren(expr: Expr) -> Expr {
    Expr::Paren(Box::new(expr))
}

/// Array-style table constructor `{a, b, c}`.
pub fn list(items: Vec<Expr>) -> Expr {
    Expr::Table(items.into_iter().map(TableField::Positional).collect())
}

pub fn table() -> Expr {
    Expr::Table(Vec::new())
}

/// `{ 12, 7, 255 }` from raw numbers.
pub fn number_list<I: IntoIterator<Item = u32>>(values: I) -> Expr {
    list(values.into_iter().map(|v| int(v as i64)).collect())
}

fn stmt(kind: StmtKind) -> Stmt {
    Stmt::new(kind, Span::synthetic())
}

pub fn local(name: &str, value: Expr) -> Stmt {
    stmt(StmtKind::Local {
        names: vec![name.to_string()],
        values: vec![value],
    })
}

pub fn local_many(names: &[&str], values: Vec<Expr>) -> Stmt {
    stmt(StmtKind::Local {
        names: names.iter().map(|n| n.to_string()).collect(),
        values,
    })
}

pub fn assign(target: Expr, value: Expr) -> Stmt {
    stmt(StmtKind::Assign {
        targets: vec![target],
        values: vec![value],
    })
}

pub fn assign_many(targets: Vec<Expr>, values: Vec<Expr>) -> Stmt {
    stmt(StmtKind::Assign { targets, values })
}

/// `name = name + amount`
pub fn increment(name: &str, amount: i64) -> Stmt {
    if amount >= 0 {
        assign(ident(name), add(ident(name), int(amount)))
    } else {
        assign(ident(name), sub(ident(name), int(-amount)))
    }
}

pub fn call_stmt(callee: Expr, args: Vec<Expr>) -> Stmt {
    stmt(StmtKind::Call(call(callee, args)))
}

pub fn do_block(body: Block) -> Stmt {
    stmt(StmtKind::Do(body))
}

pub fn while_loop(cond: Expr, body: Block) -> Stmt {
    stmt(StmtKind::While { cond, body })
}

pub fn numeric_for(var: &str, start: Expr, limit: Expr, body: Block) -> Stmt {
    stmt(StmtKind::NumericFor {
        var: var.to_string(),
        start,
        limit,
        step: None,
        body,
    })
}

pub fn if_then(cond: Expr, body: Block) -> Stmt {
    stmt(StmtKind::If {
        clauses: vec![(cond, body)],
        else_body: None,
    })
}

pub fn if_else(cond: Expr, then_body: Block, else_body: Block) -> Stmt {
    stmt(StmtKind::If {
        clauses: vec![(cond, then_body)],
        else_body: Some(else_body),
    })
}

/// `if c1 then b1 elseif c2 then b2 ... [else e] end`. An empty clause list
/// degrades to the else body wrapped in `do ... end`.
pub fn if_chain(clauses: Vec<(Expr, Block)>, else_body: Option<Block>) -> Stmt {
    if clauses.is_empty() {
        return do_block(else_body.unwrap_or_default());
    }
    stmt(StmtKind::If { clauses, else_body })
}

pub fn ret(values: Vec<Expr>) -> Stmt {
    stmt(StmtKind::Return(values))
}

pub fn brk() -> Stmt {
    stmt(StmtKind::Break)
}
