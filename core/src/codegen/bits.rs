//! Statement-level XOR.
//!
//! The host's numbers are doubles, so there is no XOR operator to rely on.
//! Every site uses the native `bxor` when the environment has one and
//! falls back to a 32-step arithmetic loop otherwise. The loop is inlined
//! at each site so the generated code stays free of function literals.

use crate::ast::{
    Expr, Stmt,
    build::{
        add, assign, call, div, ident, if_else, if_then, int, local_many, modulo, mul, ne,
        numeric_for, sub,
    },
};

/// Scratch locals of the fallback loop. Sites may share them: each site
/// declares them in its own block.
#[derive(Debug, Clone)]
pub struct XorNames {
    pub bxor: String,
    pub x: String,
    pub y: String,
    pub result: String,
    pub bit: String,
    pub counter: String,
    pub x_bit: String,
    pub y_bit: String,
}

/// `target = x ~ y` for unsigned 32-bit operands.
pub fn xor_into(names: &XorNames, target: Expr, x: Expr, y: Expr) -> Stmt {
    let native = assign(
        target.clone(),
        call(ident(&names.bxor), vec![x.clone(), y.clone()]),
    );

    let xs = ident(&names.x);
    let ys = ident(&names.y);
    let loop_body = vec![
        local_many(
            &[names.x_bit.as_str(), names.y_bit.as_str()],
            vec![modulo(xs.clone(), int(2)), modulo(ys.clone(), int(2))],
        ),
        if_then(
            ne(ident(&names.x_bit), ident(&names.y_bit)),
            vec![assign(
                ident(&names.result),
                add(ident(&names.result), ident(&names.bit)),
            )],
        ),
        assign(
            xs.clone(),
            div(sub(xs.clone(), ident(&names.x_bit)), int(2)),
        ),
        assign(
            ys.clone(),
            div(sub(ys.clone(), ident(&names.y_bit)), int(2)),
        ),
        assign(ident(&names.bit), mul(ident(&names.bit), int(2))),
    ];
    let fallback = vec![
        local_many(
            &[
                names.x.as_str(),
                names.y.as_str(),
                names.result.as_str(),
                names.bit.as_str(),
            ],
            vec![x, y, int(0), int(1)],
        ),
        numeric_for(&names.counter, int(1), int(32), loop_body),
        assign(target, ident(&names.result)),
    ];

    if_else(ident(&names.bxor), vec![native], fallback)
}
