//! Operand stack access under the chosen protocol.

use crate::{
    ast::{
        Expr, Stmt,
        build::{add, assign, call, call_stmt, index, int, local, sub},
    },
    codegen::Gen,
    obfuscate::Protocol,
};

impl Gen<'_> {
    /// `t - depth`, or `t` itself.
    pub(super) fn below_top(&self, depth: u32) -> Expr {
        if depth == 0 {
            self.id(&self.h.top)
        } else {
            sub(self.id(&self.h.top), int(depth as i64))
        }
    }

    pub(super) fn slot(&self, at: Expr) -> Expr {
        match self.protocol {
            Protocol::Direct => index(self.id(&self.h.stack), at),
            Protocol::Api => call(self.id(&self.h.rawget), vec![self.id(&self.h.stack), at]),
        }
    }

    pub(super) fn set_slot(&self, at: Expr, value: Expr) -> Stmt {
        match self.protocol {
            Protocol::Direct => assign(index(self.id(&self.h.stack), at), value),
            Protocol::Api => call_stmt(
                self.id(&self.h.rawset),
                vec![self.id(&self.h.stack), at, value],
            ),
        }
    }

    pub(super) fn grow(&self, by: u32) -> Stmt {
        assign(
            self.id(&self.h.top),
            add(self.id(&self.h.top), int(by as i64)),
        )
    }

    pub(super) fn shrink(&self, by: Expr) -> Stmt {
        assign(self.id(&self.h.top), sub(self.id(&self.h.top), by))
    }

    pub(super) fn push(&self, value: Expr) -> Vec<Stmt> {
        vec![self.grow(1), self.set_slot(self.id(&self.h.top), value)]
    }

    /// `local name = S[t]; t = t - 1`
    pub(super) fn pop_into(&self, name: &str) -> Vec<Stmt> {
        vec![
            local(name, self.slot(self.id(&self.h.top))),
            self.shrink(int(1)),
        ]
    }

    /// Replace the top `arity` values with `result` computed from them.
    pub(super) fn fold_top(&self, arity: u32, result: Expr) -> Vec<Stmt> {
        let mut out = vec![self.set_slot(self.below_top(arity - 1), result)];
        if arity > 1 {
            out.push(self.shrink(int(arity as i64 - 1)));
        }
        out
    }
}
