//! Use-def helpers: which names are local at a point, and which names a
//! function literal reads or writes without binding them itself.

use std::collections::BTreeSet;

use crate::ast::{Expr, FunctionBody, Stmt, StmtKind, TableField};

/// Stack of lexical frames holding declared local names.
#[derive(Debug, Default, Clone)]
pub struct ScopeTracker {
    frames: Vec<Vec<String>>,
}

impl ScopeTracker {
    pub fn new() -> Self {
        Self {
            frames: vec![Vec::new()],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(Vec::new());
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    pub fn declare(&mut self, name: &str) {
        if let Some(frame) = self.frames.last_mut() {
            frame.push(name.to_string());
        }
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.frames.iter().any(|f| f.iter().any(|n| n == name))
    }

    /// Every local name currently in scope.
    pub fn visible(&self) -> BTreeSet<String> {
        self.frames.iter().flatten().cloned().collect()
    }
}

/// Names a function literal uses without binding them, in order of first use.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FreeNames {
    pub names: Vec<String>,
    /// The subset of `names` that the literal assigns to.
    pub assigned: BTreeSet<String>,
}

/// Free identifiers of `func`, resolved lexically: a reference is free when
/// no binding of the literal encloses it at that point. Member names
/// (`a.b`, `a:b()`) and named table fields are not references.
pub fn free_names(func: &FunctionBody) -> FreeNames {
    let mut walker = FreeWalker {
        scopes: ScopeTracker::new(),
        out: FreeNames::default(),
    };
    walker.function(func);
    walker.out
}

struct FreeWalker {
    scopes: ScopeTracker,
    out: FreeNames,
}

impl FreeWalker {
    fn reference(&mut self, name: &str) {
        if !self.scopes.is_local(name) && !self.out.names.iter().any(|n| n == name) {
            self.out.names.push(name.to_string());
        }
    }

    fn write(&mut self, name: &str) {
        if !self.scopes.is_local(name) {
            self.reference(name);
            self.out.assigned.insert(name.to_string());
        }
    }

    fn function(&mut self, func: &FunctionBody) {
        self.scopes.push();
        for param in &func.params {
            self.scopes.declare(param);
        }
        self.stmts(&func.body);
        self.scopes.pop();
    }

    fn block(&mut self, body: &[Stmt]) {
        self.scopes.push();
        self.stmts(body);
        self.scopes.pop();
    }

    fn stmts(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Local { names, values } => {
                values.iter().for_each(|e| self.expr(e));
                names.iter().for_each(|n| self.scopes.declare(n));
            }
            StmtKind::LocalFunction { name, func } => {
                self.scopes.declare(name);
                self.function(func);
            }
            StmtKind::Function { name, func } => {
                if let Some(root) = name.path.first() {
                    if name.path.len() == 1 && name.method.is_none() {
                        self.write(root);
                    } else {
                        self.reference(root);
                    }
                }
                self.function(func);
            }
            StmtKind::Assign { targets, values } => {
                values.iter().for_each(|e| self.expr(e));
                for target in targets {
                    match target {
                        Expr::Ident(name) => self.write(name),
                        other => self.expr(other),
                    }
                }
            }
            StmtKind::CompoundAssign { target, value, .. } => {
                self.expr(value);
                match target {
                    Expr::Ident(name) => self.write(name),
                    other => self.expr(other),
                }
            }
            StmtKind::Call(call) => self.expr(call),
            StmtKind::Do(body) => self.block(body),
            StmtKind::While { cond, body } => {
                self.expr(cond);
                self.block(body);
            }
            StmtKind::Repeat { body, cond } => {
                // The condition sees the body's locals.
                self.scopes.push();
                self.stmts(body);
                self.expr(cond);
                self.scopes.pop();
            }
            StmtKind::If { clauses, else_body } => {
                for (cond, body) in clauses {
                    self.expr(cond);
                    self.block(body);
                }
                if let Some(body) = else_body {
                    self.block(body);
                }
            }
            StmtKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => {
                self.expr(start);
                self.expr(limit);
                if let Some(step) = step {
                    self.expr(step);
                }
                self.scopes.push();
                self.scopes.declare(var);
                self.block(body);
                self.scopes.pop();
            }
            StmtKind::GenericFor { vars, exprs, body } => {
                exprs.iter().for_each(|e| self.expr(e));
                self.scopes.push();
                vars.iter().for_each(|v| self.scopes.declare(v));
                self.block(body);
                self.scopes.pop();
            }
            StmtKind::Return(values) => values.iter().for_each(|e| self.expr(e)),
            StmtKind::Break | StmtKind::Continue | StmtKind::Goto(_) | StmtKind::Label(_) => {}
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Ident(name) => self.reference(name),
            Expr::Function(func) => self.function(func),
            Expr::Index { object, key } => {
                self.expr(object);
                self.expr(key);
            }
            Expr::Member { object, .. } => self.expr(object),
            Expr::Call { callee, args } => {
                self.expr(callee);
                args.iter().for_each(|e| self.expr(e));
            }
            Expr::MethodCall { receiver, args, .. } => {
                self.expr(receiver);
                args.iter().for_each(|e| self.expr(e));
            }
            Expr::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Unary { expr, .. } | Expr::Paren(expr) => self.expr(expr),
            Expr::Table(fields) => {
                for field in fields {
                    match field {
                        TableField::Positional(value) | TableField::Named(_, value) => {
                            self.expr(value)
                        }
                        TableField::Keyed(key, value) => {
                            self.expr(key);
                            self.expr(value);
                        }
                    }
                }
            }
            Expr::Nil
            | Expr::True
            | Expr::False
            | Expr::Number(_)
            | Expr::Str(_)
            | Expr::Vararg => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn literal(source: &str) -> FunctionBody {
        let chunk = parse(&format!("local f = {}", source)).unwrap();
        match chunk.body.into_iter().next().unwrap().kind {
            StmtKind::Local { mut values, .. } => match values.remove(0) {
                Expr::Function(func) => *func,
                other => panic!("not a function literal: {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_free_names_skip_bindings_and_members() {
        let func = literal(
            "function(a) local b = a + c for i = 1, n do b = b + i end return t.field, {k = b}, obj:m(d) end",
        );
        let free = free_names(&func);
        assert_eq!(free.names, vec!["c", "n", "t", "obj", "d"]);
        assert!(free.assigned.is_empty());
    }

    #[test]
    fn test_reference_before_local_is_free() {
        let func = literal("function() print(x) local x = 1 return x end");
        assert_eq!(free_names(&func).names, vec!["print", "x"]);
    }

    #[test]
    fn test_assigned_free_names() {
        let func = literal("function() count = count + 1 total += 2 local own = 0 own = 1 end");
        let free = free_names(&func);
        assert_eq!(free.names, vec!["count", "total"]);
        assert_eq!(
            free.assigned.into_iter().collect::<Vec<_>>(),
            vec!["count".to_string(), "total".to_string()]
        );
    }

    #[test]
    fn test_repeat_condition_sees_body_locals() {
        let func = literal("function() repeat local done = true until done end");
        assert!(free_names(&func).names.is_empty());
    }

    #[test]
    fn test_scope_tracker() {
        let mut scopes = ScopeTracker::new();
        scopes.declare("x");
        scopes.push();
        scopes.declare("y");
        assert!(scopes.is_local("x") && scopes.is_local("y"));
        scopes.pop();
        assert!(!scopes.is_local("y"));
        assert_eq!(scopes.visible().into_iter().collect::<Vec<_>>(), vec!["x".to_string()]);
    }
}
