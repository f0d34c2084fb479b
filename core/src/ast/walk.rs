//! Read-only visitor and mutable statement walk over the syntax tree.
//!
//! `Visitor` methods default to recursing into children, so an implementor
//! overrides only the node kinds it cares about and calls the matching
//! `walk_*` function to continue the descent.

use super::{Block, Expr, FunctionBody, Stmt, StmtKind, TableField};

pub trait Visitor {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_function(&mut self, func: &FunctionBody) {
        walk_block(self, &func.body);
    }
}

pub fn walk_block<V: Visitor + ?Sized>(v: &mut V, block: &[Stmt]) {
    for stmt in block {
        v.visit_stmt(stmt);
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(v: &mut V, stmt: &Stmt) {
    match &stmt.kind {
        StmtKind::Local { values, .. } => values.iter().for_each(|e| v.visit_expr(e)),
        StmtKind::Assign { targets, values } => {
            targets.iter().for_each(|e| v.visit_expr(e));
            values.iter().for_each(|e| v.visit_expr(e));
        }
        StmtKind::CompoundAssign { target, value, .. } => {
            v.visit_expr(target);
            v.visit_expr(value);
        }
        StmtKind::Call(call) => v.visit_expr(call),
        StmtKind::Do(body) => walk_block(v, body),
        StmtKind::While { cond, body } => {
            v.visit_expr(cond);
            walk_block(v, body);
        }
        StmtKind::Repeat { body, cond } => {
            walk_block(v, body);
            v.visit_expr(cond);
        }
        StmtKind::If { clauses, else_body } => {
            for (cond, body) in clauses {
                v.visit_expr(cond);
                walk_block(v, body);
            }
            if let Some(body) = else_body {
                walk_block(v, body);
            }
        }
        StmtKind::NumericFor {
            start,
            limit,
            step,
            body,
            ..
        } => {
            v.visit_expr(start);
            v.visit_expr(limit);
            if let Some(step) = step {
                v.visit_expr(step);
            }
            walk_block(v, body);
        }
        StmtKind::GenericFor { exprs, body, .. } => {
            exprs.iter().for_each(|e| v.visit_expr(e));
            walk_block(v, body);
        }
        StmtKind::Function { func, .. } | StmtKind::LocalFunction { func, .. } => {
            v.visit_function(func)
        }
        StmtKind::Return(values) => values.iter().for_each(|e| v.visit_expr(e)),
        StmtKind::Break
        | StmtKind::Continue
        | StmtKind::Goto(_)
        | StmtKind::Label(_) => {}
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    match expr {
        Expr::Nil
        | Expr::True
        | Expr::False
        | Expr::Number(_)
        | Expr::Str(_)
        | Expr::Vararg
        | Expr::Ident(_) => {}
        Expr::Function(func) => v.visit_function(func),
        Expr::Index { object, key } => {
            v.visit_expr(object);
            v.visit_expr(key);
        }
        Expr::Member { object, .. } => v.visit_expr(object),
        Expr::Call { callee, args } => {
            v.visit_expr(callee);
            args.iter().for_each(|e| v.visit_expr(e));
        }
        Expr::MethodCall { receiver, args, .. } => {
            v.visit_expr(receiver);
            args.iter().for_each(|e| v.visit_expr(e));
        }
        Expr::Binary { left, right, .. } => {
            v.visit_expr(left);
            v.visit_expr(right);
        }
        Expr::Unary { expr, .. } | Expr::Paren(expr) => v.visit_expr(expr),
        Expr::Table(fields) => {
            for field in fields {
                match field {
                    TableField::Positional(value) | TableField::Named(_, value) => {
                        v.visit_expr(value)
                    }
                    TableField::Keyed(key, value) => {
                        v.visit_expr(key);
                        v.visit_expr(value);
                    }
                }
            }
        }
    }
}

/// Apply `f` to every statement in `block`, including statements nested in
/// sub-blocks and in function literals.
pub fn for_each_stmt_mut(block: &mut Block, f: &mut dyn FnMut(&mut Stmt)) {
    for stmt in block.iter_mut() {
        f(stmt);
        match &mut stmt.kind {
            StmtKind::Local { values, .. } | StmtKind::Return(values) => {
                values.iter_mut().for_each(|e| exprs_stmts_mut(e, f))
            }
            StmtKind::Assign { targets, values } => {
                targets.iter_mut().for_each(|e| exprs_stmts_mut(e, f));
                values.iter_mut().for_each(|e| exprs_stmts_mut(e, f));
            }
            StmtKind::CompoundAssign { target, value, .. } => {
                exprs_stmts_mut(target, f);
                exprs_stmts_mut(value, f);
            }
            StmtKind::Call(call) => exprs_stmts_mut(call, f),
            StmtKind::Do(body) => for_each_stmt_mut(body, f),
            StmtKind::While { cond, body } | StmtKind::Repeat { body, cond } => {
                exprs_stmts_mut(cond, f);
                for_each_stmt_mut(body, f);
            }
            StmtKind::If { clauses, else_body } => {
                for (cond, body) in clauses.iter_mut() {
                    exprs_stmts_mut(cond, f);
                    for_each_stmt_mut(body, f);
                }
                if let Some(body) = else_body {
                    for_each_stmt_mut(body, f);
                }
            }
            StmtKind::NumericFor {
                start,
                limit,
                step,
                body,
                ..
            } => {
                exprs_stmts_mut(start, f);
                exprs_stmts_mut(limit, f);
                if let Some(step) = step {
                    exprs_stmts_mut(step, f);
                }
                for_each_stmt_mut(body, f);
            }
            StmtKind::GenericFor { exprs, body, .. } => {
                exprs.iter_mut().for_each(|e| exprs_stmts_mut(e, f));
                for_each_stmt_mut(body, f);
            }
            StmtKind::Function { func, .. } | StmtKind::LocalFunction { func, .. } => {
                for_each_stmt_mut(&mut func.body, f)
            }
            StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Goto(_)
            | StmtKind::Label(_) => {}
        }
    }
}

fn exprs_stmts_mut(expr: &mut Expr, f: &mut dyn FnMut(&mut Stmt)) {
    match expr {
        Expr::Function(func) => for_each_stmt_mut(&mut func.body, f),
        Expr::Index { object, key } => {
            exprs_stmts_mut(object, f);
            exprs_stmts_mut(key, f);
        }
        Expr::Member { object, .. } => exprs_stmts_mut(object, f),
        Expr::Call { callee, args } => {
            exprs_stmts_mut(callee, f);
            args.iter_mut().for_each(|e| exprs_stmts_mut(e, f));
        }
        Expr::MethodCall { receiver, args, .. } => {
            exprs_stmts_mut(receiver, f);
            args.iter_mut().for_each(|e| exprs_stmts_mut(e, f));
        }
        Expr::Binary { left, right, .. } => {
            exprs_stmts_mut(left, f);
            exprs_stmts_mut(right, f);
        }
        Expr::Unary { expr, .. } | Expr::Paren(expr) => exprs_stmts_mut(expr, f),
        Expr::Table(fields) => {
            for field in fields.iter_mut() {
                match field {
                    TableField::Positional(value) | TableField::Named(_, value) => {
                        exprs_stmts_mut(value, f)
                    }
                    TableField::Keyed(key, value) => {
                        exprs_stmts_mut(key, f);
                        exprs_stmts_mut(value, f);
                    }
                }
            }
        }
        _ => {}
    }
}

/// Every identifier-like string in the tree: variable names, parameters,
/// labels and member names. Used to keep generated helper names collision free.
pub fn collect_names(block: &[Stmt]) -> hashbrown::HashSet<String> {
    struct Names(hashbrown::HashSet<String>);

    impl Visitor for Names {
        fn visit_stmt(&mut self, stmt: &Stmt) {
            match &stmt.kind {
                StmtKind::Local { names, .. } => self.0.extend(names.iter().cloned()),
                StmtKind::NumericFor { var, .. } => {
                    self.0.insert(var.clone());
                }
                StmtKind::GenericFor { vars, .. } => self.0.extend(vars.iter().cloned()),
                StmtKind::Function { name, .. } => {
                    self.0.extend(name.path.iter().cloned());
                    self.0.extend(name.method.iter().cloned());
                }
                StmtKind::LocalFunction { name, .. } => {
                    self.0.insert(name.clone());
                }
                StmtKind::Goto(label) | StmtKind::Label(label) => {
                    self.0.insert(label.clone());
                }
                _ => {}
            }
            walk_stmt(self, stmt);
        }

        fn visit_expr(&mut self, expr: &Expr) {
            match expr {
                Expr::Ident(name)
                | Expr::Member { name, .. }
                | Expr::MethodCall { method: name, .. } => {
                    self.0.insert(name.clone());
                }
                Expr::Table(fields) => {
                    for field in fields {
                        if let TableField::Named(name, _) = field {
                            self.0.insert(name.clone());
                        }
                    }
                }
                _ => {}
            }
            walk_expr(self, expr);
        }

        fn visit_function(&mut self, func: &FunctionBody) {
            self.0.extend(func.params.iter().cloned());
            walk_block(self, &func.body);
        }
    }

    let mut names = Names(hashbrown::HashSet::new());
    walk_block(&mut names, block);
    names.0
}
