//! Closure lifting.
//!
//! The VM has no upvalues, so a function literal inside a candidate cannot be
//! compiled. Callbacks handed to the scheduler (`task.spawn`, `task.defer`,
//! `task.delay` and the bare `spawn`/`delay` globals) are the common case of
//! such literals; this pass hoists them to named top-level functions that
//! receive their captures as trailing parameters.

use std::collections::BTreeSet;

use tracing::debug;

use crate::{
    analysis::{ScopeTracker, free_names},
    ast::{Block, Expr, FunctionBody, Stmt, StmtKind, TableField},
    codegen::names::NameGen,
    rng::VeilRng,
};

/// Hoisted functions, in the order they must be declared.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Lifted {
    pub functions: Vec<Stmt>,
}

impl Lifted {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().filter_map(|stmt| match &stmt.kind {
            StmtKind::LocalFunction { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Rewrite every liftable scheduler callback in `body`.
///
/// `visible` holds the locals in scope at the start of `body`, parameters
/// of the enclosing function included.
pub fn lift_callbacks(
    body: &mut Block,
    visible: &BTreeSet<String>,
    names: &mut NameGen,
    rng: &mut VeilRng,
) -> Lifted {
    let mut scopes = ScopeTracker::new();
    for name in visible {
        scopes.declare(name);
    }
    let mut lifter = Lifter {
        scopes,
        names,
        rng,
        out: Lifted::default(),
    };
    lifter.stmts(body);
    lifter.out
}

/// Index of the callback argument when `callee` is a scheduler entry point.
fn callback_position(callee: &Expr, scopes: &ScopeTracker) -> Option<usize> {
    let global = |name: &str| !scopes.is_local(name);
    match callee {
        Expr::Member { object, name } => match (object.as_ref(), name.as_str()) {
            (Expr::Ident(task), "spawn" | "defer") if task == "task" && global(task) => Some(0),
            (Expr::Ident(task), "delay") if task == "task" && global(task) => Some(1),
            _ => None,
        },
        Expr::Ident(name) if name == "spawn" && global(name) => Some(0),
        Expr::Ident(name) if name == "delay" && global(name) => Some(1),
        _ => None,
    }
}

struct Lifter<'a> {
    scopes: ScopeTracker,
    names: &'a mut NameGen,
    rng: &'a mut VeilRng,
    out: Lifted,
}

impl Lifter<'_> {
    fn block(&mut self, body: &mut Block) {
        self.scopes.push();
        self.stmts(body);
        self.scopes.pop();
    }

    fn stmts(&mut self, body: &mut Block) {
        for stmt in body.iter_mut() {
            self.stmt(stmt);
        }
    }

    fn function(&mut self, func: &mut FunctionBody) {
        self.scopes.push();
        for param in &func.params {
            self.scopes.declare(param);
        }
        self.stmts(&mut func.body);
        self.scopes.pop();
    }

    fn stmt(&mut self, stmt: &mut Stmt) {
        match &mut stmt.kind {
            StmtKind::Local { names, values } => {
                values.iter_mut().for_each(|e| self.expr(e));
                names.iter().for_each(|n| self.scopes.declare(n));
            }
            StmtKind::LocalFunction { name, func } => {
                self.scopes.declare(name);
                self.function(func);
            }
            StmtKind::Function { func, .. } => self.function(func),
            StmtKind::Assign { targets, values } => {
                values.iter_mut().for_each(|e| self.expr(e));
                targets.iter_mut().for_each(|e| self.expr(e));
            }
            StmtKind::CompoundAssign { target, value, .. } => {
                self.expr(value);
                self.expr(target);
            }
            StmtKind::Call(call) => self.expr(call),
            StmtKind::Return(values) => values.iter_mut().for_each(|e| self.expr(e)),
            StmtKind::Do(body) => self.block(body),
            StmtKind::While { cond, body } => {
                self.expr(cond);
                self.block(body);
            }
            StmtKind::Repeat { body, cond } => {
                self.scopes.push();
                self.stmts(body);
                self.expr(cond);
                self.scopes.pop();
            }
            StmtKind::If { clauses, else_body } => {
                for (cond, body) in clauses.iter_mut() {
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
                exprs.iter_mut().for_each(|e| self.expr(e));
                self.scopes.push();
                vars.iter().for_each(|v| self.scopes.declare(v));
                self.block(body);
                self.scopes.pop();
            }
            StmtKind::Break | StmtKind::Continue | StmtKind::Goto(_) | StmtKind::Label(_) => {}
        }
    }

    fn expr(&mut self, expr: &mut Expr) {
        match expr {
            Expr::Call { callee, args } => {
                self.expr(callee);
                args.iter_mut().for_each(|e| self.expr(e));
                if let Some(position) = callback_position(callee, &self.scopes) {
                    self.lift_argument(args, position);
                }
            }
            Expr::Function(func) => self.function(func),
            Expr::Index { object, key } => {
                self.expr(object);
                self.expr(key);
            }
            Expr::Member { object, .. } => self.expr(object),
            Expr::MethodCall { receiver, args, .. } => {
                self.expr(receiver);
                args.iter_mut().for_each(|e| self.expr(e));
            }
            Expr::Binary { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Unary { expr, .. } | Expr::Paren(expr) => self.expr(expr),
            Expr::Table(fields) => {
                for field in fields.iter_mut() {
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
            | Expr::Vararg
            | Expr::Ident(_) => {}
        }
    }

    /// Replace `args[position]` by a hoisted function and append its captures.
    ///
    /// Inner callbacks were already lifted by the time this runs, so the
    /// literal's free names account for their capture arguments.
    fn lift_argument(&mut self, args: &mut Vec<Expr>, position: usize) {
        let Some(Expr::Function(func)) = args.get(position) else {
            return;
        };
        if func.is_vararg {
            debug!("callback not lifted: uses `...`");
            return;
        }
        let free = free_names(func);
        let captures: Vec<String> = free
            .names
            .into_iter()
            .filter(|name| self.scopes.is_local(name))
            .collect();
        if let Some(name) = captures.iter().find(|name| free.assigned.contains(*name)) {
            debug!(capture = %name, "callback not lifted: assigns to a captured local");
            return;
        }

        let arity = func.params.len();
        let extra = args.len() - position - 1;
        if extra > arity {
            debug!(arity, extra, "callback not lifted: more arguments than parameters");
            return;
        }
        if !captures.is_empty() && args.last().is_some_and(Expr::is_multi) && extra > 0 {
            debug!("callback not lifted: open argument list before captures");
            return;
        }

        let name = self.names.fresh(self.rng);
        let Expr::Function(func) = std::mem::replace(&mut args[position], Expr::Ident(name.clone()))
        else {
            return;
        };
        let mut func = *func;
        args.extend(std::iter::repeat_n(Expr::Nil, arity - extra));
        args.extend(captures.iter().map(|c| Expr::Ident(c.clone())));
        func.params.extend(captures);

        let span = func.span.clone();
        debug!(name = %name, params = func.params.len(), "lifted callback");
        self.out
            .functions
            .push(Stmt::new(StmtKind::LocalFunction { name, func }, span));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser::parse, printer::print_block};
    use pretty_assertions::assert_eq;

    fn lift(source: &str, visible: &[&str]) -> (String, Vec<String>) {
        let mut body = parse(source).unwrap().body;
        let visible: BTreeSet<String> = visible.iter().map(|s| s.to_string()).collect();
        let mut names = NameGen::new(&BTreeSet::new());
        let mut rng = VeilRng::from_seed_str("lift");
        let lifted = lift_callbacks(&mut body, &visible, &mut names, &mut rng);
        let hoisted = lifted.functions.iter().map(|s| print_block(std::slice::from_ref(s))).collect();
        (print_block(&body), hoisted)
    }

    fn first_name(hoisted: &str) -> &str {
        hoisted
            .strip_prefix("local function ")
            .and_then(|rest| rest.split('(').next())
            .unwrap()
    }

    #[test]
    fn test_lift_spawn_with_captures() {
        let (body, hoisted) = lift(
            "local n = 1\ntask.spawn(function(x) print(x, n, k) end, 5)",
            &["k"],
        );
        assert_eq!(hoisted.len(), 1);
        let name = first_name(&hoisted[0]);
        assert!(hoisted[0].starts_with(&format!("local function {}(x, n, k)", name)));
        assert!(body.contains(&format!("task.spawn({}, 5, n, k)", name)));
    }

    #[test]
    fn test_lift_pads_missing_arguments() {
        let (body, hoisted) = lift("local v = 2\ntask.defer(function(a, b) return v end)", &[]);
        let name = first_name(&hoisted[0]);
        assert!(body.contains(&format!("task.defer({}, nil, nil, v)", name)));
    }

    #[test]
    fn test_lift_delay_uses_second_argument() {
        let (body, hoisted) = lift("delay(1, function() print(1) end)", &[]);
        let name = first_name(&hoisted[0]);
        assert!(body.contains(&format!("delay(1, {})", name)));
        assert!(hoisted[0].starts_with(&format!("local function {}()", name)));
    }

    #[test]
    fn test_globals_are_not_captured() {
        let (_, hoisted) = lift("task.spawn(function() counter = 1 print(counter) end)", &[]);
        let name = first_name(&hoisted[0]);
        assert!(hoisted[0].starts_with(&format!("local function {}()", name)));
    }

    #[test]
    fn test_skip_when_capture_is_assigned() {
        let (body, hoisted) = lift("local n = 0\ntask.spawn(function() n = n + 1 end)", &[]);
        assert!(hoisted.is_empty());
        assert!(body.contains("function()"));
    }

    #[test]
    fn test_skip_when_too_many_arguments() {
        let (_, hoisted) = lift("task.spawn(function(a) end, 1, 2)", &[]);
        assert!(hoisted.is_empty());
    }

    #[test]
    fn test_skip_vararg_literal_and_shadowed_task() {
        let (_, hoisted) = lift("task.spawn(function(...) end)", &[]);
        assert!(hoisted.is_empty());
        let (_, hoisted) = lift("task.spawn(function() end)", &["task"]);
        assert!(hoisted.is_empty());
    }

    #[test]
    fn test_nested_callbacks_lift_inner_first() {
        let (body, hoisted) = lift(
            "local a = 1\ntask.spawn(function() local b = 2 task.defer(function() print(a, b) end) end)",
            &[],
        );
        assert_eq!(hoisted.len(), 2);
        let inner = first_name(&hoisted[0]);
        let outer = first_name(&hoisted[1]);
        assert!(hoisted[0].starts_with(&format!("local function {}(a, b)", inner)));
        assert!(hoisted[1].contains(&format!("task.defer({}, a, b)", inner)));
        assert!(hoisted[1].starts_with(&format!("local function {}(a)", outer)));
        assert!(body.contains(&format!("task.spawn({}, a)", outer)));
    }
}
