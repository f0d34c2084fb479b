//! Lowering of a function body or chunk slice to a [`Program`].

use std::collections::BTreeSet;

use hashbrown::HashMap;

use crate::{
    ast::{BinaryOp, Block, Expr, FunctionBody, Span, Stmt, StmtKind, TableField, UnaryOp},
    vm::{CompileError, Constant, Emitter, Opcode, Program, Scope},
};

/// Pool key; numbers compare by bit pattern so `0` and `-0` stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Nil,
    Bool(bool),
    Number(u64),
    Str(Vec<u8>),
}

impl From<&Constant> for ConstKey {
    fn from(c: &Constant) -> Self {
        match c {
            Constant::Nil => ConstKey::Nil,
            Constant::Bool(b) => ConstKey::Bool(*b),
            Constant::Number(n) => ConstKey::Number(n.to_bits()),
            Constant::Str(s) => ConstKey::Str(s.clone()),
        }
    }
}

struct LoopLabels {
    break_label: String,
    continue_label: String,
}

/// `Call`/`CallV` operand `b` for a call keeping `n` results.
fn keep(n: u32) -> u32 {
    n + 1
}

const ALL_RESULTS: u32 = 0;

/// Compiler from a function body to VM bytecode.
///
/// Every expression leaves exactly one value on the operand stack except in
/// multi-value positions, where a call leaves all of its results and sets
/// the machine's `vc` register. Locals live in numbered slots handed out by
/// a [`Scope`]; names that are neither local nor visible in an enclosing
/// scope compile to global accesses keyed by a pooled string.
pub struct VmCompiler<'a> {
    emitter: Emitter,
    scope: Scope,
    constants: Vec<Constant>,
    constant_map: HashMap<ConstKey, u32>,
    /// Locals of the enclosing scopes visible where the body is defined.
    visible_outer: &'a BTreeSet<String>,
    outer_names: Vec<String>,
    loops: Vec<LoopLabels>,
    labels: BTreeSet<String>,
    /// Span of the statement being compiled, attached to expression errors.
    span: Span,
}

impl<'a> VmCompiler<'a> {
    fn new(visible_outer: &'a BTreeSet<String>) -> Self {
        Self {
            emitter: Emitter::new(),
            scope: Scope::new(),
            constants: Vec::new(),
            constant_map: HashMap::new(),
            visible_outer,
            outer_names: Vec::new(),
            loops: Vec::new(),
            labels: BTreeSet::new(),
            span: Span::default(),
        }
    }

    /// Compile a function body. Parameters occupy the first slots.
    pub fn compile_function(
        func: &FunctionBody,
        visible_outer: &'a BTreeSet<String>,
    ) -> Result<Program, CompileError> {
        if func.is_vararg {
            return Err(CompileError::Vararg {
                span: func.span.clone(),
            });
        }
        let mut compiler = Self::new(visible_outer);
        for param in &func.params {
            compiler.scope.declare(param);
        }
        compiler.compile_body(&func.body, false)?;
        compiler.finalize(func.params.clone())
    }

    /// Compile a run of top-level statements. Reaching the end leaves the
    /// interpreter without returning from the enclosing chunk.
    pub fn compile_chunk(
        stmts: &[Stmt],
        visible_outer: &'a BTreeSet<String>,
    ) -> Result<Program, CompileError> {
        let mut compiler = Self::new(visible_outer);
        compiler.compile_body(stmts, true)?;
        compiler.finalize(Vec::new())
    }

    fn compile_body(&mut self, stmts: &[Stmt], halt: bool) -> Result<(), CompileError> {
        self.collect_labels(stmts)?;
        self.compile_block(stmts)?;
        self.emitter.mark("#exit")?;
        self.emitter
            .emit(Opcode::Return, 0, if halt { 1 } else { 0 });
        Ok(())
    }

    fn finalize(self, param_names: Vec<String>) -> Result<Program, CompileError> {
        let local_count = self.scope.slot_count();
        let outer_names = self.outer_names;
        let constants = self.constants;
        let instructions = self.emitter.finish()?;
        Ok(Program {
            instructions,
            constants,
            param_names,
            local_count,
            outer_names,
        })
    }

    // === Labels ===

    fn collect_labels(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            match &stmt.kind {
                StmtKind::Label(name) => {
                    if !self.labels.insert(name.clone()) {
                        return Err(CompileError::DuplicateLabel {
                            label: name.clone(),
                            span: stmt.span.clone(),
                        });
                    }
                }
                StmtKind::Do(body)
                | StmtKind::While { body, .. }
                | StmtKind::Repeat { body, .. }
                | StmtKind::NumericFor { body, .. }
                | StmtKind::GenericFor { body, .. } => self.collect_labels(body)?,
                StmtKind::If { clauses, else_body } => {
                    for (_, body) in clauses {
                        self.collect_labels(body)?;
                    }
                    if let Some(body) = else_body {
                        self.collect_labels(body)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn user_label(name: &str) -> String {
        format!("user:{}", name)
    }

    // === Constants and names ===

    fn constant(&mut self, value: Constant) -> u32 {
        let key = ConstKey::from(&value);
        if let Some(&index) = self.constant_map.get(&key) {
            return index;
        }
        let index = self.constants.len() as u32;
        self.constants.push(value);
        self.constant_map.insert(key, index);
        index
    }

    fn push_number(&mut self, n: f64) {
        let k = self.constant(Constant::Number(n));
        self.emitter.emit(Opcode::PushConst, k, 0);
    }

    fn push_str(&mut self, s: &str) {
        let k = self.constant(Constant::Str(s.as_bytes().to_vec()));
        self.emitter.emit(Opcode::PushConst, k, 0);
    }

    fn outer_index(&mut self, name: &str) -> Option<u32> {
        if !self.visible_outer.contains(name) {
            return None;
        }
        let index = match self.outer_names.iter().position(|n| n == name) {
            Some(i) => i,
            None => {
                self.outer_names.push(name.to_string());
                self.outer_names.len() - 1
            }
        };
        Some(index as u32)
    }

    fn load_name(&mut self, name: &str) {
        if let Some(slot) = self.scope.lookup(name) {
            self.emitter.emit(Opcode::PushLocal, slot, 0);
        } else if let Some(k) = self.outer_index(name) {
            self.emitter.emit(Opcode::PushOuter, k, 0);
        } else {
            let k = self.constant(Constant::Str(name.as_bytes().to_vec()));
            self.emitter.emit(Opcode::PushGlobal, k, 0);
        }
    }

    fn store_name(&mut self, name: &str) {
        if let Some(slot) = self.scope.lookup(name) {
            self.emitter.emit(Opcode::StoreLocal, slot, 0);
        } else if let Some(k) = self.outer_index(name) {
            self.emitter.emit(Opcode::StoreOuter, k, 0);
        } else {
            let k = self.constant(Constant::Str(name.as_bytes().to_vec()));
            self.emitter.emit(Opcode::StoreGlobal, k, 0);
        }
    }

    fn hidden_from_stack(&mut self) -> u32 {
        let slot = self.scope.hidden();
        self.emitter.emit(Opcode::StoreLocal, slot, 0);
        slot
    }

    // === Statements ===

    fn compile_block(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            self.span = stmt.span.clone();
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_scoped(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        self.scope.push();
        let result = self.compile_block(stmts);
        self.scope.pop();
        result
    }

    fn compile_loop_body(
        &mut self,
        body: &Block,
        break_label: &str,
        continue_label: &str,
    ) -> Result<(), CompileError> {
        self.loops.push(LoopLabels {
            break_label: break_label.to_string(),
            continue_label: continue_label.to_string(),
        });
        let result = self.compile_scoped(body);
        self.loops.pop();
        result
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match &stmt.kind {
            StmtKind::Local { names, values } => self.compile_local(names, values),
            StmtKind::Assign { targets, values } => self.compile_assign(targets, values),
            StmtKind::CompoundAssign { op, target, value } => {
                self.compile_compound(*op, target, value)
            }
            StmtKind::Call(call) => self.compile_call(call, keep(0)),
            StmtKind::Do(body) => self.compile_scoped(body),
            StmtKind::While { cond, body } => {
                let top = self.emitter.fresh_label("while");
                let end = self.emitter.fresh_label("endwhile");
                self.emitter.mark(&top)?;
                self.compile_expr(cond)?;
                self.emitter.jump(Opcode::JmpIfFalse, &end);
                self.compile_loop_body(body, &end, &top)?;
                self.emitter.jump(Opcode::Jmp, &top);
                self.emitter.mark(&end)
            }
            StmtKind::Repeat { body, cond } => {
                let top = self.emitter.fresh_label("repeat");
                let check = self.emitter.fresh_label("until");
                let end = self.emitter.fresh_label("endrepeat");
                self.emitter.mark(&top)?;
                self.loops.push(LoopLabels {
                    break_label: end.clone(),
                    continue_label: check.clone(),
                });
                self.scope.push();
                let result = self.compile_repeat_tail(body, cond, &check);
                self.scope.pop();
                self.loops.pop();
                result?;
                self.emitter.jump(Opcode::JmpIfFalse, &top);
                self.emitter.mark(&end)
            }
            StmtKind::If { clauses, else_body } => {
                let end = self.emitter.fresh_label("endif");
                for (cond, body) in clauses {
                    let next = self.emitter.fresh_label("else");
                    self.compile_expr(cond)?;
                    self.emitter.jump(Opcode::JmpIfFalse, &next);
                    self.compile_scoped(body)?;
                    self.emitter.jump(Opcode::Jmp, &end);
                    self.emitter.mark(&next)?;
                }
                if let Some(body) = else_body {
                    self.compile_scoped(body)?;
                }
                self.emitter.mark(&end)
            }
            StmtKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => self.compile_numeric_for(var, start, limit, step.as_ref(), body),
            StmtKind::GenericFor { vars, exprs, body } => {
                self.compile_generic_for(vars, exprs, body)
            }
            StmtKind::Function { .. } | StmtKind::LocalFunction { .. } => {
                Err(CompileError::NestedFunction {
                    span: stmt.span.clone(),
                })
            }
            StmtKind::Return(values) => self.compile_return(values),
            StmtKind::Break => {
                let label = match self.loops.last() {
                    Some(labels) => labels.break_label.clone(),
                    None => {
                        return Err(CompileError::BreakOutsideLoop {
                            span: stmt.span.clone(),
                        });
                    }
                };
                self.emitter.jump(Opcode::Jmp, &label);
                Ok(())
            }
            StmtKind::Continue => {
                let label = match self.loops.last() {
                    Some(labels) => labels.continue_label.clone(),
                    None => {
                        return Err(CompileError::ContinueOutsideLoop {
                            span: stmt.span.clone(),
                        });
                    }
                };
                self.emitter.jump(Opcode::Jmp, &label);
                Ok(())
            }
            StmtKind::Goto(name) => {
                if !self.labels.contains(name) {
                    return Err(CompileError::UnresolvedGoto {
                        label: name.clone(),
                        span: stmt.span.clone(),
                    });
                }
                self.emitter.jump(Opcode::Jmp, &Self::user_label(name));
                Ok(())
            }
            StmtKind::Label(name) => {
                self.emitter
                    .mark(&Self::user_label(name))
                    .map_err(|_| CompileError::DuplicateLabel {
                        label: name.clone(),
                        span: stmt.span.clone(),
                    })
            }
        }
    }

    fn compile_repeat_tail(
        &mut self,
        body: &Block,
        cond: &Expr,
        check: &str,
    ) -> Result<(), CompileError> {
        self.compile_block(body)?;
        self.emitter.mark(check)?;
        self.compile_expr(cond)
    }

    fn compile_local(&mut self, names: &[String], values: &[Expr]) -> Result<(), CompileError> {
        if values.is_empty() {
            for name in names {
                let slot = self.scope.declare(name);
                self.emitter.op(Opcode::PushNil);
                self.emitter.emit(Opcode::StoreLocal, slot, 0);
            }
            return Ok(());
        }

        if let [name] = names {
            self.compile_expr(&values[0])?;
            self.discard_all(&values[1..])?;
            let slot = self.scope.declare(name);
            self.emitter.emit(Opcode::StoreLocal, slot, 0);
            return Ok(());
        }

        self.compile_pack(values)?;
        let packed = self.hidden_from_stack();
        for (i, name) in names.iter().enumerate() {
            let slot = self.scope.declare(name);
            self.unpack_at(packed, i);
            self.emitter.emit(Opcode::StoreLocal, slot, 0);
        }
        Ok(())
    }

    /// Evaluate extra right-hand values for their effects only.
    fn discard_all(&mut self, values: &[Expr]) -> Result<(), CompileError> {
        for value in values {
            if matches!(value, Expr::Call { .. } | Expr::MethodCall { .. }) {
                self.compile_call(value, keep(0))?;
            } else {
                self.compile_expr(value)?;
                self.emitter.op(Opcode::Pop);
            }
        }
        Ok(())
    }

    /// Evaluate `values` into a fresh positional table left on the stack.
    fn compile_pack(&mut self, values: &[Expr]) -> Result<(), CompileError> {
        self.emitter.op(Opcode::NewTable);
        for (i, value) in values.iter().enumerate() {
            let position = i as u32 + 1;
            if i + 1 == values.len() && value.is_multi() {
                self.compile_multi(value)?;
                self.emitter.emit(Opcode::SetListV, position, 0);
            } else {
                self.emitter.op(Opcode::Dup);
                self.push_number(position as f64);
                self.compile_expr(value)?;
                self.emitter.op(Opcode::SetTable);
            }
        }
        Ok(())
    }

    /// Push element `i` (0-based) of the packed table in `slot`.
    fn unpack_at(&mut self, slot: u32, i: usize) {
        self.emitter.emit(Opcode::PushLocal, slot, 0);
        self.push_number(i as f64 + 1.0);
        self.emitter.op(Opcode::GetTable);
    }

    fn compile_assign(&mut self, targets: &[Expr], values: &[Expr]) -> Result<(), CompileError> {
        if let ([target], [value]) = (targets, values) {
            return match target {
                Expr::Ident(name) => {
                    self.compile_expr(value)?;
                    self.store_name(name);
                    Ok(())
                }
                _ => {
                    self.compile_target_prefix(target)?;
                    self.compile_expr(value)?;
                    self.emitter.op(Opcode::SetTable);
                    Ok(())
                }
            };
        }

        self.compile_pack(values)?;
        let packed = self.hidden_from_stack();
        for (i, target) in targets.iter().enumerate() {
            match target {
                Expr::Ident(name) => {
                    self.unpack_at(packed, i);
                    self.store_name(name);
                }
                _ => {
                    self.compile_target_prefix(target)?;
                    self.unpack_at(packed, i);
                    self.emitter.op(Opcode::SetTable);
                }
            }
        }
        Ok(())
    }

    /// Push the table and key of an indexed assignment target.
    fn compile_target_prefix(&mut self, target: &Expr) -> Result<(), CompileError> {
        match target {
            Expr::Index { object, key } => {
                self.compile_expr(object)?;
                self.compile_expr(key)
            }
            Expr::Member { object, name } => {
                self.compile_expr(object)?;
                self.push_str(name);
                Ok(())
            }
            _ => Err(self.unsupported("assignment target")),
        }
    }

    fn compile_compound(
        &mut self,
        op: BinaryOp,
        target: &Expr,
        value: &Expr,
    ) -> Result<(), CompileError> {
        let opcode = arith_opcode(op).ok_or_else(|| self.unsupported("compound operator"))?;
        if let Expr::Ident(name) = target {
            self.load_name(name);
            self.compile_expr(value)?;
            self.emitter.op(opcode);
            self.store_name(name);
            return Ok(());
        }

        self.compile_target_prefix(target)?;
        let key = self.hidden_from_stack();
        let object = self.hidden_from_stack();
        for _ in 0..2 {
            self.emitter.emit(Opcode::PushLocal, object, 0);
            self.emitter.emit(Opcode::PushLocal, key, 0);
        }
        self.emitter.op(Opcode::GetTable);
        self.compile_expr(value)?;
        self.emitter.op(opcode);
        self.emitter.op(Opcode::SetTable);
        Ok(())
    }

    fn compile_numeric_for(
        &mut self,
        var: &str,
        start: &Expr,
        limit: &Expr,
        step: Option<&Expr>,
        body: &Block,
    ) -> Result<(), CompileError> {
        self.compile_expr(start)?;
        let index = self.hidden_from_stack();
        self.compile_expr(limit)?;
        let bound = self.hidden_from_stack();
        match step {
            Some(step) => self.compile_expr(step)?,
            None => self.push_number(1.0),
        }
        let stride = self.hidden_from_stack();

        let check = self.emitter.fresh_label("for");
        let descending = self.emitter.fresh_label("fordown");
        let enter = self.emitter.fresh_label("forbody");
        let next = self.emitter.fresh_label("forstep");
        let end = self.emitter.fresh_label("endfor");

        self.emitter.mark(&check)?;
        self.emitter.emit(Opcode::PushLocal, stride, 0);
        self.push_number(0.0);
        self.emitter.op(Opcode::Gt);
        self.emitter.jump(Opcode::JmpIfFalse, &descending);
        self.emitter.emit(Opcode::PushLocal, index, 0);
        self.emitter.emit(Opcode::PushLocal, bound, 0);
        self.emitter.op(Opcode::Le);
        self.emitter.jump(Opcode::JmpIfFalse, &end);
        self.emitter.jump(Opcode::Jmp, &enter);
        self.emitter.mark(&descending)?;
        self.emitter.emit(Opcode::PushLocal, index, 0);
        self.emitter.emit(Opcode::PushLocal, bound, 0);
        self.emitter.op(Opcode::Ge);
        self.emitter.jump(Opcode::JmpIfFalse, &end);

        self.emitter.mark(&enter)?;
        self.scope.push();
        let slot = self.scope.declare(var);
        self.emitter.emit(Opcode::PushLocal, index, 0);
        self.emitter.emit(Opcode::StoreLocal, slot, 0);
        self.loops.push(LoopLabels {
            break_label: end.clone(),
            continue_label: next.clone(),
        });
        let result = self.compile_block(body);
        self.loops.pop();
        self.scope.pop();
        result?;

        self.emitter.mark(&next)?;
        self.emitter.emit(Opcode::PushLocal, index, 0);
        self.emitter.emit(Opcode::PushLocal, stride, 0);
        self.emitter.op(Opcode::Add);
        self.emitter.emit(Opcode::StoreLocal, index, 0);
        self.emitter.jump(Opcode::Jmp, &check);
        self.emitter.mark(&end)
    }

    fn compile_generic_for(
        &mut self,
        vars: &[String],
        exprs: &[Expr],
        body: &Block,
    ) -> Result<(), CompileError> {
        let mut pushed = 0u32;
        for (i, expr) in exprs.iter().enumerate() {
            let last = i + 1 == exprs.len();
            if pushed >= 3 {
                self.discard_all(std::slice::from_ref(expr))?;
            } else if last && expr.is_multi() {
                self.compile_call(expr, keep(3 - pushed))?;
                pushed = 3;
            } else {
                self.compile_expr(expr)?;
                pushed += 1;
            }
        }
        for _ in pushed..3 {
            self.emitter.op(Opcode::PushNil);
        }
        let control = self.hidden_from_stack();
        let state = self.hidden_from_stack();
        let iterator = self.hidden_from_stack();

        let top = self.emitter.fresh_label("forin");
        let end = self.emitter.fresh_label("endforin");
        self.emitter.mark(&top)?;
        self.emitter.emit(Opcode::PushLocal, iterator, 0);
        self.emitter.emit(Opcode::PushLocal, state, 0);
        self.emitter.emit(Opcode::PushLocal, control, 0);
        self.emitter.emit(Opcode::Call, 2, keep(vars.len() as u32));

        self.scope.push();
        let slots: Vec<u32> = vars.iter().map(|v| self.scope.declare(v)).collect();
        let Some(&first) = slots.first() else {
            self.scope.pop();
            return Err(self.unsupported("generic for without variables"));
        };
        for &slot in slots.iter().rev() {
            self.emitter.emit(Opcode::StoreLocal, slot, 0);
        }
        self.emitter.emit(Opcode::PushLocal, first, 0);
        self.emitter.op(Opcode::PushNil);
        self.emitter.op(Opcode::Eq);
        self.emitter.jump(Opcode::JmpIfTrue, &end);
        self.emitter.emit(Opcode::PushLocal, first, 0);
        self.emitter.emit(Opcode::StoreLocal, control, 0);

        self.loops.push(LoopLabels {
            break_label: end.clone(),
            continue_label: top.clone(),
        });
        let result = self.compile_block(body);
        self.loops.pop();
        self.scope.pop();
        result?;

        self.emitter.jump(Opcode::Jmp, &top);
        self.emitter.mark(&end)
    }

    fn compile_return(&mut self, values: &[Expr]) -> Result<(), CompileError> {
        match values.split_last() {
            None => {
                self.emitter.emit(Opcode::Return, 0, 0);
            }
            Some((last, fixed)) if last.is_multi() => {
                for value in fixed {
                    self.compile_expr(value)?;
                }
                self.compile_multi(last)?;
                self.emitter.emit(Opcode::ReturnV, fixed.len() as u32, 0);
            }
            Some(_) => {
                for value in values {
                    self.compile_expr(value)?;
                }
                self.emitter.emit(Opcode::Return, values.len() as u32, 0);
            }
        }
        Ok(())
    }

    // === Expressions ===

    fn unsupported(&self, what: &str) -> CompileError {
        CompileError::Unsupported {
            what: what.to_string(),
            span: self.span.clone(),
        }
    }

    /// Leave every result of a call on the stack and set `vc`.
    fn compile_multi(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Vararg => Err(CompileError::Vararg {
                span: self.span.clone(),
            }),
            _ => self.compile_call(expr, ALL_RESULTS),
        }
    }

    /// Compile a call expression; `results` is the `b` operand.
    fn compile_call(&mut self, expr: &Expr, results: u32) -> Result<(), CompileError> {
        let (args, implicit) = match expr {
            Expr::Call { callee, args } => {
                self.compile_expr(callee)?;
                (args, 0)
            }
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => {
                self.compile_expr(receiver)?;
                self.emitter.op(Opcode::Dup);
                self.push_str(method);
                self.emitter.op(Opcode::GetTable);
                self.emitter.op(Opcode::Swap);
                (args, 1)
            }
            _ => return Err(self.unsupported("call of a non-call expression")),
        };

        match args.split_last() {
            Some((last, fixed)) if last.is_multi() => {
                for arg in fixed {
                    self.compile_expr(arg)?;
                }
                self.compile_multi(last)?;
                self.emitter
                    .emit(Opcode::CallV, fixed.len() as u32 + implicit, results);
            }
            _ => {
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emitter
                    .emit(Opcode::Call, args.len() as u32 + implicit, results);
            }
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Nil => {
                self.emitter.op(Opcode::PushNil);
            }
            Expr::True => {
                self.emitter.op(Opcode::PushTrue);
            }
            Expr::False => {
                self.emitter.op(Opcode::PushFalse);
            }
            Expr::Number(n) => self.push_number(*n),
            Expr::Str(bytes) => {
                let k = self.constant(Constant::Str(bytes.clone()));
                self.emitter.emit(Opcode::PushConst, k, 0);
            }
            Expr::Vararg => {
                return Err(CompileError::Vararg {
                    span: self.span.clone(),
                });
            }
            Expr::Function(func) => {
                return Err(CompileError::NestedFunction {
                    span: func.span.clone(),
                });
            }
            Expr::Ident(name) => self.load_name(name),
            Expr::Index { object, key } => {
                self.compile_expr(object)?;
                self.compile_expr(key)?;
                self.emitter.op(Opcode::GetTable);
            }
            Expr::Member { object, name } => {
                self.compile_expr(object)?;
                self.push_str(name);
                self.emitter.op(Opcode::GetTable);
            }
            Expr::Call { .. } | Expr::MethodCall { .. } => self.compile_call(expr, keep(1))?,
            Expr::Binary { op, left, right } => match op {
                BinaryOp::And | BinaryOp::Or => {
                    let short = self.emitter.fresh_label("short");
                    let jump = if *op == BinaryOp::And {
                        Opcode::JmpIfFalse
                    } else {
                        Opcode::JmpIfTrue
                    };
                    self.compile_expr(left)?;
                    self.emitter.op(Opcode::Dup);
                    self.emitter.jump(jump, &short);
                    self.emitter.op(Opcode::Pop);
                    self.compile_expr(right)?;
                    self.emitter.mark(&short)?;
                }
                _ => {
                    self.compile_expr(left)?;
                    self.compile_expr(right)?;
                    let opcode =
                        binary_opcode(*op).ok_or_else(|| self.unsupported("binary operator"))?;
                    self.emitter.op(opcode);
                }
            },
            Expr::Unary { op, expr } => {
                self.compile_expr(expr)?;
                self.emitter.op(match op {
                    UnaryOp::Neg => Opcode::Neg,
                    UnaryOp::Not => Opcode::Not,
                    UnaryOp::Len => Opcode::Len,
                });
            }
            Expr::Table(fields) => self.compile_table(fields)?,
            Expr::Paren(inner) => self.compile_expr(inner)?,
        }
        Ok(())
    }

    fn compile_table(&mut self, fields: &[TableField]) -> Result<(), CompileError> {
        self.emitter.op(Opcode::NewTable);
        let mut position = 0u32;
        for (i, field) in fields.iter().enumerate() {
            match field {
                TableField::Positional(value) => {
                    position += 1;
                    if i + 1 == fields.len() && value.is_multi() {
                        self.compile_multi(value)?;
                        self.emitter.emit(Opcode::SetListV, position, 0);
                        continue;
                    }
                    self.emitter.op(Opcode::Dup);
                    self.push_number(position as f64);
                    self.compile_expr(value)?;
                }
                TableField::Named(name, value) => {
                    self.emitter.op(Opcode::Dup);
                    self.push_str(name);
                    self.compile_expr(value)?;
                }
                TableField::Keyed(key, value) => {
                    self.emitter.op(Opcode::Dup);
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
            }
            self.emitter.op(Opcode::SetTable);
        }
        Ok(())
    }
}

fn arith_opcode(op: BinaryOp) -> Option<Opcode> {
    Some(match op {
        BinaryOp::Add => Opcode::Add,
        BinaryOp::Sub => Opcode::Sub,
        BinaryOp::Mul => Opcode::Mul,
        BinaryOp::Div => Opcode::Div,
        BinaryOp::IDiv => Opcode::IDiv,
        BinaryOp::Mod => Opcode::Mod,
        BinaryOp::Pow => Opcode::Pow,
        BinaryOp::Concat => Opcode::Concat,
        _ => return None,
    })
}

fn binary_opcode(op: BinaryOp) -> Option<Opcode> {
    arith_opcode(op).or(match op {
        BinaryOp::Eq => Some(Opcode::Eq),
        BinaryOp::Ne => Some(Opcode::Ne),
        BinaryOp::Lt => Some(Opcode::Lt),
        BinaryOp::Le => Some(Opcode::Le),
        BinaryOp::Gt => Some(Opcode::Gt),
        BinaryOp::Ge => Some(Opcode::Ge),
        _ => None,
    })
}
