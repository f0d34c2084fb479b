//! Statement execution and expression evaluation.

use std::{cell::RefCell, rc::Rc};

use crate::{
    ast::{BinaryOp, Block, Chunk, Expr, FunctionBody, StmtKind, Stmt, TableField, UnaryOp},
    eval::{
        EvalError, EvalLimits, HostProfile, stdlib,
        value::{Closure, Table, TableRef, Value},
    },
};

/// Lexical environment: a persistent list of bindings, innermost first.
/// Closures keep the list they were created under.
pub type Env = Option<Rc<Binding>>;

pub struct Binding {
    name: String,
    value: RefCell<Value>,
    parent: Env,
}

fn lookup<'e>(env: &'e Env, name: &str) -> Option<&'e Binding> {
    let mut current = env.as_deref();
    while let Some(binding) = current {
        if binding.name == name {
            return Some(binding);
        }
        current = binding.parent.as_deref();
    }
    None
}

fn declare(env: &mut Env, name: &str, value: Value) {
    let parent = env.take();
    *env = Some(Rc::new(Binding {
        name: name.to_string(),
        value: RefCell::new(value),
        parent,
    }));
}

/// How a statement list finished.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Vec<Value>),
    Goto(String),
}

struct Frame {
    env: Env,
    varargs: Rc<[Value]>,
}

fn loop_flow(flow: Flow) -> Option<Flow> {
    match flow {
        Flow::Break => Some(Flow::Normal),
        Flow::Normal | Flow::Continue => None,
        other => Some(other),
    }
}

/// Tree-walking interpreter over the syntax tree.
pub struct Interpreter {
    pub(super) globals: TableRef,
    pub(super) string_lib: TableRef,
    pub(super) output: Vec<u8>,
    pub(super) host: HostProfile,
    limits: EvalLimits,
    steps: u64,
    depth: usize,
}

impl Interpreter {
    pub fn new(host: HostProfile, limits: EvalLimits) -> Self {
        let mut interp = Self {
            globals: Rc::new(RefCell::new(Table::new())),
            string_lib: Rc::new(RefCell::new(Table::new())),
            output: Vec::new(),
            host,
            limits,
            steps: 0,
            depth: 0,
        };
        stdlib::install(&mut interp);
        interp
    }

    /// Everything `print` wrote so far.
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn global(&self, name: &str) -> Value {
        self.globals.borrow().get_str(name)
    }

    /// Run a chunk; returns the values of a top-level `return`.
    pub fn exec_chunk(&mut self, chunk: &Chunk) -> Result<Vec<Value>, EvalError> {
        let mut frame = Frame {
            env: None,
            varargs: Rc::from(Vec::new()),
        };
        let flow = self.exec_block(&chunk.body, &mut frame)?;
        finish(flow)
    }

    pub fn call(&mut self, callee: &Value, args: Vec<Value>) -> Result<Vec<Value>, EvalError> {
        match callee {
            Value::Function(closure) => {
                if self.depth >= self.limits.max_depth {
                    return Err(EvalError::DepthLimit {
                        limit: self.limits.max_depth,
                    });
                }
                self.depth += 1;
                let result = self.call_closure(&closure.clone(), args);
                self.depth -= 1;
                result
            }
            Value::Native(native) => stdlib::call(self, *native, args),
            other => Err(EvalError::runtime(format!(
                "attempt to call a {} value",
                other.type_name()
            ))),
        }
    }

    fn call_closure(&mut self, closure: &Closure, args: Vec<Value>) -> Result<Vec<Value>, EvalError> {
        let func = &closure.func;
        let mut env = closure.env.clone();
        let mut args = args.into_iter();
        for param in &func.params {
            declare(&mut env, param, args.next().unwrap_or_default());
        }
        let varargs: Vec<Value> = if func.is_vararg {
            args.collect()
        } else {
            Vec::new()
        };
        let mut frame = Frame {
            env,
            varargs: Rc::from(varargs),
        };
        let flow = self.exec_block(&func.body, &mut frame)?;
        finish(flow)
    }

    fn tick(&mut self) -> Result<(), EvalError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(EvalError::StepLimit {
                limit: self.limits.max_steps,
            });
        }
        Ok(())
    }

    fn closure(&self, func: FunctionBody, frame: &Frame) -> Value {
        Value::Function(Rc::new(Closure {
            func,
            env: frame.env.clone(),
        }))
    }

    fn exec_block(&mut self, body: &Block, frame: &mut Frame) -> Result<Flow, EvalError> {
        let saved = frame.env.clone();
        let flow = self.exec_stmts(body, frame);
        frame.env = saved;
        flow
    }

    /// Run `body` in the current scope, resolving gotos to its own labels.
    fn exec_stmts(&mut self, body: &[Stmt], frame: &mut Frame) -> Result<Flow, EvalError> {
        let has_labels = body.iter().any(|s| matches!(s.kind, StmtKind::Label(_)));
        let mut scopes: Vec<Option<Env>> = if has_labels {
            vec![None; body.len()]
        } else {
            Vec::new()
        };
        let mut pc = 0;
        while pc < body.len() {
            if has_labels {
                scopes[pc] = Some(frame.env.clone());
            }
            match self.exec_stmt(&body[pc], frame)? {
                Flow::Normal => pc += 1,
                Flow::Goto(label) => {
                    let target = body
                        .iter()
                        .position(|s| matches!(&s.kind, StmtKind::Label(l) if *l == label));
                    let Some(at) = target else {
                        return Ok(Flow::Goto(label));
                    };
                    if let Some(Some(env)) = scopes.get(at) {
                        frame.env = env.clone();
                    }
                    pc = at;
                }
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, frame: &mut Frame) -> Result<Flow, EvalError> {
        self.tick()?;
        match &stmt.kind {
            StmtKind::Local { names, values } => {
                let values = self.eval_list(values, frame)?;
                for (i, name) in names.iter().enumerate() {
                    declare(&mut frame.env, name, values.get(i).cloned().unwrap_or_default());
                }
            }
            StmtKind::Assign { targets, values } => self.assign(targets, values, frame)?,
            StmtKind::CompoundAssign { op, target, value } => {
                if let Expr::Ident(name) = target {
                    let current = self.lookup_name(name, frame);
                    let rhs = self.eval(value, frame)?;
                    let result = self.binary(*op, current, rhs)?;
                    self.assign_name(name, result, frame);
                } else {
                    let (object, key) = self.target_prefix(target, frame)?;
                    let current = self.index(&object, &key)?;
                    let rhs = self.eval(value, frame)?;
                    let result = self.binary(*op, current, rhs)?;
                    self.set_index(&object, key, result)?;
                }
            }
            StmtKind::Call(call) => {
                self.eval_multi(call, frame)?;
            }
            StmtKind::Do(body) => return self.exec_block(body, frame),
            StmtKind::While { cond, body } => {
                while self.eval(cond, frame)?.truthy() {
                    let flow = self.exec_block(body, frame)?;
                    if let Some(exit) = loop_flow(flow) {
                        return Ok(exit);
                    }
                }
            }
            StmtKind::Repeat { body, cond } => loop {
                let saved = frame.env.clone();
                let flow = self.exec_stmts(body, frame);
                let exit = match flow {
                    Ok(flow) => loop_flow(flow),
                    Err(e) => {
                        frame.env = saved;
                        return Err(e);
                    }
                };
                if let Some(exit) = exit {
                    frame.env = saved;
                    return Ok(exit);
                }
                let done = self.eval(cond, frame);
                frame.env = saved;
                if done?.truthy() {
                    break;
                }
            },
            StmtKind::If { clauses, else_body } => {
                for (cond, body) in clauses {
                    if self.eval(cond, frame)?.truthy() {
                        return self.exec_block(body, frame);
                    }
                }
                if let Some(body) = else_body {
                    return self.exec_block(body, frame);
                }
            }
            StmtKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => {
                let start = self.for_number(start, "initial value", frame)?;
                let limit = self.for_number(limit, "limit", frame)?;
                let step = match step {
                    Some(step) => self.for_number(step, "step", frame)?,
                    None => 1.0,
                };
                let mut i = start;
                while (step > 0.0 && i <= limit) || (step <= 0.0 && i >= limit) {
                    let saved = frame.env.clone();
                    declare(&mut frame.env, var, Value::Number(i));
                    let flow = self.exec_block(body, frame);
                    frame.env = saved;
                    if let Some(exit) = loop_flow(flow?) {
                        return Ok(exit);
                    }
                    i += step;
                }
            }
            StmtKind::GenericFor { vars, exprs, body } => {
                let mut init = self.eval_list(exprs, frame)?.into_iter();
                let f = init.next().unwrap_or_default();
                let state = init.next().unwrap_or_default();
                let mut control = init.next().unwrap_or_default();
                loop {
                    let results = self.call(&f, vec![state.clone(), control.clone()])?;
                    let first = results.first().cloned().unwrap_or_default();
                    if first.is_nil() {
                        break;
                    }
                    control = first;
                    let saved = frame.env.clone();
                    for (i, var) in vars.iter().enumerate() {
                        declare(&mut frame.env, var, results.get(i).cloned().unwrap_or_default());
                    }
                    let flow = self.exec_block(body, frame);
                    frame.env = saved;
                    if let Some(exit) = loop_flow(flow?) {
                        return Ok(exit);
                    }
                }
            }
            StmtKind::Function { name, func } => {
                let mut func = func.clone();
                if name.method.is_some() {
                    func.params.insert(0, "self".to_string());
                }
                let closure = self.closure(func, frame);
                let mut keys: Vec<&String> = name.path.iter().skip(1).collect();
                keys.extend(name.method.iter());
                match (name.path.first(), keys.split_last()) {
                    (Some(root), None) => self.assign_name(root, closure, frame),
                    (Some(root), Some((last, inner))) => {
                        let mut object = self.lookup_name(root, frame);
                        for key in inner {
                            object = self.index(&object, &Value::str(key.as_bytes()))?;
                        }
                        self.set_index(&object, Value::str(last.as_bytes()), closure)?;
                    }
                    (None, _) => {}
                }
            }
            StmtKind::LocalFunction { name, func } => {
                declare(&mut frame.env, name, Value::Nil);
                let closure = self.closure(func.clone(), frame);
                if let Some(binding) = &frame.env {
                    *binding.value.borrow_mut() = closure;
                }
            }
            StmtKind::Return(values) => return Ok(Flow::Return(self.eval_list(values, frame)?)),
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Goto(label) => return Ok(Flow::Goto(label.clone())),
            StmtKind::Label(_) => {}
        }
        Ok(Flow::Normal)
    }

    fn for_number(&mut self, expr: &Expr, what: &str, frame: &mut Frame) -> Result<f64, EvalError> {
        self.eval(expr, frame)?
            .to_number()
            .ok_or_else(|| EvalError::runtime(format!("'for' {} must be a number", what)))
    }

    /// A single target stores its value after evaluating its own prefix; a
    /// list evaluates every value first.
    fn assign(&mut self, targets: &[Expr], values: &[Expr], frame: &mut Frame) -> Result<(), EvalError> {
        if let ([target], [value]) = (targets, values) {
            if let Expr::Ident(name) = target {
                let value = self.eval(value, frame)?;
                self.assign_name(name, value, frame);
            } else {
                let (object, key) = self.target_prefix(target, frame)?;
                let value = self.eval(value, frame)?;
                self.set_index(&object, key, value)?;
            }
            return Ok(());
        }
        let values = self.eval_list(values, frame)?;
        for (i, target) in targets.iter().enumerate() {
            let value = values.get(i).cloned().unwrap_or_default();
            if let Expr::Ident(name) = target {
                self.assign_name(name, value, frame);
            } else {
                let (object, key) = self.target_prefix(target, frame)?;
                self.set_index(&object, key, value)?;
            }
        }
        Ok(())
    }

    fn target_prefix(&mut self, target: &Expr, frame: &mut Frame) -> Result<(Value, Value), EvalError> {
        match target {
            Expr::Index { object, key } => {
                let object = self.eval(object, frame)?;
                let key = self.eval(key, frame)?;
                Ok((object, key))
            }
            Expr::Member { object, name } => {
                let object = self.eval(object, frame)?;
                Ok((object, Value::str(name.as_bytes())))
            }
            _ => Err(EvalError::runtime("cannot assign to this expression")),
        }
    }

    fn lookup_name(&self, name: &str, frame: &Frame) -> Value {
        if let Some(binding) = lookup(&frame.env, name) {
            return binding.value.borrow().clone();
        }
        if name == "_ENV" && self.host.env_global {
            return Value::Table(self.globals.clone());
        }
        self.globals.borrow().get_str(name)
    }

    fn assign_name(&mut self, name: &str, value: Value, frame: &Frame) {
        match lookup(&frame.env, name) {
            Some(binding) => *binding.value.borrow_mut() = value,
            None => self.globals.borrow_mut().set_str(name, value),
        }
    }

    pub(super) fn index(&self, object: &Value, key: &Value) -> Result<Value, EvalError> {
        match object {
            Value::Table(table) => Ok(table.borrow().get(key)),
            Value::Str(_) => Ok(self.string_lib.borrow().get(key)),
            other => Err(EvalError::runtime(format!(
                "attempt to index a {} value",
                other.type_name()
            ))),
        }
    }

    pub(super) fn set_index(&self, object: &Value, key: Value, value: Value) -> Result<(), EvalError> {
        match object {
            Value::Table(table) => table.borrow_mut().set(key, value),
            other => Err(EvalError::runtime(format!(
                "attempt to index a {} value",
                other.type_name()
            ))),
        }
    }

    fn eval(&mut self, expr: &Expr, frame: &mut Frame) -> Result<Value, EvalError> {
        Ok(match expr {
            Expr::Nil => Value::Nil,
            Expr::True => Value::Bool(true),
            Expr::False => Value::Bool(false),
            Expr::Number(n) => Value::Number(*n),
            Expr::Str(s) => Value::str(s),
            Expr::Vararg => frame.varargs.first().cloned().unwrap_or_default(),
            Expr::Function(func) => self.closure((**func).clone(), frame),
            Expr::Ident(name) => self.lookup_name(name, frame),
            Expr::Index { object, key } => {
                let object = self.eval(object, frame)?;
                let key = self.eval(key, frame)?;
                self.index(&object, &key)?
            }
            Expr::Member { object, name } => {
                let object = self.eval(object, frame)?;
                self.index(&object, &Value::str(name.as_bytes()))?
            }
            Expr::Call { .. } | Expr::MethodCall { .. } => self
                .eval_multi(expr, frame)?
                .into_iter()
                .next()
                .unwrap_or_default(),
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, frame)?;
                match op {
                    BinaryOp::And if !left.truthy() => left,
                    BinaryOp::Or if left.truthy() => left,
                    BinaryOp::And | BinaryOp::Or => self.eval(right, frame)?,
                    _ => {
                        let right = self.eval(right, frame)?;
                        self.binary(*op, left, right)?
                    }
                }
            }
            Expr::Unary { op, expr } => {
                let value = self.eval(expr, frame)?;
                match op {
                    UnaryOp::Not => Value::Bool(!value.truthy()),
                    UnaryOp::Neg => Value::Number(-arith_operand(&value)?),
                    UnaryOp::Len => match &value {
                        Value::Str(s) => Value::Number(s.len() as f64),
                        Value::Table(t) => Value::Number(t.borrow().border() as f64),
                        other => {
                            return Err(EvalError::runtime(format!(
                                "attempt to get length of a {} value",
                                other.type_name()
                            )));
                        }
                    },
                }
            }
            Expr::Table(fields) => self.table(fields, frame)?,
            Expr::Paren(inner) => self.eval(inner, frame)?,
        })
    }

    fn table(&mut self, fields: &[TableField], frame: &mut Frame) -> Result<Value, EvalError> {
        let mut table = Table::new();
        let mut next = 1;
        for (i, field) in fields.iter().enumerate() {
            match field {
                TableField::Positional(value) if i + 1 == fields.len() && value.is_multi() => {
                    for value in self.eval_multi(value, frame)? {
                        table.set_int(next, value);
                        next += 1;
                    }
                }
                TableField::Positional(value) => {
                    let value = self.eval(value, frame)?;
                    table.set_int(next, value);
                    next += 1;
                }
                TableField::Named(name, value) => {
                    let value = self.eval(value, frame)?;
                    table.set_str(name, value);
                }
                TableField::Keyed(key, value) => {
                    let key = self.eval(key, frame)?;
                    let value = self.eval(value, frame)?;
                    table.set(key, value)?;
                }
            }
        }
        Ok(Value::table(table))
    }

    fn eval_multi(&mut self, expr: &Expr, frame: &mut Frame) -> Result<Vec<Value>, EvalError> {
        match expr {
            Expr::Call { callee, args } => {
                let callee = self.eval(callee, frame)?;
                let args = self.eval_list(args, frame)?;
                self.call(&callee, args)
            }
            Expr::MethodCall {
                receiver,
                method,
                args,
            } => {
                let receiver = self.eval(receiver, frame)?;
                let callee = self.index(&receiver, &Value::str(method.as_bytes()))?;
                let mut all = vec![receiver];
                all.extend(self.eval_list(args, frame)?);
                self.call(&callee, all)
            }
            Expr::Vararg => Ok(frame.varargs.to_vec()),
            other => Ok(vec![self.eval(other, frame)?]),
        }
    }

    /// Values of an expression list; only the last expression may expand.
    fn eval_list(&mut self, exprs: &[Expr], frame: &mut Frame) -> Result<Vec<Value>, EvalError> {
        let mut out = Vec::with_capacity(exprs.len());
        for (i, expr) in exprs.iter().enumerate() {
            if i + 1 == exprs.len() && expr.is_multi() {
                out.extend(self.eval_multi(expr, frame)?);
            } else {
                out.push(self.eval(expr, frame)?);
            }
        }
        Ok(out)
    }

    fn binary(&self, op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
        Ok(match op {
            BinaryOp::Add
            | BinaryOp::Sub
            | BinaryOp::Mul
            | BinaryOp::Div
            | BinaryOp::IDiv
            | BinaryOp::Mod
            | BinaryOp::Pow => {
                let a = arith_operand(&left)?;
                let b = arith_operand(&right)?;
                Value::Number(match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::IDiv => (a / b).floor(),
                    BinaryOp::Mod => a - (a / b).floor() * b,
                    _ => a.powf(b),
                })
            }
            BinaryOp::Concat => {
                let mut text = concat_operand(&left)?;
                text.extend(concat_operand(&right)?);
                Value::Str(Rc::from(text))
            }
            BinaryOp::Eq => Value::Bool(left.raw_equals(&right)),
            BinaryOp::Ne => Value::Bool(!left.raw_equals(&right)),
            BinaryOp::Lt => Value::Bool(less_than(&left, &right)?),
            BinaryOp::Gt => Value::Bool(less_than(&right, &left)?),
            BinaryOp::Le => Value::Bool(!less_than(&right, &left)?),
            BinaryOp::Ge => Value::Bool(!less_than(&left, &right)?),
            BinaryOp::And => if left.truthy() { right } else { left },
            BinaryOp::Or => if left.truthy() { left } else { right },
        })
    }
}

fn finish(flow: Flow) -> Result<Vec<Value>, EvalError> {
    match flow {
        Flow::Return(values) => Ok(values),
        Flow::Normal => Ok(Vec::new()),
        Flow::Break => Err(EvalError::runtime("break outside a loop")),
        Flow::Continue => Err(EvalError::runtime("continue outside a loop")),
        Flow::Goto(label) => Err(EvalError::runtime(format!("no visible label '{}'", label))),
    }
}

fn arith_operand(value: &Value) -> Result<f64, EvalError> {
    value.to_number().ok_or_else(|| {
        EvalError::runtime(format!(
            "attempt to perform arithmetic on a {} value",
            value.type_name()
        ))
    })
}

fn concat_operand(value: &Value) -> Result<Vec<u8>, EvalError> {
    match value {
        Value::Str(_) | Value::Number(_) => Ok(value.to_text()),
        other => Err(EvalError::runtime(format!(
            "attempt to concatenate a {} value",
            other.type_name()
        ))),
    }
}

fn less_than(left: &Value, right: &Value) -> Result<bool, EvalError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(a < b),
        (Value::Str(a), Value::Str(b)) => Ok(a < b),
        (a, b) => Err(EvalError::runtime(format!(
            "attempt to compare {} with {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}
