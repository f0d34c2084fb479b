//! Instruction semantics shared by both dispatch styles.
//!
//! Handlers read their operands from the interpreter's `a` and `b` locals.
//! Linear dispatch has already advanced `pc`; block dispatch passes the id
//! of the fall-through block.

use crate::{
    ast::{
        BinaryOp, Expr, Stmt, StmtKind, UnaryOp,
        build::{
            add, assign, binary, brk, call, eq, ident, if_chain, if_else, if_then, index, int,
            len, list, local, local_many, member, not, numeric_for, ret, sub, table, unary,
        },
    },
    codegen::Gen,
    vm::Opcode,
};

#[derive(Debug, Clone, Copy)]
pub(super) enum Flow {
    Linear,
    Block { next: u32 },
}

impl Gen<'_> {
    fn a(&self) -> Expr {
        self.id(&self.h.a)
    }

    fn b(&self) -> Expr {
        self.id(&self.h.b)
    }

    fn goto_next(&self, flow: Flow) -> Vec<Stmt> {
        match flow {
            Flow::Linear => Vec::new(),
            Flow::Block { next } => vec![assign(self.id(&self.h.pc), int(next as i64))],
        }
    }

    /// Body of the handler for `op` (a plain opcode).
    ///
    /// `statics` carries the decoded operands when they are known while
    /// generating, which lets outer-name and halt selection happen here
    /// instead of at run time.
    pub(super) fn handler(
        &mut self,
        op: Opcode,
        flow: Flow,
        statics: Option<(u32, u32)>,
    ) -> Vec<Stmt> {
        let mut out = match op {
            Opcode::Nop => Vec::new(),
            Opcode::PushConst => {
                let mut out = self.ensure_constant(self.a());
                out.extend(self.push(self.constant(self.a())));
                out
            }
            Opcode::PushNil => self.push(Expr::Nil),
            Opcode::PushTrue => self.push(Expr::True),
            Opcode::PushFalse => self.push(Expr::False),
            Opcode::PushLocal => self.push(index(self.id(&self.h.regs), self.a())),
            Opcode::StoreLocal => vec![
                assign(
                    index(self.id(&self.h.regs), self.a()),
                    self.slot(self.below_top(0)),
                ),
                self.shrink(int(1)),
            ],
            Opcode::PushGlobal => {
                let mut out = self.ensure_constant(self.a());
                out.extend(self.push(index(self.id(&self.h.env), self.constant(self.a()))));
                out
            }
            Opcode::StoreGlobal => {
                let mut out = self.ensure_constant(self.a());
                out.push(assign(
                    index(self.id(&self.h.env), self.constant(self.a())),
                    self.slot(self.below_top(0)),
                ));
                out.push(self.shrink(int(1)));
                out
            }
            Opcode::PushOuter => self.outer(statics, |g, name| g.push(ident(name))),
            Opcode::StoreOuter => self.outer(statics, |g, name| {
                vec![
                    assign(ident(name), g.slot(g.below_top(0))),
                    g.shrink(int(1)),
                ]
            }),
            Opcode::Pop => vec![self.shrink(int(1))],
            Opcode::Dup => vec![
                self.grow(1),
                self.set_slot(self.below_top(0), self.slot(self.below_top(1))),
            ],
            Opcode::Swap => {
                let v = self.h.value.clone();
                vec![
                    local(&v, self.slot(self.below_top(0))),
                    self.set_slot(self.below_top(0), self.slot(self.below_top(1))),
                    self.set_slot(self.below_top(1), ident(&v)),
                ]
            }
            Opcode::NewTable => self.push(table()),
            Opcode::GetTable => {
                let v = self.h.value.clone();
                let mut out = self.pop_into(&v);
                out.push(self.set_slot(
                    self.below_top(0),
                    index(self.slot(self.below_top(0)), ident(&v)),
                ));
                out
            }
            Opcode::SetTable => {
                let w = self.h.scratch.clone();
                vec![
                    local(&w, self.slot(self.below_top(2))),
                    assign(
                        index(ident(&w), self.slot(self.below_top(1))),
                        self.slot(self.below_top(0)),
                    ),
                    self.shrink(int(3)),
                ]
            }
            Opcode::SetListV => self.set_list(),
            Opcode::Add => self.arith(BinaryOp::Add),
            Opcode::Sub => self.arith(BinaryOp::Sub),
            Opcode::Mul => self.arith(BinaryOp::Mul),
            Opcode::Div => self.arith(BinaryOp::Div),
            Opcode::Mod => self.arith(BinaryOp::Mod),
            Opcode::Pow => self.arith(BinaryOp::Pow),
            Opcode::Concat => self.arith(BinaryOp::Concat),
            Opcode::Eq => self.arith(BinaryOp::Eq),
            Opcode::Ne => self.arith(BinaryOp::Ne),
            Opcode::Lt => self.arith(BinaryOp::Lt),
            Opcode::Le => self.arith(BinaryOp::Le),
            Opcode::Gt => self.arith(BinaryOp::Gt),
            Opcode::Ge => self.arith(BinaryOp::Ge),
            Opcode::IDiv => {
                let quotient = binary(
                    BinaryOp::Div,
                    self.slot(self.below_top(1)),
                    self.slot(self.below_top(0)),
                );
                self.fold_top(2, call(self.id(&self.h.floor), vec![quotient]))
            }
            Opcode::Not => self.fold_top(1, not(self.slot(self.below_top(0)))),
            Opcode::Neg => self.fold_top(1, unary(UnaryOp::Neg, self.slot(self.below_top(0)))),
            Opcode::Len => self.fold_top(1, len(self.slot(self.below_top(0)))),
            Opcode::Jmp => return vec![assign(self.id(&self.h.pc), self.a())],
            Opcode::JmpIfFalse | Opcode::JmpIfTrue => {
                let v = self.h.value.clone();
                let mut out = self.pop_into(&v);
                let cond = if op == Opcode::JmpIfFalse {
                    not(ident(&v))
                } else {
                    ident(&v)
                };
                let taken = vec![assign(self.id(&self.h.pc), self.a())];
                out.push(match flow {
                    Flow::Linear => if_then(cond, taken),
                    Flow::Block { .. } => if_else(cond, taken, self.goto_next(flow)),
                });
                return out;
            }
            Opcode::Call => self.call(self.a()),
            Opcode::CallV => self.call(add(self.a(), self.id(&self.h.vc))),
            Opcode::Return => {
                let values = self.stack_range(self.a());
                return match statics {
                    Some((_, 1)) => vec![brk()],
                    Some(_) => vec![ret(vec![values])],
                    None => vec![
                        if_then(eq(self.b(), int(1)), vec![brk()]),
                        ret(vec![values]),
                    ],
                };
            }
            Opcode::ReturnV => {
                let values = self.stack_range(add(self.a(), self.id(&self.h.vc)));
                return vec![ret(vec![values])];
            }
            Opcode::PushConstX
            | Opcode::PushLocalX
            | Opcode::StoreLocalX
            | Opcode::JmpX
            | Opcode::JmpIfFalseX
            | Opcode::JmpIfTrueX
            | Opcode::CallX => return self.handler(op.base(), flow, statics),
        };
        out.extend(self.goto_next(flow));
        out
    }

    fn arith(&self, op: BinaryOp) -> Vec<Stmt> {
        let result = binary(
            op,
            self.slot(self.below_top(1)),
            self.slot(self.below_top(0)),
        );
        self.fold_top(2, result)
    }

    /// `UP(S, t - n + 1, t)`: the top `n` values.
    fn stack_range(&self, n: Expr) -> Expr {
        call(
            self.id(&self.h.unpack),
            vec![
                self.id(&self.h.stack),
                add(sub(self.id(&self.h.top), n), int(1)),
                self.id(&self.h.top),
            ],
        )
    }

    fn outer(
        &self,
        statics: Option<(u32, u32)>,
        body: impl Fn(&Self, &str) -> Vec<Stmt>,
    ) -> Vec<Stmt> {
        let names = &self.obf.program.outer_names;
        match statics {
            Some((k, _)) => names
                .get(k as usize)
                .map(|name| body(self, name))
                .unwrap_or_default(),
            None => {
                let clauses = names
                    .iter()
                    .enumerate()
                    .map(|(k, name)| (eq(self.a(), int(k as i64)), body(self, name)))
                    .collect();
                vec![if_chain(clauses, None)]
            }
        }
    }

    fn set_list(&self) -> Vec<Stmt> {
        let n = self.h.count.clone();
        let w = self.h.scratch.clone();
        let i = self.h.index.clone();
        vec![
            local(&n, add(self.b(), self.id(&self.h.vc))),
            local(&w, self.slot(sub(self.id(&self.h.top), ident(&n)))),
            numeric_for(
                &i,
                int(1),
                ident(&n),
                vec![assign(
                    index(ident(&w), sub(add(self.a(), ident(&i)), int(1))),
                    self.slot(add(sub(self.id(&self.h.top), ident(&n)), ident(&i))),
                )],
            ),
            self.shrink(ident(&n)),
        ]
    }

    /// Call the function below `argc` arguments and leave `b - 1` results,
    /// or all of them with `vc` set when `b == 0`.
    fn call(&self, argc: Expr) -> Vec<Stmt> {
        let h = &self.h;
        let base = ident(&h.base);
        let f = ident(&h.scratch);
        let res = ident(&h.results);
        let n = ident(&h.count);
        let i = h.index.clone();

        let invoke = call(
            f.clone(),
            vec![call(
                self.id(&h.unpack),
                vec![
                    self.id(&h.stack),
                    add(base.clone(), int(1)),
                    self.id(&h.top),
                ],
            )],
        );
        let spill = |limit: Expr| {
            numeric_for(
                &i,
                int(1),
                limit,
                vec![
                    self.grow(1),
                    self.set_slot(self.id(&h.top), index(res.clone(), ident(&i))),
                ],
            )
        };
        let reset_top = assign(self.id(&h.top), sub(base.clone(), int(1)));

        let all_results = vec![
            local_many(&[h.results.as_str(), h.count.as_str()], vec![]),
            if_else(
                self.id(&h.pack),
                vec![
                    assign(res.clone(), call(self.id(&h.pack), vec![invoke.clone()])),
                    assign(n.clone(), member(res.clone(), "n")),
                ],
                vec![
                    assign(res.clone(), list(vec![invoke.clone()])),
                    assign(n.clone(), len(res.clone())),
                ],
            ),
            reset_top.clone(),
            spill(n.clone()),
            assign(self.id(&h.vc), n),
        ];
        let fixed_results = vec![
            local(&h.results, list(vec![invoke])),
            reset_top,
            spill(sub(self.b(), int(1))),
        ];

        vec![
            local(&h.base, sub(self.id(&h.top), argc)),
            local(&h.scratch, self.slot(base)),
            Stmt::new(
                StmtKind::If {
                    clauses: vec![(eq(self.b(), int(0)), all_results)],
                    else_body: Some(fixed_results),
                },
                crate::ast::Span::synthetic(),
            ),
        ]
    }
}
