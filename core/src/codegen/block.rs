//! Block dispatch: every instruction is an inline block reached by a random
//! id, found through a bisection tree or hashed buckets.

use std::collections::BTreeMap;

use crate::{
    ast::{
        Expr, Stmt,
        build::{add, assign, eq, ident, if_chain, if_else, int, local, lt, modulo, while_loop},
    },
    codegen::{Gen, handlers::Flow},
    obfuscate::Graph,
    vm::Opcode,
};

const ID_LIMIT: u32 = (1 << 30) - 1;

fn uses_a(op: Opcode) -> bool {
    matches!(
        op.base(),
        Opcode::PushConst
            | Opcode::PushLocal
            | Opcode::StoreLocal
            | Opcode::PushGlobal
            | Opcode::StoreGlobal
            | Opcode::SetListV
            | Opcode::Jmp
            | Opcode::JmpIfFalse
            | Opcode::JmpIfTrue
            | Opcode::Call
            | Opcode::CallV
            | Opcode::Return
            | Opcode::ReturnV
    )
}

fn uses_b(op: Opcode) -> bool {
    matches!(op.base(), Opcode::SetListV | Opcode::Call | Opcode::CallV)
}

impl Gen<'_> {
    pub(super) fn block(&mut self) -> Vec<Stmt> {
        let obf = self.obf;
        let Some(isa) = &obf.isa else {
            return Vec::new();
        };
        let count = obf.instruction_count();
        let fakes = if isa.fake_edges {
            self.rng.range(1, (count as u32 / 8).max(1)) as usize
        } else {
            0
        };
        let ids = self.rng.distinct(count + fakes, 1, ID_LIMIT);
        let (real, fake) = ids.split_at(count);

        let mut blocks: Vec<(u32, Vec<Stmt>)> = Vec::with_capacity(ids.len());
        for pc in 0..count {
            let body = self.block_body(pc, real, fake);
            blocks.push((real[pc], body));
        }
        for &id in fake {
            let body = self.fake_block(real);
            blocks.push((id, body));
        }

        let dispatch = match isa.dispatch_graph {
            Graph::Tree => {
                blocks.sort_by_key(|(id, _)| *id);
                self.tree(&blocks)
            }
            Graph::Sparse => self.buckets(blocks),
        };

        vec![
            local(&self.h.pc, int(real.first().copied().unwrap_or(0) as i64)),
            while_loop(Expr::True, dispatch),
        ]
    }

    fn block_body(&mut self, pc: usize, real: &[u32], fake: &[u32]) -> Vec<Stmt> {
        let obf = self.obf;
        let Some(isa) = &obf.isa else {
            return Vec::new();
        };
        let instr = obf.program.instructions[pc];
        let polymorphic = instr.op.is_polymorphic();
        let (mask_a, mask_b) = if polymorphic {
            (isa.key_a.key, isa.key_b.key)
        } else {
            (0, 0)
        };
        let key = obf.key_for(pc);
        let plain_a = instr.a ^ mask_a;
        let plain_b = instr.b ^ mask_b;

        let literal_a = if instr.op.is_jump() {
            real[plain_a as usize] ^ mask_a ^ key
        } else {
            obf.fields[pc][1]
        };
        let literal_b = obf.fields[pc][2];

        let mut body = Vec::new();
        for (used, name, literal, isa_key) in [
            (uses_a(instr.op), &self.h.a, literal_a, &self.h.isa_a),
            (uses_b(instr.op), &self.h.b, literal_b, &self.h.isa_b),
        ] {
            if !used {
                continue;
            }
            body.push(local(name, int(literal as i64)));
            if obf.keys.is_some() {
                body.push(self.xor_into(ident(name), ident(name), self.key_at(int(pc as i64))));
            }
            if polymorphic {
                body.push(self.xor_into(ident(name), ident(name), ident(isa_key)));
            }
        }

        let next = real.get(pc + 1).copied().unwrap_or(real[pc]);
        body.extend(self.handler(
            instr.op.base(),
            Flow::Block { next },
            Some((plain_a, plain_b)),
        ));

        if !fake.is_empty() && self.rng.chance(0.3) {
            self.add_fake_edge(&mut body, next, fake);
        }
        body
    }

    /// Turn a trailing `pc = next` into `if t < 0 then pc = fake else pc = next end`.
    fn add_fake_edge(&mut self, body: &mut Vec<Stmt>, next: u32, fake: &[u32]) {
        let pc = self.id(&self.h.pc);
        if body.last() != Some(&assign(pc.clone(), int(next as i64))) {
            return;
        }
        let Some(&target) = self.rng.pick(fake) else {
            return;
        };
        body.pop();
        body.push(if_else(
            lt(self.id(&self.h.top), int(0)),
            vec![assign(pc.clone(), int(target as i64))],
            vec![assign(pc, int(next as i64))],
        ));
    }

    fn fake_block(&mut self, real: &[u32]) -> Vec<Stmt> {
        let junk = self.rng.range(0, 65535);
        let target = self.rng.pick(real).copied().unwrap_or(0);
        let mut body = self.push(int(junk as i64));
        body.push(assign(self.id(&self.h.pc), int(target as i64)));
        body
    }

    /// Bisection over sorted ids; a leaf is the block body itself.
    fn tree(&self, blocks: &[(u32, Vec<Stmt>)]) -> Vec<Stmt> {
        match blocks {
            [] => Vec::new(),
            [(_, body)] => body.clone(),
            _ => {
                let mid = blocks.len() / 2;
                vec![if_else(
                    lt(self.id(&self.h.pc), int(blocks[mid].0 as i64)),
                    self.tree(&blocks[..mid]),
                    self.tree(&blocks[mid..]),
                )]
            }
        }
    }

    /// `(pc + salt) % buckets` selects a bucket, then ids are compared.
    fn buckets(&mut self, blocks: Vec<(u32, Vec<Stmt>)>) -> Vec<Stmt> {
        let bucket_count = self.rng.range(2, (blocks.len() as u32 / 3).max(2));
        let salt = self.rng.range(1, 1 << 20);
        let mut grouped: BTreeMap<u32, Vec<(u32, Vec<Stmt>)>> = BTreeMap::new();
        for (id, body) in blocks {
            grouped
                .entry((id + salt) % bucket_count)
                .or_default()
                .push((id, body));
        }

        let selector = self.fresh();
        let pc = self.id(&self.h.pc);
        let mut groups: Vec<(u32, Vec<(u32, Vec<Stmt>)>)> = grouped.into_iter().collect();
        self.rng.shuffle(&mut groups);
        let clauses = groups
            .into_iter()
            .map(|(bucket, members)| {
                let inner = members
                    .into_iter()
                    .map(|(id, body)| (eq(pc.clone(), int(id as i64)), body))
                    .collect();
                (
                    eq(ident(&selector), int(bucket as i64)),
                    vec![if_chain(inner, None)],
                )
            })
            .collect();

        vec![
            local(
                &selector,
                modulo(add(pc, int(salt as i64)), int(bucket_count as i64)),
            ),
            if_chain(clauses, None),
        ]
    }
}
