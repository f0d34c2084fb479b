//! Interpreter entry: library lookup, seed and key derivation, constant pool.

use crate::{
    ast::{
        Expr, Stmt,
        build::{
            add, and, assign, boolean, bytes, call, div, eq, ident, if_chain, if_then, index,
            int, len, list, local, local_many, member, modulo, mul, not, num, number_list,
            numeric_for, or, paren, str, sub, table,
        },
        StmtKind,
    },
    codegen::Gen,
    obfuscate::{ConstPool, EncryptedPool, Protocol, StreamChunk},
    options::Dispatch,
    vm::{Constant, Opcode},
};

impl Gen<'_> {
    pub(super) fn prelude(&mut self) -> Vec<Stmt> {
        let mut out = Vec::new();
        self.libraries(&mut out);
        let (instruction_count, constant_count) = self.storage(&mut out);
        self.seed(&mut out, instruction_count, constant_count);
        self.schedule(&mut out);
        self.pool(&mut out);
        self.opcode_map(&mut out);
        self.machine_state(&mut out);
        out
    }

    fn uses(&self, op: Opcode) -> bool {
        self.obf.program.instructions.iter().any(|i| i.op.base() == op)
    }

    fn libraries(&mut self, out: &mut Vec<Stmt>) {
        let h = &self.h;
        // getfenv and getfenv(0) or _ENV
        out.push(local(
            &h.env,
            or(
                and(ident("getfenv"), call(ident("getfenv"), vec![int(0)])),
                ident("_ENV"),
            ),
        ));
        out.push(local(&h.chr, member(paren(str("")), "char")));
        out.push(local(&h.byte, member(paren(str("")), "byte")));

        let env = self.id(&h.env);
        out.push(local(&h.table_lib, index(env.clone(), self.lib_name("table"))));
        out.push(local(
            &h.unpack,
            or(
                index(self.id(&h.table_lib), self.lib_name("unpack")),
                index(env.clone(), self.lib_name("unpack")),
            ),
        ));
        out.push(local(&h.pack, index(self.id(&h.table_lib), self.lib_name("pack"))));

        let bit_lib = self.names.fresh(self.rng);
        let h = &self.h;
        out.push(local(&bit_lib, index(env.clone(), self.lib_name("bit32"))));
        out.push(local(
            &h.xor.bxor,
            and(ident(&bit_lib), index(ident(&bit_lib), self.lib_name("bxor"))),
        ));

        if self.protocol == Protocol::Api {
            out.push(local_many(
                &[h.rawget.as_str(), h.rawset.as_str()],
                vec![
                    index(env.clone(), self.lib_name("rawget")),
                    index(env.clone(), self.lib_name("rawset")),
                ],
            ));
        }
        if matches!(self.obf.pool, ConstPool::Encrypted(_)) {
            out.push(local(&h.tonumber, index(env.clone(), self.lib_name("tonumber"))));
        }
        if self.uses(Opcode::IDiv) {
            out.push(local(
                &h.floor,
                index(index(env, self.lib_name("math")), self.lib_name("floor")),
            ));
        }
    }

    /// Emit the stored code and pool tables; returns the expressions the
    /// seed is recomputed from.
    fn storage(&mut self, out: &mut Vec<Stmt>) -> (Expr, Expr) {
        let obf = self.obf;
        let instruction_count = match &obf.stream {
            Some(stream) => {
                let chunks = stream
                    .chunks
                    .iter()
                    .map(|chunk| match chunk {
                        StreamChunk::Numbers(fields) => number_list(fields.iter().copied()),
                        StreamChunk::Bytes(raw) => bytes(raw.clone()),
                    })
                    .collect();
                out.push(local(&self.h.chunks, list(chunks)));
                out.push(local(
                    &self.h.order,
                    number_list(stream.order.iter().map(|&p| p as u32 + 1)),
                ));

                let per_instruction = match stream.chunks.first() {
                    Some(StreamChunk::Bytes(_)) => 12,
                    _ => 3,
                };
                let total = self.fresh();
                let i = self.fresh();
                out.push(local(&total, int(0)));
                out.push(numeric_for(
                    &i,
                    int(1),
                    len(self.id(&self.h.chunks)),
                    vec![assign(
                        ident(&total),
                        add(ident(&total), len(index(self.id(&self.h.chunks), ident(&i)))),
                    )],
                ));
                div(ident(&total), int(per_instruction))
            }
            None => int(obf.instruction_count() as i64),
        };

        let constant_count = match &obf.pool {
            ConstPool::Plain(constants) => {
                let values = constants.iter().map(constant_expr).collect();
                out.push(local(&self.h.pool, list(values)));
                if constants.iter().any(|c| *c == Constant::Nil) {
                    int(constants.len() as i64)
                } else {
                    len(self.id(&self.h.pool))
                }
            }
            ConstPool::Encrypted(pool) => {
                if pool.shards == 1 {
                    let entries = pool
                        .entries
                        .iter()
                        .map(|e| number_list(e.iter().copied()))
                        .collect();
                    out.push(local(&self.h.entries, list(entries)));
                    len(self.id(&self.h.entries))
                } else {
                    let shards = pool
                        .shard_tables()
                        .into_iter()
                        .map(|shard| {
                            list(
                                shard
                                    .into_iter()
                                    .map(|e| number_list(e.iter().copied()))
                                    .collect(),
                            )
                        })
                        .collect();
                    out.push(local(&self.h.entries, list(shards)));
                    (0..pool.shards)
                        .map(|s| len(index(self.id(&self.h.entries), int(s as i64 + 1))))
                        .reduce(add)
                        .unwrap_or_else(|| int(0))
                }
            }
        };

        (instruction_count, constant_count)
    }

    fn seed(&mut self, out: &mut Vec<Stmt>, instruction_count: Expr, constant_count: Expr) {
        let pieces = self.obf.seed.pieces.iter().copied();
        out.push(local(&self.h.pieces, number_list(pieces)));
        out.push(local(&self.h.seed, int(0)));
        let i = self.fresh();
        let seed = self.id(&self.h.seed);
        out.push(numeric_for(
            &i,
            int(1),
            len(self.id(&self.h.pieces)),
            vec![assign(
                seed.clone(),
                add(seed.clone(), index(self.id(&self.h.pieces), ident(&i))),
            )],
        ));
        out.push(assign(
            seed.clone(),
            modulo(
                paren(add(
                    add(seed, mul(int(7), paren(instruction_count))),
                    mul(int(13), paren(constant_count)),
                )),
                int(256),
            ),
        ));
    }

    /// `dst = ((enc ^ mask) + multiplier * SEED * position) % modulus`
    fn derived_key(
        &self,
        dst: Expr,
        encoded: Expr,
        mask: Expr,
        multiplier: i64,
        position: Expr,
        modulus: i64,
    ) -> Vec<Stmt> {
        vec![
            self.xor_into(dst.clone(), encoded, mask),
            assign(
                dst.clone(),
                modulo(
                    add(
                        dst,
                        mul(mul(int(multiplier), self.id(&self.h.seed)), position),
                    ),
                    int(modulus),
                ),
            ),
        ]
    }

    fn schedule(&mut self, out: &mut Vec<Stmt>) {
        let obf = self.obf;
        if let Some(keys) = &obf.keys {
            let encoded = self.fresh();
            let masks = self.fresh();
            let i = self.fresh();
            out.push(local(
                &encoded,
                number_list(keys.keys.iter().map(|k| k.encoded)),
            ));
            out.push(local(&masks, number_list(keys.keys.iter().map(|k| k.mask))));
            out.push(local(&self.h.keys, table()));
            let slot = index(self.id(&self.h.keys), ident(&i));
            let body = self.derived_key(
                slot,
                index(ident(&encoded), ident(&i)),
                index(ident(&masks), ident(&i)),
                31,
                ident(&i),
                65536,
            );
            out.push(numeric_for(&i, int(1), len(ident(&encoded)), body));
        }

        if let Some(isa) = obf.isa.as_ref().filter(|isa| isa.enabled) {
            for (name, key, position) in [
                (&self.h.isa_a, isa.key_a, crate::obfuscate::polymorph::KEY_A_POSITION),
                (&self.h.isa_b, isa.key_b, crate::obfuscate::polymorph::KEY_B_POSITION),
            ] {
                out.push(local(name, int(0)));
                out.extend(self.derived_key(
                    ident(name),
                    int(key.encoded as i64),
                    int(key.mask as i64),
                    31,
                    int(position as i64 + 1),
                    65536,
                ));
            }
        }
    }

    fn pool(&mut self, out: &mut Vec<Stmt>) {
        let obf = self.obf;
        let ConstPool::Encrypted(pool) = &obf.pool else {
            return;
        };
        let encoded = self.fresh();
        let masks = self.fresh();
        let i = self.fresh();
        out.push(local(&encoded, number_list(pool.encoded_keys.iter().copied())));
        out.push(local(&masks, number_list(pool.key_masks.iter().copied())));
        out.push(local(&self.h.const_keys, table()));
        let body = self.derived_key(
            index(self.id(&self.h.const_keys), ident(&i)),
            index(ident(&encoded), ident(&i)),
            index(ident(&masks), ident(&i)),
            17,
            ident(&i),
            256,
        );
        out.push(numeric_for(&i, int(1), len(ident(&encoded)), body));

        out.push(local(&self.h.pool, table()));
        if self.lazy_pool() {
            out.push(local(&self.h.pool_done, table()));
        } else {
            let p = self.fresh();
            let body = self.decode_entry(pool, ident(&p));
            out.push(numeric_for(
                &p,
                int(0),
                int(pool.entries.len() as i64 - 1),
                body,
            ));
        }
    }

    /// Decrypt pool entry `p` (0-based) into `K[p + 1]`.
    pub(super) fn decode_entry(&mut self, pool: &EncryptedPool, p: Expr) -> Vec<Stmt> {
        let n = pool.keys.len() as i64;
        let entry = self.fresh();
        let length = self.fresh();
        let tag = self.fresh();
        let text = self.fresh();
        let j = self.fresh();
        let byte = self.fresh();

        let keys = self.id(&self.h.const_keys);
        let key_at = |at: Expr| index(keys.clone(), add(modulo(at, int(n)), int(1)));

        let fetch = if pool.shards == 1 {
            index(self.id(&self.h.entries), add(p.clone(), int(1)))
        } else {
            let ns = int(pool.shards as i64);
            let shard = modulo(p.clone(), ns.clone());
            index(
                index(self.id(&self.h.entries), add(shard.clone(), int(1))),
                add(div(paren(sub(p.clone(), shard)), ns), int(1)),
            )
        };

        let e = ident(&entry);
        let l = ident(&length);
        let target = index(self.id(&self.h.pool), add(p.clone(), int(1)));
        let tags = &pool.tags;

        vec![
            local(&entry, fetch),
            local_many(&[length.as_str(), tag.as_str()], vec![]),
            self.xor_into(l.clone(), index(e.clone(), int(1)), key_at(p)),
            self.xor_into(
                ident(&tag),
                index(e.clone(), int(2)),
                key_at(add(l.clone(), int(1))),
            ),
            local(&text, str("")),
            numeric_for(
                &j,
                int(1),
                l.clone(),
                vec![
                    local_many(&[byte.as_str()], vec![]),
                    self.xor_into(
                        ident(&byte),
                        index(e, add(int(2), ident(&j))),
                        key_at(add(add(l, ident(&j)), int(1))),
                    ),
                    assign(
                        ident(&text),
                        crate::ast::build::binary(
                            crate::ast::BinaryOp::Concat,
                            ident(&text),
                            call(self.id(&self.h.chr), vec![ident(&byte)]),
                        ),
                    ),
                ],
            ),
            if_chain(
                vec![
                    (
                        eq(ident(&tag), int(tags.number as i64)),
                        vec![assign(
                            target.clone(),
                            call(self.id(&self.h.tonumber), vec![ident(&text)]),
                        )],
                    ),
                    (
                        eq(ident(&tag), int(tags.string as i64)),
                        vec![assign(target.clone(), ident(&text))],
                    ),
                    (
                        eq(ident(&tag), int(tags.boolean as i64)),
                        vec![assign(target, eq(ident(&text), str("1")))],
                    ),
                ],
                None,
            ),
        ]
    }

    /// Statements making `K[p + 1]` available, decoding on first use when
    /// the pool is lazy.
    pub(super) fn ensure_constant(&mut self, p: Expr) -> Vec<Stmt> {
        let obf = self.obf;
        let ConstPool::Encrypted(pool) = &obf.pool else {
            return Vec::new();
        };
        if !self.lazy_pool() {
            return Vec::new();
        }
        let done = index(self.id(&self.h.pool_done), add(p.clone(), int(1)));
        let mut body = self.decode_entry(pool, p);
        body.push(assign(done.clone(), boolean(true)));
        vec![if_then(not(done), body)]
    }

    pub(super) fn constant(&self, p: Expr) -> Expr {
        index(self.id(&self.h.pool), add(p, int(1)))
    }

    fn opcode_map(&mut self, out: &mut Vec<Stmt>) {
        if self.obf.dispatch != Dispatch::Linear || !self.obf.shuffled {
            return;
        }
        let ops = self.used_ops();
        let seed = self.obf.seed.seed;
        let pairs = self.obf.opcodes.masked_pairs(seed, &ops, self.rng);
        let flat = pairs.iter().flat_map(|&(c, h)| [c, h]);
        let packed = self.fresh();
        let i = self.fresh();
        let code = self.fresh();
        let handler = self.fresh();
        out.push(local(&packed, number_list(flat)));
        out.push(local(&self.h.op_map, table()));

        let s = self.id(&self.h.seed);
        let code_mask = add(mul(int(131), s.clone()), int(7));
        let handler_mask = add(mul(int(61), s), int(29));
        let body = vec![
            local_many(&[code.as_str(), handler.as_str()], vec![]),
            self.xor_into(ident(&code), index(ident(&packed), ident(&i)), code_mask),
            self.xor_into(
                ident(&handler),
                index(ident(&packed), add(ident(&i), int(1))),
                handler_mask,
            ),
            assign(index(self.id(&self.h.op_map), ident(&code)), ident(&handler)),
        ];
        out.push(Stmt::new(
            StmtKind::NumericFor {
                var: i.clone(),
                start: int(1),
                limit: len(ident(&packed)),
                step: Some(int(2)),
                body,
            },
            crate::ast::Span::synthetic(),
        ));
    }

    /// Opcodes present in the program, in ordinal order.
    pub(super) fn used_ops(&self) -> Vec<Opcode> {
        let mut ops: Vec<Opcode> = self.obf.program.instructions.iter().map(|i| i.op).collect();
        ops.sort();
        ops.dedup();
        ops
    }

    fn machine_state(&mut self, out: &mut Vec<Stmt>) {
        let params = self
            .obf
            .program
            .param_names
            .iter()
            .map(|p| ident(p))
            .collect();
        out.push(local_many(
            &[
                self.h.stack.as_str(),
                self.h.top.as_str(),
                self.h.regs.as_str(),
                self.h.vc.as_str(),
            ],
            vec![table(), int(0), list(params), int(0)],
        ));
    }
}

fn constant_expr(constant: &Constant) -> Expr {
    match constant {
        Constant::Nil => crate::ast::Expr::Nil,
        Constant::Bool(b) => boolean(*b),
        Constant::Number(n) => num(*n),
        Constant::Str(s) => bytes(s.clone()),
    }
}
