//! Linear dispatch: one fetch-decode loop over the sliced stream and a flat
//! handler chain.

use crate::{
    ast::{
        Expr, Stmt,
        build::{
            add, assign, call, div, eq, ident, if_chain, index, int, list, local, local_many,
            modulo, mul, sub, while_loop,
        },
    },
    codegen::{Gen, handlers::Flow},
    obfuscate::StreamChunk,
};

impl Gen<'_> {
    pub(super) fn linear(&mut self) -> Vec<Stmt> {
        let obf = self.obf;
        let Some(stream) = &obf.stream else {
            return Vec::new();
        };
        let pc = self.id(&self.h.pc);
        let chunk_size = int(stream.chunk_size as i64);
        let logical = self.fresh();
        let chunk = self.fresh();
        let base = self.fresh();

        let mut body = vec![
            // lc = (pc - pc % CS) / CS
            local(
                &logical,
                div(sub(pc.clone(), modulo(pc.clone(), chunk_size.clone())), chunk_size.clone()),
            ),
            local(
                &chunk,
                index(
                    self.id(&self.h.chunks),
                    index(self.id(&self.h.order), add(ident(&logical), int(1))),
                ),
            ),
            local(
                &base,
                mul(sub(pc.clone(), mul(ident(&logical), chunk_size)), int(3)),
            ),
        ];

        let names = [self.h.op.clone(), self.h.a.clone(), self.h.b.clone()];
        let fields: Vec<Expr> = match stream.chunks.first() {
            Some(StreamChunk::Bytes(_)) => {
                let raw = self.fresh();
                let at = |i: i64| index(ident(&raw), int(i));
                body.push(local(
                    &raw,
                    list(vec![call(
                        self.id(&self.h.byte),
                        vec![
                            ident(&chunk),
                            add(mul(ident(&base), int(4)), int(1)),
                            add(mul(ident(&base), int(4)), int(12)),
                        ],
                    )]),
                ));
                (0..3)
                    .map(|f| {
                        let o = f * 4;
                        let mut value = at(o + 1);
                        for k in 2..=4 {
                            value = add(mul(value, int(256)), at(o + k));
                        }
                        value
                    })
                    .collect()
            }
            _ => (1..=3)
                .map(|f| index(ident(&chunk), add(ident(&base), int(f))))
                .collect(),
        };
        body.push(local_many(
            &[names[0].as_str(), names[1].as_str(), names[2].as_str()],
            fields,
        ));

        if obf.keys.is_some() {
            let key = self.fresh();
            body.push(local(&key, self.key_at(pc.clone())));
            for name in &names {
                body.push(self.xor_into(ident(name), ident(name), ident(&key)));
            }
        }
        if obf.shuffled {
            body.push(assign(
                self.id(&self.h.op),
                index(self.id(&self.h.op_map), self.id(&self.h.op)),
            ));
        }
        body.push(assign(pc.clone(), add(pc.clone(), int(1))));
        body.push(self.handler_chain());

        vec![
            local(&self.h.pc, int(0)),
            while_loop(Expr::True, body),
        ]
    }

    fn handler_chain(&mut self) -> Stmt {
        let mut ops = self.used_ops();
        self.rng.shuffle(&mut ops);
        let mut clauses = Vec::with_capacity(ops.len());
        for op in ops {
            let number = self.obf.opcodes.handler(op);
            let body = self.handler(op, Flow::Linear, None);
            clauses.push((eq(self.id(&self.h.op), int(number as i64)), body));
        }
        if_chain(clauses, None)
    }
}
