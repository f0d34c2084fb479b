//! A second interpreter-looking loop behind a guard that never holds.

use crate::{
    ast::{
        BinaryOp, Stmt,
        build::{
            add, assign, binary, bytes, call, gt, ident, if_then, increment, index, int, len, list,
            local, local_many, modulo, mul, numeric_for, while_loop,
        },
    },
    codegen::Gen,
};

impl Gen<'_> {
    /// `if SEED > 255 then ... end`; the seed is always below 256.
    pub(super) fn decoy(&mut self) -> Stmt {
        let data = self.fresh();
        let cursor = self.fresh();
        let acc = self.fresh();
        let text = self.fresh();
        let i = self.fresh();

        let strings = (0..self.ctx.decoy_size)
            .map(|_| {
                let n = self.rng.range(4, 16);
                bytes((0..n).map(|_| self.rng.range(33, 126) as u8).collect())
            })
            .collect();

        let body = vec![
            local(&data, list(strings)),
            local_many(&[cursor.as_str(), acc.as_str()], vec![int(1), int(0)]),
            while_loop(
                binary(BinaryOp::Le, ident(&cursor), len(ident(&data))),
                vec![
                    local(&text, index(ident(&data), ident(&cursor))),
                    numeric_for(
                        &i,
                        int(1),
                        len(ident(&text)),
                        vec![assign(
                            ident(&acc),
                            modulo(
                                add(
                                    mul(ident(&acc), int(31)),
                                    call(self.id(&self.h.byte), vec![ident(&text), ident(&i)]),
                                ),
                                int(65536),
                            ),
                        )],
                    ),
                    increment(&cursor, 1),
                ],
            ),
            self.set_slot(int(1), ident(&acc)),
        ];
        if_then(gt(self.id(&self.h.seed), int(255)), body)
    }
}
