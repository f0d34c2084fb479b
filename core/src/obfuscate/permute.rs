//! Opcode permutation for linear dispatch.

use crate::{rng::VeilRng, vm::Opcode};

/// Bijection from opcodes to a dense random code range, plus the handler
/// number each code dispatches to.
///
/// The interpreter never sees the mapping in the clear: it receives
/// `(code ^ code_mask, handler ^ handler_mask)` pairs with both masks
/// derived from the seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeEncoding {
    pub base: u32,
    /// Indexed by [`Opcode::ordinal`].
    codes: Vec<u32>,
    handlers: Vec<u32>,
}

impl OpcodeEncoding {
    pub fn generate(rng: &mut VeilRng) -> Self {
        let count = Opcode::ALL.len();
        let base = rng.range(1, 200);
        let mut offsets: Vec<u32> = (0..count as u32).collect();
        rng.shuffle(&mut offsets);
        let codes = offsets.into_iter().map(|o| base + o).collect();
        let handlers = rng.distinct(count, 1, 9999);
        Self {
            base,
            codes,
            handlers,
        }
    }

    /// The identity encoding: code and handler are the opcode ordinal.
    pub fn identity() -> Self {
        let ordinals: Vec<u32> = Opcode::ALL.iter().map(|op| op.ordinal()).collect();
        Self {
            base: 0,
            codes: ordinals.clone(),
            handlers: ordinals,
        }
    }

    pub fn code(&self, op: Opcode) -> u32 {
        self.codes[op.ordinal() as usize]
    }

    pub fn handler(&self, op: Opcode) -> u32 {
        self.handlers[op.ordinal() as usize]
    }

    pub fn code_mask(seed: u32) -> u32 {
        seed * 131 + 7
    }

    pub fn handler_mask(seed: u32) -> u32 {
        seed * 61 + 29
    }

    /// Inverse map as shipped: masked `(code, handler)` pairs in random order.
    pub fn masked_pairs(&self, seed: u32, ops: &[Opcode], rng: &mut VeilRng) -> Vec<(u32, u32)> {
        let mut pairs: Vec<(u32, u32)> = ops
            .iter()
            .map(|&op| {
                (
                    self.code(op) ^ Self::code_mask(seed),
                    self.handler(op) ^ Self::handler_mask(seed),
                )
            })
            .collect();
        rng.shuffle(&mut pairs);
        pairs
    }
}
