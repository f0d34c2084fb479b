//! ISA polymorphism for block dispatch.

use crate::{
    obfuscate::keys::StoredKey,
    options::{DispatchGraph, Polymorphism, StackProtocol, VmOptions},
    rng::VeilRng,
    vm::Program,
};

/// Schedule positions the operand keys are stored under.
pub const KEY_A_POSITION: u32 = 5;
pub const KEY_B_POSITION: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Direct,
    Api,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Graph {
    Tree,
    Sparse,
}

/// The per-program shape of a block-dispatched interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsaProfile {
    /// Whether `_X` variants were introduced.
    pub enabled: bool,
    pub key_a: StoredKey,
    pub key_b: StoredKey,
    pub stack_protocol: Protocol,
    pub dispatch_graph: Graph,
    pub fake_edges: bool,
}

impl IsaProfile {
    pub fn generate(options: &VmOptions, seed: u32, rng: &mut VeilRng) -> Self {
        let enabled = match options.polymorphism {
            Polymorphism::Off => false,
            Polymorphism::Always => true,
            Polymorphism::Random => rng.chance(options.polymorphism_probability),
        };
        let stack_protocol = match options.stack_protocol {
            StackProtocol::Direct => Protocol::Direct,
            StackProtocol::Api => Protocol::Api,
            StackProtocol::Random if rng.coin() => Protocol::Api,
            StackProtocol::Random => Protocol::Direct,
        };
        let dispatch_graph = match options.dispatch_graph {
            DispatchGraph::Tree => Graph::Tree,
            DispatchGraph::Sparse => Graph::Sparse,
            DispatchGraph::Random if rng.coin() => Graph::Sparse,
            DispatchGraph::Random => Graph::Tree,
        };
        Self {
            enabled,
            key_a: StoredKey::generate(rng, seed, KEY_A_POSITION),
            key_b: StoredKey::generate(rng, seed, KEY_B_POSITION),
            stack_protocol,
            dispatch_graph,
            fake_edges: options.fake_edges,
        }
    }
}

/// Rewrite eligible instructions to their `_X` variants with masked operands.
///
/// With [`Polymorphism::Always`] every eligible instruction is rewritten,
/// otherwise each one is picked by a coin flip.
pub fn polymorph(
    program: &Program,
    profile: &IsaProfile,
    mode: Polymorphism,
    rng: &mut VeilRng,
) -> Program {
    let mut out = program.clone();
    if !profile.enabled {
        return out;
    }
    for instr in out.instructions.iter_mut() {
        let Some(variant) = instr.op.polymorphic() else {
            continue;
        };
        if mode == Polymorphism::Always || rng.coin() {
            instr.op = variant;
            instr.a ^= profile.key_a.key;
            instr.b ^= profile.key_b.key;
        }
    }
    out
}
