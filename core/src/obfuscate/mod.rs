//! Bytecode obfuscation layer.
//!
//! Transforms run in a fixed order, each behind its own option:
//!
//! 1. fake-instruction injection
//! 2. ISA polymorphism (block dispatch)
//! 3. opcode permutation (linear dispatch)
//! 4. per-instruction key schedule
//! 5. constant-pool encryption
//! 6. stream slicing (linear dispatch)

pub mod constants;
pub mod inject;
pub mod keys;
pub mod permute;
pub mod polymorph;
pub mod seed;
pub mod slicing;

pub use constants::EncryptedPool;
pub use keys::{KeySchedule, StoredKey};
pub use permute::OpcodeEncoding;
pub use polymorph::{Graph, IsaProfile, Protocol};
pub use seed::SeedState;
pub use slicing::{Stream, StreamChunk};

use crate::{
    options::{Dispatch, VmOptions},
    rng::VeilRng,
    vm::{Constant, Program},
};

#[derive(Debug, Clone, PartialEq)]
pub enum ConstPool {
    Plain(Vec<Constant>),
    Encrypted(EncryptedPool),
}

impl ConstPool {
    pub fn len(&self) -> usize {
        match self {
            ConstPool::Plain(constants) => constants.len(),
            ConstPool::Encrypted(pool) => pool.entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything the source generator needs to emit an interpreter.
#[derive(Debug, Clone)]
pub struct Obfuscated {
    pub dispatch: Dispatch,
    /// The program after injection and polymorphism, operands unmasked by
    /// the key schedule.
    pub program: Program,
    pub seed: SeedState,
    pub keys: Option<KeySchedule>,
    pub opcodes: OpcodeEncoding,
    /// Whether `opcodes` is a real permutation that must be shipped.
    pub shuffled: bool,
    pub isa: Option<IsaProfile>,
    /// Per logical instruction `(op, a, b)` as stored: encoded opcode (linear
    /// only) and schedule-masked operands.
    pub fields: Vec<[u32; 3]>,
    pub pool: ConstPool,
    /// Linear dispatch only.
    pub stream: Option<Stream>,
}

impl Obfuscated {
    pub fn instruction_count(&self) -> usize {
        self.program.instructions.len()
    }

    /// Schedule key of logical instruction `pc`, or 0 without a schedule.
    pub fn key_for(&self, pc: usize) -> u32 {
        self.keys
            .as_ref()
            .map_or(0, |keys| keys.key_for(pc, self.seed.seed))
    }
}

pub fn obfuscate(program: &Program, options: &VmOptions, rng: &mut VeilRng) -> Obfuscated {
    let linear = options.dispatch == Dispatch::Linear;

    let program = if options.fake_instructions {
        inject::inject_fakes(program, options.fake_density, rng)
    } else {
        program.clone()
    };

    let seed = SeedState::generate(rng, program.instructions.len(), program.constants.len());

    let (program, isa) = if linear {
        (program, None)
    } else {
        let profile = IsaProfile::generate(options, seed.seed, rng);
        let program = polymorph::polymorph(&program, &profile, options.polymorphism, rng);
        (program, Some(profile))
    };

    let shuffled = linear && options.opcode_shuffle;
    let opcodes = if shuffled {
        OpcodeEncoding::generate(rng)
    } else {
        OpcodeEncoding::identity()
    };

    let keys = options
        .runtime_key
        .then(|| KeySchedule::generate(rng, seed.seed));

    let fields = program
        .instructions
        .iter()
        .enumerate()
        .map(|(pc, instr)| {
            let key = keys.as_ref().map_or(0, |k| k.key_for(pc, seed.seed));
            let op = if linear {
                opcodes.code(instr.op) ^ key
            } else {
                instr.op.ordinal()
            };
            [op, instr.a ^ key, instr.b ^ key]
        })
        .collect::<Vec<_>>();

    let pool = if options.const_encryption {
        ConstPool::Encrypted(EncryptedPool::encrypt(
            &program.constants,
            seed.seed,
            options.const_shards,
            rng,
        ))
    } else {
        ConstPool::Plain(program.constants.clone())
    };

    let stream = linear.then(|| {
        Stream::build(
            &fields,
            options.stream_split,
            options.stream_bytes,
            rng,
        )
    });

    tracing::trace!(
        instructions = program.instructions.len(),
        seed = seed.seed,
        "obfuscated program"
    );

    Obfuscated {
        dispatch: options.dispatch,
        program,
        seed,
        keys,
        opcodes,
        shuffled,
        isa,
        fields,
        pool,
        stream,
    }
}

#[cfg(test)]
mod obfuscate_test;
