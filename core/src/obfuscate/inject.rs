//! Fake-instruction injection.

use crate::{
    rng::VeilRng,
    vm::{Instruction, Opcode, Program},
};

/// Insert stack-neutral filler before random instructions.
///
/// Each original instruction is preceded by a filler sequence with
/// probability `density`. Jump targets are remapped so a jump to `i` lands
/// at the start of whatever now precedes `i`.
pub fn inject_fakes(program: &Program, density: f64, rng: &mut VeilRng) -> Program {
    let old = &program.instructions;
    let mut instructions = Vec::with_capacity(old.len() + old.len() / 2);
    let mut remap = Vec::with_capacity(old.len());

    for instr in old {
        remap.push(instructions.len() as u32);
        if rng.chance(density) {
            instructions.extend(filler(program.constants.len(), rng));
        }
        instructions.push(*instr);
    }

    for instr in instructions.iter_mut() {
        if instr.op.is_jump() {
            instr.a = remap[instr.a as usize];
        }
    }

    Program {
        instructions,
        ..program.clone()
    }
}

fn filler(constant_count: usize, rng: &mut VeilRng) -> Vec<Instruction> {
    let choice = if constant_count == 0 {
        rng.below(2)
    } else {
        rng.below(3)
    };
    match choice {
        0 => vec![Instruction::new(Opcode::Nop, 0, 0)],
        1 => vec![
            Instruction::new(Opcode::PushNil, 0, 0),
            Instruction::new(Opcode::Pop, 0, 0),
        ],
        _ => vec![
            Instruction::new(Opcode::PushConst, rng.below(constant_count) as u32, 0),
            Instruction::new(Opcode::Pop, 0, 0),
        ],
    }
}
