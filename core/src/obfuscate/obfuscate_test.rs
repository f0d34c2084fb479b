use std::collections::BTreeSet;

use crate::{
    ast::StmtKind,
    obfuscate::{ConstPool, obfuscate},
    options::{Dispatch, Polymorphism, VmOptions},
    parser,
    rng::VeilRng,
    vm::{Program, VmCompiler},
};

fn program() -> Program {
    let chunk = parser::parse(
        "local function f(n)
            local total = 0
            for i = 1, n do total = total + i * 2 end
            print('total', total)
            return total
        end",
    )
    .unwrap();
    let StmtKind::LocalFunction { func, .. } = &chunk.body[0].kind else {
        panic!("expected local function");
    };
    VmCompiler::compile_function(func, &BTreeSet::new()).unwrap()
}

#[test]
fn test_linear_stream_decodes_to_program() {
    let options = VmOptions::default();
    let mut rng = VeilRng::from_seed_str("ob");
    let out = obfuscate(&program(), &options, &mut rng);
    let stream = out.stream.as_ref().unwrap();
    assert_eq!(stream.instruction_count(), out.instruction_count());

    for (pc, instr) in out.program.instructions.iter().enumerate() {
        let key = out.key_for(pc);
        let [op, a, b] = stream.fetch(pc).unwrap();
        assert_eq!(op ^ key, out.opcodes.code(instr.op));
        assert_eq!(a ^ key, instr.a);
        assert_eq!(b ^ key, instr.b);
    }
}

#[test]
fn test_stream_is_not_plain() {
    let plain = program();
    let mut rng = VeilRng::from_seed_str("ob");
    let out = obfuscate(&plain, &VmOptions::default(), &mut rng);
    let stored: BTreeSet<[u32; 3]> = out.fields.iter().copied().collect();
    for instr in &plain.instructions {
        assert!(
            !stored.contains(&instr.fields()),
            "{:?} is stored in the clear",
            instr
        );
    }
    assert!(matches!(out.pool, ConstPool::Encrypted(_)));
}

#[test]
fn test_everything_off_is_transparent() {
    let options = VmOptions {
        opcode_shuffle: false,
        runtime_key: false,
        stream_split: false,
        fake_instructions: false,
        const_encryption: false,
        ..VmOptions::default()
    };
    let plain = program();
    let mut rng = VeilRng::from_seed_str("ob");
    let out = obfuscate(&plain, &options, &mut rng);
    assert_eq!(out.program, plain);
    assert!(out.keys.is_none());
    assert!(!out.shuffled);
    let expected: Vec<[u32; 3]> = plain.instructions.iter().map(|i| i.fields()).collect();
    assert_eq!(out.fields, expected);
    assert_eq!(out.pool, ConstPool::Plain(plain.constants.clone()));
}

#[test]
fn test_block_dispatch_uses_isa_profile() {
    let options = VmOptions {
        dispatch: Dispatch::Block,
        polymorphism: Polymorphism::Always,
        ..VmOptions::default()
    };
    let mut rng = VeilRng::from_seed_str("ob");
    let out = obfuscate(&program(), &options, &mut rng);
    assert!(out.stream.is_none());
    let isa = out.isa.as_ref().unwrap();
    assert!(isa.enabled);
    assert!(out.program.instructions.iter().any(|i| i.op.is_polymorphic()));
    for (pc, instr) in out.program.instructions.iter().enumerate() {
        assert_eq!(out.fields[pc][0], instr.op.ordinal());
        assert_eq!(out.fields[pc][1] ^ out.key_for(pc), instr.a);
    }
}

#[test]
fn test_same_seed_same_result() {
    let a = obfuscate(&program(), &VmOptions::default(), &mut VeilRng::from_seed_str("s"));
    let b = obfuscate(&program(), &VmOptions::default(), &mut VeilRng::from_seed_str("s"));
    assert_eq!(a.fields, b.fields);
    assert_eq!(a.stream, b.stream);
}
