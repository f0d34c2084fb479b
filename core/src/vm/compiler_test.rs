//! Tests for the VM compiler.

use std::collections::BTreeSet;

use crate::{
    ast::{FunctionBody, StmtKind},
    parser,
    vm::{CompileError, Constant, Instruction, Opcode, Program, VmCompiler},
};

use Opcode::*;

fn first_function(source: &str) -> FunctionBody {
    let chunk = parser::parse(source).unwrap();
    match chunk.body.into_iter().next().map(|s| s.kind) {
        Some(StmtKind::LocalFunction { func, .. }) | Some(StmtKind::Function { func, .. }) => func,
        other => panic!("expected a function statement, got {:?}", other),
    }
}

fn compile(source: &str) -> Result<Program, CompileError> {
    VmCompiler::compile_function(&first_function(source), &BTreeSet::new())
}

fn ops(program: &Program) -> Vec<Opcode> {
    program.instructions.iter().map(|i| i.op).collect()
}

#[test]
fn test_compile_addition() {
    let program = compile("local function f(a, b) return a + b end").unwrap();
    assert_eq!(
        program.instructions,
        vec![
            Instruction::new(PushLocal, 1, 0),
            Instruction::new(PushLocal, 2, 0),
            Instruction::new(Add, 0, 0),
            Instruction::new(Return, 1, 0),
            Instruction::new(Return, 0, 0),
        ]
    );
    assert_eq!(program.param_names, vec!["a", "b"]);
    assert_eq!(program.local_count, 2);
    assert!(program.validate().is_ok());
}

#[test]
fn test_constants_are_deduplicated() {
    let program = compile("local function f() local x = 1 + 1 print(x, 'hi', 'hi') end").unwrap();
    assert_eq!(
        program.constants,
        vec![
            Constant::Number(1.0),
            Constant::Str(b"print".to_vec()),
            Constant::Str(b"hi".to_vec()),
        ]
    );
}

#[test]
fn test_globals_and_outer_names() {
    let func = first_function("local function f() g = counter + 1 end");
    let outer: BTreeSet<String> = ["counter".to_string()].into();
    let program = VmCompiler::compile_function(&func, &outer).unwrap();
    assert_eq!(program.outer_names, vec!["counter"]);
    assert_eq!(
        ops(&program),
        vec![PushOuter, PushConst, Add, StoreGlobal, Return]
    );
}

#[test]
fn test_local_shadows_outer() {
    let func = first_function("local function f() local counter = 2 return counter end");
    let outer: BTreeSet<String> = ["counter".to_string()].into();
    let program = VmCompiler::compile_function(&func, &outer).unwrap();
    assert!(program.outer_names.is_empty());
}

#[test]
fn test_local_without_value_stores_nil() {
    let program = compile("local function f() while true do local x end end").unwrap();
    assert_eq!(
        &program.instructions[2..4],
        &[
            Instruction::new(PushNil, 0, 0),
            Instruction::new(StoreLocal, 1, 0)
        ]
    );
}

#[test]
fn test_multi_assignment_goes_through_table() {
    let program = compile("local function f(a, b) a, b = b, a end").unwrap();
    assert_eq!(
        ops(&program),
        vec![
            NewTable, Dup, PushConst, PushLocal, SetTable, Dup, PushConst, PushLocal, SetTable,
            StoreLocal, PushLocal, PushConst, GetTable, StoreLocal, PushLocal, PushConst,
            GetTable, StoreLocal, Return,
        ]
    );
    assert_eq!(program.local_count, 3);
}

#[test]
fn test_multi_value_tail_sets_vc() {
    let program = compile("local function f() return 1, g() end").unwrap();
    assert_eq!(
        &program.instructions[1..],
        &[
            Instruction::new(PushGlobal, 1, 0),
            Instruction::new(Call, 0, 0),
            Instruction::new(ReturnV, 1, 0),
            Instruction::new(Return, 0, 0),
        ]
    );

    let program = compile("local function f() print(1, g()) end").unwrap();
    assert!(program.instructions.contains(&Instruction::new(CallV, 1, 1)));

    let program = compile("local function f() return {1, g()} end").unwrap();
    assert!(program.instructions.contains(&Instruction::new(SetListV, 2, 0)));
}

#[test]
fn test_parenthesized_call_truncates() {
    let program = compile("local function f() return (g()) end").unwrap();
    assert_eq!(program.instructions[1], Instruction::new(Call, 0, 2));
    assert_eq!(program.instructions[2], Instruction::new(Return, 1, 0));
}

#[test]
fn test_method_call_layout() {
    let program = compile("local function f(o) o:m(1) end").unwrap();
    assert_eq!(
        ops(&program),
        vec![PushLocal, Dup, PushConst, GetTable, Swap, PushConst, Call, Return]
    );
    assert_eq!(program.instructions[6], Instruction::new(Call, 2, 1));
}

#[test]
fn test_short_circuit() {
    let program = compile("local function f(a, b) return a and b end").unwrap();
    assert_eq!(
        program.instructions[..5],
        [
            Instruction::new(PushLocal, 1, 0),
            Instruction::new(Dup, 0, 0),
            Instruction::new(JmpIfFalse, 5, 0),
            Instruction::new(Pop, 0, 0),
            Instruction::new(PushLocal, 2, 0),
        ]
    );
}

#[test]
fn test_jump_targets_are_resolved() {
    let source = "local function f(n)
        local s = 0
        for i = 1, n do
            if i % 2 == 0 then continue end
            s += i
        end
        for k, v in pairs({}) do break end
        repeat n -= 1 until n < 0
        while n < 5 do n = n + 1 end
        return s
    end";
    let program = compile(source).unwrap();
    assert!(program.validate().is_ok(), "{:?}", program);
    assert!(ops(&program).iter().any(|op| *op == Ge));
}

#[test]
fn test_goto_and_labels() {
    let program = compile(
        "local function f(n)
            ::top::
            n = n - 1
            if n > 0 then goto top end
        end",
    )
    .unwrap();
    assert!(program.instructions.contains(&Instruction::new(Jmp, 0, 0)));
}

#[test]
fn test_compound_index_evaluates_once() {
    let program = compile("local function f(t) t[g()] += 1 end").unwrap();
    let calls = ops(&program).iter().filter(|op| **op == Call).count();
    assert_eq!(calls, 1);
}

#[test]
fn test_chunk_slice_halts() {
    let chunk = parser::parse("x = 1 print(x)").unwrap();
    let program = VmCompiler::compile_chunk(&chunk.body, &BTreeSet::new()).unwrap();
    assert_eq!(
        program.instructions.last(),
        Some(&Instruction::new(Return, 0, 1))
    );
}

#[test]
fn test_rejects_vararg() {
    assert!(matches!(
        compile("local function f(...) return 1 end"),
        Err(CompileError::Vararg { .. })
    ));
    assert!(matches!(
        compile("local function f(a) return ... end"),
        Err(CompileError::Vararg { .. })
    ));
}

#[test]
fn test_rejects_nested_function() {
    assert!(matches!(
        compile("local function f() return function() end end"),
        Err(CompileError::NestedFunction { .. })
    ));
    assert!(matches!(
        compile("local function f() local function g() end end"),
        Err(CompileError::NestedFunction { .. })
    ));
}

#[test]
fn test_rejects_loop_control_outside_loop() {
    assert!(matches!(
        compile("local function f() break end"),
        Err(CompileError::BreakOutsideLoop { .. })
    ));
    assert!(matches!(
        compile("local function f() continue end"),
        Err(CompileError::ContinueOutsideLoop { .. })
    ));
}

#[test]
fn test_rejects_bad_labels() {
    assert!(matches!(
        compile("local function f() goto nowhere end"),
        Err(CompileError::UnresolvedGoto { .. })
    ));
    assert!(matches!(
        compile("local function f() ::a:: ::a:: end"),
        Err(CompileError::DuplicateLabel { .. })
    ));
}

#[test]
fn test_error_carries_statement_span() {
    let source = "local function f()\n  local x = 1\n  return ...\nend";
    let err = compile(source).unwrap_err();
    let span = err.span().unwrap();
    assert_eq!(span.str_of(source), "return ...");
}
