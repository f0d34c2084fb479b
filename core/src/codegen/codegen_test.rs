//! Tests for the interpreter generator.

use std::collections::BTreeSet;

use crate::{
    ast::{
        Expr, FunctionBody, StmtKind,
        walk::{self, Visitor},
    },
    codegen::{RenderContext, render, render_source},
    obfuscate::obfuscate,
    options::{Dispatch, DispatchGraph, PoolPlacement, StackProtocol, VmOptions},
    parser,
    rng::VeilRng,
    vm::VmCompiler,
};

const SOURCE: &str = r#"
local function demo(a, b)
    local total = 0
    for i = 1, a do
        if i % 2 == 0 then
            total = total + i
        else
            total = total - b
        end
    end
    local parts = { "x", "y", n = 3 }
    print(#parts, total // 2, parts.n)
    return total, tostring(total)
end
"#;

fn render_with(options: &VmOptions, seed: &str) -> String {
    let chunk = parser::parse(SOURCE).unwrap();
    let func = match &chunk.body[0].kind {
        StmtKind::LocalFunction { func, .. } => func.clone(),
        other => panic!("expected a local function, got {:?}", other),
    };
    let outer: BTreeSet<String> = BTreeSet::new();
    let program = VmCompiler::compile_function(&func, &outer).unwrap();
    let mut rng = VeilRng::from_seed_str(seed);
    let obf = obfuscate(&program, options, &mut rng);
    let reserved: BTreeSet<String> = walk::collect_names(&chunk.body).into_iter().collect();
    let ctx = RenderContext::new(reserved, options);
    render_source(&obf, &ctx, &mut rng)
}

#[derive(Default)]
struct Shape {
    functions: usize,
    varargs: usize,
    locals: BTreeSet<String>,
}

impl Visitor for Shape {
    fn visit_stmt(&mut self, stmt: &crate::ast::Stmt) {
        match &stmt.kind {
            StmtKind::Local { names, .. } => self.locals.extend(names.iter().cloned()),
            StmtKind::NumericFor { var, .. } => {
                self.locals.insert(var.clone());
            }
            StmtKind::Function { .. } | StmtKind::LocalFunction { .. } => self.functions += 1,
            _ => {}
        }
        walk::walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Vararg => self.varargs += 1,
            Expr::Function(_) => self.functions += 1,
            _ => {}
        }
        walk::walk_expr(self, expr);
    }

    fn visit_function(&mut self, func: &FunctionBody) {
        walk::walk_block(self, &func.body);
    }
}

fn shape_of(source: &str) -> Shape {
    let chunk = parser::parse(source)
        .unwrap_or_else(|e| panic!("generated code does not parse: {:?}\n{}", e, source));
    let mut shape = Shape::default();
    walk::walk_block(&mut shape, &chunk.body);
    shape
}

fn variants() -> Vec<VmOptions> {
    let base = VmOptions {
        decoy_probability: 1.0,
        ..VmOptions::default()
    };
    vec![
        base.clone(),
        VmOptions {
            stream_bytes: true,
            stream_split: false,
            const_shards: true,
            ..base.clone()
        },
        VmOptions {
            pool_placement: PoolPlacement::Lazy,
            opcode_shuffle: false,
            runtime_key: false,
            ..base.clone()
        },
        VmOptions {
            dispatch: Dispatch::Block,
            dispatch_graph: DispatchGraph::Tree,
            stack_protocol: StackProtocol::Direct,
            ..base.clone()
        },
        VmOptions {
            dispatch: Dispatch::Block,
            dispatch_graph: DispatchGraph::Sparse,
            stack_protocol: StackProtocol::Api,
            const_encryption: false,
            ..base
        },
    ]
}

#[test]
fn test_rendered_interpreter_parses() {
    for options in variants() {
        let source = render_with(&options, "parse");
        let shape = shape_of(&source);
        assert_eq!(shape.functions, 0, "function literal in\n{}", source);
        assert_eq!(shape.varargs, 0, "vararg in\n{}", source);
    }
}

#[test]
fn test_generated_locals_avoid_user_names() {
    let chunk = parser::parse(SOURCE).unwrap();
    let user: BTreeSet<String> = walk::collect_names(&chunk.body).into_iter().collect();
    for options in variants() {
        let shape = shape_of(&render_with(&options, "names"));
        let clashes: Vec<_> = shape.locals.intersection(&user).collect();
        assert!(clashes.is_empty(), "clashing locals: {:?}", clashes);
    }
}

#[test]
fn test_same_seed_same_text() {
    for options in variants() {
        assert_eq!(render_with(&options, "same"), render_with(&options, "same"));
    }
}

#[test]
fn test_different_seeds_differ() {
    let options = VmOptions::default();
    assert_ne!(render_with(&options, "one"), render_with(&options, "two"));
}

#[test]
fn test_library_names_are_not_spelled_out() {
    let source = render_with(&VmOptions::default(), "libs");
    assert!(!source.contains("bit32"));
    assert!(!source.contains("unpack"));
    assert!(source.contains("getfenv"));
}

#[test]
fn test_user_strings_hidden_by_encryption() {
    let source = render_with(&VmOptions::default(), "strings");
    assert!(!source.contains("tostring"));
    assert!(!source.contains("print"));

    let plain = VmOptions {
        const_encryption: false,
        ..VmOptions::default()
    };
    assert!(render_with(&plain, "strings").contains("\"tostring\""));
}

#[test]
fn test_render_returns_statements() {
    let chunk = parser::parse("local function f(x) return x end").unwrap();
    let StmtKind::LocalFunction { func, .. } = &chunk.body[0].kind else {
        panic!("expected a local function");
    };
    let program = VmCompiler::compile_function(func, &BTreeSet::new()).unwrap();
    let options = VmOptions::default();
    let mut rng = VeilRng::from_seed_str("stmts");
    let obf = obfuscate(&program, &options, &mut rng);
    let ctx = RenderContext::new(BTreeSet::from(["f".to_string(), "x".to_string()]), &options);
    let body = render(&obf, &ctx, &mut rng);
    assert!(matches!(
        body.last().map(|s| &s.kind),
        Some(StmtKind::While { .. })
    ));
}
