use super::{ParseErrorKind, parse};
use crate::ast::{BinaryOp, Expr, StmtKind, TableField, UnaryOp};
use pretty_assertions::assert_eq;

fn first_stmt(source: &str) -> StmtKind {
    let chunk = parse(source).unwrap();
    chunk.body.into_iter().next().unwrap().kind
}

fn returned(source: &str) -> Expr {
    match first_stmt(&format!("return {}", source)) {
        StmtKind::Return(mut values) => values.remove(0),
        other => panic!("expected return, got {:?}", other),
    }
}

#[test]
fn test_valid_chunks() {
    let examples = [
        "",
        "local x = 1",
        "local a, b",
        "x, y = y, x",
        "t.a.b[c] = 1",
        "f()",
        "f 'str'",
        "f { 1, 2 }",
        "obj:method(1)",
        "obj:method 'a'",
        "do end",
        "while x do x = x - 1 end",
        "repeat x = x + 1 until x > 10",
        "if a then elseif b then else end",
        "for i = 1, 10 do end",
        "for i = 10, 1, -1 do end",
        "for k, v in pairs(t) do end",
        "function a.b.c:d(x, y) end",
        "local function f(...) return ... end",
        "goto done ::done::",
        "while true do continue end",
        "x += 1 x -= 1 x *= 2 x /= 2 x //= 2 x %= 3 x ^= 2 x ..= 's'",
        "return",
        "return 1, 2;",
        "local s = [[long\nstring]]",
        "local s = [==[with ]] inside]==]",
        "-- comment\nlocal x = 1 --[[ block\ncomment ]] local y = 2",
        "local t = { [1] = 'a', b = 2, 3; 4, }",
        "local x = 0xFF + 1e3 + .5 + 3.",
        "local localx = 1 local iffy = 2 local done_ = 3",
        "f()()",
        "(f)()",
        "local x = #t + -y ^ 2",
        "local x = not a == b",
        ";;",
    ];
    for source in examples {
        assert!(parse(source).is_ok(), "failed to parse: {source:?}");
    }
}

#[test]
fn test_invalid_chunks() {
    let examples = [
        "local",
        "x + 1",
        "f() = 1",
        "(x) = 1",
        "if x then",
        "return 1 x = 2",
        "local 1 = 2",
        "x = 'unterminated",
        "local end = 1",
        "local continue = 1",
    ];
    for source in examples {
        assert!(parse(source).is_err(), "should have failed: {source:?}");
    }
}

#[test]
fn test_precedence() {
    // 1 + (2 * 3)
    assert_eq!(
        returned("1 + 2 * 3"),
        Expr::Binary {
            op: BinaryOp::Add,
            left: Box::new(Expr::Number(1.0)),
            right: Box::new(Expr::Binary {
                op: BinaryOp::Mul,
                left: Box::new(Expr::Number(2.0)),
                right: Box::new(Expr::Number(3.0)),
            }),
        }
    );

    // -(x ^ 2)
    assert_eq!(
        returned("-x ^ 2"),
        Expr::Unary {
            op: UnaryOp::Neg,
            expr: Box::new(Expr::Binary {
                op: BinaryOp::Pow,
                left: Box::new(Expr::Ident("x".to_string())),
                right: Box::new(Expr::Number(2.0)),
            }),
        }
    );

    // a .. (b .. c)
    match returned("a .. b .. c") {
        Expr::Binary {
            op: BinaryOp::Concat,
            right,
            ..
        } => assert!(matches!(
            *right,
            Expr::Binary {
                op: BinaryOp::Concat,
                ..
            }
        )),
        other => panic!("unexpected {:?}", other),
    }

    // (a or (b and c))
    match returned("a or b and c") {
        Expr::Binary {
            op: BinaryOp::Or,
            right,
            ..
        } => assert!(matches!(*right, Expr::Binary { op: BinaryOp::And, .. })),
        other => panic!("unexpected {:?}", other),
    }

    // (not a) == b
    match returned("not a == b") {
        Expr::Binary {
            op: BinaryOp::Eq,
            left,
            ..
        } => assert!(matches!(*left, Expr::Unary { op: UnaryOp::Not, .. })),
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_string_literals() {
    assert_eq!(returned(r#""a\65\x42""#), Expr::Str(b"aAB".to_vec()));
    assert_eq!(returned("[[\nline]]"), Expr::Str(b"line".to_vec()));
    assert_eq!(returned("[=[a]]b]=]"), Expr::Str(b"a]]b".to_vec()));
}

#[test]
fn test_invalid_escape_is_reported() {
    let err = parse(r#"return "\q""#).unwrap_err();
    assert_eq!(
        err.kind,
        ParseErrorKind::InvalidEscape {
            text: r"\q".to_string()
        }
    );
}

#[test]
fn test_numbers() {
    assert_eq!(returned("0x10"), Expr::Number(16.0));
    assert_eq!(returned("1e2"), Expr::Number(100.0));
    assert_eq!(returned(".25"), Expr::Number(0.25));
}

#[test]
fn test_method_call_and_table_fields() {
    match returned("t:m { x = 1, [k] = 2, 3 }") {
        Expr::MethodCall { method, args, .. } => {
            assert_eq!(method, "m");
            match &args[0] {
                Expr::Table(fields) => {
                    assert!(matches!(fields[0], TableField::Named(ref n, _) if n == "x"));
                    assert!(matches!(fields[1], TableField::Keyed(..)));
                    assert!(matches!(fields[2], TableField::Positional(..)));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_function_statements() {
    match first_stmt("function a.b:c(x, ...) end") {
        StmtKind::Function { name, func } => {
            assert_eq!(name.display(), "a.b:c");
            assert_eq!(func.params, vec!["x".to_string()]);
            assert!(func.is_vararg);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_generic_and_numeric_for() {
    match first_stmt("for i = 1, 3, 2 do end") {
        StmtKind::NumericFor { var, step, .. } => {
            assert_eq!(var, "i");
            assert_eq!(step, Some(Expr::Number(2.0)));
        }
        other => panic!("unexpected {:?}", other),
    }
    match first_stmt("for k, v in next, t do end") {
        StmtKind::GenericFor { vars, exprs, .. } => {
            assert_eq!(vars, vec!["k".to_string(), "v".to_string()]);
            assert_eq!(exprs.len(), 2);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_statement_spans_point_into_source() {
    let source = "local a = 1\nprint(a)";
    let chunk = parse(source).unwrap();
    assert_eq!(chunk.body[1].span.str_of(source), "print(a)");
}
