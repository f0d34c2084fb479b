use super::{format_number, print_block, print_chunk, print_expr};
use crate::ast::build;
use crate::parser::parse;
use indoc::indoc;
use pretty_assertions::assert_eq;

fn reprint(source: &str) -> String {
    print_chunk(&parse(source).unwrap())
}

#[test]
fn test_print_is_stable_under_reparse() {
    let sources = [
        "local x = (1 + 2) * 3 - -4 ^ 2",
        "local y = a .. b .. (c .. d)",
        "local z = (a - b) - (c - d)",
        "local w = 2 ^ 3 ^ 2 + (2 ^ 3) ^ 2",
        "local v = not (a and b) or #t > 0",
        "x, y = y, x",
        "t.a[b]:c(1, 'two', {3, k = 4, [5] = 6})",
        "(f or g)(1)",
        "for i = 10, 1, -1 do print(i) end",
        "for k, v in pairs(t) do if v then break elseif k then continue else goto done end end ::done::",
        "repeat local q = 1 until q",
        "local function f(a, ...) return ... end",
        "function m.n:o() end",
        "x ..= '\\0\\n\\255'",
        "local s = ('').char",
        "return",
    ];
    for source in sources {
        let once = reprint(source);
        let twice = reprint(&once);
        assert_eq!(once, twice, "unstable output for {source:?}");
    }
}

#[test]
fn test_block_layout() {
    let printed = reprint("local function f(n) if n > 1 then return n * f(n - 1) end return 1 end");
    assert_eq!(
        printed,
        indoc! {"
            local function f(n)
                if n > 1 then
                    return n * f(n - 1)
                end
                return 1
            end
        "}
    );
}

#[test]
fn test_minimal_parentheses() {
    use build::{add, ident, int, mul, sub};
    use crate::ast::{BinaryOp, UnaryOp};

    assert_eq!(print_expr(&mul(add(int(1), int(2)), int(3))), "(1 + 2) * 3");
    assert_eq!(print_expr(&add(int(1), mul(int(2), int(3)))), "1 + 2 * 3");
    assert_eq!(print_expr(&sub(ident("a"), sub(ident("b"), ident("c")))), "a - (b - c)");
    assert_eq!(print_expr(&sub(sub(ident("a"), ident("b")), ident("c"))), "a - b - c");
    let concat = |l, r| build::binary(BinaryOp::Concat, l, r);
    assert_eq!(
        print_expr(&concat(concat(ident("a"), ident("b")), ident("c"))),
        "(a .. b) .. c"
    );
    let neg = |e| build::unary(UnaryOp::Neg, e);
    assert_eq!(print_expr(&neg(neg(ident("x")))), "- -x");
    assert_eq!(reprint("return (1 + 2) * 3"), "return (1 + 2) * 3\n");
}

#[test]
fn test_numbers() {
    assert_eq!(format_number(3.0), "3");
    assert_eq!(format_number(0.5), "0.5");
    assert_eq!(format_number(-2.0), "(-2)");
    assert_eq!(format_number(f64::INFINITY), "1e999");
    assert_eq!(format_number(1e300), "1e300");
    assert_eq!(format_number(f64::NAN), "(0/0)");
}

#[test]
fn test_synthesized_nodes() {
    let stmts = vec![
        build::local("E", build::or(build::ident("getfenv"), build::ident("_ENV"))),
        build::call_stmt(
            build::member(build::str(""), "char"),
            vec![build::int(72), build::int(-1)],
        ),
    ];
    assert_eq!(
        print_block(&stmts),
        "local E = getfenv or _ENV\n;(\"\").char(72, (-1))\n"
    );
    assert_eq!(
        print_expr(&build::bytes(vec![b'"', 7, b'a'])),
        "\"\\\"\\007a\""
    );
}
