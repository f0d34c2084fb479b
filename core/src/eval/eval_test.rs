//! Unit tests for the evaluator.

use super::*;
use crate::parser;

fn run_with(source: &str, host: HostProfile, limits: EvalLimits) -> Result<Outcome, EvalError> {
    let chunk = parser::parse(source).expect("parsing failed");
    run_chunk(&chunk, host, limits)
}

fn output(source: &str) -> String {
    run_with(source, HostProfile::default(), EvalLimits::default())
        .unwrap()
        .output
}

#[test]
fn test_arithmetic_and_concat() {
    assert_eq!(
        output(r#"print(7 // 2, 7 % 3, -7 % 3, 2 ^ 10, "a" .. "b" .. 1, "10" + 5)"#),
        "3\t1\t2\t1024\tab1\t15\n"
    );
}

#[test]
fn test_return_values() {
    let outcome = run_source("local a, b = 3, 4 return a * b, a - b").unwrap();
    assert_eq!(outcome.values, vec![Value::Number(12.0), Value::Number(-1.0)]);
    assert_eq!(outcome.output, "");
}

#[test]
fn test_closures_share_upvalues() {
    let source = r#"
        local function counter()
            local n = 0
            return function() n = n + 1 return n end
        end
        local c = counter()
        c() c()
        print(c())
    "#;
    assert_eq!(output(source), "3\n");
}

#[test]
fn test_varargs_and_select() {
    let source = r#"
        local function f(...) return select('#', ...), ... end
        print(f(1, nil, 3))
        print(select(2, "a", "b", "c"))
        print(select(-1, "a", "b", "c"))
    "#;
    assert_eq!(output(source), "3\t1\tnil\t3\nb\tc\nc\n");
}

#[test]
fn test_repeat_condition_sees_body_locals() {
    let source = r#"
        local i = 0
        repeat local j = i i = i + 1 until j >= 2
        print(i)
    "#;
    assert_eq!(output(source), "3\n");
}

#[test]
fn test_goto_and_continue() {
    let source = r#"
        local out = ""
        for i = 1, 5 do
            if i == 2 then continue end
            if i == 4 then goto done end
            out = out .. i
        end
        ::done::
        local n = 0
        ::again::
        n = n + 1
        if n < 3 then goto again end
        print(out, n)
    "#;
    assert_eq!(output(source), "13\t3\n");
}

#[test]
fn test_loops() {
    let source = r#"
        local t = {}
        for i = 10, 1, -3 do t[#t + 1] = i end
        local keys = ""
        for k, v in pairs({x = 1, y = 2, 30}) do keys = keys .. tostring(k) end
        local sum = 0
        for _, v in ipairs({4, 5, 6, nil, 7}) do sum = sum + v end
        print(table.concat(t, ","), keys, sum)
    "#;
    assert_eq!(output(source), "10,7,4,1\txy1\t15\n");
}

#[test]
fn test_methods_and_strings() {
    let source = r#"
        local obj = {n = 1}
        function obj:get(k) return self.n + k end
        local s = "hello"
        print(obj:get(2), s:upper(), s:sub(2, 3), #s, s:byte(1), string.char(72, 105))
    "#;
    assert_eq!(output(source), "3\tHELLO\tel\t5\t104\tHi\n");
}

#[test]
fn test_multiple_assignment_stores_left_to_right() {
    let source = r#"
        local t = {}
        local i = 1
        i, t[i] = i + 1, 20
        print(i, t[1], t[2])
    "#;
    assert_eq!(output(source), "2\tnil\t20\n");
}

#[test]
fn test_compound_assignment() {
    let source = r#"
        local t = {a = {5}}
        local s = "x"
        t.a[1] += 2
        s ..= "y"
        print(t.a[1], s)
    "#;
    assert_eq!(output(source), "7\txy\n");
}

#[test]
fn test_pcall_catches_runtime_errors() {
    let source = r#"
        print(pcall(error, "boom"))
        print(pcall(function() local x = nil return x.y end))
        print(pcall(function(a) return a * 2 end, 21))
    "#;
    assert_eq!(
        output(source),
        "false\tboom\nfalse\tattempt to index a nil value\ntrue\t42\n"
    );
}

#[test]
fn test_uncaught_error() {
    let err = run_source("local x = 1 + {}").unwrap_err();
    assert!(matches!(
        err,
        crate::Error::Eval(EvalError::Runtime { ref message }) if message.contains("arithmetic on a table")
    ));
}

#[test]
fn test_step_limit() {
    let limits = EvalLimits {
        max_steps: 1000,
        ..EvalLimits::default()
    };
    let err = run_with("while true do end", HostProfile::default(), limits).unwrap_err();
    assert_eq!(err, EvalError::StepLimit { limit: 1000 });
    assert!(!err.is_catchable());
}

#[test]
fn test_depth_limit_is_not_catchable() {
    let limits = EvalLimits {
        max_depth: 20,
        ..EvalLimits::default()
    };
    let source = "local function f() return f() end print(pcall(f))";
    let err = run_with(source, HostProfile::default(), limits).unwrap_err();
    assert_eq!(err, EvalError::DepthLimit { limit: 20 });
}

#[test]
fn test_host_profiles() {
    let limits = EvalLimits::default();
    let minimal = run_with("print(bit32, table.pack, getfenv ~= nil)", HostProfile::minimal(), limits);
    assert_eq!(minimal.unwrap().output, "nil\tnil\ttrue\n");

    let env_only = run_with("print(getfenv, _ENV.print == print)", HostProfile::env_only(), limits);
    assert_eq!(env_only.unwrap().output, "nil\ttrue\n");

    let default = run_with("print(_ENV, getfenv(0).type == type)", HostProfile::default(), limits);
    assert_eq!(default.unwrap().output, "nil\ttrue\n");
}

#[test]
fn test_library_helpers() {
    let source = r#"
        local p = table.pack(1, nil, 3)
        local t = {1, 2, 3}
        table.insert(t, 1, 0)
        table.remove(t)
        print(p.n, table.concat(t, " "), unpack({7, 8}))
        print(bit32.bxor(5, 3), bit32.band(6, 3), math.max(1, 9, 4), math.floor(-1.5))
        print(string.format("%03d|%s", 7, "x"), tonumber("ff", 16), tonumber("z"))
    "#;
    assert_eq!(output(source), "3\t0 1 2\t7\t8\n6\t2\t9\t-2\n007|x\t255\tnil\n");
}

#[test]
fn test_task_callbacks_run_immediately() {
    let source = r#"
        local log = ""
        task.spawn(function(a) log = log .. a end, "s")
        task.defer(function() log = log .. "d" end)
        task.delay(1, function(a, b) log = log .. a .. b end, "x", "y")
        spawn(function() log = log .. "!" end)
        print(log)
    "#;
    assert_eq!(output(source), "sdxy!\n");
}
