//! The host library available to evaluated programs.

use std::{cell::RefCell, rc::Rc};

use crate::eval::{
    EvalError, Interpreter,
    value::{Native, Table, TableRef, Value, format_number},
};

type NativeResult = Result<Vec<Value>, EvalError>;

fn library(entries: &[(&str, Native)]) -> TableRef {
    let mut table = Table::new();
    for (name, native) in entries {
        table.set_str(name, Value::Native(*native));
    }
    Rc::new(RefCell::new(table))
}

pub(super) fn install(interp: &mut Interpreter) {
    let host = interp.host;
    let mut globals = interp.globals.borrow_mut();
    for (name, native) in [
        ("print", Native::Print),
        ("type", Native::Type),
        ("tostring", Native::ToString),
        ("tonumber", Native::ToNumber),
        ("pairs", Native::Pairs),
        ("ipairs", Native::IPairs),
        ("next", Native::Next),
        ("select", Native::Select),
        ("error", Native::Error),
        ("assert", Native::Assert),
        ("pcall", Native::PCall),
        ("rawget", Native::RawGet),
        ("rawset", Native::RawSet),
        ("rawequal", Native::RawEqual),
        ("unpack", Native::Unpack),
        ("spawn", Native::TaskSpawn),
        ("delay", Native::TaskDelay),
    ] {
        globals.set_str(name, Value::Native(native));
    }
    if host.getfenv {
        globals.set_str("getfenv", Value::Native(Native::GetFenv));
    }

    let table = library(&[
        ("unpack", Native::Unpack),
        ("insert", Native::TableInsert),
        ("remove", Native::TableRemove),
        ("concat", Native::TableConcat),
    ]);
    if host.table_pack {
        table.borrow_mut().set_str("pack", Value::Native(Native::TablePack));
    }
    globals.set_str("table", Value::Table(table));

    let string = library(&[
        ("char", Native::StringChar),
        ("byte", Native::StringByte),
        ("sub", Native::StringSub),
        ("len", Native::StringLen),
        ("rep", Native::StringRep),
        ("upper", Native::StringUpper),
        ("lower", Native::StringLower),
        ("format", Native::StringFormat),
    ]);
    globals.set_str("string", Value::Table(string.clone()));

    let math = library(&[
        ("floor", Native::MathFloor),
        ("ceil", Native::MathCeil),
        ("abs", Native::MathAbs),
        ("max", Native::MathMax),
        ("min", Native::MathMin),
        ("sqrt", Native::MathSqrt),
        ("fmod", Native::MathFmod),
    ]);
    math.borrow_mut().set_str("huge", Value::Number(f64::INFINITY));
    math.borrow_mut().set_str("pi", Value::Number(std::f64::consts::PI));
    globals.set_str("math", Value::Table(math));

    if host.bit32 {
        let bit32 = library(&[
            ("bxor", Native::BitXor),
            ("band", Native::BitAnd),
            ("bor", Native::BitOr),
        ]);
        globals.set_str("bit32", Value::Table(bit32));
    }

    let task = library(&[
        ("spawn", Native::TaskSpawn),
        ("defer", Native::TaskSpawn),
        ("delay", Native::TaskDelay),
        ("wait", Native::TaskWait),
    ]);
    globals.set_str("task", Value::Table(task));

    drop(globals);
    interp.string_lib = string;
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn bad_argument(i: usize, name: &str, expected: &str, got: &Value) -> EvalError {
    EvalError::runtime(format!(
        "bad argument #{} to '{}' ({} expected, got {})",
        i + 1,
        name,
        expected,
        got.type_name()
    ))
}

fn number(args: &[Value], i: usize, name: &str) -> Result<f64, EvalError> {
    let value = arg(args, i);
    value
        .to_number()
        .ok_or_else(|| bad_argument(i, name, "number", &value))
}

fn opt_number(args: &[Value], i: usize, name: &str, default: f64) -> Result<f64, EvalError> {
    if arg(args, i).is_nil() {
        Ok(default)
    } else {
        number(args, i, name)
    }
}

fn integer(args: &[Value], i: usize, name: &str) -> Result<i64, EvalError> {
    Ok(number(args, i, name)?.floor() as i64)
}

fn opt_integer(args: &[Value], i: usize, name: &str, default: i64) -> Result<i64, EvalError> {
    Ok(opt_number(args, i, name, default as f64)?.floor() as i64)
}

fn string(args: &[Value], i: usize, name: &str) -> Result<Vec<u8>, EvalError> {
    match arg(args, i) {
        value @ (Value::Str(_) | Value::Number(_)) => Ok(value.to_text()),
        other => Err(bad_argument(i, name, "string", &other)),
    }
}

fn table(args: &[Value], i: usize, name: &str) -> Result<TableRef, EvalError> {
    match arg(args, i) {
        Value::Table(t) => Ok(t),
        other => Err(bad_argument(i, name, "table", &other)),
    }
}

/// 1-based, possibly negative, string position.
fn position(i: i64, len: i64) -> i64 {
    if i < 0 { len + i + 1 } else { i }
}

fn substring(s: &[u8], i: i64, j: i64) -> &[u8] {
    let len = s.len() as i64;
    let start = position(i, len).max(1);
    let end = position(j, len).min(len);
    if start > end {
        &[]
    } else {
        &s[(start - 1) as usize..end as usize]
    }
}

fn to_u32(n: f64) -> u32 {
    (n.trunc() as i64).rem_euclid(1 << 32) as u32
}

fn bitwise(args: &[Value], name: &str, identity: u32, op: fn(u32, u32) -> u32) -> NativeResult {
    let mut acc = identity;
    for i in 0..args.len() {
        acc = op(acc, to_u32(number(args, i, name)?));
    }
    Ok(vec![Value::Number(acc as f64)])
}

fn one(value: Value) -> NativeResult {
    Ok(vec![value])
}

pub(super) fn call(interp: &mut Interpreter, native: Native, args: Vec<Value>) -> NativeResult {
    match native {
        Native::Print => {
            let line: Vec<Vec<u8>> = args.iter().map(Value::to_text).collect();
            interp.output.extend(line.join(&b'\t'));
            interp.output.push(b'\n');
            Ok(Vec::new())
        }
        Native::Type => one(Value::str(arg(&args, 0).type_name().as_bytes())),
        Native::ToString => one(Value::str(&arg(&args, 0).to_text())),
        Native::ToNumber => {
            let value = arg(&args, 0);
            if arg(&args, 1).is_nil() {
                return one(value.to_number().map(Value::Number).unwrap_or_default());
            }
            let base = integer(&args, 1, "tonumber")?;
            if !(2..=36).contains(&base) {
                return Err(EvalError::runtime("bad argument #2 to 'tonumber' (base out of range)"));
            }
            let text = String::from_utf8_lossy(&value.to_text()).trim().to_lowercase();
            one(i64::from_str_radix(&text, base as u32)
                .map(|n| Value::Number(n as f64))
                .unwrap_or_default())
        }
        Native::Pairs => {
            let t = table(&args, 0, "pairs")?;
            Ok(vec![Value::Native(Native::Next), Value::Table(t), Value::Nil])
        }
        Native::IPairs => {
            let t = table(&args, 0, "ipairs")?;
            Ok(vec![
                Value::Native(Native::IPairsStep),
                Value::Table(t),
                Value::Number(0.0),
            ])
        }
        Native::IPairsStep => {
            let t = table(&args, 0, "ipairs")?;
            let i = integer(&args, 1, "ipairs")? + 1;
            let value = t.borrow().get_int(i);
            if value.is_nil() {
                one(Value::Nil)
            } else {
                Ok(vec![Value::Number(i as f64), value])
            }
        }
        Native::Next => {
            let t = table(&args, 0, "next")?;
            let entry = t.borrow().next(&arg(&args, 1))?;
            match entry {
                Some((k, v)) => Ok(vec![k, v]),
                None => one(Value::Nil),
            }
        }
        Native::Select => {
            let rest = args.len().saturating_sub(1);
            if let Value::Str(s) = arg(&args, 0) {
                if &*s == b"#" {
                    return one(Value::Number(rest as f64));
                }
            }
            let n = integer(&args, 0, "select")?;
            let start = if n < 0 { rest as i64 + n + 1 } else { n };
            if start < 1 || (n < 0 && start > rest as i64) {
                return Err(EvalError::runtime("bad argument #1 to 'select' (index out of range)"));
            }
            Ok(args.into_iter().skip(start as usize).collect())
        }
        Native::Error => {
            let message = arg(&args, 0);
            Err(EvalError::runtime(String::from_utf8_lossy(&message.to_text())))
        }
        Native::Assert => {
            if arg(&args, 0).truthy() {
                return Ok(args);
            }
            let message = match arg(&args, 1) {
                Value::Nil => b"assertion failed!".to_vec(),
                other => other.to_text(),
            };
            Err(EvalError::runtime(String::from_utf8_lossy(&message)))
        }
        Native::PCall => {
            let mut args = args.into_iter();
            let f = args.next().unwrap_or_default();
            match interp.call(&f, args.collect()) {
                Ok(values) => {
                    let mut out = vec![Value::Bool(true)];
                    out.extend(values);
                    Ok(out)
                }
                Err(EvalError::Runtime { message }) => {
                    Ok(vec![Value::Bool(false), Value::str(message.as_bytes())])
                }
                Err(e) => Err(e),
            }
        }
        Native::RawGet => {
            let t = table(&args, 0, "rawget")?;
            let value = t.borrow().get(&arg(&args, 1));
            one(value)
        }
        Native::RawSet => {
            let t = table(&args, 0, "rawset")?;
            t.borrow_mut().set(arg(&args, 1), arg(&args, 2))?;
            one(Value::Table(t))
        }
        Native::RawEqual => one(Value::Bool(arg(&args, 0).raw_equals(&arg(&args, 1)))),
        Native::Unpack => {
            let t = table(&args, 0, "unpack")?;
            let t = t.borrow();
            let i = opt_integer(&args, 1, "unpack", 1)?;
            let j = opt_integer(&args, 2, "unpack", t.border())?;
            Ok((i..=j).map(|k| t.get_int(k)).collect())
        }
        Native::GetFenv => one(Value::Table(interp.globals.clone())),
        Native::TablePack => {
            let n = args.len();
            let mut t = Table::from_list(args);
            t.set_str("n", Value::Number(n as f64));
            one(Value::table(t))
        }
        Native::TableInsert => {
            let t = table(&args, 0, "insert")?;
            let mut t = t.borrow_mut();
            let border = t.border();
            match args.len() {
                2 => t.set_int(border + 1, arg(&args, 1)),
                3 => {
                    let pos = integer(&args, 1, "insert")?;
                    if pos < 1 || pos > border + 1 {
                        return Err(EvalError::runtime(
                            "bad argument #2 to 'insert' (position out of bounds)",
                        ));
                    }
                    for k in (pos..=border).rev() {
                        let moved = t.get_int(k);
                        t.set_int(k + 1, moved);
                    }
                    t.set_int(pos, arg(&args, 2));
                }
                _ => return Err(EvalError::runtime("wrong number of arguments to 'insert'")),
            }
            Ok(Vec::new())
        }
        Native::TableRemove => {
            let t = table(&args, 0, "remove")?;
            let mut t = t.borrow_mut();
            let border = t.border();
            let pos = opt_integer(&args, 1, "remove", border)?;
            if border == 0 && args.len() < 2 {
                return one(Value::Nil);
            }
            let removed = t.get_int(pos);
            for k in pos..border {
                let moved = t.get_int(k + 1);
                t.set_int(k, moved);
            }
            if pos <= border {
                t.set_int(border, Value::Nil);
            }
            one(removed)
        }
        Native::TableConcat => {
            let t = table(&args, 0, "concat")?;
            let t = t.borrow();
            let sep = if arg(&args, 1).is_nil() {
                Vec::new()
            } else {
                string(&args, 1, "concat")?
            };
            let i = opt_integer(&args, 2, "concat", 1)?;
            let j = opt_integer(&args, 3, "concat", t.border())?;
            let mut out = Vec::new();
            for k in i..=j {
                match t.get_int(k) {
                    value @ (Value::Str(_) | Value::Number(_)) => out.extend(value.to_text()),
                    other => {
                        return Err(EvalError::runtime(format!(
                            "invalid value (at index {}) in table for 'concat' ({})",
                            k,
                            other.type_name()
                        )));
                    }
                }
                if k < j {
                    out.extend_from_slice(&sep);
                }
            }
            one(Value::str(&out))
        }
        Native::StringChar => {
            let mut out = Vec::with_capacity(args.len());
            for i in 0..args.len() {
                let code = integer(&args, i, "char")?;
                let byte = u8::try_from(code)
                    .map_err(|_| EvalError::runtime("bad argument to 'char' (value out of range)"))?;
                out.push(byte);
            }
            one(Value::str(&out))
        }
        Native::StringByte => {
            let s = string(&args, 0, "byte")?;
            let i = opt_integer(&args, 1, "byte", 1)?;
            let j = opt_integer(&args, 2, "byte", i)?;
            Ok(substring(&s, i, j)
                .iter()
                .map(|&b| Value::Number(b as f64))
                .collect())
        }
        Native::StringSub => {
            let s = string(&args, 0, "sub")?;
            let i = opt_integer(&args, 1, "sub", 1)?;
            let j = opt_integer(&args, 2, "sub", -1)?;
            one(Value::str(substring(&s, i, j)))
        }
        Native::StringLen => one(Value::Number(string(&args, 0, "len")?.len() as f64)),
        Native::StringRep => {
            let s = string(&args, 0, "rep")?;
            let n = integer(&args, 1, "rep")?.max(0) as usize;
            let sep = if arg(&args, 2).is_nil() {
                Vec::new()
            } else {
                string(&args, 2, "rep")?
            };
            let parts = vec![s; n];
            one(Value::str(&parts.join(sep.as_slice())))
        }
        Native::StringUpper => one(Value::str(&string(&args, 0, "upper")?.to_ascii_uppercase())),
        Native::StringLower => one(Value::str(&string(&args, 0, "lower")?.to_ascii_lowercase())),
        Native::StringFormat => one(Value::str(&format(&args)?)),
        Native::MathFloor => one(Value::Number(number(&args, 0, "floor")?.floor())),
        Native::MathCeil => one(Value::Number(number(&args, 0, "ceil")?.ceil())),
        Native::MathAbs => one(Value::Number(number(&args, 0, "abs")?.abs())),
        Native::MathSqrt => one(Value::Number(number(&args, 0, "sqrt")?.sqrt())),
        Native::MathFmod => {
            let a = number(&args, 0, "fmod")?;
            let b = number(&args, 1, "fmod")?;
            one(Value::Number(a % b))
        }
        Native::MathMax | Native::MathMin => {
            let name = if native == Native::MathMax { "max" } else { "min" };
            let mut best = number(&args, 0, name)?;
            for i in 1..args.len() {
                let n = number(&args, i, name)?;
                if (native == Native::MathMax && n > best) || (native == Native::MathMin && n < best) {
                    best = n;
                }
            }
            one(Value::Number(best))
        }
        Native::BitXor => bitwise(&args, "bxor", 0, |a, b| a ^ b),
        Native::BitAnd => bitwise(&args, "band", u32::MAX, |a, b| a & b),
        Native::BitOr => bitwise(&args, "bor", 0, |a, b| a | b),
        Native::TaskSpawn => {
            let mut args = args.into_iter();
            let f = args.next().unwrap_or_default();
            interp.call(&f, args.collect())?;
            Ok(Vec::new())
        }
        Native::TaskDelay => {
            let mut args = args.into_iter().skip(1);
            let f = args.next().unwrap_or_default();
            interp.call(&f, args.collect())?;
            Ok(Vec::new())
        }
        Native::TaskWait => one(Value::Number(0.0)),
    }
}

/// `string.format` for `%d %i %s %q %f %g %x %X %c %%`, with optional width
/// and precision.
fn format(args: &[Value]) -> Result<Vec<u8>, EvalError> {
    let template = string(args, 0, "format")?;
    let mut out = Vec::new();
    let mut next = 1;
    let mut i = 0;
    while i < template.len() {
        let c = template[i];
        i += 1;
        if c != b'%' {
            out.push(c);
            continue;
        }
        let spec_start = i;
        while i < template.len() && b"-+ #0123456789.".contains(&template[i]) {
            i += 1;
        }
        let Some(&conv) = template.get(i) else {
            return Err(EvalError::runtime("invalid conversion to 'format'"));
        };
        i += 1;
        if conv == b'%' {
            out.push(b'%');
            continue;
        }
        let flags = String::from_utf8_lossy(&template[spec_start..i - 1]).into_owned();
        let (width, precision) = match flags.split_once('.') {
            Some((w, p)) => (w.to_string(), p.parse::<usize>().ok()),
            None => (flags.clone(), None),
        };
        let left = width.starts_with('-');
        let zero = width.trim_start_matches('-').starts_with('0');
        let width: usize = width.trim_start_matches(['-', '0', '+', ' ', '#']).parse().unwrap_or(0);
        let index = next;
        next += 1;
        let text = match conv {
            b'd' | b'i' => format!("{}", number(args, index, "format")?.trunc() as i64).into_bytes(),
            b'x' => format!("{:x}", number(args, index, "format")?.trunc() as i64).into_bytes(),
            b'X' => format!("{:X}", number(args, index, "format")?.trunc() as i64).into_bytes(),
            b'c' => vec![integer(args, index, "format")? as u8],
            b'f' => format!("{:.*}", precision.unwrap_or(6), number(args, index, "format")?)
                .into_bytes(),
            b'g' => format_number(number(args, index, "format")?).into_bytes(),
            b's' => {
                let mut text = arg(args, index).to_text();
                if let Some(p) = precision {
                    text.truncate(p);
                }
                text
            }
            b'q' => {
                let text = string(args, index, "format")?;
                let mut quoted = vec![b'"'];
                for b in text {
                    match b {
                        b'"' | b'\\' => quoted.extend([b'\\', b]),
                        b'\n' => quoted.extend(b"\\n"),
                        b'\r' => quoted.extend(b"\\r"),
                        0 => quoted.extend(b"\\0"),
                        _ => quoted.push(b),
                    }
                }
                quoted.push(b'"');
                quoted
            }
            other => {
                return Err(EvalError::runtime(format!(
                    "invalid option '%{}' to 'format'",
                    other as char
                )));
            }
        };
        let pad = width.saturating_sub(text.len());
        if left {
            out.extend(text);
            out.extend(std::iter::repeat_n(b' ', pad));
        } else {
            let fill = if zero && conv != b's' { b'0' } else { b' ' };
            out.extend(std::iter::repeat_n(fill, pad));
            out.extend(text);
        }
    }
    Ok(out)
}
