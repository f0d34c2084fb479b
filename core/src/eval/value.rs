//! Runtime values of the reference evaluator.

use std::{cell::RefCell, fmt, rc::Rc};

use hashbrown::HashMap;

use crate::{
    ast::FunctionBody,
    eval::{EvalError, interp::Env},
};

pub type TableRef = Rc<RefCell<Table>>;

/// Built-in functions, dispatched in [`super::stdlib`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Native {
    Print,
    Type,
    ToString,
    ToNumber,
    Pairs,
    IPairs,
    IPairsStep,
    Next,
    Select,
    Error,
    Assert,
    PCall,
    RawGet,
    RawSet,
    RawEqual,
    Unpack,
    GetFenv,
    TablePack,
    TableInsert,
    TableRemove,
    TableConcat,
    StringChar,
    StringByte,
    StringSub,
    StringLen,
    StringRep,
    StringUpper,
    StringLower,
    StringFormat,
    MathFloor,
    MathCeil,
    MathAbs,
    MathMax,
    MathMin,
    MathSqrt,
    MathFmod,
    BitXor,
    BitAnd,
    BitOr,
    /// `task.spawn`, `task.defer`, `spawn`: run the callback now.
    TaskSpawn,
    /// `task.delay`, `delay`: drop the delay and run the callback now.
    TaskDelay,
    TaskWait,
}

pub struct Closure {
    pub func: FunctionBody,
    pub env: Env,
}

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    Str(Rc<[u8]>),
    Table(TableRef),
    Function(Rc<Closure>),
    Native(Native),
}

impl Value {
    pub fn str(s: &[u8]) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn table(table: Table) -> Self {
        Value::Table(Rc::new(RefCell::new(table)))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) | Value::Native(_) => "function",
        }
    }

    /// Number value, coercing numeric strings.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Str(s) => parse_number(s),
            _ => None,
        }
    }

    /// Primitive equality: by value for scalars and strings, by identity otherwise.
    pub fn raw_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => a == b,
            _ => false,
        }
    }

    /// `tostring` text.
    pub fn to_text(&self) -> Vec<u8> {
        match self {
            Value::Nil => b"nil".to_vec(),
            Value::Bool(b) => b.to_string().into_bytes(),
            Value::Number(n) => format_number(*n).into_bytes(),
            Value::Str(s) => s.to_vec(),
            Value::Table(t) => format!("table: {:p}", Rc::as_ptr(t)).into_bytes(),
            Value::Function(f) => format!("function: {:p}", Rc::as_ptr(f)).into_bytes(),
            Value::Native(n) => format!("builtin: {:?}", n).into_bytes(),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", String::from_utf8_lossy(s)),
            other => write!(f, "{}", String::from_utf8_lossy(&other.to_text())),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.raw_equals(other)
    }
}

/// `%.14g`, the way the host prints numbers.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n == n.trunc() && n.abs() < 1e15 {
        if n == 0.0 && n.is_sign_negative() {
            return "-0".to_string();
        }
        return format!("{}", n as i64);
    }
    let sci = format!("{:.13e}", n);
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if (-4..14).contains(&exponent) {
        let decimals = (13 - exponent).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, n))
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs())
    }
}

fn trim_fraction(text: &str) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text.to_string()
    }
}

/// `tonumber` on a string: decimal, exponent and hex integer forms, with
/// surrounding whitespace.
pub fn parse_number(bytes: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()? as f64
    } else {
        if body.is_empty()
            || !body
                .bytes()
                .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
        {
            return None;
        }
        body.parse::<f64>().ok()?
    };
    Some(if negative { -value } else { value })
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    Bool(bool),
    Number(u64),
    Str(Rc<[u8]>),
    Ref(usize),
    Native(Native),
}

impl Key {
    fn of(value: &Value) -> Result<Key, EvalError> {
        Ok(match value {
            Value::Nil => return Err(EvalError::runtime("table index is nil")),
            Value::Number(n) if n.is_nan() => return Err(EvalError::runtime("table index is NaN")),
            Value::Bool(b) => Key::Bool(*b),
            // `-0` and `0` are the same key.
            Value::Number(n) => Key::Number((n + 0.0).to_bits()),
            Value::Str(s) => Key::Str(s.clone()),
            Value::Table(t) => Key::Ref(Rc::as_ptr(t) as *const () as usize),
            Value::Function(f) => Key::Ref(Rc::as_ptr(f) as *const () as usize),
            Value::Native(n) => Key::Native(*n),
        })
    }
}

/// Insertion-ordered table. Assigning nil keeps the slot so `next` stays
/// valid during traversal.
#[derive(Default)]
pub struct Table {
    entries: Vec<(Value, Value)>,
    index: HashMap<Key, usize>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence `{v1, v2, ...}`.
    pub fn from_list(values: impl IntoIterator<Item = Value>) -> Self {
        let mut table = Self::new();
        for (i, value) in values.into_iter().enumerate() {
            table.set_int(i as i64 + 1, value);
        }
        table
    }

    pub fn get(&self, key: &Value) -> Value {
        match Key::of(key) {
            Ok(k) => self
                .index
                .get(&k)
                .map(|&i| self.entries[i].1.clone())
                .unwrap_or_default(),
            Err(_) => Value::Nil,
        }
    }

    pub fn get_int(&self, i: i64) -> Value {
        self.get(&Value::Number(i as f64))
    }

    pub fn get_str(&self, name: &str) -> Value {
        self.get(&Value::str(name.as_bytes()))
    }

    pub fn set(&mut self, key: Value, value: Value) -> Result<(), EvalError> {
        let k = Key::of(&key)?;
        match self.index.get(&k) {
            Some(&i) => self.entries[i].1 = value,
            None if value.is_nil() => {}
            None => {
                self.index.insert(k, self.entries.len());
                self.entries.push((key, value));
            }
        }
        Ok(())
    }

    pub fn set_int(&mut self, i: i64, value: Value) {
        // Number keys other than NaN never fail.
        let _ = self.set(Value::Number(i as f64), value);
    }

    pub fn set_str(&mut self, name: &str, value: Value) {
        let _ = self.set(Value::str(name.as_bytes()), value);
    }

    /// A border: `t[n] ~= nil` and `t[n + 1] == nil`.
    pub fn border(&self) -> i64 {
        let mut n = 0;
        while !self.get_int(n + 1).is_nil() {
            n += 1;
        }
        n
    }

    /// The entry after `key` in traversal order, skipping nil slots.
    pub fn next(&self, key: &Value) -> Result<Option<(Value, Value)>, EvalError> {
        let start = if key.is_nil() {
            0
        } else {
            match self.index.get(&Key::of(key)?) {
                Some(&i) => i + 1,
                None => return Err(EvalError::runtime("invalid key to 'next'")),
            }
        };
        Ok(self.entries[start.min(self.entries.len())..]
            .iter()
            .find(|(_, v)| !v.is_nil())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-7.0), "-7");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(1.0 / 3.0), "0.33333333333333");
        assert_eq!(format_number(1e15), "1e+15");
        assert_eq!(format_number(2.5e-7), "2.5e-07");
        assert_eq!(format_number(f64::INFINITY), "inf");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(b" 42 "), Some(42.0));
        assert_eq!(parse_number(b"0x1F"), Some(31.0));
        assert_eq!(parse_number(b"-1.5e2"), Some(-150.0));
        assert_eq!(parse_number(b"12abc"), None);
        assert_eq!(parse_number(b""), None);
    }

    #[test]
    fn test_table_keys_and_border() {
        let mut t = Table::from_list([Value::Number(10.0), Value::Number(20.0)]);
        t.set_str("n", Value::Number(2.0));
        assert_eq!(t.border(), 2);
        assert_eq!(t.get(&Value::Number(-0.0 + 1.0)), Value::Number(10.0));
        assert!(t.set(Value::Nil, Value::Bool(true)).is_err());
        t.set_int(2, Value::Nil);
        assert_eq!(t.border(), 1);
    }

    #[test]
    fn test_next_skips_cleared_slots() {
        let mut t = Table::from_list([Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]);
        t.set_int(2, Value::Nil);
        let (k, _) = t.next(&Value::Number(1.0)).unwrap().unwrap();
        assert_eq!(k, Value::Number(3.0));
        assert!(t.next(&Value::Number(3.0)).unwrap().is_none());
    }
}
