//! Instruction set of the private stack machine.
//!
//! # Instruction Format
//!
//! Every instruction is a triple `(op, a, b)` of non-negative integers. The
//! meaning of `a` and `b` depends on the opcode; unused operands are zero.
//! Keeping all fields unsigned lets every obfuscation mask be a plain 32-bit
//! XOR.
//!
//! # Machine State
//!
//! - `S`: operand stack, `t` is the index of its top (0 when empty)
//! - `R`: local slots, 1-based; parameters occupy `1..=param_count`
//! - `vc`: variable-count register, set by every all-results call
//! - `pc`: index of the next instruction
//!
//! # Stack Discipline
//!
//! Stack effect notation: `[..., operand1, operand2] -> [..., result]`

use core::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    /// No operation
    Nop,

    // ========================================================================
    // Stack & Constants
    // ========================================================================
    /// Push constant `a` (0-based pool index)
    /// Stack: [...] -> [..., K[a]]
    PushConst,
    PushNil,
    PushTrue,
    PushFalse,
    /// Push local slot `a`
    /// Stack: [...] -> [..., R[a]]
    PushLocal,
    /// Pop into local slot `a`
    /// Stack: [..., v] -> [...]
    StoreLocal,
    /// Push global named by constant `a`
    PushGlobal,
    /// Pop into global named by constant `a`
    StoreGlobal,
    /// Push enclosing-scope local `a` (index into the program's outer names)
    PushOuter,
    /// Pop into enclosing-scope local `a`
    StoreOuter,
    /// Stack: [..., v] -> [...]
    Pop,
    /// Stack: [..., v] -> [..., v, v]
    Dup,
    /// Stack: [..., x, y] -> [..., y, x]
    Swap,

    // ========================================================================
    // Tables
    // ========================================================================
    /// Stack: [...] -> [..., {}]
    NewTable,
    /// Stack: [..., t, k] -> [..., t[k]]
    GetTable,
    /// Stack: [..., t, k, v] -> [...]
    SetTable,
    /// Store the top `b + vc` values at `t[a]`, `t[a+1]`, ... keeping the table
    /// Stack: [..., t, v1, ..., vn] -> [..., t]
    SetListV,

    // ========================================================================
    // Arithmetic & Comparison
    // ========================================================================
    /// Stack: [..., x, y] -> [..., x op y]
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    IDiv,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Stack: [..., x] -> [..., op x]
    Not,
    Neg,
    Len,

    // ========================================================================
    // Control Flow
    // ========================================================================
    /// Continue at instruction `a`
    Jmp,
    /// Pop; continue at `a` when the value is falsy
    JmpIfFalse,
    /// Pop; continue at `a` when the value is truthy
    JmpIfTrue,
    /// Call with `a` arguments keeping `b - 1` results, or all results (and
    /// setting `vc`) when `b == 0`
    /// Stack: [..., f, arg1, ..., argn] -> [..., res1, ..., resm]
    Call,
    /// Like `Call` with `a + vc` arguments
    CallV,
    /// Return the top `a` values. With `b == 1` the interpreter is left
    /// without returning from the enclosing function.
    Return,
    /// Return the top `a + vc` values
    ReturnV,

    // ========================================================================
    // Polymorphic variants (operands pre-masked with the program's ISA keys)
    // ========================================================================
    PushConstX,
    PushLocalX,
    StoreLocalX,
    JmpX,
    JmpIfFalseX,
    JmpIfTrueX,
    CallX,
}

impl Opcode {
    pub const ALL: [Opcode; 49] = [
        Opcode::Nop,
        Opcode::PushConst,
        Opcode::PushNil,
        Opcode::PushTrue,
        Opcode::PushFalse,
        Opcode::PushLocal,
        Opcode::StoreLocal,
        Opcode::PushGlobal,
        Opcode::StoreGlobal,
        Opcode::PushOuter,
        Opcode::StoreOuter,
        Opcode::Pop,
        Opcode::Dup,
        Opcode::Swap,
        Opcode::NewTable,
        Opcode::GetTable,
        Opcode::SetTable,
        Opcode::SetListV,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Pow,
        Opcode::IDiv,
        Opcode::Concat,
        Opcode::Eq,
        Opcode::Ne,
        Opcode::Lt,
        Opcode::Le,
        Opcode::Gt,
        Opcode::Ge,
        Opcode::Not,
        Opcode::Neg,
        Opcode::Len,
        Opcode::Jmp,
        Opcode::JmpIfFalse,
        Opcode::JmpIfTrue,
        Opcode::Call,
        Opcode::CallV,
        Opcode::Return,
        Opcode::ReturnV,
        Opcode::PushConstX,
        Opcode::PushLocalX,
        Opcode::StoreLocalX,
        Opcode::JmpX,
        Opcode::JmpIfFalseX,
        Opcode::JmpIfTrueX,
        Opcode::CallX,
    ];

    /// Position in [`Opcode::ALL`].
    pub fn ordinal(self) -> u32 {
        self as u32
    }

    /// Whether operand `a` is an instruction address.
    pub fn is_jump(self) -> bool {
        matches!(
            self.base(),
            Opcode::Jmp | Opcode::JmpIfFalse | Opcode::JmpIfTrue
        )
    }

    /// The `_X` variant of an opcode, if it has one.
    pub fn polymorphic(self) -> Option<Opcode> {
        Some(match self {
            Opcode::PushConst => Opcode::PushConstX,
            Opcode::PushLocal => Opcode::PushLocalX,
            Opcode::StoreLocal => Opcode::StoreLocalX,
            Opcode::Jmp => Opcode::JmpX,
            Opcode::JmpIfFalse => Opcode::JmpIfFalseX,
            Opcode::JmpIfTrue => Opcode::JmpIfTrueX,
            Opcode::Call => Opcode::CallX,
            _ => return None,
        })
    }

    pub fn is_polymorphic(self) -> bool {
        self.base() != self
    }

    /// The plain opcode behind an `_X` variant (identity for plain opcodes).
    pub fn base(self) -> Opcode {
        match self {
            Opcode::PushConstX => Opcode::PushConst,
            Opcode::PushLocalX => Opcode::PushLocal,
            Opcode::StoreLocalX => Opcode::StoreLocal,
            Opcode::JmpX => Opcode::Jmp,
            Opcode::JmpIfFalseX => Opcode::JmpIfFalse,
            Opcode::JmpIfTrueX => Opcode::JmpIfTrue,
            Opcode::CallX => Opcode::Call,
            other => other,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::PushConst => "PUSH_CONST",
            Opcode::PushNil => "PUSH_NIL",
            Opcode::PushTrue => "PUSH_TRUE",
            Opcode::PushFalse => "PUSH_FALSE",
            Opcode::PushLocal => "PUSH_LOCAL",
            Opcode::StoreLocal => "STORE_LOCAL",
            Opcode::PushGlobal => "PUSH_GLOBAL",
            Opcode::StoreGlobal => "STORE_GLOBAL",
            Opcode::PushOuter => "PUSH_OUTER",
            Opcode::StoreOuter => "STORE_OUTER",
            Opcode::Pop => "POP",
            Opcode::Dup => "DUP",
            Opcode::Swap => "SWAP",
            Opcode::NewTable => "NEW_TABLE",
            Opcode::GetTable => "GET_TABLE",
            Opcode::SetTable => "SET_TABLE",
            Opcode::SetListV => "SET_LIST_V",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Pow => "POW",
            Opcode::IDiv => "IDIV",
            Opcode::Concat => "CONCAT",
            Opcode::Eq => "EQ",
            Opcode::Ne => "NE",
            Opcode::Lt => "LT",
            Opcode::Le => "LE",
            Opcode::Gt => "GT",
            Opcode::Ge => "GE",
            Opcode::Not => "NOT",
            Opcode::Neg => "NEG",
            Opcode::Len => "LEN",
            Opcode::Jmp => "JMP",
            Opcode::JmpIfFalse => "JMP_IF_FALSE",
            Opcode::JmpIfTrue => "JMP_IF_TRUE",
            Opcode::Call => "CALL",
            Opcode::CallV => "CALL_V",
            Opcode::Return => "RETURN",
            Opcode::ReturnV => "RETURN_V",
            Opcode::PushConstX => "PUSH_CONST_X",
            Opcode::PushLocalX => "PUSH_LOCAL_X",
            Opcode::StoreLocalX => "STORE_LOCAL_X",
            Opcode::JmpX => "JMP_X",
            Opcode::JmpIfFalseX => "JMP_IF_FALSE_X",
            Opcode::JmpIfTrueX => "JMP_IF_TRUE_X",
            Opcode::CallX => "CALL_X",
        }
    }
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: Opcode,
    pub a: u32,
    pub b: u32,
}

impl Instruction {
    pub fn new(op: Opcode, a: u32, b: u32) -> Self {
        Self { op, a, b }
    }

    pub fn fields(&self) -> [u32; 3] {
        [self.op.ordinal(), self.a, self.b]
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op.base() {
            Opcode::PushConst
            | Opcode::PushLocal
            | Opcode::StoreLocal
            | Opcode::PushGlobal
            | Opcode::StoreGlobal
            | Opcode::PushOuter
            | Opcode::StoreOuter
            | Opcode::Jmp
            | Opcode::JmpIfFalse
            | Opcode::JmpIfTrue
            | Opcode::ReturnV => write!(f, "{:?}({})", self.op, self.a),
            Opcode::SetListV | Opcode::Call | Opcode::CallV => {
                write!(f, "{:?}({}, {})", self.op, self.a, self.b)
            }
            Opcode::Return if self.b != 0 => write!(f, "{:?}({}, halt)", self.op, self.a),
            Opcode::Return => write!(f, "{:?}({})", self.op, self.a),
            _ => write!(f, "{:?}", self.op),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_matches_ordinals() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(op.ordinal() as usize, i, "{:?}", op);
        }
    }

    #[test]
    fn test_polymorphic_round_trip() {
        for op in Opcode::ALL {
            if let Some(x) = op.polymorphic() {
                assert!(x.is_polymorphic());
                assert_eq!(x.base(), op);
                assert_eq!(op.is_jump(), x.is_jump());
            }
        }
        assert_eq!(Opcode::Add.polymorphic(), None);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", Instruction::new(Opcode::Call, 2, 0)), "CALL(2, 0)");
        assert_eq!(format!("{:?}", Instruction::new(Opcode::JmpX, 4, 0)), "JMP_X(4)");
        assert_eq!(format!("{:?}", Instruction::new(Opcode::Add, 0, 0)), "ADD");
    }
}
