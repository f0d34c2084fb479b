use std::collections::BTreeMap;

use crate::vm::{Instruction, Opcode};

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Nil,
    Bool(bool),
    Number(f64),
    Str(Vec<u8>),
}

/// A compiled function body or chunk slice.
#[derive(Clone, PartialEq)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Constant>,
    /// Parameters occupy slots `1..=param_names.len()`.
    pub param_names: Vec<String>,
    /// Total number of slots, parameters and hidden temporaries included.
    pub local_count: u32,
    /// Enclosing-scope locals referenced through `PushOuter`/`StoreOuter`.
    pub outer_names: Vec<String>,
}

impl Program {
    /// Every address operand in range, every pool index in range.
    pub fn validate(&self) -> Result<(), String> {
        let n = self.instructions.len() as u32;
        for (addr, instr) in self.instructions.iter().enumerate() {
            let op = instr.op.base();
            let bad = match op {
                _ if op.is_jump() => instr.a >= n,
                Opcode::PushConst | Opcode::PushGlobal | Opcode::StoreGlobal => {
                    instr.a as usize >= self.constants.len()
                }
                Opcode::PushLocal | Opcode::StoreLocal => instr.a == 0 || instr.a > self.local_count,
                Opcode::PushOuter | Opcode::StoreOuter => {
                    instr.a as usize >= self.outer_names.len()
                }
                _ => false,
            };
            if bad {
                return Err(format!("{}: operand out of range in {:?}", addr, instr));
            }
        }
        Ok(())
    }
}

impl core::fmt::Debug for Program {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Program {{")?;
        writeln!(f, "  params: {:?}", self.param_names)?;
        writeln!(f, "  local_count: {}", self.local_count)?;
        if !self.outer_names.is_empty() {
            writeln!(f, "  outer: {:?}", self.outer_names)?;
        }

        // Print constants pool
        if !self.constants.is_empty() {
            writeln!(f, "  constants: [")?;
            for (i, constant) in self.constants.iter().enumerate() {
                match constant {
                    Constant::Str(bytes) => {
                        writeln!(f, "    [{}] = {:?}", i, String::from_utf8_lossy(bytes))?
                    }
                    other => writeln!(f, "    [{}] = {:?}", i, other)?,
                }
            }
            writeln!(f, "  ]")?;
        } else {
            writeln!(f, "  constants: []")?;
        }

        // Assign label numbers to jump targets (sorted for deterministic output)
        let mut labels: BTreeMap<u32, usize> = BTreeMap::new();
        for instr in &self.instructions {
            if instr.op.is_jump() {
                labels.insert(instr.a, 0);
            }
        }
        for (i, label) in labels.values_mut().enumerate() {
            *label = i;
        }

        writeln!(f, "  instructions:")?;
        for (addr, instr) in self.instructions.iter().enumerate() {
            let label_prefix = labels
                .get(&(addr as u32))
                .map(|l| format!("L{}:", l))
                .unwrap_or_default();

            if instr.op.is_jump() {
                let target = labels
                    .get(&instr.a)
                    .map(|l| format!("L{}", l))
                    .unwrap_or_else(|| format!("@{}", instr.a));
                writeln!(f, "    {:4} {:>4}  {:?} (to {})", addr, label_prefix, instr, target)?;
            } else {
                writeln!(f, "    {:4} {:>4}  {:?}", addr, label_prefix, instr)?;
            }
        }

        write!(f, "}}")
    }
}
