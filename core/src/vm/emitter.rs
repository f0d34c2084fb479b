//! Append-only instruction sink with symbolic labels.
//!
//! Jumps are emitted against label names and recorded as pending; `finish`
//! consumes the emitter and patches every pending jump in one backward
//! step, so a finished instruction vector can no longer change.

use hashbrown::HashMap;

use crate::vm::{CompileError, Instruction, Opcode};

#[derive(Debug, Default)]
pub struct Emitter {
    instructions: Vec<Instruction>,
    labels: HashMap<String, u32>,
    pending: Vec<(usize, String)>,
    next_label: usize,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn emit(&mut self, op: Opcode, a: u32, b: u32) -> usize {
        self.instructions.push(Instruction::new(op, a, b));
        self.instructions.len() - 1
    }

    pub fn op(&mut self, op: Opcode) -> usize {
        self.emit(op, 0, 0)
    }

    /// Emit a jump whose target is filled in by `finish`.
    pub fn jump(&mut self, op: Opcode, label: &str) -> usize {
        debug_assert!(op.is_jump(), "{:?} is not a jump", op);
        let index = self.emit(op, 0, 0);
        self.pending.push((index, label.to_string()));
        index
    }

    /// A label name that cannot clash with user labels or earlier fresh ones.
    pub fn fresh_label(&mut self, hint: &str) -> String {
        self.next_label += 1;
        format!("#{}{}", hint, self.next_label)
    }

    /// Bind `label` to the next instruction to be emitted.
    pub fn mark(&mut self, label: &str) -> Result<(), CompileError> {
        if self.labels.contains_key(label) {
            return Err(CompileError::DuplicateLabel {
                label: label.to_string(),
                span: Default::default(),
            });
        }
        self.labels
            .insert(label.to_string(), self.instructions.len() as u32);
        Ok(())
    }

    /// Resolve every pending jump and hand out the instructions.
    pub fn finish(self) -> Result<Vec<Instruction>, CompileError> {
        let Emitter {
            mut instructions,
            labels,
            pending,
            ..
        } = self;

        for (index, label) in pending.into_iter().rev() {
            let target = labels
                .get(&label)
                .copied()
                .ok_or(CompileError::UnresolvedLabel { label })?;
            instructions[index].a = target;
        }

        Ok(instructions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_and_backward_jumps() {
        let mut e = Emitter::new();
        e.mark("top").unwrap();
        e.op(Opcode::PushTrue);
        e.jump(Opcode::JmpIfFalse, "out");
        e.jump(Opcode::Jmp, "top");
        e.mark("out").unwrap();
        e.emit(Opcode::Return, 0, 0);

        let code = e.finish().unwrap();
        assert_eq!(code[1], Instruction::new(Opcode::JmpIfFalse, 3, 0));
        assert_eq!(code[2], Instruction::new(Opcode::Jmp, 0, 0));
    }

    #[test]
    fn test_unresolved_label_raises() {
        let mut e = Emitter::new();
        e.jump(Opcode::Jmp, "nowhere");
        assert_eq!(
            e.finish(),
            Err(CompileError::UnresolvedLabel {
                label: "nowhere".to_string()
            })
        );
    }

    #[test]
    fn test_duplicate_label() {
        let mut e = Emitter::new();
        e.mark("a").unwrap();
        assert!(matches!(e.mark("a"), Err(CompileError::DuplicateLabel { .. })));
    }

    #[test]
    fn test_fresh_labels_are_distinct() {
        let mut e = Emitter::new();
        let a = e.fresh_label("loop");
        let b = e.fresh_label("loop");
        assert_ne!(a, b);
        assert!(a.starts_with('#'));
    }

    #[test]
    fn test_label_at_end_points_past_last_instruction() {
        let mut e = Emitter::new();
        e.jump(Opcode::Jmp, "end");
        e.mark("end").unwrap();
        let code = e.finish().unwrap();
        assert_eq!(code[0].a, 1);
    }
}
