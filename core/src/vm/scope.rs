/// Chained frames mapping local names to register slots.
///
/// Slots start at 1 and only ever grow: a slot freed by a closing block is
/// never handed out again, so disjoint live ranges cannot alias.
#[derive(Debug)]
pub struct Scope {
    frames: Vec<Vec<(String, u32)>>,
    slot_count: u32,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self {
            frames: vec![Vec::new()],
            slot_count: 0,
        }
    }

    pub fn push(&mut self) {
        self.frames.push(Vec::new());
    }

    pub fn pop(&mut self) {
        debug_assert!(self.frames.len() > 1, "popping the function frame");
        self.frames.pop();
    }

    /// Bind `name` to a new slot in the innermost frame.
    pub fn declare(&mut self, name: &str) -> u32 {
        let slot = self.hidden();
        if let Some(frame) = self.frames.last_mut() {
            frame.push((name.to_string(), slot));
        }
        slot
    }

    /// A new slot no name resolves to.
    pub fn hidden(&mut self) -> u32 {
        self.slot_count += 1;
        self.slot_count
    }

    /// Innermost binding of `name`.
    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.frames
            .iter()
            .rev()
            .flat_map(|frame| frame.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, slot)| *slot)
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing_and_monotonic_slots() {
        let mut scope = Scope::new();
        let x = scope.declare("x");
        scope.push();
        let inner = scope.declare("x");
        assert_eq!(scope.lookup("x"), Some(inner));
        scope.pop();
        assert_eq!(scope.lookup("x"), Some(x));

        scope.push();
        let y = scope.declare("y");
        scope.pop();
        assert!(y > inner);
        assert_eq!(scope.lookup("y"), None);
        assert_eq!(scope.slot_count(), 3);
    }

    #[test]
    fn test_redeclare_in_same_frame() {
        let mut scope = Scope::new();
        let first = scope.declare("a");
        let second = scope.declare("a");
        assert_ne!(first, second);
        assert_eq!(scope.lookup("a"), Some(second));
    }
}
