//! Random helper identifiers.

use std::collections::BTreeSet;

use crate::rng::VeilRng;

pub const KEYWORDS: [&str; 23] = [
    "and", "break", "continue", "do", "else", "elseif", "end", "false", "for", "function", "goto",
    "if", "in", "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Names the interpreter refers to directly and must never shadow.
const HOST_NAMES: [&str; 2] = ["getfenv", "_ENV"];

const HEAD: &[u8] = b"lI_";
const TAIL: &[u8] = b"lI1_";

/// Source of identifiers that collide with nothing in the input chunk,
/// no keyword, and nothing handed out before.
#[derive(Debug)]
pub struct NameGen {
    taken: BTreeSet<String>,
}

impl NameGen {
    pub fn new(reserved: &BTreeSet<String>) -> Self {
        let mut taken = reserved.clone();
        taken.extend(KEYWORDS.iter().map(|k| k.to_string()));
        taken.extend(HOST_NAMES.iter().map(|k| k.to_string()));
        Self { taken }
    }

    pub fn fresh(&mut self, rng: &mut VeilRng) -> String {
        let mut len = 6;
        let mut attempts = 0;
        loop {
            let mut name = String::with_capacity(len);
            name.push(HEAD[rng.below(HEAD.len())] as char);
            for _ in 1..len {
                name.push(TAIL[rng.below(TAIL.len())] as char);
            }
            if self.taken.insert(name.clone()) {
                return name;
            }
            attempts += 1;
            if attempts % 16 == 0 {
                len += 1;
            }
        }
    }

    pub fn is_taken(&self, name: &str) -> bool {
        self.taken.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_names_avoid_reserved() {
        let mut rng = VeilRng::from_seed_str("names");
        let reserved: BTreeSet<String> = ["lIlIlI".to_string()].into();
        let mut names = NameGen::new(&reserved);
        let mut seen = BTreeSet::new();
        for _ in 0..500 {
            let name = names.fresh(&mut rng);
            assert_ne!(name, "lIlIlI");
            assert!(!name.starts_with('1'));
            assert!(seen.insert(name));
        }
        assert!(names.is_taken("while"));
    }
}
