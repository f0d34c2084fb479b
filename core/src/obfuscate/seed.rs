use crate::rng::VeilRng;

/// Per-program seed, shipped as pieces and recomputed by the interpreter.
///
/// The seed folds in the instruction and constant counts, so an interpreter
/// fed a stream of the wrong length derives the wrong keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedState {
    pub pieces: Vec<u32>,
    pub seed: u32,
}

impl SeedState {
    pub fn generate(rng: &mut VeilRng, instruction_count: usize, constant_count: usize) -> Self {
        let count = rng.range(3, 6) as usize;
        let pieces: Vec<u32> = (0..count).map(|_| rng.range(0, 255)).collect();
        let seed = Self::compute(&pieces, instruction_count, constant_count);
        Self { pieces, seed }
    }

    pub fn compute(pieces: &[u32], instruction_count: usize, constant_count: usize) -> u32 {
        let sum: u64 = pieces.iter().map(|&p| p as u64).sum();
        ((sum + 7 * instruction_count as u64 + 13 * constant_count as u64) % 256) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_formula() {
        assert_eq!(SeedState::compute(&[10, 20, 30], 4, 2), (60 + 28 + 26) % 256);
        assert_eq!(SeedState::compute(&[255, 255, 255], 100, 100), (765 + 700 + 1300) % 256);
    }

    #[test]
    fn test_generate_shape() {
        let mut rng = VeilRng::from_seed_str("seed");
        for _ in 0..20 {
            let state = SeedState::generate(&mut rng, 17, 3);
            assert!((3..=6).contains(&state.pieces.len()));
            assert!(state.seed < 256);
            assert_eq!(state.seed, SeedState::compute(&state.pieces, 17, 3));
        }
    }
}
