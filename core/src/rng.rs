//! The single seeded random source threaded through a run.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, &b| {
        (hash ^ b as u64).wrapping_mul(FNV_PRIME)
    })
}

#[derive(Debug, Clone)]
pub struct VeilRng {
    inner: StdRng,
}

impl VeilRng {
    pub fn from_seed_str(seed: &str) -> Self {
        Self {
            inner: StdRng::seed_from_u64(fnv1a(seed.as_bytes())),
        }
    }

    /// Uniform in `lo..=hi`.
    pub fn range(&mut self, lo: u32, hi: u32) -> u32 {
        self.inner.gen_range(lo..=hi)
    }

    /// Uniform in `0..n`; `n` must be non-zero.
    pub fn below(&mut self, n: usize) -> usize {
        self.inner.gen_range(0..n)
    }

    pub fn chance(&mut self, probability: f64) -> bool {
        self.inner.gen_bool(probability.clamp(0.0, 1.0))
    }

    pub fn coin(&mut self) -> bool {
        self.chance(0.5)
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.inner);
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.inner)
    }

    /// `count` distinct values from `lo..=hi`, in random order.
    pub fn distinct(&mut self, count: usize, lo: u32, hi: u32) -> Vec<u32> {
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            let value = self.range(lo, hi);
            if seen.insert(value) {
                out.push(value);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = VeilRng::from_seed_str("t1");
        let mut b = VeilRng::from_seed_str("t1");
        let xs: Vec<u32> = (0..16).map(|_| a.range(0, 1 << 30)).collect();
        let ys: Vec<u32> = (0..16).map(|_| b.range(0, 1 << 30)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_different_seeds_diverge() {
        let mut a = VeilRng::from_seed_str("alpha");
        let mut b = VeilRng::from_seed_str("beta");
        let xs: Vec<u32> = (0..8).map(|_| a.range(0, u32::MAX)).collect();
        let ys: Vec<u32> = (0..8).map(|_| b.range(0, u32::MAX)).collect();
        assert_ne!(xs, ys);
    }

    #[test]
    fn test_distinct_values() {
        let mut rng = VeilRng::from_seed_str("d");
        let mut values = rng.distinct(10, 1, 12);
        values.sort();
        values.dedup();
        assert_eq!(values.len(), 10);
        assert!(values.iter().all(|v| (1..=12).contains(v)));
    }

    #[test]
    fn test_fnv1a_reference_value() {
        assert_eq!(fnv1a(b""), FNV_OFFSET);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }
}
