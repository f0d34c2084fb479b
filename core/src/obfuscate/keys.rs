//! Per-instruction key schedule.
//!
//! Keys never appear in the output in the clear. Each is stored as
//! `((key - 31 * seed * (i + 1)) mod 65536) ^ mask` and re-derived by the
//! interpreter once the seed has been recomputed.

use crate::rng::VeilRng;

const KEY_MODULUS: u32 = 65536;

/// Encode `key` for storage at schedule position `position`.
pub fn encode_key(key: u32, mask: u32, seed: u32, position: u32) -> u32 {
    let offset = (31 * seed * (position + 1)) % KEY_MODULUS;
    ((key + KEY_MODULUS - offset) % KEY_MODULUS) ^ mask
}

/// Inverse of [`encode_key`], as evaluated by the generated interpreter.
pub fn derive_key(encoded: u32, mask: u32, seed: u32, position: u32) -> u32 {
    ((encoded ^ mask) + 31 * seed * (position + 1)) % KEY_MODULUS
}

/// A key with its stored form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredKey {
    pub key: u32,
    pub encoded: u32,
    pub mask: u32,
}

impl StoredKey {
    pub fn generate(rng: &mut VeilRng, seed: u32, position: u32) -> Self {
        let key = rng.range(1, KEY_MODULUS - 1);
        let mask = rng.range(0, KEY_MODULUS - 1);
        Self {
            key,
            encoded: encode_key(key, mask, seed, position),
            mask,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchedule {
    pub keys: Vec<StoredKey>,
}

impl KeySchedule {
    pub fn generate(rng: &mut VeilRng, seed: u32) -> Self {
        let count = rng.range(2, 4);
        Self {
            keys: (0..count)
                .map(|i| StoredKey::generate(rng, seed, i))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key of logical instruction `pc`.
    pub fn key_for(&self, pc: usize, seed: u32) -> u32 {
        self.keys[(pc + seed as usize) % self.keys.len()].key
    }
}
