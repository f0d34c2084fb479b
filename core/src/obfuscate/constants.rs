//! Constant-pool encryption.
//!
//! Entry `p` of the pool with payload bytes `c1..cL` and type tag `tag` is
//! stored as
//!
//! ```text
//! [ L ^ K[p % n], tag ^ K[(L + 1) % n], c1 ^ K[(L + 2) % n], ..., cL ^ K[(2L + 1) % n] ]
//! ```
//!
//! over a key array `K` of `n` byte-sized keys. Numbers travel as their
//! decimal text, booleans as `"1"`/`"0"`.

use crate::{rng::VeilRng, vm::Constant};

/// Constant keys are stored as `((key - 17 * seed * (i + 1)) mod 256) ^ mask`.
pub fn derive_const_key(encoded: u32, mask: u32, seed: u32, i: u32) -> u32 {
    ((encoded ^ mask) + 17 * seed * (i + 1)) % 256
}

fn encode_const_key(key: u32, mask: u32, seed: u32, i: u32) -> u32 {
    let offset = (17 * seed * (i + 1)) % 256;
    ((key + 256 - offset) % 256) ^ mask
}

/// Decimal text that the host's `tonumber` reads back to exactly `n`.
pub fn number_text(n: f64) -> String {
    if n.is_infinite() {
        return if n > 0.0 { "1e999".to_string() } else { "-1e999".to_string() };
    }
    if n.is_nan() {
        return "nan".to_string();
    }
    if n == n.trunc() && n.abs() < 1e15 {
        if n == 0.0 && n.is_sign_negative() {
            return "-0".to_string();
        }
        return format!("{}", n as i64);
    }
    format!("{:e}", n)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeTags {
    pub nil: u32,
    pub boolean: u32,
    pub number: u32,
    pub string: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPool {
    pub keys: Vec<u32>,
    pub encoded_keys: Vec<u32>,
    pub key_masks: Vec<u32>,
    pub tags: TypeTags,
    /// One masked entry per constant, in pool order.
    pub entries: Vec<Vec<u32>>,
    /// Number of shard tables; 1 means unsharded.
    pub shards: usize,
}

impl EncryptedPool {
    pub fn encrypt(constants: &[Constant], seed: u32, shard: bool, rng: &mut VeilRng) -> Self {
        let count = rng.range(8, 16);
        let keys: Vec<u32> = (0..count).map(|_| rng.range(1, 255)).collect();
        let key_masks: Vec<u32> = (0..count).map(|_| rng.range(0, 255)).collect();
        let encoded_keys = keys
            .iter()
            .zip(&key_masks)
            .enumerate()
            .map(|(i, (&k, &m))| encode_const_key(k, m, seed, i as u32))
            .collect();
        let tag_values = rng.distinct(4, 1, 255);
        let tags = TypeTags {
            nil: tag_values[0],
            boolean: tag_values[1],
            number: tag_values[2],
            string: tag_values[3],
        };

        let entries = constants
            .iter()
            .enumerate()
            .map(|(p, c)| encrypt_entry(&keys, &tags, p, c))
            .collect();

        let shards = if shard && constants.len() >= 2 {
            rng.range(2, 3) as usize
        } else {
            1
        };

        Self {
            keys,
            encoded_keys,
            key_masks,
            tags,
            entries,
            shards,
        }
    }

    /// Shard tables in order; entry `p` is at position `p / shards` of shard `p % shards`.
    pub fn shard_tables(&self) -> Vec<Vec<&Vec<u32>>> {
        let mut tables = vec![Vec::new(); self.shards];
        for (p, entry) in self.entries.iter().enumerate() {
            tables[p % self.shards].push(entry);
        }
        tables
    }

    /// Decrypt entry `p` the way the interpreter does.
    pub fn decrypt(&self, p: usize) -> Option<Constant> {
        let n = self.keys.len();
        let entry = self.entries.get(p)?;
        let len = (entry[0] ^ self.keys[p % n]) as usize;
        let tag = entry[1] ^ self.keys[(len + 1) % n];
        let bytes: Vec<u8> = (1..=len)
            .map(|j| (entry[1 + j] ^ self.keys[(len + j + 1) % n]) as u8)
            .collect();
        Some(if tag == self.tags.nil {
            Constant::Nil
        } else if tag == self.tags.boolean {
            Constant::Bool(bytes == b"1")
        } else if tag == self.tags.number {
            Constant::Number(String::from_utf8_lossy(&bytes).parse().ok()?)
        } else {
            Constant::Str(bytes)
        })
    }
}

fn encrypt_entry(keys: &[u32], tags: &TypeTags, p: usize, constant: &Constant) -> Vec<u32> {
    let n = keys.len();
    let (tag, payload) = match constant {
        Constant::Nil => (tags.nil, Vec::new()),
        Constant::Bool(b) => (tags.boolean, if *b { b"1".to_vec() } else { b"0".to_vec() }),
        Constant::Number(x) => (tags.number, number_text(*x).into_bytes()),
        Constant::Str(s) => (tags.string, s.clone()),
    };
    let len = payload.len();
    let mut entry = Vec::with_capacity(len + 2);
    entry.push(len as u32 ^ keys[p % n]);
    entry.push(tag ^ keys[(len + 1) % n]);
    for (j, byte) in payload.iter().enumerate() {
        entry.push(*byte as u32 ^ keys[(len + j + 2) % n]);
    }
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Vec<Constant> {
        vec![
            Constant::Str(b"print".to_vec()),
            Constant::Number(42.0),
            Constant::Number(-0.125),
            Constant::Number(1e300),
            Constant::Bool(true),
            Constant::Nil,
            Constant::Str(vec![0, 255, 10]),
        ]
    }

    #[test]
    fn test_decrypt_recovers_pool() {
        let mut rng = VeilRng::from_seed_str("pool");
        let encrypted = EncryptedPool::encrypt(&pool(), 201, false, &mut rng);
        for (p, constant) in pool().iter().enumerate() {
            assert_eq!(encrypted.decrypt(p).as_ref(), Some(constant));
        }
    }

    #[test]
    fn test_stored_keys_derive() {
        let mut rng = VeilRng::from_seed_str("pool");
        let encrypted = EncryptedPool::encrypt(&pool(), 77, false, &mut rng);
        for (i, key) in encrypted.keys.iter().enumerate() {
            let derived = derive_const_key(
                encrypted.encoded_keys[i],
                encrypted.key_masks[i],
                77,
                i as u32,
            );
            assert_eq!(derived, *key);
        }
    }

    #[test]
    fn test_entries_hide_plain_bytes() {
        let mut rng = VeilRng::from_seed_str("hide");
        let encrypted = EncryptedPool::encrypt(&[Constant::Str(b"secret".to_vec())], 9, false, &mut rng);
        let shown: Vec<u8> = encrypted.entries[0][2..].iter().map(|&b| b as u8).collect();
        assert_ne!(shown, b"secret".to_vec());
    }

    #[test]
    fn test_sharding_layout() {
        let mut rng = VeilRng::from_seed_str("shard");
        let encrypted = EncryptedPool::encrypt(&pool(), 5, true, &mut rng);
        assert!((2..=3).contains(&encrypted.shards));
        let tables = encrypted.shard_tables();
        let total: usize = tables.iter().map(|t| t.len()).sum();
        assert_eq!(total, pool().len());
        assert_eq!(tables[1][0], &encrypted.entries[1]);
    }

    #[test]
    fn test_number_text() {
        assert_eq!(number_text(3.0), "3");
        assert_eq!(number_text(-7.0), "-7");
        assert_eq!(number_text(0.5), "5e-1");
        assert_eq!(number_text(f64::INFINITY), "1e999");
        assert_eq!(number_text(1e300), "1e300");
        assert_eq!(number_text(0.1).parse::<f64>().unwrap(), 0.1);
    }
}
