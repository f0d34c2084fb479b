//! Stream slicing and shuffling for linear dispatch.

use crate::rng::VeilRng;

/// Physical storage of one slice of the instruction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// Three fields per instruction.
    Numbers(Vec<u32>),
    /// Three big-endian 4-byte fields per instruction.
    Bytes(Vec<u8>),
}

impl StreamChunk {
    /// Instructions stored in this slice.
    pub fn instruction_count(&self) -> usize {
        match self {
            StreamChunk::Numbers(fields) => fields.len() / 3,
            StreamChunk::Bytes(bytes) => bytes.len() / 12,
        }
    }
}

/// The encoded instruction stream, in physical order.
///
/// Logical instruction `pc` lives in slice `order[pc / chunk_size]` at
/// instruction offset `pc % chunk_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub chunk_size: usize,
    /// Logical slice index to physical (0-based) slice index.
    pub order: Vec<usize>,
    pub chunks: Vec<StreamChunk>,
}

impl Stream {
    pub fn build(fields: &[[u32; 3]], split: bool, bytes: bool, rng: &mut VeilRng) -> Self {
        let n = fields.len().max(1);
        let wanted = if split { rng.range(2, 4) as usize } else { 1 };
        let chunk_size = n.div_ceil(wanted.min(n));

        let logical: Vec<StreamChunk> = fields
            .chunks(chunk_size)
            .map(|slice| {
                let flat = slice.iter().flatten().copied();
                if bytes {
                    StreamChunk::Bytes(flat.flat_map(u32::to_be_bytes).collect())
                } else {
                    StreamChunk::Numbers(flat.collect())
                }
            })
            .collect();

        let mut physical: Vec<usize> = (0..logical.len()).collect();
        rng.shuffle(&mut physical);
        // physical[logical_index] = slot that slice is stored in
        let mut chunks = vec![StreamChunk::Numbers(Vec::new()); logical.len()];
        for (index, chunk) in logical.into_iter().enumerate() {
            chunks[physical[index]] = chunk;
        }

        Self {
            chunk_size,
            order: physical,
            chunks,
        }
    }

    pub fn instruction_count(&self) -> usize {
        self.chunks.iter().map(StreamChunk::instruction_count).sum()
    }

    /// Fetch the fields of logical instruction `pc`, as the interpreter does.
    pub fn fetch(&self, pc: usize) -> Option<[u32; 3]> {
        let chunk = self.chunks.get(*self.order.get(pc / self.chunk_size)?)?;
        let base = (pc % self.chunk_size) * 3;
        match chunk {
            StreamChunk::Numbers(fields) => Some([
                *fields.get(base)?,
                *fields.get(base + 1)?,
                *fields.get(base + 2)?,
            ]),
            StreamChunk::Bytes(bytes) => {
                let field = |i: usize| -> Option<u32> {
                    let at = (base + i) * 4;
                    let b = bytes.get(at..at + 4)?;
                    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
                };
                Some([field(0)?, field(1)?, field(2)?])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(n: u32) -> Vec<[u32; 3]> {
        (0..n).map(|i| [i, i * 1000 + 7, u32::MAX - i]).collect()
    }

    #[test]
    fn test_split_stream_fetches_every_instruction() {
        let mut rng = VeilRng::from_seed_str("slice");
        let original = fields(11);
        for bytes in [false, true] {
            let stream = Stream::build(&original, true, bytes, &mut rng);
            assert!(stream.chunks.len() >= 2);
            assert_eq!(stream.instruction_count(), 11);
            for (pc, expected) in original.iter().enumerate() {
                assert_eq!(stream.fetch(pc), Some(*expected));
            }
        }
    }

    #[test]
    fn test_unsplit_stream() {
        let mut rng = VeilRng::from_seed_str("slice");
        let stream = Stream::build(&fields(5), false, false, &mut rng);
        assert_eq!(stream.chunks.len(), 1);
        assert_eq!(stream.order, vec![0]);
        assert_eq!(stream.chunk_size, 5);
    }

    #[test]
    fn test_single_instruction_cannot_split() {
        let mut rng = VeilRng::from_seed_str("slice");
        let stream = Stream::build(&fields(1), true, false, &mut rng);
        assert_eq!(stream.chunks.len(), 1);
    }
}
