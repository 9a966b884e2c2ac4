//! Elias-Fano encoding of monotone offset sequences.
//!
//! Each element splits into `l = floor(log2(u/n))` low bits, packed
//! directly, and high bits stored unary in a bit vector. A two-level jump
//! table (a superblock anchor every 2^14 set bits and a 32-bit block delta
//! every 2^8) makes `get` O(1); `seek` binary-searches on top of it.

use super::errors::SegmentError;

/// Set bits per block entry.
const BLOCK_SPAN: u64 = 1 << 8;
/// Set bits per superblock entry.
const SUPERBLOCK_SPAN: u64 = 1 << 14;

/// Accumulates a monotone non-decreasing sequence for encoding.
#[derive(Debug)]
pub struct EliasFanoBuilder {
    max_value: u64,
    values: Vec<u64>,
}

impl EliasFanoBuilder {
    /// Starts a sequence whose elements never exceed `max_value`.
    pub const fn new(max_value: u64) -> Self {
        Self { max_value, values: Vec::new() }
    }

    /// Appends one element. Elements must be non-decreasing and within the
    /// declared bound.
    pub fn push(&mut self, value: u64) -> Result<(), SegmentError> {
        if value > self.max_value || self.values.last().is_some_and(|&last| value < last) {
            return Err(SegmentError::NonMonotoneOffsets);
        }
        self.values.push(value);
        Ok(())
    }

    /// Encodes the accumulated sequence.
    pub fn finish(self) -> Result<EliasFano, SegmentError> {
        EliasFano::from_values(self.max_value, &self.values)
    }
}

/// An encoded monotone sequence with O(1) random access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EliasFano {
    count: u64,
    max_value: u64,
    low_bits: u32,
    lower: Vec<u64>,
    upper: Vec<u64>,
    superblocks: Vec<u64>,
    blocks: Vec<u32>,
}

impl EliasFano {
    fn from_values(max_value: u64, values: &[u64]) -> Result<Self, SegmentError> {
        let count = values.len() as u64;
        let low_bits = if count == 0 || max_value / count == 0 {
            0
        } else {
            (max_value / count).ilog2()
        };

        let lower_words = ((count * low_bits as u64).div_ceil(64)) as usize;
        let mut lower = vec![0u64; lower_words];
        let upper_bits = (max_value >> low_bits) + count + 1;
        let mut upper = vec![0u64; (upper_bits.div_ceil(64)) as usize];

        for (i, &value) in values.iter().enumerate() {
            if low_bits > 0 {
                let low = value & ((1u64 << low_bits) - 1);
                write_bits(&mut lower, i as u64 * low_bits as u64, low, low_bits);
            }
            let position = (value >> low_bits) + i as u64;
            upper[(position / 64) as usize] |= 1u64 << (position % 64);
        }

        let (superblocks, blocks) = build_jump_tables(&upper, count)?;
        Ok(Self { count, max_value, low_bits, lower, upper, superblocks, blocks })
    }

    /// Number of elements.
    pub const fn len(&self) -> u64 {
        self.count
    }

    /// Whether the sequence is empty.
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns element `i`. Panics when out of bounds, mirroring slice
    /// indexing.
    pub fn get(&self, i: u64) -> u64 {
        assert!(i < self.count, "index {i} out of bounds ({})", self.count);
        let high = self.select(i) - i;
        let low = if self.low_bits == 0 {
            0
        } else {
            read_bits(&self.lower, i * self.low_bits as u64, self.low_bits)
        };
        (high << self.low_bits) | low
    }

    /// Returns the smallest element `>= target`, or `None` when every
    /// element is smaller.
    pub fn seek(&self, target: u64) -> Option<u64> {
        if self.count == 0 {
            return None;
        }
        let (mut lo, mut hi) = (0u64, self.count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.get(mid) < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        (lo < self.count).then(|| self.get(lo))
    }

    /// Iterates over all elements in order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.count).map(|i| self.get(i))
    }

    /// Bit position of the `i`-th set bit (0-indexed) in the upper vector.
    fn select(&self, i: u64) -> u64 {
        let block = i / BLOCK_SPAN;
        let superblock = block / (SUPERBLOCK_SPAN / BLOCK_SPAN);
        let mut position = self.superblocks[superblock as usize] + self.blocks[block as usize] as u64;
        let mut remaining = (i % BLOCK_SPAN) as u32;

        // `position` holds set bit number `block * BLOCK_SPAN`; walk forward
        // the remaining ones word by word.
        let mut word_index = (position / 64) as usize;
        let mut word = self.upper[word_index] & !((1u64 << (position % 64)) - 1);
        loop {
            let ones = word.count_ones();
            if ones > remaining {
                position = word_index as u64 * 64 + select_in_word(word, remaining);
                return position;
            }
            remaining -= ones;
            word_index += 1;
            word = self.upper[word_index];
        }
    }

    /// Serializes the sequence; jump tables are rebuilt on load.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(32 + (self.lower.len() + self.upper.len()) * 8);
        out.extend_from_slice(&self.count.to_be_bytes());
        out.extend_from_slice(&self.max_value.to_be_bytes());
        out.extend_from_slice(&(self.lower.len() as u64).to_be_bytes());
        for word in &self.lower {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out.extend_from_slice(&(self.upper.len() as u64).to_be_bytes());
        for word in &self.upper {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out
    }

    /// Deserializes a sequence, validating geometry and rebuilding the jump
    /// tables.
    pub fn from_bytes(data: &[u8]) -> Result<Self, SegmentError> {
        let mut reader = WordReader { data, offset: 0 };
        let count = reader.read()?;
        let max_value = reader.read()?;
        let lower_len = reader.read()? as usize;
        let mut lower = Vec::with_capacity(lower_len);
        for _ in 0..lower_len {
            lower.push(reader.read()?);
        }
        let upper_len = reader.read()? as usize;
        let mut upper = Vec::with_capacity(upper_len);
        for _ in 0..upper_len {
            upper.push(reader.read()?);
        }

        let low_bits = if count == 0 || max_value / count == 0 {
            0
        } else {
            (max_value / count).ilog2()
        };
        if lower_len as u64 != (count * low_bits as u64).div_ceil(64) {
            return Err(SegmentError::MalformedIndex("lower vector size mismatch"));
        }
        let expected_upper = ((max_value >> low_bits) + count + 1).div_ceil(64);
        if upper_len as u64 != expected_upper {
            return Err(SegmentError::MalformedIndex("upper vector size mismatch"));
        }
        let ones: u64 = upper.iter().map(|word| word.count_ones() as u64).sum();
        if ones != count {
            return Err(SegmentError::MalformedIndex("set bit count mismatch"));
        }

        let (superblocks, blocks) = build_jump_tables(&upper, count)?;
        Ok(Self { count, max_value, low_bits, lower, upper, superblocks, blocks })
    }
}

struct WordReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl WordReader<'_> {
    fn read(&mut self) -> Result<u64, SegmentError> {
        let bytes = self
            .data
            .get(self.offset..self.offset + 8)
            .ok_or(SegmentError::MalformedIndex("truncated"))?;
        self.offset += 8;
        Ok(u64::from_be_bytes(bytes.try_into().expect("slice of length 8")))
    }
}

/// Builds the two-level select tables: absolute superblock anchors and
/// 32-bit block deltas. Deltas that do not fit 32 bits are corruption.
fn build_jump_tables(upper: &[u64], count: u64) -> Result<(Vec<u64>, Vec<u32>), SegmentError> {
    let superblock_count = count.div_ceil(SUPERBLOCK_SPAN).max(1) as usize;
    let block_count = count.div_ceil(BLOCK_SPAN).max(1) as usize;
    let mut superblocks = vec![0u64; superblock_count];
    let mut blocks = vec![0u32; block_count];

    let mut ordinal = 0u64;
    for (word_index, &word) in upper.iter().enumerate() {
        let mut word = word;
        while word != 0 {
            let bit = word.trailing_zeros() as u64;
            let position = word_index as u64 * 64 + bit;
            if ordinal % SUPERBLOCK_SPAN == 0 {
                superblocks[(ordinal / SUPERBLOCK_SPAN) as usize] = position;
            }
            if ordinal % BLOCK_SPAN == 0 {
                let anchor = superblocks[(ordinal / SUPERBLOCK_SPAN) as usize];
                let delta = position - anchor;
                if delta > u32::MAX as u64 {
                    return Err(SegmentError::OffsetOverflow);
                }
                blocks[(ordinal / BLOCK_SPAN) as usize] = delta as u32;
            }
            ordinal += 1;
            word &= word - 1;
        }
    }
    if ordinal < count {
        return Err(SegmentError::MalformedIndex("fewer set bits than elements"));
    }
    Ok((superblocks, blocks))
}

/// Position of the `rank`-th set bit (0-indexed) within one word.
fn select_in_word(mut word: u64, mut rank: u32) -> u64 {
    loop {
        let bit = word.trailing_zeros();
        if rank == 0 {
            return bit as u64;
        }
        word &= word - 1;
        rank -= 1;
    }
}

fn write_bits(words: &mut [u64], bit_offset: u64, value: u64, width: u32) {
    let word = (bit_offset / 64) as usize;
    let shift = (bit_offset % 64) as u32;
    words[word] |= value << shift;
    if shift + width > 64 {
        words[word + 1] |= value >> (64 - shift);
    }
}

fn read_bits(words: &[u64], bit_offset: u64, width: u32) -> u64 {
    let word = (bit_offset / 64) as usize;
    let shift = (bit_offset % 64) as u32;
    let mask = if width == 64 { u64::MAX } else { (1u64 << width) - 1 };
    let mut value = words[word] >> shift;
    if shift + width > 64 {
        value |= words[word + 1] << (64 - shift);
    }
    value & mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn build(values: &[u64], max_value: u64) -> EliasFano {
        let mut builder = EliasFanoBuilder::new(max_value);
        for &value in values {
            builder.push(value).unwrap();
        }
        builder.finish().unwrap()
    }

    #[test]
    fn test_spec_seek_scenario() {
        let ef = build(&[10, 25, 42, 100, 200], 200);
        assert_eq!(ef.seek(0), Some(10));
        assert_eq!(ef.seek(25), Some(25));
        assert_eq!(ef.seek(26), Some(42));
        assert_eq!(ef.seek(150), Some(200));
        assert_eq!(ef.seek(201), None);
    }

    #[test]
    fn test_get_matches_input() {
        let values = [0u64, 0, 1, 5, 5, 5, 1000, 1_000_000];
        let ef = build(&values, 1_000_000);
        for (i, &value) in values.iter().enumerate() {
            assert_eq!(ef.get(i as u64), value);
        }
    }

    #[test]
    fn test_non_monotone_rejected() {
        let mut builder = EliasFanoBuilder::new(100);
        builder.push(10).unwrap();
        assert!(matches!(builder.push(9), Err(SegmentError::NonMonotoneOffsets)));
    }

    #[test]
    fn test_out_of_bound_rejected() {
        let mut builder = EliasFanoBuilder::new(100);
        assert!(matches!(builder.push(101), Err(SegmentError::NonMonotoneOffsets)));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let values: Vec<u64> = (0..5000).map(|i| i * 7).collect();
        let ef = build(&values, 5000 * 7);
        let restored = EliasFano::from_bytes(&ef.to_bytes()).unwrap();
        assert_eq!(restored, ef);
    }

    #[test]
    fn test_from_bytes_rejects_bit_count_mismatch() {
        let ef = build(&[1, 2, 3], 10);
        let mut bytes = ef.to_bytes();
        // Corrupt the element count.
        bytes[7] = 2;
        assert!(EliasFano::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_empty_sequence() {
        let ef = build(&[], 0);
        assert!(ef.is_empty());
        assert_eq!(ef.seek(0), None);
        assert_eq!(ef.iter().count(), 0);
    }

    proptest! {
        /// Invariant: build + enumerate returns the input exactly, and seek
        /// returns the smallest element >= target.
        #[test]
        fn prop_roundtrip_and_seek(
            mut values in proptest::collection::vec(0u64..100_000, 0..300),
            target in 0u64..120_000,
        ) {
            values.sort_unstable();
            let ef = build(&values, 100_000);
            let collected: Vec<u64> = ef.iter().collect();
            prop_assert_eq!(&collected, &values);

            let expected = values.iter().copied().find(|&value| value >= target);
            prop_assert_eq!(ef.seek(target), expected);
        }
    }
}
