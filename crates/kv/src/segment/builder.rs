//! Segment file construction.
//!
//! The builder is the write-side counterpart of [Decompressor]: words go in,
//! a segment image and the body offset of every word come out. Pattern
//! discovery is left to offline tooling; the builder greedily applies
//! whatever pattern dictionary it is given (possibly none) and Huffman-codes
//! the resulting position and pattern streams.
//!
//! [Decompressor]: super::Decompressor

use super::{
    bitstream::BitWriter,
    errors::SegmentError,
    huffman::{depths_from_frequencies, CodeTable},
};
use std::{collections::BTreeMap, path::Path};

/// A built segment image plus the body offsets of its words, ready to feed
/// an [EliasFanoBuilder].
///
/// [EliasFanoBuilder]: super::EliasFanoBuilder
#[derive(Debug)]
pub struct SegmentFile {
    /// The serialized segment.
    pub bytes: Vec<u8>,
    /// Byte offset of each word within the compressed body.
    pub word_offsets: Vec<u64>,
}

impl SegmentFile {
    /// Writes the segment image to `path`.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<(), SegmentError> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

/// Accumulates words and serializes them into the segment format.
#[derive(Debug, Default)]
pub struct SegmentBuilder {
    words: Vec<Vec<u8>>,
    patterns: Vec<Vec<u8>>,
}

/// One pattern occurrence inside a word: byte offset and pattern index.
type Occurrence = (usize, usize);

impl SegmentBuilder {
    /// Creates an empty builder with no pattern dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the pattern dictionary applied to every word. Empty patterns are
    /// ignored.
    pub fn with_patterns(mut self, patterns: Vec<Vec<u8>>) -> Self {
        self.patterns = patterns.into_iter().filter(|pattern| !pattern.is_empty()).collect();
        self
    }

    /// Appends one word.
    pub fn add_word(&mut self, word: &[u8]) {
        self.words.push(word.to_vec());
    }

    /// Number of words accumulated.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether no words have been added.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Greedy longest-match pass over one word.
    fn find_occurrences(&self, word: &[u8]) -> Vec<Occurrence> {
        let mut occurrences = Vec::new();
        let mut i = 0;
        while i < word.len() {
            let best = self
                .patterns
                .iter()
                .enumerate()
                .filter(|(_, pattern)| word[i..].starts_with(pattern))
                .max_by_key(|(_, pattern)| pattern.len());
            match best {
                Some((index, pattern)) => {
                    occurrences.push((i, index));
                    i += pattern.len();
                }
                None => i += 1,
            }
        }
        occurrences
    }

    /// Serializes the segment.
    pub fn build(&self) -> Result<SegmentFile, SegmentError> {
        // Plan every word and collect symbol frequencies.
        let mut position_frequencies: BTreeMap<u64, u64> = BTreeMap::new();
        let mut pattern_frequencies: BTreeMap<usize, u64> = BTreeMap::new();
        let mut plans: Vec<Vec<Occurrence>> = Vec::with_capacity(self.words.len());
        let mut empty_words_count = 0u64;

        for word in &self.words {
            *position_frequencies.entry(word.len() as u64 + 1).or_default() += 1;
            if word.is_empty() {
                empty_words_count += 1;
                plans.push(Vec::new());
                continue;
            }
            let occurrences = self.find_occurrences(word);
            let mut previous_end = 0usize;
            for &(start, pattern_index) in &occurrences {
                let gap = (start - previous_end) as u64;
                *position_frequencies.entry(gap + 1).or_default() += 1;
                *pattern_frequencies.entry(pattern_index).or_default() += 1;
                previous_end = start + self.patterns[pattern_index].len();
            }
            // Terminator.
            *position_frequencies.entry(0).or_default() += 1;
            plans.push(occurrences);
        }

        // Assign canonical codes over the used symbols.
        let (position_symbols, position_dict, position_codes) =
            build_position_alphabet(&position_frequencies)?;
        let (pattern_symbols, pattern_dict, pattern_codes) =
            build_pattern_alphabet(&pattern_frequencies, &self.patterns)?;

        // Encode the body.
        let mut body = BitWriter::new();
        let mut word_offsets = Vec::with_capacity(self.words.len());
        for (word, occurrences) in self.words.iter().zip(&plans) {
            word_offsets.push(body.byte_position() as u64);
            emit_position(&position_symbols, &position_codes, word.len() as u64 + 1, &mut body);
            if word.is_empty() {
                body.align();
                continue;
            }
            let mut previous_end = 0usize;
            for &(start, pattern_index) in occurrences {
                let gap = (start - previous_end) as u64;
                emit_position(&position_symbols, &position_codes, gap + 1, &mut body);
                let rank = pattern_symbols[&pattern_index];
                pattern_codes.emit(rank, &mut body);
                previous_end = start + self.patterns[pattern_index].len();
            }
            emit_position(&position_symbols, &position_codes, 0, &mut body);
            body.align();
            // Raw bytes for every uncovered gap, in order.
            let mut previous_end = 0usize;
            for &(start, pattern_index) in occurrences {
                body.extend_bytes(&word[previous_end..start]);
                previous_end = start + self.patterns[pattern_index].len();
            }
            body.extend_bytes(&word[previous_end..]);
        }

        // Assemble the file.
        let body = body.into_bytes();
        let mut bytes =
            Vec::with_capacity(32 + pattern_dict.len() + position_dict.len() + body.len());
        bytes.extend_from_slice(&(self.words.len() as u64).to_be_bytes());
        bytes.extend_from_slice(&empty_words_count.to_be_bytes());
        bytes.extend_from_slice(&(pattern_dict.len() as u64).to_be_bytes());
        bytes.extend_from_slice(&pattern_dict);
        bytes.extend_from_slice(&(position_dict.len() as u64).to_be_bytes());
        bytes.extend_from_slice(&position_dict);
        bytes.extend_from_slice(&body);
        Ok(SegmentFile { bytes, word_offsets })
    }
}

fn emit_position(
    symbols: &BTreeMap<u64, usize>,
    codes: &CodeTable,
    value: u64,
    body: &mut BitWriter,
) {
    codes.emit(symbols[&value], body);
}

/// Returns (symbol → canonical rank, serialized dictionary, code table) for
/// the position alphabet.
fn build_position_alphabet(
    frequencies: &BTreeMap<u64, u64>,
) -> Result<(BTreeMap<u64, usize>, Vec<u8>, CodeTable), SegmentError> {
    let symbols: Vec<u64> = frequencies.keys().copied().collect();
    let weights: Vec<u64> = frequencies.values().copied().collect();
    let depths = depths_from_frequencies(&weights)?;

    // Canonical order: (depth, symbol value).
    let mut order: Vec<usize> = (0..symbols.len()).collect();
    order.sort_by_key(|&i| (depths[i], symbols[i]));
    let canonical_depths: Vec<u64> = order.iter().map(|&i| depths[i]).collect();

    let mut ranks = BTreeMap::new();
    let mut dict = Vec::new();
    for (rank, &i) in order.iter().enumerate() {
        ranks.insert(symbols[i], rank);
        write_uvarint(&mut dict, canonical_depths[rank]);
        write_uvarint(&mut dict, symbols[i]);
    }
    Ok((ranks, dict, CodeTable::assign(&canonical_depths)))
}

/// Returns (pattern index → canonical rank, serialized dictionary, code
/// table) for the pattern alphabet. Unused patterns are dropped.
fn build_pattern_alphabet(
    frequencies: &BTreeMap<usize, u64>,
    patterns: &[Vec<u8>],
) -> Result<(BTreeMap<usize, usize>, Vec<u8>, CodeTable), SegmentError> {
    let used: Vec<usize> = frequencies.keys().copied().collect();
    let weights: Vec<u64> = frequencies.values().copied().collect();
    let depths = depths_from_frequencies(&weights)?;

    let mut order: Vec<usize> = (0..used.len()).collect();
    order.sort_by_key(|&i| (depths[i], &patterns[used[i]]));
    let canonical_depths: Vec<u64> = order.iter().map(|&i| depths[i]).collect();

    let mut ranks = BTreeMap::new();
    let mut dict = Vec::new();
    for (rank, &i) in order.iter().enumerate() {
        let pattern = &patterns[used[i]];
        ranks.insert(used[i], rank);
        write_uvarint(&mut dict, canonical_depths[rank]);
        write_uvarint(&mut dict, pattern.len() as u64);
        dict.extend_from_slice(pattern);
    }
    Ok((ranks, dict, CodeTable::assign(&canonical_depths)))
}

fn write_uvarint(out: &mut Vec<u8>, value: u64) {
    let mut buf = unsigned_varint::encode::u64_buffer();
    out.extend_from_slice(unsigned_varint::encode::u64(value, &mut buf));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_builder_produces_header_only() {
        let file = SegmentBuilder::new().build().unwrap();
        // Four u64 header words and two empty dictionaries.
        assert_eq!(file.bytes.len(), 32);
        assert!(file.word_offsets.is_empty());
    }

    #[test]
    fn test_greedy_matching_prefers_longest() {
        let builder =
            SegmentBuilder::new().with_patterns(vec![b"ab".to_vec(), b"abc".to_vec()]);
        let occurrences = builder.find_occurrences(b"abcab");
        assert_eq!(occurrences, vec![(0, 1), (3, 0)]);
    }

    #[test]
    fn test_word_offsets_are_monotone() {
        let mut builder = SegmentBuilder::new();
        for i in 0u8..10 {
            builder.add_word(&vec![i; i as usize]);
        }
        let file = builder.build().unwrap();
        for window in file.word_offsets.windows(2) {
            assert!(window[0] <= window[1]);
        }
    }
}
