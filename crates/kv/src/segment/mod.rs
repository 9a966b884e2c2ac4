//! Immutable history segments.
//!
//! A segment file packs a run of words (header RLPs, body RLPs, transaction
//! envelopes) with pattern + Huffman coding:
//!
//! ```text
//! [wordsCount:u64 BE][emptyWordsCount:u64 BE]
//! [patternDictSize:u64 BE][patternDict]
//! [posDictSize:u64 BE][posDict]
//! [compressedBody]
//! ```
//!
//! The pattern dictionary is a sequence of `(depth:uvarint, length:uvarint,
//! bytes)` canonical Huffman leaves; the position dictionary has the same
//! shape with a `position:uvarint` payload. Each body word starts byte
//! aligned with a position code carrying `length + 1`, followed by
//! `(relative_offset + 1, pattern)` code pairs terminated by position code
//! zero, then byte-aligned raw bytes filling the uncovered gaps.

mod bitstream;
use bitstream::BitReader;

mod builder;
pub use builder::{SegmentBuilder, SegmentFile};

mod elias_fano;
pub use elias_fano::{EliasFano, EliasFanoBuilder};

mod errors;
pub use errors::{SegmentError, MAX_HUFFMAN_DEPTH};

mod huffman;
use huffman::HuffmanTree;

use std::path::Path;

/// Extension used by segment files.
pub const SEGMENT_EXT: &str = "seg";

/// Extension used by companion offset indexes.
pub const INDEX_EXT: &str = "idx";

/// Minimum size of a well-formed segment file: the four fixed header words.
const MIN_SEGMENT_SIZE: usize = 32;

/// The table family a segment carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Header RLPs.
    Headers,
    /// Body envelopes.
    Bodies,
    /// Transaction envelopes.
    Transactions,
}

impl SegmentKind {
    /// The kind tag used in file names.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Headers => "headers",
            Self::Bodies => "bodies",
            Self::Transactions => "transactions",
        }
    }

    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "headers" => Some(Self::Headers),
            "bodies" => Some(Self::Bodies),
            "transactions" => Some(Self::Transactions),
            _ => None,
        }
    }
}

/// The block range a segment file covers, parsed from its name:
/// `<kind>-<fromBlock:06>-<toBlock:06>.seg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRange {
    /// What the segment stores.
    pub kind: SegmentKind,
    /// First block covered.
    pub from: u64,
    /// One past the last block covered.
    pub to: u64,
}

impl SegmentRange {
    /// The canonical file name for this range.
    pub fn file_name(&self) -> String {
        format!("{}-{:06}-{:06}.{SEGMENT_EXT}", self.kind.as_str(), self.from, self.to)
    }

    /// The companion index file name.
    pub fn index_file_name(&self) -> String {
        format!("{}-{:06}-{:06}.{INDEX_EXT}", self.kind.as_str(), self.from, self.to)
    }

    /// Parses a segment file name. Returns `None` for foreign files.
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(&format!(".{SEGMENT_EXT}"))?;
        let mut parts = stem.splitn(3, '-');
        let kind = SegmentKind::parse(parts.next()?)?;
        let from = parts.next()?.parse().ok()?;
        let to = parts.next()?.parse().ok()?;
        (from <= to).then_some(Self { kind, from, to })
    }
}

/// A parsed, read-only segment file. One decompressor may serve many
/// concurrent [Getter]s; each getter owns its own read position.
#[derive(Debug)]
pub struct Decompressor {
    data: Vec<u8>,
    words_count: u64,
    empty_words_count: u64,
    pattern_tree: HuffmanTree<Vec<u8>>,
    position_tree: HuffmanTree<u64>,
    body_start: usize,
}

impl Decompressor {
    /// Opens and parses a segment file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SegmentError> {
        Self::from_bytes(std::fs::read(path)?)
    }

    /// Parses a segment image.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, SegmentError> {
        if data.len() < MIN_SEGMENT_SIZE {
            return Err(SegmentError::TooShort { len: data.len() });
        }
        let words_count = read_u64(&data, 0)?;
        let empty_words_count = read_u64(&data, 8)?;

        let pattern_dict_size = read_u64(&data, 16)? as usize;
        let pattern_dict_end = 24usize
            .checked_add(pattern_dict_size)
            .filter(|&end| end <= data.len())
            .ok_or(SegmentError::TruncatedDictionary)?;
        let pattern_tree = parse_pattern_dict(&data[24..pattern_dict_end])?;

        let position_dict_size = read_u64(&data, pattern_dict_end)? as usize;
        let position_dict_start = pattern_dict_end + 8;
        let position_dict_end = position_dict_start
            .checked_add(position_dict_size)
            .filter(|&end| end <= data.len())
            .ok_or(SegmentError::TruncatedDictionary)?;
        let position_tree = parse_position_dict(&data[position_dict_start..position_dict_end])?;

        Ok(Self {
            data,
            words_count,
            empty_words_count,
            pattern_tree,
            position_tree,
            body_start: position_dict_end,
        })
    }

    /// Number of words stored.
    pub const fn words_count(&self) -> u64 {
        self.words_count
    }

    /// Number of zero-length words stored.
    pub const fn empty_words_count(&self) -> u64 {
        self.empty_words_count
    }

    /// Opens a getter positioned at the first word.
    pub fn getter(&self) -> Getter<'_> {
        Getter { segment: self, bits: BitReader::new(self.body()), word_index: 0 }
    }

    /// Decodes the single word starting at `offset` bytes into the body, as
    /// recorded by the companion offset index.
    pub fn word_at(&self, offset: u64) -> Result<Vec<u8>, SegmentError> {
        let mut bits = BitReader::at_byte(self.body(), offset as usize);
        self.read_word(&mut bits)
    }

    fn body(&self) -> &[u8] {
        &self.data[self.body_start..]
    }

    fn read_word(&self, bits: &mut BitReader<'_>) -> Result<Vec<u8>, SegmentError> {
        let word_length = match *self.position_tree.decode(bits)? {
            0 => return Err(SegmentError::TruncatedBody),
            length_plus_one => (length_plus_one - 1) as usize,
        };
        if word_length == 0 {
            bits.align();
            return Ok(Vec::new());
        }

        // First pass: collect (position, pattern) pairs from the bit stream.
        let mut covers: Vec<(usize, &[u8])> = Vec::new();
        let mut cursor = 0usize;
        loop {
            let position = *self.position_tree.decode(bits)?;
            if position == 0 {
                break;
            }
            let gap = (position - 1) as usize;
            let start = cursor + gap;
            let pattern = self.pattern_tree.decode(bits)?.as_slice();
            cursor = start + pattern.len();
            if cursor > word_length {
                return Err(SegmentError::PatternOutOfBounds);
            }
            covers.push((start, pattern));
        }
        bits.align();

        // Second pass: lay patterns into the word and fill the gaps with raw
        // bytes from the same region.
        let mut word = vec![0u8; word_length];
        let mut previous_end = 0usize;
        for (start, pattern) in &covers {
            let raw = bits.read_bytes(start - previous_end)?;
            word[previous_end..*start].copy_from_slice(raw);
            word[*start..*start + pattern.len()].copy_from_slice(pattern);
            previous_end = start + pattern.len();
        }
        let raw = bits.read_bytes(word_length - previous_end)?;
        word[previous_end..].copy_from_slice(raw);
        Ok(word)
    }
}

/// A sequential reader over one segment. Not thread-safe; open one getter
/// per reading thread.
#[derive(Debug)]
pub struct Getter<'a> {
    segment: &'a Decompressor,
    bits: BitReader<'a>,
    word_index: u64,
}

impl Getter<'_> {
    /// Whether another word is available.
    pub fn has_next(&self) -> bool {
        self.word_index < self.segment.words_count
    }

    /// Byte offset of the next word within the body. Valid at word
    /// boundaries, which is whenever the previous `next` returned.
    pub fn offset(&self) -> u64 {
        self.bits.byte_position() as u64
    }

    /// Decodes the next word.
    pub fn next(&mut self) -> Result<Vec<u8>, SegmentError> {
        if !self.has_next() {
            return Err(SegmentError::TruncatedBody);
        }
        let word = self.segment.read_word(&mut self.bits)?;
        self.word_index += 1;
        Ok(word)
    }

    /// Decodes and discards the next word, returning its length.
    pub fn skip(&mut self) -> Result<usize, SegmentError> {
        Ok(self.next()?.len())
    }
}

fn read_u64(data: &[u8], offset: usize) -> Result<u64, SegmentError> {
    let bytes = data
        .get(offset..offset + 8)
        .ok_or(SegmentError::TruncatedDictionary)?
        .try_into()
        .expect("slice of length 8");
    Ok(u64::from_be_bytes(bytes))
}

fn read_uvarint(buf: &mut &[u8]) -> Result<u64, SegmentError> {
    let (value, rest) =
        unsigned_varint::decode::u64(buf).map_err(|_| SegmentError::TruncatedDictionary)?;
    *buf = rest;
    Ok(value)
}

fn parse_pattern_dict(mut buf: &[u8]) -> Result<HuffmanTree<Vec<u8>>, SegmentError> {
    let mut entries = Vec::new();
    while !buf.is_empty() {
        let depth = read_uvarint(&mut buf)?;
        let length = read_uvarint(&mut buf)? as usize;
        let bytes = buf.get(..length).ok_or(SegmentError::TruncatedDictionary)?.to_vec();
        buf = &buf[length..];
        entries.push((depth, bytes));
    }
    HuffmanTree::from_depths(entries)
}

fn parse_position_dict(mut buf: &[u8]) -> Result<HuffmanTree<u64>, SegmentError> {
    let mut entries = Vec::new();
    while !buf.is_empty() {
        let depth = read_uvarint(&mut buf)?;
        let position = read_uvarint(&mut buf)?;
        entries.push((depth, position));
    }
    HuffmanTree::from_depths(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_file_name_roundtrip() {
        let range = SegmentRange { kind: SegmentKind::Headers, from: 0, to: 500_000 };
        assert_eq!(range.file_name(), "headers-000000-500000.seg");
        assert_eq!(SegmentRange::parse_file_name(&range.file_name()), Some(range));
        assert_eq!(SegmentRange::parse_file_name("headers-000000-500000.idx"), None);
        assert_eq!(SegmentRange::parse_file_name("junk-000000-500000.seg"), None);
        assert_eq!(SegmentRange::parse_file_name("bodies-000500-000100.seg"), None);
    }

    #[test]
    fn test_short_file_rejected() {
        let result = Decompressor::from_bytes(vec![0u8; MIN_SEGMENT_SIZE - 1]);
        assert!(matches!(result, Err(SegmentError::TooShort { .. })));
    }

    #[test]
    fn test_empty_segment() {
        let file = SegmentBuilder::new().build().unwrap();
        let segment = Decompressor::from_bytes(file.bytes).unwrap();
        assert_eq!(segment.words_count(), 0);
        assert!(!segment.getter().has_next());
    }

    #[test]
    fn test_roundtrip_raw_words() {
        let words: Vec<Vec<u8>> =
            vec![b"alpha".to_vec(), Vec::new(), b"beta".to_vec(), b"alphabet".to_vec()];
        let mut builder = SegmentBuilder::new();
        for word in &words {
            builder.add_word(word);
        }
        let file = builder.build().unwrap();
        let segment = Decompressor::from_bytes(file.bytes).unwrap();
        assert_eq!(segment.words_count(), words.len() as u64);
        assert_eq!(segment.empty_words_count(), 1);

        let mut getter = segment.getter();
        for word in &words {
            assert!(getter.has_next());
            assert_eq!(&getter.next().unwrap(), word);
        }
        assert!(!getter.has_next());
    }

    #[test]
    fn test_roundtrip_with_patterns() {
        let words: Vec<Vec<u8>> = vec![
            b"the quick brown fox".to_vec(),
            b"the slow brown dog".to_vec(),
            b"brown the brown".to_vec(),
        ];
        let mut builder =
            SegmentBuilder::new().with_patterns(vec![b"the ".to_vec(), b"brown".to_vec()]);
        for word in &words {
            builder.add_word(word);
        }
        let file = builder.build().unwrap();
        let segment = Decompressor::from_bytes(file.bytes).unwrap();

        let mut getter = segment.getter();
        for word in &words {
            assert_eq!(&getter.next().unwrap(), word);
        }
    }

    #[test]
    fn test_word_at_offsets() {
        let words: Vec<Vec<u8>> = (0u8..20).map(|i| vec![i; (i as usize * 3) % 7]).collect();
        let mut builder = SegmentBuilder::new().with_patterns(vec![vec![5, 5, 5]]);
        for word in &words {
            builder.add_word(word);
        }
        let file = builder.build().unwrap();
        let segment = Decompressor::from_bytes(file.bytes).unwrap();
        for (i, word) in words.iter().enumerate() {
            assert_eq!(&segment.word_at(file.word_offsets[i]).unwrap(), word);
        }
    }

    proptest! {
        /// Invariant: compress-then-decompress returns the word sequence
        /// exactly, in insertion order.
        #[test]
        fn prop_segment_roundtrip(
            words in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..40), 0..40),
            patterns in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..6), 0..4),
        ) {
            let mut builder = SegmentBuilder::new().with_patterns(patterns);
            for word in &words {
                builder.add_word(word);
            }
            let file = builder.build().unwrap();
            let segment = Decompressor::from_bytes(file.bytes).unwrap();
            prop_assert_eq!(segment.words_count(), words.len() as u64);

            let mut getter = segment.getter();
            for word in &words {
                prop_assert_eq!(&getter.next().unwrap(), word);
            }
            prop_assert!(!getter.has_next());
        }
    }
}
