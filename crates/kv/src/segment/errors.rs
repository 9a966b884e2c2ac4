//! Segment corruption and I/O errors.

use thiserror::Error;

/// Maximum Huffman code depth a segment dictionary may declare.
pub const MAX_HUFFMAN_DEPTH: u64 = 50;

/// Failures while reading or building segment files and their indexes.
/// All corruption variants are structural: the stage consuming the segment
/// must abort.
#[derive(Error, Debug)]
pub enum SegmentError {
    /// Underlying file I/O failed.
    #[error("segment I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The file is smaller than the fixed header.
    #[error("segment file too short: {len} bytes")]
    TooShort {
        /// Observed file length.
        len: usize,
    },
    /// A dictionary ended mid-entry.
    #[error("truncated dictionary")]
    TruncatedDictionary,
    /// A dictionary declared a code depth beyond [MAX_HUFFMAN_DEPTH].
    #[error("dictionary depth {depth} exceeds maximum {MAX_HUFFMAN_DEPTH}")]
    DepthTooLarge {
        /// The declared depth.
        depth: u64,
    },
    /// The dictionary's depth sequence does not describe a canonical tree.
    #[error("dictionary does not form a canonical code tree")]
    MalformedDictionary,
    /// The compressed body ended before the declared word count was read.
    #[error("truncated segment body")]
    TruncatedBody,
    /// A word's pattern positions escape the word's declared length.
    #[error("pattern position out of word bounds")]
    PatternOutOfBounds,
    /// A code was requested from an empty dictionary.
    #[error("code referenced an empty dictionary")]
    EmptyDictionary,
    /// An index offset sequence was not monotone non-decreasing.
    #[error("offset sequence is not monotone")]
    NonMonotoneOffsets,
    /// A jump-table delta did not fit in 32 bits.
    #[error("offset delta exceeds 32 bits")]
    OffsetOverflow,
    /// A serialized index failed to parse.
    #[error("malformed offset index: {0}")]
    MalformedIndex(&'static str),
}
