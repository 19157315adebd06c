//! ICY metadata block encoding.
//!
//! A block on the wire is a length byte followed by `StreamTitle='...';`,
//! zero-padded to a multiple of 16 bytes. The length byte counts 16-byte
//! units, so a block carries at most `255 * 16` bytes of text.

use bytes::Bytes;

const STREAM_TITLE_PREFIX: &[u8] = b"StreamTitle='";
const STREAM_TITLE_SUFFIX: &[u8] = b"';";

/// Length of `StreamTitle='';`, the payload of an empty title.
pub const BASE_SIZE: usize = STREAM_TITLE_PREFIX.len() + STREAM_TITLE_SUFFIX.len();

/// Largest payload a single length byte can describe.
pub const MAX_BLOCK_SIZE: usize = 255 * 16;

/// Longest title that fits in a block; longer titles are truncated.
pub const MAX_TITLE_LEN: usize = MAX_BLOCK_SIZE - BASE_SIZE;

/// Size of the padded payload (excluding the length byte) for a title of
/// `title_len` bytes, after truncation.
pub fn block_size(title_len: usize) -> usize {
    let title_len = title_len.min(MAX_TITLE_LEN);
    (BASE_SIZE + title_len).div_ceil(16) * 16
}

/// Builds the wire representation of a metadata block carrying `title`.
///
/// Truncation happens on bytes, not characters: the block is a byte-oriented
/// protocol element and clients decode it leniently.
pub fn encode_icy_block(title: &str) -> Bytes {
    let raw = title.as_bytes();
    let raw = &raw[..raw.len().min(MAX_TITLE_LEN)];

    let size = block_size(raw.len());

    let mut block = Vec::with_capacity(1 + size);
    block.push((size / 16) as u8);
    block.extend_from_slice(STREAM_TITLE_PREFIX);
    block.extend_from_slice(raw);
    block.extend_from_slice(STREAM_TITLE_SUFFIX);
    block.resize(1 + size, 0);

    Bytes::from(block)
}
