//! Consensus-wide constants shared across validation and sync.

/// Serialized size of a block header, in bytes.
pub const HEADER_SIZE: usize = 80;
/// Number of headers per difficulty retarget period.
pub const CHUNK_SIZE: u32 = 2016;
/// Serialized size of a complete chunk, in bytes.
pub const CHUNK_BYTES: usize = HEADER_SIZE * CHUNK_SIZE as usize;
/// Expected duration of one retarget period (two weeks).
pub const TARGET_TIMESPAN: i64 = 14 * 24 * 60 * 60;
/// Expected spacing between blocks.
pub const TARGET_SPACING: i64 = 10 * 60;
/// Testnet accepts a max-target header once this many seconds passed since its parent.
pub const MIN_DIFFICULTY_GAP: i64 = 2 * TARGET_SPACING;
/// Tip deltas above this are synchronized chunk by chunk.
pub const MAX_HEADERED_DELTA: i64 = 50;

pub fn chunk_index(height: u32) -> u32 {
    height / CHUNK_SIZE
}

pub fn chunk_start(index: u32) -> u32 {
    index * CHUNK_SIZE
}
