use spv_consensus::{Hash256, ZERO_HASH};

/// Snapshot of the local chain tip as seen by readers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncState {
    /// `-1` until the first header is accepted.
    pub height: i64,
    pub block_hash: Hash256,
    pub compact_mode: bool,
    pub is_syncing: bool,
}

impl SyncState {
    pub fn empty(compact_mode: bool) -> Self {
        Self {
            height: -1,
            block_hash: ZERO_HASH,
            compact_mode,
            is_syncing: false,
        }
    }

    pub fn tip_height(&self) -> Option<u32> {
        u32::try_from(self.height).ok()
    }
}
