//! Bounded LRU caches for headers, transaction payloads and re-verified chunks.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use spv_consensus::constants::{chunk_start, CHUNK_SIZE};
use spv_consensus::Hash256;
use spv_primitives::BlockHeader;

pub const DEFAULT_HEADER_CAPACITY: usize = 1_000;
pub const DEFAULT_TX_CAPACITY: usize = 100;
pub const DEFAULT_CHUNK_CAPACITY: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub headers: usize,
    pub txs: usize,
    pub chunks: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            headers: DEFAULT_HEADER_CAPACITY,
            txs: DEFAULT_TX_CAPACITY,
            chunks: DEFAULT_CHUNK_CAPACITY,
        }
    }
}

pub type VerifiedChunk = Arc<[BlockHeader]>;

pub struct ChainCache {
    headers: Mutex<LruCache<u32, BlockHeader>>,
    heights: Mutex<LruCache<Hash256, u32>>,
    txs: Mutex<LruCache<Hash256, String>>,
    chunks: Mutex<LruCache<u32, VerifiedChunk>>,
}

fn capacity(value: usize) -> NonZeroUsize {
    NonZeroUsize::new(value).unwrap_or(NonZeroUsize::MIN)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChainCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            headers: Mutex::new(LruCache::new(capacity(config.headers))),
            heights: Mutex::new(LruCache::new(capacity(config.headers))),
            txs: Mutex::new(LruCache::new(capacity(config.txs))),
            chunks: Mutex::new(LruCache::new(capacity(config.chunks))),
        }
    }

    pub fn header(&self, height: u32) -> Option<BlockHeader> {
        lock(&self.headers).get(&height).copied()
    }

    pub fn height_of(&self, hash: &Hash256) -> Option<u32> {
        lock(&self.heights).get(hash).copied()
    }

    pub fn insert_header(&self, height: u32, header: BlockHeader) {
        lock(&self.heights).put(header.hash(), height);
        lock(&self.headers).put(height, header);
    }

    pub fn tx(&self, txid: &Hash256) -> Option<String> {
        lock(&self.txs).get(txid).cloned()
    }

    pub fn insert_tx(&self, txid: Hash256, raw_hex: String) {
        lock(&self.txs).put(txid, raw_hex);
    }

    pub fn chunk(&self, index: u32) -> Option<VerifiedChunk> {
        lock(&self.chunks).get(&index).cloned()
    }

    pub fn insert_chunk(&self, index: u32, headers: VerifiedChunk) {
        lock(&self.chunks).put(index, headers);
    }

    pub fn remove_chunk(&self, index: u32) {
        lock(&self.chunks).pop(&index);
    }

    /// Drops every header and chunk entry at or above `height`.
    pub fn invalidate_from(&self, height: u32) {
        let mut headers = lock(&self.headers);
        let stale: Vec<u32> = headers.iter().map(|(h, _)| *h).filter(|h| *h >= height).collect();
        for h in stale {
            headers.pop(&h);
        }
        drop(headers);

        let mut heights = lock(&self.heights);
        let stale: Vec<Hash256> = heights
            .iter()
            .filter(|(_, h)| **h >= height)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in stale {
            heights.pop(&hash);
        }
        drop(heights);

        let mut chunks = lock(&self.chunks);
        let stale: Vec<u32> = chunks
            .iter()
            .map(|(index, _)| *index)
            .filter(|index| chunk_start(*index) + CHUNK_SIZE > height)
            .collect();
        for index in stale {
            chunks.pop(&index);
        }
    }
}

impl Default for ChainCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(nonce: u32) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block: [0u8; 32],
            merkle_root: [0u8; 32],
            time: 0,
            bits: 0x207f_ffff,
            nonce,
        }
    }

    #[test]
    fn least_recently_used_header_is_evicted() {
        let cache = ChainCache::new(CacheConfig {
            headers: 2,
            ..CacheConfig::default()
        });
        cache.insert_header(1, header(1));
        cache.insert_header(2, header(2));
        assert!(cache.header(1).is_some());
        cache.insert_header(3, header(3));
        assert_eq!(cache.header(2), None);
        assert_eq!(cache.header(1), Some(header(1)));
        assert_eq!(cache.height_of(&header(3).hash()), Some(3));
    }

    #[test]
    fn invalidate_from_drops_entries_at_or_above() {
        let cache = ChainCache::default();
        for height in [10, 4031, 4032, 5000] {
            cache.insert_header(height, header(height));
        }
        cache.insert_chunk(0, Arc::from(vec![header(0)]));
        cache.insert_chunk(1, Arc::from(vec![header(1)]));
        cache.insert_tx([1u8; 32], "00".to_string());

        cache.invalidate_from(4032);
        assert!(cache.header(10).is_some());
        assert!(cache.header(4031).is_some());
        assert_eq!(cache.header(4032), None);
        assert_eq!(cache.height_of(&header(5000).hash()), None);
        assert!(cache.chunk(0).is_some());
        assert!(cache.chunk(1).is_some());

        cache.invalidate_from(4031);
        assert!(cache.chunk(1).is_none());
        assert_eq!(cache.tx(&[1u8; 32]).as_deref(), Some("00"));
    }
}
