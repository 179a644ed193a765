//! Header ledger: the persisted shape of the local chain.
//!
//! In compact mode the ledger keeps one hash per complete chunk plus the raw
//! headers of the trailing partial chunk. In full mode it keeps every raw
//! header. Both modes track the hash of the last accepted header.

use async_trait::async_trait;
use spv_consensus::constants::{CHUNK_SIZE, HEADER_SIZE};
use spv_consensus::Hash256;

use crate::{Column, KeyValueStore, StoreError, WriteBatch};

pub type RawHeader = [u8; HEADER_SIZE];

/// A rewrite of the ledger tail applied as one unit: entries from the given
/// index on are replaced, and the last hash is moved.
#[derive(Clone, Copy, Debug)]
pub struct TailUpdate<'a> {
    pub last_hash: Hash256,
    /// Compact mode only.
    pub chunk_hashes: Option<(u32, &'a [Hash256])>,
    pub headers_from: u32,
    pub headers: &'a [RawHeader],
}

#[async_trait]
pub trait HeaderLedger: Send + Sync {
    fn compact_mode(&self) -> bool;

    /// Resolves once the backing store can serve reads.
    async fn ready(&self) -> Result<(), StoreError>;

    async fn last_hash(&self) -> Result<Option<Hash256>, StoreError>;
    async fn set_last_hash(&self, hash: &Hash256) -> Result<(), StoreError>;

    async fn chunk_hashes_count(&self) -> Result<u32, StoreError>;
    async fn chunk_hash(&self, index: u32) -> Result<Option<Hash256>, StoreError>;
    async fn put_chunk_hashes(&self, hashes: &[Hash256]) -> Result<(), StoreError>;
    async fn truncate_chunk_hashes(&self, limit: u32) -> Result<(), StoreError>;

    async fn headers_count(&self) -> Result<u32, StoreError>;
    async fn header(&self, index: u32) -> Result<Option<RawHeader>, StoreError>;
    async fn put_headers(&self, headers: &[RawHeader]) -> Result<(), StoreError>;
    async fn truncate_headers(&self, limit: u32) -> Result<(), StoreError>;

    /// Applies `update` atomically: readers see either none or all of it.
    async fn replace_tail(&self, update: TailUpdate<'_>) -> Result<(), StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}

const META_LAST_HASH: &[u8] = b"last_hash";
const META_CHUNK_COUNT: &[u8] = b"chunk_hash_count";
const META_HEADER_COUNT: &[u8] = b"header_count";

/// [`HeaderLedger`] over any [`KeyValueStore`]. Entries are keyed by their
/// big-endian index and every append or truncate is a single batch.
pub struct KvLedger<S> {
    store: S,
    compact: bool,
}

impl<S: KeyValueStore> KvLedger<S> {
    pub fn new(store: S, compact: bool) -> Self {
        Self { store, compact }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn require_compact(&self) -> Result<(), StoreError> {
        if self.compact {
            Ok(())
        } else {
            Err(StoreError::CompactModeDisabled)
        }
    }

    fn count(&self, key: &[u8]) -> Result<u32, StoreError> {
        match self.store.get(Column::Meta, key)? {
            None => Ok(0),
            Some(bytes) => {
                let raw: [u8; 4] = bytes.as_slice().try_into().map_err(|_| {
                    StoreError::Corrupt(format!("{} has {} bytes", String::from_utf8_lossy(key), bytes.len()))
                })?;
                Ok(u32::from_be_bytes(raw))
            }
        }
    }

    /// Stages replacing `column` entries from `from` on with `values`.
    fn stage_replace(
        &self,
        batch: &mut WriteBatch,
        column: Column,
        count_key: &[u8],
        from: u32,
        values: &[&[u8]],
    ) -> Result<(), StoreError> {
        let count = self.count(count_key)?;
        if from > count {
            return Err(StoreError::Corrupt(format!(
                "{} rewrite starts at {from} past {count} entries",
                column.as_str()
            )));
        }
        let end = from + values.len() as u32;
        batch.reserve(values.len() + count.saturating_sub(end) as usize + 1);
        for (offset, value) in values.iter().enumerate() {
            batch.put(column, (from + offset as u32).to_be_bytes(), *value);
        }
        for index in end..count {
            batch.delete(column, index.to_be_bytes());
        }
        batch.put(Column::Meta, count_key, end.to_be_bytes());
        Ok(())
    }

    fn append(&self, column: Column, count_key: &[u8], values: &[&[u8]]) -> Result<(), StoreError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        self.stage_replace(&mut batch, column, count_key, self.count(count_key)?, values)?;
        self.store.write_batch(&batch)
    }

    fn truncate(&self, column: Column, count_key: &[u8], limit: u32) -> Result<(), StoreError> {
        if limit >= self.count(count_key)? {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        self.stage_replace(&mut batch, column, count_key, limit, &[])?;
        self.store.write_batch(&batch)
    }

    fn entry<const N: usize>(&self, column: Column, index: u32) -> Result<Option<[u8; N]>, StoreError> {
        let Some(bytes) = self.store.get(column, &index.to_be_bytes())? else {
            return Ok(None);
        };
        let value = bytes.as_slice().try_into().map_err(|_| {
            StoreError::Corrupt(format!(
                "{} entry {index} has {} bytes, expected {}",
                column.as_str(),
                bytes.len(),
                N
            ))
        })?;
        Ok(Some(value))
    }
}

#[async_trait]
impl<S: KeyValueStore> HeaderLedger for KvLedger<S> {
    fn compact_mode(&self) -> bool {
        self.compact
    }

    async fn ready(&self) -> Result<(), StoreError> {
        let chunks = self.count(META_CHUNK_COUNT)?;
        let headers = self.count(META_HEADER_COUNT)?;
        if self.compact && headers >= CHUNK_SIZE {
            spv_log::log_warn!("compact ledger holds {headers} trailing headers, expected fewer than a chunk");
        }
        if !self.compact && chunks > 0 {
            spv_log::log_warn!("full ledger carries {chunks} stale chunk hashes");
        }
        Ok(())
    }

    async fn last_hash(&self) -> Result<Option<Hash256>, StoreError> {
        let Some(bytes) = self.store.get(Column::Meta, META_LAST_HASH)? else {
            return Ok(None);
        };
        let hash = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Corrupt(format!("last hash has {} bytes", bytes.len())))?;
        Ok(Some(hash))
    }

    async fn set_last_hash(&self, hash: &Hash256) -> Result<(), StoreError> {
        self.store.put(Column::Meta, META_LAST_HASH, hash)
    }

    async fn chunk_hashes_count(&self) -> Result<u32, StoreError> {
        self.require_compact()?;
        self.count(META_CHUNK_COUNT)
    }

    async fn chunk_hash(&self, index: u32) -> Result<Option<Hash256>, StoreError> {
        self.require_compact()?;
        self.entry::<32>(Column::ChunkHash, index)
    }

    async fn put_chunk_hashes(&self, hashes: &[Hash256]) -> Result<(), StoreError> {
        self.require_compact()?;
        let values: Vec<&[u8]> = hashes.iter().map(|hash| hash.as_slice()).collect();
        self.append(Column::ChunkHash, META_CHUNK_COUNT, &values)
    }

    async fn truncate_chunk_hashes(&self, limit: u32) -> Result<(), StoreError> {
        self.require_compact()?;
        self.truncate(Column::ChunkHash, META_CHUNK_COUNT, limit)
    }

    async fn headers_count(&self) -> Result<u32, StoreError> {
        self.count(META_HEADER_COUNT)
    }

    async fn header(&self, index: u32) -> Result<Option<RawHeader>, StoreError> {
        self.entry::<HEADER_SIZE>(Column::Header, index)
    }

    async fn put_headers(&self, headers: &[RawHeader]) -> Result<(), StoreError> {
        let values: Vec<&[u8]> = headers.iter().map(|header| header.as_slice()).collect();
        self.append(Column::Header, META_HEADER_COUNT, &values)
    }

    async fn truncate_headers(&self, limit: u32) -> Result<(), StoreError> {
        self.truncate(Column::Header, META_HEADER_COUNT, limit)
    }

    async fn replace_tail(&self, update: TailUpdate<'_>) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        if let Some((from, hashes)) = update.chunk_hashes {
            self.require_compact()?;
            let values: Vec<&[u8]> = hashes.iter().map(|hash| hash.as_slice()).collect();
            self.stage_replace(&mut batch, Column::ChunkHash, META_CHUNK_COUNT, from, &values)?;
        }
        let values: Vec<&[u8]> = update.headers.iter().map(|header| header.as_slice()).collect();
        self.stage_replace(&mut batch, Column::Header, META_HEADER_COUNT, update.headers_from, &values)?;
        batch.put(Column::Meta, META_LAST_HASH, update.last_hash);
        self.store.write_batch(&batch)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        for column in Column::ALL {
            for (key, _) in self.store.scan_prefix(column, &[])? {
                batch.delete(column, key.as_slice());
            }
        }
        self.store.write_batch(&batch)
    }
}
