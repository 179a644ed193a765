//! Header sync: reconciles the local ledger with the backend's tip.
//!
//! Large gaps (and anything that could hide a reorg) are synced chunk by chunk,
//! walking backward while the fetched chunk does not link to the local chain.
//! Small forward gaps on an initialized chain are synced header by header.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spv_consensus::constants::{chunk_index, chunk_start, CHUNK_BYTES, CHUNK_SIZE, MAX_HEADERED_DELTA};
use spv_consensus::{hash256_to_hex, ConsensusParams, Hash256, ZERO_HASH};
use spv_pow::{compute_target, verify_header, verify_headers, Target, VerifyHeaderError, VerifyReason};
use spv_primitives::{chunk_hash, decode_chunk, BlockHeader};
use spv_storage::{HeaderLedger, RawHeader, StoreError, TailUpdate};
use tokio::sync::{broadcast, watch, Mutex, RwLock};

use crate::cache::{ChainCache, VerifiedChunk};
use crate::error::ChainError;
use crate::events::BlockchainEvent;
use crate::network::{Network, NetworkError};
use crate::state::SyncState;

/// Trusted `{last_hash, chunk_hashes}` bundle used to skip the initial download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkSeed {
    pub last_hash: Hash256,
    pub chunk_hashes: Vec<Hash256>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tip {
    pub height: u32,
    pub hash: Hash256,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Chunked,
    Headered,
}

/// First and last header of the chunk preceding the one being verified.
#[derive(Clone, Copy)]
struct ChunkBounds {
    index: u32,
    first: BlockHeader,
    last: BlockHeader,
}

enum Anchor {
    Genesis,
    Bounds(ChunkBounds),
    /// The stored copy of the preceding chunk no longer matches the backend,
    /// which now serves these bytes for it.
    Stale(Vec<u8>),
}

enum StoredChunk {
    Verified(VerifiedChunk),
    /// The backend's bytes for a hashed chunk whose digest no longer matches.
    Replaced(Vec<u8>),
}

pub struct SyncEngine<L, N> {
    params: ConsensusParams,
    ledger: Arc<L>,
    network: Arc<N>,
    cache: Arc<ChainCache>,
    state: watch::Sender<SyncState>,
    events: broadcast::Sender<BlockchainEvent>,
    pass: Mutex<()>,
    /// Held for writing while a commit rewrites the ledger and moves the tip.
    commit: RwLock<()>,
    ready: AtomicBool,
}

impl<L, N> SyncEngine<L, N>
where
    L: HeaderLedger,
    N: Network,
{
    pub fn new(
        params: ConsensusParams,
        ledger: Arc<L>,
        network: Arc<N>,
        cache: Arc<ChainCache>,
        events: broadcast::Sender<BlockchainEvent>,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::empty(ledger.compact_mode()));
        Self {
            params,
            ledger,
            network,
            cache,
            state,
            events,
            pass: Mutex::new(()),
            commit: RwLock::new(()),
            ready: AtomicBool::new(false),
        }
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn network(&self) -> &Arc<N> {
        &self.network
    }

    pub fn cache(&self) -> &Arc<ChainCache> {
        &self.cache
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn emit(&self, event: BlockchainEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Loads the tip from the ledger, applying `seed` to an empty compact ledger.
    pub async fn initialize(&self, seed: Option<ChunkSeed>) -> Result<SyncState, ChainError> {
        self.ledger.ready().await?;
        let compact = self.ledger.compact_mode();

        let mut chunks = if compact {
            self.ledger.chunk_hashes_count().await?
        } else {
            0
        };
        let headers = self.ledger.headers_count().await?;

        if compact && chunks == 0 && headers == 0 {
            if let Some(seed) = seed.filter(|seed| !seed.chunk_hashes.is_empty()) {
                self.ledger
                    .replace_tail(TailUpdate {
                        last_hash: seed.last_hash,
                        chunk_hashes: Some((0, seed.chunk_hashes.as_slice())),
                        headers_from: 0,
                        headers: &[],
                    })
                    .await?;
                chunks = seed.chunk_hashes.len() as u32;
                spv_log::log_info!("loaded {chunks} seeded chunk hashes");
            }
        }

        let height = i64::from(chunks) * i64::from(CHUNK_SIZE) + i64::from(headers) - 1;
        let block_hash = if height >= 0 {
            self.ledger
                .last_hash()
                .await?
                .ok_or_else(|| StoreError::Corrupt("ledger has headers but no last hash".to_string()))?
        } else {
            ZERO_HASH
        };

        let state = SyncState {
            height,
            block_hash,
            compact_mode: compact,
            is_syncing: false,
        };
        self.state.send_replace(state);
        self.ready.store(true, Ordering::Release);
        spv_log::log_info!(
            "header ledger loaded: height {height} tip {} ({} mode)",
            hash256_to_hex(&block_hash),
            if compact { "compact" } else { "full" }
        );
        Ok(state)
    }

    /// Runs one sync pass against `tip`. Passes are serialized; a caller that
    /// arrives while one is running waits for it and then syncs again.
    pub async fn sync_to(&self, tip: Tip) -> Result<(), ChainError> {
        if !self.is_ready() {
            return Err(ChainError::NotReady);
        }
        let _pass = self.pass.lock().await;

        self.state.send_modify(|state| state.is_syncing = true);
        self.emit(BlockchainEvent::SyncStart);

        let result = self.run_pass(tip).await;

        self.state.send_modify(|state| state.is_syncing = false);
        self.emit(BlockchainEvent::SyncStop);
        if let Err(err) = &result {
            spv_log::log_warn!("sync to {} failed: {err}", tip.height);
        }
        result
    }

    async fn run_pass(&self, tip: Tip) -> Result<(), ChainError> {
        let local = self.state().height;
        let mode = select_mode(local, tip.height);
        spv_log::log_debug!("sync pass local {local} network {} mode {mode:?}", tip.height);

        if mode == Mode::Headered {
            if self.sync_headers(local as u32, tip.height).await? {
                return Ok(());
            }
            spv_log::log_info!("tip does not extend local chain; falling back to chunk sync");
        }
        self.sync_chunks(tip.height).await
    }

    async fn sync_chunks(&self, network_height: u32) -> Result<(), ChainError> {
        let network_index = chunk_index(network_height);
        let mut index = match self.state().tip_height() {
            Some(local) => chunk_index(local).min(network_index),
            None => 0,
        };
        let mut verified: Option<ChunkBounds> = None;
        let mut refetched: Option<(u32, Vec<u8>)> = None;

        while index <= network_index {
            let anchor = match verified {
                Some(bounds) if bounds.index + 1 == index => Anchor::Bounds(bounds),
                _ => self.anchor_for(index).await?,
            };
            let bounds = match anchor {
                Anchor::Genesis => None,
                Anchor::Bounds(bounds) => Some(bounds),
                Anchor::Stale(raw) => {
                    spv_log::log_warn!(
                        "stored chunk {} no longer matches the backend; stepping back",
                        index - 1
                    );
                    index -= 1;
                    verified = None;
                    refetched = Some((index, raw));
                    continue;
                }
            };

            let raw = match refetched.take() {
                Some((pending, raw)) if pending == index => raw,
                _ => self.network.get_chunk(index).await?,
            };
            let headers = decode_fetched(index, &raw)?;
            if index < network_index && headers.len() != CHUNK_SIZE as usize {
                return Err(ChainError::VerifyChunk {
                    index,
                    reason: "incomplete chunk below the tip",
                });
            }
            let first = headers[0];
            let prev_hash = bounds.map(|b| b.last.hash()).unwrap_or(ZERO_HASH);

            if first.prev_block != prev_hash {
                if index == 0 {
                    return Err(ChainError::VerifyHeader(VerifyHeaderError {
                        hash: first.hash(),
                        reason: VerifyReason::LinkageMismatch,
                    }));
                }
                spv_log::log_warn!(
                    "chunk {index} does not link to local height {}; reorg, stepping back",
                    chunk_start(index) - 1
                );
                index -= 1;
                verified = None;
                continue;
            }

            let target = compute_target(index, bounds.as_ref().map(|b| (&b.first, &b.last)), &self.params)?;
            verify_headers(
                &headers,
                &prev_hash,
                bounds.as_ref().map(|b| &b.last),
                &target,
                &self.params,
            )?;

            self.commit_chunk(index, &headers).await?;
            verified = Some(ChunkBounds {
                index,
                first,
                last: headers[headers.len() - 1],
            });
            index += 1;
        }
        Ok(())
    }

    /// Locates the verified predecessor of chunk `index` in local state.
    async fn anchor_for(&self, index: u32) -> Result<Anchor, ChainError> {
        if index == 0 {
            return Ok(Anchor::Genesis);
        }
        let prev = index - 1;
        if self.ledger.compact_mode() {
            let chunks = self.ledger.chunk_hashes_count().await?;
            if prev < chunks {
                return Ok(match self.check_stored_chunk(prev).await? {
                    StoredChunk::Verified(headers) => Anchor::Bounds(ChunkBounds {
                        index: prev,
                        first: headers[0],
                        last: headers[headers.len() - 1],
                    }),
                    StoredChunk::Replaced(raw) => Anchor::Stale(raw),
                });
            }
        }
        let first = self.local_header(chunk_start(prev)).await?;
        let last = self.local_header(chunk_start(index) - 1).await?;
        Ok(Anchor::Bounds(ChunkBounds {
            index: prev,
            first,
            last,
        }))
    }

    async fn commit_chunk(&self, index: u32, headers: &[BlockHeader]) -> Result<(), ChainError> {
        let last_hash = headers[headers.len() - 1].hash();
        let raw: Vec<RawHeader> = headers.iter().map(BlockHeader::consensus_encode).collect();

        let sealed;
        let update = if !self.ledger.compact_mode() {
            TailUpdate {
                last_hash,
                chunk_hashes: None,
                headers_from: chunk_start(index),
                headers: &raw,
            }
        } else if headers.len() == CHUNK_SIZE as usize {
            sealed = [chunk_hash(&raw.concat())];
            TailUpdate {
                last_hash,
                chunk_hashes: Some((index, sealed.as_slice())),
                headers_from: 0,
                headers: &[],
            }
        } else {
            TailUpdate {
                last_hash,
                chunk_hashes: Some((index, &[] as &[Hash256])),
                headers_from: 0,
                headers: &raw,
            }
        };

        let _commit = self.commit.write().await;
        self.ledger.replace_tail(update).await?;
        if i64::from(chunk_start(index)) <= self.state().height {
            self.cache.invalidate_from(chunk_start(index));
        }
        let height = chunk_start(index) + headers.len() as u32 - 1;
        self.advance(height, last_hash);
        spv_log::log_debug!("committed chunk {index} ({} headers) up to height {height}", headers.len());
        Ok(())
    }

    /// Returns `Ok(false)` when the fetched run does not extend the local tip.
    async fn sync_headers(&self, local: u32, network_height: u32) -> Result<bool, ChainError> {
        let tip_hash = self.state().block_hash;
        let tip_header = self.local_header(local).await?;

        let mut fetched = Vec::with_capacity((network_height - local) as usize);
        for height in local + 1..=network_height {
            let at = self.network.get_header(height).await?;
            if at.height != height {
                return Err(NetworkError::Malformed(format!(
                    "requested header {height}, backend labelled it {}",
                    at.height
                ))
                .into());
            }
            fetched.push(at.header);
        }
        if fetched[0].prev_block != tip_hash {
            return Ok(false);
        }

        let base = local + 1;
        let mut targets: HashMap<u32, Target> = HashMap::new();
        let mut prev_hash = tip_hash;
        let mut prev_header = tip_header;
        for (offset, header) in fetched.iter().enumerate() {
            let index = chunk_index(base + offset as u32);
            let target = match targets.get(&index) {
                Some(target) => *target,
                None => {
                    let target = self.target_for(index, base, &fetched).await?;
                    targets.insert(index, target);
                    target
                }
            };
            verify_header(header, &prev_hash, Some(&prev_header), &target, &self.params)?;
            prev_hash = header.hash();
            prev_header = *header;
        }

        self.commit_headers(local, &fetched).await?;
        Ok(true)
    }

    /// Target for chunk `index`, reading its predecessor's bounds from the
    /// pending run `fetched` (starting at `base`) or from local state.
    async fn target_for(&self, index: u32, base: u32, fetched: &[BlockHeader]) -> Result<Target, ChainError> {
        if index == 0 {
            return Ok(compute_target(0, None, &self.params)?);
        }
        let first = self.pending_or_local(chunk_start(index - 1), base, fetched).await?;
        let last = self.pending_or_local(chunk_start(index) - 1, base, fetched).await?;
        Ok(compute_target(index, Some((&first, &last)), &self.params)?)
    }

    async fn pending_or_local(&self, height: u32, base: u32, fetched: &[BlockHeader]) -> Result<BlockHeader, ChainError> {
        match height.checked_sub(base).and_then(|offset| fetched.get(offset as usize)) {
            Some(header) => Ok(*header),
            None => self.local_header(height).await,
        }
    }

    async fn commit_headers(&self, local: u32, fetched: &[BlockHeader]) -> Result<(), ChainError> {
        let last_hash = fetched[fetched.len() - 1].hash();
        let raw: Vec<RawHeader> = fetched.iter().map(BlockHeader::consensus_encode).collect();

        let sealed;
        let update = if self.ledger.compact_mode() {
            let chunks = self.ledger.chunk_hashes_count().await?;
            let trailing = self.ledger.headers_count().await?;
            let take = (CHUNK_SIZE - trailing) as usize;
            if raw.len() >= take {
                let mut bytes = Vec::with_capacity(CHUNK_BYTES);
                for index in 0..trailing {
                    let header = self
                        .ledger
                        .header(index)
                        .await?
                        .ok_or_else(|| StoreError::Corrupt(format!("trailing header {index} missing")))?;
                    bytes.extend_from_slice(&header);
                }
                for header in &raw[..take] {
                    bytes.extend_from_slice(header);
                }
                sealed = [chunk_hash(&bytes)];
                spv_log::log_debug!("sealing chunk {chunks} from trailing headers");
                TailUpdate {
                    last_hash,
                    chunk_hashes: Some((chunks, sealed.as_slice())),
                    headers_from: 0,
                    headers: &raw[take..],
                }
            } else {
                TailUpdate {
                    last_hash,
                    chunk_hashes: None,
                    headers_from: trailing,
                    headers: &raw,
                }
            }
        } else {
            TailUpdate {
                last_hash,
                chunk_hashes: None,
                headers_from: local + 1,
                headers: &raw,
            }
        };

        let _commit = self.commit.write().await;
        self.ledger.replace_tail(update).await?;
        let height = local + fetched.len() as u32;
        self.advance(height, last_hash);
        Ok(())
    }

    fn advance(&self, height: u32, hash: Hash256) {
        self.state.send_modify(|state| {
            state.height = i64::from(height);
            state.block_hash = hash;
        });
        self.emit(BlockchainEvent::NewBlock { hash, height });
    }

    /// Header at `height` from the verified local chain.
    pub async fn get_header(&self, height: i64) -> Result<BlockHeader, ChainError> {
        if !self.is_ready() {
            return Err(ChainError::NotReady);
        }
        let _commit = self.commit.read().await;
        if height < 0 || height > self.state().height {
            return Err(ChainError::NotYetImported { height });
        }
        self.local_header(height as u32).await
    }

    async fn local_header(&self, height: u32) -> Result<BlockHeader, ChainError> {
        if let Some(header) = self.cache.header(height) {
            return Ok(header);
        }

        let header = if self.ledger.compact_mode() {
            let trailing_start = self.ledger.chunk_hashes_count().await? * CHUNK_SIZE;
            if height >= trailing_start {
                self.stored_header(height - trailing_start).await?
            } else {
                let index = chunk_index(height);
                let chunk = self.verified_chunk(index).await?;
                chunk[(height - chunk_start(index)) as usize]
            }
        } else {
            self.stored_header(height).await?
        };

        self.cache.insert_header(height, header);
        Ok(header)
    }

    async fn stored_header(&self, index: u32) -> Result<BlockHeader, ChainError> {
        let raw = self
            .ledger
            .header(index)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("header {index} missing")))?;
        Ok(BlockHeader::consensus_decode(&raw)?)
    }

    /// Refetches a hashed chunk and checks it against its stored digest.
    async fn verified_chunk(&self, index: u32) -> Result<VerifiedChunk, ChainError> {
        match self.check_stored_chunk(index).await? {
            StoredChunk::Verified(chunk) => Ok(chunk),
            StoredChunk::Replaced(_) => Err(ChainError::VerifyChunk {
                index,
                reason: "chunk hash mismatch",
            }),
        }
    }

    async fn check_stored_chunk(&self, index: u32) -> Result<StoredChunk, ChainError> {
        if let Some(chunk) = self.cache.chunk(index) {
            return Ok(StoredChunk::Verified(chunk));
        }
        let expected = self
            .ledger
            .chunk_hash(index)
            .await?
            .ok_or_else(|| StoreError::Corrupt(format!("chunk hash {index} missing")))?;
        let raw = self.network.get_chunk(index).await?;
        if raw.len() != CHUNK_BYTES || chunk_hash(&raw) != expected {
            self.cache.remove_chunk(index);
            spv_log::log_warn!("chunk {index} from backend does not match stored hash");
            return Ok(StoredChunk::Replaced(raw));
        }
        let headers: VerifiedChunk = decode_chunk(&raw)?.into();
        self.cache.insert_chunk(index, Arc::clone(&headers));
        Ok(StoredChunk::Verified(headers))
    }
}

fn decode_fetched(index: u32, raw: &[u8]) -> Result<Vec<BlockHeader>, ChainError> {
    let headers = decode_chunk(raw)?;
    if headers.is_empty() {
        return Err(ChainError::VerifyChunk {
            index,
            reason: "backend returned an empty chunk",
        });
    }
    Ok(headers)
}

fn select_mode(local: i64, network_height: u32) -> Mode {
    let delta = i64::from(network_height) - local;
    if local >= 0 && delta > 0 && delta <= MAX_HEADERED_DELTA {
        Mode::Headered
    } else {
        Mode::Chunked
    }
}
