//! Deterministic regtest chains and an in-memory backend for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use spv_consensus::constants::{chunk_index, chunk_start, CHUNK_SIZE};
use spv_consensus::{consensus_params, ConsensusParams, Hash256, Network as ChainNetwork, ZERO_HASH};
use spv_pow::compute_target;
use spv_primitives::{encode_chunk, merkle_branch, merkle_root, sha256d, BlockHeader, HeaderFields, MerkleProof};
use tokio::sync::broadcast;

use crate::network::{HeaderAt, HistoryEntry, Network, NetworkError, NetworkEvent, Subscription, TxProof, Unspent};

pub const GENESIS_TIME: u32 = 1_296_688_602;
pub const TXS_PER_BLOCK: usize = 3;

pub fn regtest_params() -> ConsensusParams {
    consensus_params(ChainNetwork::Regtest)
}

/// Header chain mined against real retargeting at regtest difficulty.
#[derive(Clone, Debug)]
pub struct MockChain {
    params: ConsensusParams,
    tag: u8,
    pub headers: Vec<BlockHeader>,
}

impl MockChain {
    pub fn new(params: ConsensusParams, tag: u8) -> Self {
        Self {
            params,
            tag,
            headers: Vec::new(),
        }
    }

    pub fn build(params: ConsensusParams, len: usize, tag: u8) -> Self {
        let mut chain = Self::new(params, tag);
        chain.extend(len);
        chain
    }

    pub fn regtest(len: usize) -> Self {
        Self::build(regtest_params(), len, 0)
    }

    /// Copy sharing heights `..height`, re-mined from `height` to `new_len`
    /// with a different `tag`.
    pub fn fork_at(&self, height: usize, new_len: usize, tag: u8) -> Self {
        let mut fork = Self {
            params: self.params.clone(),
            tag,
            headers: self.headers[..height].to_vec(),
        };
        fork.extend(new_len - height);
        fork
    }

    pub fn extend(&mut self, count: usize) {
        for _ in 0..count {
            let height = self.headers.len() as u32;
            let header = self.mine(height, self.next_time());
            self.headers.push(header);
        }
    }

    /// Appends one header `gap` seconds after the tip, mined at `bits`
    /// against the network's maximum target.
    pub fn push_min_difficulty(&mut self, gap: u32) {
        let height = self.headers.len() as u32;
        let prev = self.headers.last().copied();
        let mut header = BlockHeader {
            version: 1,
            prev_block: prev.map(|h| h.hash()).unwrap_or(ZERO_HASH),
            merkle_root: merkle_root(&block_txids(self.tag, height)),
            time: prev.map(|h| h.time + gap).unwrap_or(GENESIS_TIME),
            bits: self.params.max_bits,
            nonce: 0,
        };
        let target = spv_pow::Target::max(&self.params);
        while !target.is_met_by(&header.hash()) {
            header.nonce += 1;
        }
        self.headers.push(header);
    }

    fn next_time(&self) -> u32 {
        self.headers
            .last()
            .map(|h| h.time + self.params.target_spacing as u32)
            .unwrap_or(GENESIS_TIME)
    }

    fn mine(&self, height: u32, time: u32) -> BlockHeader {
        let index = chunk_index(height);
        let bounds = (index > 0).then(|| {
            (
                &self.headers[chunk_start(index - 1) as usize],
                &self.headers[chunk_start(index) as usize - 1],
            )
        });
        let target = match compute_target(index, bounds, &self.params) {
            Ok(target) => target,
            Err(err) => panic!("mock chain retarget at {height}: {err}"),
        };
        let mut header = BlockHeader {
            version: 1,
            prev_block: self.headers.last().map(|h| h.hash()).unwrap_or(ZERO_HASH),
            merkle_root: merkle_root(&block_txids(self.tag, height)),
            time,
            bits: target.bits,
            nonce: 0,
        };
        while !target.is_met_by(&header.hash()) {
            header.nonce += 1;
        }
        header
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn tip_height(&self) -> u32 {
        self.headers.len() as u32 - 1
    }

    pub fn hash_at(&self, height: u32) -> Hash256 {
        self.headers[height as usize].hash()
    }

    pub fn raw_chunk(&self, index: u32) -> Vec<u8> {
        let start = chunk_start(index) as usize;
        let end = (start + CHUNK_SIZE as usize).min(self.headers.len());
        encode_chunk(&self.headers[start..end])
    }

    pub fn chunk_hashes(&self) -> Vec<Hash256> {
        let complete = self.headers.len() / CHUNK_SIZE as usize;
        (0..complete as u32)
            .map(|index| sha256d(&self.raw_chunk(index)))
            .collect()
    }

    /// A transaction of the block at `height` with its inclusion proof.
    pub fn tx_proof(&self, height: u32, position: usize) -> (Hash256, MerkleProof) {
        let txids = block_txids(self.tag, height);
        let proof = MerkleProof {
            block_height: height,
            siblings: merkle_branch(&txids, position),
            tx_index: position as u32,
        };
        (txids[position], proof)
    }
}

pub fn block_txids(tag: u8, height: u32) -> Vec<Hash256> {
    (0..TXS_PER_BLOCK as u8)
        .map(|position| {
            let mut seed = [0u8; 6];
            seed[0] = tag;
            seed[1] = position;
            seed[2..].copy_from_slice(&height.to_le_bytes());
            sha256d(&seed)
        })
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory backend serving a [`MockChain`], recording what was fetched.
pub struct MockNetwork {
    chain: Mutex<MockChain>,
    chunk_fetches: Mutex<Vec<u32>>,
    header_fetches: Mutex<Vec<u32>>,
    corrupt_chunks: Mutex<HashSet<u32>>,
    mislabels: Mutex<HashMap<u32, i64>>,
    txs: Mutex<HashMap<Hash256, String>>,
    proofs: Mutex<HashMap<Hash256, TxProof>>,
    history: Mutex<HashMap<String, Vec<HistoryEntry>>>,
    unspent: Mutex<HashMap<String, Vec<Unspent>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    sent: Mutex<Vec<String>>,
    events: broadcast::Sender<NetworkEvent>,
}

impl MockNetwork {
    pub fn new(chain: MockChain) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            chain: Mutex::new(chain),
            chunk_fetches: Mutex::new(Vec::new()),
            header_fetches: Mutex::new(Vec::new()),
            corrupt_chunks: Mutex::new(HashSet::new()),
            mislabels: Mutex::new(HashMap::new()),
            txs: Mutex::new(HashMap::new()),
            proofs: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            unspent: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn chain(&self) -> MockChain {
        lock(&self.chain).clone()
    }

    /// Replaces the served chain, e.g. with a fork.
    pub fn set_chain(&self, chain: MockChain) {
        *lock(&self.chain) = chain;
    }

    pub fn extend(&self, count: usize) {
        lock(&self.chain).extend(count);
    }

    pub fn tip(&self) -> crate::sync::Tip {
        let chain = lock(&self.chain);
        crate::sync::Tip {
            height: chain.tip_height(),
            hash: chain.hash_at(chain.tip_height()),
        }
    }

    /// Publishes the current tip as a `NewBlock` event.
    pub fn announce_tip(&self) {
        let tip = self.tip();
        self.emit(NetworkEvent::NewBlock {
            hash: tip.hash,
            height: tip.height,
        });
    }

    pub fn emit(&self, event: NetworkEvent) {
        let _ = self.events.send(event);
    }

    pub fn corrupt_chunk(&self, index: u32) {
        lock(&self.corrupt_chunks).insert(index);
    }

    /// Makes the header served for `height` claim to be at `reported`.
    pub fn mislabel_header(&self, height: u32, reported: i64) {
        lock(&self.mislabels).insert(height, reported);
    }

    pub fn chunk_fetches(&self) -> Vec<u32> {
        lock(&self.chunk_fetches).clone()
    }

    pub fn header_fetches(&self) -> Vec<u32> {
        lock(&self.header_fetches).clone()
    }

    pub fn clear_fetches(&self) {
        lock(&self.chunk_fetches).clear();
        lock(&self.header_fetches).clear();
    }

    pub fn add_tx(&self, txid: Hash256, raw_hex: &str, proof: TxProof) {
        lock(&self.txs).insert(txid, raw_hex.to_string());
        lock(&self.proofs).insert(txid, proof);
    }

    pub fn add_history(&self, address: &str, entries: Vec<HistoryEntry>) {
        lock(&self.history).insert(address.to_string(), entries);
    }

    pub fn add_unspent(&self, address: &str, entries: Vec<Unspent>) {
        lock(&self.unspent).insert(address.to_string(), entries);
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        lock(&self.subscriptions).clone()
    }

    pub fn sent_txs(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn get_tip(&self) -> Result<HeaderAt, NetworkError> {
        let chain = lock(&self.chain);
        let header = chain
            .headers
            .last()
            .ok_or_else(|| NetworkError::NotFound("tip".to_string()))?;
        HeaderAt::from_fields(i64::from(chain.tip_height()), &HeaderFields::from(header))
    }

    async fn get_header(&self, height: u32) -> Result<HeaderAt, NetworkError> {
        lock(&self.header_fetches).push(height);
        let chain = lock(&self.chain);
        let header = chain
            .headers
            .get(height as usize)
            .ok_or_else(|| NetworkError::NotFound(format!("header {height}")))?;
        let reported = lock(&self.mislabels)
            .get(&height)
            .copied()
            .unwrap_or(i64::from(height));
        HeaderAt::from_fields(reported, &HeaderFields::from(header))
    }

    async fn get_header_by_hash(&self, hash: &Hash256) -> Result<HeaderAt, NetworkError> {
        let chain = lock(&self.chain);
        let height = chain
            .headers
            .iter()
            .position(|header| header.hash() == *hash)
            .ok_or_else(|| NetworkError::NotFound("header by hash".to_string()))?;
        HeaderAt::from_fields(height as i64, &HeaderFields::from(&chain.headers[height]))
    }

    async fn get_chunk(&self, index: u32) -> Result<Vec<u8>, NetworkError> {
        lock(&self.chunk_fetches).push(index);
        let chain = lock(&self.chain);
        if chunk_start(index) as usize >= chain.len() {
            return Err(NetworkError::NotFound(format!("chunk {index}")));
        }
        let mut raw = chain.raw_chunk(index);
        if lock(&self.corrupt_chunks).contains(&index) {
            if let Some(byte) = raw.last_mut() {
                *byte ^= 0xff;
            }
        }
        Ok(raw)
    }

    async fn get_tx(&self, txid: &Hash256) -> Result<String, NetworkError> {
        lock(&self.txs)
            .get(txid)
            .cloned()
            .ok_or_else(|| NetworkError::NotFound("transaction".to_string()))
    }

    async fn get_tx_merkle_proof(&self, txid: &Hash256) -> Result<TxProof, NetworkError> {
        lock(&self.proofs)
            .get(txid)
            .cloned()
            .ok_or_else(|| NetworkError::NotFound("transaction".to_string()))
    }

    async fn send_tx(&self, raw_hex: &str) -> Result<Hash256, NetworkError> {
        lock(&self.sent).push(raw_hex.to_string());
        Ok(sha256d(raw_hex.as_bytes()))
    }

    async fn subscribe(&self, subscription: Subscription) -> Result<(), NetworkError> {
        lock(&self.subscriptions).push(subscription);
        Ok(())
    }

    async fn get_history(&self, address: &str) -> Result<Vec<HistoryEntry>, NetworkError> {
        Ok(lock(&self.history).get(address).cloned().unwrap_or_default())
    }

    async fn get_unspent(&self, address: &str) -> Result<Vec<Unspent>, NetworkError> {
        Ok(lock(&self.unspent).get(address).cloned().unwrap_or_default())
    }

    fn events(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }
}
