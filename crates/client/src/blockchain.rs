//! The public face of the client: a verified header chain kept in step with
//! the backend by a single background sync lane.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use spv_chainstate::{
    BlockchainEvent, CacheConfig, ChainCache, ChainError, ChunkSeed, HistoryEntry, Network,
    NetworkEvent, Subscription, SyncEngine, SyncState, Tip, TxProof, Unspent,
};
use spv_consensus::{consensus_params, ConsensusParams, Hash256};
use spv_primitives::BlockHeader;
use spv_storage::memory::MemoryStore;
use spv_storage::{HeaderLedger, KvLedger};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;

const EVENT_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeaderQuery {
    Height(i64),
    Hash(Hash256),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    Confirmed(BlockHeader),
    Unconfirmed,
    /// The backend's proof does not hold against the local chain.
    Invalid,
}

struct Shared<L, N> {
    engine: SyncEngine<L, N>,
    network: Arc<N>,
    cache: Arc<ChainCache>,
    events: broadcast::Sender<BlockchainEvent>,
    tips: watch::Sender<Option<Tip>>,
}

impl<L, N> Shared<L, N>
where
    L: HeaderLedger,
    N: Network,
{
    fn emit(&self, event: BlockchainEvent) {
        let _ = self.events.send(event);
    }

    /// Hands `tip` to the sync lane. Dropped until the ledger is loaded, and
    /// when the local chain already ends there.
    fn publish(&self, tip: Tip) {
        if !self.engine.is_ready() {
            spv_log::log_debug!("ignoring tip {} before the ledger is loaded", tip.height);
            return;
        }
        let state = self.engine.state();
        if state.height == i64::from(tip.height) && state.block_hash == tip.hash {
            return;
        }
        self.tips.send_replace(Some(tip));
    }

    async fn refresh(&self) -> Result<(), ChainError> {
        let at = self.network.get_tip().await?;
        self.publish(Tip {
            height: at.height,
            hash: at.hash(),
        });
        Ok(())
    }
}

pub struct Blockchain<L, N> {
    shared: Arc<Shared<L, N>>,
    seed: Mutex<Option<ChunkSeed>>,
    stop: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<N> Blockchain<KvLedger<MemoryStore>, N>
where
    N: Network + 'static,
{
    /// Builds a client over an in-memory ledger as described by `config`,
    /// applying its log settings process-wide.
    pub fn from_config(config: &Config, network: Arc<N>) -> Result<Self, String> {
        spv_log::init(config.log);
        let seed = config.load_seed()?;
        let ledger = Arc::new(KvLedger::new(MemoryStore::new(), config.compact_mode));
        Ok(Self::new(
            consensus_params(config.network),
            ledger,
            network,
            config.cache,
            seed,
        ))
    }
}

impl<L, N> Blockchain<L, N>
where
    L: HeaderLedger + 'static,
    N: Network + 'static,
{
    pub fn new(
        params: ConsensusParams,
        ledger: Arc<L>,
        network: Arc<N>,
        cache: CacheConfig,
        seed: Option<ChunkSeed>,
    ) -> Self {
        let cache = Arc::new(ChainCache::new(cache));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (tips, _) = watch::channel(None);
        let (stop, _) = watch::channel(false);
        let engine = SyncEngine::new(
            params,
            ledger,
            Arc::clone(&network),
            Arc::clone(&cache),
            events.clone(),
        );
        Self {
            shared: Arc::new(Shared {
                engine,
                network,
                cache,
                events,
                tips,
            }),
            seed: Mutex::new(seed),
            stop,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Loads the ledger, starts the sync worker and the network listener, and
    /// requests the backend's tip. Must be called from a tokio runtime.
    pub async fn start(&self) -> Result<SyncState, ChainError> {
        if !lock(&self.tasks).is_empty() {
            return Ok(self.shared.engine.state());
        }

        let seed = lock(&self.seed).take();
        let state = self.shared.engine.initialize(seed).await?;

        let worker = tokio::spawn(run_worker(
            Arc::clone(&self.shared),
            self.shared.tips.subscribe(),
            self.stop.subscribe(),
        ));
        let listener = tokio::spawn(run_listener(
            Arc::clone(&self.shared),
            self.shared.network.events(),
            self.stop.subscribe(),
        ));
        lock(&self.tasks).extend([worker, listener]);

        self.shared.network.subscribe(Subscription::NewBlock).await?;
        self.shared.refresh().await?;
        Ok(state)
    }

    /// Asks the backend for its tip and queues a sync toward it.
    pub async fn refresh(&self) -> Result<(), ChainError> {
        self.shared.refresh().await
    }

    /// Stops the background tasks. A pass already running finishes first.
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            if let Err(err) = task.await {
                spv_log::log_warn!("background task ended abnormally: {err}");
            }
        }
    }

    pub fn engine(&self) -> &SyncEngine<L, N> {
        &self.shared.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BlockchainEvent> {
        self.shared.events.subscribe()
    }

    pub fn sync_state(&self) -> watch::Receiver<SyncState> {
        self.shared.engine.subscribe_state()
    }

    pub fn get_current_height(&self) -> i64 {
        self.shared.engine.state().height
    }

    pub fn get_current_block_hash(&self) -> Hash256 {
        self.shared.engine.state().block_hash
    }

    pub fn is_syncing(&self) -> bool {
        self.shared.engine.state().is_syncing
    }

    /// Returns a locally verified header. Lookups by hash ask the backend for
    /// the height and then require the local header there to carry that hash.
    pub async fn get_header(&self, query: HeaderQuery) -> Result<BlockHeader, ChainError> {
        match query {
            HeaderQuery::Height(height) => self.shared.engine.get_header(height).await,
            HeaderQuery::Hash(hash) => {
                if let Some(height) = self.shared.cache.height_of(&hash) {
                    return self.shared.engine.get_header(i64::from(height)).await;
                }
                let at = self.shared.network.get_header_by_hash(&hash).await?;
                let local = self.shared.engine.get_header(i64::from(at.height)).await?;
                if local.hash() != hash {
                    return Err(ChainError::HashMismatch { height: at.height });
                }
                Ok(local)
            }
        }
    }

    pub async fn get_tx(&self, txid: &Hash256) -> Result<String, ChainError> {
        if let Some(raw) = self.shared.cache.tx(txid) {
            return Ok(raw);
        }
        let raw = self.shared.network.get_tx(txid).await?;
        self.shared.cache.insert_tx(*txid, raw.clone());
        Ok(raw)
    }

    pub async fn get_tx_confirmation_status(&self, txid: &Hash256) -> Result<TxStatus, ChainError> {
        let proof = match self.shared.network.get_tx_merkle_proof(txid).await? {
            TxProof::Unconfirmed => return Ok(TxStatus::Unconfirmed),
            TxProof::Confirmed(proof) => proof,
        };
        match self.shared.engine.verify_confirmation(txid, &proof).await {
            Ok(header) => Ok(TxStatus::Confirmed(header)),
            Err(ChainError::NotYetImported { .. }) => Ok(TxStatus::Unconfirmed),
            Err(err @ (ChainError::VerifyTx { .. } | ChainError::VerifyChunk { .. })) => {
                spv_log::log_warn!("confirmation check failed: {err}");
                Ok(TxStatus::Invalid)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn send_tx(&self, raw_hex: &str) -> Result<Hash256, ChainError> {
        Ok(self.shared.network.send_tx(raw_hex).await?)
    }

    pub async fn subscribe_address(&self, address: &str) -> Result<(), ChainError> {
        self.shared
            .network
            .subscribe(Subscription::Address(address.to_string()))
            .await?;
        Ok(())
    }

    pub async fn get_history(&self, address: &str) -> Result<Vec<HistoryEntry>, ChainError> {
        Ok(self.shared.network.get_history(address).await?)
    }

    pub async fn get_unspent(&self, address: &str) -> Result<Vec<Unspent>, ChainError> {
        Ok(self.shared.network.get_unspent(address).await?)
    }
}

/// The sync lane: one pass at a time, always toward the newest published tip.
async fn run_worker<L, N>(
    shared: Arc<Shared<L, N>>,
    mut tips: watch::Receiver<Option<Tip>>,
    mut stop: watch::Receiver<bool>,
) where
    L: HeaderLedger,
    N: Network,
{
    loop {
        tokio::select! {
            changed = tips.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = stop.changed() => break,
        }
        let Some(tip) = *tips.borrow_and_update() else {
            continue;
        };
        match shared.engine.sync_to(tip).await {
            Ok(()) => {}
            Err(ChainError::NotReady) => {
                spv_log::log_debug!("dropped sync to {}: ledger not loaded", tip.height);
            }
            Err(err) => shared.emit(BlockchainEvent::Error(err.to_string())),
        }
    }
}

async fn run_listener<L, N>(
    shared: Arc<Shared<L, N>>,
    mut events: broadcast::Receiver<NetworkEvent>,
    mut stop: watch::Receiver<bool>,
) where
    L: HeaderLedger,
    N: Network,
{
    loop {
        let received = tokio::select! {
            received = events.recv() => received,
            _ = stop.changed() => break,
        };
        match received {
            Ok(NetworkEvent::NewBlock { hash, height }) => shared.publish(Tip { height, hash }),
            Ok(NetworkEvent::TouchAddress { address, txid }) => {
                shared.emit(BlockchainEvent::TouchAddress { address, txid });
            }
            Ok(NetworkEvent::Connect) => {
                spv_log::log_info!("backend connected");
                refresh_or_report(&shared).await;
            }
            Ok(NetworkEvent::Disconnect) => spv_log::log_info!("backend disconnected"),
            Ok(NetworkEvent::Error(message)) => {
                spv_log::log_warn!("backend error: {message}");
                shared.emit(BlockchainEvent::Error(message));
            }
            Err(RecvError::Lagged(skipped)) => {
                spv_log::log_warn!("missed {skipped} backend events");
                refresh_or_report(&shared).await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn refresh_or_report<L, N>(shared: &Shared<L, N>)
where
    L: HeaderLedger,
    N: Network,
{
    if let Err(err) = shared.refresh().await {
        spv_log::log_warn!("tip refresh failed: {err}");
        shared.emit(BlockchainEvent::Error(err.to_string()));
    }
}
