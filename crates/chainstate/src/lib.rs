//! Header-chain synchronization for a light client: caches, the backend
//! interface, the sync engine and merkle confirmation.

pub mod cache;
pub mod confirm;
pub mod error;
pub mod events;
pub mod network;
pub mod state;
pub mod sync;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cache::{CacheConfig, ChainCache};
pub use error::ChainError;
pub use events::BlockchainEvent;
pub use network::{HeaderAt, HistoryEntry, Network, NetworkError, NetworkEvent, Subscription, TxProof, Unspent};
pub use state::SyncState;
pub use sync::{ChunkSeed, SyncEngine, Tip};
