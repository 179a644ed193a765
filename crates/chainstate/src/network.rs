//! The backend the client syncs from: an indexing server that serves headers,
//! chunks, transactions and address activity.

use async_trait::async_trait;
use spv_consensus::Hash256;
use spv_primitives::{BlockHeader, HeaderFields, MerkleProof};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    Disconnected,
    NotFound(String),
    Malformed(String),
    Backend(String),
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::Disconnected => write!(f, "backend disconnected"),
            NetworkError::NotFound(what) => write!(f, "{what} not found"),
            NetworkError::Malformed(message) => write!(f, "malformed response: {message}"),
            NetworkError::Backend(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for NetworkError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderAt {
    pub height: u32,
    pub header: BlockHeader,
}

impl HeaderAt {
    /// Builds a header from a backend's field-by-field report.
    pub fn from_fields(height: i64, fields: &HeaderFields) -> Result<Self, NetworkError> {
        let height = u32::try_from(height)
            .map_err(|_| NetworkError::Malformed(format!("header height {height} out of range")))?;
        let header = fields
            .to_header()
            .map_err(|err| NetworkError::Malformed(format!("header {height}: {err}")))?;
        Ok(Self { height, header })
    }

    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxProof {
    Confirmed(MerkleProof),
    Unconfirmed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subscription {
    NewBlock,
    Address(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkEvent {
    NewBlock { hash: Hash256, height: u32 },
    TouchAddress { address: String, txid: Hash256 },
    Connect,
    Disconnect,
    Error(String),
}

/// One transaction touching an address; `height <= 0` means mempool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub txid: Hash256,
    pub height: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unspent {
    pub txid: Hash256,
    pub vout: u32,
    pub value: u64,
    pub height: i64,
}

#[async_trait]
pub trait Network: Send + Sync {
    async fn get_tip(&self) -> Result<HeaderAt, NetworkError>;
    async fn get_header(&self, height: u32) -> Result<HeaderAt, NetworkError>;
    async fn get_header_by_hash(&self, hash: &Hash256) -> Result<HeaderAt, NetworkError>;
    /// Raw concatenated headers of chunk `index`; shorter than a full chunk only at the tip.
    async fn get_chunk(&self, index: u32) -> Result<Vec<u8>, NetworkError>;
    async fn get_tx(&self, txid: &Hash256) -> Result<String, NetworkError>;
    async fn get_tx_merkle_proof(&self, txid: &Hash256) -> Result<TxProof, NetworkError>;
    async fn send_tx(&self, raw_hex: &str) -> Result<Hash256, NetworkError>;
    async fn subscribe(&self, subscription: Subscription) -> Result<(), NetworkError>;
    async fn get_history(&self, address: &str) -> Result<Vec<HistoryEntry>, NetworkError>;
    async fn get_unspent(&self, address: &str) -> Result<Vec<Unspent>, NetworkError>;

    fn events(&self) -> broadcast::Receiver<NetworkEvent>;
}
