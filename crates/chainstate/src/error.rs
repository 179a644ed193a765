use spv_consensus::{hash256_to_hex, Hash256};
use spv_pow::{DifficultyError, VerifyHeaderError};
use spv_primitives::HeaderError;
use spv_storage::StoreError;

use crate::network::NetworkError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The ledger has not been loaded yet.
    NotReady,
    Store(StoreError),
    Network(NetworkError),
    Decode(HeaderError),
    Difficulty(DifficultyError),
    VerifyHeader(VerifyHeaderError),
    VerifyChunk { index: u32, reason: &'static str },
    VerifyTx { txid: Hash256 },
    NotYetImported { height: i64 },
    /// A backend header disagrees with the locally verified one at that height.
    HashMismatch { height: u32 },
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainError::NotReady => write!(f, "header ledger is not loaded yet"),
            ChainError::Store(err) => write!(f, "storage: {err}"),
            ChainError::Network(err) => write!(f, "network: {err}"),
            ChainError::Decode(err) => write!(f, "{err}"),
            ChainError::Difficulty(err) => write!(f, "{err}"),
            ChainError::VerifyHeader(err) => write!(f, "{err}"),
            ChainError::VerifyChunk { index, reason } => {
                write!(f, "chunk {index} failed verification: {reason}")
            }
            ChainError::VerifyTx { txid } => {
                write!(f, "merkle proof for {} does not match its block", hash256_to_hex(txid))
            }
            ChainError::NotYetImported { height } => {
                write!(f, "height {height} is not imported yet")
            }
            ChainError::HashMismatch { height } => {
                write!(f, "header at height {height} does not match the local chain")
            }
        }
    }
}

impl std::error::Error for ChainError {}

impl From<StoreError> for ChainError {
    fn from(err: StoreError) -> Self {
        ChainError::Store(err)
    }
}

impl From<NetworkError> for ChainError {
    fn from(err: NetworkError) -> Self {
        ChainError::Network(err)
    }
}

impl From<HeaderError> for ChainError {
    fn from(err: HeaderError) -> Self {
        ChainError::Decode(err)
    }
}

impl From<DifficultyError> for ChainError {
    fn from(err: DifficultyError) -> Self {
        ChainError::Difficulty(err)
    }
}

impl From<VerifyHeaderError> for ChainError {
    fn from(err: VerifyHeaderError) -> Self {
        ChainError::VerifyHeader(err)
    }
}
