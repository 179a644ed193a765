use spv_consensus::Hash256;

/// Notifications published by the sync engine and the client facade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockchainEvent {
    NewBlock { hash: Hash256, height: u32 },
    SyncStart,
    SyncStop,
    TouchAddress { address: String, txid: Hash256 },
    Error(String),
}
