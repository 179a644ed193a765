//! Chain constants, network parameters, and hash helpers shared by every crate.

pub mod constants;
pub mod params;

pub use params::{consensus_params, hash256_from_hex, hash256_to_hex, ConsensusParams, HexError, Network};

/// A 32-byte hash in internal (wire) byte order. Display form is byte-reversed.
pub type Hash256 = [u8; 32];

pub const ZERO_HASH: Hash256 = [0u8; 32];
