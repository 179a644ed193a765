//! Consensus parameter definitions.

use crate::constants::{MIN_DIFFICULTY_GAP, TARGET_SPACING, TARGET_TIMESPAN};
use crate::Hash256;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Some(Network::Mainnet),
            "testnet" | "test" | "testnet3" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct ConsensusParams {
    pub network: Network,
    /// Largest admissible target, little-endian.
    pub max_target: Hash256,
    /// Compact encoding of `max_target`.
    pub max_bits: u32,
    pub target_timespan: i64,
    pub target_spacing: i64,
    /// Testnet rule: a header far enough behind its parent may use `max_bits`.
    pub allow_min_difficulty_blocks: bool,
    pub min_difficulty_gap: i64,
}

impl ConsensusParams {
    pub fn min_actual_timespan(&self) -> i64 {
        self.target_timespan / 4
    }

    pub fn max_actual_timespan(&self) -> i64 {
        self.target_timespan * 4
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexError {
    InvalidLength(usize),
    InvalidHex,
}

impl std::fmt::Display for HexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexError::InvalidLength(len) => {
                write!(f, "hash hex must be 64 characters, got {len}")
            }
            HexError::InvalidHex => write!(f, "hash contains non-hex characters"),
        }
    }
}

impl std::error::Error for HexError {}

/// Parses a display-order hash (as shown by explorers) into internal byte order.
pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let mut hex_str = input.trim();
    if let Some(stripped) = hex_str.strip_prefix("0x").or_else(|| hex_str.strip_prefix("0X")) {
        hex_str = stripped;
    }
    if hex_str.len() != 64 {
        return Err(HexError::InvalidLength(hex_str.len()));
    }

    let mut bytes = [0u8; 32];
    hex::decode_to_slice(hex_str, &mut bytes).map_err(|_| HexError::InvalidHex)?;
    bytes.reverse();
    Ok(bytes)
}

pub fn hash256_to_hex(hash: &Hash256) -> String {
    let mut display = *hash;
    display.reverse();
    hex::encode(display)
}

pub fn consensus_params(network: Network) -> ConsensusParams {
    match network {
        Network::Mainnet => mainnet_consensus_params(),
        Network::Testnet => testnet_consensus_params(),
        Network::Regtest => regtest_consensus_params(),
    }
}

fn static_hash(hex_str: &str) -> Hash256 {
    match hash256_from_hex(hex_str) {
        Ok(hash) => hash,
        Err(err) => panic!("invalid builtin hash {hex_str}: {err}"),
    }
}

fn mainnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Mainnet,
        max_target: static_hash("00000000ffff0000000000000000000000000000000000000000000000000000"),
        max_bits: 0x1d00_ffff,
        target_timespan: TARGET_TIMESPAN,
        target_spacing: TARGET_SPACING,
        allow_min_difficulty_blocks: false,
        min_difficulty_gap: MIN_DIFFICULTY_GAP,
    }
}

fn testnet_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Testnet,
        allow_min_difficulty_blocks: true,
        ..mainnet_consensus_params()
    }
}

fn regtest_consensus_params() -> ConsensusParams {
    ConsensusParams {
        network: Network::Regtest,
        max_target: static_hash("7fffff0000000000000000000000000000000000000000000000000000000000"),
        max_bits: 0x207f_ffff,
        target_timespan: TARGET_TIMESPAN,
        target_spacing: TARGET_SPACING,
        allow_min_difficulty_blocks: true,
        min_difficulty_gap: MIN_DIFFICULTY_GAP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hex_is_display_reversed() {
        let hash = hash256_from_hex(
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
        )
        .expect("genesis hash");
        assert_eq!(hash[31], 0x00);
        assert_eq!(hash[0], 0x6f);
        assert_eq!(
            hash256_to_hex(&hash),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
    }

    #[test]
    fn hash_hex_rejects_bad_input() {
        assert_eq!(hash256_from_hex("abcd"), Err(HexError::InvalidLength(4)));
        let bad = "zz".repeat(32);
        assert_eq!(hash256_from_hex(&bad), Err(HexError::InvalidHex));
    }

    #[test]
    fn testnet_only_differs_by_min_difficulty_rule() {
        let main = consensus_params(Network::Mainnet);
        let test = consensus_params(Network::Testnet);
        assert_eq!(main.max_target, test.max_target);
        assert_eq!(main.max_bits, test.max_bits);
        assert!(!main.allow_min_difficulty_blocks);
        assert!(test.allow_min_difficulty_blocks);
        assert_eq!(test.min_difficulty_gap, 1200);
    }

    #[test]
    fn parse_network() {
        assert_eq!(Network::parse("Mainnet"), Some(Network::Mainnet));
        assert_eq!(Network::parse("testnet3"), Some(Network::Testnet));
        assert_eq!(Network::parse("regtest"), Some(Network::Regtest));
        assert_eq!(Network::parse("signet"), None);
    }
}
