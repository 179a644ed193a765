use spv_consensus::{hash256_to_hex, ConsensusParams, Hash256};
use spv_primitives::BlockHeader;

use crate::difficulty::{hash_meets_target, max_target, Target};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyReason {
    LinkageMismatch,
    BitsMismatch { expected: u32, found: u32 },
    InsufficientWork,
    /// Min-difficulty window applied but the header did not use the maximum target.
    DifficultyMismatch,
}

impl std::fmt::Display for VerifyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyReason::LinkageMismatch => write!(f, "previous block hash mismatch"),
            VerifyReason::BitsMismatch { expected, found } => {
                write!(f, "bits {found:08x} do not match expected {expected:08x}")
            }
            VerifyReason::InsufficientWork => write!(f, "hash does not meet target"),
            VerifyReason::DifficultyMismatch => {
                write!(f, "min-difficulty header does not use the maximum target")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyHeaderError {
    pub hash: Hash256,
    pub reason: VerifyReason,
}

impl std::fmt::Display for VerifyHeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "header {} rejected: {}", hash256_to_hex(&self.hash), self.reason)
    }
}

impl std::error::Error for VerifyHeaderError {}

/// Checks linkage and difficulty of one header.
///
/// `prev_header` is only consulted for the min-difficulty window and may be
/// `None` when the predecessor is known by hash alone.
pub fn verify_header(
    header: &BlockHeader,
    prev_hash: &Hash256,
    prev_header: Option<&BlockHeader>,
    target: &Target,
    params: &ConsensusParams,
) -> Result<(), VerifyHeaderError> {
    let hash = header.hash();
    let reject = |reason| VerifyHeaderError { hash, reason };

    if header.prev_block != *prev_hash {
        return Err(reject(VerifyReason::LinkageMismatch));
    }

    if header.bits == target.bits && target.is_met_by(&hash) {
        return Ok(());
    }

    if params.allow_min_difficulty_blocks {
        if let Some(prev) = prev_header {
            let gap = i64::from(header.time) - i64::from(prev.time);
            if gap > params.min_difficulty_gap {
                if header.bits == params.max_bits && hash_meets_target(&hash, &max_target(params)) {
                    return Ok(());
                }
                return Err(reject(VerifyReason::DifficultyMismatch));
            }
        }
    }

    if header.bits != target.bits {
        return Err(reject(VerifyReason::BitsMismatch {
            expected: target.bits,
            found: header.bits,
        }));
    }
    Err(reject(VerifyReason::InsufficientWork))
}

/// Verifies a contiguous run of headers that all share `target`.
pub fn verify_headers(
    headers: &[BlockHeader],
    prev_hash: &Hash256,
    prev_header: Option<&BlockHeader>,
    target: &Target,
    params: &ConsensusParams,
) -> Result<(), VerifyHeaderError> {
    let mut prev_hash = *prev_hash;
    let mut prev_header = prev_header.copied();
    for header in headers {
        verify_header(header, &prev_hash, prev_header.as_ref(), target, params)?;
        prev_hash = header.hash();
        prev_header = Some(*header);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::difficulty::compact_to_u256;
    use spv_consensus::params::{consensus_params, Network};

    fn easy_testnet() -> ConsensusParams {
        let regtest = consensus_params(Network::Regtest);
        ConsensusParams {
            max_target: regtest.max_target,
            max_bits: regtest.max_bits,
            ..consensus_params(Network::Testnet)
        }
    }

    fn mine(mut header: BlockHeader, target: &Target) -> BlockHeader {
        while !target.is_met_by(&header.hash()) {
            header.nonce += 1;
        }
        header
    }

    fn parent() -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block: [7u8; 32],
            merkle_root: [1u8; 32],
            time: 1_600_000_000,
            bits: 0x207f_ffff,
            nonce: 0,
        }
    }

    fn child_of(prev: &BlockHeader, gap: u32, bits: u32) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block: prev.hash(),
            merkle_root: [2u8; 32],
            time: prev.time + gap,
            bits,
            nonce: 0,
        }
    }

    #[test]
    fn linkage_is_checked_before_difficulty() {
        let params = consensus_params(Network::Regtest);
        let target = Target::max(&params);
        let prev = parent();
        let header = mine(child_of(&prev, 600, params.max_bits), &target);

        let err = verify_header(&header, &[9u8; 32], Some(&prev), &target, &params).unwrap_err();
        assert_eq!(err.reason, VerifyReason::LinkageMismatch);
        assert_eq!(err.hash, header.hash());
        assert!(verify_header(&header, &prev.hash(), Some(&prev), &target, &params).is_ok());
    }

    #[test]
    fn mainnet_rejects_bits_mismatch_even_with_enough_work() {
        let params = ConsensusParams {
            allow_min_difficulty_blocks: false,
            ..easy_testnet()
        };
        let expected = Target {
            bits: 0x2000_ffff,
            target: compact_to_u256(0x2000_ffff).expect("target"),
        };
        let prev = parent();
        // Mined against a far harder target than `expected`, but announces other bits.
        let hard = Target {
            bits: 0x1f00_ffff,
            target: compact_to_u256(0x1f00_ffff).expect("target"),
        };
        let header = mine(child_of(&prev, 5_000, 0x1f00_ffff), &hard);
        assert!(expected.is_met_by(&header.hash()));

        let err = verify_header(&header, &prev.hash(), Some(&prev), &expected, &params).unwrap_err();
        assert_eq!(
            err.reason,
            VerifyReason::BitsMismatch {
                expected: 0x2000_ffff,
                found: 0x1f00_ffff
            }
        );
    }

    #[test]
    fn hash_must_be_strictly_below_target() {
        let params = consensus_params(Network::Mainnet);
        let prev = parent();
        let header = child_of(&prev, 600, 0x1d00_ffff);
        let target = Target {
            bits: 0x1d00_ffff,
            target: crate::difficulty::hash_to_u256(&header.hash()),
        };
        let err = verify_header(&header, &prev.hash(), Some(&prev), &target, &params).unwrap_err();
        assert_eq!(err.reason, VerifyReason::InsufficientWork);
    }

    #[test]
    fn testnet_min_difficulty_window_starts_after_twenty_minutes() {
        let params = easy_testnet();
        let expected = Target {
            bits: 0x2000_ffff,
            target: compact_to_u256(0x2000_ffff).expect("target"),
        };
        let prev = parent();

        let late = mine(child_of(&prev, 1_201, params.max_bits), &Target::max(&params));
        assert!(verify_header(&late, &prev.hash(), Some(&prev), &expected, &params).is_ok());

        let early = mine(child_of(&prev, 1_199, params.max_bits), &Target::max(&params));
        let err = verify_header(&early, &prev.hash(), Some(&prev), &expected, &params).unwrap_err();
        assert_eq!(
            err.reason,
            VerifyReason::BitsMismatch {
                expected: 0x2000_ffff,
                found: params.max_bits
            }
        );

        let wrong_bits = child_of(&prev, 1_201, 0x2000_8000);
        let err = verify_header(&wrong_bits, &prev.hash(), Some(&prev), &expected, &params).unwrap_err();
        assert_eq!(err.reason, VerifyReason::DifficultyMismatch);
    }

    #[test]
    fn verify_headers_advances_predecessor() {
        let params = consensus_params(Network::Regtest);
        let target = Target::max(&params);
        let first_prev = parent();
        let mut prev = first_prev;
        let mut headers = Vec::new();
        for _ in 0..5 {
            let header = mine(child_of(&prev, 600, params.max_bits), &target);
            headers.push(header);
            prev = header;
        }
        assert!(verify_headers(&headers, &first_prev.hash(), Some(&first_prev), &target, &params).is_ok());

        headers.swap(1, 2);
        let err = verify_headers(&headers, &first_prev.hash(), Some(&first_prev), &target, &params)
            .unwrap_err();
        assert_eq!(err.reason, VerifyReason::LinkageMismatch);
    }
}
