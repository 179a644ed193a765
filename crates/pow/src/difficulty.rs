//! Compact target encoding and the per-chunk retarget rule.

use primitive_types::{U256, U512};
use spv_consensus::{ConsensusParams, Hash256};
use spv_primitives::BlockHeader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactError {
    Negative,
    Overflow,
}

impl std::fmt::Display for CompactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactError::Negative => write!(f, "compact target has negative sign bit"),
            CompactError::Overflow => write!(f, "compact target overflows 256-bit range"),
        }
    }
}

impl std::error::Error for CompactError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyError {
    MissingHeaders { chunk_index: u32 },
    Compact(CompactError),
}

impl std::fmt::Display for DifficultyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DifficultyError::MissingHeaders { chunk_index } => write!(
                f,
                "retarget for chunk {chunk_index} needs the bounds of chunk {}",
                chunk_index.saturating_sub(1)
            ),
            DifficultyError::Compact(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for DifficultyError {}

impl From<CompactError> for DifficultyError {
    fn from(err: CompactError) -> Self {
        DifficultyError::Compact(err)
    }
}

/// Expected difficulty for every header of one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Target {
    pub bits: u32,
    pub target: U256,
}

impl Target {
    pub fn max(params: &ConsensusParams) -> Self {
        Self {
            bits: params.max_bits,
            target: max_target(params),
        }
    }

    /// Zero-padded 64 character big-endian hex.
    pub fn to_hex(&self) -> String {
        format!("{:064x}", self.target)
    }

    pub fn is_met_by(&self, hash: &Hash256) -> bool {
        hash_meets_target(hash, &self.target)
    }
}

pub fn max_target(params: &ConsensusParams) -> U256 {
    U256::from_little_endian(&params.max_target)
}

pub fn compact_to_u256(bits: u32) -> Result<U256, CompactError> {
    let size = bits >> 24;
    let mut word = bits & 0x007f_ffff;
    let negative = (bits & 0x0080_0000) != 0;

    if negative && word != 0 {
        return Err(CompactError::Negative);
    }

    let value = if size <= 3 {
        word >>= 8 * (3 - size);
        U256::from(word)
    } else {
        if word != 0 {
            let overflow = size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32);
            if overflow {
                return Err(CompactError::Overflow);
            }
        }
        U256::from(word) << (8 * (size - 3))
    };

    Ok(value)
}

pub fn u256_to_compact(value: U256) -> u32 {
    if value.is_zero() {
        return 0;
    }

    let mut size = value.bits().div_ceil(8) as u32;
    let mut compact = if size <= 3 {
        value.low_u32() << (8 * (3 - size))
    } else {
        (value >> (8 * (size - 3))).low_u32()
    };

    // The 0x00800000 bit is the sign; push the mantissa down a byte instead.
    if (compact & 0x0080_0000) != 0 {
        compact >>= 8;
        size += 1;
    }

    (size << 24) | (compact & 0x007f_ffff)
}

pub fn hash_to_u256(hash: &Hash256) -> U256 {
    U256::from_little_endian(hash)
}

/// Strict comparison: a hash equal to the target does not satisfy it.
pub fn hash_meets_target(hash: &Hash256, target: &U256) -> bool {
    hash_to_u256(hash) < *target
}

pub fn clamp_timespan(actual: i64, params: &ConsensusParams) -> i64 {
    actual.clamp(params.min_actual_timespan(), params.max_actual_timespan())
}

/// Retargets from the first and last header of the preceding chunk.
pub fn retarget(
    first: &BlockHeader,
    last: &BlockHeader,
    params: &ConsensusParams,
) -> Result<Target, DifficultyError> {
    let actual = clamp_timespan(i64::from(last.time) - i64::from(first.time), params);
    let previous = compact_to_u256(last.bits)?;

    let scaled = previous.full_mul(U256::from(actual as u64)) / U512::from(params.target_timespan as u64);
    let limit = max_target(params);
    let target = if scaled > U512::from(limit) {
        limit
    } else {
        U256::try_from(scaled).unwrap_or(limit)
    };

    Ok(Target {
        bits: u256_to_compact(target),
        target,
    })
}

/// Target for every header of chunk `chunk_index`.
///
/// `prev_chunk` carries the first and last header of chunk `chunk_index - 1`;
/// the last one may come from a batch that is still being verified.
pub fn compute_target(
    chunk_index: u32,
    prev_chunk: Option<(&BlockHeader, &BlockHeader)>,
    params: &ConsensusParams,
) -> Result<Target, DifficultyError> {
    if chunk_index == 0 {
        return Ok(Target::max(params));
    }
    let (first, last) = prev_chunk.ok_or(DifficultyError::MissingHeaders { chunk_index })?;
    retarget(first, last, params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spv_consensus::params::{consensus_params, Network};

    fn bounds(first_time: u32, last_time: u32, bits: u32) -> (BlockHeader, BlockHeader) {
        let first = BlockHeader {
            version: 1,
            prev_block: [0u8; 32],
            merkle_root: [0u8; 32],
            time: first_time,
            bits,
            nonce: 0,
        };
        let last = BlockHeader {
            time: last_time,
            nonce: 1,
            ..first
        };
        (first, last)
    }

    fn next_bits(first_time: u32, last_time: u32, bits: u32) -> u32 {
        let params = consensus_params(Network::Mainnet);
        let (first, last) = bounds(first_time, last_time, bits);
        compute_target(1, Some((&first, &last)), &params)
            .expect("target")
            .bits
    }

    // Historical mainnet retargets (Bitcoin Core pow_tests).
    #[test]
    fn retarget_matches_mainnet_history() {
        assert_eq!(next_bits(1_261_130_161, 1_262_152_739, 0x1d00ffff), 0x1d00d86a);
    }

    #[test]
    fn retarget_is_capped_at_pow_limit() {
        assert_eq!(next_bits(1_231_006_505, 1_233_061_996, 0x1d00ffff), 0x1d00ffff);
    }

    #[test]
    fn retarget_clamps_fast_periods_to_a_quarter() {
        assert_eq!(next_bits(1_279_008_237, 1_279_297_671, 0x1c05a3f4), 0x1c0168fd);
    }

    #[test]
    fn retarget_clamps_slow_periods_to_four_times() {
        assert_eq!(next_bits(1_263_163_443, 1_269_211_443, 0x1c387f6f), 0x1d00e1fd);
    }

    #[test]
    fn chunk_zero_uses_max_target() {
        let params = consensus_params(Network::Mainnet);
        let (first, last) = bounds(0, 1, 0x1b0404cb);
        let target = compute_target(0, Some((&first, &last)), &params).expect("target");
        assert_eq!(target, Target::max(&params));
        assert_eq!(
            target.to_hex(),
            "00000000ffff0000000000000000000000000000000000000000000000000000"
        );
        assert_eq!(compute_target(0, None, &params), Ok(Target::max(&params)));
    }

    #[test]
    fn missing_bounds_are_reported() {
        let params = consensus_params(Network::Mainnet);
        assert_eq!(
            compute_target(3, None, &params),
            Err(DifficultyError::MissingHeaders { chunk_index: 3 })
        );
    }

    #[test]
    fn regtest_limit_does_not_overflow() {
        let params = consensus_params(Network::Regtest);
        let (first, last) = bounds(0, 2015 * 600, params.max_bits);
        let target = compute_target(1, Some((&first, &last)), &params).expect("target");
        assert_eq!(target.bits, 0x207fefbd);
        assert!(target.target < max_target(&params));

        let (first, last) = bounds(0, 10 * 1_209_600, params.max_bits);
        let target = compute_target(1, Some((&first, &last)), &params).expect("target");
        assert_eq!(target, Target::max(&params));
    }

    #[test]
    fn compact_rejects_sign_and_overflow() {
        assert_eq!(compact_to_u256(0x04923456), Err(CompactError::Negative));
        assert_eq!(compact_to_u256(0xff123456), Err(CompactError::Overflow));
        assert_eq!(compact_to_u256(0x01003456), Ok(U256::zero()));
        assert_eq!(compact_to_u256(0x01123456), Ok(U256::from(0x12u32)));
        assert_eq!(u256_to_compact(U256::from(0x80u32)), 0x02008000);
    }
}
