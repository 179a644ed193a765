//! Fixed 80-byte block header.

use spv_consensus::constants::HEADER_SIZE;
use spv_consensus::{hash256_from_hex, hash256_to_hex, Hash256};

use crate::encoding::{DecodeError, Decoder, Encoder};
use crate::hash::sha256d;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    Encoding(String),
    Decoding(DecodeError),
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderError::Encoding(message) => write!(f, "header encoding failed: {message}"),
            HeaderError::Decoding(err) => write!(f, "header decoding failed: {err}"),
        }
    }
}

impl std::error::Error for HeaderError {}

impl From<DecodeError> for HeaderError {
    fn from(err: DecodeError) -> Self {
        HeaderError::Decoding(err)
    }
}

impl BlockHeader {
    pub fn consensus_encode(&self) -> [u8; HEADER_SIZE] {
        let mut encoder = Encoder::with_capacity(HEADER_SIZE);
        encoder.write_u32_le(self.version);
        encoder.write_hash_le(&self.prev_block);
        encoder.write_hash_le(&self.merkle_root);
        encoder.write_u32_le(self.time);
        encoder.write_u32_le(self.bits);
        encoder.write_u32_le(self.nonce);

        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&encoder.into_inner());
        out
    }

    pub fn consensus_decode(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() != HEADER_SIZE {
            return Err(HeaderError::Decoding(DecodeError::InvalidLength {
                expected: HEADER_SIZE,
                found: bytes.len(),
            }));
        }
        let mut decoder = Decoder::new(bytes);
        let header = Self::consensus_decode_from(&mut decoder)?;
        decoder.finish()?;
        Ok(header)
    }

    pub fn consensus_decode_from(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            version: decoder.read_u32_le()?,
            prev_block: decoder.read_hash_le()?,
            merkle_root: decoder.read_hash_le()?,
            time: decoder.read_u32_le()?,
            bits: decoder.read_u32_le()?,
            nonce: decoder.read_u32_le()?,
        })
    }

    pub fn hash(&self) -> Hash256 {
        sha256d(&self.consensus_encode())
    }

    pub fn from_hex(input: &str) -> Result<Self, HeaderError> {
        let bytes = hex::decode(input.trim())
            .map_err(|_| HeaderError::Decoding(DecodeError::InvalidData("invalid header hex")))?;
        Self::consensus_decode(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.consensus_encode())
    }
}

/// Header as reported field by field by a backend, with display-order hashes.
///
/// Integers are carried wide so out-of-range values are caught at the boundary
/// instead of being silently truncated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderFields {
    pub version: i64,
    pub prev_block_hash: String,
    pub merkle_root: String,
    pub timestamp: i64,
    pub bits: i64,
    pub nonce: i64,
}

impl HeaderFields {
    pub fn to_header(&self) -> Result<BlockHeader, HeaderError> {
        Ok(BlockHeader {
            version: field_u32("version", self.version)?,
            prev_block: field_hash("prev_block_hash", &self.prev_block_hash)?,
            merkle_root: field_hash("merkle_root", &self.merkle_root)?,
            time: field_u32("timestamp", self.timestamp)?,
            bits: field_u32("bits", self.bits)?,
            nonce: field_u32("nonce", self.nonce)?,
        })
    }

    pub fn encode(&self) -> Result<[u8; HEADER_SIZE], HeaderError> {
        Ok(self.to_header()?.consensus_encode())
    }
}

impl From<&BlockHeader> for HeaderFields {
    fn from(header: &BlockHeader) -> Self {
        Self {
            version: i64::from(header.version),
            prev_block_hash: hash256_to_hex(&header.prev_block),
            merkle_root: hash256_to_hex(&header.merkle_root),
            timestamp: i64::from(header.time),
            bits: i64::from(header.bits),
            nonce: i64::from(header.nonce),
        }
    }
}

fn field_u32(name: &str, value: i64) -> Result<u32, HeaderError> {
    u32::try_from(value).map_err(|_| HeaderError::Encoding(format!("{name} {value} does not fit in u32")))
}

fn field_hash(name: &str, value: &str) -> Result<Hash256, HeaderError> {
    hash256_from_hex(value).map_err(|err| HeaderError::Encoding(format!("{name}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENESIS_HEX: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c";

    #[test]
    fn genesis_header_hashes_to_known_value() {
        let header = BlockHeader::from_hex(GENESIS_HEX).expect("genesis");
        assert_eq!(header.version, 1);
        assert_eq!(header.prev_block, [0u8; 32]);
        assert_eq!(header.time, 1_231_006_505);
        assert_eq!(header.bits, 0x1d00_ffff);
        assert_eq!(header.nonce, 2_083_236_893);
        assert_eq!(
            hash256_to_hex(&header.merkle_root),
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
        );
        assert_eq!(
            hash256_to_hex(&header.hash()),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );
        assert_eq!(header.to_hex(), GENESIS_HEX);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        let err = BlockHeader::consensus_decode(&[0u8; 79]).unwrap_err();
        assert_eq!(
            err,
            HeaderError::Decoding(DecodeError::InvalidLength {
                expected: 80,
                found: 79
            })
        );
        assert!(BlockHeader::consensus_decode(&[0u8; 81]).is_err());
    }

    #[test]
    fn fields_reject_out_of_range_integers() {
        let header = BlockHeader::from_hex(GENESIS_HEX).expect("genesis");
        let mut fields = HeaderFields::from(&header);
        assert_eq!(fields.to_header().expect("fields"), header);

        fields.nonce = i64::from(u32::MAX) + 1;
        assert!(matches!(fields.encode(), Err(HeaderError::Encoding(_))));

        let mut fields = HeaderFields::from(&header);
        fields.merkle_root = "abc".to_string();
        assert!(matches!(fields.to_header(), Err(HeaderError::Encoding(_))));
    }
}
