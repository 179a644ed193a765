//! Chunks: runs of up to 2016 consecutive raw headers.

use spv_consensus::constants::{CHUNK_SIZE, HEADER_SIZE};
use spv_consensus::Hash256;

use crate::encoding::DecodeError;
use crate::hash::sha256d;
use crate::header::{BlockHeader, HeaderError};

pub fn decode_chunk(bytes: &[u8]) -> Result<Vec<BlockHeader>, HeaderError> {
    if bytes.len() % HEADER_SIZE != 0 {
        return Err(HeaderError::Decoding(DecodeError::InvalidData(
            "chunk length is not a multiple of the header size",
        )));
    }
    let count = bytes.len() / HEADER_SIZE;
    if count > CHUNK_SIZE as usize {
        return Err(HeaderError::Decoding(DecodeError::InvalidData(
            "chunk holds more than 2016 headers",
        )));
    }
    bytes
        .chunks_exact(HEADER_SIZE)
        .map(BlockHeader::consensus_decode)
        .collect()
}

pub fn encode_chunk(headers: &[BlockHeader]) -> Vec<u8> {
    let mut out = Vec::with_capacity(headers.len() * HEADER_SIZE);
    for header in headers {
        out.extend_from_slice(&header.consensus_encode());
    }
    out
}

/// Digest committed in place of a complete chunk in compact storage.
pub fn chunk_hash(raw: &[u8]) -> Hash256 {
    sha256d(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(nonce: u32) -> BlockHeader {
        BlockHeader {
            version: 2,
            prev_block: [nonce as u8; 32],
            merkle_root: [0x11; 32],
            time: 1_500_000_000 + nonce,
            bits: 0x207f_ffff,
            nonce,
        }
    }

    #[test]
    fn chunk_decode_preserves_order() {
        let headers: Vec<BlockHeader> = (0..5).map(header).collect();
        let raw = encode_chunk(&headers);
        assert_eq!(raw.len(), 5 * HEADER_SIZE);
        assert_eq!(decode_chunk(&raw).expect("decode"), headers);
        assert_eq!(chunk_hash(&raw), sha256d(&raw));
    }

    #[test]
    fn chunk_decode_rejects_partial_header() {
        let mut raw = encode_chunk(&[header(1)]);
        raw.pop();
        assert!(decode_chunk(&raw).is_err());
    }

    #[test]
    fn chunk_decode_rejects_oversized_chunk() {
        let raw = vec![0u8; HEADER_SIZE * (CHUNK_SIZE as usize + 1)];
        assert!(decode_chunk(&raw).is_err());
        assert!(decode_chunk(&[]).expect("empty").is_empty());
    }
}
