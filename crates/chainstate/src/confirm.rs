//! Transaction inclusion against verified headers.

use spv_consensus::Hash256;
use spv_primitives::{BlockHeader, MerkleProof};
use spv_storage::HeaderLedger;

use crate::error::ChainError;
use crate::network::Network;
use crate::sync::SyncEngine;

/// Checks that `proof` folds `txid` into the merkle root of `header`.
pub fn check_inclusion(txid: &Hash256, proof: &MerkleProof, header: &BlockHeader) -> Result<(), ChainError> {
    if proof.root_for(txid) == header.merkle_root {
        Ok(())
    } else {
        Err(ChainError::VerifyTx { txid: *txid })
    }
}

impl<L, N> SyncEngine<L, N>
where
    L: HeaderLedger,
    N: Network,
{
    /// Verifies `proof` against the locally verified header at its height and
    /// returns that header.
    pub async fn verify_confirmation(
        &self,
        txid: &Hash256,
        proof: &MerkleProof,
    ) -> Result<BlockHeader, ChainError> {
        let header = self.get_header(i64::from(proof.block_height)).await?;
        check_inclusion(txid, proof, &header)?;
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spv_primitives::{merkle_branch, merkle_root};

    fn txids(count: u8) -> Vec<Hash256> {
        (0..count).map(|tag| [tag.wrapping_mul(37).wrapping_add(1); 32]).collect()
    }

    fn header_with_root(merkle_root: Hash256) -> BlockHeader {
        BlockHeader {
            version: 1,
            prev_block: [0u8; 32],
            merkle_root,
            time: 0,
            bits: 0x207f_ffff,
            nonce: 0,
        }
    }

    #[test]
    fn inclusion_holds_for_every_position() {
        let ids = txids(7);
        let header = header_with_root(merkle_root(&ids));
        for (position, txid) in ids.iter().enumerate() {
            let proof = MerkleProof {
                block_height: 0,
                siblings: merkle_branch(&ids, position),
                tx_index: position as u32,
            };
            assert_eq!(check_inclusion(txid, &proof, &header), Ok(()));
        }
    }

    #[test]
    fn wrong_position_or_txid_fails() {
        let ids = txids(4);
        let header = header_with_root(merkle_root(&ids));
        let proof = MerkleProof {
            block_height: 0,
            siblings: merkle_branch(&ids, 1),
            tx_index: 2,
        };
        assert_eq!(
            check_inclusion(&ids[1], &proof, &header),
            Err(ChainError::VerifyTx { txid: ids[1] })
        );

        let proof = MerkleProof { tx_index: 1, ..proof };
        assert!(check_inclusion(&ids[1], &proof, &header).is_ok());
        assert!(check_inclusion(&[0xaa; 32], &proof, &header).is_err());
    }
}
