//! Merkle branch recomputation for transaction inclusion proofs.
//!
//! All hashes are in internal byte order; callers holding display-order hex
//! convert with `hash256_from_hex` first.

use spv_consensus::Hash256;

use crate::hash::sha256d_pair;

/// Inclusion proof for one transaction, as served by an indexing backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleProof {
    pub block_height: u32,
    pub siblings: Vec<Hash256>,
    /// Position of the transaction in the block; bit `i` selects the side at depth `i`.
    pub tx_index: u32,
}

impl MerkleProof {
    pub fn root_for(&self, txid: &Hash256) -> Hash256 {
        merkle_root_from_branch(txid, &self.siblings, self.tx_index)
    }
}

pub fn merkle_root_from_branch(txid: &Hash256, siblings: &[Hash256], tx_index: u32) -> Hash256 {
    let mut acc = *txid;
    for (depth, sibling) in siblings.iter().enumerate() {
        let right_side = depth < 32 && (tx_index >> depth) & 1 == 1;
        acc = if right_side {
            sha256d_pair(sibling, &acc)
        } else {
            sha256d_pair(&acc, sibling)
        };
    }
    acc
}

/// Root of the tree over `txids`, duplicating the last node of odd layers.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return [0u8; 32];
    }
    let mut layer = txids.to_vec();
    while layer.len() > 1 {
        layer = next_layer(&layer);
    }
    layer[0]
}

/// Sibling path for the transaction at `index`; empty when out of range.
pub fn merkle_branch(txids: &[Hash256], index: usize) -> Vec<Hash256> {
    if index >= txids.len() {
        return Vec::new();
    }
    let mut branch = Vec::new();
    let mut layer = txids.to_vec();
    let mut pos = index;
    while layer.len() > 1 {
        let sibling = pos ^ 1;
        let hash = layer.get(sibling).copied().unwrap_or(layer[pos]);
        branch.push(hash);
        layer = next_layer(&layer);
        pos /= 2;
    }
    branch
}

fn next_layer(layer: &[Hash256]) -> Vec<Hash256> {
    layer
        .chunks(2)
        .map(|pair| {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            sha256d_pair(left, right)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txids(count: u8) -> Vec<Hash256> {
        (0..count)
            .map(|i| {
                let mut h = [0u8; 32];
                h[0] = i;
                h[31] = 0xa5;
                h
            })
            .collect()
    }

    #[test]
    fn every_branch_rebuilds_the_root() {
        for count in 1..=9u8 {
            let ids = txids(count);
            let root = merkle_root(&ids);
            for (index, txid) in ids.iter().enumerate() {
                let branch = merkle_branch(&ids, index);
                assert_eq!(
                    merkle_root_from_branch(txid, &branch, index as u32),
                    root,
                    "count {count} index {index}"
                );
            }
        }
    }

    #[test]
    fn single_transaction_root_is_the_txid() {
        let ids = txids(1);
        assert_eq!(merkle_root(&ids), ids[0]);
        assert!(merkle_branch(&ids, 0).is_empty());
    }

    #[test]
    fn wrong_position_changes_the_root() {
        let ids = txids(4);
        let branch = merkle_branch(&ids, 2);
        let proof = MerkleProof {
            block_height: 10,
            siblings: branch,
            tx_index: 3,
        };
        assert_ne!(proof.root_for(&ids[2]), merkle_root(&ids));
    }
}
