use spv_consensus::Hash256;
use spv_primitives::header::BlockHeader;
use spv_primitives::merkle::{merkle_branch, merkle_root, merkle_root_from_branch, MerkleProof};

struct Lcg {
    state: u64,
}

impl Lcg {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }

    fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 16) as u32
    }

    fn gen_range(&mut self, max: usize) -> usize {
        if max == 0 {
            0
        } else {
            (self.next_u64() % max as u64) as usize
        }
    }

    fn hash(&mut self) -> Hash256 {
        std::array::from_fn(|_| (self.next_u64() >> 24) as u8)
    }
}

#[test]
fn header_hash_depends_on_every_field() {
    let mut rng = Lcg::new(0x5eed);
    for _ in 0..64 {
        let header = BlockHeader {
            version: rng.next_u32(),
            prev_block: rng.hash(),
            merkle_root: rng.hash(),
            time: rng.next_u32(),
            bits: rng.next_u32(),
            nonce: rng.next_u32(),
        };
        let decoded = BlockHeader::consensus_decode(&header.consensus_encode()).expect("decode");
        assert_eq!(decoded.hash(), header.hash());

        let mut bumped = header;
        bumped.nonce = bumped.nonce.wrapping_add(1);
        assert_ne!(bumped.hash(), header.hash());

        let mut bumped = header;
        bumped.time = bumped.time.wrapping_add(1);
        assert_ne!(bumped.hash(), header.hash());
    }
}

#[test]
fn flipping_any_sibling_byte_breaks_the_proof() {
    let mut rng = Lcg::new(42);
    for _ in 0..16 {
        let count = 1 + rng.gen_range(40);
        let txids: Vec<Hash256> = (0..count).map(|_| rng.hash()).collect();
        let root = merkle_root(&txids);
        let index = rng.gen_range(count);
        let proof = MerkleProof {
            block_height: 0,
            siblings: merkle_branch(&txids, index),
            tx_index: index as u32,
        };
        assert_eq!(proof.root_for(&txids[index]), root);

        if proof.siblings.is_empty() {
            continue;
        }
        let sibling = rng.gen_range(proof.siblings.len());
        let byte = rng.gen_range(32);
        let mut tampered = proof.siblings.clone();
        tampered[sibling][byte] ^= 0x01;
        assert_ne!(
            merkle_root_from_branch(&txids[index], &tampered, proof.tx_index),
            root
        );
    }
}
