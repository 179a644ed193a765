//! Block header codec, chunk helpers, and merkle branch arithmetic.

pub mod chunk;
pub mod encoding;
pub mod hash;
pub mod header;
pub mod merkle;

pub use chunk::{chunk_hash, decode_chunk, encode_chunk};
pub use hash::{sha256, sha256d};
pub use header::{BlockHeader, HeaderError, HeaderFields};
pub use merkle::{merkle_branch, merkle_root, merkle_root_from_branch, MerkleProof};
