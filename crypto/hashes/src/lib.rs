use once_cell::sync::Lazy;
use sha2::{Digest, Sha384};
use std::fmt::{Debug, Display, Formatter};
use std::str::{self, FromStr};
use thiserror::Error;

pub const HASH_SIZE: usize = 48;

/// Deepest tree level supported by the streaming hashers
pub const MAX_DEPTH: usize = 24;

/// Maximum number of leaves in a single tree, `2^MAX_DEPTH`
pub const MAX_LEAVES: u64 = 1 << MAX_DEPTH;

/// Previous block hash of the first block in a stream
pub const ZERO_HASH: Hash = Hash::from_bytes([0; HASH_SIZE]);

/// A SHA-384 digest
#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct Hash([u8; HASH_SIZE]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expected {HASH_SIZE} hash bytes, got {0}")]
pub struct HashLengthError(pub usize);

impl Hash {
    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, HashLengthError> {
        Ok(Hash(bytes.try_into().map_err(|_| HashLengthError(bytes.len()))?))
    }

    fn from_digest(digest: impl AsRef<[u8]>) -> Self {
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(digest.as_ref());
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut hex = [0u8; HASH_SIZE * 2];
        hex::encode_to_slice(self.0, &mut hex).expect("The output is exactly twice the size of the input");
        f.write_str(str::from_utf8(&hex).expect("hex is always valid UTF-8"))
    }
}

impl Debug for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for Hash {
    type Err = hex::FromHexError;

    fn from_str(hash_str: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; HASH_SIZE];
        hex::decode_to_slice(hash_str, &mut bytes)?;
        Ok(Hash(bytes))
    }
}

/// Hashes the serialized bytes of a single block item into its leaf hash
pub fn hash_leaf(bytes: &[u8]) -> Hash {
    Hash::from_digest(Sha384::digest(bytes))
}

/// Hashes the concatenation of two sibling hashes into their parent
pub fn combine(left: Hash, right: Hash) -> Hash {
    let mut hasher = Sha384::new();
    hasher.update(left.0);
    hasher.update(right.0);
    Hash::from_digest(hasher.finalize())
}

/// `H(∅)`, the root of an empty tree and the padding leaf of a partial one
pub fn empty_hash() -> Hash {
    EMPTY_HASHES[0]
}

/// Root of a perfect subtree of height `level` made entirely of padding leaves
///
/// Panics if `level > MAX_DEPTH`.
pub fn empty_subtree_hash(level: usize) -> Hash {
    EMPTY_HASHES[level]
}

static EMPTY_HASHES: Lazy<[Hash; MAX_DEPTH + 1]> = Lazy::new(|| {
    let mut hashes = [hash_leaf(&[]); MAX_DEPTH + 1];
    for level in 1..=MAX_DEPTH {
        hashes[level] = combine(hashes[level - 1], hashes[level - 1]);
    }
    hashes
});

/// Hash committing to a whole block: the previous block hash and the input item root on the left,
/// the output item root and the start-of-block state root on the right
pub fn block_root_hash(previous_block_hash: Hash, input_root: Hash, output_root: Hash, start_of_block_state_root: Hash) -> Hash {
    combine(combine(previous_block_hash, input_root), combine(output_root, start_of_block_state_root))
}
