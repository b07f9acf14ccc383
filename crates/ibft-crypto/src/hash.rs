//! BLAKE3 hashing utilities
//!
//! All hashing in the engine uses BLAKE3 with 256-bit output.

use ibft_core::Hash;

/// Hash data using BLAKE3 (256-bit output)
pub fn hash_blake3(data: &[u8]) -> Hash {
    Hash::new(*blake3::hash(data).as_bytes())
}

/// Hash multiple items together
pub fn hash_concat(items: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for item in items {
        hasher.update(item);
    }
    Hash::new(*hasher.finalize().as_bytes())
}

/// Derive deterministic key material from a seed and a context label
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    blake3::derive_key(context, key_material)
}
