//! # Istanbul BFT Cryptography
//!
//! Cryptographic primitives used by the consensus engine:
//! - BLAKE3 hashing utilities
//! - Ed25519 validator keys producing self-describing signatures
//! - Signer recovery (signature → address) memoised by a recency cache
//!
//! ## Signature Format
//!
//! | Bytes  | Content                   |
//! |--------|---------------------------|
//! | 0..64  | Ed25519 signature         |
//! | 64..96 | Ed25519 verifying key     |
//!
//! Carrying the verifying key makes every signature recoverable: the signer
//! address is `BLAKE3(verifying_key)[..20]` once the signature checks out.

pub mod cache;
pub mod error;
pub mod hash;
pub mod keys;
pub mod recover;

pub use cache::*;
pub use error::*;
pub use hash::*;
pub use keys::*;
pub use recover::*;

/// Cryptographic prelude
pub mod prelude {
    pub use crate::cache::{LruCache, RecencyCache};
    pub use crate::error::{CryptoError, Result};
    pub use crate::hash::{hash_blake3, hash_concat};
    pub use crate::keys::KeyPair;
    pub use crate::recover::{recover_signer, verify_signature, SignerCache};
}
