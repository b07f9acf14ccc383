//! Signer recovery
//!
//! Signatures carry their verifying key, so "recovery" means: split the
//! signature, verify it against the data, and derive the address from the
//! embedded key. Recovery is the expensive part of message handling, so
//! [`SignerCache`] memoises it per (data, signature) pair.

use crate::cache::{LruCache, RecencyCache};
use crate::error::{CryptoError, Result};
use crate::hash::hash_concat;
use crate::keys::{ED25519_SIGNATURE_LENGTH, SIGNATURE_LENGTH};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use ibft_core::{Address, Hash};
use std::sync::Arc;

/// Default number of memoised recoveries
pub const DEFAULT_SIGNER_CACHE_CAPACITY: usize = 4096;

/// Recover the address that produced `signature` over `data`
pub fn recover_signer(data: &[u8], signature: &[u8]) -> Result<Address> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(CryptoError::InvalidSignature(format!(
            "expected {} bytes, got {}",
            SIGNATURE_LENGTH,
            signature.len()
        )));
    }

    let (sig_bytes, key_bytes) = signature.split_at(ED25519_SIGNATURE_LENGTH);
    let key_bytes: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey("bad key length".to_string()))?;
    let sig_bytes: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidSignature("bad signature length".to_string()))?;

    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
    let sig = Signature::from_bytes(&sig_bytes);

    verifying_key
        .verify(data, &sig)
        .map_err(|_| CryptoError::VerificationFailed)?;

    Ok(Address::from_public_key(&key_bytes))
}

/// Check that `signature` over `data` was produced by `expected`
pub fn verify_signature(data: &[u8], expected: Address, signature: &[u8]) -> Result<()> {
    let recovered = recover_signer(data, signature)?;
    if recovered != expected {
        return Err(CryptoError::SignerMismatch {
            expected,
            recovered,
        });
    }
    Ok(())
}

/// Memoising signer recovery, shared by every component of one engine
pub struct SignerCache {
    cache: Arc<dyn RecencyCache<Hash, Address>>,
}

impl SignerCache {
    /// Cache backed by an LRU of the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Arc::new(LruCache::new(capacity)),
        }
    }

    /// Cache backed by a caller-provided eviction policy
    pub fn with_cache(cache: Arc<dyn RecencyCache<Hash, Address>>) -> Self {
        Self { cache }
    }

    fn cache_key(data: &[u8], signature: &[u8]) -> Hash {
        // binding the data prevents replaying a known signature over new data
        let data_hash = hash_concat(&[data]);
        hash_concat(&[data_hash.as_bytes(), signature])
    }

    /// Recover the signer of `data`, consulting the cache first
    pub fn recover(&self, data: &[u8], signature: &[u8]) -> Result<Address> {
        let key = Self::cache_key(data, signature);
        if let Some(address) = self.cache.get(&key) {
            return Ok(address);
        }

        let address = recover_signer(data, signature)?;
        self.cache.put(key, address);
        Ok(address)
    }

    /// Recover and compare against an expected signer
    pub fn verify(&self, data: &[u8], expected: Address, signature: &[u8]) -> Result<()> {
        let recovered = self.recover(data, signature)?;
        if recovered != expected {
            return Err(CryptoError::SignerMismatch {
                expected,
                recovered,
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl Default for SignerCache {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNER_CACHE_CAPACITY)
    }
}
