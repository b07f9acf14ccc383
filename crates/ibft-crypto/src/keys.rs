//! Validator key management

use crate::error::{CryptoError, Result};
use crate::hash::derive_key;
use ed25519_dalek::{Signer, SigningKey};
use ibft_core::Address;
use rand::rngs::OsRng;
use rand::RngCore;

/// Length of an Ed25519 signature
pub const ED25519_SIGNATURE_LENGTH: usize = 64;

/// Length of an Ed25519 verifying key
pub const ED25519_PUBLIC_KEY_LENGTH: usize = 32;

/// Length of a recoverable signature (signature || verifying key)
pub const SIGNATURE_LENGTH: usize = ED25519_SIGNATURE_LENGTH + ED25519_PUBLIC_KEY_LENGTH;

/// Validator keypair
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
    address: Address,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let mut secret_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut secret_bytes);
        Self::from_secret(secret_bytes)
    }

    /// Deterministic keypair from a seed (test networks, simulations)
    pub fn from_seed(seed: &[u8]) -> Self {
        Self::from_secret(derive_key("ibft validator key v1", seed))
    }

    /// Restore from 32 secret key bytes
    pub fn from_secret(secret: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&secret);
        let address = Address::from_public_key(signing_key.verifying_key().as_bytes());
        Self {
            signing_key,
            address,
        }
    }

    /// Restore from a secret key slice
    pub fn from_secret_slice(secret: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = secret
            .try_into()
            .map_err(|_| CryptoError::InvalidSecretKey(format!("expected 32 bytes, got {}", secret.len())))?;
        Ok(Self::from_secret(bytes))
    }

    /// Validator address of this key
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn public_key_bytes(&self) -> [u8; ED25519_PUBLIC_KEY_LENGTH] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Sign a message, producing a recoverable signature
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signature = self.signing_key.sign(message);
        let mut out = Vec::with_capacity(SIGNATURE_LENGTH);
        out.extend_from_slice(&signature.to_bytes());
        out.extend_from_slice(&self.public_key_bytes());
        out
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
