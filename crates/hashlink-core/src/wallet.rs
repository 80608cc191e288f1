//! Ed25519 signing on behalf of one identity.
//!
//! An identity is the hex-encoded 32-byte verifying key; a signature is the hex-encoded
//! 64-byte Ed25519 signature over the canonical `(sender, recipient, amount)` triple.

use crate::constants::{PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, SIGNATURE_SIZE};
use crate::{canonical_triple, Amount, Transaction};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::{CryptoRng, RngCore};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid signature encoding: {0}")]
    InvalidSignature(String),

    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),
}

#[derive(Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    identity: String,
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl Wallet {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_signing_key(SigningKey::generate(rng))
    }

    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        let seed: [u8; SECRET_KEY_SIZE] = bytes.try_into().map_err(|_| {
            WalletError::InvalidSecretKey(format!(
                "expected {SECRET_KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_signing_key(SigningKey::from_bytes(&seed)))
    }

    pub fn from_secret_hex(secret: &str) -> Result<Self, WalletError> {
        let bytes = hex::decode(secret.trim())
            .map_err(|e| WalletError::InvalidSecretKey(e.to_string()))?;
        Self::from_secret_bytes(&bytes)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let identity = hex::encode(signing_key.verifying_key().as_bytes());
        Self {
            signing_key,
            identity,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Signature for a transfer of `amount` from this wallet to `recipient`.
    pub fn sign(&self, recipient: &str, amount: Amount) -> String {
        let message = canonical_triple(&self.identity, recipient, amount);
        hex::encode(self.signing_key.sign(&message).to_bytes())
    }

    /// A signed transfer ready to be handed to the ledger.
    pub fn transfer(&self, recipient: &str, amount: Amount) -> Transaction {
        Transaction::transfer(
            self.identity.clone(),
            recipient,
            self.sign(recipient, amount),
            amount,
        )
    }
}

pub fn decode_identity(identity: &str) -> Result<VerifyingKey, WalletError> {
    let bytes = hex::decode(identity).map_err(|e| WalletError::InvalidIdentity(e.to_string()))?;
    let key: [u8; PUBLIC_KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
        WalletError::InvalidIdentity(format!(
            "expected {PUBLIC_KEY_SIZE} bytes, got {}",
            bytes.len()
        ))
    })?;
    VerifyingKey::from_bytes(&key).map_err(|e| WalletError::InvalidIdentity(e.to_string()))
}

pub fn decode_signature(signature: &str) -> Result<Signature, WalletError> {
    let bytes =
        hex::decode(signature).map_err(|e| WalletError::InvalidSignature(e.to_string()))?;
    let raw: [u8; SIGNATURE_SIZE] = bytes.as_slice().try_into().map_err(|_| {
        WalletError::InvalidSignature(format!(
            "expected {SIGNATURE_SIZE} bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(Signature::from_bytes(&raw))
}

/// True iff `signature` is `identity`'s signature over `message`.
/// Undecodable identities or signatures simply fail verification.
pub fn verify_detached(identity: &str, message: &[u8], signature: &str) -> bool {
    let (Ok(key), Ok(sig)) = (decode_identity(identity), decode_signature(signature)) else {
        return false;
    };
    key.verify(message, &sig).is_ok()
}
