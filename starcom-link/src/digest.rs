//! Authentication token derivation
//!
//! token = SHA256(secret_key || challenge), no delimiter, no length prefix.
//! The raw 32 digest bytes are what gets written back to the peripheral.

use sha2::{Digest, Sha256};

pub const TOKEN_LEN: usize = 32;

pub type Token = [u8; TOKEN_LEN];

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("hash primitive unavailable: {0}")]
    Unavailable(String),
}

/// Computes handshake tokens. Injected into the link so tests can simulate
/// a missing hash primitive.
pub trait DigestEngine {
    fn compute_token(&self, secret_key: &[u8], challenge: &[u8]) -> Result<Token, DigestError>;
}

/// SHA-256 engine used by the peripheral firmware
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Engine;

impl DigestEngine for Sha256Engine {
    fn compute_token(&self, secret_key: &[u8], challenge: &[u8]) -> Result<Token, DigestError> {
        Ok(compute_token(secret_key, challenge))
    }
}

pub fn compute_token(secret_key: &[u8], challenge: &[u8]) -> Token {
    let mut hasher = Sha256::new();
    hasher.update(secret_key);
    hasher.update(challenge);
    hasher.finalize().into()
}
