//! Cryptographic error types
//!
//! This module defines all error types for the X3DH / Double Ratchet engine.
//! Every variant is fail-closed: no operation that returns one of these has
//! produced a partially verified or partially decrypted result.

use thiserror::Error;

use crate::wire::WireError;

/// Errors that can occur during protocol operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Bad prekey signature, bad bare signature or failed symmetric decryption
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    /// A one-time prekey id was presented a second time
    #[error("One-time prekey {0} previously used")]
    Replay(String),

    /// The referenced prekey id is not known to this user
    #[error("One-time prekey {0} unknown")]
    UnknownKey(String),

    /// Too many skipped messages in one gap
    #[error("Too many skipped messages: gap of {gap} exceeds limit of {limit}")]
    ResourceExhausted { gap: u64, limit: u64 },

    /// Malformed wire encoding
    #[error("Structural error: {0}")]
    Structural(#[from] WireError),

    /// Local registry fingerprint does not match the pinned value
    #[error("Schema mismatch: expected {expected}, got {actual}")]
    SchemaMismatch { expected: String, actual: String },

    /// Failed to parse or decode a key
    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    /// Requested more output than one expansion round provides
    #[error("Key derivation of {0} bytes requested, at most 64 supported")]
    KdfOutputTooLong(usize),

    /// ContentRef whose hash is absent from the content store
    #[error("Content not found for hash {0}")]
    ContentNotFound(String),

    /// Session cannot perform the operation yet
    #[error("Session not ready: {0}")]
    SessionNotReady(String),

    /// Encryption primitive failure
    #[error("Encryption failed: {0}")]
    EncryptionError(String),

    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl From<aes_gcm::Error> for CryptoError {
    fn from(_: aes_gcm::Error) -> Self {
        CryptoError::AuthenticationFailure("Decryption failed".to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for CryptoError {
    fn from(e: ed25519_dalek::SignatureError) -> Self {
        CryptoError::AuthenticationFailure(format!("Signature verification failed: {}", e))
    }
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;
