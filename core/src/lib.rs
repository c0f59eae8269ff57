//! SC4 - Asynchronous end-to-end encrypted messaging core
//!
//! Self-describing binary wire format, X3DH key agreement and a Double
//! Ratchet session layer. Everything is in-memory; callers own persistence
//! and transport.

pub mod config;
pub mod crypto;
pub mod logging;
pub mod wire;

pub use config::ProtocolConfig;
pub use crypto::{CryptoError, CryptoResult, ProtocolContext};
