//! Protocol cryptography module
//!
//! X3DH key agreement followed by a Double Ratchet session, plus signed
//! file bundles.
//!
//! ## Components
//!
//! - **kdf**: HMAC-SHA512 based key derivation (root and chain steps)
//! - **cipher**: AES-256-GCM seal/open under a fixed nonce
//! - **keys**: Key pair derivation, key identifiers and signatures
//! - **prekeys**: Users, key bundles and the prekey directory
//! - **x3dh**: Extended Triple Diffie-Hellman for asynchronous key agreement
//! - **ratchet**: Double Ratchet for per-message forward secrecy
//! - **bundle**: Content references and signed file bundles
//! - **service**: High-level ProtocolContext facade
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc4_ratchet::crypto::{CryptoResult, ProtocolContext};
//!
//! let ctx = ProtocolContext::new(config)?;
//!
//! // Establish a session with a peer
//! let bundle = ctx.key_bundle(&bob);
//! let (mut session, packet) = ctx.start_session(&alice, &bundle, None)?;
//!
//! // Encrypt a message
//! let packet = ctx.encrypt(&mut session, plaintext)?;
//! ```

pub mod bundle;
pub mod cipher;
pub mod errors;
pub mod kdf;
pub mod keys;
pub mod prekeys;
pub mod ratchet;
pub mod service;
pub mod x3dh;

// Re-export commonly used types
pub use bundle::{BundleSignature, Content, ContentRef, ContentStore, FileBundle, MemoryContentStore};
pub use errors::{CryptoError, CryptoResult};
pub use keys::{derive_key_pair, random_key_pair, PublicKeyBundle, SecretKeyPair, Signature};
pub use prekeys::{KeyBundle, MemoryPrekeyDirectory, PrekeyDirectory, User};
pub use ratchet::{RatchetHeader, RatchetSession, SkipLimits};
pub use service::ProtocolContext;
pub use x3dh::{consume_one_time_prekey, x3dh_derive, x3dh_receive, x3dh_send, X3dhHeader};
