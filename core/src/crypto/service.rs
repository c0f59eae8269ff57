//! ProtocolContext - High-level protocol API
//!
//! The context is constructed once per deployment (or per test) and passed
//! by reference. It owns the wire registry, the prekey directory, the
//! content store and the configuration, so independent contexts never
//! share state.
//!
//! ## Example
//!
//! ```rust
//! use sc4_ratchet::config::ProtocolConfig;
//! use sc4_ratchet::crypto::ProtocolContext;
//!
//! let ctx = ProtocolContext::new(ProtocolConfig::default())?;
//! let alice = ctx.create_user("alice");
//! let mut bob = ctx.create_user("bob");
//!
//! let bundle = ctx.key_bundle(&bob);
//! let (mut to_bob, packet) = ctx.start_session(&alice, &bundle, Some(&b"Hello Bob"[..]))?;
//! let (mut to_alice, first) = ctx.accept_session(&mut bob, &packet)?;
//! assert_eq!(first.as_deref(), Some(&b"Hello Bob"[..]));
//!
//! let packet = ctx.encrypt(&mut to_bob, b"How are you?")?;
//! assert_eq!(ctx.decrypt(&mut to_alice, &packet)?, b"How are you?");
//! # Ok::<(), sc4_ratchet::crypto::CryptoError>(())
//! ```

use std::sync::Arc;

use crate::config::ProtocolConfig;
use crate::crypto::bundle::{BundleSignature, ContentRef, ContentStore, FileBundle, MemoryContentStore};
use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::crypto::keys::SecretKeyPair;
use crate::crypto::prekeys::{KeyBundle, MemoryPrekeyDirectory, PrekeyDirectory, User};
use crate::crypto::ratchet::RatchetSession;
use crate::wire::{Registry, WireError};

/// Protocol engine context
pub struct ProtocolContext {
    config: ProtocolConfig,
    registry: Registry,
    directory: Arc<dyn PrekeyDirectory>,
    content: Arc<dyn ContentStore>,
}

impl ProtocolContext {
    /// Create a context with in-memory collaborators
    ///
    /// Fails with `SchemaMismatch` if the local registry does not match the
    /// configured fingerprint.
    pub fn new(config: ProtocolConfig) -> CryptoResult<Self> {
        Self::with_collaborators(
            config,
            Arc::new(MemoryPrekeyDirectory::new()),
            Arc::new(MemoryContentStore::new()),
        )
    }

    /// Create a context around external prekey and content collaborators
    pub fn with_collaborators(
        config: ProtocolConfig,
        directory: Arc<dyn PrekeyDirectory>,
        content: Arc<dyn ContentStore>,
    ) -> CryptoResult<Self> {
        Self::with_registry(config, Registry::standard(), directory, content)
    }

    fn with_registry(
        config: ProtocolConfig,
        registry: Registry,
        directory: Arc<dyn PrekeyDirectory>,
        content: Arc<dyn ContentStore>,
    ) -> CryptoResult<Self> {
        registry
            .check_fingerprint(&config.expected_fingerprint)
            .map_err(|e| match e {
                WireError::SchemaMismatch { expected, actual } => {
                    tracing::error!(%expected, %actual, "Schema fingerprint mismatch");
                    CryptoError::SchemaMismatch { expected, actual }
                }
                other => other.into(),
            })?;

        tracing::info!(
            fingerprint = %config.expected_fingerprint,
            records = registry.len(),
            "Protocol context initialized"
        );
        Ok(Self {
            config,
            registry,
            directory,
            content,
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn directory(&self) -> &dyn PrekeyDirectory {
        self.directory.as_ref()
    }

    /// Create a user and publish the configured number of one-time prekeys
    pub fn create_user(&self, name: &str) -> User {
        User::new(name, self.directory.as_ref(), self.config.one_time_prekey_count)
    }

    /// Publish another batch of one-time prekeys for `user`
    pub fn replenish(&self, user: &mut User) {
        user.provision_one_time_prekeys(self.directory.as_ref(), self.config.one_time_prekey_count);
        tracing::info!(
            user = %user.name(),
            available = user.one_time_prekey_count(),
            "Replenished one-time prekeys"
        );
    }

    /// Fetch `user`'s key bundle (consumes one published one-time prekey)
    pub fn key_bundle(&self, user: &User) -> KeyBundle {
        user.key_bundle(self.directory.as_ref())
    }

    /// Start a session towards the owner of `bundle`
    pub fn start_session(
        &self,
        sender: &User,
        bundle: &KeyBundle,
        plaintext: Option<&[u8]>,
    ) -> CryptoResult<(RatchetSession, Vec<u8>)> {
        RatchetSession::bootstrap_send(
            sender,
            bundle,
            plaintext,
            &self.registry,
            self.config.skip_limits(),
        )
    }

    /// Accept a session from a handshake packet
    pub fn accept_session(
        &self,
        recipient: &mut User,
        packet: &[u8],
    ) -> CryptoResult<(RatchetSession, Option<Vec<u8>>)> {
        RatchetSession::bootstrap_receive(recipient, packet, &self.registry, self.config.skip_limits())
    }

    pub fn encrypt(&self, session: &mut RatchetSession, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        session.encrypt(&self.registry, plaintext)
    }

    pub fn decrypt(&self, session: &mut RatchetSession, packet: &[u8]) -> CryptoResult<Vec<u8>> {
        session.decrypt(&self.registry, packet)
    }

    /// Put `content` in the content store and return its reference
    pub fn store_content(&self, content: &[u8]) -> ContentRef {
        ContentRef::create(self.content.as_ref(), content)
    }

    pub fn sign_bundle(&self, key: &SecretKeyPair, bundle: &FileBundle) -> CryptoResult<BundleSignature> {
        bundle.sign(key, self.content.as_ref(), &self.registry)
    }

    pub fn verify_bundle(&self, signature: &BundleSignature) -> CryptoResult<()> {
        signature.verify(self.content.as_ref(), &self.registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::bundle::Content;
    use crate::wire::RecordSchema;
    use std::sync::Mutex;

    fn context() -> ProtocolContext {
        ProtocolContext::new(ProtocolConfig::default()).unwrap()
    }

    #[test]
    fn test_alice_and_bob_conversation() {
        let ctx = context();
        let alice = ctx.create_user("Alice");
        let mut bob = ctx.create_user("Bob");
        assert_eq!(alice.one_time_prekey_count(), 3);
        assert_eq!(bob.one_time_prekey_count(), 3);

        let bundle = ctx.key_bundle(&bob);
        let (mut alice_session, packet) = ctx
            .start_session(&alice, &bundle, Some(&b"Hello Bob"[..]))
            .unwrap();
        let (mut bob_session, first) = ctx.accept_session(&mut bob, &packet).unwrap();
        assert_eq!(first.unwrap(), b"Hello Bob");

        for i in 0..5 {
            let to_bob = format!("Hello Bob {i}");
            let packet = ctx.encrypt(&mut alice_session, to_bob.as_bytes()).unwrap();
            assert_eq!(ctx.decrypt(&mut bob_session, &packet).unwrap(), to_bob.as_bytes());

            let to_alice = format!("Hello Alice {i}");
            let packet = ctx.encrypt(&mut bob_session, to_alice.as_bytes()).unwrap();
            assert_eq!(ctx.decrypt(&mut alice_session, &packet).unwrap(), to_alice.as_bytes());
        }
    }

    #[test]
    fn test_handshake_packet_single_use() {
        let ctx = context();
        let alice = ctx.create_user("Alice");
        let mut bob = ctx.create_user("Bob");
        let mut charlie = ctx.create_user("Charlie");

        let bundle = ctx.key_bundle(&bob);
        let (_, packet) = ctx.start_session(&alice, &bundle, Some(&b"Hello Bob"[..])).unwrap();
        assert!(ctx.accept_session(&mut bob, &packet).is_ok());

        // Forward secrecy: the one-time prekey is gone
        assert!(matches!(
            ctx.accept_session(&mut bob, &packet),
            Err(CryptoError::Replay(_))
        ));
        // Wrong recipient
        assert!(matches!(
            ctx.accept_session(&mut charlie, &packet),
            Err(CryptoError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_tampered_handshake_keeps_one_time_prekey() {
        let ctx = context();
        let alice = ctx.create_user("Alice");
        let mut bob = ctx.create_user("Bob");

        let bundle = ctx.key_bundle(&bob);
        let (mut alice_session, packet) = ctx
            .start_session(&alice, &bundle, Some(&b"Hello Bob"[..]))
            .unwrap();

        let mut tampered = packet.clone();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(matches!(
            ctx.accept_session(&mut bob, &tampered),
            Err(CryptoError::AuthenticationFailure(_))
        ));
        assert_eq!(bob.one_time_prekey_count(), 3);

        let (mut bob_session, first) = ctx.accept_session(&mut bob, &packet).unwrap();
        assert_eq!(first.unwrap(), b"Hello Bob");
        assert_eq!(bob.one_time_prekey_count(), 2);

        let packet = ctx.encrypt(&mut alice_session, b"still here").unwrap();
        assert_eq!(ctx.decrypt(&mut bob_session, &packet).unwrap(), b"still here");
    }

    #[test]
    fn test_exhausted_prekeys_and_replenish() {
        let ctx = context();
        let alice = ctx.create_user("Alice");
        let mut bob = ctx.create_user("Bob");

        for _ in 0..3 {
            assert!(ctx.key_bundle(&bob).one_time_prekey.is_some());
        }
        let bundle = ctx.key_bundle(&bob);
        assert!(bundle.one_time_prekey.is_none());

        // Still works, with degraded forward secrecy
        let (_, packet) = ctx.start_session(&alice, &bundle, Some(&b"hi"[..])).unwrap();
        let (_, first) = ctx.accept_session(&mut bob, &packet).unwrap();
        assert_eq!(first.unwrap(), b"hi");

        ctx.replenish(&mut bob);
        assert!(ctx.key_bundle(&bob).one_time_prekey.is_some());
    }

    #[test]
    fn test_fingerprint_mismatch_fails_fast() {
        let config = ProtocolConfig {
            expected_fingerprint: "NotTheRightFingerprint".to_string(),
            ..ProtocolConfig::default()
        };
        assert!(matches!(
            ProtocolContext::new(config),
            Err(CryptoError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_drifted_registry_rejected() {
        let mut registry = Registry::standard();
        registry
            .register_schema(RecordSchema {
                name: "extension",
                fields: &["payload"],
            })
            .unwrap();
        let result = ProtocolContext::with_registry(
            ProtocolConfig::default(),
            registry,
            Arc::new(MemoryPrekeyDirectory::new()),
            Arc::new(MemoryContentStore::new()),
        );
        assert!(matches!(result, Err(CryptoError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_contexts_are_isolated() {
        let first = context();
        let second = context();
        let bob = first.create_user("Bob");

        assert!(second.key_bundle(&bob).one_time_prekey.is_none());
        assert!(first.key_bundle(&bob).one_time_prekey.is_some());
    }

    #[test]
    fn test_session_behind_mutex() {
        let ctx = Arc::new(context());
        let alice = ctx.create_user("Alice");
        let mut bob = ctx.create_user("Bob");

        let (alice_session, packet) = ctx
            .start_session(&alice, &ctx.key_bundle(&bob), None)
            .unwrap();
        let (mut bob_session, _) = ctx.accept_session(&mut bob, &packet).unwrap();
        let alice_session = Arc::new(Mutex::new(alice_session));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let ctx = Arc::clone(&ctx);
                let session = Arc::clone(&alice_session);
                std::thread::spawn(move || {
                    let mut session = session.lock().unwrap();
                    let text = format!("message {i}");
                    (text.clone(), ctx.encrypt(&mut session, text.as_bytes()).unwrap())
                })
            })
            .collect();

        for handle in handles {
            let (text, packet) = handle.join().unwrap();
            assert_eq!(ctx.decrypt(&mut bob_session, &packet).unwrap(), text.as_bytes());
        }
        assert_eq!(alice_session.lock().unwrap().messages_sent(), 8);
    }

    #[test]
    fn test_bundle_signing_through_context() {
        let ctx = context();
        let alice = ctx.create_user("Alice");

        let bundle = FileBundle {
            filename: "report.csv".to_string(),
            mimetype: "text/csv".to_string(),
            content: Content::Ref(ctx.store_content(b"a,b,c\n1,2,3\n")),
        };
        let signature = ctx.sign_bundle(alice.identity(), &bundle).unwrap();
        assert!(ctx.verify_bundle(&signature).is_ok());

        // A different context has no copy of the referenced content
        assert!(matches!(
            context().verify_bundle(&signature),
            Err(CryptoError::ContentNotFound(_))
        ));
    }
}
