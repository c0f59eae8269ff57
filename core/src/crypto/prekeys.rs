//! Users, prekeys and key bundles
//!
//! This module manages a user's long-term key material:
//!
//! - **Identity key**: long-term, signs the signed prekey
//! - **Signed prekey**: medium-term, published with the identity signature
//! - **One-time prekeys**: single-use, published through a
//!   [`PrekeyDirectory`] and consumed by exactly one handshake

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::crypto::keys::{random_key_pair, PublicKeyBundle, SecretKeyPair, Signature, KEY_LEN};
use crate::wire::{field_array, Value, WireRecord, WireResult};

/// Distribution point for one-time prekeys
///
/// `fetch_one` must remove what it returns, atomically with respect to
/// concurrent callers, so that a published key is handed out at most once.
pub trait PrekeyDirectory: Send + Sync {
    /// Publish the public half of a one-time prekey for `user_name`
    fn publish(&self, user_name: &str, one_time_prekey: PublicKeyBundle);

    /// Remove and return one published one-time prekey, if any remain
    fn fetch_one(&self, user_name: &str) -> Option<PublicKeyBundle>;
}

/// In-process prekey directory guarded by a mutex
#[derive(Debug, Default)]
pub struct MemoryPrekeyDirectory {
    published: Mutex<HashMap<String, Vec<PublicKeyBundle>>>,
}

impl MemoryPrekeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of one-time prekeys still published for `user_name`
    pub fn available(&self, user_name: &str) -> usize {
        let published = self.published.lock().unwrap_or_else(PoisonError::into_inner);
        published.get(user_name).map_or(0, Vec::len)
    }
}

impl PrekeyDirectory for MemoryPrekeyDirectory {
    fn publish(&self, user_name: &str, one_time_prekey: PublicKeyBundle) {
        let mut published = self.published.lock().unwrap_or_else(PoisonError::into_inner);
        published
            .entry(user_name.to_string())
            .or_default()
            .push(one_time_prekey);
    }

    fn fetch_one(&self, user_name: &str) -> Option<PublicKeyBundle> {
        let mut published = self.published.lock().unwrap_or_else(PoisonError::into_inner);
        published.get_mut(user_name)?.pop()
    }
}

/// Bundle published to peers who want to start a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBundle {
    /// The responder's identity public keys
    pub identity_key: PublicKeyBundle,
    /// Identity signature over the signed prekey's encryption key
    pub signed_prekey: Signature,
    /// Optional one-time prekey (consumed after use)
    pub one_time_prekey: Option<PublicKeyBundle>,
}

impl KeyBundle {
    /// Verify that the signed prekey carries a valid signature from the
    /// bundle's identity key
    pub fn verify(&self) -> CryptoResult<()> {
        if self.signed_prekey.signer != self.identity_key.signing_key {
            return Err(CryptoError::AuthenticationFailure(
                "Prekey not signed by bundle identity".to_string(),
            ));
        }
        self.signed_prekey.verify().map_err(|_| {
            CryptoError::AuthenticationFailure("Invalid prekey signature".to_string())
        })
    }

    /// The signed prekey's X25519 public key
    pub fn prekey_public(&self) -> CryptoResult<[u8; KEY_LEN]> {
        self.signed_prekey
            .payload
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("Signed prekey must be 32 bytes".to_string()))
    }
}

impl WireRecord for KeyBundle {
    const NAME: &'static str = "key_bundle";
    const FIELDS: &'static [&'static str] = &["identity_key", "signed_prekey", "one_time_prekey"];

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::record(&self.identity_key),
            Value::record(&self.signed_prekey),
            self.one_time_prekey
                .as_ref()
                .map_or_else(Value::none, Value::record),
        ]
    }

    fn from_fields(fields: Vec<Value>) -> WireResult<Self> {
        let [identity_key, signed_prekey, one_time_prekey] = field_array(Self::NAME, fields)?;
        Ok(Self {
            identity_key: identity_key.into_record()?,
            signed_prekey: signed_prekey.into_record()?,
            one_time_prekey: one_time_prekey.into_optional(Value::into_record)?,
        })
    }
}

/// A protocol participant and their private key material
pub struct User {
    name: String,
    identity: SecretKeyPair,
    signed_prekey: SecretKeyPair,
    prekey_signature: Signature,
    /// Unused one-time prekeys by id
    one_time_prekeys: HashMap<String, SecretKeyPair>,
    /// Ids already consumed as a receiver; never returned to the pool
    consumed_prekeys: HashSet<String>,
}

impl User {
    /// Create a user with fresh keys and `one_time_prekey_count` published
    /// one-time prekeys
    pub fn new(name: &str, directory: &dyn PrekeyDirectory, one_time_prekey_count: usize) -> Self {
        let identity = random_key_pair();
        let signed_prekey = random_key_pair();
        let prekey_signature = identity.sign(&signed_prekey.public().encryption_key);

        let mut user = Self {
            name: name.to_string(),
            identity,
            signed_prekey,
            prekey_signature,
            one_time_prekeys: HashMap::new(),
            consumed_prekeys: HashSet::new(),
        };
        user.provision_one_time_prekeys(directory, one_time_prekey_count);

        tracing::debug!(
            user = %user.name,
            identity = %user.identity.id(),
            "Created user"
        );
        user
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &SecretKeyPair {
        &self.identity
    }

    pub fn signed_prekey(&self) -> &SecretKeyPair {
        &self.signed_prekey
    }

    pub fn prekey_signature(&self) -> &Signature {
        &self.prekey_signature
    }

    /// Generate `count` one-time prekeys, keep the secrets locally and
    /// publish the public halves
    pub fn provision_one_time_prekeys(&mut self, directory: &dyn PrekeyDirectory, count: usize) {
        for _ in 0..count {
            let key = random_key_pair();
            directory.publish(&self.name, *key.public());
            self.one_time_prekeys.insert(key.id(), key);
        }
    }

    /// Build a key bundle, taking one published one-time prekey if available
    pub fn key_bundle(&self, directory: &dyn PrekeyDirectory) -> KeyBundle {
        KeyBundle {
            identity_key: *self.identity.public(),
            signed_prekey: self.prekey_signature.clone(),
            one_time_prekey: directory.fetch_one(&self.name),
        }
    }

    /// Number of unused one-time prekeys held locally
    pub fn one_time_prekey_count(&self) -> usize {
        self.one_time_prekeys.len()
    }

    pub fn has_consumed(&self, prekey_id: &str) -> bool {
        self.consumed_prekeys.contains(prekey_id)
    }

    /// Look up an unused one-time prekey without consuming it
    pub(crate) fn one_time_prekey(&self, prekey_id: &str) -> CryptoResult<&SecretKeyPair> {
        if self.consumed_prekeys.contains(prekey_id) {
            return Err(CryptoError::Replay(prekey_id.to_string()));
        }
        self.one_time_prekeys
            .get(prekey_id)
            .ok_or_else(|| CryptoError::UnknownKey(prekey_id.to_string()))
    }

    /// Move a one-time prekey from the pool to the consumed set
    pub(crate) fn take_one_time_prekey(&mut self, prekey_id: &str) -> CryptoResult<SecretKeyPair> {
        self.one_time_prekey(prekey_id)?;
        let key = self
            .one_time_prekeys
            .remove(prekey_id)
            .ok_or_else(|| CryptoError::UnknownKey(prekey_id.to_string()))?;
        self.consumed_prekeys.insert(prekey_id.to_string());
        Ok(key)
    }
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("name", &self.name)
            .field("identity", &self.identity.id())
            .field("one_time_prekeys", &self.one_time_prekeys.len())
            .field("consumed_prekeys", &self.consumed_prekeys.len())
            .finish()
    }
}
