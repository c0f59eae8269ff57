//! Double Ratchet Protocol Implementation
//!
//! A [`RatchetSession`] is bootstrapped once from an X3DH handshake and then
//! advanced in place by every `encrypt`/`decrypt` call.
//!
//! ## Protocol Overview
//!
//! The Double Ratchet combines three ratchets:
//! 1. **DH Ratchet**: a fresh local ratchet key each time the peer's ratchet
//!    key changes, feeding the root key
//! 2. **Sending Chain**: KDF chain for deriving message keys when sending
//! 3. **Receiving Chain**: KDF chain for deriving message keys when receiving
//!
//! Message keys derived out of turn are kept in a bounded skipped-key cache
//! so that reordered messages still decrypt.
//!
//! A session is not internally synchronised; callers sharing one across
//! threads must hold a mutex around each call.

use std::collections::HashMap;
use std::fmt;

use zeroize::Zeroize;

use crate::crypto::cipher::{open, seal, ZERO_NONCE};
use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::crypto::kdf::{kdf_ck, kdf_rk};
use crate::crypto::keys::{dh, random_key_pair, PublicKeyBundle, SecretKeyPair, KEY_LEN};
use crate::crypto::prekeys::{KeyBundle, User};
use crate::crypto::x3dh::{consume_one_time_prekey, x3dh_derive, x3dh_send, SharedSecret, X3dhHeader};
use crate::wire::{field_array, Registry, Value, WireRecord, WireResult};

type ChainKey = [u8; KEY_LEN];
type MessageKey = [u8; KEY_LEN];

/// Tolerance for skipped messages in one receiving-chain gap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipLimits {
    /// Gaps larger than this fail with `ResourceExhausted`
    pub max_skipped_messages: u64,
    /// Gaps larger than this are logged as a warning
    pub warning_threshold: u64,
}

impl Default for SkipLimits {
    fn default() -> Self {
        Self {
            max_skipped_messages: 10,
            warning_threshold: 8,
        }
    }
}

/// Header sent in front of every ratchet ciphertext
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatchetHeader {
    /// Sender's current ratchet public key
    pub ratchet_key: PublicKeyBundle,
    /// Length of the sender's previous sending chain
    pub previous_chain_length: u64,
    /// Index of this message in the current sending chain
    pub message_number: u64,
}

impl WireRecord for RatchetHeader {
    const NAME: &'static str = "ratchet_header";
    const FIELDS: &'static [&'static str] = &["ratchet_key", "previous_chain_length", "message_number"];

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::record(&self.ratchet_key),
            Value::Int(self.previous_chain_length),
            Value::Int(self.message_number),
        ]
    }

    fn from_fields(fields: Vec<Value>) -> WireResult<Self> {
        let [ratchet_key, previous_chain_length, message_number] = field_array(Self::NAME, fields)?;
        Ok(Self {
            ratchet_key: ratchet_key.into_record()?,
            previous_chain_length: previous_chain_length.into_int()?,
            message_number: message_number.into_int()?,
        })
    }
}

/// A Double Ratchet session with one peer
///
/// Secret state is wiped when the session is dropped.
#[derive(Clone)]
pub struct RatchetSession {
    /// Name of the local user
    owner: String,
    /// Local ratchet key pair
    dhs: SecretKeyPair,
    /// Remote ratchet public key (unset until the first DH ratchet step)
    dhr: Option<PublicKeyBundle>,
    /// Root key
    rk: [u8; KEY_LEN],
    /// Sending chain key
    cks: Option<ChainKey>,
    /// Receiving chain key
    ckr: Option<ChainKey>,
    /// Messages sent in the current sending chain
    ns: u64,
    /// Messages received in the current receiving chain
    nr: u64,
    /// Length of the previous sending chain
    pn: u64,
    /// Message keys derived ahead of their message, by (ratchet key id, index)
    skipped: HashMap<(String, u64), MessageKey>,
    limits: SkipLimits,
}

impl RatchetSession {
    /// Sender-side state from an X3DH secret and the recipient's identity
    pub fn new_sender(
        owner: &str,
        secret: &SharedSecret,
        remote_identity: PublicKeyBundle,
        limits: SkipLimits,
    ) -> Self {
        let dhs = random_key_pair();
        let (rk, cks) = kdf_rk(secret, &dh(&dhs, &remote_identity));
        Self {
            owner: owner.to_string(),
            dhs,
            dhr: Some(remote_identity),
            rk,
            cks: Some(cks),
            ckr: None,
            ns: 0,
            nr: 0,
            pn: 0,
            skipped: HashMap::new(),
            limits,
        }
    }

    /// Receiver-side state from an X3DH secret
    ///
    /// The local identity key stands in as the ratchet key until the first
    /// DH ratchet step replaces it; the sender derived its first sending
    /// chain against that identity key.
    pub fn new_receiver(
        owner: &str,
        secret: &SharedSecret,
        local_identity: SecretKeyPair,
        limits: SkipLimits,
    ) -> Self {
        Self {
            owner: owner.to_string(),
            dhs: local_identity,
            dhr: None,
            rk: *secret,
            cks: None,
            ckr: None,
            ns: 0,
            nr: 0,
            pn: 0,
            skipped: HashMap::new(),
            limits,
        }
    }

    /// Start a conversation: X3DH against `bundle`, then initialise the
    /// sending side
    ///
    /// Returns the session and the handshake packet
    /// `serialize(X3dhHeader) || ciphertext`, where the optional initial
    /// message is encrypted directly under the X3DH secret.
    pub fn bootstrap_send(
        sender: &User,
        bundle: &KeyBundle,
        plaintext: Option<&[u8]>,
        registry: &Registry,
        limits: SkipLimits,
    ) -> CryptoResult<(Self, Vec<u8>)> {
        let (mut secret, header) = x3dh_send(sender, bundle)?;
        let session = Self::new_sender(sender.name(), &secret, bundle.identity_key, limits);

        let mut packet = registry.serialize(&header)?;
        if let Some(plaintext) = plaintext {
            packet.extend_from_slice(&seal(&secret, &ZERO_NONCE, plaintext)?);
        }
        secret.zeroize();

        tracing::debug!(
            owner = %session.owner,
            ratchet_key = %session.dhs.id(),
            "Ratchet session bootstrapped (sender)"
        );
        Ok((session, packet))
    }

    /// Accept a conversation from a handshake packet
    ///
    /// Returns the session and the initial message, if the packet carried
    /// one.
    pub fn bootstrap_receive(
        recipient: &mut User,
        packet: &[u8],
        registry: &Registry,
        limits: SkipLimits,
    ) -> CryptoResult<(Self, Option<Vec<u8>>)> {
        let (header, ciphertext) = registry.deserialize::<X3dhHeader>(packet)?;
        let mut secret = x3dh_derive(recipient, &header)?;

        // The one-time prekey is only consumed once the packet authenticates
        let plaintext = if ciphertext.is_empty() {
            None
        } else {
            match open(&secret, &ZERO_NONCE, ciphertext) {
                Ok(plaintext) => Some(plaintext),
                Err(e) => {
                    secret.zeroize();
                    return Err(e);
                }
            }
        };
        consume_one_time_prekey(recipient, &header)?;
        let session = Self::new_receiver(
            recipient.name(),
            &secret,
            recipient.identity().clone(),
            limits,
        );
        secret.zeroize();

        tracing::debug!(
            owner = %session.owner,
            peer = %header.identity_key.id(),
            "Ratchet session bootstrapped (receiver)"
        );
        Ok((session, plaintext))
    }

    /// Encrypt one message with the next sending-chain key
    pub fn encrypt_message(&mut self, plaintext: &[u8]) -> CryptoResult<(RatchetHeader, Vec<u8>)> {
        let cks = self.cks.ok_or_else(|| {
            CryptoError::SessionNotReady("no sending chain until a message is received".to_string())
        })?;
        let (next_cks, mut mk) = kdf_ck(&cks);
        let ciphertext = seal(&mk, &ZERO_NONCE, plaintext);
        mk.zeroize();
        let ciphertext = ciphertext?;

        let header = RatchetHeader {
            ratchet_key: *self.dhs.public(),
            previous_chain_length: self.pn,
            message_number: self.ns,
        };
        self.cks = Some(next_cks);
        self.ns += 1;
        Ok((header, ciphertext))
    }

    /// Decrypt one message
    ///
    /// State changes (cached keys, DH ratchet step, counters) are committed
    /// only if the ciphertext authenticates.
    pub fn decrypt_message(&mut self, header: &RatchetHeader, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        let skipped_id = (header.ratchet_key.id(), header.message_number);
        if let Some(mk) = self.skipped.get(&skipped_id) {
            let plaintext = open(mk, &ZERO_NONCE, ciphertext)?;
            if let Some(mut mk) = self.skipped.remove(&skipped_id) {
                mk.zeroize();
            }
            return Ok(plaintext);
        }

        let mut staged = self.clone();
        let plaintext = staged.ratchet_decrypt(header, ciphertext)?;
        *self = staged;
        Ok(plaintext)
    }

    fn ratchet_decrypt(&mut self, header: &RatchetHeader, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        let same_chain = self
            .dhr
            .is_some_and(|dhr| dhr.encryption_key == header.ratchet_key.encryption_key);
        if !same_chain {
            self.skip_message_keys(header.previous_chain_length)?;
            self.dh_ratchet(header.ratchet_key);
        }
        self.skip_message_keys(header.message_number)?;

        let ckr = self
            .ckr
            .ok_or_else(|| CryptoError::SessionNotReady("no receiving chain".to_string()))?;
        let (next_ckr, mut mk) = kdf_ck(&ckr);
        self.ckr = Some(next_ckr);
        self.nr += 1;

        let plaintext = open(&mk, &ZERO_NONCE, ciphertext);
        mk.zeroize();
        plaintext
    }

    /// Cache receiving-chain keys for indices `nr..until`
    fn skip_message_keys(&mut self, until: u64) -> CryptoResult<()> {
        let gap = until.saturating_sub(self.nr);
        if gap > self.limits.max_skipped_messages {
            return Err(CryptoError::ResourceExhausted {
                gap,
                limit: self.limits.max_skipped_messages,
            });
        }
        if gap > self.limits.warning_threshold {
            tracing::warn!(owner = %self.owner, gap, "Large gap of skipped messages");
        }

        if let (Some(mut ckr), Some(dhr)) = (self.ckr, self.dhr) {
            let dhr_id = dhr.id();
            while self.nr < until {
                let (next_ckr, mk) = kdf_ck(&ckr);
                ckr = next_ckr;
                self.skipped.insert((dhr_id.clone(), self.nr), mk);
                self.nr += 1;
            }
            self.ckr = Some(ckr);
        }
        Ok(())
    }

    /// Adopt a new remote ratchet key and derive fresh receiving and
    /// sending chains
    fn dh_ratchet(&mut self, remote: PublicKeyBundle) {
        self.pn = self.ns;
        self.ns = 0;
        self.nr = 0;
        self.dhr = Some(remote);

        let (rk, ckr) = kdf_rk(&self.rk, &dh(&self.dhs, &remote));
        self.rk = rk;
        self.ckr = Some(ckr);

        self.dhs = random_key_pair();
        let (rk, cks) = kdf_rk(&self.rk, &dh(&self.dhs, &remote));
        self.rk = rk;
        self.cks = Some(cks);

        tracing::debug!(
            owner = %self.owner,
            remote = %remote.id(),
            local = %self.dhs.id(),
            "DH ratchet step"
        );
    }

    /// Encrypt to a ratchet packet: `serialize(RatchetHeader) || ciphertext`
    pub fn encrypt(&mut self, registry: &Registry, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let (header, ciphertext) = self.encrypt_message(plaintext)?;
        let mut packet = registry.serialize(&header)?;
        packet.extend_from_slice(&ciphertext);
        Ok(packet)
    }

    /// Decrypt a ratchet packet produced by [`encrypt`](Self::encrypt)
    pub fn decrypt(&mut self, registry: &Registry, packet: &[u8]) -> CryptoResult<Vec<u8>> {
        let (header, ciphertext) = registry.deserialize::<RatchetHeader>(packet)?;
        self.decrypt_message(&header, ciphertext)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Current local ratchet public key
    pub fn ratchet_key(&self) -> &PublicKeyBundle {
        self.dhs.public()
    }

    pub fn remote_ratchet_key(&self) -> Option<&PublicKeyBundle> {
        self.dhr.as_ref()
    }

    pub fn messages_sent(&self) -> u64 {
        self.ns
    }

    pub fn messages_received(&self) -> u64 {
        self.nr
    }

    pub fn previous_chain_length(&self) -> u64 {
        self.pn
    }

    /// Number of cached skipped-message keys
    pub fn skipped_key_count(&self) -> usize {
        self.skipped.len()
    }
}

impl Drop for RatchetSession {
    fn drop(&mut self) {
        self.rk.zeroize();
        self.cks.zeroize();
        self.ckr.zeroize();
        self.skipped.values_mut().for_each(Zeroize::zeroize);
    }
}

impl fmt::Debug for RatchetSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RatchetSession")
            .field("owner", &self.owner)
            .field("ratchet_key", &self.dhs.id())
            .field("remote_ratchet_key", &self.dhr.map(|k| k.id()))
            .field("ns", &self.ns)
            .field("nr", &self.nr)
            .field("pn", &self.pn)
            .field("skipped", &self.skipped.len())
            .finish_non_exhaustive()
    }
}
