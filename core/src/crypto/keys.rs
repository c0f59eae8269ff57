//! Key types and generation
//!
//! Every key pair in the protocol carries two halves generated together
//! from a single seed:
//! - an Ed25519 signing pair, used for prekey and bundle signatures
//! - an X25519 encryption pair, used for every Diffie-Hellman computation
//!
//! Identity keys, signed prekeys, one-time prekeys, X3DH ephemerals and
//! ratchet keys are all [`SecretKeyPair`]s.

use std::fmt;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::crypto::kdf::hash;
use crate::wire::{field_array, Value, WireRecord, WireResult};

/// Length of a random seed and of every public/secret key
pub const KEY_LEN: usize = 32;

/// Number of base58 characters in a key id
pub const KEY_ID_LEN: usize = 16;

/// Key id: the first 16 base58 characters of the hash of an encryption key
pub fn key_id(encryption_key: &[u8]) -> String {
    bs58::encode(hash(encryption_key))
        .into_string()
        .chars()
        .take(KEY_ID_LEN)
        .collect()
}

/// Public halves of a [`SecretKeyPair`] (safe to share)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKeyBundle {
    /// Ed25519 verifying key
    pub signing_key: [u8; KEY_LEN],
    /// X25519 public key
    pub encryption_key: [u8; KEY_LEN],
}

impl PublicKeyBundle {
    pub fn id(&self) -> String {
        key_id(&self.encryption_key)
    }

    /// Get the Ed25519 verifying key
    pub fn verifying_key(&self) -> CryptoResult<VerifyingKey> {
        VerifyingKey::from_bytes(&self.signing_key)
            .map_err(|e| CryptoError::InvalidKey(format!("Invalid signing key: {}", e)))
    }
}

impl fmt::Debug for PublicKeyBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKeyBundle")
            .field("id", &self.id())
            .field("signing_key", &hex::encode(self.signing_key))
            .finish()
    }
}

impl WireRecord for PublicKeyBundle {
    const NAME: &'static str = "public_key_bundle";
    const FIELDS: &'static [&'static str] = &["signing_key", "encryption_key"];

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::from(&self.signing_key[..]),
            Value::from(&self.encryption_key[..]),
        ]
    }

    fn from_fields(fields: Vec<Value>) -> WireResult<Self> {
        let [signing_key, encryption_key] = field_array(Self::NAME, fields)?;
        Ok(Self {
            signing_key: signing_key.into_array()?,
            encryption_key: encryption_key.into_array()?,
        })
    }
}

/// A signing pair and an encryption pair derived from one seed
///
/// Secret bytes are wiped when the key pair is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKeyPair {
    signing_seed: [u8; KEY_LEN],
    dh_secret: [u8; KEY_LEN],
    #[zeroize(skip)]
    public: PublicKeyBundle,
}

impl SecretKeyPair {
    pub fn public(&self) -> &PublicKeyBundle {
        &self.public
    }

    pub fn id(&self) -> String {
        self.public.id()
    }

    /// Sign `payload` with the Ed25519 half
    pub fn sign(&self, payload: &[u8]) -> Signature {
        let signing_key = SigningKey::from_bytes(&self.signing_seed);
        Signature {
            signer: self.public.signing_key,
            payload: payload.to_vec(),
            signature: signing_key.sign(payload).to_bytes(),
        }
    }

    /// X25519 Diffie-Hellman against a raw public key
    pub fn diffie_hellman(&self, their_public: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
        let secret = StaticSecret::from(self.dh_secret);
        secret
            .diffie_hellman(&X25519PublicKey::from(*their_public))
            .to_bytes()
    }
}

impl fmt::Debug for SecretKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKeyPair")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

/// DH(secret, public): commutative, `dh(a, b.public) == dh(b, a.public)`
pub fn dh(secret: &SecretKeyPair, their_public: &PublicKeyBundle) -> [u8; KEY_LEN] {
    secret.diffie_hellman(&their_public.encryption_key)
}

/// Deterministically derive a key pair from a seed
///
/// `s = hash(seed)[..32]` seeds the Ed25519 key; `hash(s)[..32]`, clamped,
/// is the X25519 secret.
pub fn derive_key_pair(seed: &[u8]) -> SecretKeyPair {
    let mut signing_seed = [0u8; KEY_LEN];
    signing_seed.copy_from_slice(&hash(seed)[..KEY_LEN]);

    let mut dh_secret = [0u8; KEY_LEN];
    dh_secret.copy_from_slice(&hash(&signing_seed)[..KEY_LEN]);
    dh_secret[0] &= 248;
    dh_secret[31] &= 127;
    dh_secret[31] |= 64;

    let signing_key = SigningKey::from_bytes(&signing_seed).verifying_key().to_bytes();
    let encryption_key = X25519PublicKey::from(&StaticSecret::from(dh_secret)).to_bytes();

    SecretKeyPair {
        signing_seed,
        dh_secret,
        public: PublicKeyBundle {
            signing_key,
            encryption_key,
        },
    }
}

/// Generate a key pair from 32 fresh random bytes
pub fn random_key_pair() -> SecretKeyPair {
    let mut seed = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut seed);
    let key_pair = derive_key_pair(&seed);
    seed.zeroize();
    key_pair
}

/// A bare signature: signer, signed payload and signature bytes
#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    /// Ed25519 verifying key of the signer
    pub signer: [u8; KEY_LEN],
    /// The signed bytes
    pub payload: Vec<u8>,
    /// Ed25519 signature
    pub signature: [u8; 64],
}

impl Signature {
    /// Verify the signature over the payload against the signer key
    pub fn verify(&self) -> CryptoResult<()> {
        let verifying_key = VerifyingKey::from_bytes(&self.signer)?;
        let signature = ed25519_dalek::Signature::from_bytes(&self.signature);
        verifying_key.verify(&self.payload, &signature)?;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.verify().is_ok()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("signer", &hex::encode(self.signer))
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

impl WireRecord for Signature {
    const NAME: &'static str = "signature";
    const FIELDS: &'static [&'static str] = &["signer", "payload", "signature"];

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::from(&self.signer[..]),
            Value::from(self.payload.clone()),
            Value::from(&self.signature[..]),
        ]
    }

    fn from_fields(fields: Vec<Value>) -> WireResult<Self> {
        let [signer, payload, signature] = field_array(Self::NAME, fields)?;
        Ok(Self {
            signer: signer.into_array()?,
            payload: payload.into_bytes()?,
            signature: signature.into_array()?,
        })
    }
}
