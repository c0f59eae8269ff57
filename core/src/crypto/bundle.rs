//! Signed file bundles and content references
//!
//! A [`FileBundle`] names a payload that is either carried inline or held
//! in a content-addressed store and referenced by a [`ContentRef`]. A
//! [`BundleSignature`] covers the bundle metadata plus two hashes of the
//! payload, so large payloads can be signed and verified by reference.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::errors::{CryptoError, CryptoResult};
use crate::crypto::kdf::{hash, HASH_LEN};
use crate::crypto::keys::{SecretKeyPair, Signature, KEY_LEN};
use crate::wire::{field_array, Registry, Value, WireError, WireRecord, WireResult};

/// Current bundle-signature and content-ref format version
pub const FORMAT_VERSION: u64 = 0;

/// Length of the random nonce mixed into each bundle signature
pub const SIGNATURE_NONCE_LEN: usize = 16;

/// Content-addressed byte store keyed by content hash
pub trait ContentStore: Send + Sync {
    fn put(&self, hash: [u8; HASH_LEN], content: Vec<u8>);

    fn get(&self, hash: &[u8; HASH_LEN]) -> Option<Vec<u8>>;
}

/// In-process content store
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    entries: Mutex<HashMap<[u8; HASH_LEN], Vec<u8>>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContentStore for MemoryContentStore {
    fn put(&self, hash: [u8; HASH_LEN], content: Vec<u8>) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(hash, content);
    }

    fn get(&self, hash: &[u8; HASH_LEN]) -> Option<Vec<u8>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(hash).cloned()
    }
}

/// Stand-in for a byte blob held in a [`ContentStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRef {
    pub version: u64,
    /// Declared length of the referenced content
    pub length: u64,
    /// Hash of the referenced content (the store key)
    pub hash: [u8; HASH_LEN],
}

impl ContentRef {
    /// Store `content` and return a reference to it
    pub fn create(store: &dyn ContentStore, content: &[u8]) -> Self {
        let digest = hash(content);
        store.put(digest, content.to_vec());
        Self {
            version: FORMAT_VERSION,
            length: content.len() as u64,
            hash: digest,
        }
    }

    /// Fetch the referenced content; an absent hash is an error
    pub fn resolve(&self, store: &dyn ContentStore) -> CryptoResult<Vec<u8>> {
        store
            .get(&self.hash)
            .ok_or_else(|| CryptoError::ContentNotFound(bs58::encode(self.hash).into_string()))
    }
}

impl WireRecord for ContentRef {
    const NAME: &'static str = "content_ref";
    const FIELDS: &'static [&'static str] = &["version", "length", "hash"];

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::Int(self.version),
            Value::Int(self.length),
            Value::from(&self.hash[..]),
        ]
    }

    fn from_fields(fields: Vec<Value>) -> WireResult<Self> {
        let [version, length, hash] = field_array(Self::NAME, fields)?;
        Ok(Self {
            version: version.into_int()?,
            length: length.into_int()?,
            hash: hash.into_array()?,
        })
    }
}

/// Bundle payload: inline bytes or a reference into a content store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Inline(Vec<u8>),
    Ref(ContentRef),
}

impl Content {
    pub fn resolve(&self, store: &dyn ContentStore) -> CryptoResult<Vec<u8>> {
        match self {
            Content::Inline(bytes) => Ok(bytes.clone()),
            Content::Ref(content_ref) => content_ref.resolve(store),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Content::Inline(bytes) => Value::from(bytes.clone()),
            Content::Ref(content_ref) => Value::record(content_ref),
        }
    }

    fn from_value(value: Value) -> WireResult<Self> {
        match value {
            Value::Bytes(bytes) => Ok(Content::Inline(bytes)),
            record @ Value::Record { .. } => Ok(Content::Ref(record.into_record()?)),
            _ => Err(WireError::UnexpectedValue {
                expected: "bytes or content_ref",
                found: "other value",
            }),
        }
    }
}

/// A named payload with a MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBundle {
    pub filename: String,
    pub mimetype: String,
    pub content: Content,
}

impl FileBundle {
    /// Sign this bundle with `key`
    pub fn sign(
        &self,
        key: &SecretKeyPair,
        store: &dyn ContentStore,
        registry: &Registry,
    ) -> CryptoResult<BundleSignature> {
        let mut nonce = [0u8; SIGNATURE_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mut signature = BundleSignature {
            version: FORMAT_VERSION,
            signing_key: key.public().signing_key,
            nonce,
            timestamp: u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0),
            bundle: self.clone(),
            signature: [0u8; 64],
        };
        let sighash = signature.sighash(store, registry)?;
        signature.signature = key.sign(&sighash).signature;

        tracing::debug!(filename = %self.filename, signer = %key.id(), "Signed bundle");
        Ok(signature)
    }
}

impl WireRecord for FileBundle {
    const NAME: &'static str = "file_bundle";
    const FIELDS: &'static [&'static str] = &["filename", "mimetype", "content"];

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::from(self.filename.as_str()),
            Value::from(self.mimetype.as_str()),
            self.content.to_value(),
        ]
    }

    fn from_fields(fields: Vec<Value>) -> WireResult<Self> {
        let [filename, mimetype, content] = field_array(Self::NAME, fields)?;
        Ok(Self {
            filename: filename.into_text()?,
            mimetype: mimetype.into_text()?,
            content: Content::from_value(content)?,
        })
    }
}

/// Signature over a [`FileBundle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSignature {
    pub version: u64,
    /// Ed25519 verifying key of the signer
    pub signing_key: [u8; KEY_LEN],
    pub nonce: [u8; SIGNATURE_NONCE_LEN],
    /// Unix seconds at signing time
    pub timestamp: u64,
    pub bundle: FileBundle,
    pub signature: [u8; 64],
}

impl BundleSignature {
    /// The signed bytes: the wire encoding of
    /// `[version, nonce, timestamp, signing_key, filename, mimetype,
    /// hash(content), hash(nonce || content)]`
    pub fn sighash(&self, store: &dyn ContentStore, registry: &Registry) -> CryptoResult<Vec<u8>> {
        let content = self.bundle.content.resolve(store)?;
        let content_hash = hash(&content);
        let nonced_hash = hash(&[&self.nonce[..], &content[..]].concat());

        let fields = Value::Seq(vec![
            Value::Int(self.version),
            Value::from(&self.nonce[..]),
            Value::Int(self.timestamp),
            Value::from(&self.signing_key[..]),
            Value::from(self.bundle.filename.as_str()),
            Value::from(self.bundle.mimetype.as_str()),
            Value::from(&content_hash[..]),
            Value::from(&nonced_hash[..]),
        ]);
        Ok(registry.encode(&fields)?)
    }

    /// Verify the signature against the bundle and its resolved content
    pub fn verify(&self, store: &dyn ContentStore, registry: &Registry) -> CryptoResult<()> {
        let signature = Signature {
            signer: self.signing_key,
            payload: self.sighash(store, registry)?,
            signature: self.signature,
        };
        signature
            .verify()
            .map_err(|_| CryptoError::AuthenticationFailure("Invalid bundle signature".to_string()))
    }
}

impl WireRecord for BundleSignature {
    const NAME: &'static str = "bundle_signature";
    const FIELDS: &'static [&'static str] =
        &["version", "signing_key", "nonce", "timestamp", "bundle", "signature"];

    fn to_fields(&self) -> Vec<Value> {
        vec![
            Value::Int(self.version),
            Value::from(&self.signing_key[..]),
            Value::from(&self.nonce[..]),
            Value::Int(self.timestamp),
            Value::record(&self.bundle),
            Value::from(&self.signature[..]),
        ]
    }

    fn from_fields(fields: Vec<Value>) -> WireResult<Self> {
        let [version, signing_key, nonce, timestamp, bundle, signature] =
            field_array(Self::NAME, fields)?;
        Ok(Self {
            version: version.into_int()?,
            signing_key: signing_key.into_array()?,
            nonce: nonce.into_array()?,
            timestamp: timestamp.into_int()?,
            bundle: bundle.into_record()?,
            signature: signature.into_array()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::random_key_pair;

    fn inline_bundle() -> FileBundle {
        FileBundle {
            filename: "notes.txt".to_string(),
            mimetype: "text/plain".to_string(),
            content: Content::Inline(b"meeting at noon".to_vec()),
        }
    }

    #[test]
    fn test_content_ref() {
        let store = MemoryContentStore::new();
        let content_ref = ContentRef::create(&store, b"large payload");

        assert_eq!(content_ref.length, 13);
        assert_eq!(content_ref.hash, hash(b"large payload"));
        assert_eq!(content_ref.resolve(&store).unwrap(), b"large payload");
        assert_eq!(store.len(), 1);

        let missing = ContentRef::create(&MemoryContentStore::new(), b"elsewhere");
        assert!(matches!(
            missing.resolve(&store),
            Err(CryptoError::ContentNotFound(_))
        ));
    }

    #[test]
    fn test_sign_and_verify_inline() {
        let registry = Registry::standard();
        let store = MemoryContentStore::new();
        let key = random_key_pair();

        let signature = inline_bundle().sign(&key, &store, &registry).unwrap();
        assert_eq!(signature.signing_key, key.public().signing_key);
        assert!(signature.verify(&store, &registry).is_ok());

        let mut renamed = signature.clone();
        renamed.bundle.filename = "other.txt".to_string();
        assert!(matches!(
            renamed.verify(&store, &registry),
            Err(CryptoError::AuthenticationFailure(_))
        ));

        let mut altered = signature;
        altered.bundle.content = Content::Inline(b"meeting at one".to_vec());
        assert!(altered.verify(&store, &registry).is_err());
    }

    #[test]
    fn test_sign_and_verify_by_reference() {
        let registry = Registry::standard();
        let store = MemoryContentStore::new();
        let key = random_key_pair();
        let payload = vec![0xAB; 100_000];

        let bundle = FileBundle {
            filename: "image.bin".to_string(),
            mimetype: "application/octet-stream".to_string(),
            content: Content::Ref(ContentRef::create(&store, &payload)),
        };
        let signature = bundle.sign(&key, &store, &registry).unwrap();
        assert!(signature.verify(&store, &registry).is_ok());

        // The same bundle verifies identically when the payload is inline
        let mut inline = signature.clone();
        inline.bundle.content = Content::Inline(payload);
        assert!(inline.verify(&store, &registry).is_ok());

        // Without the store entry, verification cannot proceed
        assert!(matches!(
            signature.verify(&MemoryContentStore::new(), &registry),
            Err(CryptoError::ContentNotFound(_))
        ));
    }

    #[test]
    fn test_bundle_signature_wire_roundtrip() {
        let registry = Registry::standard();
        let store = MemoryContentStore::new();
        let key = random_key_pair();

        let bundle = FileBundle {
            filename: "doc.pdf".to_string(),
            mimetype: "application/pdf".to_string(),
            content: Content::Ref(ContentRef::create(&store, b"%PDF-1.7")),
        };
        let signature = bundle.sign(&key, &store, &registry).unwrap();

        let bytes = registry.serialize(&signature).unwrap();
        let (decoded, rest) = registry.deserialize::<BundleSignature>(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(decoded, signature);
        assert!(decoded.verify(&store, &registry).is_ok());
    }
}
