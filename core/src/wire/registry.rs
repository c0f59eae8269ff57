//! Serializable record registry and schema fingerprint

use super::codec::{decode_value, encode_value};
use super::{Value, WireError, WireRecord, WireResult};
use crate::crypto::bundle::{BundleSignature, ContentRef, FileBundle};
use crate::crypto::kdf::hash;
use crate::crypto::keys::{PublicKeyBundle, Signature};
use crate::crypto::prekeys::KeyBundle;
use crate::crypto::ratchet::RatchetHeader;
use crate::crypto::x3dh::X3dhHeader;

/// Fingerprint of [`Registry::standard`], pinned for start-up checks
pub const EXPECTED_FINGERPRINT: &str = "4ekb3JZmZAhgpKexcViiL8";

/// Type name and declared field names of one registered record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    pub name: &'static str,
    pub fields: &'static [&'static str],
}

impl RecordSchema {
    pub fn of<T: WireRecord>() -> Self {
        Self {
            name: T::NAME,
            fields: T::FIELDS,
        }
    }

    fn canonical_form(&self) -> String {
        let mut parts = vec![self.name];
        parts.extend_from_slice(self.fields);
        format!("({})", parts.join(" "))
    }
}

/// Ordered registry of serializable record types
///
/// The position of a record in the registry is its wire index, so both
/// peers must register the same types in the same order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    records: Vec<RecordSchema>,
}

impl Registry {
    /// Record indices occupy the low 5 bits of the tag byte
    pub const MAX_RECORDS: usize = 32;

    /// An empty registry (plain values only)
    pub fn new() -> Self {
        Self::default()
    }

    /// The deployment-wide registry used by every protocol peer
    pub fn standard() -> Self {
        Self {
            records: vec![
                RecordSchema::of::<PublicKeyBundle>(),
                RecordSchema::of::<FileBundle>(),
                RecordSchema::of::<BundleSignature>(),
                RecordSchema::of::<ContentRef>(),
                RecordSchema::of::<X3dhHeader>(),
                RecordSchema::of::<RatchetHeader>(),
                RecordSchema::of::<KeyBundle>(),
                RecordSchema::of::<Signature>(),
            ],
        }
    }

    /// Append a record type
    pub fn register<T: WireRecord>(&mut self) -> WireResult<()> {
        self.register_schema(RecordSchema::of::<T>())
    }

    /// Append a record schema directly
    pub fn register_schema(&mut self, schema: RecordSchema) -> WireResult<()> {
        if self.records.len() >= Self::MAX_RECORDS {
            return Err(WireError::Registry(format!(
                "cannot register more than {} record types",
                Self::MAX_RECORDS
            )));
        }
        if self.index_of(schema.name).is_some() {
            return Err(WireError::Registry(format!(
                "record type {} registered twice",
                schema.name
            )));
        }
        self.records.push(schema);
        Ok(())
    }

    pub fn index_of(&self, name: &str) -> Option<u8> {
        self.records
            .iter()
            .position(|r| r.name == name)
            .map(|i| i as u8)
    }

    pub fn schema(&self, index: u8) -> Option<&RecordSchema> {
        self.records.get(usize::from(index))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Canonical string the fingerprint is computed over
    pub fn canonical_form(&self) -> String {
        let forms: Vec<String> = self.records.iter().map(RecordSchema::canonical_form).collect();
        format!("({})", forms.join(" "))
    }

    /// Base58 of the first 16 bytes of the hash of the canonical form
    pub fn fingerprint(&self) -> String {
        let digest = hash(self.canonical_form().as_bytes());
        bs58::encode(&digest[..16]).into_string()
    }

    /// Fail if this registry's fingerprint differs from `expected`
    pub fn check_fingerprint(&self, expected: &str) -> WireResult<()> {
        let actual = self.fingerprint();
        if actual != expected {
            return Err(WireError::SchemaMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }

    pub fn encode(&self, value: &Value) -> WireResult<Vec<u8>> {
        let mut out = Vec::new();
        encode_value(value, self, &mut out)?;
        Ok(out)
    }

    /// Decode one value, returning the unread remainder
    pub fn decode<'a>(&self, input: &'a [u8]) -> WireResult<(Value, &'a [u8])> {
        decode_value(input, self, 0)
    }

    pub fn serialize<T: WireRecord>(&self, record: &T) -> WireResult<Vec<u8>> {
        self.encode(&Value::record(record))
    }

    /// Decode a record of type `T`, returning the unread remainder
    pub fn deserialize<'a, T: WireRecord>(&self, input: &'a [u8]) -> WireResult<(T, &'a [u8])> {
        let (value, rest) = self.decode(input)?;
        Ok((value.into_record::<T>()?, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::random_key_pair;

    #[test]
    fn test_standard_fingerprint_is_pinned() {
        let registry = Registry::standard();
        assert_eq!(registry.len(), 8);
        assert_eq!(registry.fingerprint(), EXPECTED_FINGERPRINT);
        assert!(registry.check_fingerprint(EXPECTED_FINGERPRINT).is_ok());
    }

    #[test]
    fn test_canonical_form() {
        let mut registry = Registry::new();
        registry
            .register_schema(RecordSchema {
                name: "point",
                fields: &["x", "y"],
            })
            .unwrap();
        registry
            .register_schema(RecordSchema {
                name: "label",
                fields: &["text"],
            })
            .unwrap();
        assert_eq!(registry.canonical_form(), "((point x y) (label text))");
    }

    #[test]
    fn test_field_change_changes_fingerprint() {
        let standard = Registry::standard();
        let mut altered = Registry::new();
        for index in 0..standard.len() as u8 {
            let mut schema = standard.schema(index).unwrap().clone();
            if schema.name == RatchetHeader::NAME {
                schema.fields = &["ratchet_key", "message_number", "previous_chain_length"];
            }
            altered.register_schema(schema).unwrap();
        }
        assert_ne!(altered.fingerprint(), standard.fingerprint());
        assert!(matches!(
            altered.check_fingerprint(EXPECTED_FINGERPRINT),
            Err(WireError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_registration_limits() {
        let mut registry = Registry::standard();
        assert!(registry.register::<PublicKeyBundle>().is_err());

        let names: Vec<&'static str> = (0..Registry::MAX_RECORDS)
            .map(|i| &*Box::leak(format!("r{i}").into_boxed_str()))
            .collect();
        let mut full = Registry::new();
        for name in names {
            full.register_schema(RecordSchema { name, fields: &["a"] }).unwrap();
        }
        assert!(full
            .register_schema(RecordSchema { name: "overflow", fields: &["a"] })
            .is_err());
    }

    #[test]
    fn test_unregistered_record_fails_to_encode() {
        let key = random_key_pair();
        let empty = Registry::new();
        assert!(matches!(
            empty.serialize(key.public()),
            Err(WireError::Unregistered("public_key_bundle"))
        ));
    }

    #[test]
    fn test_wrong_record_type_rejected() {
        let registry = Registry::standard();
        let key = random_key_pair();
        let bytes = registry.serialize(key.public()).unwrap();
        assert!(registry.deserialize::<RatchetHeader>(&bytes).is_err());
        let (decoded, rest) = registry.deserialize::<PublicKeyBundle>(&bytes).unwrap();
        assert!(rest.is_empty());
        assert_eq!(&decoded, key.public());
    }
}
