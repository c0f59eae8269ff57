//! Compact binary wire encoding
//!
//! Every protocol value travels as a type-tagged, length-prefixed byte
//! sequence. The leading byte carries:
//!
//! - bits 7..5: the type tag (bytes, integer, text, sequence, registered record)
//! - bit 4: the extended-length flag
//! - bits 3..0: either the bit-length of a power-of-two length (compact form)
//!   or the byte count of the big-endian length that follows (extended form)
//!
//! Registered records replace the length nibble with a 5-bit index into the
//! [`Registry`], followed by their fields encoded as a sequence in declared
//! order. Both peers must build identical registries; the registry
//! [fingerprint](Registry::fingerprint) detects drift at start-up.
//!
//! The encoding is canonical: the decoder rejects integers and lengths that
//! carry leading zero bytes, and extended lengths that have a compact form.

mod codec;
mod errors;
mod registry;

pub use errors::{WireError, WireResult};
pub use registry::{RecordSchema, Registry, EXPECTED_FINGERPRINT};

/// A decoded (or to-be-encoded) wire value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    Int(u64),
    Text(String),
    Seq(Vec<Value>),
    /// A registered record, identified by its registry type name
    Record {
        kind: &'static str,
        fields: Vec<Value>,
    },
}

impl Value {
    /// Placeholder for an absent optional field (the empty sequence)
    pub fn none() -> Self {
        Value::Seq(Vec::new())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::Seq(items) if items.is_empty())
    }

    /// Wrap a record for embedding inside another value
    pub fn record<T: WireRecord>(record: &T) -> Self {
        Value::Record {
            kind: T::NAME,
            fields: record.to_fields(),
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Value::Bytes(_) => "bytes",
            Value::Int(_) => "integer",
            Value::Text(_) => "text",
            Value::Seq(_) => "sequence",
            Value::Record { kind, .. } => *kind,
        }
    }

    fn unexpected(&self, expected: &'static str) -> WireError {
        WireError::UnexpectedValue {
            expected,
            found: self.kind_name(),
        }
    }

    pub fn into_bytes(self) -> WireResult<Vec<u8>> {
        match self {
            Value::Bytes(bytes) => Ok(bytes),
            other => Err(other.unexpected("bytes")),
        }
    }

    /// Bytes of an exact length (keys, hashes, signatures)
    pub fn into_array<const N: usize>(self) -> WireResult<[u8; N]> {
        let bytes = self.into_bytes()?;
        bytes.try_into().map_err(|_| WireError::UnexpectedValue {
            expected: "fixed-length bytes",
            found: "bytes of another length",
        })
    }

    pub fn into_int(self) -> WireResult<u64> {
        match self {
            Value::Int(n) => Ok(n),
            other => Err(other.unexpected("integer")),
        }
    }

    pub fn into_text(self) -> WireResult<String> {
        match self {
            Value::Text(text) => Ok(text),
            other => Err(other.unexpected("text")),
        }
    }

    pub fn into_seq(self) -> WireResult<Vec<Value>> {
        match self {
            Value::Seq(items) => Ok(items),
            other => Err(other.unexpected("sequence")),
        }
    }

    /// Convert an embedded record back into its typed form
    pub fn into_record<T: WireRecord>(self) -> WireResult<T> {
        match self {
            Value::Record { kind, fields } if kind == T::NAME => {
                T::from_fields(take_fields(T::NAME, T::FIELDS.len(), fields)?)
            }
            other => Err(other.unexpected(T::NAME)),
        }
    }

    /// Decode an optional field: the empty sequence means absent
    pub fn into_optional<T>(self, f: impl FnOnce(Value) -> WireResult<T>) -> WireResult<Option<T>> {
        if self.is_none() {
            Ok(None)
        } else {
            f(self).map(Some)
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Bytes(bytes.to_vec())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Int(n)
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

/// A record type that can be placed in the [`Registry`]
///
/// `FIELDS` is the declared field order; `to_fields` must produce values in
/// exactly that order and `from_fields` receives them the same way.
pub trait WireRecord: Sized {
    /// Registry type name (part of the schema fingerprint)
    const NAME: &'static str;
    /// Declared field names (part of the schema fingerprint)
    const FIELDS: &'static [&'static str];

    fn to_fields(&self) -> Vec<Value>;

    fn from_fields(fields: Vec<Value>) -> WireResult<Self>;
}

/// Check a record's field count
pub(crate) fn take_fields(
    kind: &'static str,
    expected: usize,
    fields: Vec<Value>,
) -> WireResult<Vec<Value>> {
    if fields.len() != expected {
        return Err(WireError::FieldCountMismatch {
            kind,
            expected,
            actual: fields.len(),
        });
    }
    Ok(fields)
}

/// Split a record's fields into a fixed-size array for destructuring
pub fn field_array<const N: usize>(kind: &'static str, fields: Vec<Value>) -> WireResult<[Value; N]> {
    let actual = fields.len();
    fields.try_into().map_err(|_| WireError::FieldCountMismatch {
        kind,
        expected: N,
        actual,
    })
}
