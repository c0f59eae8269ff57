//! Wire encoding error types

use thiserror::Error;

/// Errors raised while encoding or decoding wire values
#[derive(Debug, Error)]
pub enum WireError {
    /// Input ended before the declared length was available
    #[error("Truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// The type tag in the leading byte is not one we understand
    #[error("Unknown type tag: {0}")]
    UnknownTag(u8),

    /// Registered-object index points past the end of the registry
    #[error("Unknown record index: {0}")]
    UnknownRecordIndex(u8),

    /// Record decoded with a different number of fields than declared
    #[error("Field count mismatch for {kind}: expected {expected}, got {actual}")]
    FieldCountMismatch {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A value had a different shape than the record field expects
    #[error("Unexpected value: expected {expected}, found {found}")]
    UnexpectedValue {
        expected: &'static str,
        found: &'static str,
    },

    /// Integer or length field wider than 64 bits
    #[error("Integer too wide: {0} bytes")]
    IntegerTooWide(usize),

    /// Integer or length not in its shortest encoding
    #[error("Non-canonical encoding: {0}")]
    NonCanonical(&'static str),

    /// Text payload was not valid UTF-8
    #[error("Invalid UTF-8 text: {0}")]
    InvalidText(#[from] std::string::FromUtf8Error),

    /// Values nested deeper than the decoder allows
    #[error("Nesting deeper than {0} levels")]
    TooDeep(usize),

    /// Attempted to encode a record type the registry does not know
    #[error("Record type not registered: {0}")]
    Unregistered(&'static str),

    /// Registry construction error (duplicate name, too many records)
    #[error("Registry error: {0}")]
    Registry(String),

    /// Computed schema fingerprint differs from the pinned value
    #[error("Schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaMismatch { expected: String, actual: String },
}

/// Result type for wire operations
pub type WireResult<T> = Result<T, WireError>;
