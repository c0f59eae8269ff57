//! Tag/length framing and recursive value encoding

use super::registry::Registry;
use super::{Value, WireError, WireResult};

const TAG_BYTES: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_TEXT: u8 = 2;
const TAG_SEQ: u8 = 3;
const TAG_RECORD: u8 = 7;

const EXTENDED: u8 = 0x10;
const LOW_NIBBLE: u8 = 0x0f;
const RECORD_INDEX_MASK: u8 = 0x1f;

/// Maximum nesting of sequences and records accepted by the decoder
pub(crate) const MAX_DEPTH: usize = 32;

fn bit_length(n: u64) -> u32 {
    u64::BITS - n.leading_zeros()
}

/// Minimal big-endian representation (zero is the empty string)
pub(crate) fn integer_to_octets(n: u64) -> Vec<u8> {
    let bytes = n.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    bytes[skip..].to_vec()
}

pub(crate) fn octets_to_integer(bytes: &[u8]) -> WireResult<u64> {
    if bytes.len() > 8 {
        return Err(WireError::IntegerTooWide(bytes.len()));
    }
    Ok(bytes.iter().fold(0u64, |n, b| (n << 8) | u64::from(*b)))
}

/// Whether `len` fits the length nibble (zero or a power of two up to 2^14)
fn has_compact_form(len: u64) -> bool {
    let power_of_two = len & len.wrapping_sub(1) == 0;
    power_of_two && bit_length(u64::from(bit_length(len))) <= 4
}

/// Like [`octets_to_integer`], but rejects leading zero bytes
fn minimal_octets_to_integer(bytes: &[u8], what: &'static str) -> WireResult<u64> {
    if bytes.first() == Some(&0) {
        return Err(WireError::NonCanonical(what));
    }
    octets_to_integer(bytes)
}

/// Write the leading tag byte plus any extended length field
fn encode_header(tag: u8, len: u64, out: &mut Vec<u8>) {
    if has_compact_form(len) {
        out.push((tag << 5) | bit_length(len) as u8);
    } else {
        let len_bytes = integer_to_octets(len);
        out.push((tag << 5) | EXTENDED | len_bytes.len() as u8);
        out.extend_from_slice(&len_bytes);
    }
}

fn split_at_checked(input: &[u8], n: usize) -> WireResult<(&[u8], &[u8])> {
    if input.len() < n {
        return Err(WireError::Truncated {
            needed: n,
            available: input.len(),
        });
    }
    Ok(input.split_at(n))
}

pub(crate) fn encode_value(value: &Value, registry: &Registry, out: &mut Vec<u8>) -> WireResult<()> {
    match value {
        Value::Bytes(bytes) => {
            encode_header(TAG_BYTES, bytes.len() as u64, out);
            out.extend_from_slice(bytes);
        }
        Value::Int(n) => {
            let bytes = integer_to_octets(*n);
            encode_header(TAG_INT, bytes.len() as u64, out);
            out.extend_from_slice(&bytes);
        }
        Value::Text(text) => {
            encode_header(TAG_TEXT, text.len() as u64, out);
            out.extend_from_slice(text.as_bytes());
        }
        Value::Seq(items) => encode_seq(items, registry, out)?,
        Value::Record { kind, fields } => {
            let index = registry
                .index_of(kind)
                .ok_or(WireError::Unregistered(*kind))?;
            out.push((TAG_RECORD << 5) | index);
            encode_seq(fields, registry, out)?;
        }
    }
    Ok(())
}

fn encode_seq(items: &[Value], registry: &Registry, out: &mut Vec<u8>) -> WireResult<()> {
    encode_header(TAG_SEQ, items.len() as u64, out);
    for item in items {
        encode_value(item, registry, out)?;
    }
    Ok(())
}

pub(crate) fn decode_value<'a>(
    input: &'a [u8],
    registry: &Registry,
    depth: usize,
) -> WireResult<(Value, &'a [u8])> {
    if depth > MAX_DEPTH {
        return Err(WireError::TooDeep(MAX_DEPTH));
    }
    let (&lead, rest) = input.split_first().ok_or(WireError::Truncated {
        needed: 1,
        available: 0,
    })?;
    let tag = lead >> 5;

    if tag == TAG_RECORD {
        let index = lead & RECORD_INDEX_MASK;
        let schema = registry
            .schema(index)
            .ok_or(WireError::UnknownRecordIndex(index))?;
        let (fields, rest) = decode_value(rest, registry, depth + 1)?;
        let fields = fields.into_seq()?;
        if fields.len() != schema.fields.len() {
            return Err(WireError::FieldCountMismatch {
                kind: schema.name,
                expected: schema.fields.len(),
                actual: fields.len(),
            });
        }
        return Ok((
            Value::Record {
                kind: schema.name,
                fields,
            },
            rest,
        ));
    }

    let low = lead & LOW_NIBBLE;
    let (len, rest) = if lead & EXTENDED != 0 {
        let (len_bytes, rest) = split_at_checked(rest, usize::from(low))?;
        let len = minimal_octets_to_integer(len_bytes, "length with leading zero bytes")?;
        if has_compact_form(len) {
            return Err(WireError::NonCanonical("extended length with a compact form"));
        }
        (len, rest)
    } else if low == 0 {
        (0, rest)
    } else {
        (1u64 << (low - 1), rest)
    };

    if tag == TAG_SEQ {
        let mut items = Vec::new();
        let mut rest = rest;
        for _ in 0..len {
            let (item, remaining) = decode_value(rest, registry, depth + 1)?;
            items.push(item);
            rest = remaining;
        }
        return Ok((Value::Seq(items), rest));
    }

    let len = usize::try_from(len).map_err(|_| WireError::IntegerTooWide(8))?;
    let (data, rest) = split_at_checked(rest, len)?;
    let value = match tag {
        TAG_BYTES => Value::Bytes(data.to_vec()),
        TAG_INT => Value::Int(minimal_octets_to_integer(data, "integer with leading zero bytes")?),
        TAG_TEXT => Value::Text(String::from_utf8(data.to_vec())?),
        other => return Err(WireError::UnknownTag(other)),
    };
    Ok((value, rest))
}
