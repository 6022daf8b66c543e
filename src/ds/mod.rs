//! Storage primitives backing the typed value encodings.

pub mod bytes;
pub mod dict;
pub mod intset;
pub mod packed;
pub mod skiplist;

pub use bytes::ByteString;
pub use dict::Dict;
pub use intset::IntSet;
pub use packed::{PackedEntry, PackedList};
pub use skiplist::SkipList;

/// Parses bytes as a 64-bit signed integer, accepting only the canonical
/// decimal form: no leading zeros, no sign on zero, no surrounding junk.
/// A successful parse therefore round-trips: formatting the result yields
/// the original bytes. This is the predicate behind every integer encoding
/// decision in the store.
pub fn parse_int(bytes: &[u8]) -> Option<i64> {
    if bytes.is_empty() || bytes.len() > 20 {
        return None;
    }
    let (negative, digits) = match bytes[0] {
        b'-' => (true, &bytes[1..]),
        _ => (false, bytes),
    };
    if digits.is_empty() {
        return None;
    }
    if digits[0] == b'0' && (negative || digits.len() > 1) {
        return None;
    }
    let mut value: u64 = 0;
    for &d in digits {
        if !d.is_ascii_digit() {
            return None;
        }
        value = value.checked_mul(10)?.checked_add((d - b'0') as u64)?;
    }
    if negative {
        match value.cmp(&(i64::MAX as u64 + 1)) {
            std::cmp::Ordering::Greater => None,
            std::cmp::Ordering::Equal => Some(i64::MIN),
            std::cmp::Ordering::Less => Some(-(value as i64)),
        }
    } else if value <= i64::MAX as u64 {
        Some(value as i64)
    } else {
        None
    }
}
