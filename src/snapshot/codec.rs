//! The snapshot wire format: length, integer, string, and double codecs,
//! plus the record and value-type opcodes.

use std::io::{Read, Write};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::ds::parse_int;
use crate::errdata;
use crate::error::Result;
use crate::value::{format_double, parse_double};

pub const MAGIC: &[u8; 5] = b"REDIS";

/// Current format version, written as four ASCII digits after the magic.
pub const VERSION: u32 = 6;

/// The CRC64 trailer exists from this version on.
pub const CHECKSUM_MIN_VERSION: u32 = 5;

// Record opcodes.
pub const OP_EXPIRE_MS: u8 = 0xFC;
pub const OP_EXPIRE_SECS: u8 = 0xFD;
pub const OP_SELECT_DB: u8 = 0xFE;
pub const OP_EOF: u8 = 0xFF;

// Value type opcodes. The natural forms write count-then-elements; the
// compact forms write the whole internal blob through the string codec.
pub const TYPE_STRING: u8 = 0;
pub const TYPE_LIST: u8 = 1;
pub const TYPE_SET: u8 = 2;
pub const TYPE_ZSET: u8 = 3;
pub const TYPE_HASH: u8 = 4;
pub const TYPE_LIST_PACKED: u8 = 10;
pub const TYPE_SET_INTARRAY: u8 = 11;
pub const TYPE_ZSET_PACKED: u8 = 12;
pub const TYPE_HASH_PACKED: u8 = 13;

// Length forms, selected by the top two bits of the first byte.
const LEN_6BIT: u8 = 0;
const LEN_14BIT: u8 = 1;
const LEN_32BIT: u8 = 2;
const LEN_SPECIAL: u8 = 3;

// Special string encodings under the LEN_SPECIAL tag.
const ENC_INT8: u8 = 0;
const ENC_INT16: u8 = 1;
const ENC_INT32: u8 = 2;
const ENC_LZF: u8 = 3;

/// A decoded length field: either a plain length or a special-encoding tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    Plain(u64),
    Special(u8),
}

/// Writes a length in the shortest of the 6-bit, 14-bit, and 32-bit forms.
pub fn write_length<W: Write>(w: &mut W, len: u64) -> Result<()> {
    if len < 1 << 6 {
        w.write_u8((LEN_6BIT << 6) | len as u8)?;
    } else if len < 1 << 14 {
        w.write_u8((LEN_14BIT << 6) | (len >> 8) as u8)?;
        w.write_u8(len as u8)?;
    } else if len <= u32::MAX as u64 {
        w.write_u8(LEN_32BIT << 6)?;
        w.write_u32::<BigEndian>(len as u32)?;
    } else {
        return errdata!("length {len} exceeds the 32-bit format limit");
    }
    Ok(())
}

/// Reads a length field, which may instead carry a special-encoding tag.
pub fn read_length<R: Read>(r: &mut R) -> Result<Length> {
    let first = r.read_u8()?;
    let form = first >> 6;
    Ok(match form {
        LEN_6BIT => Length::Plain((first & 0x3F) as u64),
        LEN_14BIT => {
            let next = r.read_u8()?;
            Length::Plain((((first & 0x3F) as u64) << 8) | next as u64)
        }
        LEN_32BIT => Length::Plain(r.read_u32::<BigEndian>()? as u64),
        _ => Length::Special(first & 0x3F),
    })
}

/// Reads a length, rejecting special-encoding tags.
pub fn read_plain_length<R: Read>(r: &mut R) -> Result<u64> {
    match read_length(r)? {
        Length::Plain(len) => Ok(len),
        Length::Special(tag) => errdata!("expected a plain length, found encoding tag {tag}"),
    }
}

/// Encodes an integer in the shortest special form that fits, if any.
fn encode_integer(v: i64) -> Option<Vec<u8>> {
    if i8::try_from(v).is_ok() {
        Some(vec![(LEN_SPECIAL << 6) | ENC_INT8, v as u8])
    } else if i16::try_from(v).is_ok() {
        let mut out = vec![(LEN_SPECIAL << 6) | ENC_INT16];
        out.extend_from_slice(&(v as i16).to_le_bytes());
        Some(out)
    } else if i32::try_from(v).is_ok() {
        let mut out = vec![(LEN_SPECIAL << 6) | ENC_INT32];
        out.extend_from_slice(&(v as i32).to_le_bytes());
        Some(out)
    } else {
        None
    }
}

/// Writes a string: first attempting integer encoding, then LZF compression
/// when enabled, profitable, and the string is long enough to bother, else
/// as a plain length-prefixed blob.
pub fn write_string<W: Write>(w: &mut W, bytes: &[u8], compression: bool) -> Result<()> {
    if bytes.len() <= 11 {
        if let Some(enc) = parse_int(bytes).and_then(encode_integer) {
            w.write_all(&enc)?;
            return Ok(());
        }
    }
    if compression && bytes.len() > 20 {
        if let Ok(compressed) = lzf::compress(bytes) {
            if compressed.len() < bytes.len() {
                w.write_u8((LEN_SPECIAL << 6) | ENC_LZF)?;
                write_length(w, compressed.len() as u64)?;
                write_length(w, bytes.len() as u64)?;
                w.write_all(&compressed)?;
                return Ok(());
            }
        }
    }
    write_length(w, bytes.len() as u64)?;
    w.write_all(bytes)?;
    Ok(())
}

/// Writes an integer as a special-encoded string, falling back to its
/// decimal text when it does not fit the 32-bit special forms.
pub fn write_int_string<W: Write>(w: &mut W, v: i64) -> Result<()> {
    if let Some(enc) = encode_integer(v) {
        w.write_all(&enc)?;
        return Ok(());
    }
    let text = v.to_string();
    write_length(w, text.len() as u64)?;
    w.write_all(text.as_bytes())?;
    Ok(())
}

/// Reads a string in any of its encodings back into plain bytes.
pub fn read_string<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    match read_length(r)? {
        Length::Plain(len) => {
            let mut buf = vec![0u8; len as usize];
            r.read_exact(&mut buf)?;
            Ok(buf)
        }
        Length::Special(ENC_INT8) => Ok((r.read_i8()? as i64).to_string().into_bytes()),
        Length::Special(ENC_INT16) => {
            Ok((r.read_i16::<LittleEndian>()? as i64).to_string().into_bytes())
        }
        Length::Special(ENC_INT32) => {
            Ok((r.read_i32::<LittleEndian>()? as i64).to_string().into_bytes())
        }
        Length::Special(ENC_LZF) => {
            let compressed_len = read_plain_length(r)? as usize;
            let uncompressed_len = read_plain_length(r)? as usize;
            let mut compressed = vec![0u8; compressed_len];
            r.read_exact(&mut compressed)?;
            lzf::decompress(&compressed, uncompressed_len)
                .map_err(|e| crate::error::Error::InvalidData(format!("lzf payload: {e:?}")))
        }
        Length::Special(tag) => errdata!("unknown string encoding tag {tag}"),
    }
}

/// Writes a double as a length-prefixed ASCII string, with the reserved
/// one-byte lengths 253 (NaN), 254 (+inf), and 255 (-inf).
pub fn write_double<W: Write>(w: &mut W, v: f64) -> Result<()> {
    if v.is_nan() {
        w.write_u8(253)?;
    } else if v.is_infinite() {
        w.write_u8(if v < 0.0 { 255 } else { 254 })?;
    } else {
        let text = format_double(v);
        w.write_u8(text.len() as u8)?;
        w.write_all(&text)?;
    }
    Ok(())
}

pub fn read_double<R: Read>(r: &mut R) -> Result<f64> {
    match r.read_u8()? {
        253 => Ok(f64::NAN),
        254 => Ok(f64::INFINITY),
        255 => Ok(f64::NEG_INFINITY),
        len => {
            let mut buf = vec![0u8; len as usize];
            r.read_exact(&mut buf)?;
            parse_double(&buf)
                .ok_or_else(|| crate::error::Error::InvalidData("unparseable double".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip_length(len: u64) -> u64 {
        let mut buf = Vec::new();
        write_length(&mut buf, len).expect("write");
        match read_length(&mut Cursor::new(buf)).expect("read") {
            Length::Plain(got) => got,
            Length::Special(tag) => panic!("unexpected special tag {tag}"),
        }
    }

    #[test]
    fn test_length_round_trip_all_forms() {
        for len in [0, 1, 63, 64, 300, 16383, 16384, 1 << 20, u32::MAX as u64] {
            assert_eq!(round_trip_length(len), len, "length {len}");
        }
        assert!(write_length(&mut Vec::new(), u32::MAX as u64 + 1).is_err());
    }

    #[test]
    fn test_length_encoded_sizes() {
        let mut buf = Vec::new();
        write_length(&mut buf, 63).expect("write");
        assert_eq!(buf.len(), 1);
        buf.clear();
        write_length(&mut buf, 16383).expect("write");
        assert_eq!(buf.len(), 2);
        buf.clear();
        write_length(&mut buf, 16384).expect("write");
        assert_eq!(buf.len(), 5);
    }

    fn round_trip_string(bytes: &[u8], compression: bool) -> (Vec<u8>, usize) {
        let mut buf = Vec::new();
        write_string(&mut buf, bytes, compression).expect("write");
        let encoded_len = buf.len();
        let got = read_string(&mut Cursor::new(buf)).expect("read");
        (got, encoded_len)
    }

    #[test]
    fn test_integer_string_encodings() {
        // All integer widths round-trip through their decimal text.
        for v in [0i64, 12, -128, 127, 128, -32768, 32767, 40000, i32::MAX as i64, i32::MIN as i64]
        {
            let text = v.to_string().into_bytes();
            let (got, encoded_len) = round_trip_string(&text, false);
            assert_eq!(got, text, "value {v}");
            // Special encodings beat the text for multi-digit values.
            assert!(encoded_len <= text.len() + 1, "value {v}");
        }
    }

    #[test]
    fn test_big_integers_fall_back_to_text() {
        let v = (i32::MAX as i64) + 1;
        let text = v.to_string().into_bytes();
        let (got, encoded_len) = round_trip_string(&text, false);
        assert_eq!(got, text);
        assert_eq!(encoded_len, 1 + text.len());
    }

    #[test]
    fn test_write_int_string() {
        for v in [0i64, -7, 300, 1 << 40] {
            let mut buf = Vec::new();
            write_int_string(&mut buf, v).expect("write");
            let got = read_string(&mut Cursor::new(buf)).expect("read");
            assert_eq!(got, v.to_string().into_bytes());
        }
    }

    #[test]
    fn test_lzf_compression_profitable() {
        let bytes = vec![b'a'; 200];
        let (got, encoded_len) = round_trip_string(&bytes, true);
        assert_eq!(got, bytes);
        assert!(encoded_len < bytes.len(), "repetitive data must compress");
    }

    #[test]
    fn test_lzf_unprofitable_falls_through_raw() {
        // High-entropy bytes compress badly and must be stored raw.
        let bytes: Vec<u8> = (0..=255u8).chain((0..=255u8).rev()).collect();
        let (got, encoded_len) = round_trip_string(&bytes, true);
        assert_eq!(got, bytes);
        assert!(encoded_len >= bytes.len());
    }

    #[test]
    fn test_short_strings_never_compressed() {
        let bytes = vec![b'a'; 20];
        let (got, encoded_len) = round_trip_string(&bytes, true);
        assert_eq!(got, bytes);
        assert_eq!(encoded_len, 1 + bytes.len());
    }

    #[test]
    fn test_double_round_trip() {
        for v in [0.0, 1.5, -7.25, 3.0, 1e300, -4.9e-100] {
            let mut buf = Vec::new();
            write_double(&mut buf, v).expect("write");
            let got = read_double(&mut Cursor::new(buf)).expect("read");
            assert_eq!(got, v);
        }
    }

    #[test]
    fn test_double_specials() {
        for (v, expected_len) in [(f64::NAN, 253u8), (f64::INFINITY, 254), (f64::NEG_INFINITY, 255)] {
            let mut buf = Vec::new();
            write_double(&mut buf, v).expect("write");
            assert_eq!(buf, vec![expected_len]);
            let got = read_double(&mut Cursor::new(buf)).expect("read");
            if v.is_nan() {
                assert!(got.is_nan());
            } else {
                assert_eq!(got, v);
            }
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        // 0b11xxxxxx with an undefined tag.
        let buf = vec![(LEN_SPECIAL << 6) | 9];
        assert!(read_string(&mut Cursor::new(buf)).is_err());
    }
}
