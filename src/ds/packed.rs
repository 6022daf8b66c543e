use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::ds::parse_int;
use crate::errdata;
use crate::error::Result;

// Fixed prefix: total bytes u32 LE, tail entry offset u32 LE, entry count
// u16 LE. A single 0xFF terminator byte closes the layout.
const HEADER: usize = 10;
const TERMINATOR: u8 = 0xFF;

// A previous-entry length below this fits in one byte; larger lengths are a
// 0xFE marker followed by u32 LE.
const PREVLEN_MARKER: u8 = 0xFE;

// Entry header encodings. Strings use the top two bits (00/01/10 for 6, 14
// and 32 bit lengths); integers use the remaining 11-prefixed space.
const STR_06: u8 = 0x00;
const STR_14: u8 = 0x40;
const STR_32: u8 = 0x80;
const INT_16: u8 = 0xC0;
const INT_32: u8 = 0xD0;
const INT_64: u8 = 0xE0;
const INT_24: u8 = 0xF0;
const IMM_MIN: u8 = 0xF1;
const IMM_MAX: u8 = 0xFD;

/// The saturation sentinel for the count field. Never reported as a length.
const COUNT_SATURATED: u16 = u16::MAX;

/// A decoded packed-list entry: a byte string or an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackedEntry<'a> {
    Bytes(&'a [u8]),
    Int(i64),
}

impl PackedEntry<'_> {
    /// The entry as owned bytes, formatting integers in decimal.
    pub fn to_vec(self) -> Vec<u8> {
        match self {
            PackedEntry::Bytes(b) => b.to_vec(),
            PackedEntry::Int(v) => v.to_string().into_bytes(),
        }
    }

    /// The byte length the entry would have as a string.
    pub fn byte_len(self) -> usize {
        match self {
            PackedEntry::Bytes(b) => b.len(),
            PackedEntry::Int(v) => v.to_string().len(),
        }
    }
}

/// Parsed layout of one entry.
struct EntryMeta {
    /// Recorded length of the predecessor entry.
    prevlen: usize,
    /// Bytes used to record it (1 or 5).
    prevlen_size: usize,
    /// Bytes of the self-describing header.
    header_size: usize,
    /// Bytes of payload following the header.
    payload: usize,
}

impl EntryMeta {
    fn total(&self) -> usize {
        self.prevlen_size + self.header_size + self.payload
    }
}

/// A cache-friendly sequence of small entries in one contiguous allocation.
///
/// Entries carry their predecessor's length, so the list supports
/// bidirectional traversal without per-entry pointers. New entries are
/// stored under the narrowest encoding that admits the value. Cursors are
/// byte offsets into the backing buffer and are invalidated by any mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedList {
    buf: Vec<u8>,
}

impl PackedList {
    pub fn new() -> Self {
        let mut buf = vec![0; HEADER];
        LittleEndian::write_u32(&mut buf[0..4], (HEADER + 1) as u32);
        LittleEndian::write_u32(&mut buf[4..8], HEADER as u32);
        buf.push(TERMINATOR);
        Self { buf }
    }

    /// Total bytes of the backing blob.
    pub fn blob_len(&self) -> usize {
        self.buf.len()
    }

    fn count_field(&self) -> u16 {
        LittleEndian::read_u16(&self.buf[8..10])
    }

    fn tail_offset(&self) -> usize {
        LittleEndian::read_u32(&self.buf[4..8]) as usize
    }

    fn set_total(&mut self) {
        let total = self.buf.len() as u32;
        LittleEndian::write_u32(&mut self.buf[0..4], total);
    }

    fn set_tail(&mut self, offset: usize) {
        LittleEndian::write_u32(&mut self.buf[4..8], offset as u32);
    }

    fn set_count(&mut self, count: u16) {
        LittleEndian::write_u16(&mut self.buf[8..10], count);
    }

    /// Entry count. Reads the count field; when saturated, falls back to a
    /// full scan so the sentinel is never reported as a length.
    pub fn len(&self) -> usize {
        let field = self.count_field();
        if field < COUNT_SATURATED {
            return field as usize;
        }
        let mut n = 0;
        let mut at = self.head();
        while let Some(pos) = at {
            n += 1;
            at = self.next(pos);
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.buf[HEADER] == TERMINATOR
    }

    /// Cursor to the first entry.
    pub fn head(&self) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(HEADER)
        }
    }

    /// Cursor to the last entry.
    pub fn tail_entry(&self) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(self.tail_offset())
        }
    }

    /// Cursor to the entry after `at`.
    pub fn next(&self, at: usize) -> Option<usize> {
        let meta = self.meta(at);
        let next = at + meta.total();
        if self.buf[next] == TERMINATOR {
            None
        } else {
            Some(next)
        }
    }

    /// Cursor to the entry before `at`.
    pub fn prev(&self, at: usize) -> Option<usize> {
        if at == HEADER {
            return None;
        }
        let prevlen = self.meta(at).prevlen;
        Some(at - prevlen)
    }

    /// Cursor to the entry at a signed index, negatives from the tail.
    pub fn index(&self, index: i64) -> Option<usize> {
        if index >= 0 {
            let mut at = self.head()?;
            for _ in 0..index {
                at = self.next(at)?;
            }
            Some(at)
        } else {
            let mut at = self.tail_entry()?;
            for _ in 0..(-index - 1) {
                at = self.prev(at)?;
            }
            Some(at)
        }
    }

    /// Decodes the entry at a cursor.
    pub fn get(&self, at: usize) -> PackedEntry<'_> {
        let meta = self.meta(at);
        let body = at + meta.prevlen_size;
        let header = self.buf[body];
        let data = body + meta.header_size;
        match header & 0xC0 {
            STR_06 | STR_14 | STR_32 => PackedEntry::Bytes(&self.buf[data..data + meta.payload]),
            _ => PackedEntry::Int(match header {
                INT_16 => LittleEndian::read_i16(&self.buf[data..data + 2]) as i64,
                INT_24 => {
                    let raw = LittleEndian::read_u24(&self.buf[data..data + 3]) as i64;
                    (raw << 40) >> 40
                }
                INT_32 => LittleEndian::read_i32(&self.buf[data..data + 4]) as i64,
                INT_64 => LittleEndian::read_i64(&self.buf[data..data + 8]),
                imm => (imm & 0x0F) as i64 - 1,
            }),
        }
    }

    fn meta(&self, at: usize) -> EntryMeta {
        let (prevlen, prevlen_size) = if self.buf[at] < PREVLEN_MARKER {
            (self.buf[at] as usize, 1)
        } else {
            (LittleEndian::read_u32(&self.buf[at + 1..at + 5]) as usize, 5)
        };
        let body = at + prevlen_size;
        let header = self.buf[body];
        let (header_size, payload) = match header & 0xC0 {
            STR_06 => (1, (header & 0x3F) as usize),
            STR_14 => (2, ((header & 0x3F) as usize) << 8 | self.buf[body + 1] as usize),
            STR_32 => (5, BigEndian::read_u32(&self.buf[body + 1..body + 5]) as usize),
            _ => match header {
                INT_16 => (1, 2),
                INT_24 => (1, 3),
                INT_32 => (1, 4),
                INT_64 => (1, 8),
                _ => (1, 0), // immediate, value lives in the header byte
            },
        };
        EntryMeta { prevlen, prevlen_size, header_size, payload }
    }

    pub fn push_head(&mut self, value: &[u8]) {
        self.insert_at(HEADER, value);
    }

    pub fn push_tail(&mut self, value: &[u8]) {
        self.insert_at(self.buf.len() - 1, value);
    }

    /// Inserts before the entry at the cursor.
    pub fn insert_before(&mut self, at: usize, value: &[u8]) {
        self.insert_at(at, value);
    }

    /// Inserts an encoded entry at a byte offset, which is either an existing
    /// entry's offset or the terminator offset for a tail append.
    fn insert_at(&mut self, at: usize, value: &[u8]) {
        let prevlen = if at == HEADER {
            0
        } else if self.buf[at] == TERMINATOR {
            self.tail_entry().map_or(0, |t| self.meta(t).total())
        } else {
            self.meta(at).prevlen
        };

        let entry = encode_entry(prevlen, value);
        let entry_len = entry.len();
        self.buf.splice(at..at, entry);

        // The displaced successor now follows the new entry; record the new
        // predecessor length, cascading while size classes change.
        let successor = at + entry_len;
        if self.buf[successor] != TERMINATOR {
            self.cascade_prevlen(successor, entry_len);
        }

        let count = self.count_field();
        if count < COUNT_SATURATED {
            self.set_count(count + 1);
        }
        self.set_total();
        self.fix_tail();
    }

    /// Deletes the entry at the cursor, returning the cursor now occupying
    /// its position (the old successor), if any.
    pub fn delete(&mut self, at: usize) -> Option<usize> {
        let meta = self.meta(at);
        let prevlen = meta.prevlen;
        let total = meta.total();
        self.buf.drain(at..at + total);

        if self.buf[at] != TERMINATOR {
            self.cascade_prevlen(at, prevlen);
        }

        let count = self.count_field();
        if count < COUNT_SATURATED {
            self.set_count(count - 1);
        }
        self.set_total();
        self.fix_tail();
        if self.buf[at] == TERMINATOR {
            None
        } else {
            Some(at)
        }
    }

    /// Deletes `count` entries starting at the signed index.
    pub fn delete_range(&mut self, index: i64, count: usize) {
        let Some(mut at) = self.index(index) else {
            return;
        };
        for _ in 0..count {
            match self.delete(at) {
                Some(next) => at = next,
                None => break,
            }
        }
    }

    /// Finds the first entry byte-equal to `target`, testing one entry out of
    /// every `skip + 1`. The stride makes associative field/value scans skip
    /// over values.
    pub fn find(&self, target: &[u8], skip: usize) -> Option<usize> {
        let as_int = parse_int(target);
        let mut at = self.head();
        let mut to_skip = 0;
        while let Some(pos) = at {
            if to_skip == 0 {
                match self.get(pos) {
                    PackedEntry::Bytes(b) if b == target => return Some(pos),
                    PackedEntry::Int(v) if as_int == Some(v) => return Some(pos),
                    _ => {}
                }
                to_skip = skip;
            } else {
                to_skip -= 1;
            }
            at = self.next(pos);
        }
        None
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter { list: self, at: self.head() }
    }

    /// The backing blob, as stored in a snapshot's compact form.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.buf.clone()
    }

    /// Adopts a blob, validating the prefix fields, every entry's bounds,
    /// recorded predecessor lengths, and the terminator.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self> {
        if buf.len() < HEADER + 1 {
            return errdata!("packed list blob too short: {} bytes", buf.len());
        }
        if LittleEndian::read_u32(&buf[0..4]) as usize != buf.len() {
            return errdata!("packed list total-bytes field does not match blob size");
        }
        if buf[buf.len() - 1] != TERMINATOR {
            return errdata!("packed list blob is not terminated");
        }
        let list = Self { buf };

        let mut count: usize = 0;
        let mut at = HEADER;
        let mut last = None;
        let mut prev_size = 0;
        while list.buf[at] != TERMINATOR {
            let meta = list.checked_meta(at)?;
            let end = at + meta.total();
            if meta.prevlen != prev_size {
                return errdata!("packed list entry at {at} records a wrong predecessor length");
            }
            prev_size = meta.total();
            last = Some(at);
            count += 1;
            at = end;
        }
        if at != list.buf.len() - 1 {
            return errdata!("packed list terminator is not final");
        }

        let expected_tail = last.unwrap_or(HEADER);
        if list.tail_offset() != expected_tail {
            return errdata!("packed list tail offset does not point at the last entry");
        }
        let field = list.count_field();
        if field < COUNT_SATURATED && field as usize != count {
            return errdata!("packed list count field does not match iteration");
        }
        Ok(list)
    }

    /// Like [`meta`](Self::meta) but bounds-checked, for untrusted blobs.
    fn checked_meta(&self, at: usize) -> Result<EntryMeta> {
        // The last byte is the terminator; entries live strictly before it.
        let limit = self.buf.len() - 1;
        let malformed = || crate::error::Error::InvalidData(format!("malformed packed list entry at {at}"));
        let (prevlen, prevlen_size) = if self.buf[at] < PREVLEN_MARKER {
            (self.buf[at] as usize, 1)
        } else {
            if at + 5 > limit {
                return Err(malformed());
            }
            (LittleEndian::read_u32(&self.buf[at + 1..at + 5]) as usize, 5)
        };
        let body = at + prevlen_size;
        if body >= limit {
            return Err(malformed());
        }
        let header = self.buf[body];
        let (header_size, payload) = match header & 0xC0 {
            STR_06 => (1, (header & 0x3F) as usize),
            STR_14 => {
                if body + 2 > limit {
                    return Err(malformed());
                }
                (2, ((header & 0x3F) as usize) << 8 | self.buf[body + 1] as usize)
            }
            STR_32 => {
                if body + 5 > limit {
                    return Err(malformed());
                }
                (5, BigEndian::read_u32(&self.buf[body + 1..body + 5]) as usize)
            }
            _ => match header {
                INT_16 => (1, 2),
                INT_24 => (1, 3),
                INT_32 => (1, 4),
                INT_64 => (1, 8),
                imm if (IMM_MIN..=IMM_MAX).contains(&imm) => (1, 0),
                _ => return Err(malformed()),
            },
        };
        let meta = EntryMeta { prevlen, prevlen_size, header_size, payload };
        if at + meta.total() > limit || prevlen > at {
            return Err(malformed());
        }
        Ok(meta)
    }

    /// Rewrites the prevlen at `at` to `len`, growing the field if needed and
    /// propagating forward while successors change size class. A 5-byte field
    /// is never shrunk back to 1, which keeps the cascade forward-only.
    fn cascade_prevlen(&mut self, mut at: usize, mut len: usize) {
        loop {
            let meta = self.meta(at);
            let needed = if len < PREVLEN_MARKER as usize { 1 } else { 5 };
            let old_total = meta.total();

            if meta.prevlen_size == 5 || needed == meta.prevlen_size {
                // Rewrite in place, keeping a wide field wide. The entry's
                // size class is unchanged, so successors are unaffected.
                if meta.prevlen_size == 1 {
                    self.buf[at] = len as u8;
                } else {
                    self.buf[at] = PREVLEN_MARKER;
                    LittleEndian::write_u32(&mut self.buf[at + 1..at + 5], len as u32);
                }
                return;
            }

            // Grow 1 -> 5.
            let mut field = vec![PREVLEN_MARKER, 0, 0, 0, 0];
            LittleEndian::write_u32(&mut field[1..5], len as u32);
            self.buf.splice(at..at + 1, field);
            let new_total = old_total + 4;

            let next = at + new_total;
            if self.buf[next] == TERMINATOR {
                return;
            }
            at = next;
            len = new_total;
        }
    }

    /// Recomputes the tail-offset field by walking the layout.
    fn fix_tail(&mut self) {
        let mut tail = HEADER;
        let mut at = HEADER;
        while self.buf[at] != TERMINATOR {
            tail = at;
            at += self.meta(at).total();
        }
        self.set_tail(tail);
    }
}

impl Default for PackedList {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a> {
    list: &'a PackedList,
    at: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = PackedEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let at = self.at?;
        self.at = self.list.next(at);
        Some(self.list.get(at))
    }
}

/// Encodes one entry (prevlen field, header, payload) under the narrowest
/// representation that admits the value.
fn encode_entry(prevlen: usize, value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + 5 + value.len());

    if prevlen < PREVLEN_MARKER as usize {
        out.push(prevlen as u8);
    } else {
        out.push(PREVLEN_MARKER);
        out.extend_from_slice(&(prevlen as u32).to_le_bytes());
    }

    if let Some(v) = parse_int(value) {
        if (0..=12).contains(&v) {
            out.push(IMM_MIN + v as u8);
        } else if i16::try_from(v).is_ok() {
            out.push(INT_16);
            out.extend_from_slice(&(v as i16).to_le_bytes());
        } else if (-(1 << 23)..1 << 23).contains(&v) {
            out.push(INT_24);
            out.extend_from_slice(&(v as i32).to_le_bytes()[..3]);
        } else if i32::try_from(v).is_ok() {
            out.push(INT_32);
            out.extend_from_slice(&(v as i32).to_le_bytes());
        } else {
            out.push(INT_64);
            out.extend_from_slice(&v.to_le_bytes());
        }
        return out;
    }

    let len = value.len();
    if len <= 0x3F {
        out.push(STR_06 | len as u8);
    } else if len <= 0x3FFF {
        out.push(STR_14 | (len >> 8) as u8);
        out.push(len as u8);
    } else {
        out.push(STR_32);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
    out.extend_from_slice(value);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(list: &PackedList) -> Vec<Vec<u8>> {
        list.iter().map(|e| e.to_vec()).collect()
    }

    #[test]
    fn test_empty_layout() {
        let list = PackedList::new();
        assert!(list.is_empty());
        assert_eq!(list.len(), 0);
        assert_eq!(list.blob_len(), HEADER + 1);
        assert_eq!(list.head(), None);
        assert_eq!(list.tail_entry(), None);
        // Tail offset points at the terminator when empty.
        assert_eq!(list.tail_offset(), HEADER);
    }

    #[test]
    fn test_push_and_iterate() {
        let mut list = PackedList::new();
        list.push_tail(b"one");
        list.push_tail(b"two");
        list.push_head(b"zero");
        assert_eq!(list.len(), 3);
        assert_eq!(entries(&list), vec![b"zero".to_vec(), b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn test_integer_encodings() {
        let mut list = PackedList::new();
        for v in ["0", "12", "13", "-1", "32767", "-32768", "8388607", "2147483647", "9223372036854775807"] {
            list.push_tail(v.as_bytes());
        }
        let decoded: Vec<Vec<u8>> = entries(&list);
        let expected: Vec<Vec<u8>> = ["0", "12", "13", "-1", "32767", "-32768", "8388607", "2147483647", "9223372036854775807"]
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect();
        assert_eq!(decoded, expected);
        // Immediates and narrow widths occupy less space than text would.
        assert!(list.blob_len() < HEADER + 1 + decoded.iter().map(|d| d.len() + 2).sum::<usize>());
    }

    #[test]
    fn test_int24_boundaries() {
        let mut list = PackedList::new();
        for v in [-(1i64 << 23), (1 << 23) - 1, 1 << 23, -(1 << 23) - 1] {
            list.push_tail(v.to_string().as_bytes());
        }
        let got: Vec<Vec<u8>> = entries(&list);
        assert_eq!(got[0], (-(1i64 << 23)).to_string().into_bytes());
        assert_eq!(got[1], ((1i64 << 23) - 1).to_string().into_bytes());
        assert_eq!(got[2], (1i64 << 23).to_string().into_bytes());
        assert_eq!(got[3], (-(1i64 << 23) - 1).to_string().into_bytes());
    }

    #[test]
    fn test_leading_zero_strings_stay_strings() {
        let mut list = PackedList::new();
        list.push_tail(b"01");
        assert_eq!(list.get(list.head().unwrap()), PackedEntry::Bytes(b"01"));
    }

    #[test]
    fn test_string_size_classes() {
        let mut list = PackedList::new();
        let short = vec![b'a'; 63];
        let medium = vec![b'b'; 64];
        let long = vec![b'c'; 17000];
        list.push_tail(&short);
        list.push_tail(&medium);
        list.push_tail(&long);
        assert_eq!(entries(&list), vec![short, medium, long]);
    }

    #[test]
    fn test_bidirectional_traversal() {
        let mut list = PackedList::new();
        for i in 0..10 {
            list.push_tail(format!("item-{i}").as_bytes());
        }
        let mut back = Vec::new();
        let mut at = list.tail_entry();
        while let Some(pos) = at {
            back.push(list.get(pos).to_vec());
            at = list.prev(pos);
        }
        back.reverse();
        assert_eq!(back, entries(&list));
    }

    #[test]
    fn test_index() {
        let mut list = PackedList::new();
        for i in 0..5 {
            list.push_tail(i.to_string().as_bytes());
        }
        assert_eq!(list.get(list.index(0).unwrap()), PackedEntry::Int(0));
        assert_eq!(list.get(list.index(4).unwrap()), PackedEntry::Int(4));
        assert_eq!(list.get(list.index(-1).unwrap()), PackedEntry::Int(4));
        assert_eq!(list.get(list.index(-5).unwrap()), PackedEntry::Int(0));
        assert_eq!(list.index(5), None);
        assert_eq!(list.index(-6), None);
    }

    #[test]
    fn test_insert_before_and_delete() {
        let mut list = PackedList::new();
        list.push_tail(b"a");
        list.push_tail(b"c");
        let at = list.find(b"c", 0).expect("entry c");
        list.insert_before(at, b"b");
        assert_eq!(entries(&list), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        let at = list.find(b"b", 0).expect("entry b");
        let next = list.delete(at).expect("successor");
        assert_eq!(list.get(next), PackedEntry::Bytes(b"c"));
        assert_eq!(entries(&list), vec![b"a".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_delete_range() {
        let mut list = PackedList::new();
        for i in 0..6 {
            list.push_tail(i.to_string().as_bytes());
        }
        list.delete_range(1, 2);
        assert_eq!(
            entries(&list),
            vec![b"0".to_vec(), b"3".to_vec(), b"4".to_vec(), b"5".to_vec()]
        );
        list.delete_range(-2, 5);
        assert_eq!(entries(&list), vec![b"0".to_vec(), b"3".to_vec()]);
    }

    #[test]
    fn test_find_with_stride() {
        let mut list = PackedList::new();
        // Alternating field/value layout.
        for (f, v) in [("f1", "v1"), ("f2", "f3"), ("f3", "v3")] {
            list.push_tail(f.as_bytes());
            list.push_tail(v.as_bytes());
        }
        // A stride of 1 only visits fields, so the value "f3" at index 3 is
        // skipped and the field "f3" at index 4 is found.
        let at = list.find(b"f3", 1).expect("field f3");
        let mut index = 0;
        let mut cursor = list.head();
        while let Some(pos) = cursor {
            if pos == at {
                break;
            }
            index += 1;
            cursor = list.next(pos);
        }
        assert_eq!(index, 4);
        // Values are never visited under the stride.
        assert!(list.find(b"v1", 1).is_none());
        assert!(list.find(b"absent", 0).is_none());
    }

    #[test]
    fn test_prevlen_cascade() {
        // An entry growing from the 1-byte to the 5-byte prevlen class must
        // update its successor, and so on down the chain.
        let mut list = PackedList::new();
        let filler = vec![b'x'; 250];
        list.push_tail(b"small");
        list.push_tail(&filler);
        list.push_tail(&filler);
        // Replacing the head with a large entry pushes the second entry's
        // recorded prevlen over the one-byte limit.
        let head = list.head().unwrap();
        list.delete(head);
        let big = vec![b'y'; 300];
        list.push_head(&big);
        assert_eq!(list.len(), 3);
        assert_eq!(entries(&list), vec![big, filler.clone(), filler]);
        // The layout must still round-trip through validation.
        PackedList::from_bytes(list.to_bytes()).expect("valid after cascade");
    }

    #[test]
    fn test_totals_invariant() {
        let mut list = PackedList::new();
        for i in 0..100 {
            list.push_tail(format!("payload-{i}").as_bytes());
        }
        // Sum of entry sizes plus prefix and terminator equals total bytes.
        let mut sum = 0;
        let mut at = list.head();
        while let Some(pos) = at {
            sum += list.meta(pos).total();
            at = list.next(pos);
        }
        assert_eq!(HEADER + sum + 1, list.blob_len());
        assert_eq!(list.blob_len(), LittleEndian::read_u32(&list.buf[0..4]) as usize);
    }

    #[test]
    fn test_blob_round_trip() {
        let mut list = PackedList::new();
        for i in 0..20 {
            list.push_tail(format!("{i}").as_bytes());
            list.push_tail(format!("text-{i}").as_bytes());
        }
        let restored = PackedList::from_bytes(list.to_bytes()).expect("valid blob");
        assert_eq!(restored, list);
    }

    #[test]
    fn test_blob_validation_rejects_corruption() {
        let mut list = PackedList::new();
        list.push_tail(b"hello");
        let good = list.to_bytes();

        let mut truncated = good.clone();
        truncated.pop();
        assert!(PackedList::from_bytes(truncated).is_err());

        let mut bad_total = good.clone();
        LittleEndian::write_u32(&mut bad_total[0..4], 9999);
        assert!(PackedList::from_bytes(bad_total).is_err());

        let mut bad_tail = good.clone();
        LittleEndian::write_u32(&mut bad_tail[4..8], 3);
        assert!(PackedList::from_bytes(bad_tail).is_err());

        let mut bad_count = good;
        LittleEndian::write_u16(&mut bad_count[8..10], 7);
        assert!(PackedList::from_bytes(bad_count).is_err());
    }
}
