use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

/// Growth stops doubling and becomes linear once a buffer reaches this size.
const PREALLOC_LIMIT: usize = 1024 * 1024;

/// A growable, binary-safe byte string.
///
/// Length is explicit, so content may contain zero bytes. Appends over-allocate
/// to amortize growth: capacity doubles until it reaches [`PREALLOC_LIMIT`],
/// then grows by that amount each time. Capacity is never shrunk except by an
/// explicit [`reclaim`](ByteString::reclaim).
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteString {
    buf: Vec<u8>,
}

impl ByteString {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self { buf: bytes.to_vec() }
    }

    /// Formats an integer as its decimal byte representation.
    pub fn from_int(v: i64) -> Self {
        Self { buf: v.to_string().into_bytes() }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Ensures room for `extra` more bytes under the over-allocation policy.
    fn make_room(&mut self, extra: usize) {
        let needed = self.buf.len() + extra;
        if needed <= self.buf.capacity() {
            return;
        }
        let target = if needed < PREALLOC_LIMIT {
            needed * 2
        } else {
            needed + PREALLOC_LIMIT
        };
        self.buf.reserve_exact(target - self.buf.len());
    }

    pub fn push(&mut self, byte: u8) {
        self.make_room(1);
        self.buf.push(byte);
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.make_room(bytes.len());
        self.buf.extend_from_slice(bytes);
    }

    /// Replaces the content, keeping any existing capacity.
    pub fn set(&mut self, bytes: &[u8]) {
        self.buf.clear();
        self.append(bytes);
    }

    pub fn truncate(&mut self, len: usize) {
        self.buf.truncate(len);
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Drops any spare capacity.
    pub fn reclaim(&mut self) {
        self.buf.shrink_to_fit();
    }

    /// Removes any leading and trailing bytes that appear in `set`.
    pub fn trim(&mut self, set: &[u8]) {
        let start = self
            .buf
            .iter()
            .position(|b| !set.contains(b))
            .unwrap_or(self.buf.len());
        let end = self
            .buf
            .iter()
            .rposition(|b| !set.contains(b))
            .map_or(start, |p| p + 1);
        self.buf.drain(..start);
        self.buf.truncate(end - start);
    }

    /// Returns the substring for the inclusive index range, with negative
    /// indices counted from the end. Out-of-order or out-of-bounds ranges
    /// yield an empty string.
    pub fn range(&self, start: i64, end: i64) -> ByteString {
        let len = self.buf.len() as i64;
        if len == 0 {
            return ByteString::new();
        }
        let mut start = if start < 0 { len + start } else { start };
        let mut end = if end < 0 { len + end } else { end };
        if start < 0 {
            start = 0;
        }
        if end >= len {
            end = len - 1;
        }
        if start > end || start >= len || end < 0 {
            return ByteString::new();
        }
        ByteString::from_slice(&self.buf[start as usize..=end as usize])
    }

    /// ASCII-lowercases the content in place.
    pub fn make_lower(&mut self) {
        self.buf.make_ascii_lowercase();
    }

    /// ASCII-uppercases the content in place.
    pub fn make_upper(&mut self) {
        self.buf.make_ascii_uppercase();
    }

    /// Splits on a multi-byte separator, keeping empty tokens between
    /// adjacent separators. An empty input or separator yields no tokens.
    pub fn split(&self, sep: &[u8]) -> Vec<ByteString> {
        if self.buf.is_empty() || sep.is_empty() {
            return Vec::new();
        }
        let mut tokens = Vec::new();
        let mut from = 0;
        let mut at = 0;
        while at + sep.len() <= self.buf.len() {
            if &self.buf[at..at + sep.len()] == sep {
                tokens.push(ByteString::from_slice(&self.buf[from..at]));
                at += sep.len();
                from = at;
            } else {
                at += 1;
            }
        }
        tokens.push(ByteString::from_slice(&self.buf[from..]));
        tokens
    }

    /// Joins parts with a separator.
    pub fn join(parts: &[ByteString], sep: &[u8]) -> ByteString {
        let mut out = ByteString::new();
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                out.append(sep);
            }
            out.append(part);
        }
        out
    }

    /// Parses a line into tokens the way a shell would: whitespace-separated
    /// words, double quotes honoring `\xHH` and `\n \r \t \a \b` escapes,
    /// single quotes honoring `\'`. Returns None on unbalanced quotes or a
    /// closing quote not followed by a space.
    pub fn tokenize(line: &[u8]) -> Option<Vec<ByteString>> {
        let mut tokens = Vec::new();
        let mut i = 0;
        while i < line.len() {
            while i < line.len() && line[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= line.len() {
                break;
            }
            let mut current = ByteString::new();
            let mut in_double = false;
            let mut in_single = false;
            loop {
                if in_double {
                    if i >= line.len() {
                        return None;
                    }
                    match line[i] {
                        b'\\' if i + 3 < line.len()
                            && line[i + 1] == b'x'
                            && line[i + 2].is_ascii_hexdigit()
                            && line[i + 3].is_ascii_hexdigit() =>
                        {
                            let hi = hex_digit(line[i + 2]);
                            let lo = hex_digit(line[i + 3]);
                            current.push(hi * 16 + lo);
                            i += 4;
                        }
                        b'\\' if i + 1 < line.len() => {
                            let c = match line[i + 1] {
                                b'n' => b'\n',
                                b'r' => b'\r',
                                b't' => b'\t',
                                b'b' => 0x08,
                                b'a' => 0x07,
                                other => other,
                            };
                            current.push(c);
                            i += 2;
                        }
                        b'"' => {
                            // Closing quote must be followed by a separator.
                            if i + 1 < line.len() && !line[i + 1].is_ascii_whitespace() {
                                return None;
                            }
                            i += 1;
                            in_double = false;
                            break;
                        }
                        c => {
                            current.push(c);
                            i += 1;
                        }
                    }
                } else if in_single {
                    if i >= line.len() {
                        return None;
                    }
                    match line[i] {
                        b'\\' if i + 1 < line.len() && line[i + 1] == b'\'' => {
                            current.push(b'\'');
                            i += 2;
                        }
                        b'\'' => {
                            if i + 1 < line.len() && !line[i + 1].is_ascii_whitespace() {
                                return None;
                            }
                            i += 1;
                            in_single = false;
                            break;
                        }
                        c => {
                            current.push(c);
                            i += 1;
                        }
                    }
                } else {
                    if i >= line.len() || line[i].is_ascii_whitespace() {
                        break;
                    }
                    match line[i] {
                        b'"' if current.is_empty() => {
                            in_double = true;
                            i += 1;
                        }
                        b'\'' if current.is_empty() => {
                            in_single = true;
                            i += 1;
                        }
                        c => {
                            current.push(c);
                            i += 1;
                        }
                    }
                }
            }
            if in_double || in_single {
                return None;
            }
            tokens.push(current);
        }
        Some(tokens)
    }
}

fn hex_digit(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}

impl Deref for ByteString {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl AsRef<[u8]> for ByteString {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl Borrow<[u8]> for ByteString {
    fn borrow(&self) -> &[u8] {
        &self.buf
    }
}

impl From<&[u8]> for ByteString {
    fn from(bytes: &[u8]) -> Self {
        Self::from_slice(bytes)
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(buf: Vec<u8>) -> Self {
        Self { buf }
    }
}

impl From<&str> for ByteString {
    fn from(s: &str) -> Self {
        Self::from_slice(s.as_bytes())
    }
}

// Formatted construction goes through the standard macro:
// `ByteString::from(format!(...))`.
impl From<String> for ByteString {
    fn from(s: String) -> Self {
        Self { buf: s.into_bytes() }
    }
}

impl fmt::Debug for ByteString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::format::bytes(&self.buf))
    }
}
