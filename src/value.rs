//! The typed value object: a sum type over the five value types, each variant
//! itself a sum of its storage encodings. Creation favors the most compact
//! encoding; promotions convert upward and are never reversed.

use std::borrow::Cow;
use std::collections::VecDeque;
use std::fmt;
use std::sync::OnceLock;

use crate::ds::{parse_int, ByteString, Dict, IntSet, PackedEntry, PackedList, SkipList};

/// Longest string stored inline in the value header.
pub const INLINE_MAX: usize = 39;

/// Small non-negative integers below this bound format through a static
/// interning pool instead of allocating.
const SHARED_INT_MAX: i64 = 10_000;

static SHARED_INTS: OnceLock<Vec<ByteString>> = OnceLock::new();

/// The interned decimal representation of a small non-negative integer.
pub fn shared_int(v: i64) -> Option<&'static [u8]> {
    if !(0..SHARED_INT_MAX).contains(&v) {
        return None;
    }
    let pool = SHARED_INTS.get_or_init(|| (0..SHARED_INT_MAX).map(ByteString::from_int).collect());
    Some(pool[v as usize].as_slice())
}

/// The concrete storage layout a value currently uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Int,
    Inline,
    Raw,
    Packed,
    Linked,
    IntSet,
    HashTable,
    SkipList,
}

impl Encoding {
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Int => "int",
            Encoding::Inline => "inline",
            Encoding::Raw => "raw",
            Encoding::Packed => "packed",
            Encoding::Linked => "linked",
            Encoding::IntSet => "intset",
            Encoding::HashTable => "hashtable",
            Encoding::SkipList => "skiplist",
        }
    }
}

/// A short byte string co-located with the value header in one allocation.
#[derive(Clone, Copy)]
pub struct InlineStr {
    len: u8,
    data: [u8; INLINE_MAX],
}

impl InlineStr {
    fn new(bytes: &[u8]) -> Self {
        let mut data = [0; INLINE_MAX];
        data[..bytes.len()].copy_from_slice(bytes);
        Self { len: bytes.len() as u8, data }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }
}

impl fmt::Debug for InlineStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::format::bytes(self.as_slice()))
    }
}

/// String storage: a round-trip integer, a short inline buffer, or an
/// external raw buffer. Any mutation forces raw.
#[derive(Debug, Clone)]
pub enum Str {
    Int(i64),
    Inline(InlineStr),
    Raw(ByteString),
}

impl Str {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if let Some(v) = parse_int(bytes) {
            return Str::Int(v);
        }
        if bytes.len() <= INLINE_MAX {
            Str::Inline(InlineStr::new(bytes))
        } else {
            Str::Raw(ByteString::from_slice(bytes))
        }
    }

    pub fn from_int(v: i64) -> Self {
        Str::Int(v)
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Str::Int(_) => Encoding::Int,
            Str::Inline(_) => Encoding::Inline,
            Str::Raw(_) => Encoding::Raw,
        }
    }

    /// The content as bytes, formatting integers in decimal. Small integers
    /// borrow from the interning pool.
    pub fn bytes(&self) -> Cow<'_, [u8]> {
        match self {
            Str::Int(v) => match shared_int(*v) {
                Some(interned) => Cow::Borrowed(interned),
                None => Cow::Owned(v.to_string().into_bytes()),
            },
            Str::Inline(s) => Cow::Borrowed(s.as_slice()),
            Str::Raw(s) => Cow::Borrowed(s.as_slice()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Str::Int(v) => decimal_len(*v),
            Str::Inline(s) => s.as_slice().len(),
            Str::Raw(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The integer content, when integer-encoded or parseable.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Str::Int(v) => Some(*v),
            Str::Inline(s) => parse_int(s.as_slice()),
            Str::Raw(s) => parse_int(s.as_slice()),
        }
    }

    /// Converts to raw storage in place and hands out the buffer. Every
    /// mutating operation funnels through here.
    pub fn force_raw(&mut self) -> &mut ByteString {
        if !matches!(self, Str::Raw(_)) {
            let raw = ByteString::from_slice(&self.bytes());
            *self = Str::Raw(raw);
        }
        match self {
            Str::Raw(s) => s,
            _ => unreachable!(),
        }
    }
}

fn decimal_len(v: i64) -> usize {
    // Formatting allocates; counting digits does not.
    let mut len = if v < 0 { 1 } else { 0 };
    let mut v = v.unsigned_abs();
    loop {
        len += 1;
        v /= 10;
        if v == 0 {
            return len;
        }
    }
}

/// List storage: packed entries, or a double-ended queue of byte strings.
#[derive(Debug, Clone)]
pub enum List {
    Packed(PackedList),
    Linked(VecDeque<ByteString>),
}

impl List {
    pub fn new() -> Self {
        List::Packed(PackedList::new())
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            List::Packed(_) => Encoding::Packed,
            List::Linked(_) => Encoding::Linked,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            List::Packed(p) => p.len(),
            List::Linked(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Promotes packed storage to the linked encoding.
    pub fn convert_to_linked(&mut self) {
        if let List::Packed(p) = self {
            let deque = p.iter().map(|e| ByteString::from(e.to_vec())).collect();
            *self = List::Linked(deque);
        }
    }
}

/// Set storage: a sorted integer array, or a hash table of members.
#[derive(Debug, Clone)]
pub enum Set {
    Ints(IntSet),
    Table(Dict<ByteString, ()>),
}

impl Set {
    pub fn new() -> Self {
        Set::Ints(IntSet::new())
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Set::Ints(_) => Encoding::IntSet,
            Set::Table(_) => Encoding::HashTable,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Set::Ints(s) => s.len(),
            Set::Table(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        match self {
            Set::Ints(s) => parse_int(member).map_or(false, |v| s.contains(v)),
            Set::Table(d) => d.contains(member),
        }
    }

    /// Promotes the integer array to a hash table, pre-sized for `extra`
    /// further members.
    pub fn convert_to_table(&mut self, extra: usize) {
        if let Set::Ints(s) = self {
            let mut dict = Dict::new();
            dict.expand(s.len() + extra);
            for v in s.iter() {
                dict.insert(ByteString::from_int(v), ());
            }
            *self = Set::Table(dict);
        }
    }
}

/// The skip-list sorted set pairs the ordered index with a score table for
/// O(1) member score lookups.
#[derive(Debug, Clone)]
pub struct SkipSet {
    pub scores: Dict<ByteString, f64>,
    pub list: SkipList,
}

impl SkipSet {
    pub fn new() -> Self {
        Self { scores: Dict::new(), list: SkipList::new() }
    }
}

/// Sorted set storage: packed (element, score) pairs, or a skip list paired
/// with a score table.
#[derive(Debug, Clone)]
pub enum Zset {
    Packed(PackedList),
    Skip(SkipSet),
}

impl Zset {
    pub fn new() -> Self {
        Zset::Packed(PackedList::new())
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Zset::Packed(_) => Encoding::Packed,
            Zset::Skip(_) => Encoding::SkipList,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Zset::Packed(p) => p.len() / 2,
            Zset::Skip(s) => s.list.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Promotes the packed pairs to the skip-list encoding.
    pub fn convert_to_skip(&mut self) {
        if let Zset::Packed(p) = self {
            let mut skip = SkipSet::new();
            let mut entries = p.iter();
            while let (Some(ele), Some(score)) = (entries.next(), entries.next()) {
                let element = ByteString::from(ele.to_vec());
                let score = parse_double(&score.to_vec()).unwrap_or(0.0);
                skip.scores.insert(element.clone(), score);
                skip.list.insert(score, element);
            }
            *self = Zset::Skip(skip);
        }
    }
}

/// Hash storage: packed (field, value) pairs, or a hash table.
#[derive(Debug, Clone)]
pub enum Hash {
    Packed(PackedList),
    Table(Dict<ByteString, ByteString>),
}

impl Hash {
    pub fn new() -> Self {
        Hash::Packed(PackedList::new())
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Hash::Packed(_) => Encoding::Packed,
            Hash::Table(_) => Encoding::HashTable,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Hash::Packed(p) => p.len() / 2,
            Hash::Table(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Promotes the packed pairs to the hash-table encoding.
    pub fn convert_to_table(&mut self) {
        if let Hash::Packed(p) = self {
            let mut dict = Dict::new();
            dict.expand(p.len() / 2);
            let mut entries = p.iter();
            while let (Some(field), Some(value)) = (entries.next(), entries.next()) {
                dict.insert(ByteString::from(field.to_vec()), ByteString::from(value.to_vec()));
            }
            *self = Hash::Table(dict);
        }
    }
}

/// A typed value as held by the keyspace.
#[derive(Debug, Clone)]
pub enum Value {
    Str(Str),
    List(List),
    Set(Set),
    Zset(Zset),
    Hash(Hash),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Zset(_) => "zset",
            Value::Hash(_) => "hash",
        }
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            Value::Str(s) => s.encoding(),
            Value::List(l) => l.encoding(),
            Value::Set(s) => s.encoding(),
            Value::Zset(z) => z.encoding(),
            Value::Hash(h) => h.encoding(),
        }
    }
}

/// Formats a score so it parses back to the same double. Integral values in
/// the safe 2^52 range print as plain integers; very long expansions fall
/// back to scientific notation to keep the text bounded.
pub fn format_double(v: f64) -> Vec<u8> {
    const SAFE_MIN: f64 = -4503599627370495.0;
    const SAFE_MAX: f64 = 4503599627370496.0;
    if v > SAFE_MIN && v < SAFE_MAX && v == (v as i64) as f64 {
        return (v as i64).to_string().into_bytes();
    }
    let text = format!("{v}");
    if text.len() <= 24 {
        text.into_bytes()
    } else {
        format!("{v:e}").into_bytes()
    }
}

/// Parses a double from bytes, accepting the formats `format_double` emits
/// plus the usual decimal and scientific forms.
pub fn parse_double(bytes: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    text.parse::<f64>().ok()
}

/// Decodes a packed-list entry's score.
pub(crate) fn entry_score(entry: PackedEntry<'_>) -> Option<f64> {
    match entry {
        PackedEntry::Int(v) => Some(v as f64),
        PackedEntry::Bytes(b) => parse_double(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_encoding_selection() {
        assert_eq!(Str::from_bytes(b"42").encoding(), Encoding::Int);
        assert_eq!(Str::from_bytes(b"-7").encoding(), Encoding::Int);
        // Non-canonical integers stay strings.
        assert_eq!(Str::from_bytes(b"042").encoding(), Encoding::Inline);
        assert_eq!(Str::from_bytes(&[b'a'; 39]).encoding(), Encoding::Inline);
        assert_eq!(Str::from_bytes(&[b'a'; 40]).encoding(), Encoding::Raw);
    }

    #[test]
    fn test_string_bytes_round_trip() {
        for input in [&b"42"[..], b"hello", b"", b"-9223372036854775808"] {
            let s = Str::from_bytes(input);
            assert_eq!(&*s.bytes(), input);
            assert_eq!(s.len(), input.len());
        }
    }

    #[test]
    fn test_shared_int_pool() {
        let a = shared_int(99).expect("interned");
        let b = shared_int(99).expect("interned");
        assert_eq!(a.as_ptr(), b.as_ptr());
        assert_eq!(a, b"99");
        assert!(shared_int(-1).is_none());
        assert!(shared_int(10_000).is_none());

        // Integer strings in the pooled range borrow rather than allocate.
        let s = Str::from_int(123);
        assert!(matches!(s.bytes(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_mutation_forces_raw() {
        let mut s = Str::from_bytes(b"42");
        assert_eq!(s.encoding(), Encoding::Int);
        s.force_raw().append(b"x");
        assert_eq!(s.encoding(), Encoding::Raw);
        assert_eq!(&*s.bytes(), b"42x");
    }

    #[test]
    fn test_list_promotion() {
        let mut list = List::new();
        assert_eq!(list.encoding(), Encoding::Packed);
        if let List::Packed(p) = &mut list {
            p.push_tail(b"a");
            p.push_tail(b"b");
        }
        list.convert_to_linked();
        assert_eq!(list.encoding(), Encoding::Linked);
        assert_eq!(list.len(), 2);
        if let List::Linked(d) = &list {
            assert_eq!(&*d[0], b"a");
            assert_eq!(&*d[1], b"b");
        }
    }

    #[test]
    fn test_set_promotion_keeps_members() {
        let mut set = Set::new();
        if let Set::Ints(s) = &mut set {
            for v in [3, 1, 2] {
                s.insert(v);
            }
        }
        set.convert_to_table(0);
        assert_eq!(set.encoding(), Encoding::HashTable);
        assert_eq!(set.len(), 3);
        for m in [&b"1"[..], b"2", b"3"] {
            assert!(set.contains(m));
        }
    }

    #[test]
    fn test_zset_promotion_keeps_pairs() {
        let mut zset = Zset::new();
        if let Zset::Packed(p) = &mut zset {
            p.push_tail(b"a");
            p.push_tail(b"1.5");
            p.push_tail(b"b");
            p.push_tail(b"2");
        }
        assert_eq!(zset.len(), 2);
        zset.convert_to_skip();
        assert_eq!(zset.encoding(), Encoding::SkipList);
        if let Zset::Skip(s) = &zset {
            assert_eq!(s.scores.get(&b"a"[..]), Some(&1.5));
            assert_eq!(s.scores.get(&b"b"[..]), Some(&2.0));
            assert_eq!(s.list.rank(1.5, b"a"), Some(1));
        }
    }

    #[test]
    fn test_hash_promotion_keeps_fields() {
        let mut hash = Hash::new();
        if let Hash::Packed(p) = &mut hash {
            p.push_tail(b"f1");
            p.push_tail(b"v1");
            p.push_tail(b"f2");
            p.push_tail(b"v2");
        }
        assert_eq!(hash.len(), 2);
        hash.convert_to_table();
        assert_eq!(hash.encoding(), Encoding::HashTable);
        if let Hash::Table(d) = &hash {
            assert_eq!(d.get(&b"f1"[..]).map(|v| v.as_slice()), Some(&b"v1"[..]));
            assert_eq!(d.get(&b"f2"[..]).map(|v| v.as_slice()), Some(&b"v2"[..]));
        }
    }

    #[test]
    fn test_format_double() {
        assert_eq!(format_double(3.0), b"3".to_vec());
        assert_eq!(format_double(-7.0), b"-7".to_vec());
        assert_eq!(format_double(1.5), b"1.5".to_vec());
        for v in [3.0, 1.5, -0.125, 1e300, 4.9e-300, 12345.6789] {
            let text = format_double(v);
            assert!(text.len() <= 252, "length-prefixed record must fit");
            assert_eq!(parse_double(&text), Some(v), "round trip of {v}");
        }
    }
}
