use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::ds::{ByteString, Dict};
use crate::error::{Error, Result};
use crate::value::Value;

/// Wall clock in milliseconds since the epoch, the unit of every expiration
/// deadline.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One logical database: the keyspace plus a parallel table of absolute
/// millisecond deadlines for the keys that carry a TTL.
///
/// Invariant: every key in `expires` is present in `keys`. Reads and writes
/// pass through lazy expiration, so a key whose deadline has passed is
/// removed and reported absent on first touch.
#[derive(Debug, Clone)]
pub struct Db {
    keys: Dict<ByteString, Value>,
    expires: Dict<ByteString, i64>,
}

impl Db {
    pub fn new() -> Self {
        Self { keys: Dict::new(), expires: Dict::new() }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Removes the key if its deadline has passed; reports whether it did.
    fn expire_if_needed(&mut self, key: &[u8]) -> bool {
        let Some(&deadline) = self.expires.get(key) else {
            return false;
        };
        if now_ms() < deadline {
            return false;
        }
        // Deletions from passive expiry carry no notification here; the
        // dispatcher layer owns eventing.
        self.expires.remove(key);
        self.keys.remove(key);
        tracing::debug!(key = %crate::format::bytes(key), "lazily expired key");
        true
    }

    pub fn lookup_read(&mut self, key: &[u8]) -> Option<&Value> {
        self.expire_if_needed(key);
        self.keys.get(key)
    }

    /// Reads without lazy expiry, so multiple values can be borrowed at once
    /// after a [`contains`](Db::contains) pass has expired the stale ones.
    pub(crate) fn peek(&self, key: &[u8]) -> Option<&Value> {
        self.keys.get(key)
    }

    pub fn lookup_write(&mut self, key: &[u8]) -> Option<&mut Value> {
        self.expire_if_needed(key);
        self.keys.get_mut(key)
    }

    pub fn contains(&mut self, key: &[u8]) -> bool {
        self.expire_if_needed(key);
        self.keys.contains(key)
    }

    /// Sets the key, replacing any existing value and dropping any TTL.
    pub fn set(&mut self, key: &[u8], value: Value) {
        self.keys.insert(ByteString::from_slice(key), value);
        self.expires.remove(key);
    }

    /// Replaces a key's value in place, keeping any TTL. Used by operations
    /// that compute a new value from the old one rather than assign fresh
    /// content.
    pub fn overwrite(&mut self, key: &[u8], value: Value) {
        self.keys.insert(ByteString::from_slice(key), value);
    }

    /// Adds the key only if absent; reports whether it was added.
    pub fn add(&mut self, key: &[u8], value: Value) -> bool {
        self.expire_if_needed(key);
        self.keys.add(ByteString::from_slice(key), value)
    }

    /// Removes the key and its expiration entry; reports whether it existed.
    pub fn remove(&mut self, key: &[u8]) -> bool {
        self.expires.remove(key);
        self.keys.remove(key).is_some()
    }

    /// Renames a key, carrying its value and TTL. Replaces any value at the
    /// destination.
    pub fn rename(&mut self, from: &[u8], to: &[u8]) -> Result<()> {
        self.expire_if_needed(from);
        let Some(value) = self.keys.remove(from) else {
            return Err(Error::NotFound);
        };
        let deadline = self.expires.remove(from);
        self.set(to, value);
        if let Some(at) = deadline {
            self.expires.insert(ByteString::from_slice(to), at);
        }
        Ok(())
    }

    /// Attaches an absolute millisecond deadline; reports false when the key
    /// is absent.
    pub fn set_expire(&mut self, key: &[u8], deadline_ms: i64) -> bool {
        if !self.contains(key) {
            return false;
        }
        self.expires.insert(ByteString::from_slice(key), deadline_ms);
        true
    }

    /// The key's deadline, if it has one and has not already lapsed.
    pub fn get_expire(&mut self, key: &[u8]) -> Option<i64> {
        self.expire_if_needed(key);
        self.expires.get(key).copied()
    }

    /// Drops the key's TTL; reports whether one was removed.
    pub fn persist(&mut self, key: &[u8]) -> bool {
        self.expire_if_needed(key);
        self.expires.remove(key).is_some()
    }

    /// An approximately uniform random live key. Expired keys found along
    /// the way are removed, so the loop always terminates.
    pub fn random_key<R: Rng>(&mut self, rng: &mut R) -> Option<ByteString> {
        loop {
            let key = self.keys.random_entry(rng)?.0.clone();
            if self.expire_if_needed(&key) {
                continue;
            }
            return Some(key);
        }
    }

    pub fn clear(&mut self) {
        self.keys = Dict::new();
        self.expires = Dict::new();
    }

    /// Iterates every key/value pair without triggering expiry; the snapshot
    /// writer filters lapsed keys itself.
    pub fn iter(&self) -> impl Iterator<Item = (&ByteString, &Value)> {
        self.keys.iter()
    }

    /// The recorded deadline without lazy expiry, for the snapshot writer.
    pub fn deadline(&self, key: &[u8]) -> Option<i64> {
        self.expires.get(key).copied()
    }

    /// Pre-sizes the keyspace ahead of a bulk load.
    pub fn reserve(&mut self, keys: usize) {
        self.keys.expand(keys);
    }

    /// Inserts a loaded key with an optional deadline, bypassing lazy expiry.
    pub(crate) fn restore(&mut self, key: ByteString, value: Value, deadline_ms: Option<i64>) {
        if let Some(at) = deadline_ms {
            self.expires.insert(key.clone(), at);
        }
        self.keys.insert(key, value);
    }

    /// Checks the expirations-subset-of-keyspace invariant, for tests and
    /// debug assertions.
    #[cfg(test)]
    fn check_expire_invariant(&self) {
        for (key, _) in self.expires.iter() {
            assert!(self.keys.contains(key.as_slice()), "expires key missing from keyspace");
        }
    }
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Str;

    fn string_value(text: &str) -> Value {
        Value::Str(Str::from_bytes(text.as_bytes()))
    }

    #[test]
    fn test_set_get_remove() {
        let mut db = Db::new();
        db.set(b"k", string_value("v"));
        assert!(db.lookup_read(b"k").is_some());
        assert!(db.contains(b"k"));
        assert!(db.remove(b"k"));
        assert!(!db.remove(b"k"));
        assert!(db.lookup_read(b"k").is_none());
    }

    #[test]
    fn test_add_if_absent() {
        let mut db = Db::new();
        assert!(db.add(b"k", string_value("a")));
        assert!(!db.add(b"k", string_value("b")));
    }

    #[test]
    fn test_set_clears_ttl() {
        let mut db = Db::new();
        db.set(b"k", string_value("v"));
        assert!(db.set_expire(b"k", now_ms() + 10_000));
        assert!(db.get_expire(b"k").is_some());
        db.set(b"k", string_value("v2"));
        assert_eq!(db.get_expire(b"k"), None);
        db.check_expire_invariant();
    }

    #[test]
    fn test_lazy_expiry() {
        let mut db = Db::new();
        db.set(b"gone", string_value("v"));
        db.set_expire(b"gone", now_ms() - 1);
        assert!(db.lookup_read(b"gone").is_none());
        assert_eq!(db.len(), 0);
        db.check_expire_invariant();
    }

    #[test]
    fn test_expire_on_missing_key() {
        let mut db = Db::new();
        assert!(!db.set_expire(b"nope", now_ms() + 1000));
        assert_eq!(db.get_expire(b"nope"), None);
    }

    #[test]
    fn test_persist() {
        let mut db = Db::new();
        db.set(b"k", string_value("v"));
        db.set_expire(b"k", now_ms() + 10_000);
        assert!(db.persist(b"k"));
        assert!(!db.persist(b"k"));
        assert_eq!(db.get_expire(b"k"), None);
        db.check_expire_invariant();
    }

    #[test]
    fn test_rename_carries_ttl() {
        let mut db = Db::new();
        db.set(b"a", string_value("v"));
        let deadline = now_ms() + 60_000;
        db.set_expire(b"a", deadline);
        db.rename(b"a", b"b").expect("rename");
        assert!(db.lookup_read(b"a").is_none());
        assert!(db.lookup_read(b"b").is_some());
        assert_eq!(db.get_expire(b"b"), Some(deadline));
        db.check_expire_invariant();

        assert_eq!(db.rename(b"missing", b"c"), Err(Error::NotFound));
    }

    #[test]
    fn test_rename_replaces_destination() {
        let mut db = Db::new();
        db.set(b"a", string_value("from"));
        db.set(b"b", string_value("to"));
        db.set_expire(b"b", now_ms() + 60_000);
        db.rename(b"a", b"b").expect("rename");
        // The destination took the source's (absent) TTL.
        assert_eq!(db.get_expire(b"b"), None);
        let value = db.lookup_read(b"b").expect("value");
        match value {
            Value::Str(s) => assert_eq!(&*s.bytes(), b"from"),
            other => panic!("wrong type {}", other.type_name()),
        }
    }

    #[test]
    fn test_random_key_skips_expired() {
        let mut db = Db::new();
        db.set(b"live", string_value("v"));
        db.set(b"dead", string_value("v"));
        db.set_expire(b"dead", now_ms() - 1);
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            if let Some(key) = db.random_key(&mut rng) {
                assert_eq!(&*key, b"live");
            }
        }
        assert!(db.random_key(&mut rng).is_some());
        assert_eq!(db.len(), 1);
    }
}
