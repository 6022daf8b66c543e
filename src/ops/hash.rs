use crate::db::Db;
use crate::ds::{parse_int, ByteString, PackedList};
use crate::errinput;
use crate::error::{Error, Result};
use crate::server::Server;
use crate::value::{parse_double, Hash, Value};

fn as_hash(value: &Value) -> Result<&Hash> {
    match value {
        Value::Hash(h) => Ok(h),
        _ => Err(Error::WrongType),
    }
}

fn as_hash_mut(value: &mut Value) -> Result<&mut Hash> {
    match value {
        Value::Hash(h) => Ok(h),
        _ => Err(Error::WrongType),
    }
}

/// Materializes an empty hash under the compact encoding when absent.
fn hash_for_write<'a>(db: &'a mut Db, key: &[u8]) -> Result<&'a mut Hash> {
    if !db.contains(key) {
        db.add(key, Value::Hash(Hash::new()));
    }
    as_hash_mut(db.lookup_write(key).unwrap())
}

/// Finds a field's entry offset in packed storage. Fields sit at even
/// positions, so the scan strides over values.
fn packed_field(p: &PackedList, field: &[u8]) -> Option<usize> {
    p.find(field, 1)
}

fn packed_value(p: &PackedList, field: &[u8]) -> Option<Vec<u8>> {
    let at = packed_field(p, field)?;
    let value_at = p.next(at)?;
    Some(p.get(value_at).to_vec())
}

/// Sets a field in packed storage; reports whether the field is new.
fn packed_set(p: &mut PackedList, field: &[u8], value: &[u8]) -> bool {
    match packed_field(p, field) {
        Some(at) => {
            let value_at = p.next(at).expect("packed hash holds pairs");
            match p.delete(value_at) {
                Some(next) => p.insert_before(next, value),
                None => p.push_tail(value),
            }
            false
        }
        None => {
            p.push_tail(field);
            p.push_tail(value);
            true
        }
    }
}

/// Removes a field and its value from packed storage.
fn packed_delete(p: &mut PackedList, field: &[u8]) -> bool {
    match packed_field(p, field) {
        Some(at) => {
            p.delete(at);
            // The value entry has shifted into the field's offset.
            p.delete(at);
            true
        }
        None => false,
    }
}

impl Server {
    /// Sets a field, creating the hash when absent; reports whether the
    /// field is new. Long fields or values promote the encoding before the
    /// write, judged from this call's arguments only; deletions never
    /// re-encode downward.
    pub fn hset(&mut self, db: usize, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        let max_entries = self.config.hash_max_packed_entries;
        let max_value = self.config.hash_max_packed_value;
        let db = self.db_mut(db)?;
        let hash = hash_for_write(db, key)?;
        if matches!(&*hash, Hash::Packed(_)) && (field.len() > max_value || value.len() > max_value)
        {
            hash.convert_to_table();
        }
        let added = match hash {
            Hash::Packed(p) => packed_set(p, field, value),
            Hash::Table(d) => d
                .insert(ByteString::from_slice(field), ByteString::from_slice(value))
                .is_none(),
        };
        let over = matches!(&*hash, Hash::Packed(p) if p.len() / 2 > max_entries);
        if over {
            hash.convert_to_table();
        }
        self.dirty += 1;
        Ok(added)
    }

    /// Sets a field only if absent; reports whether it was set.
    pub fn hsetnx(&mut self, db: usize, key: &[u8], field: &[u8], value: &[u8]) -> Result<bool> {
        if self.hexists(db, key, field)? {
            return Ok(false);
        }
        self.hset(db, key, field, value)?;
        Ok(true)
    }

    pub fn hget(&mut self, db: usize, key: &[u8], field: &[u8]) -> Result<Option<Vec<u8>>> {
        let db = self.db_mut(db)?;
        match db.lookup_read(key) {
            None => Ok(None),
            Some(value) => Ok(match as_hash(value)? {
                Hash::Packed(p) => packed_value(p, field),
                Hash::Table(d) => d.get(field).map(|v| v.as_slice().to_vec()),
            }),
        }
    }

    /// Deletes fields; returns how many existed. An emptied hash drops its
    /// key.
    pub fn hdel(&mut self, db: usize, key: &[u8], fields: &[&[u8]]) -> Result<usize> {
        let db = self.db_mut(db)?;
        let Some(value) = db.lookup_write(key) else {
            return Ok(0);
        };
        let hash = as_hash_mut(value)?;
        let mut removed = 0;
        for field in fields {
            let gone = match hash {
                Hash::Packed(p) => packed_delete(p, field),
                Hash::Table(d) => d.remove(*field).is_some(),
            };
            if gone {
                removed += 1;
            }
        }
        let drained = hash.is_empty();
        if drained {
            db.remove(key);
        }
        self.dirty += removed as u64;
        Ok(removed)
    }

    pub fn hexists(&mut self, db: usize, key: &[u8], field: &[u8]) -> Result<bool> {
        let db = self.db_mut(db)?;
        match db.lookup_read(key) {
            None => Ok(false),
            Some(value) => Ok(match as_hash(value)? {
                Hash::Packed(p) => packed_field(p, field).is_some(),
                Hash::Table(d) => d.contains(field),
            }),
        }
    }

    /// Field count; absent keys report 0.
    pub fn hlen(&mut self, db: usize, key: &[u8]) -> Result<usize> {
        let db = self.db_mut(db)?;
        match db.lookup_read(key) {
            None => Ok(0),
            Some(value) => Ok(as_hash(value)?.len()),
        }
    }

    pub fn hgetall(&mut self, db: usize, key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let db = self.db_mut(db)?;
        match db.lookup_read(key) {
            None => Ok(Vec::new()),
            Some(value) => Ok(match as_hash(value)? {
                Hash::Packed(p) => {
                    let mut out = Vec::with_capacity(p.len() / 2);
                    let mut entries = p.iter();
                    while let (Some(f), Some(v)) = (entries.next(), entries.next()) {
                        out.push((f.to_vec(), v.to_vec()));
                    }
                    out
                }
                Hash::Table(d) => d
                    .iter()
                    .map(|(f, v)| (f.as_slice().to_vec(), v.as_slice().to_vec()))
                    .collect(),
            }),
        }
    }

    pub fn hkeys(&mut self, db: usize, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self.hgetall(db, key)?.into_iter().map(|(f, _)| f).collect())
    }

    pub fn hvals(&mut self, db: usize, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self.hgetall(db, key)?.into_iter().map(|(_, v)| v).collect())
    }

    /// Adds a signed delta to a field's integer value, creating it at 0 when
    /// absent. Fails on non-integer content or overflow.
    pub fn hincrby(&mut self, db: usize, key: &[u8], field: &[u8], delta: i64) -> Result<i64> {
        let current = match self.hget(db, key, field)? {
            None => 0,
            Some(bytes) => parse_int(&bytes)
                .ok_or_else(|| Error::InvalidInput("hash value is not an integer".into()))?,
        };
        let Some(next) = current.checked_add(delta) else {
            return errinput!("increment or decrement would overflow");
        };
        self.hset(db, key, field, next.to_string().as_bytes())?;
        Ok(next)
    }

    /// Adds a float delta to a field's value, creating it at 0 when absent.
    /// Stores and returns the formatted result. The formatted form is what a
    /// downstream log must record, so replicas never re-run the addition.
    pub fn hincrbyfloat(
        &mut self,
        db: usize,
        key: &[u8],
        field: &[u8],
        delta: f64,
    ) -> Result<Vec<u8>> {
        let current = match self.hget(db, key, field)? {
            None => 0.0,
            Some(bytes) => parse_double(&bytes)
                .ok_or_else(|| Error::InvalidInput("hash value is not a float".into()))?,
        };
        let next = current + delta;
        if next.is_nan() || next.is_infinite() {
            return errinput!("increment would produce NaN or Infinity");
        }
        let formatted = format_float_fixed(next);
        self.hset(db, key, field, &formatted)?;
        Ok(formatted)
    }
}

/// Fixed-notation float formatting with trailing zeros trimmed, so repeated
/// increments keep a stable, parseable text form.
fn format_float_fixed(v: f64) -> Vec<u8> {
    let mut text = format!("{v:.17}");
    if text.contains('.') {
        while text.ends_with('0') {
            text.pop();
        }
        if text.ends_with('.') {
            text.pop();
        }
    }
    text.into_bytes()
}
