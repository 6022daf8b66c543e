use crate::error::{Error, Result};
use crate::errinput;
use crate::server::Server;
use crate::value::{Str, Value};

fn as_str(value: &Value) -> Result<&Str> {
    match value {
        Value::Str(s) => Ok(s),
        _ => Err(Error::WrongType),
    }
}

impl Server {
    /// Sets the key to a string value, replacing any existing value of any
    /// type and clearing any TTL.
    pub fn set(&mut self, db: usize, key: &[u8], value: &[u8]) -> Result<()> {
        let db = self.db_mut(db)?;
        db.set(key, Value::Str(Str::from_bytes(value)));
        self.dirty += 1;
        Ok(())
    }

    /// Sets the key only if absent; reports whether it was set.
    pub fn set_if_absent(&mut self, db: usize, key: &[u8], value: &[u8]) -> Result<bool> {
        let db = self.db_mut(db)?;
        let added = db.add(key, Value::Str(Str::from_bytes(value)));
        if added {
            self.dirty += 1;
        }
        Ok(added)
    }

    pub fn get(&mut self, db: usize, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let db = self.db_mut(db)?;
        match db.lookup_read(key) {
            None => Ok(None),
            Some(value) => Ok(Some(as_str(value)?.bytes().into_owned())),
        }
    }

    /// Appends bytes to the string, creating it when absent; returns the new
    /// length. Appending forces raw encoding.
    pub fn append(&mut self, db: usize, key: &[u8], suffix: &[u8]) -> Result<usize> {
        let db = self.db_mut(db)?;
        let len = match db.lookup_write(key) {
            Some(Value::Str(s)) => {
                let raw = s.force_raw();
                raw.append(suffix);
                raw.len()
            }
            Some(_) => return Err(Error::WrongType),
            None => {
                db.set(key, Value::Str(Str::from_bytes(suffix)));
                suffix.len()
            }
        };
        self.dirty += 1;
        Ok(len)
    }

    /// String length; absent keys report 0.
    pub fn strlen(&mut self, db: usize, key: &[u8]) -> Result<usize> {
        let db = self.db_mut(db)?;
        match db.lookup_read(key) {
            None => Ok(0),
            Some(value) => Ok(as_str(value)?.len()),
        }
    }

    /// Substring by inclusive indices, negatives counted from the end.
    pub fn getrange(&mut self, db: usize, key: &[u8], start: i64, end: i64) -> Result<Vec<u8>> {
        let db = self.db_mut(db)?;
        match db.lookup_read(key) {
            None => Ok(Vec::new()),
            Some(value) => {
                let s = as_str(value)?;
                let buf = crate::ds::ByteString::from_slice(&s.bytes());
                Ok(buf.range(start, end).into_vec())
            }
        }
    }

    /// Adds a signed delta to the integer value of the key, creating it at 0
    /// when absent. Fails on non-integer content or overflow.
    pub fn incr_by(&mut self, db: usize, key: &[u8], delta: i64) -> Result<i64> {
        let db = self.db_mut(db)?;
        let current = match db.lookup_read(key) {
            None => 0,
            Some(value) => as_str(value)?
                .as_int()
                .ok_or_else(|| Error::InvalidInput("value is not an integer".into()))?,
        };
        let Some(next) = current.checked_add(delta) else {
            return errinput!("increment or decrement would overflow");
        };
        // In-place overwrite: an existing TTL survives the increment.
        db.overwrite(key, Value::Str(Str::from_int(next)));
        self.dirty += 1;
        Ok(next)
    }

    pub fn decr_by(&mut self, db: usize, key: &[u8], delta: i64) -> Result<i64> {
        let Some(neg) = delta.checked_neg() else {
            return errinput!("increment or decrement would overflow");
        };
        self.incr_by(db, key, neg)
    }
}
