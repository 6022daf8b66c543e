use std::collections::VecDeque;

use crate::db::Db;
use crate::ds::ByteString;
use crate::error::{Error, Result};
use crate::server::Server;
use crate::value::{List, Value};

/// Where LINSERT places the new element relative to the pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertWhere {
    Before,
    After,
}

fn as_list(value: &Value) -> Result<&List> {
    match value {
        Value::List(l) => Ok(l),
        _ => Err(Error::WrongType),
    }
}

fn as_list_mut(value: &mut Value) -> Result<&mut List> {
    match value {
        Value::List(l) => Ok(l),
        _ => Err(Error::WrongType),
    }
}

/// Materializes an empty list under the compact encoding when absent.
fn list_for_write<'a>(db: &'a mut Db, key: &[u8]) -> Result<&'a mut List> {
    if !db.contains(key) {
        db.add(key, Value::List(List::new()));
    }
    as_list_mut(db.lookup_write(key).unwrap())
}

/// Converts packed storage once an element or the entry count crosses the
/// configured thresholds.
fn promote_if_needed(list: &mut List, element_len: usize, max_entries: usize, max_value: usize) {
    if let List::Packed(p) = list {
        if element_len > max_value || p.len() >= max_entries {
            list.convert_to_linked();
        }
    }
}

/// Clamps a signed inclusive range to `[0, len)`, empty when out of order.
fn clamp_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if start > stop || start >= len || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

impl Server {
    /// Prepends values, creating the list when absent; returns the new length.
    pub fn lpush(&mut self, db: usize, key: &[u8], values: &[&[u8]]) -> Result<usize> {
        self.push(db, key, values, true)
    }

    /// Appends values, creating the list when absent; returns the new length.
    pub fn rpush(&mut self, db: usize, key: &[u8], values: &[&[u8]]) -> Result<usize> {
        self.push(db, key, values, false)
    }

    fn push(&mut self, db: usize, key: &[u8], values: &[&[u8]], head: bool) -> Result<usize> {
        let max_entries = self.config.list_max_packed_entries;
        let max_value = self.config.list_max_packed_value;
        let db = self.db_mut(db)?;
        let list = list_for_write(db, key)?;
        for value in values {
            promote_if_needed(list, value.len(), max_entries, max_value);
            match list {
                List::Packed(p) => {
                    if head {
                        p.push_head(value);
                    } else {
                        p.push_tail(value);
                    }
                }
                List::Linked(d) => {
                    if head {
                        d.push_front(ByteString::from_slice(value));
                    } else {
                        d.push_back(ByteString::from_slice(value));
                    }
                }
            }
        }
        let len = list.len();
        self.dirty += values.len() as u64;
        Ok(len)
    }

    pub fn lpop(&mut self, db: usize, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.pop(db, key, true)
    }

    pub fn rpop(&mut self, db: usize, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.pop(db, key, false)
    }

    fn pop(&mut self, db: usize, key: &[u8], head: bool) -> Result<Option<Vec<u8>>> {
        let db = self.db_mut(db)?;
        let Some(value) = db.lookup_write(key) else {
            return Ok(None);
        };
        let list = as_list_mut(value)?;
        let popped = match list {
            List::Packed(p) => {
                let at = if head { p.head() } else { p.tail_entry() };
                at.map(|at| {
                    let out = p.get(at).to_vec();
                    p.delete(at);
                    out
                })
            }
            List::Linked(d) => {
                let out = if head { d.pop_front() } else { d.pop_back() };
                out.map(ByteString::into_vec)
            }
        };
        let drained = list.is_empty();
        if drained {
            db.remove(key);
        }
        if popped.is_some() {
            self.dirty += 1;
        }
        Ok(popped)
    }

    /// List length; absent keys report 0.
    pub fn llen(&mut self, db: usize, key: &[u8]) -> Result<usize> {
        let db = self.db_mut(db)?;
        match db.lookup_read(key) {
            None => Ok(0),
            Some(value) => Ok(as_list(value)?.len()),
        }
    }

    /// Element at a signed index, negatives from the tail.
    pub fn lindex(&mut self, db: usize, key: &[u8], index: i64) -> Result<Option<Vec<u8>>> {
        let db = self.db_mut(db)?;
        let Some(value) = db.lookup_read(key) else {
            return Ok(None);
        };
        let list = as_list(value)?;
        Ok(match list {
            List::Packed(p) => p.index(index).map(|at| p.get(at).to_vec()),
            List::Linked(d) => deque_index(d, index).map(|i| d[i].as_slice().to_vec()),
        })
    }

    /// Replaces the element at the index; errors when the key is absent or
    /// the index is out of range.
    pub fn lset(&mut self, db: usize, key: &[u8], index: i64, value: &[u8]) -> Result<()> {
        let max_entries = self.config.list_max_packed_entries;
        let max_value = self.config.list_max_packed_value;
        let db = self.db_mut(db)?;
        let Some(existing) = db.lookup_write(key) else {
            return Err(Error::NotFound);
        };
        let list = as_list_mut(existing)?;
        promote_if_needed(list, value.len(), max_entries, max_value);
        match list {
            List::Packed(p) => {
                let Some(at) = p.index(index) else {
                    return Err(Error::InvalidInput("index out of range".into()));
                };
                let next = p.delete(at);
                match next {
                    Some(next) => p.insert_before(next, value),
                    None => p.push_tail(value),
                }
            }
            List::Linked(d) => {
                let Some(i) = deque_index(d, index) else {
                    return Err(Error::InvalidInput("index out of range".into()));
                };
                d[i] = ByteString::from_slice(value);
            }
        }
        self.dirty += 1;
        Ok(())
    }

    /// Elements in the signed inclusive range.
    pub fn lrange(&mut self, db: usize, key: &[u8], start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let db = self.db_mut(db)?;
        let Some(value) = db.lookup_read(key) else {
            return Ok(Vec::new());
        };
        let list = as_list(value)?;
        let Some((start, stop)) = clamp_range(list.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(match list {
            List::Packed(p) => {
                let mut out = Vec::with_capacity(stop - start + 1);
                let mut at = p.index(start as i64);
                for _ in start..=stop {
                    let Some(pos) = at else { break };
                    out.push(p.get(pos).to_vec());
                    at = p.next(pos);
                }
                out
            }
            List::Linked(d) => d
                .iter()
                .skip(start)
                .take(stop - start + 1)
                .map(|e| e.as_slice().to_vec())
                .collect(),
        })
    }

    /// Removes up to `count` occurrences of `value`: from the head when
    /// positive, the tail when negative, all when zero. Returns the number
    /// removed.
    pub fn lrem(&mut self, db: usize, key: &[u8], count: i64, value: &[u8]) -> Result<usize> {
        let db = self.db_mut(db)?;
        let Some(existing) = db.lookup_write(key) else {
            return Ok(0);
        };
        let list = as_list_mut(existing)?;
        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
        let from_tail = count < 0;
        let mut removed = 0;
        match list {
            List::Packed(p) => {
                let mut at = if from_tail { p.tail_entry() } else { p.head() };
                while let Some(pos) = at {
                    if removed >= limit {
                        break;
                    }
                    let matches = p.get(pos).to_vec() == value;
                    if matches {
                        if from_tail {
                            let prev = p.prev(pos);
                            p.delete(pos);
                            at = prev;
                        } else {
                            at = p.delete(pos);
                        }
                        removed += 1;
                    } else {
                        at = if from_tail { p.prev(pos) } else { p.next(pos) };
                    }
                }
            }
            List::Linked(d) => {
                let mut kept = VecDeque::with_capacity(d.len());
                if from_tail {
                    while let Some(e) = d.pop_back() {
                        if removed < limit && e.as_slice() == value {
                            removed += 1;
                        } else {
                            kept.push_front(e);
                        }
                    }
                } else {
                    while let Some(e) = d.pop_front() {
                        if removed < limit && e.as_slice() == value {
                            removed += 1;
                        } else {
                            kept.push_back(e);
                        }
                    }
                }
                *d = kept;
            }
        }
        let drained = list.is_empty();
        if drained {
            db.remove(key);
        }
        self.dirty += removed as u64;
        Ok(removed)
    }

    /// Inserts a value before or after the first occurrence of the pivot.
    /// Returns the new length, or None when the pivot is absent.
    pub fn linsert(
        &mut self,
        db: usize,
        key: &[u8],
        place: InsertWhere,
        pivot: &[u8],
        value: &[u8],
    ) -> Result<Option<usize>> {
        let max_entries = self.config.list_max_packed_entries;
        let max_value = self.config.list_max_packed_value;
        let db = self.db_mut(db)?;
        let Some(existing) = db.lookup_write(key) else {
            return Ok(None);
        };
        let list = as_list_mut(existing)?;
        promote_if_needed(list, value.len(), max_entries, max_value);
        let inserted = match list {
            List::Packed(p) => match p.find(pivot, 0) {
                Some(at) => {
                    match place {
                        InsertWhere::Before => p.insert_before(at, value),
                        InsertWhere::After => match p.next(at) {
                            Some(next) => p.insert_before(next, value),
                            None => p.push_tail(value),
                        },
                    }
                    true
                }
                None => false,
            },
            List::Linked(d) => match d.iter().position(|e| e.as_slice() == pivot) {
                Some(i) => {
                    let at = match place {
                        InsertWhere::Before => i,
                        InsertWhere::After => i + 1,
                    };
                    d.insert(at, ByteString::from_slice(value));
                    true
                }
                None => false,
            },
        };
        if !inserted {
            return Ok(None);
        }
        let len = list.len();
        self.dirty += 1;
        Ok(Some(len))
    }

    /// Trims the list to the signed inclusive range, removing everything
    /// outside it. An empty result removes the key.
    pub fn ltrim(&mut self, db: usize, key: &[u8], start: i64, stop: i64) -> Result<()> {
        let db = self.db_mut(db)?;
        let Some(existing) = db.lookup_write(key) else {
            return Ok(());
        };
        let list = as_list_mut(existing)?;
        let len = list.len();
        match clamp_range(len, start, stop) {
            None => {
                db.remove(key);
            }
            Some((start, stop)) => {
                match list {
                    List::Packed(p) => {
                        p.delete_range(stop as i64 + 1, len - stop - 1);
                        p.delete_range(0, start);
                    }
                    List::Linked(d) => {
                        d.truncate(stop + 1);
                        d.drain(..start);
                    }
                }
                if list.is_empty() {
                    db.remove(key);
                }
            }
        }
        self.dirty += 1;
        Ok(())
    }
}

fn deque_index(d: &VecDeque<ByteString>, index: i64) -> Option<usize> {
    let len = d.len() as i64;
    let i = if index < 0 { len + index } else { index };
    if i < 0 || i >= len {
        None
    } else {
        Some(i as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::value::Encoding;

    fn server() -> Server {
        Server::new(Config::default())
    }

    fn encoding(srv: &mut Server, key: &[u8]) -> Encoding {
        let db = srv.db_mut(0).expect("db");
        db.lookup_read(key).expect("value").encoding()
    }

    #[test]
    fn test_push_pop_both_ends() {
        let mut srv = server();
        assert_eq!(srv.rpush(0, b"l", &[b"b", b"c"]).expect("rpush"), 2);
        assert_eq!(srv.lpush(0, b"l", &[b"a"]).expect("lpush"), 3);
        assert_eq!(srv.lrange(0, b"l", 0, -1).expect("range"), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(srv.lpop(0, b"l").expect("lpop"), Some(b"a".to_vec()));
        assert_eq!(srv.rpop(0, b"l").expect("rpop"), Some(b"c".to_vec()));
        assert_eq!(srv.llen(0, b"l").expect("llen"), 1);
    }

    #[test]
    fn test_pop_drains_key() {
        let mut srv = server();
        srv.rpush(0, b"l", &[b"only"]).expect("rpush");
        assert_eq!(srv.lpop(0, b"l").expect("lpop"), Some(b"only".to_vec()));
        assert_eq!(srv.lpop(0, b"l").expect("lpop"), None);
        let db = srv.db_mut(0).expect("db");
        assert!(!db.contains(b"l"));
    }

    #[test]
    fn test_promotion_by_count() {
        let mut srv = server();
        let values: Vec<Vec<u8>> = (0..600).map(|i| format!("v{i}").into_bytes()).collect();
        let refs: Vec<&[u8]> = values.iter().map(|v| v.as_slice()).collect();
        srv.rpush(0, b"l", &refs).expect("rpush");
        assert_eq!(encoding(&mut srv, b"l"), Encoding::Linked);
        assert_eq!(srv.llen(0, b"l").expect("llen"), 600);
        assert_eq!(srv.lindex(0, b"l", 599).expect("lindex"), Some(b"v599".to_vec()));
    }

    #[test]
    fn test_promotion_by_element_size() {
        let mut srv = server();
        srv.rpush(0, b"l", &[b"short"]).expect("rpush");
        assert_eq!(encoding(&mut srv, b"l"), Encoding::Packed);
        let long = vec![b'x'; 65];
        srv.rpush(0, b"l", &[&long]).expect("rpush");
        assert_eq!(encoding(&mut srv, b"l"), Encoding::Linked);
        assert_eq!(srv.lindex(0, b"l", 1).expect("lindex"), Some(long));
    }

    #[test]
    fn test_lset_and_lindex() {
        let mut srv = server();
        srv.rpush(0, b"l", &[b"a", b"b", b"c"]).expect("rpush");
        srv.lset(0, b"l", 1, b"B").expect("lset");
        srv.lset(0, b"l", -1, b"C").expect("lset");
        assert_eq!(srv.lrange(0, b"l", 0, -1).expect("range"), vec![b"a".to_vec(), b"B".to_vec(), b"C".to_vec()]);
        assert!(srv.lset(0, b"l", 5, b"x").is_err());
        assert_eq!(srv.lset(0, b"missing", 0, b"x"), Err(Error::NotFound));
    }

    #[test]
    fn test_lrem() {
        let mut srv = server();
        srv.rpush(0, b"l", &[b"x", b"a", b"x", b"b", b"x"]).expect("rpush");
        assert_eq!(srv.lrem(0, b"l", 2, b"x").expect("lrem"), 2);
        assert_eq!(srv.lrange(0, b"l", 0, -1).expect("range"), vec![b"a".to_vec(), b"b".to_vec(), b"x".to_vec()]);

        srv.rpush(0, b"l2", &[b"x", b"a", b"x"]).expect("rpush");
        assert_eq!(srv.lrem(0, b"l2", -1, b"x").expect("lrem"), 1);
        assert_eq!(srv.lrange(0, b"l2", 0, -1).expect("range"), vec![b"x".to_vec(), b"a".to_vec()]);

        assert_eq!(srv.lrem(0, b"l2", 0, b"x").expect("lrem"), 1);
        assert_eq!(srv.lrem(0, b"missing", 0, b"x").expect("lrem"), 0);
    }

    #[test]
    fn test_linsert() {
        let mut srv = server();
        srv.rpush(0, b"l", &[b"a", b"c"]).expect("rpush");
        assert_eq!(
            srv.linsert(0, b"l", InsertWhere::Before, b"c", b"b").expect("linsert"),
            Some(3)
        );
        assert_eq!(
            srv.linsert(0, b"l", InsertWhere::After, b"c", b"d").expect("linsert"),
            Some(4)
        );
        assert_eq!(srv.linsert(0, b"l", InsertWhere::Before, b"zz", b"x").expect("linsert"), None);
        assert_eq!(
            srv.lrange(0, b"l", 0, -1).expect("range"),
            vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]
        );
    }

    #[test]
    fn test_ltrim() {
        let mut srv = server();
        srv.rpush(0, b"l", &[b"a", b"b", b"c", b"d", b"e"]).expect("rpush");
        srv.ltrim(0, b"l", 1, 3).expect("ltrim");
        assert_eq!(srv.lrange(0, b"l", 0, -1).expect("range"), vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);

        srv.ltrim(0, b"l", 5, 10).expect("ltrim");
        let db = srv.db_mut(0).expect("db");
        assert!(!db.contains(b"l"));
    }

    #[test]
    fn test_lrange_boundaries() {
        let mut srv = server();
        srv.rpush(0, b"l", &[b"a", b"b", b"c"]).expect("rpush");
        assert_eq!(srv.lrange(0, b"l", -100, 100).expect("range").len(), 3);
        assert_eq!(srv.lrange(0, b"l", 2, 1).expect("range"), Vec::<Vec<u8>>::new());
        assert_eq!(srv.lrange(0, b"missing", 0, -1).expect("range"), Vec::<Vec<u8>>::new());
    }
}
