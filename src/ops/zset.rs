use crate::ds::{ByteString, PackedList};
use crate::errinput;
use crate::error::{Error, Result};
use crate::server::Server;
use crate::value::{entry_score, format_double, Value, Zset};

pub use crate::ds::skiplist::ScoreRange;

fn as_zset(value: &Value) -> Result<&Zset> {
    match value {
        Value::Zset(z) => Ok(z),
        _ => Err(Error::WrongType),
    }
}

fn as_zset_mut(value: &mut Value) -> Result<&mut Zset> {
    match value {
        Value::Zset(z) => Ok(z),
        _ => Err(Error::WrongType),
    }
}

/// Decodes a packed sorted set into its (element, score) pairs, which the
/// layout keeps ordered by (score, element).
fn packed_pairs(p: &PackedList) -> Vec<(Vec<u8>, f64)> {
    let mut out = Vec::with_capacity(p.len() / 2);
    let mut entries = p.iter();
    while let (Some(ele), Some(score)) = (entries.next(), entries.next()) {
        out.push((ele.to_vec(), entry_score(score).unwrap_or(0.0)));
    }
    out
}

/// Finds an element's entry offset and score in a packed sorted set.
fn packed_find(p: &PackedList, element: &[u8]) -> Option<(usize, f64)> {
    let mut at = p.head();
    while let Some(ele_at) = at {
        let score_at = p.next(ele_at)?;
        if p.get(ele_at).to_vec() == element {
            return Some((ele_at, entry_score(p.get(score_at))?));
        }
        at = p.next(score_at);
    }
    None
}

/// Inserts (element, score) at its ordered position in a packed sorted set.
/// The element must not already be present.
fn packed_insert(p: &mut PackedList, element: &[u8], score: f64) {
    let score_bytes = format_double(score);
    let mut at = p.head();
    while let Some(ele_at) = at {
        let score_at = p.next(ele_at).expect("packed zset holds pairs");
        let existing = entry_score(p.get(score_at)).unwrap_or(0.0);
        let after = existing > score
            || (existing == score && p.get(ele_at).to_vec().as_slice() > element);
        if after {
            // Insert both entries ahead of this pair: score first so the
            // element lands in front of it.
            p.insert_before(ele_at, &score_bytes);
            p.insert_before(ele_at, element);
            return;
        }
        at = p.next(score_at);
    }
    p.push_tail(element);
    p.push_tail(&score_bytes);
}

/// Removes the pair whose element entry sits at `ele_at`.
fn packed_delete(p: &mut PackedList, ele_at: usize) {
    p.delete(ele_at);
    // The score entry has shifted into the element's offset.
    p.delete(ele_at);
}

/// Rebuilds a packed sorted set from ordered pairs, used by the range
/// removal operations.
fn packed_from_pairs(pairs: &[(Vec<u8>, f64)]) -> PackedList {
    let mut p = PackedList::new();
    for (ele, score) in pairs {
        p.push_tail(ele);
        p.push_tail(&format_double(*score));
    }
    p
}

/// Clamps signed inclusive rank bounds to `[0, len)`.
fn clamp_ranks(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
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
    /// Adds or updates scored members; returns how many were newly added.
    pub fn zadd(&mut self, db: usize, key: &[u8], pairs: &[(f64, &[u8])]) -> Result<usize> {
        for (score, _) in pairs {
            if score.is_nan() {
                return errinput!("score is not a valid float");
            }
        }
        let max_entries = self.config.zset_max_packed_entries;
        let max_value = self.config.zset_max_packed_value;
        let db = self.db_mut(db)?;
        if !db.contains(key) {
            let initial = if max_entries == 0
                || pairs.iter().any(|(_, e)| e.len() > max_value)
            {
                Zset::Skip(crate::value::SkipSet::new())
            } else {
                Zset::new()
            };
            db.add(key, Value::Zset(initial));
        }
        let zset = as_zset_mut(db.lookup_write(key).unwrap())?;
        let mut added = 0;
        let mut changed = 0;
        for (score, element) in pairs {
            if matches!(&*zset, Zset::Packed(_)) && element.len() > max_value {
                zset.convert_to_skip();
            }
            match zset {
                Zset::Packed(p) => {
                    match packed_find(p, element) {
                        Some((at, current)) => {
                            if current != *score {
                                packed_delete(p, at);
                                packed_insert(p, element, *score);
                                changed += 1;
                            }
                        }
                        None => {
                            packed_insert(p, element, *score);
                            added += 1;
                        }
                    }
                }
                Zset::Skip(s) => {
                    let element = ByteString::from_slice(element);
                    match s.scores.get(element.as_slice()).copied() {
                        Some(current) => {
                            if current != *score {
                                s.list.update_score(current, &element, *score);
                                s.scores.insert(element, *score);
                                changed += 1;
                            }
                        }
                        None => {
                            s.scores.insert(element.clone(), *score);
                            s.list.insert(*score, element);
                            added += 1;
                        }
                    }
                }
            }
            let over = matches!(&*zset, Zset::Packed(p) if p.len() / 2 > max_entries);
            if over {
                zset.convert_to_skip();
            }
        }
        let drained = zset.is_empty();
        if drained {
            db.remove(key);
        }
        self.dirty += (added + changed) as u64;
        Ok(added)
    }

    /// Adds a delta to a member's score, creating it at the delta when
    /// absent. Returns the new score.
    pub fn zincrby(&mut self, db: usize, key: &[u8], delta: f64, element: &[u8]) -> Result<f64> {
        if delta.is_nan() {
            return errinput!("increment is not a valid float");
        }
        let current = self.zscore(db, key, element)?.unwrap_or(0.0);
        let next = current + delta;
        if next.is_nan() {
            return errinput!("resulting score is not a number");
        }
        self.zadd(db, key, &[(next, element)])?;
        Ok(next)
    }

    pub fn zscore(&mut self, db: usize, key: &[u8], element: &[u8]) -> Result<Option<f64>> {
        let db = self.db_mut(db)?;
        match db.lookup_read(key) {
            None => Ok(None),
            Some(value) => Ok(match as_zset(value)? {
                Zset::Packed(p) => packed_find(p, element).map(|(_, s)| s),
                Zset::Skip(s) => s.scores.get(element).copied(),
            }),
        }
    }

    /// Cardinality; absent keys report 0.
    pub fn zcard(&mut self, db: usize, key: &[u8]) -> Result<usize> {
        let db = self.db_mut(db)?;
        match db.lookup_read(key) {
            None => Ok(0),
            Some(value) => Ok(as_zset(value)?.len()),
        }
    }

    /// Removes members; returns how many existed. An emptied set drops its
    /// key.
    pub fn zrem(&mut self, db: usize, key: &[u8], elements: &[&[u8]]) -> Result<usize> {
        let db = self.db_mut(db)?;
        let Some(value) = db.lookup_write(key) else {
            return Ok(0);
        };
        let zset = as_zset_mut(value)?;
        let mut removed = 0;
        for element in elements {
            let gone = match zset {
                Zset::Packed(p) => match packed_find(p, element) {
                    Some((at, _)) => {
                        packed_delete(p, at);
                        true
                    }
                    None => false,
                },
                Zset::Skip(s) => match s.scores.remove(*element) {
                    Some(score) => {
                        s.list.delete(score, element);
                        true
                    }
                    None => false,
                },
            };
            if gone {
                removed += 1;
            }
        }
        let drained = zset.is_empty();
        if drained {
            db.remove(key);
        }
        self.dirty += removed as u64;
        Ok(removed)
    }

    /// 0-based rank in ascending order.
    pub fn zrank(&mut self, db: usize, key: &[u8], element: &[u8]) -> Result<Option<usize>> {
        let db = self.db_mut(db)?;
        match db.lookup_read(key) {
            None => Ok(None),
            Some(value) => Ok(match as_zset(value)? {
                Zset::Packed(p) => packed_pairs(p)
                    .iter()
                    .position(|(e, _)| e.as_slice() == element),
                Zset::Skip(s) => {
                    let score = s.scores.get(element).copied();
                    score.and_then(|score| s.list.rank(score, element)).map(|r| r - 1)
                }
            }),
        }
    }

    /// 0-based rank in descending order.
    pub fn zrevrank(&mut self, db: usize, key: &[u8], element: &[u8]) -> Result<Option<usize>> {
        let len = self.zcard(db, key)?;
        Ok(self.zrank(db, key, element)?.map(|r| len - 1 - r))
    }

    /// Members with scores in the signed inclusive rank range, ascending.
    pub fn zrange(
        &mut self,
        db: usize,
        key: &[u8],
        start: i64,
        stop: i64,
    ) -> Result<Vec<(Vec<u8>, f64)>> {
        let db = self.db_mut(db)?;
        let Some(value) = db.lookup_read(key) else {
            return Ok(Vec::new());
        };
        let zset = as_zset(value)?;
        let Some((start, stop)) = clamp_ranks(zset.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(match zset {
            Zset::Packed(p) => packed_pairs(p)[start..=stop].to_vec(),
            Zset::Skip(s) => s
                .list
                .iter_from_rank(start + 1)
                .take(stop - start + 1)
                .map(|(e, score)| (e.as_slice().to_vec(), score))
                .collect(),
        })
    }

    /// Members whose scores fall in the range, ascending; score ties order
    /// lexicographically.
    pub fn zrangebyscore(
        &mut self,
        db: usize,
        key: &[u8],
        range: ScoreRange,
    ) -> Result<Vec<(Vec<u8>, f64)>> {
        let db = self.db_mut(db)?;
        let Some(value) = db.lookup_read(key) else {
            return Ok(Vec::new());
        };
        Ok(match as_zset(value)? {
            Zset::Packed(p) => packed_pairs(p)
                .into_iter()
                .filter(|(_, s)| range.contains(*s))
                .collect(),
            Zset::Skip(s) => s
                .list
                .iter_range(range)
                .map(|(e, score)| (e.as_slice().to_vec(), score))
                .collect(),
        })
    }

    /// Count of members with scores in the range.
    pub fn zcount(&mut self, db: usize, key: &[u8], range: ScoreRange) -> Result<usize> {
        Ok(self.zrangebyscore(db, key, range)?.len())
    }

    /// Removes members with scores in the range; returns how many.
    pub fn zremrangebyscore(&mut self, db: usize, key: &[u8], range: ScoreRange) -> Result<usize> {
        let db = self.db_mut(db)?;
        let Some(value) = db.lookup_write(key) else {
            return Ok(0);
        };
        let zset = as_zset_mut(value)?;
        let removed = match zset {
            Zset::Packed(p) => {
                let pairs = packed_pairs(p);
                let kept: Vec<_> =
                    pairs.iter().filter(|(_, s)| !range.contains(*s)).cloned().collect();
                let removed = pairs.len() - kept.len();
                *p = packed_from_pairs(&kept);
                removed
            }
            Zset::Skip(s) => {
                let removed = s.list.delete_range_by_score(range);
                for (element, _) in &removed {
                    s.scores.remove(element.as_slice());
                }
                removed.len()
            }
        };
        let drained = zset.is_empty();
        if drained {
            db.remove(key);
        }
        self.dirty += removed as u64;
        Ok(removed)
    }

    /// Removes members in the signed inclusive rank range; returns how many.
    pub fn zremrangebyrank(&mut self, db: usize, key: &[u8], start: i64, stop: i64) -> Result<usize> {
        let db = self.db_mut(db)?;
        let Some(value) = db.lookup_write(key) else {
            return Ok(0);
        };
        let zset = as_zset_mut(value)?;
        let Some((start, stop)) = clamp_ranks(zset.len(), start, stop) else {
            return Ok(0);
        };
        let removed = match zset {
            Zset::Packed(p) => {
                let pairs = packed_pairs(p);
                let mut kept = pairs.clone();
                kept.drain(start..=stop);
                *p = packed_from_pairs(&kept);
                pairs.len() - kept.len()
            }
            Zset::Skip(s) => {
                let removed = s.list.delete_range_by_rank(start + 1, stop + 1);
                for (element, _) in &removed {
                    s.scores.remove(element.as_slice());
                }
                removed.len()
            }
        };
        let drained = zset.is_empty();
        if drained {
            db.remove(key);
        }
        self.dirty += removed as u64;
        Ok(removed)
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

    fn names(pairs: &[(Vec<u8>, f64)]) -> Vec<Vec<u8>> {
        pairs.iter().map(|(e, _)| e.clone()).collect()
    }

    #[test]
    fn test_zadd_orders_by_score_then_element() {
        let mut srv = server();
        let added = srv
            .zadd(0, b"z", &[(1.0, b"a"), (2.0, b"c"), (2.0, b"b")])
            .expect("zadd");
        assert_eq!(added, 3);
        assert_eq!(encoding(&mut srv, b"z"), Encoding::Packed);
        let all = srv.zrange(0, b"z", 0, -1).expect("zrange");
        assert_eq!(names(&all), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_zadd_updates_score() {
        let mut srv = server();
        srv.zadd(0, b"z", &[(1.0, b"a"), (2.0, b"b")]).expect("zadd");
        assert_eq!(srv.zadd(0, b"z", &[(9.0, b"a")]).expect("zadd"), 0);
        assert_eq!(srv.zscore(0, b"z", b"a").expect("zscore"), Some(9.0));
        let all = srv.zrange(0, b"z", 0, -1).expect("zrange");
        assert_eq!(names(&all), vec![b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_nan_score_rejected() {
        let mut srv = server();
        assert!(srv.zadd(0, b"z", &[(f64::NAN, b"a")]).is_err());
        let db = srv.db_mut(0).expect("db");
        assert!(!db.contains(b"z"));
    }

    #[test]
    fn test_promotion_by_count() {
        let mut srv = server();
        srv.config = Config::default().zset_max_packed_entries(4);
        for i in 0..4 {
            srv.zadd(0, b"z", &[(i as f64, format!("e{i}").as_bytes())]).expect("zadd");
        }
        assert_eq!(encoding(&mut srv, b"z"), Encoding::Packed);
        srv.zadd(0, b"z", &[(9.0, b"e9")]).expect("zadd");
        assert_eq!(encoding(&mut srv, b"z"), Encoding::SkipList);
        assert_eq!(srv.zcard(0, b"z").expect("zcard"), 5);
        // Order survives the promotion.
        let all = srv.zrange(0, b"z", 0, -1).expect("zrange");
        assert_eq!(names(&all)[0], b"e0".to_vec());
        assert_eq!(names(&all)[4], b"e9".to_vec());
    }

    #[test]
    fn test_promotion_by_element_size() {
        let mut srv = server();
        srv.zadd(0, b"z", &[(1.0, b"short")]).expect("zadd");
        assert_eq!(encoding(&mut srv, b"z"), Encoding::Packed);
        let long = vec![b'x'; 65];
        srv.zadd(0, b"z", &[(2.0, &long)]).expect("zadd");
        assert_eq!(encoding(&mut srv, b"z"), Encoding::SkipList);
        assert_eq!(srv.zscore(0, b"z", &long).expect("zscore"), Some(2.0));
    }

    #[test]
    fn test_zrangebyscore_with_ties() {
        let mut srv = server();
        srv.zadd(0, b"z", &[(1.0, b"a"), (2.0, b"b"), (2.0, b"c")]).expect("zadd");
        let got = srv
            .zrangebyscore(0, b"z", ScoreRange::inclusive(2.0, 2.0))
            .expect("zrangebyscore");
        assert_eq!(names(&got), vec![b"b".to_vec(), b"c".to_vec()]);

        let exclusive = ScoreRange { min: 1.0, max: 2.0, min_exclusive: true, max_exclusive: false };
        let got = srv.zrangebyscore(0, b"z", exclusive).expect("zrangebyscore");
        assert_eq!(names(&got), vec![b"b".to_vec(), b"c".to_vec()]);

        assert_eq!(srv.zcount(0, b"z", ScoreRange::inclusive(2.0, 2.0)).expect("zcount"), 2);
    }

    #[test]
    fn test_zrank() {
        let mut srv = server();
        srv.zadd(0, b"z", &[(1.0, b"a"), (2.0, b"b"), (3.0, b"c")]).expect("zadd");
        assert_eq!(srv.zrank(0, b"z", b"a").expect("zrank"), Some(0));
        assert_eq!(srv.zrank(0, b"z", b"c").expect("zrank"), Some(2));
        assert_eq!(srv.zrevrank(0, b"z", b"c").expect("zrevrank"), Some(0));
        assert_eq!(srv.zrank(0, b"z", b"missing").expect("zrank"), None);

        // Also correct under the skip-list encoding.
        srv.config = Config::default().zset_max_packed_entries(1);
        srv.zadd(0, b"big", &[(1.0, b"a"), (2.0, b"b")]).expect("zadd");
        assert_eq!(encoding(&mut srv, b"big"), Encoding::SkipList);
        assert_eq!(srv.zrank(0, b"big", b"b").expect("zrank"), Some(1));
    }

    #[test]
    fn test_zrem_and_drain() {
        let mut srv = server();
        srv.zadd(0, b"z", &[(1.0, b"a"), (2.0, b"b")]).expect("zadd");
        assert_eq!(srv.zrem(0, b"z", &[b"a", b"missing"]).expect("zrem"), 1);
        assert_eq!(srv.zrem(0, b"z", &[b"b"]).expect("zrem"), 1);
        let db = srv.db_mut(0).expect("db");
        assert!(!db.contains(b"z"));
    }

    #[test]
    fn test_zincrby() {
        let mut srv = server();
        assert_eq!(srv.zincrby(0, b"z", 2.5, b"a").expect("zincrby"), 2.5);
        assert_eq!(srv.zincrby(0, b"z", -1.0, b"a").expect("zincrby"), 1.5);
        assert_eq!(srv.zscore(0, b"z", b"a").expect("zscore"), Some(1.5));

        srv.zadd(0, b"inf", &[(f64::INFINITY, b"x")]).expect("zadd");
        assert!(srv.zincrby(0, b"inf", f64::NEG_INFINITY, b"x").is_err());
    }

    #[test]
    fn test_zremrange() {
        let mut srv = server();
        srv.zadd(0, b"z", &[(1.0, b"a"), (2.0, b"b"), (3.0, b"c"), (4.0, b"d")]).expect("zadd");
        assert_eq!(
            srv.zremrangebyscore(0, b"z", ScoreRange::inclusive(2.0, 3.0)).expect("remove"),
            2
        );
        assert_eq!(names(&srv.zrange(0, b"z", 0, -1).expect("zrange")), vec![b"a".to_vec(), b"d".to_vec()]);

        assert_eq!(srv.zremrangebyrank(0, b"z", 0, 0).expect("remove"), 1);
        assert_eq!(names(&srv.zrange(0, b"z", 0, -1).expect("zrange")), vec![b"d".to_vec()]);

        assert_eq!(srv.zremrangebyrank(0, b"z", 0, -1).expect("remove"), 1);
        let db = srv.db_mut(0).expect("db");
        assert!(!db.contains(b"z"));
    }

    #[test]
    fn test_skiplist_range_operations() {
        let mut srv = server();
        srv.config = Config::default().zset_max_packed_entries(2);
        for i in 0..10 {
            srv.zadd(0, b"z", &[(i as f64, format!("e{i}").as_bytes())]).expect("zadd");
        }
        assert_eq!(encoding(&mut srv, b"z"), Encoding::SkipList);
        assert_eq!(
            srv.zremrangebyscore(0, b"z", ScoreRange::inclusive(0.0, 4.0)).expect("remove"),
            5
        );
        assert_eq!(srv.zcard(0, b"z").expect("zcard"), 5);
        assert_eq!(srv.zremrangebyrank(0, b"z", 0, 2).expect("remove"), 3);
        assert_eq!(names(&srv.zrange(0, b"z", 0, -1).expect("zrange")), vec![b"e8".to_vec(), b"e9".to_vec()]);
    }
}
