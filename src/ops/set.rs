use std::collections::HashSet;

use rand::Rng;

use crate::db::Db;
use crate::ds::{parse_int, ByteString};
use crate::error::{Error, Result};
use crate::server::Server;
use crate::value::{Set, Value};

/// A set member in its canonical form: integers stay integers so the
/// integer-array fast paths apply, everything else is bytes. The strict
/// parser guarantees the two forms never alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Member {
    Int(i64),
    Bytes(Vec<u8>),
}

impl Member {
    fn from_bytes(bytes: &[u8]) -> Self {
        match parse_int(bytes) {
            Some(v) => Member::Int(v),
            None => Member::Bytes(bytes.to_vec()),
        }
    }

    fn into_vec(self) -> Vec<u8> {
        match self {
            Member::Int(v) => v.to_string().into_bytes(),
            Member::Bytes(b) => b,
        }
    }
}

fn as_set(value: &Value) -> Result<&Set> {
    match value {
        Value::Set(s) => Ok(s),
        _ => Err(Error::WrongType),
    }
}

fn as_set_mut(value: &mut Value) -> Result<&mut Set> {
    match value {
        Value::Set(s) => Ok(s),
        _ => Err(Error::WrongType),
    }
}

fn members_of(set: &Set) -> Vec<Member> {
    match set {
        Set::Ints(is) => is.iter().map(Member::Int).collect(),
        Set::Table(d) => d.keys().map(|k| Member::from_bytes(k)).collect(),
    }
}

fn set_has(set: &Set, member: &Member) -> bool {
    match (set, member) {
        (Set::Ints(is), Member::Int(v)) => is.contains(*v),
        // A non-integer member can never live in an integer array.
        (Set::Ints(_), Member::Bytes(_)) => false,
        (Set::Table(d), Member::Int(v)) => d.contains(v.to_string().as_bytes()),
        (Set::Table(d), Member::Bytes(b)) => d.contains(b.as_slice()),
    }
}

/// Builds a result set under the smallest admissible encoding.
fn build_set(members: Vec<Member>, max_intset: usize) -> Set {
    let all_ints = members.iter().all(|m| matches!(m, Member::Int(_)));
    if all_ints && members.len() <= max_intset {
        let mut is = crate::ds::IntSet::new();
        for m in &members {
            if let Member::Int(v) = m {
                is.insert(*v);
            }
        }
        Set::Ints(is)
    } else {
        let mut d = crate::ds::Dict::new();
        d.expand(members.len());
        for m in members {
            d.insert(ByteString::from(m.into_vec()), ());
        }
        Set::Table(d)
    }
}

fn random_member<R: Rng>(set: &Set, rng: &mut R) -> Option<Vec<u8>> {
    match set {
        Set::Ints(is) => is.random(rng).map(|v| v.to_string().into_bytes()),
        Set::Table(d) => d.random_entry(rng).map(|(k, _)| k.as_slice().to_vec()),
    }
}

/// Resolves every input key to its set, erroring on wrong types. Absent keys
/// resolve to None.
fn gather_sets<'a>(db: &'a mut Db, keys: &[&[u8]]) -> Result<Vec<Option<&'a Set>>> {
    for key in keys {
        db.contains(key);
    }
    // Expiry is settled; downgrade to shared access so every set can be
    // borrowed at once.
    let db: &'a Db = db;
    let mut sets = Vec::with_capacity(keys.len());
    for key in keys {
        match db.peek(key) {
            None => sets.push(None),
            Some(value) => sets.push(Some(as_set(value)?)),
        }
    }
    Ok(sets)
}

impl Server {
    /// Adds members, creating the set when absent; returns how many were new.
    pub fn sadd(&mut self, db: usize, key: &[u8], members: &[&[u8]]) -> Result<usize> {
        let max_intset = self.config.set_max_intset_entries;
        let db = self.db_mut(db)?;
        if !db.contains(key) {
            // The first member picks the initial encoding.
            let initial = match members.first() {
                Some(m) if parse_int(m).is_some() => Set::new(),
                _ => Set::Table(crate::ds::Dict::new()),
            };
            db.add(key, Value::Set(initial));
        }
        let set = as_set_mut(db.lookup_write(key).unwrap())?;
        let mut added = 0;
        for member in members {
            if matches!(&*set, Set::Ints(_)) && parse_int(member).is_none() {
                set.convert_to_table(members.len());
            }
            match set {
                Set::Ints(is) => {
                    if is.insert(parse_int(member).unwrap()) {
                        added += 1;
                    }
                }
                Set::Table(d) => {
                    if d.add(ByteString::from_slice(member), ()) {
                        added += 1;
                    }
                }
            }
            let over = matches!(&*set, Set::Ints(is) if is.len() > max_intset);
            if over {
                set.convert_to_table(0);
            }
        }
        let drained = set.is_empty();
        if drained {
            db.remove(key);
        }
        self.dirty += added as u64;
        Ok(added)
    }

    /// Removes members; returns how many were present. An emptied set drops
    /// its key.
    pub fn srem(&mut self, db: usize, key: &[u8], members: &[&[u8]]) -> Result<usize> {
        let db = self.db_mut(db)?;
        let Some(value) = db.lookup_write(key) else {
            return Ok(0);
        };
        let set = as_set_mut(value)?;
        let mut removed = 0;
        for member in members {
            let gone = match set {
                Set::Ints(is) => parse_int(member).map_or(false, |v| is.remove(v)),
                Set::Table(d) => d.remove(*member).is_some(),
            };
            if gone {
                removed += 1;
            }
        }
        let drained = set.is_empty();
        if drained {
            db.remove(key);
        }
        self.dirty += removed as u64;
        Ok(removed)
    }

    pub fn sismember(&mut self, db: usize, key: &[u8], member: &[u8]) -> Result<bool> {
        let db = self.db_mut(db)?;
        match db.lookup_read(key) {
            None => Ok(false),
            Some(value) => Ok(as_set(value)?.contains(member)),
        }
    }

    /// Cardinality; absent keys report 0.
    pub fn scard(&mut self, db: usize, key: &[u8]) -> Result<usize> {
        let db = self.db_mut(db)?;
        match db.lookup_read(key) {
            None => Ok(0),
            Some(value) => Ok(as_set(value)?.len()),
        }
    }

    pub fn smembers(&mut self, db: usize, key: &[u8]) -> Result<Vec<Vec<u8>>> {
        let db = self.db_mut(db)?;
        match db.lookup_read(key) {
            None => Ok(Vec::new()),
            Some(value) => {
                let set = as_set(value)?;
                Ok(members_of(set).into_iter().map(Member::into_vec).collect())
            }
        }
    }

    /// Removes and returns a random member. An emptied set drops its key.
    pub fn spop(&mut self, db: usize, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let db = self.db_mut(db)?;
        let Some(value) = db.lookup_write(key) else {
            return Ok(None);
        };
        let set = as_set_mut(value)?;
        let mut rng = rand::thread_rng();
        let Some(member) = random_member(set, &mut rng) else {
            return Ok(None);
        };
        match set {
            Set::Ints(is) => {
                is.remove(parse_int(&member).unwrap());
            }
            Set::Table(d) => {
                d.remove(member.as_slice());
            }
        }
        let drained = set.is_empty();
        if drained {
            db.remove(key);
        }
        self.dirty += 1;
        Ok(Some(member))
    }

    /// One random member without removal.
    pub fn srandmember(&mut self, db: usize, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let db = self.db_mut(db)?;
        match db.lookup_read(key) {
            None => Ok(None),
            Some(value) => {
                let set = as_set(value)?;
                Ok(random_member(set, &mut rand::thread_rng()))
            }
        }
    }

    /// Random members under the count contract: negative counts sample with
    /// replacement, a count covering the set returns everything, and the two
    /// positive sub-cases pick the cheaper of remove-down-to-n and
    /// draw-until-n-distinct.
    pub fn srandmember_count(&mut self, db: usize, key: &[u8], count: i64) -> Result<Vec<Vec<u8>>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let db = self.db_mut(db)?;
        let Some(value) = db.lookup_read(key) else {
            return Ok(Vec::new());
        };
        let set = as_set(value)?;
        let size = set.len();
        let mut rng = rand::thread_rng();

        if count < 0 {
            let n = count.unsigned_abs() as usize;
            let mut out = Vec::with_capacity(n);
            for _ in 0..n {
                if let Some(m) = random_member(set, &mut rng) {
                    out.push(m);
                }
            }
            return Ok(out);
        }

        let count = count as usize;
        if count >= size {
            return Ok(members_of(set).into_iter().map(Member::into_vec).collect());
        }

        if count * 3 > size {
            // Close to the full set: copy everything and evict random
            // members until the requested count remains.
            let mut working: Vec<Member> = members_of(set);
            while working.len() > count {
                let i = rng.gen_range(0..working.len());
                working.swap_remove(i);
            }
            Ok(working.into_iter().map(Member::into_vec).collect())
        } else {
            // Far from the full set: draw until enough distinct members.
            let mut picked: HashSet<Vec<u8>> = HashSet::with_capacity(count);
            while picked.len() < count {
                if let Some(m) = random_member(set, &mut rng) {
                    picked.insert(m);
                }
            }
            Ok(picked.into_iter().collect())
        }
    }

    /// Intersection of the named sets. Any absent key empties the result.
    pub fn sinter(&mut self, db: usize, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        let db = self.db_mut(db)?;
        Ok(intersect(db, keys)?.into_iter().map(Member::into_vec).collect())
    }

    /// Stores the intersection at `dest`, returning its cardinality. An
    /// empty result removes `dest`.
    pub fn sinterstore(&mut self, db: usize, dest: &[u8], keys: &[&[u8]]) -> Result<usize> {
        let max_intset = self.config.set_max_intset_entries;
        let db = self.db_mut(db)?;
        let members = intersect(db, keys)?;
        let cardinality = store_result(db, dest, members, max_intset);
        self.dirty += 1;
        Ok(cardinality)
    }

    /// Union of the named sets; absent keys contribute nothing.
    pub fn sunion(&mut self, db: usize, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        let db = self.db_mut(db)?;
        Ok(union(db, keys)?.into_iter().map(Member::into_vec).collect())
    }

    pub fn sunionstore(&mut self, db: usize, dest: &[u8], keys: &[&[u8]]) -> Result<usize> {
        let max_intset = self.config.set_max_intset_entries;
        let db = self.db_mut(db)?;
        let members = union(db, keys)?;
        let cardinality = store_result(db, dest, members, max_intset);
        self.dirty += 1;
        Ok(cardinality)
    }

    /// Difference of the first set minus the rest.
    pub fn sdiff(&mut self, db: usize, keys: &[&[u8]]) -> Result<Vec<Vec<u8>>> {
        let db = self.db_mut(db)?;
        Ok(difference(db, keys)?.into_iter().map(Member::into_vec).collect())
    }

    pub fn sdiffstore(&mut self, db: usize, dest: &[u8], keys: &[&[u8]]) -> Result<usize> {
        let max_intset = self.config.set_max_intset_entries;
        let db = self.db_mut(db)?;
        let members = difference(db, keys)?;
        let cardinality = store_result(db, dest, members, max_intset);
        self.dirty += 1;
        Ok(cardinality)
    }
}

fn store_result(db: &mut Db, dest: &[u8], members: Vec<Member>, max_intset: usize) -> usize {
    let cardinality = members.len();
    if cardinality == 0 {
        db.remove(dest);
    } else {
        db.set(dest, Value::Set(build_set(members, max_intset)));
    }
    cardinality
}

fn intersect(db: &mut Db, keys: &[&[u8]]) -> Result<Vec<Member>> {
    let sets = gather_sets(db, keys)?;
    let mut sets: Vec<&Set> = match sets.into_iter().collect::<Option<Vec<_>>>() {
        Some(sets) if !sets.is_empty() => sets,
        // Intersecting with a missing set yields nothing.
        _ => return Ok(Vec::new()),
    };
    // Iterate the smallest set and probe the others.
    sets.sort_by_key(|s| s.len());
    let (smallest, rest) = sets.split_first().unwrap();
    let mut out = Vec::new();
    'members: for member in members_of(smallest) {
        for other in rest {
            if !set_has(other, &member) {
                continue 'members;
            }
        }
        out.push(member);
    }
    Ok(out)
}

fn union(db: &mut Db, keys: &[&[u8]]) -> Result<Vec<Member>> {
    let sets = gather_sets(db, keys)?;
    let mut seen: HashSet<Member> = HashSet::new();
    let mut out = Vec::new();
    for set in sets.into_iter().flatten() {
        for member in members_of(set) {
            if seen.insert(member.clone()) {
                out.push(member);
            }
        }
    }
    Ok(out)
}

fn difference(db: &mut Db, keys: &[&[u8]]) -> Result<Vec<Member>> {
    let sets = gather_sets(db, keys)?;
    let Some(first) = sets.first().copied().flatten() else {
        return Ok(Vec::new());
    };

    // Pick between iterate-and-probe, costed |first| * k / 2, and
    // copy-then-remove, costed by the total input size.
    let probe_cost = first.len() * keys.len() / 2;
    let copy_cost: usize = sets.iter().flatten().map(|s| s.len()).sum();

    if probe_cost <= copy_cost {
        let mut out = Vec::new();
        'members: for member in members_of(first) {
            for other in sets[1..].iter().flatten() {
                if set_has(other, &member) {
                    continue 'members;
                }
            }
            out.push(member);
        }
        Ok(out)
    } else {
        let mut working: HashSet<Member> = members_of(first).into_iter().collect();
        for other in sets[1..].iter().flatten() {
            for member in members_of(other) {
                working.remove(&member);
            }
            if working.is_empty() {
                break;
            }
        }
        Ok(working.into_iter().collect())
    }
}
