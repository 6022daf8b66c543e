use std::borrow::Borrow;
use std::cell::Cell;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::time::{Duration, Instant};

use rand::Rng;

const INITIAL_SIZE: usize = 4;

/// Above this used/size ratio a grow happens even while resizing is
/// disabled.
const FORCE_RESIZE_RATIO: usize = 5;

/// Buckets migrated per piggy-backed rehash step.
const REHASH_BATCH: usize = 1;

thread_local! {
    static RESIZE_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Enables or disables opportunistic resizing for every table touched by
/// the calling thread. Command execution is single-threaded, so this is the
/// process-wide policy switch: it is turned off while a background save is
/// in flight so bucket churn does not dirty memory the snapshot copy still
/// shares.
pub fn set_resize_enabled(enabled: bool) {
    RESIZE_ENABLED.with(|flag| flag.set(enabled));
}

fn resize_enabled() -> bool {
    RESIZE_ENABLED.with(Cell::get)
}

#[derive(Debug, Clone)]
struct Node<K, V> {
    key: K,
    value: V,
    next: Option<Box<Node<K, V>>>,
}

#[derive(Debug, Clone)]
struct Table<K, V> {
    buckets: Vec<Option<Box<Node<K, V>>>>,
    used: usize,
}

impl<K, V> Table<K, V> {
    fn new(size: usize) -> Self {
        let mut buckets = Vec::new();
        buckets.resize_with(size, || None);
        Self { buckets, used: 0 }
    }

    fn mask(&self) -> usize {
        self.buckets.len() - 1
    }
}

/// An open-chained hash map with step-by-step resizing.
///
/// Two power-of-two bucket arrays sit side by side; a rehash cursor records
/// how many source buckets have migrated. Mutating operations migrate a small
/// batch each call and [`rehash_for`](Dict::rehash_for) runs bounded bursts
/// from an idle tick. Lookups consult both tables until the cursor reaches
/// the end. Iteration holds a shared borrow, which pins the table for its
/// lifetime, so it observes every entry exactly once even mid-rehash.
#[derive(Debug, Clone)]
pub struct Dict<K, V> {
    tables: [Table<K, V>; 2],
    /// Next source bucket to migrate; None when not rehashing.
    rehash_idx: Option<usize>,
    hasher: RandomState,
}

impl<K: Hash + Eq, V> Dict<K, V> {
    pub fn new() -> Self {
        Self {
            tables: [Table::new(0), Table::new(0)],
            rehash_idx: None,
            hasher: RandomState::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tables[0].used + self.tables[1].used
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_rehashing(&self) -> bool {
        self.rehash_idx.is_some()
    }

    fn hash<Q: Hash + ?Sized>(&self, key: &Q) -> usize {
        self.hasher.hash_one(key) as usize
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.is_empty() {
            return None;
        }
        let h = self.hash(key);
        for table in &self.tables {
            if table.buckets.is_empty() {
                continue;
            }
            let mut node = table.buckets[h & table.mask()].as_deref();
            while let Some(n) = node {
                if n.key.borrow() == key {
                    return Some(&n.value);
                }
                node = n.next.as_deref();
            }
        }
        None
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.is_empty() {
            return None;
        }
        let h = self.hash(key);
        for table in &mut self.tables {
            if table.buckets.is_empty() {
                continue;
            }
            let mask = table.mask();
            let mut node = table.buckets[h & mask].as_deref_mut();
            while let Some(n) = node {
                if n.key.borrow() == key {
                    return Some(&mut n.value);
                }
                node = n.next.as_deref_mut();
            }
        }
        None
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Sets the key to the value, returning the previous value if the key was
    /// present.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.rehash_steps(REHASH_BATCH);
        if self.contains(&key) {
            let slot = self.get_mut(&key).unwrap();
            return Some(std::mem::replace(slot, value));
        }
        self.expand_if_needed();
        let h = self.hash(&key);
        let t = if self.is_rehashing() { 1 } else { 0 };
        let table = &mut self.tables[t];
        let b = h & table.mask();
        let next = table.buckets[b].take();
        table.buckets[b] = Some(Box::new(Node { key, value, next }));
        table.used += 1;
        None
    }

    /// Adds the entry only if the key is absent; reports whether it was added.
    pub fn add(&mut self, key: K, value: V) -> bool {
        if self.contains(&key) {
            return false;
        }
        self.insert(key, value);
        true
    }

    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.is_empty() {
            return None;
        }
        self.rehash_steps(REHASH_BATCH);
        let h = self.hash(key);
        for t in 0..2 {
            if self.tables[t].buckets.is_empty() {
                continue;
            }
            let mask = self.tables[t].mask();
            let bucket = &mut self.tables[t].buckets[h & mask];
            if let Some(node) = unlink(bucket, key) {
                self.tables[t].used -= 1;
                self.shrink_if_needed();
                return Some(node.value);
            }
        }
        None
    }

    /// Ensures capacity for at least `size` entries, used to pre-size before
    /// a bulk load. Completes any in-flight rehash first.
    pub fn expand(&mut self, size: usize) {
        if self.is_rehashing() {
            self.rehash_steps(usize::MAX);
        }
        let target = size.max(INITIAL_SIZE).next_power_of_two();
        if target <= self.tables[0].buckets.len() {
            return;
        }
        self.start_resize(target);
    }

    /// Migrates up to `n` source buckets to the target table. When the
    /// cursor reaches the end the target becomes primary.
    fn rehash_steps(&mut self, n: usize) {
        let Some(mut idx) = self.rehash_idx else {
            return;
        };
        // Bound the visits of empty buckets so a sparse table cannot turn a
        // single step into a long stall.
        let mut empty_budget = n.saturating_mul(10).max(10);
        let mut moved = 0;
        while moved < n && idx < self.tables[0].buckets.len() {
            if self.tables[0].buckets[idx].is_none() {
                idx += 1;
                empty_budget -= 1;
                if empty_budget == 0 {
                    break;
                }
                continue;
            }
            let mut chain = self.tables[0].buckets[idx].take();
            while let Some(mut node) = chain {
                chain = node.next.take();
                let h = self.hasher.hash_one(&node.key) as usize;
                let b = h & self.tables[1].mask();
                node.next = self.tables[1].buckets[b].take();
                self.tables[1].buckets[b] = Some(node);
                self.tables[0].used -= 1;
                self.tables[1].used += 1;
            }
            idx += 1;
            moved += 1;
        }
        if idx >= self.tables[0].buckets.len() {
            // Source drained: the target becomes the primary table.
            self.tables[0] = std::mem::replace(&mut self.tables[1], Table::new(0));
            self.rehash_idx = None;
        } else {
            self.rehash_idx = Some(idx);
        }
    }

    /// Runs rehash bursts until done or the wall-clock budget is spent.
    /// Intended for a cooperative scheduler tick.
    pub fn rehash_for(&mut self, budget: Duration) {
        let start = Instant::now();
        while self.is_rehashing() && start.elapsed() < budget {
            self.rehash_steps(100);
        }
    }

    fn expand_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }
        if self.tables[0].buckets.is_empty() {
            self.tables[0] = Table::new(INITIAL_SIZE);
            return;
        }
        let size = self.tables[0].buckets.len();
        let used = self.tables[0].used;
        if used >= size && (resize_enabled() || used / size >= FORCE_RESIZE_RATIO) {
            self.start_resize((used * 2).next_power_of_two());
        }
    }

    fn shrink_if_needed(&mut self) {
        if self.is_rehashing() || !resize_enabled() {
            return;
        }
        let size = self.tables[0].buckets.len();
        let used = self.tables[0].used;
        if size > INITIAL_SIZE && used * 10 < size {
            self.start_resize(used.max(INITIAL_SIZE).next_power_of_two());
        }
    }

    fn start_resize(&mut self, size: usize) {
        if size == self.tables[0].buckets.len() {
            return;
        }
        if self.tables[0].used == 0 {
            self.tables[0] = Table::new(size);
            return;
        }
        self.tables[1] = Table::new(size);
        self.rehash_idx = Some(0);
    }

    /// Picks an entry approximately uniformly: sample a bucket, then a
    /// position within its chain, re-sampling while the bucket is empty.
    pub fn random_entry<R: Rng>(&self, rng: &mut R) -> Option<(&K, &V)> {
        if self.is_empty() {
            return None;
        }
        loop {
            let (t, b) = match self.rehash_idx {
                Some(start) => {
                    // Buckets below the cursor are already drained.
                    let s0 = self.tables[0].buckets.len();
                    let s1 = self.tables[1].buckets.len();
                    let h = start + rng.gen_range(0..(s0 + s1 - start));
                    if h >= s0 {
                        (1, h - s0)
                    } else {
                        (0, h)
                    }
                }
                None => (0, rng.gen_range(0..self.tables[0].buckets.len())),
            };
            let mut chain_len = 0;
            let mut node = self.tables[t].buckets[b].as_deref();
            while let Some(n) = node {
                chain_len += 1;
                node = n.next.as_deref();
            }
            if chain_len == 0 {
                continue;
            }
            let mut pick = rng.gen_range(0..chain_len);
            let mut node = self.tables[t].buckets[b].as_deref();
            while let Some(n) = node {
                if pick == 0 {
                    return Some((&n.key, &n.value));
                }
                pick -= 1;
                node = n.next.as_deref();
            }
        }
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter { dict: self, table: 0, bucket: 0, node: None }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }
}

/// Unlinks the node with the given key from a chain.
fn unlink<K, V, Q>(bucket: &mut Option<Box<Node<K, V>>>, key: &Q) -> Option<Box<Node<K, V>>>
where
    K: Borrow<Q>,
    Q: Eq + ?Sized,
{
    let mut cur = bucket;
    loop {
        let found = match cur.as_deref() {
            Some(node) => node.key.borrow() == key,
            None => return None,
        };
        if found {
            let mut removed = cur.take().unwrap();
            *cur = removed.next.take();
            return Some(removed);
        }
        cur = &mut cur.as_mut().unwrap().next;
    }
}

impl<K: Hash + Eq, V> Default for Dict<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, K, V> {
    dict: &'a Dict<K, V>,
    table: usize,
    /// Next bucket index to load in `table`.
    bucket: usize,
    node: Option<&'a Node<K, V>>,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(n) = self.node {
                self.node = n.next.as_deref();
                return Some((&n.key, &n.value));
            }
            loop {
                if self.table >= 2 {
                    return None;
                }
                let buckets = &self.dict.tables[self.table].buckets;
                if self.bucket >= buckets.len() {
                    self.table += 1;
                    self.bucket = 0;
                    continue;
                }
                self.node = buckets[self.bucket].as_deref();
                self.bucket += 1;
                if self.node.is_some() {
                    break;
                }
            }
        }
    }
}
