use rand::Rng;

use crate::ds::ByteString;

const MAX_LEVEL: usize = 32;

/// Probability of promoting a node one more level.
const BRANCH_P: f64 = 0.25;

/// Arena sentinel for "no node".
const NIL: u32 = u32::MAX;

#[derive(Debug, Clone)]
struct Level {
    forward: u32,
    /// Nodes the forward pointer skips over, counting the target. Summing
    /// spans from the head to a node yields its 1-based rank.
    span: usize,
}

#[derive(Debug, Clone)]
struct Node {
    element: ByteString,
    score: f64,
    backward: u32,
    levels: Vec<Level>,
}

/// A score range with optionally exclusive bounds.
#[derive(Debug, Clone, Copy)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
    pub min_exclusive: bool,
    pub max_exclusive: bool,
}

impl ScoreRange {
    pub fn inclusive(min: f64, max: f64) -> Self {
        Self { min, max, min_exclusive: false, max_exclusive: false }
    }

    fn above_min(&self, score: f64) -> bool {
        if self.min_exclusive {
            score > self.min
        } else {
            score >= self.min
        }
    }

    fn below_max(&self, score: f64) -> bool {
        if self.max_exclusive {
            score < self.max
        } else {
            score <= self.max
        }
    }

    pub fn contains(&self, score: f64) -> bool {
        self.above_min(score) && self.below_max(score)
    }

    fn is_empty(&self) -> bool {
        self.min > self.max
            || (self.min == self.max && (self.min_exclusive || self.max_exclusive))
    }
}

/// A probabilistic ordered index keyed by (score ascending, element bytes
/// ascending). Nodes live in an arena and link by index, with per-level spans
/// so rank queries run in O(log n).
///
/// Elements are unique by caller contract; the paired score-lookup table
/// enforces that above this layer.
#[derive(Debug, Clone)]
pub struct SkipList {
    /// Node 0 is the head sentinel.
    nodes: Vec<Node>,
    free: Vec<u32>,
    tail: u32,
    len: usize,
    level: usize,
}

impl SkipList {
    pub fn new() -> Self {
        let head = Node {
            element: ByteString::new(),
            score: 0.0,
            backward: NIL,
            levels: vec![Level { forward: NIL, span: 0 }; MAX_LEVEL],
        };
        Self { nodes: vec![head], free: Vec::new(), tail: NIL, len: 0, level: 1 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn node(&self, idx: u32) -> &Node {
        &self.nodes[idx as usize]
    }

    fn random_level(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 1;
        while level < MAX_LEVEL && rng.gen::<f64>() < BRANCH_P {
            level += 1;
        }
        level
    }

    fn alloc(&mut self, node: Node) -> u32 {
        match self.free.pop() {
            Some(idx) => {
                self.nodes[idx as usize] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        }
    }

    /// True when the forward candidate orders before the target key.
    fn precedes(&self, idx: u32, score: f64, element: &[u8]) -> bool {
        let n = self.node(idx);
        n.score < score || (n.score == score && n.element.as_slice() < element)
    }

    /// Inserts an element under a score. The caller guarantees the element is
    /// not already present.
    pub fn insert(&mut self, score: f64, element: ByteString) {
        let mut update = [0u32; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];

        let mut x = 0u32;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            loop {
                let fwd = self.node(x).levels[i].forward;
                if fwd == NIL || !self.precedes(fwd, score, &element) {
                    break;
                }
                rank[i] += self.node(x).levels[i].span;
                x = fwd;
            }
            update[i] = x;
        }

        let level = self.random_level();
        if level > self.level {
            for i in self.level..level {
                rank[i] = 0;
                update[i] = 0;
                self.nodes[0].levels[i].span = self.len;
            }
            self.level = level;
        }

        let idx = self.alloc(Node {
            element,
            score,
            backward: NIL,
            levels: vec![Level { forward: NIL, span: 0 }; level],
        });
        for i in 0..level {
            let u = update[i] as usize;
            let fwd = self.nodes[u].levels[i].forward;
            let uspan = self.nodes[u].levels[i].span;
            self.nodes[idx as usize].levels[i].forward = fwd;
            self.nodes[idx as usize].levels[i].span = uspan - (rank[0] - rank[i]);
            self.nodes[u].levels[i].forward = idx;
            self.nodes[u].levels[i].span = (rank[0] - rank[i]) + 1;
        }
        // Levels above the new node's height skip one more node now.
        for i in level..self.level {
            self.nodes[update[i] as usize].levels[i].span += 1;
        }

        self.nodes[idx as usize].backward = if update[0] == 0 { NIL } else { update[0] };
        let next = self.nodes[idx as usize].levels[0].forward;
        if next != NIL {
            self.nodes[next as usize].backward = idx;
        } else {
            self.tail = idx;
        }
        self.len += 1;
    }

    /// Removes the node with the exact (score, element) key, returning its
    /// element.
    pub fn remove(&mut self, score: f64, element: &[u8]) -> Option<ByteString> {
        let mut update = [0u32; MAX_LEVEL];
        let mut x = 0u32;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).levels[i].forward;
                if fwd == NIL || !self.precedes(fwd, score, element) {
                    break;
                }
                x = fwd;
            }
            update[i] = x;
        }
        let target = self.node(x).levels[0].forward;
        if target == NIL {
            return None;
        }
        let t = self.node(target);
        if t.score != score || t.element.as_slice() != element {
            return None;
        }
        let node = self.unlink(target, &update);
        Some(node.element)
    }

    /// Deletes by (score, element), reporting whether the node existed.
    pub fn delete(&mut self, score: f64, element: &[u8]) -> bool {
        self.remove(score, element).is_some()
    }

    /// Moves an element to a new score.
    pub fn update_score(&mut self, old_score: f64, element: &[u8], new_score: f64) -> bool {
        match self.remove(old_score, element) {
            Some(owned) => {
                self.insert(new_score, owned);
                true
            }
            None => false,
        }
    }

    fn unlink(&mut self, x: u32, update: &[u32; MAX_LEVEL]) -> Node {
        for i in 0..self.level {
            let u = update[i] as usize;
            if self.nodes[u].levels[i].forward == x {
                self.nodes[u].levels[i].span += self.nodes[x as usize].levels[i].span;
                self.nodes[u].levels[i].span -= 1;
                self.nodes[u].levels[i].forward = self.nodes[x as usize].levels[i].forward;
            } else {
                self.nodes[u].levels[i].span -= 1;
            }
        }
        let forward = self.nodes[x as usize].levels[0].forward;
        let backward = self.nodes[x as usize].backward;
        if forward != NIL {
            self.nodes[forward as usize].backward = backward;
        } else {
            self.tail = backward;
        }
        while self.level > 1 && self.nodes[0].levels[self.level - 1].forward == NIL {
            self.level -= 1;
        }
        self.len -= 1;

        let node = std::mem::replace(
            &mut self.nodes[x as usize],
            Node { element: ByteString::new(), score: 0.0, backward: NIL, levels: Vec::new() },
        );
        self.free.push(x);
        node
    }

    pub fn first(&self) -> Option<(&ByteString, f64)> {
        let idx = self.nodes[0].levels[0].forward;
        if idx == NIL {
            return None;
        }
        let n = self.node(idx);
        Some((&n.element, n.score))
    }

    pub fn last(&self) -> Option<(&ByteString, f64)> {
        if self.tail == NIL {
            return None;
        }
        let n = self.node(self.tail);
        Some((&n.element, n.score))
    }

    /// 1-based rank of the exact (score, element) key.
    pub fn rank(&self, score: f64, element: &[u8]) -> Option<usize> {
        let mut rank = 0;
        let mut x = 0u32;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).levels[i].forward;
                if fwd == NIL {
                    break;
                }
                let f = self.node(fwd);
                let le = f.score < score
                    || (f.score == score && f.element.as_slice() <= element);
                if !le {
                    break;
                }
                rank += self.node(x).levels[i].span;
                x = fwd;
            }
            if x != 0 && self.node(x).score == score && self.node(x).element.as_slice() == element
            {
                return Some(rank);
            }
        }
        None
    }

    /// Node at a 1-based rank.
    pub fn by_rank(&self, rank: usize) -> Option<(&ByteString, f64)> {
        if rank == 0 || rank > self.len {
            return None;
        }
        let mut traversed = 0;
        let mut x = 0u32;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).levels[i].forward;
                if fwd == NIL || traversed + self.node(x).levels[i].span > rank {
                    break;
                }
                traversed += self.node(x).levels[i].span;
                x = fwd;
            }
            if traversed == rank {
                let n = self.node(x);
                return Some((&n.element, n.score));
            }
        }
        None
    }

    /// Whether any node falls inside the range.
    fn overlaps(&self, range: &ScoreRange) -> bool {
        if range.is_empty() {
            return false;
        }
        match (self.first(), self.last()) {
            (Some((_, first)), Some((_, last))) => {
                range.above_min(last) && range.below_max(first)
            }
            _ => false,
        }
    }

    /// Index of the first node inside the score range.
    fn first_in_range(&self, range: &ScoreRange) -> Option<u32> {
        if !self.overlaps(range) {
            return None;
        }
        let mut x = 0u32;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).levels[i].forward;
                if fwd == NIL || range.above_min(self.node(fwd).score) {
                    break;
                }
                x = fwd;
            }
        }
        let idx = self.node(x).levels[0].forward;
        if idx != NIL && range.below_max(self.node(idx).score) {
            Some(idx)
        } else {
            None
        }
    }

    /// Forward scan over the nodes whose scores fall inside the range.
    pub fn iter_range(&self, range: ScoreRange) -> RangeIter<'_> {
        let at = self.first_in_range(&range).unwrap_or(NIL);
        RangeIter { list: self, at, range: Some(range) }
    }

    /// Forward scan starting at a 1-based rank.
    pub fn iter_from_rank(&self, rank: usize) -> RangeIter<'_> {
        let at = self.index_by_rank(rank).unwrap_or(NIL);
        RangeIter { list: self, at, range: None }
    }

    fn index_by_rank(&self, rank: usize) -> Option<u32> {
        if rank == 0 || rank > self.len {
            return None;
        }
        let mut traversed = 0;
        let mut x = 0u32;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).levels[i].forward;
                if fwd == NIL || traversed + self.node(x).levels[i].span > rank {
                    break;
                }
                traversed += self.node(x).levels[i].span;
                x = fwd;
            }
            if traversed == rank && x != 0 {
                return Some(x);
            }
        }
        None
    }

    /// Removes every node inside the score range, returning the removed
    /// (element, score) pairs in order so the caller can keep its score
    /// table in sync.
    pub fn delete_range_by_score(&mut self, range: ScoreRange) -> Vec<(ByteString, f64)> {
        let mut update = [0u32; MAX_LEVEL];
        let mut x = 0u32;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).levels[i].forward;
                if fwd == NIL || range.above_min(self.node(fwd).score) {
                    break;
                }
                x = fwd;
            }
            update[i] = x;
        }
        let mut removed = Vec::new();
        let mut at = self.node(x).levels[0].forward;
        while at != NIL && range.below_max(self.node(at).score) {
            let next = self.node(at).levels[0].forward;
            let node = self.unlink(at, &update);
            removed.push((node.element, node.score));
            at = next;
        }
        removed
    }

    /// Removes every node in the inclusive 1-based rank range.
    pub fn delete_range_by_rank(&mut self, start: usize, end: usize) -> Vec<(ByteString, f64)> {
        if start == 0 || start > end {
            return Vec::new();
        }
        let mut update = [0u32; MAX_LEVEL];
        let mut traversed = 0usize;
        let mut x = 0u32;
        for i in (0..self.level).rev() {
            loop {
                let fwd = self.node(x).levels[i].forward;
                if fwd == NIL || traversed + self.node(x).levels[i].span >= start {
                    break;
                }
                traversed += self.node(x).levels[i].span;
                x = fwd;
            }
            update[i] = x;
        }
        let mut removed = Vec::new();
        let mut rank = traversed + 1;
        let mut at = self.node(x).levels[0].forward;
        while at != NIL && rank <= end {
            let next = self.node(at).levels[0].forward;
            let node = self.unlink(at, &update);
            removed.push((node.element, node.score));
            rank += 1;
            at = next;
        }
        removed
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RangeIter<'a> {
    list: &'a SkipList,
    at: u32,
    range: Option<ScoreRange>,
}

impl<'a> Iterator for RangeIter<'a> {
    type Item = (&'a ByteString, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.at == NIL {
            return None;
        }
        let list = self.list;
        let node = &list.nodes[self.at as usize];
        if let Some(range) = &self.range {
            if !range.below_max(node.score) {
                self.at = NIL;
                return None;
            }
        }
        self.at = node.levels[0].forward;
        Some((&node.element, node.score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> SkipList {
        let mut list = SkipList::new();
        for (score, ele) in [(1.0, "a"), (2.0, "b"), (2.0, "c"), (3.0, "d"), (4.5, "e")] {
            list.insert(score, ByteString::from(ele));
        }
        list
    }

    fn elements(list: &SkipList) -> Vec<(Vec<u8>, f64)> {
        list.iter_from_rank(1).map(|(e, s)| (e.to_vec(), s)).collect()
    }

    /// Checks the backward pointers and the rank arithmetic of every node.
    fn check_invariants(list: &SkipList) {
        let mut prev = NIL;
        let mut at = list.nodes[0].levels[0].forward;
        let mut rank = 0;
        while at != NIL {
            rank += 1;
            let node = list.node(at);
            assert_eq!(node.backward, prev, "backward pointer at rank {rank}");
            assert_eq!(
                list.rank(node.score, &node.element),
                Some(rank),
                "span sum must equal rank"
            );
            prev = at;
            at = node.levels[0].forward;
        }
        assert_eq!(list.tail, prev);
        assert_eq!(list.len(), rank);
    }

    #[test]
    fn test_ordering_with_score_ties() {
        let list = populated();
        let got = elements(&list);
        let expected: Vec<(Vec<u8>, f64)> = [
            ("a", 1.0),
            ("b", 2.0),
            ("c", 2.0),
            ("d", 3.0),
            ("e", 4.5),
        ]
        .iter()
        .map(|(e, s)| (e.as_bytes().to_vec(), *s))
        .collect();
        assert_eq!(got, expected);
        check_invariants(&list);
    }

    #[test]
    fn test_rank_queries() {
        let list = populated();
        assert_eq!(list.rank(1.0, b"a"), Some(1));
        assert_eq!(list.rank(2.0, b"c"), Some(3));
        assert_eq!(list.rank(4.5, b"e"), Some(5));
        assert_eq!(list.rank(2.0, b"missing"), None);
        assert_eq!(list.rank(9.0, b"a"), None);

        assert_eq!(list.by_rank(1).map(|(e, _)| e.to_vec()), Some(b"a".to_vec()));
        assert_eq!(list.by_rank(5).map(|(e, _)| e.to_vec()), Some(b"e".to_vec()));
        assert_eq!(list.by_rank(0), None);
        assert_eq!(list.by_rank(6), None);
    }

    #[test]
    fn test_delete_and_update() {
        let mut list = populated();
        assert!(list.delete(2.0, b"b"));
        assert!(!list.delete(2.0, b"b"));
        assert!(!list.delete(2.5, b"c"));
        check_invariants(&list);

        assert!(list.update_score(2.0, b"c", 0.5));
        let got = elements(&list);
        assert_eq!(got[0].0, b"c".to_vec());
        check_invariants(&list);
    }

    #[test]
    fn test_first_last_and_tail() {
        let mut list = SkipList::new();
        assert_eq!(list.first(), None);
        assert_eq!(list.last(), None);
        list.insert(1.0, ByteString::from("only"));
        assert_eq!(list.first().map(|(e, _)| e.to_vec()), Some(b"only".to_vec()));
        assert_eq!(list.last().map(|(e, _)| e.to_vec()), Some(b"only".to_vec()));
        list.delete(1.0, b"only");
        assert_eq!(list.last(), None);
        check_invariants(&list);
    }

    #[test]
    fn test_range_scan() {
        let list = populated();
        let range = ScoreRange::inclusive(2.0, 2.0);
        let got: Vec<Vec<u8>> = list.iter_range(range).map(|(e, _)| e.to_vec()).collect();
        // Equal scores order lexicographically.
        assert_eq!(got, vec![b"b".to_vec(), b"c".to_vec()]);

        let exclusive = ScoreRange { min: 1.0, max: 3.0, min_exclusive: true, max_exclusive: true };
        let got: Vec<Vec<u8>> = list.iter_range(exclusive).map(|(e, _)| e.to_vec()).collect();
        assert_eq!(got, vec![b"b".to_vec(), b"c".to_vec()]);

        assert_eq!(list.iter_range(ScoreRange::inclusive(9.0, 10.0)).count(), 0);
        assert_eq!(list.iter_range(ScoreRange::inclusive(3.0, 2.0)).count(), 0);
    }

    #[test]
    fn test_delete_range_by_score() {
        let mut list = populated();
        let removed = list.delete_range_by_score(ScoreRange::inclusive(2.0, 3.0));
        let names: Vec<Vec<u8>> = removed.iter().map(|(e, _)| e.to_vec()).collect();
        assert_eq!(names, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        assert_eq!(list.len(), 2);
        check_invariants(&list);
    }

    #[test]
    fn test_delete_range_by_rank() {
        let mut list = populated();
        let removed = list.delete_range_by_rank(2, 4);
        let names: Vec<Vec<u8>> = removed.iter().map(|(e, _)| e.to_vec()).collect();
        assert_eq!(names, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        assert_eq!(list.len(), 2);
        check_invariants(&list);

        assert!(list.delete_range_by_rank(0, 3).is_empty());
        assert!(list.delete_range_by_rank(3, 2).is_empty());
    }

    #[test]
    fn test_large_population_invariants() {
        let mut list = SkipList::new();
        for i in 0..2000u32 {
            // Interleave scores so ties and reorderings both occur.
            let score = (i % 50) as f64;
            list.insert(score, ByteString::from(format!("ele-{i}").as_str()));
        }
        assert_eq!(list.len(), 2000);
        check_invariants(&list);

        // Delete every other element and re-check.
        for i in (0..2000u32).step_by(2) {
            let score = (i % 50) as f64;
            assert!(list.delete(score, format!("ele-{i}").as_bytes()));
        }
        assert_eq!(list.len(), 1000);
        check_invariants(&list);
    }
}
