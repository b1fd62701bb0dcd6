//! Persistent collections
//!
//! Lists, vectors and sets are immutable flat slices. Maps keep their
//! entries as a flat interleaved key/value slice in insertion order plus a
//! hash index sorted for binary search, giving O(log n) lookup while
//! preserving the order entries were added. Assoc over an existing key
//! reuses the index (entry positions are unchanged); adding or removing a
//! key rebuilds it.

use std::rc::Rc;

use crate::value::{value_eq, value_hash, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct PList {
    pub items: Box<[Value]>,
    pub meta: Option<Value>,
}

impl PList {
    pub fn new(items: Vec<Value>) -> Self {
        PList {
            items: items.into_boxed_slice(),
            meta: None,
        }
    }

    /// `conj` on a list prepends.
    pub fn conj(&self, v: Value) -> PList {
        let mut items = Vec::with_capacity(self.items.len() + 1);
        items.push(v);
        items.extend(self.items.iter().cloned());
        PList::new(items)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PVector {
    pub items: Box<[Value]>,
    pub meta: Option<Value>,
}

impl PVector {
    pub fn new(items: Vec<Value>) -> Self {
        PVector {
            items: items.into_boxed_slice(),
            meta: None,
        }
    }

    /// `conj` on a vector appends.
    pub fn conj(&self, v: Value) -> PVector {
        let mut items = self.items.to_vec();
        items.push(v);
        PVector::new(items)
    }

    pub fn assoc_index(&self, idx: usize, v: Value) -> Option<PVector> {
        if idx > self.items.len() {
            return None;
        }
        let mut items = self.items.to_vec();
        if idx == items.len() {
            items.push(v);
        } else {
            items[idx] = v;
        }
        Some(PVector::new(items))
    }
}

#[derive(Debug, Clone)]
pub struct PSet {
    pub items: Box<[Value]>,
    pub meta: Option<Value>,
}

impl PSet {
    /// Builds a set, dropping later duplicates by value equality.
    pub fn new(items: Vec<Value>) -> Self {
        let mut unique: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !unique.iter().any(|u| value_eq(u, &item)) {
                unique.push(item);
            }
        }
        PSet {
            items: unique.into_boxed_slice(),
            meta: None,
        }
    }

    pub fn contains(&self, v: &Value) -> bool {
        self.items.iter().any(|item| value_eq(item, v))
    }

    pub fn conj(&self, v: Value) -> PSet {
        if self.contains(&v) {
            return self.clone();
        }
        let mut items = self.items.to_vec();
        items.push(v);
        PSet {
            items: items.into_boxed_slice(),
            meta: self.meta.clone(),
        }
    }

    pub fn disj(&self, v: &Value) -> PSet {
        let items: Vec<Value> = self
            .items
            .iter()
            .filter(|item| !value_eq(item, v))
            .cloned()
            .collect();
        PSet {
            items: items.into_boxed_slice(),
            meta: self.meta.clone(),
        }
    }

    /// Order-independent set equality.
    pub fn equiv(&self, other: &PSet) -> bool {
        self.items.len() == other.items.len()
            && self.items.iter().all(|item| other.contains(item))
    }
}

/// Index entry: precomputed hash plus the position of the key in the entry
/// slice (in key/value pairs, so entry `i` is at `entries[2 * i]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IndexEntry {
    hash: u64,
    entry: u32,
}

#[derive(Debug, Clone)]
pub struct PMap {
    /// Interleaved key/value pairs in insertion order.
    entries: Box<[Value]>,
    /// Sorted by hash; shared between maps with identical key layout.
    index: Rc<[IndexEntry]>,
    pub meta: Option<Value>,
}

fn build_index(entries: &[Value]) -> Rc<[IndexEntry]> {
    let mut index: Vec<IndexEntry> = (0..entries.len() / 2)
        .map(|i| IndexEntry {
            hash: value_hash(&entries[2 * i]),
            entry: i as u32,
        })
        .collect();
    index.sort_by(|a, b| a.hash.cmp(&b.hash).then(a.entry.cmp(&b.entry)));
    index.into()
}

impl PMap {
    pub fn empty() -> Self {
        PMap {
            entries: Box::from([]),
            index: Rc::from([] as [IndexEntry; 0]),
            meta: None,
        }
    }

    /// Builds a map from an interleaved key/value vector. A key equal to an
    /// earlier one overwrites it; the entry keeps its original position, so
    /// the most recent association wins while insertion order is preserved.
    pub fn from_interleaved(kvs: Vec<Value>) -> Self {
        debug_assert!(kvs.len() % 2 == 0, "map literal must have even length");
        let mut map = PMap::empty();
        let mut iter = kvs.into_iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            map = map.assoc(k, v);
        }
        map
    }

    pub fn len(&self) -> usize {
        self.entries.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.chunks_exact(2).map(|kv| (&kv[0], &kv[1]))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries().map(|(k, _)| k)
    }

    pub fn vals(&self) -> impl Iterator<Item = &Value> {
        self.entries().map(|(_, v)| v)
    }

    /// Position of `key` in entry pairs, found by binary search on the
    /// hash index and confirmed by value equality.
    fn position(&self, key: &Value) -> Option<usize> {
        let hash = value_hash(key);
        let mut at = self.index.partition_point(|e| e.hash < hash);
        while at < self.index.len() && self.index[at].hash == hash {
            let entry = self.index[at].entry as usize;
            if value_eq(&self.entries[2 * entry], key) {
                return Some(entry);
            }
            at += 1;
        }
        None
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.position(key).map(|i| &self.entries[2 * i + 1])
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.position(key).is_some()
    }

    pub fn assoc(&self, key: Value, value: Value) -> PMap {
        match self.position(&key) {
            Some(i) => {
                // Same key layout: the index carries over untouched.
                let mut entries = self.entries.to_vec();
                entries[2 * i + 1] = value;
                PMap {
                    entries: entries.into_boxed_slice(),
                    index: Rc::clone(&self.index),
                    meta: self.meta.clone(),
                }
            }
            None => {
                let mut entries = self.entries.to_vec();
                entries.push(key);
                entries.push(value);
                let entries = entries.into_boxed_slice();
                let index = build_index(&entries);
                PMap {
                    entries,
                    index,
                    meta: self.meta.clone(),
                }
            }
        }
    }

    pub fn dissoc(&self, key: &Value) -> PMap {
        match self.position(key) {
            None => self.clone(),
            Some(i) => {
                let mut entries = self.entries.to_vec();
                entries.drain(2 * i..2 * i + 2);
                let entries = entries.into_boxed_slice();
                let index = build_index(&entries);
                PMap {
                    entries,
                    index,
                    meta: self.meta.clone(),
                }
            }
        }
    }

    /// Order-independent map equality.
    pub fn equiv(&self, other: &PMap) -> bool {
        self.len() == other.len()
            && self
                .entries()
                .all(|(k, v)| other.get(k).is_some_and(|ov| value_eq(v, ov)))
    }
}

impl PartialEq for PMap {
    fn eq(&self, other: &Self) -> bool {
        self.equiv(other)
    }
}

impl PartialEq for PSet {
    fn eq(&self, other: &Self) -> bool {
        self.equiv(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(name: &str) -> Value {
        Value::keyword(name)
    }

    #[test]
    fn test_map_insertion_order_preserved() {
        let m = PMap::from_interleaved(vec![
            kw("b"),
            Value::Int(1),
            kw("a"),
            Value::Int(2),
            kw("c"),
            Value::Int(3),
        ]);
        let keys: Vec<String> = m
            .keys()
            .map(|k| match k {
                Value::Keyword(s) => s.name.to_string(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_map_last_assoc_wins() {
        let mut m = PMap::empty();
        for i in 0..10 {
            m = m.assoc(kw("k"), Value::Int(i));
        }
        assert!(value_eq(m.get(&kw("k")).unwrap(), &Value::Int(9)));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_map_assoc_existing_shares_index() {
        let m = PMap::from_interleaved(vec![kw("a"), Value::Int(1), kw("b"), Value::Int(2)]);
        let m2 = m.assoc(kw("a"), Value::Int(42));
        assert!(Rc::ptr_eq(&m.index, &m2.index));
        assert!(value_eq(m2.get(&kw("a")).unwrap(), &Value::Int(42)));
        assert!(value_eq(m.get(&kw("a")).unwrap(), &Value::Int(1)));
    }

    #[test]
    fn test_map_dissoc() {
        let m = PMap::from_interleaved(vec![kw("a"), Value::Int(1), kw("b"), Value::Int(2)]);
        let m2 = m.dissoc(&kw("a"));
        assert_eq!(m2.len(), 1);
        assert!(m2.get(&kw("a")).is_none());
        assert!(m2.get(&kw("b")).is_some());
    }

    #[test]
    fn test_map_equiv_ignores_order() {
        let m1 = PMap::from_interleaved(vec![kw("a"), Value::Int(1), kw("b"), Value::Int(2)]);
        let m2 = PMap::from_interleaved(vec![kw("b"), Value::Int(2), kw("a"), Value::Int(1)]);
        assert!(m1.equiv(&m2));
    }

    #[test]
    fn test_set_dedup_and_membership() {
        let s = PSet::new(vec![Value::Int(1), Value::Int(2), Value::Int(1)]);
        assert_eq!(s.items.len(), 2);
        assert!(s.contains(&Value::Int(2)));
        assert!(!s.contains(&Value::Int(3)));
    }

    #[test]
    fn test_lookup_with_many_keys() {
        let mut m = PMap::empty();
        for i in 0..100 {
            m = m.assoc(Value::Int(i), Value::Int(i * i));
        }
        for i in 0..100 {
            assert!(value_eq(m.get(&Value::Int(i)).unwrap(), &Value::Int(i * i)));
        }
        assert!(m.get(&Value::Int(100)).is_none());
    }
}
