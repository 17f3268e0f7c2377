//! Persistent treap with shared, immutable nodes.
//!
//! `insert` and `remove` copy the nodes on the search path and return a new
//! root; every other node is shared with the previous version through `Arc`.
//! A node is freed when the last root or parent referencing it drops, which
//! may happen on any thread.
//!
//! Priorities come from a randomly seeded hash of the key, kept as a
//! min-heap: a parent's priority never exceeds its children's.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::hash::{BuildHasher, Hash};
use std::ops::Bound;
use std::sync::Arc;

use ahash::RandomState;

type Link<K, V> = Option<Arc<Node<K, V>>>;

#[derive(Clone)]
struct Node<K, V> {
    key: K,
    value: V,
    priority: u64,
    left: Link<K, V>,
    right: Link<K, V>,
}

pub struct Treap<K, V> {
    root: Link<K, V>,
    len: usize,
    hasher: RandomState,
}

impl<K, V> Clone for Treap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
            len: self.len,
            hasher: self.hasher.clone(),
        }
    }
}

impl<K: Ord + Hash + Clone, V: Clone> Default for Treap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Treap<K, V> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Whether both treaps share the same root node
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Entries in ascending key order
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter { stack: Vec::new() };
        iter.push_left(self.root.as_deref());
        iter
    }

    /// Entries in descending key order
    pub fn iter_rev(&self) -> RangeRev<'_, '_, K, V, K>
    where
        K: Ord,
    {
        self.range_rev(Bound::Unbounded, Bound::Unbounded)
    }

    /// Entries with keys within the bounds, in descending key order
    pub fn range_rev<'t, 'q, Q>(&'t self, lower: Bound<&'q Q>, upper: Bound<&'q Q>) -> RangeRev<'t, 'q, K, V, Q>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut iter = RangeRev {
            stack: Vec::new(),
            lower,
            upper,
        };
        iter.descend(self.root.as_deref());
        iter
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let mut link = self.root.as_deref();
        while let Some(node) = link {
            link = match key.cmp(node.key.borrow()) {
                Ordering::Less => node.left.as_deref(),
                Ordering::Greater => node.right.as_deref(),
                Ordering::Equal => return Some(&node.value),
            };
        }
        None
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.get(key).is_some()
    }
}

impl<K: Ord + Hash + Clone, V: Clone> Treap<K, V> {
    pub fn new() -> Self {
        Self {
            root: None,
            len: 0,
            hasher: RandomState::new(),
        }
    }

    /// New version with `key` mapped to `value`, replacing any previous value
    pub fn insert(&self, key: K, value: V) -> Self {
        let priority = self.hasher.hash_one(&key);
        let (root, added) = insert_node(&self.root, key, value, priority);
        Self {
            root: Some(root),
            len: self.len + added as usize,
            hasher: self.hasher.clone(),
        }
    }

    /// New version without `key`, or `None` if the key is absent
    pub fn remove<Q>(&self, key: &Q) -> Option<Self>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        let root = remove_node(&self.root, key)?;
        Some(Self {
            root,
            len: self.len - 1,
            hasher: self.hasher.clone(),
        })
    }
}

fn insert_node<K: Ord + Clone, V: Clone>(link: &Link<K, V>, key: K, value: V, priority: u64) -> (Arc<Node<K, V>>, bool) {
    let Some(node) = link else {
        let leaf = Node {
            key,
            value,
            priority,
            left: None,
            right: None,
        };
        return (Arc::new(leaf), true);
    };

    match key.cmp(&node.key) {
        Ordering::Equal => {
            let mut copy = (**node).clone();
            copy.value = value;
            (Arc::new(copy), false)
        }
        Ordering::Less => {
            let (child, added) = insert_node(&node.left, key, value, priority);
            let mut copy = (**node).clone();
            if child.priority < copy.priority {
                // rotate right: the new child becomes the subtree root
                let mut top = Arc::unwrap_or_clone(child);
                copy.left = top.right.take();
                top.right = Some(Arc::new(copy));
                (Arc::new(top), added)
            } else {
                copy.left = Some(child);
                (Arc::new(copy), added)
            }
        }
        Ordering::Greater => {
            let (child, added) = insert_node(&node.right, key, value, priority);
            let mut copy = (**node).clone();
            if child.priority < copy.priority {
                let mut top = Arc::unwrap_or_clone(child);
                copy.right = top.left.take();
                top.left = Some(Arc::new(copy));
                (Arc::new(top), added)
            } else {
                copy.right = Some(child);
                (Arc::new(copy), added)
            }
        }
    }
}

/// Returns the new subtree, or `None` if `key` is not present
fn remove_node<K, V, Q>(link: &Link<K, V>, key: &Q) -> Option<Link<K, V>>
where
    K: Borrow<Q> + Clone,
    V: Clone,
    Q: Ord + ?Sized,
{
    let node = link.as_ref()?;
    match key.cmp(node.key.borrow()) {
        Ordering::Less => {
            let left = remove_node(&node.left, key)?;
            let mut copy = (**node).clone();
            copy.left = left;
            Some(Some(Arc::new(copy)))
        }
        Ordering::Greater => {
            let right = remove_node(&node.right, key)?;
            let mut copy = (**node).clone();
            copy.right = right;
            Some(Some(Arc::new(copy)))
        }
        Ordering::Equal => Some(merge(&node.left, &node.right)),
    }
}

/// Join two subtrees where every key of `left` is below every key of `right`
fn merge<K: Clone, V: Clone>(left: &Link<K, V>, right: &Link<K, V>) -> Link<K, V> {
    match (left, right) {
        (None, other) | (other, None) => other.clone(),
        (Some(l), Some(r)) => {
            if l.priority <= r.priority {
                let mut copy = (**l).clone();
                copy.right = merge(&l.right, right);
                Some(Arc::new(copy))
            } else {
                let mut copy = (**r).clone();
                copy.left = merge(left, &r.left);
                Some(Arc::new(copy))
            }
        }
    }
}

/// Ascending iterator over a treap
pub struct Iter<'t, K, V> {
    stack: Vec<&'t Node<K, V>>,
}

impl<'t, K, V> Iter<'t, K, V> {
    fn push_left(&mut self, mut link: Option<&'t Node<K, V>>) {
        while let Some(node) = link {
            self.stack.push(node);
            link = node.left.as_deref();
        }
    }
}

impl<'t, K, V> Iterator for Iter<'t, K, V> {
    type Item = (&'t K, &'t V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(node.right.as_deref());
        Some((&node.key, &node.value))
    }
}

/// Descending iterator over the keys within a range
pub struct RangeRev<'t, 'q, K, V, Q: ?Sized> {
    stack: Vec<&'t Node<K, V>>,
    lower: Bound<&'q Q>,
    upper: Bound<&'q Q>,
}

impl<'t, 'q, K: Borrow<Q>, V, Q: Ord + ?Sized> RangeRev<'t, 'q, K, V, Q> {
    fn below_upper(&self, key: &Q) -> bool {
        match self.upper {
            Bound::Included(upper) => key <= upper,
            Bound::Excluded(upper) => key < upper,
            Bound::Unbounded => true,
        }
    }

    fn above_lower(&self, key: &Q) -> bool {
        match self.lower {
            Bound::Included(lower) => key >= lower,
            Bound::Excluded(lower) => key > lower,
            Bound::Unbounded => true,
        }
    }

    /// Push the path to the largest key within the upper bound
    fn descend(&mut self, mut link: Option<&'t Node<K, V>>) {
        while let Some(node) = link {
            if self.below_upper(node.key.borrow()) {
                self.stack.push(node);
                link = node.right.as_deref();
            } else {
                link = node.left.as_deref();
            }
        }
    }
}

impl<'t, 'q, K: Borrow<Q>, V, Q: Ord + ?Sized> Iterator for RangeRev<'t, 'q, K, V, Q> {
    type Item = (&'t K, &'t V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        if !self.above_lower(node.key.borrow()) {
            self.stack.clear();
            return None;
        }
        self.descend(node.left.as_deref());
        Some((&node.key, &node.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys<'a>(iter: impl Iterator<Item = (&'a String, &'a u32)>) -> Vec<&'a str> {
        iter.map(|(k, _)| k.as_str()).collect()
    }

    /// Check ordering and the heap property, returning the depth
    fn check_node(link: &Link<String, u32>, lo: Option<&str>, hi: Option<&str>) -> usize {
        let Some(node) = link else { return 0 };
        assert!(lo.is_none_or(|lo| node.key.as_str() > lo));
        assert!(hi.is_none_or(|hi| node.key.as_str() < hi));
        for child in [&node.left, &node.right].into_iter().flatten() {
            assert!(node.priority <= child.priority);
        }
        let left = check_node(&node.left, lo, Some(&node.key));
        let right = check_node(&node.right, Some(&node.key), hi);
        1 + left.max(right)
    }

    #[test]
    fn test_snapshot_survives_remove() {
        let t0: Treap<String, u32> = Treap::new();
        let t1 = t0.insert("b".into(), 2).insert("a".into(), 1).insert("c".into(), 3);
        let snapshot = t1.clone();
        let t2 = t1.remove("a").unwrap();

        assert_eq!(snapshot.get("a"), Some(&1));
        assert_eq!(t2.get("a"), None);
        assert_eq!(t2.get("b"), Some(&2));
        assert_eq!(t2.len(), 2);
        assert_eq!(snapshot.len(), 3);
        assert!(t2.remove("a").is_none());
    }

    #[test]
    fn test_insert_replaces_value() {
        let t = Treap::new().insert("x".to_string(), 1u32);
        let t2 = t.insert("x".to_string(), 2);
        assert_eq!(t.get("x"), Some(&1));
        assert_eq!(t2.get("x"), Some(&2));
        assert_eq!(t2.len(), 1);
    }

    #[test]
    fn test_stays_ordered_and_balanced() {
        let mut t: Treap<String, u32> = Treap::new();
        for i in 0..2000u32 {
            t = t.insert(format!("file-{i:05}"), i);
        }
        for i in (0..2000u32).step_by(3) {
            t = t.remove(format!("file-{i:05}").as_str()).unwrap();
        }
        let depth = check_node(&t.root, None, None);
        assert!(depth < 60, "depth {depth}");
        assert_eq!(t.len(), 2000 - 667);
        assert_eq!(t.iter().count(), t.len());
        let ascending = keys(t.iter());
        assert!(ascending.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_range_rev_respects_bounds() {
        let mut t: Treap<String, u32> = Treap::new();
        for (i, name) in ["a", "b", "c", "d", "e", "f"].iter().enumerate() {
            t = t.insert(name.to_string(), i as u32);
        }
        assert_eq!(keys(t.iter_rev()), vec!["f", "e", "d", "c", "b", "a"]);
        assert_eq!(
            keys(t.range_rev(Bound::Included("b"), Bound::Included("d"))),
            vec!["d", "c", "b"]
        );
        assert_eq!(
            keys(t.range_rev(Bound::Excluded("b"), Bound::Unbounded)),
            vec!["f", "e", "d", "c"]
        );
        assert_eq!(
            keys(t.range_rev(Bound::Included("bb"), Bound::Included("cc"))),
            vec!["c"]
        );
        assert!(t.range_rev(Bound::Included("x"), Bound::Unbounded).next().is_none());
    }

    #[test]
    fn test_nodes_are_shared_between_versions() {
        let t1: Treap<String, Arc<u32>> = ["a", "b", "c", "d"]
            .iter()
            .fold(Treap::new(), |t, k| t.insert(k.to_string(), Arc::new(0)));
        let value = t1.get("d").cloned().unwrap();
        let t2 = t1.insert("e".to_string(), Arc::new(1));
        assert!(Arc::strong_count(&value) >= 2);
        drop(t1);
        drop(t2);
        assert_eq!(Arc::strong_count(&value), 1);
    }
}
