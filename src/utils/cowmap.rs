//! Persistent ordered map with copy-on-write structural sharing.
//!
//! Cloning a [`CowMap`] is O(1): both handles point at the same tree. An insert
//! copies only the nodes on the path from the root to the key (plus the few
//! nodes touched by rebalancing); every other subtree stays shared with the
//! snapshots that existed before. Nodes owned by a single handle are updated in
//! place. A snapshot never observes mutations made through another handle.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

type Link<K, V> = Option<Arc<Node<K, V>>>;

struct Node<K, V> {
    key: K,
    value: Arc<V>,
    left: Link<K, V>,
    right: Link<K, V>,
    height: u8,
}

// manual impl: values are behind an `Arc`, so `V: Clone` is not needed
impl<K: Clone, V> Clone for Node<K, V> {
    fn clone(&self) -> Self {
        Node {
            key: self.key.clone(),
            value: Arc::clone(&self.value),
            left: self.left.clone(),
            right: self.right.clone(),
            height: self.height,
        }
    }
}

fn height<K, V>(link: &Link<K, V>) -> u8 {
    link.as_ref().map_or(0, |node| node.height)
}

impl<K, V> Node<K, V> {
    fn leaf(key: K, value: V) -> Node<K, V> {
        Node {
            key,
            value: Arc::new(value),
            left: None,
            right: None,
            height: 1,
        }
    }

    fn update_height(&mut self) {
        self.height = 1 + height(&self.left).max(height(&self.right));
    }

    fn balance_factor(&self) -> i16 {
        i16::from(height(&self.left)) - i16::from(height(&self.right))
    }
}

/// Ordered map from `K` to `V` whose clones share structure.
pub struct CowMap<K, V> {
    root: Link<K, V>,
    len: usize,
}

impl<K, V> Clone for CowMap<K, V> {
    fn clone(&self) -> Self {
        CowMap {
            root: self.root.clone(),
            len: self.len,
        }
    }
}

impl<K, V> Default for CowMap<K, V> {
    fn default() -> Self {
        CowMap { root: None, len: 0 }
    }
}

impl<K: Ord + Clone, V> CowMap<K, V> {
    pub fn new() -> CowMap<K, V> {
        CowMap::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Drops this handle's reference to the tree; other snapshots are unaffected.
    pub fn clear(&mut self) {
        self.root = None;
        self.len = 0;
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let mut link = &self.root;
        while let Some(node) = link {
            match key.cmp(&node.key) {
                Ordering::Less => link = &node.left,
                Ordering::Greater => link = &node.right,
                Ordering::Equal => return Some(node.value.as_ref()),
            }
        }
        None
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Inserts or replaces the value for `key`. Returns `true` if the key is new.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        let inserted = insert_at(&mut self.root, key, value);
        if inserted {
            self.len += 1;
        }
        inserted
    }

    /// Visits every entry in ascending key order.
    pub fn for_each<F: FnMut(&K, &V)>(&self, mut f: F) {
        inorder(&self.root, &mut f);
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter {
            stack: Vec::with_capacity(height(&self.root) as usize),
            remaining: self.len,
        };
        iter.push_left(&self.root);
        iter
    }

    /// Whether both handles refer to the very same tree.
    pub fn ptr_eq(&self, other: &CowMap<K, V>) -> bool {
        match (&self.root, &other.root) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

fn insert_at<K: Ord + Clone, V>(link: &mut Link<K, V>, key: K, value: V) -> bool {
    let inserted = match link {
        None => {
            *link = Some(Arc::new(Node::leaf(key, value)));
            return true;
        }
        Some(node) => {
            let node = Arc::make_mut(node);
            match key.cmp(&node.key) {
                Ordering::Less => insert_at(&mut node.left, key, value),
                Ordering::Greater => insert_at(&mut node.right, key, value),
                Ordering::Equal => {
                    node.value = Arc::new(value);
                    return false;
                }
            }
        }
    };
    if inserted {
        rebalance(link);
    }
    inserted
}

fn rebalance<K: Clone, V>(link: &mut Link<K, V>) {
    let Some(node) = link.as_mut() else { return };
    let node = Arc::make_mut(node);
    node.update_height();
    let balance = node.balance_factor();

    if balance > 1 {
        if node.left.as_ref().map_or(0, |l| l.balance_factor()) < 0 {
            rotate_left(&mut node.left);
        }
        rotate_right(link);
    } else if balance < -1 {
        if node.right.as_ref().map_or(0, |r| r.balance_factor()) > 0 {
            rotate_right(&mut node.right);
        }
        rotate_left(link);
    }
}

fn rotate_right<K: Clone, V>(link: &mut Link<K, V>) {
    let Some(mut top) = link.take() else { return };
    let top_node = Arc::make_mut(&mut top);
    let Some(mut pivot) = top_node.left.take() else {
        *link = Some(top);
        return;
    };
    let pivot_node = Arc::make_mut(&mut pivot);
    top_node.left = pivot_node.right.take();
    top_node.update_height();
    pivot_node.right = Some(top);
    pivot_node.update_height();
    *link = Some(pivot);
}

fn rotate_left<K: Clone, V>(link: &mut Link<K, V>) {
    let Some(mut top) = link.take() else { return };
    let top_node = Arc::make_mut(&mut top);
    let Some(mut pivot) = top_node.right.take() else {
        *link = Some(top);
        return;
    };
    let pivot_node = Arc::make_mut(&mut pivot);
    top_node.right = pivot_node.left.take();
    top_node.update_height();
    pivot_node.left = Some(top);
    pivot_node.update_height();
    *link = Some(pivot);
}

fn inorder<K, V, F: FnMut(&K, &V)>(link: &Link<K, V>, f: &mut F) {
    if let Some(node) = link {
        inorder(&node.left, f);
        f(&node.key, node.value.as_ref());
        inorder(&node.right, f);
    }
}

/// In-order iterator over a [`CowMap`].
pub struct Iter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iter<'a, K, V> {
    fn push_left(&mut self, mut link: &'a Link<K, V>) {
        while let Some(node) = link {
            self.stack.push(node.as_ref());
            link = &node.left;
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.push_left(&node.right);
        self.remaining -= 1;
        Some((&node.key, node.value.as_ref()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<'a, K: Ord + Clone, V> IntoIterator for &'a CowMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: Ord + Clone, V> FromIterator<(K, V)> for CowMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = CowMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<K: Ord + Clone + fmt::Debug, V: fmt::Debug> fmt::Debug for CowMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn node_addresses<K, V>(link: &Link<K, V>, out: &mut HashSet<usize>) {
        if let Some(node) = link {
            out.insert(Arc::as_ptr(node) as usize);
            node_addresses(&node.left, out);
            node_addresses(&node.right, out);
        }
    }

    #[test]
    fn insert_and_get() {
        let mut map = CowMap::new();
        assert!(map.is_empty());
        assert!(map.insert(3, "c"));
        assert!(map.insert(1, "a"));
        assert!(map.insert(2, "b"));
        assert!(!map.insert(2, "B"));

        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&1), Some(&"a"));
        assert_eq!(map.get(&2), Some(&"B"));
        assert_eq!(map.get(&4), None);
        assert!(map.contains_key(&3));
    }

    #[test]
    fn traversal_is_ordered() {
        let keys = [42, 7, 19, 3, 88, 61, 5, 23, 1, 99, 50];
        let map: CowMap<i32, i32> = keys.iter().map(|&k| (k, -k)).collect();

        let mut visited = Vec::new();
        map.for_each(|k, v| visited.push((*k, *v)));
        let mut expected: Vec<(i32, i32)> = keys.iter().map(|&k| (k, -k)).collect();
        expected.sort();
        assert_eq!(visited, expected);

        let iterated: Vec<(i32, i32)> = map.iter().map(|(k, v)| (*k, *v)).collect();
        assert_eq!(iterated, expected);
        assert_eq!(map.iter().len(), keys.len());
    }

    #[test]
    fn sequential_inserts_stay_balanced() {
        let map: CowMap<u32, ()> = (0..1000).map(|k| (k, ())).collect();
        // AVL height bound: 1.44 * log2(n + 2)
        assert!(height(&map.root) <= 14, "height {}", height(&map.root));
    }

    #[test]
    fn snapshots_are_unaffected_by_later_inserts() {
        let a: CowMap<u32, String> = (0..100).map(|k| (k, k.to_string())).collect();
        let mut b = a.clone();
        assert!(a.ptr_eq(&b));

        assert!(!b.insert(50, "fifty".to_string()));
        assert!(b.insert(1000, "thousand".to_string()));

        assert_eq!(a.get(&50).map(String::as_str), Some("50"));
        assert_eq!(a.get(&1000), None);
        assert_eq!(a.len(), 100);
        assert_eq!(b.get(&50).map(String::as_str), Some("fifty"));

        for k in (0..100).filter(|&k| k != 50) {
            // same value object, not a copy
            assert!(std::ptr::eq(a.get(&k).unwrap(), b.get(&k).unwrap()));
        }
    }

    #[test]
    fn insert_copies_only_a_path() {
        let a: CowMap<u32, u32> = (0..1024).map(|k| (k * 2, k)).collect();
        let mut b = a.clone();
        b.insert(513, 0);

        let mut shared = HashSet::new();
        node_addresses(&a.root, &mut shared);
        let mut fresh = HashSet::new();
        node_addresses(&b.root, &mut fresh);
        let copied = fresh.difference(&shared).count();

        // path copy plus rebalancing touches O(log n) nodes
        assert!(copied <= 2 * height(&b.root) as usize, "copied {copied} nodes");
    }

    #[test]
    fn unshared_inserts_mutate_in_place() {
        let mut map: CowMap<u32, u32> = (0..16).map(|k| (k, k)).collect();
        let root = Arc::as_ptr(map.root.as_ref().unwrap());
        map.insert(7, 70);
        assert_eq!(Arc::as_ptr(map.root.as_ref().unwrap()), root);
        assert_eq!(map.get(&7), Some(&70));
    }

    #[test]
    fn clear_leaves_clones_intact() {
        let mut a: CowMap<u32, u32> = (0..10).map(|k| (k, k)).collect();
        let b = a.clone();
        a.clear();
        assert!(a.is_empty());
        assert_eq!(a.len(), 0);
        assert_eq!(b.len(), 10);
        assert_eq!(b.get(&9), Some(&9));
    }
}
