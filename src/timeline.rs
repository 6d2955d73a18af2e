//! An ordered multimap keyed by tick position.
//!
//! Nodes live in a growable arena and link to each other through indices, with index `0`
//! reserved for the black sentinel leaf. Deleted slots are recycled through a free list and
//! stamped with a new generation, so a stale `NodeRef` never aliases a newer node.

use crate::prelude::*;

/// Index of the sentinel leaf.
const NIL: usize = 0;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Color {
    Red,
    Black,
}

#[derive(Clone, Debug)]
struct Node<K, V> {
    parent: usize,
    left: usize,
    right: usize,
    color: Color,
    generation: u32,
    /// `None` for the sentinel and for vacant slots.
    entry: Option<(K, V)>,
}
impl<K, V> Node<K, V> {
    fn vacant(color: Color) -> Node<K, V> {
        Node {
            parent: NIL,
            left: NIL,
            right: NIL,
            color,
            generation: 0,
            entry: None,
        }
    }
}

/// A handle to a node of an [`OrderedTimeline`].
///
/// Handles stay valid across insertions and deletions of other nodes. Once the node itself is
/// deleted the handle goes stale, and every operation treats it as absent.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct NodeRef {
    index: usize,
    generation: u32,
}

/// A red-black tree keyed by `K`, holding one value per node.
///
/// Several nodes may share a key; they are kept in insertion order, so an in-order walk visits
/// equal keys oldest first.
///
/// Cloning the timeline deep-copies the whole arena.
#[derive(Clone, Debug)]
pub struct OrderedTimeline<K, V> {
    nodes: Vec<Node<K, V>>,
    root: usize,
    free: Vec<usize>,
    len: usize,
}
impl<K: Ord, V> Default for OrderedTimeline<K, V> {
    fn default() -> Self {
        OrderedTimeline::new()
    }
}
impl<K: Ord, V> OrderedTimeline<K, V> {
    /// Create an empty timeline.
    pub fn new() -> OrderedTimeline<K, V> {
        OrderedTimeline {
            nodes: vec![Node::vacant(Color::Black)],
            root: NIL,
            free: Vec::new(),
            len: 0,
        }
    }

    /// Amount of values stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remove every node, invalidating all outstanding handles.
    pub fn clear(&mut self) {
        let generation = self
            .nodes
            .iter()
            .map(|node| node.generation)
            .max()
            .unwrap_or(0)
            .wrapping_add(1);
        self.nodes.truncate(1);
        self.nodes[NIL] = Node::vacant(Color::Black);
        self.nodes[NIL].generation = generation;
        self.root = NIL;
        self.free.clear();
        self.len = 0;
    }

    /// Insert a value at the given key, after any values already stored at that key.
    pub fn insert(&mut self, key: K, value: V) -> NodeRef {
        let z = self.alloc(key, value);
        let mut y = NIL;
        let mut x = self.root;
        while x != NIL {
            y = x;
            x = if self.key(z) < self.key(x) {
                self.nodes[x].left
            } else {
                self.nodes[x].right
            };
        }
        self.nodes[z].parent = y;
        if y == NIL {
            self.root = z;
        } else if self.key(z) < self.key(y) {
            self.nodes[y].left = z;
        } else {
            self.nodes[y].right = z;
        }
        self.insert_fixup(z);
        self.len += 1;
        debug_assert!(self.color(self.root) == Color::Black && self.color(NIL) == Color::Black);
        self.node_ref(z)
    }

    /// Remove a node, returning its key and value.
    ///
    /// Removing a stale handle is a no-op and returns `None`.
    pub fn delete(&mut self, node: NodeRef) -> Option<(K, V)> {
        let z = self.resolve(node)?;
        let mut y = z;
        let mut y_color = self.color(y);
        let x;
        if self.nodes[z].left == NIL {
            x = self.nodes[z].right;
            self.transplant(z, x);
        } else if self.nodes[z].right == NIL {
            x = self.nodes[z].left;
            self.transplant(z, x);
        } else {
            y = self.minimum(self.nodes[z].right);
            y_color = self.color(y);
            x = self.nodes[y].right;
            if self.nodes[y].parent == z {
                //`x` may be the sentinel, whose parent link the fixup relies on
                self.nodes[x].parent = y;
            } else {
                self.transplant(y, x);
                let z_right = self.nodes[z].right;
                self.nodes[y].right = z_right;
                self.nodes[z_right].parent = y;
            }
            self.transplant(z, y);
            let z_left = self.nodes[z].left;
            self.nodes[y].left = z_left;
            self.nodes[z_left].parent = y;
            self.nodes[y].color = self.color(z);
        }
        if y_color == Color::Black {
            self.delete_fixup(x);
        }
        self.nodes[NIL].parent = NIL;
        self.len -= 1;
        debug_assert!(self.color(self.root) == Color::Black && self.color(NIL) == Color::Black);
        self.release(z)
    }

    /// Get the key and value of a node.
    #[inline]
    pub fn get(&self, node: NodeRef) -> Option<(&K, &V)> {
        let x = self.resolve(node)?;
        self.nodes[x].entry.as_ref().map(|(k, v)| (k, v))
    }

    /// Get a mutable reference to the value of a node.
    ///
    /// Keys cannot be modified in place, since that could break the ordering.
    #[inline]
    pub fn get_mut(&mut self, node: NodeRef) -> Option<&mut V> {
        let x = self.resolve(node)?;
        self.nodes[x].entry.as_mut().map(|(_, v)| v)
    }

    /// The node with the smallest key.
    pub fn first(&self) -> Option<NodeRef> {
        self.some_ref(self.minimum(self.root))
    }

    /// The node with the largest key.
    pub fn last(&self) -> Option<NodeRef> {
        self.some_ref(self.maximum(self.root))
    }

    /// The in-order successor of a node.
    pub fn next(&self, node: NodeRef) -> Option<NodeRef> {
        let x = self.resolve(node)?;
        self.some_ref(self.successor(x))
    }

    /// The in-order predecessor of a node.
    pub fn prev(&self, node: NodeRef) -> Option<NodeRef> {
        let x = self.resolve(node)?;
        self.some_ref(self.predecessor(x))
    }

    /// The first node stored at exactly `key`.
    pub fn find_exact(&self, key: &K) -> Option<NodeRef> {
        let mut x = self.root;
        let mut found = NIL;
        while x != NIL {
            match key.cmp(self.key(x)) {
                Ordering::Less => x = self.nodes[x].left,
                Ordering::Greater => x = self.nodes[x].right,
                Ordering::Equal => {
                    //Keep looking left for an older node at the same key
                    found = x;
                    x = self.nodes[x].left;
                }
            }
        }
        self.some_ref(found)
    }

    /// All nodes stored at exactly `key`, in insertion order.
    pub fn find_all_at<'a>(&'a self, key: &'a K) -> impl Iterator<Item = NodeRef> + 'a {
        let mut cur = self.find_exact(key);
        core::iter::from_fn(move || {
            let node = cur?;
            cur = self
                .next(node)
                .filter(|&next| self.get(next).map_or(false, |(k, _)| k == key));
            Some(node)
        })
    }

    /// The right-most node whose key is at or below `threshold`.
    pub fn last_at_or_below(&self, threshold: &K) -> Option<NodeRef> {
        self.last_matching(|key, _| key <= threshold)
    }

    /// The right-most node whose key is strictly below `threshold`.
    ///
    /// Nodes stored exactly at `threshold` are skipped, which is what boundary detection
    /// wants when it needs the last distinct change before a point.
    pub fn last_below(&self, threshold: &K) -> Option<NodeRef> {
        self.last_matching(|key, _| key < threshold)
    }

    /// The right-most node whose derived scalar is at or below `threshold`.
    ///
    /// `selector` must be non-decreasing along the in-order sequence of nodes, which allows
    /// searching by a quantity accumulated over the keys rather than by the raw key.
    pub fn last_at_or_below_by<S, F>(&self, threshold: &S, selector: F) -> Option<NodeRef>
    where
        S: Ord,
        F: Fn(&K, &V) -> S,
    {
        self.last_matching(|key, value| selector(key, value) <= *threshold)
    }

    /// Iterate over all keys and values in order.
    pub fn iter(&self) -> Iter<K, V> {
        Iter {
            tree: self,
            cur: self.minimum(self.root),
        }
    }

    fn last_matching(&self, at_or_below: impl Fn(&K, &V) -> bool) -> Option<NodeRef> {
        let mut x = self.root;
        let mut best = NIL;
        while x != NIL {
            let (key, value) = self.entry(x);
            if at_or_below(key, value) {
                best = x;
                x = self.nodes[x].right;
            } else {
                x = self.nodes[x].left;
            }
        }
        self.some_ref(best)
    }

    fn alloc(&mut self, key: K, value: V) -> usize {
        let node = |generation| Node {
            parent: NIL,
            left: NIL,
            right: NIL,
            color: Color::Red,
            generation,
            entry: Some((key, value)),
        };
        match self.free.pop() {
            Some(idx) => {
                let generation = self.nodes[idx].generation;
                self.nodes[idx] = node(generation);
                idx
            }
            None => {
                self.nodes.push(node(self.nodes[NIL].generation));
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, x: usize) -> Option<(K, V)> {
        let node = &mut self.nodes[x];
        node.generation = node.generation.wrapping_add(1);
        node.parent = NIL;
        node.left = NIL;
        node.right = NIL;
        self.free.push(x);
        node.entry.take()
    }

    fn resolve(&self, node: NodeRef) -> Option<usize> {
        let slot = self.nodes.get(node.index)?;
        if node.index != NIL && slot.generation == node.generation && slot.entry.is_some() {
            Some(node.index)
        } else {
            None
        }
    }

    #[inline]
    fn node_ref(&self, x: usize) -> NodeRef {
        NodeRef {
            index: x,
            generation: self.nodes[x].generation,
        }
    }

    #[inline]
    fn some_ref(&self, x: usize) -> Option<NodeRef> {
        if x == NIL {
            None
        } else {
            Some(self.node_ref(x))
        }
    }

    #[inline]
    fn entry(&self, x: usize) -> (&K, &V) {
        match &self.nodes[x].entry {
            Some((key, value)) => (key, value),
            None => unreachable!("vacant slot linked into the tree"),
        }
    }

    #[inline]
    fn key(&self, x: usize) -> &K {
        self.entry(x).0
    }

    #[inline]
    fn color(&self, x: usize) -> Color {
        self.nodes[x].color
    }

    fn minimum(&self, mut x: usize) -> usize {
        if x == NIL {
            return NIL;
        }
        while self.nodes[x].left != NIL {
            x = self.nodes[x].left;
        }
        x
    }

    fn maximum(&self, mut x: usize) -> usize {
        if x == NIL {
            return NIL;
        }
        while self.nodes[x].right != NIL {
            x = self.nodes[x].right;
        }
        x
    }

    fn successor(&self, mut x: usize) -> usize {
        if self.nodes[x].right != NIL {
            return self.minimum(self.nodes[x].right);
        }
        let mut y = self.nodes[x].parent;
        while y != NIL && x == self.nodes[y].right {
            x = y;
            y = self.nodes[y].parent;
        }
        y
    }

    fn predecessor(&self, mut x: usize) -> usize {
        if self.nodes[x].left != NIL {
            return self.maximum(self.nodes[x].left);
        }
        let mut y = self.nodes[x].parent;
        while y != NIL && x == self.nodes[y].left {
            x = y;
            y = self.nodes[y].parent;
        }
        y
    }

    fn left_rotate(&mut self, x: usize) {
        let y = self.nodes[x].right;
        let y_left = self.nodes[y].left;
        self.nodes[x].right = y_left;
        if y_left != NIL {
            self.nodes[y_left].parent = x;
        }
        let x_parent = self.nodes[x].parent;
        self.nodes[y].parent = x_parent;
        if x_parent == NIL {
            self.root = y;
        } else if x == self.nodes[x_parent].left {
            self.nodes[x_parent].left = y;
        } else {
            self.nodes[x_parent].right = y;
        }
        self.nodes[y].left = x;
        self.nodes[x].parent = y;
    }

    fn right_rotate(&mut self, x: usize) {
        let y = self.nodes[x].left;
        let y_right = self.nodes[y].right;
        self.nodes[x].left = y_right;
        if y_right != NIL {
            self.nodes[y_right].parent = x;
        }
        let x_parent = self.nodes[x].parent;
        self.nodes[y].parent = x_parent;
        if x_parent == NIL {
            self.root = y;
        } else if x == self.nodes[x_parent].right {
            self.nodes[x_parent].right = y;
        } else {
            self.nodes[x_parent].left = y;
        }
        self.nodes[y].right = x;
        self.nodes[x].parent = y;
    }

    fn insert_fixup(&mut self, mut z: usize) {
        while self.color(self.nodes[z].parent) == Color::Red {
            let p = self.nodes[z].parent;
            let g = self.nodes[p].parent;
            if p == self.nodes[g].left {
                let uncle = self.nodes[g].right;
                if self.color(uncle) == Color::Red {
                    self.nodes[p].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[g].color = Color::Red;
                    z = g;
                } else {
                    if z == self.nodes[p].right {
                        z = p;
                        self.left_rotate(z);
                    }
                    let p = self.nodes[z].parent;
                    let g = self.nodes[p].parent;
                    self.nodes[p].color = Color::Black;
                    self.nodes[g].color = Color::Red;
                    self.right_rotate(g);
                }
            } else {
                let uncle = self.nodes[g].left;
                if self.color(uncle) == Color::Red {
                    self.nodes[p].color = Color::Black;
                    self.nodes[uncle].color = Color::Black;
                    self.nodes[g].color = Color::Red;
                    z = g;
                } else {
                    if z == self.nodes[p].left {
                        z = p;
                        self.right_rotate(z);
                    }
                    let p = self.nodes[z].parent;
                    let g = self.nodes[p].parent;
                    self.nodes[p].color = Color::Black;
                    self.nodes[g].color = Color::Red;
                    self.left_rotate(g);
                }
            }
        }
        let root = self.root;
        self.nodes[root].color = Color::Black;
    }

    /// Replace the subtree rooted at `u` with the subtree rooted at `v`.
    fn transplant(&mut self, u: usize, v: usize) {
        let u_parent = self.nodes[u].parent;
        if u_parent == NIL {
            self.root = v;
        } else if u == self.nodes[u_parent].left {
            self.nodes[u_parent].left = v;
        } else {
            self.nodes[u_parent].right = v;
        }
        self.nodes[v].parent = u_parent;
    }

    fn delete_fixup(&mut self, mut x: usize) {
        while x != self.root && self.color(x) == Color::Black {
            let p = self.nodes[x].parent;
            if x == self.nodes[p].left {
                let mut w = self.nodes[p].right;
                if self.color(w) == Color::Red {
                    self.nodes[w].color = Color::Black;
                    self.nodes[p].color = Color::Red;
                    self.left_rotate(p);
                    w = self.nodes[p].right;
                }
                if self.color(self.nodes[w].left) == Color::Black
                    && self.color(self.nodes[w].right) == Color::Black
                {
                    self.nodes[w].color = Color::Red;
                    x = p;
                } else {
                    if self.color(self.nodes[w].right) == Color::Black {
                        let w_left = self.nodes[w].left;
                        self.nodes[w_left].color = Color::Black;
                        self.nodes[w].color = Color::Red;
                        self.right_rotate(w);
                        w = self.nodes[p].right;
                    }
                    self.nodes[w].color = self.color(p);
                    self.nodes[p].color = Color::Black;
                    let w_right = self.nodes[w].right;
                    self.nodes[w_right].color = Color::Black;
                    self.left_rotate(p);
                    x = self.root;
                }
            } else {
                let mut w = self.nodes[p].left;
                if self.color(w) == Color::Red {
                    self.nodes[w].color = Color::Black;
                    self.nodes[p].color = Color::Red;
                    self.right_rotate(p);
                    w = self.nodes[p].left;
                }
                if self.color(self.nodes[w].right) == Color::Black
                    && self.color(self.nodes[w].left) == Color::Black
                {
                    self.nodes[w].color = Color::Red;
                    x = p;
                } else {
                    if self.color(self.nodes[w].left) == Color::Black {
                        let w_right = self.nodes[w].right;
                        self.nodes[w_right].color = Color::Black;
                        self.nodes[w].color = Color::Red;
                        self.left_rotate(w);
                        w = self.nodes[p].left;
                    }
                    self.nodes[w].color = self.color(p);
                    self.nodes[p].color = Color::Black;
                    let w_left = self.nodes[w].left;
                    self.nodes[w_left].color = Color::Black;
                    self.right_rotate(p);
                    x = self.root;
                }
            }
        }
        self.nodes[x].color = Color::Black;
    }

    /// Check every structural invariant of the tree, returning the black height on success.
    #[cfg(test)]
    pub(crate) fn validate(&self) -> StdResult<usize, &'static str> {
        if self.color(NIL) != Color::Black {
            return Err("sentinel is not black");
        }
        if self.color(self.root) != Color::Black {
            return Err("root is not black");
        }
        if self.root != NIL && self.nodes[self.root].parent != NIL {
            return Err("root has a parent");
        }
        let height = self.validate_subtree(self.root)?;
        let mut count = 0;
        let mut prev: Option<&K> = None;
        for (key, _) in self.iter() {
            if prev.map_or(false, |prev| prev > key) {
                return Err("keys out of order");
            }
            prev = Some(key);
            count += 1;
        }
        if count != self.len {
            return Err("length does not match node count");
        }
        Ok(height)
    }

    #[cfg(test)]
    fn validate_subtree(&self, x: usize) -> StdResult<usize, &'static str> {
        if x == NIL {
            return Ok(1);
        }
        let node = &self.nodes[x];
        if node.entry.is_none() {
            return Err("vacant slot linked into the tree");
        }
        for child in [node.left, node.right] {
            if child != NIL {
                if self.nodes[child].parent != x {
                    return Err("broken parent link");
                }
                if node.color == Color::Red && self.color(child) == Color::Red {
                    return Err("red node with a red child");
                }
            }
        }
        let left = self.validate_subtree(node.left)?;
        let right = self.validate_subtree(node.right)?;
        if left != right {
            return Err("unequal black height");
        }
        Ok(left + (node.color == Color::Black) as usize)
    }
}

/// An in-order iterator over an [`OrderedTimeline`].
pub struct Iter<'a, K, V> {
    tree: &'a OrderedTimeline<K, V>,
    cur: usize,
}
impl<'a, K: Ord, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);
    fn next(&mut self) -> Option<Self::Item> {
        if self.cur == NIL {
            return None;
        }
        let x = self.cur;
        self.cur = self.tree.successor(x);
        Some(self.tree.entry(x))
    }
}
