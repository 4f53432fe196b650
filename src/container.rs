use crate::node::{Node, NodeStatistics, NodeStatus, UniqueKey};
use std::collections::{BTreeMap, HashMap, btree_map};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Session-scoped identity of a node, assigned when it enters a container.
///
/// Handles are never reused within a process, so a handle held by a UI
/// selection can only ever resolve to the node it was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(u64);

impl NodeHandle {
    fn next() -> Self {
        NodeHandle(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

/// The siblings of one directory level.
///
/// Iteration follows the sort order of unique keys. Nodes can also be found by
/// the handle assigned on insertion.
#[derive(Debug, Clone, Default)]
pub struct NodeContainer {
    by_key: BTreeMap<UniqueKey, Node>,
    by_handle: HashMap<NodeHandle, UniqueKey>,
}

impl NodeContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `node` under its unique key, replacing (and returning) any
    /// sibling with the same key. The node receives a fresh handle.
    pub fn insert(&mut self, mut node: Node) -> Option<Node> {
        let key = node.key();
        let handle = NodeHandle::next();
        node.handle = Some(handle);
        self.by_handle.insert(handle, key.clone());

        let replaced = self.by_key.insert(key, node);
        if let Some(old) = &replaced
            && let Some(old_handle) = old.handle
        {
            self.by_handle.remove(&old_handle);
        }
        replaced
    }

    pub fn get(&self, key: &UniqueKey) -> Option<&Node> {
        self.by_key.get(key)
    }

    pub fn get_mut(&mut self, key: &UniqueKey) -> Option<&mut Node> {
        self.by_key.get_mut(key)
    }

    pub fn contains_key(&self, key: &UniqueKey) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn by_handle(&self, handle: NodeHandle) -> Option<&Node> {
        self.by_handle.get(&handle).and_then(|key| self.by_key.get(key))
    }

    /// Removes a node (with whatever children it holds) without visiting them.
    pub fn remove(&mut self, key: &UniqueKey) -> Option<Node> {
        let node = self.by_key.remove(key)?;
        if let Some(handle) = node.handle {
            self.by_handle.remove(&handle);
        }
        Some(node)
    }

    /// Removes a node, deleting its populated subtree bottom-up first.
    ///
    /// Returns the number of nodes removed, or `None` if `key` is absent.
    pub fn delete_recursive(&mut self, key: &UniqueKey) -> Option<usize> {
        let node = self.by_key.get_mut(key)?;
        let mut removed = 0;
        if let Some(children) = node.children.as_mut() {
            let child_keys: Vec<UniqueKey> = children.keys().cloned().collect();
            for child_key in &child_keys {
                removed += children.delete_recursive(child_key).unwrap_or(0);
            }
        }
        self.remove(key);
        Some(removed + 1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &UniqueKey> {
        self.by_key.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.by_key.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.by_key.values_mut()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// Moves every node of `other` into this container. Entries of `other`
    /// win on key collision.
    pub fn merge(&mut self, other: NodeContainer) {
        for node in other {
            self.insert(node);
        }
    }

    /// Visits every node, each parent before its children.
    pub fn pre_order_apply<A, F>(&self, acc: &mut A, visit: &mut F)
    where
        F: FnMut(&Node, &mut A),
    {
        for node in self.iter() {
            visit(node, acc);
            if let Some(children) = &node.children {
                children.pre_order_apply(acc, visit);
            }
        }
    }

    /// Visits every node, each parent after its children.
    pub fn post_order_apply<A, F>(&self, acc: &mut A, visit: &mut F)
    where
        F: FnMut(&Node, &mut A),
    {
        for node in self.iter() {
            if let Some(children) = &node.children {
                children.post_order_apply(acc, visit);
            }
            visit(node, acc);
        }
    }

    /// Sets `status` on every node of the populated subtree.
    pub fn set_status(&mut self, status: NodeStatus) {
        for node in self.iter_mut() {
            node.status = status;
            if let Some(children) = node.children.as_mut() {
                children.set_status(status);
            }
        }
    }

    pub fn statistics(&self) -> NodeStatistics {
        let mut stats = NodeStatistics::new();
        self.pre_order_apply(&mut stats, &mut |node, stats| stats.update(node));
        stats
    }

    /// Status of a directory holding exactly these children.
    pub fn aggregate_status(&self) -> NodeStatus {
        NodeStatus::aggregate(self.iter().map(|node| node.status))
    }
}

impl IntoIterator for NodeContainer {
    type Item = Node;
    type IntoIter = btree_map::IntoValues<UniqueKey, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.by_key.into_values()
    }
}

impl FromIterator<Node> for NodeContainer {
    fn from_iter<T: IntoIterator<Item = Node>>(iter: T) -> Self {
        let mut container = NodeContainer::new();
        for node in iter {
            container.insert(node);
        }
        container
    }
}
