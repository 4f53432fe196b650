use crate::checksum::Checksum;
use crate::container::NodeContainer;
use crate::node::{Node, UniqueKey, join_path};
use crate::progress::{ProgressSink, Signals};
use crate::tree::{Tree, TreeError};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// A scratch tree held entirely in memory, used for comparison results.
pub struct MemoryTree {
    root: Node,
    cursor: Vec<UniqueKey>,
    signals: Signals,
    checksum_index: HashMap<Checksum, BTreeSet<String>>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    pub fn new() -> Self {
        let mut root = Node::root();
        root.children = Some(NodeContainer::new());
        MemoryTree {
            root,
            cursor: Vec::new(),
            signals: Signals::default(),
            checksum_index: HashMap::new(),
        }
    }

    /// Wraps an already built node hierarchy, e.g. the result of an in-place
    /// comparison. `root` becomes the synthetic root.
    #[allow(dead_code)]
    pub fn from_root(mut root: Node) -> Self {
        root.name = String::new();
        root.chain_to("", None);
        let children = root.children.get_or_insert_with(NodeContainer::new);
        ensure_directories_populated(children);

        let mut checksum_index: HashMap<Checksum, BTreeSet<String>> = HashMap::new();
        children.pre_order_apply(&mut checksum_index, &mut |node, index| {
            if let Some(checksum) = node.checksum() {
                index
                    .entry(*checksum)
                    .or_default()
                    .insert(node.path().to_string());
            }
        });

        MemoryTree {
            root,
            cursor: Vec::new(),
            signals: Signals::default(),
            checksum_index,
        }
    }

    /// Gives up the tree, returning its root with the full hierarchy.
    #[allow(dead_code)]
    pub fn into_root(self) -> Node {
        self.root
    }

    fn current_level(&self) -> Result<&NodeContainer, TreeError> {
        let mut dir = &self.root;
        for key in &self.cursor {
            dir = dir
                .children
                .as_ref()
                .and_then(|children| children.get(key))
                .ok_or_else(|| vanished(key))?;
        }
        dir.children
            .as_ref()
            .ok_or_else(|| TreeError::InvalidState("current directory has no children".into()))
    }

    fn current_level_mut(&mut self) -> Result<&mut NodeContainer, TreeError> {
        let mut dir = &mut self.root;
        for key in &self.cursor {
            dir = dir
                .children
                .get_or_insert_with(NodeContainer::new)
                .get_mut(key)
                .ok_or_else(|| vanished(key))?;
        }
        Ok(dir.children.get_or_insert_with(NodeContainer::new))
    }

    fn index(&mut self, node: &Node) {
        if let Some(checksum) = node.checksum() {
            self.checksum_index
                .entry(*checksum)
                .or_default()
                .insert(node.path().to_string());
        }
    }

    fn unindex(&mut self, node: &Node) {
        if let Some(checksum) = node.checksum()
            && let Some(paths) = self.checksum_index.get_mut(checksum)
        {
            paths.remove(node.path());
            if paths.is_empty() {
                self.checksum_index.remove(checksum);
            }
        }
    }
}

fn vanished(key: &UniqueKey) -> TreeError {
    TreeError::InvalidState(format!("directory {} vanished under the cursor", key))
}

fn ensure_directories_populated(container: &mut NodeContainer) {
    for node in container.iter_mut() {
        if node.is_directory() {
            ensure_directories_populated(node.children.get_or_insert_with(NodeContainer::new));
        }
    }
}

/// A copy of `node` without its subtree.
fn detached(node: &Node) -> Node {
    let mut copy = node.clone();
    copy.children = None;
    copy
}

impl Tree for MemoryTree {
    fn depth(&self) -> usize {
        self.cursor.len()
    }

    fn current_path(&self) -> String {
        self.cursor
            .iter()
            .fold(String::new(), |path, key| join_path(&path, key.name()))
    }

    fn reset(&mut self) -> Result<(), TreeError> {
        debug!("Resetting memory tree");
        *self = MemoryTree {
            signals: std::mem::take(&mut self.signals),
            ..MemoryTree::new()
        };
        Ok(())
    }

    fn goto_root(&mut self) -> Result<(), TreeError> {
        self.cursor.clear();
        Ok(())
    }

    fn up(&mut self) -> Result<String, TreeError> {
        self.cursor
            .pop()
            .map(|key| key.name().to_string())
            .ok_or_else(|| TreeError::InvalidNavigation("cannot go up from the root".into()))
    }

    fn down(&mut self, node: &Node) -> Result<(), TreeError> {
        if !node.is_directory() {
            return Err(TreeError::InvalidNavigation(format!(
                "cannot descend into file {}",
                node.name
            )));
        }
        let key = node.key();
        if !self.current_level()?.contains_key(&key) {
            return Err(TreeError::NotFound(join_path(&self.current_path(), &node.name)));
        }
        self.cursor.push(key);
        Ok(())
    }

    fn insert(&mut self, node: &mut Node) -> Result<(), TreeError> {
        let path = self.current_path();
        let key = node.key();
        if self.current_level()?.contains_key(&key) {
            return Err(TreeError::InvalidState(format!(
                "{} already exists in {:?}",
                key, path
            )));
        }

        node.chain_to(&path, None);
        let mut stored = detached(node);
        if stored.is_directory() {
            stored.children = Some(NodeContainer::new());
        }
        self.index(&stored);
        self.current_level_mut()?.insert(stored);
        Ok(())
    }

    fn update(&mut self, node: &Node) -> Result<(), TreeError> {
        let path = self.current_path();
        let key = node.key();
        let previous = self.current_level_mut()?.remove(&key).ok_or_else(|| {
            TreeError::InvalidState(format!("{} does not exist in {:?}", key, path))
        })?;
        self.unindex(&previous);

        let mut stored = detached(node);
        stored.children = previous.children;
        stored.chain_to(&path, None);
        self.index(&stored);
        self.current_level_mut()?.insert(stored);
        Ok(())
    }

    fn delete(&mut self, key: &UniqueKey) -> Result<(), TreeError> {
        let path = self.current_path();
        let node = self
            .current_level()?
            .get(key)
            .ok_or_else(|| TreeError::InvalidState(format!("{} does not exist in {:?}", key, path)))?
            .clone();

        let mut doomed = Vec::new();
        doomed.push(detached(&node));
        if let Some(children) = &node.children {
            children.pre_order_apply(&mut doomed, &mut |n, acc| acc.push(detached(n)));
        }
        for n in &doomed {
            self.unindex(n);
        }

        let removed = self.current_level_mut()?.delete_recursive(key).unwrap_or(0);
        debug!("Deleted {} nodes below {:?}", removed, join_path(&path, key.name()));
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TreeError> {
        Ok(())
    }

    fn children(&mut self) -> Result<NodeContainer, TreeError> {
        Ok(self.current_level()?.iter().map(detached).collect())
    }

    fn node_by_key(&mut self, key: &UniqueKey) -> Result<Option<Node>, TreeError> {
        Ok(self.current_level()?.get(key).map(detached))
    }

    fn calculate(&mut self, node: &mut Node) -> Result<(), TreeError> {
        let path = join_path(&self.current_path(), &node.name);
        self.signals.replay(&path, node)
    }

    fn transfer_identity(&self, _dest: &mut Node, _src: &Node) {}

    fn paths_by_checksum(&mut self, checksum: &Checksum) -> Result<BTreeSet<String>, TreeError> {
        Ok(self.checksum_index.get(checksum).cloned().unwrap_or_default())
    }

    fn register_handlers(&mut self, sink: Box<dyn ProgressSink>) {
        self.signals.register(sink);
    }

    fn unregister_handlers(&mut self) -> Option<Box<dyn ProgressSink>> {
        self.signals.unregister()
    }
}
