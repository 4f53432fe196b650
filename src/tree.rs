//! The cursor-based hierarchical store contract and the algorithms written
//! once against it.
//!
//! Every backend keeps a cursor on a "current directory". Depth 0 is the
//! synthetic root. `children()` lists the current level, `down()`/`up()` move
//! the cursor, and `insert`/`update`/`delete` act on the current level.

use crate::checksum::{Checksum, ChecksumError};
use crate::container::NodeContainer;
use crate::node::{Node, NodeStatistics, NodeStatus, UniqueKey};
use crate::progress::ProgressSink;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("Invalid navigation: {0}")]
    InvalidNavigation(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Store {path} is corrupt: {reason}")]
    CorruptStore { path: PathBuf, reason: String },
    #[error("Cancelled by user")]
    Cancelled,
    #[error("Checksum error: {0}")]
    Checksum(ChecksumError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl TreeError {
    /// Cancellation is control flow, not a failure to report.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TreeError::Cancelled)
    }
}

impl TreeError {
    /// Maps an I/O error on `path`, singling out permission problems.
    pub fn io_at(path: &Path) -> impl FnOnce(std::io::Error) -> TreeError + '_ {
        move |e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                TreeError::PermissionDenied(path.to_path_buf())
            } else {
                TreeError::Io(e)
            }
        }
    }
}

impl From<ChecksumError> for TreeError {
    fn from(e: ChecksumError) -> Self {
        match e {
            ChecksumError::Cancelled => TreeError::Cancelled,
            other => TreeError::Checksum(other),
        }
    }
}

pub trait Tree {
    /// Number of `down()` steps from the root.
    fn depth(&self) -> usize;

    /// Relative path of the current directory, `""` at the root.
    fn current_path(&self) -> String;

    /// Destroys and recreates the backend's state.
    fn reset(&mut self) -> Result<(), TreeError>;

    fn goto_root(&mut self) -> Result<(), TreeError>;

    /// Moves to the parent directory and returns the name of the directory
    /// that was left.
    fn up(&mut self) -> Result<String, TreeError>;

    /// Moves into the child directory `node` of the current level.
    fn down(&mut self, node: &Node) -> Result<(), TreeError>;

    /// Adds a new entry at the current level. Directories are added empty.
    fn insert(&mut self, node: &mut Node) -> Result<(), TreeError>;

    /// Rewrites an existing entry of the current level.
    fn update(&mut self, node: &Node) -> Result<(), TreeError>;

    /// Removes an entry of the current level, with its whole subtree.
    fn delete(&mut self, key: &UniqueKey) -> Result<(), TreeError>;

    fn commit(&mut self) -> Result<(), TreeError>;

    /// The current level, each node chained to the current directory.
    /// Directory nodes come without children.
    fn children(&mut self) -> Result<NodeContainer, TreeError>;

    fn node_by_key(&mut self, key: &UniqueKey) -> Result<Option<Node>, TreeError> {
        Ok(self.children()?.remove(key))
    }

    /// Looks up a child by name, preferring a directory over a file.
    fn node_by_name(&mut self, name: &str) -> Result<Option<Node>, TreeError> {
        match self.node_by_key(&UniqueKey::directory(name))? {
            Some(node) => Ok(Some(node)),
            None => self.node_by_key(&UniqueKey::file(name)),
        }
    }

    /// The synthetic root directory with this backend's identity for it.
    fn root_node(&mut self) -> Result<Node, TreeError> {
        Ok(Node::root())
    }

    /// Realizes metadata and checksum of `node`, a child of the current level,
    /// and fires the progress signals for it.
    fn calculate(&mut self, node: &mut Node) -> Result<(), TreeError>;

    /// Gives `dest` the backend identity `src` holds in this tree.
    fn transfer_identity(&self, dest: &mut Node, src: &Node);

    /// Relative paths of every file with the given checksum.
    fn paths_by_checksum(&mut self, checksum: &Checksum) -> Result<BTreeSet<String>, TreeError>;

    fn register_handlers(&mut self, sink: Box<dyn ProgressSink>);

    fn unregister_handlers(&mut self) -> Option<Box<dyn ProgressSink>>;

    /// Releases the backend. Further use is an error.
    fn close(&mut self) -> Result<(), TreeError> {
        Ok(())
    }

    fn is_root(&self) -> bool {
        self.depth() == 0
    }
}

/// A visitor over tree nodes. It may mutate the tree it is given, but the
/// cursor must be back where it was when it returns.
pub type Visitor<'a> = dyn FnMut(&mut dyn Tree, &Node) -> Result<(), TreeError> + 'a;

/// Visits nodes parent-first.
///
/// With `node`, only that child of the current level and (if `recurse`) its
/// subtree are visited, otherwise every child of the current level.
pub fn pre_order_apply(
    tree: &mut dyn Tree,
    node: Option<&Node>,
    recurse: bool,
    visit: &mut Visitor<'_>,
) -> Result<(), TreeError> {
    match node {
        Some(node) => pre_order_node(tree, node, recurse, visit),
        None => pre_order_level(tree, recurse, visit),
    }
}

fn pre_order_node(
    tree: &mut dyn Tree,
    node: &Node,
    recurse: bool,
    visit: &mut Visitor<'_>,
) -> Result<(), TreeError> {
    visit(tree, node)?;
    if recurse && node.is_directory() {
        tree.down(node)?;
        pre_order_level(tree, recurse, visit)?;
        tree.up()?;
    }
    Ok(())
}

fn pre_order_level(
    tree: &mut dyn Tree,
    recurse: bool,
    visit: &mut Visitor<'_>,
) -> Result<(), TreeError> {
    for child in tree.children()? {
        pre_order_node(tree, &child, recurse, visit)?;
    }
    Ok(())
}

/// Visits nodes children-first. Scoping is as for `pre_order_apply`.
pub fn post_order_apply(
    tree: &mut dyn Tree,
    node: Option<&Node>,
    recurse: bool,
    visit: &mut Visitor<'_>,
) -> Result<(), TreeError> {
    match node {
        Some(node) => post_order_node(tree, node, recurse, visit),
        None => post_order_level(tree, recurse, visit),
    }
}

fn post_order_node(
    tree: &mut dyn Tree,
    node: &Node,
    recurse: bool,
    visit: &mut Visitor<'_>,
) -> Result<(), TreeError> {
    if recurse && node.is_directory() {
        tree.down(node)?;
        post_order_level(tree, recurse, visit)?;
        tree.up()?;
    }
    visit(tree, node)
}

fn post_order_level(
    tree: &mut dyn Tree,
    recurse: bool,
    visit: &mut Visitor<'_>,
) -> Result<(), TreeError> {
    for child in tree.children()? {
        post_order_node(tree, &child, recurse, visit)?;
    }
    Ok(())
}

/// File counts and sizes by status, below `node` or the current level.
pub fn statistics(tree: &mut dyn Tree, node: Option<&Node>) -> Result<NodeStatistics, TreeError> {
    let mut stats = NodeStatistics::new();
    pre_order_apply(tree, node, true, &mut |_, node| {
        stats.update(node);
        Ok(())
    })?;
    Ok(stats)
}

/// Sets `status` on `node` (or the current level) and everything below it.
pub fn set_status(
    tree: &mut dyn Tree,
    status: NodeStatus,
    node: Option<&Node>,
) -> Result<(), TreeError> {
    pre_order_apply(tree, node, true, &mut |tree, node| {
        let mut node = node.clone();
        node.status = status;
        tree.update(&node)
    })
}

/// Aggregated status of the current level.
pub fn total_status(tree: &mut dyn Tree) -> Result<NodeStatus, TreeError> {
    Ok(tree.children()?.aggregate_status())
}

/// Replicates `node` (or the whole current level) of `src` with its subtree
/// into the current level of `dest`, calculating every node on the way.
pub fn copy_to(
    src: &mut dyn Tree,
    dest: &mut dyn Tree,
    node: Option<&Node>,
) -> Result<(), TreeError> {
    match node {
        Some(node) => copy_node(src, dest, node),
        None => copy_level(src, dest),
    }
}

fn copy_level(src: &mut dyn Tree, dest: &mut dyn Tree) -> Result<(), TreeError> {
    for child in src.children()? {
        copy_node(src, dest, &child)?;
    }
    Ok(())
}

fn copy_node(src: &mut dyn Tree, dest: &mut dyn Tree, node: &Node) -> Result<(), TreeError> {
    let mut node = node.clone();
    node.children = None;
    src.calculate(&mut node)?;

    let mut copy = node.clone();
    dest.insert(&mut copy)?;

    if node.is_directory() {
        src.down(&node)?;
        dest.down(&copy)?;
        copy_level(src, dest)?;
        dest.up()?;
        src.up()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_tree::MemoryTree;
    use crate::node::NodeInfo;

    fn file(name: &str, size: u64) -> Node {
        Node::new_file(
            name,
            NodeInfo {
                size,
                ctime_nanos: 1,
                atime_nanos: 1,
                mtime_nanos: 1,
                checksum: Some(Checksum::from_bytes(&[size as u8; 32]).unwrap()),
            },
        )
    }

    /// d/ { x(1), e/ { y(2) } }, a(4)
    fn sample_tree() -> MemoryTree {
        let mut tree = MemoryTree::new();
        let mut d = Node::new_directory("d");
        tree.insert(&mut d).unwrap();
        tree.insert(&mut file("a", 4)).unwrap();
        tree.down(&d).unwrap();
        tree.insert(&mut file("x", 1)).unwrap();
        let mut e = Node::new_directory("e");
        tree.insert(&mut e).unwrap();
        tree.down(&e).unwrap();
        tree.insert(&mut file("y", 2)).unwrap();
        tree.goto_root().unwrap();
        tree
    }

    fn visited_paths(tree: &mut dyn Tree, pre: bool, node: Option<&Node>, recurse: bool) -> Vec<String> {
        let mut paths = Vec::new();
        let mut visit = |_: &mut dyn Tree, node: &Node| {
            paths.push(node.path().to_string());
            Ok::<(), TreeError>(())
        };
        if pre {
            pre_order_apply(tree, node, recurse, &mut visit).unwrap();
        } else {
            post_order_apply(tree, node, recurse, &mut visit).unwrap();
        }
        paths
    }

    #[test]
    fn pre_order_visits_parents_first() {
        let mut tree = sample_tree();
        assert_eq!(
            visited_paths(&mut tree, true, None, true),
            vec!["d", "d/e", "d/e/y", "d/x", "a"]
        );
        assert_eq!(tree.depth(), 0);
    }

    #[test]
    fn post_order_visits_children_first() {
        let mut tree = sample_tree();
        assert_eq!(
            visited_paths(&mut tree, false, None, true),
            vec!["d/e/y", "d/e", "d/x", "d", "a"]
        );
    }

    #[test]
    fn visits_can_be_scoped_and_flat() {
        let mut tree = sample_tree();
        let d = tree.node_by_key(&UniqueKey::directory("d")).unwrap().unwrap();

        assert_eq!(
            visited_paths(&mut tree, true, Some(&d), true),
            vec!["d", "d/e", "d/e/y", "d/x"]
        );
        assert_eq!(visited_paths(&mut tree, true, None, false), vec!["d", "a"]);
    }

    #[test]
    fn statistics_sum_all_files() {
        let mut tree = sample_tree();
        let stats = statistics(&mut tree, None).unwrap();
        assert_eq!(stats.file_count(), 3);
        assert_eq!(stats.total_size(), 7);
    }

    #[test]
    fn set_status_writes_back_subtree() {
        let mut tree = sample_tree();
        let d = tree.node_by_key(&UniqueKey::directory("d")).unwrap().unwrap();
        set_status(&mut tree, NodeStatus::New, Some(&d)).unwrap();

        let stats = statistics(&mut tree, None).unwrap();
        assert_eq!(stats.count(NodeStatus::New), 2);
        assert_eq!(
            tree.node_by_key(&UniqueKey::file("a")).unwrap().unwrap().status,
            NodeStatus::Undefined
        );
    }

    #[test]
    fn copy_to_replicates_structure() {
        let mut src = sample_tree();
        let mut dest = MemoryTree::new();
        copy_to(&mut src, &mut dest, None).unwrap();

        assert_eq!(
            visited_paths(&mut dest, true, None, true),
            vec!["d", "d/e", "d/e/y", "d/x", "a"]
        );
        let copied = statistics(&mut dest, None).unwrap();
        assert_eq!(copied.total_size(), 7);
    }

    #[test]
    fn total_status_aggregates_current_level() {
        let mut tree = sample_tree();
        set_status(&mut tree, NodeStatus::Missing, None).unwrap();
        assert_eq!(total_status(&mut tree).unwrap(), NodeStatus::Missing);

        let mut empty = MemoryTree::new();
        assert_eq!(total_status(&mut empty).unwrap(), NodeStatus::OK);
    }

    #[test]
    fn checksum_cancellation_maps_to_cancelled() {
        let err: TreeError = ChecksumError::Cancelled.into();
        assert!(err.is_cancelled());
        let err: TreeError = ChecksumError::PermissionDenied(PathBuf::from("x")).into();
        assert!(!err.is_cancelled());
    }
}
