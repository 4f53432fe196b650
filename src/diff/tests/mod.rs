use super::*;
use crate::checksum::Checksum;
use crate::filter::AcceptAll;
use crate::fs_tree::{FilesystemTree, META_DIR_NAME};
use crate::memory_tree::MemoryTree;
use crate::persistent_tree::PersistentTree;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

mod properties;
mod scenarios;

type Statuses = BTreeMap<String, NodeStatus>;

fn open_trees(root: &Path) -> (FilesystemTree, PersistentTree) {
    let fs_tree = FilesystemTree::new(root, Box::new(AcceptAll));
    let db = PersistentTree::open(&root.join(META_DIR_NAME)).unwrap();
    (fs_tree, db)
}

/// Records the current state of `root` in its store.
fn seal(root: &Path) {
    let (mut fs_tree, mut db) = open_trees(root);
    copy_to(&mut fs_tree, &mut db, None).unwrap();
    db.commit().unwrap();
    db.close().unwrap();
}

/// Keyed like `UniqueKey` display, with the full relative path.
fn flatten(container: &NodeContainer) -> Statuses {
    let mut statuses = Statuses::new();
    container.pre_order_apply(&mut statuses, &mut |node, acc| {
        let key = if node.is_directory() {
            format!("{}/", node.path())
        } else {
            node.path().to_string()
        };
        acc.insert(key, node.status);
    });
    statuses
}

/// Runs the in-place variant; returns the root status and every other node.
fn in_place(root: &Path, remove_ok_nodes: bool) -> (NodeStatus, Statuses) {
    let (mut fs_tree, mut db) = open_trees(root);
    let result = recursive_diff(&mut fs_tree, &mut db, remove_ok_nodes).unwrap();
    db.close().unwrap();

    assert_eq!(result.len(), 1);
    let root_node = result.get(&UniqueKey::directory("")).unwrap();
    (root_node.status, flatten(root_node.children.as_ref().unwrap()))
}

/// Runs the result-producing variant into a memory tree.
fn via_result(root: &Path, remove_ok_nodes: bool) -> (NodeStatus, Statuses) {
    let (mut fs_tree, mut db) = open_trees(root);
    let mut result = MemoryTree::new();
    let status = compare(&mut fs_tree, &mut db, &mut result, remove_ok_nodes).unwrap();
    db.close().unwrap();

    let root_node = result.into_root();
    (status, flatten(root_node.children.as_ref().unwrap()))
}

/// Runs both variants and checks that they agree.
fn diff_both(root: &Path, remove_ok_nodes: bool) -> (NodeStatus, Statuses) {
    let first = in_place(root, remove_ok_nodes);
    let second = via_result(root, remove_ok_nodes);
    assert_eq!(first, second, "comparison variants disagree");
    first
}

fn statuses(entries: &[(&str, NodeStatus)]) -> Statuses {
    entries
        .iter()
        .map(|(path, status)| (path.to_string(), *status))
        .collect()
}

fn set_old_mtime(path: &Path) {
    filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(1_000_000, 0)).unwrap();
}
