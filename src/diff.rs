//! Two-tree comparison.
//!
//! One tree is ground truth (usually the filesystem), the other the reference
//! (usually the store). Nodes are matched per directory level by unique key:
//!
//! - present on both sides: a file is `OK` if metadata and checksum agree,
//!   `Error` if only the checksum differs, and `Warn` if the metadata differs;
//!   a directory aggregates the statuses of its children
//! - only in ground truth: `New`, with its whole subtree
//! - only in the reference: `Missing`, with its whole subtree as stored
//!
//! `recursive_diff` classifies the ground truth nodes themselves and returns
//! them; `compare` writes classified copies into a third tree.

use crate::container::NodeContainer;
use crate::node::{Node, NodeInfo, NodeStatus, UniqueKey};
use crate::tree::{Tree, TreeError, copy_to, set_status, total_status};
use tracing::debug;

/// Classifies a file present on both sides.
pub fn classify_file(current: &NodeInfo, reference: &NodeInfo) -> NodeStatus {
    if !current.same_metadata(reference) {
        NodeStatus::Warn
    } else if current.checksum == reference.checksum {
        NodeStatus::OK
    } else {
        NodeStatus::Error
    }
}

fn classify_matched_file(node: &mut Node, reference: &Node) -> Result<(), TreeError> {
    match (&node.info, &reference.info) {
        (Some(current), Some(stored)) => {
            node.status = classify_file(current, stored);
            node.previous = Some(stored.clone());
            debug!("{}: {}", node.path(), node.status);
            Ok(())
        }
        _ => Err(TreeError::InvalidState(format!(
            "{} matched a node of a different kind",
            node.path()
        ))),
    }
}

/// Compares `this` against `other` from their roots and returns the
/// classified nodes of `this`, merged with the `Missing` nodes of `other`.
///
/// The result holds a single root directory node whose children are the
/// top level. With `remove_ok_nodes`, `OK` nodes are left out; a fully clean
/// comparison yields the bare root.
#[allow(dead_code)]
pub fn recursive_diff(
    this: &mut dyn Tree,
    other: &mut dyn Tree,
    remove_ok_nodes: bool,
) -> Result<NodeContainer, TreeError> {
    this.goto_root()?;
    other.goto_root()?;

    let mut root = this.root_node()?;
    let other_root = other.root_node()?;
    other.transfer_identity(&mut root, &other_root);

    let mut children = this.children()?;
    let other_children = other.children()?;
    diff_level(this, other, &mut children, other_children, remove_ok_nodes)?;

    root.status = children.aggregate_status();
    root.children = Some(children);

    let mut result = NodeContainer::new();
    result.insert(root);
    Ok(result)
}

fn diff_level(
    this: &mut dyn Tree,
    other: &mut dyn Tree,
    these: &mut NodeContainer,
    mut others: NodeContainer,
    remove_ok_nodes: bool,
) -> Result<(), TreeError> {
    let keys: Vec<UniqueKey> = these.keys().cloned().collect();
    let mut ok_keys = Vec::new();

    for key in keys {
        let Some(node) = these.get_mut(&key) else {
            continue;
        };
        this.calculate(node)?;

        match others.remove(&key) {
            Some(mut reference) => {
                this.transfer_identity(&mut reference, node);
                other.transfer_identity(node, &reference);
                other.calculate(&mut reference)?;

                if node.is_directory() {
                    this.down(node)?;
                    other.down(&reference)?;
                    let mut children = this.children()?;
                    let other_children = other.children()?;
                    diff_level(this, other, &mut children, other_children, remove_ok_nodes)?;
                    other.up()?;
                    this.up()?;
                    node.status = children.aggregate_status();
                    node.children = Some(children);
                } else {
                    classify_matched_file(node, &reference)?;
                }

                if remove_ok_nodes && node.status == NodeStatus::OK {
                    ok_keys.push(key);
                }
            }
            None => {
                node.status = NodeStatus::New;
                if node.is_directory() {
                    this.down(node)?;
                    node.children = Some(load_subtree(this, NodeStatus::New)?);
                    this.up()?;
                }
            }
        }
    }

    for key in &ok_keys {
        these.remove(key);
    }

    let mut missing = NodeContainer::new();
    for mut node in others {
        other.calculate(&mut node)?;
        node.status = NodeStatus::Missing;
        if node.is_directory() {
            other.down(&node)?;
            node.children = Some(load_subtree(other, NodeStatus::Missing)?);
            other.up()?;
        }
        missing.insert(node);
    }
    these.merge(missing);
    Ok(())
}

/// Reads the current level of `tree` and everything below it into memory,
/// tagging every node with `status`.
fn load_subtree(tree: &mut dyn Tree, status: NodeStatus) -> Result<NodeContainer, TreeError> {
    let mut level = tree.children()?;
    for node in level.iter_mut() {
        tree.calculate(node)?;
        node.status = status;
        if node.is_directory() {
            tree.down(node)?;
            node.children = Some(load_subtree(tree, status)?);
            tree.up()?;
        }
    }
    Ok(level)
}

/// Compares the current levels of `this` and `other` and writes the
/// classified nodes into the current level of `result`, recursing through all
/// three trees in lockstep.
///
/// Returns the aggregated status of the level written. With
/// `remove_ok_nodes`, `OK` nodes are removed from `result` right after being
/// classified.
pub fn compare(
    this: &mut dyn Tree,
    other: &mut dyn Tree,
    result: &mut dyn Tree,
    remove_ok_nodes: bool,
) -> Result<NodeStatus, TreeError> {
    let these = this.children()?;

    for node in these.iter() {
        let key = node.key();
        match other.node_by_key(&key)? {
            Some(mut reference) => {
                let mut node = node.clone();
                this.calculate(&mut node)?;
                other.calculate(&mut reference)?;

                let mut written = node.clone();
                other.transfer_identity(&mut written, &reference);
                result.insert(&mut written)?;

                if node.is_directory() {
                    this.down(&node)?;
                    other.down(&reference)?;
                    result.down(&written)?;
                    written.status = compare(this, other, result, remove_ok_nodes)?;
                    result.up()?;
                    other.up()?;
                    this.up()?;
                } else {
                    classify_matched_file(&mut written, &reference)?;
                }

                if remove_ok_nodes && written.status == NodeStatus::OK {
                    result.delete(&key)?;
                } else {
                    result.update(&written)?;
                }
            }
            None => {
                copy_to(this, result, Some(node))?;
                tag_copied(result, &key, NodeStatus::New)?;
            }
        }
    }

    for reference in other.children()? {
        let key = reference.key();
        if these.contains_key(&key) {
            continue;
        }
        copy_to(other, result, Some(&reference))?;
        tag_copied(result, &key, NodeStatus::Missing)?;
    }

    total_status(result)
}

fn tag_copied(result: &mut dyn Tree, key: &UniqueKey, status: NodeStatus) -> Result<(), TreeError> {
    let copied = result
        .node_by_key(key)?
        .ok_or_else(|| TreeError::NotFound(format!("{} was not copied", key)))?;
    set_status(result, status, Some(&copied))
}

#[cfg(test)]
mod tests;
