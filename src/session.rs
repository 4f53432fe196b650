//! Synchronized navigation over a comparison result and the two trees it was
//! made from, plus the operations that act on a selection of it.
//!
//! The view (normally the result of `diff::compare`) always moves. The
//! reference (`old`, normally the store) and the ground truth (`new`, normally
//! the filesystem) follow as long as they have a counterpart of the directory
//! entered; otherwise they stay behind until the view comes back up.

use crate::checksum::Checksum;
use crate::container::NodeContainer;
use crate::node::{Node, NodeStatistics, NodeStatus, UniqueKey};
use crate::tree::{self, Tree, TreeError, copy_to, pre_order_apply, set_status, total_status};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, info};

pub struct Session {
    view: Box<dyn Tree>,
    old: Option<Box<dyn Tree>>,
    new: Option<Box<dyn Tree>>,
}

/// `tree` if it exists and is positioned at `depth`.
fn aligned(tree: &mut Option<Box<dyn Tree>>, depth: usize) -> Option<&mut (dyn Tree + 'static)> {
    tree.as_deref_mut().filter(|t| t.depth() == depth)
}

/// Whether `key` exists at `depth` in `tree`; `None` if there is no tree.
///
/// A tree left behind at a shallower depth has no counterpart.
fn presence(
    tree: &mut Option<Box<dyn Tree>>,
    depth: usize,
    key: &UniqueKey,
) -> Result<Option<bool>, TreeError> {
    match tree.as_deref_mut() {
        None => Ok(None),
        Some(tree) if tree.depth() == depth => Ok(Some(tree.node_by_key(key)?.is_some())),
        Some(_) => Ok(Some(false)),
    }
}

fn inconsistency(key: &UniqueKey) -> TreeError {
    TreeError::InvalidState(format!("{key} vanished from the view"))
}

impl Session {
    pub fn new(view: Box<dyn Tree>, old: Option<Box<dyn Tree>>, new: Option<Box<dyn Tree>>) -> Self {
        Session { view, old, new }
    }

    pub fn depth(&self) -> usize {
        self.view.depth()
    }

    /// Depths of view, reference and ground truth.
    pub fn depths(&self) -> (usize, Option<usize>, Option<usize>) {
        (
            self.view.depth(),
            self.old.as_ref().map(|t| t.depth()),
            self.new.as_ref().map(|t| t.depth()),
        )
    }

    pub fn is_root(&self) -> bool {
        self.view.is_root()
    }

    pub fn current_path(&self) -> String {
        self.view.current_path()
    }

    pub fn view_mut(&mut self) -> &mut dyn Tree {
        self.view.as_mut()
    }

    pub fn children(&mut self) -> Result<NodeContainer, TreeError> {
        self.view.children()
    }

    pub fn node_by_key(&mut self, key: &UniqueKey) -> Result<Option<Node>, TreeError> {
        self.view.node_by_key(key)
    }

    pub fn node_by_name(&mut self, name: &str) -> Result<Option<Node>, TreeError> {
        self.view.node_by_name(name)
    }

    /// File counts and sizes by status below the current directory of the view.
    pub fn statistics(&mut self) -> Result<NodeStatistics, TreeError> {
        tree::statistics(self.view.as_mut(), None)
    }

    pub fn goto_root(&mut self) -> Result<(), TreeError> {
        self.view.goto_root()?;
        for tree in [&mut self.old, &mut self.new].into_iter().flatten() {
            tree.goto_root()?;
        }
        Ok(())
    }

    pub fn down(&mut self, node: &Node) -> Result<(), TreeError> {
        let depth = self.view.depth();
        self.view.down(node)?;

        let key = node.key();
        for tree in [&mut self.old, &mut self.new] {
            if let Some(tree) = aligned(tree, depth)
                && let Some(counterpart) = tree.node_by_key(&key)?
            {
                tree.down(&counterpart)?;
            }
        }
        Ok(())
    }

    /// Leaves the current directory and refreshes its status in the view
    /// from its children, unless it only exists on one side.
    pub fn up(&mut self) -> Result<(), TreeError> {
        let depth = self.view.depth();
        let status = total_status(self.view.as_mut())?;

        for tree in [&mut self.old, &mut self.new] {
            if let Some(tree) = aligned(tree, depth) {
                tree.up()?;
            }
        }
        let key = UniqueKey::directory(self.view.up()?);
        let mut dir = self.view.node_by_key(&key)?.ok_or_else(|| inconsistency(&key))?;

        let parent_depth = self.view.depth();
        let in_old = presence(&mut self.old, parent_depth, &key)?;
        let in_new = presence(&mut self.new, parent_depth, &key)?;
        let derived = match (in_old, in_new) {
            (None, None) => !matches!(dir.status, NodeStatus::Missing | NodeStatus::New),
            (old, new) => old != Some(false) && new != Some(false),
        };

        if derived && dir.status != status {
            debug!("{}: {} -> {}", dir.path(), dir.status, status);
            dir.status = status;
            self.view.update(&dir)?;
        }
        Ok(())
    }

    /// Drops entries from the view without touching the store.
    ///
    /// An entry without a counterpart in the ground truth (or any entry, if
    /// `unconditional`) is removed. Otherwise it takes the ground truth's
    /// metadata and is marked `OK` along with its subtree, and `Missing`
    /// descendants are removed.
    #[allow(dead_code)]
    pub fn ignore(&mut self, keys: &[UniqueKey], unconditional: bool) -> Result<(), TreeError> {
        let depth = self.view.depth();
        for key in keys {
            let node = self.view.node_by_key(key)?.ok_or_else(|| inconsistency(key))?;
            let in_new = presence(&mut self.new, depth, key)?;
            let vanished = match in_new {
                Some(present) => !present,
                None => node.status == NodeStatus::Missing,
            };
            if unconditional || vanished {
                self.view.delete(key)?;
                continue;
            }

            let mut node = node;
            if let Some(new) = aligned(&mut self.new, depth)
                && let Some(current) = new.node_by_key(key)?
                && let Some(mut info) = current.info
            {
                // Listings are not hashed yet.
                if info.checksum.is_none() {
                    info.checksum = node.checksum().copied();
                }
                node.info = Some(info);
            }
            mark_ok(self.view.as_mut(), node)?;
        }
        self.view.commit()
    }

    /// Writes the current state of the selected entries to the reference and
    /// commits it.
    ///
    /// Entries only in the ground truth are inserted with their subtree,
    /// entries only in the reference are deleted with their subtree, changed
    /// files are updated, and directories on both sides are descended. Every
    /// accepted entry is `OK` in the view afterwards, or gone from it.
    pub fn accept(&mut self, keys: &[UniqueKey]) -> Result<(), TreeError> {
        let depth = self.view.depth();
        match self.old.as_deref() {
            None => {
                return Err(TreeError::InvalidState(
                    "there is no reference tree to accept into".into(),
                ));
            }
            Some(old) if old.depth() != depth => {
                return Err(TreeError::InvalidState(format!(
                    "{:?} does not exist in the reference tree; accept its parent directory",
                    self.view.current_path()
                )));
            }
            Some(_) => {}
        }

        for key in keys {
            let node = self.view.node_by_key(key)?.ok_or_else(|| inconsistency(key))?;
            self.accept_node(node)?;
        }

        if let Some(old) = self.old.as_deref_mut() {
            old.commit()?;
        }
        self.view.commit()?;
        info!("Accepted {} entries in {:?}", keys.len(), self.view.current_path());
        Ok(())
    }

    /// Accepts every entry of the current directory.
    pub fn accept_all(&mut self) -> Result<(), TreeError> {
        let keys: Vec<UniqueKey> = self.view.children()?.keys().cloned().collect();
        self.accept(&keys)
    }

    fn accept_node(&mut self, node: Node) -> Result<(), TreeError> {
        let depth = self.view.depth();
        let key = node.key();
        let in_old = presence(&mut self.old, depth, &key)? == Some(true);
        let in_new = presence(&mut self.new, depth, &key)?
            .unwrap_or(node.status != NodeStatus::Missing);

        if node.is_directory() && in_old && in_new {
            self.down(&node)?;
            for child in self.view.children()? {
                self.accept_node(child)?;
            }
            return self.up();
        }

        let Some(old) = aligned(&mut self.old, depth) else {
            return Err(TreeError::InvalidState(
                "reference tree lost its position".into(),
            ));
        };
        let view = self.view.as_mut();

        match (in_old, in_new) {
            (false, true) => {
                debug!("Storing {}", node.path());
                let mut fresh = node.clone();
                fresh.node_id = None;
                copy_to(view, old, Some(&fresh))?;
                set_status(view, NodeStatus::OK, Some(&node))?;
            }
            (true, false) => {
                debug!("Forgetting {}", node.path());
                old.delete(&key)?;
                view.delete(&key)?;
            }
            (false, false) => view.delete(&key)?,
            (true, true) => {
                if node.status != NodeStatus::OK {
                    debug!("Updating {}", node.path());
                    let stored = old.node_by_key(&key)?.ok_or_else(|| inconsistency(&key))?;
                    let mut updated = node.clone();
                    old.transfer_identity(&mut updated, &stored);
                    old.update(&updated)?;

                    let mut shown = node;
                    shown.status = NodeStatus::OK;
                    shown.previous = None;
                    view.update(&shown)?;
                }
            }
        }
        Ok(())
    }

    /// Removes entries from the ground truth (the filesystem, normally).
    ///
    /// Entries the reference still knows are shown as `Missing` afterwards,
    /// others disappear from the view.
    #[allow(dead_code)]
    pub fn delete(&mut self, keys: &[UniqueKey]) -> Result<(), TreeError> {
        let depth = self.view.depth();
        let Some(new) = aligned(&mut self.new, depth) else {
            return Err(TreeError::InvalidState(format!(
                "{:?} does not exist in the ground truth tree",
                self.view.current_path()
            )));
        };

        for key in keys {
            new.delete(key)?;
            if self.view.node_by_key(key)?.is_some() {
                self.view.delete(key)?;
            }
            if let Some(old) = aligned(&mut self.old, depth)
                && let Some(stored) = old.node_by_key(key)?
            {
                copy_to(old, self.view.as_mut(), Some(&stored))?;
                let shown = self.view.node_by_key(key)?.ok_or_else(|| inconsistency(key))?;
                set_status(self.view.as_mut(), NodeStatus::Missing, Some(&shown))?;
            }
        }
        self.view.commit()
    }

    /// Whether losing this entry would lose content for good: its reference
    /// checksum exists nowhere in the ground truth.
    ///
    /// `None` when that cannot be told (directories, no ground truth tree).
    pub fn has_danger_of_loss(&mut self, node: &Node) -> Result<Option<bool>, TreeError> {
        danger_of_loss(&mut self.new, node)
    }

    /// `has_danger_of_loss` for every file below the current directory of the
    /// view, by path.
    pub fn losses(&mut self) -> Result<BTreeMap<String, bool>, TreeError> {
        let mut losses = BTreeMap::new();
        let new = &mut self.new;
        pre_order_apply(self.view.as_mut(), None, true, &mut |_, node| {
            if let Some(danger) = danger_of_loss(new, node)? {
                losses.insert(node.path().to_string(), danger);
            }
            Ok(())
        })?;
        Ok(losses)
    }

    /// Paths with `checksum` in the reference and in the ground truth, if
    /// both trees are present.
    pub fn paths_by_checksum(
        &mut self,
        checksum: &Checksum,
    ) -> Result<Option<(BTreeSet<String>, BTreeSet<String>)>, TreeError> {
        match (self.old.as_deref_mut(), self.new.as_deref_mut()) {
            (Some(old), Some(new)) => Ok(Some((
                old.paths_by_checksum(checksum)?,
                new.paths_by_checksum(checksum)?,
            ))),
            _ => Ok(None),
        }
    }

    /// Closes every tree, reporting the first failure.
    pub fn close(&mut self) -> Result<(), TreeError> {
        let view = self.view.close();
        let old = self.old.as_deref_mut().map_or(Ok(()), |t| t.close());
        let new = self.new.as_deref_mut().map_or(Ok(()), |t| t.close());
        view.and(old).and(new)
    }
}

fn danger_of_loss(new: &mut Option<Box<dyn Tree>>, node: &Node) -> Result<Option<bool>, TreeError> {
    let Some(new) = new.as_deref_mut() else {
        return Ok(None);
    };
    if node.is_directory() {
        return Ok(None);
    }
    let checksum = match node.status {
        NodeStatus::Missing => node.checksum(),
        NodeStatus::Warn | NodeStatus::Error => {
            node.previous.as_ref().and_then(|info| info.checksum.as_ref())
        }
        _ => return Ok(Some(false)),
    };
    match checksum {
        Some(checksum) => Ok(Some(new.paths_by_checksum(checksum)?.is_empty())),
        None => Ok(None),
    }
}

/// Marks `node` and its subtree `OK` in `view`, dropping `Missing` entries.
fn mark_ok(view: &mut dyn Tree, mut node: Node) -> Result<(), TreeError> {
    if node.status == NodeStatus::Missing {
        return view.delete(&node.key());
    }
    if node.is_directory() {
        view.down(&node)?;
        for child in view.children()? {
            mark_ok(view, child)?;
        }
        view.up()?;
    }
    node.status = NodeStatus::OK;
    node.previous = None;
    view.update(&node)
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(<view> depth={} path={:?}",
            self.view.depth(),
            self.view.current_path()
        )?;
        if let Some(old) = &self.old {
            write!(f, ", <old> depth={} path={:?}", old.depth(), old.current_path())?;
        }
        if let Some(new) = &self.new {
            write!(f, ", <new> depth={} path={:?}", new.depth(), new.current_path())?;
        }
        f.write_str(")")
    }
}
