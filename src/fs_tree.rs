//! The live filesystem seen through the tree contract.
//!
//! Listing a directory collects size and timestamps for each entry, but
//! checksums are only computed by `calculate`, which is the expensive step of
//! every scan. Symlinks and other non-regular entries are skipped, as is the
//! metadata directory at the root.

use crate::checksum::Checksum;
use crate::container::NodeContainer;
use crate::filter::FileFilter;
use crate::node::{Node, NodeInfo, UniqueKey, join_path};
use crate::progress::{ProgressSink, Signals};
use crate::tree::{Tree, TreeError};
use std::collections::{BTreeSet, HashMap};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Name of the per-root directory holding the store and preferences.
pub const META_DIR_NAME: &str = ".treeseal";

pub struct FilesystemTree {
    root_dir: PathBuf,
    meta_dir: PathBuf,
    filter: Box<dyn FileFilter>,
    cursor: Vec<String>,
    signals: Signals,
    checksum_index: HashMap<Checksum, BTreeSet<String>>,
}

impl FilesystemTree {
    pub fn new(root_dir: &Path, filter: Box<dyn FileFilter>) -> Self {
        FilesystemTree {
            root_dir: root_dir.to_path_buf(),
            meta_dir: root_dir.join(META_DIR_NAME),
            filter,
            cursor: Vec::new(),
            signals: Signals::default(),
            checksum_index: HashMap::new(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn meta_dir(&self) -> &Path {
        &self.meta_dir
    }

    fn current_dir(&self) -> PathBuf {
        let mut dir = self.root_dir.clone();
        dir.extend(&self.cursor);
        dir
    }

    /// Builds the node for one directory entry, `None` if it is skipped.
    fn fetch(&self, dir: &Path, name: &str) -> Result<Option<Node>, TreeError> {
        let path = dir.join(name);
        let metadata = std::fs::symlink_metadata(&path).map_err(TreeError::io_at(&path))?;
        let file_type = metadata.file_type();

        if file_type.is_dir() {
            Ok(Some(Node::new_directory(name)))
        } else if file_type.is_file() {
            Ok(Some(Node::new_file(name, info_from_metadata(&metadata))))
        } else {
            debug!("Skipping non-regular entry {}", path.display());
            Ok(None)
        }
    }

    fn index(&mut self, path: &str, checksum: Checksum) {
        self.checksum_index
            .entry(checksum)
            .or_default()
            .insert(path.to_string());
    }

    fn unindex_below(&mut self, path: &str) {
        let prefix = format!("{path}/");
        self.checksum_index.retain(|_, paths| {
            paths.retain(|p| p != path && !p.starts_with(&prefix));
            !paths.is_empty()
        });
    }
}

fn nanos_since_epoch(time: std::io::Result<SystemTime>) -> u64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

#[cfg(unix)]
fn ctime_nanos(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;

    let secs = u64::try_from(metadata.ctime()).unwrap_or(0);
    let nanos = u64::try_from(metadata.ctime_nsec()).unwrap_or(0);
    secs.saturating_mul(1_000_000_000).saturating_add(nanos)
}

#[cfg(not(unix))]
fn ctime_nanos(metadata: &Metadata) -> u64 {
    nanos_since_epoch(metadata.created())
}

fn info_from_metadata(metadata: &Metadata) -> NodeInfo {
    NodeInfo {
        size: metadata.len(),
        ctime_nanos: ctime_nanos(metadata),
        atime_nanos: nanos_since_epoch(metadata.accessed()),
        mtime_nanos: nanos_since_epoch(metadata.modified()),
        checksum: None,
    }
}

impl Tree for FilesystemTree {
    fn depth(&self) -> usize {
        self.cursor.len()
    }

    fn current_path(&self) -> String {
        self.cursor.join("/")
    }

    /// Only makes sure the metadata directory exists; the filesystem itself
    /// is never wiped.
    fn reset(&mut self) -> Result<(), TreeError> {
        std::fs::create_dir_all(&self.meta_dir).map_err(TreeError::io_at(&self.meta_dir))?;
        self.checksum_index.clear();
        self.cursor.clear();
        Ok(())
    }

    fn goto_root(&mut self) -> Result<(), TreeError> {
        self.cursor.clear();
        Ok(())
    }

    fn up(&mut self) -> Result<String, TreeError> {
        self.cursor
            .pop()
            .ok_or_else(|| TreeError::InvalidNavigation("cannot go up from the root".into()))
    }

    fn down(&mut self, node: &Node) -> Result<(), TreeError> {
        if !node.is_directory() {
            return Err(TreeError::InvalidNavigation(format!(
                "cannot descend into file {}",
                node.name
            )));
        }
        let target = self.current_dir().join(&node.name);
        let is_real_dir = std::fs::symlink_metadata(&target)
            .map(|m| m.file_type().is_dir())
            .unwrap_or(false);
        if !is_real_dir {
            return Err(TreeError::NotFound(join_path(&self.current_path(), &node.name)));
        }
        self.cursor.push(node.name.clone());
        Ok(())
    }

    fn insert(&mut self, node: &mut Node) -> Result<(), TreeError> {
        debug!("Ignoring insert of {} into the filesystem", node.name);
        node.chain_to(&self.current_path(), None);
        Ok(())
    }

    fn update(&mut self, node: &Node) -> Result<(), TreeError> {
        debug!("Ignoring update of {} in the filesystem", node.name);
        Ok(())
    }

    /// Removes the entry from disk, recursively for directories.
    fn delete(&mut self, key: &UniqueKey) -> Result<(), TreeError> {
        let relative = join_path(&self.current_path(), key.name());
        if !self.children()?.contains_key(key) {
            return Err(TreeError::InvalidState(format!("{relative} does not exist")));
        }

        let path = self.current_dir().join(key.name());
        warn!("Removing {} from disk", path.display());
        if key.is_directory() {
            std::fs::remove_dir_all(&path).map_err(TreeError::io_at(&path))?;
        } else {
            std::fs::remove_file(&path).map_err(TreeError::io_at(&path))?;
        }
        self.unindex_below(&relative);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), TreeError> {
        Ok(())
    }

    fn children(&mut self) -> Result<NodeContainer, TreeError> {
        let dir = self.current_dir();
        let current_path = self.current_path();
        let read_dir = std::fs::read_dir(&dir).map_err(TreeError::io_at(&dir))?;

        let mut children = NodeContainer::new();
        for entry in read_dir {
            let entry = entry.map_err(TreeError::io_at(&dir))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!(
                    "Skipping {} because its name is not valid UTF-8",
                    entry.path().display()
                );
                continue;
            };

            if self.cursor.is_empty() && name == META_DIR_NAME {
                continue;
            }
            if !self.filter.accepted(&self.root_dir, &current_path, name) {
                continue;
            }

            if let Some(mut node) = self.fetch(&dir, name)? {
                node.chain_to(&current_path, None);
                children.insert(node);
            }
        }
        Ok(children)
    }

    fn node_by_key(&mut self, key: &UniqueKey) -> Result<Option<Node>, TreeError> {
        let dir = self.current_dir();
        let current_path = self.current_path();
        let name = key.name();

        if (self.cursor.is_empty() && name == META_DIR_NAME)
            || !dir.join(name).exists()
            || !self.filter.accepted(&self.root_dir, &current_path, name)
        {
            return Ok(None);
        }

        let node = self.fetch(&dir, name)?.filter(|node| node.key() == *key);
        Ok(node.map(|mut node| {
            node.chain_to(&current_path, None);
            node
        }))
    }

    /// Hashes a file, firing progress signals for every chunk.
    fn calculate(&mut self, node: &mut Node) -> Result<(), TreeError> {
        let relative = join_path(&self.current_path(), &node.name);
        let size = node.size();
        self.signals.new_node(&relative, size);

        if let Some(info) = node.info.as_mut() {
            let path = self.current_dir().join(&node.name);
            let signals = &mut self.signals;
            let checksum = Checksum::calculate_for_file(&path, |n| signals.bytes_done(n))?;
            info.checksum = Some(checksum);
            self.index(&relative, checksum);
        }
        Ok(())
    }

    fn transfer_identity(&self, _dest: &mut Node, _src: &Node) {}

    /// Only files hashed during this session are known.
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
