//! Entity model shared by every tree backend.
//!
//! A `Node` is one filesystem entry. Files carry a `NodeInfo`, directories do
//! not. Within one directory level a node is identified by its `UniqueKey`,
//! which combines the directory flag with the name so that a file and a
//! directory of the same name (one on each side of a comparison) never collide.

use crate::checksum::Checksum;
use crate::container::{NodeContainer, NodeHandle};
use std::fmt;

/// Status of a node after a comparison, ordered so that "most severe wins".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum NodeStatus {
    #[default]
    Undefined,
    Unknown,
    OK,
    New,
    Missing,
    Warn,
    Error,
}

impl NodeStatus {
    pub const ALL: [NodeStatus; 7] = [
        NodeStatus::Undefined,
        NodeStatus::Unknown,
        NodeStatus::OK,
        NodeStatus::New,
        NodeStatus::Missing,
        NodeStatus::Warn,
        NodeStatus::Error,
    ];

    /// Derives a directory's status from the statuses of its children.
    ///
    /// No children means `OK`, children that all share one status yield that
    /// status, anything else is `Unknown`.
    pub fn aggregate<I>(statuses: I) -> NodeStatus
    where
        I: IntoIterator<Item = NodeStatus>,
    {
        let mut statuses = statuses.into_iter();
        let Some(first) = statuses.next() else {
            return NodeStatus::OK;
        };
        if statuses.all(|s| s == first) {
            first
        } else {
            NodeStatus::Unknown
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeStatus::Undefined => "Undefined",
            NodeStatus::Unknown => "Unknown",
            NodeStatus::OK => "OK",
            NodeStatus::New => "New",
            NodeStatus::Missing => "Missing",
            NodeStatus::Warn => "Warning",
            NodeStatus::Error => "Error",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata of a file. Directories carry none.
///
/// Timestamps are nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Eq)]
pub struct NodeInfo {
    pub size: u64,
    pub ctime_nanos: u64,
    pub atime_nanos: u64,
    pub mtime_nanos: u64,
    /// `None` until the owning tree has calculated it.
    pub checksum: Option<Checksum>,
}

impl NodeInfo {
    /// Compares size, change time and modification time.
    ///
    /// The checksum is compared separately so that a metadata change can be
    /// told apart from a content change. Unlike the other timestamps, the
    /// access time is recorded but deliberately not compared: reading a file
    /// to checksum it moves its atime, so a second scan would see every file
    /// as changed.
    pub fn same_metadata(&self, other: &NodeInfo) -> bool {
        self.size == other.size
            && self.ctime_nanos == other.ctime_nanos
            && self.mtime_nanos == other.mtime_nanos
    }
}

impl PartialEq for NodeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.same_metadata(other)
    }
}

/// Identifies a node among its siblings.
///
/// Ordering puts directories before files, each group sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniqueKey {
    is_file: bool,
    name: String,
}

impl UniqueKey {
    pub fn new(name: impl Into<String>, is_directory: bool) -> Self {
        UniqueKey {
            is_file: !is_directory,
            name: name.into(),
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        Self::new(name, false)
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self::new(name, true)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_directory(&self) -> bool {
        !self.is_file
    }
}

impl fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_file {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/", self.name)
        }
    }
}

/// One filesystem entry.
///
/// `path` and `parent_id` are derived when the node is chained to its parent
/// and cannot be set independently.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub name: String,
    path: String,
    /// Row identity in the persistent store, absent for other backends.
    pub node_id: Option<u64>,
    parent_id: Option<u64>,
    pub info: Option<NodeInfo>,
    /// The reference side's metadata of a compared file.
    pub previous: Option<NodeInfo>,
    pub status: NodeStatus,
    /// Populated only while a traversal holds the subtree in memory.
    pub children: Option<NodeContainer>,
    pub(crate) handle: Option<NodeHandle>,
}

impl Node {
    pub fn new_directory(name: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            ..Node::default()
        }
    }

    pub fn new_file(name: impl Into<String>, info: NodeInfo) -> Self {
        Node {
            name: name.into(),
            info: Some(info),
            ..Node::default()
        }
    }

    /// The synthetic root directory at depth 0.
    pub fn root() -> Self {
        Node::new_directory("")
    }

    pub fn is_directory(&self) -> bool {
        self.info.is_none()
    }

    pub fn is_file(&self) -> bool {
        self.info.is_some()
    }

    pub fn key(&self) -> UniqueKey {
        UniqueKey::new(self.name.clone(), self.is_directory())
    }

    /// Path relative to the tree root, `""` for the root itself.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent_id(&self) -> Option<u64> {
        self.parent_id
    }

    /// Session-scoped handle, assigned when the node enters a container.
    pub fn handle(&self) -> Option<NodeHandle> {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.info.as_ref().map_or(0, |info| info.size)
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        self.info.as_ref().and_then(|info| info.checksum.as_ref())
    }

    /// Attaches this node below `parent`, recomputing path and parent identity.
    pub fn chain_with_parent(&mut self, parent: &Node) {
        self.chain_to(parent.path(), parent.node_id);
    }

    /// Attaches this node below the directory at `parent_path`.
    ///
    /// Already populated children are re-chained as well.
    pub fn chain_to(&mut self, parent_path: &str, parent_id: Option<u64>) {
        self.path = join_path(parent_path, &self.name);
        self.parent_id = parent_id;
        if let Some(children) = self.children.as_mut() {
            let path = self.path.clone();
            let id = self.node_id;
            for child in children.iter_mut() {
                child.chain_to(&path, id);
            }
        }
    }

    /// Copies the backend identity (row and parent row) of `other`.
    pub(crate) fn take_identity_of(&mut self, other: &Node) {
        self.node_id = other.node_id;
        self.parent_id = other.parent_id;
    }
}

/// Joins a relative directory path and an entry name with `/`.
pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        parent.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// File count and total size per status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStatistics {
    file_counts: [u64; 7],
    file_sizes: [u64; 7],
}

impl NodeStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts `node` if it is a file, directories are ignored.
    pub fn update(&mut self, node: &Node) {
        if let Some(info) = &node.info {
            let i = node.status.index();
            self.file_counts[i] += 1;
            self.file_sizes[i] += info.size;
        }
    }

    pub fn add(&mut self, other: &NodeStatistics) {
        for i in 0..self.file_counts.len() {
            self.file_counts[i] += other.file_counts[i];
            self.file_sizes[i] += other.file_sizes[i];
        }
    }

    pub fn count(&self, status: NodeStatus) -> u64 {
        self.file_counts[status.index()]
    }

    pub fn size(&self, status: NodeStatus) -> u64 {
        self.file_sizes[status.index()]
    }

    pub fn file_count(&self) -> u64 {
        self.file_counts.iter().sum()
    }

    pub fn total_size(&self) -> u64 {
        self.file_sizes.iter().sum()
    }
}

impl fmt::Display for NodeStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for status in NodeStatus::ALL {
            write!(
                f,
                " {}=({}/{})",
                status,
                self.count(status),
                size_to_string(self.size(status))
            )?;
        }
        f.write_str(" )")
    }
}

/// Human-readable size with decimal units.
pub fn size_to_string(size: u64) -> String {
    const UNITS: [&str; 6] = ["K", "M", "G", "T", "P", "E"];

    if size < 1000 {
        return format!("{size} B");
    }
    let mut value = size as f64 / 1000.0;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{:.1} {}B", value, UNITS[unit])
}
