//! The sealed record of a tree, kept in SQLite.
//!
//! All nodes live in one `nodes` table linked by `parent_id`; the single row
//! without a parent is the synthetic root. Next to the database file a
//! signature file holds the checksum of the database as of the last close. A
//! store whose checksum does not match its signature is refused.
//!
//! Work happens inside one open transaction that only `commit()` makes
//! durable, so an abandoned scan leaves the store untouched.

use crate::checksum::Checksum;
use crate::container::NodeContainer;
use crate::node::{Node, NodeInfo, UniqueKey, join_path};
use crate::progress::{ProgressSink, Signals};
use crate::tree::{Tree, TreeError};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

pub const STORE_FILE_NAME: &str = "base.sqlite3";
pub const SIGNATURE_FILE_NAME: &str = "base.signature";

const TABLE: &str = "nodes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Col {
    NodeId,
    ParentId,
    Name,
    IsDirectory,
    Size,
    Ctime,
    Atime,
    Mtime,
    Checksum,
}

struct Column {
    col: Col,
    name: &'static str,
    sql_type: &'static str,
    not_null: bool,
}

/// The schema of the `nodes` table, in column order. Every statement and the
/// row decoder are derived from this list.
static COLUMNS: [Column; 9] = [
    Column {
        col: Col::NodeId,
        name: "node_id",
        sql_type: "INTEGER PRIMARY KEY",
        not_null: true,
    },
    Column {
        col: Col::ParentId,
        name: "parent_id",
        sql_type: "INTEGER REFERENCES nodes (node_id)",
        not_null: false,
    },
    Column {
        col: Col::Name,
        name: "name",
        sql_type: "TEXT",
        not_null: true,
    },
    Column {
        col: Col::IsDirectory,
        name: "is_directory",
        sql_type: "INTEGER",
        not_null: true,
    },
    Column {
        col: Col::Size,
        name: "size",
        sql_type: "INTEGER",
        not_null: false,
    },
    Column {
        col: Col::Ctime,
        name: "ctime",
        sql_type: "INTEGER",
        not_null: false,
    },
    Column {
        col: Col::Atime,
        name: "atime",
        sql_type: "INTEGER",
        not_null: false,
    },
    Column {
        col: Col::Mtime,
        name: "mtime",
        sql_type: "INTEGER",
        not_null: false,
    },
    Column {
        col: Col::Checksum,
        name: "checksum",
        sql_type: "BLOB",
        not_null: false,
    },
];

impl Col {
    fn index(self) -> usize {
        self as usize
    }
}

/// Every column except the row id, which SQLite assigns.
fn data_columns() -> impl Iterator<Item = &'static Column> {
    COLUMNS.iter().filter(|c| c.col != Col::NodeId)
}

fn column_list() -> String {
    COLUMNS.iter().map(|c| c.name).collect::<Vec<_>>().join(", ")
}

static CREATE_SCHEMA: LazyLock<String> = LazyLock::new(|| {
    let definitions: Vec<String> = COLUMNS
        .iter()
        .map(|c| {
            let constraint = if c.not_null { " NOT NULL" } else { "" };
            format!("{} {}{}", c.name, c.sql_type, constraint)
        })
        .collect();
    format!(
        "CREATE TABLE {TABLE} ({});
         CREATE INDEX {TABLE}_checksum ON {TABLE} (checksum);
         CREATE UNIQUE INDEX {TABLE}_sibling_key ON {TABLE} (parent_id, name, is_directory);",
        definitions.join(", ")
    )
});

static SELECT_CHILDREN: LazyLock<String> = LazyLock::new(|| {
    format!("SELECT {} FROM {TABLE} WHERE parent_id = ?1", column_list())
});

static SELECT_CHILD: LazyLock<String> = LazyLock::new(|| {
    format!(
        "SELECT {} FROM {TABLE} WHERE parent_id = ?1 AND name = ?2 AND is_directory = ?3",
        column_list()
    )
});

static SELECT_BY_ID: LazyLock<String> = LazyLock::new(|| {
    format!("SELECT {} FROM {TABLE} WHERE node_id = ?1", column_list())
});

static INSERT_NODE: LazyLock<String> = LazyLock::new(|| {
    let names: Vec<&str> = data_columns().map(|c| c.name).collect();
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {TABLE} ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    )
});

static UPDATE_NODE: LazyLock<String> = LazyLock::new(|| {
    let assignments: Vec<String> = data_columns()
        .enumerate()
        .map(|(i, c)| format!("{} = ?{}", c.name, i + 1))
        .collect();
    format!(
        "UPDATE {TABLE} SET {} WHERE node_id = ?{}",
        assignments.join(", "),
        assignments.len() + 1
    )
});

const INSERT_ROOT: &str = "INSERT INTO nodes (parent_id, name, is_directory) VALUES (NULL, '', 1)";
const SELECT_ROOT_IDS: &str = "SELECT node_id FROM nodes WHERE parent_id IS NULL";
const SELECT_IDS_BY_CHECKSUM: &str = "SELECT node_id FROM nodes WHERE checksum = ?1";
const SELECT_NAME_AND_PARENT: &str = "SELECT name, parent_id FROM nodes WHERE node_id = ?1";
const DELETE_SUBTREE: &str = "WITH RECURSIVE subtree (id) AS (
         SELECT ?1
         UNION ALL
         SELECT n.node_id FROM nodes n JOIN subtree s ON n.parent_id = s.id
     )
     DELETE FROM nodes WHERE node_id IN (SELECT id FROM subtree)";

/// One row of `nodes` as read, before validation.
struct StoredRow {
    node_id: i64,
    name: String,
    is_directory: bool,
    size: Option<i64>,
    ctime: Option<i64>,
    atime: Option<i64>,
    mtime: Option<i64>,
    checksum: Option<Vec<u8>>,
}

impl StoredRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(StoredRow {
            node_id: row.get(Col::NodeId.index())?,
            name: row.get(Col::Name.index())?,
            is_directory: row.get(Col::IsDirectory.index())?,
            size: row.get(Col::Size.index())?,
            ctime: row.get(Col::Ctime.index())?,
            atime: row.get(Col::Atime.index())?,
            mtime: row.get(Col::Mtime.index())?,
            checksum: row.get(Col::Checksum.index())?,
        })
    }

    /// Checks that data columns are null exactly for directories.
    fn into_node(self, store_path: &Path) -> Result<Node, TreeError> {
        let corrupt = |reason: String| TreeError::CorruptStore {
            path: store_path.to_path_buf(),
            reason,
        };
        let id = self.node_id;
        let unsigned = |value: i64| {
            u64::try_from(value).map_err(|_| corrupt(format!("negative value in row {id}")))
        };

        let mut node = match (
            self.is_directory,
            self.size,
            self.ctime,
            self.atime,
            self.mtime,
            self.checksum,
        ) {
            (true, None, None, None, None, None) => Node::new_directory(self.name),
            (false, Some(size), Some(ctime), Some(atime), Some(mtime), Some(checksum)) => {
                let checksum = Checksum::from_bytes(&checksum)
                    .map_err(|e| corrupt(format!("row {id}: {e}")))?;
                Node::new_file(
                    self.name,
                    NodeInfo {
                        size: unsigned(size)?,
                        ctime_nanos: unsigned(ctime)?,
                        atime_nanos: unsigned(atime)?,
                        mtime_nanos: unsigned(mtime)?,
                        checksum: Some(checksum),
                    },
                )
            }
            _ => {
                return Err(corrupt(format!(
                    "row {id} has data columns that do not match its kind"
                )));
            }
        };
        node.node_id = Some(unsigned(id)?);
        Ok(node)
    }
}

fn sql_int(value: u64, what: &str) -> Result<Value, TreeError> {
    i64::try_from(value)
        .map(Value::Integer)
        .map_err(|_| TreeError::InvalidState(format!("{what} {value} is out of range")))
}

/// Column values for `data_columns()`, in order.
fn encode(node: &Node, parent_id: i64) -> Result<Vec<Value>, TreeError> {
    let file = match &node.info {
        Some(info) => {
            let checksum = info.checksum.ok_or_else(|| {
                TreeError::InvalidState(format!("{} has no checksum to store", node.name))
            })?;
            Some((info, checksum))
        }
        None => None,
    };

    data_columns()
        .map(|c| {
            Ok(match (c.col, &file) {
                (Col::ParentId, _) => Value::Integer(parent_id),
                (Col::Name, _) => Value::Text(node.name.clone()),
                (Col::IsDirectory, _) => Value::Integer(i64::from(file.is_none())),
                (Col::Size, Some((info, _))) => sql_int(info.size, "size")?,
                (Col::Ctime, Some((info, _))) => sql_int(info.ctime_nanos, "ctime")?,
                (Col::Atime, Some((info, _))) => sql_int(info.atime_nanos, "atime")?,
                (Col::Mtime, Some((info, _))) => sql_int(info.mtime_nanos, "mtime")?,
                (Col::Checksum, Some((_, checksum))) => Value::Blob(checksum.as_bytes().to_vec()),
                _ => Value::Null,
            })
        })
        .collect()
}

pub struct PersistentTree {
    store_path: PathBuf,
    signature_path: PathBuf,
    conn: Option<Connection>,
    /// (row id, name) from the root down to the current directory.
    cursor: Vec<(i64, String)>,
    signals: Signals,
}

impl PersistentTree {
    /// Opens the store in `meta_dir`, creating it if neither the store nor its
    /// signature exist yet.
    ///
    /// # Errors
    /// - `TreeError::CorruptStore`: the store does not match its signature, or
    ///   only one of the two files exists
    pub fn open(meta_dir: &Path) -> Result<Self, TreeError> {
        let mut tree = PersistentTree {
            store_path: meta_dir.join(STORE_FILE_NAME),
            signature_path: meta_dir.join(SIGNATURE_FILE_NAME),
            conn: None,
            cursor: Vec::new(),
            signals: Signals::default(),
        };

        match (tree.store_path.exists(), tree.signature_path.exists()) {
            (false, false) => {
                info!("Creating store {}", tree.store_path.display());
                tree.reset()?;
            }
            (true, true) => tree.connect_verified()?,
            (true, false) => return Err(tree.corrupt("signature file is missing")),
            (false, true) => return Err(tree.corrupt("store file is missing")),
        }
        tree.goto_root()?;
        Ok(tree)
    }

    /// Whether a store (in any state) exists in `meta_dir`.
    pub fn exists(meta_dir: &Path) -> bool {
        meta_dir.join(STORE_FILE_NAME).exists() || meta_dir.join(SIGNATURE_FILE_NAME).exists()
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn signature_path(&self) -> &Path {
        &self.signature_path
    }

    /// Reads a node back by the identity `insert` assigned to it.
    pub fn node_by_id(&mut self, node_id: u64) -> Result<Option<Node>, TreeError> {
        let id = sql_id(node_id)?;
        let row = self
            .conn()?
            .prepare_cached(&SELECT_BY_ID)?
            .query_row(params![id], StoredRow::read)
            .optional()?;
        row.map(|row| row.into_node(&self.store_path)).transpose()
    }

    fn corrupt(&self, reason: &str) -> TreeError {
        TreeError::CorruptStore {
            path: self.store_path.clone(),
            reason: reason.to_string(),
        }
    }

    fn conn(&self) -> Result<&Connection, TreeError> {
        self.conn
            .as_ref()
            .ok_or_else(|| TreeError::InvalidState("store is closed".into()))
    }

    fn connect_verified(&mut self) -> Result<(), TreeError> {
        let checksum = Checksum::of_file(&self.store_path)?;
        if !checksum.load_and_verify_against_file(&self.signature_path)? {
            return Err(self.corrupt("store does not match its signature"));
        }

        let conn = Connection::open(&self.store_path)?;
        conn.execute_batch("BEGIN")?;
        self.conn = Some(conn);
        debug!("Opened store {}", self.store_path.display());
        Ok(())
    }

    fn current_id(&self) -> Result<i64, TreeError> {
        self.cursor
            .last()
            .map(|(id, _)| *id)
            .ok_or_else(|| TreeError::InvalidState("store cursor is not positioned".into()))
    }

    fn root_id(&self) -> Result<i64, TreeError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(SELECT_ROOT_IDS)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        match ids.as_slice() {
            [id] => Ok(*id),
            [] => Err(TreeError::NotFound("root row of the store".into())),
            _ => Err(self.corrupt("store has more than one root row")),
        }
    }

    fn find_child(&self, key: &UniqueKey) -> Result<Option<StoredRow>, TreeError> {
        let parent = self.current_id()?;
        let row = self
            .conn()?
            .prepare_cached(&SELECT_CHILD)?
            .query_row(
                params![parent, key.name(), key.is_directory()],
                StoredRow::read,
            )
            .optional()?;
        Ok(row)
    }

    fn chained(&self, row: StoredRow) -> Result<Node, TreeError> {
        let parent = self.current_id()?;
        let mut node = row.into_node(&self.store_path)?;
        node.chain_to(&self.current_path(), u64::try_from(parent).ok());
        Ok(node)
    }

    fn path_of(&self, node_id: i64) -> Result<String, TreeError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(SELECT_NAME_AND_PARENT)?;
        let mut names = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(node_id);

        while let Some(id) = current {
            if !seen.insert(id) {
                return Err(self.corrupt("parent links form a cycle"));
            }
            let (name, parent): (String, Option<i64>) = stmt
                .query_row(params![id], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?
                .ok_or_else(|| self.corrupt("parent link points to a missing row"))?;
            if parent.is_some() {
                names.push(name);
            }
            current = parent;
        }

        names.reverse();
        Ok(names.join("/"))
    }
}

fn sql_id(node_id: u64) -> Result<i64, TreeError> {
    i64::try_from(node_id)
        .map_err(|_| TreeError::InvalidState(format!("node id {node_id} is out of range")))
}

impl Tree for PersistentTree {
    fn depth(&self) -> usize {
        self.cursor.len().saturating_sub(1)
    }

    fn current_path(&self) -> String {
        self.cursor
            .iter()
            .skip(1)
            .map(|(_, name)| name.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Deletes the store and its signature and starts over with an empty root.
    fn reset(&mut self) -> Result<(), TreeError> {
        self.conn = None;
        self.cursor.clear();

        if let Some(dir) = self.store_path.parent() {
            std::fs::create_dir_all(dir).map_err(TreeError::io_at(dir))?;
        }
        for path in [&self.store_path, &self.signature_path] {
            match std::fs::remove_file(path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(TreeError::io_at(path)(e)),
            }
        }

        let conn = Connection::open(&self.store_path)?;
        conn.execute_batch(&CREATE_SCHEMA)?;
        conn.execute(INSERT_ROOT, [])?;
        self.conn = Some(conn);
        self.close()?;

        self.connect_verified()?;
        self.goto_root()
    }

    fn goto_root(&mut self) -> Result<(), TreeError> {
        let root = self.root_id()?;
        self.cursor = vec![(root, String::new())];
        Ok(())
    }

    fn up(&mut self) -> Result<String, TreeError> {
        if self.cursor.len() <= 1 {
            return Err(TreeError::InvalidNavigation(
                "cannot go up from the root".into(),
            ));
        }
        self.cursor
            .pop()
            .map(|(_, name)| name)
            .ok_or_else(|| TreeError::InvalidState("store cursor is not positioned".into()))
    }

    fn down(&mut self, node: &Node) -> Result<(), TreeError> {
        if !node.is_directory() {
            return Err(TreeError::InvalidNavigation(format!(
                "cannot descend into file {}",
                node.name
            )));
        }
        let row = self
            .find_child(&node.key())?
            .ok_or_else(|| TreeError::NotFound(join_path(&self.current_path(), &node.name)))?;
        self.cursor.push((row.node_id, row.name));
        Ok(())
    }

    fn insert(&mut self, node: &mut Node) -> Result<(), TreeError> {
        if let Some(id) = node.node_id {
            return Err(TreeError::InvalidState(format!(
                "{} is already stored as node {id}",
                node.name
            )));
        }
        let parent = self.current_id()?;
        let values = encode(node, parent)?;

        let conn = self.conn()?;
        conn.prepare_cached(&INSERT_NODE)?
            .execute(params_from_iter(values))?;
        let id = conn.last_insert_rowid();

        node.node_id = u64::try_from(id).ok();
        node.chain_to(&self.current_path(), u64::try_from(parent).ok());
        debug!("Stored {} as node {}", node.path(), id);
        Ok(())
    }

    fn update(&mut self, node: &Node) -> Result<(), TreeError> {
        let id = node
            .node_id
            .ok_or_else(|| TreeError::InvalidState(format!("{} is not stored yet", node.name)))?;
        let parent = self.current_id()?;
        let mut values = encode(node, parent)?;
        values.push(Value::Integer(sql_id(id)?));

        let changed = self
            .conn()?
            .prepare_cached(&UPDATE_NODE)?
            .execute(params_from_iter(values))?;
        if changed == 0 {
            return Err(TreeError::InvalidState(format!(
                "node {id} ({}) does not exist",
                node.name
            )));
        }
        Ok(())
    }

    fn delete(&mut self, key: &UniqueKey) -> Result<(), TreeError> {
        let row = self.find_child(key)?.ok_or_else(|| {
            TreeError::InvalidState(format!(
                "{} does not exist",
                join_path(&self.current_path(), key.name())
            ))
        })?;
        let removed = self
            .conn()?
            .prepare_cached(DELETE_SUBTREE)?
            .execute(params![row.node_id])?;
        debug!("Deleted {} rows below node {}", removed, row.node_id);
        Ok(())
    }

    /// Makes the open transaction durable and compacts the database file.
    fn commit(&mut self) -> Result<(), TreeError> {
        let conn = self.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        conn.execute_batch("VACUUM")?;
        conn.execute_batch("BEGIN")?;
        debug!("Committed store {}", self.store_path.display());
        Ok(())
    }

    fn children(&mut self) -> Result<NodeContainer, TreeError> {
        let parent = self.current_id()?;
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare_cached(&SELECT_CHILDREN)?;
            stmt.query_map(params![parent], StoredRow::read)?
                .collect::<Result<Vec<_>, _>>()?
        };

        let mut children = NodeContainer::new();
        for row in rows {
            children.insert(self.chained(row)?);
        }
        Ok(children)
    }

    fn node_by_key(&mut self, key: &UniqueKey) -> Result<Option<Node>, TreeError> {
        self.find_child(key)?
            .map(|row| self.chained(row))
            .transpose()
    }

    fn root_node(&mut self) -> Result<Node, TreeError> {
        let mut root = Node::root();
        root.node_id = u64::try_from(self.root_id()?).ok();
        Ok(root)
    }

    fn calculate(&mut self, node: &mut Node) -> Result<(), TreeError> {
        let path = join_path(&self.current_path(), &node.name);
        self.signals.replay(&path, node)
    }

    fn transfer_identity(&self, dest: &mut Node, src: &Node) {
        dest.take_identity_of(src);
    }

    fn paths_by_checksum(&mut self, checksum: &Checksum) -> Result<BTreeSet<String>, TreeError> {
        let ids = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare_cached(SELECT_IDS_BY_CHECKSUM)?;
            stmt.query_map(params![checksum.as_bytes()], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?
        };
        ids.into_iter().map(|id| self.path_of(id)).collect()
    }

    fn register_handlers(&mut self, sink: Box<dyn ProgressSink>) {
        self.signals.register(sink);
    }

    fn unregister_handlers(&mut self) -> Option<Box<dyn ProgressSink>> {
        self.signals.unregister()
    }

    /// Discards uncommitted work, closes the database and writes the
    /// signature. Closing a closed store does nothing.
    fn close(&mut self) -> Result<(), TreeError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        self.cursor.clear();
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        conn.close().map_err(|(_, e)| e)?;

        let checksum = Checksum::of_file(&self.store_path)?;
        checksum.save_to_file(&self.signature_path)?;
        debug!(
            "Closed store {} with signature {}",
            self.store_path.display(),
            checksum.abbreviated()
        );
        Ok(())
    }
}

impl Drop for PersistentTree {
    fn drop(&mut self) {
        if self.conn.is_some()
            && let Err(e) = self.close()
        {
            warn!("Failed to close store {}: {}", self.store_path.display(), e);
        }
    }
}
