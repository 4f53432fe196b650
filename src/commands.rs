//! The operations behind the command line, on a directory root.

use crate::checksum::{Checksum, ChecksumError};
use crate::diff::compare;
use crate::filter::FilterError;
use crate::fs_tree::{FilesystemTree, META_DIR_NAME};
use crate::memory_tree::MemoryTree;
use crate::node::{NodeStatistics, UniqueKey};
use crate::persistent_tree::{PersistentTree, SIGNATURE_FILE_NAME, STORE_FILE_NAME};
use crate::preferences::{Preferences, PreferencesError};
use crate::progress::ProgressLog;
use crate::report::{self, ReportEntry};
use crate::session::Session;
use crate::tree::{self, Tree, TreeError, copy_to};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),
    #[error("Preferences error: {0}")]
    Preferences(#[from] PreferencesError),
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),
    #[error("Checksum error: {0}")]
    Checksum(#[from] ChecksumError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not initialized (use treeseal init to initialize)")]
    NotInitialized,
    #[error("Already initialized (use treeseal init --force to start over)")]
    AlreadyInitialized,
    #[error("Fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },
    #[error("No such entry: {0}")]
    PathNotFound(String),
}

#[derive(Debug)]
pub struct SealResult {
    pub statistics: NodeStatistics,
}

#[derive(Debug)]
pub struct CheckResult {
    pub entries: Vec<ReportEntry>,
    pub fingerprint: String,
    pub statistics: NodeStatistics,
}

impl CheckResult {
    pub fn is_clean(&self) -> bool {
        self.entries.iter().all(ReportEntry::is_clean)
    }
}

#[derive(Debug)]
pub struct AcceptResult {
    /// Drifted entries written to the store.
    pub accepted: usize,
}

fn filesystem_tree(root: &Path, meta_dir: &Path) -> Result<FilesystemTree, CommandError> {
    let preferences = Preferences::load_or_default(&Preferences::path_in(meta_dir))?;
    let filter = preferences.file_filter()?;
    Ok(FilesystemTree::new(root, Box::new(filter)))
}

fn open_store(meta_dir: &Path) -> Result<PersistentTree, CommandError> {
    if !PersistentTree::exists(meta_dir) {
        return Err(CommandError::NotInitialized);
    }
    Ok(PersistentTree::open(meta_dir)?)
}

/// Records the current state of `root` in a fresh store.
///
/// Fails with `AlreadyInitialized` if a store exists, unless `force` is set,
/// in which case the old store is discarded. Default preferences are written
/// if there are none yet.
pub fn seal_directory(root: &Path, force: bool) -> Result<SealResult, CommandError> {
    let meta_dir = root.join(META_DIR_NAME);
    if PersistentTree::exists(&meta_dir) {
        if !force {
            return Err(CommandError::AlreadyInitialized);
        }
        for name in [STORE_FILE_NAME, SIGNATURE_FILE_NAME] {
            let path = meta_dir.join(name);
            if path.exists() {
                debug!("Discarding {}", path.display());
                std::fs::remove_file(&path)?;
            }
        }
    }

    std::fs::create_dir_all(&meta_dir)?;
    let preferences_path = Preferences::path_in(&meta_dir);
    if !preferences_path.exists() {
        Preferences::default().save(&preferences_path)?;
    }

    let mut fs_tree = filesystem_tree(root, &meta_dir)?;
    let total = tree::statistics(&mut fs_tree, None)?.total_size();
    fs_tree.register_handlers(Box::new(ProgressLog::new(total)));

    let mut store = PersistentTree::open(&meta_dir)?;
    copy_to(&mut fs_tree, &mut store, None)?;
    store.commit()?;
    let statistics = tree::statistics(&mut store, None)?;
    store.close()?;
    Ok(SealResult { statistics })
}

/// Compares `root` against its store. With `all`, clean files are listed too.
pub fn check_directory(root: &Path, all: bool) -> Result<CheckResult, CommandError> {
    let meta_dir = root.join(META_DIR_NAME);
    let mut store = open_store(&meta_dir)?;
    let mut fs_tree = filesystem_tree(root, &meta_dir)?;

    let mut view = MemoryTree::new();
    compare_trees(&mut fs_tree, &mut store, &mut view, !all)?;

    let mut session = Session::new(Box::new(view), Some(Box::new(store)), Some(Box::new(fs_tree)));
    let result = summarize(&mut session, all);
    session.close()?;
    result
}

fn summarize(session: &mut Session, all: bool) -> Result<CheckResult, CommandError> {
    let losses = session.losses()?;
    let mut entries = report::collect(session.view_mut(), all)?;
    for entry in &mut entries {
        entry.lost = losses.get(&entry.path).copied().unwrap_or(false);
    }

    let lost = entries.iter().filter(|e| e.lost).count();
    if lost > 0 {
        info!("{lost} file(s) have no other copy on disk");
    }

    Ok(CheckResult {
        fingerprint: report::fingerprint(&entries),
        statistics: session.statistics()?,
        entries,
    })
}

fn compare_trees(
    fs_tree: &mut FilesystemTree,
    store: &mut PersistentTree,
    view: &mut MemoryTree,
    remove_ok_nodes: bool,
) -> Result<(), CommandError> {
    let total = tree::statistics(fs_tree, None)?.total_size();
    fs_tree.register_handlers(Box::new(ProgressLog::new(total)));
    compare(fs_tree, store, view, remove_ok_nodes)?;
    fs_tree.unregister_handlers();
    view.goto_root()?;
    Ok(())
}

/// Writes the drift of `root` (or only of `paths`, relative to `root`) to the
/// store.
///
/// With `fingerprint`, nothing is written unless the current drift matches
/// it.
pub fn accept_changes(
    root: &Path,
    paths: &[String],
    fingerprint: Option<&str>,
) -> Result<AcceptResult, CommandError> {
    let meta_dir = root.join(META_DIR_NAME);
    let mut store = open_store(&meta_dir)?;
    let mut fs_tree = filesystem_tree(root, &meta_dir)?;

    let mut view = MemoryTree::new();
    compare_trees(&mut fs_tree, &mut store, &mut view, true)?;
    let entries = report::collect(&mut view, false)?;

    if let Some(expected) = fingerprint {
        let actual = report::fingerprint(&entries);
        if actual != expected {
            store.close()?;
            return Err(CommandError::FingerprintMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
    }

    let mut session = Session::new(Box::new(view), Some(Box::new(store)), Some(Box::new(fs_tree)));
    let result = accept_in_session(&mut session, root, paths, &entries);
    let closed = session.close();
    let accepted = result?;
    closed?;

    info!("Accepted {} changes", accepted);
    Ok(AcceptResult { accepted })
}

fn accept_in_session(
    session: &mut Session,
    root: &Path,
    paths: &[String],
    entries: &[ReportEntry],
) -> Result<usize, CommandError> {
    if paths.is_empty() {
        session.accept_all()?;
        return Ok(entries.len());
    }

    let mut accepted = 0;
    for path in paths {
        let path = path.trim_matches('/');
        session.goto_root()?;
        match locate(session, path)? {
            Some(key) => {
                session.accept(&[key])?;
                accepted += entries
                    .iter()
                    .filter(|e| e.path == path || e.path.starts_with(&format!("{path}/")))
                    .count();
            }
            None if !path.is_empty() && root.join(path).exists() => {
                debug!("{path} is unchanged");
            }
            None => return Err(CommandError::PathNotFound(path.to_string())),
        }
    }
    Ok(accepted)
}

/// Descends the session to the parent of `path` and returns the key of its
/// last component, `None` if the view has no such entry.
fn locate(session: &mut Session, path: &str) -> Result<Option<UniqueKey>, CommandError> {
    let mut components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    let Some(last) = components.pop() else {
        return Ok(None);
    };
    for component in components {
        match session.node_by_name(component)? {
            Some(dir) if dir.is_directory() => session.down(&dir)?,
            _ => return Ok(None),
        }
    }
    Ok(session.node_by_name(last)?.map(|node| node.key()))
}

/// Stored paths whose checksum is `hex`.
pub fn find_by_checksum(root: &Path, hex: &str) -> Result<BTreeSet<String>, CommandError> {
    let checksum = Checksum::from_hex(hex)?;
    let mut store = open_store(&root.join(META_DIR_NAME))?;
    let paths = store.paths_by_checksum(&checksum)?;
    store.close()?;
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeStatus;
    use std::fs;
    use tempfile::TempDir;

    fn sealed() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("photos")).unwrap();
        fs::write(temp.path().join("photos/a.jpg"), "aaaa").unwrap();
        fs::write(temp.path().join("notes.txt"), "notes").unwrap();
        fs::write(temp.path().join("Thumbs.db"), "thumbs").unwrap();
        seal_directory(temp.path(), false).unwrap();
        temp
    }

    fn drift(result: &CheckResult) -> Vec<(&str, NodeStatus)> {
        result
            .entries
            .iter()
            .map(|e| (e.path.as_str(), e.status))
            .collect()
    }

    #[test]
    fn seal_writes_store_and_preferences() {
        let temp = sealed();
        let meta_dir = temp.path().join(META_DIR_NAME);
        assert!(meta_dir.join(STORE_FILE_NAME).exists());
        assert!(meta_dir.join(SIGNATURE_FILE_NAME).exists());
        assert_eq!(
            Preferences::load(&Preferences::path_in(&meta_dir)).unwrap(),
            Preferences::default()
        );
    }

    #[test]
    fn seal_twice_requires_force() {
        let temp = sealed();
        assert!(matches!(
            seal_directory(temp.path(), false),
            Err(CommandError::AlreadyInitialized)
        ));

        fs::write(temp.path().join("later.txt"), "later").unwrap();
        let result = seal_directory(temp.path(), true).unwrap();
        assert_eq!(result.statistics.file_count(), 3);
        assert!(check_directory(temp.path(), false).unwrap().is_clean());
    }

    #[test]
    fn seal_honours_default_excludes() {
        let temp = sealed();
        let result = check_directory(temp.path(), true).unwrap();
        assert!(result.entries.iter().all(|e| e.path != "Thumbs.db"));
        assert_eq!(result.entries.len(), 2);
    }

    #[test]
    fn commands_require_initialization() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            check_directory(temp.path(), false),
            Err(CommandError::NotInitialized)
        ));
        assert!(matches!(
            accept_changes(temp.path(), &[], None),
            Err(CommandError::NotInitialized)
        ));
        assert!(matches!(
            find_by_checksum(temp.path(), &"00".repeat(32)),
            Err(CommandError::NotInitialized)
        ));
    }

    #[test]
    fn check_reports_drift() {
        let temp = sealed();
        assert!(check_directory(temp.path(), false).unwrap().is_clean());

        fs::write(temp.path().join("new.txt"), "new").unwrap();
        fs::remove_file(temp.path().join("notes.txt")).unwrap();
        let result = check_directory(temp.path(), false).unwrap();

        assert!(!result.is_clean());
        assert_eq!(
            drift(&result),
            vec![("new.txt", NodeStatus::New), ("notes.txt", NodeStatus::Missing)]
        );
        assert_eq!(result.statistics.count(NodeStatus::New), 1);

        let missing = &result.entries[1];
        assert!(missing.lost);
        assert!(!result.entries[0].lost);
    }

    #[test]
    fn moved_content_is_not_lost() {
        let temp = sealed();
        fs::rename(temp.path().join("notes.txt"), temp.path().join("renamed.txt")).unwrap();

        let result = check_directory(temp.path(), false).unwrap();
        assert_eq!(
            drift(&result),
            vec![("notes.txt", NodeStatus::Missing), ("renamed.txt", NodeStatus::New)]
        );
        assert!(result.entries.iter().all(|e| !e.lost));
    }

    #[test]
    fn accept_with_fingerprint() {
        let temp = sealed();
        fs::write(temp.path().join("new.txt"), "new").unwrap();
        let fingerprint = check_directory(temp.path(), false).unwrap().fingerprint;

        assert!(matches!(
            accept_changes(temp.path(), &[], Some("bogus")),
            Err(CommandError::FingerprintMismatch { .. })
        ));
        assert!(!check_directory(temp.path(), false).unwrap().is_clean());

        let result = accept_changes(temp.path(), &[], Some(&fingerprint)).unwrap();
        assert_eq!(result.accepted, 1);
        assert!(check_directory(temp.path(), false).unwrap().is_clean());
    }

    #[test]
    fn accept_selected_paths() {
        let temp = sealed();
        fs::write(temp.path().join("photos/b.jpg"), "bbbb").unwrap();
        fs::write(temp.path().join("photos/a.jpg"), "changed").unwrap();
        fs::write(temp.path().join("new.txt"), "new").unwrap();

        let result =
            accept_changes(temp.path(), &["photos/b.jpg".to_string()], None).unwrap();
        assert_eq!(result.accepted, 1);

        let after = check_directory(temp.path(), false).unwrap();
        assert_eq!(
            drift(&after),
            vec![("photos/a.jpg", NodeStatus::Warn), ("new.txt", NodeStatus::New)]
        );

        accept_changes(temp.path(), &["photos/".to_string(), "notes.txt".to_string()], None)
            .unwrap();
        assert_eq!(
            drift(&check_directory(temp.path(), false).unwrap()),
            vec![("new.txt", NodeStatus::New)]
        );
    }

    #[test]
    fn accept_unknown_path_fails() {
        let temp = sealed();
        assert!(matches!(
            accept_changes(temp.path(), &["nope.txt".to_string()], None),
            Err(CommandError::PathNotFound(p)) if p == "nope.txt"
        ));
    }

    #[test]
    fn find_stored_checksum() {
        let temp = sealed();
        let hex = Checksum::of_file(&temp.path().join("photos/a.jpg"))
            .unwrap()
            .to_hex();
        assert_eq!(
            find_by_checksum(temp.path(), &hex).unwrap(),
            BTreeSet::from(["photos/a.jpg".to_string()])
        );
        assert!(find_by_checksum(temp.path(), &"00".repeat(32)).unwrap().is_empty());
        assert!(matches!(
            find_by_checksum(temp.path(), "xyz"),
            Err(CommandError::Checksum(_))
        ));
    }
}
