//! Turning a comparison result into printable status lines and a fingerprint.

use crate::node::{Node, NodeInfo, NodeStatus, size_to_string};
use crate::tree::{Tree, TreeError, pre_order_apply};
use base64::Engine;
use sha2::{Digest, Sha256};

/// One reported path of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub path: String,
    pub status: NodeStatus,
    pub is_directory: bool,
    /// State on disk, absent for `Missing` entries.
    pub current: Option<NodeInfo>,
    /// State in the store, absent for `New` entries.
    pub stored: Option<NodeInfo>,
    /// The stored content exists nowhere on disk anymore.
    pub lost: bool,
}

impl ReportEntry {
    fn from_node(node: &Node) -> Self {
        let (current, stored) = match node.status {
            NodeStatus::New => (node.info.clone(), None),
            NodeStatus::Missing => (None, node.info.clone()),
            _ => (node.info.clone(), node.previous.clone()),
        };
        ReportEntry {
            path: node.path().to_string(),
            status: node.status,
            is_directory: node.is_directory(),
            current,
            stored,
            lost: false,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.status == NodeStatus::OK
    }
}

/// Collects the entries of a comparison result, depth first from the current
/// level.
///
/// Files are reported unless `OK` (every file with `all`). Directories only
/// show up when they are `New` or `Missing` and empty, since their contents
/// already cover them otherwise.
pub fn collect(view: &mut dyn Tree, all: bool) -> Result<Vec<ReportEntry>, TreeError> {
    let mut entries = Vec::new();
    pre_order_apply(view, None, true, &mut |tree, node| {
        let reported = if node.is_file() {
            all || node.status != NodeStatus::OK
        } else if matches!(node.status, NodeStatus::New | NodeStatus::Missing) {
            tree.down(node)?;
            let empty = tree.children()?.is_empty();
            tree.up()?;
            empty
        } else {
            false
        };
        if reported {
            entries.push(ReportEntry::from_node(node));
        }
        Ok(())
    })?;
    Ok(entries)
}

pub fn status_code(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::OK => ".",
        NodeStatus::New => "+",
        NodeStatus::Missing => "-",
        NodeStatus::Warn => "W",
        NodeStatus::Error => "E",
        NodeStatus::Unknown | NodeStatus::Undefined => "?",
    }
}

/// A stable digest of every non-`OK` entry.
///
/// Two comparisons with the same drift yield the same fingerprint, so it can
/// be used to make sure an accept writes exactly what was reviewed.
pub fn fingerprint(entries: &[ReportEntry]) -> String {
    let mut hasher = Sha256::new();
    for entry in entries.iter().filter(|e| !e.is_clean()) {
        hash_field(&mut hasher, entry.path.as_bytes());
        hash_field(&mut hasher, status_code(entry.status).as_bytes());
    }
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Length-prefixed, so that paths containing separators cannot collide.
fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    let len = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    hasher.update(len.to_be_bytes());
    hasher.update(bytes);
}

pub fn print_entries(entries: &[ReportEntry], show_diff: bool) {
    for entry in entries {
        print!("{}", format_entry(entry, show_diff));
    }
}

pub fn format_entry(entry: &ReportEntry, show_diff: bool) -> String {
    let suffix = if entry.is_directory { "/" } else { "" };
    let mut out = format!("{} {}{}\n", status_code(entry.status), entry.path, suffix);
    if show_diff {
        for line in format_diff_lines(entry) {
            out.push_str(&line);
            out.push('\n');
        }
        if entry.lost {
            out.push_str("   no other copy on disk\n");
        }
    }
    out
}

fn format_diff_lines(entry: &ReportEntry) -> Vec<String> {
    if entry.is_directory {
        return match entry.status {
            NodeStatus::Missing => vec!["   was: directory".to_string()],
            _ => Vec::new(),
        };
    }
    match (&entry.stored, &entry.current) {
        (Some(stored), None) => vec![format!("   was: {}", describe_file(stored))],
        (Some(stored), Some(current)) if !entry.is_clean() => format_file_diff(stored, current),
        _ => Vec::new(),
    }
}

fn format_file_diff(stored: &NodeInfo, current: &NodeInfo) -> Vec<String> {
    let mut lines = Vec::new();
    if stored.size != current.size {
        lines.push(format!(
            "   size: {} -> {}",
            size_to_string(stored.size),
            size_to_string(current.size)
        ));
    }
    if stored.mtime_nanos != current.mtime_nanos {
        lines.push(format!(
            "   mtime: {} -> {}",
            format_time(stored.mtime_nanos),
            format_time(current.mtime_nanos)
        ));
    }
    if stored.ctime_nanos != current.ctime_nanos && lines.is_empty() {
        lines.push(format!(
            "   ctime: {} -> {}",
            format_time(stored.ctime_nanos),
            format_time(current.ctime_nanos)
        ));
    }
    if stored.checksum != current.checksum {
        lines.push(format!(
            "   sha256: {} -> {}",
            format_checksum(stored),
            format_checksum(current)
        ));
    }
    lines
}

fn describe_file(info: &NodeInfo) -> String {
    format!(
        "file ({}, mtime: {}, sha256: {})",
        size_to_string(info.size),
        format_time(info.mtime_nanos),
        format_checksum(info)
    )
}

fn format_checksum(info: &NodeInfo) -> String {
    match &info.checksum {
        Some(checksum) => format!("{}...", checksum.abbreviated()),
        None => "?".to_string(),
    }
}

fn format_time(nanos: u64) -> String {
    use std::time::{Duration, UNIX_EPOCH};

    let system_time = UNIX_EPOCH + Duration::from_nanos(nanos);
    let datetime: chrono::DateTime<chrono::Local> = system_time.into();
    datetime.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::Checksum;
    use crate::diff::compare;
    use crate::filter::AcceptAll;
    use crate::fs_tree::{FilesystemTree, META_DIR_NAME};
    use crate::memory_tree::MemoryTree;
    use crate::persistent_tree::PersistentTree;
    use crate::tree::copy_to;
    use std::fs;
    use tempfile::TempDir;

    fn info(size: u64, mtime_nanos: u64, byte: u8) -> NodeInfo {
        NodeInfo {
            size,
            ctime_nanos: mtime_nanos,
            atime_nanos: mtime_nanos,
            mtime_nanos,
            checksum: Some(Checksum::from_bytes(&[byte; 32]).unwrap()),
        }
    }

    fn entry(path: &str, status: NodeStatus) -> ReportEntry {
        ReportEntry {
            path: path.to_string(),
            status,
            is_directory: false,
            current: Some(info(1, 1, 1)),
            stored: Some(info(1, 1, 1)),
            lost: false,
        }
    }

    #[test]
    fn status_codes() {
        assert_eq!(status_code(NodeStatus::OK), ".");
        assert_eq!(status_code(NodeStatus::New), "+");
        assert_eq!(status_code(NodeStatus::Missing), "-");
        assert_eq!(status_code(NodeStatus::Warn), "W");
        assert_eq!(status_code(NodeStatus::Error), "E");
    }

    #[test]
    fn fingerprint_is_deterministic_and_ignores_clean_entries() {
        let drift = vec![entry("a.txt", NodeStatus::New), entry("b.txt", NodeStatus::Warn)];
        let mut with_clean = drift.clone();
        with_clean.push(entry("c.txt", NodeStatus::OK));

        assert_eq!(fingerprint(&drift), fingerprint(&drift));
        assert_eq!(fingerprint(&drift), fingerprint(&with_clean));
        assert_ne!(
            fingerprint(&drift),
            fingerprint(&[entry("a.txt", NodeStatus::New), entry("b.txt", NodeStatus::Error)])
        );
        assert_ne!(
            fingerprint(&[entry("a|b", NodeStatus::New)]),
            fingerprint(&[entry("a", NodeStatus::New), entry("b", NodeStatus::New)])
        );
    }

    #[test]
    fn plain_lines() {
        assert_eq!(format_entry(&entry("a.txt", NodeStatus::Error), false), "E a.txt\n");

        let mut dir = entry("gone", NodeStatus::Missing);
        dir.is_directory = true;
        dir.current = None;
        dir.stored = None;
        assert_eq!(format_entry(&dir, true), "- gone/\n   was: directory\n");
    }

    #[test]
    fn diff_of_modified_file() {
        let mut modified = entry("a.txt", NodeStatus::Error);
        modified.stored = Some(info(1500, 7, 0xab));
        modified.current = Some(info(2000, 7, 0xcd));

        assert_eq!(
            format_entry(&modified, true),
            "E a.txt\n   size: 1.5 KB -> 2.0 KB\n   sha256: abababab... -> cdcdcdcd...\n"
        );
    }

    #[test]
    fn diff_of_missing_file() {
        let mut missing = entry("a.txt", NodeStatus::Missing);
        missing.current = None;
        missing.stored = Some(info(999, 0, 0x01));

        let text = format_entry(&missing, true);
        assert!(text.starts_with("- a.txt\n   was: file (999 B, mtime: "));
        assert!(text.ends_with("sha256: 01010101...)\n"));

        missing.lost = true;
        assert!(format_entry(&missing, true).ends_with("...)\n   no other copy on disk\n"));
        assert_eq!(format_entry(&missing, false), "- a.txt\n");
    }

    #[test]
    fn new_and_clean_entries_have_no_detail() {
        let mut new = entry("n.txt", NodeStatus::New);
        new.stored = None;
        assert_eq!(format_entry(&new, true), "+ n.txt\n");
        assert_eq!(format_entry(&entry("ok.txt", NodeStatus::OK), true), ". ok.txt\n");
    }

    #[test]
    fn collect_from_comparison() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("d/full")).unwrap();
        fs::write(root.join("d/full/f.txt"), "f").unwrap();
        fs::write(root.join("keep.txt"), "keep").unwrap();
        fs::write(root.join("gone.txt"), "gone").unwrap();

        let mut fs_tree = FilesystemTree::new(root, Box::new(AcceptAll));
        let mut db = PersistentTree::open(&root.join(META_DIR_NAME)).unwrap();
        copy_to(&mut fs_tree, &mut db, None).unwrap();
        db.commit().unwrap();

        fs::remove_file(root.join("gone.txt")).unwrap();
        fs::create_dir(root.join("empty")).unwrap();
        fs::create_dir(root.join("newdir")).unwrap();
        fs::write(root.join("newdir/n.txt"), "n").unwrap();

        let mut fs_tree = FilesystemTree::new(root, Box::new(AcceptAll));
        let mut view = MemoryTree::new();
        compare(&mut fs_tree, &mut db, &mut view, false).unwrap();

        let drift: Vec<(String, NodeStatus)> = collect(&mut view, false)
            .unwrap()
            .into_iter()
            .map(|e| (e.path, e.status))
            .collect();
        assert_eq!(
            drift,
            vec![
                ("empty".to_string(), NodeStatus::New),
                ("newdir/n.txt".to_string(), NodeStatus::New),
                ("gone.txt".to_string(), NodeStatus::Missing),
            ]
        );

        let everything = collect(&mut view, true).unwrap();
        assert_eq!(everything.len(), 5);
        let missing = everything.iter().find(|e| e.path == "gone.txt").unwrap();
        assert!(missing.current.is_none());
        assert_eq!(missing.stored.as_ref().unwrap().size, 4);
        db.close().unwrap();
    }
}
