use super::*;
use crate::progress::testing::Recorder;
use crate::tree::Tree;

fn populate(root: &Path) {
    fs::create_dir_all(root.join("a/b")).unwrap();
    fs::write(root.join("a/b/deep.txt"), "deep").unwrap();
    fs::write(root.join("a/one.txt"), "one").unwrap();
    fs::write(root.join("top.txt"), "top").unwrap();
}

#[test]
fn test_repeated_clean_comparison_is_empty() {
    let temp = TempDir::new().unwrap();
    populate(temp.path());
    seal(temp.path());

    for _ in 0..2 {
        let (root, result) = diff_both(temp.path(), true);
        assert_eq!(root, NodeStatus::OK);
        assert!(result.is_empty());
    }
}

#[test]
fn test_every_node_signalled_once() {
    let temp = TempDir::new().unwrap();
    populate(temp.path());
    seal(temp.path());
    fs::write(temp.path().join("new.txt"), "new").unwrap();

    let recorder = Recorder::default();
    let (mut fs_tree, mut db) = open_trees(temp.path());
    fs_tree.register_handlers(Box::new(recorder.clone()));
    let mut result = MemoryTree::new();
    compare(&mut fs_tree, &mut db, &mut result, false).unwrap();

    let mut paths = recorder.new_node_paths();
    paths.sort();
    assert_eq!(
        paths,
        vec!["a", "a/b", "a/b/deep.txt", "a/one.txt", "new.txt", "top.txt"]
    );
    assert_eq!(recorder.total_bytes(), 4 + 3 + 3 + 3);
}

#[test]
fn test_cancellation_propagates() {
    let temp = TempDir::new().unwrap();
    populate(temp.path());
    seal(temp.path());

    let (mut fs_tree, mut db) = open_trees(temp.path());
    fs_tree.register_handlers(Box::new(Recorder::cancelling_after(1)));

    let mut result = MemoryTree::new();
    let err = compare(&mut fs_tree, &mut db, &mut result, true).unwrap_err();
    assert!(err.is_cancelled());

    let err = recursive_diff(&mut fs_tree, &mut db, true).unwrap_err();
    assert!(err.is_cancelled());
}

#[test]
fn test_cancelled_seal_leaves_store_untouched() {
    let temp = TempDir::new().unwrap();
    populate(temp.path());

    let (mut fs_tree, mut db) = open_trees(temp.path());
    fs_tree.register_handlers(Box::new(Recorder::cancelling_after(4)));
    let err = copy_to(&mut fs_tree, &mut db, None).unwrap_err();
    assert!(err.is_cancelled());
    db.close().unwrap();

    let (_, mut db) = open_trees(temp.path());
    db.goto_root().unwrap();
    assert!(db.children().unwrap().is_empty());
}

#[test]
fn test_store_as_ground_truth() {
    let temp = TempDir::new().unwrap();
    populate(temp.path());
    seal(temp.path());
    fs::remove_file(temp.path().join("top.txt")).unwrap();

    let (mut fs_tree, mut db) = open_trees(temp.path());
    let mut result = MemoryTree::new();
    let status = compare(&mut db, &mut fs_tree, &mut result, true).unwrap();

    assert_eq!(status, NodeStatus::New);
    let node = result.node_by_name("top.txt").unwrap().unwrap();
    assert_eq!(node.status, NodeStatus::New);
}
