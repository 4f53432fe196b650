use super::*;

#[test]
fn test_new_file() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a.txt"), "hello").unwrap();

    let (root, result) = diff_both(temp.path(), false);

    assert_eq!(root, NodeStatus::New);
    assert_eq!(result, statuses(&[("a.txt", NodeStatus::New)]));
}

#[test]
fn test_unchanged_file() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a.txt"), "hello").unwrap();
    seal(temp.path());

    let (root, result) = diff_both(temp.path(), false);
    assert_eq!(root, NodeStatus::OK);
    assert_eq!(result, statuses(&[("a.txt", NodeStatus::OK)]));

    let (root, result) = diff_both(temp.path(), true);
    assert_eq!(root, NodeStatus::OK);
    assert!(result.is_empty());
}

#[test]
fn test_silent_corruption() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a.txt"), "hello").unwrap();
    {
        let (mut fs_tree, mut db) = open_trees(temp.path());
        let mut stored = fs_tree.node_by_name("a.txt").unwrap().unwrap();
        stored.info.as_mut().unwrap().checksum = Some(Checksum::from_bytes(&[9; 32]).unwrap());
        db.insert(&mut stored).unwrap();
        db.commit().unwrap();
        db.close().unwrap();
    }

    let (root, result) = diff_both(temp.path(), true);

    assert_eq!(root, NodeStatus::Error);
    assert_eq!(result, statuses(&[("a.txt", NodeStatus::Error)]));
}

#[test]
fn test_touched_file() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a.txt"), "hello").unwrap();
    seal(temp.path());

    set_old_mtime(&temp.path().join("a.txt"));

    let (root, result) = diff_both(temp.path(), true);
    assert_eq!(root, NodeStatus::Warn);
    assert_eq!(result, statuses(&[("a.txt", NodeStatus::Warn)]));
}

#[test]
fn test_deleted_file_uses_stored_data() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a.txt"), "hello").unwrap();
    fs::write(temp.path().join("b.txt"), "bye").unwrap();
    let stored_checksum = Checksum::of_file(&temp.path().join("b.txt")).unwrap();
    seal(temp.path());

    fs::remove_file(temp.path().join("b.txt")).unwrap();

    let (root, result) = diff_both(temp.path(), false);
    assert_eq!(root, NodeStatus::Unknown);
    assert_eq!(
        result,
        statuses(&[("a.txt", NodeStatus::OK), ("b.txt", NodeStatus::Missing)])
    );

    let (mut fs_tree, mut db) = open_trees(temp.path());
    let diff = recursive_diff(&mut fs_tree, &mut db, true).unwrap();
    let root_node = diff.get(&UniqueKey::directory("")).unwrap();
    let missing = root_node
        .children
        .as_ref()
        .unwrap()
        .get(&UniqueKey::file("b.txt"))
        .unwrap();
    assert_eq!(missing.checksum(), Some(&stored_checksum));
    assert_eq!(missing.size(), 3);
    assert!(missing.node_id.is_some());
}

#[test]
fn test_matched_file_keeps_reference_info() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a.txt"), "hello").unwrap();
    seal(temp.path());
    fs::write(temp.path().join("a.txt"), "hello, longer").unwrap();

    let (mut fs_tree, mut db) = open_trees(temp.path());
    let mut result = MemoryTree::new();
    compare(&mut fs_tree, &mut db, &mut result, true).unwrap();

    let node = result.node_by_name("a.txt").unwrap().unwrap();
    assert_eq!(node.status, NodeStatus::Warn);
    assert_eq!(node.size(), 13);
    assert_eq!(node.previous.as_ref().unwrap().size, 5);
    assert!(node.node_id.is_some());
}

#[test]
fn test_classify_file_rules() {
    let info = |size, mtime_nanos, byte| NodeInfo {
        size,
        ctime_nanos: 1,
        atime_nanos: 1,
        mtime_nanos,
        checksum: Some(Checksum::from_bytes(&[byte; 32]).unwrap()),
    };

    assert_eq!(classify_file(&info(5, 1, 1), &info(5, 1, 1)), NodeStatus::OK);
    assert_eq!(classify_file(&info(5, 1, 1), &info(5, 1, 2)), NodeStatus::Error);
    assert_eq!(classify_file(&info(5, 2, 1), &info(5, 1, 1)), NodeStatus::Warn);
    assert_eq!(classify_file(&info(6, 1, 2), &info(5, 1, 1)), NodeStatus::Warn);
}
