use assert_cmd::{Command, cargo::cargo_bin_cmd};
use std::fs;
use std::path::Path;
use std::process::Output;
use tempfile::TempDir;

pub fn treeseal_cmd(cwd: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("treeseal");
    cmd.arg("-C").arg(cwd);
    cmd
}

// Each integration test file is compiled as its own crate, so not every
// helper is used everywhere.
#[allow(dead_code)]
pub fn status_output(cwd: &Path, args: &[&str]) -> Output {
    let mut cmd = treeseal_cmd(cwd);
    cmd.arg("status").args(args);
    cmd.output().expect("failed to run `treeseal status`")
}

/// A temporary tree with the given files, sealed.
#[allow(dead_code)]
pub fn sealed_tree(files: &[(&str, &str)]) -> TempDir {
    let temp = TempDir::new().unwrap();
    for (path, content) in files {
        let path = temp.path().join(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    treeseal_cmd(temp.path()).arg("init").assert().success();
    temp
}

#[allow(dead_code)]
pub fn extract_fingerprint(stdout: &[u8]) -> String {
    let output = std::str::from_utf8(stdout).expect("status stdout should be UTF-8");
    output
        .lines()
        .find_map(|line| line.strip_prefix("Fingerprint: "))
        .expect("fingerprint not found in output")
        .to_string()
}

#[allow(dead_code)]
pub fn status_fingerprint(cwd: &Path, args: &[&str]) -> (Output, String) {
    let output = status_output(cwd, args);
    let fingerprint = extract_fingerprint(&output.stdout);
    (output, fingerprint)
}
