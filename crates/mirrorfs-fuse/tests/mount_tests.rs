//! End-to-end tests through a real kernel mount.
//!
//! Run: `cargo test -p mirrorfs-fuse --features fuse-tests`

#![cfg(all(unix, feature = "fuse-tests"))]

mod common;

use common::TestMount;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};

#[test]
fn test_source_files_visible() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    fs::write(mount.source("a.txt"), b"hi").unwrap();
    assert_eq!(fs::read(mount.mounted("a.txt")).unwrap(), b"hi");
}

#[test]
fn test_writes_reach_source() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    fs::create_dir(mount.mounted("docs")).unwrap();
    fs::write(mount.mounted("docs/note.md"), b"draft").unwrap();

    assert!(mount.source("docs").is_dir());
    assert_eq!(fs::read(mount.source("docs/note.md")).unwrap(), b"draft");
}

#[test]
fn test_positioned_io() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    fs::write(mount.source("data.bin"), b"0123456789").unwrap();
    let mut file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(mount.mounted("data.bin"))
        .unwrap();
    file.seek(SeekFrom::Start(4)).unwrap();
    file.write_all(b"xy").unwrap();
    file.sync_all().unwrap();

    let mut tail = String::new();
    file.seek(SeekFrom::Start(3)).unwrap();
    file.read_to_string(&mut tail).unwrap();
    assert_eq!(tail, "3xy6789");
    drop(file);

    assert_eq!(fs::read(mount.source("data.bin")).unwrap(), b"0123xy6789");
}

#[test]
fn test_readdir_lists_entries() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    fs::write(mount.source("a.txt"), b"").unwrap();
    fs::create_dir(mount.source("sub")).unwrap();

    let mut names: Vec<_> = fs::read_dir(mount.mounted(""))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["a.txt", "sub"]);
}

#[test]
fn test_inode_numbers_match_source() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    fs::write(mount.source("a.txt"), b"hi").unwrap();
    let mounted = fs::metadata(mount.mounted("a.txt")).unwrap();
    let source = fs::metadata(mount.source("a.txt")).unwrap();
    assert_eq!(mounted.ino(), source.ino());
    assert_eq!(fs::metadata(mount.mounted("")).unwrap().ino(), 1);
}

#[test]
fn test_rename_and_unlink() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    fs::write(mount.mounted("old.txt"), b"x").unwrap();
    fs::rename(mount.mounted("old.txt"), mount.mounted("new.txt")).unwrap();
    assert!(!mount.source("old.txt").exists());
    assert!(mount.source("new.txt").exists());

    fs::remove_file(mount.mounted("new.txt")).unwrap();
    assert!(!mount.source("new.txt").exists());
}

#[test]
fn test_symlink_roundtrip() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    fs::write(mount.source("a.txt"), b"hi").unwrap();
    std::os::unix::fs::symlink("a.txt", mount.mounted("link")).unwrap();
    assert_eq!(
        fs::read_link(mount.mounted("link")).unwrap().to_str(),
        Some("a.txt")
    );
    assert_eq!(fs::read_link(mount.source("link")).unwrap().to_str(), Some("a.txt"));
}

#[test]
fn test_chmod_passes_through() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    fs::write(mount.source("a.txt"), b"hi").unwrap();
    fs::set_permissions(mount.mounted("a.txt"), fs::Permissions::from_mode(0o600)).unwrap();
    let mode = fs::metadata(mount.source("a.txt")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn test_remove_directory_tree() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::new());

    fs::create_dir(mount.mounted("tree")).unwrap();
    fs::remove_dir(mount.mounted("tree")).unwrap();
    assert!(!mount.source("tree").exists());
}
