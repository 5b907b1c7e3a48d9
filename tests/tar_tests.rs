mod common;

use std::io::Cursor;
use std::path::Path;

use common::{add_dir, add_file, add_hardlink, add_symlink, tar_bytes};
use vendor_fetch::ArchiveError;
use vendor_fetch::tar::{TarOptions, TarReader};

fn reader(bytes: Vec<u8>, options: TarOptions) -> TarReader<Cursor<Vec<u8>>> {
    TarReader::with_options(Cursor::new(bytes), options).unwrap()
}

fn library_archive() -> Vec<u8> {
    tar_bytes(|b| {
        add_dir(b, "./usr/", 0o755);
        add_dir(b, "./usr/lib/", 0o755);
        add_file(b, "./usr/lib/libz.so.1.3", b"zlib", 0o644);
        add_symlink(b, "./usr/lib/libz.so.1", "libz.so.1.3");
        add_file(b, "./usr/include/zlib.h", b"#define ZLIB", 0o644);
        add_file(b, "./usr/share/doc/zlib/README", b"readme", 0o644);
    })
}

fn is_symlink(path: &Path) -> bool {
    path.symlink_metadata()
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

#[test]
fn subtree_lands_on_destination() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("vendor/zlib");
    reader(library_archive(), TarOptions::default())
        .extract_path("usr/lib/", &dest)
        .unwrap();

    assert_eq!(std::fs::read(dest.join("libz.so.1.3")).unwrap(), b"zlib");
    assert!(is_symlink(&dest.join("libz.so.1")));
    assert_eq!(std::fs::read(dest.join("libz.so.1")).unwrap(), b"zlib");
    assert!(!dest.join("zlib.h").exists());
    assert!(!dir.path().join("vendor/zlib/usr").exists());
}

#[test]
fn file_into_directory_form_destination_keeps_its_name() {
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("include/");
    reader(library_archive(), TarOptions::default())
        .extract_path("usr/include/zlib.h", &dest)
        .unwrap();
    assert_eq!(
        std::fs::read(dir.path().join("include/zlib.h")).unwrap(),
        b"#define ZLIB"
    );

    let renamed = dir.path().join("zlib-header.h");
    reader(library_archive(), TarOptions::default())
        .extract_path("usr/include/zlib.h", &renamed)
        .unwrap();
    assert_eq!(std::fs::read(renamed).unwrap(), b"#define ZLIB");
}

#[test]
fn extract_all_matches_open() {
    let dir = tempfile::tempdir().unwrap();
    let mut tar = reader(library_archive(), TarOptions::default());
    tar.extract_all(dir.path()).unwrap();

    let files: Vec<String> = tar
        .entries()
        .unwrap()
        .filter(|entry| !entry.is_dir())
        .map(|entry| entry.path.clone())
        .collect();
    assert_eq!(files.len(), 4);
    for path in files {
        let on_disk = std::fs::read(dir.path().join(&path)).unwrap();
        assert_eq!(on_disk, tar.read(&path).unwrap(), "{path}");
    }
}

#[cfg(unix)]
#[test]
fn hard_links_share_an_inode() {
    use std::os::unix::fs::MetadataExt;

    let bytes = tar_bytes(|b| {
        add_file(b, "lib/libfoo.so.2", b"foo", 0o644);
        add_hardlink(b, "lib/libfoo.so", "lib/libfoo.so.2");
    });
    let dir = tempfile::tempdir().unwrap();
    reader(bytes.clone(), TarOptions::default())
        .extract_all(dir.path())
        .unwrap();
    let original = std::fs::metadata(dir.path().join("lib/libfoo.so.2")).unwrap();
    let linked = std::fs::metadata(dir.path().join("lib/libfoo.so")).unwrap();
    assert_eq!(original.ino(), linked.ino());

    let copies = tempfile::tempdir().unwrap();
    let options = TarOptions {
        extract_hard_links_as_copies: true,
        ..TarOptions::default()
    };
    reader(bytes, options).extract_all(copies.path()).unwrap();
    let original = std::fs::metadata(copies.path().join("lib/libfoo.so.2")).unwrap();
    let copied = std::fs::metadata(copies.path().join("lib/libfoo.so")).unwrap();
    assert_ne!(original.ino(), copied.ino());
    assert_eq!(std::fs::read(copies.path().join("lib/libfoo.so")).unwrap(), b"foo");
}

#[test]
fn hard_links_out_of_the_subtree_are_copied_in_full() {
    let bytes = tar_bytes(|b| {
        add_file(b, "common/LICENSE", b"Permission is hereby granted", 0o644);
        add_hardlink(b, "pkg/LICENSE", "common/LICENSE");
        add_file(b, "pkg/lib.c", b"int x;", 0o644);
    });
    let dir = tempfile::tempdir().unwrap();
    reader(bytes, TarOptions::default())
        .extract_path("pkg/", dir.path())
        .unwrap();

    let license = dir.path().join("LICENSE");
    assert!(!is_symlink(&license));
    assert_eq!(std::fs::read(license).unwrap(), b"Permission is hereby granted");
    assert!(!dir.path().join("common").exists());
}

#[test]
fn hard_link_to_missing_file_is_corrupt() {
    let bytes = tar_bytes(|b| add_hardlink(b, "orphan", "nowhere"));
    let dir = tempfile::tempdir().unwrap();
    let result = reader(bytes, TarOptions::default()).extract_all(dir.path());
    assert!(matches!(result, Err(ArchiveError::Corrupt(_))));
}

fn broken_link_archive() -> Vec<u8> {
    tar_bytes(|b| {
        add_file(b, "bin/tool", b"tool", 0o755);
        add_symlink(b, "bin/dangling", "../missing/tool");
    })
}

#[test]
fn broken_links_are_kept_by_default() {
    let dir = tempfile::tempdir().unwrap();
    reader(broken_link_archive(), TarOptions::default())
        .extract_all(dir.path())
        .unwrap();
    let link = dir.path().join("bin/dangling");
    assert!(is_symlink(&link));
    assert_eq!(std::fs::read_link(&link).unwrap(), Path::new("../missing/tool"));
    assert!(!link.exists());
}

#[test]
fn broken_links_can_be_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let options = TarOptions {
        skip_broken_softlinks: true,
        throw_on_broken_softlinks: true,
        ..TarOptions::default()
    };
    reader(broken_link_archive(), options)
        .extract_all(dir.path())
        .unwrap();
    assert!(dir.path().join("bin/tool").is_file());
    assert!(dir.path().join("bin/dangling").symlink_metadata().is_err());
}

#[test]
fn broken_links_can_fail_the_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let options = TarOptions {
        throw_on_broken_softlinks: true,
        ..TarOptions::default()
    };
    let result = reader(broken_link_archive(), options).extract_all(dir.path());
    assert!(matches!(
        result,
        Err(ArchiveError::BrokenSoftlink { link, .. }) if link == "bin/dangling"
    ));
}

#[test]
fn self_referencing_links_are_left_out() {
    let bytes = || {
        tar_bytes(|b| {
            add_file(b, "keep", b"keep", 0o644);
            add_symlink(b, "loop", "loop");
        })
    };
    let dir = tempfile::tempdir().unwrap();
    reader(bytes(), TarOptions::default())
        .extract_all(dir.path())
        .unwrap();
    assert!(dir.path().join("keep").is_file());
    assert!(dir.path().join("loop").symlink_metadata().is_err());

    let options = TarOptions {
        throw_on_infinite_recursion: true,
        ..TarOptions::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let result = reader(bytes(), options).extract_all(dir.path());
    assert!(matches!(result, Err(ArchiveError::InfiniteRecursion(link)) if link == "loop"));
}

#[test]
fn links_out_of_the_subtree_become_copies() {
    let bytes = tar_bytes(|b| {
        add_file(b, "common/LICENSE", b"MIT", 0o644);
        add_symlink(b, "pkg/LICENSE", "../common/LICENSE");
        add_file(b, "pkg/src/lib.c", b"int x;", 0o644);
        add_symlink(b, "pkg/lib.c", "src/lib.c");
    });
    let dir = tempfile::tempdir().unwrap();
    reader(bytes, TarOptions::default())
        .extract_path("pkg/", dir.path())
        .unwrap();

    let license = dir.path().join("LICENSE");
    assert!(!is_symlink(&license));
    assert_eq!(std::fs::read(license).unwrap(), b"MIT");
    assert!(is_symlink(&dir.path().join("lib.c")));
}

// `a` points above the destination and `a/x` sorts right after it.
fn link_above_destination_archive() -> Vec<u8> {
    tar_bytes(|b| {
        add_file(b, "data", b"payload", 0o644);
        add_symlink(b, "a", "..");
        add_symlink(b, "a/x", "../data");
    })
}

#[test]
fn writes_never_pass_through_extracted_links() {
    let as_copies = TarOptions {
        extract_soft_links_as_copies: true,
        ..TarOptions::default()
    };
    for options in [TarOptions::default(), as_copies] {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("dest");
        let result = reader(link_above_destination_archive(), options).extract_all(&dest);
        assert!(matches!(result, Err(ArchiveError::Corrupt(_))), "{result:?}");
        assert!(dir.path().join("x").symlink_metadata().is_err());
        assert_eq!(std::fs::read(dest.join("data")).unwrap(), b"payload");
    }
}

#[cfg(unix)]
#[test]
fn links_left_by_an_earlier_extraction_are_not_followed() {
    let outside = tempfile::tempdir().unwrap();
    let dir = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink(outside.path(), dir.path().join("usr")).unwrap();

    let bytes = tar_bytes(|b| add_file(b, "usr/include/zlib.h", b"#define ZLIB", 0o644));
    let result = reader(bytes, TarOptions::default()).extract_all(dir.path());
    assert!(matches!(result, Err(ArchiveError::Corrupt(_))));
    assert!(std::fs::read_dir(outside.path()).unwrap().next().is_none());
}

#[test]
fn soft_links_as_copies_replaces_every_link() {
    let bytes = tar_bytes(|b| {
        add_dir(b, "usr/share/zlib/", 0o755);
        add_file(b, "usr/share/zlib/data", b"data", 0o644);
        add_symlink(b, "usr/share/zlib-data", "zlib");
        add_symlink(b, "usr/lib/libz.so", "libz.so.1");
        add_file(b, "usr/lib/libz.so.1", b"zlib", 0o644);
    });
    let dir = tempfile::tempdir().unwrap();
    let options = TarOptions {
        extract_soft_links_as_copies: true,
        ..TarOptions::default()
    };
    reader(bytes, options).extract_all(dir.path()).unwrap();

    let library = dir.path().join("usr/lib/libz.so");
    assert!(!is_symlink(&library));
    assert_eq!(std::fs::read(library).unwrap(), b"zlib");
    let copied_dir = dir.path().join("usr/share/zlib-data");
    assert!(!is_symlink(&copied_dir));
    assert_eq!(std::fs::read(copied_dir.join("data")).unwrap(), b"data");
}

#[cfg(unix)]
#[test]
fn read_only_directories_are_filled_before_locking() {
    use std::os::unix::fs::PermissionsExt;

    let bytes = tar_bytes(|b| {
        add_dir(b, "ro/", 0o555);
        add_file(b, "ro/file", b"x", 0o400);
    });
    let dir = tempfile::tempdir().unwrap();
    let options = TarOptions {
        minimum_permissions: 0,
        ..TarOptions::default()
    };
    reader(bytes, options).extract_all(dir.path()).unwrap();

    let ro = dir.path().join("ro");
    assert_eq!(std::fs::read(ro.join("file")).unwrap(), b"x");
    let mode = std::fs::metadata(&ro).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o555);
    let file_mode = std::fs::metadata(ro.join("file")).unwrap().permissions().mode();
    assert_eq!(file_mode & 0o777, 0o400);

    std::fs::set_permissions(&ro, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(unix)]
#[test]
fn minimum_permissions_are_added() {
    use std::os::unix::fs::PermissionsExt;

    let bytes = tar_bytes(|b| add_file(b, "script", b"#!/bin/sh", 0o700));
    let dir = tempfile::tempdir().unwrap();
    reader(bytes, TarOptions::default())
        .extract_all(dir.path())
        .unwrap();
    let mode = std::fs::metadata(dir.path().join("script"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o744);
}
