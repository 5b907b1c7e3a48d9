//! Lexical path algebra for paths inside archives.
//!
//! Archive paths are plain `/`-separated strings. A normalized path never starts with `/` or `./`
//! and a directory is always written with a trailing `/`, while files and links never are. The
//! archive root is written as [`ROOT`]. Everything here is purely lexical; nothing touches the
//! filesystem.

use std::path::{Path, PathBuf};

/// The normalized form of the archive root.
pub const ROOT: &str = "./";

/// Normalize an archive path: drop `.` and empty components, resolve `..` where possible and
/// keep the trailing separator if the input had one. Leading `/` is dropped, as paths inside an
/// archive are always relative to its root. Unresolvable `..` components are kept, so callers can
/// tell that such a path escapes the root.
pub fn normalize(path: &str) -> String {
    let is_dir = path.is_empty()
        || path == "."
        || path.ends_with('/')
        || path.ends_with("/.")
        || path.ends_with("/..")
        || path == "..";
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => match parts.last() {
                Some(last) if *last != ".." => {
                    parts.pop();
                }
                _ => parts.push(".."),
            },
            name => parts.push(name),
        }
    }
    if parts.is_empty() {
        return ROOT.to_string();
    }
    let mut normalized = parts.join("/");
    if is_dir {
        normalized.push('/');
    }
    normalized
}

/// True if `path` is written in directory form (with a trailing separator).
pub fn is_directory_form(path: &str) -> bool {
    path.ends_with('/')
}

/// The directory form of a normalized path.
pub fn as_directory(path: &str) -> String {
    if is_directory_form(path) {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// The file form of a normalized path. The root has no file form and maps onto `.`.
pub fn as_file(path: &str) -> String {
    if path == ROOT {
        return ".".to_string();
    }
    path.trim_end_matches('/').to_string()
}

/// The directory containing `path`, in directory form.
pub fn parent(path: &str) -> String {
    match as_file(path).rsplit_once('/') {
        Some((head, _)) => format!("{head}/"),
        None => ROOT.to_string(),
    }
}

/// The last component of `path`, if there is one.
pub fn file_name(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((_, name)) => Some(name),
        None if trimmed.is_empty() || trimmed == "." => None,
        None => Some(trimmed),
    }
}

/// Join `relative` onto the directory `dir`. An absolute `relative` is taken relative to the
/// archive root instead.
pub fn join(dir: &str, relative: &str) -> String {
    if relative.starts_with('/') {
        normalize(relative)
    } else {
        normalize(&format!("{dir}/{relative}"))
    }
}

/// True if the normalized `path` climbs out of the archive root.
pub fn escapes_root(path: &str) -> bool {
    path == ".." || path == "../" || path.starts_with("../")
}

/// True if `path` lies in the subtree rooted at `prefix` (including `prefix` itself). Paths that
/// escape the archive root are inside nothing.
pub fn has_prefix(path: &str, prefix: &str) -> bool {
    let path = normalize(path);
    if escapes_root(&path) {
        return false;
    }
    let prefix = as_directory(&normalize(prefix));
    prefix == ROOT || as_directory(&path).starts_with(&prefix)
}

fn destination_is_directory_form(to: &Path) -> bool {
    to.as_os_str()
        .to_string_lossy()
        .chars()
        .last()
        .is_some_and(std::path::is_separator)
}

/// Move `path` from the subtree rooted at `from` to the filesystem location `to`. Returns `None`
/// when `path` is not inside `from`.
///
/// When `from` is written as a file (no trailing separator) but `to` is written as a directory,
/// the subtree keeps its own name under `to`, the way `cp -r from to/` would place it.
pub fn rebase(path: &str, from: &str, to: &Path) -> Option<PathBuf> {
    let path = normalize(path);
    let from = normalize(from);
    if !has_prefix(&path, &from) {
        return None;
    }
    let mut base = to.to_path_buf();
    if from != ROOT && !is_directory_form(&from) && destination_is_directory_form(to) {
        if let Some(name) = file_name(&from) {
            base.push(name);
        }
    }
    let relative = if from == ROOT {
        as_file(&path)
    } else {
        as_directory(&path)[as_directory(&from).len()..]
            .trim_end_matches('/')
            .to_string()
    };
    if relative.is_empty() || relative == "." {
        Some(base)
    } else {
        Some(relative.split('/').fold(base, |acc, part| acc.join(part)))
    }
}

/// Express the archive path `target` relative to the directory `from_dir`, for writing a
/// symbolic link that points at `target` from inside `from_dir`.
pub fn relative_link(from_dir: &str, target: &str) -> String {
    let from_file = as_file(&normalize(from_dir));
    let target = normalize(target);
    let target_file = as_file(&target);
    let from_parts: Vec<&str> = from_file.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    let target_parts: Vec<&str> = target_file.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    let common = from_parts
        .iter()
        .zip(&target_parts)
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<&str> = std::iter::repeat_n("..", from_parts.len() - common).collect();
    parts.extend(&target_parts[common..]);
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

#[cfg(test)]
mod test_path_algebra {
    use super::*;

    #[test]
    fn normalize_keeps_directory_form() {
        assert_eq!(normalize("./usr/lib/"), "usr/lib/");
        assert_eq!(normalize("usr//lib/./x"), "usr/lib/x");
        assert_eq!(normalize("/usr/bin/../lib"), "usr/lib");
        assert_eq!(normalize("."), ROOT);
        assert_eq!(normalize(""), ROOT);
        assert_eq!(normalize("./"), ROOT);
        assert_eq!(normalize("a/.."), ROOT);
        assert_eq!(normalize("../x"), "../x");
    }

    #[test]
    fn subtree_containment() {
        assert!(has_prefix("lib/a.so", "lib/"));
        assert!(has_prefix("lib/", "lib"));
        assert!(has_prefix("lib", "lib/"));
        assert!(!has_prefix("library/a", "lib/"));
        assert!(has_prefix("anything", ROOT));
        assert!(!has_prefix("../etc/passwd", ROOT));
    }

    #[test]
    fn parent_and_name() {
        assert_eq!(parent("usr/lib/a.so"), "usr/lib/");
        assert_eq!(parent("usr/"), ROOT);
        assert_eq!(parent("a"), ROOT);
        assert_eq!(file_name("usr/lib/"), Some("lib"));
        assert_eq!(file_name(ROOT), None);
    }

    #[test]
    fn join_resolves_relative_and_absolute() {
        assert_eq!(join("usr/lib/", "../share/x"), "usr/share/x");
        assert_eq!(join(ROOT, "a"), "a");
        assert_eq!(join("usr/lib/", "/etc/x"), "etc/x");
    }

    #[test]
    fn rebase_directory_subtree() {
        let to = Path::new("/out");
        assert_eq!(rebase("lib/a.so", "lib/", to), Some(PathBuf::from("/out/a.so")));
        assert_eq!(rebase("lib/", "lib/", to), Some(PathBuf::from("/out")));
        assert_eq!(rebase("bin/x", "lib/", to), None);
        assert_eq!(rebase("usr/bin/x", ROOT, to), Some(PathBuf::from("/out/usr/bin/x")));
        assert_eq!(rebase(ROOT, ROOT, to), Some(PathBuf::from("/out")));
    }

    #[test]
    fn rebase_file_form_source_into_directory_form_destination() {
        let to = Path::new("/out/");
        assert_eq!(rebase("usr/lib", "usr/lib", to), Some(PathBuf::from("/out/lib")));
        assert_eq!(rebase("usr/lib/a.so", "usr/lib", to), Some(PathBuf::from("/out/lib/a.so")));
        assert_eq!(
            rebase("etc/conf", "etc/conf", Path::new("/out/renamed")),
            Some(PathBuf::from("/out/renamed"))
        );
    }

    #[test]
    fn relative_links() {
        assert_eq!(relative_link("usr/lib/", "usr/lib/libz.so.1"), "libz.so.1");
        assert_eq!(relative_link("usr/bin/", "etc/alternatives/x"), "../../etc/alternatives/x");
        assert_eq!(relative_link(ROOT, "a/b"), "a/b");
    }
}
