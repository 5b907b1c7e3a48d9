//! Writing an indexed subtree to disk.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Read, Seek};
use std::ops::Bound;
use std::path::{Path, PathBuf};

use super::TarOptions;
use super::index::{self, EntryKind, Index};
use crate::error::ArchiveError;
use crate::path;
use crate::substream::SubStream;

/// Remove whatever non-directory sits at `dest` and make sure its parent exists, so a write never
/// goes through a stale symlink.
pub(crate) fn prepare_destination(dest: &Path) -> io::Result<()> {
    if let Ok(meta) = fs::symlink_metadata(dest) {
        if !meta.is_dir() {
            fs::remove_file(dest)?;
        }
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Refuse a write to `dest` if any directory between `root` and `dest` is a soft link, whether this
/// extraction created it or an earlier one left it behind.
pub(crate) fn check_parents(root: &Path, dest: &Path) -> Result<(), ArchiveError> {
    let Ok(relative) = dest.strip_prefix(root) else {
        return Ok(());
    };
    let mut current = root.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        // `dest` itself is replaced, never followed
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        let is_link = fs::symlink_metadata(&current)
            .map(|meta| meta.file_type().is_symlink())
            .unwrap_or(false);
        if is_link {
            return Err(ArchiveError::corrupt(format!(
                "refusing to write '{}' through the soft link '{}'",
                dest.display(),
                current.display()
            )));
        }
    }
    Ok(())
}

pub(crate) fn write_file<S: Read>(data: &mut S, dest: &Path, permissions: u32) -> io::Result<()> {
    prepare_destination(dest)?;
    let mut out = fs::File::create(dest)?;
    io::copy(data, &mut out)?;
    set_permissions(dest, permissions)
}

pub(crate) fn create_directory(dest: &Path) -> io::Result<()> {
    if let Ok(meta) = fs::symlink_metadata(dest) {
        if meta.is_dir() {
            return Ok(());
        }
        fs::remove_file(dest)?;
    }
    fs::create_dir_all(dest)
}

#[cfg(unix)]
fn set_permissions(dest: &Path, permissions: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dest, fs::Permissions::from_mode(permissions))
}

#[cfg(not(unix))]
fn set_permissions(_dest: &Path, _permissions: u32) -> io::Result<()> {
    Ok(())
}

fn create_symlink(link_text: &str, dest: &Path) -> io::Result<()> {
    prepare_destination(dest)?;
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(link_text, dest)
    }
    #[cfg(windows)]
    {
        std::os::windows::fs::symlink_file(link_text, dest)
    }
}

/// The second pass of an extraction: links, then the deferred directory permissions.
pub(crate) struct Extraction<'a, R> {
    pub(crate) inner: &'a mut R,
    pub(crate) index: &'a Index,
    pub(crate) options: &'a TarOptions,
    pub(crate) source: &'a str,
    pub(crate) destination: &'a Path,
    /// Directories created so far, with the permissions they get once everything is written.
    pub(crate) directories: Vec<(PathBuf, u32)>,
}

impl<R: Read + Seek> Extraction<'_, R> {
    pub(crate) fn run(mut self) -> Result<(), ArchiveError> {
        self.hard_links()?;
        self.soft_links()?;
        for (dir, permissions) in self.directories.iter().rev() {
            set_permissions(dir, permissions | self.options.minimum_permissions)?;
        }
        Ok(())
    }

    fn rebase(&self, path: &str) -> Option<PathBuf> {
        path::rebase(path, self.source, self.destination)
    }

    fn copy_file(&mut self, path: &str, permissions: u32, dest: &Path) -> Result<(), ArchiveError> {
        check_parents(self.destination, dest)?;
        let range = index::file_range(self.index, path)
            .ok_or_else(|| ArchiveError::NotFound(path.to_string()))?;
        let mut data = SubStream::new(&mut *self.inner, range)?;
        write_file(&mut data, dest, permissions | self.options.minimum_permissions)?;
        Ok(())
    }

    fn hard_links(&mut self) -> Result<(), ArchiveError> {
        let index = self.index;
        for entry in index.values() {
            let EntryKind::HardLink(target) = &entry.kind else {
                continue;
            };
            let Some(dest) = self.rebase(&entry.path) else {
                continue;
            };
            if index::file_range(index, target).is_none() {
                return Err(ArchiveError::corrupt(format!(
                    "hard link '{}' points to missing '{target}'",
                    entry.path
                )));
            }
            let target_is_file = matches!(
                index.get(target).map(|e| &e.kind),
                Some(EntryKind::File(_))
            );
            let linked = if self.options.extract_hard_links_as_copies || !target_is_file {
                None
            } else {
                self.rebase(target)
            };
            match linked {
                Some(target_dest) => {
                    tracing::debug!(link = %entry.path, %target, "extracting hard link");
                    check_parents(self.destination, &dest)?;
                    prepare_destination(&dest)?;
                    fs::hard_link(&target_dest, &dest)?;
                }
                None => {
                    tracing::debug!(link = %entry.path, %target, "extracting hard link as a copy");
                    self.copy_file(target, entry.permissions, &dest)?;
                }
            }
        }
        Ok(())
    }

    fn soft_links(&mut self) -> Result<(), ArchiveError> {
        let index = self.index;
        for entry in index.values() {
            if !matches!(entry.kind, EntryKind::SoftLink(_)) {
                continue;
            }
            let Some(dest) = self.rebase(&entry.path) else {
                continue;
            };
            let mut visited = HashSet::new();
            self.extract_softlink(&entry.path, &dest, &mut visited)?;
        }
        Ok(())
    }

    fn infinite_recursion(&self, link: &str) -> Result<(), ArchiveError> {
        if self.options.throw_on_infinite_recursion {
            return Err(ArchiveError::InfiniteRecursion(link.to_string()));
        }
        tracing::debug!(%link, "not extracting soft link that loops back on itself");
        Ok(())
    }

    fn extract_softlink(
        &mut self,
        path: &str,
        dest: &Path,
        visited: &mut HashSet<String>,
    ) -> Result<(), ArchiveError> {
        let index = self.index;
        let dir_key = path::as_directory(&path::normalize(path));
        if let Some(dir) = index.get(&dir_key).filter(|e| e.is_dir()) {
            check_parents(self.destination, dest)?;
            create_directory(dest)?;
            self.directories.push((dest.to_path_buf(), dir.permissions));
            let descendants: Vec<_> = if dir_key == path::ROOT {
                index.iter().filter(|(key, _)| key.as_str() != path::ROOT).collect()
            } else {
                index
                    .range::<str, _>((Bound::Excluded(dir_key.as_str()), Bound::Unbounded))
                    .take_while(|(key, _)| key.starts_with(&dir_key))
                    .collect()
            };
            for (key, entry) in descendants {
                let Some(sub_dest) = path::rebase(key, &dir_key, dest) else {
                    continue;
                };
                if entry.is_dir() {
                    check_parents(self.destination, &sub_dest)?;
                    create_directory(&sub_dest)?;
                    self.directories.push((sub_dest, entry.permissions));
                } else {
                    self.extract_softlink(key, &sub_dest, visited)?;
                }
            }
            return Ok(());
        }

        let key = path::as_file(&path::normalize(path));
        let Some(entry) = index.get(&key) else {
            tracing::debug!(path = %key, "nothing in the archive to extract");
            return Ok(());
        };
        let target = match &entry.kind {
            EntryKind::File(_) | EntryKind::HardLink(_) => {
                return self.copy_file(&key, entry.permissions, dest);
            }
            EntryKind::SoftLink(target) => target,
            EntryKind::Directory => return Ok(()),
        };

        if !visited.insert(key.clone()) || index::link_chain_loops(index, &key) {
            return self.infinite_recursion(&key);
        }
        let resolved = index::link_destination(&key, target);
        let exists = index::lookup(index, &resolved).is_some();
        let inside = path::has_prefix(&resolved, self.source);
        if exists && (self.options.extract_soft_links_as_copies || !inside) {
            return self.extract_softlink(&resolved, dest, visited);
        }
        if !exists {
            if self.options.skip_broken_softlinks {
                tracing::debug!(link = %key, %target, "skipping broken soft link");
                return Ok(());
            }
            if self.options.throw_on_broken_softlinks {
                return Err(ArchiveError::BrokenSoftlink {
                    link: key,
                    target: target.clone(),
                });
            }
            tracing::debug!(link = %key, %target, "extracting broken soft link");
        }
        let link_text = if target.starts_with('/') {
            path::relative_link(&path::parent(&key), &resolved)
        } else {
            target.clone()
        };
        check_parents(self.destination, dest)?;
        create_symlink(&link_text, dest)?;
        Ok(())
    }
}
