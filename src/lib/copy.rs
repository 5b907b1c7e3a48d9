//! Copying staged trees into a project while tracking which source owns each file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// A file that two sources both tried to provide. The first owner keeps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub path: PathBuf,
    pub owner: String,
    pub rejected: String,
}

/// Copies trees into place. The first source to write a path owns it; later sources that would
/// overwrite it are refused.
#[derive(Debug, Default)]
pub struct Copier {
    owners: HashMap<PathBuf, String>,
    conflicts: Vec<Conflict>,
}

impl Copier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `from` onto `to` on behalf of `owner`. A directory is copied recursively so that its
    /// contents end up in `to`; symbolic links are recreated, not followed. Returns the number of
    /// files and links written.
    pub fn copy<P, Q>(&mut self, owner: &str, from: P, to: Q) -> Result<usize, Error>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let (from, to) = (from.as_ref(), to.as_ref());
        tracing::debug!(%owner, from = %from.display(), to = %to.display(), "copying");
        let mut written = 0;
        for entry in walkdir::WalkDir::new(from).sort_by_file_name() {
            let entry = entry?;
            let relative = entry.path().strip_prefix(from).unwrap_or(Path::new(""));
            let dest = if relative.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(relative)
            };
            let file_type = entry.file_type();
            if file_type.is_dir() {
                std::fs::create_dir_all(&dest)?;
                continue;
            }
            if !self.claim(owner, &dest) {
                continue;
            }
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if let Ok(meta) = dest.symlink_metadata()
                && !meta.is_dir()
            {
                std::fs::remove_file(&dest)?;
            }
            if file_type.is_symlink() {
                copy_symlink(entry.path(), &dest)?;
            } else {
                std::fs::copy(entry.path(), &dest)?;
            }
            written += 1;
        }
        Ok(written)
    }

    fn claim(&mut self, owner: &str, dest: &Path) -> bool {
        match self.owners.get(dest) {
            Some(existing) if existing != owner => {
                tracing::warn!(
                    path = %dest.display(),
                    %existing,
                    rejected = %owner,
                    "file already provided by another source, not overwriting"
                );
                self.conflicts.push(Conflict {
                    path: dest.to_path_buf(),
                    owner: existing.clone(),
                    rejected: owner.to_string(),
                });
                false
            }
            Some(_) => true,
            None => {
                self.owners.insert(dest.to_path_buf(), owner.to_string());
                true
            }
        }
    }

    /// The source that owns `path`, if it was written by this copier.
    pub fn owner<P: AsRef<Path>>(&self, path: P) -> Option<&str> {
        self.owners.get(path.as_ref()).map(String::as_str)
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(std::fs::read_link(from)?, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::copy(from, to).map(|_| ())
}
