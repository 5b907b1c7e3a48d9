//! Reader for `ustar`-family tar archives.
//!
//! [`TarReader`] indexes an archive into a map of normalized paths and extracts whole subtrees of
//! it to disk. Entries are read straight from the underlying stream; file payloads are never
//! buffered. Links are resolved against the complete index after the first pass, so their targets
//! may appear anywhere in the stream.
//!
//! ```no_run
//! use vendor_fetch::tar::{TarOptions, TarReader};
//!
//! # fn main() -> Result<(), vendor_fetch::ArchiveError> {
//! let archive = std::fs::File::open("data.tar")?;
//! let mut tar = TarReader::with_options(archive, TarOptions::default())?;
//! let readme = tar.read("usr/share/doc/zlib/README")?;
//! tar.extract_path("usr/lib/", "vendor/zlib/lib")?;
//! # Ok(())
//! # }
//! ```

pub(crate) mod extract;
mod header;
mod index;

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

pub use self::index::{EntryKind, TarEntry};
use self::index::Index;
use crate::error::ArchiveError;
use crate::path;
use crate::substream::SubStream;

/// Policies applied while reading and extracting a tar archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TarOptions {
    /// Fail on entry types other than files, directories and links instead of skipping them.
    pub throw_on_unsupported_entry: bool,
    /// Fail on soft links that lead back to themselves instead of leaving them out.
    pub throw_on_infinite_recursion: bool,
    pub extract_hard_links_as_copies: bool,
    /// Copy what soft links point to instead of creating symlinks.
    pub extract_soft_links_as_copies: bool,
    pub throw_on_broken_softlinks: bool,
    /// Leave out soft links whose target is not in the archive. Wins over throwing.
    pub skip_broken_softlinks: bool,
    /// Resolve soft links in the components of paths given to [`TarReader::open`].
    pub follow_softlinks_on_open: bool,
    /// Bits OR'ed into the permissions of everything extracted.
    pub minimum_permissions: u32,
}

impl Default for TarOptions {
    fn default() -> Self {
        Self {
            throw_on_unsupported_entry: false,
            throw_on_infinite_recursion: false,
            extract_hard_links_as_copies: false,
            extract_soft_links_as_copies: false,
            throw_on_broken_softlinks: false,
            skip_broken_softlinks: false,
            follow_softlinks_on_open: true,
            minimum_permissions: 0o644,
        }
    }
}

/// Reads a tar archive from a seekable stream.
#[derive(Debug)]
pub struct TarReader<R> {
    inner: R,
    len: u64,
    options: TarOptions,
    index: Index,
    indexed: bool,
}

impl<R: Read + Seek> TarReader<R> {
    pub fn new(inner: R) -> Result<Self, ArchiveError> {
        Self::with_options(inner, TarOptions::default())
    }

    pub fn with_options(mut inner: R, options: TarOptions) -> Result<Self, ArchiveError> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner,
            len,
            options,
            index: Index::new(),
            indexed: false,
        })
    }

    pub fn options(&self) -> &TarOptions {
        &self.options
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn ensure_index(&mut self) -> Result<(), ArchiveError> {
        if !self.indexed {
            self.index = index::build(&mut self.inner, self.len, &self.options, |_, _| Ok(()))?;
            self.indexed = true;
        }
        Ok(())
    }

    /// Every entry of the archive, ordered by path.
    pub fn entries(&mut self) -> Result<impl Iterator<Item = &TarEntry>, ArchiveError> {
        self.ensure_index()?;
        Ok(self.index.values())
    }

    /// The entry at `path`, without following links.
    pub fn entry(&mut self, path: &str) -> Result<Option<&TarEntry>, ArchiveError> {
        self.ensure_index()?;
        Ok(index::lookup(&self.index, path))
    }

    /// Open the file at `path` as a bounded view of the archive. Soft links in the path are
    /// followed when [`TarOptions::follow_softlinks_on_open`] is set, and a hard link is resolved
    /// to the file it names.
    pub fn open(&mut self, path: &str) -> Result<SubStream<'_, R>, ArchiveError> {
        self.ensure_index()?;
        let resolved = if self.options.follow_softlinks_on_open {
            index::follow_softlinks(&self.index, path)?
        } else {
            path::normalize(path)
        };
        let range = index::file_range(&self.index, &resolved)
            .ok_or_else(|| ArchiveError::NotFound(path.to_string()))?;
        Ok(SubStream::new(&mut self.inner, range)?)
    }

    /// Read the whole of the file at `path`.
    pub fn read(&mut self, path: &str) -> Result<Vec<u8>, ArchiveError> {
        Ok(self.open(path)?.into_vec()?)
    }

    pub fn extract_all<P: AsRef<Path>>(&mut self, destination: P) -> Result<(), ArchiveError> {
        self.extract_path(path::ROOT, destination)
    }

    /// Extract the subtree of the archive at `source` so that `source` itself lands on
    /// `destination`. The archive is indexed again on the way through; files and directories are
    /// written as they are met and links once the whole archive has been seen.
    pub fn extract_path<P: AsRef<Path>>(
        &mut self,
        source: &str,
        destination: P,
    ) -> Result<(), ArchiveError> {
        let source = path::normalize(source);
        let destination = destination.as_ref();
        let options = self.options;
        tracing::debug!(%source, destination = %destination.display(), "extracting tar subtree");

        self.indexed = false;
        self.index.clear();
        let mut directories = Vec::new();
        let index = index::build(&mut self.inner, self.len, &options, |walker, entry| {
            let Some(dest) = path::rebase(&entry.path, &source, destination) else {
                return Ok(());
            };
            match &entry.kind {
                EntryKind::File(range) => {
                    extract::check_parents(destination, &dest)?;
                    let mut data = walker.payload(*range)?;
                    extract::write_file(
                        &mut data,
                        &dest,
                        entry.permissions | options.minimum_permissions,
                    )?;
                }
                EntryKind::Directory => {
                    extract::check_parents(destination, &dest)?;
                    extract::create_directory(&dest)?;
                    directories.push((dest, entry.permissions));
                }
                EntryKind::HardLink(_) | EntryKind::SoftLink(_) => {}
            }
            Ok(())
        })?;

        extract::Extraction {
            inner: &mut self.inner,
            index: &index,
            options: &options,
            source: &source,
            destination,
            directories,
        }
        .run()?;
        self.index = index;
        self.indexed = true;
        Ok(())
    }
}
