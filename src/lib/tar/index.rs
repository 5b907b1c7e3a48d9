//! The in-memory index of a tar archive: one [`TarEntry`] per normalized path.

use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Seek, SeekFrom};

use super::TarOptions;
use super::header::{BLOCK_SIZE, Header, PaxOverrides, c_string, padded};
use crate::error::ArchiveError;
use crate::path;
use crate::substream::{ByteRange, SubStream};

/// Soft-link substitutions allowed while resolving one path.
pub(crate) const MAX_LINK_SUBSTITUTIONS: usize = 40;

pub(crate) type Index = BTreeMap<String, TarEntry>;

/// What an entry holds. Hard-link targets are normalized archive paths, soft-link targets are
/// kept exactly as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File(ByteRange),
    Directory,
    HardLink(String),
    SoftLink(String),
}

/// One indexed entry of a tar archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TarEntry {
    /// Normalized path; directories end with `/`.
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    /// Permission bits from the header (`mode & 0o7777`).
    pub permissions: u32,
}

impl TarEntry {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory)
    }
}

/// Steps through the headers of a tar stream one entry at a time, folding GNU long-name and pax
/// headers into the entry they describe.
pub(crate) struct EntryWalker<'a, R> {
    inner: &'a mut R,
    len: u64,
    offset: u64,
}

impl<'a, R: Read + Seek> EntryWalker<'a, R> {
    pub(crate) fn new(inner: &'a mut R, len: u64) -> Self {
        Self {
            inner,
            len,
            offset: 0,
        }
    }

    /// A view over the payload of an entry returned by [`next_entry`](Self::next_entry).
    pub(crate) fn payload(&mut self, range: ByteRange) -> std::io::Result<SubStream<'_, R>> {
        SubStream::new(&mut *self.inner, range)
    }

    fn read_payload(&mut self, range: ByteRange) -> Result<Vec<u8>, ArchiveError> {
        Ok(self.payload(range)?.into_vec()?)
    }

    fn read_header(&mut self) -> Result<Option<Header>, ArchiveError> {
        if self.offset >= self.len {
            return Ok(None);
        }
        if self.offset + BLOCK_SIZE > self.len {
            return Err(ArchiveError::corrupt(format!(
                "truncated header at offset {}",
                self.offset
            )));
        }
        let mut block = [0u8; BLOCK_SIZE as usize];
        self.inner.seek(SeekFrom::Start(self.offset))?;
        self.inner.read_exact(&mut block)?;
        let header = Header::new(block);
        if header.is_end_of_archive() {
            return Ok(None);
        }
        header.validate(self.offset)?;
        Ok(Some(header))
    }

    pub(crate) fn next_entry(
        &mut self,
        options: &TarOptions,
    ) -> Result<Option<TarEntry>, ArchiveError> {
        let mut long_name = None;
        let mut long_link = None;
        let mut pax = PaxOverrides::default();
        loop {
            let Some(header) = self.read_header()? else {
                return Ok(None);
            };
            let size = header.size()?;
            let data = ByteRange::new(self.offset + BLOCK_SIZE, size);
            let next = padded(size).and_then(|padded| data.offset.checked_add(padded));
            let Some(next) = next.filter(|_| data.end().is_some_and(|end| end <= self.len)) else {
                return Err(ArchiveError::corrupt(format!(
                    "entry '{}' runs past the end of the archive",
                    header.path()
                )));
            };
            self.offset = next;

            match header.type_flag() {
                b'L' => {
                    long_name = Some(c_string(&self.read_payload(data)?));
                    continue;
                }
                b'K' => {
                    long_link = Some(c_string(&self.read_payload(data)?));
                    continue;
                }
                b'x' => {
                    pax.merge(PaxOverrides::parse(&self.read_payload(data)?)?);
                    continue;
                }
                b'g' => continue,
                _ => {}
            }

            let raw_path = pax
                .path
                .take()
                .or_else(|| long_name.take())
                .unwrap_or_else(|| header.path());
            let raw_link = pax
                .link_path
                .take()
                .or_else(|| long_link.take())
                .unwrap_or_else(|| header.link_name());
            let kind = match header.type_flag() {
                b'0' | b'\0' | b'7' if raw_path.ends_with('/') => EntryKind::Directory,
                b'0' | b'\0' | b'7' => EntryKind::File(data),
                b'5' => EntryKind::Directory,
                b'1' => EntryKind::HardLink(path::as_file(&path::normalize(&raw_link))),
                b'2' => EntryKind::SoftLink(raw_link),
                other => {
                    if options.throw_on_unsupported_entry {
                        return Err(ArchiveError::UnsupportedEntryType {
                            path: raw_path,
                            kind: other,
                        });
                    }
                    tracing::debug!(path = %raw_path, kind = %char::from(other), "skipping unsupported tar entry");
                    continue;
                }
            };

            let normalized = path::normalize(&raw_path);
            if path::escapes_root(&normalized) {
                tracing::warn!(path = %raw_path, "skipping tar entry outside the archive root");
                continue;
            }
            let path = match kind {
                EntryKind::Directory => path::as_directory(&normalized),
                _ if normalized == path::ROOT => {
                    tracing::debug!(path = %raw_path, "skipping non-directory entry at the archive root");
                    continue;
                }
                _ => path::as_file(&normalized),
            };
            tracing::trace!(%path, size, "indexed tar entry");
            return Ok(Some(TarEntry {
                path,
                kind,
                size,
                permissions: header.mode()? & 0o7777,
            }));
        }
    }
}

/// Walk every entry of the archive into a fresh index, handing each entry to `visit` before it is
/// recorded. Two entries with the same normalized path make the archive corrupt.
pub(crate) fn build<R, F>(
    inner: &mut R,
    len: u64,
    options: &TarOptions,
    mut visit: F,
) -> Result<Index, ArchiveError>
where
    R: Read + Seek,
    F: FnMut(&mut EntryWalker<'_, R>, &TarEntry) -> Result<(), ArchiveError>,
{
    let mut index = Index::new();
    let mut walker = EntryWalker::new(inner, len);
    while let Some(entry) = walker.next_entry(options)? {
        let twin = if entry.is_dir() {
            path::as_file(&entry.path)
        } else {
            path::as_directory(&entry.path)
        };
        if index.contains_key(&entry.path) || index.contains_key(&twin) {
            return Err(ArchiveError::corrupt(format!(
                "duplicate entry '{}'",
                entry.path
            )));
        }
        visit(&mut walker, &entry)?;
        index.insert(entry.path.clone(), entry);
    }
    Ok(index)
}

/// Find the entry at `path`, whichever form it is written in.
pub(crate) fn lookup<'i>(index: &'i Index, path: &str) -> Option<&'i TarEntry> {
    let normalized = path::normalize(path);
    index
        .get(&path::as_file(&normalized))
        .or_else(|| index.get(&path::as_directory(&normalized)))
}

/// The payload of the file at `path`, through at most one hard link.
pub(crate) fn file_range(index: &Index, path: &str) -> Option<ByteRange> {
    let key = path::as_file(&path::normalize(path));
    match &index.get(&key)?.kind {
        EntryKind::File(range) => Some(*range),
        EntryKind::HardLink(target) => match &index.get(target)?.kind {
            EntryKind::File(range) => Some(*range),
            _ => None,
        },
        _ => None,
    }
}

/// Where a soft link at `link` (file form) points, as a normalized archive path.
pub(crate) fn link_destination(link: &str, target: &str) -> String {
    path::as_file(&path::join(&path::parent(link), target))
}

/// Substitute soft links in `path` component by component until no component is a link.
pub(crate) fn follow_softlinks(index: &Index, path: &str) -> Result<String, ArchiveError> {
    let mut current = path::as_file(&path::normalize(path));
    let mut substitutions = 0;
    'restart: loop {
        let parts: Vec<String> = current.split('/').map(str::to_string).collect();
        let mut prefix = String::new();
        for (i, part) in parts.iter().enumerate() {
            let candidate = if prefix.is_empty() {
                part.clone()
            } else {
                format!("{prefix}/{part}")
            };
            if let Some(EntryKind::SoftLink(target)) = index.get(&candidate).map(|e| &e.kind) {
                substitutions += 1;
                if substitutions > MAX_LINK_SUBSTITUTIONS {
                    return Err(ArchiveError::InfiniteRecursion(path.to_string()));
                }
                let mut next = link_destination(&candidate, target);
                let rest = parts[i + 1..].join("/");
                if !rest.is_empty() {
                    next = path::join(&path::as_directory(&next), &rest);
                }
                current = path::as_file(&next);
                continue 'restart;
            }
            prefix = candidate;
        }
        return Ok(current);
    }
}

/// True if following the chain of soft links that starts at `link` comes back around.
pub(crate) fn link_chain_loops(index: &Index, link: &str) -> bool {
    let mut seen = HashSet::from([link.to_string()]);
    let mut current = link.to_string();
    for _ in 0..MAX_LINK_SUBSTITUTIONS {
        let Some(EntryKind::SoftLink(target)) = index.get(&current).map(|e| &e.kind) else {
            return false;
        };
        let next = link_destination(&current, target);
        if !seen.insert(next.clone()) {
            return true;
        }
        current = next;
    }
    true
}
