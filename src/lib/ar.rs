//! Reader for the Unix `ar` archive format, the outer container of `.deb` packages.
//!
//! Members are looked up by name and handed out as [`SubStream`] views over the underlying
//! stream, so nothing is buffered. GNU extended names (the `//` member) and BSD inline names
//! (`#1/<len>`) are understood. Two members with the same name make the archive corrupt.

use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::ArchiveError;
use crate::path;
use crate::substream::{ByteRange, SubStream};
use crate::tar::extract;

const AR_MAGIC: &[u8; 8] = b"!<arch>\n";
const AR_HEADER_SIZE: u64 = 60;
const AR_HEADER_END: &[u8; 2] = b"`\n";
const EXTENDED_NAME_TABLE: &str = "//";
const BSD_NAME_PREFIX: &str = "#1/";
const MEMBER_PERMISSIONS: u32 = 0o644;

/// A member of an `ar` archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArMember {
    pub name: String,
    pub size: u64,
    /// Offset of the member's data from the start of the archive.
    pub offset: u64,
}

impl ArMember {
    pub fn range(&self) -> ByteRange {
        ByteRange::new(self.offset, self.size)
    }
}

// The fields of a 60-byte member header that matter for reading.
struct RawHeader {
    name: String,
    size: u64,
}

impl RawHeader {
    fn parse(buf: &[u8; AR_HEADER_SIZE as usize], offset: u64) -> Result<Self, ArchiveError> {
        if &buf[58..60] != AR_HEADER_END {
            return Err(ArchiveError::corrupt(format!(
                "bad ar member header terminator at offset {offset}"
            )));
        }
        let name = field_str(&buf[0..16]).trim().to_string();
        let size = field_str(&buf[48..58]);
        let size = size.trim();
        let size = size.parse::<u64>().map_err(|_| {
            ArchiveError::corrupt(format!("invalid ar member size '{size}' at offset {offset}"))
        })?;
        Ok(Self { name, size })
    }
}

fn field_str(field: &[u8]) -> std::borrow::Cow<'_, str> {
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end])
}

fn trim_member_name(name: &str) -> String {
    name.trim_end_matches(|c: char| c == '/' || c.is_whitespace())
        .trim_start()
        .to_string()
}

fn lookup_extended_name(table: &[u8], offset: usize) -> Option<String> {
    let rest = table.get(offset..)?;
    let end = rest.iter().position(|b| *b == b'\n').unwrap_or(rest.len());
    Some(trim_member_name(&String::from_utf8_lossy(&rest[..end])))
}

/// Reads members from an `ar` archive.
#[derive(Debug)]
pub struct ArReader<R> {
    inner: R,
    len: u64,
}

impl<R: Read + Seek> ArReader<R> {
    /// Wrap a stream, checking that it starts with the `ar` magic bytes.
    pub fn new(mut inner: R) -> Result<Self, ArchiveError> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; AR_MAGIC.len()];
        if len < AR_MAGIC.len() as u64 {
            return Err(ArchiveError::Format(
                "not an ar archive: stream is shorter than the magic bytes".to_string(),
            ));
        }
        inner.read_exact(&mut magic)?;
        if &magic != AR_MAGIC {
            return Err(ArchiveError::Format(format!(
                "not an ar archive, wrong magic bytes {:?}",
                String::from_utf8_lossy(&magic)
            )));
        }
        Ok(Self { inner, len })
    }

    /// Open the member called `name` as a bounded view. Every lookup scans from the start of the
    /// archive, so a failed lookup leaves the reader usable.
    pub fn open(&mut self, name: &str) -> Result<SubStream<'_, R>, ArchiveError> {
        let member = self
            .scan(|member| member.name == name)?
            .ok_or_else(|| ArchiveError::NotFound(name.to_string()))?;
        Ok(SubStream::new(&mut self.inner, member.range())?)
    }

    /// Read the whole of the member called `name`.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        Ok(self.open(name)?.into_vec()?)
    }

    /// List every member in archive order.
    pub fn members(&mut self) -> Result<Vec<ArMember>, ArchiveError> {
        let mut members = Vec::new();
        self.scan(|member| {
            members.push(member.clone());
            false
        })?;
        Ok(members)
    }

    pub fn extract_all<P: AsRef<Path>>(&mut self, destination: P) -> Result<(), ArchiveError> {
        self.extract_path(path::ROOT, destination)
    }

    /// Write every member under `source` to disk so that `source` lands on `destination`.
    /// Members are plain files; names that climb out of the archive root are skipped.
    pub fn extract_path<P: AsRef<Path>>(
        &mut self,
        source: &str,
        destination: P,
    ) -> Result<(), ArchiveError> {
        let destination = destination.as_ref();
        tracing::debug!(%source, destination = %destination.display(), "extracting ar members");
        for member in self.members()? {
            let name = path::as_file(&path::normalize(&member.name));
            if path::escapes_root(&name) || name == path::ROOT {
                tracing::warn!(name = %member.name, "skipping ar member outside the archive root");
                continue;
            }
            let Some(dest) = path::rebase(&name, source, destination) else {
                continue;
            };
            extract::check_parents(destination, &dest)?;
            let mut data = SubStream::new(&mut self.inner, member.range())?;
            extract::write_file(&mut data, &dest, MEMBER_PERMISSIONS)?;
        }
        Ok(())
    }

    // Walk the member headers in order until `stop` returns true for one of them.
    fn scan<F>(&mut self, mut stop: F) -> Result<Option<ArMember>, ArchiveError>
    where
        F: FnMut(&ArMember) -> bool,
    {
        let mut seen = HashSet::new();
        let mut name_table: Option<Vec<u8>> = None;
        let mut offset = AR_MAGIC.len() as u64;
        let mut buf = [0u8; AR_HEADER_SIZE as usize];
        while offset < self.len {
            if offset + AR_HEADER_SIZE > self.len {
                return Err(ArchiveError::corrupt(format!(
                    "truncated ar member header at offset {offset}"
                )));
            }
            self.inner.seek(SeekFrom::Start(offset))?;
            self.inner.read_exact(&mut buf)?;
            let header = RawHeader::parse(&buf, offset)?;
            let data_start = offset + AR_HEADER_SIZE;
            if data_start + header.size > self.len {
                return Err(ArchiveError::corrupt(format!(
                    "ar member '{}' with illegal size {}",
                    header.name, header.size
                )));
            }
            let next = data_start + header.size + header.size % 2;

            let member = if header.name == EXTENDED_NAME_TABLE {
                let mut table = vec![0u8; header.size as usize];
                self.inner.read_exact(&mut table)?;
                name_table = Some(table);
                None
            } else if header.name == "/" || header.name == "/SYM64/" {
                // symbol table
                None
            } else if let Some(len) = header.name.strip_prefix(BSD_NAME_PREFIX) {
                let name_len = len.parse::<u64>().map_err(|_| {
                    ArchiveError::corrupt(format!("invalid BSD ar name length '{len}'"))
                })?;
                if name_len > header.size {
                    return Err(ArchiveError::corrupt(format!(
                        "BSD ar name length {name_len} exceeds member size {}",
                        header.size
                    )));
                }
                let mut name = vec![0u8; name_len as usize];
                self.inner.read_exact(&mut name)?;
                Some(ArMember {
                    name: trim_member_name(&field_str(&name)),
                    size: header.size - name_len,
                    offset: data_start + name_len,
                })
            } else if let Some(index) = header
                .name
                .strip_prefix('/')
                .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            {
                let index = index.parse::<usize>().map_err(|_| {
                    ArchiveError::corrupt(format!("invalid extended name offset '{index}'"))
                })?;
                let name = name_table
                    .as_deref()
                    .and_then(|table| lookup_extended_name(table, index))
                    .ok_or_else(|| {
                        ArchiveError::corrupt(format!(
                            "ar member name refers to missing extended name at offset {index}"
                        ))
                    })?;
                Some(ArMember {
                    name,
                    size: header.size,
                    offset: data_start,
                })
            } else {
                Some(ArMember {
                    name: trim_member_name(&header.name),
                    size: header.size,
                    offset: data_start,
                })
            };

            if let Some(member) = member {
                if !seen.insert(member.name.clone()) {
                    return Err(ArchiveError::corrupt(format!(
                        "duplicate ar member '{}'",
                        member.name
                    )));
                }
                tracing::trace!(name = %member.name, size = member.size, offset = member.offset, "ar member");
                if stop(&member) {
                    return Ok(Some(member));
                }
            }
            offset = next;
        }
        Ok(None)
    }
}
