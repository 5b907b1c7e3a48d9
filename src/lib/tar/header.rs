//! Raw 512-byte tar headers.

use crate::error::ArchiveError;

pub(crate) const BLOCK_SIZE: u64 = 512;

const GNU_MAGIC: &[u8; 6] = b"ustar ";
const POSIX_MAGIC: &[u8; 6] = b"ustar\0";

const NAME: std::ops::Range<usize> = 0..100;
const MODE: std::ops::Range<usize> = 100..108;
const SIZE: std::ops::Range<usize> = 124..136;
const CHECKSUM: std::ops::Range<usize> = 148..156;
const TYPE_FLAG: usize = 156;
const LINK_NAME: std::ops::Range<usize> = 157..257;
const MAGIC: std::ops::Range<usize> = 257..263;
const PREFIX: std::ops::Range<usize> = 345..500;

/// Round `size` up to a whole number of blocks, or `None` if that does not fit in a `u64`.
pub(crate) fn padded(size: u64) -> Option<u64> {
    size.div_ceil(BLOCK_SIZE).checked_mul(BLOCK_SIZE)
}

/// The bytes of `data` up to the first NUL, as a string.
pub(crate) fn c_string(data: &[u8]) -> String {
    let end = data.iter().position(|b| *b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

pub(crate) struct Header {
    block: [u8; BLOCK_SIZE as usize],
}

impl Header {
    pub(crate) fn new(block: [u8; BLOCK_SIZE as usize]) -> Self {
        Self { block }
    }

    /// An all-zero block marks the end of the archive.
    pub(crate) fn is_end_of_archive(&self) -> bool {
        self.block.iter().all(|b| *b == 0)
    }

    fn is_posix(&self) -> bool {
        &self.block[MAGIC] == POSIX_MAGIC
    }

    /// Check the magic bytes and the header checksum.
    pub(crate) fn validate(&self, offset: u64) -> Result<(), ArchiveError> {
        let magic = &self.block[MAGIC];
        if magic != GNU_MAGIC && magic != POSIX_MAGIC {
            return Err(ArchiveError::corrupt(format!(
                "missing ustar magic in header at offset {offset}"
            )));
        }
        let stored = parse_octal(&self.block[CHECKSUM]).ok_or_else(|| {
            ArchiveError::corrupt(format!("unreadable checksum in header at offset {offset}"))
        })?;
        let computed: u64 = self
            .block
            .iter()
            .enumerate()
            .map(|(i, b)| if CHECKSUM.contains(&i) { u64::from(b' ') } else { u64::from(*b) })
            .sum();
        if stored != computed {
            return Err(ArchiveError::corrupt(format!(
                "checksum mismatch in header at offset {offset}: stored {stored}, computed {computed}"
            )));
        }
        Ok(())
    }

    pub(crate) fn type_flag(&self) -> u8 {
        self.block[TYPE_FLAG]
    }

    /// The entry name. POSIX headers may split long names between `prefix` and `name`.
    pub(crate) fn path(&self) -> String {
        let name = c_string(&self.block[NAME]);
        if self.is_posix() {
            let prefix = c_string(&self.block[PREFIX]);
            if !prefix.is_empty() {
                return format!("{prefix}/{name}");
            }
        }
        name
    }

    pub(crate) fn link_name(&self) -> String {
        c_string(&self.block[LINK_NAME])
    }

    pub(crate) fn size(&self) -> Result<u64, ArchiveError> {
        parse_numeric(&self.block[SIZE])
            .ok_or_else(|| ArchiveError::corrupt(format!("invalid size for '{}'", self.path())))
    }

    pub(crate) fn mode(&self) -> Result<u32, ArchiveError> {
        parse_numeric(&self.block[MODE])
            .and_then(|mode| u32::try_from(mode).ok())
            .ok_or_else(|| ArchiveError::corrupt(format!("invalid mode for '{}'", self.path())))
    }
}

fn parse_octal(field: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(field).ok()?;
    let text = text.trim_matches(|c: char| c == '\0' || c == ' ');
    if text.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(text, 8).ok()
}

// GNU tar stores values too large for the octal field in big-endian base-256, flagged by the
// high bit of the first byte.
fn parse_numeric(field: &[u8]) -> Option<u64> {
    match field.first() {
        Some(first) if first & 0x80 != 0 => {
            let mut value = u64::from(first & 0x7f);
            for byte in &field[1..] {
                value = value.checked_mul(256)?.checked_add(u64::from(*byte))?;
            }
            Some(value)
        }
        _ => parse_octal(field),
    }
}

/// Overrides carried by a POSIX `x` extended header for the entry that follows it.
#[derive(Debug, Default)]
pub(crate) struct PaxOverrides {
    pub(crate) path: Option<String>,
    pub(crate) link_path: Option<String>,
}

impl PaxOverrides {
    /// Parse `"<len> <key>=<value>\n"` records.
    pub(crate) fn parse(data: &[u8]) -> Result<Self, ArchiveError> {
        let mut overrides = Self::default();
        let mut rest = data;
        while !rest.is_empty() && rest[0] != 0 {
            let space = rest
                .iter()
                .position(|b| *b == b' ')
                .ok_or_else(|| ArchiveError::corrupt("pax record without a length"))?;
            let len = std::str::from_utf8(&rest[..space])
                .ok()
                .and_then(|len| len.parse::<usize>().ok())
                .filter(|len| *len > space && *len <= rest.len())
                .ok_or_else(|| ArchiveError::corrupt("pax record with an invalid length"))?;
            let record = &rest[space + 1..len];
            let record = record.strip_suffix(b"\n").unwrap_or(record);
            if let Some(eq) = record.iter().position(|b| *b == b'=') {
                let value = String::from_utf8_lossy(&record[eq + 1..]).into_owned();
                match &record[..eq] {
                    b"path" => overrides.path = Some(value),
                    b"linkpath" => overrides.link_path = Some(value),
                    _ => {}
                }
            }
            rest = &rest[len..];
        }
        Ok(overrides)
    }

    pub(crate) fn merge(&mut self, other: Self) {
        if other.path.is_some() {
            self.path = other.path;
        }
        if other.link_path.is_some() {
            self.link_path = other.link_path;
        }
    }
}

#[cfg(test)]
mod test_header {
    use super::*;

    fn block_with(name: &str, size: &[u8], magic: &[u8; 6]) -> [u8; 512] {
        let mut block = [0u8; 512];
        block[..name.len()].copy_from_slice(name.as_bytes());
        block[MODE][..7].copy_from_slice(b"0000644");
        block[SIZE][..size.len()].copy_from_slice(size);
        block[TYPE_FLAG] = b'0';
        block[MAGIC].copy_from_slice(magic);
        let sum: u64 = block
            .iter()
            .enumerate()
            .map(|(i, b)| if CHECKSUM.contains(&i) { 32 } else { u64::from(*b) })
            .sum();
        let checksum = format!("{sum:06o}\0 ");
        block[CHECKSUM].copy_from_slice(checksum.as_bytes());
        block
    }

    #[test]
    fn valid_gnu_header() {
        let header = Header::new(block_with("a.txt", b"00000000012", GNU_MAGIC));
        header.validate(0).unwrap();
        assert_eq!(header.path(), "a.txt");
        assert_eq!(header.size().unwrap(), 10);
        assert_eq!(header.mode().unwrap(), 0o644);
    }

    #[test]
    fn posix_prefix_is_joined() {
        let mut block = block_with("file.txt", b"0", POSIX_MAGIC);
        block[PREFIX][..8].copy_from_slice(b"some/dir");
        let header = Header::new(block);
        assert_eq!(header.path(), "some/dir/file.txt");
    }

    #[test]
    fn checksum_mismatch_is_corrupt() {
        let mut block = block_with("a.txt", b"1", GNU_MAGIC);
        block[3] ^= 0x01;
        assert!(matches!(Header::new(block).validate(0), Err(ArchiveError::Corrupt(_))));
    }

    #[test]
    fn base256_size() {
        let mut size = [0u8; 12];
        size[0] = 0x80;
        size[4..].copy_from_slice(&10_000_000_000u64.to_be_bytes());
        assert_eq!(parse_numeric(&size), Some(10_000_000_000));
    }

    #[test]
    fn pax_records() {
        let data = b"28 path=some/very/long/name\n19 linkpath=target\n";
        let pax = PaxOverrides::parse(data).unwrap();
        assert_eq!(pax.path.as_deref(), Some("some/very/long/name"));
        assert_eq!(pax.link_path.as_deref(), Some("target"));
    }
}
