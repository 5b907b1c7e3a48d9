//! Decompression of archive streams, chosen by file name suffix.

use std::io::{self, Read, Seek, SeekFrom};

/// A compression format recognised from a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Xz,
    Zstd,
    Bzip2,
}

impl Compression {
    /// Pick the format from the suffix of `name`, which may be a path, a URL or an archive member.
    pub fn from_name(name: &str) -> Self {
        let name = name
            .split(['?', '#'])
            .next()
            .unwrap_or(name)
            .to_ascii_lowercase();
        if name.ends_with(".gz") || name.ends_with(".tgz") {
            Self::Gzip
        } else if name.ends_with(".xz") || name.ends_with(".txz") {
            Self::Xz
        } else if name.ends_with(".zst") || name.ends_with(".tzst") {
            Self::Zstd
        } else if name.ends_with(".bz2") || name.ends_with(".tbz2") || name.ends_with(".tbz") {
            Self::Bzip2
        } else {
            Self::None
        }
    }

    /// Wrap `reader` in the matching decoder.
    pub fn decoder<'a, R: Read + 'a>(self, reader: R) -> io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Self::None => Box::new(reader),
            Self::Gzip => Box::new(flate2::read::MultiGzDecoder::new(reader)),
            Self::Xz => Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)),
            Self::Zstd => Box::new(zstd::stream::read::Decoder::new(reader)?),
            Self::Bzip2 => Box::new(bzip2::read::MultiBzDecoder::new(reader)),
        })
    }

    /// Decompress `reader` into an anonymous temporary file, rewound and ready for seeking.
    pub fn spool<R: Read>(self, reader: R) -> io::Result<std::fs::File> {
        let mut decoder = self.decoder(reader)?;
        let mut spooled = tempfile::tempfile()?;
        let written = io::copy(&mut decoder, &mut spooled)?;
        tracing::trace!(compression = ?self, bytes = written, "spooled decompressed stream");
        spooled.seek(SeekFrom::Start(0))?;
        Ok(spooled)
    }
}
