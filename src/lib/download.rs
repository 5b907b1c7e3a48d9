//! Fetching remote files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

const DOWNLOAD_ATTEMPTS: usize = 3;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Something that can fetch the bytes behind a URL.
pub trait Downloader: Send + Sync {
    /// Fetch the whole body behind `url`.
    fn get(&self, url: &str) -> Result<Vec<u8>, Error>;

    /// Fetch `url` into `dir`, named after the last segment of the URL. Returns the new file.
    fn download(&self, url: &str, dir: &Path) -> Result<PathBuf, Error> {
        let body = self.get(url)?;
        std::fs::create_dir_all(dir)?;
        let path = dir.join(file_name(url));
        std::fs::write(&path, body)?;
        Ok(path)
    }
}

/// The last non-empty segment of a URL or path, or `download` if it has none.
pub fn file_name(url: &str) -> String {
    let from_url = url::Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
            .map(str::to_string)
    });
    from_url
        .or_else(|| {
            Path::new(url)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "download".to_string())
}

fn local_path(url: &str) -> Option<PathBuf> {
    if url.starts_with("file://") {
        return url::Url::parse(url).ok()?.to_file_path().ok();
    }
    if url.contains("://") {
        return None;
    }
    Some(PathBuf::from(url))
}

/// Downloads over HTTP(S) with a blocking client, retrying failed attempts. `file://` URLs and
/// plain paths are read from the local filesystem.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
    attempts: usize,
}

impl HttpDownloader {
    pub fn new() -> Result<Self, Error> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            attempts: DOWNLOAD_ATTEMPTS,
        })
    }

    fn get_once(&self, url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let response = self.client.get(url).send()?.error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }
}

impl Downloader for HttpDownloader {
    fn get(&self, url: &str) -> Result<Vec<u8>, Error> {
        if let Some(path) = local_path(url) {
            tracing::debug!(path = %path.display(), "reading local file");
            return Ok(std::fs::read(path)?);
        }
        let mut attempt = 1;
        loop {
            tracing::debug!(%url, attempt, "downloading");
            match self.get_once(url) {
                Ok(body) => {
                    tracing::info!(%url, bytes = body.len(), "downloaded");
                    return Ok(body);
                }
                Err(err) if attempt < self.attempts => {
                    tracing::warn!(%url, attempt, "download failed, retrying: {err}");
                    attempt += 1;
                }
                Err(err) => {
                    return Err(Error::Download {
                        url: url.to_string(),
                        err,
                    });
                }
            }
        }
    }
}
