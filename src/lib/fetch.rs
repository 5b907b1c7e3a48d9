//! Fetching sources into the install cache.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::cache::InstallCache;
use crate::compression::Compression;
use crate::deb::{Installer, Mapping};
use crate::download::{Downloader, HttpDownloader};
use crate::error::Error;
use crate::path;
use crate::source::{Deb, DebianSettings, Source, SourceKind, Tar};
use crate::tar::TarReader;

/// A fetched subtree waiting in the cache, and where in the project it goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staged {
    pub from: PathBuf,
    /// Relative to the project root.
    pub to: PathBuf,
}

/// Where `source_path` of a source lives inside its staging directory.
fn staged_path(staging: &Path, source_path: &str) -> PathBuf {
    path::rebase(source_path, path::ROOT, staging).unwrap_or_else(|| staging.to_path_buf())
}

/// Fetches sources of every kind into an [`InstallCache`]. Debian sources share one
/// [`Installer`], created when first needed.
pub struct Fetcher {
    cache: InstallCache,
    downloader: Arc<dyn Downloader>,
    debian: DebianSettings,
    installer: Mutex<Option<Installer>>,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("cache", &self.cache)
            .field("debian", &self.debian)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    pub fn new(cache: InstallCache, debian: DebianSettings) -> Result<Self, Error> {
        Ok(Self::with_downloader(cache, debian, Arc::new(HttpDownloader::new()?)))
    }

    pub fn with_downloader(
        cache: InstallCache,
        debian: DebianSettings,
        downloader: Arc<dyn Downloader>,
    ) -> Self {
        Self {
            cache,
            downloader,
            debian,
            installer: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> &InstallCache {
        &self.cache
    }

    /// Make every subtree of `source` available in the cache. Subtrees fetched by an earlier call
    /// or an earlier run are not fetched again.
    pub fn fetch(&self, name: &str, source: &Source) -> Result<Vec<Staged>, Error> {
        let id = match source.kind() {
            SourceKind::Deb(_) => format!(
                "{}:{}",
                source.cache_id(),
                self.debian.installer_options().architecture
            ),
            _ => source.cache_id(),
        };
        let mut staged = Vec::new();
        for subtree in source.subtrees(name) {
            let from = path::normalize(&subtree.from);
            let staging = match source.kind() {
                SourceKind::Git(git) => self.cache.create_dir(&id, path::ROOT, |dir| {
                    if dir.read_dir()?.next().is_some() {
                        std::fs::remove_dir_all(dir)?;
                    }
                    git.fetch(dir)
                })?,
                SourceKind::Tar(tar) => self
                    .cache
                    .create_dir(&id, &from, |dir| self.fetch_tar(&id, tar, &from, dir))?,
                SourceKind::Deb(deb) => self
                    .cache
                    .create_dir(&id, &from, |dir| self.fetch_deb(deb, &from, dir))?,
            };
            let to = path::rebase(&from, &from, Path::new(&subtree.to))
                .unwrap_or_else(|| PathBuf::from(&subtree.to));
            staged.push(Staged {
                from: staged_path(&staging, &from),
                to,
            });
        }
        Ok(staged)
    }

    fn fetch_tar(&self, id: &str, tar: &Tar, from: &str, dir: &Path) -> Result<(), Error> {
        let archive = self.cache.file_path(id)?;
        if !archive.is_file() {
            let body = self.downloader.get(tar.upstream())?;
            std::fs::write(&archive, body)?;
        }
        let spooled = Compression::from_name(tar.upstream()).spool(BufReader::new(File::open(&archive)?))?;
        let mut reader = TarReader::new(spooled)?;
        reader.extract_path(from, staged_path(dir, from))?;
        Ok(())
    }

    fn fetch_deb(&self, deb: &Deb, from: &str, dir: &Path) -> Result<(), Error> {
        let mut slot = self.lock_installer();
        let mut installer = match slot.take() {
            Some(installer) => installer,
            None => self.create_installer()?,
        };
        installer.clear_installed();
        let limit = deb.depth().unwrap_or(installer.options().recursion_limit);
        let mappings = [Mapping::new(from, staged_path(dir, from))];
        let result = installer.install_with_limit(&deb.packages(), &mappings, limit);
        *slot = Some(installer);
        result
    }

    fn lock_installer(&self) -> MutexGuard<'_, Option<Installer>> {
        self.installer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create_installer(&self) -> Result<Installer, Error> {
        let mut installer = Installer::with_downloader(
            self.debian.installer_options(),
            Arc::clone(&self.downloader),
        )?;
        if self.debian.sources.is_empty() {
            installer.auto_init_sources()?;
        } else {
            installer.add_sources(self.debian.sources.iter().cloned());
        }
        installer.mark_pre_installed(self.debian.pre_installed.iter().cloned());
        Ok(installer)
    }
}
