//! Installing Debian packages and their dependencies into local directories.

use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::control::ControlParagraph;
use super::index::{PackageIndex, host_architecture, sources_list_lines};
use super::{CONTROL_MEMBERS, DATA_MEMBERS, DEBIAN_BINARY};
use crate::ar::ArReader;
use crate::compression::Compression;
use crate::download::{Downloader, HttpDownloader};
use crate::error::Error;
use crate::pool::TaskPool;
use crate::tar::{TarOptions, TarReader};

const APT_SOURCES_LIST: &str = "/etc/apt/sources.list";
const APT_SOURCES_DIR: &str = "/etc/apt/sources.list.d";

/// Settings for an [`Installer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerOptions {
    /// How many levels of packages to install: 1 is only the requested packages.
    pub recursion_limit: usize,
    /// Fail when a package name is not in any list, instead of leaving it out.
    pub throw_on_failed_dependency: bool,
    pub extract_hard_links_as_copies: bool,
    pub extract_soft_links_as_copies: bool,
    pub minimum_permissions: u32,
    pub threads: usize,
    /// Debian architecture, e.g. `amd64`.
    pub architecture: String,
}

impl Default for InstallerOptions {
    fn default() -> Self {
        Self {
            recursion_limit: 9999,
            throw_on_failed_dependency: true,
            extract_hard_links_as_copies: false,
            extract_soft_links_as_copies: false,
            minimum_permissions: 0o777,
            threads: 16,
            architecture: host_architecture().to_string(),
        }
    }
}

impl InstallerOptions {
    /// The options every package payload is extracted with. Packages routinely ship links into
    /// other packages, so link and entry-type problems never fail an install.
    pub fn tar_options(&self) -> TarOptions {
        TarOptions {
            throw_on_unsupported_entry: false,
            throw_on_infinite_recursion: false,
            extract_hard_links_as_copies: self.extract_hard_links_as_copies,
            extract_soft_links_as_copies: self.extract_soft_links_as_copies,
            throw_on_broken_softlinks: false,
            skip_broken_softlinks: false,
            follow_softlinks_on_open: true,
            minimum_permissions: self.minimum_permissions,
        }
    }
}

/// Where a subtree of a package payload goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    /// Path inside the payload, e.g. `usr/lib/` or `./`.
    pub source: String,
    pub destination: PathBuf,
}

impl Mapping {
    pub fn new<S: Into<String>, P: Into<PathBuf>>(source: S, destination: P) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }
}

/// Bookkeeping shared by every install task.
#[derive(Debug, Default)]
pub struct InstallState {
    /// URLs already claimed by a task. One URL is only ever installed once.
    pub installed_urls: HashSet<String>,
    /// Names treated as installed at the start of every [`Installer::install`].
    pub pre_installed: BTreeSet<String>,
    /// Packages whose download or extraction is under way, reported as each one starts.
    pub currently_installing: BTreeSet<String>,
}

fn lock(state: &Mutex<InstallState>) -> MutexGuard<'_, InstallState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Downloads Debian packages and extracts their payloads, following their dependencies.
pub struct Installer {
    options: InstallerOptions,
    sources: Vec<String>,
    index: Option<Arc<PackageIndex>>,
    state: Arc<Mutex<InstallState>>,
    downloader: Arc<dyn Downloader>,
    pool: TaskPool,
    scratch: Arc<tempfile::TempDir>,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("options", &self.options)
            .field("sources", &self.sources)
            .field("indexed", &self.index.is_some())
            .field("scratch", &self.scratch.path())
            .finish()
    }
}

impl Installer {
    pub fn new(options: InstallerOptions) -> Result<Self, Error> {
        Self::with_downloader(options, Arc::new(HttpDownloader::new()?))
    }

    pub fn with_downloader(
        options: InstallerOptions,
        downloader: Arc<dyn Downloader>,
    ) -> Result<Self, Error> {
        Ok(Self {
            pool: TaskPool::new(options.threads)?,
            options,
            sources: Vec::new(),
            index: None,
            state: Arc::new(Mutex::new(InstallState::default())),
            downloader,
            scratch: Arc::new(tempfile::tempdir()?),
        })
    }

    pub fn options(&self) -> &InstallerOptions {
        &self.options
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Add `deb ...` source lines. The package index is rebuilt on next use.
    pub fn add_sources<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources.extend(lines.into_iter().map(Into::into));
        self.index = None;
    }

    /// Replace the source lines. The package index is rebuilt on next use.
    pub fn set_sources<I, S>(&mut self, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources.clear();
        self.add_sources(lines);
    }

    /// Add the lines of an APT sources list file.
    pub fn add_sources_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        let text = std::fs::read_to_string(path.as_ref())?;
        self.add_sources(sources_list_lines(&text));
        Ok(())
    }

    /// Add the sources this system's APT is configured with.
    pub fn auto_init_sources(&mut self) -> Result<(), Error> {
        let list = Path::new(APT_SOURCES_LIST);
        if list.is_file() {
            self.add_sources_file(list)?;
        }
        let dir = Path::new(APT_SOURCES_DIR);
        if dir.is_dir() {
            let mut files = std::fs::read_dir(dir)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<Result<Vec<_>, _>>()?;
            files.sort();
            for file in files {
                if file.is_file() && file.extension().is_some_and(|ext| ext == "list") {
                    self.add_sources_file(&file)?;
                }
            }
        }
        tracing::debug!(sources = self.sources.len(), "initialised sources from APT");
        Ok(())
    }

    /// The package index for the current sources, built on first use.
    pub fn package_index(&mut self) -> Result<Arc<PackageIndex>, Error> {
        if let Some(index) = &self.index {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(PackageIndex::build(
            &self.sources,
            &self.options.architecture,
            self.downloader.as_ref(),
        )?);
        self.index = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Treat `names` as installed at the start of every later install.
    pub fn mark_pre_installed<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        lock(&self.state)
            .pre_installed
            .extend(names.into_iter().map(Into::into));
    }

    /// Treat `names` as installed until [`clear_installed`](Self::clear_installed).
    pub fn mark_installed<I, S>(&mut self, names: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let index = self.package_index()?;
        let mut state = lock(&self.state);
        for name in names {
            match index.url(name.as_ref()) {
                Some(url) => {
                    state.installed_urls.insert(url.to_string());
                }
                None => tracing::debug!(package = name.as_ref(), "cannot mark unknown package"),
            }
        }
        Ok(())
    }

    /// Forget which packages were installed, so the next install starts afresh.
    pub fn clear_installed(&self) {
        lock(&self.state).installed_urls.clear();
    }

    /// Install the whole payload of every package in `names` into `destination`.
    pub fn install_to<S, P>(&mut self, names: &[S], destination: P) -> Result<(), Error>
    where
        S: AsRef<str>,
        P: Into<PathBuf>,
    {
        self.install(names, &[Mapping::new(crate::path::ROOT, destination)])
    }

    /// Install `names` (each may hold several whitespace-separated names) and their
    /// dependencies, extracting every mapping of every package. Returns the first failure once
    /// every scheduled package has been dealt with.
    pub fn install<S: AsRef<str>>(&mut self, names: &[S], mappings: &[Mapping]) -> Result<(), Error> {
        self.install_with_limit(names, mappings, self.options.recursion_limit)
    }

    /// [`install`](Self::install) with a recursion limit other than the configured one.
    pub fn install_with_limit<S: AsRef<str>>(
        &mut self,
        names: &[S],
        mappings: &[Mapping],
        recursion_limit: usize,
    ) -> Result<(), Error> {
        let index = self.package_index()?;
        {
            let mut state = lock(&self.state);
            let pre_installed: Vec<String> = state
                .pre_installed
                .iter()
                .filter_map(|name| index.url(name))
                .map(str::to_string)
                .collect();
            state.installed_urls.extend(pre_installed);
        }
        let installation = Arc::new(Installation {
            options: self.options.clone(),
            index,
            state: Arc::clone(&self.state),
            downloader: Arc::clone(&self.downloader),
            pool: self.pool.clone(),
            scratch: Arc::clone(&self.scratch),
        });
        let mappings: Arc<[Mapping]> = mappings.into();
        for name in names.iter().flat_map(|names| names.as_ref().split_whitespace()) {
            installation.schedule(name.to_string(), Arc::clone(&mappings), recursion_limit);
        }
        self.pool.wait()
    }
}

/// Everything one install task needs, shared between tasks.
struct Installation {
    options: InstallerOptions,
    index: Arc<PackageIndex>,
    state: Arc<Mutex<InstallState>>,
    downloader: Arc<dyn Downloader>,
    pool: TaskPool,
    scratch: Arc<tempfile::TempDir>,
}

impl Installation {
    fn schedule(self: &Arc<Self>, name: String, mappings: Arc<[Mapping]>, depth: usize) {
        let installation = Arc::clone(self);
        self.pool
            .spawn(move || installation.install_one(name, mappings, depth));
    }

    fn install_one(self: &Arc<Self>, name: String, mappings: Arc<[Mapping]>, depth: usize) -> Result<(), Error> {
        let url = {
            let mut state = lock(&self.state);
            let Some(url) = self.index.url(&name) else {
                if self.options.throw_on_failed_dependency {
                    return Err(Error::UnresolvedDependency(name));
                }
                tracing::debug!(package = %name, "package not found in any list, skipping");
                return Ok(());
            };
            if !state.installed_urls.insert(url.to_string()) {
                tracing::debug!(package = %name, "already installed");
                return Ok(());
            }
            state.currently_installing.insert(name.clone());
            tracing::debug!(in_flight = ?state.currently_installing, "packages being installed");
            url.to_string()
        };
        tracing::info!(package = %name, %url, "installing");
        let result = self.fetch_and_extract(&name, &url, &mappings, depth);
        lock(&self.state).currently_installing.remove(&name);
        for dependency in result? {
            self.schedule(dependency, Arc::clone(&mappings), depth - 1);
        }
        Ok(())
    }

    /// Extract the payload of the package at `url` and return the names it depends on, if the
    /// depth allows going further.
    fn fetch_and_extract(
        &self,
        name: &str,
        url: &str,
        mappings: &[Mapping],
        depth: usize,
    ) -> Result<Vec<String>, Error> {
        let dir = self.scratch.path().join(sha256::digest(url));
        let deb_path = self.downloader.download(url, &dir)?;
        let file_name = crate::download::file_name(url);
        let mut deb = ArReader::new(BufReader::new(File::open(&deb_path)?))
            .map_err(|err| Error::package(name, &file_name, err))?;

        let version = deb
            .read(DEBIAN_BINARY)
            .map_err(|err| Error::package(name, DEBIAN_BINARY, err))?;
        let version = String::from_utf8_lossy(&version);
        if !version.contains("2.0") {
            return Err(Error::UnsupportedFormatVersion {
                package: name.to_string(),
                version: version.trim().to_string(),
            });
        }

        match open_member(&mut deb, name, DATA_MEMBERS)? {
            Some((member, data)) => {
                let mut tar = TarReader::with_options(data, self.options.tar_options())
                    .map_err(|err| Error::package(name, member, err))?;
                for mapping in mappings {
                    tar.extract_path(&mapping.source, &mapping.destination)
                        .map_err(|err| Error::package(name, member, err))?;
                }
            }
            None => tracing::warn!(package = %name, "package has no data member, nothing extracted"),
        }

        if depth <= 1 {
            return Ok(Vec::new());
        }
        let Some((member, control)) = open_member(&mut deb, name, CONTROL_MEMBERS)? else {
            tracing::warn!(package = %name, "package has no control member, dependencies not followed");
            return Ok(Vec::new());
        };
        let control = TarReader::new(control)
            .and_then(|mut tar| tar.read("control"))
            .map_err(|err| Error::package(name, member, err))?;
        let dependencies = ControlParagraph::parse(&String::from_utf8_lossy(&control))
            .map(|paragraph| paragraph.dependencies())
            .unwrap_or_default();
        tracing::debug!(package = %name, ?dependencies, "scheduling dependencies");
        Ok(dependencies)
    }
}

/// Decompress the first of `candidates` present in the package into a temporary file.
fn open_member<R>(
    deb: &mut ArReader<R>,
    package: &str,
    candidates: &[&'static str],
) -> Result<Option<(&'static str, File)>, Error>
where
    R: std::io::Read + std::io::Seek,
{
    for &member in candidates {
        match deb.open(member) {
            Ok(stream) => {
                let spooled = Compression::from_name(member)
                    .spool(stream)
                    .map_err(|err| Error::package(package, member, err.into()))?;
                return Ok(Some((member, spooled)));
            }
            Err(err) if err.is_not_found() => continue,
            Err(err) => return Err(Error::package(package, member, err)),
        }
    }
    Ok(None)
}
