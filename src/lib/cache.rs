//! Staging directories for fetched sources, reused between runs.
//!
//! Every source is staged under a directory named by the digest of its identifier. The cache
//! remembers which subtrees of each source were populated, so a later request for anything inside
//! one of those subtrees is a hit.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::Error;
use crate::path;

const CACHE_FILE_NAME: &str = "vendor-fetch-cache.json";
const DOWNLOADS_DIR: &str = "downloads";

fn digest(id: &str) -> String {
    sha256::digest(id)
}

/// The subtrees populated for each source identifier.
#[derive(Debug, Default, Clone, serde::Deserialize, serde::Serialize, PartialEq, Eq)]
struct Populated {
    #[serde(flatten)]
    map: BTreeMap<String, Vec<String>>,
}

impl Populated {
    fn contains(&self, id: &str, source_path: &str) -> bool {
        self.map
            .get(id)
            .is_some_and(|paths| paths.iter().any(|p| path::has_prefix(source_path, p)))
    }
}

#[derive(Debug)]
pub struct InstallCache {
    root: PathBuf,
    populated: Mutex<Populated>,
}

impl InstallCache {
    /// Open the cache in `root`, reading what an earlier run recorded. The directory is created if
    /// needed.
    pub fn load<P: AsRef<Path>>(root: P) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let cache_file = root.join(CACHE_FILE_NAME);
        let populated = if cache_file.is_file() {
            serde_json::from_str(&std::fs::read_to_string(&cache_file)?)?
        } else {
            Populated::default()
        };
        Ok(Self {
            root,
            populated: Mutex::new(populated),
        })
    }

    /// Record what was populated so the next run can reuse it.
    pub fn save(&self) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(&*self.lock())?;
        Ok(std::fs::write(self.cache_file(), json)?)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache_file(&self) -> PathBuf {
        self.root.join(CACHE_FILE_NAME)
    }

    fn lock(&self) -> MutexGuard<'_, Populated> {
        self.populated.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The staging directory of `id`, created if missing.
    pub fn staging_dir(&self, id: &str) -> Result<PathBuf, Error> {
        let dir = self.root.join(digest(id));
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// A stable location for a single downloaded file belonging to `id`. The file itself is not
    /// created.
    pub fn file_path(&self, id: &str) -> Result<PathBuf, Error> {
        let dir = self.root.join(DOWNLOADS_DIR);
        std::fs::create_dir_all(&dir)?;
        Ok(dir.join(digest(id)))
    }

    /// True if `source_path` of `id` lies inside a subtree populated earlier.
    pub fn is_cached(&self, id: &str, source_path: &str) -> bool {
        self.lock().contains(id, source_path)
    }

    /// Make sure `source_path` of `id` is present in its staging directory, calling `populate`
    /// with the staging directory unless an earlier call already covered it. Returns the staging
    /// directory.
    pub fn create_dir<F>(&self, id: &str, source_path: &str, populate: F) -> Result<PathBuf, Error>
    where
        F: FnOnce(&Path) -> Result<(), Error>,
    {
        let dir = self.staging_dir(id)?;
        if self.is_cached(id, source_path) {
            tracing::debug!(%id, %source_path, "cache hit");
            return Ok(dir);
        }
        tracing::debug!(%id, %source_path, staging = %dir.display(), "cache miss");
        populate(&dir)?;
        self.lock()
            .map
            .entry(id.to_string())
            .or_default()
            .push(path::normalize(source_path));
        Ok(dir)
    }

    /// Forget everything recorded for `id` and delete its staging directory.
    pub fn remove(&self, id: &str) -> Result<(), Error> {
        self.lock().map.remove(id);
        let dir = self.root.join(digest(id));
        if dir.exists() {
            std::fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    /// Identifiers with at least one populated subtree.
    pub fn ids(&self) -> Vec<String> {
        self.lock().map.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }
}

#[cfg(test)]
mod test_install_cache {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn hit_by_containment() {
        let dir = tempfile::tempdir().unwrap();
        let cache = InstallCache::load(dir.path()).unwrap();
        let calls = Cell::new(0);
        let populate = |staging: &Path| -> Result<(), Error> {
            calls.set(calls.get() + 1);
            std::fs::write(staging.join("marker"), b"x")?;
            Ok(())
        };

        let staging = cache.create_dir("tar:zlib", "usr/", populate).unwrap();
        assert!(staging.join("marker").is_file());
        cache.create_dir("tar:zlib", "./usr/lib/libz.so", populate).unwrap();
        cache.create_dir("tar:zlib", "usr/lib/", populate).unwrap();
        assert_eq!(calls.get(), 1);

        cache.create_dir("tar:zlib", "etc/", populate).unwrap();
        cache.create_dir("tar:other", "usr/", populate).unwrap();
        assert_eq!(calls.get(), 3);
        assert!(!cache.is_cached("tar:zlib", "./"));
    }

    #[test]
    fn root_covers_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cache = InstallCache::load(dir.path()).unwrap();
        cache.create_dir("git:repo", "./", |_| Ok(())).unwrap();
        assert!(cache.is_cached("git:repo", "src/lib.rs"));
        assert!(cache.is_cached("git:repo", "./"));
    }

    #[test]
    fn failed_population_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let cache = InstallCache::load(dir.path()).unwrap();
        let result = cache.create_dir("tar:broken", "./", |_| {
            Err(Error::UnresolvedDependency("nothing".into()))
        });
        assert!(result.is_err());
        assert!(!cache.is_cached("tar:broken", "./"));
        assert!(cache.is_empty());
    }

    #[test]
    fn survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = InstallCache::load(dir.path()).unwrap();
        cache.create_dir("deb:libz1", "usr/lib/", |_| Ok(())).unwrap();
        cache.save().unwrap();

        let reloaded = InstallCache::load(dir.path()).unwrap();
        assert!(reloaded.is_cached("deb:libz1", "usr/lib/x86_64-linux-gnu/"));
        assert_eq!(reloaded.ids(), ["deb:libz1"]);
        assert_eq!(
            reloaded.staging_dir("deb:libz1").unwrap(),
            cache.staging_dir("deb:libz1").unwrap()
        );
    }

    #[test]
    fn remove_forgets_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = InstallCache::load(dir.path()).unwrap();
        let staging = cache.create_dir("git:x", "./", |_| Ok(())).unwrap();
        cache.remove("git:x").unwrap();
        assert!(!staging.exists());
        assert!(!cache.is_cached("git:x", "./"));
    }
}
