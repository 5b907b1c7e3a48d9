#![allow(rustdoc::redundant_explicit_links)]
//! Vendor subtrees of git repositories, tar archives and Debian packages into a project.
//!
//! Sources are declared in a `vendor.toml` manifest. Each one is fetched into a staging cache and
//! the requested subtrees are then copied into the project, refusing to let one source overwrite
//! files provided by another.
//!
//! # Core Features
//!
//! - Shallow clones of git repositories by branch, tag or commit, optionally recursive (requires
//!   `git` on `PATH`).
//! - Tar archives, compressed with gzip, xz, zstd or bzip2, read by the streaming [`tar`] reader.
//! - Debian packages from APT repositories, installed together with their dependencies by the
//!   [`deb::Installer`].
//!
//! # Usage
//!
//! ```rust
//! use vendor_fetch::try_parse_toml;
//!
//! let manifest = try_parse_toml(r#"
//! [sources]
//! zlib = { git = "https://github.com/madler/zlib.git", tag = "v1.3.1" }
//! openssl = { deb = "libssl3", depth = 1 }
//!
//! [sources.headers]
//! tar = "https://example.com/headers-2.0.tar.xz"
//! subtrees = [{ from = "headers-2.0/include/", to = "third_party/include/" }]
//!
//! [debian]
//! sources = ["deb http://deb.debian.org/debian bookworm main"]
//! "#)?;
//!
//! for (name, source) in &manifest.sources {
//!     println!("{name}: {source}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Structure of the `sources` table
//!
//! Each value in this table must be a table which identifies the remote source it represents:
//!
//! **Tar archives**
//! - The `tar` key gives the URL of the archive. The compression is taken from its suffix.
//!
//! **Git repos**
//! - The `git` key gives the SSH or HTTPS upstream URL.
//! - Any one of the `branch`/`tag`/`rev` keys indicates what to clone.
//! - Use `recursive = true` to recursively clone submodules.
//!
//! **Debian packages**
//! - The `deb` key gives one or more package names.
//! - `depth` limits how many levels of dependencies are installed; 1 is the packages alone.
//!
//! Every source may list `subtrees = [{ from, to }]`. Without it, the whole source is copied into a
//! directory named after the source.

pub mod ar;
pub mod cache;
pub mod compression;
pub mod copy;
pub mod deb;
pub mod download;
mod error;
pub mod fetch;
pub mod git;
pub mod path;
pub mod pool;
pub mod source;
pub mod substream;
pub mod tar;

#[doc(inline)]
pub use crate::cache::InstallCache;
#[doc(inline)]
pub use crate::copy::Copier;
#[doc(inline)]
pub use crate::error::{ArchiveError, Error};
#[doc(inline)]
pub use crate::fetch::{Fetcher, Staged};
#[doc(inline)]
pub use crate::source::*;
