//! Debian binary packages: resolving names through repository lists and installing a package's
//! payload together with everything it depends on.
//!
//! A `.deb` is an `ar` archive holding a `debian-binary` version file, a compressed
//! `control.tar.*` with the package metadata and a compressed `data.tar.*` with the files to
//! install.

pub mod control;
pub mod index;
pub mod installer;

pub use self::control::ControlParagraph;
pub use self::index::{PackageIndex, SourceLine};
pub use self::installer::{InstallState, Installer, InstallerOptions, Mapping};

pub(crate) const DEBIAN_BINARY: &str = "debian-binary";

/// Payload members in the order they are looked for.
pub(crate) const DATA_MEMBERS: &[&str] = &[
    "data.tar.xz",
    "data.tar.gz",
    "data.tar.zst",
    "data.tar.bz2",
    "data.tar",
];

pub(crate) const CONTROL_MEMBERS: &[&str] = &[
    "control.tar.xz",
    "control.tar.gz",
    "control.tar.zst",
    "control.tar.bz2",
    "control.tar",
];
