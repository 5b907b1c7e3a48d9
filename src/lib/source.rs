//! Sources declared in a `vendor.toml` manifest.

use crate::deb::InstallerOptions;
use crate::git::Git;
use crate::path;

/// Errors encountered when parsing sources from a manifest.
#[derive(Debug, thiserror::Error)]
pub enum SourceParseError {
    /// An unknown source variant was encountered.
    #[error("expected a valid source type for source '{source_name}': expected one of: {known}", known = SOURCE_VARIANTS.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    VariantUnknown { source_name: String },

    /// A source has multiple variants given.
    #[error("multiple source types for source '{source_name}': expected exactly one of: {known}", known = SOURCE_VARIANTS.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    VariantMultiple { source_name: String },

    /// A toml value was expected to be a table.
    #[error("expected value '{name}' to be a toml table")]
    ValueNotTable { name: String },

    /// The `sources` table was not found.
    #[error("required table 'sources' not found in manifest")]
    SourceTableNotFound,

    #[error("invalid 'subtrees' for source '{source_name}'")]
    SubtreesInvalid {
        source_name: String,
        #[source]
        err: toml::de::Error,
    },

    /// A subtree destination that would land outside the project root.
    #[error("subtree destination '{to}' of source '{source_name}' must stay inside the project root")]
    SubtreeDestinationInvalid { source_name: String, to: String },

    #[error("invalid 'debian' table")]
    DebianInvalid(#[source] toml::de::Error),

    /// A toml deserialisation error occurred.
    #[error(transparent)]
    TomlInvalid(#[from] toml::de::Error),
}

/// Allowed source variants.
#[derive(Debug, PartialEq, Eq, Hash)]
enum SourceVariant {
    Git,
    Tar,
    Deb,
}

const SOURCE_VARIANTS: &[SourceVariant] = &[SourceVariant::Git, SourceVariant::Tar, SourceVariant::Deb];

impl std::fmt::Display for SourceVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Git => write!(f, "git"),
            Self::Tar => write!(f, "tar"),
            Self::Deb => write!(f, "deb"),
        }
    }
}

impl SourceVariant {
    fn from<S: AsRef<str>>(name: S) -> Option<Self> {
        match name.as_ref() {
            "git" => Some(Self::Git),
            "tar" => Some(Self::Tar),
            "deb" => Some(Self::Deb),
            _ => None,
        }
    }
}

/// A remote tar archive, optionally compressed.
#[derive(Debug, serde::Deserialize, serde::Serialize, PartialEq, Eq, Clone)]
pub struct Tar {
    #[serde(rename = "tar")]
    url: String,
}

impl Tar {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self { url: url.into() }
    }

    pub fn upstream(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, serde::Deserialize, serde::Serialize, PartialEq, Eq, Clone)]
#[serde(untagged)]
enum PackageNames {
    One(String),
    Many(Vec<String>),
}

/// Debian packages installed together with their dependencies.
#[derive(Debug, serde::Deserialize, serde::Serialize, PartialEq, Eq, Clone)]
pub struct Deb {
    #[serde(rename = "deb")]
    packages: PackageNames,
    /// Overrides the installer's recursion limit; 1 installs only the named packages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    depth: Option<usize>,
}

impl Deb {
    pub fn new<I, S>(packages: I, depth: Option<usize>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            packages: PackageNames::Many(packages.into_iter().map(Into::into).collect()),
            depth,
        }
    }

    /// The package names, with whitespace-separated lists split up.
    pub fn packages(&self) -> Vec<&str> {
        match &self.packages {
            PackageNames::One(names) => names.split_whitespace().collect(),
            PackageNames::Many(names) => names.iter().flat_map(|n| n.split_whitespace()).collect(),
        }
    }

    pub fn depth(&self) -> Option<usize> {
        self.depth
    }
}

/// Where a subtree of a fetched source is copied to, relative to the project root.
///
/// `from` is a path inside the source. As with `cp -r`, a `from` written without a trailing `/`
/// is placed inside `to` when `to` ends in `/`.
#[derive(Debug, serde::Deserialize, serde::Serialize, PartialEq, Eq, Clone)]
pub struct Subtree {
    pub from: String,
    pub to: String,
}

impl Subtree {
    pub fn new<F: Into<String>, T: Into<String>>(from: F, to: T) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// The kind of remote a source comes from.
#[derive(Debug, serde::Deserialize, serde::Serialize, PartialEq, Eq, Clone)]
#[serde(untagged)]
pub enum SourceKind {
    Git(Git),
    Tar(Tar),
    Deb(Deb),
}

/// Represents an entry in the `sources` table.
#[derive(Debug, serde::Serialize, PartialEq, Eq, Clone)]
pub struct Source {
    #[serde(flatten)]
    kind: SourceKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    subtrees: Vec<Subtree>,
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            SourceKind::Git(git) => write!(f, "git source: {git}")?,
            SourceKind::Tar(tar) => write!(f, "tar source: {}", tar.url)?,
            SourceKind::Deb(deb) => write!(f, "deb source: {}", deb.packages().join(" "))?,
        }
        for subtree in &self.subtrees {
            write!(f, " [{} -> {}]", subtree.from, subtree.to)?;
        }
        Ok(())
    }
}

impl Source {
    pub fn new(kind: SourceKind, subtrees: Vec<Subtree>) -> Self {
        Self { kind, subtrees }
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    /// The subtrees to copy. Without any declared, the whole source goes to a directory named
    /// after it.
    pub fn subtrees(&self, name: &str) -> Vec<Subtree> {
        if self.subtrees.is_empty() {
            vec![Subtree::new(path::ROOT, format!("{name}/"))]
        } else {
            self.subtrees.clone()
        }
    }

    /// Identifies what is fetched, whatever subtrees are taken from it.
    pub fn cache_id(&self) -> String {
        match &self.kind {
            SourceKind::Git(git) => format!("git:{git}"),
            SourceKind::Tar(tar) => format!("tar:{}", tar.url),
            SourceKind::Deb(deb) => {
                let mut packages = deb.packages();
                packages.sort_unstable();
                match deb.depth {
                    Some(depth) => format!("deb:{}:{depth}", packages.join(" ")),
                    None => format!("deb:{}", packages.join(" ")),
                }
            }
        }
    }

    fn enforce_one_valid_variant<S: ToString>(
        name: S,
        source: &toml::Table,
    ) -> Result<SourceVariant, SourceParseError> {
        let mut detected_variant = None;
        for key in source.keys() {
            if let Some(variant) = SourceVariant::from(key) {
                if detected_variant.is_some() {
                    return Err(SourceParseError::VariantMultiple {
                        source_name: name.to_string(),
                    });
                }
                detected_variant = Some(variant);
            }
        }
        detected_variant.ok_or(SourceParseError::VariantUnknown {
            source_name: name.to_string(),
        })
    }

    /// Parse a TOML table into a `Source`. Exactly one key in the table must identify a source
    /// type; an optional `subtrees` array lists what to copy.
    pub fn parse<S: ToString>(name: S, mut source: toml::Table) -> Result<Self, SourceParseError> {
        Self::enforce_one_valid_variant(name.to_string(), &source)?;
        let subtrees = match source.remove("subtrees") {
            Some(value) => value
                .try_into::<Vec<Subtree>>()
                .map_err(|err| SourceParseError::SubtreesInvalid {
                    source_name: name.to_string(),
                    err,
                })?,
            None => Vec::new(),
        };
        let kind = toml::Value::Table(source).try_into::<SourceKind>()?;
        let source = Self { kind, subtrees };
        let name = name.to_string();
        if let Some(subtree) = source
            .subtrees(&name)
            .into_iter()
            .find(|subtree| !stays_inside(&subtree.to))
        {
            return Err(SourceParseError::SubtreeDestinationInvalid {
                source_name: name,
                to: subtree.to,
            });
        }
        Ok(source)
    }
}

// A relative path that does not climb above the directory it is resolved against.
fn stays_inside(to: &str) -> bool {
    use std::path::{Component, Path};
    let rooted = Path::new(to)
        .components()
        .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir));
    !rooted && !path::escapes_root(&path::normalize(to))
}

/// Installer settings from the `debian` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DebianSettings {
    /// `deb ...` source lines. When empty, the system's APT sources are used.
    pub sources: Vec<String>,
    pub architecture: Option<String>,
    pub recursion_limit: Option<usize>,
    pub throw_on_failed_dependency: Option<bool>,
    pub hard_links_as_copies: bool,
    pub soft_links_as_copies: bool,
    pub minimum_permissions: Option<u32>,
    pub threads: Option<usize>,
    /// Packages never installed, e.g. because the target system already has them.
    pub pre_installed: Vec<String>,
}

impl DebianSettings {
    pub fn installer_options(&self) -> InstallerOptions {
        let defaults = InstallerOptions::default();
        InstallerOptions {
            recursion_limit: self.recursion_limit.unwrap_or(defaults.recursion_limit),
            throw_on_failed_dependency: self
                .throw_on_failed_dependency
                .unwrap_or(defaults.throw_on_failed_dependency),
            extract_hard_links_as_copies: self.hard_links_as_copies,
            extract_soft_links_as_copies: self.soft_links_as_copies,
            minimum_permissions: self.minimum_permissions.unwrap_or(defaults.minimum_permissions),
            threads: self.threads.unwrap_or(defaults.threads),
            architecture: self.architecture.clone().unwrap_or(defaults.architecture),
        }
    }
}

/// The named sources of a manifest, in declaration order.
pub type Sources = Vec<(String, Source)>;

/// A parsed `vendor.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub sources: Sources,
    pub debian: DebianSettings,
}

impl Manifest {
    pub fn source(&self, name: &str) -> Option<&Source> {
        self.sources
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, source)| source)
    }
}

/// Parse a `sources` table into [`Sources`], keeping declaration order.
pub fn try_parse(table: &toml::Table) -> Result<Sources, SourceParseError> {
    table
        .iter()
        .map(|(k, v)| match v.as_table() {
            Some(t) => Source::parse(k, t.to_owned()).map(|s| (k.to_owned(), s)),
            None => Err(SourceParseError::ValueNotTable { name: k.to_owned() }),
        })
        .collect()
}

/// Parse the contents of a manifest file.
pub fn try_parse_toml<S: AsRef<str>>(toml_str: S) -> Result<Manifest, SourceParseError> {
    let table = toml_str.as_ref().parse::<toml::Table>()?;
    let sources_table = table
        .get("sources")
        .and_then(|v| v.as_table())
        .ok_or(SourceParseError::SourceTableNotFound)?;
    let debian = match table.get("debian") {
        Some(value) => value
            .clone()
            .try_into::<DebianSettings>()
            .map_err(SourceParseError::DebianInvalid)?,
        None => DebianSettings::default(),
    };
    Ok(Manifest {
        sources: try_parse(sources_table)?,
        debian,
    })
}

#[cfg(test)]
use SourceParseError::*;
