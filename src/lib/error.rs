/// Errors raised while reading `ar` and `tar` archives.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The stream is not an archive of the expected kind.
    #[error("{0}")]
    Format(String),
    /// The archive is structurally invalid: bad checksum, truncated entry, duplicate path.
    #[error("corrupt archive: {0}")]
    Corrupt(String),
    #[error("unsupported entry type '{}' for '{path}'", type_flag(.kind))]
    UnsupportedEntryType { path: String, kind: u8 },
    #[error("soft link '{link}' is broken and points to '{target}'")]
    BrokenSoftlink { link: String, target: String },
    #[error("infinite recursion detected in soft link '{0}'")]
    InfiniteRecursion(String),
    #[error("'{0}' was not found in the archive")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn type_flag(kind: &u8) -> char {
    char::from(*kind)
}

impl ArchiveError {
    pub(crate) fn corrupt<S: Into<String>>(msg: S) -> Self {
        Self::Corrupt(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// The main error enum for this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error("package '{package}', member '{member}': {err}")]
    Package {
        package: String,
        member: String,
        #[source]
        err: ArchiveError,
    },
    #[error("package '{0}' does not exist in the repository")]
    UnresolvedDependency(String),
    #[error("package '{package}' has unsupported format version '{version}'")]
    UnsupportedFormatVersion { package: String, version: String },
    #[error("failed to download '{url}'")]
    Download {
        url: String,
        #[source]
        err: reqwest::Error,
    },
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    SourceParse(#[from] crate::source::SourceParseError),
    #[error("Command '{command}' exited with status {status}\n{stderr}")]
    Subprocess {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("a worker task panicked: {0}")]
    TaskPanicked(String),
    #[error(transparent)]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl Error {
    /// Attach the package and archive member being processed to an archive error.
    pub(crate) fn package<P, M>(package: P, member: M, err: ArchiveError) -> Self
    where
        P: Into<String>,
        M: Into<String>,
    {
        Self::Package {
            package: package.into(),
            member: member.into(),
            err,
        }
    }
}
