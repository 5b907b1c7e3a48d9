use std::process::ExitCode;

/// Categories of application errors that can be matched on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppErrorKind {
    /// Argument validation errors
    ArgValidation,
    /// General IO errors
    IO,
    /// Manifest file reading errors
    ManifestRead,
    /// Manifest file parsing errors
    ManifestParse,
    /// Used to indicate that errors occurred during fetching; these errors are reported as they
    /// happen, so this variant only exists to produce the correct `ExitCode`.
    Fetch,
    /// Setting up the fetcher failed before anything was fetched
    FetchSetup,
    /// Copying fetched subtrees into the project failed
    CopyArtefact,
    CacheSave,
    /// A fetched subtree is missing from the cache
    MissingArtefact,
    /// Formatting output failed
    Format,
}

/// Internal error type that contains all application error variants.
#[derive(Debug, thiserror::Error)]
pub enum AppErrorInner {
    #[error("Argument error: {0}")]
    ArgValidation(String),
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error("Failed to read manifest file: {manifest}")]
    ManifestRead {
        manifest: String,
        #[source]
        err: std::io::Error,
    },
    #[error("Failed to parse manifest file: {manifest}")]
    ManifestParse {
        manifest: String,
        #[source]
        err: vendor_fetch::SourceParseError,
    },
    #[error("Failed to fetch one or more source(s)")]
    Fetch,
    #[error("Failed to prepare for fetching")]
    FetchSetup(#[source] vendor_fetch::Error),
    #[error("failed to copy {} to {}", src.display(), dst.display())]
    CopyArtefactFailed {
        src: std::path::PathBuf,
        dst: std::path::PathBuf,
        #[source]
        err: vendor_fetch::Error,
    },
    #[error("failed to save cache to {}", path.display())]
    CacheSaveFailed {
        path: std::path::PathBuf,
        #[source]
        err: vendor_fetch::Error,
    },
    #[error("expected '{}' of source '{}' to exist at {}", from, name, path.display())]
    MissingArtefact {
        name: String,
        from: String,
        path: std::path::PathBuf,
    },
    #[error("failed to format sources as {format}: {message}")]
    Format { format: String, message: String },
}

/// The main application-level error type. This represents all top-level application errors we'd
/// want to report to the user. The concrete kind decides the exit code, while the inner error
/// carries what the application was doing when it failed (e.g. reading the manifest file vs.
/// copying a fetched subtree).
///
/// This type uses the newtype pattern to wrap a boxed inner error, reducing stack size.
#[derive(Debug)]
pub struct AppError(Box<AppErrorInner>, AppErrorKind);

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl AppError {
    pub fn new(inner: AppErrorInner, kind: AppErrorKind) -> Self {
        Self(Box::new(inner), kind)
    }

    /// Get the error kind for pattern matching
    pub fn error_kind(&self) -> &AppErrorKind {
        &self.1
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(match self.error_kind() {
            AppErrorKind::Fetch => 1,
            AppErrorKind::ArgValidation => 2,
            _ => 3,
        })
    }

    pub fn arg_validation(msg: String) -> Self {
        Self::new(AppErrorInner::ArgValidation(msg), AppErrorKind::ArgValidation)
    }

    pub fn manifest_read(manifest: String, err: std::io::Error) -> Self {
        Self::new(AppErrorInner::ManifestRead { manifest, err }, AppErrorKind::ManifestRead)
    }

    pub fn manifest_parse(manifest: String, err: vendor_fetch::SourceParseError) -> Self {
        Self::new(AppErrorInner::ManifestParse { manifest, err }, AppErrorKind::ManifestParse)
    }

    pub fn fetch() -> Self {
        Self::new(AppErrorInner::Fetch, AppErrorKind::Fetch)
    }

    pub fn fetch_setup(err: vendor_fetch::Error) -> Self {
        Self::new(AppErrorInner::FetchSetup(err), AppErrorKind::FetchSetup)
    }

    pub fn copy_artefact_failed(
        src: std::path::PathBuf,
        dst: std::path::PathBuf,
        err: vendor_fetch::Error,
    ) -> Self {
        Self::new(AppErrorInner::CopyArtefactFailed { src, dst, err }, AppErrorKind::CopyArtefact)
    }

    pub fn cache_save_failed(path: std::path::PathBuf, err: vendor_fetch::Error) -> Self {
        Self::new(AppErrorInner::CacheSaveFailed { path, err }, AppErrorKind::CacheSave)
    }

    pub fn missing_artefact(name: String, from: String, path: std::path::PathBuf) -> Self {
        Self::new(
            AppErrorInner::MissingArtefact { name, from, path },
            AppErrorKind::MissingArtefact,
        )
    }

    pub fn format<E: std::fmt::Display>(format: &str, err: E) -> Self {
        Self::new(
            AppErrorInner::Format {
                format: format.to_string(),
                message: err.to_string(),
            },
            AppErrorKind::Format,
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::new(AppErrorInner::IO(err), AppErrorKind::IO)
    }
}

impl From<AppError> for ExitCode {
    fn from(error: AppError) -> Self {
        error.exit_code()
    }
}
