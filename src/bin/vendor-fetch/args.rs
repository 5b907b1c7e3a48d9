use std::path::PathBuf;

use clap::Parser;

use crate::error::AppError;

// Shamelessly borrowed from https://github.com/crate-ci/clap-cargo/blob/0378657ffdf2b67bcd6f1ab56e04a1322b92dd0e/src/style.rs
use anstyle::AnsiColor::*;
use anstyle::Effects;
use anstyle::Style;

const HEADER: Style = Green.on_default().effects(Effects::BOLD);
const USAGE: Style = Green.on_default().effects(Effects::BOLD);
const LITERAL: Style = Cyan.on_default().effects(Effects::BOLD);
const PLACEHOLDER: Style = Cyan.on_default();
const ERROR: Style = Red.on_default().effects(Effects::BOLD);
const VALID: Style = Cyan.on_default().effects(Effects::BOLD);
const INVALID: Style = Yellow.on_default().effects(Effects::BOLD);

const APP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(HEADER)
    .usage(USAGE)
    .literal(LITERAL)
    .placeholder(PLACEHOLDER)
    .error(ERROR)
    .valid(VALID)
    .invalid(INVALID);

const MANIFEST_NAME: &str = "vendor.toml";
const CACHE_ENV: &str = "VENDOR_FETCH_CACHE";

#[derive(Debug, Parser)]
#[command(name = "vendor-fetch")]
#[command(version)]
#[command(about = "Vendor subtrees of git repositories, tar archives and Debian packages")]
#[command(long_about = None)]
#[command(styles = APP_STYLING)]
#[command(term_width = 80)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Fetch the sources in the manifest and copy their subtrees into the project
    Fetch {
        /// Path to the vendor.toml file. If not given, search for the file in the current and
        /// parent directories.
        #[arg(long, short = 'm', value_name = "PATH")]
        manifest_file: Option<PathBuf>,

        /// Project root the subtrees are copied into. Defaults to the manifest's directory.
        #[arg(long, short = 'r', value_name = "PATH")]
        root: Option<PathBuf>,

        /// Cache directory to use. If omitted, check the `VENDOR_FETCH_CACHE` environment
        /// variable and then the user cache directory
        #[arg(long = "cache", short = 'c', value_name = "PATH")]
        cache_dir: Option<PathBuf>,

        /// Number of sources fetched at once. Defaults to one per logical CPU.
        #[arg(long, short = 't', value_name = "NUM-THREADS")]
        threads: Option<u32>,
    },
    /// List the sources specified in the manifest without fetching them
    List {
        /// Path to the vendor.toml file. If not given, search for the file in the current and
        /// parent directories.
        #[arg(long, short = 'm', value_name = "PATH")]
        manifest_file: Option<PathBuf>,

        /// Output format
        #[arg(long, short = 'f', value_enum, value_name = "FORMAT")]
        format: Option<OutputFormat>,
    },
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum OutputFormat {
    /// Output in JSON format
    Json,
    /// Output in TOML format
    Toml,
}

#[derive(Debug)]
pub enum ValidatedCommand {
    Fetch {
        manifest_file: PathBuf,
        root: PathBuf,
        cache: vendor_fetch::InstallCache,
    },
    List {
        manifest_file: PathBuf,
        format: Option<OutputFormat>,
    },
}

fn detect_manifest_file(arg: Option<PathBuf>) -> Result<PathBuf, AppError> {
    match arg {
        Some(path) => Ok(path),
        None => {
            let mut current_dir = std::env::current_dir()?;
            loop {
                let manifest = current_dir.join(MANIFEST_NAME);
                if manifest.is_file() {
                    break Ok(manifest);
                }
                if !current_dir.pop() {
                    return Err(AppError::arg_validation(format!(
                        "could not find '{MANIFEST_NAME}' in the current directory or any parent directory"
                    )));
                }
            }
        }
    }
}

/// Detect the cache directory, falling back to `VENDOR_FETCH_CACHE` then the user cache
/// directory.
fn detect_cache_dir(arg: Option<PathBuf>) -> Result<PathBuf, AppError> {
    match arg {
        Some(dir) => Ok(dir),
        None => match std::env::var_os(CACHE_ENV) {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => {
                let project_dirs = directories::ProjectDirs::from("", "", "vendor-fetch").ok_or(
                    AppError::arg_validation("could not determine cache directory".to_string()),
                )?;
                Ok(project_dirs.cache_dir().to_path_buf())
            }
        },
    }
}

fn detect_root(arg: Option<PathBuf>, manifest_file: &std::path::Path) -> Result<PathBuf, AppError> {
    let root = match arg {
        Some(dir) => dir,
        None => match manifest_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir()?,
        },
    };
    if !root.is_dir() {
        return Err(AppError::arg_validation(format!(
            "project root does not exist: {}",
            root.display()
        )));
    }
    Ok(root.canonicalize()?)
}

impl TryFrom<Command> for ValidatedCommand {
    type Error = AppError;

    fn try_from(command: Command) -> Result<Self, Self::Error> {
        match command {
            Command::Fetch {
                manifest_file,
                root,
                cache_dir,
                threads,
            } => {
                let manifest_file = detect_manifest_file(manifest_file)?;
                let root = detect_root(root, &manifest_file)?;

                let cache_dir = detect_cache_dir(cache_dir)?;
                let cache = vendor_fetch::InstallCache::load(&cache_dir).map_err(|e| {
                    AppError::arg_validation(format!(
                        "failed to load cache in {}: {}",
                        cache_dir.display(),
                        e
                    ))
                })?;

                if let Some(threads) = threads {
                    rayon::ThreadPoolBuilder::new()
                        .num_threads(threads as usize)
                        .build_global()
                        .map_err(|e| {
                            AppError::arg_validation(format!("Failed to set thread count: {e}"))
                        })?;
                }

                Ok(ValidatedCommand::Fetch {
                    manifest_file,
                    root,
                    cache,
                })
            }
            Command::List {
                manifest_file,
                format,
            } => Ok(ValidatedCommand::List {
                manifest_file: detect_manifest_file(manifest_file)?,
                format,
            }),
        }
    }
}

pub fn parse() -> Result<ValidatedCommand, AppError> {
    ValidatedCommand::try_from(Args::parse().command)
}
