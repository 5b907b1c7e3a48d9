use std::path::{Path, PathBuf};
use std::process::ExitCode;

use vendor_fetch::{Copier, Fetcher, Manifest};

mod args;
mod error;
mod fetch;
mod progress;

use args::{OutputFormat, ValidatedCommand};
use error::AppError;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_manifest(manifest_file: &Path) -> Result<Manifest, AppError> {
    let document = std::fs::read_to_string(manifest_file).map_err(|err| {
        AppError::manifest_read(manifest_file.display().to_string(), err)
    })?;
    vendor_fetch::try_parse_toml(&document)
        .map_err(|err| AppError::manifest_parse(manifest_file.display().to_string(), err))
}

fn list_sources(manifest_file: &Path, format: Option<OutputFormat>) -> Result<(), AppError> {
    let manifest = read_manifest(manifest_file)?;
    match format {
        None => {
            for (name, source) in &manifest.sources {
                println!("{name}: {source}");
            }
        }
        Some(OutputFormat::Json) => {
            let mut map = serde_json::Map::new();
            for (name, source) in &manifest.sources {
                let value = serde_json::to_value(source).map_err(|e| AppError::format("json", e))?;
                map.insert(name.clone(), value);
            }
            let json = serde_json::to_string_pretty(&map).map_err(|e| AppError::format("json", e))?;
            println!("{json}");
        }
        Some(OutputFormat::Toml) => {
            let mut table = toml::Table::new();
            for (name, source) in &manifest.sources {
                let value = toml::Value::try_from(source).map_err(|e| AppError::format("toml", e))?;
                table.insert(name.clone(), value);
            }
            let toml = toml::to_string(&table).map_err(|e| AppError::format("toml", e))?;
            print!("{toml}");
        }
    }
    Ok(())
}

fn fetch_sources(
    manifest_file: &Path,
    root: PathBuf,
    cache: vendor_fetch::InstallCache,
) -> Result<(), AppError> {
    let manifest = read_manifest(manifest_file)?;
    let fetcher = Fetcher::new(cache, manifest.debian.clone()).map_err(AppError::fetch_setup)?;
    let results = fetch::parallel_fetch(&manifest.sources, &fetcher);

    let mut copier = Copier::new();
    let mut failed = 0usize;
    for ((name, source), result) in manifest.sources.iter().zip(results) {
        let staged = match result {
            Ok(staged) => staged,
            Err(err) => {
                failed += 1;
                let err = anyhow::Error::new(err).context(format!("failed to fetch '{name}'"));
                eprintln!("❌ {err:?}");
                continue;
            }
        };
        for (subtree, staged) in source.subtrees(name).into_iter().zip(staged) {
            if staged.from.symlink_metadata().is_err() {
                return Err(AppError::missing_artefact(
                    name.clone(),
                    subtree.from,
                    staged.from,
                ));
            }
            let dst = root.join(&staged.to);
            copier
                .copy(name, &staged.from, &dst)
                .map_err(|err| AppError::copy_artefact_failed(staged.from.clone(), dst, err))?;
        }
    }

    fetcher
        .cache()
        .save()
        .map_err(|err| AppError::cache_save_failed(fetcher.cache().cache_file(), err))?;

    let conflicts = copier.conflicts();
    if !conflicts.is_empty() {
        eprintln!("⚠️ {} file(s) provided by more than one source were left as first copied", conflicts.len());
    }
    if failed > 0 {
        return Err(AppError::fetch());
    }
    println!("\n🎉 Successfully vendored {} source(s)!", manifest.sources.len());
    Ok(())
}

fn run() -> Result<(), AppError> {
    match args::parse()? {
        ValidatedCommand::Fetch {
            manifest_file,
            root,
            cache,
        } => fetch_sources(&manifest_file, root, cache),
        ValidatedCommand::List {
            manifest_file,
            format,
        } => list_sources(&manifest_file, format),
    }
}

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err.exit_code();
            eprintln!("Error: {:?}", anyhow::Error::new(err));
            code
        }
    }
}
