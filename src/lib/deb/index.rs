//! Resolving package names to download URLs through repository `Packages` lists.

use std::collections::HashMap;
use std::io::Read;

use rayon::prelude::*;

use super::control::ControlParagraph;
use crate::compression::Compression;
use crate::download::Downloader;
use crate::error::Error;

/// The Debian name of the architecture this program was built for.
pub fn host_architecture() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "x86" => "i386",
        _ => "amd64",
    }
}

/// A `deb <base-url> <distribution> <component>...` line from an APT sources list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub base_url: String,
    pub distribution: String,
    pub components: Vec<String>,
}

impl SourceLine {
    /// Parse one line. Comments and `[key=value]` option blocks are ignored; anything that is not
    /// a binary `deb` line gives `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.split('#').next().unwrap_or_default();
        let line = match (line.find('['), line.find(']')) {
            (Some(open), Some(close)) if open < close => {
                format!("{} {}", &line[..open], &line[close + 1..])
            }
            _ => line.to_string(),
        };
        let mut words = line.split_whitespace();
        if words.next()? != "deb" {
            return None;
        }
        let base_url = words.next()?.trim_end_matches('/').to_string();
        let distribution = words.next()?.to_string();
        Some(Self {
            base_url,
            distribution,
            components: words.map(str::to_string).collect(),
        })
    }

    /// One `Packages.gz` URL per component.
    pub fn list_urls(&self, architecture: &str) -> Vec<String> {
        self.components
            .iter()
            .map(|component| {
                format!(
                    "{}/dists/{}/{component}/binary-{architecture}/Packages.gz",
                    self.base_url, self.distribution
                )
            })
            .collect()
    }
}

/// Split the contents of a sources list file into lines, dropping comments and carriage returns.
pub fn sources_list_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Maps every package name, and every name a package provides, to the URL of its `.deb`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageIndex {
    urls: HashMap<String, String>,
}

impl PackageIndex {
    /// Download and parse the lists named by `sources` in parallel. Where several lists know the
    /// same name, the list declared first wins.
    pub fn build(
        sources: &[String],
        architecture: &str,
        downloader: &dyn Downloader,
    ) -> Result<Self, Error> {
        let lists: Vec<(String, String)> = sources
            .iter()
            .filter_map(|line| SourceLine::parse(line))
            .flat_map(|source| {
                source
                    .list_urls(architecture)
                    .into_iter()
                    .map(move |list_url| (source.base_url.clone(), list_url))
            })
            .collect();
        tracing::info!(lists = lists.len(), "building package index");

        let maps = lists
            .par_iter()
            .map(|(base_url, list_url)| -> Result<_, Error> {
                let compressed = downloader.get(list_url)?;
                let mut text = String::new();
                Compression::from_name(list_url)
                    .decoder(&compressed[..])?
                    .read_to_string(&mut text)?;
                let map = Self::parse_list(&text, base_url);
                tracing::debug!(%list_url, names = map.len(), "parsed package list");
                Ok(map)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut index = Self::default();
        for map in maps {
            index.merge(map);
        }
        Ok(index)
    }

    /// Parse the text of one `Packages` list. Records without `Package` or `Filename` are skipped.
    pub fn parse_list(text: &str, base_url: &str) -> HashMap<String, String> {
        let mut map = HashMap::new();
        for record in ControlParagraph::parse_all(text) {
            let (Some(package), Some(filename)) =
                (record.field_str("Package"), record.field_str("Filename"))
            else {
                tracing::debug!(?record, "skipping package record without Package or Filename");
                continue;
            };
            let url = format!("{}/{}", base_url.trim_end_matches('/'), filename);
            let aliases = record
                .relation_names("Provides")
                .into_iter()
                .chain(record.relation_names("Source"))
                .chain(std::iter::once(package.to_string()));
            for name in aliases {
                map.entry(name).or_insert_with(|| url.clone());
            }
        }
        map
    }

    /// Add names not already known.
    pub fn merge(&mut self, other: HashMap<String, String>) {
        for (name, url) in other {
            self.urls.entry(name).or_insert(url);
        }
    }

    pub fn url(&self, name: &str) -> Option<&str> {
        self.urls.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.urls.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
