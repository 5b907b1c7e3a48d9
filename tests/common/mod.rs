//! Fixture builders shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

use vendor_fetch::Error;
use vendor_fetch::download::Downloader;

pub const MIRROR: &str = "http://mirror.test/debian";
pub const SOURCE_LINE: &str = "deb http://mirror.test/debian stable main";
pub const LIST_URL: &str = "http://mirror.test/debian/dists/stable/main/binary-amd64/Packages.gz";

pub fn tar_bytes(build: impl FnOnce(&mut tar::Builder<Vec<u8>>)) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    build(&mut builder);
    builder.into_inner().unwrap()
}

pub fn add_file(builder: &mut tar::Builder<Vec<u8>>, path: &str, data: &[u8], mode: u32) {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    builder.append_data(&mut header, path, data).unwrap();
}

pub fn add_dir(builder: &mut tar::Builder<Vec<u8>>, path: &str, mode: u32) {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_mode(mode);
    builder.append_data(&mut header, path, std::io::empty()).unwrap();
}

pub fn add_symlink(builder: &mut tar::Builder<Vec<u8>>, path: &str, target: &str) {
    add_link(builder, tar::EntryType::Symlink, path, target);
}

pub fn add_hardlink(builder: &mut tar::Builder<Vec<u8>>, path: &str, target: &str) {
    add_link(builder, tar::EntryType::Link, path, target);
}

fn add_link(builder: &mut tar::Builder<Vec<u8>>, kind: tar::EntryType, path: &str, target: &str) {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(kind);
    header.set_size(0);
    header.set_mode(0o777);
    builder.append_link(&mut header, path, target).unwrap();
}

/// An `ar` archive with short member names.
pub fn ar_bytes(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = b"!<arch>\n".to_vec();
    for (name, data) in members {
        write!(
            out,
            "{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n",
            format!("{name}/"),
            0,
            0,
            0,
            "100644",
            data.len()
        )
        .unwrap();
        out.extend_from_slice(data);
        if data.len() % 2 == 1 {
            out.push(b'\n');
        }
    }
    out
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn xz(data: &[u8]) -> Vec<u8> {
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// A package in the test repository.
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub name: &'static str,
    pub depends: &'static str,
    pub provides: &'static str,
    pub format_version: Option<&'static str>,
}

impl Package {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn depends(mut self, depends: &'static str) -> Self {
        self.depends = depends;
        self
    }

    pub fn provides(mut self, provides: &'static str) -> Self {
        self.provides = provides;
        self
    }

    pub fn filename(&self) -> String {
        format!("pool/main/{}_1.0_amd64.deb", self.name)
    }

    pub fn url(&self) -> String {
        format!("{MIRROR}/{}", self.filename())
    }

    fn control(&self) -> String {
        let mut control = format!("Package: {}\nVersion: 1.0\nArchitecture: amd64\n", self.name);
        if !self.depends.is_empty() {
            control.push_str(&format!("Depends: {}\n", self.depends));
        }
        control
    }

    fn list_record(&self) -> String {
        let mut record = self.control();
        if !self.provides.is_empty() {
            record.push_str(&format!("Provides: {}\n", self.provides));
        }
        record.push_str(&format!("Filename: {}\n", self.filename()));
        record
    }

    /// The `.deb`: a marker file under `usr/share/<name>/` and a library under `usr/lib/`.
    pub fn deb(&self) -> Vec<u8> {
        let control = tar_bytes(|b| add_file(b, "./control", self.control().as_bytes(), 0o644));
        let data = tar_bytes(|b| {
            add_dir(b, "./usr/", 0o755);
            add_dir(b, "./usr/lib/", 0o755);
            add_file(b, &format!("./usr/lib/lib{}.so.1", self.name), self.name.as_bytes(), 0o644);
            add_file(b, &format!("./usr/share/{}/marker", self.name), b"installed", 0o644);
        });
        let version = format!("{}\n", self.format_version.unwrap_or("2.0"));
        ar_bytes(&[
            ("debian-binary", version.as_bytes()),
            ("control.tar.gz", &gzip(&control)),
            ("data.tar.xz", &xz(&data)),
        ])
    }
}

/// Serves fixed bodies by URL and counts the requests for each.
#[derive(Debug, Default)]
pub struct MapDownloader {
    files: HashMap<String, Vec<u8>>,
    hits: Mutex<HashMap<String, usize>>,
}

impl MapDownloader {
    pub fn insert<S: Into<String>>(&mut self, url: S, body: Vec<u8>) {
        self.files.insert(url.into(), body);
    }

    /// A repository with one `Packages.gz` list holding `packages`.
    pub fn repository(packages: &[Package]) -> Self {
        let mut downloader = Self::default();
        let list = packages
            .iter()
            .map(Package::list_record)
            .collect::<Vec<_>>()
            .join("\n");
        downloader.insert(LIST_URL, gzip(list.as_bytes()));
        for package in packages {
            downloader.insert(package.url(), package.deb());
        }
        downloader
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

impl Downloader for MapDownloader {
    fn get(&self, url: &str) -> Result<Vec<u8>, Error> {
        *self.hits.lock().unwrap().entry(url.to_string()).or_default() += 1;
        self.files.get(url).cloned().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no such url: {url}"),
            ))
        })
    }
}
