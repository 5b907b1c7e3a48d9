mod common;

use std::path::Path;
use std::sync::Arc;

use common::{LIST_URL, MapDownloader, Package, SOURCE_LINE};
use vendor_fetch::Error;
use vendor_fetch::deb::{Installer, InstallerOptions, Mapping};
use vendor_fetch::download::Downloader;

fn installer(downloader: &Arc<MapDownloader>, options: InstallerOptions) -> Installer {
    let downloader: Arc<dyn Downloader> = Arc::clone(downloader) as _;
    let mut installer = Installer::with_downloader(options, downloader).unwrap();
    installer.add_sources([SOURCE_LINE]);
    installer
}

fn options() -> InstallerOptions {
    InstallerOptions {
        architecture: "amd64".to_string(),
        threads: 4,
        ..InstallerOptions::default()
    }
}

fn installed(root: &Path, name: &str) -> bool {
    root.join("usr/share").join(name).join("marker").is_file()
}

fn chain() -> Arc<MapDownloader> {
    Arc::new(MapDownloader::repository(&[
        Package::new("a").depends("b (>= 1.0)"),
        Package::new("b").depends("c"),
        Package::new("c"),
    ]))
}

#[test]
fn shared_dependencies_are_installed_once() {
    let repo = Arc::new(MapDownloader::repository(&[
        Package::new("app").depends("left, right"),
        Package::new("left").depends("base"),
        Package::new("right").depends("base (>= 1.0)"),
        Package::new("base"),
    ]));
    let dest = tempfile::tempdir().unwrap();
    let mut installer = installer(&repo, options());
    installer.install_to(&["app"], dest.path()).unwrap();

    for name in ["app", "left", "right", "base"] {
        assert!(installed(dest.path(), name), "{name} missing");
    }
    assert_eq!(repo.hits(&Package::new("base").url()), 1);
    assert_eq!(repo.hits(LIST_URL), 1);
}

#[test]
fn recursion_limit_bounds_the_depth() {
    let repo = chain();
    let dest = tempfile::tempdir().unwrap();
    let only_requested = InstallerOptions {
        recursion_limit: 1,
        ..options()
    };
    installer(&repo, only_requested)
        .install_to(&["a"], dest.path())
        .unwrap();
    assert!(installed(dest.path(), "a"));
    assert!(!installed(dest.path(), "b"));

    let dest = tempfile::tempdir().unwrap();
    let mut two_levels = installer(&repo, options());
    two_levels
        .install_with_limit(&["a"], &[Mapping::new("./", dest.path())], 2)
        .unwrap();
    assert!(installed(dest.path(), "b"));
    assert!(!installed(dest.path(), "c"));
}

#[test]
fn unknown_dependencies_fail_unless_relaxed() {
    let repo = Arc::new(MapDownloader::repository(&[Package::new("tool").depends("ghost")]));
    let dest = tempfile::tempdir().unwrap();
    let result = installer(&repo, options()).install_to(&["tool"], dest.path());
    assert!(matches!(result, Err(Error::UnresolvedDependency(name)) if name == "ghost"));
    assert!(installed(dest.path(), "tool"));

    let relaxed = InstallerOptions {
        throw_on_failed_dependency: false,
        ..options()
    };
    let dest = tempfile::tempdir().unwrap();
    installer(&repo, relaxed)
        .install_to(&["tool"], dest.path())
        .unwrap();
    assert!(installed(dest.path(), "tool"));
}

#[test]
fn virtual_packages_resolve_to_their_provider() {
    let repo = Arc::new(MapDownloader::repository(&[
        Package::new("client").depends("mail-transport-agent"),
        Package::new("postfix").provides("mail-transport-agent"),
    ]));
    let dest = tempfile::tempdir().unwrap();
    installer(&repo, options())
        .install_to(&["client"], dest.path())
        .unwrap();
    assert!(installed(dest.path(), "postfix"));
}

#[test]
fn pre_installed_packages_are_not_fetched() {
    let repo = chain();
    let dest = tempfile::tempdir().unwrap();
    let mut installer = installer(&repo, options());
    installer.mark_pre_installed(["b"]);
    installer.install_to(&["a"], dest.path()).unwrap();

    assert!(installed(dest.path(), "a"));
    assert!(!installed(dest.path(), "b"));
    assert!(!installed(dest.path(), "c"));
    assert_eq!(repo.hits(&Package::new("b").url()), 0);
}

#[test]
fn installed_packages_persist_until_cleared() {
    let repo = chain();
    let mut installer = installer(&repo, options());
    let first = tempfile::tempdir().unwrap();
    installer.install_to(&["c"], first.path()).unwrap();

    let second = tempfile::tempdir().unwrap();
    installer.install_to(&["c"], second.path()).unwrap();
    assert!(!installed(second.path(), "c"));

    installer.clear_installed();
    installer.install_to(&["c"], second.path()).unwrap();
    assert!(installed(second.path(), "c"));
    assert_eq!(repo.hits(&Package::new("c").url()), 2);

    installer.clear_installed();
    installer.mark_installed(["c", "not-in-any-list"]).unwrap();
    let third = tempfile::tempdir().unwrap();
    installer.install_to(&["c"], third.path()).unwrap();
    assert!(!installed(third.path(), "c"));
}

#[test]
fn several_names_in_one_request() {
    let repo = chain();
    let dest = tempfile::tempdir().unwrap();
    let only_requested = InstallerOptions {
        recursion_limit: 1,
        ..options()
    };
    installer(&repo, only_requested)
        .install_to(&["a c"], dest.path())
        .unwrap();
    assert!(installed(dest.path(), "a"));
    assert!(!installed(dest.path(), "b"));
    assert!(installed(dest.path(), "c"));
}

#[test]
fn mappings_select_subtrees() {
    let repo = chain();
    let dest = tempfile::tempdir().unwrap();
    let lib = dest.path().join("lib");
    installer(&repo, options())
        .install(&["a"], &[Mapping::new("usr/lib/", &lib)])
        .unwrap();

    for name in ["a", "b", "c"] {
        let library = lib.join(format!("lib{name}.so.1"));
        assert_eq!(std::fs::read(library).unwrap(), name.as_bytes());
    }
    assert!(!dest.path().join("usr").exists());
    assert!(!lib.join("share").exists());
}

#[test]
fn newer_package_formats_are_refused() {
    let future = Package {
        format_version: Some("3.0"),
        ..Package::new("future")
    };
    let repo = Arc::new(MapDownloader::repository(&[future]));
    let dest = tempfile::tempdir().unwrap();
    let result = installer(&repo, options()).install_to(&["future"], dest.path());
    assert!(matches!(
        result,
        Err(Error::UnsupportedFormatVersion { package, version })
            if package == "future" && version == "3.0"
    ));
    assert!(!installed(dest.path(), "future"));
}

#[test]
fn corrupt_package_files_are_reported() {
    let mut repo = MapDownloader::repository(&[Package::new("a")]);
    repo.insert(Package::new("a").url(), b"not an ar archive".to_vec());
    let repo = Arc::new(repo);
    let dest = tempfile::tempdir().unwrap();
    let result = installer(&repo, options()).install_to(&["a"], dest.path());
    assert!(matches!(result, Err(Error::Package { package, .. }) if package == "a"));
}
