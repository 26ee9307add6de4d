//! Installed-version resolution with a shared in-flight cache.
//!
//! Every externalized import must be pinned to the version actually present
//! in the installed module tree. Resolution tries each search root in order
//! and reads the package's own manifest; results (including failures) are
//! memoized per manifest path, and concurrent requests for the same path
//! share a single in-flight read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{trace, warn};

use crate::consts::{MODULES_DIR, PACKAGE_MANIFEST};
use crate::package::PackageName;

/// Errors from version resolution.
///
/// Cloneable so settled failures can be served from the cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersionError {
  /// No search root holds a usable manifest for the package.
  #[error("package '{package}' not found under any search root")]
  NotFound { package: String },

  /// The manifest file could not be read.
  #[error("failed to read {path}: {message}")]
  Read { path: String, message: String },

  /// The manifest file is not valid JSON.
  #[error("failed to parse {path}: {message}")]
  Parse { path: String, message: String },

  /// The manifest has no version field to pin.
  #[error("manifest {path} has no version field")]
  MissingVersion { path: String },

  /// The manifest's version field is not a semantic version.
  #[error("manifest {path} has invalid version '{version}': {message}")]
  InvalidVersion {
    path: String,
    version: String,
    message: String,
  },
}

#[derive(Debug, Deserialize)]
struct PackageManifest {
  version: Option<String>,
}

type CachedVersion = Arc<OnceCell<Result<String, VersionError>>>;

/// Resolves installed package versions from an ordered list of search roots.
///
/// The cache is keyed by resolved manifest path and memoizes the in-flight
/// read, not just the settled result, so concurrent resolution callbacks for
/// the same package collapse into one filesystem read and always observe the
/// same version.
#[derive(Debug)]
pub struct VersionResolver {
  roots: Vec<PathBuf>,
  cache: Mutex<HashMap<PathBuf, CachedVersion>>,
  reads: AtomicU64,
}

impl VersionResolver {
  pub fn new(roots: Vec<PathBuf>) -> Self {
    Self {
      roots,
      cache: Mutex::new(HashMap::new()),
      reads: AtomicU64::new(0),
    }
  }

  pub fn search_roots(&self) -> &[PathBuf] {
    &self.roots
  }

  /// Number of manifest files actually read so far. Cache hits do not count.
  pub fn manifest_reads(&self) -> u64 {
    self.reads.load(Ordering::Relaxed)
  }

  /// Resolve the installed version of a package.
  ///
  /// Search roots are tried in order; the first root whose manifest exists
  /// and parses wins. A root whose manifest is present but unusable cannot
  /// win and resolution moves on to the next root.
  pub async fn resolve(&self, package: &PackageName) -> Result<String, VersionError> {
    for root in &self.roots {
      let manifest = root
        .join(MODULES_DIR)
        .join(package.as_str())
        .join(PACKAGE_MANIFEST);

      match self.resolve_manifest(&manifest).await {
        Ok(version) => {
          trace!(package = %package, version = %version, root = %root.display(), "resolved version");
          return Ok(version);
        }
        Err(VersionError::Read { .. }) => continue,
        Err(err) => {
          warn!(package = %package, root = %root.display(), error = %err, "unusable manifest, trying next root");
          continue;
        }
      }
    }

    Err(VersionError::NotFound {
      package: package.to_string(),
    })
  }

  async fn resolve_manifest(&self, path: &Path) -> Result<String, VersionError> {
    let cell = {
      let mut cache = self.cache.lock().expect("version cache lock poisoned");
      Arc::clone(
        cache
          .entry(path.to_path_buf())
          .or_insert_with(|| Arc::new(OnceCell::new())),
      )
    };

    cell
      .get_or_init(|| async { self.read_version(path).await })
      .await
      .clone()
  }

  async fn read_version(&self, path: &Path) -> Result<String, VersionError> {
    self.reads.fetch_add(1, Ordering::Relaxed);

    let raw = tokio::fs::read_to_string(path)
      .await
      .map_err(|e| VersionError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
      })?;

    let manifest: PackageManifest = serde_json::from_str(&raw).map_err(|e| VersionError::Parse {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;

    let version = manifest.version.ok_or_else(|| VersionError::MissingVersion {
      path: path.display().to_string(),
    })?;

    semver::Version::parse(&version).map_err(|e| VersionError::InvalidVersion {
      path: path.display().to_string(),
      version: version.clone(),
      message: e.to_string(),
    })?;

    Ok(version)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  fn install_package(root: &Path, name: &str, version: &str) {
    let dir = root.join(MODULES_DIR).join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
      dir.join(PACKAGE_MANIFEST),
      format!(r#"{{ "name": "{}", "version": "{}" }}"#, name, version),
    )
    .unwrap();
  }

  #[tokio::test]
  async fn resolves_from_first_root() {
    let temp = TempDir::new().unwrap();
    install_package(temp.path(), "lodash", "4.17.21");

    let resolver = VersionResolver::new(vec![temp.path().to_path_buf()]);
    let version = resolver
      .resolve(&PackageName("lodash".into()))
      .await
      .unwrap();

    assert_eq!(version, "4.17.21");
  }

  #[tokio::test]
  async fn falls_back_to_later_roots() {
    let empty = TempDir::new().unwrap();
    let stocked = TempDir::new().unwrap();
    install_package(stocked.path(), "left-pad", "1.3.0");

    let resolver = VersionResolver::new(vec![
      empty.path().to_path_buf(),
      stocked.path().to_path_buf(),
    ]);
    let version = resolver
      .resolve(&PackageName("left-pad".into()))
      .await
      .unwrap();

    assert_eq!(version, "1.3.0");
  }

  #[tokio::test]
  async fn first_root_wins_over_later_roots() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    install_package(first.path(), "lodash", "4.17.21");
    install_package(second.path(), "lodash", "3.0.0");

    let resolver = VersionResolver::new(vec![
      first.path().to_path_buf(),
      second.path().to_path_buf(),
    ]);
    let version = resolver
      .resolve(&PackageName("lodash".into()))
      .await
      .unwrap();

    assert_eq!(version, "4.17.21");
  }

  #[tokio::test]
  async fn missing_package_is_not_found() {
    let temp = TempDir::new().unwrap();
    let resolver = VersionResolver::new(vec![temp.path().to_path_buf()]);

    let err = resolver
      .resolve(&PackageName("ghost".into()))
      .await
      .unwrap_err();

    assert!(matches!(err, VersionError::NotFound { .. }));
  }

  #[tokio::test]
  async fn scoped_packages_resolve() {
    let temp = TempDir::new().unwrap();
    install_package(temp.path(), "@scope/pkg", "2.1.0");

    let resolver = VersionResolver::new(vec![temp.path().to_path_buf()]);
    let version = resolver
      .resolve(&PackageName("@scope/pkg".into()))
      .await
      .unwrap();

    assert_eq!(version, "2.1.0");
  }

  #[tokio::test]
  async fn repeated_resolution_reads_once() {
    let temp = TempDir::new().unwrap();
    install_package(temp.path(), "lodash", "4.17.21");

    let resolver = VersionResolver::new(vec![temp.path().to_path_buf()]);
    resolver.resolve(&PackageName("lodash".into())).await.unwrap();
    resolver.resolve(&PackageName("lodash".into())).await.unwrap();
    resolver.resolve(&PackageName("lodash".into())).await.unwrap();

    assert_eq!(resolver.manifest_reads(), 1);
  }

  #[tokio::test]
  async fn concurrent_resolution_shares_one_read() {
    let temp = TempDir::new().unwrap();
    install_package(temp.path(), "lodash", "4.17.21");

    let resolver = Arc::new(VersionResolver::new(vec![temp.path().to_path_buf()]));

    let mut handles = Vec::new();
    for _ in 0..8 {
      let resolver = Arc::clone(&resolver);
      handles.push(tokio::spawn(async move {
        resolver.resolve(&PackageName("lodash".into())).await
      }));
    }

    for handle in handles {
      assert_eq!(handle.await.unwrap().unwrap(), "4.17.21");
    }

    assert_eq!(resolver.manifest_reads(), 1);
  }

  #[tokio::test]
  async fn settled_failures_are_cached() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join(MODULES_DIR).join("broken");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(PACKAGE_MANIFEST), "not json").unwrap();

    let resolver = VersionResolver::new(vec![temp.path().to_path_buf()]);
    let first = resolver.resolve(&PackageName("broken".into())).await;
    let second = resolver.resolve(&PackageName("broken".into())).await;

    assert!(matches!(first, Err(VersionError::NotFound { .. })));
    assert_eq!(first, second);
    assert_eq!(resolver.manifest_reads(), 1);
  }

  #[tokio::test]
  async fn version_must_be_semantic() {
    let temp = TempDir::new().unwrap();
    install_package(temp.path(), "odd", "not-a-version");

    let resolver = VersionResolver::new(vec![temp.path().to_path_buf()]);
    let err = resolver
      .resolve(&PackageName("odd".into()))
      .await
      .unwrap_err();

    // A single unusable root means nothing was found.
    assert!(matches!(err, VersionError::NotFound { .. }));
  }

  #[tokio::test]
  async fn manifest_without_version_cannot_pin() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join(MODULES_DIR).join("unversioned");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(PACKAGE_MANIFEST), r#"{ "name": "unversioned" }"#).unwrap();

    let resolver = VersionResolver::new(vec![temp.path().to_path_buf()]);
    let err = resolver
      .resolve(&PackageName("unversioned".into()))
      .await
      .unwrap_err();

    assert!(matches!(err, VersionError::NotFound { .. }));
  }
}
