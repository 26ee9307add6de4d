//! Project and artifact manifests.
//!
//! The project manifest supplies the identity fields every artifact
//! inherits. Each artifact gets a minimal manifest of its own: inherited
//! name, module type and side-effect metadata, the pinned runtime
//! dependencies computed for it, and the force-bundled provenance record.
//! Development-only fields (scripts, build and test configuration) are never
//! carried over.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::consts::PACKAGE_MANIFEST;
use crate::graph::ArtifactDeps;

#[derive(Debug, Error)]
pub enum FinalizeError {
  #[error("failed to read project manifest {path}: {message}")]
  ReadProject { path: String, message: String },

  #[error("failed to parse project manifest {path}: {message}")]
  ParseProject { path: String, message: String },

  #[error("project manifest {path} has no name")]
  UnnamedProject { path: String },

  #[error("failed to write artifact manifest {path}: {message}")]
  WriteManifest { path: String, message: String },

  #[error("failed to copy lockfile {from} to {to}: {message}")]
  CopyLockfile {
    from: String,
    to: String,
    message: String,
  },
}

#[derive(Debug, Deserialize)]
struct RawProject {
  name: Option<String>,
  #[serde(rename = "type")]
  module_type: Option<String>,
  #[serde(rename = "sideEffects")]
  side_effects: Option<Value>,
  #[serde(default)]
  dependencies: BTreeMap<String, String>,
  #[serde(default, rename = "devDependencies")]
  dev_dependencies: BTreeMap<String, String>,
}

/// The top-level project manifest, as read from the project root.
///
/// Only the fields the packaging pipeline consumes are modeled; everything
/// else stays behind on purpose.
#[derive(Debug, Clone)]
pub struct ProjectManifest {
  pub name: String,
  pub module_type: Option<String>,
  pub side_effects: Option<Value>,
  pub dependencies: BTreeMap<String, String>,
  pub dev_dependencies: BTreeMap<String, String>,
}

impl ProjectManifest {
  /// Load the project manifest from the project root.
  pub async fn load(root: &Path) -> Result<Self, FinalizeError> {
    let path = root.join(PACKAGE_MANIFEST);

    let raw = tokio::fs::read_to_string(&path)
      .await
      .map_err(|e| FinalizeError::ReadProject {
        path: path.display().to_string(),
        message: e.to_string(),
      })?;

    let raw: RawProject = serde_json::from_str(&raw).map_err(|e| FinalizeError::ParseProject {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;

    let name = raw.name.ok_or_else(|| FinalizeError::UnnamedProject {
      path: path.display().to_string(),
    })?;

    Ok(Self {
      name,
      module_type: raw.module_type,
      side_effects: raw.side_effects,
      dependencies: raw.dependencies,
      dev_dependencies: raw.dev_dependencies,
    })
  }
}

/// The minimal manifest written into each artifact directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
  pub name: String,
  #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
  pub module_type: Option<String>,
  #[serde(rename = "sideEffects", skip_serializing_if = "Option::is_none")]
  pub side_effects: Option<Value>,
  pub dependencies: BTreeMap<String, String>,
  #[serde(
    default,
    rename = "devDependencies",
    skip_serializing_if = "BTreeMap::is_empty"
  )]
  pub dev_dependencies: BTreeMap<String, String>,
}

impl ArtifactManifest {
  /// Build the manifest for one artifact from the project manifest and its
  /// correlated dependency set.
  pub fn synthesize(project: &ProjectManifest, artifact: &ArtifactDeps) -> Self {
    Self {
      name: project.name.clone(),
      module_type: project.module_type.clone(),
      side_effects: project.side_effects.clone(),
      dependencies: artifact.dependencies.clone(),
      dev_dependencies: artifact.bundled.clone(),
    }
  }

  /// Write the manifest into the artifact directory.
  pub async fn write(&self, dir: &Path) -> Result<PathBuf, FinalizeError> {
    let path = dir.join(PACKAGE_MANIFEST);
    let mut body = serde_json::to_string_pretty(self).map_err(|e| FinalizeError::WriteManifest {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    body.push('\n');

    tokio::fs::write(&path, body)
      .await
      .map_err(|e| FinalizeError::WriteManifest {
        path: path.display().to_string(),
        message: e.to_string(),
      })?;

    debug!(path = %path.display(), dependencies = self.dependencies.len(), "wrote artifact manifest");
    Ok(path)
  }
}

/// Copy the project lockfile into the artifact directory unchanged.
///
/// The lockfile is deliberately permissive: it covers the whole project, and
/// the package manager only installs the narrowed dependency set on top of
/// it.
pub async fn copy_lockfile(root: &Path, dir: &Path, lockfile: &str) -> Result<(), FinalizeError> {
  let from = root.join(lockfile);
  let to = dir.join(lockfile);

  tokio::fs::copy(&from, &to)
    .await
    .map_err(|e| FinalizeError::CopyLockfile {
      from: from.display().to_string(),
      to: to.display().to_string(),
      message: e.to_string(),
    })?;

  debug!(to = %to.display(), "copied lockfile");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  fn artifact(dir: &Path, deps: &[(&str, &str)], bundled: &[(&str, &str)]) -> ArtifactDeps {
    ArtifactDeps {
      dir: dir.to_path_buf(),
      dependencies: deps
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
      bundled: bundled
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
    }
  }

  #[tokio::test]
  async fn loads_project_manifest() {
    let temp = TempDir::new().unwrap();
    fs::write(
      temp.path().join(PACKAGE_MANIFEST),
      r#"{
        "name": "service",
        "type": "module",
        "sideEffects": false,
        "scripts": { "build": "tsc" },
        "dependencies": { "lodash": "^4.0.0" }
      }"#,
    )
    .unwrap();

    let project = ProjectManifest::load(temp.path()).await.unwrap();
    assert_eq!(project.name, "service");
    assert_eq!(project.module_type.as_deref(), Some("module"));
    assert_eq!(project.side_effects, Some(Value::Bool(false)));
    assert_eq!(project.dependencies.get("lodash").unwrap(), "^4.0.0");
  }

  #[tokio::test]
  async fn missing_project_manifest_is_fatal() {
    let temp = TempDir::new().unwrap();
    let err = ProjectManifest::load(temp.path()).await.unwrap_err();
    assert!(matches!(err, FinalizeError::ReadProject { .. }));
  }

  #[tokio::test]
  async fn unnamed_project_is_rejected() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(PACKAGE_MANIFEST), r#"{ "type": "module" }"#).unwrap();

    let err = ProjectManifest::load(temp.path()).await.unwrap_err();
    assert!(matches!(err, FinalizeError::UnnamedProject { .. }));
  }

  #[tokio::test]
  async fn synthesized_manifest_inherits_identity_only() {
    let temp = TempDir::new().unwrap();
    fs::write(
      temp.path().join(PACKAGE_MANIFEST),
      r#"{
        "name": "service",
        "type": "module",
        "sideEffects": false,
        "scripts": { "test": "vitest" },
        "files": ["dist"],
        "devDependencies": { "typescript": "^5.0.0" }
      }"#,
    )
    .unwrap();

    let project = ProjectManifest::load(temp.path()).await.unwrap();
    let deps = artifact(temp.path(), &[("lodash", "4.17.21")], &[("uuid", "9.0.1")]);
    let manifest = ArtifactManifest::synthesize(&project, &deps);

    let json = serde_json::to_value(&manifest).unwrap();
    assert_eq!(json["name"], "service");
    assert_eq!(json["type"], "module");
    assert_eq!(json["sideEffects"], Value::Bool(false));
    assert_eq!(json["dependencies"]["lodash"], "4.17.21");
    // Bundled packages are provenance, not the project's dev tooling.
    assert_eq!(json["devDependencies"]["uuid"], "9.0.1");
    assert!(json.get("scripts").is_none());
    assert!(json.get("files").is_none());
  }

  #[tokio::test]
  async fn written_manifest_is_sorted_and_terminated() {
    let temp = TempDir::new().unwrap();
    let manifest = ArtifactManifest {
      name: "service".into(),
      module_type: None,
      side_effects: None,
      dependencies: [
        ("zebra".to_string(), "1.0.0".to_string()),
        ("alpha".to_string(), "2.0.0".to_string()),
      ]
      .into_iter()
      .collect(),
      dev_dependencies: BTreeMap::new(),
    };

    let path = manifest.write(temp.path()).await.unwrap();
    let body = fs::read_to_string(path).unwrap();

    assert!(body.ends_with('\n'));
    let alpha = body.find("alpha").unwrap();
    let zebra = body.find("zebra").unwrap();
    assert!(alpha < zebra);
    // Module type and side effects were absent, so the keys are too.
    assert!(!body.contains("\"type\""));
    assert!(!body.contains("sideEffects"));
  }

  #[tokio::test]
  async fn lockfile_is_copied_verbatim() {
    let root = TempDir::new().unwrap();
    let artifact_dir = TempDir::new().unwrap();
    fs::write(root.path().join("package-lock.json"), "{ \"lockfileVersion\": 3 }").unwrap();

    copy_lockfile(root.path(), artifact_dir.path(), "package-lock.json")
      .await
      .unwrap();

    let copied = fs::read_to_string(artifact_dir.path().join("package-lock.json")).unwrap();
    assert_eq!(copied, "{ \"lockfileVersion\": 3 }");
  }

  #[tokio::test]
  async fn missing_lockfile_is_fatal() {
    let root = TempDir::new().unwrap();
    let artifact_dir = TempDir::new().unwrap();

    let err = copy_lockfile(root.path(), artifact_dir.path(), "package-lock.json")
      .await
      .unwrap_err();
    assert!(matches!(err, FinalizeError::CopyLockfile { .. }));
  }
}
