//! Per-artifact dependency installation.
//!
//! Every artifact that declares external dependencies gets its own isolated,
//! frozen install, run through the injected command runner under a bounded
//! pool. Manifest and lockfile must already be in place when an install
//! launches.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::exec::{CommandRunner, ExecError};
use crate::graph::ArtifactDeps;

/// The external package manager driving artifact installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Packager {
  #[default]
  Npm,
  Pnpm,
  Bun,
}

impl Packager {
  /// Name of the lockfile this packager maintains.
  pub fn lockfile(&self) -> &'static str {
    match self {
      Packager::Npm => "package-lock.json",
      Packager::Pnpm => "pnpm-lock.yaml",
      Packager::Bun => "bun.lock",
    }
  }

  /// The program to invoke.
  pub fn program(&self) -> &'static str {
    match self {
      Packager::Npm => "npm",
      Packager::Pnpm => "pnpm",
      Packager::Bun => "bun",
    }
  }

  /// Arguments for a frozen, production-only install.
  ///
  /// Production-only matters: the artifact manifest records force-bundled
  /// packages under devDependencies as provenance, and those must never be
  /// installed on top of the bundle.
  pub fn install_args(&self) -> Vec<String> {
    let args: &[&str] = match self {
      Packager::Npm => &["ci", "--omit=dev"],
      Packager::Pnpm => &["install", "--frozen-lockfile", "--prod"],
      Packager::Bun => &["install", "--frozen-lockfile", "--production"],
    };
    args.iter().map(|a| a.to_string()).collect()
  }
}

#[derive(Debug, Error)]
pub enum InstallError {
  #[error("install failed in {dir}: {source}")]
  Install {
    dir: String,
    #[source]
    source: ExecError,
  },

  #[error("install task panicked: {message}")]
  Join { message: String },
}

/// Default install concurrency: twice the available parallelism, at least 4.
pub fn default_concurrency() -> usize {
  let cpus = std::thread::available_parallelism().map(|p| p.get()).unwrap_or(2);
  (cpus * 2).max(4)
}

/// Install external dependencies for every artifact that declares any.
///
/// Installs run concurrently under `concurrency` permits and are
/// independent: a failing install fails the aggregate, but siblings that
/// already started run to completion and are not force-terminated. After
/// all installs settle, the first failure in spawn order is reported with
/// its artifact directory.
///
/// Returns the number of artifacts installed.
pub async fn install_artifacts<R>(
  artifacts: &[ArtifactDeps],
  packager: Packager,
  runner: &Arc<R>,
  concurrency: usize,
) -> Result<usize, InstallError>
where
  R: CommandRunner + 'static,
{
  let pending: Vec<&ArtifactDeps> = artifacts.iter().filter(|a| a.has_dependencies()).collect();
  let skipped = artifacts.len() - pending.len();
  if skipped > 0 {
    debug!(skipped, "artifacts without external dependencies skip install");
  }
  if pending.is_empty() {
    return Ok(0);
  }

  info!(
    artifacts = pending.len(),
    packager = packager.program(),
    concurrency,
    "installing artifact dependencies"
  );

  let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
  let mut join_set: JoinSet<(usize, Result<(), InstallError>)> = JoinSet::new();

  for (index, artifact) in pending.iter().enumerate() {
    let dir: PathBuf = artifact.dir.clone();
    let runner = Arc::clone(runner);
    let semaphore = Arc::clone(&semaphore);
    let program = packager.program();
    let args = packager.install_args();

    join_set.spawn(async move {
      let _permit = semaphore.acquire().await.expect("install semaphore closed");
      debug!(dir = %dir.display(), "running install");
      let result = runner
        .run(program, &args, Some(&dir))
        .await
        .map(drop)
        .map_err(|source| InstallError::Install {
          dir: dir.display().to_string(),
          source,
        });
      (index, result)
    });
  }

  let mut installed = 0usize;
  let mut first_failure: Option<(usize, InstallError)> = None;

  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok((_, Ok(()))) => installed += 1,
      Ok((index, Err(err))) => {
        warn!(error = %err, "artifact install failed");
        if first_failure.as_ref().is_none_or(|(i, _)| index < *i) {
          first_failure = Some((index, err));
        }
      }
      Err(join_err) => {
        warn!(error = %join_err, "install task panicked");
        if first_failure.is_none() {
          first_failure = Some((
            usize::MAX,
            InstallError::Join {
              message: join_err.to_string(),
            },
          ));
        }
      }
    }
  }

  match first_failure {
    Some((_, err)) => Err(err),
    None => {
      info!(installed, "artifact installs complete");
      Ok(installed)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::exec::testing::FakeRunner;
  use std::collections::BTreeMap;
  use std::path::Path;
  use std::time::Duration;

  fn artifact(dir: &Path, deps: &[(&str, &str)]) -> ArtifactDeps {
    ArtifactDeps {
      dir: dir.to_path_buf(),
      dependencies: deps
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
      bundled: BTreeMap::new(),
    }
  }

  #[test]
  fn packager_table() {
    assert_eq!(Packager::Npm.lockfile(), "package-lock.json");
    assert_eq!(Packager::Pnpm.lockfile(), "pnpm-lock.yaml");
    assert_eq!(Packager::Bun.lockfile(), "bun.lock");
    assert_eq!(Packager::Npm.install_args(), vec!["ci", "--omit=dev"]);
    assert_eq!(Packager::default(), Packager::Npm);
  }

  #[tokio::test]
  async fn runs_the_packager_in_each_artifact_directory() {
    let runner = Arc::new(FakeRunner::new());
    let artifacts = vec![
      artifact(Path::new("/build/a"), &[("lodash", "4.17.21")]),
      artifact(Path::new("/build/b"), &[("uuid", "9.0.1")]),
    ];

    let installed = install_artifacts(&artifacts, Packager::Npm, &runner, 4)
      .await
      .unwrap();

    assert_eq!(installed, 2);
    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 2);
    for invocation in &invocations {
      assert_eq!(invocation.program, "npm");
      assert_eq!(invocation.args, vec!["ci", "--omit=dev"]);
    }
    let dirs: Vec<_> = invocations.iter().filter_map(|i| i.cwd.clone()).collect();
    assert!(dirs.contains(&PathBuf::from("/build/a")));
    assert!(dirs.contains(&PathBuf::from("/build/b")));
  }

  #[tokio::test]
  async fn artifacts_without_dependencies_are_skipped() {
    let runner = Arc::new(FakeRunner::new());
    let artifacts = vec![
      artifact(Path::new("/build/a"), &[("lodash", "4.17.21")]),
      artifact(Path::new("/build/empty"), &[]),
    ];

    let installed = install_artifacts(&artifacts, Packager::Npm, &runner, 4)
      .await
      .unwrap();

    assert_eq!(installed, 1);
    assert_eq!(runner.invocations().len(), 1);
  }

  #[tokio::test]
  async fn nothing_to_install_spawns_nothing() {
    let runner = Arc::new(FakeRunner::new());
    let artifacts = vec![artifact(Path::new("/build/empty"), &[])];

    let installed = install_artifacts(&artifacts, Packager::Npm, &runner, 4)
      .await
      .unwrap();

    assert_eq!(installed, 0);
    assert!(runner.invocations().is_empty());
  }

  #[tokio::test]
  async fn concurrency_is_bounded() {
    let runner = Arc::new(FakeRunner::new().with_delay(Duration::from_millis(10)));
    let artifacts: Vec<ArtifactDeps> = (0..8)
      .map(|i| {
        artifact(
          &PathBuf::from(format!("/build/{i}")),
          &[("lodash", "4.17.21")],
        )
      })
      .collect();

    install_artifacts(&artifacts, Packager::Npm, &runner, 2)
      .await
      .unwrap();

    assert_eq!(runner.invocations().len(), 8);
    assert!(runner.max_in_flight() <= 2, "max in flight was {}", runner.max_in_flight());
  }

  #[tokio::test]
  async fn failure_is_reported_after_siblings_finish() {
    let failing = Path::new("/build/b");
    let runner = Arc::new(FakeRunner::new().fail_dir(failing));
    let artifacts = vec![
      artifact(Path::new("/build/a"), &[("lodash", "4.17.21")]),
      artifact(failing, &[("uuid", "9.0.1")]),
      artifact(Path::new("/build/c"), &[("left-pad", "1.3.0")]),
    ];

    let err = install_artifacts(&artifacts, Packager::Npm, &runner, 1)
      .await
      .unwrap_err();

    match err {
      InstallError::Install { dir, .. } => assert_eq!(dir, "/build/b"),
      other => panic!("unexpected error: {other}"),
    }
    // Siblings were not cancelled.
    assert_eq!(runner.invocations().len(), 3);
  }

  #[tokio::test]
  async fn earliest_failure_wins_the_report() {
    let runner = Arc::new(FakeRunner::new().fail_dir(Path::new("/build/a")).fail_dir(Path::new("/build/c")));
    let artifacts = vec![
      artifact(Path::new("/build/a"), &[("lodash", "4.17.21")]),
      artifact(Path::new("/build/b"), &[("uuid", "9.0.1")]),
      artifact(Path::new("/build/c"), &[("left-pad", "1.3.0")]),
    ];

    let err = install_artifacts(&artifacts, Packager::Npm, &runner, 4)
      .await
      .unwrap_err();

    match err {
      InstallError::Install { dir, .. } => assert_eq!(dir, "/build/a"),
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn default_concurrency_has_a_floor() {
    assert!(default_concurrency() >= 4);
  }
}
