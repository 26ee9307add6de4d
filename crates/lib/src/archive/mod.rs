//! Artifact archive assembly.
//!
//! Each built artifact directory is compressed into a single minimal zip.
//! An external deterministic archiver is preferred (identical input always
//! produces byte-identical archives); when it is unavailable an in-process
//! writer takes over, honoring the same exclusion rules, and the downgrade
//! is surfaced as a warning.

pub mod exclude;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::consts::{ZIP_TOOL, ZIP_TOOL_PACKAGE};
use crate::exec::{CommandRunner, ExecError};

pub use exclude::{ExclusionRuleset, Runtime};

#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("archiving tool failed for {dir}: {source}")]
  Tool {
    dir: String,
    #[source]
    source: ExecError,
  },

  #[error("failed to walk {dir}: {message}")]
  Walk { dir: String, message: String },

  #[error("failed to write archive {path}: {message}")]
  Write { path: String, message: String },

  #[error("failed to read {path}: {message}")]
  Read { path: String, message: String },

  #[error("archive task panicked: {message}")]
  Join { message: String },
}

/// Progress of one archive job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchivePhase {
  Pending,
  Excluding,
  Compressing,
  Done,
  Failed,
}

/// One archive to produce: a fully built artifact directory compressed to
/// `archive_path`.
#[derive(Debug, Clone)]
pub struct ArchiveJob {
  pub archive_path: PathBuf,
  pub build_dir: PathBuf,
}

/// Result of one completed job.
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
  pub archive_path: PathBuf,
  /// Whether the byte-reproducible external tool produced the archive.
  pub deterministic: bool,
}

/// Map handler directories to archive jobs.
///
/// Each handler's path relative to `outbase` is mirrored under the archive
/// directory (`<archive_dir>/<handler>.zip`) and the build directory.
pub fn layout_jobs(
  handlers: &[PathBuf],
  outbase: &Path,
  archive_dir: &Path,
  build_dir: &Path,
) -> Vec<ArchiveJob> {
  handlers
    .iter()
    .map(|handler| {
      let relative = handler.strip_prefix(outbase).unwrap_or(handler);
      let mut archive_path = archive_dir.join(relative).into_os_string();
      archive_path.push(".zip");
      ArchiveJob {
        archive_path: PathBuf::from(archive_path),
        build_dir: build_dir.join(relative),
      }
    })
    .collect()
}

/// Probe for the external archiver, attempting an on-demand install once.
///
/// Unavailability is a degraded mode: archiving still works through the
/// in-process fallback, but byte reproducibility is no longer guaranteed,
/// so the downgrade is surfaced as a warning rather than an error.
pub async fn detect_zip_tool<R: CommandRunner>(runner: &R) -> bool {
  let probe = vec!["--version".to_string()];
  if runner.run(ZIP_TOOL, &probe, None).await.is_ok() {
    return true;
  }

  debug!(tool = ZIP_TOOL, "archiver not found, attempting install");
  let install = vec![
    "install".to_string(),
    ZIP_TOOL_PACKAGE.to_string(),
    "--quiet".to_string(),
  ];
  if runner.run("pipx", &install, None).await.is_ok() {
    return true;
  }

  warn!(
    tool = ZIP_TOOL,
    "deterministic archiver unavailable, falling back to in-process archiving; archives may not be byte-reproducible"
  );
  false
}

/// Compress one artifact directory into a single archive.
pub async fn zip_artifact<R: CommandRunner>(
  job: &ArchiveJob,
  rules: &ExclusionRuleset,
  runner: &R,
  use_tool: bool,
) -> Result<ArchiveOutcome, ArchiveError> {
  let mut phase = ArchivePhase::Pending;
  let result = run_job(job, rules, runner, use_tool, &mut phase).await;

  match &result {
    Ok(outcome) => {
      debug!(
        archive = %outcome.archive_path.display(),
        deterministic = outcome.deterministic,
        "archive complete"
      );
    }
    Err(err) => {
      phase = ArchivePhase::Failed;
      warn!(archive = %job.archive_path.display(), phase = ?phase, error = %err, "archive failed");
    }
  }

  result
}

async fn run_job<R: CommandRunner>(
  job: &ArchiveJob,
  rules: &ExclusionRuleset,
  runner: &R,
  use_tool: bool,
  phase: &mut ArchivePhase,
) -> Result<ArchiveOutcome, ArchiveError> {
  if let Some(parent) = job.archive_path.parent() {
    std::fs::create_dir_all(parent).map_err(|e| ArchiveError::Write {
      path: job.archive_path.display().to_string(),
      message: e.to_string(),
    })?;
  }

  if use_tool {
    advance(phase, ArchivePhase::Excluding, job);
    let mut patterns = rules.tool_patterns();
    patterns.extend(rules.abi_mismatches(&job.build_dir));

    advance(phase, ArchivePhase::Compressing, job);
    let mut args = vec![
      job.archive_path.display().to_string(),
      ".".to_string(),
      "--recurse-paths".to_string(),
    ];
    for pattern in patterns {
      args.push("-x".to_string());
      args.push(pattern);
    }

    runner
      .run(ZIP_TOOL, &args, Some(&job.build_dir))
      .await
      .map_err(|source| ArchiveError::Tool {
        dir: job.build_dir.display().to_string(),
        source,
      })?;

    advance(phase, ArchivePhase::Done, job);
    return Ok(ArchiveOutcome {
      archive_path: job.archive_path.clone(),
      deterministic: true,
    });
  }

  advance(phase, ArchivePhase::Excluding, job);
  let files = collect_files(&job.build_dir, rules)?;

  advance(phase, ArchivePhase::Compressing, job);
  write_zip(&job.archive_path, &files)?;

  advance(phase, ArchivePhase::Done, job);
  Ok(ArchiveOutcome {
    archive_path: job.archive_path.clone(),
    deterministic: false,
  })
}

fn advance(phase: &mut ArchivePhase, next: ArchivePhase, job: &ArchiveJob) {
  *phase = next;
  trace!(archive = %job.archive_path.display(), phase = ?next, "archive phase");
}

/// Files surviving exclusion under a build directory, as (absolute path,
/// archive entry name) pairs in sorted walk order.
fn collect_files(dir: &Path, rules: &ExclusionRuleset) -> Result<Vec<(PathBuf, String)>, ArchiveError> {
  let mut files = Vec::new();

  let walker = WalkDir::new(dir)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|entry| {
      if entry.depth() == 0 || !entry.file_type().is_dir() {
        return true;
      }
      entry
        .file_name()
        .to_str()
        .map(|name| !rules.excludes_dir(name))
        .unwrap_or(true)
    });

  for entry in walker {
    let entry = entry.map_err(|e| ArchiveError::Walk {
      dir: dir.display().to_string(),
      message: e.to_string(),
    })?;
    if !entry.file_type().is_file() {
      continue;
    }

    let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
    if rules.excludes_file(relative) {
      continue;
    }
    let Some(name) = relative.to_str() else {
      continue;
    };
    files.push((entry.path().to_path_buf(), name.replace('\\', "/")));
  }

  Ok(files)
}

/// Write the collected files into a zip archive.
///
/// Entry timestamps are pinned to the zip epoch and entries follow the
/// sorted walk order, so rebuilt archives differ only when content does.
fn write_zip(path: &Path, files: &[(PathBuf, String)]) -> Result<(), ArchiveError> {
  let file = File::create(path).map_err(|e| ArchiveError::Write {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;
  let mut writer = ZipWriter::new(file);
  let options = SimpleFileOptions::default()
    .compression_method(zip::CompressionMethod::Deflated)
    .last_modified_time(zip::DateTime::default())
    .unix_permissions(0o644);

  for (source, name) in files {
    writer
      .start_file(name.as_str(), options)
      .map_err(|e| ArchiveError::Write {
        path: path.display().to_string(),
        message: e.to_string(),
      })?;
    let mut reader = File::open(source).map_err(|e| ArchiveError::Read {
      path: source.display().to_string(),
      message: e.to_string(),
    })?;
    std::io::copy(&mut reader, &mut writer).map_err(|e| ArchiveError::Write {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
  }

  writer.finish().map_err(|e| ArchiveError::Write {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;
  Ok(())
}

/// Assemble archives for a set of jobs under a bounded pool.
///
/// The external tool is probed once per set. Jobs are independent: a
/// failing job fails the aggregate after all jobs settle, in the same
/// let-all-finish discipline the installer uses.
pub async fn assemble_all<R>(
  jobs: Vec<ArchiveJob>,
  rules: &ExclusionRuleset,
  runner: &Arc<R>,
  concurrency: usize,
) -> Result<Vec<ArchiveOutcome>, ArchiveError>
where
  R: CommandRunner + 'static,
{
  if jobs.is_empty() {
    return Ok(Vec::new());
  }

  let use_tool = detect_zip_tool(runner.as_ref()).await;
  info!(
    jobs = jobs.len(),
    deterministic = use_tool,
    concurrency,
    "assembling artifact archives"
  );

  let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
  let mut join_set: JoinSet<Result<ArchiveOutcome, ArchiveError>> = JoinSet::new();

  for job in jobs {
    let rules = rules.clone();
    let runner = Arc::clone(runner);
    let semaphore = Arc::clone(&semaphore);

    join_set.spawn(async move {
      let _permit = semaphore.acquire().await.expect("archive semaphore closed");
      info!(archive = %job.archive_path.display(), "zipping artifact");
      zip_artifact(&job, &rules, runner.as_ref(), use_tool).await
    });
  }

  let mut outcomes = Vec::new();
  let mut first_failure: Option<ArchiveError> = None;

  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok(Ok(outcome)) => outcomes.push(outcome),
      Ok(Err(err)) => {
        if first_failure.is_none() {
          first_failure = Some(err);
        }
      }
      Err(join_err) => {
        if first_failure.is_none() {
          first_failure = Some(ArchiveError::Join {
            message: join_err.to_string(),
          });
        }
      }
    }
  }

  match first_failure {
    Some(err) => Err(err),
    None => Ok(outcomes),
  }
}
