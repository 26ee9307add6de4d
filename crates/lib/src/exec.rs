//! Command execution through an injected runner.
//!
//! The pipeline's process-spawning stages (package-manager installs, the
//! archiving tool) go through this seam so they can be exercised with a
//! recording runner instead of real child processes.

use std::future::Future;
use std::path::Path;

use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum ExecError {
  #[error("failed to spawn {program}: {message}")]
  Spawn { program: String, message: String },

  #[error("{program} exited with status {code:?}: {stderr}")]
  Failed {
    program: String,
    code: Option<i32>,
    stderr: String,
  },
}

/// Captured output of a completed command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
  pub stdout: String,
  pub stderr: String,
}

/// Capability for running external commands.
pub trait CommandRunner: Send + Sync {
  /// Run a command to completion, capturing output. A non-zero exit status
  /// is an error.
  fn run(
    &self,
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
  ) -> impl Future<Output = Result<CommandOutput, ExecError>> + Send;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
  async fn run(
    &self,
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
  ) -> Result<CommandOutput, ExecError> {
    trace!(program, ?args, cwd = ?cwd, "spawning command");

    let mut command = tokio::process::Command::new(program);
    command.args(args);
    if let Some(dir) = cwd {
      command.current_dir(dir);
    }

    let output = command.output().await.map_err(|e| ExecError::Spawn {
      program: program.to_string(),
      message: e.to_string(),
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
      return Err(ExecError::Failed {
        program: program.to_string(),
        code: output.status.code(),
        stderr: stderr.trim().to_string(),
      });
    }

    Ok(CommandOutput { stdout, stderr })
  }
}
