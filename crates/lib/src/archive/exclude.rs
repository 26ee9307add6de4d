//! Archive exclusion rules.
//!
//! Artifacts ship without development and metadata files, and without
//! compiled-extension binaries built for a different interpreter version
//! than the one the artifact targets.

use std::path::Path;

use walkdir::WalkDir;

use crate::consts::{
  EXCLUDED_DIRS, EXCLUDED_EXTENSIONS, EXCLUDED_FILES, EXCLUDED_MODULE_FILES, MODULES_DIR,
};

/// A target runtime identifier, parsed from strings like `python3.11`,
/// `nodejs20.x` or `node18`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runtime {
  Python { major: u32, minor: u32 },
  Node { major: u32 },
}

impl Runtime {
  /// Parse a runtime identifier. Unknown identifiers yield `None`.
  pub fn parse(id: &str) -> Option<Self> {
    if let Some(rest) = id.strip_prefix("python") {
      let (major, minor) = rest.split_once('.')?;
      return Some(Runtime::Python {
        major: major.parse().ok()?,
        minor: minor.parse().ok()?,
      });
    }

    let rest = id.strip_prefix("nodejs").or_else(|| id.strip_prefix("node"))?;
    let major = rest.split('.').next()?;
    Some(Runtime::Node {
      major: major.parse().ok()?,
    })
  }

  /// The shared-object ABI tag this runtime loads, when it has one.
  ///
  /// Only CPython embeds an interpreter tag in extension file names; Node
  /// addons carry no comparable marker, so no ABI rule applies to them.
  pub fn abi_tag(&self) -> Option<String> {
    match self {
      Runtime::Python { major, minor } => Some(format!("cpython-{}{}", major, minor)),
      Runtime::Node { .. } => None,
    }
  }
}

/// Deny list applied while assembling an artifact archive.
///
/// Static configuration: exact file names, directory names (pruned wherever
/// they appear), file suffixes, names excluded only inside the installed
/// module tree, and a conditional ABI rule derived from the target runtime.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRuleset {
  files: Vec<String>,
  dirs: Vec<String>,
  extensions: Vec<String>,
  module_files: Vec<String>,
  abi_tag: Option<String>,
}

impl ExclusionRuleset {
  /// The default ruleset for a target runtime. `None` disables ABI
  /// stripping; so does a runtime without extension tags.
  pub fn for_runtime(target: Option<&str>) -> Self {
    Self {
      files: EXCLUDED_FILES.iter().map(|s| s.to_string()).collect(),
      dirs: EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
      extensions: EXCLUDED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
      module_files: EXCLUDED_MODULE_FILES.iter().map(|s| s.to_string()).collect(),
      abi_tag: target.and_then(Runtime::parse).and_then(|r| r.abi_tag()),
    }
  }

  /// Whether a directory with this name is pruned entirely.
  pub fn excludes_dir(&self, name: &str) -> bool {
    self.dirs.iter().any(|dir| dir == name)
  }

  /// Whether a file is excluded, given its path relative to the artifact
  /// root.
  pub fn excludes_file(&self, relative: &Path) -> bool {
    let Some(name) = relative.file_name().and_then(|n| n.to_str()) else {
      // A name the archive cannot address portably is never shipped.
      return true;
    };

    if self.files.iter().any(|file| file == name) {
      return true;
    }
    if self.extensions.iter().any(|ext| name.ends_with(ext.as_str())) {
      return true;
    }
    if self.module_files.iter().any(|file| file == name)
      && relative.components().any(|c| c.as_os_str() == MODULES_DIR)
    {
      return true;
    }
    self.abi_mismatch(name)
  }

  /// Whether the ABI rule strips this file name.
  fn abi_mismatch(&self, name: &str) -> bool {
    match (&self.abi_tag, extension_abi_tag(name)) {
      (Some(expected), Some(found)) => found != expected,
      _ => false,
    }
  }

  /// Exact relative paths the ABI rule strips under a directory, for
  /// rendering patterns to the external archiving tool.
  pub fn abi_mismatches(&self, dir: &Path) -> Vec<String> {
    if self.abi_tag.is_none() {
      return Vec::new();
    }

    WalkDir::new(dir)
      .sort_by_file_name()
      .into_iter()
      .filter_map(Result::ok)
      .filter(|entry| entry.file_type().is_file())
      .filter_map(|entry| {
        let relative = entry.path().strip_prefix(dir).ok()?;
        let name = relative.file_name()?.to_str()?;
        if self.abi_mismatch(name) {
          Some(relative.to_string_lossy().replace('\\', "/"))
        } else {
          None
        }
      })
      .collect()
  }

  /// Render the static rules as glob patterns for the external archiving
  /// tool. The ABI rule cannot be expressed as a glob; callers append
  /// [`Self::abi_mismatches`] for it.
  pub fn tool_patterns(&self) -> Vec<String> {
    let mut patterns = Vec::new();
    for file in &self.files {
      patterns.push(format!("**/{}", file));
    }
    for dir in &self.dirs {
      patterns.push(format!("**/{}/**", dir));
    }
    for ext in &self.extensions {
      patterns.push(format!("**/*{}", ext));
    }
    for file in &self.module_files {
      patterns.push(format!("{}/**/{}", MODULES_DIR, file));
    }
    patterns
  }
}

/// Extract the interpreter ABI tag embedded in a compiled-extension file
/// name (`speedup.cpython-311-x86_64-linux-gnu.so` yields `cpython-311`).
/// Untagged files carry no tag and are never stripped.
fn extension_abi_tag(name: &str) -> Option<&str> {
  if !name.ends_with(".so") && !name.ends_with(".pyd") {
    return None;
  }
  let segment = name.split('.').find(|s| s.starts_with("cpython-"))?;
  let mut dashes = segment.splitn(3, '-');
  let prefix = dashes.next()?;
  let version = dashes.next()?;
  Some(&segment[..prefix.len() + 1 + version.len()])
}
