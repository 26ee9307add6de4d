//! Output-to-input correlation of the engine's build graph.
//!
//! A single build pass compiles many entry points against one shared module
//! graph. At build end the engine emits which input files were compiled into
//! which output file; this module turns that graph plus the ledger into a
//! per-artifact dependency set.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::ledger::{Ledger, LedgerEntry, LedgerKind};

/// The build engine's end-of-build graph: which input files were compiled
/// into which output file. Paths are relative to the project root.
#[derive(Debug, Default, Deserialize)]
pub struct Metafile {
  #[serde(default)]
  pub outputs: BTreeMap<String, OutputMeta>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OutputMeta {
  #[serde(default)]
  pub inputs: BTreeMap<String, InputMeta>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InputMeta {}

/// Dependencies attributed to one output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDeps {
  /// Absolute path of the artifact directory.
  pub dir: PathBuf,
  /// Pinned runtime dependencies, keyed by package name.
  pub dependencies: BTreeMap<String, String>,
  /// Force-bundled provenance, keyed by package name.
  pub bundled: BTreeMap<String, String>,
}

impl ArtifactDeps {
  /// Artifacts without external dependencies skip installation entirely.
  pub fn has_dependencies(&self) -> bool {
    !self.dependencies.is_empty()
  }
}

/// Attribute ledger entries to the artifacts they belong to.
///
/// Every output file maps to the artifact at its parent directory; an
/// artifact's dependency set is the union of ledger entries over all inputs
/// of all its outputs. When two importers pinned the same package at
/// different versions, the earliest ledger record wins; the installed tree
/// is keyed by name only, so the drift is accepted rather than reconciled.
///
/// Pure function of its inputs: correlating the same ledger and graph twice
/// yields identical results.
pub fn correlate(metafile: &Metafile, root: &Path, ledger: &Ledger) -> Vec<ArtifactDeps> {
  let mut artifacts: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();

  for (output, meta) in &metafile.outputs {
    let output_path = root.join(output);
    let dir = output_path.parent().unwrap_or(root).to_path_buf();
    let inputs = artifacts.entry(dir).or_default();
    for input in meta.inputs.keys() {
      inputs.push(root.join(input));
    }
  }

  artifacts
    .into_iter()
    .map(|(dir, mut inputs)| {
      inputs.sort();
      inputs.dedup();

      let dependencies = first_seen(ledger.entries_for(
        LedgerKind::External,
        inputs.iter().map(PathBuf::as_path),
      ));
      let bundled = first_seen(ledger.entries_for(
        LedgerKind::Bundled,
        inputs.iter().map(PathBuf::as_path),
      ));

      debug!(
        dir = %dir.display(),
        dependencies = dependencies.len(),
        bundled = bundled.len(),
        "correlated artifact"
      );

      ArtifactDeps {
        dir,
        dependencies,
        bundled,
      }
    })
    .collect()
}

/// Collapse entries (already in insertion order) to one version per package.
fn first_seen(entries: Vec<LedgerEntry>) -> BTreeMap<String, String> {
  let mut map = BTreeMap::new();
  for entry in entries {
    match map.entry(entry.package.0.clone()) {
      Entry::Occupied(existing) => {
        if existing.get() != &entry.version {
          debug!(
            package = %existing.key(),
            kept = %existing.get(),
            dropped = %entry.version,
            "version drift across importers, keeping first"
          );
        }
      }
      Entry::Vacant(slot) => {
        slot.insert(entry.version);
      }
    }
  }
  map
}
