//! Per-importer dependency ledgers.
//!
//! During a build, every classified import is recorded against the source
//! file that issued it. Two ledgers exist: externalized imports that must be
//! declared and installed at runtime, and force-bundled packages recorded
//! for provenance only. The correlator later unions entries per artifact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::trace;

use crate::package::PackageName;

/// Which ledger an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerKind {
  /// Externalized imports, declared as runtime dependencies.
  External,
  /// Force-bundled packages, recorded for provenance only.
  Bundled,
}

/// A single recorded dependency of one importer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
  pub package: PackageName,
  pub version: String,
  /// Position in the ledger-wide insertion order; lower was recorded earlier.
  pub seq: u64,
}

#[derive(Debug, Default)]
struct LedgerState {
  next_seq: u64,
  external: HashMap<PathBuf, Vec<LedgerEntry>>,
  bundled: HashMap<PathBuf, Vec<LedgerEntry>>,
}

/// Build-scoped record of which importer required which package at which
/// version.
///
/// Safe to use from concurrent resolution callbacks; the lock is held only
/// across synchronous map mutation. An (importer, package) pair appears in
/// at most one ledger, and its first recorded version wins: later records
/// for the same pair are no-ops.
#[derive(Debug, Default)]
pub struct Ledger {
  state: Mutex<LedgerState>,
}

impl Ledger {
  pub fn new() -> Self {
    Self::default()
  }

  /// Record an externalized dependency. Returns whether the entry was new.
  pub fn record_external(&self, importer: &Path, package: &PackageName, version: &str) -> bool {
    self.record(LedgerKind::External, importer, package, version)
  }

  /// Record a force-bundled package for provenance. Returns whether the
  /// entry was new.
  pub fn record_bundled(&self, importer: &Path, package: &PackageName, version: &str) -> bool {
    self.record(LedgerKind::Bundled, importer, package, version)
  }

  fn record(&self, kind: LedgerKind, importer: &Path, package: &PackageName, version: &str) -> bool {
    let mut state = self.state.lock().expect("ledger lock poisoned");

    if has_entry(&state.external, importer, package) || has_entry(&state.bundled, importer, package) {
      return false;
    }

    let seq = state.next_seq;
    state.next_seq += 1;

    let entry = LedgerEntry {
      package: package.clone(),
      version: version.to_string(),
      seq,
    };

    let map = match kind {
      LedgerKind::External => &mut state.external,
      LedgerKind::Bundled => &mut state.bundled,
    };
    map.entry(importer.to_path_buf()).or_default().push(entry);

    trace!(importer = %importer.display(), package = %package, version, ?kind, seq, "recorded dependency");
    true
  }

  /// Entries of one kind for a set of importers, in insertion order.
  pub fn entries_for<'a>(
    &self,
    kind: LedgerKind,
    importers: impl IntoIterator<Item = &'a Path>,
  ) -> Vec<LedgerEntry> {
    let state = self.state.lock().expect("ledger lock poisoned");
    let map = match kind {
      LedgerKind::External => &state.external,
      LedgerKind::Bundled => &state.bundled,
    };

    let mut entries: Vec<LedgerEntry> = importers
      .into_iter()
      .filter_map(|importer| map.get(importer))
      .flatten()
      .cloned()
      .collect();
    entries.sort_by_key(|entry| entry.seq);
    entries
  }

  pub fn is_empty(&self) -> bool {
    let state = self.state.lock().expect("ledger lock poisoned");
    state.external.is_empty() && state.bundled.is_empty()
  }
}

fn has_entry(map: &HashMap<PathBuf, Vec<LedgerEntry>>, importer: &Path, package: &PackageName) -> bool {
  map
    .get(importer)
    .is_some_and(|entries| entries.iter().any(|entry| &entry.package == package))
}
