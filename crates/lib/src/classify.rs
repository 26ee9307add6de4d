//! Import classification during module resolution.
//!
//! The build engine calls back once per import resolution request. Every
//! import lands in one of four outcomes, in fixed precedence order: ignored
//! (relative paths and runtime built-ins), force-bundled (recorded for
//! provenance, still inlined), runtime-provided (externalized without a
//! pin), or ordinary external (pinned, recorded and externalized).

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::consts::RUNTIME_BUILTINS;
use crate::ledger::Ledger;
use crate::package::PackageName;
use crate::resolve::{VersionError, VersionResolver};

/// How the build engine encountered an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveKind {
  EntryPoint,
  ImportStatement,
  RequireCall,
  DynamicImport,
  RequireResolve,
}

/// One import resolution request from the build engine.
#[derive(Debug, Clone, Copy)]
pub struct ResolveQuery<'a> {
  /// The import path as written in source.
  pub path: &'a str,
  /// Absolute path of the file that issued the import.
  pub importer: &'a Path,
  pub kind: ResolveKind,
}

/// The decision handed back to the build engine. `None` keeps the engine's
/// normal inline resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveDecision {
  /// Exclude the import from the bundle and expect it in the installed
  /// dependency tree at runtime.
  pub external: bool,
}

/// Category assigned to an import by a classification rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
  /// Inline into the bundle, recording provenance.
  Bundle,
  /// Supplied by the execution platform; externalized without a pin.
  Provided,
  /// Externalized and declared as a pinned runtime dependency.
  External,
}

/// A single classification rule.
///
/// Rules are consulted in fixed precedence order; the first rule returning a
/// category wins. Imports no rule claims are ordinary externals.
pub trait ClassifyRule: Send + Sync {
  fn classify(&self, package: &PackageName, import_path: &str) -> Option<Category>;
}

/// Force-bundle every package that reaches the rule chain.
pub struct AlwaysBundle;

impl ClassifyRule for AlwaysBundle {
  fn classify(&self, _package: &PackageName, _import_path: &str) -> Option<Category> {
    Some(Category::Bundle)
  }
}

/// Force-bundle packages matching an injected predicate over the package
/// name and the full import path.
pub struct BundlePredicate(pub Arc<dyn Fn(&PackageName, &str) -> bool + Send + Sync>);

impl ClassifyRule for BundlePredicate {
  fn classify(&self, package: &PackageName, import_path: &str) -> Option<Category> {
    (self.0)(package, import_path).then_some(Category::Bundle)
  }
}

/// Externalize, without pinning, names under scopes the execution platform
/// guarantees to provide.
pub struct ProvidedNamespace {
  pub scopes: Vec<String>,
}

impl ClassifyRule for ProvidedNamespace {
  fn classify(&self, package: &PackageName, _import_path: &str) -> Option<Category> {
    self
      .scopes
      .iter()
      .any(|scope| package.in_scope(scope))
      .then_some(Category::Provided)
  }
}

/// Errors surfaced synchronously to the build engine.
#[derive(Debug, Error)]
pub enum ClassifyError {
  /// A dependency that cannot be pinned must not ship silently.
  #[error("cannot pin '{package}' (imported from {importer}): {source}")]
  Version {
    package: String,
    importer: String,
    #[source]
    source: VersionError,
  },
}

/// The import-resolution hook.
///
/// Ledger mutation is the only side effect; the inline-versus-external
/// decision itself is returned to the build engine.
pub struct Classifier {
  rules: Vec<Box<dyn ClassifyRule>>,
}

impl Classifier {
  pub fn new(rules: Vec<Box<dyn ClassifyRule>>) -> Self {
    Self { rules }
  }

  /// Classify one import, recording pinned dependencies in the ledger.
  pub async fn resolve(
    &self,
    query: ResolveQuery<'_>,
    resolver: &VersionResolver,
    ledger: &Ledger,
  ) -> Result<Option<ResolveDecision>, ClassifyError> {
    // Relative and absolute paths name files, not packages; they are always
    // inlined and never declared.
    if query.path.starts_with('.') || Path::new(query.path).is_absolute() {
      return Ok(None);
    }

    if is_builtin(query.path) {
      trace!(path = query.path, "ignoring runtime built-in");
      return Ok(None);
    }

    let package = PackageName::from_import_path(query.path);

    match self.rules.iter().find_map(|rule| rule.classify(&package, query.path)) {
      Some(Category::Bundle) => {
        let version = self.pin(&package, &query, resolver).await?;
        ledger.record_bundled(query.importer, &package, &version);
        debug!(package = %package, version = %version, importer = %query.importer.display(), "force-bundling import");
        Ok(None)
      }
      Some(Category::Provided) => {
        debug!(package = %package, "externalizing runtime-provided import");
        Ok(Some(ResolveDecision { external: true }))
      }
      Some(Category::External) | None => {
        let version = self.pin(&package, &query, resolver).await?;
        ledger.record_external(query.importer, &package, &version);
        trace!(package = %package, version = %version, importer = %query.importer.display(), "externalizing import");
        Ok(Some(ResolveDecision { external: true }))
      }
    }
  }

  async fn pin(
    &self,
    package: &PackageName,
    query: &ResolveQuery<'_>,
    resolver: &VersionResolver,
  ) -> Result<String, ClassifyError> {
    resolver
      .resolve(package)
      .await
      .map_err(|source| ClassifyError::Version {
        package: package.to_string(),
        importer: query.importer.display().to_string(),
        source,
      })
  }
}

/// Whether an import path names a module the runtime itself provides.
fn is_builtin(import_path: &str) -> bool {
  if import_path.starts_with("node:") {
    return true;
  }
  let package = PackageName::from_import_path(import_path);
  RUNTIME_BUILTINS.contains(&package.as_str())
}
