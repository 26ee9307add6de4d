//! The per-build packaging context and its build-engine hooks.
//!
//! One [`PackContext`] exists per build invocation and owns all mutable
//! packaging state. Repeated or concurrent builds in the same process each
//! get their own context and cannot cross-contaminate.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::classify::{
  AlwaysBundle, BundlePredicate, Classifier, ClassifyError, ClassifyRule, ProvidedNamespace,
  ResolveDecision, ResolveQuery,
};
use crate::consts::PROVIDED_SCOPES;
use crate::exec::CommandRunner;
use crate::graph::{ArtifactDeps, Metafile, correlate};
use crate::install::{InstallError, Packager, default_concurrency, install_artifacts};
use crate::ledger::Ledger;
use crate::manifest::{ArtifactManifest, FinalizeError, ProjectManifest, copy_lockfile};
use crate::package::PackageName;
use crate::resolve::VersionResolver;

/// Force-bundle configuration.
#[derive(Clone, Default)]
pub enum ForceBundle {
  /// Nothing is force-bundled.
  #[default]
  Disabled,
  /// Every package that reaches classification is bundled.
  All,
  /// Bundle packages matching the predicate.
  Predicate(Arc<dyn Fn(&PackageName, &str) -> bool + Send + Sync>),
}

impl fmt::Debug for ForceBundle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ForceBundle::Disabled => f.write_str("Disabled"),
      ForceBundle::All => f.write_str("All"),
      ForceBundle::Predicate(_) => f.write_str("Predicate(..)"),
    }
  }
}

/// Configuration for one packaging run.
#[derive(Debug, Clone)]
pub struct PackOptions {
  /// Project root: where the project manifest and lockfile live.
  pub root: PathBuf,
  /// Where installed packages are resolved from; defaults to `root`.
  pub modules_root: Option<PathBuf>,
  pub force_bundle: ForceBundle,
  /// Scopes the execution platform provides at runtime.
  pub provided_scopes: Vec<String>,
  /// Target runtime identifier; drives ABI-based archive exclusions.
  pub target_runtime: Option<String>,
  pub packager: Packager,
  /// Bound on concurrent installs; defaults to twice the available
  /// parallelism.
  pub install_concurrency: Option<usize>,
}

impl PackOptions {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      modules_root: None,
      force_bundle: ForceBundle::Disabled,
      provided_scopes: PROVIDED_SCOPES.iter().map(|s| s.to_string()).collect(),
      target_runtime: None,
      packager: Packager::default(),
      install_concurrency: None,
    }
  }
}

#[derive(Debug, Error)]
pub enum PackError {
  #[error("classification error: {0}")]
  Classify(#[from] ClassifyError),

  #[error("finalization error: {0}")]
  Finalize(#[from] FinalizeError),

  #[error("install error: {0}")]
  Install(#[from] InstallError),
}

/// Everything produced by one build's packaging pass.
#[derive(Debug)]
pub struct PackReport {
  pub artifacts: Vec<ArtifactDeps>,
  /// Number of artifacts whose dependencies were installed.
  pub installed: usize,
}

/// Build-scoped packaging state, threaded through the engine's hooks.
pub struct PackContext<R: CommandRunner> {
  options: PackOptions,
  project: ProjectManifest,
  classifier: Classifier,
  resolver: VersionResolver,
  ledger: Ledger,
  runner: Arc<R>,
}

impl<R: CommandRunner> std::fmt::Debug for PackContext<R> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PackContext")
      .field("options", &self.options)
      .field("project", &self.project)
      .field("resolver", &self.resolver)
      .field("ledger", &self.ledger)
      .finish_non_exhaustive()
  }
}

impl<R: CommandRunner + 'static> PackContext<R> {
  /// Create the context for one build, loading the project manifest.
  pub async fn new(options: PackOptions, runner: Arc<R>) -> Result<Self, PackError> {
    let project = ProjectManifest::load(&options.root).await?;
    let resolver = VersionResolver::new(search_roots(&options));
    let classifier = Classifier::new(build_rules(&options));

    info!(project = %project.name, root = %options.root.display(), "packaging context ready");

    Ok(Self {
      options,
      project,
      classifier,
      resolver,
      ledger: Ledger::new(),
      runner,
    })
  }

  /// The engine's import-resolution hook.
  ///
  /// Invoked once per import resolution request, in whatever concurrency
  /// the engine imposes. `None` keeps the engine's normal inline
  /// resolution; errors abort the build.
  pub async fn on_resolve(
    &self,
    query: ResolveQuery<'_>,
  ) -> Result<Option<ResolveDecision>, PackError> {
    Ok(
      self
        .classifier
        .resolve(query, &self.resolver, &self.ledger)
        .await?,
    )
  }

  /// The engine's end-of-build hook.
  ///
  /// Correlates the emitted graph with the ledger, writes each artifact's
  /// manifest and lockfile, then installs. Manifest synthesis completes
  /// strictly before the artifact's install launches.
  pub async fn on_end(&self, metafile: &Metafile) -> Result<PackReport, PackError> {
    let artifacts = correlate(metafile, &self.options.root, &self.ledger);
    info!(artifacts = artifacts.len(), "finalizing artifacts");

    for artifact in &artifacts {
      let manifest = ArtifactManifest::synthesize(&self.project, artifact);
      manifest.write(&artifact.dir).await?;
      copy_lockfile(&self.options.root, &artifact.dir, self.options.packager.lockfile()).await?;
    }

    let concurrency = self
      .options
      .install_concurrency
      .unwrap_or_else(default_concurrency);
    let installed =
      install_artifacts(&artifacts, self.options.packager, &self.runner, concurrency).await?;

    Ok(PackReport {
      artifacts,
      installed,
    })
  }

  pub fn options(&self) -> &PackOptions {
    &self.options
  }

  pub fn project(&self) -> &ProjectManifest {
    &self.project
  }

  pub fn ledger(&self) -> &Ledger {
    &self.ledger
  }

  pub fn resolver(&self) -> &VersionResolver {
    &self.resolver
  }
}

/// Search roots in resolution order: the module root, the project root,
/// then the process working directory as a last resort.
fn search_roots(options: &PackOptions) -> Vec<PathBuf> {
  let mut roots = vec![
    options
      .modules_root
      .clone()
      .unwrap_or_else(|| options.root.clone()),
  ];
  if !roots.contains(&options.root) {
    roots.push(options.root.clone());
  }
  if let Ok(cwd) = std::env::current_dir()
    && !roots.contains(&cwd)
  {
    roots.push(cwd);
  }
  roots
}

/// Classification rules in fixed precedence order: force-bundle rules
/// first, then provided namespaces; everything else is an ordinary
/// external.
fn build_rules(options: &PackOptions) -> Vec<Box<dyn ClassifyRule>> {
  let mut rules: Vec<Box<dyn ClassifyRule>> = Vec::new();
  match &options.force_bundle {
    ForceBundle::Disabled => {}
    ForceBundle::All => rules.push(Box::new(AlwaysBundle)),
    ForceBundle::Predicate(predicate) => {
      rules.push(Box::new(BundlePredicate(Arc::clone(predicate))));
    }
  }
  rules.push(Box::new(ProvidedNamespace {
    scopes: options.provided_scopes.clone(),
  }));
  rules
}
