//! Package name handling.
//!
//! Import paths seen during module resolution name a package plus an
//! optional subpath (`lodash/fp`, `@aws-sdk/client-s3/commands/...`). Only
//! the leading segments identify the installable unit.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The name of an installable package.
///
/// Scoped names (`@scope/name`) keep the scope and the first path segment;
/// bare names keep the first segment only. Two import paths with the same
/// leading segments denote the same package regardless of the subpath.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(pub String);

impl PackageName {
  /// Derive the package name from a raw import path.
  pub fn from_import_path(path: &str) -> Self {
    let mut segments = path.split('/');
    match segments.next() {
      Some(scope) if scope.starts_with('@') => match segments.next() {
        Some(name) => PackageName(format!("{}/{}", scope, name)),
        None => PackageName(scope.to_string()),
      },
      Some(name) => PackageName(name.to_string()),
      None => PackageName(String::new()),
    }
  }

  /// Whether the name falls under the given scope.
  ///
  /// `@aws-sdk` matches `@aws-sdk/client-s3` but not `@aws-sdk-mock/thing`.
  pub fn in_scope(&self, scope: &str) -> bool {
    match self.0.strip_prefix(scope) {
      Some(rest) => rest.is_empty() || rest.starts_with('/'),
      None => false,
    }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for PackageName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bare_name_keeps_first_segment() {
    assert_eq!(PackageName::from_import_path("lodash"), PackageName("lodash".into()));
    assert_eq!(PackageName::from_import_path("lodash/fp"), PackageName("lodash".into()));
    assert_eq!(PackageName::from_import_path("lodash/fp/merge"), PackageName("lodash".into()));
  }

  #[test]
  fn scoped_name_keeps_two_segments() {
    assert_eq!(
      PackageName::from_import_path("@aws-sdk/client-s3"),
      PackageName("@aws-sdk/client-s3".into())
    );
    assert_eq!(
      PackageName::from_import_path("@aws-sdk/client-s3/commands/PutObject"),
      PackageName("@aws-sdk/client-s3".into())
    );
  }

  #[test]
  fn bare_scope_is_kept_as_is() {
    assert_eq!(PackageName::from_import_path("@scope"), PackageName("@scope".into()));
  }

  #[test]
  fn subpaths_denote_the_same_package() {
    let a = PackageName::from_import_path("@scope/pkg/a");
    let b = PackageName::from_import_path("@scope/pkg/deep/b");
    assert_eq!(a, b);
  }

  #[test]
  fn in_scope_requires_a_segment_boundary() {
    let name = PackageName::from_import_path("@aws-sdk/client-s3");
    assert!(name.in_scope("@aws-sdk"));
    assert!(!name.in_scope("@aws"));
    assert!(!PackageName::from_import_path("@aws-sdk-mock/thing").in_scope("@aws-sdk"));
  }

  #[test]
  fn in_scope_accepts_exact_match() {
    assert!(PackageName("@aws-sdk".into()).in_scope("@aws-sdk"));
  }
}
