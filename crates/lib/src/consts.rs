//! Shared constants: runtime-provided modules, manifest names and the
//! default archive exclusion lists.

/// File name of a package manifest.
pub const PACKAGE_MANIFEST: &str = "package.json";

/// Directory that holds installed packages under a search root.
pub const MODULES_DIR: &str = "node_modules";

/// Scopes supplied by the execution platform at runtime. Imports under these
/// are externalized without a version pin and never installed.
pub const PROVIDED_SCOPES: &[&str] = &["@aws-sdk"];

/// External archiving tool producing byte-reproducible zips.
pub const ZIP_TOOL: &str = "deterministic-zip";

/// Distribution package for the on-demand install of [`ZIP_TOOL`].
pub const ZIP_TOOL_PACKAGE: &str = "deterministic-zip-go";

/// Modules provided by the runtime itself. Imports of these (with or without
/// the `node:` prefix) never become dependencies.
pub const RUNTIME_BUILTINS: &[&str] = &[
  "assert",
  "async_hooks",
  "buffer",
  "child_process",
  "cluster",
  "console",
  "constants",
  "crypto",
  "dgram",
  "diagnostics_channel",
  "dns",
  "domain",
  "events",
  "fs",
  "http",
  "http2",
  "https",
  "inspector",
  "module",
  "net",
  "os",
  "path",
  "perf_hooks",
  "process",
  "punycode",
  "querystring",
  "readline",
  "repl",
  "stream",
  "string_decoder",
  "sys",
  "timers",
  "tls",
  "trace_events",
  "tty",
  "url",
  "util",
  "v8",
  "vm",
  "wasi",
  "worker_threads",
  "zlib",
];

/// File names stripped from artifact archives wherever they appear.
pub const EXCLUDED_FILES: &[&str] = &[
  "Jenkinsfile",
  "Makefile",
  "Gulpfile.js",
  "Gruntfile.js",
  "gulpfile.js",
  ".DS_Store",
  ".tern-project",
  ".gitattributes",
  ".editorconfig",
  ".eslintrc",
  "eslint",
  ".eslintrc.js",
  ".eslintrc.json",
  ".eslintrc.yml",
  ".eslintignore",
  ".stylelintrc",
  "stylelint.config.js",
  ".stylelintrc.json",
  ".stylelintrc.yaml",
  ".stylelintrc.yml",
  ".stylelintrc.js",
  ".htmllintrc",
  "htmllint.js",
  ".lint",
  ".npmrc",
  ".npmignore",
  ".jshintrc",
  ".flowconfig",
  ".documentup.json",
  ".yarn-metadata.json",
  ".travis.yml",
  "appveyor.yml",
  ".gitlab-ci.yml",
  "circle.yml",
  ".coveralls.yml",
  "CHANGES",
  "changelog",
  "LICENSE.txt",
  "LICENSE",
  "LICENSE-MIT",
  "LICENSE.BSD",
  "license",
  "LICENCE.txt",
  "LICENCE",
  "LICENCE-MIT",
  "LICENCE.BSD",
  "licence",
  "AUTHORS",
  "CONTRIBUTORS",
  ".yarn-integrity",
  ".yarnclean",
  "_config.yml",
  ".babelrc",
  ".yo-rc.json",
  "jest.config.js",
  "karma.conf.js",
  "wallaby.js",
  "wallaby.conf.js",
  ".prettierrc",
  ".prettierrc.yml",
  ".prettierrc.toml",
  ".prettierrc.js",
  ".prettierrc.json",
  "prettier.config.js",
  ".appveyor.yml",
  "tsconfig.json",
  "tslint.json",
];

/// Directory names pruned from artifact archives wherever they appear.
pub const EXCLUDED_DIRS: &[&str] = &[
  "__tests__",
  "test",
  "tests",
  "powered-test",
  "docs",
  "doc",
  ".idea",
  ".vscode",
  "website",
  "images",
  "assets",
  "example",
  "examples",
  "coverage",
  ".nyc_output",
  ".circleci",
  ".github",
];

/// File suffixes stripped from artifact archives.
pub const EXCLUDED_EXTENSIONS: &[&str] = &[
  ".markdown",
  ".md",
  ".mkd",
  ".ts",
  ".jst",
  ".coffee",
  ".tgz",
  ".swp",
  ".d.ts.map",
  ".html",
  ".txt",
  ".lock",
];

/// File names stripped only inside the installed module tree.
pub const EXCLUDED_MODULE_FILES: &[&str] = &["package-lock.json"];
