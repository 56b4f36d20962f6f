//! Project configuration for type-check runs.
//!
//! Loaded from `typetest.json` in the project root when present, then overridden by CLI flags.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the optional config file in the project root.
pub const CONFIG_FILE: &str = "typetest.json";

/// Default test-file globs.
pub const DEFAULT_INCLUDE: &str = "**/*.{test,spec}-d.{ts,tsx,mts,cts,js,jsx,mjs,cjs}";
pub const DEFAULT_EXCLUDE: &str = "**/node_modules/**";

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read {}", path.display())]
    #[diagnostic(code(typetest::config::read))]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config in {}: {source}", path.display())]
    #[diagnostic(code(typetest::config::parse), help("see `typetest --help` for the supported keys"))]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid test name pattern `{pattern}`")]
    #[diagnostic(code(typetest::config::name_pattern))]
    NamePattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Type-check run configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct TypecheckConfig {
    /// Checker binary, resolved through `PATH`
    pub checker: String,
    /// Checker config, relative to the root. Searched upward from the root when unset.
    pub tsconfig: Option<PathBuf>,
    /// Check `.js` test files too
    pub allow_js: bool,
    /// Drop diagnostics outside the test files instead of reporting them
    pub ignore_source_errors: bool,
    /// Test-file globs, relative to the root
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Keep the checker running and report every cycle
    pub watch: bool,
    /// Accept `.only` without failing the task
    pub allow_only: bool,
    /// Only run tests whose full name matches this regex
    pub test_name_pattern: Option<String>,
}

impl Default for TypecheckConfig {
    fn default() -> Self {
        Self {
            checker: "tsc".to_string(),
            tsconfig: None,
            allow_js: false,
            ignore_source_errors: false,
            include: vec![DEFAULT_INCLUDE.to_string()],
            exclude: vec![DEFAULT_EXCLUDE.to_string()],
            watch: false,
            allow_only: false,
            test_name_pattern: None,
        }
    }
}

impl TypecheckConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `typetest.json` from `root`, falling back to defaults when it does not exist.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(Self::default());
        }
        Self::from_file(&path)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Compile the test name pattern, if any.
    pub fn name_pattern(&self) -> Result<Option<Regex>, ConfigError> {
        self.test_name_pattern
            .as_deref()
            .map(|pattern| {
                Regex::new(pattern).map_err(|source| ConfigError::NamePattern {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .transpose()
    }

    pub fn with_checker(mut self, checker: impl Into<String>) -> Self {
        self.checker = checker.into();
        self
    }

    pub fn with_tsconfig(mut self, tsconfig: impl Into<PathBuf>) -> Self {
        self.tsconfig = Some(tsconfig.into());
        self
    }

    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_allow_js(mut self, allow_js: bool) -> Self {
        self.allow_js = allow_js;
        self
    }

    pub fn with_include(mut self, include: Vec<String>) -> Self {
        self.include = include;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ========================================
    // Defaults
    // ========================================

    #[test]
    fn test_defaults() {
        let config = TypecheckConfig::default();
        assert_eq!(config.checker, "tsc");
        assert_eq!(config.include, vec![DEFAULT_INCLUDE]);
        assert!(!config.watch);
        assert!(config.name_pattern().unwrap().is_none());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(TypecheckConfig::load(dir.path()).unwrap(), TypecheckConfig::default());
    }

    // ========================================
    // Loading
    // ========================================

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "checker": "vue-tsc", "allowJs": true, "ignoreSourceErrors": true }"#,
        )
        .unwrap();
        let config = TypecheckConfig::load(dir.path()).unwrap();
        assert_eq!(config.checker, "vue-tsc");
        assert!(config.allow_js);
        assert!(config.ignore_source_errors);
        assert_eq!(config.exclude, vec![DEFAULT_EXCLUDE]);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), r#"{ "chekcer": "tsc" }"#).unwrap();
        let err = TypecheckConfig::load(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_invalid_name_pattern() {
        let config = TypecheckConfig {
            test_name_pattern: Some("(".to_string()),
            ..TypecheckConfig::default()
        };
        assert!(matches!(config.name_pattern(), Err(ConfigError::NamePattern { .. })));
    }
}
