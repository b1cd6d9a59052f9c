//! Run configuration.
//!
//! A run is described by a [`RunConfig`], normally loaded from a
//! `cppdoc.toml` file. Every field has a default, so an empty file (or no
//! file at all) is a valid configuration. Defaults never depend on the
//! environment; only the toolchain probe looks at `PATH`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cppdoc_core::diagnostics::ClassificationPolicy;
use cppdoc_core::results::duration_serde;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::doctest::compare::OutputComparison;
use crate::doctest::compiler::CompilerTemplate;
use crate::doctest::sandbox::NetworkIsolation;

// ============================================================================
// Errors
// ============================================================================

/// Errors from loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    /// A value is out of range or inconsistent.
    #[error("invalid value for `{field}`: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }
}

// ============================================================================
// Doc-Test Settings
// ============================================================================

/// Doc-test engine settings (`[doctests]` table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocTestConfig {
    /// Run doc-tests at all.
    pub enable: bool,
    /// Execute compiled tests; when false every test stops after compiling.
    pub run: bool,
    /// Compiler executable, looked up on `PATH`.
    pub compiler: String,
    /// Compiler argv template. Supports `{cxx}`, `{source}`, `{output}` and
    /// `{scratch}`.
    pub compiler_template: Vec<String>,
    /// Flags appended after the template.
    pub extra_flags: Vec<String>,
    /// Headers included at the top of every compilation unit.
    pub prelude: Vec<String>,
    /// Include the owner's declaring file.
    pub include_owner_file: bool,
    /// Emit `using namespace <ns>;` for the owner's enclosing namespace.
    pub using_enclosing_namespace: bool,
    /// Wall-clock limit for the compiler.
    #[serde(with = "duration_serde")]
    pub compile_timeout: Duration,
    /// Wall-clock limit for the test program.
    #[serde(with = "duration_serde")]
    pub run_timeout: Duration,
    /// Doc-test worker pool size; 0 means one per CPU.
    pub workers: usize,
    /// How actual stdout is compared with the expected output.
    pub comparison: OutputComparison,
    /// Address-space limit for the test program, in MiB.
    pub memory_limit_mb: Option<u64>,
    /// Largest file the test program may write, in MiB.
    pub file_size_limit_mb: Option<u64>,
    /// Bytes captured per stream; the rest is discarded.
    pub output_cap: usize,
    /// Network namespace isolation for the test program.
    pub network: NetworkIsolation,
    /// Extra environment variables passed to the compiler and test program.
    pub env: BTreeMap<String, String>,
    /// Keep scratch directories of failed tests for inspection.
    pub keep_scratch_on_failure: bool,
}

impl Default for DocTestConfig {
    fn default() -> Self {
        DocTestConfig {
            enable: true,
            run: true,
            compiler: "c++".to_string(),
            compiler_template: CompilerTemplate::default_argv(),
            extra_flags: Vec::new(),
            prelude: Vec::new(),
            include_owner_file: true,
            using_enclosing_namespace: true,
            compile_timeout: Duration::from_secs(60),
            run_timeout: Duration::from_secs(10),
            workers: 0,
            comparison: OutputComparison::default(),
            memory_limit_mb: Some(1024),
            file_size_limit_mb: Some(64),
            output_cap: 1024 * 1024,
            network: NetworkIsolation::default(),
            env: BTreeMap::new(),
            keep_scratch_on_failure: false,
        }
    }
}

impl DocTestConfig {
    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

// ============================================================================
// Run Configuration
// ============================================================================

/// Configuration for one documentation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Project root; input patterns and relative headers resolve against it.
    pub root: PathBuf,
    /// Glob patterns selecting the source files handed to the front end.
    pub inputs: Vec<String>,
    /// Compiler arguments passed to the front end for every file.
    pub compile_args: Vec<String>,
    /// Ingestion pool size; 0 means one per CPU.
    pub ingest_workers: usize,
    /// Comment pipeline and resolver pool size; 0 means one per CPU.
    pub analysis_workers: usize,
    /// A file that failed to parse makes the run fail.
    pub fail_on_parse_errors: bool,
    /// A failed doc-test makes the run fail.
    pub fail_on_doctest_failures: bool,
    /// Only report comments and doc-tests of declarations inside this
    /// namespace. The whole graph is still built and resolved.
    pub root_namespace: Option<String>,
    pub doctests: DocTestConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            root: PathBuf::from("."),
            inputs: vec!["**/*.h".to_string(), "**/*.hpp".to_string()],
            compile_args: Vec::new(),
            ingest_workers: 0,
            analysis_workers: 0,
            fail_on_parse_errors: false,
            fail_on_doctest_failures: true,
            root_namespace: None,
            doctests: DocTestConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let doctests = &self.doctests;
        if doctests.compile_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "doctests.compile_timeout",
                "must be greater than zero",
            ));
        }
        if doctests.run_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "doctests.run_timeout",
                "must be greater than zero",
            ));
        }
        if self
            .root_namespace
            .as_deref()
            .is_some_and(|ns| ns.trim().is_empty())
        {
            return Err(ConfigError::invalid("root_namespace", "must not be empty when set"));
        }
        if doctests.compiler.trim().is_empty() {
            return Err(ConfigError::invalid("doctests.compiler", "must not be empty"));
        }
        if doctests.output_cap == 0 {
            return Err(ConfigError::invalid(
                "doctests.output_cap",
                "must be greater than zero",
            ));
        }
        if doctests.memory_limit_mb == Some(0) {
            return Err(ConfigError::invalid(
                "doctests.memory_limit_mb",
                "must be greater than zero when set",
            ));
        }
        CompilerTemplate::parse(&doctests.compiler_template)
            .map_err(|e| ConfigError::invalid("doctests.compiler_template", e.to_string()))?;
        Ok(())
    }

    /// Set both doc-test timeouts.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.doctests.compile_timeout = timeout;
        self.doctests.run_timeout = timeout;
        self
    }

    /// Turn doc-tests on or off.
    pub fn with_doctests(mut self, enable: bool) -> Self {
        self.doctests.enable = enable;
        self
    }

    /// Set the doc-test worker count.
    pub fn with_doctest_workers(mut self, workers: usize) -> Self {
        self.doctests.workers = workers;
        self
    }

    /// Set the project root.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Scope reported comments and doc-tests to a namespace.
    pub fn with_root_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.root_namespace = Some(namespace.into());
        self
    }

    /// Effective ingestion worker count.
    pub fn ingest_worker_count(&self) -> usize {
        if self.ingest_workers == 0 {
            num_cpus::get()
        } else {
            self.ingest_workers
        }
    }

    /// Effective analysis worker count.
    pub fn analysis_worker_count(&self) -> usize {
        if self.analysis_workers == 0 {
            num_cpus::get()
        } else {
            self.analysis_workers
        }
    }

    /// Classification switches for the final report.
    pub fn classification_policy(&self) -> ClassificationPolicy {
        ClassificationPolicy {
            fail_on_parse_errors: self.fail_on_parse_errors,
            fail_on_doctest_failures: self.fail_on_doctest_failures,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
