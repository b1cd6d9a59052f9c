//! Doc-test execution engine.
//!
//! Each queued [`DocTestJob`] is turned into a compilation unit, compiled
//! and (unless it is compile-only) executed inside its own [`Sandbox`]. Jobs
//! run on a dedicated rayon pool and write their outcome to the shared
//! [`TestResultTable`].
//!
//! A job walks the status machine
//! `Pending -> Compiling -> {CompileError | Compiled} -> Running ->
//! {Timeout | RuntimeError | Completed}`, or `Pending -> Skipped` for
//! `ignore` blocks. Every step goes through [`TestStatus::transition`].
//!
//! Test failures are results, not errors, and so is a test program that
//! cannot be started. Only cancellation, a compiler that cannot be started
//! mid-run, and internal problems abort [`DocTestEngine::run_all`];
//! in those cases every result already written is discarded.

pub mod compare;
pub mod compiler;
pub mod sandbox;
pub mod unit;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use cppdoc_core::diagnostics::{Diagnostic, DocTestFailureKind};
use cppdoc_core::model::BlockMode;
use cppdoc_core::results::{
    DuplicateResult, InvalidTransition, TestResult, TestResultTable, TestStatus, Verdict,
};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use crate::comment::DocTestJob;
use crate::config::DocTestConfig;

use self::compare::compare_output;
use self::compiler::{
    check_isolation, probe_toolchain, CompilerTemplate, CompilerTemplateError, TemplateVars, Toolchain,
};
use self::sandbox::{ExitState, ProcessOutcome, ProcessSpec, ResourceLimits, Sandbox, SandboxConfig};
use self::unit::{build_unit, UnitOptions};

/// File name of the generated compilation unit.
const SOURCE_NAME: &str = "doctest.cpp";
/// File name of the compiled test program.
const BINARY_NAME: &str = "doctest";

const MIB: u64 = 1024 * 1024;

// ============================================================================
// Cancellation
// ============================================================================

/// Shared cancellation flag for a run.
///
/// Clones observe the same flag. A token may also be linked to a static
/// flag, such as one set from a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    external: Option<&'static AtomicBool>,
}

impl CancellationToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also reports cancellation when `external` is set.
    pub fn linked(external: &'static AtomicBool) -> Self {
        CancellationToken {
            flag: Arc::new(AtomicBool::new(false)),
            external: Some(external),
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .external
                .is_some_and(|external| external.load(Ordering::SeqCst))
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors that abort doc-test execution.
#[derive(Debug, Error)]
pub enum DocTestError {
    /// The compiler is missing or unusable.
    #[error("toolchain configuration error: {message}")]
    Toolchain { message: String },

    /// The compiler template is invalid.
    #[error(transparent)]
    Template(#[from] CompilerTemplateError),

    /// The run was cancelled; no results are kept.
    #[error("doc-test run cancelled")]
    Cancelled,

    /// Scratch directory or process plumbing failed.
    #[error("sandbox error: {0}")]
    Sandbox(#[from] io::Error),

    /// Internal error (bug or unexpected state).
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl From<InvalidTransition> for DocTestError {
    fn from(err: InvalidTransition) -> Self {
        DocTestError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<DuplicateResult> for DocTestError {
    fn from(err: DuplicateResult) -> Self {
        DocTestError::Internal {
            message: err.to_string(),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// What a single job produced.
struct JobOutcome {
    result: TestResult,
    diagnostic: Option<Diagnostic>,
}

impl JobOutcome {
    fn pass(result: TestResult) -> Self {
        JobOutcome {
            result,
            diagnostic: None,
        }
    }

    fn fail(result: TestResult, failure: DocTestFailureKind, message: String) -> Self {
        let diagnostic = Diagnostic::doctest_failure(result.block, failure, message);
        JobOutcome {
            result,
            diagnostic: Some(diagnostic),
        }
    }
}

/// Compiles and runs doc-tests against a probed toolchain.
#[derive(Debug)]
pub struct DocTestEngine {
    config: DocTestConfig,
    template: CompilerTemplate,
    toolchain: Toolchain,
    root: PathBuf,
    token: CancellationToken,
}

impl DocTestEngine {
    /// Validate the compiler template and probe the toolchain.
    ///
    /// Relative owner paths in generated units are resolved against `root`.
    pub fn new(
        config: &DocTestConfig,
        root: &Path,
        token: CancellationToken,
    ) -> Result<Self, DocTestError> {
        let template = CompilerTemplate::parse(&config.compiler_template)?;
        let toolchain = probe_toolchain(&config.compiler)?;
        if config.run {
            check_isolation(&toolchain, config.network)?;
        }
        Ok(DocTestEngine {
            config: config.clone(),
            template,
            toolchain,
            root: root.to_path_buf(),
            token,
        })
    }

    /// The toolchain found by the probe.
    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// Run every job, writing results to `table`.
    ///
    /// Returns one diagnostic per failed test, in job order. On error the
    /// table is cleared.
    pub fn run_all(
        &self,
        jobs: &[DocTestJob],
        table: &TestResultTable,
    ) -> Result<Vec<Diagnostic>, DocTestError> {
        let _span = info_span!("doctests", jobs = jobs.len()).entered();
        let workers = self.config.worker_count();
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("cppdoc-doctest-{}", i))
            .build()
            .map_err(|e| DocTestError::Internal {
                message: format!("failed to build doc-test pool: {}", e),
            })?;
        info!(workers, "running {} doc-tests", jobs.len());

        let lost_compiler = OnceLock::new();
        let outcome = pool.install(|| {
            jobs.par_iter()
                .map(|job| self.run_job(job, table, &lost_compiler))
                .collect::<Result<Vec<_>, _>>()
        });

        match outcome {
            Ok(diagnostics) => {
                let diagnostics: Vec<Diagnostic> = diagnostics.into_iter().flatten().collect();
                info!(
                    "doc-tests finished: {} results, {} failed",
                    table.len(),
                    table.failure_count()
                );
                Ok(diagnostics)
            }
            Err(err) => {
                table.clear();
                // Jobs cancelled because the compiler vanished report that
                // instead of a bare cancellation.
                match lost_compiler.into_inner() {
                    Some(message) => Err(DocTestError::Toolchain { message }),
                    None => {
                        warn!("doc-tests aborted: {}", err);
                        Err(err)
                    }
                }
            }
        }
    }

    fn run_job(
        &self,
        job: &DocTestJob,
        table: &TestResultTable,
        lost_compiler: &OnceLock<String>,
    ) -> Result<Option<Diagnostic>, DocTestError> {
        if self.token.is_cancelled() {
            return Err(DocTestError::Cancelled);
        }
        let block = &job.block;

        if block.mode == BlockMode::Ignore {
            TestStatus::Pending.transition(TestStatus::Skipped)?;
            debug!("block {} skipped", block.id);
            table.insert(TestResult::skipped(block.id, job.owner))?;
            return Ok(None);
        }

        let sandbox = Sandbox::create(self.sandbox_config())?;
        let JobOutcome { result, diagnostic } = self.execute(job, &sandbox, lost_compiler)?;
        debug!("block {} finished: {:?}/{:?}", block.id, result.status, result.verdict);

        if let Some(kept) = sandbox.dispose(result.failed()) {
            info!("kept scratch for block {} at {}", block.id, kept.display());
        }
        table.insert(result)?;
        Ok(diagnostic)
    }

    fn execute(
        &self,
        job: &DocTestJob,
        sandbox: &Sandbox,
        lost_compiler: &OnceLock<String>,
    ) -> Result<JobOutcome, DocTestError> {
        let block = &job.block;
        let started = Instant::now();

        let unit = build_unit(job, &self.unit_options());
        let source = sandbox.write_file(SOURCE_NAME, &unit)?;
        let binary = sandbox.path().join(BINARY_NAME);
        let vars = TemplateVars {
            cxx: self.toolchain.compiler.clone(),
            source,
            output: binary.clone(),
            scratch: sandbox.path().to_path_buf(),
        };
        let argv = self.template.render(&vars, &self.config.extra_flags);

        // ---- compile ----
        let status = TestStatus::Pending.transition(TestStatus::Compiling)?;
        debug!("compiling block {}: {}", block.id, argv.join(" "));
        let spec = ProcessSpec::new(&argv, self.config.compile_timeout);
        let compiled = match sandbox.run(&spec, &self.token) {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!(
                    "compiler '{}' could not be started: {}",
                    self.toolchain.compiler.display(),
                    e
                );
                let _ = lost_compiler.set(message.clone());
                self.token.cancel();
                return Err(DocTestError::Toolchain { message });
            }
        };

        let compile_failure = match compiled.state {
            ExitState::Cancelled => return Err(DocTestError::Cancelled),
            ExitState::Exited(0) => None,
            ExitState::TimedOut => Some(format!(
                "compilation timed out after {:?}",
                self.config.compile_timeout
            )),
            ExitState::Exited(code) => Some(format!("compilation failed with exit code {}", code)),
            ExitState::Signaled(signal) => {
                Some(format!("compiler killed by signal {}", signal))
            }
        };
        if let Some(message) = compile_failure {
            let status = status.transition(TestStatus::CompileError)?;
            let result = finish(job, status, Verdict::Fail, compiled, started);
            return Ok(JobOutcome::fail(result, DocTestFailureKind::CompileError, message));
        }
        let status = status.transition(TestStatus::Compiled)?;

        if block.mode == BlockMode::NoRun || !self.config.run {
            return Ok(JobOutcome::pass(finish(job, status, Verdict::Pass, compiled, started)));
        }

        // ---- run ----
        let status = status.transition(TestStatus::Running)?;
        let argv = vec![binary.to_string_lossy().into_owned()];
        let spec = ProcessSpec::new(&argv, self.config.run_timeout)
            .with_limits(self.run_limits())
            .with_network(self.config.network);
        debug!("running block {}", block.id);
        let ran = match sandbox.run(&spec, &self.token) {
            Ok(outcome) => outcome,
            Err(e) => {
                let status = status.transition(TestStatus::RuntimeError)?;
                let message = format!("test program could not be started: {}", e);
                let result = TestResult::new(block.id, job.owner, status, Verdict::Fail)
                    .with_output(String::new(), message.clone(), None)
                    .with_duration(started.elapsed());
                return Ok(JobOutcome::fail(result, DocTestFailureKind::RuntimeError, message));
            }
        };
        if ran.truncated {
            warn!("output of block {} exceeded {} bytes and was truncated", block.id, self.config.output_cap);
        }

        match ran.state {
            ExitState::Cancelled => Err(DocTestError::Cancelled),
            ExitState::TimedOut => {
                let status = status.transition(TestStatus::Timeout)?;
                let message = format!("test timed out after {:?}", self.config.run_timeout);
                let result = finish(job, status, Verdict::Fail, ran, started);
                Ok(JobOutcome::fail(result, DocTestFailureKind::Timeout, message))
            }
            ExitState::Exited(code) if code != 0 => {
                let status = status.transition(TestStatus::RuntimeError)?;
                let message = format!("test exited with code {}", code);
                let result = finish(job, status, Verdict::Fail, ran, started);
                Ok(JobOutcome::fail(result, DocTestFailureKind::RuntimeError, message))
            }
            ExitState::Signaled(signal) => {
                let status = status.transition(TestStatus::RuntimeError)?;
                let message = format!("test killed by signal {}", signal);
                let result = finish(job, status, Verdict::Fail, ran, started);
                Ok(JobOutcome::fail(result, DocTestFailureKind::RuntimeError, message))
            }
            ExitState::Exited(_) => {
                let status = status.transition(TestStatus::Completed)?;
                let diff = block
                    .expected_output
                    .as_deref()
                    .and_then(|expected| compare_output(expected, &ran.stdout, self.config.comparison));
                match diff {
                    None => Ok(JobOutcome::pass(finish(job, status, Verdict::Pass, ran, started))),
                    Some(diff) => {
                        let result = finish(job, status, Verdict::Fail, ran, started).with_diff(diff);
                        Ok(JobOutcome::fail(
                            result,
                            DocTestFailureKind::OutputMismatch,
                            "output does not match the expected output".to_string(),
                        ))
                    }
                }
            }
        }
    }

    fn unit_options(&self) -> UnitOptions<'_> {
        UnitOptions {
            prelude: &self.config.prelude,
            include_owner_file: self.config.include_owner_file,
            using_enclosing_namespace: self.config.using_enclosing_namespace,
            root: &self.root,
        }
    }

    fn sandbox_config(&self) -> SandboxConfig {
        let mut config = SandboxConfig::default().with_output_cap(self.config.output_cap);
        config.extra_env = self.config.env.clone();
        config.keep_on_failure = self.config.keep_scratch_on_failure;
        config
    }

    fn run_limits(&self) -> ResourceLimits {
        ResourceLimits {
            address_space: self.config.memory_limit_mb.map(|mb| mb.saturating_mul(MIB)),
            cpu_seconds: Some(cpu_budget(self.config.run_timeout)),
            file_size: self.config.file_size_limit_mb.map(|mb| mb.saturating_mul(MIB)),
        }
    }
}

/// CPU seconds allowed for a wall-clock budget, rounded up.
fn cpu_budget(timeout: Duration) -> u64 {
    timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0) + 1
}

fn finish(
    job: &DocTestJob,
    status: TestStatus,
    verdict: Verdict,
    outcome: ProcessOutcome,
    started: Instant,
) -> TestResult {
    TestResult::new(job.block.id, job.owner, status, verdict)
        .with_output(outcome.stdout, outcome.stderr, outcome.state.code())
        .with_duration(started.elapsed())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod cancellation {
        use super::*;

        static EXTERNAL: AtomicBool = AtomicBool::new(false);

        #[test]
        fn clones_share_flag() {
            let token = CancellationToken::new();
            let clone = token.clone();
            assert!(!clone.is_cancelled());
            token.cancel();
            assert!(clone.is_cancelled());
        }

        #[test]
        fn linked_token_sees_external_flag() {
            let token = CancellationToken::linked(&EXTERNAL);
            assert!(!token.is_cancelled());
            EXTERNAL.store(true, Ordering::SeqCst);
            assert!(token.is_cancelled());
            EXTERNAL.store(false, Ordering::SeqCst);
        }
    }

    mod errors {
        use super::*;
        use cppdoc_core::model::BlockId;

        #[test]
        fn transition_error_is_internal() {
            let err: DocTestError = TestStatus::Pending
                .transition(TestStatus::Completed)
                .unwrap_err()
                .into();
            assert!(matches!(err, DocTestError::Internal { .. }));
        }

        #[test]
        fn duplicate_result_is_internal() {
            let err: DocTestError = DuplicateResult { block: BlockId(7) }.into();
            assert!(matches!(err, DocTestError::Internal { .. }));
        }

        #[test]
        fn template_error_rejected_before_probe() {
            let config = DocTestConfig {
                compiler_template: vec!["{cxx}".to_string(), "{bogus}".to_string()],
                compiler: "cppdoc-no-such-compiler-xyz".to_string(),
                ..DocTestConfig::default()
            };
            let err = DocTestEngine::new(&config, Path::new("."), CancellationToken::new())
                .unwrap_err();
            assert!(matches!(err, DocTestError::Template(_)));
        }

        #[test]
        fn missing_compiler_fails_probe() {
            let config = DocTestConfig {
                compiler: "cppdoc-no-such-compiler-xyz".to_string(),
                ..DocTestConfig::default()
            };
            let err = DocTestEngine::new(&config, Path::new("."), CancellationToken::new())
                .unwrap_err();
            assert!(matches!(err, DocTestError::Toolchain { .. }));
        }
    }

    #[test]
    fn cpu_budget_rounds_up() {
        assert_eq!(cpu_budget(Duration::from_secs(10)), 11);
        assert_eq!(cpu_budget(Duration::from_millis(1500)), 3);
    }
}
