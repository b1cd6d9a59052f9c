//! End-to-end documentation run.
//!
//! Phases and their barriers:
//!
//! 1. **Ingest** on the ingest pool; every file finishes before building.
//! 2. **Build** the symbol graph on the calling thread.
//! 3. **Resolve** references and **parse comments** concurrently on the
//!    analysis pool. Both only read declarations; the resolver writes each
//!    reference's own target slot.
//! 4. **Doc-tests** on the engine's own pool, once every job is queued.
//!
//! After phase 3 the graph is frozen and shared behind an [`Arc`].
//! Diagnostics are collected in phase order and classified once at the end.

use std::path::PathBuf;
use std::sync::Arc;

use cppdoc_core::diagnostics::{Diagnostic, Report};
use cppdoc_core::error::CppdocError;
use cppdoc_core::frontend::FrontEnd;
use cppdoc_core::graph::builder::{build, BuildOutput};
use cppdoc_core::graph::SymbolGraph;
use cppdoc_core::model::{DeclId, DeclKind, DocComment};
use cppdoc_core::output::RunResponse;
use cppdoc_core::resolve::resolve_references;
use cppdoc_core::results::{TestResult, TestResultTable};
use rayon::ThreadPoolBuilder;
use tracing::{info, info_span, warn};

use crate::comment::{process_comments, CommentOutput, DocTestJob};
use crate::config::RunConfig;
use crate::doctest::{CancellationToken, DocTestEngine, DocTestError};
use crate::ingest::ingest;

/// Everything a run produces.
#[derive(Debug)]
pub struct RunOutput {
    /// Frozen symbol graph with resolved references.
    pub graph: Arc<SymbolGraph>,
    /// Parsed comments ordered by owner id.
    pub comments: Vec<DocComment>,
    /// Doc-test results ordered by block id.
    pub test_results: Vec<TestResult>,
    pub report: Report,
}

impl RunOutput {
    /// Serializable view of the run.
    pub fn response(&self) -> RunResponse {
        RunResponse::new(
            &self.graph,
            &self.comments,
            self.test_results.clone(),
            &self.report,
        )
    }
}

fn check_cancelled(token: &CancellationToken) -> Result<(), CppdocError> {
    if token.is_cancelled() {
        return Err(CppdocError::Cancelled);
    }
    Ok(())
}

/// Run every phase over `files`.
///
/// Problems with individual inputs, references, comments or tests become
/// diagnostics in the report. Only invalid configuration, cancellation and
/// internal failures are returned as errors.
pub fn run(
    front_end: &dyn FrontEnd,
    files: &[PathBuf],
    config: &RunConfig,
    token: &CancellationToken,
) -> Result<RunOutput, CppdocError> {
    config.validate()?;
    let _span = info_span!("run", files = files.len()).entered();
    let mut diagnostics: Vec<Diagnostic> = Vec::new();

    // ---- ingest ----
    let ingested = ingest(
        front_end,
        files,
        &config.compile_args,
        config.ingest_worker_count(),
    )?;
    diagnostics.extend(ingested.diagnostics);
    check_cancelled(token)?;

    // ---- build ----
    let BuildOutput {
        mut graph,
        diagnostics: build_diagnostics,
    } = build(ingested.records);
    diagnostics.extend(build_diagnostics);
    check_cancelled(token)?;

    // ---- resolve + comments ----
    let pool = ThreadPoolBuilder::new()
        .num_threads(config.analysis_worker_count())
        .thread_name(|i| format!("cppdoc-analysis-{}", i))
        .build()
        .map_err(|e| CppdocError::internal(format!("failed to build analysis pool: {}", e)))?;
    let ((resolve_diagnostics, _stats), comments) = {
        let (decls, references) = graph.split_for_resolution();
        pool.install(|| {
            rayon::join(
                || resolve_references(decls, references, &pool),
                || process_comments(decls, &pool),
            )
        })
    };
    let CommentOutput {
        comments,
        jobs,
        diagnostics: comment_diagnostics,
    } = comments;
    diagnostics.extend(resolve_diagnostics);
    diagnostics.extend(comment_diagnostics);
    let (comments, jobs) = match config.root_namespace.as_deref() {
        Some(namespace) => scope_to_namespace(&graph, namespace, comments, jobs)?,
        None => (comments, jobs),
    };
    let graph = Arc::new(graph);
    check_cancelled(token)?;

    // ---- doc-tests ----
    let table = TestResultTable::new();
    if config.doctests.enable && !jobs.is_empty() {
        diagnostics.extend(run_doctests(config, &jobs, &table, token)?);
    } else if !jobs.is_empty() {
        info!("doc-tests disabled; {} blocks not run", jobs.len());
    }

    let report = Report::new(diagnostics, config.classification_policy());
    info!(
        declarations = graph.decls().len(),
        references = graph.references().len(),
        comments = comments.len(),
        tests = table.len(),
        "run classified as {:?}",
        report.classification
    );

    Ok(RunOutput {
        graph,
        comments,
        test_results: table.to_sorted_vec(),
        report,
    })
}

/// Keep the comments and jobs owned by declarations inside `namespace`.
fn scope_to_namespace(
    graph: &SymbolGraph,
    namespace: &str,
    comments: Vec<DocComment>,
    jobs: Vec<DocTestJob>,
) -> Result<(Vec<DocComment>, Vec<DocTestJob>), CppdocError> {
    let decls = graph.decls();
    let scope = decls
        .find(namespace, DeclKind::Namespace)
        .ok_or_else(|| CppdocError::invalid_config(format!("root namespace '{}' not found", namespace)))?;
    let in_scope = |owner: DeclId| decls.ancestors(owner).contains(&scope);
    let comments: Vec<DocComment> = comments.into_iter().filter(|c| in_scope(c.owner)).collect();
    let jobs: Vec<DocTestJob> = jobs.into_iter().filter(|j| in_scope(j.owner)).collect();
    info!(
        comments = comments.len(),
        jobs = jobs.len(),
        "scoped output to namespace {}",
        namespace
    );
    Ok((comments, jobs))
}

/// Probe the toolchain and run `jobs`.
///
/// An unusable compiler becomes a fatal diagnostic instead of an error, so
/// the graph and comments are still reported.
fn run_doctests(
    config: &RunConfig,
    jobs: &[DocTestJob],
    table: &TestResultTable,
    token: &CancellationToken,
) -> Result<Vec<Diagnostic>, CppdocError> {
    let result = DocTestEngine::new(&config.doctests, &config.root, token.clone())
        .and_then(|engine| engine.run_all(jobs, table));
    match result {
        Ok(diagnostics) => Ok(diagnostics),
        Err(DocTestError::Toolchain { message }) => {
            warn!("doc-tests not run: {}", message);
            Ok(vec![Diagnostic::toolchain(message)])
        }
        Err(err) => Err(err.into()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::DumpFrontEnd;
    use cppdoc_core::diagnostics::{DiagnosticKind, RunClassification};
    use cppdoc_core::frontend::{RawRecord, RecordKind, TranslationUnit};
    use cppdoc_core::types::Location;

    fn front_end() -> DumpFrontEnd {
        let mut unit = TranslationUnit::new("include/gfx.hpp");
        unit.records = vec![
            RawRecord::new(
                RecordKind::Namespace,
                "gfx",
                Location::new("include/gfx.hpp", 1, 1),
            ),
            RawRecord::new(
                RecordKind::Record,
                "gfx::Widget",
                Location::new("include/gfx.hpp", 3, 1),
            )
            .with_parent("gfx", DeclKind::Namespace)
            .with_comment("/// A widget.\n///\n/// ```cpp\n/// gfx::Widget w;\n/// ```"),
        ];
        DumpFrontEnd::new(vec![unit])
    }

    fn config() -> RunConfig {
        RunConfig::default().with_doctests(false)
    }

    #[test]
    fn run_without_doctests_produces_graph_and_comments() {
        let fe = front_end();
        let output = run(&fe, &fe.files(), &config(), &CancellationToken::new()).unwrap();
        assert_eq!(output.comments.len(), 1);
        assert!(output.test_results.is_empty());
        assert_eq!(output.report.classification, RunClassification::Success);
        assert!(output
            .graph
            .decls()
            .find("gfx::Widget", DeclKind::Record)
            .is_some());
    }

    #[test]
    fn root_namespace_scopes_comments() {
        let mut unit = TranslationUnit::new("include/gfx.hpp");
        unit.records = vec![
            RawRecord::new(RecordKind::Namespace, "gfx", Location::new("include/gfx.hpp", 1, 1)),
            RawRecord::new(RecordKind::Record, "gfx::Widget", Location::new("include/gfx.hpp", 3, 1))
                .with_parent("gfx", DeclKind::Namespace)
                .with_comment("/// A widget."),
            RawRecord::new(RecordKind::Record, "Outside", Location::new("include/gfx.hpp", 9, 1))
                .with_comment("/// Not in gfx.\n///\n/// ```cpp\n/// Outside o;\n/// ```"),
        ];
        let fe = DumpFrontEnd::new(vec![unit]);

        let scoped = config().with_root_namespace("gfx");
        let output = run(&fe, &fe.files(), &scoped, &CancellationToken::new()).unwrap();
        let widget = output.graph.decls().find("gfx::Widget", DeclKind::Record).unwrap();
        assert_eq!(output.comments.len(), 1);
        assert_eq!(output.comments[0].owner, widget);
        assert!(output.graph.decls().find("Outside", DeclKind::Record).is_some());

        let missing = config().with_root_namespace("nowhere");
        let err = run(&fe, &fe.files(), &missing, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, CppdocError::InvalidConfig { .. }));
    }

    #[test]
    fn cancelled_token_aborts() {
        let fe = front_end();
        let token = CancellationToken::new();
        token.cancel();
        let err = run(&fe, &fe.files(), &config(), &token).unwrap_err();
        assert!(matches!(err, CppdocError::Cancelled));
    }

    #[test]
    fn invalid_config_rejected_before_ingest() {
        let fe = front_end();
        let config = config().with_timeout(std::time::Duration::ZERO);
        let err = run(&fe, &fe.files(), &config, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, CppdocError::InvalidConfig { .. }));
    }

    #[test]
    fn missing_compiler_is_fatal_diagnostic() {
        let fe = front_end();
        let mut config = RunConfig::default();
        config.doctests.compiler = "cppdoc-no-such-compiler-xyz".to_string();
        let output = run(&fe, &fe.files(), &config, &CancellationToken::new()).unwrap();
        assert_eq!(output.report.classification, RunClassification::Failure);
        assert!(output
            .report
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::ToolchainConfiguration && d.is_fatal()));
        assert!(output.test_results.is_empty());
        assert_eq!(output.comments.len(), 1);
    }

    #[test]
    fn response_mirrors_output() {
        let fe = front_end();
        let output = run(&fe, &fe.files(), &config(), &CancellationToken::new()).unwrap();
        let response = output.response();
        assert_eq!(response.status, "ok");
        assert_eq!(response.summary.comments, 1);
        assert_eq!(response.declarations.len(), output.graph.decls().len());
    }
}
