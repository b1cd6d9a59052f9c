//! JSON output types for run responses.
//!
//! Every response starts with `status` and `schema_version`. Arrays are
//! emitted in deterministic order (declarations and test results by id,
//! references by reference id, diagnostics in report order), so the same
//! input always produces byte-identical output apart from durations.

use std::io::{self, Write};

use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostic, Report, RunClassification};
use crate::error::{CppdocError, OutputErrorCode};
use crate::graph::SymbolGraph;
use crate::model::{Declaration, DocComment, Reference};
use crate::results::{TestResult, Verdict};

/// Current schema version for all responses.
pub const SCHEMA_VERSION: &str = "1";

// ============================================================================
// Run Response
// ============================================================================

/// Doc-test counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocTestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DocTestSummary {
    /// Tally a set of results.
    pub fn from_results(results: &[TestResult]) -> Self {
        let mut summary = DocTestSummary {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            match result.verdict {
                Verdict::Pass => summary.passed += 1,
                Verdict::Fail => summary.failed += 1,
                Verdict::Skip => summary.skipped += 1,
            }
        }
        summary
    }
}

/// Headline numbers for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub declarations: usize,
    pub references: usize,
    pub comments: usize,
    pub doctests: DocTestSummary,
}

/// Response for a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    /// Status: "ok".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    pub classification: RunClassification,
    pub summary: RunSummary,
    pub declarations: Vec<Declaration>,
    pub references: Vec<Reference>,
    pub comments: Vec<DocComment>,
    pub test_results: Vec<TestResult>,
    pub diagnostics: Vec<Diagnostic>,
}

impl RunResponse {
    /// Assemble a response from the products of a run.
    pub fn new(
        graph: &SymbolGraph,
        comments: &[DocComment],
        test_results: Vec<TestResult>,
        report: &Report,
    ) -> Self {
        let declarations: Vec<Declaration> = graph.decls().iter().cloned().collect();
        let references = graph.references().to_vec();
        RunResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            classification: report.classification,
            summary: RunSummary {
                declarations: declarations.len(),
                references: references.len(),
                comments: comments.len(),
                doctests: DocTestSummary::from_results(&test_results),
            },
            declarations,
            references,
            comments: comments.to_vec(),
            test_results,
            diagnostics: report.diagnostics.clone(),
        }
    }
}

// ============================================================================
// Error Response
// ============================================================================

/// Error information for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Numeric error code.
    pub code: u8,
    /// Human-readable message.
    pub message: String,
}

impl ErrorInfo {
    /// Create from a CppdocError.
    pub fn from_error(err: &CppdocError) -> Self {
        ErrorInfo {
            code: OutputErrorCode::from(err).code(),
            message: err.to_string(),
        }
    }
}

/// Response for a run that could not complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Status: "error".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    pub error: ErrorInfo,
}

impl ErrorResponse {
    /// Create an error response from a CppdocError.
    pub fn from_error(err: &CppdocError) -> Self {
        ErrorResponse {
            status: "error".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            error: ErrorInfo::from_error(err),
        }
    }
}

// ============================================================================
// Emission
// ============================================================================

/// Emit a response as pretty-printed JSON to a writer.
pub fn emit_response<T: Serialize>(response: &T, writer: &mut impl Write) -> io::Result<()> {
    let json = serde_json::to_string_pretty(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ClassificationPolicy;
    use crate::model::{BlockId, DeclId};
    use crate::results::TestStatus;

    fn result(block: u64, verdict: Verdict) -> TestResult {
        TestResult::new(BlockId(block), DeclId(1), TestStatus::Completed, verdict)
    }

    #[test]
    fn summary_counts_verdicts() {
        let summary = DocTestSummary::from_results(&[
            result(1, Verdict::Pass),
            result(2, Verdict::Fail),
            result(3, Verdict::Pass),
            result(4, Verdict::Skip),
        ]);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn run_response_emits_valid_json() {
        let graph = SymbolGraph::new();
        let report = Report::new(Vec::new(), ClassificationPolicy::default());
        let response = RunResponse::new(&graph, &[], vec![result(1, Verdict::Pass)], &report);

        let mut output = Vec::new();
        emit_response(&response, &mut output).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["schema_version"], SCHEMA_VERSION);
        assert_eq!(value["classification"], "success");
        assert_eq!(value["summary"]["declarations"], 1);
        assert_eq!(value["summary"]["doctests"]["passed"], 1);
    }

    #[test]
    fn error_response_carries_code() {
        let response = ErrorResponse::from_error(&CppdocError::toolchain("no compiler"));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["code"], 4);
    }
}
