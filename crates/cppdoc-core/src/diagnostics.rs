//! Diagnostics and run classification.
//!
//! Localized problems attach to the smallest owning entity ([`Owner`]) and are
//! aggregated into a [`Report`]. Only [`Severity::Fatal`] diagnostics abort a
//! run; everything else is collected and classified at the end.

use serde::{Deserialize, Serialize};

use crate::model::{BlockId, DeclId, ReferenceId};
use crate::types::Location;

// ============================================================================
// Severity
// ============================================================================

/// Severity of a diagnostic, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Note,
    Warning,
    Error,
    Fatal,
}

// ============================================================================
// Diagnostic Kinds
// ============================================================================

/// Sub-kinds of a failed doc-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocTestFailureKind {
    CompileError,
    RuntimeError,
    Timeout,
    OutputMismatch,
}

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A source file could not be parsed; its records were excluded.
    ParseDiagnostic,
    /// A non-fatal diagnostic forwarded from the front end.
    FrontEnd,
    /// A reference matched nothing in the graph and was rendered external.
    UnresolvedReference,
    /// A reference matched several overloads.
    AmbiguousReference,
    /// A declaration's parent was missing and it was re-homed.
    OrphanDeclaration,
    /// A specialization whose primary template is absent.
    OrphanSpecialization,
    /// A doc comment with a malformed construct (e.g. unmatched output fence).
    CommentSyntax,
    /// A doc-test did not pass.
    DocTestFailure { failure: DocTestFailureKind },
    /// The compiler could not be found or invoked.
    ToolchainConfiguration,
}

// ============================================================================
// Owner
// ============================================================================

/// The entity a diagnostic attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Owner {
    Declaration(DeclId),
    Reference(ReferenceId),
    CodeBlock(BlockId),
    File(String),
    /// The run as a whole.
    Run,
}

// ============================================================================
// Diagnostic
// ============================================================================

/// One reported problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(flatten)]
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub owner: Owner,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl Diagnostic {
    /// Create a diagnostic.
    pub fn new(
        kind: DiagnosticKind,
        severity: Severity,
        owner: Owner,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            kind,
            severity,
            owner,
            message: message.into(),
            location: None,
        }
    }

    /// Attach a source location.
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// A file failed to parse.
    pub fn parse_failure(file: impl Into<String>, message: impl Into<String>) -> Self {
        Diagnostic::new(
            DiagnosticKind::ParseDiagnostic,
            Severity::Warning,
            Owner::File(file.into()),
            message,
        )
    }

    /// A reference that resolved to nothing in the graph.
    pub fn unresolved(reference: ReferenceId, text: &str) -> Self {
        Diagnostic::new(
            DiagnosticKind::UnresolvedReference,
            Severity::Note,
            Owner::Reference(reference),
            format!("'{}' is not documented; rendered as external", text),
        )
    }

    /// A reference that resolved to several overloads.
    pub fn ambiguous(reference: ReferenceId, text: &str, candidates: usize) -> Self {
        Diagnostic::new(
            DiagnosticKind::AmbiguousReference,
            Severity::Note,
            Owner::Reference(reference),
            format!("'{}' names {} overloads", text, candidates),
        )
    }

    /// A doc-test that did not pass.
    pub fn doctest_failure(
        block: BlockId,
        failure: DocTestFailureKind,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic::new(
            DiagnosticKind::DocTestFailure { failure },
            Severity::Error,
            Owner::CodeBlock(block),
            message,
        )
    }

    /// The toolchain is unusable; aborts the run.
    pub fn toolchain(message: impl Into<String>) -> Self {
        Diagnostic::new(
            DiagnosticKind::ToolchainConfiguration,
            Severity::Fatal,
            Owner::Run,
            message,
        )
    }

    /// Whether this is a fatal diagnostic.
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunClassification {
    Success,
    SuccessWithWarnings,
    Failure,
}

impl RunClassification {
    /// Whether the run should exit non-zero.
    pub fn is_failure(&self) -> bool {
        matches!(self, RunClassification::Failure)
    }
}

/// Which otherwise non-fatal diagnostics fail the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClassificationPolicy {
    pub fail_on_parse_errors: bool,
    pub fail_on_doctest_failures: bool,
}

/// Classify a set of diagnostics.
///
/// Any fatal diagnostic fails the run. Parse diagnostics and doc-test
/// failures fail it when the policy says so. Otherwise any warning or error
/// downgrades the result to `SuccessWithWarnings`. Notes never count.
pub fn classify(diagnostics: &[Diagnostic], policy: ClassificationPolicy) -> RunClassification {
    let mut warned = false;
    for diag in diagnostics {
        if diag.is_fatal() {
            return RunClassification::Failure;
        }
        match diag.kind {
            DiagnosticKind::ParseDiagnostic if policy.fail_on_parse_errors => {
                return RunClassification::Failure;
            }
            DiagnosticKind::DocTestFailure { .. } if policy.fail_on_doctest_failures => {
                return RunClassification::Failure;
            }
            _ => {}
        }
        if diag.severity >= Severity::Warning {
            warned = true;
        }
    }
    if warned {
        RunClassification::SuccessWithWarnings
    } else {
        RunClassification::Success
    }
}

/// Aggregate diagnostics of a run with their classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub diagnostics: Vec<Diagnostic>,
    pub classification: RunClassification,
}

impl Report {
    /// Classify `diagnostics` under `policy`.
    pub fn new(diagnostics: Vec<Diagnostic>, policy: ClassificationPolicy) -> Self {
        let classification = classify(&diagnostics, policy);
        Report {
            diagnostics,
            classification,
        }
    }

    /// Count diagnostics at or above `severity`.
    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity >= severity)
            .count()
    }

    /// Diagnostics attached to `owner`.
    pub fn for_owner<'a>(&'a self, owner: &'a Owner) -> impl Iterator<Item = &'a Diagnostic> {
        self.diagnostics.iter().filter(move |d| &d.owner == owner)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn note() -> Diagnostic {
        Diagnostic::unresolved(ReferenceId::new(0), "std::string")
    }

    fn mismatch() -> Diagnostic {
        Diagnostic::doctest_failure(
            BlockId(1),
            DocTestFailureKind::OutputMismatch,
            "output differs",
        )
    }

    mod classify_tests {
        use super::*;

        #[test]
        fn empty_is_success() {
            assert_eq!(
                classify(&[], ClassificationPolicy::default()),
                RunClassification::Success
            );
        }

        #[test]
        fn notes_never_affect_classification() {
            let diags = vec![note(), Diagnostic::ambiguous(ReferenceId::new(1), "bar", 2)];
            assert_eq!(
                classify(&diags, ClassificationPolicy::default()),
                RunClassification::Success
            );
        }

        #[test]
        fn parse_failure_is_a_warning_by_default() {
            let diags = vec![Diagnostic::parse_failure("broken.cpp", "syntax error")];
            assert_eq!(
                classify(&diags, ClassificationPolicy::default()),
                RunClassification::SuccessWithWarnings
            );
        }

        #[test]
        fn parse_failure_fails_when_configured() {
            let diags = vec![Diagnostic::parse_failure("broken.cpp", "syntax error")];
            let policy = ClassificationPolicy {
                fail_on_parse_errors: true,
                ..Default::default()
            };
            assert_eq!(classify(&diags, policy), RunClassification::Failure);
        }

        #[test]
        fn doctest_failure_fails_only_when_configured() {
            let diags = vec![mismatch()];
            assert_eq!(
                classify(&diags, ClassificationPolicy::default()),
                RunClassification::SuccessWithWarnings
            );
            let policy = ClassificationPolicy {
                fail_on_doctest_failures: true,
                ..Default::default()
            };
            assert_eq!(classify(&diags, policy), RunClassification::Failure);
        }

        #[test]
        fn fatal_always_fails() {
            let diags = vec![note(), Diagnostic::toolchain("c++ not found")];
            assert_eq!(
                classify(&diags, ClassificationPolicy::default()),
                RunClassification::Failure
            );
        }
    }

    mod report_tests {
        use super::*;

        #[test]
        fn report_counts_by_severity() {
            let report = Report::new(
                vec![note(), mismatch(), Diagnostic::parse_failure("x.cpp", "bad")],
                ClassificationPolicy::default(),
            );
            assert_eq!(report.count_at_least(Severity::Note), 3);
            assert_eq!(report.count_at_least(Severity::Warning), 2);
            assert_eq!(report.count_at_least(Severity::Error), 1);
            assert_eq!(
                report.classification,
                RunClassification::SuccessWithWarnings
            );
        }

        #[test]
        fn report_filters_by_owner() {
            let report = Report::new(vec![note(), mismatch()], ClassificationPolicy::default());
            let owner = Owner::CodeBlock(BlockId(1));
            assert_eq!(report.for_owner(&owner).count(), 1);
        }

        #[test]
        fn diagnostic_serializes_flat_kind() {
            let json = serde_json::to_value(mismatch()).unwrap();
            assert_eq!(json["kind"], "doc_test_failure");
            assert_eq!(json["failure"], "output_mismatch");
            assert_eq!(json["severity"], "error");
            assert_eq!(json["owner"]["type"], "code_block");
        }
    }
}
