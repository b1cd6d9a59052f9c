//! Doc-test results and the side table they live in.
//!
//! Each queued code block moves through a small state machine
//! ([`TestStatus`]) and ends in exactly one [`TestResult`], stored in the
//! [`TestResultTable`] keyed by [`BlockId`]. Workers write disjoint keys; a
//! second write for the same block is rejected.

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostics::DocTestFailureKind;
use crate::model::{BlockId, DeclId};

// ============================================================================
// Status State Machine
// ============================================================================

/// Lifecycle state of a doc-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pending,
    Compiling,
    CompileError,
    Compiled,
    Running,
    Timeout,
    RuntimeError,
    Completed,
    Skipped,
}

impl TestStatus {
    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: TestStatus) -> bool {
        use TestStatus::*;
        matches!(
            (self, next),
            (Pending, Compiling)
                | (Pending, Skipped)
                | (Compiling, CompileError)
                | (Compiling, Compiled)
                | (Compiled, Running)
                | (Running, Timeout)
                | (Running, RuntimeError)
                | (Running, Completed)
        )
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(self, next: TestStatus) -> Result<TestStatus, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Whether no further transition is possible from this state.
    ///
    /// `Compiled` is terminal only for compile-only blocks; it still admits
    /// `Running`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TestStatus::CompileError
                | TestStatus::Timeout
                | TestStatus::RuntimeError
                | TestStatus::Completed
                | TestStatus::Skipped
        )
    }

    /// The failure sub-kind this status represents, if any.
    pub fn failure_kind(self) -> Option<DocTestFailureKind> {
        match self {
            TestStatus::CompileError => Some(DocTestFailureKind::CompileError),
            TestStatus::Timeout => Some(DocTestFailureKind::Timeout),
            TestStatus::RuntimeError => Some(DocTestFailureKind::RuntimeError),
            _ => None,
        }
    }
}

/// An attempted illegal status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid doc-test transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: TestStatus,
    pub to: TestStatus,
}

/// Final judgement of a doc-test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Skip,
}

// ============================================================================
// Test Result
// ============================================================================

/// Outcome of one doc-test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub block: BlockId,
    pub owner: DeclId,
    pub status: TestStatus,
    pub verdict: Verdict,
    /// Captured stdout of the test program (compiler output for compile
    /// errors).
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    /// Unified diff of expected vs actual output; present iff a comparison
    /// failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl TestResult {
    /// Create a result with empty output.
    pub fn new(block: BlockId, owner: DeclId, status: TestStatus, verdict: Verdict) -> Self {
        TestResult {
            block,
            owner,
            status,
            verdict,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            diff: None,
            duration: Duration::ZERO,
        }
    }

    /// A block marked `ignore`.
    pub fn skipped(block: BlockId, owner: DeclId) -> Self {
        TestResult::new(block, owner, TestStatus::Skipped, Verdict::Skip)
    }

    /// Attach captured output.
    pub fn with_output(mut self, stdout: String, stderr: String, exit_code: Option<i32>) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self.exit_code = exit_code;
        self
    }

    /// Attach the elapsed time.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Attach an output diff.
    pub fn with_diff(mut self, diff: String) -> Self {
        self.diff = Some(diff);
        self
    }

    /// Whether the test failed.
    pub fn failed(&self) -> bool {
        self.verdict == Verdict::Fail
    }

    /// Failure sub-kind for reporting.
    pub fn failure_kind(&self) -> Option<DocTestFailureKind> {
        if !self.failed() {
            return None;
        }
        self.status
            .failure_kind()
            .or(Some(DocTestFailureKind::OutputMismatch))
    }
}

/// Serialize `Duration` as `f64` seconds.
pub mod duration_serde {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

// ============================================================================
// Result Table
// ============================================================================

/// A result was written twice for the same block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("result for {block} already recorded")]
pub struct DuplicateResult {
    pub block: BlockId,
}

/// Concurrent side table of doc-test results keyed by block id.
#[derive(Debug, Default)]
pub struct TestResultTable {
    results: DashMap<BlockId, TestResult>,
}

impl TestResultTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result. Each block may be written at most once.
    pub fn insert(&self, result: TestResult) -> Result<(), DuplicateResult> {
        match self.results.entry(result.block) {
            Entry::Occupied(_) => Err(DuplicateResult {
                block: result.block,
            }),
            Entry::Vacant(slot) => {
                slot.insert(result);
                Ok(())
            }
        }
    }

    /// Get a copy of the result for `block`.
    pub fn get(&self, block: BlockId) -> Option<TestResult> {
        self.results.get(&block).map(|r| r.value().clone())
    }

    /// Number of recorded results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether no results are recorded.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Drop every result.
    pub fn clear(&self) {
        self.results.clear();
    }

    /// All results sorted by block id.
    pub fn to_sorted_vec(&self) -> Vec<TestResult> {
        let mut all: Vec<TestResult> = self.results.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|r| r.block);
        all
    }

    /// Number of failed tests.
    pub fn failure_count(&self) -> usize {
        self.results.iter().filter(|r| r.value().failed()).count()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod transition_tests {
        use super::*;

        #[test]
        fn happy_path_is_legal() {
            let status = TestStatus::Pending
                .transition(TestStatus::Compiling)
                .and_then(|s| s.transition(TestStatus::Compiled))
                .and_then(|s| s.transition(TestStatus::Running))
                .and_then(|s| s.transition(TestStatus::Completed))
                .unwrap();
            assert_eq!(status, TestStatus::Completed);
            assert!(status.is_terminal());
        }

        #[test]
        fn skipping_compilation_is_rejected() {
            let err = TestStatus::Pending
                .transition(TestStatus::Running)
                .unwrap_err();
            assert_eq!(err.from, TestStatus::Pending);
            assert_eq!(err.to, TestStatus::Running);
        }

        #[test]
        fn terminal_states_have_no_successors() {
            for terminal in [
                TestStatus::CompileError,
                TestStatus::Timeout,
                TestStatus::RuntimeError,
                TestStatus::Completed,
                TestStatus::Skipped,
            ] {
                for next in [
                    TestStatus::Pending,
                    TestStatus::Compiling,
                    TestStatus::Running,
                    TestStatus::Completed,
                ] {
                    assert!(!terminal.can_transition_to(next), "{:?} -> {:?}", terminal, next);
                }
            }
        }

        #[test]
        fn compiled_is_not_terminal() {
            assert!(!TestStatus::Compiled.is_terminal());
            assert!(TestStatus::Compiled.can_transition_to(TestStatus::Running));
        }
    }

    mod table_tests {
        use super::*;

        fn result(block: u64, verdict: Verdict) -> TestResult {
            TestResult::new(BlockId(block), DeclId(1), TestStatus::Completed, verdict)
        }

        #[test]
        fn second_write_is_rejected() {
            let table = TestResultTable::new();
            table.insert(result(1, Verdict::Pass)).unwrap();
            let err = table.insert(result(1, Verdict::Fail)).unwrap_err();
            assert_eq!(err.block, BlockId(1));
            assert_eq!(table.get(BlockId(1)).unwrap().verdict, Verdict::Pass);
        }

        #[test]
        fn sorted_by_block_id() {
            let table = TestResultTable::new();
            table.insert(result(30, Verdict::Pass)).unwrap();
            table.insert(result(10, Verdict::Fail)).unwrap();
            table.insert(result(20, Verdict::Pass)).unwrap();
            let blocks: Vec<u64> = table.to_sorted_vec().iter().map(|r| r.block.0).collect();
            assert_eq!(blocks, vec![10, 20, 30]);
            assert_eq!(table.failure_count(), 1);
        }

        #[test]
        fn concurrent_disjoint_writes() {
            let table = TestResultTable::new();
            std::thread::scope(|s| {
                for t in 0..4u64 {
                    let table = &table;
                    s.spawn(move || {
                        for i in 0..25u64 {
                            table.insert(result(t * 100 + i, Verdict::Pass)).unwrap();
                        }
                    });
                }
            });
            assert_eq!(table.len(), 100);
        }

        #[test]
        fn failure_kind_of_mismatch() {
            let r = result(1, Verdict::Fail);
            assert_eq!(r.failure_kind(), Some(DocTestFailureKind::OutputMismatch));
            let r = TestResult::new(BlockId(2), DeclId(1), TestStatus::Timeout, Verdict::Fail);
            assert_eq!(r.failure_kind(), Some(DocTestFailureKind::Timeout));
            assert_eq!(result(3, Verdict::Pass).failure_kind(), None);
        }

        #[test]
        fn duration_serializes_as_seconds() {
            let r = result(1, Verdict::Pass).with_duration(Duration::from_millis(1500));
            let json = serde_json::to_value(&r).unwrap();
            assert_eq!(json["duration"], 1.5);
            assert!(json.get("diff").is_none());
        }
    }
}
