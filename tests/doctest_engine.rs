//! Doc-test engine and sandbox integration tests.
//!
//! Tests that need a C++ compiler return early when `c++` is not on `PATH`.

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use cppdoc::config::{DocTestConfig, RunConfig};
use cppdoc::diagnostics::{DiagnosticKind, DocTestFailureKind, RunClassification};
use cppdoc::doctest::sandbox::NetworkIsolation;
use cppdoc::doctest::{CancellationToken, DocTestEngine};
use cppdoc::comment::DocTestJob;
use cppdoc::frontend::{RawRecord, RecordKind, TranslationUnit};
use cppdoc::ingest::DumpFrontEnd;
use cppdoc::model::{BlockId, BlockMode, CodeBlock, DeclId, DeclKind};
use cppdoc::pipeline::run;
use cppdoc::results::{TestResultTable, TestStatus, Verdict};
use cppdoc::types::Location;
use tempfile::TempDir;

fn have_compiler() -> bool {
    let found = which::which("c++").is_ok();
    if !found {
        eprintln!("c++ not found on PATH; skipping");
    }
    found
}

fn job(id: u64, mode: BlockMode, code: &str, expected: Option<&str>) -> DocTestJob {
    DocTestJob {
        block: CodeBlock {
            id: BlockId(id),
            language: "cpp".to_string(),
            mode,
            wrap_main: true,
            code: code.to_string(),
            expected_output: expected.map(str::to_string),
        },
        owner: DeclId(1),
        owner_file: String::new(),
        namespace: None,
    }
}

fn doctest_config() -> DocTestConfig {
    DocTestConfig {
        prelude: vec!["<iostream>".to_string(), "<cstdlib>".to_string()],
        run_timeout: Duration::from_secs(2),
        workers: 2,
        network: NetworkIsolation::Disabled,
        ..DocTestConfig::default()
    }
}

fn engine(config: &DocTestConfig) -> DocTestEngine {
    DocTestEngine::new(config, Path::new("."), CancellationToken::new()).unwrap()
}

// ============================================================================
// Engine
// ============================================================================

mod engine {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn missing_test_binary_is_runtime_error() {
        // `true` "compiles" without producing the program.
        let config = DocTestConfig {
            compiler: "true".to_string(),
            compiler_template: vec!["{cxx}".to_string(), "{source}".to_string()],
            ..doctest_config()
        };
        let jobs = vec![
            job(1, BlockMode::Tested, "return 0;", None),
            job(2, BlockMode::Tested, "return 0;", Some("x")),
        ];
        let table = TestResultTable::new();
        let diagnostics = engine(&config).run_all(&jobs, &table).unwrap();

        assert_eq!(table.len(), 2);
        for result in table.to_sorted_vec() {
            assert_eq!(result.status, TestStatus::RuntimeError);
            assert_eq!(result.verdict, Verdict::Fail);
            assert_eq!(result.exit_code, None);
            assert!(result.stderr.contains("could not be started"));
        }
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(
            diagnostics[0].kind,
            DiagnosticKind::DocTestFailure {
                failure: DocTestFailureKind::RuntimeError
            }
        );
    }

    #[test]
    fn four_jobs_one_failure() {
        if !have_compiler() {
            return;
        }
        let jobs = vec![
            job(1, BlockMode::Tested, "std::cout << 6 * 7 << '\\n';", Some("42\n")),
            job(2, BlockMode::Tested, "std::cout << \"hi\";", None),
            job(3, BlockMode::NoRun, "std::abort();", None),
            job(4, BlockMode::Tested, "std::cout << 41 << '\\n';", Some("42\n")),
        ];
        let table = TestResultTable::new();
        let diagnostics = engine(&doctest_config()).run_all(&jobs, &table).unwrap();

        assert_eq!(table.len(), 4);
        let results = table.to_sorted_vec();
        assert_eq!(results[0].verdict, Verdict::Pass);
        assert_eq!(results[0].status, TestStatus::Completed);
        assert_eq!(results[1].verdict, Verdict::Pass);
        assert_eq!(results[2].status, TestStatus::Compiled);
        assert_eq!(results[2].verdict, Verdict::Pass);

        let mismatch = &results[3];
        assert_eq!(mismatch.verdict, Verdict::Fail);
        assert_eq!(mismatch.status, TestStatus::Completed);
        let diff = mismatch.diff.as_deref().unwrap();
        assert!(diff.contains("-42"));
        assert!(diff.contains("+41"));

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics[0].kind,
            DiagnosticKind::DocTestFailure {
                failure: DocTestFailureKind::OutputMismatch
            }
        );
    }

    #[test]
    fn compile_and_runtime_errors() {
        if !have_compiler() {
            return;
        }
        let jobs = vec![
            job(1, BlockMode::Tested, "this is not C++;", None),
            job(2, BlockMode::Tested, "return 3;", None),
        ];
        let table = TestResultTable::new();
        let diagnostics = engine(&doctest_config()).run_all(&jobs, &table).unwrap();

        let compile = table.get(BlockId(1)).unwrap();
        assert_eq!(compile.status, TestStatus::CompileError);
        assert!(!compile.stderr.is_empty());

        let runtime = table.get(BlockId(2)).unwrap();
        assert_eq!(runtime.status, TestStatus::RuntimeError);
        assert_eq!(runtime.exit_code, Some(3));

        let kinds: Vec<_> = diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DiagnosticKind::DocTestFailure {
                    failure: DocTestFailureKind::CompileError
                },
                DiagnosticKind::DocTestFailure {
                    failure: DocTestFailureKind::RuntimeError
                },
            ]
        );
    }

    #[test]
    fn infinite_loop_times_out() {
        if !have_compiler() {
            return;
        }
        let config = DocTestConfig {
            run_timeout: Duration::from_millis(500),
            ..doctest_config()
        };
        let jobs = vec![job(1, BlockMode::Tested, "for (;;) {}", None)];
        let table = TestResultTable::new();
        let started = Instant::now();
        engine(&config).run_all(&jobs, &table).unwrap();

        let result = table.get(BlockId(1)).unwrap();
        assert_eq!(result.status, TestStatus::Timeout);
        assert_eq!(result.verdict, Verdict::Fail);
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn ignored_blocks_are_skipped_without_compiling() {
        if !have_compiler() {
            return;
        }
        let jobs = vec![job(1, BlockMode::Ignore, "not even C++", None)];
        let table = TestResultTable::new();
        let diagnostics = engine(&doctest_config()).run_all(&jobs, &table).unwrap();
        assert!(diagnostics.is_empty());
        let result = table.get(BlockId(1)).unwrap();
        assert_eq!(result.status, TestStatus::Skipped);
        assert_eq!(result.verdict, Verdict::Skip);
    }

    #[test]
    fn compile_only_configuration() {
        if !have_compiler() {
            return;
        }
        let config = DocTestConfig {
            run: false,
            ..doctest_config()
        };
        let jobs = vec![job(1, BlockMode::Tested, "std::abort();", Some("never"))];
        let table = TestResultTable::new();
        engine(&config).run_all(&jobs, &table).unwrap();
        let result = table.get(BlockId(1)).unwrap();
        assert_eq!(result.status, TestStatus::Compiled);
        assert_eq!(result.verdict, Verdict::Pass);
    }

    #[test]
    fn nomain_block_defines_its_own_main() {
        if !have_compiler() {
            return;
        }
        let mut nomain = job(
            1,
            BlockMode::Tested,
            "int helper() { return 5; }\nint main() { std::cout << helper(); }\n",
            Some("5"),
        );
        nomain.block.wrap_main = false;
        let table = TestResultTable::new();
        engine(&doctest_config()).run_all(&[nomain], &table).unwrap();
        assert_eq!(table.get(BlockId(1)).unwrap().verdict, Verdict::Pass);
    }

    #[test]
    fn cancellation_discards_results() {
        if !have_compiler() {
            return;
        }
        let token = CancellationToken::new();
        let config = DocTestConfig {
            run_timeout: Duration::from_secs(60),
            ..doctest_config()
        };
        let engine = DocTestEngine::new(&config, Path::new("."), token.clone()).unwrap();
        let jobs = vec![
            job(1, BlockMode::Tested, "for (;;) {}", None),
            job(2, BlockMode::Tested, "for (;;) {}", None),
        ];
        let table = TestResultTable::new();

        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_secs(3));
                token.cancel();
            })
        };
        let started = Instant::now();
        let err = engine.run_all(&jobs, &table).unwrap_err();
        canceller.join().unwrap();

        assert!(matches!(err, cppdoc::doctest::DocTestError::Cancelled));
        assert!(table.is_empty());
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}

// ============================================================================
// Full Pipeline
// ============================================================================

mod pipeline {
    use super::*;

    fn project() -> TempDir {
        let dir = TempDir::with_prefix("cppdoc_project_").unwrap();
        fs::write(
            dir.path().join("gfx.hpp"),
            "#pragma once\nnamespace gfx { inline int twice(int x) { return 2 * x; } }\n",
        )
        .unwrap();
        dir
    }

    fn front_end() -> DumpFrontEnd {
        let mut unit = TranslationUnit::new("gfx.hpp");
        unit.records = vec![
            RawRecord::new(RecordKind::Namespace, "gfx", Location::new("gfx.hpp", 2, 1)),
            RawRecord::new(RecordKind::Function, "gfx::twice", Location::new("gfx.hpp", 2, 24))
                .with_parent("gfx", DeclKind::Namespace)
                .with_comment(
                    "/// Doubles a value.\n\
                     ///\n\
                     /// ```cpp\n\
                     /// std::cout << twice(21) << '\\n';\n\
                     /// ```\n\
                     ///\n\
                     /// ```output\n\
                     /// 42\n\
                     /// ```\n\
                     ///\n\
                     /// ```cpp,ignore\n\
                     /// twice(\"no\");\n\
                     /// ```",
                ),
        ];
        DumpFrontEnd::new(vec![unit])
    }

    #[test]
    fn header_example_passes() {
        if !have_compiler() {
            return;
        }
        let dir = project();
        let mut config = RunConfig::default().with_root(dir.path());
        config.doctests = doctest_config();
        let fe = front_end();
        let output = run(&fe, &fe.files(), &config, &CancellationToken::new()).unwrap();

        assert_eq!(output.test_results.len(), 2);
        let verdicts: Vec<_> = output.test_results.iter().map(|r| r.verdict).collect();
        assert!(verdicts.contains(&Verdict::Pass));
        assert!(verdicts.contains(&Verdict::Skip));
        assert_eq!(output.report.classification, RunClassification::Success);
        assert_eq!(output.response().summary.doctests.passed, 1);
    }

    #[test]
    fn status_and_results_are_repeatable() {
        if !have_compiler() {
            return;
        }
        let dir = project();
        let mut config = RunConfig::default().with_root(dir.path());
        config.doctests = doctest_config();
        let fe = front_end();

        let summarize = || {
            let output = run(&fe, &fe.files(), &config, &CancellationToken::new()).unwrap();
            output
                .test_results
                .iter()
                .map(|r| (r.block, r.status, r.verdict))
                .collect::<Vec<_>>()
        };
        assert_eq!(summarize(), summarize());
    }
}

// ============================================================================
// Sandbox
// ============================================================================

#[cfg(unix)]
mod sandbox {
    use cppdoc::doctest::sandbox::{ExitState, ProcessSpec, Sandbox, SandboxConfig};

    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn timeout_kills_the_whole_process_group() {
        let sandbox = Sandbox::create(SandboxConfig::default()).unwrap();
        // The background child would create the marker after the parent is
        // killed unless it dies with the group.
        let argv = sh("(sleep 2; touch late.txt) & sleep 30");
        let started = Instant::now();
        let outcome = sandbox
            .run(
                &ProcessSpec::new(&argv, Duration::from_millis(300)),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(outcome.state, ExitState::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));

        thread::sleep(Duration::from_secs(3));
        assert!(!sandbox.path().join("late.txt").exists());
    }

    #[test]
    fn cancellation_stops_a_running_process() {
        let sandbox = Sandbox::create(SandboxConfig::default()).unwrap();
        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                token.cancel();
            })
        };
        let argv = sh("sleep 30");
        let started = Instant::now();
        let outcome = sandbox
            .run(&ProcessSpec::new(&argv, Duration::from_secs(60)), &token)
            .unwrap();
        canceller.join().unwrap();
        assert_eq!(outcome.state, ExitState::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn scratch_is_removed_after_failure_paths() {
        let path = {
            let sandbox = Sandbox::create(SandboxConfig::default()).unwrap();
            let argv = sh("exit 1");
            sandbox
                .run(
                    &ProcessSpec::new(&argv, Duration::from_secs(5)),
                    &CancellationToken::new(),
                )
                .unwrap();
            sandbox.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
