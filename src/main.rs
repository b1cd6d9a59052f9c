//! cppdoc CLI binary entry point.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

use clap::{Parser, Subcommand, ValueEnum};

use cppdoc::config::RunConfig;
use cppdoc::diagnostics::{DiagnosticKind, Report, RunClassification};
use cppdoc::doctest::CancellationToken;
use cppdoc::error::{CppdocError, OutputErrorCode};
use cppdoc::ingest::{expand_inputs, DumpFrontEnd};
use cppdoc::output::{emit_response, ErrorResponse};
use cppdoc::pipeline;

// ============================================================================
// CLI Structure
// ============================================================================

/// Documentation generator core for C++ projects.
///
/// Builds a cross-referenced symbol graph from front-end records, parses doc
/// comments and runs their code examples as tests. All output is JSON.
#[derive(Parser, Debug)]
#[command(name = "cppdoc", version, about = "Cross-referenced C++ docs with tested examples")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

/// Global arguments shared by all subcommands.
#[derive(Parser, Debug)]
struct GlobalArgs {
    /// Configuration file (default: built-in defaults).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Project root; overrides `root` from the configuration.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Log level for tracing output.
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,
}

/// Log level for tracing output.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the documentation model and run doc-tests.
    Build {
        /// Front-end record dump (JSON).
        #[arg(long)]
        records: PathBuf,

        /// Do not compile or run doc-tests.
        #[arg(long)]
        no_doctests: bool,

        /// Select files with the configured input patterns instead of taking
        /// every file in the dump.
        #[arg(long)]
        scan: bool,

        /// Doc-test worker count (0 = one per CPU).
        #[arg(long)]
        jobs: Option<usize>,
    },

    /// Print the effective configuration.
    Config,
}

// ============================================================================
// Main Entry Point
// ============================================================================

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.global.log_level, cli.global.log_json);
    install_interrupt_handler();

    match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            let error_code = OutputErrorCode::from(&err);
            let response = ErrorResponse::from_error(&err);

            // Errors go to stdout as JSON like every other response.
            let _ = emit_response(&response, &mut io::stdout());
            let _ = io::stdout().flush();

            ExitCode::from(error_code.code())
        }
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: LogLevel, json: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[cfg(unix)]
extern "C" fn on_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, std::sync::atomic::Ordering::SeqCst);
}

/// Route SIGINT to the run's cancellation token.
#[cfg(unix)]
fn install_interrupt_handler() {
    // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
    unsafe {
        libc::signal(
            libc::SIGINT,
            on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t,
        );
    }
}

#[cfg(not(unix))]
fn install_interrupt_handler() {}

/// Execute the CLI command.
fn execute(cli: Cli) -> Result<ExitCode, CppdocError> {
    let config = load_config(&cli.global)?;
    match cli.command {
        Command::Build {
            records,
            no_doctests,
            scan,
            jobs,
        } => execute_build(config, &records, no_doctests, scan, jobs),
        Command::Config => execute_config(&config),
    }
}

fn load_config(global: &GlobalArgs) -> Result<RunConfig, CppdocError> {
    let mut config = match &global.config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    if let Some(root) = &global.root {
        config = config.with_root(root);
    }
    Ok(config)
}

// ============================================================================
// Command Executors
// ============================================================================

fn execute_build(
    mut config: RunConfig,
    records: &Path,
    no_doctests: bool,
    scan: bool,
    jobs: Option<usize>,
) -> Result<ExitCode, CppdocError> {
    if no_doctests {
        config = config.with_doctests(false);
    }
    if let Some(jobs) = jobs {
        config = config.with_doctest_workers(jobs);
    }

    let front_end = DumpFrontEnd::load(records)?;
    let files = if scan {
        expand_inputs(&config.root, &config.inputs)?
    } else {
        front_end.files()
    };

    let token = CancellationToken::linked(&INTERRUPTED);
    let output = pipeline::run(&front_end, &files, &config, &token)?;

    let response = output.response();
    emit_response(&response, &mut io::stdout()).map_err(|e| CppdocError::internal(e.to_string()))?;
    let _ = io::stdout().flush();

    Ok(exit_code_for(&output.report))
}

fn execute_config(config: &RunConfig) -> Result<ExitCode, CppdocError> {
    config.validate()?;
    emit_response(config, &mut io::stdout()).map_err(|e| CppdocError::internal(e.to_string()))?;
    let _ = io::stdout().flush();
    Ok(ExitCode::SUCCESS)
}

/// Exit code for a completed run.
fn exit_code_for(report: &Report) -> ExitCode {
    match report.classification {
        RunClassification::Success | RunClassification::SuccessWithWarnings => ExitCode::SUCCESS,
        RunClassification::Failure => {
            let toolchain = report
                .diagnostics
                .iter()
                .any(|d| d.kind == DiagnosticKind::ToolchainConfiguration);
            if toolchain {
                ExitCode::from(OutputErrorCode::ToolchainError.code())
            } else {
                ExitCode::from(OutputErrorCode::RunFailed.code())
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
