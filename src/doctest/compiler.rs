//! Compiler invocation templates, the toolchain probe and the isolation check.
//!
//! ## Template Variables
//!
//! - `{cxx}` - Resolved compiler path
//! - `{source}` - Generated compilation unit
//! - `{output}` - Executable to produce
//! - `{scratch}` - The test's scratch directory
//!
//! Any other `{name}` is a configuration error, reported before any test
//! runs.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};
use wait_timeout::ChildExt;

use super::sandbox::{NetworkIsolation, ProcessSpec, Sandbox, SandboxConfig};
use super::{CancellationToken, DocTestError};

/// How long `<cxx> --version` may take.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Template
// ============================================================================

/// Errors in a compiler argv template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilerTemplateError {
    /// The template has no arguments.
    #[error("compiler template cannot be empty")]
    Empty,

    /// A `{name}` that is not a known variable.
    #[error("unknown template variable '{{{variable}}}' in argument '{argument}'")]
    UnknownVariable { variable: String, argument: String },

    /// A `{` without a matching `}`.
    #[error("unterminated template variable in argument '{argument}'")]
    Unterminated { argument: String },

    /// The template never mentions the source file.
    #[error("compiler template must reference {{source}}")]
    MissingSource,
}

/// Known template variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variable {
    Cxx,
    Source,
    Output,
    Scratch,
}

impl Variable {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "cxx" => Some(Variable::Cxx),
            "source" => Some(Variable::Source),
            "output" => Some(Variable::Output),
            "scratch" => Some(Variable::Scratch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Var(Variable),
}

/// Values substituted into a template.
#[derive(Debug, Clone)]
pub struct TemplateVars {
    pub cxx: PathBuf,
    pub source: PathBuf,
    pub output: PathBuf,
    pub scratch: PathBuf,
}

impl TemplateVars {
    fn value(&self, var: Variable) -> &Path {
        match var {
            Variable::Cxx => &self.cxx,
            Variable::Source => &self.source,
            Variable::Output => &self.output,
            Variable::Scratch => &self.scratch,
        }
    }
}

/// A validated compiler argv template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerTemplate {
    args: Vec<Vec<Piece>>,
}

impl CompilerTemplate {
    /// The default invocation: C++17, output next to the source.
    pub fn default_argv() -> Vec<String> {
        ["{cxx}", "-std=c++17", "-o", "{output}", "{source}"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Parse and validate `argv`.
    pub fn parse(argv: &[String]) -> Result<Self, CompilerTemplateError> {
        if argv.is_empty() {
            return Err(CompilerTemplateError::Empty);
        }
        let args = argv
            .iter()
            .map(String::as_str)
            .map(parse_argument)
            .collect::<Result<Vec<_>, _>>()?;
        let mentions_source = args
            .iter()
            .flatten()
            .any(|p| *p == Piece::Var(Variable::Source));
        if !mentions_source {
            return Err(CompilerTemplateError::MissingSource);
        }
        Ok(CompilerTemplate { args })
    }

    /// Substitute `vars` and append `extra` flags.
    pub fn render(&self, vars: &TemplateVars, extra: &[String]) -> Vec<String> {
        let mut argv: Vec<String> = self
            .args
            .iter()
            .map(|pieces| {
                pieces
                    .iter()
                    .map(|piece| match piece {
                        Piece::Literal(text) => text.clone(),
                        Piece::Var(var) => vars.value(*var).to_string_lossy().into_owned(),
                    })
                    .collect::<String>()
            })
            .collect();
        argv.extend(extra.iter().cloned());
        argv
    }
}

fn parse_argument(arg: &str) -> Result<Vec<Piece>, CompilerTemplateError> {
    let mut pieces = Vec::new();
    let mut rest = arg;
    while let Some(open) = rest.find('{') {
        if open > 0 {
            pieces.push(Piece::Literal(rest[..open].to_string()));
        }
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| CompilerTemplateError::Unterminated {
                argument: arg.to_string(),
            })?;
        let name = &after[..close];
        let var = Variable::from_name(name).ok_or_else(|| CompilerTemplateError::UnknownVariable {
            variable: name.to_string(),
            argument: arg.to_string(),
        })?;
        pieces.push(Piece::Var(var));
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Literal(rest.to_string()));
    }
    Ok(pieces)
}

// ============================================================================
// Toolchain Probe
// ============================================================================

/// A compiler that passed the probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Absolute path of the compiler.
    pub compiler: PathBuf,
    /// First line of `--version` output.
    pub version: String,
}

/// Check that `compiler` is on `PATH` and answers `--version`.
pub fn probe_toolchain(compiler: &str) -> Result<Toolchain, DocTestError> {
    let path = which::which(compiler).map_err(|e| DocTestError::Toolchain {
        message: format!("compiler '{}' not found on PATH: {}", compiler, e),
    })?;
    debug!("probing {}", path.display());

    let mut child = Command::new(&path)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| DocTestError::Toolchain {
            message: format!("failed to run '{} --version': {}", path.display(), e),
        })?;

    let status = match child.wait_timeout(PROBE_TIMEOUT)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(DocTestError::Toolchain {
                message: format!("'{} --version' timed out", path.display()),
            });
        }
    };
    if !status.success() {
        return Err(DocTestError::Toolchain {
            message: format!("'{} --version' exited with {}", path.display(), status),
        });
    }

    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_string(&mut stdout);
    }
    let version = stdout.lines().next().unwrap_or_default().trim().to_string();
    info!(compiler = %path.display(), version = %version, "toolchain ready");

    Ok(Toolchain {
        compiler: path,
        version,
    })
}

/// Check that test programs can be started with `network` isolation.
///
/// Runs `<compiler> --version` the way a test program would be run. Only
/// `Required` can fail: the other modes never refuse to start a process.
pub fn check_isolation(
    toolchain: &Toolchain,
    network: NetworkIsolation,
) -> Result<(), DocTestError> {
    if network != NetworkIsolation::Required {
        return Ok(());
    }
    let sandbox = Sandbox::create(SandboxConfig::default())?;
    let argv = vec![
        toolchain.compiler.to_string_lossy().into_owned(),
        "--version".to_string(),
    ];
    let spec = ProcessSpec::new(&argv, PROBE_TIMEOUT).with_network(network);
    match sandbox.run(&spec, &CancellationToken::new()) {
        Ok(_) => {
            debug!("network isolation available");
            Ok(())
        }
        Err(e) => Err(DocTestError::Toolchain {
            message: format!(
                "network isolation is required but unavailable: {}; \
                 set doctests.network = \"disabled\" to run tests without it",
                e
            ),
        }),
    }
}

// ============================================================================
// Tests
// ============================================================================
