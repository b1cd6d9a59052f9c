//! Ingestion adapter.
//!
//! Runs the front end once per input file on a bounded worker pool, then
//! merges the per-file record streams in input order:
//!
//! - a file whose invocation failed, or whose unit carries a `Fatal`
//!   diagnostic, contributes no records and exactly one `ParseDiagnostic`;
//! - non-fatal front-end diagnostics of healthy files are forwarded;
//! - records are deduplicated by (qualified name, kind, canonical location),
//!   first occurrence wins. Headers seen from several files collapse here.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use cppdoc_core::diagnostics::{Diagnostic, DiagnosticKind, Owner};
use cppdoc_core::frontend::{FrontEnd, FrontEndError, RawRecord, RecordKind, TranslationUnit};
use cppdoc_core::types::{normalize_path, Location};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, info_span, warn};
use walkdir::WalkDir;

// ============================================================================
// Errors
// ============================================================================

/// Errors that stop ingestion as a whole.
///
/// Per-file front-end failures are not errors; they become diagnostics.
#[derive(Debug, Error)]
pub enum IngestError {
    /// An input glob pattern is malformed.
    #[error("invalid input pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// The project root could not be walked.
    #[error("failed to walk {root}: {message}")]
    Walk { root: String, message: String },

    /// The worker pool could not be created.
    #[error("failed to start ingest pool: {message}")]
    Pool { message: String },
}

// ============================================================================
// Ingest
// ============================================================================

/// Merged front-end output for a run.
#[derive(Debug, Default)]
pub struct IngestOutput {
    /// Deduplicated records in input-file order, then stream order.
    pub records: Vec<RawRecord>,
    pub diagnostics: Vec<Diagnostic>,
    /// Files whose records were excluded.
    pub failed_files: Vec<String>,
}

type DedupKey = (String, RecordKind, Location);

/// Run the front end over `files` with `workers` threads and merge the results.
pub fn ingest(
    front_end: &dyn FrontEnd,
    files: &[PathBuf],
    args: &[String],
    workers: usize,
) -> Result<IngestOutput, IngestError> {
    let _span = info_span!("ingest", files = files.len(), workers).entered();

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("cppdoc-ingest-{i}"))
        .build()
        .map_err(|e| IngestError::Pool {
            message: e.to_string(),
        })?;

    // Collect preserves input order regardless of completion order.
    let units: Vec<(String, Result<TranslationUnit, FrontEndError>)> = pool.install(|| {
        files
            .par_iter()
            .map(|file| {
                debug!("parsing {}", file.display());
                (
                    normalize_path(&file.to_string_lossy()),
                    front_end.parse(file, args),
                )
            })
            .collect()
    });

    let mut output = IngestOutput::default();
    let mut seen: HashSet<DedupKey> = HashSet::new();

    for (file, unit) in units {
        let unit = match unit {
            Ok(unit) => unit,
            Err(err) => {
                warn!("front end failed on {}: {}", file, err);
                output
                    .diagnostics
                    .push(Diagnostic::parse_failure(&file, err.to_string()));
                output.failed_files.push(file);
                continue;
            }
        };

        if let Some(fatal) = unit.fatal() {
            warn!("excluding {}: {}", file, fatal.message);
            let mut diag = Diagnostic::parse_failure(&file, fatal.message.clone());
            if let Some(location) = &fatal.location {
                diag = diag.with_location(location.clone());
            }
            output.diagnostics.push(diag);
            output.failed_files.push(file);
            continue;
        }

        for fe_diag in &unit.diagnostics {
            let mut diag = Diagnostic::new(
                DiagnosticKind::FrontEnd,
                fe_diag.severity,
                Owner::File(file.clone()),
                fe_diag.message.clone(),
            );
            if let Some(location) = &fe_diag.location {
                diag = diag.with_location(location.clone());
            }
            output.diagnostics.push(diag);
        }

        let mut kept = 0usize;
        for mut record in unit.records {
            record.location = record.location.canonical();
            let key = (
                record.qualified_name.clone(),
                record.kind,
                record.location.clone(),
            );
            if seen.insert(key) {
                output.records.push(record);
                kept += 1;
            }
        }
        debug!("{}: {} new records", file, kept);
    }

    info!(
        records = output.records.len(),
        failed = output.failed_files.len(),
        diagnostics = output.diagnostics.len(),
        "ingest complete"
    );
    Ok(output)
}

// ============================================================================
// Record Dump Front End
// ============================================================================

/// On-disk shape of a record dump.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordDump {
    pub units: Vec<TranslationUnit>,
}

/// A front end that replays a recorded JSON dump.
///
/// The dump is produced by running the real analysis tool ahead of time;
/// replaying it keeps runs reproducible and lets the pipeline run without a
/// compiler front end installed.
#[derive(Debug, Clone, Default)]
pub struct DumpFrontEnd {
    units: Vec<TranslationUnit>,
    index: HashMap<String, usize>,
}

impl DumpFrontEnd {
    /// Build from decoded units. Later units for the same file replace
    /// earlier ones.
    pub fn new(units: Vec<TranslationUnit>) -> Self {
        let mut index = HashMap::new();
        for (i, unit) in units.iter().enumerate() {
            index.insert(normalize_path(&unit.file), i);
        }
        DumpFrontEnd { units, index }
    }

    /// Decode a dump from JSON text.
    pub fn from_json(json: &str) -> Result<Self, FrontEndError> {
        let dump: RecordDump =
            serde_json::from_str(json).map_err(|e| FrontEndError::Malformed {
                message: e.to_string(),
            })?;
        Ok(Self::new(dump.units))
    }

    /// Read and decode a dump file.
    pub fn load(path: &Path) -> Result<Self, FrontEndError> {
        if !path.exists() {
            return Err(FrontEndError::InputNotFound {
                path: path.display().to_string(),
            });
        }
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Files covered by the dump, in dump order.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        self.units
            .iter()
            .map(|u| normalize_path(&u.file))
            .filter(|f| seen.insert(f.clone()))
            .map(PathBuf::from)
            .collect()
    }
}

impl FrontEnd for DumpFrontEnd {
    fn parse(&self, file: &Path, _args: &[String]) -> Result<TranslationUnit, FrontEndError> {
        let key = normalize_path(&file.to_string_lossy());
        self.index
            .get(&key)
            .and_then(|&i| self.units.get(i))
            .cloned()
            .ok_or(FrontEndError::InputNotFound { path: key })
    }
}

// ============================================================================
// Input Expansion
// ============================================================================

/// Expand glob patterns against the files under `root`.
///
/// Patterns match paths relative to `root`. The result is sorted and
/// deduplicated; each path is `root` joined with the relative path.
pub fn expand_inputs(root: &Path, patterns: &[String]) -> Result<Vec<PathBuf>, IngestError> {
    let globs = build_glob_set(patterns)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| IngestError::Walk {
            root: root.display().to_string(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if globs.is_match(relative) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort();
    files.dedup();
    debug!("expanded {} patterns to {} files", patterns.len(), files.len());
    Ok(files)
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet, IngestError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| IngestError::InvalidPattern {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| IngestError::InvalidPattern {
        pattern: "<combined>".to_string(),
        message: e.to_string(),
    })
}

// ============================================================================
// Tests
// ============================================================================
