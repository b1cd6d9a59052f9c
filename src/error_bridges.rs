//! Error bridge implementations for driver-level errors.
//!
//! This module provides `impl From<X> for CppdocError` conversions from the
//! configuration, ingestion and doc-test error types to the unified
//! `CppdocError` type.
//!
//! These bridges live in the root crate rather than `cppdoc-core` because
//! the source types belong to the driver modules, not to core.

use cppdoc_core::error::CppdocError;

use crate::config::ConfigError;
use crate::doctest::compiler::CompilerTemplateError;
use crate::doctest::DocTestError;
use crate::ingest::IngestError;

// ============================================================================
// Bridge: ConfigError -> CppdocError
// ============================================================================

impl From<ConfigError> for CppdocError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Read { ref source, ref path }
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                CppdocError::InputNotFound { path: path.clone() }
            }
            other => CppdocError::InvalidConfig {
                message: other.to_string(),
            },
        }
    }
}

// ============================================================================
// Bridge: IngestError -> CppdocError
// ============================================================================

impl From<IngestError> for CppdocError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::InvalidPattern { .. } => CppdocError::InvalidConfig {
                message: err.to_string(),
            },
            IngestError::Walk { .. } => CppdocError::FrontEnd {
                message: err.to_string(),
            },
            IngestError::Pool { message } => CppdocError::InternalError { message },
        }
    }
}

// ============================================================================
// Bridge: DocTestError -> CppdocError
// ============================================================================

impl From<CompilerTemplateError> for CppdocError {
    fn from(err: CompilerTemplateError) -> Self {
        CppdocError::InvalidConfig {
            message: err.to_string(),
        }
    }
}

impl From<DocTestError> for CppdocError {
    fn from(err: DocTestError) -> Self {
        match err {
            DocTestError::Toolchain { message } => CppdocError::Toolchain { message },
            DocTestError::Template(template_err) => CppdocError::from(template_err),
            DocTestError::Cancelled => CppdocError::Cancelled,
            DocTestError::Sandbox(io_err) => CppdocError::InternalError {
                message: format!("sandbox IO error: {}", io_err),
            },
            DocTestError::Internal { message } => CppdocError::InternalError { message },
        }
    }
}
