//! Error types and exit codes for cppdoc.
//!
//! `CppdocError` is the single error type a run surfaces to its caller.
//! Domain errors (front end, configuration, doc-test engine) bridge into it
//! with `From`, and [`OutputErrorCode`] maps each variant to a stable exit
//! code:
//!
//! - `2`: Invalid configuration or arguments
//! - `3`: Input errors (missing inputs, unreadable record dump)
//! - `4`: Toolchain errors (compiler missing or unusable)
//! - `5`: Run failed (classification `Failure`, or the run was cancelled)
//! - `10`: Internal errors (bugs, unexpected state)

use std::fmt;

use thiserror::Error;

use crate::frontend::FrontEndError;

// ============================================================================
// Output Error Codes
// ============================================================================

/// Stable exit codes for CLI and JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputErrorCode {
    /// Invalid configuration or arguments.
    InvalidArguments = 2,
    /// Inputs missing or unreadable.
    InputError = 3,
    /// Compiler missing or unusable.
    ToolchainError = 4,
    /// The run completed with a failing classification, or was cancelled.
    RunFailed = 5,
    /// Internal errors (bugs, unexpected state).
    InternalError = 10,
}

impl OutputErrorCode {
    /// Get the numeric code value.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for OutputErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Unified Error Type
// ============================================================================

/// Unified error type for a documentation run.
#[derive(Debug, Error)]
pub enum CppdocError {
    /// Invalid configuration or arguments.
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// An input file or record dump could not be found.
    #[error("input not found: {path}")]
    InputNotFound { path: String },

    /// The front end could not produce records.
    #[error("front end error: {message}")]
    FrontEnd { message: String },

    /// The compiler toolchain is unusable.
    #[error("toolchain configuration error: {message}")]
    Toolchain { message: String },

    /// The run was cancelled before completion.
    #[error("run cancelled")]
    Cancelled,

    /// Internal error (bug or unexpected state).
    #[error("internal error: {message}")]
    InternalError { message: String },
}

// ============================================================================
// Error Code Mapping
// ============================================================================

impl From<&CppdocError> for OutputErrorCode {
    fn from(err: &CppdocError) -> Self {
        match err {
            CppdocError::InvalidConfig { .. } => OutputErrorCode::InvalidArguments,
            CppdocError::InputNotFound { .. } => OutputErrorCode::InputError,
            CppdocError::FrontEnd { .. } => OutputErrorCode::InputError,
            CppdocError::Toolchain { .. } => OutputErrorCode::ToolchainError,
            CppdocError::Cancelled => OutputErrorCode::RunFailed,
            CppdocError::InternalError { .. } => OutputErrorCode::InternalError,
        }
    }
}

impl From<CppdocError> for OutputErrorCode {
    fn from(err: CppdocError) -> Self {
        OutputErrorCode::from(&err)
    }
}

// ============================================================================
// Bridge: FrontEndError -> CppdocError
// ============================================================================

impl From<FrontEndError> for CppdocError {
    fn from(err: FrontEndError) -> Self {
        match err {
            FrontEndError::InputNotFound { path } => CppdocError::InputNotFound { path },
            FrontEndError::Crashed { file, message } => CppdocError::FrontEnd {
                message: format!("{}: {}", file, message),
            },
            FrontEndError::Malformed { message } => CppdocError::FrontEnd { message },
            FrontEndError::Io(io_err) => CppdocError::FrontEnd {
                message: format!("IO error: {}", io_err),
            },
        }
    }
}

// ============================================================================
// Convenience Constructors
// ============================================================================

impl CppdocError {
    /// Create an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        CppdocError::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an input-not-found error.
    pub fn input_not_found(path: impl Into<String>) -> Self {
        CppdocError::InputNotFound { path: path.into() }
    }

    /// Create a toolchain error.
    pub fn toolchain(message: impl Into<String>) -> Self {
        CppdocError::Toolchain {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        CppdocError::InternalError {
            message: message.into(),
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> OutputErrorCode {
        OutputErrorCode::from(self)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod error_code_mapping {
        use super::*;

        #[test]
        fn invalid_config_maps_to_invalid_arguments() {
            let err = CppdocError::invalid_config("doctests.timeout must be > 0");
            assert_eq!(
                OutputErrorCode::from(&err),
                OutputErrorCode::InvalidArguments
            );
            assert_eq!(err.error_code().code(), 2);
        }

        #[test]
        fn input_not_found_maps_to_input_error() {
            let err = CppdocError::input_not_found("records.json");
            assert_eq!(err.error_code(), OutputErrorCode::InputError);
            assert_eq!(err.error_code().code(), 3);
        }

        #[test]
        fn toolchain_maps_to_toolchain_error() {
            let err = CppdocError::toolchain("c++ not found on PATH");
            assert_eq!(err.error_code().code(), 4);
        }

        #[test]
        fn cancelled_maps_to_run_failed() {
            assert_eq!(CppdocError::Cancelled.error_code(), OutputErrorCode::RunFailed);
            assert_eq!(CppdocError::Cancelled.error_code().code(), 5);
        }

        #[test]
        fn internal_error_maps_to_internal_error() {
            let err = CppdocError::internal("unexpected state");
            assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::InternalError);
            assert_eq!(err.error_code().code(), 10);
        }
    }

    mod error_display {
        use super::*;

        #[test]
        fn toolchain_display() {
            let err = CppdocError::toolchain("clang++ --version exited with 1");
            assert_eq!(
                err.to_string(),
                "toolchain configuration error: clang++ --version exited with 1"
            );
        }

        #[test]
        fn cancelled_display() {
            assert_eq!(CppdocError::Cancelled.to_string(), "run cancelled");
        }
    }

    mod front_end_bridge {
        use super::*;

        #[test]
        fn missing_input_bridges_to_input_not_found() {
            let err: CppdocError = FrontEndError::InputNotFound {
                path: "a.cpp".into(),
            }
            .into();
            assert!(matches!(err, CppdocError::InputNotFound { ref path } if path == "a.cpp"));
        }

        #[test]
        fn crash_bridges_to_front_end() {
            let err: CppdocError = FrontEndError::Crashed {
                file: "a.cpp".into(),
                message: "segfault".into(),
            }
            .into();
            assert_eq!(err.error_code(), OutputErrorCode::InputError);
            assert!(err.to_string().contains("a.cpp: segfault"));
        }
    }

    mod output_error_code {
        use super::*;

        #[test]
        fn display_is_numeric() {
            assert_eq!(OutputErrorCode::ToolchainError.to_string(), "4");
            assert_eq!(OutputErrorCode::InternalError.to_string(), "10");
        }
    }
}
