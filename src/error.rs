//! Exit codes and structured errors for the maintenance binary.

use serde::Serialize;

use crate::cache::CacheError;

/// Exit codes for the `thumbstore` binary.
///
/// - 0: Success
/// - 1: General error (bad arguments, configuration, unexpected failure)
/// - 2: The store file is missing or could not be opened
/// - 3: The store opened but needed repair (a torn tail was truncated)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// The command completed.
    Success = 0,
    /// An unexpected error occurred.
    GeneralError = 1,
    /// The store could not be opened.
    StoreUnavailable = 2,
    /// The store was repaired while opening.
    Repaired = 3,
}

impl ExitCode {
    /// Get the numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the machine-readable code prefix.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "TS000",
            Self::GeneralError => "TS001",
            Self::StoreUnavailable => "TS002",
            Self::Repaired => "TS003",
        }
    }

    /// Pick the exit code for a failed run.
    #[must_use]
    pub fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<CacheError>() {
            Some(CacheError::Open { .. } | CacheError::Disabled) => Self::StoreUnavailable,
            _ => Self::GeneralError,
        }
    }
}

/// Structured error information for JSON output.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// The error code (e.g., "TS002")
    pub code: String,
    /// The exit code number
    pub exit_code: i32,
    /// Human-readable error message
    pub message: String,
}

impl StructuredError {
    /// Create a structured error from an anyhow error and an exit code.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{:#}", err),
        }
    }
}
