//! Unified error codes for the deal pipeline
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 4xxx: Stage errors
//! - 5xxx: Deal errors
//! - 6xxx: History errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values for efficient serialization
/// and cross-language compatibility (Rust, TypeScript, etc.)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Invalid request
    InvalidRequest = 5,

    // ==================== 4xxx: Stage ====================
    /// Stage not found
    StageNotFound = 4001,
    /// Stage still holds deals
    StageNotEmpty = 4002,

    // ==================== 5xxx: Deal ====================
    /// Deal not found
    DealNotFound = 5001,
    /// Deal was changed concurrently (stale version)
    DealVersionConflict = 5002,
    /// Deal title is required
    DealTitleRequired = 5003,
    /// Position key space exhausted and renumbering failed
    DealPositionExhausted = 5004,

    // ==================== 6xxx: History ====================
    /// History event could not be appended
    HistoryAppendFailed = 6001,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Network error
    NetworkError = 9003,
    /// Operation timeout
    TimeoutError = 9004,

    // ==================== 94xx: Storage ====================
    /// Storage corrupted (data file damaged)
    StorageCorrupted = 9403,
    /// System busy (IO error, retry later)
    SystemBusy = 9404,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if this is a success code
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Whether the user can reasonably retry the operation as-is
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::DealVersionConflict
                | ErrorCode::NetworkError
                | ErrorCode::TimeoutError
                | ErrorCode::SystemBusy
                | ErrorCode::DatabaseError
        )
    }

    /// Get the developer-facing English message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::InvalidRequest => "Invalid request",

            // Stage
            ErrorCode::StageNotFound => "Stage not found",
            ErrorCode::StageNotEmpty => "Stage still has deals",

            // Deal
            ErrorCode::DealNotFound => "Deal not found",
            ErrorCode::DealVersionConflict => "Deal was modified concurrently",
            ErrorCode::DealTitleRequired => "Deal title is required",
            ErrorCode::DealPositionExhausted => "No room left to position the deal",

            // History
            ErrorCode::HistoryAppendFailed => "Failed to record deal history",

            // System
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::NetworkError => "Network error",
            ErrorCode::TimeoutError => "Operation timed out",

            // Storage
            ErrorCode::StorageCorrupted => "Storage corrupted (data file damaged)",
            ErrorCode::SystemBusy => "System busy, please retry later",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            // General
            0 => Ok(ErrorCode::Success),
            2 => Ok(ErrorCode::ValidationFailed),
            3 => Ok(ErrorCode::NotFound),
            5 => Ok(ErrorCode::InvalidRequest),

            // Stage
            4001 => Ok(ErrorCode::StageNotFound),
            4002 => Ok(ErrorCode::StageNotEmpty),

            // Deal
            5001 => Ok(ErrorCode::DealNotFound),
            5002 => Ok(ErrorCode::DealVersionConflict),
            5003 => Ok(ErrorCode::DealTitleRequired),
            5004 => Ok(ErrorCode::DealPositionExhausted),

            // History
            6001 => Ok(ErrorCode::HistoryAppendFailed),

            // System
            9001 => Ok(ErrorCode::InternalError),
            9002 => Ok(ErrorCode::DatabaseError),
            9003 => Ok(ErrorCode::NetworkError),
            9004 => Ok(ErrorCode::TimeoutError),

            // Storage
            9403 => Ok(ErrorCode::StorageCorrupted),
            9404 => Ok(ErrorCode::SystemBusy),

            _ => Err(InvalidErrorCode(value)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
