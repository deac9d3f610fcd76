use shared::error::{AppError, ErrorCode};
use shared::models::{DealId, StageId};
use thiserror::Error;

use crate::store::StoreError;

/// Engine errors
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Stage not found: {0}")]
    StageNotFound(StageId),

    #[error("Deal not found: {0}")]
    DealNotFound(DealId),

    #[error("Stage {0} still has deals")]
    StageNotEmpty(StageId),

    #[error("Deal title is required")]
    TitleRequired,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("No room left to position deals in stage {0}")]
    PositionExhausted(StageId),

    /// Stale version and silent retries used up
    #[error("Deal {deal_id} was modified concurrently")]
    Conflict { deal_id: DealId },

    #[error("Storage error: {0}")]
    Persistence(#[from] StoreError),
}

impl EngineError {
    /// Rejected before anything was applied, nothing to roll back
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::StageNotFound(_)
                | Self::DealNotFound(_)
                | Self::StageNotEmpty(_)
                | Self::TitleRequired
                | Self::InvalidOperation(_)
        )
    }

    /// Whether the user may simply try again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Persistence(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::StageNotFound(_) | Self::DealNotFound(_) => true,
            Self::Persistence(e) => e.is_not_found(),
            _ => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Map a store error to an error code
fn classify_storage_error(e: &StoreError) -> ErrorCode {
    match e {
        StoreError::Conflict { .. } => return ErrorCode::DealVersionConflict,
        StoreError::NotFound(_) => return ErrorCode::NotFound,
        StoreError::Unavailable(_) => return ErrorCode::NetworkError,
        StoreError::Rejected(_) => return ErrorCode::ValidationFailed,
        StoreError::Serialization(_) => return ErrorCode::InternalError,
        StoreError::Database(_) => {}
    }

    // Database errors are classified by message
    let err_str = e.to_string().to_lowercase();

    if err_str.contains("corrupt") || err_str.contains("invalid database") {
        return ErrorCode::StorageCorrupted;
    }

    if err_str.contains("timed out") || err_str.contains("timeout") {
        return ErrorCode::TimeoutError;
    }

    // Default: lock contention, IO hiccups
    ErrorCode::SystemBusy
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let (code, message) = match err {
            EngineError::Persistence(e) => {
                let code = classify_storage_error(&e);
                let message = e.to_string();
                tracing::error!(error = %e, error_code = ?code, "Storage error occurred");
                (code, message)
            }
            EngineError::StageNotFound(id) => {
                (ErrorCode::StageNotFound, format!("Stage not found: {}", id))
            }
            EngineError::DealNotFound(id) => {
                (ErrorCode::DealNotFound, format!("Deal not found: {}", id))
            }
            EngineError::StageNotEmpty(id) => (
                ErrorCode::StageNotEmpty,
                format!("Stage {} still has deals", id),
            ),
            EngineError::TitleRequired => (
                ErrorCode::DealTitleRequired,
                "Deal title is required".to_string(),
            ),
            EngineError::InvalidOperation(msg) => (ErrorCode::InvalidRequest, msg),
            EngineError::PositionExhausted(id) => (
                ErrorCode::DealPositionExhausted,
                format!("No room left to position deals in stage {}", id),
            ),
            EngineError::Conflict { deal_id } => (
                ErrorCode::DealVersionConflict,
                format!("Deal {} was modified concurrently, please retry", deal_id),
            ),
        };
        AppError::with_message(code, message)
    }
}
