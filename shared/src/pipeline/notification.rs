//! Toast notifications pushed to the consumer

use serde::{Deserialize, Serialize};

use crate::error::{AppError, ErrorCode};
use crate::models::DealId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "snake_case")]
pub enum Notification {
    Success {
        message: String,
        deal_id: Option<DealId>,
    },
    /// Partial failure, the main operation went through
    Warning {
        message: String,
        deal_id: Option<DealId>,
    },
    Error {
        code: ErrorCode,
        message: String,
        deal_id: Option<DealId>,
        retryable: bool,
    },
}

impl Notification {
    pub fn success(message: impl Into<String>, deal_id: Option<DealId>) -> Self {
        Self::Success {
            message: message.into(),
            deal_id,
        }
    }

    pub fn warning(message: impl Into<String>, deal_id: Option<DealId>) -> Self {
        Self::Warning {
            message: message.into(),
            deal_id,
        }
    }

    pub fn error(err: &AppError, deal_id: Option<DealId>) -> Self {
        Self::Error {
            code: err.code,
            message: err.message.clone(),
            deal_id,
            retryable: err.is_retryable(),
        }
    }

    pub fn deal_id(&self) -> Option<DealId> {
        match self {
            Self::Success { deal_id, .. }
            | Self::Warning { deal_id, .. }
            | Self::Error { deal_id, .. } => *deal_id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}
