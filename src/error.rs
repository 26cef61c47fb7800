use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use thiserror::Error;

use crate::model::offpremises::{RequestAction, RequestStatus};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },

    #[error("{0}")]
    Authorization(String),

    #[error("already checked in today at {existing_check_in_time}")]
    DuplicateSession {
        existing_check_in_time: DateTime<Utc>,
    },

    #[error("no open attendance session found for today")]
    NoOpenSession,

    #[error("attendance record {record_id} is awaiting supervisor approval and cannot be checked out")]
    NotApproved { record_id: u64 },

    #[error("off-premises request {request_id} is already awaiting supervisor approval")]
    PendingApproval { request_id: u64 },

    #[error("cannot {requested} a request that is {current}")]
    InvalidStateTransition {
        current: RequestStatus,
        requested: RequestAction,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("another check-in for this user is still in progress, try again")]
    AdmissionTimeout,

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: Value) -> Self {
        AppError::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::Authorization(message.into())
    }

    /// Stable machine-readable kind for clients.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "validation_error",
            AppError::Authorization(_) => "authorization_error",
            AppError::DuplicateSession { .. } => "duplicate_session",
            AppError::NoOpenSession => "no_open_session",
            AppError::NotApproved { .. } => "not_approved",
            AppError::PendingApproval { .. } => "pending_approval",
            AppError::InvalidStateTransition { .. } => "invalid_state_transition",
            AppError::NotFound { .. } => "not_found",
            AppError::AdmissionTimeout => "admission_timeout",
            AppError::Storage(_) => "storage_error",
        }
    }

    /// Transient failures; the client may retry the same call.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::AdmissionTimeout | AppError::Storage(_))
    }

    fn details(&self) -> Option<Value> {
        match self {
            AppError::Validation { details, .. } => details.clone(),
            AppError::DuplicateSession {
                existing_check_in_time,
            } => Some(json!({ "existing_check_in_time": existing_check_in_time })),
            AppError::NotApproved { record_id } => Some(json!({ "record_id": record_id })),
            AppError::PendingApproval { request_id } => Some(json!({ "request_id": request_id })),
            AppError::InvalidStateTransition { current, requested } => Some(json!({
                "current": current,
                "requested": requested,
            })),
            _ => None,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            AppError::DuplicateSession { .. }
            | AppError::NoOpenSession
            | AppError::NotApproved { .. }
            | AppError::PendingApproval { .. }
            | AppError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::AdmissionTimeout | AppError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure surfaced to client");
                "storage is temporarily unavailable, please retry".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "kind": self.kind(),
            "message": message,
        });
        if let (Some(Value::Object(extra)), Value::Object(map)) = (self.details(), &mut body) {
            map.extend(extra);
        }

        let mut response = HttpResponse::build(self.status_code());
        if self.is_transient() {
            response.insert_header(("Retry-After", "1"));
        }
        response.json(json!({ "error": body }))
    }
}
