use std::time::Duration;

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use easel_core::{InvalidRequest, JobError};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// The body was not a well-formed generation request.
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },
    #[error(transparent)]
    Invalid(#[from] InvalidRequest),
    #[error("{0}")]
    Generation(String),
    #[error("generation did not finish within {0:?}")]
    Timeout(Duration),
    #[error("image generation is unavailable")]
    Unavailable,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Rejected { status, .. } => *status,
            Self::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Rejected {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        match e {
            JobError::Invalid(invalid) => Self::Invalid(invalid),
            JobError::WorkerGone => Self::Unavailable,
            e @ (JobError::Generation(_) | JobError::Storage(_)) => Self::Generation(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(%status, "{self}");
        } else {
            tracing::debug!(%status, "{self}");
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_errors_map_to_statuses() {
        let cases = [
            (
                JobError::Invalid(InvalidRequest::Steps(0)),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                JobError::Generation(anyhow::anyhow!("oom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                JobError::Storage(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (JobError::WorkerGone, StatusCode::SERVICE_UNAVAILABLE),
        ];
        for (job_error, status) in cases {
            assert_eq!(ApiError::from(job_error).status(), status);
        }
    }

    #[test]
    fn storage_errors_keep_their_message() {
        let err = ApiError::from(JobError::Storage(anyhow::anyhow!("disk full")));
        assert_eq!(err.to_string(), "failed to save image: disk full");
    }
}
