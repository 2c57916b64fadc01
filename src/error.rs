use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Request,
    },
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use crate::users::repo::StoreError;

pub type ApiResult<T> = Result<T, AppError>;

/// Failures surfaced to clients. Everything except `Internal` is operational
/// and its message is shown as-is.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Authentication(String),
    #[error("{0}")]
    Authorization(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Service(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
}

/// Carried on redacted responses so a development build can reveal it.
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

const REDACTED: &str = "Something went very wrong!";

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Service(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_operational(&self) -> bool {
        !matches!(self, AppError::Internal(_))
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateEmail => {
                AppError::Conflict("Email already registered".into())
            }
            StoreError::Other(e) => AppError::Internal(e),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

fn status_label(code: StatusCode) -> &'static str {
    if code.is_client_error() {
        "fail"
    } else {
        "error"
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let status = status_label(code);

        if let AppError::Internal(e) = &self {
            error!(error = ?e, "unexpected error");
            let mut res = (
                code,
                Json(ErrorBody {
                    status,
                    message: REDACTED.into(),
                }),
            )
                .into_response();
            res.extensions_mut().insert(ErrorDetail(format!("{e:#}")));
            return res;
        }

        if code.is_server_error() {
            error!(error = %self, "service error");
        } else {
            warn!(%code, message = %self, "request rejected");
        }
        (
            code,
            Json(ErrorBody {
                status,
                message: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Development-only layer: replaces the redacted message with the real cause.
pub async fn expose_error_detail(req: Request, next: Next) -> Response {
    let res = next.run(req).await;
    match res.extensions().get::<ErrorDetail>().cloned() {
        Some(ErrorDetail(detail)) => (
            res.status(),
            Json(ErrorBody {
                status: status_label(res.status()),
                message: detail,
            }),
        )
            .into_response(),
        None => res,
    }
}
