use std::fmt::Display;

use axum::Json;
use axum::http::{Error as HttpError, StatusCode};
use axum::response::{IntoResponse, Response};
use mediagate_service::caching::FetchError;
use mediagate_service::services::PickError;
use sentry::integrations::anyhow::capture_anyhow;
use serde::{Deserialize, Serialize};

/// An error answered with a short, generic message.
///
/// The message is all the client gets to see. The full error is logged, and server errors are
/// reported to Sentry.
#[derive(Debug)]
pub struct ResponseError {
    status: StatusCode,
    detail: &'static str,
    err: anyhow::Error,
}

impl ResponseError {
    fn new(status: StatusCode, detail: &'static str, err: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            detail,
            err: err.into(),
        }
    }

    /// Attaches additional context to the logged error.
    pub fn context<C>(mut self, context: C) -> Self
    where
        C: Display + Send + Sync + 'static,
    {
        self.err = self.err.context(context);
        self
    }
}

impl From<FetchError> for ResponseError {
    fn from(err: FetchError) -> Self {
        let (status, detail) = match err {
            FetchError::InvalidKey(_) => (StatusCode::BAD_REQUEST, "invalid file name"),
            FetchError::NotFound => (StatusCode::NOT_FOUND, "file not found"),
            FetchError::PermissionDenied(_)
            | FetchError::Timeout(_)
            | FetchError::DownloadError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to fetch file")
            }
            FetchError::StorageError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to store file")
            }
            FetchError::InternalError => (StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
        };
        Self::new(status, detail, err)
    }
}

impl From<PickError> for ResponseError {
    fn from(err: PickError) -> Self {
        match err {
            PickError::Empty(_) => Self::new(StatusCode::NOT_FOUND, "no content available", err),
            PickError::List(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to list files", err)
            }
        }
    }
}

impl From<std::io::Error> for ResponseError {
    fn from(err: std::io::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to read file", err)
    }
}

impl From<HttpError> for ResponseError {
    fn from(err: HttpError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error", err)
    }
}

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = self.status.as_u16(), "{:?}", self.err);
            capture_anyhow(&self.err);
        } else {
            tracing::debug!(status = self.status.as_u16(), "{:#}", self.err);
        }

        let body = ApiErrorResponse {
            detail: self.detail.to_owned(),
        };
        (self.status, Json(body)).into_response()
    }
}

/// An error response from an api.
#[derive(Serialize, Deserialize, Default, Debug, PartialEq, Eq)]
pub struct ApiErrorResponse {
    pub detail: String,
}
