use actix_web::http::{header::ContentType, StatusCode};
use actix_web::{HttpResponse, ResponseError};

use crate::repo::RepoError;

/// Every failure a request can end in. Bodies are plain English text; the
/// first failing check decides which one a client sees.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("{0} parameter missing")] Missing(&'static str),
    #[error("{0} format is not valid")] Malformed(&'static str),
    #[error("invalid request body")] InvalidBody,
    #[error("incorrect password")] IncorrectPassword,
    /// A query that matched nothing. Reported like any other unhandled
    /// failure so clients cannot tell it apart from a store error.
    #[error("could not process request")] Unprocessed,
    #[error("{0}")] Internal(&'static str),
    #[error("database unreachable")] StoreUnavailable,
}

impl ApiError {
    /// Maps a store failure; `context` is the message for genuine store errors.
    pub fn from_repo(e: RepoError, context: &'static str) -> Self {
        match e {
            RepoError::NotFound => ApiError::Unprocessed,
            RepoError::Internal(detail) => {
                log::error!("{context}: {detail}");
                ApiError::Internal(context)
            }
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Missing(_)
            | ApiError::Malformed(_)
            | ApiError::InvalidBody
            | ApiError::IncorrectPassword => StatusCode::BAD_REQUEST,
            ApiError::Unprocessed | ApiError::Internal(_) | ApiError::StoreUnavailable => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type(ContentType::plaintext())
            .body(self.to_string())
    }
}
