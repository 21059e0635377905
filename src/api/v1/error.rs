use crate::application_port::AuthError;
use crate::domain_model::ApiEnvelope;
use serde::Serialize;
use std::convert::Infallible;
use thiserror::Error;
use tracing::warn;
use warp::http::StatusCode;
use warp::{Rejection, reject};

pub type ApiResponse<T> = ApiEnvelope<T, ApiErrorCode>;

pub async fn recover_error(err: Rejection) -> Result<impl warp::Reply, Infallible> {
    let (code, message) = if let Some(code) = err.find::<ApiErrorCode>() {
        (*code, code.to_string())
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (ApiErrorCode::ValidationFailed, format!("Malformed request body: {}", e))
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (ApiErrorCode::ValidationFailed, "Request body too large".to_string())
    } else if err.is_not_found() || err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (ApiErrorCode::NotFound, ApiErrorCode::NotFound.to_string())
    } else {
        warn!("Unhandled rejection: {:?}", err);
        (
            ApiErrorCode::InternalError,
            format!("Unhandled error: {:?}", err),
        )
    };

    let status = code.status();
    let json = warp::reply::json(&ApiResponse::<()>::err(code, message));
    Ok(warp::reply::with_status(json, status))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiErrorCode {
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Account is disabled")]
    AccountDisabled,
    #[error("Username already taken")]
    UserExists,
    #[error("Access token has expired")]
    TokenExpired,
    #[error("Access token is not valid")]
    TokenInvalid,
    #[error("Access token is missing")]
    TokenMissing,
    #[error("Refresh token is missing, expired or revoked")]
    RefreshTokenInvalid,
    #[error("Request validation failed")]
    ValidationFailed,
    #[error("Not found")]
    NotFound,
    #[error("Internal error")]
    InternalError,
}

impl ApiErrorCode {
    pub fn internal<E: std::fmt::Display>(error: E) -> ApiErrorCode {
        warn!("Internal error: {}", error);
        ApiErrorCode::InternalError
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiErrorCode::InvalidCredentials
            | ApiErrorCode::AccountDisabled
            | ApiErrorCode::TokenExpired
            | ApiErrorCode::TokenInvalid
            | ApiErrorCode::TokenMissing
            | ApiErrorCode::RefreshTokenInvalid => StatusCode::UNAUTHORIZED,
            ApiErrorCode::UserExists => StatusCode::CONFLICT,
            ApiErrorCode::ValidationFailed => StatusCode::BAD_REQUEST,
            ApiErrorCode::NotFound => StatusCode::NOT_FOUND,
            ApiErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl reject::Reject for ApiErrorCode {}

impl From<AuthError> for ApiErrorCode {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::InvalidCredentials => ApiErrorCode::InvalidCredentials,
            AuthError::AccountDisabled => ApiErrorCode::AccountDisabled,
            AuthError::UserExists => ApiErrorCode::UserExists,
            AuthError::UserNotFound => ApiErrorCode::TokenInvalid,
            AuthError::TokenInvalid => ApiErrorCode::TokenInvalid,
            AuthError::TokenExpired => ApiErrorCode::TokenExpired,
            AuthError::RefreshTokenInvalid => ApiErrorCode::RefreshTokenInvalid,
            AuthError::Validation(_) => ApiErrorCode::ValidationFailed,
            AuthError::Store(e) => ApiErrorCode::internal(e),
            AuthError::InternalError(e) => ApiErrorCode::internal(e),
        }
    }
}
