//! Error taxonomy for the session core and its problem-detail rendering.
//!
//! Component errors (`KeyError`, `TokenError`, `StoreError`) stay close to the
//! code that produces them and fold into [`AuthError`], the closed set of
//! outcomes a caller or the HTTP layer has to distinguish.

use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

/// Failures while reading or parsing the signing key pair.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read key file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed key file {path}")]
    Malformed { path: PathBuf },
    #[error("timed out loading key file {path}")]
    Timeout { path: PathBuf },
}

/// Failures while issuing or verifying a bearer token.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("unexpected signing method: {0}")]
    UnexpectedSigningMethod(String),
    #[error("failed to encode token")]
    Encode,
}

/// Failures talking to the session store. None of these mean "not found".
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),
    #[error("session store operation timed out")]
    Timeout,
    #[error("corrupt record at {key}")]
    Corrupt { key: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Outcomes of the authentication core that callers switch on.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,
    #[error("invalid token")]
    TokenInvalid,
    #[error("token expired")]
    TokenExpired,
    #[error("unexpected signing method: {0}")]
    UnexpectedSigningMethod(String),
    #[error("session not found")]
    SessionNotFound,
    #[error("otp not found")]
    OtpNotFound,
    #[error("otp invalid")]
    OtpInvalid,
    #[error("email not confirmed")]
    EmailNotConfirmed,
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Invalid => Self::TokenInvalid,
            TokenError::Expired => Self::TokenExpired,
            TokenError::UnexpectedSigningMethod(alg) => Self::UnexpectedSigningMethod(alg),
            TokenError::Encode => Self::Infrastructure(err.to_string()),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        Self::Infrastructure(err.to_string())
    }
}

impl From<KeyError> for AuthError {
    fn from(err: KeyError) -> Self {
        Self::Infrastructure(err.to_string())
    }
}

/// Problem payload returned for every rejected request.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProblemDetail {
    pub status: u16,
    pub title: String,
    pub detail: String,
}

impl ProblemDetail {
    /// Problem for a request body the API could not accept.
    #[must_use]
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST.as_u16(),
            title: "Bad Request".to_string(),
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ProblemDetail {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

impl AuthError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingCredentials
            | Self::TokenInvalid
            | Self::TokenExpired
            | Self::UnexpectedSigningMethod(_)
            | Self::SessionNotFound => StatusCode::UNAUTHORIZED,
            Self::EmailNotConfirmed => StatusCode::FORBIDDEN,
            Self::OtpNotFound => StatusCode::NOT_FOUND,
            Self::OtpInvalid => StatusCode::BAD_REQUEST,
            Self::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing problem detail. Never carries the internal cause.
    #[must_use]
    pub fn problem(&self) -> ProblemDetail {
        let (title, detail) = match self {
            Self::MissingCredentials => (
                "Access Denied",
                "You need to be logged in to access this resource.",
            ),
            Self::TokenInvalid | Self::TokenExpired | Self::UnexpectedSigningMethod(_) => (
                "Invalid Session",
                "Your session is invalid. Please log in again.",
            ),
            Self::SessionNotFound => (
                "Session Expired",
                "Your session has expired. Please log in again to continue.",
            ),
            Self::EmailNotConfirmed => (
                "Email Not Confirmed",
                "You need to confirm your email address before accessing this resource.",
            ),
            Self::OtpNotFound => (
                "OTP Not Found",
                "No pending code was found for this email. Please request a new one.",
            ),
            Self::OtpInvalid => (
                "Invalid OTP",
                "The code you entered is invalid or has expired.",
            ),
            Self::Infrastructure(_) => (
                "Internal Server Error",
                "Oops! Something went wrong while processing your request. Please try again later.",
            ),
        };

        ProblemDetail {
            status: self.status_code().as_u16(),
            title: title.to_string(),
            detail: detail.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let Self::Infrastructure(cause) = &self {
            error!("Request failed on infrastructure: {cause}");
        }

        self.problem().into_response()
    }
}
