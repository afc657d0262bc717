//! Account status lookups used by the status-gated middleware.
//!
//! The user directory lives elsewhere; this module only asks it whether a
//! subject has confirmed their email.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};
use url::Url;
use uuid::Uuid;

use crate::APP_USER_AGENT;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatusError {
    #[error("email not confirmed")]
    EmailNotConfirmed,
    #[error("status lookup failed: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AccountStatus: Send + Sync {
    /// `Ok(())` when the subject may use status-gated operations.
    async fn check_status(&self, user_id: Uuid) -> Result<(), StatusError>;
}

/// Treats every account as confirmed. Used when no directory is configured.
#[derive(Clone, Debug)]
pub struct NoopAccountStatus;

#[async_trait]
impl AccountStatus for NoopAccountStatus {
    async fn check_status(&self, _user_id: Uuid) -> Result<(), StatusError> {
        Ok(())
    }
}

/// Asks the user directory over HTTP: `GET {base}/users/{id}/status`.
///
/// `204` means confirmed, `403` means the email is not confirmed, anything
/// else is reported as unavailable.
#[derive(Clone, Debug)]
pub struct HttpAccountStatus {
    client: Client,
    base_url: Url,
}

impl HttpAccountStatus {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: Url, deadline: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(deadline)
            .build()?;
        Ok(Self { client, base_url })
    }

    fn status_url(&self, user_id: Uuid) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        format!("{base}/users/{user_id}/status")
    }
}

#[async_trait]
impl AccountStatus for HttpAccountStatus {
    #[instrument(skip(self))]
    async fn check_status(&self, user_id: Uuid) -> Result<(), StatusError> {
        let response = self
            .client
            .get(self.status_url(user_id))
            .send()
            .await
            .map_err(|err| {
                error!("Error checking account status: {err}");
                StatusError::Unavailable(err.to_string())
            })?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(()),
            StatusCode::FORBIDDEN => {
                debug!("Email not confirmed for {user_id}");
                Err(StatusError::EmailNotConfirmed)
            }
            status => Err(StatusError::Unavailable(format!(
                "unexpected status {status}"
            ))),
        }
    }
}
