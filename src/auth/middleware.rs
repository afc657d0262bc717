//! Request gate for protected routes.
//!
//! One flow serves both variants: `logged_in` stops after resolving the
//! session, `confirmed` additionally asks [`AccountStatus`] before admitting.
//! On success the resolved [`Identity`] is inserted into the request
//! extensions for handlers to take with `Extension<Identity>`.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, Instrument};

use super::{
    error::AuthError,
    session::SessionService,
    status::{AccountStatus, StatusError},
    types::Identity,
    utils::{extract_bearer_token, BearerToken},
};

#[derive(Clone)]
pub struct AuthGate {
    sessions: Arc<SessionService>,
    status: Option<Arc<dyn AccountStatus>>,
}

impl AuthGate {
    /// Admit any request carrying a live session.
    #[must_use]
    pub fn logged_in(sessions: Arc<SessionService>) -> Self {
        Self {
            sessions,
            status: None,
        }
    }

    /// Admit live sessions whose account also passes the status check.
    #[must_use]
    pub fn confirmed(sessions: Arc<SessionService>, status: Arc<dyn AccountStatus>) -> Self {
        Self {
            sessions,
            status: Some(status),
        }
    }

    /// Resolve the caller's identity from the request headers.
    ///
    /// # Errors
    /// Any [`AuthError`] the request should be rejected with.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        let token = match extract_bearer_token(headers) {
            BearerToken::Present(token) => token,
            BearerToken::Missing => return Err(AuthError::MissingCredentials),
            BearerToken::Malformed => return Err(AuthError::TokenInvalid),
        };

        let session = self.sessions.get_user(&token).await?;

        if let Some(status) = &self.status {
            status
                .check_status(session.user_id)
                .await
                .map_err(|err| match err {
                    StatusError::EmailNotConfirmed => AuthError::EmailNotConfirmed,
                    StatusError::Unavailable(cause) => AuthError::Infrastructure(cause),
                })?;
        }

        Ok(Identity::from(session))
    }
}

/// `axum::middleware::from_fn_with_state` entry point.
pub async fn require_session(
    State(gate): State<AuthGate>,
    mut request: Request,
    next: Next,
) -> Response {
    let span = tracing::info_span!("auth.gate", status_checked = gate.status.is_some());
    let outcome = gate.authenticate(request.headers()).instrument(span).await;
    match outcome {
        Ok(identity) => {
            debug!("Admitted {}", identity.user_id);
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => {
            debug!("Rejected request: {err}");
            err.into_response()
        }
    }
}
