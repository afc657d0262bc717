//! Session endpoints. Every handler here runs behind [`crate::auth::AuthGate`].

use axum::{
    extract::{rejection::JsonRejection, Extension},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use crate::auth::{AuthError, Identity, ProblemDetail, SessionService, SessionUpdate};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SessionPatch {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/session",
    responses(
        (status = 200, description = "Identity bound to the presented token.", body = Identity),
        (status = 401, description = "Missing, invalid or expired session.", body = ProblemDetail),
        (status = 500, description = "Session store unavailable.", body = ProblemDetail),
    ),
    security(("bearer" = [])),
    tag = "session"
)]
pub async fn get_session(Extension(identity): Extension<Identity>) -> Json<Identity> {
    Json(identity)
}

#[utoipa::path(
    patch,
    path = "/v1/session",
    request_body = SessionPatch,
    responses(
        (status = 200, description = "Session profile updated.", body = Identity),
        (status = 400, description = "Body is not a valid session patch.", body = ProblemDetail),
        (status = 401, description = "Missing, invalid or expired session.", body = ProblemDetail),
        (status = 500, description = "Session store unavailable.", body = ProblemDetail),
    ),
    security(("bearer" = [])),
    tag = "session"
)]
pub async fn patch_session(
    Extension(identity): Extension<Identity>,
    Extension(sessions): Extension<Arc<SessionService>>,
    payload: Result<Json<SessionPatch>, JsonRejection>,
) -> Response {
    let patch = match payload {
        Ok(Json(patch)) => patch,
        Err(rejection) => return ProblemDetail::bad_request(rejection.body_text()).into_response(),
    };
    let update = SessionUpdate {
        name: patch.name,
        avatar_url: patch.avatar_url,
    };
    match sessions.update(identity.user_id, update).await {
        Ok(session) => Json(Identity::from(session)).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/v1/session",
    responses(
        (status = 204, description = "Session ended; the token no longer resolves."),
        (status = 401, description = "Missing, invalid or expired session.", body = ProblemDetail),
        (status = 500, description = "Session store unavailable.", body = ProblemDetail),
    ),
    security(("bearer" = [])),
    tag = "session"
)]
pub async fn logout(
    Extension(identity): Extension<Identity>,
    Extension(sessions): Extension<Arc<SessionService>>,
) -> Result<StatusCode, AuthError> {
    sessions.delete(identity.user_id).await?;
    info!("Session ended for {}", identity.user_id);
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Identity of a confirmed account.", body = Identity),
        (status = 401, description = "Missing, invalid or expired session.", body = ProblemDetail),
        (status = 403, description = "Email address not confirmed.", body = ProblemDetail),
        (
            status = 500,
            description = "Session store or user directory unavailable.",
            body = ProblemDetail
        ),
    ),
    security(("bearer" = [])),
    tag = "session"
)]
pub async fn me(Extension(identity): Extension<Identity>) -> Json<Identity> {
    Json(identity)
}
