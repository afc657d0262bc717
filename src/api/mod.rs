#![allow(clippy::needless_for_each)]

use crate::{
    api::handlers::{
        health, health::__path_health, session,
        session::{__path_get_session, __path_logout, __path_me, __path_patch_session},
    },
    auth::{require_session, AccountStatus, AuthGate, Identity, ProblemDetail, SessionService},
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware::from_fn_with_state,
    routing::get,
    Extension, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

pub mod handlers;

#[derive(OpenApi)]
#[openapi(
    paths(health, get_session, patch_session, logout, me),
    components(schemas(health::Health, session::SessionPatch, Identity, ProblemDetail)),
    modifiers(&BearerAuth),
    tags(
        (name = "custodia", description = "Bearer sessions and one-time passcodes")
    )
)]
struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Build the application routes.
///
/// `/v1/session` only needs a live session; `/v1/me` also requires the
/// account to pass `status`.
pub fn router(sessions: Arc<SessionService>, status: Arc<dyn AccountStatus>) -> Router {
    let logged_in = AuthGate::logged_in(sessions.clone());
    let confirmed = AuthGate::confirmed(sessions.clone(), status);

    let session_routes = Router::new()
        .route(
            "/v1/session",
            get(handlers::get_session)
                .patch(handlers::patch_session)
                .delete(handlers::logout),
        )
        .route_layer(from_fn_with_state(logged_in, require_session));

    let confirmed_routes = Router::new()
        .route("/v1/me", get(handlers::me))
        .route_layer(from_fn_with_state(confirmed, require_session));

    Router::new()
        .merge(session_routes)
        .merge(confirmed_routes)
        .route("/health", get(handlers::health).options(handlers::health))
        .layer(Extension(sessions))
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    sessions: Arc<SessionService>,
    status: Arc<dyn AccountStatus>,
) -> Result<()> {
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::PATCH, Method::DELETE])
        .allow_origin(Any);

    let app = router(sessions, status).layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors),
    );

    let listener = TcpListener::bind(format!("::0:{port}"))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Gracefully shutdown");
            }
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        session::{
            tests::{service_with, user},
            SessionConfig,
        },
        status::{NoopAccountStatus, StatusError},
        store::memory::{MemoryStore, UnreachableStore},
    };
    use async_trait::async_trait;
    use axum::{body::to_bytes, http::StatusCode};
    use tower::ServiceExt;
    use uuid::Uuid;

    struct Unconfirmed;

    #[async_trait]
    impl AccountStatus for Unconfirmed {
        async fn check_status(&self, _user_id: Uuid) -> Result<(), StatusError> {
            Err(StatusError::EmailNotConfirmed)
        }
    }

    fn sessions() -> Arc<SessionService> {
        Arc::new(service_with(
            Arc::new(MemoryStore::default()),
            SessionConfig::default(),
        ))
    }

    fn call(method: Method, uri: &str, token: Option<&str>, body: Body) -> Result<Request<Body>> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        if uri == "/v1/session" {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        Ok(builder.body(body)?)
    }

    #[test]
    fn openapi_documents_every_route() {
        let doc = openapi();
        for path in ["/health", "/v1/session", "/v1/me"] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        assert!(doc
            .components
            .as_ref()
            .is_some_and(|components| components.security_schemes.contains_key("bearer")));
    }

    #[tokio::test]
    async fn health_reports_store_status() -> Result<()> {
        let healthy = router(sessions(), Arc::new(NoopAccountStatus));
        let response = healthy
            .oneshot(call(Method::GET, "/health", None, Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("X-App"));

        let broken = Arc::new(service_with(
            Arc::new(UnreachableStore),
            SessionConfig::default(),
        ));
        let response = router(broken, Arc::new(NoopAccountStatus))
            .oneshot(call(Method::GET, "/health", None, Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let health: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(health["store"], "error");
        Ok(())
    }

    #[tokio::test]
    async fn logout_expires_the_token() -> Result<()> {
        let sessions = sessions();
        let token = sessions.create(&user("Ana")).await?;
        let app = router(sessions, Arc::new(NoopAccountStatus));

        let response = app
            .clone()
            .oneshot(call(Method::GET, "/v1/session", Some(&token), Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(call(Method::DELETE, "/v1/session", Some(&token), Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(call(Method::GET, "/v1/session", Some(&token), Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let problem: ProblemDetail = serde_json::from_slice(&body)?;
        assert_eq!(problem.title, "Session Expired");
        Ok(())
    }

    #[tokio::test]
    async fn patch_updates_profile_fields() -> Result<()> {
        let sessions = sessions();
        let ana = user("Ana");
        let token = sessions.create(&ana).await?;
        let app = router(sessions, Arc::new(NoopAccountStatus));

        let response = app
            .oneshot(call(
                Method::PATCH,
                "/v1/session",
                Some(&token),
                Body::from(r#"{"name":"Ana Maria"}"#),
            )?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let identity: Identity = serde_json::from_slice(&body)?;
        assert_eq!(identity.name, "Ana Maria");
        assert_eq!(identity.avatar_url, ana.avatar_url);
        Ok(())
    }

    #[tokio::test]
    async fn patch_with_unknown_field_is_a_problem() -> Result<()> {
        let sessions = sessions();
        let ana = user("Ana");
        let token = sessions.create(&ana).await?;
        let app = router(sessions.clone(), Arc::new(NoopAccountStatus));

        for body in [r#"{"nickname":"Ana"}"#, "{not json"] {
            let response = app
                .clone()
                .oneshot(call(
                    Method::PATCH,
                    "/v1/session",
                    Some(&token),
                    Body::from(body),
                )?)
                .await?;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert_eq!(
                response.headers().get(CONTENT_TYPE),
                Some(&HeaderValue::from_static("application/problem+json"))
            );
            let bytes = to_bytes(response.into_body(), usize::MAX).await?;
            let problem: ProblemDetail = serde_json::from_slice(&bytes)?;
            assert_eq!(problem.status, 400);
            assert_eq!(problem.title, "Bad Request");
        }

        assert_eq!(sessions.get_user(&token).await?.name, ana.name);
        Ok(())
    }

    #[tokio::test]
    async fn me_requires_confirmed_account_but_session_does_not() -> Result<()> {
        let sessions = sessions();
        let token = sessions.create(&user("Ana")).await?;
        let app = router(sessions, Arc::new(Unconfirmed));

        let response = app
            .clone()
            .oneshot(call(Method::GET, "/v1/me", Some(&token), Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app
            .oneshot(call(Method::GET, "/v1/session", Some(&token), Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_route_is_not_gated() -> Result<()> {
        let app = router(sessions(), Arc::new(NoopAccountStatus));
        let response = app
            .oneshot(call(Method::GET, "/v1/nope", None, Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        Ok(())
    }
}
