//! Session lifecycle on top of the token codec and the session store.
//!
//! Flow Overview:
//! 1) `create` signs a token for the user and stores the session under the
//!    user's id with the token's validity as TTL.
//! 2) `get_user` verifies the token, then resolves the live session and checks
//!    it still belongs to this exact token.
//! 3) OTPs are stored per normalized email; saving a new one replaces the old.
//!
//! Nothing here is cached in-process: every read goes to the store so that
//! logout and expiry are visible to all instances at once.

use std::{sync::Arc, time::Duration};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    error::AuthError,
    store::{OtpCheck, SessionStore},
    token::TokenCodec,
    types::{Session, SessionUpdate, User},
    utils::{generate_otp, normalize_email},
};

const DEFAULT_SESSION_TTL_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_OTP_TTL_SECONDS: u64 = 15 * 60;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    session_ttl: Duration,
    otp_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECONDS),
            otp_ttl: Duration::from_secs(DEFAULT_OTP_TTL_SECONDS),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_otp_ttl(mut self, ttl: Duration) -> Self {
        self.otp_ttl = ttl;
        self
    }

    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    #[must_use]
    pub fn otp_ttl(&self) -> Duration {
        self.otp_ttl
    }
}

pub struct SessionService {
    codec: TokenCodec,
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionService {
    pub fn new(codec: TokenCodec, store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self {
            codec,
            store,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub(crate) fn store(&self) -> &dyn SessionStore {
        self.store.as_ref()
    }

    /// Start a session for `user` and return its bearer token.
    ///
    /// Replaces any session the user already had, so older tokens stop resolving.
    ///
    /// # Errors
    /// Returns `Infrastructure` if signing or the store write fails; no token is
    /// handed out without a stored session behind it.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn create(&self, user: &User) -> Result<String, AuthError> {
        let token = self.codec.issue(user.id, self.config.session_ttl)?;
        let session = Session {
            token,
            name: user.name.clone(),
            user_id: user.id,
            email: user.email.clone(),
            avatar_url: user.avatar_url.clone(),
        };

        self.store
            .put_session(user.id, &session, self.config.session_ttl)
            .await?;

        debug!("Session created");
        Ok(session.token)
    }

    /// Resolve a bearer token into its live session.
    ///
    /// # Errors
    /// Token failures (`TokenInvalid`, `TokenExpired`, `UnexpectedSigningMethod`)
    /// come first; a valid token without a matching stored session is
    /// `SessionNotFound`; store failures are `Infrastructure`.
    #[instrument(skip_all)]
    pub async fn get_user(&self, token: &str) -> Result<Session, AuthError> {
        let user_id = self.codec.verify(token)?;

        let session = self
            .store
            .get_session(user_id)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        if session.user_id != user_id || session.token != token {
            debug!("Token superseded by a newer session for {user_id}");
            return Err(AuthError::SessionNotFound);
        }

        Ok(session)
    }

    /// Apply profile changes to an existing session, keeping its TTL.
    ///
    /// # Errors
    /// `SessionNotFound` if the user has no live session; never creates one.
    #[instrument(skip(self, update))]
    pub async fn update(&self, user_id: Uuid, update: SessionUpdate) -> Result<Session, AuthError> {
        let mut session = self
            .store
            .get_session(user_id)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        if let Some(name) = update.name {
            session.name = name;
        }
        if let Some(avatar_url) = update.avatar_url {
            session.avatar_url = avatar_url;
        }

        if self.store.replace_session(user_id, &session).await? {
            Ok(session)
        } else {
            warn!("Session for {user_id} expired during update");
            Err(AuthError::SessionNotFound)
        }
    }

    /// End the user's session.
    ///
    /// # Errors
    /// Returns `Infrastructure` if the store is unavailable.
    #[instrument(skip(self))]
    pub async fn delete(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.store.delete_session(user_id).await?;
        Ok(())
    }

    /// Store `code` as the only pending OTP for `email`.
    ///
    /// # Errors
    /// Returns `Infrastructure` if the store is unavailable.
    #[instrument(skip(self, code))]
    pub async fn save_otp(&self, email: &str, code: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        self.store
            .put_otp(&email, code, self.config.otp_ttl)
            .await?;
        Ok(())
    }

    /// Fetch the pending OTP for `email`. Comparing it is the caller's job.
    ///
    /// # Errors
    /// `OtpNotFound` if none is pending (never issued, consumed or expired).
    #[instrument(skip(self))]
    pub async fn get_otp(&self, email: &str) -> Result<String, AuthError> {
        let email = normalize_email(email);
        self.store
            .get_otp(&email)
            .await?
            .ok_or(AuthError::OtpNotFound)
    }

    /// Generate a fresh six digit code for `email`, replacing any pending one.
    ///
    /// # Errors
    /// Returns `Infrastructure` if the store is unavailable.
    pub async fn issue_otp(&self, email: &str) -> Result<String, AuthError> {
        let code = generate_otp();
        self.save_otp(email, &code).await?;
        Ok(code)
    }

    /// Check `code` against the pending OTP and consume it on success.
    ///
    /// The comparison and the delete happen in one store operation, so a code
    /// is accepted at most once even under concurrent attempts.
    ///
    /// # Errors
    /// `OtpNotFound` if nothing is pending, `OtpInvalid` on mismatch (the
    /// pending code stays valid).
    #[instrument(skip(self, code))]
    pub async fn verify_otp(&self, email: &str, code: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        match self.store.consume_otp(&email, code.trim()).await? {
            OtpCheck::Consumed => Ok(()),
            OtpCheck::Mismatch => Err(AuthError::OtpInvalid),
            OtpCheck::Missing => Err(AuthError::OtpNotFound),
        }
    }
}
