//! # Custodia (Sessions & Passcodes)
//!
//! `custodia` issues ES256 bearer tokens, keeps the matching sessions in Redis
//! and gates protected routes on them.
//!
//! ## Sessions
//!
//! A session lives under `session:{user_id}` with a TTL equal to the token
//! validity. The stored record carries the token itself, so creating a new
//! session for a user immediately retires the previous token. Logout deletes
//! the record; a token whose record is gone is reported as an expired session,
//! not as a bad credential.
//!
//! ## One-Time Passcodes
//!
//! Six digit codes are kept under `otp:{email}`. Saving a code replaces any
//! pending one, and a successful verification consumes it.
//!
//! ## Failure Classes
//!
//! Every rejection is an `application/problem+json` body. Authentication
//! failures are `401`, status gates are `403` and store or key failures are
//! `500`; an unreachable store is never reported as a missing session.

pub mod api;
pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
