//! Email normalization, passcode generation and bearer header parsing.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use rand::{rngs::OsRng, Rng};

pub const OTP_DIGITS: usize = 6;

/// Normalize an email for OTP keys.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Six decimal digits from the OS CSPRNG, zero padded.
pub(crate) fn generate_otp() -> String {
    let code: u32 = OsRng.gen_range(0..1_000_000);
    format!("{code:0width$}", width = OTP_DIGITS)
}

/// Outcome of reading the `Authorization` header.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum BearerToken {
    Missing,
    Malformed,
    Present(String),
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> BearerToken {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return BearerToken::Missing;
    };
    let Ok(value) = value.to_str() else {
        return BearerToken::Malformed;
    };
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return BearerToken::Missing;
    }
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))
        .map(str::trim);
    match token {
        Some(token) if !token.is_empty() => BearerToken::Present(token.to_string()),
        _ => BearerToken::Malformed,
    }
}
