//! ES256 bearer tokens.
//!
//! Compact JWS: `base64url(header).base64url(claims).base64url(signature)` with
//! a raw 64-byte `r || s` P-256 signature. The algorithm named in the header is
//! checked before anything else in the token is trusted.

use base64ct::{Base64UrlUnpadded, Encoding};
use p256::ecdsa::{
    signature::{Signer, Verifier},
    Signature,
};
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use ulid::Ulid;
use uuid::Uuid;

use super::{error::TokenError, keys::KeyProvider};

pub const SIGNING_ALGORITHM: &str = "ES256";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenHeader {
    pub alg: String,
    pub typ: String,
}

impl TokenHeader {
    fn es256() -> Self {
        Self {
            alg: SIGNING_ALGORITHM.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|_| TokenError::Encode)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Invalid)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Invalid)
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}

/// Signs and verifies bearer tokens with the provider's current key pair.
#[derive(Clone)]
pub struct TokenCodec {
    keys: Arc<KeyProvider>,
}

impl TokenCodec {
    #[must_use]
    pub fn new(keys: Arc<KeyProvider>) -> Self {
        Self { keys }
    }

    /// Issue a token for `subject` valid for `validity` from now.
    ///
    /// # Errors
    /// Returns `TokenError::Encode` if the claims cannot be serialized.
    pub fn issue(&self, subject: Uuid, validity: Duration) -> Result<String, TokenError> {
        self.issue_at(subject, validity, unix_now())
    }

    /// Issue a token as if the current time were `now` (unix seconds).
    ///
    /// # Errors
    /// Returns `TokenError::Encode` if the claims cannot be serialized.
    pub fn issue_at(
        &self,
        subject: Uuid,
        validity: Duration,
        now: i64,
    ) -> Result<String, TokenError> {
        let validity = i64::try_from(validity.as_secs()).map_err(|_| TokenError::Encode)?;
        let claims = TokenClaims {
            sub: subject.to_string(),
            iat: now,
            exp: now.saturating_add(validity),
            jti: Ulid::new().to_string(),
        };

        let header_b64 = b64e_json(&TokenHeader::es256())?;
        let claims_b64 = b64e_json(&claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let keys = self.keys.current();
        let signature: Signature = keys.signing_key().sign(signing_input.as_bytes());
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_bytes());

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Verify a token and return its subject.
    ///
    /// # Errors
    /// `UnexpectedSigningMethod` for any algorithm other than ES256, `Invalid` for
    /// malformed or forged tokens, `Expired` once `exp` is reached.
    pub fn verify(&self, token: &str) -> Result<Uuid, TokenError> {
        self.verify_at(token, unix_now()).map(|claims| claims.0)
    }

    /// Verify a token against the time `now` (unix seconds), returning subject and claims.
    ///
    /// # Errors
    /// See [`TokenCodec::verify`].
    pub fn verify_at(&self, token: &str, now: i64) -> Result<(Uuid, TokenClaims), TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::Invalid)?;
        let claims_b64 = parts.next().ok_or(TokenError::Invalid)?;
        let signature_b64 = parts.next().ok_or(TokenError::Invalid)?;
        if parts.next().is_some() {
            return Err(TokenError::Invalid);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(TokenError::UnexpectedSigningMethod(header.alg));
        }

        let signature_bytes =
            Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| TokenError::Invalid)?;
        let signature =
            Signature::from_slice(&signature_bytes).map_err(|_| TokenError::Invalid)?;

        let signing_input = format!("{header_b64}.{claims_b64}");
        let keys = self.keys.current();
        keys.verifying_key()
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| TokenError::Invalid)?;

        let claims: TokenClaims = b64d_json(claims_b64)?;
        if claims.exp <= now {
            return Err(TokenError::Expired);
        }

        let subject = Uuid::parse_str(&claims.sub).map_err(|_| TokenError::Invalid)?;
        Ok((subject, claims))
    }
}
