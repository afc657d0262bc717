//! Bearer sessions, one-time passcodes and the request gate.
//!
//! Components, leaves first:
//! - [`keys`]: ES256 key pair loaded from PEM files, optionally reloaded.
//! - [`token`]: signs and verifies the bearer token.
//! - [`store`]: `session:{id}` and `otp:{email}` records with TTL in Redis.
//! - [`session`]: create/resolve/update sessions and the OTP lifecycle.
//! - [`middleware`]: extract, verify, optionally status-check, then admit.

pub mod error;
pub mod keys;
pub mod middleware;
pub mod session;
pub mod status;
pub mod store;
pub mod token;
pub mod types;
pub(crate) mod utils;

pub use self::error::{AuthError, KeyError, ProblemDetail, StoreError, TokenError};
pub use self::keys::{KeyPair, KeyProvider};
pub use self::middleware::{require_session, AuthGate};
pub use self::session::{SessionConfig, SessionService};
pub use self::status::{AccountStatus, HttpAccountStatus, NoopAccountStatus, StatusError};
pub use self::store::{OtpCheck, RedisStore, SessionStore};
pub use self::token::TokenCodec;
pub use self::types::{Identity, Session, SessionUpdate, User};
