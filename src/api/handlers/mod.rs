//! Route handlers for the session API.
//!
//! Handlers behind the gate receive the resolved `Identity` as a request
//! extension; they never parse the `Authorization` header themselves.

pub mod health;
pub mod session;

pub use self::health::health;
pub use self::session::{get_session, logout, me, patch_session};
