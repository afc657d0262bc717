//! Session and OTP persistence.
//!
//! Layout:
//! - `session:{user_id}` -> JSON session record, TTL = token validity
//! - `otp:{email}` -> pending code, TTL = OTP lifetime
//!
//! Every operation is a single Redis command (or one atomic script) and is
//! bounded by the store deadline. Store failures are reported as `StoreError`; an absent key is
//! `Ok(None)` / `Ok(false)`, never an error.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, RedisResult, Script};
use secrecy::{ExposeSecret, SecretString};
use std::{future::Future, time::Duration};
use tokio::time::timeout;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use super::{error::StoreError, types::Session};

#[must_use]
pub fn session_key(user_id: Uuid) -> String {
    format!("session:{user_id}")
}

#[must_use]
pub fn otp_key(email: &str) -> String {
    format!("otp:{email}")
}

pub(crate) fn encode_session(key: &str, session: &Session) -> Result<String, StoreError> {
    serde_json::to_string(session).map_err(|_| StoreError::Corrupt {
        key: key.to_string(),
    })
}

pub(crate) fn decode_session(key: &str, raw: &str) -> Result<Session, StoreError> {
    serde_json::from_str(raw).map_err(|_| StoreError::Corrupt {
        key: key.to_string(),
    })
}

/// Compare-and-delete in one round trip. Hashes are compared so the match
/// time does not depend on how many leading characters agree.
const CONSUME_OTP_SCRIPT: &str = r"
local stored = redis.call('GET', KEYS[1])
if not stored then
  return -1
end
if redis.sha1hex(stored) == redis.sha1hex(ARGV[1]) then
  redis.call('DEL', KEYS[1])
  return 1
end
return 0
";

/// Result of an attempt to consume a pending OTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpCheck {
    Consumed,
    Mismatch,
    Missing,
}

impl OtpCheck {
    fn from_reply(reply: i64) -> Self {
        match reply {
            1 => Self::Consumed,
            0 => Self::Mismatch,
            _ => Self::Missing,
        }
    }
}

/// Redis rejects `EX 0`; sub-second TTLs round up to one second.
fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Upsert the session for `user_id`, replacing any previous one.
    async fn put_session(
        &self,
        user_id: Uuid,
        session: &Session,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn get_session(&self, user_id: Uuid) -> Result<Option<Session>, StoreError>;

    /// Overwrite an existing session keeping its TTL. Returns `false` if none exists.
    async fn replace_session(&self, user_id: Uuid, session: &Session) -> Result<bool, StoreError>;

    async fn delete_session(&self, user_id: Uuid) -> Result<(), StoreError>;

    /// Upsert the pending code for `email`, invalidating any previous one.
    async fn put_otp(&self, email: &str, code: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn get_otp(&self, email: &str) -> Result<Option<String>, StoreError>;

    async fn delete_otp(&self, email: &str) -> Result<(), StoreError>;

    /// Atomically delete the pending code for `email` if it equals `code`.
    /// A mismatch leaves the pending code in place.
    async fn consume_otp(&self, email: &str, code: &str) -> Result<OtpCheck, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Redis-backed store shared by every instance of the service.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    deadline: Duration,
    consume_otp: Script,
}

impl RedisStore {
    /// Connect to Redis. `url` may carry credentials, so it stays secret.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the server is unreachable within `deadline`.
    pub async fn connect(url: &SecretString, deadline: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url.expose_secret())?;
        let conn = timeout(deadline, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout)??;
        Ok(Self {
            conn,
            deadline,
            consume_otp: Script::new(CONSUME_OTP_SCRIPT),
        })
    }

    async fn run<T, F>(
        &self,
        operation: &'static str,
        key: &str,
        command: F,
    ) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        with_deadline(self.deadline, operation, key, command).await
    }
}

/// Run one store command under `deadline`, traced as a `db.query` span.
///
/// # Errors
/// `StoreError::Timeout` when the deadline passes first, otherwise the
/// command's own failure as `StoreError::Unavailable`.
pub(crate) async fn with_deadline<T, F>(
    deadline: Duration,
    operation: &'static str,
    key: &str,
    command: F,
) -> Result<T, StoreError>
where
    F: Future<Output = RedisResult<T>>,
{
    let span = info_span!(
        "db.query",
        db.system = "redis",
        db.operation = operation,
        db.key = key
    );
    match timeout(deadline, command.instrument(span)).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout),
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn put_session(
        &self,
        user_id: Uuid,
        session: &Session,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let key = session_key(user_id);
        let payload = encode_session(&key, session)?;
        let mut conn = self.conn.clone();
        self.run::<(), _>("SET", &key, conn.set_ex(&key, payload, ttl_seconds(ttl)))
            .await
    }

    async fn get_session(&self, user_id: Uuid) -> Result<Option<Session>, StoreError> {
        let key = session_key(user_id);
        let mut conn = self.conn.clone();
        let raw: Option<String> = self.run("GET", &key, conn.get(&key)).await?;
        raw.map(|raw| decode_session(&key, &raw)).transpose()
    }

    async fn replace_session(&self, user_id: Uuid, session: &Session) -> Result<bool, StoreError> {
        let key = session_key(user_id);
        let payload = encode_session(&key, session)?;
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg(payload).arg("XX").arg("KEEPTTL");
        let reply: Option<String> = self.run("SET", &key, cmd.query_async(&mut conn)).await?;
        Ok(reply.is_some())
    }

    async fn delete_session(&self, user_id: Uuid) -> Result<(), StoreError> {
        let key = session_key(user_id);
        let mut conn = self.conn.clone();
        let _removed: i64 = self.run("DEL", &key, conn.del(&key)).await?;
        Ok(())
    }

    async fn put_otp(&self, email: &str, code: &str, ttl: Duration) -> Result<(), StoreError> {
        let key = otp_key(email);
        let mut conn = self.conn.clone();
        self.run::<(), _>("SET", &key, conn.set_ex(&key, code, ttl_seconds(ttl)))
            .await
    }

    async fn get_otp(&self, email: &str) -> Result<Option<String>, StoreError> {
        let key = otp_key(email);
        let mut conn = self.conn.clone();
        self.run("GET", &key, conn.get(&key)).await
    }

    async fn delete_otp(&self, email: &str) -> Result<(), StoreError> {
        let key = otp_key(email);
        let mut conn = self.conn.clone();
        let _removed: i64 = self.run("DEL", &key, conn.del(&key)).await?;
        Ok(())
    }

    async fn consume_otp(&self, email: &str, code: &str) -> Result<OtpCheck, StoreError> {
        let key = otp_key(email);
        let mut conn = self.conn.clone();
        let mut invocation = self.consume_otp.prepare_invoke();
        invocation.key(&key).arg(code);
        let reply: i64 = self
            .run("EVALSHA", &key, invocation.invoke_async(&mut conn))
            .await?;
        Ok(OtpCheck::from_reply(reply))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let cmd = redis::cmd("PING");
        let _pong: String = self.run("PING", "", cmd.query_async(&mut conn)).await?;
        Ok(())
    }
}

/// In-process stores for tests. Production code always goes through Redis.
#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use p256::elliptic_curve::subtle::ConstantTimeEq;
    use std::collections::HashMap;
    use tokio::{sync::Mutex, time::Instant};

    /// Constant-time equality for passcodes.
    pub(crate) fn codes_match(stored: &str, presented: &str) -> bool {
        stored.as_bytes().ct_eq(presented.as_bytes()).into()
    }

    #[derive(Default)]
    pub(crate) struct MemoryStore {
        entries: Mutex<HashMap<String, (String, Instant)>>,
    }

    impl MemoryStore {
        async fn live(&self, key: &str) -> Option<String> {
            let mut entries = self.entries.lock().await;
            let expired = match entries.get(key) {
                Some((value, expires)) if *expires > Instant::now() => return Some(value.clone()),
                Some(_) => true,
                None => false,
            };
            if expired {
                entries.remove(key);
            }
            None
        }

        async fn set(&self, key: String, value: String, ttl: Duration) {
            let expires = Instant::now() + Duration::from_secs(ttl_seconds(ttl));
            self.entries.lock().await.insert(key, (value, expires));
        }

        pub(crate) async fn len(&self) -> usize {
            let now = Instant::now();
            self.entries
                .lock()
                .await
                .values()
                .filter(|(_, expires)| *expires > now)
                .count()
        }
    }

    #[async_trait]
    impl SessionStore for MemoryStore {
        async fn put_session(
            &self,
            user_id: Uuid,
            session: &Session,
            ttl: Duration,
        ) -> Result<(), StoreError> {
            let key = session_key(user_id);
            let payload = encode_session(&key, session)?;
            self.set(key, payload, ttl).await;
            Ok(())
        }

        async fn get_session(&self, user_id: Uuid) -> Result<Option<Session>, StoreError> {
            let key = session_key(user_id);
            self.live(&key)
                .await
                .map(|raw| decode_session(&key, &raw))
                .transpose()
        }

        async fn replace_session(
            &self,
            user_id: Uuid,
            session: &Session,
        ) -> Result<bool, StoreError> {
            let key = session_key(user_id);
            let payload = encode_session(&key, session)?;
            if self.live(&key).await.is_none() {
                return Ok(false);
            }
            let mut entries = self.entries.lock().await;
            match entries.get_mut(&key) {
                Some(entry) => {
                    entry.0 = payload;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn delete_session(&self, user_id: Uuid) -> Result<(), StoreError> {
            self.entries.lock().await.remove(&session_key(user_id));
            Ok(())
        }

        async fn put_otp(&self, email: &str, code: &str, ttl: Duration) -> Result<(), StoreError> {
            self.set(otp_key(email), code.to_string(), ttl).await;
            Ok(())
        }

        async fn get_otp(&self, email: &str) -> Result<Option<String>, StoreError> {
            Ok(self.live(&otp_key(email)).await)
        }

        async fn delete_otp(&self, email: &str) -> Result<(), StoreError> {
            self.entries.lock().await.remove(&otp_key(email));
            Ok(())
        }

        async fn consume_otp(&self, email: &str, code: &str) -> Result<OtpCheck, StoreError> {
            let key = otp_key(email);
            let mut entries = self.entries.lock().await;
            let check = match entries.get(&key) {
                Some((stored, expires)) if *expires > Instant::now() => {
                    if codes_match(stored, code) {
                        OtpCheck::Consumed
                    } else {
                        OtpCheck::Mismatch
                    }
                }
                _ => OtpCheck::Missing,
            };
            if check != OtpCheck::Mismatch {
                entries.remove(&key);
            }
            Ok(check)
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    /// Store whose backend is always down.
    pub(crate) struct UnreachableStore;

    fn down() -> StoreError {
        StoreError::Unavailable("connection refused".to_string())
    }

    #[async_trait]
    impl SessionStore for UnreachableStore {
        async fn put_session(&self, _: Uuid, _: &Session, _: Duration) -> Result<(), StoreError> {
            Err(down())
        }

        async fn get_session(&self, _: Uuid) -> Result<Option<Session>, StoreError> {
            Err(down())
        }

        async fn replace_session(&self, _: Uuid, _: &Session) -> Result<bool, StoreError> {
            Err(down())
        }

        async fn delete_session(&self, _: Uuid) -> Result<(), StoreError> {
            Err(down())
        }

        async fn put_otp(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
            Err(down())
        }

        async fn get_otp(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(down())
        }

        async fn delete_otp(&self, _: &str) -> Result<(), StoreError> {
            Err(down())
        }

        async fn consume_otp(&self, _: &str, _: &str) -> Result<OtpCheck, StoreError> {
            Err(down())
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Timeout)
        }
    }

    /// Store whose every command outlives its deadline.
    pub(crate) struct StalledStore;

    #[async_trait]
    impl SessionStore for StalledStore {
        async fn put_session(&self, _: Uuid, _: &Session, _: Duration) -> Result<(), StoreError> {
            Err(StoreError::Timeout)
        }

        async fn get_session(&self, _: Uuid) -> Result<Option<Session>, StoreError> {
            Err(StoreError::Timeout)
        }

        async fn replace_session(&self, _: Uuid, _: &Session) -> Result<bool, StoreError> {
            Err(StoreError::Timeout)
        }

        async fn delete_session(&self, _: Uuid) -> Result<(), StoreError> {
            Err(StoreError::Timeout)
        }

        async fn put_otp(&self, _: &str, _: &str, _: Duration) -> Result<(), StoreError> {
            Err(StoreError::Timeout)
        }

        async fn get_otp(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Timeout)
        }

        async fn delete_otp(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Timeout)
        }

        async fn consume_otp(&self, _: &str, _: &str) -> Result<OtpCheck, StoreError> {
            Err(StoreError::Timeout)
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Err(StoreError::Timeout)
        }
    }
}
