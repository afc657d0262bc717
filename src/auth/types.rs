//! Session records and the identity handed to protected handlers.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Server-side record of a live login, stored under `session:{user_id}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub name: String,
    #[serde(rename = "userID")]
    pub user_id: Uuid,
    pub email: String,
    #[serde(rename = "avatarURL")]
    pub avatar_url: String,
}

/// Principal a session is created for, as returned by the user directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub avatar_url: String,
}

/// Profile fields that may change during a session's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Authenticated principal attached to a request's extensions.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub avatar_url: String,
}

impl From<Session> for Identity {
    fn from(session: Session) -> Self {
        Self {
            user_id: session.user_id,
            name: session.name,
            email: session.email,
            avatar_url: session.avatar_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use serde_json::json;

    #[test]
    fn session_uses_stored_field_names() -> Result<()> {
        let user_id = Uuid::new_v4();
        let session = Session {
            token: "t".to_string(),
            name: "Ana".to_string(),
            user_id,
            email: "ana@example.com".to_string(),
            avatar_url: "https://cdn.example.com/a.png".to_string(),
        };
        let value = serde_json::to_value(&session)?;
        assert_eq!(
            value,
            json!({
                "token": "t",
                "name": "Ana",
                "userID": user_id.to_string(),
                "email": "ana@example.com",
                "avatarURL": "https://cdn.example.com/a.png",
            })
        );

        let identity = Identity::from(session);
        assert_eq!(identity.user_id, user_id);
        assert_eq!(identity.email, "ana@example.com");
        Ok(())
    }
}
