//! The dashboard user data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A dashboard account. Either password-based (`password_hash` set) or
/// OAuth-linked (`google_id` set); both may coexist.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    /// Argon2 PHC string. Never exposed over the API.
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a password-based user; the caller supplies the already-hashed
    /// password.
    pub fn with_password(email: impl Into<String>, password_hash: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: crate::new_id(),
            email: email.into(),
            password_hash: Some(password_hash.into()),
            google_id: None,
            name: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_never_serializes() {
        let user = User::with_password("dev@example.com", "$argon2id$stub");
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert_eq!(json["email"], "dev@example.com");
    }
}
