//! The project data model and API-key material.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Prefix carried by every issued API key.
pub const API_KEY_PREFIX: &str = "le_";

/// Owner of a private namespace of traces and spans.
///
/// The plaintext API key is shown exactly once at creation/rotation time;
/// only its SHA-256 hash is persisted and the hash is what authenticating
/// requests are looked up by, so no plaintext comparison ever happens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Constant-time lookup key for the API key. Never exposed over the API.
    #[serde(skip_serializing)]
    pub api_key_hash: String,
    pub owner_email: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Create a project and return it together with the one-time plaintext
    /// API key.
    pub fn new(name: impl Into<String>, owner_email: impl Into<String>) -> (Self, String) {
        let key = generate_api_key();
        let now = Utc::now();
        let project = Self {
            id: crate::new_id(),
            name: name.into(),
            api_key_hash: hash_api_key(&key),
            owner_email: owner_email.into(),
            settings: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        };
        (project, key)
    }
}

/// Mint a fresh opaque API key.
pub fn generate_api_key() -> String {
    format!(
        "{}{}{}",
        API_KEY_PREFIX,
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

/// SHA-256 hex digest of an API key, the only form ever persisted.
pub fn hash_api_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_carry_the_prefix() {
        let key = generate_api_key();
        assert!(key.starts_with(API_KEY_PREFIX));
        assert!(key.len() > 40);
        assert_ne!(key, generate_api_key());
    }

    #[test]
    fn hash_is_deterministic_and_not_the_key() {
        let key = "le_abc123";
        let h1 = hash_api_key(key);
        let h2 = hash_api_key(key);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert!(!h1.contains("abc123"));
    }

    #[test]
    fn new_project_hash_matches_returned_key() {
        let (project, key) = Project::new("demo", "dev@example.com");
        assert_eq!(project.api_key_hash, hash_api_key(&key));
        assert_eq!(project.owner_email, "dev@example.com");
    }

    #[test]
    fn api_key_hash_never_serializes() {
        let (project, _) = Project::new("demo", "dev@example.com");
        let json = serde_json::to_value(&project).unwrap();
        assert!(json.get("apiKeyHash").is_none());
        assert_eq!(json["name"], "demo");
    }
}
