//! Credential resolution for connector nodes.
//!
//! The engine never stores secrets. A node references a credential by id and
//! the resolver hands back the decrypted data right before execution.

use crate::error::CredentialError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use weft_core::CredentialId;

/// The type of credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    /// OAuth 2.0 tokens.
    Oauth2,
    /// API key.
    ApiKey,
    /// Username and password.
    BasicAuth,
    /// Bearer token.
    BearerToken,
    /// Custom credential format.
    Custom,
}

/// Decrypted credential data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialData {
    /// OAuth 2.0 tokens.
    Oauth2 {
        access_token: String,
        refresh_token: Option<String>,
        token_type: String,
        expires_at: Option<DateTime<Utc>>,
        scope: Option<String>,
    },
    /// API key.
    ApiKey {
        key: String,
        header_name: Option<String>,
    },
    /// Basic authentication.
    BasicAuth { username: String, password: String },
    /// Bearer token.
    BearerToken { token: String },
    /// Custom credential data.
    Custom { data: serde_json::Value },
}

impl CredentialData {
    /// Creates OAuth2 credential data.
    #[must_use]
    pub fn oauth2(access_token: impl Into<String>) -> Self {
        Self::Oauth2 {
            access_token: access_token.into(),
            refresh_token: None,
            token_type: "Bearer".to_string(),
            expires_at: None,
            scope: None,
        }
    }

    /// Creates API key credential data.
    #[must_use]
    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey {
            key: key.into(),
            header_name: None,
        }
    }

    /// Creates basic auth credential data.
    #[must_use]
    pub fn basic_auth(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::BasicAuth {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Creates bearer token credential data.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::BearerToken {
            token: token.into(),
        }
    }

    /// Returns the credential type.
    #[must_use]
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Self::Oauth2 { .. } => CredentialType::Oauth2,
            Self::ApiKey { .. } => CredentialType::ApiKey,
            Self::BasicAuth { .. } => CredentialType::BasicAuth,
            Self::BearerToken { .. } => CredentialType::BearerToken,
            Self::Custom { .. } => CredentialType::Custom,
        }
    }

    /// Returns true if these are OAuth2 tokens past their expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        matches!(
            self,
            Self::Oauth2 {
                expires_at: Some(expires),
                ..
            } if *expires <= Utc::now()
        )
    }
}

/// Resolves a credential reference to its secrets.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolves the credential with the given id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown ids and `Revoked` for credentials that
    /// may no longer be used.
    async fn resolve(&self, id: CredentialId) -> Result<CredentialData, CredentialError>;
}

/// One entry of a static credential set, as loaded from a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialEntry {
    /// Credential id referenced by node settings.
    pub id: CredentialId,
    /// The secret data.
    pub data: CredentialData,
    /// Whether the credential has been revoked.
    #[serde(default)]
    pub revoked: bool,
}

/// A credential resolver backed by an in-memory map.
#[derive(Debug, Default)]
pub struct StaticCredentialResolver {
    entries: RwLock<HashMap<CredentialId, CredentialEntry>>,
}

impl StaticCredentialResolver {
    /// Creates an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a resolver from a list of entries.
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = CredentialEntry>) -> Self {
        let map = entries.into_iter().map(|e| (e.id, e)).collect();
        Self {
            entries: RwLock::new(map),
        }
    }

    /// Parses a JSON array of entries.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFormat` if the document is not a list of entries.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, CredentialError> {
        let entries: Vec<CredentialEntry> =
            serde_json::from_slice(bytes).map_err(|e| CredentialError::InvalidFormat {
                reason: e.to_string(),
            })?;
        Ok(Self::from_entries(entries))
    }

    /// Adds or replaces a credential.
    pub async fn insert(&self, id: CredentialId, data: CredentialData) {
        self.entries.write().await.insert(
            id,
            CredentialEntry {
                id,
                data,
                revoked: false,
            },
        );
    }

    /// Revokes a credential. Returns false if it does not exist.
    pub async fn revoke(&self, id: CredentialId) -> bool {
        match self.entries.write().await.get_mut(&id) {
            Some(entry) => {
                entry.revoked = true;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentialResolver {
    async fn resolve(&self, id: CredentialId) -> Result<CredentialData, CredentialError> {
        let entries = self.entries.read().await;
        let entry = entries.get(&id).ok_or(CredentialError::NotFound { id })?;
        if entry.revoked || entry.data.is_expired() {
            return Err(CredentialError::Revoked { id });
        }
        Ok(entry.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_types() {
        assert_eq!(
            CredentialData::oauth2("access_token_123").credential_type(),
            CredentialType::Oauth2
        );
        assert_eq!(
            CredentialData::api_key("my_api_key").credential_type(),
            CredentialType::ApiKey
        );
        assert_eq!(
            CredentialData::basic_auth("user", "pass").credential_type(),
            CredentialType::BasicAuth
        );
    }

    #[test]
    fn expired_oauth2_tokens() {
        let expired = CredentialData::Oauth2 {
            access_token: "token".to_string(),
            refresh_token: Some("refresh".to_string()),
            token_type: "Bearer".to_string(),
            expires_at: Some(Utc::now() - chrono::Duration::hours(1)),
            scope: None,
        };
        assert!(expired.is_expired());
        assert!(!CredentialData::oauth2("token").is_expired());
        assert!(!CredentialData::bearer("token").is_expired());
    }

    #[tokio::test]
    async fn resolves_known_credential() {
        let resolver = StaticCredentialResolver::new();
        let id = CredentialId::new();
        resolver.insert(id, CredentialData::bearer("abc")).await;

        let data = resolver.resolve(id).await.unwrap();
        assert_eq!(data, CredentialData::bearer("abc"));
    }

    #[tokio::test]
    async fn missing_and_revoked_credentials_fail() {
        let resolver = StaticCredentialResolver::new();
        let id = CredentialId::new();

        assert_eq!(
            resolver.resolve(id).await.unwrap_err(),
            CredentialError::NotFound { id }
        );

        resolver.insert(id, CredentialData::api_key("k")).await;
        assert!(resolver.revoke(id).await);
        assert_eq!(
            resolver.resolve(id).await.unwrap_err(),
            CredentialError::Revoked { id }
        );
    }

    #[test]
    fn loads_entries_from_json() {
        let id = CredentialId::new();
        let doc = serde_json::json!([
            { "id": id, "data": { "type": "bearer_token", "token": "t" } },
        ]);
        let bytes = serde_json::to_vec(&doc).unwrap();
        let resolver = StaticCredentialResolver::from_json_slice(&bytes).unwrap();

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let data = rt.block_on(resolver.resolve(id)).unwrap();
        assert_eq!(data, CredentialData::bearer("t"));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = StaticCredentialResolver::from_json_slice(b"{}").unwrap_err();
        assert!(matches!(err, CredentialError::InvalidFormat { .. }));
    }
}
