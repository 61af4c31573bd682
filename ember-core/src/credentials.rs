//! Credential collaborator: per-user provider keys.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Errors from the credential backend.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential backend error: {0}")]
    Backend(String),
}

/// Access to per-user provider keys stored by the data-access collaborator.
#[async_trait]
pub trait CredentialStore {
    async fn get_stored_key(&self, user_id: &str) -> Result<Option<String>, CredentialError>;
    async fn save_stored_key(&self, user_id: &str, key: &str) -> Result<(), CredentialError>;
    async fn delete_stored_key(&self, user_id: &str) -> Result<(), CredentialError>;
}

/// In-memory credential store.
#[derive(Debug, Default)]
pub struct InMemoryCredentials {
    keys: Mutex<HashMap<String, String>>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a key synchronously, for construction-time setup.
    pub fn with_key(self, user_id: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys
            .lock()
            .expect("credential map poisoned")
            .insert(user_id.into(), key.into());
        self
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentials {
    async fn get_stored_key(&self, user_id: &str) -> Result<Option<String>, CredentialError> {
        let keys = self
            .keys
            .lock()
            .map_err(|e| CredentialError::Backend(e.to_string()))?;
        Ok(keys.get(user_id).cloned())
    }

    async fn save_stored_key(&self, user_id: &str, key: &str) -> Result<(), CredentialError> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|e| CredentialError::Backend(e.to_string()))?;
        keys.insert(user_id.to_string(), key.to_string());
        Ok(())
    }

    async fn delete_stored_key(&self, user_id: &str) -> Result<(), CredentialError> {
        let mut keys = self
            .keys
            .lock()
            .map_err(|e| CredentialError::Backend(e.to_string()))?;
        keys.remove(user_id);
        Ok(())
    }
}
