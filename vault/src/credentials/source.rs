use super::CredentialPayload;
use crate::error::{VaultError, VaultResult};
use async_trait::async_trait;
use std::collections::HashMap;

/// Resolves a credential reference to concrete credential material.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Look up `credential_id` as visible from `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Configuration`] when no credential with that
    /// id is visible.
    async fn resolve(&self, credential_id: &str, scope: &str) -> VaultResult<CredentialPayload>;
}

/// In-memory credential store.
///
/// Scoped entries shadow global ones with the same id.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialSource {
    global: HashMap<String, CredentialPayload>,
    scoped: HashMap<(String, String), CredentialPayload>,
}

impl StaticCredentialSource {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a credential visible from every scope.
    #[must_use]
    pub fn with(mut self, credential_id: impl Into<String>, payload: CredentialPayload) -> Self {
        self.global.insert(credential_id.into(), payload);
        self
    }

    /// Register a credential visible only from `scope`.
    #[must_use]
    pub fn with_scoped(
        mut self,
        scope: impl Into<String>,
        credential_id: impl Into<String>,
        payload: CredentialPayload,
    ) -> Self {
        self.scoped
            .insert((scope.into(), credential_id.into()), payload);
        self
    }
}

#[async_trait]
impl CredentialSource for StaticCredentialSource {
    async fn resolve(&self, credential_id: &str, scope: &str) -> VaultResult<CredentialPayload> {
        self.scoped
            .get(&(scope.to_string(), credential_id.to_string()))
            .or_else(|| self.global.get(credential_id))
            .cloned()
            .ok_or_else(|| {
                VaultError::configuration(format!(
                    "credential '{credential_id}' is not available in scope '{scope}'"
                ))
            })
    }
}
