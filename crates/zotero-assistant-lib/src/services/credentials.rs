// Credential store
// Provider API keys for bring-your-own-key models, encrypted at rest

use async_trait::async_trait;

use super::crypto::KeySealer;
use crate::error::{AssistantError, AssistantResult};
use crate::models::request::ModelProvider;
use crate::repositories::ApiKeyRepository;

/// Source of provider API keys
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Plaintext key of a provider, `None` when the user has not set one
    async fn api_key(&self, provider: &ModelProvider) -> AssistantResult<Option<String>>;
}

/// SQLite-backed store sealing keys with AES-256-GCM
pub struct EncryptedKeyStore {
    repo: ApiKeyRepository,
    sealer: KeySealer,
}

impl EncryptedKeyStore {
    /// Store keyed to this machine
    pub fn new(repo: ApiKeyRepository) -> Self {
        Self::with_sealer(repo, KeySealer::for_machine())
    }

    pub fn with_sealer(repo: ApiKeyRepository, sealer: KeySealer) -> Self {
        Self { repo, sealer }
    }

    pub fn store_key(&self, provider: &ModelProvider, api_key: &str) -> AssistantResult<()> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(AssistantError::InvalidConfig(format!(
                "Empty API key for {}",
                provider
            )));
        }

        let sealed = self
            .sealer
            .seal(api_key)
            .map_err(|e| AssistantError::Encryption(e.to_string()))?;
        self.repo
            .store_api_key(&provider.to_string(), &sealed)
            .map_err(AssistantError::Storage)?;

        log::info!("Stored API key for {}", provider);
        Ok(())
    }

    pub fn delete_key(&self, provider: &ModelProvider) -> AssistantResult<bool> {
        self.repo
            .delete_api_key(&provider.to_string())
            .map_err(AssistantError::Storage)
    }

    pub fn has_key(&self, provider: &ModelProvider) -> AssistantResult<bool> {
        self.repo
            .has_api_key(&provider.to_string())
            .map_err(AssistantError::Storage)
    }
}

#[async_trait]
impl CredentialStore for EncryptedKeyStore {
    async fn api_key(&self, provider: &ModelProvider) -> AssistantResult<Option<String>> {
        let Some(sealed) = self
            .repo
            .get_api_key(&provider.to_string())
            .map_err(AssistantError::Storage)?
        else {
            return Ok(None);
        };

        self.sealer
            .open(&sealed)
            .map(Some)
            .map_err(|e| AssistantError::Encryption(e.to_string()))
    }
}
