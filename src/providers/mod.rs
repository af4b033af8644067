//! Provider token adapter: one capability over incompatible OAuth flows.
//!
//! Supports:
//! - **Google**: token client with a consent prompt, silent on later requests
//! - **Outlook**: popup login, silent token, popup fallback when interaction
//!   is required
//!
//! Each flow lives behind [`ContactTokenProvider`] and maps its own error
//! shapes to [`ProviderError`] before anything reaches the orchestrator.

pub mod google;
pub mod outlook;

pub use google::{GoogleContacts, GoogleTokenClient, GoogleTokenError, Prompt, TokenResponse};
pub use outlook::{Account, MsalError, OutlookAuthClient, OutlookContacts};

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Contact providers the backend knows how to import from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    Google,
    Outlook,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Outlook => "outlook",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(Self::Google),
            "outlook" | "microsoft" => Ok(Self::Outlook),
            other => Err(ProviderError::NotConfigured {
                provider: other.to_string(),
            }),
        }
    }
}

/// An access token as handed back by a provider SDK.
#[derive(Debug)]
pub struct AccessToken {
    pub token: SecretString,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: SecretString::from(token.into()),
            expires_at,
        }
    }
}

/// Canonical result of any provider flow. Consumed once by the contacts
/// link call and not retained.
#[derive(Debug)]
pub struct LinkedProvider {
    pub provider: ProviderName,
    pub token: SecretString,
    pub expires_at: Option<DateTime<Utc>>,
}

impl LinkedProvider {
    pub fn from_token(provider: ProviderName, token: AccessToken) -> Self {
        Self {
            provider,
            token: token.token,
            expires_at: token.expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// A source of contact-read tokens.
#[async_trait]
pub trait ContactTokenProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// Run the provider's authorization flow and return a fresh token.
    async fn acquire_contact_token(&self) -> Result<LinkedProvider, ProviderError>;
}

/// Registry the orchestrator asks for tokens by provider name.
#[derive(Default, Clone)]
pub struct ProviderTokenAdapter {
    providers: HashMap<ProviderName, Arc<dyn ContactTokenProvider>>,
}

impl ProviderTokenAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous one with the same name.
    pub fn register(&mut self, provider: Arc<dyn ContactTokenProvider>) {
        self.providers.insert(provider.name(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn ContactTokenProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn is_registered(&self, name: ProviderName) -> bool {
        self.providers.contains_key(&name)
    }

    /// Acquire a token from the named provider.
    pub async fn acquire_contact_token(
        &self,
        name: ProviderName,
    ) -> Result<LinkedProvider, ProviderError> {
        let provider = self
            .providers
            .get(&name)
            .ok_or_else(|| ProviderError::NotConfigured {
                provider: name.to_string(),
            })?;

        let linked = provider.acquire_contact_token().await?;
        if linked.is_expired() {
            return Err(ProviderError::TokenFailed {
                provider: name.to_string(),
                reason: "token already expired".to_string(),
            });
        }
        tracing::info!(provider = %name, "Contact provider token acquired");
        Ok(linked)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    struct FixedProvider(ProviderName);

    #[async_trait]
    impl ContactTokenProvider for FixedProvider {
        fn name(&self) -> ProviderName {
            self.0
        }

        async fn acquire_contact_token(&self) -> Result<LinkedProvider, ProviderError> {
            Ok(LinkedProvider::from_token(
                self.0,
                AccessToken::new(format!("{}-token", self.0), None),
            ))
        }
    }

    #[test]
    fn provider_name_parses() {
        assert_eq!("google".parse::<ProviderName>().unwrap(), ProviderName::Google);
        assert_eq!(" Outlook ".parse::<ProviderName>().unwrap(), ProviderName::Outlook);
        assert!("yahoo".parse::<ProviderName>().is_err());
    }

    #[test]
    fn provider_name_display_matches_serde() {
        for name in [ProviderName::Google, ProviderName::Outlook] {
            let json = serde_json::to_string(&name).unwrap();
            assert_eq!(format!("\"{name}\""), json);
        }
    }

    #[test]
    fn linked_provider_expiry() {
        let linked = |expires_at| {
            LinkedProvider::from_token(ProviderName::Google, AccessToken::new("t", expires_at))
        };
        assert!(linked(Some(Utc::now() - chrono::Duration::seconds(5))).is_expired());
        assert!(!linked(Some(Utc::now() + chrono::Duration::hours(1))).is_expired());
        assert!(!linked(None).is_expired());
    }

    struct StaleProvider;

    #[async_trait]
    impl ContactTokenProvider for StaleProvider {
        fn name(&self) -> ProviderName {
            ProviderName::Outlook
        }

        async fn acquire_contact_token(&self) -> Result<LinkedProvider, ProviderError> {
            Ok(LinkedProvider::from_token(
                ProviderName::Outlook,
                AccessToken::new("old", Some(Utc::now() - chrono::Duration::minutes(1))),
            ))
        }
    }

    #[tokio::test]
    async fn expired_token_is_never_handed_out() {
        let adapter = ProviderTokenAdapter::new().with(Arc::new(StaleProvider));
        let err = adapter
            .acquire_contact_token(ProviderName::Outlook)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::TokenFailed { .. }));
    }

    #[tokio::test]
    async fn adapter_dispatches_by_name() {
        let adapter = ProviderTokenAdapter::new()
            .with(Arc::new(FixedProvider(ProviderName::Google)))
            .with(Arc::new(FixedProvider(ProviderName::Outlook)));

        let linked = adapter
            .acquire_contact_token(ProviderName::Outlook)
            .await
            .unwrap();
        assert_eq!(linked.provider, ProviderName::Outlook);
        assert_eq!(linked.token.expose_secret(), "outlook-token");
    }

    #[tokio::test]
    async fn unregistered_provider_is_not_configured() {
        let adapter = ProviderTokenAdapter::new().with(Arc::new(FixedProvider(ProviderName::Google)));
        assert!(!adapter.is_registered(ProviderName::Outlook));
        let err = adapter
            .acquire_contact_token(ProviderName::Outlook)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured { .. }));
    }
}
