//! Google contacts: consent-prompt token flow.
//!
//! The token client hands back an access token directly. The first request
//! in a session shows the account chooser and consent screen; once a token
//! has been granted, later requests skip both.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{AccessToken, ContactTokenProvider, LinkedProvider, ProviderName};
use crate::error::ProviderError;

/// Prompt mode passed to the token client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Show the account chooser and ask for consent.
    Consent,
    /// Reuse the existing grant without any dialog.
    Silent,
}

impl Prompt {
    /// Value of the `prompt` request parameter.
    pub fn as_param(&self) -> &'static str {
        match self {
            Self::Consent => "consent",
            Self::Silent => "",
        }
    }
}

/// What the token client's callback receives.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl TokenResponse {
    pub fn granted(access_token: impl Into<String>, expires_in: Option<i64>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            expires_in,
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Errors raised by the token client itself rather than through the
/// callback (popup blocked, popup closed, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleTokenError {
    /// `popup_failed_to_open`, `popup_closed` or `unknown`.
    pub kind: String,
    pub message: String,
}

impl GoogleTokenError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// The token-client half of the Google identity SDK.
#[async_trait]
pub trait GoogleTokenClient: Send + Sync {
    async fn request_access_token(
        &self,
        scopes: &[String],
        prompt: Prompt,
    ) -> Result<TokenResponse, GoogleTokenError>;
}

/// Google contacts provider.
pub struct GoogleContacts<C> {
    client: C,
    scopes: Vec<String>,
    /// Whether a grant exists in this session (decides the prompt mode).
    granted: Mutex<bool>,
}

impl<C: GoogleTokenClient> GoogleContacts<C> {
    pub fn new(client: C, scopes: Vec<String>) -> Self {
        Self {
            client,
            scopes,
            granted: Mutex::new(false),
        }
    }

    async fn request(&self) -> Result<AccessToken, ProviderError> {
        let mut granted = self.granted.lock().await;
        let prompt = if *granted { Prompt::Silent } else { Prompt::Consent };
        debug!(prompt = ?prompt, "Requesting Google access token");

        let result = self
            .client
            .request_access_token(&self.scopes, prompt)
            .await
            .map_err(map_client_error)
            .and_then(token_from_response);

        match result {
            Ok(token) => {
                *granted = true;
                Ok(token)
            }
            Err(e) => {
                // A failed silent request means the grant is gone; the next
                // attempt has to ask again.
                *granted = false;
                warn!(error = %e, "Google token request failed");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<C: GoogleTokenClient> ContactTokenProvider for GoogleContacts<C> {
    fn name(&self) -> ProviderName {
        ProviderName::Google
    }

    async fn acquire_contact_token(&self) -> Result<LinkedProvider, ProviderError> {
        let token = self.request().await?;
        Ok(LinkedProvider::from_token(ProviderName::Google, token))
    }
}

fn token_from_response(resp: TokenResponse) -> Result<AccessToken, ProviderError> {
    if let Some(error) = resp.error {
        let reason = resp.error_description.unwrap_or_else(|| error.clone());
        return Err(match error.as_str() {
            "access_denied" => ProviderError::ConsentDenied {
                provider: ProviderName::Google.to_string(),
                reason,
            },
            "interaction_required" | "consent_required" | "login_required" => {
                ProviderError::InteractionRequired {
                    provider: ProviderName::Google.to_string(),
                }
            }
            _ => ProviderError::TokenFailed {
                provider: ProviderName::Google.to_string(),
                reason,
            },
        });
    }

    let token = resp
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ProviderError::TokenFailed {
            provider: ProviderName::Google.to_string(),
            reason: "callback carried no access token".to_string(),
        })?;
    let expires_at = resp
        .expires_in
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
    Ok(AccessToken::new(token, expires_at))
}

fn map_client_error(err: GoogleTokenError) -> ProviderError {
    match err.kind.as_str() {
        "popup_closed" => ProviderError::Cancelled {
            provider: ProviderName::Google.to_string(),
        },
        _ => ProviderError::TokenFailed {
            provider: ProviderName::Google.to_string(),
            reason: format!("{}: {}", err.kind, err.message),
        },
    }
}
