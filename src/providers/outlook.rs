//! Outlook contacts: popup authorization flow.
//!
//! 1. An interactive popup login establishes an account.
//! 2. A token is acquired silently against that account.
//! 3. If the silent call reports that interaction is required, one popup
//!    token request is made. There is no further retry.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{AccessToken, ContactTokenProvider, LinkedProvider, ProviderName};
use crate::error::ProviderError;

/// A signed-in Microsoft account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub home_account_id: String,
}

/// Error shape of the Microsoft authentication library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsalError {
    /// Error class, e.g. `InteractionRequiredAuthError`, `BrowserAuthError`.
    pub name: String,
    /// Machine-readable code, e.g. `user_cancelled`, `consent_required`.
    pub error_code: String,
    pub message: String,
}

impl MsalError {
    pub fn new(
        name: impl Into<String>,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            error_code: error_code.into(),
            message: message.into(),
        }
    }

    pub fn interaction_required(message: impl Into<String>) -> Self {
        Self::new("InteractionRequiredAuthError", "interaction_required", message)
    }

    pub fn user_cancelled() -> Self {
        Self::new("BrowserAuthError", "user_cancelled", "User cancelled the flow")
    }

    pub fn is_interaction_required(&self) -> bool {
        self.name == "InteractionRequiredAuthError"
            || matches!(
                self.error_code.as_str(),
                "interaction_required" | "consent_required" | "login_required"
            )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.error_code.as_str(),
            "user_cancelled" | "popup_window_error" | "access_denied"
        )
    }
}

impl std::fmt::Display for MsalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.error_code, self.message)
    }
}

/// The parts of the Microsoft authentication library this flow uses.
#[async_trait]
pub trait OutlookAuthClient: Send + Sync {
    /// Interactive login. `Ok(None)` means the popup closed without an
    /// account being selected.
    async fn login_popup(&self, scopes: &[String]) -> Result<Option<Account>, MsalError>;

    async fn acquire_token_silent(
        &self,
        account: &Account,
        scopes: &[String],
    ) -> Result<AccessToken, MsalError>;

    async fn acquire_token_popup(&self, scopes: &[String]) -> Result<AccessToken, MsalError>;
}

/// Outlook contacts provider.
pub struct OutlookContacts<C> {
    client: C,
    login_scopes: Vec<String>,
    token_scopes: Vec<String>,
}

impl<C: OutlookAuthClient> OutlookContacts<C> {
    pub fn new(client: C, login_scopes: Vec<String>, token_scopes: Vec<String>) -> Self {
        Self {
            client,
            login_scopes,
            token_scopes,
        }
    }

    async fn acquire(&self) -> Result<AccessToken, ProviderError> {
        let account = self
            .client
            .login_popup(&self.login_scopes)
            .await
            .map_err(map_msal_error)?
            .ok_or_else(|| ProviderError::Cancelled {
                provider: ProviderName::Outlook.to_string(),
            })?;
        debug!(account = %account.username, "Outlook login completed");

        match self
            .client
            .acquire_token_silent(&account, &self.token_scopes)
            .await
        {
            Ok(token) => Ok(token),
            Err(e) if e.is_interaction_required() => {
                info!(error = %e, "Silent token acquisition needs interaction; opening popup");
                self.client
                    .acquire_token_popup(&self.token_scopes)
                    .await
                    .map_err(|e| {
                        warn!(error = %e, "Outlook popup token acquisition failed");
                        map_msal_error(e)
                    })
            }
            Err(e) => {
                warn!(error = %e, "Outlook silent token acquisition failed");
                Err(map_msal_error(e))
            }
        }
    }
}

#[async_trait]
impl<C: OutlookAuthClient> ContactTokenProvider for OutlookContacts<C> {
    fn name(&self) -> ProviderName {
        ProviderName::Outlook
    }

    async fn acquire_contact_token(&self) -> Result<LinkedProvider, ProviderError> {
        let token = self.acquire().await?;
        Ok(LinkedProvider::from_token(ProviderName::Outlook, token))
    }
}

fn map_msal_error(err: MsalError) -> ProviderError {
    let provider = ProviderName::Outlook.to_string();
    if err.is_cancelled() {
        ProviderError::Cancelled { provider }
    } else if err.is_interaction_required() {
        ProviderError::InteractionRequired { provider }
    } else if err.error_code == "consent_denied" {
        ProviderError::ConsentDenied {
            provider,
            reason: err.message,
        }
    } else {
        ProviderError::TokenFailed {
            provider,
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use secrecy::ExposeSecret;

    use super::*;

    fn account() -> Account {
        Account {
            username: "ada@contoso.com".into(),
            home_account_id: "home-1".into(),
        }
    }

    /// Stub that counts calls to each step.
    struct StubMsal {
        login: Mutex<Option<Result<Option<Account>, MsalError>>>,
        silent: Mutex<Option<Result<AccessToken, MsalError>>>,
        popup: Mutex<Option<Result<AccessToken, MsalError>>>,
        silent_calls: AtomicUsize,
        popup_calls: AtomicUsize,
    }

    impl StubMsal {
        fn new(
            login: Result<Option<Account>, MsalError>,
            silent: Result<AccessToken, MsalError>,
            popup: Result<AccessToken, MsalError>,
        ) -> Self {
            Self {
                login: Mutex::new(Some(login)),
                silent: Mutex::new(Some(silent)),
                popup: Mutex::new(Some(popup)),
                silent_calls: AtomicUsize::new(0),
                popup_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OutlookAuthClient for StubMsal {
        async fn login_popup(&self, _scopes: &[String]) -> Result<Option<Account>, MsalError> {
            self.login.lock().unwrap().take().expect("login called twice")
        }

        async fn acquire_token_silent(
            &self,
            _account: &Account,
            _scopes: &[String],
        ) -> Result<AccessToken, MsalError> {
            self.silent_calls.fetch_add(1, Ordering::SeqCst);
            self.silent.lock().unwrap().take().expect("silent called twice")
        }

        async fn acquire_token_popup(&self, _scopes: &[String]) -> Result<AccessToken, MsalError> {
            self.popup_calls.fetch_add(1, Ordering::SeqCst);
            self.popup
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(MsalError::interaction_required("popup called twice")))
        }
    }

    fn outlook(stub: StubMsal) -> OutlookContacts<StubMsal> {
        OutlookContacts::new(
            stub,
            vec!["openid".into(), "Contacts.Read".into()],
            vec!["Contacts.Read".into()],
        )
    }

    #[tokio::test]
    async fn silent_success_skips_popup() {
        let provider = outlook(StubMsal::new(
            Ok(Some(account())),
            Ok(AccessToken::new("silent-token", None)),
            Err(MsalError::user_cancelled()),
        ));

        let linked = provider.acquire_contact_token().await.unwrap();
        assert_eq!(linked.provider, ProviderName::Outlook);
        assert_eq!(linked.token.expose_secret(), "silent-token");
        assert_eq!(provider.client.popup_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn interaction_required_triggers_exactly_one_popup() {
        let provider = outlook(StubMsal::new(
            Ok(Some(account())),
            Err(MsalError::interaction_required("consent needed")),
            Ok(AccessToken::new("popup-token", None)),
        ));

        let linked = provider.acquire_contact_token().await.unwrap();
        assert_eq!(linked.token.expose_secret(), "popup-token");
        assert_eq!(provider.client.silent_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.client.popup_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_popup_fallback_is_terminal_not_a_loop() {
        let provider = outlook(StubMsal::new(
            Ok(Some(account())),
            Err(MsalError::interaction_required("consent needed")),
            Err(MsalError::interaction_required("still needed")),
        ));

        let err = provider.acquire_contact_token().await.unwrap_err();
        assert!(matches!(err, ProviderError::InteractionRequired { .. }));
        assert_eq!(provider.client.popup_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_silent_errors_do_not_open_popup() {
        let provider = outlook(StubMsal::new(
            Ok(Some(account())),
            Err(MsalError::new("ServerError", "invalid_client", "bad client")),
            Ok(AccessToken::new("unused", None)),
        ));

        let err = provider.acquire_contact_token().await.unwrap_err();
        assert!(matches!(err, ProviderError::TokenFailed { .. }));
        assert_eq!(provider.client.popup_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn no_account_selected_is_cancelled() {
        let provider = outlook(StubMsal::new(
            Ok(None),
            Ok(AccessToken::new("unused", None)),
            Ok(AccessToken::new("unused", None)),
        ));

        let err = provider.acquire_contact_token().await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled { .. }));
        assert_eq!(provider.client.silent_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_login_is_recoverable_error() {
        let provider = outlook(StubMsal::new(
            Err(MsalError::user_cancelled()),
            Ok(AccessToken::new("unused", None)),
            Ok(AccessToken::new("unused", None)),
        ));

        let err = provider.acquire_contact_token().await.unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled { .. }));
    }

    #[test]
    fn interaction_required_detection() {
        assert!(MsalError::interaction_required("x").is_interaction_required());
        assert!(MsalError::new("ServerError", "consent_required", "x").is_interaction_required());
        assert!(!MsalError::user_cancelled().is_interaction_required());
    }
}
