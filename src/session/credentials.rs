//! Credential store: the bearer token and user id produced by verification.

use secrecy::{ExposeSecret, SecretString};

use crate::error::SessionError;

/// Holds the credentials read by every authenticated call.
///
/// The token is kept in a `SecretString` so it never shows up in `Debug`
/// output or logs.
#[derive(Debug, Default)]
pub struct CredentialStore {
    user_id: Option<String>,
    access_token: Option<SecretString>,
}

impl CredentialStore {
    pub fn store(&mut self, user_id: impl Into<String>, access_token: impl Into<String>) {
        self.user_id = Some(user_id.into());
        self.access_token = Some(SecretString::from(access_token.into()));
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// An owned copy of the bearer token for a call that outlives the lock
    /// guarding this store.
    pub fn bearer(&self) -> Result<SecretString, SessionError> {
        self.access_token
            .as_ref()
            .map(|t| SecretString::from(t.expose_secret().to_owned()))
            .ok_or(SessionError::NotAuthenticated)
    }

    pub fn clear(&mut self) {
        self.user_id = None;
        self.access_token = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_refuses_bearer() {
        let store = CredentialStore::default();
        assert!(!store.is_authenticated());
        assert!(matches!(store.bearer(), Err(SessionError::NotAuthenticated)));
    }

    #[test]
    fn store_and_clear() {
        let mut store = CredentialStore::default();
        store.store("u1", "t1");
        assert_eq!(store.user_id(), Some("u1"));
        assert_eq!(store.bearer().unwrap().expose_secret(), "t1");

        store.clear();
        assert!(store.user_id().is_none());
        assert!(!store.is_authenticated());
    }

    #[test]
    fn debug_redacts_token() {
        let mut store = CredentialStore::default();
        store.store("u1", "very-secret");
        let debug = format!("{store:?}");
        assert!(!debug.contains("very-secret"));
    }
}
