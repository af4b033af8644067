//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Base URLs for the five backend services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub auth: String,
    pub user: String,
    pub workspace: String,
    pub invite: String,
    pub contacts: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            auth: "http://127.0.0.1:4004/api".to_string(),
            user: "http://127.0.0.1:4000/api".to_string(),
            workspace: "http://127.0.0.1:4001/api".to_string(),
            invite: "http://127.0.0.1:4002/api".to_string(),
            contacts: "http://127.0.0.1:4003/api".to_string(),
        }
    }
}

impl ServiceEndpoints {
    /// Point every service at the same base URL (single gateway deployments).
    pub fn uniform(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            auth: base.clone(),
            user: base.clone(),
            workspace: base.clone(),
            invite: base.clone(),
            contacts: base,
        }
    }
}

/// Timing for the notification channel's liveness checks and reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay between a close event and the liveness check it schedules.
    pub liveness_delay: Duration,
    /// Delay between a failed liveness check and the reconnect attempt.
    pub reconnect_delay: Duration,
    /// Period of the checker started after a channel error.
    pub check_interval: Duration,
    /// Consecutive failed attempts after which reconnecting stops.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl ReconnectPolicy {
    /// Same delay for every timer, unbounded attempts.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            liveness_delay: interval,
            reconnect_delay: interval,
            check_interval: interval,
            max_attempts: None,
        }
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoints: ServiceEndpoints,
    /// WebSocket URL of the notification channel.
    pub channel_url: String,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub google: GoogleConfig,
    pub outlook: OutlookConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoints: ServiceEndpoints::default(),
            channel_url: "ws://127.0.0.1:5000/ws".to_string(),
            http_timeout: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            google: GoogleConfig::default(),
            outlook: OutlookConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Build configuration from `ONBOARD_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ServiceEndpoints::default();
        let endpoints = ServiceEndpoints {
            auth: get("ONBOARD_AUTH_URL").unwrap_or(defaults.auth),
            user: get("ONBOARD_USER_URL").unwrap_or(defaults.user),
            workspace: get("ONBOARD_WORKSPACE_URL").unwrap_or(defaults.workspace),
            invite: get("ONBOARD_INVITE_URL").unwrap_or(defaults.invite),
            contacts: get("ONBOARD_CONTACTS_URL").unwrap_or(defaults.contacts),
        };

        let channel_url =
            get("ONBOARD_CHANNEL_URL").unwrap_or_else(|| "ws://127.0.0.1:5000/ws".to_string());
        if !(channel_url.starts_with("ws://") || channel_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue {
                key: "ONBOARD_CHANNEL_URL".to_string(),
                message: format!("expected a ws:// or wss:// URL, got {channel_url}"),
            });
        }

        let timeout_secs: u64 = parse_var(&get, "ONBOARD_HTTP_TIMEOUT_SECS", 30)?;
        let check_secs: u64 = parse_var(&get, "ONBOARD_CHECK_INTERVAL_SECS", 5)?;
        if check_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ONBOARD_CHECK_INTERVAL_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let mut reconnect = ReconnectPolicy::fixed(Duration::from_secs(check_secs));
        if let Some(raw) = get("ONBOARD_MAX_RECONNECT_ATTEMPTS") {
            let max = raw.trim().parse::<u32>().map_err(|e| ConfigError::InvalidValue {
                key: "ONBOARD_MAX_RECONNECT_ATTEMPTS".to_string(),
                message: e.to_string(),
            })?;
            reconnect = reconnect.with_max_attempts(max);
        }

        Ok(Self {
            endpoints,
            channel_url,
            http_timeout: Duration::from_secs(timeout_secs),
            reconnect,
            google: GoogleConfig::from_lookup(&get),
            outlook: OutlookConfig::from_lookup(&get),
        })
    }
}

/// Google token-client settings (consent-prompt flow).
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: Option<String>,
    pub scopes: Vec<String>,
    pub authorize_url: String,
    pub redirect_uri: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            scopes: vec!["https://www.googleapis.com/auth/contacts.readonly".to_string()],
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            redirect_uri: "http://localhost:3000".to_string(),
        }
    }
}

impl GoogleConfig {
    fn from_lookup<F>(get: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            client_id: get("GOOGLE_CLIENT_ID").filter(|s| !s.is_empty()),
            scopes: get("GOOGLE_SCOPES").map(split_scopes).unwrap_or(defaults.scopes),
            authorize_url: defaults.authorize_url,
            redirect_uri: get("GOOGLE_REDIRECT_URI").unwrap_or(defaults.redirect_uri),
        }
    }
}

/// Microsoft identity settings (popup authorization flow).
#[derive(Debug, Clone)]
pub struct OutlookConfig {
    pub client_id: Option<String>,
    pub authority: String,
    pub redirect_uri: String,
    /// Scopes requested by the interactive login.
    pub login_scopes: Vec<String>,
    /// Scopes requested when acquiring the contacts token.
    pub token_scopes: Vec<String>,
}

impl Default for OutlookConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            authority: "https://login.microsoftonline.com/common".to_string(),
            redirect_uri: "http://localhost:3000/authorize".to_string(),
            login_scopes: split_scopes("openid profile User.Read Contacts.Read".to_string()),
            token_scopes: split_scopes("User.Read Contacts.Read".to_string()),
        }
    }
}

impl OutlookConfig {
    fn from_lookup<F>(get: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            client_id: get("OUTLOOK_CLIENT_ID").filter(|s| !s.is_empty()),
            authority: get("OUTLOOK_AUTHORITY").unwrap_or(defaults.authority),
            redirect_uri: get("OUTLOOK_REDIRECT_URI").unwrap_or(defaults.redirect_uri),
            login_scopes: defaults.login_scopes,
            token_scopes: defaults.token_scopes,
        }
    }
}

fn split_scopes(raw: String) -> Vec<String> {
    raw.split([' ', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_var<F, T>(get: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.endpoints, ServiceEndpoints::default());
        assert_eq!(config.channel_url, "ws://127.0.0.1:5000/ws");
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.reconnect, ReconnectPolicy::fixed(Duration::from_secs(5)));
        assert!(config.google.client_id.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("ONBOARD_USER_URL", "https://api.example.com/user"),
            ("ONBOARD_CHANNEL_URL", "wss://push.example.com/ws"),
            ("ONBOARD_CHECK_INTERVAL_SECS", "2"),
            ("ONBOARD_MAX_RECONNECT_ATTEMPTS", "10"),
            ("GOOGLE_CLIENT_ID", "abc.apps.googleusercontent.com"),
        ]))
        .unwrap();

        assert_eq!(config.endpoints.user, "https://api.example.com/user");
        assert_eq!(config.channel_url, "wss://push.example.com/ws");
        assert_eq!(config.reconnect.check_interval, Duration::from_secs(2));
        assert_eq!(config.reconnect.max_attempts, Some(10));
        assert_eq!(
            config.google.client_id.as_deref(),
            Some("abc.apps.googleusercontent.com")
        );
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[("ONBOARD_HTTP_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "ONBOARD_HTTP_TIMEOUT_SECS"));

        let err = ClientConfig::from_lookup(lookup(&[("ONBOARD_CHECK_INTERVAL_SECS", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn non_websocket_channel_url_is_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[("ONBOARD_CHANNEL_URL", "http://x/ws")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn scopes_split_on_spaces_and_commas() {
        assert_eq!(
            split_scopes("a b,c  ,d".to_string()),
            vec!["a", "b", "c", "d"]
        );
    }

    #[test]
    fn uniform_endpoints_strip_trailing_slash() {
        let endpoints = ServiceEndpoints::uniform("http://localhost:9000/api/");
        assert_eq!(endpoints.auth, "http://localhost:9000/api");
        assert_eq!(endpoints.contacts, "http://localhost:9000/api");
    }
}
