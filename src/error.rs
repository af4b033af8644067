//! Error types for the onboarding client.

use crate::session::state::Stage;

/// Top-level error type for the client.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Coarse error categories a front-end can branch on without matching
/// individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A required field was missing or the action is not legal right now.
    Validation,
    /// Network failure or non-success response. Retryable.
    Transport,
    /// The bearer token was rejected. The session has been reset.
    AuthExpired,
    /// Third-party authorization failed or was cancelled. Retryable.
    ProviderAuth,
    /// Notification channel failure. Never fatal to the session.
    Channel,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Transport => "transport",
            Self::AuthExpired => "auth_expired",
            Self::ProviderAuth => "provider_auth",
            Self::Channel => "channel",
        };
        write!(f, "{s}")
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) | Self::Session(_) => ErrorKind::Validation,
            Self::Api(e) => e.kind(),
            Self::Provider(_) => ErrorKind::ProviderAuth,
            Self::Channel(_) => ErrorKind::Channel,
        }
    }

    /// Whether the same action may simply be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transport | ErrorKind::ProviderAuth | ErrorKind::Channel
        ) || matches!(self, Self::Session(SessionError::Busy))
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Backend call errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Request to {service} failed: {reason}")]
    RequestFailed { service: String, reason: String },

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    #[error("{service} answered with code {code}: {body}")]
    Rejected {
        service: String,
        code: i64,
        body: String,
    },

    #[error("{service} rejected the bearer token")]
    Unauthorized { service: String },

    #[error("Invalid response from {service}: {reason}")]
    InvalidResponse { service: String, reason: String },

    #[error("Profile lookup returned code {code}")]
    ProfileRejected { code: i64 },
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized { .. } => ErrorKind::AuthExpired,
            _ => ErrorKind::Transport,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Orchestrator-level errors raised before any call is issued.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Action {action} is not allowed in stage {stage}")]
    InvalidStage { action: &'static str, stage: Stage },

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("No pending signup; request a code first")]
    NoPendingSignup,

    #[error("No workspace has been created in this session")]
    NoWorkspace,

    #[error("Another action is still in progress")]
    Busy,

    #[error("Session was reset while {action} was in flight; result discarded")]
    Superseded { action: &'static str },
}

/// Third-party identity provider errors, normalised at the adapter boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider {provider} is not configured")]
    NotConfigured { provider: String },

    #[error("Authorization with {provider} was cancelled")]
    Cancelled { provider: String },

    #[error("Consent denied by {provider}: {reason}")]
    ConsentDenied { provider: String, reason: String },

    #[error("Interaction required by {provider}")]
    InteractionRequired { provider: String },

    #[error("Token acquisition from {provider} failed: {reason}")]
    TokenFailed { provider: String, reason: String },
}

/// Notification channel errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to connect to {url}: {reason}")]
    ConnectFailed { url: String, reason: String },

    #[error("Failed to send on channel: {0}")]
    SendFailed(String),

    #[error("Channel receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Connection manager is no longer running")]
    ManagerStopped,
}

/// Result type alias for the client.
pub type Result<T> = std::result::Result<T, Error>;
