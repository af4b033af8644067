//! Wire types for the backend services.
//!
//! Every service answers with the `{code, result}` envelope; the helpers
//! here pull the interesting fields out of it.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::state::Invitee;

/// The five backend services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Auth,
    User,
    Workspace,
    Invite,
    Contacts,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::User => "user",
            Self::Workspace => "workspace",
            Self::Invite => "invite",
            Self::Contacts => "contacts",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestCode {
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyCode {
    pub code: String,
    pub method_id: String,
}

/// Result of a successful code verification.
#[derive(Debug)]
pub struct VerifiedUser {
    pub user_id: String,
    pub access_token: SecretString,
}

/// Profile lookup result. `code == 200` means the user service recognises
/// the token.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub code: i64,
    pub body: Value,
}

impl Profile {
    pub fn is_valid(&self) -> bool {
        self.code == 200
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewWorkspace {
    pub name: String,
    pub role: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedWorkspace {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceMember {
    pub id: String,
    pub peer_id: String,
    pub role: String,
}

/// Normalised contact-provider link forwarded to the contacts service.
#[derive(Clone, Serialize)]
pub struct ContactsLink {
    pub provider: String,
    pub email: String,
    pub phone: String,
    pub token: String,
}

impl std::fmt::Debug for ContactsLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContactsLink")
            .field("provider", &self.provider)
            .field("email", &self.email)
            .field("phone", &self.phone)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Idempotent "self" invite record created alongside the user profile.
#[derive(Debug, Clone, Serialize)]
pub struct InvitePlaceholder {
    pub hash: String,
    pub account: String,
}

impl InvitePlaceholder {
    pub fn for_account(account: &str) -> Self {
        Self {
            hash: String::new(),
            account: account.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InviteSender {
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InviteRequest {
    pub sender: InviteSender,
    pub receivers: Vec<Invitee>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    pub result: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MethodIdResult {
    pub method_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VerifyResult {
    pub user_id: String,
    pub token: TokenResult,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResult {
    pub access_token: String,
}

/// Pull the envelope `code`, falling back to the HTTP status.
pub(crate) fn envelope_code(body: &Value, http_status: u16) -> i64 {
    body.get("code")
        .and_then(Value::as_i64)
        .unwrap_or(i64::from(http_status))
}

/// What an envelope says about the call, whatever the HTTP status was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnvelopeOutcome {
    Success,
    /// The services' bearer extractor answers `{code, body}` with no
    /// `result` when the token does not verify.
    TokenRejected,
    Failed(i64),
}

/// Classify a decoded response body. Bodies without a numeric `code`
/// count as success.
pub(crate) fn envelope_outcome(body: &Value) -> EnvelopeOutcome {
    let Some(code) = body.get("code").and_then(Value::as_i64) else {
        return EnvelopeOutcome::Success;
    };
    if (200..300).contains(&code) {
        EnvelopeOutcome::Success
    } else if body.get("body").is_some() && body.get("result").is_none() {
        EnvelopeOutcome::TokenRejected
    } else {
        EnvelopeOutcome::Failed(code)
    }
}

/// Find the created workspace's id. The workspace service reports it as
/// `result.workspace_id` (with a numeric row id in `result.id`); older
/// deployments answer with a bare `{id}`.
pub(crate) fn workspace_id(body: &Value) -> Option<String> {
    let result = body.get("result").unwrap_or(body);
    ["workspace_id", "id"]
        .iter()
        .filter_map(|key| result.get(*key).or_else(|| body.get(*key)))
        .find_map(id_string)
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
