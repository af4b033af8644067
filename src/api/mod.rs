//! Backend API surface: the contract the orchestrator drives.
//!
//! The backend is five independent JSON-over-HTTP services (auth, user,
//! workspace, invite, contacts). Every call after verification carries
//! `Authorization: Bearer <token>`.

pub mod http;
pub mod types;

pub use http::HttpBackend;
pub use types::*;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::ApiError;

/// Calls the orchestrator issues against the backend.
///
/// Implementations map a rejected token to [`ApiError::Unauthorized`] so the
/// orchestrator can tell it from an ordinary failure. The services signal
/// that with HTTP 401/403 or, from their bearer extractor, with an HTTP 200
/// `{code, body}` envelope.
#[async_trait]
pub trait BackendApi: Send + Sync {
    /// POST auth/email. Returns the method id of the emailed code.
    async fn request_code(&self, request: &RequestCode) -> Result<String, ApiError>;

    /// POST verify/email.
    async fn verify_code(&self, request: &VerifyCode) -> Result<VerifiedUser, ApiError>;

    /// GET user.
    async fn get_profile(&self, token: &SecretString) -> Result<Profile, ApiError>;

    /// POST user.
    async fn create_user(&self, token: &SecretString, user: &NewUser) -> Result<(), ApiError>;

    /// DELETE user.
    async fn delete_user(&self, token: &SecretString) -> Result<(), ApiError>;

    /// POST workspace.
    async fn create_workspace(
        &self,
        token: &SecretString,
        workspace: &NewWorkspace,
    ) -> Result<CreatedWorkspace, ApiError>;

    /// POST workspace_util.
    async fn add_to_workspace(
        &self,
        token: &SecretString,
        member: &WorkspaceMember,
    ) -> Result<(), ApiError>;

    /// POST contacts.
    async fn link_contacts(&self, token: &SecretString, link: &ContactsLink)
    -> Result<(), ApiError>;

    /// PUT invite.
    async fn create_invite_placeholder(
        &self,
        token: &SecretString,
        placeholder: &InvitePlaceholder,
    ) -> Result<(), ApiError>;

    /// POST invite.
    async fn send_invite(&self, token: &SecretString, invite: &InviteRequest)
    -> Result<(), ApiError>;
}
