//! Session orchestrator: drives the onboarding state machine.
//!
//! Every action follows the same shape:
//! 1. Take the transition lock (`try_lock`; a pending action means `Busy`).
//! 2. Check guards against a read of the session, then release the read.
//! 3. Issue the backend calls in order. Nothing is written yet.
//! 4. Commit under a write lock, but only if the session generation still
//!    matches the one seen in step 2. A reset in the meantime discards the
//!    result with `Superseded`.
//!
//! A failed call leaves the stage where it was so the same action can be
//! retried. A rejected bearer token resets the session and stops the channel.

use std::future::Future;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};

use super::events::{EVENT_BUFFER, SessionEvent};
use super::state::{Invitee, Session, SessionView, Stage, Workspace};
use crate::api::{
    BackendApi, ContactsLink, InvitePlaceholder, InviteRequest, InviteSender, NewUser,
    NewWorkspace, Profile, RequestCode, VerifyCode, WorkspaceMember,
};
use crate::connection::ChannelControl;
use crate::error::{ApiError, Error, Result, SessionError};
use crate::providers::{ProviderName, ProviderTokenAdapter};

pub struct Orchestrator {
    api: Arc<dyn BackendApi>,
    providers: ProviderTokenAdapter,
    channel: Arc<dyn ChannelControl>,
    session: RwLock<Session>,
    /// Held for the whole of one action.
    transition: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl Orchestrator {
    pub fn new(
        api: Arc<dyn BackendApi>,
        providers: ProviderTokenAdapter,
        channel: Arc<dyn ChannelControl>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            api,
            providers,
            channel,
            session: RwLock::new(Session::default()),
            transition: Mutex::new(()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn stage(&self) -> Stage {
        self.session.read().await.stage
    }

    pub async fn view(&self) -> SessionView {
        self.session.read().await.view()
    }

    pub fn channel_active(&self) -> bool {
        self.channel.is_active()
    }

    /// Set the phone number forwarded with contact-provider links.
    pub async fn set_phone(&self, phone: &str) {
        self.session.write().await.phone = phone.trim().to_string();
    }

    /// Anonymous/AwaitingOtp → AwaitingOtp. Emails a one-time code. Calling
    /// it again while a code is pending replaces that code.
    pub async fn request_signup(&self, email: &str) -> Result<()> {
        self.run("request_signup", |generation| self.signup(generation, email))
            .await
    }

    /// AwaitingOtp → Authenticated, once the user service accepts the token.
    ///
    /// A verified user without a profile stays in AwaitingOtp with the token
    /// retained; [`create_user`](Self::create_user) completes the step.
    pub async fn submit_otp(&self, code: &str) -> Result<()> {
        self.run("submit_otp", |generation| self.verify(generation, code))
            .await
    }

    /// Create the user profile plus the self invite record.
    pub async fn create_user(&self, first_name: &str, last_name: &str) -> Result<()> {
        self.run("create_user", |generation| {
            self.new_user(generation, first_name, last_name)
        })
        .await
    }

    /// Authenticated → WorkspaceCreated. Repeatable; every call creates a
    /// new workspace record and the latest one becomes the session's.
    pub async fn create_workspace(
        &self,
        name: &str,
        role: &str,
        description: &str,
    ) -> Result<Workspace> {
        self.run("create_workspace", |generation| {
            self.new_workspace(generation, name, role, description)
        })
        .await
    }

    /// Add a peer to the session's workspace.
    pub async fn add_to_workspace(&self, peer_id: &str, role: &str) -> Result<()> {
        self.run("add_to_workspace", |generation| {
            self.add_member(generation, peer_id, role)
        })
        .await
    }

    /// WorkspaceCreated → ContactsLinked. Runs the provider's authorization
    /// flow and forwards the token to the contacts service.
    pub async fn link_provider(&self, provider: ProviderName) -> Result<()> {
        self.run("link_provider", |generation| self.link(generation, provider))
            .await
    }

    /// Invite someone on behalf of the signed-in user.
    pub async fn send_invite(&self, invitee: Invitee) -> Result<()> {
        self.run("send_invite", |generation| self.invite(generation, invitee))
            .await
    }

    /// Fetch the profile again. Never changes the stage.
    pub async fn refresh_profile(&self) -> Result<Profile> {
        self.run("refresh_profile", |generation| self.profile(generation))
            .await
    }

    /// Delete the account, then reset to Anonymous and stop the channel.
    pub async fn delete_account(&self) -> Result<()> {
        self.run("delete_account", |generation| self.delete(generation))
            .await
    }

    /// Forget the session locally. Never busy: any in-flight action is
    /// invalidated and its result discarded.
    pub async fn sign_out(&self) {
        self.reset_session("sign_out", None).await;
        self.emit(SessionEvent::succeeded("sign_out"));
    }

    async fn run<T, F, Fut>(&self, action: &'static str, op: F) -> Result<T>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Ok(_guard) = self.transition.try_lock() else {
            let err = Error::from(SessionError::Busy);
            debug!(action, "Rejected while another action is pending");
            self.emit(SessionEvent::failed(action, &err));
            return Err(err);
        };

        let generation = self.session.read().await.generation;
        let result = op(generation).await;

        match &result {
            Ok(_) => {
                debug!(action, "Action succeeded");
                self.emit(SessionEvent::succeeded(action));
            }
            Err(err) => {
                if matches!(err, Error::Api(e) if e.is_unauthorized()) {
                    self.expire(generation).await;
                }
                warn!(action, kind = %err.kind(), error = %err, "Action failed");
                self.emit(SessionEvent::failed(action, err));
            }
        }
        result
    }

    async fn signup(&self, generation: u64, email: &str) -> Result<()> {
        let email = required("email", email)?;
        self.require_stage("request_signup", |s| {
            matches!(s, Stage::Anonymous | Stage::AwaitingOtp)
        })
        .await?;

        let method_id = self
            .api
            .request_code(&RequestCode {
                email: email.clone(),
            })
            .await?;

        self.commit("request_signup", generation, |session| {
            advance(session, "request_signup", Stage::AwaitingOtp)?;
            // A resent code starts verification over, possibly for another address.
            session.credentials.clear();
            session.email = email;
            session.method_id = Some(method_id);
            Ok(())
        })
        .await?;
        info!("Verification code requested");
        Ok(())
    }

    async fn verify(&self, generation: u64, code: &str) -> Result<()> {
        let method_id = {
            let session = self.session.read().await;
            match session.stage {
                Stage::AwaitingOtp => session
                    .method_id
                    .clone()
                    .ok_or(SessionError::NoPendingSignup)?,
                Stage::Anonymous => return Err(SessionError::NoPendingSignup.into()),
                stage => {
                    return Err(SessionError::InvalidStage {
                        action: "submit_otp",
                        stage,
                    }
                    .into());
                }
            }
        };
        let code = required("code", code)?;

        let verified = self
            .api
            .verify_code(&VerifyCode { code, method_id })
            .await?;
        let user_id = verified.user_id;
        let token = verified.access_token;

        // Keep the credentials even if the profile check below fails.
        self.commit("submit_otp", generation, |session| {
            session
                .credentials
                .store(user_id.as_str(), token.expose_secret());
            Ok(())
        })
        .await?;

        let profile = self.api.get_profile(&token).await?;
        if !profile.is_valid() {
            info!(code = profile.code, "Verified user has no profile yet");
            return Err(ApiError::ProfileRejected { code: profile.code }.into());
        }

        self.commit("submit_otp", generation, |session| {
            advance(session, "submit_otp", Stage::Authenticated)?;
            apply_profile(session, &profile.body);
            Ok(())
        })
        .await?;

        info!(user_id = %user_id, "User authenticated");
        self.start_channel(generation, &user_id).await;
        Ok(())
    }

    async fn new_user(&self, generation: u64, first_name: &str, last_name: &str) -> Result<()> {
        let first_name = required("first_name", first_name)?;
        let last_name = required("last_name", last_name)?;
        let (token, email, user_id) = {
            let session = self.session.read().await;
            if session.stage == Stage::Anonymous {
                return Err(SessionError::NotAuthenticated.into());
            }
            (
                session.credentials.bearer()?,
                session.email.clone(),
                session.credentials.user_id().unwrap_or_default().to_string(),
            )
        };

        self.api
            .create_user(
                &token,
                &NewUser {
                    first_name: first_name.clone(),
                    last_name: last_name.clone(),
                    email: email.clone(),
                },
            )
            .await?;
        self.api
            .create_invite_placeholder(&token, &InvitePlaceholder::for_account(&email))
            .await?;

        let newly_authenticated = self
            .commit("create_user", generation, |session| {
                session.first_name = first_name;
                session.last_name = last_name;
                let was = session.stage;
                advance(session, "create_user", Stage::Authenticated)?;
                Ok(was == Stage::AwaitingOtp)
            })
            .await?;

        if newly_authenticated {
            info!(user_id = %user_id, "Profile created; user authenticated");
            self.start_channel(generation, &user_id).await;
        }
        Ok(())
    }

    async fn new_workspace(
        &self,
        generation: u64,
        name: &str,
        role: &str,
        description: &str,
    ) -> Result<Workspace> {
        let name = required("name", name)?;
        let role = required("role", role)?;
        let token = self.authenticated_token("create_workspace").await?;

        let request = NewWorkspace {
            name,
            role,
            description: description.trim().to_string(),
        };
        let created = self.api.create_workspace(&token, &request).await?;
        let workspace = Workspace {
            id: created.id,
            name: request.name,
            role: request.role,
            description: request.description,
        };

        self.commit("create_workspace", generation, |session| {
            advance(session, "create_workspace", Stage::WorkspaceCreated)?;
            session.workspace = Some(workspace.clone());
            Ok(())
        })
        .await?;
        info!(workspace_id = %workspace.id, "Workspace created");
        Ok(workspace)
    }

    async fn add_member(&self, generation: u64, peer_id: &str, role: &str) -> Result<()> {
        let peer_id = required("peer_id", peer_id)?;
        let role = required("role", role)?;
        let (token, workspace_id) = {
            let session = self.session.read().await;
            if !session.stage.has_workspace() {
                return Err(SessionError::InvalidStage {
                    action: "add_to_workspace",
                    stage: session.stage,
                }
                .into());
            }
            let workspace = session.workspace.as_ref().ok_or(SessionError::NoWorkspace)?;
            (session.credentials.bearer()?, workspace.id.clone())
        };

        self.api
            .add_to_workspace(
                &token,
                &WorkspaceMember {
                    id: workspace_id,
                    peer_id,
                    role,
                },
            )
            .await?;
        self.commit("add_to_workspace", generation, |_| Ok(())).await
    }

    async fn link(&self, generation: u64, provider: ProviderName) -> Result<()> {
        let (token, email, phone) = {
            let session = self.session.read().await;
            if !session.stage.has_workspace() {
                return Err(SessionError::InvalidStage {
                    action: "link_provider",
                    stage: session.stage,
                }
                .into());
            }
            (
                session.credentials.bearer()?,
                session.email.clone(),
                session.phone.clone(),
            )
        };

        let linked = self.providers.acquire_contact_token(provider).await?;
        let link = ContactsLink {
            provider: linked.provider.to_string(),
            email,
            phone,
            token: linked.token.expose_secret().to_string(),
        };
        self.api.link_contacts(&token, &link).await?;

        self.commit("link_provider", generation, |session| {
            advance(session, "link_provider", Stage::ContactsLinked)
        })
        .await?;
        info!(provider = %provider, "Contacts linked");
        Ok(())
    }

    async fn invite(&self, generation: u64, invitee: Invitee) -> Result<()> {
        required("email", &invitee.email)?;
        let (token, sender) = {
            let session = self.session.read().await;
            if session.stage != Stage::ContactsLinked {
                return Err(SessionError::InvalidStage {
                    action: "send_invite",
                    stage: session.stage,
                }
                .into());
            }
            (
                session.credentials.bearer()?,
                InviteSender {
                    first_name: session.first_name.clone(),
                    last_name: session.last_name.clone(),
                },
            )
        };

        let request = InviteRequest {
            sender,
            receivers: vec![normalize_invitee(invitee)],
        };
        self.api.send_invite(&token, &request).await?;
        self.commit("send_invite", generation, |_| Ok(())).await
    }

    async fn profile(&self, generation: u64) -> Result<Profile> {
        let token = self.session.read().await.credentials.bearer()?;
        let profile = self.api.get_profile(&token).await?;
        self.commit("refresh_profile", generation, |session| {
            if profile.is_valid() {
                apply_profile(session, &profile.body);
            }
            Ok(())
        })
        .await?;
        Ok(profile)
    }

    async fn delete(&self, generation: u64) -> Result<()> {
        let token = self.authenticated_token("delete_account").await?;
        self.api.delete_user(&token).await?;
        // The account is gone either way; only reset if nobody else has.
        self.reset_session("delete_account", Some(generation)).await;
        info!("Account deleted");
        Ok(())
    }

    async fn require_stage(
        &self,
        action: &'static str,
        allowed: impl Fn(Stage) -> bool,
    ) -> std::result::Result<(), SessionError> {
        let stage = self.session.read().await.stage;
        if allowed(stage) {
            Ok(())
        } else {
            Err(SessionError::InvalidStage { action, stage })
        }
    }

    /// Bearer token for actions that need a confirmed profile.
    async fn authenticated_token(
        &self,
        action: &'static str,
    ) -> std::result::Result<SecretString, SessionError> {
        let session = self.session.read().await;
        match session.stage {
            Stage::Anonymous => Err(SessionError::NotAuthenticated),
            stage if !stage.is_authenticated() => {
                Err(SessionError::InvalidStage { action, stage })
            }
            _ => session.credentials.bearer(),
        }
    }

    /// Apply `update` if the session has not been reset since `generation`,
    /// and report any stage change.
    async fn commit<T>(
        &self,
        action: &'static str,
        generation: u64,
        update: impl FnOnce(&mut Session) -> std::result::Result<T, SessionError>,
    ) -> Result<T> {
        let (value, from, to) = {
            let mut session = self.session.write().await;
            if session.generation != generation {
                return Err(SessionError::Superseded { action }.into());
            }
            let from = session.stage;
            let value = update(&mut session)?;
            (value, from, session.stage)
        };
        if from != to {
            info!(from = %from, to = %to, "Session stage changed");
            self.emit(SessionEvent::StageChanged { from, to });
        }
        Ok(value)
    }

    /// Token rejected by the backend: back to Anonymous.
    async fn expire(&self, generation: u64) {
        if self.reset_session("auth_expired", Some(generation)).await {
            warn!("Bearer token rejected; session reset");
        }
    }

    /// Reset to Anonymous and stop the channel. With `expected`, the reset
    /// only happens if the session is still on that generation. Returns
    /// whether it happened.
    async fn reset_session(&self, reason: &'static str, expected: Option<u64>) -> bool {
        let from = {
            let mut session = self.session.write().await;
            if expected.is_some_and(|generation| generation != session.generation) {
                debug!(reason, "Session already reset; nothing to do");
                return false;
            }
            let from = session.stage;
            session.reset();
            from
        };
        info!(reason, "Session reset");
        if from != Stage::Anonymous {
            self.emit(SessionEvent::StageChanged {
                from,
                to: Stage::Anonymous,
            });
        }
        if let Err(e) = self.channel.stop().await {
            warn!(error = %e, "Failed to stop notification channel");
        }
        true
    }

    /// Start the channel for a session still on `generation`. Channel
    /// failures never fail the session.
    ///
    /// The read guard spans the start: a reset either lands first and the
    /// start is skipped, or waits and stops the channel afterwards.
    async fn start_channel(&self, generation: u64, user_id: &str) {
        let session = self.session.read().await;
        if session.generation != generation {
            debug!(user_id, "Session reset before the channel started; not starting");
            return;
        }
        if let Err(e) = self.channel.start(user_id).await {
            warn!(error = %e, "Failed to start notification channel");
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn required(field: &'static str, value: &str) -> std::result::Result<String, SessionError> {
    let value = value.trim();
    if value.is_empty() {
        Err(SessionError::MissingField { field })
    } else {
        Ok(value.to_string())
    }
}

/// Move forward to `target` unless the session is already there or beyond.
fn advance(
    session: &mut Session,
    action: &'static str,
    target: Stage,
) -> std::result::Result<(), SessionError> {
    if session.stage >= target {
        return Ok(());
    }
    let stage = session.stage;
    session
        .advance_to(target)
        .map(|_| ())
        .map_err(|_| SessionError::InvalidStage { action, stage })
}

/// Pick up names from a profile record, which may or may not be wrapped in
/// a `result` envelope.
fn apply_profile(session: &mut Session, body: &Value) {
    let record = body.get("result").unwrap_or(body);
    let field = |key: &str| {
        record
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    if let Some(first) = field("first_name") {
        session.first_name = first;
    }
    if let Some(last) = field("last_name") {
        session.last_name = last;
    }
    if let Some(phone) = field("phone") {
        session.phone = phone;
    }
}

fn normalize_invitee(invitee: Invitee) -> Invitee {
    Invitee {
        first_name: invitee.first_name.trim().to_string(),
        last_name: invitee.last_name.trim().to_string(),
        email: invitee.email.trim().to_string(),
        phone: invitee.phone.trim().to_string(),
    }
}
