//! Session data model and the stage progression it follows.

use serde::{Deserialize, Serialize};

use super::credentials::CredentialStore;

/// Coarse progress marker for a session.
///
/// Progresses linearly: Anonymous → AwaitingOtp → Authenticated →
/// WorkspaceCreated → ContactsLinked. The only backward move is a reset to
/// Anonymous (sign-out, account deletion, or a rejected token).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Anonymous,
    AwaitingOtp,
    Authenticated,
    WorkspaceCreated,
    ContactsLinked,
}

impl Stage {
    /// Check if a transition from `self` to `target` is valid.
    ///
    /// Self-transitions are allowed where the action is repeatable (resending
    /// a code, creating another workspace, inviting again).
    pub fn can_transition_to(&self, target: Stage) -> bool {
        use Stage::*;
        if target == Anonymous {
            return true;
        }
        matches!(
            (self, target),
            (Anonymous, AwaitingOtp)
                | (AwaitingOtp, AwaitingOtp)
                | (AwaitingOtp, Authenticated)
                | (Authenticated, Authenticated)
                | (Authenticated, WorkspaceCreated)
                | (WorkspaceCreated, WorkspaceCreated)
                | (WorkspaceCreated, ContactsLinked)
                | (ContactsLinked, ContactsLinked)
        )
    }

    /// Whether the profile has been confirmed and privileged calls are legal.
    pub fn is_authenticated(&self) -> bool {
        *self >= Stage::Authenticated
    }

    /// Whether a workspace exists for this session.
    pub fn has_workspace(&self) -> bool {
        *self >= Stage::WorkspaceCreated
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Anonymous => "anonymous",
            Self::AwaitingOtp => "awaiting_otp",
            Self::Authenticated => "authenticated",
            Self::WorkspaceCreated => "workspace_created",
            Self::ContactsLinked => "contacts_linked",
        };
        write!(f, "{s}")
    }
}

/// The workspace created during onboarding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub role: String,
    pub description: String,
}

/// Someone the user wants to invite.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitee {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

/// The one live session of this client process. Never persisted.
#[derive(Debug, Default)]
pub struct Session {
    pub stage: Stage,
    pub email: String,
    /// Identifier of the pending one-time code, set by signup.
    pub method_id: Option<String>,
    pub credentials: CredentialStore,
    pub first_name: String,
    pub last_name: String,
    /// Phone number forwarded with contact-provider links.
    pub phone: String,
    pub workspace: Option<Workspace>,
    /// Bumped on every reset so in-flight transitions can detect they are stale.
    pub generation: u64,
}

impl Session {
    /// Move to `target`, returning the previous stage. Illegal moves are
    /// refused without mutating the session.
    pub fn advance_to(&mut self, target: Stage) -> Result<Stage, String> {
        if !self.stage.can_transition_to(target) {
            return Err(format!("Cannot transition from {} to {}", self.stage, target));
        }
        let previous = self.stage;
        self.stage = target;
        Ok(previous)
    }

    /// Drop everything learned so far and return to Anonymous.
    pub fn reset(&mut self) {
        let generation = self.generation.wrapping_add(1);
        *self = Session {
            generation,
            ..Session::default()
        };
    }

    /// Read-only view safe to hand to a front-end (no token material).
    pub fn view(&self) -> SessionView {
        SessionView {
            stage: self.stage,
            email: self.email.clone(),
            user_id: self.credentials.user_id().map(String::from),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            workspace: self.workspace.clone(),
            has_token: self.credentials.is_authenticated(),
        }
    }
}

/// Snapshot of the session for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub stage: Stage,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<Workspace>,
    pub has_token: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use Stage::*;
        let transitions = [
            (Anonymous, AwaitingOtp),
            (AwaitingOtp, Authenticated),
            (Authenticated, WorkspaceCreated),
            (WorkspaceCreated, ContactsLinked),
        ];
        for (from, to) in transitions {
            assert!(from.can_transition_to(to), "{from} should transition to {to}");
        }
    }

    #[test]
    fn invalid_transitions() {
        use Stage::*;
        // Skip stages
        assert!(!Anonymous.can_transition_to(Authenticated));
        assert!(!AwaitingOtp.can_transition_to(WorkspaceCreated));
        assert!(!Authenticated.can_transition_to(ContactsLinked));
        // Go backward (other than reset)
        assert!(!WorkspaceCreated.can_transition_to(Authenticated));
        assert!(!ContactsLinked.can_transition_to(AwaitingOtp));
        // Anonymous cannot be re-entered as a forward step
        assert!(!Anonymous.can_transition_to(ContactsLinked));
    }

    #[test]
    fn every_stage_can_reset() {
        use Stage::*;
        for stage in [Anonymous, AwaitingOtp, Authenticated, WorkspaceCreated, ContactsLinked] {
            assert!(stage.can_transition_to(Anonymous));
        }
    }

    #[test]
    fn ordering_follows_progression() {
        use Stage::*;
        let progression = [Anonymous, AwaitingOtp, Authenticated, WorkspaceCreated, ContactsLinked];
        for pair in progression.windows(2) {
            assert!(pair[1] > pair[0]);
            assert!(pair[0].can_transition_to(pair[1]));
        }
    }

    #[test]
    fn authenticated_predicate() {
        assert!(!Stage::Anonymous.is_authenticated());
        assert!(!Stage::AwaitingOtp.is_authenticated());
        assert!(Stage::Authenticated.is_authenticated());
        assert!(Stage::ContactsLinked.is_authenticated());
        assert!(!Stage::Authenticated.has_workspace());
        assert!(Stage::WorkspaceCreated.has_workspace());
    }

    #[test]
    fn display_matches_serde() {
        use Stage::*;
        for stage in [Anonymous, AwaitingOtp, Authenticated, WorkspaceCreated, ContactsLinked] {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(format!("\"{stage}\""), json, "Display and serde should match for {stage:?}");
        }
    }

    #[test]
    fn advance_refuses_illegal_move() {
        let mut session = Session::default();
        assert!(session.advance_to(Stage::WorkspaceCreated).is_err());
        assert_eq!(session.stage, Stage::Anonymous);

        assert_eq!(session.advance_to(Stage::AwaitingOtp).unwrap(), Stage::Anonymous);
        assert_eq!(session.stage, Stage::AwaitingOtp);
    }

    #[test]
    fn reset_clears_and_bumps_generation() {
        let mut session = Session {
            stage: Stage::WorkspaceCreated,
            email: "a@x.com".into(),
            method_id: Some("m1".into()),
            first_name: "Ada".into(),
            ..Session::default()
        };
        session.credentials.store("u1", "t1");
        session.workspace = Some(Workspace {
            id: "w1".into(),
            name: "Acme".into(),
            role: "owner".into(),
            description: String::new(),
        });

        session.reset();

        assert_eq!(session.stage, Stage::Anonymous);
        assert!(session.email.is_empty());
        assert!(session.method_id.is_none());
        assert!(session.workspace.is_none());
        assert!(!session.credentials.is_authenticated());
        assert_eq!(session.generation, 1);
    }

    #[test]
    fn view_hides_token() {
        let mut session = Session::default();
        session.credentials.store("u1", "secret-token");
        let view = session.view();
        assert!(view.has_token);
        assert_eq!(view.user_id.as_deref(), Some("u1"));
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("secret-token"));
    }
}
