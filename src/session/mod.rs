//! Session state, credentials and the orchestrator that advances them.

pub mod credentials;
pub mod events;
pub mod orchestrator;
pub mod state;

pub use credentials::CredentialStore;
pub use events::SessionEvent;
pub use orchestrator::Orchestrator;
pub use state::{Invitee, Session, SessionView, Stage, Workspace};
