//! Observable session events.
//!
//! Every orchestrator action ends in exactly one `ActionSucceeded` or
//! `ActionFailed`; stage moves are reported separately so a front-end can
//! render progress without polling.

use serde::Serialize;

use super::state::Stage;
use crate::error::{Error, ErrorKind};

/// Capacity of the broadcast buffer. Slow subscribers lag and skip events.
pub const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    StageChanged {
        from: Stage,
        to: Stage,
    },
    ActionSucceeded {
        action: String,
    },
    ActionFailed {
        action: String,
        kind: ErrorKind,
        message: String,
    },
}

impl SessionEvent {
    pub fn failed(action: &str, error: &Error) -> Self {
        Self::ActionFailed {
            action: action.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn succeeded(action: &str) -> Self {
        Self::ActionSucceeded {
            action: action.to_string(),
        }
    }
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StageChanged { from, to } => write!(f, "stage {from} -> {to}"),
            Self::ActionSucceeded { action } => write!(f, "{action}: ok"),
            Self::ActionFailed {
                action,
                kind,
                message,
            } => write!(f, "{action}: {kind} error: {message}"),
        }
    }
}
