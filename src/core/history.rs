//! Turn reconstruction
//!
//! Stored conversations keep every message with its role. Completion APIs are
//! stateless, so each request replays the prior dialogue as a list of turns.
//! System messages never leave the store this way.

use crate::conversation::{Message, Role};

/// Speaker of a replayed turn, as seen by the completion API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Model,
}

/// One replayed turn of prior dialogue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Model,
            text: text.into(),
        }
    }
}

/// Convert stored messages into the history sent upstream.
///
/// Order is preserved, nothing is merged or deduplicated.
pub fn reconstruct(messages: &[Message]) -> Vec<Turn> {
    messages
        .iter()
        .filter_map(|m| match m.role {
            Role::System => None,
            Role::User => Some(Turn::user(m.content.as_str())),
            Role::Assistant => Some(Turn::model(m.content.as_str())),
        })
        .collect()
}
