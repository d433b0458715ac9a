//! Core chat components
//!
//! Conversation storage, history replay and the per-request session flow.

mod history;
mod session;
mod store;

pub use history::{Turn, TurnRole};
pub use session::{ChatError, ChatReply, ChatRequest, ChatSession};
pub use store::{ConversationStore, SqliteStore, StoreError};

#[cfg(test)]
pub(crate) use session::tests::MockCompletion;
