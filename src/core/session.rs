//! Chat session controller
//!
//! Turns one inbound user message (plus an optional conversation id) into one
//! assistant reply:
//! 1. Checks that the storage is reachable, otherwise answers statelessly
//! 2. Loads the conversation, or starts one titled after the message
//! 3. Replays the stored dialogue as history for the completion call
//! 4. Saves the user turn before calling upstream
//! 5. Saves the assistant turn once the reply arrives

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::conversation::{derive_title, Conversation, ConversationSummary};
use crate::providers::{CompletionClient, ProviderError};

use super::history::{reconstruct, Turn};
use super::store::{ConversationStore, StoreError};

/// Conversation id reported when nothing was saved
pub const OFFLINE_SESSION_ID: &str = "offline-session";

/// Conversation title reported when nothing was saved
pub const OFFLINE_TITLE: &str = "Offline Chat";

/// Request to the chat session
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// The user's message; absent and `null` are treated like empty
    #[serde(default)]
    pub message: Option<String>,

    /// Optional conversation ID to continue
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// A successful exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub reply: String,
    pub conversation_id: String,
    pub conversation_title: String,
}

/// Errors from the chat session
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptyMessage,

    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Upstream completion failed: {0}")]
    Upstream(#[from] ProviderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

pub struct ChatSession {
    store: Arc<dyn ConversationStore>,
    completion: Arc<dyn CompletionClient>,
}

impl ChatSession {
    pub fn new(store: Arc<dyn ConversationStore>, completion: Arc<dyn CompletionClient>) -> Self {
        Self { store, completion }
    }

    /// Process one user message and return the assistant's reply
    pub async fn send(&self, request: ChatRequest) -> Result<ChatReply, ChatError> {
        let message = request.message.unwrap_or_default();
        if message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        if !self.store.is_available() {
            tracing::warn!("Storage unavailable, answering without history");
            let reply = self.call_upstream(&[], &message).await?;
            return Ok(ChatReply {
                reply,
                conversation_id: OFFLINE_SESSION_ID.to_string(),
                conversation_title: OFFLINE_TITLE.to_string(),
            });
        }

        let mut conversation = match request.conversation_id {
            Some(id) => self
                .store
                .find_by_id(&id)
                .await?
                .ok_or(ChatError::NotFound(id))?,
            // Not stored until the first save below
            None => Conversation::new(derive_title(&message)),
        };

        let history = reconstruct(&conversation.messages);

        // The user's turn is kept even if the completion call fails
        conversation.add_user(&message);
        self.store.save(&mut conversation).await?;

        let reply = self.call_upstream(&history, &message).await?;

        conversation.add_assistant(&reply);
        self.store.save(&mut conversation).await?;

        tracing::info!(
            conversation_id = %conversation.id,
            messages = conversation.messages.len(),
            "Chat turn completed"
        );

        Ok(ChatReply {
            reply,
            conversation_id: conversation.id,
            conversation_title: conversation.title,
        })
    }

    async fn call_upstream(
        &self,
        history: &[Turn],
        message: &str,
    ) -> Result<String, ChatError> {
        tracing::debug!(history_turns = history.len(), "Calling completion API");

        match self.completion.complete(history, message).await {
            Ok(reply) => {
                tracing::debug!(reply_len = reply.len(), "Completion API responded");
                Ok(reply)
            }
            Err(e) => {
                tracing::error!(error = %e, "Completion API failed");
                Err(ChatError::Upstream(e))
            }
        }
    }

    /// Conversations, most recently updated first
    pub async fn history(&self) -> Result<Vec<ConversationSummary>, ChatError> {
        self.ensure_available()?;
        Ok(self.store.list().await?)
    }

    pub async fn conversation(&self, id: &str) -> Result<Conversation, ChatError> {
        self.ensure_available()?;
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| ChatError::NotFound(id.to_string()))
    }

    /// Delete a conversation; deleting an unknown id succeeds
    pub async fn delete(&self, id: &str) -> Result<(), ChatError> {
        self.ensure_available()?;
        tracing::info!(conversation_id = %id, "Deleting conversation");
        self.store.delete(id).await?;
        Ok(())
    }

    pub fn storage_available(&self) -> bool {
        self.store.is_available()
    }

    /// Models offered by the upstream completion service
    pub async fn models(&self) -> Result<Vec<String>, ChatError> {
        Ok(self.completion.list_models().await?)
    }

    fn ensure_available(&self) -> Result<(), ChatError> {
        if self.store.is_available() {
            Ok(())
        } else {
            Err(ChatError::Storage(StoreError::Unavailable))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::conversation::Role;
    use crate::core::store::SqliteStore;

    /// Completion client that records what it was sent
    #[derive(Default)]
    pub(crate) struct MockCompletion {
        pub(crate) fail: bool,
        pub(crate) calls: Mutex<Vec<(Vec<Turn>, String)>>,
    }

    impl MockCompletion {
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl CompletionClient for MockCompletion {
        async fn complete(&self, history: &[Turn], prompt: &str) -> Result<String, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push((history.to_vec(), prompt.to_string()));
            if self.fail {
                return Err(ProviderError::Api("RESOURCE_EXHAUSTED: quota".to_string()));
            }
            Ok(format!("🌱 Advice about: {prompt}"))
        }

        async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
            Ok(vec!["mock-model".to_string()])
        }
    }

    async fn online() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::in_memory().await.unwrap())
    }

    fn offline() -> Arc<SqliteStore> {
        Arc::new(SqliteStore::open("sqlite::memory:").unwrap())
    }

    fn request(message: &str, conversation_id: Option<&str>) -> ChatRequest {
        ChatRequest {
            message: Some(message.to_string()),
            conversation_id: conversation_id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_new_conversation() {
        let store = online().await;
        let completion = Arc::new(MockCompletion::default());
        let session = ChatSession::new(store.clone(), completion.clone());

        let reply = session
            .send(request(
                "Hello AgroBot, give me a quick tip for growing tomatoes.",
                None,
            ))
            .await
            .unwrap();

        assert!(!reply.reply.is_empty());
        assert_eq!(reply.conversation_title, "Hello AgroBot, give me a quick...");
        assert_ne!(reply.conversation_id, OFFLINE_SESSION_ID);

        let stored = store.find_by_id(&reply.conversation_id).await.unwrap().unwrap();
        assert_eq!(stored.messages.len(), 2);
        assert_eq!(stored.messages[0].role, Role::User);
        assert_eq!(stored.messages[1].role, Role::Assistant);
        assert_eq!(stored.messages[1].content, reply.reply);

        let calls = completion.calls.lock().unwrap();
        assert!(calls[0].0.is_empty());
    }

    #[tokio::test]
    async fn test_continuing_conversation_replays_prior_turns() {
        let store = online().await;
        let mut existing = store.create("Tomatoes").await.unwrap();
        existing.add_user("How do I grow tomatoes?");
        existing.add_assistant("Full sun and staking.");
        store.save(&mut existing).await.unwrap();

        let completion = Arc::new(MockCompletion::default());
        let session = ChatSession::new(store.clone(), completion.clone());

        let reply = session
            .send(request("And watering frequency?", Some(&existing.id)))
            .await
            .unwrap();
        assert_eq!(reply.conversation_id, existing.id);
        assert_eq!(reply.conversation_title, "Tomatoes");

        let calls = completion.calls.lock().unwrap();
        let (history, prompt) = &calls[0];
        assert_eq!(
            history,
            &vec![
                Turn::user("How do I grow tomatoes?"),
                Turn::model("Full sun and staking."),
            ]
        );
        assert_eq!(prompt, "And watering frequency?");

        let stored = store.find_by_id(&existing.id).await.unwrap().unwrap();
        assert_eq!(stored.messages.len(), 4);
    }

    #[tokio::test]
    async fn test_system_messages_not_replayed() {
        let store = online().await;
        let mut existing = store.create("Soil").await.unwrap();
        existing.messages.push(crate::conversation::Message {
            role: Role::System,
            content: "hidden".to_string(),
        });
        existing.add_user("pH?");
        store.save(&mut existing).await.unwrap();

        let completion = Arc::new(MockCompletion::default());
        let session = ChatSession::new(store, completion.clone());
        session
            .send(request("Lime?", Some(&existing.id)))
            .await
            .unwrap();

        let calls = completion.calls.lock().unwrap();
        assert_eq!(calls[0].0, vec![Turn::user("pH?")]);
    }

    #[tokio::test]
    async fn test_offline_mode() {
        let store = offline();
        let completion = Arc::new(MockCompletion::default());
        let session = ChatSession::new(store.clone(), completion.clone());

        let reply = session.send(request("Test", None)).await.unwrap();
        assert_eq!(reply.conversation_id, OFFLINE_SESSION_ID);
        assert_eq!(reply.conversation_title, OFFLINE_TITLE);

        // A supplied id is ignored and no history is replayed
        let reply = session
            .send(request("Test again", Some("some-id")))
            .await
            .unwrap();
        assert_eq!(reply.conversation_id, OFFLINE_SESSION_ID);
        assert!(completion.calls.lock().unwrap().iter().all(|(h, _)| h.is_empty()));

        // Nothing was written while offline
        store.connect().await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_message_rejected() {
        let store = online().await;
        let completion = Arc::new(MockCompletion::default());
        let session = ChatSession::new(store.clone(), completion.clone());

        let result = session.send(request("   ", None)).await;
        assert!(matches!(result, Err(ChatError::EmptyMessage)));

        let missing = ChatRequest {
            message: None,
            conversation_id: None,
        };
        let result = session.send(missing).await;
        assert!(matches!(result, Err(ChatError::EmptyMessage)));

        assert!(store.list().await.unwrap().is_empty());
        assert!(completion.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let store = online().await;
        let completion = Arc::new(MockCompletion::default());
        let session = ChatSession::new(store.clone(), completion.clone());

        let result = session.send(request("Hi", Some("missing"))).await;
        assert!(matches!(result, Err(ChatError::NotFound(id)) if id == "missing"));
        assert!(store.list().await.unwrap().is_empty());
        assert!(completion.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failure_keeps_user_message() {
        let store = online().await;
        let session = ChatSession::new(store.clone(), Arc::new(MockCompletion::failing()));

        let result = session.send(request("Why are my leaves yellow?", None)).await;
        assert!(matches!(result, Err(ChatError::Upstream(_))));

        let summaries = store.list().await.unwrap();
        assert_eq!(summaries.len(), 1);
        let stored = store.find_by_id(&summaries[0].id).await.unwrap().unwrap();
        assert_eq!(stored.messages.len(), 1);
        assert_eq!(stored.messages[0].role, Role::User);
        assert_eq!(stored.messages[0].content, "Why are my leaves yellow?");
    }

    #[tokio::test]
    async fn test_delete_unknown_succeeds() {
        let session = ChatSession::new(online().await, Arc::new(MockCompletion::default()));
        session.delete("nonexistent").await.unwrap();
    }

    #[tokio::test]
    async fn test_read_operations_need_storage() {
        let session = ChatSession::new(offline(), Arc::new(MockCompletion::default()));
        assert!(matches!(
            session.history().await,
            Err(ChatError::Storage(StoreError::Unavailable))
        ));
        assert!(matches!(
            session.conversation("x").await,
            Err(ChatError::Storage(StoreError::Unavailable))
        ));
    }

    /// Store whose writes always fail; reads go to an in-memory SQLite store
    struct ReadOnlyStore(Arc<SqliteStore>);

    #[async_trait]
    impl ConversationStore for ReadOnlyStore {
        fn is_available(&self) -> bool {
            self.0.is_available()
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
            self.0.find_by_id(id).await
        }

        async fn create(&self, _title: &str) -> Result<Conversation, StoreError> {
            Err(StoreError::InvalidRecord("read-only".to_string()))
        }

        async fn save(&self, _conversation: &mut Conversation) -> Result<(), StoreError> {
            Err(StoreError::InvalidRecord("read-only".to_string()))
        }

        async fn delete(&self, id: &str) -> Result<(), StoreError> {
            self.0.delete(id).await
        }

        async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError> {
            self.0.list().await
        }
    }

    #[tokio::test]
    async fn test_failed_first_save_leaves_no_conversation() {
        let inner = online().await;
        let completion = Arc::new(MockCompletion::default());
        let session = ChatSession::new(Arc::new(ReadOnlyStore(inner.clone())), completion.clone());

        let result = session.send(request("Best cover crop for winter?", None)).await;
        assert!(matches!(result, Err(ChatError::Storage(_))));

        assert!(inner.list().await.unwrap().is_empty());
        assert!(completion.calls.lock().unwrap().is_empty());
    }
}
