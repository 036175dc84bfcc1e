use std::collections::HashMap;
use std::sync::Arc;

use crate::state::{ConversationKey, ConversationKind, Message, Reaction, TypingIndicator};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rejected by server: {0}")]
    Rejected(String),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// The signed-in user, injected by the host app. This crate never resolves identity itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Per-conversation feature switches. Direct messages, groups and channels share one
/// engine and differ only here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Capabilities {
    pub supports_pinning: bool,
    pub supports_threading: bool,
    pub supports_typing: bool,
}

impl Capabilities {
    pub fn for_kind(kind: ConversationKind) -> Self {
        match kind {
            ConversationKind::Direct => Self {
                supports_pinning: false,
                supports_threading: true,
                supports_typing: true,
            },
            ConversationKind::Group => Self {
                supports_pinning: true,
                supports_threading: true,
                supports_typing: true,
            },
            ConversationKind::Channel => Self {
                supports_pinning: true,
                supports_threading: true,
                supports_typing: false,
            },
        }
    }

    pub fn all() -> Self {
        Self {
            supports_pinning: true,
            supports_threading: true,
            supports_typing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_key: ConversationKey,
    pub sender_id: String,
    pub content: String,
    pub image_url: Option<String>,
    pub reply_to_id: Option<String>,
    /// Servers are expected to echo this on the created row (and on later fetches).
    pub client_token: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub conversation_key: ConversationKey,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

/// Remote store for one kind of conversation. Every call may fail and must return an
/// error instead of panicking; reads must be safe to run concurrently with each other.
#[async_trait::async_trait]
pub trait ConversationAdapter: Send + Sync + 'static {
    async fn fetch_messages(
        &self,
        key: &ConversationKey,
        limit: usize,
    ) -> AdapterResult<Vec<Message>>;

    async fn fetch_pinned(&self, key: &ConversationKey) -> AdapterResult<Vec<Message>>;

    /// One batch call for every id; ids without reactions may be absent from the map.
    async fn fetch_reactions(
        &self,
        message_ids: &[String],
    ) -> AdapterResult<HashMap<String, Vec<Reaction>>>;

    async fn create_message(&self, message: NewMessage) -> AdapterResult<Message>;

    async fn edit_message(&self, message_id: &str, content: &str) -> AdapterResult<Message>;

    async fn delete_message(&self, message_id: &str) -> AdapterResult<bool>;

    async fn add_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> AdapterResult<Reaction>;

    async fn remove_reaction(
        &self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
    ) -> AdapterResult<()>;

    async fn pin_message(&self, message_id: &str) -> AdapterResult<()>;

    async fn unpin_message(&self, message_id: &str) -> AdapterResult<()>;

    /// Slow and independently failing. Never retried by this crate.
    async fn upload_media(&self, upload: MediaUpload) -> AdapterResult<String>;

    async fn send_typing_ping(
        &self,
        key: &ConversationKey,
        actor: &Identity,
        expires_at: i64,
    ) -> AdapterResult<()>;

    async fn clear_typing(&self, key: &ConversationKey, actor_id: &str) -> AdapterResult<()>;

    async fn fetch_typing_peers(&self, key: &ConversationKey) -> AdapterResult<Vec<TypingIndicator>>;
}
