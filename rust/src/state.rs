use std::fmt;
use std::sync::Arc;

use murmur_policy::Reason;

use crate::adapter::Capabilities;
use crate::core::reactions::ReactionGroup;

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
    Channel,
}

/// Scopes one store, poll loop and typing tracker: a peer id, group id or channel id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct ConversationKey {
    pub kind: ConversationKind,
    pub id: String,
}

impl ConversationKey {
    pub fn direct(peer_id: impl Into<String>) -> Self {
        Self {
            kind: ConversationKind::Direct,
            id: peer_id.into(),
        }
    }

    pub fn group(group_id: impl Into<String>) -> Self {
        Self {
            kind: ConversationKind::Group,
            id: group_id.into(),
        }
    }

    pub fn channel(channel_id: impl Into<String>) -> Self {
        Self {
            kind: ConversationKind::Channel,
            id: channel_id.into(),
        }
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            ConversationKind::Direct => "dm",
            ConversationKind::Group => "group",
            ConversationKind::Channel => "channel",
        };
        write!(f, "{kind}:{}", self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    /// Server id once confirmed; `local-<uuid>` while provisional.
    pub id: String,
    pub conversation_key: ConversationKey,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub content: String,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Unix millis.
    pub created_at: i64,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    /// Idempotency token supplied on create and echoed back by the server.
    #[serde(default)]
    pub client_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Reaction {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_name: Option<String>,
    pub emoji: String,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TypingIndicator {
    pub conversation_key: ConversationKey,
    pub user_id: String,
    pub display_name: String,
    /// Unix millis.
    pub expires_at: i64,
}

#[derive(Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

impl fmt::Debug for MediaAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaAttachment")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// What the user is trying to send.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub attachment: Option<MediaAttachment>,
    pub reply_to_id: Option<String>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn replying_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to_id = Some(message_id.into());
        self
    }

    pub fn with_attachment(mut self, attachment: MediaAttachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub(crate) fn normalized(mut self) -> Self {
        self.text = self.text.trim().to_string();
        self.reply_to_id = self
            .reply_to_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageDeliveryState {
    Pending,
    Sent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyPreview {
    Resolved {
        message_id: String,
        sender_id: String,
        sender_name: Option<String>,
        excerpt: String,
    },
    /// The target is outside the loaded window (or was deleted).
    Unavailable { message_id: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageView {
    pub message: Message,
    pub delivery: MessageDeliveryState,
    pub is_mine: bool,
    pub is_pinned: bool,
    pub reactions: Vec<ReactionGroup>,
    pub reply: Option<ReplyPreview>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ComposeState {
    pub text: String,
    pub attachment: Option<MediaAttachment>,
    pub reply_to_id: Option<String>,
    /// Inline rejection (validation, moderation, rate limit) for the last submit.
    pub error: Option<String>,
}

impl ComposeState {
    pub(crate) fn from_draft(draft: Draft) -> Self {
        Self {
            text: draft.text,
            attachment: draft.attachment,
            reply_to_id: draft.reply_to_id,
            error: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.attachment.is_none()
    }
}

/// A draft parked by a medium-severity verdict until the user confirms or cancels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingConfirmation {
    pub draft: Draft,
    pub reasons: Vec<Reason>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub last_synced_at: Option<i64>,
    pub consecutive_failures: u32,
    pub merges: u64,
    pub ticks_skipped: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConversationState {
    pub rev: u64,
    pub conversation_key: ConversationKey,
    pub capabilities: Capabilities,
    pub is_open: bool,
    pub messages: Vec<MessageView>,
    pub pinned: Vec<MessageView>,
    pub typing_peers: Vec<TypingIndicator>,
    pub compose: ComposeState,
    /// Failed drafts that could not go back into a non-empty compose box.
    pub unsent_drafts: Vec<Draft>,
    pub pending_confirmation: Option<PendingConfirmation>,
    /// Unix millis until which sending is rate limited.
    pub send_blocked_until: Option<i64>,
    pub toast: Option<String>,
    pub sync: SyncStatus,
}

impl ConversationState {
    pub fn empty(conversation_key: ConversationKey, capabilities: Capabilities) -> Self {
        Self {
            rev: 0,
            conversation_key,
            capabilities,
            is_open: false,
            messages: vec![],
            pinned: vec![],
            typing_peers: vec![],
            compose: ComposeState::default(),
            unsent_drafts: vec![],
            pending_confirmation: None,
            send_blocked_until: None,
            toast: None,
            sync: SyncStatus::default(),
        }
    }

    pub fn message(&self, id: &str) -> Option<&MessageView> {
        self.messages.iter().find(|m| m.message.id == id)
    }
}
