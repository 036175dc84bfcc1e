use crate::state::{Draft, MediaAttachment};

#[derive(Debug, Clone)]
pub enum ConversationAction {
    // Compose
    UpdateCompose {
        text: String,
    },
    SetReplyTarget {
        message_id: Option<String>,
    },
    AttachMedia {
        attachment: MediaAttachment,
    },
    ClearAttachment,

    // Messages
    SendMessage {
        draft: Draft,
    },
    ConfirmPendingSend,
    CancelPendingSend,
    EditMessage {
        message_id: String,
        content: String,
    },
    DeleteMessage {
        message_id: String,
    },
    PinMessage {
        message_id: String,
    },
    UnpinMessage {
        message_id: String,
    },
    ToggleReaction {
        message_id: String,
        emoji: String,
    },
    /// Drop a failed draft that could not be put back into the compose box.
    DiscardUnsentDraft {
        index: usize,
    },

    // Sync
    SyncNow,
    LoadOlderMessages,

    // Lifecycle / UI
    Foregrounded,
    ClearToast,
    Close,
}

impl ConversationAction {
    /// Log-safe action tag (never includes message content).
    pub fn tag(&self) -> &'static str {
        match self {
            // Compose
            ConversationAction::UpdateCompose { .. } => "UpdateCompose",
            ConversationAction::SetReplyTarget { .. } => "SetReplyTarget",
            ConversationAction::AttachMedia { .. } => "AttachMedia",
            ConversationAction::ClearAttachment => "ClearAttachment",

            // Messages
            ConversationAction::SendMessage { .. } => "SendMessage",
            ConversationAction::ConfirmPendingSend => "ConfirmPendingSend",
            ConversationAction::CancelPendingSend => "CancelPendingSend",
            ConversationAction::EditMessage { .. } => "EditMessage",
            ConversationAction::DeleteMessage { .. } => "DeleteMessage",
            ConversationAction::PinMessage { .. } => "PinMessage",
            ConversationAction::UnpinMessage { .. } => "UnpinMessage",
            ConversationAction::ToggleReaction { .. } => "ToggleReaction",
            ConversationAction::DiscardUnsentDraft { .. } => "DiscardUnsentDraft",

            // Sync
            ConversationAction::SyncNow => "SyncNow",
            ConversationAction::LoadOlderMessages => "LoadOlderMessages",

            // Lifecycle / UI
            ConversationAction::Foregrounded => "Foregrounded",
            ConversationAction::ClearToast => "ClearToast",
            ConversationAction::Close => "Close",
        }
    }
}
