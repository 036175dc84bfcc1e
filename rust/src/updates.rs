use std::collections::HashMap;

use murmur_policy::Reason;

use crate::adapter::AdapterError;
use crate::error::SendError;
use crate::state::{ConversationState, Message, Reaction, TypingIndicator};
use crate::ConversationAction;

#[derive(Clone, Debug)]
pub enum ConversationUpdate {
    /// Primary update stream: always a full snapshot.
    FullState(ConversationState),
    /// How a submit ended. Sent once per `SendMessage` / `ConfirmPendingSend`.
    SubmitResolved { rev: u64, outcome: SubmitOutcome },
}

impl ConversationUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            ConversationUpdate::FullState(s) => s.rev,
            ConversationUpdate::SubmitResolved { rev, .. } => *rev,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Sent { temp_id: String, message_id: String },
    /// Accepted locally, then the upload or create call failed and the draft was restored.
    Failed { temp_id: String, error: SendError },
    /// Medium-severity content parked until the user confirms.
    NeedsConfirmation { reasons: Vec<Reason> },
    /// Refused before anything was written (validation, block, rate limit).
    Rejected { error: SendError },
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(ConversationAction),
    Internal(Box<InternalEvent>),
}

/// One fetch of the conversation window. Pinned and reaction reads fail independently;
/// `None` keeps the previous value.
#[derive(Debug, Clone, Default)]
pub struct SyncBatch {
    pub messages: Vec<Message>,
    pub pinned: Option<Vec<Message>>,
    pub reactions: Option<HashMap<String, Vec<Reaction>>>,
}

#[derive(Debug)]
pub enum InternalEvent {
    // Poll loop
    PollTick {
        token: u64,
    },
    SyncFetched {
        generation: u64,
        /// Store epoch when the fetch started.
        since: u64,
        result: Result<SyncBatch, AdapterError>,
    },
    TypingPollTick {
        token: u64,
    },
    TypingPeersFetched {
        generation: u64,
        result: Result<Vec<TypingIndicator>, AdapterError>,
    },
    TypingIdle {
        token: u64,
    },

    // Write results
    MessageSendResult {
        temp_id: String,
        result: Result<Message, SendError>,
    },
    EditResult {
        message_id: String,
        op_id: u64,
        result: Result<Message, AdapterError>,
    },
    DeleteResult {
        message_id: String,
        op_id: u64,
        result: Result<bool, AdapterError>,
    },
    PinResult {
        message_id: String,
        op_id: u64,
        result: Result<(), AdapterError>,
    },
    ReactionResult {
        message_id: String,
        op_id: u64,
        result: Result<Option<Reaction>, AdapterError>,
    },

    ToastAutoDismiss {
        token: u64,
    },
}
