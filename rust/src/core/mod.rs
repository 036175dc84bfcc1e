mod config;
mod outbox;
mod polling;
pub(crate) mod reactions;
pub(crate) mod reply;
pub(crate) mod store;
pub(crate) mod sync;
pub(crate) mod typing;
mod view;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use flume::Sender;
use murmur_policy::{ModerationGate, RateLimiter};

use crate::adapter::{Capabilities, ConversationAdapter, Identity};
use crate::state::{now_millis, ConversationKey, ConversationState, Reaction};
use crate::updates::{ConversationUpdate, CoreMsg, InternalEvent, SubmitOutcome};
use crate::ConversationAction;

pub use config::{load_app_config, AppConfig, ModerationConfig, CONFIG_FILE_NAME};
use outbox::OptimisticWriteBuffer;
use store::MessageStore;
use sync::SyncScheduler;
use typing::TypingIndicatorTracker;

/// Single-threaded owner of one open conversation. Actions and async results arrive
/// serially over `core_sender`; every state change is published as a full snapshot.
pub struct ConversationCore {
    pub state: ConversationState,
    rev: u64,
    update_sender: Sender<ConversationUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<ConversationState>>,
    adapter: Arc<dyn ConversationAdapter>,
    identity: Identity,
    key: ConversationKey,
    capabilities: Capabilities,
    config: AppConfig,
    runtime: tokio::runtime::Runtime,
    moderation: ModerationGate,
    limiter: RateLimiter,
    store: MessageStore,
    /// Last fetched server reactions, replaced wholesale on every successful tick.
    reactions: HashMap<String, Vec<Reaction>>,
    /// Message id -> store epoch of the last reaction write the server confirmed.
    reactions_settled: HashMap<String, u64>,
    outbox: OptimisticWriteBuffer,
    typing: TypingIndicatorTracker,
    sync: SyncScheduler,
    toast_dismiss_token: u64,
    last_outgoing_ts: i64,
    closed: bool,
}

pub struct CoreParts {
    pub update_sender: Sender<ConversationUpdate>,
    pub core_sender: Sender<CoreMsg>,
    pub shared_state: Arc<RwLock<ConversationState>>,
    pub adapter: Arc<dyn ConversationAdapter>,
    pub identity: Identity,
    pub key: ConversationKey,
    pub capabilities: Capabilities,
    pub config: AppConfig,
    pub runtime: tokio::runtime::Runtime,
}

impl ConversationCore {
    pub fn new(parts: CoreParts) -> Self {
        let CoreParts {
            update_sender,
            core_sender,
            shared_state,
            adapter,
            identity,
            key,
            capabilities,
            config,
            runtime,
        } = parts;

        let state = ConversationState::empty(key.clone(), capabilities);
        Self {
            state,
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            adapter,
            identity,
            capabilities,
            moderation: config.moderation_gate(),
            limiter: config.rate_limiter(),
            store: MessageStore::new(),
            reactions: HashMap::new(),
            reactions_settled: HashMap::new(),
            outbox: OptimisticWriteBuffer::default(),
            typing: TypingIndicatorTracker::new(
                config.typing_debounce_ms as i64,
                config.typing_ttl_ms as i64,
            ),
            sync: SyncScheduler::new(config.message_window_limit),
            toast_dismiss_token: 0,
            last_outgoing_ts: 0,
            closed: false,
            key,
            config,
            runtime,
        }
    }

    /// Initial full load, then the poll timers.
    pub fn start(&mut self) {
        tracing::info!(conversation = %self.key, "conversation open");
        self.state.is_open = true;
        self.sync.start();
        self.sync_force();
        let token = self.sync.arm_poll();
        self.schedule_poll(token);
        if self.capabilities.supports_typing {
            let token = self.typing.arm_poll();
            self.schedule_typing_poll(token, Duration::ZERO);
        }
        self.emit_state();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        if self.closed {
            // Late timers and adapter results after close are dropped here.
            return;
        }
        match msg {
            CoreMsg::Action(action) => {
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: ConversationAction) {
        match action {
            ConversationAction::UpdateCompose { text } => self.update_compose(text),
            ConversationAction::SetReplyTarget { message_id } => {
                self.state.compose.reply_to_id = if self.capabilities.supports_threading {
                    message_id
                } else {
                    None
                };
                self.emit_state();
            }
            ConversationAction::AttachMedia { attachment } => {
                self.state.compose.attachment = Some(attachment);
                self.state.compose.error = None;
                self.emit_state();
            }
            ConversationAction::ClearAttachment => {
                self.state.compose.attachment = None;
                self.emit_state();
            }
            ConversationAction::SendMessage { draft } => self.submit(draft, false),
            ConversationAction::ConfirmPendingSend => {
                match self.state.pending_confirmation.take() {
                    Some(pending) => self.submit(pending.draft, true),
                    None => tracing::debug!("confirm without pending draft"),
                }
            }
            ConversationAction::CancelPendingSend => {
                if let Some(pending) = self.state.pending_confirmation.take() {
                    self.restore_draft(pending.draft);
                    self.emit_state();
                }
            }
            ConversationAction::EditMessage {
                message_id,
                content,
            } => self.edit_message(message_id, content),
            ConversationAction::DeleteMessage { message_id } => self.delete_message(message_id),
            ConversationAction::PinMessage { message_id } => self.set_pinned(message_id, true),
            ConversationAction::UnpinMessage { message_id } => self.set_pinned(message_id, false),
            ConversationAction::ToggleReaction { message_id, emoji } => {
                self.toggle_reaction(message_id, emoji)
            }
            ConversationAction::DiscardUnsentDraft { index } => {
                if index < self.state.unsent_drafts.len() {
                    self.state.unsent_drafts.remove(index);
                    self.emit_state();
                }
            }
            ConversationAction::SyncNow => self.sync_tick(),
            ConversationAction::LoadOlderMessages => {
                self.sync.grow_window(self.config.history_page_size);
                self.sync_force();
            }
            ConversationAction::Foregrounded => self.sync_force(),
            ConversationAction::ClearToast => {
                if self.state.toast.take().is_some() {
                    self.emit_state();
                }
            }
            ConversationAction::Close => self.close(),
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::PollTick { token } => self.handle_poll_tick(token),
            InternalEvent::SyncFetched {
                generation,
                since,
                result,
            } => self.handle_sync_fetched(generation, since, result),
            InternalEvent::TypingPollTick { token } => self.handle_typing_poll_tick(token),
            InternalEvent::TypingPeersFetched { generation, result } => {
                self.handle_typing_peers_fetched(generation, result)
            }
            InternalEvent::TypingIdle { token } => self.handle_typing_idle(token),
            InternalEvent::MessageSendResult { temp_id, result } => {
                self.handle_send_result(temp_id, result)
            }
            InternalEvent::EditResult {
                message_id,
                op_id,
                result,
            } => self.handle_edit_result(message_id, op_id, result),
            InternalEvent::DeleteResult {
                message_id,
                op_id,
                result,
            } => self.handle_delete_result(message_id, op_id, result),
            InternalEvent::PinResult {
                message_id,
                op_id,
                result,
            } => self.handle_pin_result(message_id, op_id, result),
            InternalEvent::ReactionResult {
                message_id,
                op_id,
                result,
            } => self.handle_reaction_result(message_id, op_id, result),
            InternalEvent::ToastAutoDismiss { token } => {
                if token == self.toast_dismiss_token && self.state.toast.take().is_some() {
                    self.emit_state();
                }
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        tracing::info!(conversation = %self.key, "conversation close");
        self.sync.stop();
        self.typing.stop();
        self.toast_dismiss_token = self.toast_dismiss_token.saturating_add(1);

        // Always cleared server-side on close.
        self.typing.clear_local();
        if self.capabilities.supports_typing {
            let adapter = self.adapter.clone();
            let key = self.key.clone();
            let user_id = self.identity.user_id.clone();
            let cleared = self.runtime.block_on(async move {
                tokio::time::timeout(
                    Duration::from_secs(1),
                    adapter.clear_typing(&key, &user_id),
                )
                .await
            });
            if !matches!(cleared, Ok(Ok(()))) {
                tracing::debug!("typing clear on close did not complete");
            }
        }

        self.state.is_open = false;
        self.state.typing_peers.clear();
        self.state.sync = self.sync.status().clone();
        self.emit_state();
        self.closed = true;
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &ConversationState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(ConversationUpdate::FullState(snapshot));
    }

    fn emit_submit_outcome(&mut self, outcome: SubmitOutcome) {
        let _ = self.update_sender.send(ConversationUpdate::SubmitResolved {
            rev: self.rev,
            outcome,
        });
    }

    fn toast(&mut self, msg: impl Into<String>) {
        self.state.toast = Some(msg.into());
        self.toast_dismiss_token = self.toast_dismiss_token.saturating_add(1);
        self.schedule_toast_auto_dismiss(self.toast_dismiss_token);
        self.emit_state();
    }

    fn schedule_toast_auto_dismiss(&self, token: u64) {
        let tx = self.core_sender.clone();
        let after = self.config.toast_dismiss();
        self.runtime.spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ToastAutoDismiss { token },
            )));
        });
    }

    fn send_internal_after(&self, after: Duration, event: InternalEvent) {
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            if !after.is_zero() {
                tokio::time::sleep(after).await;
            }
            let _ = tx.send(CoreMsg::Internal(Box::new(event)));
        });
    }
}
