use std::collections::{BTreeMap, HashSet, VecDeque};

use murmur_policy::{GateDecision, RateAction, RateLimitKey};

use super::reactions::{apply_toggle, toggle, ToggleOutcome};
use super::*;
use crate::adapter::{AdapterError, MediaUpload, NewMessage};
use crate::error::{SendError, ValidationFailure};
use crate::state::{ComposeState, Draft, Message, PendingConfirmation};

#[derive(Debug, Clone)]
pub(super) struct PendingSend {
    pub draft: Draft,
    pub client_token: String,
}

#[derive(Debug, Clone)]
pub(super) struct PendingEdit {
    pub op_id: u64,
    pub content: String,
    /// Message as it was before the first unconfirmed edit.
    pub base: Message,
}

#[derive(Debug, Clone)]
pub(super) struct PendingDelete {
    pub message: Message,
    pub was_pinned: bool,
}

#[derive(Debug, Clone)]
pub(super) struct PendingPin {
    pub message: Message,
    pub pin: bool,
}

#[derive(Debug, Clone)]
pub(super) struct PendingReaction {
    pub message_id: String,
    pub outcome: ToggleOutcome,
}

/// A write to an existing message, waiting for its turn at the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum RemoteWrite {
    Edit { op_id: u64, content: String },
    Delete { op_id: u64 },
    Pin { op_id: u64, pin: bool },
    React { op_id: u64, emoji: String, add: bool },
}

/// Local writes that the server has not confirmed yet. Each kind is re-applied over
/// every merged snapshot so a poll landing mid-flight does not visually revert it.
#[derive(Debug, Default)]
pub(super) struct OptimisticWriteBuffer {
    next_op: u64,
    sends: HashMap<String, PendingSend>,
    edits: HashMap<String, PendingEdit>,
    deletes: BTreeMap<u64, PendingDelete>,
    pins: BTreeMap<u64, PendingPin>,
    reactions: BTreeMap<u64, PendingReaction>,
    /// Messages with a write at the adapter; later writes to them wait in `queued`.
    in_flight: HashSet<String>,
    queued: HashMap<String, VecDeque<RemoteWrite>>,
}

impl OptimisticWriteBuffer {
    fn next_op_id(&mut self) -> u64 {
        self.next_op = self.next_op.saturating_add(1);
        self.next_op
    }

    pub fn track_send(&mut self, temp_id: String, send: PendingSend) {
        self.sends.insert(temp_id, send);
    }

    pub fn take_send(&mut self, temp_id: &str) -> Option<PendingSend> {
        self.sends.remove(temp_id)
    }

    /// A second edit to the same message supersedes the first but keeps its base.
    pub fn begin_edit(&mut self, message_id: &str, content: String, previous: Message) -> u64 {
        let op_id = self.next_op_id();
        let base = match self.edits.remove(message_id) {
            Some(existing) => existing.base,
            None => previous,
        };
        self.edits.insert(
            message_id.to_string(),
            PendingEdit {
                op_id,
                content,
                base,
            },
        );
        op_id
    }

    /// `None` when a newer edit has superseded `op_id`.
    pub fn take_edit(&mut self, message_id: &str, op_id: u64) -> Option<PendingEdit> {
        match self.edits.get(message_id) {
            Some(e) if e.op_id == op_id => self.edits.remove(message_id),
            _ => None,
        }
    }

    pub fn begin_delete(&mut self, message: Message, was_pinned: bool) -> u64 {
        let op_id = self.next_op_id();
        self.edits.remove(&message.id);
        self.deletes.insert(op_id, PendingDelete { message, was_pinned });
        op_id
    }

    pub fn take_delete(&mut self, op_id: u64) -> Option<PendingDelete> {
        self.deletes.remove(&op_id)
    }

    pub fn is_deleting(&self, message_id: &str) -> bool {
        self.deletes.values().any(|d| d.message.id == message_id)
    }

    pub fn begin_pin(&mut self, message: Message, pin: bool) -> u64 {
        let op_id = self.next_op_id();
        self.pins.insert(op_id, PendingPin { message, pin });
        op_id
    }

    pub fn take_pin(&mut self, op_id: u64) -> Option<PendingPin> {
        self.pins.remove(&op_id)
    }

    pub fn begin_reaction(&mut self, message_id: String, outcome: ToggleOutcome) -> u64 {
        let op_id = self.next_op_id();
        self.reactions.insert(
            op_id,
            PendingReaction {
                message_id,
                outcome,
            },
        );
        op_id
    }

    pub fn take_reaction(&mut self, op_id: u64) -> Option<PendingReaction> {
        self.reactions.remove(&op_id)
    }

    /// Writes to one message reach the adapter in the order they were made. Returns
    /// the write when it can start now; otherwise it waits behind the one in flight.
    pub fn schedule_write(&mut self, message_id: &str, write: RemoteWrite) -> Option<RemoteWrite> {
        if self.in_flight.insert(message_id.to_string()) {
            return Some(write);
        }
        self.queued
            .entry(message_id.to_string())
            .or_default()
            .push_back(write);
        None
    }

    /// The write for `message_id` finished; hand back the next one, if any.
    pub fn next_write(&mut self, message_id: &str) -> Option<RemoteWrite> {
        let next = self
            .queued
            .get_mut(message_id)
            .and_then(VecDeque::pop_front);
        if self.queued.get(message_id).is_some_and(VecDeque::is_empty) {
            self.queued.remove(message_id);
        }
        if next.is_none() {
            self.in_flight.remove(message_id);
        }
        next
    }

    /// Replay unconfirmed edits, deletes and pins over a freshly merged store.
    /// Pending sends need nothing here: merge keeps unmatched provisionals.
    pub fn reapply(&self, store: &mut MessageStore) {
        for (message_id, edit) in &self.edits {
            if store
                .get(message_id)
                .is_some_and(|m| m.content != edit.content)
            {
                store.edit(message_id, &edit.content);
            }
        }
        for delete in self.deletes.values() {
            store.remove(&delete.message.id);
        }
        for pin in self.pins.values() {
            store.set_pinned(&pin.message, pin.pin);
        }
    }

    /// Server reactions for `message_id` with in-flight toggles applied in order.
    pub fn effective_reactions(
        &self,
        server: &HashMap<String, Vec<Reaction>>,
        message_id: &str,
    ) -> Vec<Reaction> {
        let mut out = server.get(message_id).cloned().unwrap_or_default();
        for pending in self.reactions.values() {
            if pending.message_id == message_id {
                apply_toggle(&mut out, &pending.outcome);
            }
        }
        out
    }
}

impl ConversationCore {
    pub(super) fn update_compose(&mut self, text: String) {
        let typing = !text.trim().is_empty();
        self.state.compose.text = text;
        self.state.compose.error = None;
        if self.capabilities.supports_typing {
            if typing {
                self.note_local_typing();
            } else {
                self.stop_local_typing();
            }
        }
        self.emit_state();
    }

    fn validate_draft(&self, draft: &Draft) -> Result<(), ValidationFailure> {
        if draft.text.is_empty() && draft.attachment.is_none() {
            return Err(ValidationFailure::Empty);
        }
        let len = draft.text.chars().count();
        if len > self.config.max_message_chars {
            return Err(ValidationFailure::TooLong {
                len,
                max: self.config.max_message_chars,
            });
        }
        if let Some(attachment) = &draft.attachment {
            if !self.config.media_type_allowed(&attachment.mime_type) {
                return Err(ValidationFailure::DisallowedMediaType(
                    attachment.mime_type.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Validate, moderate and rate-limit a draft, then append it provisionally and
    /// hand it to the adapter. `confirmed` skips the medium-severity prompt.
    pub(super) fn submit(&mut self, draft: Draft, confirmed: bool) {
        let mut draft = draft.normalized();
        if !self.capabilities.supports_threading {
            draft.reply_to_id = None;
        }

        if let Err(failure) = self.validate_draft(&draft) {
            self.reject_submit(failure.into());
            return;
        }

        if !draft.text.is_empty() {
            match self.moderation.check_before_send(&draft.text) {
                GateDecision::Blocked { reason, verdict } => {
                    tracing::info!(reasons = ?verdict.reasons, "send blocked by moderation");
                    self.reject_submit(SendError::ModerationBlocked { reason });
                    return;
                }
                GateDecision::NeedsConfirmation { verdict } if !confirmed => {
                    let reasons: Vec<_> = verdict.reasons.into_iter().collect();
                    tracing::info!(reasons = ?reasons, "send needs confirmation");
                    self.state.pending_confirmation = Some(PendingConfirmation {
                        draft,
                        reasons: reasons.clone(),
                    });
                    self.emit_state();
                    self.emit_submit_outcome(SubmitOutcome::NeedsConfirmation { reasons });
                    return;
                }
                _ => {}
            }
        }

        let now = now_millis();
        let send_key = RateLimitKey::new(RateAction::SendMessage, &self.identity.user_id);
        let upload_key = RateLimitKey::new(RateAction::UploadMedia, &self.identity.user_id);
        let mut checks = vec![self.limiter.allow(&send_key, now)];
        if draft.attachment.is_some() {
            checks.push(self.limiter.allow(&upload_key, now));
        }
        if let Some(retry_after) = checks
            .iter()
            .filter(|d| !d.allowed)
            .filter_map(|d| d.retry_after)
            .max()
        {
            self.state.send_blocked_until =
                Some(now.saturating_add(retry_after.as_millis() as i64));
            self.reject_submit(SendError::RateLimited { retry_after });
            return;
        }
        self.limiter.record(&send_key, now);
        if draft.attachment.is_some() {
            self.limiter.record(&upload_key, now);
        }

        let temp_id = format!("local-{}", uuid::Uuid::new_v4());
        let client_token = uuid::Uuid::new_v4().to_string();
        let created_at = now.max(self.last_outgoing_ts.saturating_add(1));
        self.last_outgoing_ts = created_at;

        let provisional = Message {
            id: temp_id.clone(),
            conversation_key: self.key.clone(),
            sender_id: self.identity.user_id.clone(),
            sender_name: Some(self.identity.display_name.clone()),
            content: draft.text.clone(),
            image_url: None,
            created_at,
            is_edited: false,
            reply_to_id: draft.reply_to_id.clone(),
            client_token: Some(client_token.clone()),
        };
        self.store.append(provisional);
        self.outbox.track_send(
            temp_id.clone(),
            PendingSend {
                draft: draft.clone(),
                client_token: client_token.clone(),
            },
        );
        tracing::info!(
            temp_id = %temp_id,
            has_attachment = draft.attachment.is_some(),
            is_reply = draft.reply_to_id.is_some(),
            "send queued"
        );

        self.state.compose = ComposeState::default();
        self.state.send_blocked_until = None;
        self.stop_local_typing();
        self.refresh_view();

        let adapter = self.adapter.clone();
        let tx = self.core_sender.clone();
        let key = self.key.clone();
        let sender_id = self.identity.user_id.clone();
        self.runtime.spawn(async move {
            let image_url = match draft.attachment {
                Some(attachment) => {
                    let upload = MediaUpload {
                        conversation_key: key.clone(),
                        file_name: attachment.file_name,
                        mime_type: attachment.mime_type,
                        bytes: attachment.bytes,
                    };
                    match adapter.upload_media(upload).await {
                        Ok(url) => Some(url),
                        Err(e) => {
                            let _ = tx.send(CoreMsg::Internal(Box::new(
                                InternalEvent::MessageSendResult {
                                    temp_id,
                                    result: Err(SendError::Upload(e)),
                                },
                            )));
                            return;
                        }
                    }
                }
                None => None,
            };
            let result = adapter
                .create_message(NewMessage {
                    conversation_key: key,
                    sender_id,
                    content: draft.text,
                    image_url,
                    reply_to_id: draft.reply_to_id,
                    client_token,
                    created_at,
                })
                .await
                .map_err(SendError::Network);
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::MessageSendResult { temp_id, result },
            )));
        });
    }

    fn reject_submit(&mut self, error: SendError) {
        tracing::info!(%error, "send rejected");
        self.state.compose.error = Some(error.to_string());
        self.emit_state();
        self.emit_submit_outcome(SubmitOutcome::Rejected { error });
    }

    /// Put a failed draft back where the user can see it without clobbering new input.
    pub(super) fn restore_draft(&mut self, draft: Draft) {
        if self.state.compose.is_empty() {
            self.state.compose = ComposeState::from_draft(draft);
        } else {
            self.state.unsent_drafts.push(draft);
        }
    }

    pub(super) fn handle_send_result(&mut self, temp_id: String, result: Result<Message, SendError>) {
        let Some(pending) = self.outbox.take_send(&temp_id) else {
            tracing::debug!(temp_id = %temp_id, "send result for unknown temp id");
            return;
        };
        match result {
            Ok(confirmed) => {
                let message_id = confirmed.id.clone();
                let still_provisional = self.store.replace(&temp_id, confirmed);
                tracing::info!(
                    temp_id = %temp_id,
                    message_id = %message_id,
                    already_reconciled = !still_provisional,
                    "send confirmed"
                );
                self.refresh_view();
                self.emit_submit_outcome(SubmitOutcome::Sent {
                    temp_id,
                    message_id,
                });
            }
            Err(error) => {
                // Only a row carrying our client token proves the send landed anyway.
                let landed = self
                    .store
                    .all_view()
                    .iter()
                    .find(|s| {
                        !s.provisional
                            && s.message.client_token.as_deref()
                                == Some(pending.client_token.as_str())
                    })
                    .map(|s| s.message.id.clone());
                if let Some(message_id) = landed {
                    tracing::warn!(temp_id = %temp_id, %error, "send reported failure after reconcile");
                    self.store.remove(&temp_id);
                    self.refresh_view();
                    self.emit_submit_outcome(SubmitOutcome::Sent {
                        temp_id,
                        message_id,
                    });
                    return;
                }
                tracing::warn!(temp_id = %temp_id, %error, "send failed; retracting");
                self.store.remove(&temp_id);
                self.restore_draft(pending.draft);
                self.refresh_view();
                self.toast(error.to_string());
                self.emit_submit_outcome(SubmitOutcome::Failed { temp_id, error });
            }
        }
    }

    /// Own, confirmed, not already being deleted.
    fn editable_message(&self, message_id: &str) -> Option<Message> {
        let message = self.store.get(message_id)?;
        if self.store.is_provisional(message_id)
            || self.outbox.is_deleting(message_id)
            || message.sender_id != self.identity.user_id
        {
            return None;
        }
        Some(message.clone())
    }

    pub(super) fn edit_message(&mut self, message_id: String, content: String) {
        if self.editable_message(&message_id).is_none() {
            tracing::debug!(message_id = %message_id, "edit ignored");
            return;
        }
        let content = content.trim().to_string();
        let len = content.chars().count();
        if content.is_empty() {
            self.toast(ValidationFailure::Empty.to_string());
            return;
        }
        if len > self.config.max_message_chars {
            self.toast(
                ValidationFailure::TooLong {
                    len,
                    max: self.config.max_message_chars,
                }
                .to_string(),
            );
            return;
        }
        if let GateDecision::Blocked { reason, .. } = self.moderation.check_before_send(&content) {
            self.toast(reason);
            return;
        }

        let Some(previous) = self.store.edit(&message_id, &content) else {
            return;
        };
        let op_id = self.outbox.begin_edit(&message_id, content.clone(), previous);
        self.refresh_view();
        self.queue_write(message_id, RemoteWrite::Edit { op_id, content });
    }

    pub(super) fn handle_edit_result(
        &mut self,
        message_id: String,
        op_id: u64,
        result: Result<Message, AdapterError>,
    ) {
        self.write_finished(&message_id);
        let Some(edit) = self.outbox.take_edit(&message_id, op_id) else {
            return;
        };
        match result {
            Ok(confirmed) => {
                if self.store.get(&message_id).is_some() {
                    self.store.upsert(confirmed);
                }
            }
            Err(e) => {
                tracing::warn!(message_id = %message_id, %e, "edit failed; rolling back");
                if self.store.get(&message_id).is_some() {
                    self.store.upsert(edit.base);
                }
                self.toast("Couldn't edit message");
            }
        }
        self.refresh_view();
    }

    pub(super) fn delete_message(&mut self, message_id: String) {
        let Some(message) = self.editable_message(&message_id) else {
            tracing::debug!(message_id = %message_id, "delete ignored");
            return;
        };
        let was_pinned = self.store.is_pinned(&message_id);
        self.store.remove(&message_id);
        let op_id = self.outbox.begin_delete(message, was_pinned);
        self.refresh_view();
        self.queue_write(message_id, RemoteWrite::Delete { op_id });
    }

    pub(super) fn handle_delete_result(
        &mut self,
        message_id: String,
        op_id: u64,
        result: Result<bool, AdapterError>,
    ) {
        self.write_finished(&message_id);
        let Some(delete) = self.outbox.take_delete(op_id) else {
            return;
        };
        match result {
            Ok(true) | Err(AdapterError::NotFound) => {
                tracing::info!(message_id = %delete.message.id, "delete confirmed");
                self.store.confirm_delete(&delete.message.id);
            }
            Ok(false) | Err(_) => {
                tracing::warn!(message_id = %delete.message.id, "delete failed; restoring");
                if delete.was_pinned {
                    self.store.set_pinned(&delete.message, true);
                }
                self.store.restore(delete.message);
                self.refresh_view();
                self.toast("Couldn't delete message");
            }
        }
    }

    pub(super) fn set_pinned(&mut self, message_id: String, pin: bool) {
        if !self.capabilities.supports_pinning {
            tracing::debug!("pinning not supported here");
            return;
        }
        let Some(message) = self.store.get(&message_id).cloned() else {
            return;
        };
        if self.store.is_provisional(&message_id) || self.store.is_pinned(&message_id) == pin {
            return;
        }
        self.store.set_pinned(&message, pin);
        let op_id = self.outbox.begin_pin(message, pin);
        self.refresh_view();
        self.queue_write(message_id, RemoteWrite::Pin { op_id, pin });
    }

    pub(super) fn handle_pin_result(
        &mut self,
        message_id: String,
        op_id: u64,
        result: Result<(), AdapterError>,
    ) {
        self.write_finished(&message_id);
        let Some(pending) = self.outbox.take_pin(op_id) else {
            return;
        };
        if result.is_ok() {
            self.store.confirm_pin(&pending.message.id);
        }
        if let Err(e) = result {
            tracing::warn!(message_id = %pending.message.id, %e, pin = pending.pin, "pin failed; reverting");
            self.store.set_pinned(&pending.message, !pending.pin);
            self.refresh_view();
            self.toast(if pending.pin {
                "Couldn't pin message"
            } else {
                "Couldn't unpin message"
            });
        }
    }

    pub(super) fn toggle_reaction(&mut self, message_id: String, emoji: String) {
        if self.store.get(&message_id).is_none() || self.store.is_provisional(&message_id) {
            return;
        }
        let now = now_millis();
        let key = RateLimitKey::new(RateAction::React, &self.identity.user_id);
        let decision = self.limiter.allow(&key, now);
        if !decision.allowed {
            let retry_after = decision.retry_after.unwrap_or_default();
            self.toast(SendError::RateLimited { retry_after }.to_string());
            return;
        }
        self.limiter.record(&key, now);

        let current = self.outbox.effective_reactions(&self.reactions, &message_id);
        let outcome = toggle(&current, &message_id, &self.identity, &emoji);
        let add = outcome.is_add();
        let op_id = self.outbox.begin_reaction(message_id.clone(), outcome);
        self.refresh_view();
        self.queue_write(message_id, RemoteWrite::React { op_id, emoji, add });
    }

    pub(super) fn handle_reaction_result(
        &mut self,
        message_id: String,
        op_id: u64,
        result: Result<Option<Reaction>, AdapterError>,
    ) {
        self.write_finished(&message_id);
        let Some(pending) = self.outbox.take_reaction(op_id) else {
            return;
        };
        match result {
            Ok(confirmed) => {
                let epoch = self.store.mark_local_write();
                self.reactions_settled.insert(pending.message_id.clone(), epoch);
                // Fold the confirmed change into the server map until the next tick.
                let rows = self.reactions.entry(pending.message_id).or_default();
                let settled = match confirmed {
                    Some(reaction) => ToggleOutcome {
                        added: Some(reaction),
                        removed: vec![],
                    },
                    None => pending.outcome,
                };
                apply_toggle(rows, &settled);
            }
            Err(e) => {
                tracing::warn!(%e, "reaction toggle failed; rolling back");
                self.toast("Couldn't update reaction");
            }
        }
        self.refresh_view();
    }
}

impl ConversationCore {
    fn queue_write(&mut self, message_id: String, write: RemoteWrite) {
        if let Some(write) = self.outbox.schedule_write(&message_id, write) {
            self.spawn_write(message_id, write);
        }
    }

    fn write_finished(&mut self, message_id: &str) {
        if let Some(write) = self.outbox.next_write(message_id) {
            self.spawn_write(message_id.to_string(), write);
        }
    }

    fn spawn_write(&self, message_id: String, write: RemoteWrite) {
        let adapter = self.adapter.clone();
        let tx = self.core_sender.clone();
        let user_id = self.identity.user_id.clone();
        self.runtime.spawn(async move {
            let event = match write {
                RemoteWrite::Edit { op_id, content } => {
                    let result = adapter.edit_message(&message_id, &content).await;
                    InternalEvent::EditResult {
                        message_id,
                        op_id,
                        result,
                    }
                }
                RemoteWrite::Delete { op_id } => {
                    let result = adapter.delete_message(&message_id).await;
                    InternalEvent::DeleteResult {
                        message_id,
                        op_id,
                        result,
                    }
                }
                RemoteWrite::Pin { op_id, pin } => {
                    let result = if pin {
                        adapter.pin_message(&message_id).await
                    } else {
                        adapter.unpin_message(&message_id).await
                    };
                    InternalEvent::PinResult {
                        message_id,
                        op_id,
                        result,
                    }
                }
                RemoteWrite::React { op_id, emoji, add } => {
                    let result = if add {
                        adapter
                            .add_reaction(&message_id, &user_id, &emoji)
                            .await
                            .map(Some)
                    } else {
                        adapter
                            .remove_reaction(&message_id, &user_id, &emoji)
                            .await
                            .map(|_| None)
                    };
                    InternalEvent::ReactionResult {
                        message_id,
                        op_id,
                        result,
                    }
                }
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(event)));
        });
    }
}
