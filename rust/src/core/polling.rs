use std::collections::HashSet;

use super::sync::TickDecision;
use super::*;
use crate::adapter::AdapterError;
use crate::state::TypingIndicator;
use crate::updates::SyncBatch;

/// Messages and pinned set concurrently, then reactions for the union in one call.
/// Only the message read is fatal to the tick.
async fn fetch_sync_batch(
    adapter: &dyn ConversationAdapter,
    key: &ConversationKey,
    limit: usize,
    with_pinned: bool,
) -> Result<SyncBatch, AdapterError> {
    let pinned_fut = async {
        if with_pinned {
            Some(adapter.fetch_pinned(key).await)
        } else {
            None
        }
    };
    let (messages, pinned) = tokio::join!(adapter.fetch_messages(key, limit), pinned_fut);
    let messages = messages?;
    let pinned = match pinned {
        Some(Ok(p)) => Some(p),
        Some(Err(e)) => {
            tracing::warn!(%e, "pinned fetch failed; keeping previous set");
            None
        }
        None => None,
    };

    let mut seen = HashSet::new();
    let ids: Vec<String> = messages
        .iter()
        .chain(pinned.iter().flatten())
        .map(|m| m.id.clone())
        .filter(|id| seen.insert(id.clone()))
        .collect();
    let reactions = if ids.is_empty() {
        Some(HashMap::new())
    } else {
        match adapter.fetch_reactions(&ids).await {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!(%e, "reaction fetch failed; keeping previous map");
                None
            }
        }
    };

    Ok(SyncBatch {
        messages,
        pinned,
        reactions,
    })
}

impl ConversationCore {
    pub(super) fn schedule_poll(&self, token: u64) {
        self.send_internal_after(self.config.poll_interval(), InternalEvent::PollTick { token });
    }

    pub(super) fn schedule_typing_poll(&self, token: u64, after: Duration) {
        self.send_internal_after(after, InternalEvent::TypingPollTick { token });
    }

    pub(super) fn handle_poll_tick(&mut self, token: u64) {
        if !self.sync.is_current_poll(token) {
            return;
        }
        self.sync_tick();
        self.limiter.prune(now_millis());
        let token = self.sync.arm_poll();
        self.schedule_poll(token);
    }

    /// Timer tick or `SyncNow`: skipped while a fetch is in flight.
    pub(super) fn sync_tick(&mut self) {
        let decision = self.sync.begin_tick();
        self.run_sync(decision);
    }

    /// Foreground or history growth: queues behind an in-flight fetch.
    pub(super) fn sync_force(&mut self) {
        let decision = self.sync.force();
        self.run_sync(decision);
    }

    fn run_sync(&mut self, decision: TickDecision) {
        match decision {
            TickDecision::Fetch { generation } => {
                let since = self.store.epoch();
                let adapter = self.adapter.clone();
                let key = self.key.clone();
                let limit = self.sync.window_limit();
                let with_pinned = self.capabilities.supports_pinning;
                let tx = self.core_sender.clone();
                self.runtime.spawn(async move {
                    let result = fetch_sync_batch(adapter.as_ref(), &key, limit, with_pinned).await;
                    let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::SyncFetched {
                        generation,
                        since,
                        result,
                    })));
                });
            }
            TickDecision::Skipped => {
                tracing::debug!(
                    skipped = self.sync.status().ticks_skipped,
                    "sync in flight; tick skipped"
                );
            }
            TickDecision::Idle => {}
        }
    }

    pub(super) fn handle_sync_fetched(
        &mut self,
        generation: u64,
        since: u64,
        result: Result<SyncBatch, AdapterError>,
    ) {
        let Some(refetch) = self.sync.finish(generation) else {
            tracing::debug!(generation, "dropping stale sync result");
            return;
        };

        match result {
            Ok(batch) => {
                let known: HashSet<String> = self.store.message_ids().into_iter().collect();
                let new_senders: Vec<String> = batch
                    .messages
                    .iter()
                    .filter(|m| !known.contains(&m.id))
                    .map(|m| m.sender_id.clone())
                    .collect();

                let stats = self.store.merge(
                    batch.messages,
                    batch.pinned,
                    self.config.reconcile_tolerance_ms as i64,
                    since,
                );
                if let Some(mut reactions) = batch.reactions {
                    for (message_id, epoch) in &self.reactions_settled {
                        if *epoch <= since {
                            continue;
                        }
                        match self.reactions.remove(message_id) {
                            Some(local) => reactions.insert(message_id.clone(), local),
                            None => reactions.remove(message_id),
                        };
                    }
                    self.reactions = reactions;
                }
                self.reactions_settled.retain(|_, epoch| *epoch > since);
                self.outbox.reapply(&mut self.store);
                for sender in &new_senders {
                    self.typing.clear_peer(sender);
                }
                self.sync.record_success(now_millis());
                tracing::info!(
                    added = stats.added,
                    updated = stats.updated,
                    removed = stats.removed,
                    reconciled = stats.reconciled,
                    total = self.store.len(),
                    "sync merged"
                );
                self.refresh_view();
            }
            Err(e) => {
                let failures = self.sync.record_failure();
                tracing::warn!(%e, failures, "sync fetch failed");
                self.state.sync = self.sync.status().clone();
                if failures == self.config.sync_failure_toast_threshold {
                    self.toast("Can't reach the server. Retrying…");
                } else {
                    self.emit_state();
                }
            }
        }

        if refetch {
            self.sync_force();
        }
    }

    pub(super) fn handle_typing_poll_tick(&mut self, token: u64) {
        if !self.typing.is_current_poll(token) {
            return;
        }
        if let Some(generation) = self.typing.begin_poll() {
            let adapter = self.adapter.clone();
            let key = self.key.clone();
            let tx = self.core_sender.clone();
            self.runtime.spawn(async move {
                let result = adapter.fetch_typing_peers(&key).await;
                let _ = tx.send(CoreMsg::Internal(Box::new(
                    InternalEvent::TypingPeersFetched { generation, result },
                )));
            });
        }
        let token = self.typing.arm_poll();
        self.schedule_typing_poll(token, self.config.typing_poll_interval());
    }

    pub(super) fn handle_typing_peers_fetched(
        &mut self,
        generation: u64,
        result: Result<Vec<TypingIndicator>, AdapterError>,
    ) {
        if !self.typing.finish_poll(generation) {
            return;
        }
        match result {
            Ok(peers) => {
                self.typing.set_peers(peers);
                let observed = self.typing.observed_peers(now_millis(), &self.identity.user_id);
                if observed != self.state.typing_peers {
                    self.state.typing_peers = observed;
                    self.emit_state();
                }
            }
            Err(e) => tracing::debug!(%e, "typing fetch failed"),
        }
    }

    /// Keystroke in the compose box: debounced ping plus a fresh idle timer.
    pub(super) fn note_local_typing(&mut self) {
        let now = now_millis();
        if self.typing.on_local_activity(now) {
            let adapter = self.adapter.clone();
            let key = self.key.clone();
            let actor = self.identity.clone();
            let expires_at = self.typing.expires_at(now);
            self.runtime.spawn(async move {
                if let Err(e) = adapter.send_typing_ping(&key, &actor, expires_at).await {
                    tracing::debug!(%e, "typing ping failed");
                }
            });
        }
        let token = self.typing.idle_token();
        self.send_internal_after(self.config.typing_idle(), InternalEvent::TypingIdle { token });
    }

    pub(super) fn handle_typing_idle(&mut self, token: u64) {
        if self.typing.on_idle(token) {
            self.spawn_clear_typing();
        }
    }

    pub(super) fn stop_local_typing(&mut self) {
        if self.typing.clear_local() && self.capabilities.supports_typing {
            self.spawn_clear_typing();
        }
    }

    fn spawn_clear_typing(&self) {
        let adapter = self.adapter.clone();
        let key = self.key.clone();
        let user_id = self.identity.user_id.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.clear_typing(&key, &user_id).await {
                tracing::debug!(%e, "typing clear failed");
            }
        });
    }
}
