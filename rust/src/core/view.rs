use super::reactions::aggregate;
use super::reply::reply_preview;
use super::*;
use crate::state::{Message, MessageDeliveryState, MessageView};

impl ConversationCore {
    /// Rebuild the rendered message list, pinned strip and typing row from the store,
    /// then publish.
    pub(super) fn refresh_view(&mut self) {
        let all = self.store.all_view();
        let window: Vec<&Message> = all.iter().map(|s| &s.message).collect();

        let messages: Vec<MessageView> = all
            .iter()
            .map(|s| self.message_view(&s.message, s.provisional, &window))
            .collect();

        let pinned: Vec<MessageView> = if self.capabilities.supports_pinning {
            self.store
                .pinned_view()
                .iter()
                .filter(|m| !self.outbox.is_deleting(&m.id))
                .map(|m| self.message_view(m, false, &window))
                .collect()
        } else {
            vec![]
        };

        let typing_peers = if self.capabilities.supports_typing {
            self.typing
                .observed_peers(now_millis(), &self.identity.user_id)
        } else {
            vec![]
        };

        self.state.messages = messages;
        self.state.pinned = pinned;
        self.state.typing_peers = typing_peers;
        self.state.sync = self.sync.status().clone();
        self.emit_state();
    }

    fn message_view(&self, message: &Message, provisional: bool, window: &[&Message]) -> MessageView {
        let reactions = aggregate(
            &self.outbox.effective_reactions(&self.reactions, &message.id),
            &self.identity.user_id,
        );
        let reply = if self.capabilities.supports_threading {
            message
                .reply_to_id
                .as_deref()
                .map(|id| reply_preview(id, window.iter().copied()))
        } else {
            None
        };
        MessageView {
            message: message.clone(),
            delivery: if provisional {
                MessageDeliveryState::Pending
            } else {
                MessageDeliveryState::Sent
            },
            is_mine: message.sender_id == self.identity.user_id,
            is_pinned: self.store.is_pinned(&message.id),
            reactions,
            reply,
        }
    }
}
