use std::collections::HashMap;

use crate::state::TypingIndicator;

/// Local typing emission plus the last observed peer list.
///
/// Emission is debounced: after a ping, further keystrokes are silent until
/// `debounce_ms` has passed. Every keystroke re-arms the idle timer; an idle token
/// that is no longer current is ignored.
#[derive(Debug)]
pub struct TypingIndicatorTracker {
    debounce_ms: i64,
    ttl_ms: i64,
    last_emitted_at: Option<i64>,
    emitting: bool,
    idle_token: u64,
    peers: Vec<TypingIndicator>,
    poll_token: u64,
    poll_in_flight: bool,
    generation: u64,
}

impl TypingIndicatorTracker {
    pub fn new(debounce_ms: i64, ttl_ms: i64) -> Self {
        Self {
            debounce_ms,
            ttl_ms,
            last_emitted_at: None,
            emitting: false,
            idle_token: 0,
            peers: vec![],
            poll_token: 0,
            poll_in_flight: false,
            generation: 0,
        }
    }

    /// Returns true when a ping should go out now.
    pub fn on_local_activity(&mut self, now: i64) -> bool {
        self.idle_token = self.idle_token.saturating_add(1);
        self.emitting = true;
        let due = match self.last_emitted_at {
            None => true,
            Some(last) => now - last >= self.debounce_ms,
        };
        if due {
            self.last_emitted_at = Some(now);
        }
        due
    }

    pub fn idle_token(&self) -> u64 {
        self.idle_token
    }

    pub fn expires_at(&self, now: i64) -> i64 {
        now.saturating_add(self.ttl_ms)
    }

    /// Idle timer fired. Returns true when the server-side indicator should be cleared.
    pub fn on_idle(&mut self, token: u64) -> bool {
        if token != self.idle_token || !self.emitting {
            return false;
        }
        self.emitting = false;
        self.last_emitted_at = None;
        true
    }

    /// Stop emitting (message sent, compose cleared, conversation closed).
    /// Returns true if an indicator may be live on the server.
    pub fn clear_local(&mut self) -> bool {
        self.idle_token = self.idle_token.saturating_add(1);
        self.last_emitted_at = None;
        std::mem::replace(&mut self.emitting, false)
    }

    pub fn is_emitting(&self) -> bool {
        self.emitting
    }

    pub fn set_peers(&mut self, peers: Vec<TypingIndicator>) {
        self.peers = peers;
    }

    /// Peer typing a real message implies they stopped typing.
    pub fn clear_peer(&mut self, user_id: &str) {
        self.peers.retain(|p| p.user_id != user_id);
    }

    /// One entry per user (the latest expiry wins), sorted by display name.
    pub fn observed_peers(&self, now: i64, self_id: &str) -> Vec<TypingIndicator> {
        let mut latest: HashMap<&str, &TypingIndicator> = HashMap::new();
        for p in self
            .peers
            .iter()
            .filter(|p| p.expires_at > now && p.user_id != self_id)
        {
            latest
                .entry(p.user_id.as_str())
                .and_modify(|seen| {
                    if p.expires_at > seen.expires_at {
                        *seen = p;
                    }
                })
                .or_insert(p);
        }
        let mut out: Vec<TypingIndicator> = latest.into_values().cloned().collect();
        out.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        out
    }

    pub fn arm_poll(&mut self) -> u64 {
        self.poll_token = self.poll_token.saturating_add(1);
        self.poll_token
    }

    pub fn is_current_poll(&self, token: u64) -> bool {
        token == self.poll_token
    }

    /// Start a peer fetch unless one is already running.
    pub fn begin_poll(&mut self) -> Option<u64> {
        if self.poll_in_flight {
            return None;
        }
        self.poll_in_flight = true;
        Some(self.generation)
    }

    /// Returns whether the result belongs to the current generation.
    pub fn finish_poll(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            return false;
        }
        self.poll_in_flight = false;
        true
    }

    /// Invalidate timers and in-flight polls.
    pub fn stop(&mut self) {
        self.poll_token = self.poll_token.saturating_add(1);
        self.generation = self.generation.saturating_add(1);
        self.poll_in_flight = false;
        self.peers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConversationKey;

    fn peer(user: &str, expires_at: i64) -> TypingIndicator {
        TypingIndicator {
            conversation_key: ConversationKey::group("g1"),
            user_id: user.into(),
            display_name: user.to_uppercase(),
            expires_at,
        }
    }

    #[test]
    fn emits_at_most_once_per_debounce_window() {
        let mut t = TypingIndicatorTracker::new(2_000, 5_000);
        assert!(t.on_local_activity(0));
        assert!(!t.on_local_activity(500));
        assert!(!t.on_local_activity(1_999));
        assert!(t.on_local_activity(2_000));
        assert!(!t.on_local_activity(3_000));
    }

    #[test]
    fn idle_clears_only_for_latest_keystroke() {
        let mut t = TypingIndicatorTracker::new(2_000, 5_000);
        t.on_local_activity(0);
        let stale = t.idle_token();
        t.on_local_activity(100);
        assert!(!t.on_idle(stale));
        assert!(t.on_idle(t.idle_token()));
        assert!(!t.is_emitting());
        // Next keystroke pings immediately again.
        assert!(t.on_local_activity(200));
    }

    #[test]
    fn sending_clears_local_indicator() {
        let mut t = TypingIndicatorTracker::new(2_000, 5_000);
        t.on_local_activity(0);
        let token = t.idle_token();
        assert!(t.clear_local());
        assert!(!t.clear_local());
        assert!(!t.on_idle(token));
    }

    #[test]
    fn observed_peers_skip_expired_and_self() {
        let mut t = TypingIndicatorTracker::new(2_000, 5_000);
        t.set_peers(vec![peer("bob", 1_500), peer("carol", 900), peer("me", 5_000)]);
        let seen: Vec<String> = t
            .observed_peers(1_000, "me")
            .into_iter()
            .map(|p| p.user_id)
            .collect();
        assert_eq!(seen, vec!["bob"]);
    }

    #[test]
    fn a_peer_listed_twice_shows_once() {
        let mut t = TypingIndicatorTracker::new(2_000, 5_000);
        let renamed = TypingIndicator {
            display_name: "AAA".into(),
            ..peer("bob", 3_000)
        };
        t.set_peers(vec![peer("bob", 2_000), peer("alice", 2_000), renamed]);
        let seen: Vec<(String, String)> = t
            .observed_peers(1_000, "me")
            .into_iter()
            .map(|p| (p.user_id, p.display_name))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("bob".to_string(), "AAA".to_string()),
                ("alice".to_string(), "ALICE".to_string()),
            ]
        );
    }

    #[test]
    fn stale_poll_results_are_rejected_after_stop() {
        let mut t = TypingIndicatorTracker::new(2_000, 5_000);
        let generation = t.begin_poll().unwrap();
        assert!(t.begin_poll().is_none());
        t.stop();
        assert!(!t.finish_poll(generation));
        assert!(t.begin_poll().is_some());
    }
}
