use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::state::Message;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredMessage {
    pub message: Message,
    /// Submitted locally and not yet matched to a server row.
    pub provisional: bool,
    local_seq: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub reconciled: usize,
}

/// Ordered message log for one conversation plus its pinned subset.
///
/// Every mutation swaps in a fresh `Arc<[StoredMessage]>`; a snapshot handed out by
/// `all_view` is never modified afterwards.
#[derive(Debug)]
pub struct MessageStore {
    messages: Arc<[StoredMessage]>,
    pinned: Arc<[Message]>,
    next_seq: u64,
    /// Bumped by every write the server confirmed locally. A fetch records the epoch
    /// it started at; anything settled later wins over that fetch's window.
    epoch: u64,
    settled: HashMap<String, u64>,
    tombstones: HashMap<String, u64>,
    pins_settled: HashMap<String, u64>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        Self {
            messages: Arc::from(Vec::new()),
            pinned: Arc::from(Vec::new()),
            next_seq: 1,
            epoch: 0,
            settled: HashMap::new(),
            tombstones: HashMap::new(),
            pins_settled: HashMap::new(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Record a server-confirmed local write and return its epoch.
    pub fn mark_local_write(&mut self) -> u64 {
        self.epoch = self.epoch.saturating_add(1);
        self.epoch
    }

    /// A delete the server acknowledged: a window fetched before it won't bring the row back.
    pub fn confirm_delete(&mut self, id: &str) {
        let epoch = self.mark_local_write();
        self.settled.remove(id);
        self.tombstones.insert(id.to_string(), epoch);
    }

    /// A pin or unpin the server acknowledged; the local pinned state wins over older windows.
    pub fn confirm_pin(&mut self, id: &str) {
        let epoch = self.mark_local_write();
        self.pins_settled.insert(id.to_string(), epoch);
    }

    fn settle(&mut self, id: &str) {
        let epoch = self.mark_local_write();
        self.tombstones.remove(id);
        self.settled.insert(id.to_string(), epoch);
    }

    pub fn all_view(&self) -> Arc<[StoredMessage]> {
        self.messages.clone()
    }

    pub fn pinned_view(&self) -> Arc<[Message]> {
        self.pinned.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages
            .iter()
            .find(|s| s.message.id == id)
            .map(|s| &s.message)
    }

    pub fn is_provisional(&self, id: &str) -> bool {
        self.messages
            .iter()
            .any(|s| s.message.id == id && s.provisional)
    }

    pub fn is_pinned(&self, id: &str) -> bool {
        self.pinned.iter().any(|m| m.id == id)
    }

    pub fn message_ids(&self) -> Vec<String> {
        self.messages.iter().map(|s| s.message.id.clone()).collect()
    }

    /// Add a provisional (locally submitted) message.
    pub fn append(&mut self, message: Message) {
        let seq = self.bump_seq();
        let mut next: Vec<StoredMessage> = self
            .messages
            .iter()
            .filter(|s| s.message.id != message.id)
            .cloned()
            .collect();
        next.push(StoredMessage {
            message,
            provisional: true,
            local_seq: seq,
        });
        self.commit(next);
    }

    /// Swap a provisional for its confirmed server row. Idempotent: if a merge already
    /// reconciled `temp_id`, the confirmed row is upserted without creating a duplicate.
    /// Returns whether `temp_id` was still present.
    pub fn replace(&mut self, temp_id: &str, confirmed: Message) -> bool {
        self.settle(&confirmed.id);
        let had_temp = self.messages.iter().any(|s| s.message.id == temp_id);
        let mut next: Vec<StoredMessage> = self
            .messages
            .iter()
            .filter(|s| s.message.id != temp_id && s.message.id != confirmed.id)
            .cloned()
            .collect();
        next.push(StoredMessage {
            message: confirmed,
            provisional: false,
            local_seq: 0,
        });
        self.commit(next);
        had_temp
    }

    /// Insert or overwrite a confirmed row (also used to undo a failed delete).
    pub fn upsert(&mut self, message: Message) {
        self.settle(&message.id);
        let mut next: Vec<StoredMessage> = self
            .messages
            .iter()
            .filter(|s| s.message.id != message.id)
            .cloned()
            .collect();
        next.push(StoredMessage {
            message,
            provisional: false,
            local_seq: 0,
        });
        self.commit(next);
    }

    pub fn restore(&mut self, message: Message) {
        self.upsert(message);
    }

    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let removed = self.get(id).cloned();
        if removed.is_some() {
            let next: Vec<StoredMessage> = self
                .messages
                .iter()
                .filter(|s| s.message.id != id)
                .cloned()
                .collect();
            self.commit(next);
        }
        if self.is_pinned(id) {
            let pinned: Vec<Message> = self.pinned.iter().filter(|m| m.id != id).cloned().collect();
            self.pinned = Arc::from(pinned);
        }
        removed
    }

    /// Overwrite the content of `id`, returning the message as it was.
    pub fn edit(&mut self, id: &str, content: &str) -> Option<Message> {
        let previous = self.get(id).cloned()?;
        let next: Vec<StoredMessage> = self
            .messages
            .iter()
            .map(|s| {
                if s.message.id != id {
                    return s.clone();
                }
                let mut s = s.clone();
                s.message.content = content.to_string();
                s.message.is_edited = true;
                s
            })
            .collect();
        self.commit(next);
        Some(previous)
    }

    pub fn set_pinned(&mut self, message: &Message, pinned: bool) {
        let mut next: Vec<Message> = self
            .pinned
            .iter()
            .filter(|m| m.id != message.id)
            .cloned()
            .collect();
        if pinned {
            next.push(message.clone());
            next.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        }
        self.pinned = Arc::from(next);
    }

    /// Fold a freshly fetched server window into the log.
    ///
    /// Provisional entries survive until a remote row matches them, by client token
    /// first and otherwise by sender + content + `|Δcreated_at| <= tolerance_ms`. Only
    /// rows the store does not already hold as confirmed can claim a provisional, and
    /// each claims at most one, oldest first. Confirmed rows missing from the window
    /// are dropped only when they fall inside its `(oldest, newest]` range; history
    /// that scrolled out and rows newer than the window are kept.
    ///
    /// `since` is the store epoch when the fetch started. Rows, deletes and pins
    /// settled locally after that are kept as they are. `pinned: None` keeps the
    /// current pinned set.
    pub fn merge(
        &mut self,
        remote: Vec<Message>,
        pinned: Option<Vec<Message>>,
        tolerance_ms: i64,
        since: u64,
    ) -> MergeStats {
        let mut stats = MergeStats::default();
        let settled_after = |map: &HashMap<String, u64>, id: &str| {
            map.get(id).is_some_and(|epoch| *epoch > since)
        };

        let mut seen = HashSet::new();
        let remote: Vec<Message> = remote
            .into_iter()
            .filter(|m| seen.insert(m.id.clone()))
            .filter(|m| !settled_after(&self.tombstones, &m.id))
            .collect();
        let remote_ids: HashSet<&str> = remote.iter().map(|m| m.id.as_str()).collect();
        let window_oldest = remote.iter().map(|m| m.created_at).min();
        let window_newest = remote.iter().map(|m| m.created_at).max();

        let mut provisionals: Vec<&StoredMessage> =
            self.messages.iter().filter(|s| s.provisional).collect();
        provisionals.sort_by_key(|s| s.local_seq);
        let mut consumed = vec![false; provisionals.len()];

        let existing: HashMap<&str, &StoredMessage> = self
            .messages
            .iter()
            .filter(|s| !s.provisional)
            .map(|s| (s.message.id.as_str(), s))
            .collect();

        let mut next: Vec<StoredMessage> = Vec::with_capacity(remote.len() + provisionals.len());
        for row in &remote {
            match existing.get(row.id.as_str()) {
                Some(local) if settled_after(&self.settled, &row.id) => {
                    next.push((*local).clone());
                    continue;
                }
                Some(local) if local.message != *row => stats.updated += 1,
                Some(_) => {}
                None => match match_provisional(row, &provisionals, &consumed, tolerance_ms) {
                    Some(i) => {
                        consumed[i] = true;
                        stats.reconciled += 1;
                    }
                    None => stats.added += 1,
                },
            }
            next.push(StoredMessage {
                message: row.clone(),
                provisional: false,
                local_seq: 0,
            });
        }

        for stored in self.messages.iter().filter(|s| !s.provisional) {
            if remote_ids.contains(stored.message.id.as_str()) {
                continue;
            }
            let at = stored.message.created_at;
            let inside_window = match (window_oldest, window_newest) {
                (Some(oldest), Some(newest)) => at > oldest && at <= newest,
                _ => true,
            };
            if inside_window && !settled_after(&self.settled, &stored.message.id) {
                stats.removed += 1;
            } else {
                next.push(stored.clone());
            }
        }

        for (i, stored) in provisionals.iter().enumerate() {
            if !consumed[i] && !remote_ids.contains(stored.message.id.as_str()) {
                next.push((*stored).clone());
            }
        }

        self.commit(next);

        if let Some(pinned) = pinned {
            let mut seen = HashSet::new();
            let mut pinned: Vec<Message> = pinned
                .into_iter()
                .filter(|m| seen.insert(m.id.clone()))
                .filter(|m| !settled_after(&self.tombstones, &m.id))
                .collect();
            for (id, epoch) in &self.pins_settled {
                if *epoch <= since {
                    continue;
                }
                pinned.retain(|m| &m.id != id);
                if let Some(local) = self.pinned.iter().find(|m| &m.id == id) {
                    pinned.push(local.clone());
                }
            }
            pinned.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            self.pinned = Arc::from(pinned);
        }

        // Later fetches start at or after the current epoch and see these writes.
        self.settled.retain(|_, epoch| *epoch > since);
        self.tombstones.retain(|_, epoch| *epoch > since);
        self.pins_settled.retain(|_, epoch| *epoch > since);

        stats
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        seq
    }

    fn commit(&mut self, mut next: Vec<StoredMessage>) {
        next.sort_by(|a, b| {
            a.message
                .created_at
                .cmp(&b.message.created_at)
                .then(a.provisional.cmp(&b.provisional))
                .then(a.local_seq.cmp(&b.local_seq))
                .then_with(|| a.message.id.cmp(&b.message.id))
        });
        self.messages = Arc::from(next);
    }
}

fn match_provisional(
    row: &Message,
    provisionals: &[&StoredMessage],
    consumed: &[bool],
    tolerance_ms: i64,
) -> Option<usize> {
    if let Some(token) = row.client_token.as_deref() {
        let by_token = provisionals.iter().enumerate().position(|(i, p)| {
            !consumed[i] && p.message.client_token.as_deref() == Some(token)
        });
        if by_token.is_some() {
            return by_token;
        }
    }
    provisionals.iter().enumerate().position(|(i, p)| {
        let p = &p.message;
        let tokens_conflict = matches!(
            (row.client_token.as_deref(), p.client_token.as_deref()),
            (Some(a), Some(b)) if a != b
        );
        !consumed[i]
            && !tokens_conflict
            && p.sender_id == row.sender_id
            && p.content == row.content
            && (p.created_at - row.created_at).abs() <= tolerance_ms
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConversationKey;

    fn msg(id: &str, sender: &str, content: &str, at: i64) -> Message {
        Message {
            id: id.into(),
            conversation_key: ConversationKey::group("g1"),
            sender_id: sender.into(),
            sender_name: None,
            content: content.into(),
            image_url: None,
            created_at: at,
            is_edited: false,
            reply_to_id: None,
            client_token: None,
        }
    }

    /// Merge a window fetched right now.
    fn sync(
        store: &mut MessageStore,
        remote: Vec<Message>,
        pinned: Option<Vec<Message>>,
        tolerance_ms: i64,
    ) -> MergeStats {
        let since = store.epoch();
        store.merge(remote, pinned, tolerance_ms, since)
    }

    fn ids(store: &MessageStore) -> Vec<String> {
        store.all_view().iter().map(|s| s.message.id.clone()).collect()
    }

    #[test]
    fn merge_keeps_unmatched_provisional_in_place() {
        let mut store = MessageStore::new();
        sync(&mut store, vec![msg("s1", "bob", "hi", 1_000)], None, 10_000);
        let mut local = msg("local-1", "me", "pending", 2_000);
        local.client_token = Some("tok-1".into());
        store.append(local);

        let stats = sync(&mut store,
            vec![msg("s1", "bob", "hi", 1_000), msg("s2", "bob", "later", 3_000)],
            None,
            10_000,
        );
        assert_eq!(stats.added, 1);
        assert_eq!(stats.reconciled, 0);
        assert_eq!(ids(&store), vec!["s1", "local-1", "s2"]);
        assert!(store.is_provisional("local-1"));
    }

    #[test]
    fn merge_drops_provisional_once_confirmed_by_content() {
        let mut store = MessageStore::new();
        store.append(msg("local-1", "me", "hello", 5_000));
        let stats = sync(&mut store, vec![msg("s9", "me", "hello", 5_400)], None, 10_000);
        assert_eq!(stats.reconciled, 1);
        assert_eq!(ids(&store), vec!["s9"]);
        assert!(!store.is_provisional("s9"));
    }

    #[test]
    fn merge_matches_by_client_token_before_content() {
        let mut store = MessageStore::new();
        let mut a = msg("local-a", "me", "same", 1_000);
        a.client_token = Some("tok-a".into());
        let mut b = msg("local-b", "me", "same", 1_001);
        b.client_token = Some("tok-b".into());
        store.append(a);
        store.append(b);

        let mut confirmed_b = msg("s2", "me", "same", 1_002);
        confirmed_b.client_token = Some("tok-b".into());
        sync(&mut store, vec![confirmed_b], None, 10_000);

        assert_eq!(ids(&store), vec!["local-a", "s2"]);
    }

    #[test]
    fn fuzzy_match_consumes_one_provisional_oldest_first() {
        let mut store = MessageStore::new();
        store.append(msg("local-1", "me", "ok", 1_000));
        store.append(msg("local-2", "me", "ok", 1_001));
        sync(&mut store, vec![msg("s1", "me", "ok", 1_100)], None, 10_000);
        assert_eq!(ids(&store), vec!["local-2", "s1"]);
    }

    #[test]
    fn merge_never_duplicates_ids_and_sorts_ascending() {
        let mut store = MessageStore::new();
        sync(&mut store,
            vec![
                msg("s3", "a", "c", 3),
                msg("s1", "a", "a", 1),
                msg("s2", "a", "b", 2),
                msg("s1", "a", "a", 1),
            ],
            None,
            0,
        );
        assert_eq!(ids(&store), vec!["s1", "s2", "s3"]);
        let times: Vec<i64> = store.all_view().iter().map(|s| s.message.created_at).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn server_delete_inside_window_removes_row_but_keeps_older_history() {
        let mut store = MessageStore::new();
        sync(&mut store,
            vec![
                msg("old", "a", "x", 10),
                msg("s1", "a", "x", 100),
                msg("s2", "a", "y", 200),
                msg("s3", "a", "z", 300),
            ],
            None,
            0,
        );
        // Newer window no longer includes "old" (scrolled out) or "s2" (deleted).
        let stats = sync(&mut store,
            vec![msg("s1", "a", "x", 100), msg("s3", "a", "z", 300)],
            None,
            0,
        );
        assert_eq!(stats.removed, 1);
        assert_eq!(ids(&store), vec!["old", "s1", "s3"]);
    }

    #[test]
    fn known_confirmed_row_does_not_claim_a_new_provisional() {
        let mut store = MessageStore::new();
        sync(&mut store, vec![msg("s1", "me", "ok", 1_000)], None, 10_000);
        let mut local = msg("local-2", "me", "ok", 3_000);
        local.client_token = Some("tok-2".into());
        store.append(local);

        let stats = sync(&mut store, vec![msg("s1", "me", "ok", 1_000)], None, 10_000);
        assert_eq!(stats.reconciled, 0);
        assert_eq!(ids(&store), vec!["s1", "local-2"]);
        assert!(store.is_provisional("local-2"));
    }

    #[test]
    fn stale_window_keeps_a_message_confirmed_after_the_fetch_started() {
        let mut store = MessageStore::new();
        sync(&mut store, vec![msg("s1", "bob", "hi", 1_000)], None, 10_000);
        let since = store.epoch();

        store.append(msg("local-1", "me", "mine", 4_000));
        store.replace("local-1", msg("s2", "me", "mine", 4_000));
        // Fetched before create_message landed; s2 sits inside the window's range.
        let stale = vec![msg("s1", "bob", "hi", 1_000), msg("s5", "bob", "yo", 6_000)];
        let stats = store.merge(stale.clone(), None, 10_000, since);
        assert_eq!(stats.removed, 0);
        assert_eq!(ids(&store), vec!["s1", "s2", "s5"]);

        // The same window fetched afterwards means the server really deleted s2.
        sync(&mut store, stale, None, 10_000);
        assert_eq!(ids(&store), vec!["s1", "s5"]);
    }

    #[test]
    fn rows_newer_than_the_window_are_kept() {
        let mut store = MessageStore::new();
        sync(
            &mut store,
            vec![msg("s1", "a", "x", 100), msg("s2", "a", "y", 900)],
            None,
            0,
        );
        let stats = sync(
            &mut store,
            vec![msg("s1", "a", "x", 100), msg("s0", "a", "w", 50)],
            None,
            0,
        );
        assert_eq!(stats.removed, 0);
        assert_eq!(ids(&store), vec!["s0", "s1", "s2"]);
    }

    #[test]
    fn stale_window_does_not_resurrect_a_confirmed_delete_or_revert_a_pin() {
        let mut store = MessageStore::new();
        let a = msg("a", "me", "x", 1);
        let b = msg("b", "me", "y", 2);
        sync(&mut store, vec![a.clone(), b.clone()], Some(vec![]), 0);
        let since = store.epoch();

        store.remove("a");
        store.confirm_delete("a");
        store.set_pinned(&b, true);
        store.confirm_pin("b");

        store.merge(vec![a.clone(), b.clone()], Some(vec![]), 0, since);
        assert_eq!(ids(&store), vec!["b"]);
        assert!(store.is_pinned("b"));

        // A window fetched after both writes is authoritative again.
        sync(&mut store, vec![b.clone()], Some(vec![]), 0);
        assert!(!store.is_pinned("b"));
    }

    #[test]
    fn replace_is_idempotent_after_merge_reconciled() {
        let mut store = MessageStore::new();
        let mut local = msg("local-1", "me", "hey", 1_000);
        local.client_token = Some("tok".into());
        store.append(local);

        let mut confirmed = msg("s1", "me", "hey", 1_050);
        confirmed.client_token = Some("tok".into());
        sync(&mut store, vec![confirmed.clone()], None, 10_000);

        assert!(!store.replace("local-1", confirmed.clone()));
        assert!(!store.replace("local-1", confirmed));
        assert_eq!(ids(&store), vec!["s1"]);
    }

    #[test]
    fn replace_swaps_temp_for_confirmed() {
        let mut store = MessageStore::new();
        store.append(msg("local-1", "me", "hey", 1_000));
        assert!(store.replace("local-1", msg("s1", "me", "hey", 1_010)));
        assert_eq!(ids(&store), vec!["s1"]);
        assert!(!store.is_provisional("s1"));
    }

    #[test]
    fn pinned_set_replaced_only_when_fetched() {
        let mut store = MessageStore::new();
        let pin = msg("s1", "a", "x", 1);
        sync(&mut store, vec![pin.clone()], Some(vec![pin.clone()]), 0);
        assert!(store.is_pinned("s1"));

        sync(&mut store, vec![pin.clone()], None, 0);
        assert!(store.is_pinned("s1"));

        sync(&mut store, vec![pin], Some(vec![]), 0);
        assert!(!store.is_pinned("s1"));
    }

    #[test]
    fn edit_returns_previous_and_marks_edited() {
        let mut store = MessageStore::new();
        store.upsert(msg("s1", "me", "before", 1));
        let prev = store.edit("s1", "after").unwrap();
        assert_eq!(prev.content, "before");
        let now = store.get("s1").unwrap();
        assert_eq!(now.content, "after");
        assert!(now.is_edited);
    }

    #[test]
    fn snapshots_are_immutable() {
        let mut store = MessageStore::new();
        store.upsert(msg("s1", "a", "x", 1));
        let before = store.all_view();
        store.upsert(msg("s2", "a", "y", 2));
        assert_eq!(before.len(), 1);
        assert_eq!(store.len(), 2);
    }
}
