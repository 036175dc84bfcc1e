#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use murmur_core::{
    AdapterError, AdapterResult, ConversationAdapter, ConversationKey, ConversationUpdate,
    Identity, MediaUpload, Message, NewMessage, Reaction, TypingIndicator, UpdateReconciler,
};

pub fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

/// Long poll interval so tests drive sync explicitly; tiny toast timeout stays off.
pub fn write_config(data_dir: &str, extra: serde_json::Value) {
    let mut v = serde_json::json!({
        "poll_interval_ms": 60_000,
        "typing_poll_ms": 60_000,
        "toast_dismiss_ms": 60_000,
    });
    if let (Some(base), Some(extra)) = (v.as_object_mut(), extra.as_object()) {
        for (k, val) in extra {
            base.insert(k.clone(), val.clone());
        }
    }
    let path = std::path::Path::new(data_dir).join(murmur_core::CONFIG_FILE_NAME);
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

#[derive(Clone, Default)]
pub struct Collector {
    pub updates: Arc<Mutex<Vec<ConversationUpdate>>>,
}

impl Collector {
    pub fn snapshot(&self) -> Vec<ConversationUpdate> {
        self.updates.lock().unwrap().clone()
    }
}

impl UpdateReconciler for Collector {
    fn reconcile(&self, update: ConversationUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

/// Holds an adapter call until released, so tests can pin it "in flight".
#[derive(Default)]
pub struct Gate {
    closed: AtomicBool,
    notify: tokio::sync::Notify,
}

impl Gate {
    pub fn hold(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.closed.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn pass(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.closed.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Default)]
struct Server {
    messages: Vec<Message>,
    pinned: Vec<String>,
    reactions: Vec<Reaction>,
    typing: Vec<TypingIndicator>,
}

/// In-memory remote store. Echoes client tokens unless `drop_client_tokens` is set,
/// assigns `srv-N` ids.
#[derive(Default)]
pub struct FakeAdapter {
    server: Mutex<Server>,
    next_id: AtomicU64,
    pub offline: AtomicBool,
    pub fail_reactions_writes: AtomicBool,
    pub fail_uploads: AtomicBool,
    pub drop_client_tokens: AtomicBool,
    pub fetch_gate: Gate,
    pub create_gate: Gate,
    /// Held after the row is stored, before `create_message` answers.
    pub ack_gate: Gate,
    pub fetch_messages_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub typing_pings: AtomicUsize,
    pub typing_clears: AtomicUsize,
    pub reaction_writes: AtomicUsize,
}

impl FakeAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_id(&self) -> String {
        format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn check_online(&self) -> AdapterResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(AdapterError::Network("offline".into()))
        } else {
            Ok(())
        }
    }

    /// A message written by someone else, straight into the server.
    pub fn seed(&self, key: &ConversationKey, sender: &str, content: &str, created_at: i64) -> String {
        let id = self.next_id();
        self.server.lock().unwrap().messages.push(Message {
            id: id.clone(),
            conversation_key: key.clone(),
            sender_id: sender.into(),
            sender_name: Some(sender.to_uppercase()),
            content: content.into(),
            image_url: None,
            created_at,
            is_edited: false,
            reply_to_id: None,
            client_token: None,
        });
        id
    }

    pub fn seed_reaction(&self, message_id: &str, user_id: &str, emoji: &str) {
        let id = self.next_id();
        self.server.lock().unwrap().reactions.push(Reaction {
            id,
            message_id: message_id.into(),
            user_id: user_id.into(),
            user_name: None,
            emoji: emoji.into(),
        });
    }

    pub fn seed_typing(&self, indicator: TypingIndicator) {
        self.server.lock().unwrap().typing.push(indicator);
    }

    pub fn server_messages(&self) -> Vec<Message> {
        self.server.lock().unwrap().messages.clone()
    }

    pub fn server_reactions(&self) -> Vec<Reaction> {
        self.server.lock().unwrap().reactions.clone()
    }
}

#[async_trait::async_trait]
impl ConversationAdapter for FakeAdapter {
    async fn fetch_messages(&self, key: &ConversationKey, limit: usize) -> AdapterResult<Vec<Message>> {
        self.fetch_messages_calls.fetch_add(1, Ordering::SeqCst);
        self.fetch_gate.pass().await;
        self.check_online()?;
        let server = self.server.lock().unwrap();
        let mut rows: Vec<Message> = server
            .messages
            .iter()
            .filter(|m| &m.conversation_key == key)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        let skip = rows.len().saturating_sub(limit);
        Ok(rows.into_iter().skip(skip).collect())
    }

    async fn fetch_pinned(&self, key: &ConversationKey) -> AdapterResult<Vec<Message>> {
        self.check_online()?;
        let server = self.server.lock().unwrap();
        Ok(server
            .messages
            .iter()
            .filter(|m| &m.conversation_key == key && server.pinned.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn fetch_reactions(
        &self,
        message_ids: &[String],
    ) -> AdapterResult<HashMap<String, Vec<Reaction>>> {
        self.check_online()?;
        let server = self.server.lock().unwrap();
        let mut out: HashMap<String, Vec<Reaction>> = HashMap::new();
        for r in &server.reactions {
            if message_ids.contains(&r.message_id) {
                out.entry(r.message_id.clone()).or_default().push(r.clone());
            }
        }
        Ok(out)
    }

    async fn create_message(&self, message: NewMessage) -> AdapterResult<Message> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.create_gate.pass().await;
        self.check_online()?;
        let row = Message {
            id: self.next_id(),
            conversation_key: message.conversation_key,
            sender_id: message.sender_id,
            sender_name: None,
            content: message.content,
            image_url: message.image_url,
            created_at: message.created_at,
            is_edited: false,
            reply_to_id: message.reply_to_id,
            client_token: if self.drop_client_tokens.load(Ordering::SeqCst) {
                None
            } else {
                Some(message.client_token)
            },
        };
        self.server.lock().unwrap().messages.push(row.clone());
        self.ack_gate.pass().await;
        Ok(row)
    }

    async fn edit_message(&self, message_id: &str, content: &str) -> AdapterResult<Message> {
        self.check_online()?;
        let mut server = self.server.lock().unwrap();
        let row = server
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or(AdapterError::NotFound)?;
        row.content = content.into();
        row.is_edited = true;
        Ok(row.clone())
    }

    async fn delete_message(&self, message_id: &str) -> AdapterResult<bool> {
        self.check_online()?;
        let mut server = self.server.lock().unwrap();
        let before = server.messages.len();
        server.messages.retain(|m| m.id != message_id);
        server.pinned.retain(|id| id != message_id);
        Ok(server.messages.len() < before)
    }

    async fn add_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> AdapterResult<Reaction> {
        self.reaction_writes.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if self.fail_reactions_writes.load(Ordering::SeqCst) {
            return Err(AdapterError::Rejected("reactions disabled".into()));
        }
        let reaction = Reaction {
            id: self.next_id(),
            message_id: message_id.into(),
            user_id: user_id.into(),
            user_name: None,
            emoji: emoji.into(),
        };
        self.server.lock().unwrap().reactions.push(reaction.clone());
        Ok(reaction)
    }

    async fn remove_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> AdapterResult<()> {
        self.reaction_writes.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        if self.fail_reactions_writes.load(Ordering::SeqCst) {
            return Err(AdapterError::Rejected("reactions disabled".into()));
        }
        self.server
            .lock()
            .unwrap()
            .reactions
            .retain(|r| !(r.message_id == message_id && r.user_id == user_id && r.emoji == emoji));
        Ok(())
    }

    async fn pin_message(&self, message_id: &str) -> AdapterResult<()> {
        self.check_online()?;
        let mut server = self.server.lock().unwrap();
        if !server.pinned.iter().any(|id| id == message_id) {
            server.pinned.push(message_id.into());
        }
        Ok(())
    }

    async fn unpin_message(&self, message_id: &str) -> AdapterResult<()> {
        self.check_online()?;
        self.server.lock().unwrap().pinned.retain(|id| id != message_id);
        Ok(())
    }

    async fn upload_media(&self, upload: MediaUpload) -> AdapterResult<String> {
        self.check_online()?;
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(AdapterError::Rejected("upload refused".into()));
        }
        Ok(format!("https://cdn.test/{}", upload.file_name))
    }

    async fn send_typing_ping(
        &self,
        key: &ConversationKey,
        actor: &Identity,
        expires_at: i64,
    ) -> AdapterResult<()> {
        self.typing_pings.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let mut server = self.server.lock().unwrap();
        server.typing.retain(|t| t.user_id != actor.user_id);
        server.typing.push(TypingIndicator {
            conversation_key: key.clone(),
            user_id: actor.user_id.clone(),
            display_name: actor.display_name.clone(),
            expires_at,
        });
        Ok(())
    }

    async fn clear_typing(&self, _key: &ConversationKey, actor_id: &str) -> AdapterResult<()> {
        self.typing_clears.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.server
            .lock()
            .unwrap()
            .typing
            .retain(|t| t.user_id != actor_id);
        Ok(())
    }

    async fn fetch_typing_peers(&self, key: &ConversationKey) -> AdapterResult<Vec<TypingIndicator>> {
        self.check_online()?;
        Ok(self
            .server
            .lock()
            .unwrap()
            .typing
            .iter()
            .filter(|t| &t.conversation_key == key)
            .cloned()
            .collect())
    }
}
