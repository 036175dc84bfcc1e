mod actions;
mod adapter;
mod core;
mod error;
mod logging;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use anyhow::Context;
use flume::{Receiver, Sender};

pub use actions::ConversationAction;
pub use adapter::*;
pub use crate::core::reactions::{
    aggregate, apply_toggle, toggle, ReactionGroup, ReactionStrip, ToggleOutcome,
    REACTION_DISPLAY_LIMIT,
};
pub use crate::core::reply::{reply_preview, resolve};
pub use crate::core::store::{MergeStats, MessageStore, StoredMessage};
pub use crate::core::sync::{SyncScheduler, TickDecision};
pub use crate::core::typing::TypingIndicatorTracker;
pub use crate::core::{load_app_config, AppConfig, ModerationConfig, CONFIG_FILE_NAME};
pub use error::*;
pub use murmur_policy;
pub use state::*;
pub use updates::*;

pub trait UpdateReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: ConversationUpdate);
}

/// Everything needed to open one conversation.
#[derive(Debug, Clone)]
pub struct ConversationParams {
    pub data_dir: String,
    pub key: ConversationKey,
    pub identity: Identity,
    /// `None` uses the defaults for the conversation kind.
    pub capabilities: Option<Capabilities>,
}

/// Thread-safe handle to one open conversation. The conversation itself lives on its
/// own actor thread; this only sends actions and reads published snapshots.
pub struct ConversationHandle {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<ConversationUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<ConversationState>>,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationHandle {
    pub fn open(
        params: ConversationParams,
        adapter: Arc<dyn ConversationAdapter>,
    ) -> anyhow::Result<Arc<Self>> {
        let ConversationParams {
            data_dir,
            key,
            identity,
            capabilities,
        } = params;

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("create data dir {data_dir}"))?;
        logging::init_logging(&data_dir);
        tracing::info!(data_dir = %data_dir, conversation = %key, "ConversationHandle::open()");

        let config = load_app_config(&data_dir);
        let capabilities = capabilities.unwrap_or_else(|| Capabilities::for_kind(key.kind));
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("murmur-io")
            .enable_all()
            .build()
            .context("build tokio runtime")?;

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(ConversationState::empty(
            key.clone(),
            capabilities,
        )));

        // Actor loop thread: one per open conversation.
        let parts = crate::core::CoreParts {
            update_sender: update_tx,
            core_sender: core_tx.clone(),
            shared_state: shared_state.clone(),
            adapter,
            identity,
            key: key.clone(),
            capabilities,
            config,
            runtime,
        };
        let actor = thread::Builder::new()
            .name(format!("murmur-{key}"))
            .spawn(move || {
                let mut core = crate::core::ConversationCore::new(parts);
                core.start();
                while let Ok(msg) = core_rx.recv() {
                    core.handle_message(msg);
                    if core.is_closed() {
                        break;
                    }
                }
            })
            .context("spawn conversation actor")?;

        Ok(Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
            actor: Mutex::new(Some(actor)),
        }))
    }

    pub fn state(&self) -> ConversationState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: ConversationAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn UpdateReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }

    /// Stop polling, clear our typing indicator and wait for the actor to exit.
    /// Results that arrive afterwards are discarded.
    pub fn close(&self) {
        let _ = self.core_tx.send(CoreMsg::Action(ConversationAction::Close));
        let handle = match self.actor.lock() {
            Ok(mut g) => g.take(),
            Err(poison) => poison.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("conversation actor panicked");
            }
        }
    }
}

impl Drop for ConversationHandle {
    fn drop(&mut self) {
        let _ = self.core_tx.send(CoreMsg::Action(ConversationAction::Close));
    }
}
