use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use murmur_policy::{
    ModerationGate, ModerationRules, RateAction, RateLimitPolicy, RateLimiter, Reason,
};

pub const CONFIG_FILE_NAME: &str = "murmur_config.json";

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Extra word or phrase rules per category, added on top of the built-in lists.
    pub extra_terms: BTreeMap<Reason, Vec<String>>,
    pub extra_allow_phrases: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub poll_interval_ms: u64,
    pub typing_poll_ms: u64,
    pub typing_debounce_ms: u64,
    pub typing_idle_ms: u64,
    pub typing_ttl_ms: u64,
    pub message_window_limit: usize,
    /// Page size added to the window by `LoadOlderMessages`.
    pub history_page_size: usize,
    pub reconcile_tolerance_ms: u64,
    pub max_message_chars: usize,
    pub allowed_media_types: Vec<String>,
    pub sync_failure_toast_threshold: u32,
    pub toast_dismiss_ms: u64,
    pub rate_limits: BTreeMap<RateAction, RateLimitPolicy>,
    pub moderation: ModerationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 3_000,
            typing_poll_ms: 2_000,
            typing_debounce_ms: 2_000,
            typing_idle_ms: 3_000,
            typing_ttl_ms: 5_000,
            message_window_limit: 50,
            history_page_size: 50,
            reconcile_tolerance_ms: 10_000,
            max_message_chars: 2_000,
            allowed_media_types: vec![
                "image/png".into(),
                "image/jpeg".into(),
                "image/gif".into(),
                "image/webp".into(),
            ],
            sync_failure_toast_threshold: 3,
            toast_dismiss_ms: 3_000,
            rate_limits: BTreeMap::new(),
            moderation: ModerationConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn typing_poll_interval(&self) -> Duration {
        Duration::from_millis(self.typing_poll_ms.max(1))
    }

    pub fn typing_idle(&self) -> Duration {
        Duration::from_millis(self.typing_idle_ms)
    }

    pub fn toast_dismiss(&self) -> Duration {
        Duration::from_millis(self.toast_dismiss_ms)
    }

    pub fn media_type_allowed(&self, mime_type: &str) -> bool {
        self.allowed_media_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(mime_type.trim()))
    }

    /// Overrides from the file win; unlisted actions use built-in policies.
    pub fn rate_limiter(&self) -> RateLimiter {
        RateLimiter::with_policies(self.rate_limits.iter().map(|(a, p)| (*a, *p)))
    }

    pub fn moderation_gate(&self) -> ModerationGate {
        let mut rules = ModerationRules::builtin();
        for (reason, terms) in &self.moderation.extra_terms {
            for term in terms {
                rules = rules.with_term(*reason, term);
            }
        }
        for phrase in &self.moderation.extra_allow_phrases {
            rules = rules.with_allow_phrase(phrase);
        }
        ModerationGate::new(rules)
    }
}

pub fn load_app_config(data_dir: &str) -> AppConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE_NAME);
    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return AppConfig::default(),
        Err(e) => {
            tracing::warn!(%e, path = %path.display(), "failed to read config; using defaults");
            return AppConfig::default();
        }
    };
    match serde_json::from_slice::<AppConfig>(&bytes) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(%e, path = %path.display(), "invalid config; using defaults");
            AppConfig::default()
        }
    }
}
