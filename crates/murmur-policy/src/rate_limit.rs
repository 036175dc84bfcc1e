use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use sha2::{Digest, Sha256};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateAction {
    SendMessage,
    UploadMedia,
    React,
    /// Calls made before the user is known, keyed by a hashed client address.
    AnonymousCall,
}

impl RateAction {
    pub fn as_str(self) -> &'static str {
        match self {
            RateAction::SendMessage => "send_message",
            RateAction::UploadMedia => "upload_media",
            RateAction::React => "react",
            RateAction::AnonymousCall => "anonymous_call",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub action: RateAction,
    pub actor: String,
}

impl RateLimitKey {
    pub fn new(action: RateAction, actor: impl Into<String>) -> Self {
        Self {
            action,
            actor: actor.into(),
        }
    }

    /// Key for unauthenticated calls. The address is hashed so raw IPs never sit in memory.
    pub fn anonymous(ip: IpAddr) -> Self {
        let digest = Sha256::digest(ip.to_string().as_bytes());
        Self {
            action: RateAction::AnonymousCall,
            actor: hex::encode(&digest[..16]),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window_ms: u64,
}

impl RateLimitPolicy {
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window_ms: window.as_millis() as u64,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn default_for(action: RateAction) -> Self {
        match action {
            RateAction::SendMessage => Self::new(20, Duration::from_secs(60)),
            RateAction::UploadMedia => Self::new(10, Duration::from_secs(60 * 60)),
            RateAction::React => Self::new(60, Duration::from_secs(60)),
            RateAction::AnonymousCall => Self::new(30, Duration::from_secs(60)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Time until the current window closes. `None` when allowed.
    pub retry_after: Option<Duration>,
}

impl RateDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitBucket {
    pub window_start: i64,
    pub count: u32,
    pub limit: u32,
    pub window_ms: u64,
}

impl RateLimitBucket {
    fn window_end(&self) -> i64 {
        self.window_start.saturating_add(self.window_ms as i64)
    }

    fn expired(&self, now: i64) -> bool {
        now >= self.window_end()
    }
}

/// Fixed-window counters keyed by `(action, actor)`.
///
/// A window that has run out resets the counter instead of decaying it, so a burst of
/// `limit` actions right before a boundary can be followed by another `limit` right after.
///
/// `allow` never mutates. Callers `record` only once the guarded action actually goes
/// ahead, so a user who is told "allowed" and then cancels does not spend budget.
#[derive(Debug, Default)]
pub struct RateLimiter {
    policies: HashMap<RateAction, RateLimitPolicy>,
    buckets: HashMap<RateLimitKey, RateLimitBucket>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policies(policies: impl IntoIterator<Item = (RateAction, RateLimitPolicy)>) -> Self {
        Self {
            policies: policies.into_iter().collect(),
            buckets: HashMap::new(),
        }
    }

    pub fn set_policy(&mut self, action: RateAction, policy: RateLimitPolicy) {
        self.policies.insert(action, policy);
    }

    pub fn policy(&self, action: RateAction) -> RateLimitPolicy {
        self.policies
            .get(&action)
            .copied()
            .unwrap_or_else(|| RateLimitPolicy::default_for(action))
    }

    pub fn allow(&self, key: &RateLimitKey, now: i64) -> RateDecision {
        let policy = self.policy(key.action);
        let Some(bucket) = self.buckets.get(key) else {
            return if policy.limit >= 1 {
                RateDecision::allowed()
            } else {
                RateDecision {
                    allowed: false,
                    retry_after: Some(policy.window()),
                }
            };
        };

        let next_count = if bucket.expired(now) {
            1
        } else {
            bucket.count.saturating_add(1)
        };
        if next_count <= policy.limit {
            return RateDecision::allowed();
        }

        let remaining_ms = if bucket.expired(now) {
            policy.window_ms as i64
        } else {
            bucket.window_end() - now
        };
        RateDecision {
            allowed: false,
            retry_after: Some(Duration::from_millis(remaining_ms.max(0) as u64)),
        }
    }

    pub fn record(&mut self, key: &RateLimitKey, now: i64) {
        let policy = self.policy(key.action);
        let bucket = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| RateLimitBucket {
                window_start: now,
                count: 0,
                limit: policy.limit,
                window_ms: policy.window_ms,
            });
        bucket.limit = policy.limit;
        bucket.window_ms = policy.window_ms;
        if bucket.expired(now) {
            bucket.window_start = now;
            bucket.count = 1;
        } else {
            bucket.count = bucket.count.saturating_add(1);
        }
        tracing::debug!(
            action = key.action.as_str(),
            count = bucket.count,
            limit = bucket.limit,
            "rate_limit_record"
        );
    }

    pub fn bucket(&self, key: &RateLimitKey) -> Option<&RateLimitBucket> {
        self.buckets.get(key)
    }

    /// Drop buckets whose window closed; they would reset on next use anyway.
    pub fn prune(&mut self, now: i64) {
        self.buckets.retain(|_, b| !b.expired(now));
    }
}
