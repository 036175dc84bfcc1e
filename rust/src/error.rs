use std::time::Duration;

use crate::adapter::AdapterError;

/// Rejected before any network call; surfaced inline and never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationFailure {
    #[error("Message is empty")]
    Empty,
    #[error("Message is too long ({len} of {max} characters)")]
    TooLong { len: usize, max: usize },
    #[error("Files of type {0} can't be sent")]
    DisallowedMediaType(String),
}

/// Everything a submit can fail with. `Display` is user-facing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Validation(#[from] ValidationFailure),
    #[error("{reason}")]
    ModerationBlocked { reason: String },
    #[error("You're sending too fast. Try again in {}s.", whole_secs(.retry_after))]
    RateLimited { retry_after: Duration },
    #[error("Upload failed: {0}")]
    Upload(AdapterError),
    #[error("Message not sent: {0}")]
    Network(AdapterError),
}

impl SendError {
    /// Whether resubmitting the same draft can succeed without the user changing it.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SendError::RateLimited { .. } | SendError::Upload(_) | SendError::Network(_)
        )
    }
}

fn whole_secs(d: &Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_rounds_up_to_whole_seconds() {
        let err = SendError::RateLimited {
            retry_after: Duration::from_millis(1_200),
        };
        assert_eq!(err.to_string(), "You're sending too fast. Try again in 2s.");
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_is_not_retryable() {
        let err: SendError = ValidationFailure::TooLong { len: 3001, max: 2000 }.into();
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Message is too long (3001 of 2000 characters)");
    }
}
