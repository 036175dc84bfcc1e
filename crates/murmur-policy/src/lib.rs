//! Client-side send policy: content moderation and per-action rate limits.
//!
//! Everything here is pure and synchronous so it can run on every submit without
//! touching the network.

mod moderation;
mod rate_limit;

pub use moderation::*;
pub use rate_limit::*;
