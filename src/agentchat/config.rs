//! Configuration for the group chat driver.
//!
//! Provides the [`GroupChatConfig`] struct consumed by
//! [`AgentGroupChat`](crate::group_chat::AgentGroupChat). Users construct this
//! manually; no file parsing dependencies are required.
//!
//! # Example
//!
//! ```rust
//! use agentchat::GroupChatConfig;
//!
//! // Defaults: 99 turns per invoke, no automatic reset
//! let config = GroupChatConfig::default();
//! assert_eq!(config.maximum_iterations, 99);
//!
//! // Or tune it
//! let config = GroupChatConfig::default()
//!     .with_maximum_iterations(6)
//!     .with_automatic_reset(true);
//! assert!(config.automatic_reset);
//! ```

use serde::{Deserialize, Serialize};

/// Turn limits and completion behaviour of a group chat.
///
/// Missing fields fall back to their defaults when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupChatConfig {
    /// Upper bound on agent turns per `invoke()` call, whatever the termination
    /// strategy decides.
    pub maximum_iterations: usize,

    /// When `true`, invoking a chat that already reached termination clears the
    /// completion flag and starts another run instead of failing.
    pub automatic_reset: bool,
}

impl Default for GroupChatConfig {
    fn default() -> Self {
        Self {
            maximum_iterations: 99,
            automatic_reset: false,
        }
    }
}

impl GroupChatConfig {
    /// Override the per-invoke turn cap (builder pattern).
    pub fn with_maximum_iterations(mut self, maximum_iterations: usize) -> Self {
        self.maximum_iterations = maximum_iterations;
        self
    }

    /// Enable or disable automatic reset of a completed chat (builder pattern).
    pub fn with_automatic_reset(mut self, automatic_reset: bool) -> Self {
        self.automatic_reset = automatic_reset;
        self
    }
}
