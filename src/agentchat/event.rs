//! Group chat event system.
//!
//! Provides a callback-based observability layer for [`AgentChat`](crate::agent_chat::AgentChat)
//! and [`AgentGroupChat`](crate::group_chat::AgentGroupChat). Implement [`EventHandler`] to
//! receive real-time notifications about:
//!
//! - **Shared history**: messages added, history reduced, chat reset
//! - **Channels**: channel creation and broadcast delivery
//! - **Agent turns**: selection, invocation, termination checks
//!
//! The handler has a default no-op implementation, so you only override what you care
//! about. It is wrapped in `Arc<dyn EventHandler>` and shared: registering one on an
//! `AgentGroupChat` propagates it to the inner `AgentChat`.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentchat::event::{ChatEvent, EventHandler};
//! use async_trait::async_trait;
//!
//! struct MyHandler;
//!
//! #[async_trait]
//! impl EventHandler for MyHandler {
//!     async fn on_chat_event(&self, event: &ChatEvent) {
//!         match event {
//!             ChatEvent::AgentInvoked { agent_name, visible_count, .. } => {
//!                 println!("{} produced {} visible messages", agent_name, visible_count);
//!             }
//!             _ => {}
//!         }
//!     }
//! }
//! ```

use async_trait::async_trait;

/// Events emitted by the group chat core.
///
/// Every variant carries the `chat_id` of the emitting [`AgentChat`](crate::agent_chat::AgentChat)
/// so one handler can observe several chats.
///
/// # Event Flow (one group-chat turn)
///
/// ```text
/// AgentSelected { agent: "Reviewer" }
///   └─ ChannelCreated { agent: "Reviewer" }      (first turn only)
///   └─ AgentInvoked { produced: 2, visible: 1 }
///   └─ MessagesBroadcast { channels: 1, messages: 2 }
/// TerminationChecked { should_terminate: false }
/// ```
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Messages were appended to the shared history from outside the agents.
    MessagesAdded {
        chat_id: String,
        count: usize,
    },

    /// A channel was created for an agent and seeded with the existing history.
    ChannelCreated {
        chat_id: String,
        agent_name: String,
        /// Hash of the agent's channel keys; agents sharing it share the channel.
        channel_hash: String,
        /// Number of history messages handed to the new channel.
        seeded_messages: usize,
    },

    /// An agent finished a turn.
    AgentInvoked {
        chat_id: String,
        agent_name: String,
        /// Every message the agent produced, visible or not.
        produced_count: usize,
        /// Messages surfaced to the caller.
        visible_count: usize,
    },

    /// Messages were queued for delivery to other channels.
    MessagesBroadcast {
        chat_id: String,
        channel_count: usize,
        message_count: usize,
    },

    /// The shared history was replaced by a reducer.
    HistoryReduced {
        chat_id: String,
        before: usize,
        after: usize,
    },

    /// Channels, channel map, and shared history were cleared.
    ChatReset { chat_id: String },

    /// The group chat's selection strategy picked the next speaker.
    AgentSelected {
        chat_id: String,
        agent_name: String,
        /// 1-based turn number within the current `invoke()` call.
        turn: usize,
    },

    /// The termination strategy was consulted after a turn.
    TerminationChecked {
        chat_id: String,
        agent_name: String,
        should_terminate: bool,
    },

    /// A group chat `invoke()` call returned.
    GroupChatCompleted {
        chat_id: String,
        turns: usize,
        is_complete: bool,
    },
}

/// Callback trait for group chat observability.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Receives a reference to the [`ChatEvent`]. The default implementation does nothing.
    async fn on_chat_event(&self, _event: &ChatEvent) {}
}
