//! # agentchat
//!
//! agentchat is the orchestration core for group conversations between several LLM-backed
//! agents. It keeps one authoritative history, gives every kind of agent its own view of
//! that history, and decides who speaks next and when the conversation is done.
//!
//! The crate is layered:
//!
//! * **Shared history**: [`AgentChat`] owns the conversation, enforces that only one
//!   operation runs at a time, and fans produced messages out to agent channels through a
//!   lazily drained [`broadcast_queue::BroadcastQueue`].
//! * **Channels**: [`channel::AgentChannel`] implementations adapt the history to what an
//!   agent's provider accepts, e.g. [`alternating_channel::AlternatingHistoryChannel`] for
//!   APIs that demand strict user/assistant alternation.
//! * **Group chat**: [`AgentGroupChat`] drives turn-taking with pluggable
//!   [`selection`] and [`termination`] strategies.
//! * **History reduction**: [`history_reducer`] and [`summarization_reducer`] keep long
//!   conversations inside a context window without separating function calls from their
//!   results.
//!
//! Providers are plugged in through [`chat_completion::ChatCompletionService`]; agents
//! through the [`agent::Agent`] trait.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agentchat::agent::{Agent, ChatCompletionAgent};
//! use agentchat::chat_completion::ChatCompletionService;
//! use agentchat::message::ChatMessage;
//! use agentchat::selection::SequentialSelectionStrategy;
//! use agentchat::termination::MaxTurnsTerminationStrategy;
//! use agentchat::AgentGroupChat;
//! use std::sync::Arc;
//!
//! # async fn run(service: Arc<dyn ChatCompletionService>) -> Result<(), Box<dyn std::error::Error>> {
//! agentchat::init_logger();
//!
//! let agents: Vec<Arc<dyn Agent>> = vec![
//!     Arc::new(ChatCompletionAgent::new("pm", "ProductManager", service.clone())
//!         .with_instructions("Turn the request into a short feature brief.")),
//!     Arc::new(ChatCompletionAgent::new("eng", "Engineer", service)
//!         .with_instructions("Estimate the brief and list the risks.")),
//! ];
//!
//! let mut chat = AgentGroupChat::new(agents)
//!     .with_selection_strategy(Box::new(SequentialSelectionStrategy::new()))
//!     .with_termination_strategy(Box::new(MaxTurnsTerminationStrategy::new(4)));
//!
//! chat.chat().add_chat_message(ChatMessage::user("Users want dark mode."))?;
//! let response = chat.invoke().await?;
//! for message in response.messages {
//!     println!("{}: {}", message.author_name.as_deref().unwrap_or_default(), message.text());
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding agentchat can opt in to `RUST_LOG` driven diagnostics without
/// choosing a logging backend upfront.
///
/// ```rust
/// agentchat::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `agentchat` module.
pub mod agentchat;

// Re-exporting key items for easier external access.
pub use agentchat::agent;
pub use agentchat::agent::{Agent, ChannelKind, ChatCompletionAgent};
pub use agentchat::agent_chat;
pub use agentchat::agent_chat::{AgentChat, AgentChatError};
pub use agentchat::alternating_channel;
pub use agentchat::broadcast_queue;
pub use agentchat::channel;
pub use agentchat::channel::{AgentChannel, ChatHistoryChannel};
pub use agentchat::chat_completion;
pub use agentchat::chat_completion::{BoxError, ChatCompletionService, TokenUsage};
pub use agentchat::config::GroupChatConfig;
pub use agentchat::event;
pub use agentchat::event::{ChatEvent, EventHandler};
pub use agentchat::group_chat;
pub use agentchat::group_chat::{AgentGroupChat, GroupChatResponse};
pub use agentchat::history_reducer;
pub use agentchat::history_reducer::{ChatHistoryReducer, ReductionError};
pub use agentchat::message;
pub use agentchat::message::{ChatMessage, ContentItem, MessageChunk, Role};
pub use agentchat::selection;
pub use agentchat::summarization_reducer;
pub use agentchat::termination;
