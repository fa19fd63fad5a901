// src/agentchat/mod.rs

pub mod agent;
pub mod agent_chat;
pub mod alternating_channel;
pub mod broadcast_queue;
pub mod channel;
pub mod chat_completion;
pub mod config;
pub mod event;
pub mod group_chat;
pub mod history_reducer;
pub mod message;
pub mod selection;
pub mod summarization_reducer;
pub mod termination;

// Let's explicitly export the chat types so they are reachable as agentchat::AgentChat
// rather than agentchat::agent_chat::AgentChat
pub use agent_chat::AgentChat;
pub use group_chat::AgentGroupChat;
