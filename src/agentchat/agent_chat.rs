//! Shared conversation core.
//!
//! [`AgentChat`] owns the authoritative chat history and one [`AgentChannel`] per distinct
//! agent channel-key set. It is the layer the [`AgentGroupChat`](crate::group_chat::AgentGroupChat)
//! driver builds on, but it can also be used directly to run individual agents against a
//! common history.
//!
//! # Invariants
//!
//! - At most one operation (invoke, stream, history read, reset, reduction) runs at a
//!   time. A second concurrent call fails fast with [`AgentChatError::AlreadyActive`].
//! - Every message an agent produces is appended to the shared history, visible or not.
//! - Produced messages reach every other channel before that channel's agent runs again.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentchat::agent_chat::AgentChat;
//! use agentchat::agent::Agent;
//! use agentchat::message::ChatMessage;
//!
//! # async fn run(agent: &dyn Agent) -> Result<(), Box<dyn std::error::Error>> {
//! let chat = AgentChat::new();
//! chat.add_chat_message(ChatMessage::user("Draft a release note for 1.2"))?;
//!
//! for message in chat.invoke_agent(agent).await? {
//!     println!("{}: {}", message.author_name.as_deref().unwrap_or("?"), message.text());
//! }
//! # Ok(())
//! # }
//! ```

use crate::agentchat::agent::Agent;
use crate::agentchat::broadcast_queue::{BroadcastQueue, ChannelReference, SharedChannel};
use crate::agentchat::channel::AgentChannel;
use crate::agentchat::chat_completion::BoxError;
use crate::agentchat::event::{ChatEvent, EventHandler};
use crate::agentchat::history_reducer::{ChatHistoryReducer, ReductionError};
use crate::agentchat::message::{ChatMessage, MessageChunk, Role};
use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Errors surfaced by [`AgentChat`] and the group chat built on it.
#[derive(Debug)]
pub enum AgentChatError {
    /// Another operation on the same chat is in progress.
    AlreadyActive,
    /// A message was rejected before reaching the history.
    InvalidMessage(String),
    /// A group chat was asked to run without any agents.
    NoAgents,
    /// A strategy referred to an agent that is not part of the chat.
    AgentNotFound(String),
    /// An agent with the same name is already registered.
    DuplicateAgent(String),
    /// The selection strategy could not pick a speaker.
    SelectionFailed(String),
    /// The group chat already terminated and automatic reset is off.
    ChatComplete,
    /// Delivering queued messages to a channel failed. The messages remain queued.
    ChannelSynchronization { channel: String, source: BoxError },
    /// A history reducer failed.
    Reduction(ReductionError),
    /// An agent, channel, or service call failed.
    Agent(BoxError),
}

impl fmt::Display for AgentChatError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AgentChatError::AlreadyActive => {
                write!(f, "Unable to proceed while another agent chat operation is active")
            }
            AgentChatError::InvalidMessage(msg) => write!(f, "Invalid message: {}", msg),
            AgentChatError::NoAgents => write!(f, "No agents available in the chat"),
            AgentChatError::AgentNotFound(name) => write!(f, "Agent not found: {}", name),
            AgentChatError::DuplicateAgent(name) => {
                write!(f, "Agent already registered: {}", name)
            }
            AgentChatError::SelectionFailed(msg) => write!(f, "Agent selection failed: {}", msg),
            AgentChatError::ChatComplete => write!(f, "Chat has completed"),
            AgentChatError::ChannelSynchronization { channel, source } => {
                write!(f, "Failed to synchronize channel {}: {}", channel, source)
            }
            AgentChatError::Reduction(err) => write!(f, "History reduction failed: {}", err),
            AgentChatError::Agent(err) => write!(f, "Agent invocation failed: {}", err),
        }
    }
}

impl Error for AgentChatError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AgentChatError::ChannelSynchronization { source, .. } => Some(source.as_ref()),
            AgentChatError::Reduction(err) => Some(err),
            AgentChatError::Agent(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<ReductionError> for AgentChatError {
    fn from(err: ReductionError) -> Self {
        AgentChatError::Reduction(err)
    }
}

/// A stream of chunks produced by [`AgentChat::invoke_agent_stream`].
pub type ChatChunkStream<'a> =
    Pin<Box<dyn Stream<Item = Result<MessageChunk, AgentChatError>> + Send + 'a>>;

/// Hash identifying the channel for an ordered list of channel keys.
///
/// Equal key lists always produce equal hashes; keys are length-delimited so
/// `["ab", "c"]` and `["a", "bc"]` differ.
pub fn channel_key_hash(keys: &[String]) -> String {
    let mut hasher = Sha256::new();
    for key in keys {
        hasher.update((key.len() as u64).to_le_bytes());
        hasher.update(key.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

// Clears the activity flag when the operation ends, including on error or cancellation.
struct ActivityGuard<'a> {
    flag: &'a Mutex<bool>,
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        *self.flag.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

/// Shared history plus the channels of every agent that has taken part.
pub struct AgentChat {
    /// Unique identifier, reported on every [`ChatEvent`].
    pub id: String,
    history: Mutex<Vec<ChatMessage>>,
    channels: Mutex<HashMap<String, SharedChannel>>,
    broadcast_queue: BroadcastQueue,
    is_active: Mutex<bool>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl Default for AgentChat {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentChat {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            history: Mutex::new(Vec::new()),
            channels: Mutex::new(HashMap::new()),
            broadcast_queue: BroadcastQueue::new(),
            is_active: Mutex::new(false),
            event_handler: None,
        }
    }

    /// Use a caller-chosen identifier instead of a random one (builder pattern).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Register an event handler (builder pattern).
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Register an event handler after construction.
    pub fn set_event_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.event_handler = Some(handler);
    }

    async fn emit(&self, event: ChatEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_chat_event(&event).await;
        }
    }

    fn lock_history(&self) -> MutexGuard<'_, Vec<ChatMessage>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_channels(&self) -> MutexGuard<'_, HashMap<String, SharedChannel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_activity(&self) -> Result<ActivityGuard<'_>, AgentChatError> {
        let mut active = self.is_active.lock().unwrap_or_else(PoisonError::into_inner);
        if *active {
            return Err(AgentChatError::AlreadyActive);
        }
        *active = true;
        Ok(ActivityGuard {
            flag: &self.is_active,
        })
    }

    /// `true` while an operation is in progress.
    pub fn is_active(&self) -> bool {
        *self.is_active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the shared history, oldest first.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.lock_history().clone()
    }

    /// Number of channels created so far.
    pub fn channel_count(&self) -> usize {
        self.lock_channels().len()
    }

    /// Number of messages waiting to be delivered to `agent`'s channel.
    pub fn pending_for(&self, agent: &dyn Agent) -> usize {
        self.broadcast_queue
            .pending_count(&channel_key_hash(&agent.channel_keys()))
    }

    /// Append one externally supplied message.
    pub fn add_chat_message(&self, message: ChatMessage) -> Result<(), AgentChatError> {
        self.add_chat_messages(vec![message])
    }

    /// Append externally supplied messages and queue them for every existing channel.
    ///
    /// System messages are rejected and nothing from the batch is appended. Instructions
    /// belong to agent configuration, not the shared conversation.
    ///
    /// This entry point is synchronous, so [`ChatEvent::MessagesAdded`] is spawned onto
    /// the current tokio runtime rather than awaited. It may reach the handler after
    /// events from a later operation, and it is not delivered at all when no runtime is
    /// running.
    pub fn add_chat_messages(&self, messages: Vec<ChatMessage>) -> Result<(), AgentChatError> {
        let _guard = self.begin_activity()?;

        if let Some(position) = messages
            .iter()
            .position(|message| message.role == Role::System)
        {
            return Err(AgentChatError::InvalidMessage(format!(
                "system messages cannot be added to a group chat (message {})",
                position
            )));
        }
        if messages.is_empty() {
            return Ok(());
        }

        self.lock_history().extend(messages.iter().cloned());

        let channel_refs = self.channel_refs_except(None);
        self.broadcast_queue.enqueue(&channel_refs, &messages);
        log::debug!(
            "Chat {} received {} messages, queued for {} channels",
            self.id,
            messages.len(),
            channel_refs.len()
        );

        if let Some(handler) = self.event_handler.clone() {
            let event = ChatEvent::MessagesAdded {
                chat_id: self.id.clone(),
                count: messages.len(),
            };
            // Synchronous entry point; deliver the event on the runtime when one exists.
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { handler.on_chat_event(&event).await });
            }
        }
        Ok(())
    }

    /// Messages as seen by `agent`'s channel, or the shared history when `agent` is
    /// `None`. Most recent first either way.
    ///
    /// Pending broadcasts are delivered to the channel first. An agent without a channel
    /// yields an empty list.
    pub async fn get_chat_messages(
        &self,
        agent: Option<&dyn Agent>,
    ) -> Result<Vec<ChatMessage>, AgentChatError> {
        let _guard = self.begin_activity()?;

        let agent = match agent {
            None => {
                let mut history = self.history();
                history.reverse();
                return Ok(history);
            }
            Some(agent) => agent,
        };

        let hash = channel_key_hash(&agent.channel_keys());
        let channel = self.lock_channels().get(&hash).cloned();
        match channel {
            Some(channel) => {
                let channel_ref = ChannelReference::new(hash, channel);
                self.broadcast_queue
                    .ensure_synchronized(&channel_ref)
                    .await?;
                let channel = channel_ref.channel.lock().await;
                Ok(channel.get_history())
            }
            None => Ok(Vec::new()),
        }
    }

    fn channel_refs_except(&self, hash: Option<&str>) -> Vec<ChannelReference> {
        self.lock_channels()
            .iter()
            .filter(|(key, _)| Some(key.as_str()) != hash)
            .map(|(key, channel)| ChannelReference::new(key.clone(), Arc::clone(channel)))
            .collect()
    }

    /// Find the agent's channel (synchronized) or create and seed a new one.
    async fn get_or_create_channel(
        &self,
        agent: &dyn Agent,
    ) -> Result<ChannelReference, AgentChatError> {
        let hash = channel_key_hash(&agent.channel_keys());
        let existing = self.lock_channels().get(&hash).cloned();

        if let Some(channel) = existing {
            let channel_ref = ChannelReference::new(hash, channel);
            self.broadcast_queue
                .ensure_synchronized(&channel_ref)
                .await?;
            return Ok(channel_ref);
        }

        let mut channel: Box<dyn AgentChannel> =
            agent.create_channel().await.map_err(AgentChatError::Agent)?;
        let history = self.history();
        if !history.is_empty() {
            channel
                .receive(&history)
                .await
                .map_err(AgentChatError::Agent)?;
        }
        log::debug!(
            "Chat {} created channel {} for agent '{}' ({} messages)",
            self.id,
            hash,
            agent.name(),
            history.len()
        );

        let channel: SharedChannel = Arc::new(tokio::sync::Mutex::new(channel));
        self.lock_channels().insert(hash.clone(), Arc::clone(&channel));
        self.emit(ChatEvent::ChannelCreated {
            chat_id: self.id.clone(),
            agent_name: agent.name().to_string(),
            channel_hash: hash.clone(),
            seeded_messages: history.len(),
        })
        .await;

        Ok(ChannelReference::new(hash, channel))
    }

    /// Append produced messages to the history and queue them for every other channel.
    async fn record_and_broadcast(&self, origin_hash: &str, messages: &[ChatMessage]) {
        if messages.is_empty() {
            return;
        }
        self.lock_history().extend(messages.iter().cloned());

        let channel_refs = self.channel_refs_except(Some(origin_hash));
        self.broadcast_queue.enqueue(&channel_refs, messages);
        if !channel_refs.is_empty() {
            self.emit(ChatEvent::MessagesBroadcast {
                chat_id: self.id.clone(),
                channel_count: channel_refs.len(),
                message_count: messages.len(),
            })
            .await;
        }
    }

    /// Run one agent turn and return the messages meant for the caller.
    ///
    /// Every produced message (visible or not) lands in the shared history and is queued
    /// for the other channels.
    pub async fn invoke_agent(&self, agent: &dyn Agent) -> Result<Vec<ChatMessage>, AgentChatError> {
        let _guard = self.begin_activity()?;
        log::debug!("Chat {} invoking agent '{}'", self.id, agent.name());

        let channel_ref = self.get_or_create_channel(agent).await?;
        let produced = {
            let mut channel = channel_ref.channel.lock().await;
            channel.invoke(agent).await.map_err(AgentChatError::Agent)?
        };

        let mut messages = Vec::with_capacity(produced.len());
        let mut visible = Vec::new();
        for (is_visible, message) in produced {
            if is_visible {
                visible.push(message.clone());
            }
            messages.push(message);
        }

        self.record_and_broadcast(&channel_ref.hash, &messages)
            .await;
        self.emit(ChatEvent::AgentInvoked {
            chat_id: self.id.clone(),
            agent_name: agent.name().to_string(),
            produced_count: messages.len(),
            visible_count: visible.len(),
        })
        .await;

        Ok(visible)
    }

    /// Streaming variant of [`invoke_agent`](AgentChat::invoke_agent).
    ///
    /// The chat stays active until the stream is exhausted or dropped. Only chunks the
    /// channel marks visible are yielded; function calls and results are recorded
    /// without being streamed. Completed messages are appended and broadcast once the
    /// agent's stream ends; dropping the stream early discards the partial turn.
    pub fn invoke_agent_stream<'a>(&'a self, agent: &'a dyn Agent) -> ChatChunkStream<'a> {
        Box::pin(try_stream! {
            let _guard = self.begin_activity()?;
            log::debug!("Chat {} streaming agent '{}'", self.id, agent.name());

            let channel_ref = self.get_or_create_channel(agent).await?;
            let mut produced = Vec::new();
            {
                let mut channel = channel_ref.channel.lock().await;
                let mut chunks = channel.invoke_stream(agent, &mut produced);
                while let Some(chunk) = chunks.next().await {
                    yield chunk.map_err(AgentChatError::Agent)?;
                }
            }

            let visible_count = produced.iter().filter(|(is_visible, _)| *is_visible).count();
            let messages: Vec<ChatMessage> =
                produced.into_iter().map(|(_, message)| message).collect();
            self.record_and_broadcast(&channel_ref.hash, &messages).await;
            self.emit(ChatEvent::AgentInvoked {
                chat_id: self.id.clone(),
                agent_name: agent.name().to_string(),
                produced_count: messages.len(),
                visible_count,
            })
            .await;
        })
    }

    /// Reset every channel, then forget channels, pending broadcasts, and history.
    pub async fn reset(&self) -> Result<(), AgentChatError> {
        let _guard = self.begin_activity()?;

        let channels: Vec<SharedChannel> = self.lock_channels().values().cloned().collect();
        for channel in channels {
            channel
                .lock()
                .await
                .reset()
                .await
                .map_err(AgentChatError::Agent)?;
        }

        self.lock_channels().clear();
        self.lock_history().clear();
        self.broadcast_queue.clear();
        log::info!("Chat {} reset", self.id);

        self.emit(ChatEvent::ChatReset {
            chat_id: self.id.clone(),
        })
        .await;
        Ok(())
    }

    /// Let `reducer` shrink the shared history. Returns `true` when the history changed.
    ///
    /// Channels keep their own copies; reduction only affects the shared history and
    /// channels created afterwards.
    pub async fn reduce_history(
        &self,
        reducer: &dyn ChatHistoryReducer,
    ) -> Result<bool, AgentChatError> {
        let _guard = self.begin_activity()?;

        let snapshot = self.history();
        let reduced = reducer.reduce(&snapshot).await?;
        match reduced {
            Some(reduced) => {
                let before = snapshot.len();
                let after = reduced.len();
                *self.lock_history() = reduced;
                log::info!(
                    "Chat {} history reduced by {}: {} -> {} messages",
                    self.id,
                    reducer.name(),
                    before,
                    after
                );
                self.emit(ChatEvent::HistoryReduced {
                    chat_id: self.id.clone(),
                    before,
                    after,
                })
                .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_key_hash_is_stable_and_delimited() {
        let a = channel_key_hash(&["ab".to_string(), "c".to_string()]);
        let b = channel_key_hash(&["a".to_string(), "bc".to_string()]);
        assert_ne!(a, b);
        assert_eq!(a, channel_key_hash(&["ab".to_string(), "c".to_string()]));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_activity_guard_releases_flag() {
        let chat = AgentChat::new();
        {
            let _guard = chat.begin_activity().unwrap();
            assert!(chat.is_active());
            assert!(matches!(
                chat.begin_activity(),
                Err(AgentChatError::AlreadyActive)
            ));
        }
        assert!(!chat.is_active());
    }

    #[test]
    fn test_system_message_rejected_without_partial_append() {
        let chat = AgentChat::new();
        let result = chat.add_chat_messages(vec![
            ChatMessage::user("hi"),
            ChatMessage::system("be nice"),
        ]);
        assert!(matches!(result, Err(AgentChatError::InvalidMessage(_))));
        assert!(chat.history().is_empty());
        assert!(!chat.is_active());
    }
}
