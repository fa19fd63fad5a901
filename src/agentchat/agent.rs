//! Agent System
//!
//! This module defines the [`Agent`] capability the group chat drives, plus
//! [`ChatCompletionAgent`], a reference agent backed by any
//! [`ChatCompletionService`].
//!
//! An agent is never invoked directly by [`AgentChat`](crate::agent_chat::AgentChat). The
//! chat resolves the agent's [`AgentChannel`] (creating it on first use through
//! [`Agent::create_channel`]) and the channel calls back into [`Agent::invoke`] with its
//! own projection of the conversation.
//!
//! # Channel Sharing
//!
//! [`Agent::channel_keys`] decides which agents share a channel instance. Agents that
//! declare the same ordered key list resolve to the same channel, so several
//! `ChatCompletionAgent`s talk over a single [`ChatHistoryChannel`].
//!
//! # Example
//!
//! ```rust,no_run
//! use agentchat::agent::{ChatCompletionAgent, ChannelKind};
//! use agentchat::chat_completion::ChatCompletionService;
//! use std::sync::Arc;
//!
//! # fn build(service: Arc<dyn ChatCompletionService>) {
//! let reviewer = ChatCompletionAgent::new("reviewer", "Reviewer", service)
//!     .with_description("Reviews proposals for correctness")
//!     .with_instructions("You review the previous proposal. Reply APPROVED when satisfied.");
//!
//! // Providers that insist on strict user/assistant alternation get their own channel
//! # let service = reviewer.service().clone();
//! let strict = ChatCompletionAgent::new("critic", "Critic", service)
//!     .with_channel_kind(ChannelKind::StrictAlternation);
//! # }
//! ```

use crate::agentchat::alternating_channel::AlternatingHistoryChannel;
use crate::agentchat::channel::{AgentChannel, ChatHistoryChannel};
use crate::agentchat::chat_completion::{BoxError, ChatCompletionService, MessageChunkStream};
use crate::agentchat::message::{ChatMessage, MessageChunk};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;

/// A named capability that produces conversation messages.
///
/// Identity inside a chat is by [`channel_keys`](Agent::channel_keys) for channel
/// sharing and by [`name`](Agent::name) for selection and termination.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier.
    fn id(&self) -> &str;

    /// Display name, used by strategies and as `author_name` on produced messages.
    fn name(&self) -> &str;

    /// Free-form description of what the agent is good at.
    fn description(&self) -> Option<&str> {
        None
    }

    /// Ordered keys identifying the channel implementation this agent needs.
    fn channel_keys(&self) -> Vec<String>;

    /// Build a fresh, empty channel for this agent.
    async fn create_channel(&self) -> Result<Box<dyn AgentChannel>, BoxError>;

    /// Produce the next turn given the channel's history (oldest first).
    ///
    /// May return several messages, e.g. a function call, its result, and the final
    /// answer.
    async fn invoke(&self, history: &[ChatMessage]) -> Result<Vec<ChatMessage>, BoxError>;

    /// Streaming variant of [`invoke`](Agent::invoke).
    /// This method has a default implementation that yields a single error, so agents
    /// without streaming support don't have to implement it.
    fn invoke_stream<'a>(&'a self, _history: Vec<ChatMessage>) -> MessageChunkStream<'a> {
        Box::pin(futures_util::stream::once(async {
            Err::<MessageChunk, BoxError>("Streaming not supported by this agent".into())
        }))
    }
}

/// Which channel a [`ChatCompletionAgent`] asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Plain shared history ([`ChatHistoryChannel`]).
    ChatHistory,
    /// History repaired into strict user/assistant alternation
    /// ([`AlternatingHistoryChannel`]).
    StrictAlternation,
}

impl ChannelKind {
    fn key(&self) -> &'static str {
        match self {
            ChannelKind::ChatHistory => "ChatHistoryChannel",
            ChannelKind::StrictAlternation => "AlternatingHistoryChannel",
        }
    }
}

/// Reference agent that answers through a [`ChatCompletionService`].
///
/// Every call sends the agent's instructions (as a leading system message) followed by
/// the channel history, and tags the reply with the agent's name.
pub struct ChatCompletionAgent {
    /// Stable identifier.
    pub id: String,
    /// Human-readable display name for selection and logging.
    pub name: String,
    /// Short description of the agent's strengths.
    pub description: Option<String>,
    /// System instructions sent ahead of the history.
    pub instructions: Option<String>,
    /// Arbitrary metadata associated with the agent (e.g. department, region).
    pub metadata: HashMap<String, String>,

    service: Arc<dyn ChatCompletionService>,
    channel_kind: ChannelKind,
}

impl ChatCompletionAgent {
    /// Create a new agent with the mandatory identity information.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        service: Arc<dyn ChatCompletionService>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            instructions: None,
            metadata: HashMap::new(),
            service,
            channel_kind: ChannelKind::ChatHistory,
        }
    }

    /// Attach a brief description of the agent.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the system instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Add arbitrary metadata to the agent definition.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Pick the channel implementation (builder pattern). Defaults to
    /// [`ChannelKind::ChatHistory`].
    pub fn with_channel_kind(mut self, kind: ChannelKind) -> Self {
        self.channel_kind = kind;
        self
    }

    /// The backing service.
    pub fn service(&self) -> &Arc<dyn ChatCompletionService> {
        &self.service
    }

    fn build_request(&self, history: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut request = Vec::with_capacity(history.len() + 1);
        if let Some(instructions) = &self.instructions {
            request.push(ChatMessage::system(instructions.clone()));
        }
        request.extend(history.iter().cloned());
        request
    }
}

#[async_trait]
impl Agent for ChatCompletionAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn channel_keys(&self) -> Vec<String> {
        vec![self.channel_kind.key().to_string()]
    }

    async fn create_channel(&self) -> Result<Box<dyn AgentChannel>, BoxError> {
        Ok(match self.channel_kind {
            ChannelKind::ChatHistory => Box::new(ChatHistoryChannel::new()),
            ChannelKind::StrictAlternation => Box::new(AlternatingHistoryChannel::new()),
        })
    }

    async fn invoke(&self, history: &[ChatMessage]) -> Result<Vec<ChatMessage>, BoxError> {
        let request = self.build_request(history);
        log::debug!(
            "Agent '{}' calling model '{}' with {} messages",
            self.name,
            self.service.model_name(),
            request.len()
        );

        let mut response = self.service.send_message(&request).await?;
        if response.author_name.is_none() {
            response.author_name = Some(self.name.clone());
        }

        if let Some(usage) = self.service.get_last_usage() {
            log::debug!(
                "Agent '{}' used {} tokens ({} in / {} out)",
                self.name,
                usage.total_tokens,
                usage.input_tokens,
                usage.output_tokens
            );
        }

        Ok(vec![response])
    }

    fn invoke_stream<'a>(&'a self, history: Vec<ChatMessage>) -> MessageChunkStream<'a> {
        Box::pin(try_stream! {
            let request = self.build_request(&history);
            let mut chunks = self.service.send_message_stream(&request).await?;
            while let Some(chunk) = chunks.next().await {
                let mut chunk = chunk?;
                if chunk.author_name.is_none() {
                    chunk.author_name = Some(self.name.clone());
                }
                yield chunk;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentchat::message::Role;

    struct EchoService;

    #[async_trait]
    impl ChatCompletionService for EchoService {
        async fn send_message(&self, messages: &[ChatMessage]) -> Result<ChatMessage, BoxError> {
            Ok(ChatMessage::assistant(format!("saw {} messages", messages.len())))
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn test_agent_builder_pattern() {
        let agent = ChatCompletionAgent::new("analyst", "Analyst", Arc::new(EchoService))
            .with_description("Reads the numbers")
            .with_instructions("Be brief")
            .with_metadata("department", "Finance");

        assert_eq!(agent.id(), "analyst");
        assert_eq!(agent.description(), Some("Reads the numbers"));
        assert_eq!(agent.metadata.get("department"), Some(&"Finance".to_string()));
        assert_eq!(agent.channel_keys(), vec!["ChatHistoryChannel".to_string()]);
    }

    #[test]
    fn test_channel_kind_changes_keys() {
        let agent = ChatCompletionAgent::new("a", "A", Arc::new(EchoService))
            .with_channel_kind(ChannelKind::StrictAlternation);
        assert_eq!(agent.channel_keys(), vec!["AlternatingHistoryChannel".to_string()]);
    }

    #[tokio::test]
    async fn test_invoke_prepends_instructions_and_tags_author() {
        let agent = ChatCompletionAgent::new("a", "Alice", Arc::new(EchoService))
            .with_instructions("Be brief");

        let reply = agent.invoke(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(reply.len(), 1);
        assert_eq!(reply[0].role, Role::Assistant);
        assert_eq!(reply[0].text(), "saw 2 messages");
        assert_eq!(reply[0].author_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn test_default_stream_reports_unsupported() {
        let agent = ChatCompletionAgent::new("a", "Alice", Arc::new(EchoService));
        let mut stream = agent.invoke_stream(vec![ChatMessage::user("hi")]);
        let first = stream.next().await.unwrap();
        assert!(first.is_err());
    }
}
