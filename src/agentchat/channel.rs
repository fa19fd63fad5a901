//! Agent channels.
//!
//! A channel is an agent-type-specific view of the shared conversation. The
//! [`AgentChat`](crate::agent_chat::AgentChat) owns one channel per distinct set of
//! [`channel_keys`](crate::agent::Agent::channel_keys), feeds it every message the other
//! channels produce (through the broadcast queue), and asks it to run its agent.
//!
//! [`ChatHistoryChannel`] is the general-purpose implementation: it keeps a private copy
//! of the history, filtered to the content kinds chat-completion agents understand.

use crate::agentchat::agent::Agent;
use crate::agentchat::chat_completion::{BoxError, MessageChunkStream};
use crate::agentchat::message::{flatten_chunks, ChatMessage, ContentItem};
use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::StreamExt;

/// Contract between [`AgentChat`](crate::agent_chat::AgentChat) and an agent's view of the
/// conversation.
///
/// Channels are driven with exclusive access (`&mut self`); the chat wraps each one in an
/// async mutex so broadcast delivery and invocation never overlap.
#[async_trait]
pub trait AgentChannel: Send {
    /// Incorporate messages produced elsewhere, oldest first.
    async fn receive(&mut self, history: &[ChatMessage]) -> Result<(), BoxError>;

    /// Run `agent` against this channel's history.
    ///
    /// Returns every produced message in order, paired with whether it should be surfaced
    /// to the caller. Produced messages are also recorded in the channel's own history.
    async fn invoke(&mut self, agent: &dyn Agent) -> Result<Vec<(bool, ChatMessage)>, BoxError>;

    /// Streaming variant of [`invoke`](AgentChannel::invoke).
    ///
    /// Chunks are yielded as they arrive, except those the group should not see. Once
    /// the stream ends, every completed message has been recorded in the channel and
    /// pushed onto `sink` with its visibility, as [`invoke`](AgentChannel::invoke)
    /// reports it.
    fn invoke_stream<'a>(
        &'a mut self,
        agent: &'a dyn Agent,
        sink: &'a mut Vec<(bool, ChatMessage)>,
    ) -> MessageChunkStream<'a>;

    /// The channel's history, most recent first.
    fn get_history(&self) -> Vec<ChatMessage>;

    /// Drop all channel state.
    async fn reset(&mut self) -> Result<(), BoxError>;
}

/// Messages that carry function calls or results are recorded but not surfaced.
pub(crate) fn is_message_visible(message: &ChatMessage) -> bool {
    !message.has_function_content()
}

/// Stream `agent` over `history`, then record the flattened messages in both
/// `history` and `sink`. Function-call chunks are collected but not yielded.
pub(crate) fn stream_into_history<'a>(
    history: &'a mut Vec<ChatMessage>,
    agent: &'a dyn Agent,
    sink: &'a mut Vec<(bool, ChatMessage)>,
) -> MessageChunkStream<'a> {
    Box::pin(try_stream! {
        let mut collected = Vec::new();
        {
            let mut chunks = agent.invoke_stream(history.clone());
            while let Some(chunk) = chunks.next().await {
                let chunk = chunk?;
                collected.push(chunk.clone());
                if !chunk.has_function_content() {
                    yield chunk;
                }
            }
        }
        for message in flatten_chunks(&collected) {
            history.push(message.clone());
            sink.push((is_message_visible(&message), message));
        }
    })
}

/// Channel that mirrors the shared conversation for chat-completion agents.
#[derive(Debug, Default, Clone)]
pub struct ChatHistoryChannel {
    messages: Vec<ChatMessage>,
}

impl ChatHistoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages the channel currently holds.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Keep only the items a chat-completion model can consume. Reasoning traces stay out.
fn filter_for_completion(message: &ChatMessage) -> Option<ChatMessage> {
    let items: Vec<ContentItem> = message
        .items
        .iter()
        .filter(|item| !matches!(item, ContentItem::Reasoning { .. }))
        .cloned()
        .collect();
    if items.is_empty() {
        return None;
    }
    let mut filtered = message.clone();
    filtered.items = items;
    Some(filtered)
}

#[async_trait]
impl AgentChannel for ChatHistoryChannel {
    async fn receive(&mut self, history: &[ChatMessage]) -> Result<(), BoxError> {
        self.messages
            .extend(history.iter().filter_map(filter_for_completion));
        Ok(())
    }

    async fn invoke(&mut self, agent: &dyn Agent) -> Result<Vec<(bool, ChatMessage)>, BoxError> {
        let produced = agent.invoke(&self.messages).await?;
        let mut results = Vec::with_capacity(produced.len());
        for message in produced {
            self.messages.push(message.clone());
            results.push((is_message_visible(&message), message));
        }
        Ok(results)
    }

    fn invoke_stream<'a>(
        &'a mut self,
        agent: &'a dyn Agent,
        sink: &'a mut Vec<(bool, ChatMessage)>,
    ) -> MessageChunkStream<'a> {
        stream_into_history(&mut self.messages, agent, sink)
    }

    fn get_history(&self) -> Vec<ChatMessage> {
        self.messages.iter().rev().cloned().collect()
    }

    async fn reset(&mut self) -> Result<(), BoxError> {
        self.messages.clear();
        Ok(())
    }
}
