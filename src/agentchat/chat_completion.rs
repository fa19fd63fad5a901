use crate::agentchat::message::{ChatMessage, MessageChunk};
use async_trait::async_trait;
use futures_util::Stream;
use std::error::Error;
use std::pin::Pin;
use std::sync::Mutex;

/// A ChatCompletionService is the group chat's view of a remote LLM.
/// It provides a common interface for turning a list of messages into one reply.
/// It does not keep track of the conversation; history lives in the `AgentChat`,
/// in agent channels, or in a reducer's working copy.
// src/agentchat/chat_completion.rs

/// Type alias for a Send-able, Sync-able error box
pub type BoxError = Box<dyn Error + Send + Sync>;

/// A stream of incremental message pieces.
pub type MessageChunkStream<'a> =
    Pin<Box<dyn Stream<Item = Result<MessageChunk, BoxError>> + Send + 'a>>;

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// Trait defining the interface to a chat completion backend.
#[async_trait]
pub trait ChatCompletionService: Send + Sync {
    /// Send the messages to the LLM and get a single response.
    async fn send_message(&self, messages: &[ChatMessage]) -> Result<ChatMessage, BoxError>;

    /// Send the messages to the LLM and get a streaming response.
    /// This method has a default implementation that returns an error, so existing
    /// implementations don't break. Services that support streaming should override this.
    async fn send_message_stream<'a>(
        &'a self,
        _messages: &[ChatMessage],
    ) -> Result<MessageChunkStream<'a>, BoxError> {
        Err("Streaming not supported by this service".into())
    }

    /// Model identifier used in logs.
    fn model_name(&self) -> &str;

    /// Hook to retrieve usage from the *last* send_message() call.
    /// Default impl returns None so existing services don't break.
    fn get_last_usage(&self) -> Option<TokenUsage> {
        self.usage_slot()
            .and_then(|slot| slot.lock().ok().and_then(|u| u.clone()))
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        // Services supporting TokenUsage tracking should return a Mutex<Option<TokenUsage>> by overriding this method.
        None
    }
}
