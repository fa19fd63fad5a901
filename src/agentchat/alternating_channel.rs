//! Channel for providers that reject consecutive messages from the same role.
//!
//! Some model APIs require the conversation to strictly alternate between user and
//! assistant turns, and to end on a user turn. In a group chat several agents speak back
//! to back, all as assistants, so the history handed to such a provider has to be
//! repaired. [`AlternatingHistoryChannel`] inserts short placeholder messages wherever two
//! adjacent messages share a role.

use crate::agentchat::agent::Agent;
use crate::agentchat::channel::{is_message_visible, stream_into_history, AgentChannel};
use crate::agentchat::chat_completion::{BoxError, MessageChunkStream};
use crate::agentchat::message::{ChatMessage, Role};
use async_trait::async_trait;

/// Default filler text for inserted placeholder turns.
pub const MESSAGE_PLACEHOLDER: &str = "[SILENCE]";

/// History channel that keeps user and assistant turns alternating.
#[derive(Debug, Clone)]
pub struct AlternatingHistoryChannel {
    messages: Vec<ChatMessage>,
    placeholder: String,
}

impl Default for AlternatingHistoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl AlternatingHistoryChannel {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            placeholder: MESSAGE_PLACEHOLDER.to_string(),
        }
    }

    /// Use a different filler text for placeholder turns (builder pattern).
    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    fn placeholder_message(&self, role: Role) -> ChatMessage {
        ChatMessage::new(role, self.placeholder.clone())
    }

    fn push_alternating(&mut self, message: ChatMessage) {
        let repeats_role = self
            .messages
            .last()
            .map(|last| last.role == message.role)
            .unwrap_or(false);
        if repeats_role {
            let filler_role = if message.role == Role::User {
                Role::Assistant
            } else {
                Role::User
            };
            let filler = self.placeholder_message(filler_role);
            self.messages.push(filler);
        }
        self.messages.push(message);
    }

    /// Repair any same-role neighbours and make sure the history ends on a user turn.
    fn prepare_for_invoke(&mut self) {
        let existing = std::mem::take(&mut self.messages);
        for message in existing {
            self.push_alternating(message);
        }
        let ends_with_user = self
            .messages
            .last()
            .map(|last| last.role == Role::User)
            .unwrap_or(false);
        if !ends_with_user {
            let filler = self.placeholder_message(Role::User);
            self.messages.push(filler);
        }
    }
}

#[async_trait]
impl AgentChannel for AlternatingHistoryChannel {
    async fn receive(&mut self, history: &[ChatMessage]) -> Result<(), BoxError> {
        for message in history {
            self.push_alternating(message.clone());
        }
        Ok(())
    }

    async fn invoke(&mut self, agent: &dyn Agent) -> Result<Vec<(bool, ChatMessage)>, BoxError> {
        self.prepare_for_invoke();
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
        self.prepare_for_invoke();
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
