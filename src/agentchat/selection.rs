//! Turn-taking strategies for [`AgentGroupChat`](crate::group_chat::AgentGroupChat).
//!
//! A [`SelectionStrategy`] picks which agent speaks next from the roster and the shared
//! history. Three implementations are provided:
//!
//! - [`SequentialSelectionStrategy`] (default): round-robin over the roster.
//! - [`HandoffSelectionStrategy`]: the current agent keeps the floor until it calls the
//!   handoff function naming another agent.
//! - [`ModeratedSelectionStrategy`]: a moderator model reads the conversation and names
//!   the next speaker.

use crate::agentchat::agent::Agent;
use crate::agentchat::agent_chat::AgentChatError;
use crate::agentchat::chat_completion::ChatCompletionService;
use crate::agentchat::message::{ChatMessage, ContentItem};
use async_trait::async_trait;
use std::sync::Arc;

/// Picks the next speaker.
#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    /// Choose one of `agents` (never empty) given the shared history, oldest first.
    async fn select_agent(
        &mut self,
        agents: &[Arc<dyn Agent>],
        history: &[ChatMessage],
    ) -> Result<Arc<dyn Agent>, AgentChatError>;

    /// Forget any turn-taking state. Called when the group chat resets.
    fn reset(&mut self) {}

    /// Name used in logs.
    fn name(&self) -> &str;
}

fn find_by_name(agents: &[Arc<dyn Agent>], name: &str) -> Option<Arc<dyn Agent>> {
    agents
        .iter()
        .find(|agent| agent.name() == name)
        .map(Arc::clone)
}

// ---- Sequential ----

/// Round-robin over the roster in registration order.
#[derive(Debug, Default, Clone)]
pub struct SequentialSelectionStrategy {
    initial_agent: Option<String>,
    last_index: Option<usize>,
}

impl SequentialSelectionStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the rotation at the named agent instead of the first one.
    pub fn with_initial_agent(mut self, name: impl Into<String>) -> Self {
        self.initial_agent = Some(name.into());
        self
    }
}

#[async_trait]
impl SelectionStrategy for SequentialSelectionStrategy {
    async fn select_agent(
        &mut self,
        agents: &[Arc<dyn Agent>],
        _history: &[ChatMessage],
    ) -> Result<Arc<dyn Agent>, AgentChatError> {
        if agents.is_empty() {
            return Err(AgentChatError::NoAgents);
        }

        let index = match self.last_index {
            // The roster may have shrunk since the last turn
            Some(last) if last + 1 < agents.len() => last + 1,
            Some(_) => 0,
            None => self
                .initial_agent
                .as_deref()
                .and_then(|name| agents.iter().position(|agent| agent.name() == name))
                .unwrap_or(0),
        };
        self.last_index = Some(index);
        Ok(Arc::clone(&agents[index]))
    }

    fn reset(&mut self) {
        self.last_index = None;
    }

    fn name(&self) -> &str {
        "Sequential"
    }
}

// ---- Handoff ----

/// Default name of the function an agent calls to pass the floor.
pub const HANDOFF_FUNCTION_NAME: &str = "transfer_to_agent";

/// Default argument holding the target agent's name.
pub const HANDOFF_ARGUMENT_NAME: &str = "agent_name";

/// The current speaker keeps the floor until it hands off.
///
/// A handoff is a [`ContentItem::FunctionCall`] (or its result) named
/// [`HANDOFF_FUNCTION_NAME`] in the most recent message whose arguments name the next
/// agent. Without a handoff the current agent continues; before anyone has spoken the
/// initial agent (or the first in the roster) starts.
#[derive(Debug, Clone)]
pub struct HandoffSelectionStrategy {
    function_name: String,
    argument_name: String,
    initial_agent: Option<String>,
    current_agent: Option<String>,
}

impl Default for HandoffSelectionStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl HandoffSelectionStrategy {
    pub fn new() -> Self {
        Self {
            function_name: HANDOFF_FUNCTION_NAME.to_string(),
            argument_name: HANDOFF_ARGUMENT_NAME.to_string(),
            initial_agent: None,
            current_agent: None,
        }
    }

    pub fn with_initial_agent(mut self, name: impl Into<String>) -> Self {
        self.initial_agent = Some(name.into());
        self
    }

    /// Recognize a differently named handoff function.
    pub fn with_function_name(mut self, name: impl Into<String>) -> Self {
        self.function_name = name.into();
        self
    }

    /// Read the target agent from a differently named argument.
    pub fn with_argument_name(mut self, name: impl Into<String>) -> Self {
        self.argument_name = name.into();
        self
    }

    /// Name of the agent currently holding the floor.
    pub fn current_agent(&self) -> Option<&str> {
        self.current_agent.as_deref()
    }

    fn target_from_arguments(&self, arguments: &serde_json::Value) -> Option<String> {
        // Some providers deliver arguments as a JSON-encoded string.
        let parsed;
        let arguments = match arguments {
            serde_json::Value::String(raw) => {
                parsed = serde_json::from_str::<serde_json::Value>(raw).ok()?;
                &parsed
            }
            other => other,
        };
        arguments
            .get(&self.argument_name)
            .and_then(|value| value.as_str())
            .map(|name| name.trim().to_string())
    }

    /// `Some(target)` when `message` contains a handoff; `target` is `None` when the
    /// handoff does not say where to go.
    fn find_handoff(&self, message: &ChatMessage) -> Option<Option<String>> {
        message.items.iter().rev().find_map(|item| match item {
            ContentItem::FunctionCall {
                name, arguments, ..
            } if *name == self.function_name => Some(self.target_from_arguments(arguments)),
            ContentItem::FunctionResult { name, result, .. } if *name == self.function_name => {
                Some(self.target_from_arguments(result))
            }
            _ => None,
        })
    }

    fn fallback(&self, agents: &[Arc<dyn Agent>]) -> Option<Arc<dyn Agent>> {
        self.current_agent
            .as_deref()
            .and_then(|name| find_by_name(agents, name))
    }
}

#[async_trait]
impl SelectionStrategy for HandoffSelectionStrategy {
    async fn select_agent(
        &mut self,
        agents: &[Arc<dyn Agent>],
        history: &[ChatMessage],
    ) -> Result<Arc<dyn Agent>, AgentChatError> {
        if agents.is_empty() {
            return Err(AgentChatError::NoAgents);
        }

        let handoff = history.last().and_then(|message| self.find_handoff(message));
        let selected = match handoff {
            Some(Some(target)) => match find_by_name(agents, &target) {
                Some(agent) => {
                    log::debug!("Handoff to agent '{}'", target);
                    agent
                }
                None => {
                    log::warn!("Handoff names unknown agent '{}'", target);
                    self.fallback(agents).ok_or_else(|| {
                        AgentChatError::SelectionFailed(format!(
                            "handoff target '{}' is not in the chat",
                            target
                        ))
                    })?
                }
            },
            Some(None) => self.fallback(agents).ok_or_else(|| {
                AgentChatError::SelectionFailed(format!(
                    "handoff is missing the '{}' argument",
                    self.argument_name
                ))
            })?,
            None => match self.fallback(agents) {
                Some(agent) => agent,
                None => self
                    .initial_agent
                    .as_deref()
                    .and_then(|name| find_by_name(agents, name))
                    .unwrap_or_else(|| Arc::clone(&agents[0])),
            },
        };

        self.current_agent = Some(selected.name().to_string());
        Ok(selected)
    }

    fn reset(&mut self) {
        self.current_agent = None;
    }

    fn name(&self) -> &str {
        "Handoff"
    }
}

// ---- Moderated ----

/// Instructions given to the moderator model.
pub const DEFAULT_MODERATOR_INSTRUCTIONS: &str = "You moderate a conversation between \
several agents. Read the discussion and decide which agent should speak next so the \
conversation makes progress. Do not let one agent dominate unless it was asked a direct \
question.";

/// Asks a moderator model to name the next speaker.
///
/// The reply is matched against agent names case-insensitively; when nothing matches,
/// the first agent in the roster is chosen.
pub struct ModeratedSelectionStrategy {
    moderator: Arc<dyn ChatCompletionService>,
    instructions: String,
    history_window: Option<usize>,
}

impl ModeratedSelectionStrategy {
    pub fn new(moderator: Arc<dyn ChatCompletionService>) -> Self {
        Self {
            moderator,
            instructions: DEFAULT_MODERATOR_INSTRUCTIONS.to_string(),
            history_window: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Only show the moderator the last `messages` messages.
    pub fn with_history_window(mut self, messages: usize) -> Self {
        self.history_window = Some(messages);
        self
    }

    fn build_request(&self, agents: &[Arc<dyn Agent>], history: &[ChatMessage]) -> Vec<ChatMessage> {
        let start = self
            .history_window
            .map(|window| history.len().saturating_sub(window))
            .unwrap_or(0);

        let roster = agents
            .iter()
            .map(|agent| match agent.description() {
                Some(description) => format!("- {}: {}", agent.name(), description),
                None => format!("- {}", agent.name()),
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut request = Vec::with_capacity(history.len() - start + 2);
        request.push(ChatMessage::system(self.instructions.clone()));
        request.extend(
            history[start..]
                .iter()
                .filter(|message| !message.role.is_instruction())
                .cloned(),
        );
        request.push(ChatMessage::user(format!(
            "Available agents:\n{}\n\nRespond with ONLY the name of the agent who should speak next.",
            roster
        )));
        request
    }
}

#[async_trait]
impl SelectionStrategy for ModeratedSelectionStrategy {
    async fn select_agent(
        &mut self,
        agents: &[Arc<dyn Agent>],
        history: &[ChatMessage],
    ) -> Result<Arc<dyn Agent>, AgentChatError> {
        if agents.is_empty() {
            return Err(AgentChatError::NoAgents);
        }

        let request = self.build_request(agents, history);
        let reply = self
            .moderator
            .send_message(&request)
            .await
            .map_err(AgentChatError::Agent)?;
        let choice = reply.text().trim().to_lowercase();

        // Fuzzy match: the reply may wrap the name in extra words
        let selected = agents
            .iter()
            .find(|agent| choice == agent.name().to_lowercase())
            .or_else(|| {
                agents
                    .iter()
                    .find(|agent| choice.contains(&agent.name().to_lowercase()))
            });

        match selected {
            Some(agent) => Ok(Arc::clone(agent)),
            None => {
                log::warn!(
                    "Moderator reply '{}' matched no agent, falling back to '{}'",
                    choice,
                    agents[0].name()
                );
                Ok(Arc::clone(&agents[0]))
            }
        }
    }

    fn name(&self) -> &str {
        "Moderated"
    }
}
