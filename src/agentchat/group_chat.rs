//! Multi-agent group chat driver.
//!
//! [`AgentGroupChat`] runs a conversation between several agents over one shared
//! [`AgentChat`]. Each turn the [`SelectionStrategy`] picks a speaker, the agent is
//! invoked through its channel, and the [`TerminationStrategy`] decides whether the goal
//! was reached.
//!
//! # Architecture
//!
//! ```text
//! AgentGroupChat
//!   ├─ SelectionStrategy     who speaks next
//!   ├─ TerminationStrategy   are we done?
//!   ├─ GroupChatConfig       turn cap, automatic reset
//!   └─ AgentChat             shared history, channels, broadcast queue
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use agentchat::agent::{Agent, ChatCompletionAgent};
//! use agentchat::chat_completion::ChatCompletionService;
//! use agentchat::group_chat::AgentGroupChat;
//! use agentchat::message::ChatMessage;
//! use agentchat::termination::KeywordTerminationStrategy;
//! use agentchat::GroupChatConfig;
//! use std::sync::Arc;
//!
//! # async fn run(service: Arc<dyn ChatCompletionService>) -> Result<(), Box<dyn std::error::Error>> {
//! let writer: Arc<dyn Agent> = Arc::new(
//!     ChatCompletionAgent::new("writer", "Writer", service.clone())
//!         .with_instructions("Write or revise the slogan."),
//! );
//! let critic: Arc<dyn Agent> = Arc::new(
//!     ChatCompletionAgent::new("critic", "Critic", service)
//!         .with_instructions("Critique the slogan. Say APPROVED when it is good."),
//! );
//!
//! let mut chat = AgentGroupChat::new(vec![writer, critic])
//!     .with_termination_strategy(Box::new(
//!         KeywordTerminationStrategy::new("APPROVED").with_agents(["Critic"]),
//!     ))
//!     .with_config(GroupChatConfig::default().with_maximum_iterations(8));
//!
//! chat.chat().add_chat_message(ChatMessage::user("A slogan for a bike shop"))?;
//! let response = chat.invoke().await?;
//! println!("finished after {} turns (complete: {})", response.turns, response.is_complete);
//! # Ok(())
//! # }
//! ```

use crate::agentchat::agent::Agent;
use crate::agentchat::agent_chat::{AgentChat, AgentChatError};
use crate::agentchat::config::GroupChatConfig;
use crate::agentchat::event::{ChatEvent, EventHandler};
use crate::agentchat::message::ChatMessage;
use crate::agentchat::selection::{SelectionStrategy, SequentialSelectionStrategy};
use crate::agentchat::termination::{DefaultTerminationStrategy, TerminationStrategy};
use std::sync::Arc;

/// Result of [`AgentGroupChat::invoke`].
#[derive(Debug, Clone)]
pub struct GroupChatResponse {
    /// Visible messages produced during this call, in order.
    pub messages: Vec<ChatMessage>,
    /// Number of agent turns taken during this call.
    pub turns: usize,
    /// Whether the termination strategy ended the chat.
    pub is_complete: bool,
}

/// Drives turn-taking between agents over a shared [`AgentChat`].
pub struct AgentGroupChat {
    chat: AgentChat,
    agents: Vec<Arc<dyn Agent>>,
    selection: Box<dyn SelectionStrategy>,
    termination: Box<dyn TerminationStrategy>,
    config: GroupChatConfig,
    is_complete: bool,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl AgentGroupChat {
    /// Sequential selection, no termination other than the iteration cap.
    pub fn new(agents: Vec<Arc<dyn Agent>>) -> Self {
        Self {
            chat: AgentChat::new(),
            agents,
            selection: Box::new(SequentialSelectionStrategy::new()),
            termination: Box::new(DefaultTerminationStrategy),
            config: GroupChatConfig::default(),
            is_complete: false,
            event_handler: None,
        }
    }

    pub fn with_selection_strategy(mut self, strategy: Box<dyn SelectionStrategy>) -> Self {
        self.selection = strategy;
        self
    }

    pub fn with_termination_strategy(mut self, strategy: Box<dyn TerminationStrategy>) -> Self {
        self.termination = strategy;
        self
    }

    pub fn with_config(mut self, config: GroupChatConfig) -> Self {
        self.config = config;
        self
    }

    /// Register an event handler on the group chat and its inner [`AgentChat`].
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.chat.set_event_handler(Arc::clone(&handler));
        self.event_handler = Some(handler);
        self
    }

    async fn emit(&self, event: ChatEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_chat_event(&event).await;
        }
    }

    /// Add an agent to the roster. Names must be unique.
    pub fn add_agent(&mut self, agent: Arc<dyn Agent>) -> Result<(), AgentChatError> {
        if self.agents.iter().any(|a| a.name() == agent.name()) {
            return Err(AgentChatError::DuplicateAgent(agent.name().to_string()));
        }
        log::debug!("Agent '{}' joined group chat {}", agent.name(), self.chat.id);
        self.agents.push(agent);
        Ok(())
    }

    /// The roster, in registration order.
    pub fn agents(&self) -> &[Arc<dyn Agent>] {
        &self.agents
    }

    /// The shared chat, e.g. to add user messages or read history.
    pub fn chat(&self) -> &AgentChat {
        &self.chat
    }

    pub fn config(&self) -> &GroupChatConfig {
        &self.config
    }

    /// `true` once the termination strategy ended the chat.
    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    fn ensure_not_complete(&mut self) -> Result<(), AgentChatError> {
        if !self.is_complete {
            return Ok(());
        }
        if self.config.automatic_reset {
            log::debug!("Group chat {} was complete, resetting flag", self.chat.id);
            self.is_complete = false;
            Ok(())
        } else {
            Err(AgentChatError::ChatComplete)
        }
    }

    /// Invoke `agent` once and consult the termination strategy.
    async fn take_turn(&mut self, agent: &Arc<dyn Agent>) -> Result<Vec<ChatMessage>, AgentChatError> {
        let messages = self.chat.invoke_agent(agent.as_ref()).await?;

        let history = self.chat.history();
        let should_terminate = self
            .termination
            .should_terminate(agent.as_ref(), &history)
            .await;
        log::debug!(
            "Termination strategy '{}' after '{}': {}",
            self.termination.name(),
            agent.name(),
            should_terminate
        );
        self.emit(ChatEvent::TerminationChecked {
            chat_id: self.chat.id.clone(),
            agent_name: agent.name().to_string(),
            should_terminate,
        })
        .await;

        if should_terminate {
            self.is_complete = true;
        }
        Ok(messages)
    }

    /// Run turns until termination or `maximum_iterations`.
    pub async fn invoke(&mut self) -> Result<GroupChatResponse, AgentChatError> {
        self.ensure_not_complete()?;
        if self.agents.is_empty() {
            return Err(AgentChatError::NoAgents);
        }

        let mut messages = Vec::new();
        let mut turns = 0;
        while turns < self.config.maximum_iterations {
            let history = self.chat.history();
            let agent = self.selection.select_agent(&self.agents, &history).await?;
            turns += 1;
            log::info!(
                "Group chat {} turn {}: '{}' selected by {}",
                self.chat.id,
                turns,
                agent.name(),
                self.selection.name()
            );
            self.emit(ChatEvent::AgentSelected {
                chat_id: self.chat.id.clone(),
                agent_name: agent.name().to_string(),
                turn: turns,
            })
            .await;

            messages.extend(self.take_turn(&agent).await?);
            if self.is_complete {
                break;
            }
        }

        if !self.is_complete {
            log::info!(
                "Group chat {} stopped at the iteration cap ({} turns)",
                self.chat.id,
                turns
            );
        }
        self.emit(ChatEvent::GroupChatCompleted {
            chat_id: self.chat.id.clone(),
            turns,
            is_complete: self.is_complete,
        })
        .await;

        Ok(GroupChatResponse {
            messages,
            turns,
            is_complete: self.is_complete,
        })
    }

    /// Run exactly one turn for `agent`, adding it to the roster if needed.
    pub async fn invoke_single_turn(
        &mut self,
        agent: Arc<dyn Agent>,
    ) -> Result<Vec<ChatMessage>, AgentChatError> {
        self.ensure_not_complete()?;
        if !self.agents.iter().any(|a| a.name() == agent.name()) {
            self.add_agent(Arc::clone(&agent))?;
        }
        self.take_turn(&agent).await
    }

    /// Clear the shared chat, the completion flag, and the selection state.
    pub async fn reset(&mut self) -> Result<(), AgentChatError> {
        self.chat.reset().await?;
        self.selection.reset();
        self.is_complete = false;
        Ok(())
    }
}
