//! Completion criteria for [`AgentGroupChat`](crate::group_chat::AgentGroupChat).
//!
//! After each turn the group chat asks its [`TerminationStrategy`] whether the
//! conversation is done. A strategy may be scoped to particular agents with
//! [`applies_to`](TerminationStrategy::applies_to); turns by other agents never end the
//! chat. Independently of any strategy, the group chat stops after
//! [`maximum_iterations`](crate::GroupChatConfig::maximum_iterations) turns.

use crate::agentchat::agent::Agent;
use crate::agentchat::message::{ChatMessage, Role};
use async_trait::async_trait;
use futures_util::future::join_all;

/// Decides when a group chat has reached its goal.
#[async_trait]
pub trait TerminationStrategy: Send + Sync {
    /// Agent names this strategy is scoped to. Empty means every agent.
    fn applies_to(&self) -> &[String] {
        &[]
    }

    /// The actual decision, consulted only for in-scope agents.
    async fn should_agent_terminate(&self, agent: &dyn Agent, history: &[ChatMessage]) -> bool;

    /// `false` for out-of-scope agents, otherwise
    /// [`should_agent_terminate`](TerminationStrategy::should_agent_terminate).
    async fn should_terminate(&self, agent: &dyn Agent, history: &[ChatMessage]) -> bool {
        let scope = self.applies_to();
        if !scope.is_empty() && !scope.iter().any(|name| name == agent.name()) {
            return false;
        }
        self.should_agent_terminate(agent, history).await
    }

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// Never terminates; the group chat runs until `maximum_iterations`.
#[derive(Debug, Default, Clone)]
pub struct DefaultTerminationStrategy;

#[async_trait]
impl TerminationStrategy for DefaultTerminationStrategy {
    async fn should_agent_terminate(&self, _agent: &dyn Agent, _history: &[ChatMessage]) -> bool {
        false
    }

    fn name(&self) -> &str {
        "Default"
    }
}

/// Terminates when the latest message contains a keyword.
#[derive(Debug, Clone)]
pub struct KeywordTerminationStrategy {
    keyword: String,
    case_sensitive: bool,
    agents: Vec<String>,
}

impl KeywordTerminationStrategy {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            case_sensitive: true,
            agents: Vec::new(),
        }
    }

    pub fn with_case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Only agents with these names can end the chat.
    pub fn with_agents<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agents = names.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl TerminationStrategy for KeywordTerminationStrategy {
    fn applies_to(&self) -> &[String] {
        &self.agents
    }

    async fn should_agent_terminate(&self, _agent: &dyn Agent, history: &[ChatMessage]) -> bool {
        let Some(last) = history.last() else {
            return false;
        };
        let text = last.text();
        if self.case_sensitive {
            text.contains(&self.keyword)
        } else {
            text.to_lowercase().contains(&self.keyword.to_lowercase())
        }
    }

    fn name(&self) -> &str {
        "Keyword"
    }
}

/// Terminates once agents have produced `max_turns` assistant messages.
#[derive(Debug, Clone)]
pub struct MaxTurnsTerminationStrategy {
    max_turns: usize,
    agents: Vec<String>,
}

impl MaxTurnsTerminationStrategy {
    pub fn new(max_turns: usize) -> Self {
        Self {
            max_turns,
            agents: Vec::new(),
        }
    }

    pub fn with_agents<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agents = names.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl TerminationStrategy for MaxTurnsTerminationStrategy {
    fn applies_to(&self) -> &[String] {
        &self.agents
    }

    async fn should_agent_terminate(&self, _agent: &dyn Agent, history: &[ChatMessage]) -> bool {
        let turns = history
            .iter()
            .filter(|message| message.role == Role::Assistant)
            .count();
        turns >= self.max_turns
    }

    fn name(&self) -> &str {
        "MaxTurns"
    }
}

/// How an [`AggregatorTerminationStrategy`] combines its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateCondition {
    /// Terminate when every member agrees.
    All,
    /// Terminate when at least one member agrees.
    Any,
}

/// Combines several strategies. Members keep their own scoping.
pub struct AggregatorTerminationStrategy {
    strategies: Vec<Box<dyn TerminationStrategy>>,
    condition: AggregateCondition,
    agents: Vec<String>,
}

impl AggregatorTerminationStrategy {
    pub fn new(strategies: Vec<Box<dyn TerminationStrategy>>, condition: AggregateCondition) -> Self {
        Self {
            strategies,
            condition,
            agents: Vec::new(),
        }
    }

    pub fn with_agents<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.agents = names.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl TerminationStrategy for AggregatorTerminationStrategy {
    fn applies_to(&self) -> &[String] {
        &self.agents
    }

    async fn should_agent_terminate(&self, agent: &dyn Agent, history: &[ChatMessage]) -> bool {
        if self.strategies.is_empty() {
            return false;
        }
        let votes = join_all(
            self.strategies
                .iter()
                .map(|strategy| strategy.should_terminate(agent, history)),
        )
        .await;

        match self.condition {
            AggregateCondition::All => votes.iter().all(|vote| *vote),
            AggregateCondition::Any => votes.iter().any(|vote| *vote),
        }
    }

    fn name(&self) -> &str {
        "Aggregator"
    }
}
