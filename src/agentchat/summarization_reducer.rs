//! Summarizing history reducer.
//!
//! [`ChatHistorySummarizationReducer`] replaces the oldest part of a history with a single
//! summary written by a [`ChatCompletionService`]. The summary is flagged with
//! [`SUMMARY_METADATA_KEY`] so later passes know where previous summaries end.
//!
//! ```text
//! before:  [sys] [summary?] m0 m1 m2 ... m(k-1) | mk ... m(n-1)
//!                           └──── summarized ───┘ └── kept ───┘
//! after:   [sys] [new summary]                    mk ... m(n-1)
//! ```
//!
//! With `use_single_summary(false)` earlier summaries stay in place and the new one is
//! appended after them.
//!
//! # Example
//!
//! ```rust,no_run
//! use agentchat::agent_chat::AgentChat;
//! use agentchat::chat_completion::ChatCompletionService;
//! use agentchat::summarization_reducer::ChatHistorySummarizationReducer;
//! use std::sync::Arc;
//!
//! # async fn run(chat: &AgentChat, service: Arc<dyn ChatCompletionService>) -> Result<(), Box<dyn std::error::Error>> {
//! let reducer = ChatHistorySummarizationReducer::new(service, 20)
//!     .with_threshold_count(10)
//!     .with_fail_on_error(false);
//!
//! if chat.reduce_history(&reducer).await? {
//!     println!("history now has {} messages", chat.history().len());
//! }
//! # Ok(())
//! # }
//! ```

use crate::agentchat::chat_completion::ChatCompletionService;
use crate::agentchat::history_reducer::{
    extract_range, locate_safe_reduction_index, locate_summarization_boundary,
    ChatHistoryReducer, ReductionError,
};
use crate::agentchat::message::{ChatMessage, SUMMARY_METADATA_KEY};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

/// Instructions sent with the messages to summarize.
pub const DEFAULT_SUMMARIZATION_INSTRUCTIONS: &str = "Write a concise summary of the \
conversation above so it can stand in for the original messages.

- Keep every decision, open question, fact, and number that later turns may rely on.
- Mention which participant said what when it matters.
- If the conversation already starts with a summary, fold it into the new one.
- Leave out greetings, filler, and anything that was later corrected.
- Answer with the summary only, no preamble.";

/// Metadata key recording when a summary was produced (RFC 3339).
pub const SUMMARIZED_AT_METADATA_KEY: &str = "summarized_at";

/// Metadata key recording how many messages a summary replaced.
pub const SUMMARIZED_COUNT_METADATA_KEY: &str = "summarized_count";

/// Reducer that condenses old messages into a model-written summary.
pub struct ChatHistorySummarizationReducer {
    service: Arc<dyn ChatCompletionService>,
    /// Trailing messages that survive reduction untouched.
    pub target_count: usize,
    /// Extra messages tolerated before a reduction is triggered.
    pub threshold_count: usize,
    pub summarization_instructions: String,
    /// Fold earlier summaries into the new one instead of keeping them.
    pub use_single_summary: bool,
    /// Propagate summarization failures instead of logging and skipping.
    pub fail_on_error: bool,
    /// Include function calls and results in what gets summarized.
    pub include_function_content: bool,
}

impl ChatHistorySummarizationReducer {
    /// Summarize everything older than about `target_count` trailing messages. With a
    /// target of zero only the newest message stays verbatim.
    pub fn new(service: Arc<dyn ChatCompletionService>, target_count: usize) -> Self {
        Self {
            service,
            target_count,
            threshold_count: 0,
            summarization_instructions: DEFAULT_SUMMARIZATION_INSTRUCTIONS.to_string(),
            use_single_summary: true,
            fail_on_error: true,
            include_function_content: false,
        }
    }

    pub fn with_threshold_count(mut self, threshold_count: usize) -> Self {
        self.threshold_count = threshold_count;
        self
    }

    pub fn with_summarization_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.summarization_instructions = instructions.into();
        self
    }

    pub fn with_use_single_summary(mut self, use_single_summary: bool) -> Self {
        self.use_single_summary = use_single_summary;
        self
    }

    pub fn with_fail_on_error(mut self, fail_on_error: bool) -> Self {
        self.fail_on_error = fail_on_error;
        self
    }

    pub fn with_include_function_content(mut self, include_function_content: bool) -> Self {
        self.include_function_content = include_function_content;
        self
    }

    async fn summarize(&self, messages: &[ChatMessage]) -> Result<ChatMessage, ReductionError> {
        let mut request = messages.to_vec();
        request.push(ChatMessage::system(self.summarization_instructions.clone()));

        let mut summary = self
            .service
            .send_message(&request)
            .await
            .map_err(ReductionError::Summarization)?;
        if summary.text().trim().is_empty() {
            return Err(ReductionError::EmptySummary);
        }

        if let Some(usage) = self.service.get_last_usage() {
            log::debug!(
                "Summarization of {} messages used {} tokens",
                messages.len(),
                usage.total_tokens
            );
        }

        summary
            .metadata
            .insert(SUMMARY_METADATA_KEY.to_string(), Value::Bool(true));
        summary.metadata.insert(
            SUMMARIZED_AT_METADATA_KEY.to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        summary.metadata.insert(
            SUMMARIZED_COUNT_METADATA_KEY.to_string(),
            Value::from(messages.len()),
        );
        Ok(summary)
    }
}

#[async_trait]
impl ChatHistoryReducer for ChatHistorySummarizationReducer {
    async fn reduce(
        &self,
        history: &[ChatMessage],
    ) -> Result<Option<Vec<ChatMessage>>, ReductionError> {
        if history.len() <= self.target_count.saturating_add(self.threshold_count) {
            return Ok(None);
        }

        // A leading instruction message is carried over as-is.
        let head = usize::from(history[0].role.is_instruction());
        let boundary = head + locate_summarization_boundary(&history[head..]);
        if boundary >= history.len() {
            log::debug!("History consists only of summaries, nothing to reduce");
            return Ok(None);
        }

        let Some(index) = locate_safe_reduction_index(
            history,
            self.target_count,
            self.threshold_count,
            boundary,
        ) else {
            return Ok(None);
        };

        let start = if self.use_single_summary { head } else { boundary };
        let skip_function_content = |message: &ChatMessage| message.has_function_content();
        let exclude: Option<&(dyn Fn(&ChatMessage) -> bool + Sync)> =
            if self.include_function_content {
                None
            } else {
                Some(&skip_function_content)
            };
        let to_summarize = extract_range(history, start, Some(index), exclude, true);
        if to_summarize.is_empty() {
            return Ok(None);
        }

        let summary = match self.summarize(&to_summarize).await {
            Ok(summary) => summary,
            Err(err) if !self.fail_on_error => {
                log::warn!("Skipping history reduction, summarization failed: {}", err);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let mut reduced = Vec::with_capacity(boundary + 1 + history.len() - index);
        reduced.extend_from_slice(&history[..head]);
        if !self.use_single_summary {
            reduced.extend_from_slice(&history[head..boundary]);
        }
        reduced.push(summary);
        reduced.extend_from_slice(&history[index..]);

        log::info!(
            "Summarized {} messages, history {} -> {}",
            to_summarize.len(),
            history.len(),
            reduced.len()
        );
        Ok(Some(reduced))
    }

    fn name(&self) -> &str {
        "Summarization"
    }
}
