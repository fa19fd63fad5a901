//! Chat history reduction.
//!
//! Long group chats outgrow a model's context window. A [`ChatHistoryReducer`] takes the
//! shared history and returns a shorter replacement, or `None` when nothing needs to be
//! done. Two reducers are provided:
//!
//! - [`ChatHistoryTruncationReducer`]: drops the oldest messages.
//! - [`ChatHistorySummarizationReducer`](crate::summarization_reducer::ChatHistorySummarizationReducer):
//!   replaces the oldest messages with a model-written summary.
//!
//! Both work in message counts. `target_count` is how many trailing messages survive;
//! `threshold_count` is extra slack before a reduction is triggered at all. Neither ever
//! separates a function call from its result.
//!
//! # Architecture
//!
//! ```text
//! history ──► locate_summarization_boundary   (skip prior summaries)
//!        ──► locate_safe_reduction_index     (cut point that keeps pairs intact)
//!        ──► extract_range                   (what gets summarized)
//!        ──► reducer-specific reassembly
//! ```

use crate::agentchat::chat_completion::BoxError;
use crate::agentchat::message::{ChatMessage, ContentItem, Role};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::fmt;

/// Errors raised while reducing a history.
#[derive(Debug)]
pub enum ReductionError {
    /// The summarization service failed.
    Summarization(BoxError),
    /// The summarization service answered with no text.
    EmptySummary,
}

impl fmt::Display for ReductionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReductionError::Summarization(err) => write!(f, "Summarization failed: {}", err),
            ReductionError::EmptySummary => write!(f, "Summarization returned an empty summary"),
        }
    }
}

impl Error for ReductionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReductionError::Summarization(err) => Some(err.as_ref()),
            ReductionError::EmptySummary => None,
        }
    }
}

/// Shrinks a chat history.
///
/// Implementations must be all-or-nothing: either a complete replacement history or
/// `None`, never a partially reduced one.
#[async_trait]
pub trait ChatHistoryReducer: Send + Sync {
    /// `Ok(None)` means the history is fine as it is.
    async fn reduce(
        &self,
        history: &[ChatMessage],
    ) -> Result<Option<Vec<ChatMessage>>, ReductionError>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// Apply `reducer` to `history` in place. Returns `true` when the history changed.
pub async fn reduce_in_place(
    reducer: &dyn ChatHistoryReducer,
    history: &mut Vec<ChatMessage>,
) -> Result<bool, ReductionError> {
    match reducer.reduce(history).await? {
        Some(reduced) => {
            *history = reduced;
            Ok(true)
        }
        None => Ok(false),
    }
}

// ---- Pairing ----

/// Positions of matched function calls and results, as `(call_index, result_index)`.
///
/// Each result is matched to the earliest still-unmatched call with the same id that
/// appears before it. Calls without a result and results without a call are ignored.
pub fn get_call_result_pairs(history: &[ChatMessage]) -> Vec<(usize, usize)> {
    let mut open_calls: HashMap<&str, VecDeque<usize>> = HashMap::new();
    let mut pairs = Vec::new();

    for (index, message) in history.iter().enumerate() {
        for item in &message.items {
            match item {
                ContentItem::FunctionCall { id, .. } => {
                    open_calls.entry(id.as_str()).or_default().push_back(index);
                }
                ContentItem::FunctionResult { id, .. } => {
                    if let Some(call_index) = open_calls
                        .get_mut(id.as_str())
                        .and_then(|calls| calls.pop_front())
                    {
                        pairs.push((call_index, index));
                    }
                }
                _ => {}
            }
        }
    }
    pairs
}

/// `true` when cutting the history just before `index` would separate a pair.
fn splits_pair(pairs: &[(usize, usize)], index: usize) -> bool {
    pairs
        .iter()
        .any(|&(call, result)| call < index && index <= result)
}

// ---- Boundaries ----

/// Index of the first message that is not a summary; `history.len()` when every
/// message is one.
pub fn locate_summarization_boundary(history: &[ChatMessage]) -> usize {
    history
        .iter()
        .position(|message| !message.is_summary())
        .unwrap_or(history.len())
}

/// Find where to cut so that roughly `target_count` trailing messages survive.
///
/// Returns `None` when the history is within `target_count + threshold_count` of
/// `offset_count`, or when no cut after `offset_count` keeps every call/result pair
/// whole. Instruction messages and function messages are never chosen as the first
/// kept message. Within the threshold window the cut moves back to a user message when
/// it can, so a question stays with its answer.
pub fn locate_safe_reduction_index(
    history: &[ChatMessage],
    target_count: usize,
    threshold_count: usize,
    offset_count: usize,
) -> Option<usize> {
    let total = history.len();
    let threshold_index = total.checked_sub(target_count.saturating_add(threshold_count))?;
    if threshold_index <= offset_count {
        return None;
    }

    let pairs = get_call_result_pairs(history);
    let is_safe_cut = |index: usize| {
        let message = &history[index];
        !message.role.is_instruction()
            && !message.has_function_content()
            && !splits_pair(&pairs, index)
    };

    // A target of zero still keeps the newest message
    let mut target_index = (total - target_count).min(total - 1);
    while target_index > offset_count && !is_safe_cut(target_index) {
        target_index -= 1;
    }
    if target_index <= offset_count {
        return None;
    }

    let mut candidate = target_index;
    while candidate >= threshold_index && candidate > offset_count {
        if history[candidate].role == Role::User && !splits_pair(&pairs, candidate) {
            return Some(candidate);
        }
        candidate -= 1;
    }
    Some(target_index)
}

// ---- Extraction ----

/// Copy `history[start..end]` (`end = None` means to the end).
///
/// Instruction messages are always dropped, as is anything `exclude` matches. With
/// `preserve_pairs`, a call and its result are kept only together: if one half falls
/// outside the range or is dropped, the other half is dropped as well. Surviving
/// messages keep their original order.
pub fn extract_range(
    history: &[ChatMessage],
    start: usize,
    end: Option<usize>,
    exclude: Option<&(dyn Fn(&ChatMessage) -> bool + Sync)>,
    preserve_pairs: bool,
) -> Vec<ChatMessage> {
    let end = end.unwrap_or(history.len()).min(history.len());
    if start >= end {
        return Vec::new();
    }

    let mut keep: Vec<bool> = history[start..end]
        .iter()
        .map(|message| {
            !message.role.is_instruction() && !exclude.map(|f| f(message)).unwrap_or(false)
        })
        .collect();

    if preserve_pairs {
        let pairs = get_call_result_pairs(history);
        let in_range = |index: usize| (start..end).contains(&index);
        // One message can hold several calls, so dropping a half can break another pair.
        loop {
            let mut changed = false;
            for &(call, result) in &pairs {
                let call_kept = in_range(call) && keep[call - start];
                let result_kept = in_range(result) && keep[result - start];
                if call_kept != result_kept {
                    if call_kept {
                        keep[call - start] = false;
                    } else {
                        keep[result - start] = false;
                    }
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    history[start..end]
        .iter()
        .zip(keep)
        .filter_map(|(message, kept)| kept.then(|| message.clone()))
        .collect()
}

// ---- Truncation ----

/// Drops the oldest messages, keeping a leading system or developer message.
#[derive(Debug, Clone)]
pub struct ChatHistoryTruncationReducer {
    pub target_count: usize,
    pub threshold_count: usize,
}

impl ChatHistoryTruncationReducer {
    /// Keep about `target_count` trailing messages. A target of zero still keeps the
    /// newest message.
    pub fn new(target_count: usize) -> Self {
        Self {
            target_count,
            threshold_count: 0,
        }
    }

    pub fn with_threshold_count(mut self, threshold_count: usize) -> Self {
        self.threshold_count = threshold_count;
        self
    }
}

#[async_trait]
impl ChatHistoryReducer for ChatHistoryTruncationReducer {
    async fn reduce(
        &self,
        history: &[ChatMessage],
    ) -> Result<Option<Vec<ChatMessage>>, ReductionError> {
        if history.len() <= self.target_count.saturating_add(self.threshold_count) {
            return Ok(None);
        }

        let instructions = history.first().filter(|m| m.role.is_instruction());
        let offset = usize::from(instructions.is_some());
        let Some(index) =
            locate_safe_reduction_index(history, self.target_count, self.threshold_count, offset)
        else {
            return Ok(None);
        };

        let mut reduced = Vec::with_capacity(history.len() - index + offset);
        reduced.extend(instructions.cloned());
        reduced.extend_from_slice(&history[index..]);
        log::debug!(
            "Truncation reducer cut {} messages at index {}",
            history.len() - reduced.len(),
            index
        );
        Ok(Some(reduced))
    }

    fn name(&self) -> &str {
        "Truncation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str) -> ChatMessage {
        ChatMessage::assistant("").with_item(ContentItem::function_call(id, "lookup", json!({})))
    }

    fn result(id: &str) -> ChatMessage {
        ChatMessage::tool("").with_item(ContentItem::function_result(id, "lookup", json!("ok")))
    }

    #[test]
    fn test_pairs_match_earliest_open_call() {
        let history = vec![call("a"), call("a"), result("a"), result("a"), result("b")];
        assert_eq!(get_call_result_pairs(&history), vec![(0, 2), (1, 3)]);
    }

    #[test]
    fn test_result_before_call_is_unmatched() {
        let history = vec![result("a"), call("a")];
        assert!(get_call_result_pairs(&history).is_empty());
    }

    #[test]
    fn test_boundary_skips_summaries() {
        let summary = ChatMessage::assistant("s")
            .with_metadata(crate::agentchat::message::SUMMARY_METADATA_KEY, json!(true));
        let history = vec![summary.clone(), summary.clone(), ChatMessage::user("u")];
        assert_eq!(locate_summarization_boundary(&history), 2);
        assert_eq!(locate_summarization_boundary(&[summary]), 1);
    }

    #[test]
    fn test_safe_index_steps_back_over_pair() {
        // index:    0     1     2       3         4     5
        let history = vec![
            ChatMessage::user("u0"),
            ChatMessage::assistant("a1"),
            call("x"),
            result("x"),
            ChatMessage::assistant("a4"),
            ChatMessage::user("u5"),
        ];
        // total - target = 3 lands on the result; walk back past the call to 1
        let index = locate_safe_reduction_index(&history, 3, 0, 0);
        assert_eq!(index, Some(1));
    }

    #[test]
    fn test_safe_index_none_within_threshold() {
        let history: Vec<_> = (0..6).map(|i| ChatMessage::user(format!("m{}", i))).collect();
        assert_eq!(locate_safe_reduction_index(&history, 4, 2, 0), None);
        assert_eq!(locate_safe_reduction_index(&history, 10, 0, 0), None);
    }

    #[test]
    fn test_extract_range_drops_pair_split_by_range() {
        let history = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("u1"),
            call("x"),
            result("x"),
        ];
        let extracted = extract_range(&history, 0, Some(3), None, true);
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].text(), "u1");
    }
}
