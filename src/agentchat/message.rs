//! Conversation messages shared by every part of the group chat.
//!
//! A [`ChatMessage`] is one turn in the conversation. Its body is an ordered list of
//! [`ContentItem`]s so a single turn can carry text alongside function-call requests,
//! function results, reasoning traces, or images. The `metadata` map is open-ended; the
//! reducers use it to flag synthetic summaries (see [`SUMMARY_METADATA_KEY`]).
//!
//! # Example
//!
//! ```rust
//! use agentchat::message::{ChatMessage, ContentItem, Role};
//!
//! let call = ChatMessage::assistant("")
//!     .with_author("planner")
//!     .with_item(ContentItem::function_call("call-1", "lookup", serde_json::json!({"q": "rust"})));
//!
//! assert_eq!(call.role, Role::Assistant);
//! assert!(call.has_function_content());
//! assert_eq!(call.author_name.as_deref(), Some("planner"));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key marking a message produced by a summarizing reducer.
pub const SUMMARY_METADATA_KEY: &str = "__summary__";

/// Represents the possible roles for a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Set by the agent configuration to steer the model's responses.
    System,
    /// Newer providers' replacement for `System`; treated identically by reducers.
    Developer,
    /// A message sent by a human user (or app user).
    User,
    /// Content generated by an agent.
    Assistant,
    /// Output of a tool / function invocation.
    Tool,
}

impl Role {
    /// `true` for roles owned by agent configuration rather than conversation flow.
    pub fn is_instruction(&self) -> bool {
        matches!(self, Role::System | Role::Developer)
    }
}

/// One typed part of a message body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    /// Plain text.
    Text { text: String },
    /// A request to invoke a function. `id` pairs it with its [`ContentItem::FunctionResult`].
    FunctionCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// The outcome of a function invocation, matched to its call by `id`.
    FunctionResult {
        id: String,
        name: String,
        result: serde_json::Value,
    },
    /// Model reasoning / trace output that is not part of the visible answer.
    Reasoning { text: String },
    /// Reference to an image.
    Image { uri: String, mime_type: String },
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text { text: text.into() }
    }

    pub fn function_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        ContentItem::FunctionCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    pub fn function_result(
        id: impl Into<String>,
        name: impl Into<String>,
        result: serde_json::Value,
    ) -> Self {
        ContentItem::FunctionResult {
            id: id.into(),
            name: name.into(),
            result,
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        ContentItem::Reasoning { text: text.into() }
    }

    pub fn image(uri: impl Into<String>, mime_type: impl Into<String>) -> Self {
        ContentItem::Image {
            uri: uri.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Get the text if this is a [`ContentItem::Text`].
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentItem::Text { text } => Some(text),
            _ => None,
        }
    }

    /// `true` for function-call and function-result items.
    pub fn is_function_content(&self) -> bool {
        matches!(
            self,
            ContentItem::FunctionCall { .. } | ContentItem::FunctionResult { .. }
        )
    }
}

/// A single conversation turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Conversation role of the speaker.
    pub role: Role,
    /// Name of the agent that produced the message, `None` for users and system text.
    pub author_name: Option<String>,
    /// Ordered message body.
    pub items: Vec<ContentItem>,
    /// Free-form key-value metadata.
    pub metadata: HashMap<String, serde_json::Value>,
    /// UTC timestamp recorded when the message was created.
    pub created: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message with a single text item. Empty text yields an empty body.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        let items = if content.is_empty() {
            Vec::new()
        } else {
            vec![ContentItem::text(content)]
        };
        Self {
            role,
            author_name: None,
            items,
            metadata: HashMap::new(),
            created: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn developer(content: impl Into<String>) -> Self {
        Self::new(Role::Developer, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }

    /// Attribute the message to a named agent (builder pattern).
    pub fn with_author(mut self, name: impl Into<String>) -> Self {
        self.author_name = Some(name.into());
        self
    }

    /// Append a content item (builder pattern).
    pub fn with_item(mut self, item: ContentItem) -> Self {
        self.items.push(item);
        self
    }

    /// Attach a metadata entry (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Concatenation of every text item, newline separated.
    pub fn text(&self) -> String {
        self.items
            .iter()
            .filter_map(ContentItem::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `true` when any item is a function call or function result.
    pub fn has_function_content(&self) -> bool {
        self.items.iter().any(ContentItem::is_function_content)
    }

    /// Identifiers and names of the function calls in this message, in order.
    pub fn function_calls(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.items.iter().filter_map(|item| match item {
            ContentItem::FunctionCall {
                id,
                name,
                arguments,
            } => Some((id.as_str(), name.as_str(), arguments)),
            _ => None,
        })
    }

    /// Identifiers of the function results in this message, in order.
    pub fn function_results(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| match item {
            ContentItem::FunctionResult { id, .. } => Some(id.as_str()),
            _ => None,
        })
    }

    /// `true` when the message carries the [`SUMMARY_METADATA_KEY`] flag.
    pub fn is_summary(&self) -> bool {
        self.metadata
            .get(SUMMARY_METADATA_KEY)
            .map(|value| value.as_bool().unwrap_or(true))
            .unwrap_or(false)
    }
}

/// Represents a chunk of a streaming message response.
///
/// Text arrives incrementally in `content`; complete non-text parts (function calls,
/// function results, reasoning) travel whole in `items`.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageChunk {
    /// Role of the message this chunk belongs to.
    pub role: Role,
    /// Agent that is producing the message.
    pub author_name: Option<String>,
    /// The incremental content in this chunk.
    pub content: String,
    /// Whole content items delivered with this chunk.
    pub items: Vec<ContentItem>,
    /// Whether this is the final chunk of its message.
    pub is_final: bool,
}

impl MessageChunk {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            author_name: None,
            content: content.into(),
            items: Vec::new(),
            is_final: false,
        }
    }

    pub fn with_author(mut self, name: impl Into<String>) -> Self {
        self.author_name = Some(name.into());
        self
    }

    /// Attach a complete content item, such as a streamed function call.
    pub fn with_item(mut self, item: ContentItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn finished(mut self) -> Self {
        self.is_final = true;
        self
    }

    /// `true` when the chunk carries a function call or result.
    pub fn has_function_content(&self) -> bool {
        self.items.iter().any(ContentItem::is_function_content)
    }
}

struct PendingMessage {
    role: Role,
    author_name: Option<String>,
    text: String,
    items: Vec<ContentItem>,
}

/// Fold streamed chunks back into complete messages.
///
/// A new message starts whenever the role or author changes, or after a chunk flagged
/// `is_final`. Accumulated text comes first in the message body, followed by the
/// chunks' items in arrival order. Messages that accumulate nothing are dropped.
pub fn flatten_chunks(chunks: &[MessageChunk]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut current: Option<PendingMessage> = None;

    for chunk in chunks {
        let continues = matches!(
            &current,
            Some(pending) if pending.role == chunk.role && pending.author_name == chunk.author_name
        );
        if !continues {
            if let Some(done) = current.take() {
                push_flattened(&mut messages, done);
            }
            current = Some(PendingMessage {
                role: chunk.role,
                author_name: chunk.author_name.clone(),
                text: String::new(),
                items: Vec::new(),
            });
        }
        if let Some(pending) = current.as_mut() {
            pending.text.push_str(&chunk.content);
            pending.items.extend(chunk.items.iter().cloned());
        }
        if chunk.is_final {
            if let Some(done) = current.take() {
                push_flattened(&mut messages, done);
            }
        }
    }
    if let Some(done) = current.take() {
        push_flattened(&mut messages, done);
    }
    messages
}

fn push_flattened(messages: &mut Vec<ChatMessage>, pending: PendingMessage) {
    if pending.text.is_empty() && pending.items.is_empty() {
        return;
    }
    let mut message = ChatMessage::new(pending.role, pending.text);
    message.author_name = pending.author_name;
    message.items.extend(pending.items);
    messages.push(message);
}
