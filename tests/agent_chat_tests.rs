use agentchat::agent::Agent;
use agentchat::agent_chat::{channel_key_hash, AgentChat, AgentChatError};
use agentchat::channel::{AgentChannel, ChatHistoryChannel};
use agentchat::chat_completion::{BoxError, MessageChunkStream};
use agentchat::event::{ChatEvent, EventHandler};
use agentchat::message::{ChatMessage, ContentItem, MessageChunk, Role};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct MockAgent {
    name: String,
    channel_key: String,
    replies: Vec<ChatMessage>,
    delay: Option<Duration>,
    fail: bool,
    stream_chunks: Option<Vec<MessageChunk>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockAgent {
    fn new(name: &str, reply: &str) -> Self {
        Self {
            name: name.to_string(),
            channel_key: "mock".to_string(),
            replies: vec![ChatMessage::assistant(reply).with_author(name)],
            delay: None,
            fail: false,
            stream_chunks: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn with_channel_key(mut self, key: &str) -> Self {
        self.channel_key = key.to_string();
        self
    }

    fn with_replies(mut self, replies: Vec<ChatMessage>) -> Self {
        self.replies = replies;
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn with_stream_chunks(mut self, chunks: Vec<MessageChunk>) -> Self {
        self.stream_chunks = Some(chunks);
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn last_seen(&self) -> Vec<ChatMessage> {
        self.seen.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn id(&self) -> &str {
        &self.name
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn channel_keys(&self) -> Vec<String> {
        vec![self.channel_key.clone()]
    }

    async fn create_channel(&self) -> Result<Box<dyn AgentChannel>, BoxError> {
        Ok(Box::new(ChatHistoryChannel::new()))
    }

    async fn invoke(&self, history: &[ChatMessage]) -> Result<Vec<ChatMessage>, BoxError> {
        self.seen.lock().unwrap().push(history.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err("model unavailable".into());
        }
        Ok(self.replies.clone())
    }

    fn invoke_stream<'a>(&'a self, history: Vec<ChatMessage>) -> MessageChunkStream<'a> {
        self.seen.lock().unwrap().push(history);
        let chunks = self.stream_chunks.clone().unwrap_or_else(|| {
            vec![
                MessageChunk::new(Role::Assistant, "Hel").with_author(self.name.clone()),
                MessageChunk::new(Role::Assistant, "lo").with_author(self.name.clone()).finished(),
            ]
        });
        Box::pin(futures_util::stream::iter(chunks.into_iter().map(Ok)))
    }
}

#[derive(Default)]
struct RecordingHandler {
    events: Mutex<Vec<ChatEvent>>,
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_chat_event(&self, event: &ChatEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn texts(messages: &[ChatMessage]) -> Vec<String> {
    messages.iter().map(|m| m.text()).collect()
}

#[tokio::test]
async fn test_messages_replay_in_reverse_order() {
    let chat = AgentChat::new();
    chat.add_chat_message(ChatMessage::user("hi")).unwrap();
    chat.add_chat_message(ChatMessage::user("there")).unwrap();

    let messages = chat.get_chat_messages(None).await.unwrap();
    assert_eq!(texts(&messages), vec!["there", "hi"]);
}

#[tokio::test]
async fn test_system_message_is_rejected() {
    let chat = AgentChat::new();
    let result = chat.add_chat_message(ChatMessage::system("You are a pirate"));

    assert!(matches!(result, Err(AgentChatError::InvalidMessage(_))));
    assert_eq!(chat.history().len(), 0);
}

#[tokio::test]
async fn test_invoke_returns_visible_and_records_everything() {
    let agent = MockAgent::new("Researcher", "").with_replies(vec![
        ChatMessage::assistant("")
            .with_author("Researcher")
            .with_item(ContentItem::function_call("c1", "search", json!({"q": "rust"}))),
        ChatMessage::tool("")
            .with_item(ContentItem::function_result("c1", "search", json!("results"))),
        ChatMessage::assistant("Rust is a systems language").with_author("Researcher"),
    ]);

    let chat = AgentChat::new();
    chat.add_chat_message(ChatMessage::user("What is Rust?")).unwrap();
    let visible = chat.invoke_agent(&agent).await.unwrap();

    assert_eq!(texts(&visible), vec!["Rust is a systems language"]);
    assert_eq!(chat.history().len(), 4);
    assert_eq!(texts(&agent.last_seen()), vec!["What is Rust?"]);
    assert!(!chat.is_active());
}

#[tokio::test]
async fn test_second_operation_fails_while_invoke_in_flight() {
    let slow = MockAgent::new("Slow", "done").with_delay(Duration::from_millis(100));
    let other = MockAgent::new("Other", "hi").with_channel_key("other");
    let chat = AgentChat::new();

    let first = chat.invoke_agent(&slow);
    let second = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let invoke = chat.invoke_agent(&other).await;
        let add = chat.add_chat_message(ChatMessage::user("interrupt"));
        let read = chat.get_chat_messages(None).await;
        let reset = chat.reset().await;
        (invoke, add, read, reset)
    };

    let (first, (invoke, add, read, reset)) = tokio::join!(first, second);

    assert_eq!(texts(&first.unwrap()), vec!["done"]);
    assert!(matches!(invoke, Err(AgentChatError::AlreadyActive)));
    assert!(matches!(add, Err(AgentChatError::AlreadyActive)));
    assert!(matches!(read, Err(AgentChatError::AlreadyActive)));
    assert!(matches!(reset, Err(AgentChatError::AlreadyActive)));
    assert_eq!(chat.history().len(), 1);
    assert!(!chat.is_active());
}

#[tokio::test]
async fn test_activity_released_after_agent_failure() {
    let broken = MockAgent::new("Broken", "").failing();
    let chat = AgentChat::new();

    let result = chat.invoke_agent(&broken).await;
    assert!(matches!(result, Err(AgentChatError::Agent(_))));
    assert!(!chat.is_active());

    chat.add_chat_message(ChatMessage::user("still usable")).unwrap();
    assert_eq!(chat.history().len(), 1);
}

#[tokio::test]
async fn test_activity_released_when_invoke_is_cancelled() {
    let slow = MockAgent::new("Slow", "late").with_delay(Duration::from_secs(5));
    let chat = AgentChat::new();

    let timed_out = tokio::time::timeout(Duration::from_millis(20), chat.invoke_agent(&slow)).await;
    assert!(timed_out.is_err());
    assert!(!chat.is_active());
}

#[tokio::test]
async fn test_new_channel_catches_up_on_history() {
    let first = MockAgent::new("First", "first answer").with_channel_key("one");
    let second = MockAgent::new("Second", "second answer").with_channel_key("two");
    let chat = AgentChat::new();

    chat.add_chat_message(ChatMessage::user("question")).unwrap();
    chat.invoke_agent(&first).await.unwrap();
    chat.invoke_agent(&second).await.unwrap();

    assert_eq!(texts(&second.last_seen()), vec!["question", "first answer"]);
    assert_eq!(chat.channel_count(), 2);
}

#[tokio::test]
async fn test_broadcast_reaches_other_channels_before_next_turn() {
    let first = MockAgent::new("First", "from first").with_channel_key("one");
    let second = MockAgent::new("Second", "from second").with_channel_key("two");
    let chat = AgentChat::new();

    chat.add_chat_message(ChatMessage::user("start")).unwrap();
    chat.invoke_agent(&first).await.unwrap();
    chat.invoke_agent(&second).await.unwrap();

    // First's channel has the second reply queued but not yet delivered
    assert_eq!(chat.pending_for(&first), 1);
    chat.add_chat_message(ChatMessage::user("continue")).unwrap();
    assert_eq!(chat.pending_for(&first), 2);
    assert_eq!(chat.pending_for(&second), 1);

    chat.invoke_agent(&first).await.unwrap();
    assert_eq!(
        texts(&first.last_seen()),
        vec!["start", "from first", "from second", "continue"]
    );
    assert_eq!(chat.pending_for(&first), 0);
}

#[tokio::test]
async fn test_agents_with_same_keys_share_a_channel() {
    let alice = MockAgent::new("Alice", "alice says");
    let bob = MockAgent::new("Bob", "bob says");
    let chat = AgentChat::new();

    chat.add_chat_message(ChatMessage::user("hello")).unwrap();
    chat.invoke_agent(&alice).await.unwrap();
    chat.invoke_agent(&bob).await.unwrap();

    assert_eq!(chat.channel_count(), 1);
    // The shared channel recorded Alice's reply itself; nothing was broadcast to it
    assert_eq!(texts(&bob.last_seen()), vec!["hello", "alice says"]);
    assert_eq!(chat.pending_for(&alice), 0);
}

#[tokio::test]
async fn test_channel_history_for_agent_is_reverse_chronological() {
    let agent = MockAgent::new("Agent", "answer");
    let chat = AgentChat::new();

    // No channel yet
    assert!(chat.get_chat_messages(Some(&agent)).await.unwrap().is_empty());

    chat.add_chat_message(ChatMessage::user("q1")).unwrap();
    chat.invoke_agent(&agent).await.unwrap();
    chat.add_chat_message(ChatMessage::user("q2")).unwrap();

    let messages = chat.get_chat_messages(Some(&agent)).await.unwrap();
    assert_eq!(texts(&messages), vec!["q2", "answer", "q1"]);
}

#[tokio::test]
async fn test_stream_records_flattened_message() {
    let streamer = MockAgent::new("Streamer", "unused").with_channel_key("stream");
    let listener = MockAgent::new("Listener", "ok").with_channel_key("listen");
    let chat = AgentChat::new();

    chat.add_chat_message(ChatMessage::user("say hello")).unwrap();
    chat.invoke_agent(&listener).await.unwrap();

    let chunks: Vec<_> = chat.invoke_agent_stream(&streamer).collect().await;
    let content: String = chunks
        .into_iter()
        .map(|chunk| chunk.unwrap().content)
        .collect();
    assert_eq!(content, "Hello");

    let history = chat.history();
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].text(), "Hello");
    assert_eq!(history[2].author_name.as_deref(), Some("Streamer"));
    assert_eq!(chat.pending_for(&listener), 1);
    assert!(!chat.is_active());
}

#[tokio::test]
async fn test_stream_hides_function_calls_but_records_them() {
    let streamer = MockAgent::new("Streamer", "unused").with_stream_chunks(vec![
        MessageChunk::new(Role::Assistant, "")
            .with_author("Streamer")
            .with_item(ContentItem::function_call("c1", "lookup", json!({"q": "rust"})))
            .finished(),
        MessageChunk::new(Role::Tool, "")
            .with_item(ContentItem::function_result("c1", "lookup", json!("found")))
            .finished(),
        MessageChunk::new(Role::Assistant, "Found it")
            .with_author("Streamer")
            .finished(),
    ]);
    let handler = Arc::new(RecordingHandler::default());
    let chat = AgentChat::new().with_event_handler(handler.clone());

    chat.add_chat_message(ChatMessage::user("search")).unwrap();
    let chunks: Vec<MessageChunk> = chat
        .invoke_agent_stream(&streamer)
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;

    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "Found it");

    let history = chat.history();
    assert_eq!(history.len(), 4);
    assert_eq!(history[1].function_calls().count(), 1);
    assert_eq!(history[2].function_results().collect::<Vec<_>>(), vec!["c1"]);
    assert_eq!(history[3].text(), "Found it");

    let events = handler.events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        ChatEvent::AgentInvoked { produced_count: 3, visible_count: 1, .. }
    )));
}

#[test]
fn test_add_outside_runtime_skips_messages_added_event() {
    let handler = Arc::new(RecordingHandler::default());
    let chat = AgentChat::new().with_event_handler(handler.clone());

    chat.add_chat_message(ChatMessage::user("no runtime")).unwrap();

    assert_eq!(chat.history().len(), 1);
    assert!(handler.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_messages_added_event_arrives_on_runtime() {
    let handler = Arc::new(RecordingHandler::default());
    let chat = AgentChat::new().with_event_handler(handler.clone());

    chat.add_chat_messages(vec![ChatMessage::user("a"), ChatMessage::user("b")])
        .unwrap();
    // Delivery is spawned, give it a chance to run
    tokio::time::sleep(Duration::from_millis(20)).await;

    let events = handler.events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, ChatEvent::MessagesAdded { count: 2, .. })));
}

#[tokio::test]
async fn test_reset_clears_history_and_channels() {
    let agent = MockAgent::new("Agent", "answer");
    let chat = AgentChat::new();

    chat.add_chat_message(ChatMessage::user("q")).unwrap();
    chat.invoke_agent(&agent).await.unwrap();
    chat.reset().await.unwrap();

    assert!(chat.history().is_empty());
    assert_eq!(chat.channel_count(), 0);

    chat.add_chat_message(ChatMessage::user("fresh")).unwrap();
    chat.invoke_agent(&agent).await.unwrap();
    assert_eq!(texts(&agent.last_seen()), vec!["fresh"]);
}

#[tokio::test]
async fn test_events_are_emitted_for_invoke() {
    let handler = Arc::new(RecordingHandler::default());
    let agent = MockAgent::new("Agent", "answer");
    let chat = AgentChat::new()
        .with_id("chat-1")
        .with_event_handler(handler.clone());

    chat.invoke_agent(&agent).await.unwrap();

    let events = handler.events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        ChatEvent::ChannelCreated { chat_id, channel_hash, .. }
            if chat_id == "chat-1" && *channel_hash == channel_key_hash(&["mock".to_string()])
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        ChatEvent::AgentInvoked { produced_count: 1, visible_count: 1, .. }
    )));
}
