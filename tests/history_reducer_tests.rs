use agentchat::agent_chat::AgentChat;
use agentchat::history_reducer::{
    extract_range, get_call_result_pairs, locate_safe_reduction_index, reduce_in_place,
    ChatHistoryReducer, ChatHistoryTruncationReducer,
};
use agentchat::message::{ChatMessage, ContentItem, Role};
use serde_json::json;

fn conversation(count: usize) -> Vec<ChatMessage> {
    (0..count)
        .map(|i| {
            if i % 2 == 0 {
                ChatMessage::user(format!("m{}", i))
            } else {
                ChatMessage::assistant(format!("m{}", i))
            }
        })
        .collect()
}

fn texts(messages: &[ChatMessage]) -> Vec<String> {
    messages.iter().map(|m| m.text()).collect()
}

fn call(id: &str) -> ChatMessage {
    ChatMessage::assistant("").with_item(ContentItem::function_call(id, "search", json!({})))
}

fn result(id: &str) -> ChatMessage {
    ChatMessage::tool("").with_item(ContentItem::function_result(id, "search", json!("hit")))
}

/// Every matched pair is either fully present or fully absent in `kept`.
fn assert_pairs_whole(original: &[ChatMessage], kept: &[ChatMessage]) {
    for (call_index, result_index) in get_call_result_pairs(original) {
        let has_call = kept.contains(&original[call_index]);
        let has_result = kept.contains(&original[result_index]);
        assert_eq!(
            has_call, has_result,
            "pair ({}, {}) was split",
            call_index, result_index
        );
    }
}

#[tokio::test]
async fn test_truncation_noop_within_budget() {
    let history = conversation(12);
    let reducer = ChatHistoryTruncationReducer::new(20);

    assert!(reducer.reduce(&history).await.unwrap().is_none());

    let reducer = ChatHistoryTruncationReducer::new(8).with_threshold_count(4);
    assert!(reducer.reduce(&history).await.unwrap().is_none());
}

#[tokio::test]
async fn test_truncation_keeps_tail() {
    let history = conversation(12);
    let reducer = ChatHistoryTruncationReducer::new(4);

    let reduced = reducer.reduce(&history).await.unwrap().unwrap();
    assert_eq!(reduced.len(), 4);
    assert_eq!(reduced[0].text(), "m8");
    assert_eq!(reduced[3].text(), "m11");
}

#[tokio::test]
async fn test_truncation_aligns_to_user_within_threshold() {
    let history = conversation(12);
    // Cut would land on m7 (assistant); the window allows moving back to m6 (user)
    let reducer = ChatHistoryTruncationReducer::new(5).with_threshold_count(2);

    let reduced = reducer.reduce(&history).await.unwrap().unwrap();
    assert_eq!(reduced[0].role, Role::User);
    assert_eq!(reduced[0].text(), "m6");
    assert_eq!(reduced.len(), 6);
}

#[tokio::test]
async fn test_truncation_preserves_leading_system_message() {
    let mut history = vec![ChatMessage::developer("house rules")];
    history.extend(conversation(10));
    let reducer = ChatHistoryTruncationReducer::new(3);

    let reduced = reducer.reduce(&history).await.unwrap().unwrap();
    assert_eq!(reduced[0].role, Role::Developer);
    assert_eq!(reduced.len(), 4);
    assert_eq!(reduced[1].text(), "m7");
}

#[tokio::test]
async fn test_truncation_never_orphans_function_result() {
    let mut history = conversation(6);
    history.push(call("a"));
    history.push(result("a"));
    history.push(ChatMessage::assistant("answer"));
    history.push(ChatMessage::user("thanks"));

    let reducer = ChatHistoryTruncationReducer::new(3);
    let reduced = reducer.reduce(&history).await.unwrap().unwrap();

    assert_pairs_whole(&history, &reduced);
    assert!(!reduced[0].has_function_content());
    assert_eq!(reduced[0].text(), "m5");
}

#[tokio::test]
async fn test_reduce_in_place_reports_change() {
    let mut history = conversation(10);
    let reducer = ChatHistoryTruncationReducer::new(2);

    assert!(reduce_in_place(&reducer, &mut history).await.unwrap());
    assert_eq!(history.len(), 2);
    assert!(!reduce_in_place(&reducer, &mut history).await.unwrap());
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn test_chat_history_unchanged_when_reducer_has_nothing_to_do() {
    let chat = AgentChat::new();
    chat.add_chat_messages(conversation(12)).unwrap();
    let before = chat.history();

    let changed = chat
        .reduce_history(&ChatHistoryTruncationReducer::new(20))
        .await
        .unwrap();

    assert!(!changed);
    assert_eq!(chat.history(), before);
}

#[tokio::test]
async fn test_chat_history_replaced_by_reducer() {
    let chat = AgentChat::new();
    chat.add_chat_messages(conversation(12)).unwrap();

    let changed = chat
        .reduce_history(&ChatHistoryTruncationReducer::new(4))
        .await
        .unwrap();

    assert!(changed);
    assert_eq!(chat.history().len(), 4);
    assert!(!chat.is_active());
}

#[test]
fn test_safe_index_with_zero_target_keeps_newest_message() {
    let history: Vec<ChatMessage> = (0..4).map(|i| ChatMessage::user(format!("u{}", i))).collect();
    assert_eq!(locate_safe_reduction_index(&history, 0, 0, 0), Some(3));
    assert_eq!(locate_safe_reduction_index(&[], 0, 0, 0), None);
    assert_eq!(locate_safe_reduction_index(&history, usize::MAX, 1, 0), None);
}

#[tokio::test]
async fn test_truncation_with_zero_target() {
    let chat = AgentChat::new();
    chat.add_chat_messages((0..4).map(|i| ChatMessage::user(format!("u{}", i))).collect())
        .unwrap();

    let changed = chat
        .reduce_history(&ChatHistoryTruncationReducer::new(0))
        .await
        .unwrap();

    assert!(changed);
    assert_eq!(texts(&chat.history()), vec!["u3"]);

    let huge = ChatHistoryTruncationReducer::new(usize::MAX).with_threshold_count(usize::MAX);
    assert!(huge.reduce(&conversation(3)).await.unwrap().is_none());
}

#[test]
fn test_safe_index_respects_offset() {
    let history = conversation(10);
    assert_eq!(locate_safe_reduction_index(&history, 4, 0, 0), Some(6));
    assert_eq!(locate_safe_reduction_index(&history, 4, 0, 6), None);
    assert_eq!(locate_safe_reduction_index(&history, 4, 0, 5), Some(6));
}

#[test]
fn test_extract_range_pair_preservation_across_cuts() {
    let history = vec![
        ChatMessage::system("rules"),
        ChatMessage::user("u1"),
        call("a"),
        ChatMessage::assistant("between"),
        result("a"),
        call("b"),
        result("b"),
        ChatMessage::user("u2"),
    ];

    for start in 0..history.len() {
        for end in start..=history.len() {
            let extracted = extract_range(&history, start, Some(end), None, true);
            assert_pairs_whole(&history, &extracted);
            assert!(extracted.iter().all(|m| !m.role.is_instruction()));
        }
    }

    let all = extract_range(&history, 0, None, None, true);
    let texts: Vec<String> = all.iter().map(|m| m.text()).collect();
    assert_eq!(texts, vec!["u1", "", "between", "", "", "", "u2"]);
}

#[test]
fn test_extract_range_exclusion_drops_both_halves() {
    let history = vec![ChatMessage::user("u"), call("a"), result("a"), ChatMessage::assistant("x")];
    let skip_results = |m: &ChatMessage| m.function_results().next().is_some();

    let extracted = extract_range(&history, 0, None, Some(&skip_results), true);
    let texts: Vec<String> = extracted.iter().map(|m| m.text()).collect();
    assert_eq!(texts, vec!["u", "x"]);

    // Without pair preservation only the excluded half goes
    let extracted = extract_range(&history, 0, None, Some(&skip_results), false);
    assert_eq!(extracted.len(), 3);
}
