//! Provider-shaped payloads decoded at the boundary, then run through the pipeline.

use std::fs;

use serde_json::{Value, json};
use tempfile::tempdir;

use keel_context::{
    ContextManagerConfig, ContextTrimmer, FileSessionStore, MessageParser, PersistenceError,
    SessionStore, TurnValidator,
};
use keel_types::{DecodeError, Message, SessionId, decode_messages};

fn sdk_turn(n: usize) -> [Value; 3] {
    let id = format!("sdk_{n}");
    [
        json!({"role": "user", "content": format!("show page {n}")}),
        json!({
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Fetching."},
                {"type": "tool-call", "toolCallId": id, "toolName": "get_page", "args": {"n": n}}
            ]
        }),
        json!({
            "role": "tool",
            "content": [
                {"type": "tool-result", "toolCallId": id, "toolName": "get_page", "result": {"id": format!("p{n}")}}
            ]
        }),
    ]
}

fn openai_turn(n: usize) -> [Value; 3] {
    let id = format!("oa_{n}");
    [
        json!({"role": "user", "content": format!("list {n}")}),
        json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [
                {"id": id, "type": "function", "function": {"name": "list_pages", "arguments": "{\"limit\":5}"}}
            ]
        }),
        json!({
            "role": "tool",
            "content": [
                {"type": "tool-result", "toolCallId": id, "toolName": "list_pages", "output": []}
            ]
        }),
    ]
}

fn mixed_payload(turns: usize) -> Vec<Value> {
    let mut values = vec![json!({"role": "system", "content": "You manage a website."})];
    for n in 0..turns {
        if n % 2 == 0 {
            values.extend(sdk_turn(n));
        } else {
            values.extend(openai_turn(n));
        }
    }
    values
}

#[test]
fn mixed_provider_payload_parses_into_valid_turns() {
    let messages = decode_messages(mixed_payload(4)).unwrap();

    let parsed = MessageParser::parse(&messages);

    assert!(parsed.system_message.is_some());
    assert!(parsed.orphaned_messages.is_empty());
    assert_eq!(parsed.turns.len(), 4);
    for turn in &parsed.turns {
        assert!(TurnValidator::validate(turn).is_valid);
    }
    assert_eq!(messages[5].tool_calls()[0].arguments, json!({"limit": 5}));
}

#[test]
fn decoded_history_trims_like_native_messages() {
    let messages = decode_messages(mixed_payload(8)).unwrap();
    let config = ContextManagerConfig::default().with_max_messages(9);

    let trimmed = ContextTrimmer::trim_messages(&messages, &config);

    // system + the three newest turns
    assert_eq!(trimmed.messages.len(), 10);
    assert_eq!(trimmed.messages[1], Message::user("list 5"));
    assert!(trimmed.removed_tools.is_empty());
    assert!(trimmed.active_tools.contains("get_page"));
    assert!(trimmed.active_tools.contains("list_pages"));
}

#[test]
fn decode_failure_names_the_offending_message() {
    let mut values = mixed_payload(1);
    values.push(json!({
        "role": "assistant",
        "content": [{"type": "tool-result", "toolCallId": "x", "toolName": "y"}]
    }));

    let err = decode_messages(values).unwrap_err();

    assert!(matches!(err, DecodeError::UnexpectedPart { index: 4, .. }));
}

#[test]
fn file_store_reads_provider_shaped_sessions_and_saves_native_ones() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("imported.json");
    fs::write(
        &path,
        serde_json::to_string(&json!({"messages": mixed_payload(2)})).unwrap(),
    )
    .unwrap();
    let (store, id) = FileSessionStore::for_file(&path).unwrap();

    let snapshot = store.load(&id).unwrap();
    assert_eq!(snapshot.messages, decode_messages(mixed_payload(2)).unwrap());

    store.save(&id, &snapshot).unwrap();
    let reloaded = store.load(&id).unwrap();
    assert_eq!(reloaded, snapshot);
}

#[test]
fn file_store_reports_bad_messages_and_bad_ids() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("broken.json"),
        r#"{"messages": [{"role": "tool", "content": []}]}"#,
    )
    .unwrap();
    let store = FileSessionStore::new(dir.path());

    assert!(matches!(
        store.load(&SessionId::new("broken")),
        Err(PersistenceError::Decode { .. })
    ));
    assert!(matches!(
        store.load(&SessionId::new("../escape")),
        Err(PersistenceError::InvalidSessionId(_))
    ));
}
