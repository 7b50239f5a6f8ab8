//! Parse -> validate -> trim -> working memory, through the public API.

use std::collections::BTreeSet;

use serde_json::json;

use keel_context::{
    ContextManagerConfig, ContextTrimmer, MessageParser, OrphanReason, TurnValidator,
    WorkingMemory,
};
use keel_types::{Message, ToolCall, ToolResult};

use crate::common::{history, tool_turn};

fn assert_all_turns_valid(messages: &[Message]) {
    let parsed = MessageParser::parse(messages);
    for turn in &parsed.turns {
        let validation = TurnValidator::validate(turn);
        assert!(validation.is_valid, "invalid turn: {:?}", validation.messages());
    }
}

#[test]
fn matching_call_and_result_ids_form_a_valid_exchange() {
    let messages = vec![
        Message::user("update two sections"),
        Message::assistant_with_tools(
            "",
            vec![
                ToolCall::new("c1", "update_section", json!({})),
                ToolCall::new("c2", "update_section", json!({})),
            ],
        ),
        Message::tool(vec![
            ToolResult::success("c1", "update_section", json!({"ok": true})),
            ToolResult::success("c2", "update_section", json!({"ok": true})),
        ]),
    ];

    let parsed = MessageParser::parse(&messages);

    assert_eq!(parsed.turns.len(), 1);
    assert!(parsed.turns[0].exchanges[0].is_valid());
    assert!(TurnValidator::validate(&parsed.turns[0]).is_valid);
}

#[test]
fn missing_result_invalidates_turn_and_names_the_call() {
    let messages = vec![
        Message::user("update"),
        Message::assistant_with_tools("", vec![ToolCall::new("c1", "update_section", json!({}))]),
        Message::tool(vec![ToolResult::success("c9", "update_section", json!({}))]),
    ];

    let parsed = MessageParser::parse(&messages);
    let validation = TurnValidator::validate(&parsed.turns[0]);

    assert!(!validation.is_valid);
    assert!(validation.messages().iter().any(|issue| issue.contains("c1")));
}

#[test]
fn twenty_five_messages_trim_to_the_twenty_message_ceiling() {
    // system + 6 turns of 4 messages
    let messages = history(6);
    assert_eq!(messages.len(), 25);

    let trimmed = ContextTrimmer::trim_messages(&messages, &ContextManagerConfig::default());

    assert!(trimmed.turns_removed > 0);
    assert_eq!(trimmed.messages.len(), 21);
    assert!(matches!(trimmed.messages[0], Message::System(_)));
    assert_eq!(trimmed.messages[1], Message::user("request 1"));
    assert_eq!(trimmed.messages.last(), Some(&Message::assistant("done 5")));
    assert_eq!(trimmed.removed_tools, BTreeSet::from(["tool_0".to_string()]));
    assert_all_turns_valid(&trimmed.messages);
}

#[test]
fn trimming_malformed_history_yields_valid_idempotent_output() {
    let mut messages = history(3);
    // Orphaned tool message, then a turn whose call is never answered.
    messages.push(Message::tool(vec![ToolResult::success("stray", "x", json!({}))]));
    messages.push(Message::user("broken"));
    messages.push(Message::assistant_with_tools(
        "",
        vec![ToolCall::new("lost", "get_page", json!({}))],
    ));
    messages.push(Message::user("after the broken one"));
    messages.push(Message::assistant("fine"));
    messages.extend(tool_turn(9, "tool_9"));

    let config = ContextManagerConfig::default().with_max_messages(10);
    let once = ContextTrimmer::trim_messages(&messages, &config);
    let twice = ContextTrimmer::trim_messages(&once.messages, &config);

    assert_all_turns_valid(&once.messages);
    assert_eq!(twice.messages, once.messages);
    assert!(!twice.removed_anything());

    // Orphans survive right after the system message.
    let parsed = MessageParser::parse(&messages);
    assert_eq!(parsed.orphaned_messages.len(), 1);
    assert_eq!(
        parsed.orphaned_messages[0].reason,
        OrphanReason::NoPendingToolCalls
    );
    assert_eq!(once.messages[1], parsed.orphaned_messages[0].message);
}

#[test]
fn removed_tools_leave_working_memory_but_active_ones_stay() {
    let mut messages = history(2);
    messages.extend(tool_turn(2, "tool_0"));
    messages.extend(tool_turn(3, "tool_3"));
    let mut memory = WorkingMemory::new();
    memory.add_discovered_tools(["tool_0", "tool_1", "tool_3"]);

    let config = ContextManagerConfig::default().with_max_messages(8);
    let trimmed = ContextTrimmer::trim_messages(&messages, &config);
    memory.remove_tools(&trimmed.removed_tools);

    // tool_0 was dropped with turn 0 but is still called by turn 2.
    assert_eq!(trimmed.removed_tools, BTreeSet::from(["tool_1".to_string()]));
    assert!(trimmed.active_tools.contains("tool_0"));
    assert_eq!(
        memory.discovered_tools().collect::<Vec<_>>(),
        ["tool_0", "tool_3"]
    );
}

#[test]
fn discovered_tools_keep_the_twenty_most_recent() {
    let mut memory = WorkingMemory::new();
    let names: Vec<String> = (0..25).map(|i| format!("cms_tool_{i:02}")).collect();

    memory.add_discovered_tools(names.iter().cloned());

    let kept: BTreeSet<&str> = memory.discovered_tools().collect();
    assert_eq!(kept.len(), 20);
    for name in &names[..5] {
        assert!(!kept.contains(name.as_str()));
    }
    for name in &names[5..] {
        assert!(kept.contains(name.as_str()));
    }
}
