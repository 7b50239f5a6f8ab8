//! Stats and compaction through `ContextService` and the file store.

use tempfile::tempdir;

use keel_context::{
    CompactRequest, CompactionSkipReason, ContextError, ContextService, EstimateError,
    FileSessionStore, ModelLimits, PersistenceError, SessionStore, WorkingMemory,
};
use keel_types::SessionId;

use crate::common::{CharEstimator, TEST_MODEL, history, write_session};

fn service(
    dir: &std::path::Path,
    estimator: CharEstimator,
) -> ContextService<FileSessionStore, CharEstimator> {
    ContextService::new(FileSessionStore::new(dir), estimator, TEST_MODEL)
}

fn force() -> CompactRequest {
    CompactRequest {
        model_id: None,
        force: true,
    }
}

#[test]
fn forced_compaction_with_headroom_trims_then_reports_nothing_to_do() {
    let dir = tempdir().unwrap();
    let id = write_session(dir.path(), "roomy", history(9));
    let service = service(dir.path(), CharEstimator::roomy());

    let stats = service.context_stats(&id, None).unwrap();
    assert!(!stats.is_approaching_limit);

    let first = service.compact(&id, &force()).unwrap();
    assert!(first.compacted);
    assert!(first.tokens_saved > 0);
    assert_eq!(first.messages_before, 37);
    assert_eq!(first.messages_after, 21);

    let second = service.compact(&id, &force()).unwrap();
    assert!(!second.compacted);
    assert_eq!(second.reason, Some(CompactionSkipReason::AlreadyMinimal));
    assert_eq!(second.messages_before, 21);
}

#[test]
fn unforced_compaction_with_headroom_is_not_needed_and_writes_nothing() {
    let dir = tempdir().unwrap();
    let id = write_session(dir.path(), "quiet", history(9));
    let service = service(dir.path(), CharEstimator::roomy());

    let result = service.compact(&id, &CompactRequest::default()).unwrap();

    assert!(!result.compacted);
    assert_eq!(result.reason, Some(CompactionSkipReason::NotNeeded));
    assert_eq!(service.store().load(&id).unwrap().messages, history(9));
}

#[test]
fn compaction_drops_dereferenced_tools_from_saved_memory() {
    let dir = tempdir().unwrap();
    let id = write_session(dir.path(), "tools", history(9));
    let store = FileSessionStore::new(dir.path());
    let mut snapshot = store.load(&id).unwrap();
    let mut memory = WorkingMemory::new();
    memory.add_discovered_tools((0..9).map(|n| format!("tool_{n}")));
    snapshot.working_memory = memory.to_state();
    store.save(&id, &snapshot).unwrap();
    let service = service(dir.path(), CharEstimator::roomy());

    let result = service.compact(&id, &force()).unwrap();

    assert_eq!(
        result.removed_tools,
        ["tool_0", "tool_1", "tool_2", "tool_3"]
    );
    let saved = store.load(&id).unwrap().working_memory;
    assert_eq!(
        saved.discovered_tools,
        ["tool_4", "tool_5", "tool_6", "tool_7", "tool_8"]
    );
}

#[test]
fn context_stats_serialize_with_camel_case_fields() {
    let dir = tempdir().unwrap();
    let id = write_session(dir.path(), "stats", history(2));
    let service = service(dir.path(), CharEstimator::roomy());

    let stats = service.context_stats(&id, Some(TEST_MODEL)).unwrap();
    let json = serde_json::to_value(&stats).unwrap();

    assert_eq!(json["messageCount"], 9);
    assert_eq!(json["contextLimit"], 1_000_000);
    assert_eq!(json["outputReserve"], 1_000);
    assert_eq!(json["isOverLimit"], false);
    assert!(json["usagePercent"].as_f64().unwrap() < 1.0);
}

#[test]
fn estimator_and_store_failures_stay_distinct() {
    let dir = tempdir().unwrap();
    let id = write_session(dir.path(), "known", history(1));
    let service = service(dir.path(), CharEstimator::roomy());

    let unknown_model = service
        .compact(
            &id,
            &CompactRequest {
                model_id: Some("unregistered".into()),
                force: true,
            },
        )
        .unwrap_err();
    assert!(matches!(
        unknown_model,
        ContextError::Estimation(EstimateError::UnknownModel(_))
    ));

    let missing = service
        .compact(&SessionId::new("missing"), &force())
        .unwrap_err();
    assert!(matches!(
        missing,
        ContextError::Persistence(PersistenceError::NotFound(_))
    ));
}

#[test]
fn sessions_compact_independently_in_parallel() {
    let dir = tempdir().unwrap();
    let ids: Vec<SessionId> = (0..4)
        .map(|n| write_session(dir.path(), &format!("s{n}"), history(9)))
        .collect();
    let service = service(dir.path(), CharEstimator::roomy());

    std::thread::scope(|scope| {
        for id in &ids {
            let service = &service;
            scope.spawn(move || {
                let result = service.compact(id, &force()).unwrap();
                assert!(result.compacted);
            });
        }
    });

    for id in &ids {
        assert_eq!(service.store().load(id).unwrap().messages.len(), 21);
    }
}

#[test]
fn single_oversized_turn_cannot_be_compacted() {
    let dir = tempdir().unwrap();
    let huge = "x".repeat(4_000);
    let messages = vec![
        keel_types::Message::user(huge.as_str()),
        keel_types::Message::assistant(huge.as_str()),
    ];
    let id = write_session(dir.path(), "huge", messages.clone());
    let service = service(
        dir.path(),
        CharEstimator {
            limits: ModelLimits::new(1_000, 200),
        },
    );

    let result = service.compact(&id, &CompactRequest::default()).unwrap();

    assert!(!result.compacted);
    assert_eq!(result.reason, Some(CompactionSkipReason::NoCompactionPossible));
    assert_eq!(service.store().load(&id).unwrap().messages, messages);
}
