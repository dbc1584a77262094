mod common;

use common::*;
use dayplan::error::EntityKind;
use dayplan::models::{ItemPatch, SequenceUpdate, Slot};
use dayplan::{Database, PlannerError, PlannerService, RequestContext};
use pretty_assertions::assert_eq;
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn concurrent_first_visits_share_one_planner() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.db");
    let path = path.to_str().unwrap().to_string();
    // Create the schema up front so both connections race only on the planner row.
    Database::new(&path).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            let path = path.clone();
            thread::spawn(move || {
                let service = PlannerService::new(Database::new(&path).unwrap());
                let ctx = RequestContext::for_user("u1");
                barrier.wait();
                service.get_or_create_planner(&ctx, day("2025-06-01")).unwrap()
            })
        })
        .collect();
    let planners: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(planners[0], planners[1]);
    let db = Database::new(&path).unwrap();
    let count: i64 = db
        .conn()
        .query_row("SELECT COUNT(*) FROM planners", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn get_or_create_returns_the_same_planner() {
    let service = service();
    let ctx = user("u1");
    let first = service.get_or_create_planner(&ctx, day("2025-06-01")).unwrap();
    let again = service.get_or_create_planner(&ctx, day("2025-06-01")).unwrap();
    let other_day = service.get_or_create_planner(&ctx, day("2025-06-02")).unwrap();

    assert_eq!(first, again);
    assert_ne!(first.id, other_day.id);
}

#[test]
fn missing_identity_is_unauthenticated() {
    let service = service();
    let anonymous = RequestContext::anonymous();

    assert!(matches!(
        service.get_or_create_planner(&anonymous, day("2025-06-01")),
        Err(PlannerError::Unauthenticated)
    ));
    assert!(matches!(
        service.get_full_planner(&anonymous, day("2025-06-01")),
        Err(PlannerError::Unauthenticated)
    ));
    assert!(matches!(
        service.reorder_items(&anonymous, &[]),
        Err(PlannerError::Unauthenticated)
    ));
    assert!(matches!(
        service.delete_item(&anonymous, 1),
        Err(PlannerError::Unauthenticated)
    ));
}

#[test]
fn other_users_rows_are_not_found() {
    let service = service();
    let owner = user("owner");
    let intruder = user("intruder");
    let planner = planner(&service, &owner);
    let a = item(&service, &owner, planner.id, "private");

    assert!(matches!(
        service.create_item(&intruder, planner.id, "sneaky", None),
        Err(PlannerError::NotFound { kind: EntityKind::Planner, .. })
    ));
    assert!(matches!(
        service.update_item(&intruder, a.id, &ItemPatch::default()),
        Err(PlannerError::NotFound { kind: EntityKind::Item, .. })
    ));
    assert!(matches!(
        service.delete_item(&intruder, a.id),
        Err(PlannerError::NotFound { .. })
    ));
    assert!(matches!(
        service.assign_priority(&intruder, planner.id, Slot::FIRST, a.id),
        Err(PlannerError::NotFound { .. })
    ));

    // The intruder's own planner for the same date is a separate row.
    let theirs = service.get_full_planner(&intruder, day("2025-06-01")).unwrap();
    assert_ne!(theirs.planner.id, planner.id);
    assert!(theirs.items.is_empty());
}

#[test]
fn items_get_increasing_sequences() {
    let service = service();
    let ctx = user("u1");
    let planner = planner(&service, &ctx);

    let a = item(&service, &ctx, planner.id, "A");
    let explicit = service.create_item(&ctx, planner.id, "B", Some(10)).unwrap();
    let c = item(&service, &ctx, planner.id, "C");

    assert_eq!(a.sequence, 0);
    assert_eq!(explicit.sequence, 10);
    assert_eq!(c.sequence, 11);
    assert!(matches!(
        service.create_item(&ctx, planner.id, "dup", Some(10)),
        Err(PlannerError::ConstraintViolation(_))
    ));
    assert!(matches!(
        service.create_item(&ctx, planner.id, "   ", None),
        Err(PlannerError::ConstraintViolation(_))
    ));
}

#[test]
fn reorder_round_trip() {
    let service = service();
    let ctx = user("u1");
    let planner = planner(&service, &ctx);
    let a = item(&service, &ctx, planner.id, "A");
    let b = item(&service, &ctx, planner.id, "B");
    let c = item(&service, &ctx, planner.id, "C");

    service
        .reorder_items(
            &ctx,
            &[
                SequenceUpdate { id: a.id, sequence: 3 },
                SequenceUpdate { id: b.id, sequence: 1 },
                SequenceUpdate { id: c.id, sequence: 2 },
            ],
        )
        .unwrap();

    let full = service.get_full_planner(&ctx, day("2025-06-01")).unwrap();
    let order: Vec<_> = full.items.iter().map(|i| i.text.as_str()).collect();
    assert_eq!(order, vec!["B", "C", "A"]);
}

#[test]
fn partial_reorder_reports_failed_ids() {
    let service = service();
    let ctx = user("u1");
    let planner = planner(&service, &ctx);
    let a = item(&service, &ctx, planner.id, "A");
    let b = item(&service, &ctx, planner.id, "B");
    let foreign = {
        let other = user("u2");
        let theirs = service.get_or_create_planner(&other, day("2025-06-01")).unwrap();
        item(&service, &other, theirs.id, "theirs")
    };

    let err = service
        .reorder_items(
            &ctx,
            &[
                SequenceUpdate { id: b.id, sequence: 0 },
                SequenceUpdate { id: 9_999, sequence: 1 },
                SequenceUpdate { id: a.id, sequence: 2 },
                SequenceUpdate { id: foreign.id, sequence: 3 },
            ],
        )
        .unwrap_err();

    assert!(matches!(err, PlannerError::AggregateFailure { attempted: 4, .. }));
    assert_eq!(err.failed_ids(), vec![9_999, foreign.id]);
    // The writes that could apply did.
    assert_eq!(fetch_item(&service, &ctx, b.id).sequence, 0);
    assert_eq!(fetch_item(&service, &ctx, a.id).sequence, 2);
}

#[test]
fn reorder_with_duplicate_sequences_writes_nothing() {
    let service = service();
    let ctx = user("u1");
    let planner = planner(&service, &ctx);
    let a = item(&service, &ctx, planner.id, "A");
    let b = item(&service, &ctx, planner.id, "B");

    let err = service
        .reorder_items(
            &ctx,
            &[
                SequenceUpdate { id: a.id, sequence: 5 },
                SequenceUpdate { id: b.id, sequence: 5 },
            ],
        )
        .unwrap_err();

    assert!(matches!(err, PlannerError::ConstraintViolation(_)));
    assert_eq!(fetch_item(&service, &ctx, a.id).sequence, 0);
}

#[test]
fn reorder_into_a_sequence_held_outside_the_batch_writes_nothing() {
    let service = service();
    let ctx = user("u1");
    let planner = planner(&service, &ctx);
    let a = item(&service, &ctx, planner.id, "A");
    let b = item(&service, &ctx, planner.id, "B");
    let c = item(&service, &ctx, planner.id, "C");

    // B keeps sequence 1, so moving A there would leave two items on it.
    let err = service
        .reorder_items(
            &ctx,
            &[
                SequenceUpdate { id: c.id, sequence: 0 },
                SequenceUpdate { id: a.id, sequence: 1 },
            ],
        )
        .unwrap_err();

    assert!(matches!(err, PlannerError::ConstraintViolation(_)));
    let sequences: Vec<_> = [a.id, b.id, c.id]
        .iter()
        .map(|id| fetch_item(&service, &ctx, *id).sequence)
        .collect();
    assert_eq!(sequences, vec![0, 1, 2]);
}

#[test]
fn reorder_across_planners_is_rejected() {
    let service = service();
    let ctx = user("u1");
    let first_day = planner(&service, &ctx);
    let next_day = service.get_or_create_planner(&ctx, day("2025-06-02")).unwrap();
    let a = item(&service, &ctx, first_day.id, "A");
    let x = item(&service, &ctx, next_day.id, "X");

    let err = service
        .reorder_items(
            &ctx,
            &[
                SequenceUpdate { id: a.id, sequence: 5 },
                SequenceUpdate { id: x.id, sequence: 6 },
            ],
        )
        .unwrap_err();

    assert!(matches!(err, PlannerError::ConstraintViolation(_)));
    assert_eq!(fetch_item(&service, &ctx, a.id).sequence, 0);
    assert_eq!(fetch_item(&service, &ctx, x.id).sequence, 0);
}

#[test]
fn snapshot_reads_hold_off_concurrent_writers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.db");
    let path = path.to_str().unwrap().to_string();
    let reader = PlannerService::new(Database::new(&path).unwrap());
    let writer = PlannerService::new(Database::new(&path).unwrap());
    writer
        .database()
        .conn()
        .busy_timeout(std::time::Duration::from_millis(50))
        .unwrap();
    let ctx = user("u1");
    let planner = planner(&reader, &ctx);
    item(&reader, &ctx, planner.id, "A");

    let seen = reader
        .database()
        .in_transaction(|db| -> Result<_, PlannerError> {
            let before = db.list_items("u1", planner.id)?.len();
            let blocked = writer.create_item(&ctx, planner.id, "B", None).is_err();
            let after = db.list_items("u1", planner.id)?.len();
            Ok((before, blocked, after))
        })
        .unwrap();

    assert_eq!(seen, (1, true, 1));
    writer.create_item(&ctx, planner.id, "B", None).unwrap();
    let full = reader.get_full_planner(&ctx, day("2025-06-01")).unwrap();
    assert_eq!(full.items.len(), 2);
}

#[test]
fn full_planner_is_ordered_and_resolved() {
    let service = service();
    let ctx = user("u1");
    let planner = planner(&service, &ctx);
    let a = item(&service, &ctx, planner.id, "A");
    let b = item(&service, &ctx, planner.id, "B");

    service.assign_priority(&ctx, planner.id, Slot::new(3).unwrap(), a.id).unwrap();
    service.set_priority_text(&ctx, planner.id, Slot::FIRST, "stretch").unwrap();
    service
        .create_time_block(&ctx, planner.id, &block_for(b.id, hm(14, 0), hm(15, 0)))
        .unwrap();
    service
        .create_time_block(&ctx, planner.id, &block_for(a.id, hm(8, 0), hm(8, 30)))
        .unwrap();

    let full = service.get_full_planner(&ctx, day("2025-06-01")).unwrap();
    let slots: Vec<_> = full.priorities.iter().map(|p| p.priority.slot.get()).collect();
    assert_eq!(slots, vec![1, 3]);
    assert!(full.priorities[0].item.is_none());
    assert_eq!(full.priorities[1].item.as_ref().map(|i| i.id), Some(a.id));

    let starts: Vec<_> = full.time_blocks.iter().map(|b| b.block.start).collect();
    assert_eq!(starts, vec![hm(8, 0), hm(14, 0)]);
    assert_eq!(full.time_blocks[1].item.as_ref().map(|i| i.text.as_str()), Some("B"));

    let json = serde_json::to_value(&full).unwrap();
    assert_eq!(json["priorities"][0]["priority"]["content"]["kind"], "custom");
}
