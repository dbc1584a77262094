mod common;

use common::*;
use dayplan::models::{
    ColorTag, Content, Item, ItemId, PlannerId, Priority, PriorityId, SequenceUpdate, Slot,
    SlotMove, TimeBlock, TimeBlockDraft, TimeBlockId,
};
use dayplan::optimistic::{
    Coordinator, DragSource, DropTarget, MutationOutcome, MutationState, PlannerBackend,
    ServiceBackend,
};
use dayplan::{FullPlanner, PlannerError};
use pretty_assertions::assert_eq;

/// Reads from the real service but refuses every write.
struct ReadOnlyBackend<'a> {
    inner: ServiceBackend<'a>,
}

fn refused() -> PlannerError {
    PlannerError::ConstraintViolation("store is read-only".into())
}

impl PlannerBackend for ReadOnlyBackend<'_> {
    fn fetch(&self) -> Result<FullPlanner, PlannerError> {
        self.inner.fetch()
    }
    fn reorder_items(&self, _: &[SequenceUpdate]) -> Result<(), PlannerError> {
        Err(refused())
    }
    fn assign_priority(&self, _: PlannerId, _: Slot, _: ItemId) -> Result<Priority, PlannerError> {
        Err(refused())
    }
    fn reorder_priority_slots(&self, _: PlannerId, _: &[SlotMove]) -> Result<(), PlannerError> {
        Err(refused())
    }
    fn create_time_block(&self, _: PlannerId, _: &TimeBlockDraft) -> Result<TimeBlock, PlannerError> {
        Err(refused())
    }
    fn set_item_completed(&self, _: ItemId, _: bool) -> Result<Item, PlannerError> {
        Err(refused())
    }
    fn set_priority_completed(&self, _: PriorityId, _: bool) -> Result<Priority, PlannerError> {
        Err(refused())
    }
    fn set_time_block_completed(&self, _: TimeBlockId, _: bool) -> Result<TimeBlock, PlannerError> {
        Err(refused())
    }
}

#[test]
fn drag_to_slot_is_confirmed_by_the_server() {
    let service = service();
    let ctx = user("u1");
    let planner = planner(&service, &ctx);
    let a = item(&service, &ctx, planner.id, "A");
    let backend = ServiceBackend::new(&service, ctx.clone(), day("2025-06-01"));
    let mut coordinator = Coordinator::load(&backend, 60, ColorTag::Blue).unwrap();

    let outcome = coordinator.dispatch_drag(&backend, DragSource::Item(a.id), DropTarget::Slot(Slot::FIRST));

    assert_eq!(outcome, MutationOutcome::Confirmed);
    assert_eq!(coordinator.last_state(), Some(&MutationState::Confirmed));
    let stored = service.database().list_priorities("u1", planner.id).unwrap();
    assert_eq!(stored[0].content, Content::Item(a.id));
    // The view now carries the server's row id, not a local placeholder.
    assert_eq!(coordinator.view().priorities[0].priority.id, stored[0].id);
    assert!(coordinator.view().is_prioritized(a.id));
}

#[test]
fn drop_on_time_slot_creates_a_default_block() {
    let service = service();
    let ctx = user("u1");
    let planner = planner(&service, &ctx);
    let a = item(&service, &ctx, planner.id, "A");
    let backend = ServiceBackend::new(&service, ctx.clone(), day("2025-06-01"));
    let mut coordinator = Coordinator::load(&backend, 45, ColorTag::Orange).unwrap();

    let outcome = coordinator.dispatch_drag(&backend, DragSource::Item(a.id), DropTarget::TimeSlot(hm(9, 0)));

    assert_eq!(outcome, MutationOutcome::Confirmed);
    let blocks = service.database().list_time_blocks("u1", planner.id).unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!((blocks[0].start, blocks[0].end), (hm(9, 0), hm(9, 45)));
    assert_eq!(blocks[0].color, ColorTag::Orange);
    assert!(fetch_item(&service, &ctx, a.id).referenced_by_schedule);
}

#[test]
fn drag_reorder_persists_new_order() {
    let service = service();
    let ctx = user("u1");
    let planner = planner(&service, &ctx);
    let a = item(&service, &ctx, planner.id, "A");
    item(&service, &ctx, planner.id, "B");
    let c = item(&service, &ctx, planner.id, "C");
    let backend = ServiceBackend::new(&service, ctx.clone(), day("2025-06-01"));
    let mut coordinator = Coordinator::load(&backend, 60, ColorTag::Blue).unwrap();

    coordinator.dispatch_drag(&backend, DragSource::Item(c.id), DropTarget::Item(a.id));

    let texts: Vec<_> = coordinator.view().items.iter().map(|i| i.text.clone()).collect();
    assert_eq!(texts, vec!["C", "A", "B"]);
    let stored: Vec<_> = service
        .database()
        .list_items("u1", planner.id)
        .unwrap()
        .into_iter()
        .map(|i| i.text)
        .collect();
    assert_eq!(stored, texts);
}

#[test]
fn rejected_drag_restores_the_last_confirmed_view() {
    let service = service();
    let ctx = user("u1");
    let planner = planner(&service, &ctx);
    let a = item(&service, &ctx, planner.id, "A");
    let b = item(&service, &ctx, planner.id, "B");
    service.assign_priority(&ctx, planner.id, Slot::FIRST, a.id).unwrap();

    let backend = ReadOnlyBackend {
        inner: ServiceBackend::new(&service, ctx.clone(), day("2025-06-01")),
    };
    let mut coordinator = Coordinator::load(&backend, 60, ColorTag::Blue).unwrap();
    let before = coordinator.view().clone();

    let outcome = coordinator.dispatch_drag(&backend, DragSource::Item(b.id), DropTarget::Slot(Slot::FIRST));

    assert!(matches!(outcome, MutationOutcome::Reverted { .. }));
    assert!(matches!(coordinator.last_state(), Some(MutationState::Reverted { .. })));
    assert_eq!(coordinator.view(), &before);
    assert!(coordinator.view().is_prioritized(a.id));
    assert!(!coordinator.view().is_prioritized(b.id));
    assert!(coordinator.take_error().unwrap().contains("read-only"));
    assert!(coordinator.take_error().is_none());
}

#[test]
fn server_rejection_rolls_back_toggle() {
    let service = service();
    let ctx = user("u1");
    let planner = planner(&service, &ctx);
    let a = item(&service, &ctx, planner.id, "A");
    let backend = ServiceBackend::new(&service, ctx.clone(), day("2025-06-01"));
    let mut coordinator = Coordinator::load(&backend, 60, ColorTag::Blue).unwrap();

    // Deleted behind the coordinator's back: the toggle applies locally, then fails.
    service.delete_item(&ctx, a.id).unwrap();
    let outcome = coordinator.toggle_item(&backend, a.id);

    assert!(matches!(outcome, MutationOutcome::Reverted { .. }));
    assert!(!coordinator.view().item(a.id).unwrap().completed);
}

#[test]
fn unrecognized_drop_is_a_no_op() {
    let service = service();
    let ctx = user("u1");
    let planner = planner(&service, &ctx);
    let a = item(&service, &ctx, planner.id, "A");
    let priority = service.assign_priority(&ctx, planner.id, Slot::FIRST, a.id).unwrap();
    let backend = ReadOnlyBackend {
        inner: ServiceBackend::new(&service, ctx.clone(), day("2025-06-01")),
    };
    let mut coordinator = Coordinator::load(&backend, 60, ColorTag::Blue).unwrap();

    let outcome = coordinator.dispatch_drag(&backend, DragSource::Priority(priority.id), DropTarget::Item(a.id));

    assert_eq!(outcome, MutationOutcome::Ignored);
    assert_eq!(coordinator.last_state(), None);
    assert!(coordinator.take_error().is_none());
}
