//! Optimistic mutation coordinator for the presentation layer.
//!
//! A mutation is applied to the local view immediately and then sent to the
//! backend. On success the view is replaced by a fresh authoritative
//! snapshot; on failure the whole view is replaced by the snapshot taken
//! before the mutation and a user-visible error is recorded.
//!
//! Item reference indicators in the view are always rederived from the view's
//! own priorities and time blocks. Flags carried on item payloads are never
//! trusted as-is.

use chrono::{Duration, NaiveDate, NaiveTime};
use log::{debug, info, warn};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::assembly::{FullPlanner, assemble};
use crate::config::MINUTES_PER_DAY;
use crate::error::PlannerError;
use crate::identity::RequestContext;
use crate::models::{
    ColorTag, Content, Item, ItemId, ItemPatch, Planner, PlannerId, Priority, PriorityId,
    PriorityPatch, SequenceUpdate, Slot, SlotMove, TimeBlock, TimeBlockDraft, TimeBlockId,
    TimeBlockPatch,
};
use crate::reconcile::derive_flags;
use crate::service::PlannerService;
use crate::utils::parse_time;

/// Server operations the coordinator needs. One backend serves one planner day.
pub trait PlannerBackend {
    fn fetch(&self) -> Result<FullPlanner, PlannerError>;
    fn reorder_items(&self, updates: &[SequenceUpdate]) -> Result<(), PlannerError>;
    fn assign_priority(
        &self,
        planner_id: PlannerId,
        slot: Slot,
        item_id: ItemId,
    ) -> Result<Priority, PlannerError>;
    fn reorder_priority_slots(
        &self,
        planner_id: PlannerId,
        moves: &[SlotMove],
    ) -> Result<(), PlannerError>;
    fn create_time_block(
        &self,
        planner_id: PlannerId,
        draft: &TimeBlockDraft,
    ) -> Result<TimeBlock, PlannerError>;
    fn set_item_completed(&self, id: ItemId, completed: bool) -> Result<Item, PlannerError>;
    fn set_priority_completed(&self, id: PriorityId, completed: bool)
    -> Result<Priority, PlannerError>;
    fn set_time_block_completed(
        &self,
        id: TimeBlockId,
        completed: bool,
    ) -> Result<TimeBlock, PlannerError>;
}

/// Backend that calls the in-process service for one user and date.
pub struct ServiceBackend<'a> {
    service: &'a PlannerService,
    ctx: RequestContext,
    date: NaiveDate,
}

impl<'a> ServiceBackend<'a> {
    pub fn new(service: &'a PlannerService, ctx: RequestContext, date: NaiveDate) -> Self {
        Self { service, ctx, date }
    }
}

impl PlannerBackend for ServiceBackend<'_> {
    fn fetch(&self) -> Result<FullPlanner, PlannerError> {
        self.service.get_full_planner(&self.ctx, self.date)
    }

    fn reorder_items(&self, updates: &[SequenceUpdate]) -> Result<(), PlannerError> {
        self.service.reorder_items(&self.ctx, updates)
    }

    fn assign_priority(
        &self,
        planner_id: PlannerId,
        slot: Slot,
        item_id: ItemId,
    ) -> Result<Priority, PlannerError> {
        self.service.assign_priority(&self.ctx, planner_id, slot, item_id)
    }

    fn reorder_priority_slots(
        &self,
        planner_id: PlannerId,
        moves: &[SlotMove],
    ) -> Result<(), PlannerError> {
        self.service.reorder_priority_slots(&self.ctx, planner_id, moves)
    }

    fn create_time_block(
        &self,
        planner_id: PlannerId,
        draft: &TimeBlockDraft,
    ) -> Result<TimeBlock, PlannerError> {
        self.service.create_time_block(&self.ctx, planner_id, draft)
    }

    fn set_item_completed(&self, id: ItemId, completed: bool) -> Result<Item, PlannerError> {
        let patch = ItemPatch {
            completed: Some(completed),
            ..ItemPatch::default()
        };
        self.service.update_item(&self.ctx, id, &patch)
    }

    fn set_priority_completed(
        &self,
        id: PriorityId,
        completed: bool,
    ) -> Result<Priority, PlannerError> {
        let patch = PriorityPatch {
            completed: Some(completed),
            ..PriorityPatch::default()
        };
        self.service.update_priority(&self.ctx, id, &patch)
    }

    fn set_time_block_completed(
        &self,
        id: TimeBlockId,
        completed: bool,
    ) -> Result<TimeBlock, PlannerError> {
        let patch = TimeBlockPatch {
            completed: Some(completed),
            ..TimeBlockPatch::default()
        };
        self.service.update_time_block(&self.ctx, id, &patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized drag endpoint `{0}`")]
pub struct ParseDragError(String);

/// What is being dragged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragSource {
    Item(ItemId),
    Priority(PriorityId),
}

/// Where it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    Item(ItemId),
    Slot(Slot),
    TimeSlot(NaiveTime),
}

fn split_endpoint(s: &str) -> Result<(&str, &str), ParseDragError> {
    s.split_once(':')
        .map(|(kind, value)| (kind.trim(), value.trim()))
        .ok_or_else(|| ParseDragError(s.to_string()))
}

impl FromStr for DragSource {
    type Err = ParseDragError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = split_endpoint(s)?;
        let id = value.parse().map_err(|_| ParseDragError(s.to_string()))?;
        match kind {
            "item" => Ok(DragSource::Item(id)),
            "priority" => Ok(DragSource::Priority(id)),
            _ => Err(ParseDragError(s.to_string())),
        }
    }
}

impl FromStr for DropTarget {
    type Err = ParseDragError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = split_endpoint(s)?;
        let invalid = || ParseDragError(s.to_string());
        match kind {
            "item" => value.parse().map(DropTarget::Item).map_err(|_| invalid()),
            "slot" => value
                .parse::<i64>()
                .ok()
                .and_then(|n| Slot::new(n).ok())
                .map(DropTarget::Slot)
                .ok_or_else(invalid),
            "time" => parse_time(value).map(DropTarget::TimeSlot).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

/// A drag intent after classification by (source kind, target kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragAction {
    /// Move the item to the position currently held by `onto`.
    ItemReorder { item_id: ItemId, onto: ItemId },
    ItemToPriority { item_id: ItemId, slot: Slot },
    PriorityReorder { priority_id: PriorityId, slot: Slot },
    ItemToTimeslot { item_id: ItemId, start: NaiveTime },
}

impl DragAction {
    /// `None` for pairs that mean nothing, such as a priority dropped on an item.
    pub fn classify(source: DragSource, target: DropTarget) -> Option<Self> {
        match (source, target) {
            (DragSource::Item(item_id), DropTarget::Item(onto)) if item_id != onto => {
                Some(DragAction::ItemReorder { item_id, onto })
            }
            (DragSource::Item(item_id), DropTarget::Slot(slot)) => {
                Some(DragAction::ItemToPriority { item_id, slot })
            }
            (DragSource::Priority(priority_id), DropTarget::Slot(slot)) => {
                Some(DragAction::PriorityReorder { priority_id, slot })
            }
            (DragSource::Item(item_id), DropTarget::TimeSlot(start)) => {
                Some(DragAction::ItemToTimeslot { item_id, start })
            }
            _ => None,
        }
    }

    fn label(self) -> &'static str {
        match self {
            DragAction::ItemReorder { .. } => "item reorder",
            DragAction::ItemToPriority { .. } => "item to priority",
            DragAction::PriorityReorder { .. } => "priority reorder",
            DragAction::ItemToTimeslot { .. } => "item to timeslot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    AppliedLocally,
    Confirmed,
    Rejected { message: String },
    Reverted { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationEvent {
    Apply,
    Confirm,
    Reject(String),
    Revert,
}

impl MutationState {
    /// The state after `event`, or `None` if the event is not valid here.
    pub fn next(&self, event: &MutationEvent) -> Option<MutationState> {
        match (self, event) {
            (MutationState::Idle, MutationEvent::Apply) => Some(MutationState::AppliedLocally),
            (MutationState::AppliedLocally, MutationEvent::Confirm) => Some(MutationState::Confirmed),
            (MutationState::AppliedLocally, MutationEvent::Reject(message)) => {
                Some(MutationState::Rejected {
                    message: message.clone(),
                })
            }
            (MutationState::Rejected { message }, MutationEvent::Revert) => {
                Some(MutationState::Reverted {
                    message: message.clone(),
                })
            }
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MutationState::Confirmed | MutationState::Reverted { .. })
    }
}

impl fmt::Display for MutationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationState::Idle => "idle",
            MutationState::AppliedLocally => "applied_locally",
            MutationState::Confirmed => "confirmed",
            MutationState::Rejected { .. } => "rejected",
            MutationState::Reverted { .. } => "reverted",
        })
    }
}

/// One in-flight mutation and the view it can revert to.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    label: &'static str,
    snapshot: FullPlanner,
    state: MutationState,
}

impl PendingMutation {
    pub fn new(label: &'static str, snapshot: FullPlanner) -> Self {
        Self {
            label,
            snapshot,
            state: MutationState::Idle,
        }
    }

    pub fn state(&self) -> &MutationState {
        &self.state
    }

    /// Applies `event`. Invalid events leave the state unchanged and return false.
    pub fn handle(&mut self, event: MutationEvent) -> bool {
        match self.state.next(&event) {
            Some(next) => {
                self.state = next;
                true
            }
            None => {
                warn!(
                    "event=mutation_transition module=optimistic status=ignored label={} state={} event={:?}",
                    self.label, self.state, event
                );
                false
            }
        }
    }

    pub fn snapshot(&self) -> &FullPlanner {
        &self.snapshot
    }
}

/// Result of one dispatched intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Nothing to do; the view and the backend were not touched.
    Ignored,
    Confirmed,
    Reverted { message: String },
}

/// Backend write that realizes a local change.
#[derive(Debug, Clone)]
enum RemoteWrite {
    ReorderItems(Vec<SequenceUpdate>),
    AssignPriority { slot: Slot, item_id: ItemId },
    ReorderSlots(Vec<SlotMove>),
    CreateTimeBlock(TimeBlockDraft),
    ItemCompleted { id: ItemId, completed: bool },
    PriorityCompleted { id: PriorityId, completed: bool },
    TimeBlockCompleted { id: TimeBlockId, completed: bool },
}

impl RemoteWrite {
    fn send(&self, backend: &dyn PlannerBackend, planner_id: PlannerId) -> Result<(), PlannerError> {
        match self {
            RemoteWrite::ReorderItems(updates) => backend.reorder_items(updates),
            RemoteWrite::AssignPriority { slot, item_id } => {
                backend.assign_priority(planner_id, *slot, *item_id).map(drop)
            }
            RemoteWrite::ReorderSlots(moves) => backend.reorder_priority_slots(planner_id, moves),
            RemoteWrite::CreateTimeBlock(draft) => {
                backend.create_time_block(planner_id, draft).map(drop)
            }
            RemoteWrite::ItemCompleted { id, completed } => {
                backend.set_item_completed(*id, *completed).map(drop)
            }
            RemoteWrite::PriorityCompleted { id, completed } => {
                backend.set_priority_completed(*id, *completed).map(drop)
            }
            RemoteWrite::TimeBlockCompleted { id, completed } => {
                backend.set_time_block_completed(*id, *completed).map(drop)
            }
        }
    }
}

/// Raw parts of a view, ready to be edited and rebuilt.
struct Draft {
    planner: Planner,
    items: Vec<Item>,
    priorities: Vec<Priority>,
    blocks: Vec<TimeBlock>,
}

impl Draft {
    fn from_view(view: &FullPlanner) -> Self {
        Self {
            planner: view.planner.clone(),
            items: view.items.clone(),
            priorities: view.priorities.iter().map(|p| p.priority.clone()).collect(),
            blocks: view.time_blocks.iter().map(|b| b.block.clone()).collect(),
        }
    }

    /// Reassembles the view with item flags derived from its own references.
    fn build(mut self) -> FullPlanner {
        for item in &mut self.items {
            let flags = derive_flags(item.id, &self.priorities, &self.blocks);
            item.referenced_by_priority = flags.by_priority;
            item.referenced_by_schedule = flags.by_schedule;
        }
        assemble(self.planner, self.items, self.priorities, self.blocks)
    }
}

pub struct Coordinator {
    confirmed: FullPlanner,
    view: FullPlanner,
    block_minutes: i64,
    block_color: ColorTag,
    next_temp_id: i64,
    last_state: Option<MutationState>,
    last_error: Option<String>,
}

impl Coordinator {
    pub fn new(initial: FullPlanner, block_minutes: i64, block_color: ColorTag) -> Self {
        let view = Draft::from_view(&initial).build();
        Self {
            confirmed: view.clone(),
            view,
            block_minutes: block_minutes.clamp(1, MINUTES_PER_DAY),
            block_color,
            next_temp_id: -1,
            last_state: None,
            last_error: None,
        }
    }

    pub fn load(
        backend: &dyn PlannerBackend,
        block_minutes: i64,
        block_color: ColorTag,
    ) -> Result<Self, PlannerError> {
        Ok(Self::new(backend.fetch()?, block_minutes, block_color))
    }

    /// What the user currently sees, including unconfirmed changes.
    pub fn view(&self) -> &FullPlanner {
        &self.view
    }

    /// Last authoritative snapshot.
    pub fn confirmed(&self) -> &FullPlanner {
        &self.confirmed
    }

    pub fn last_state(&self) -> Option<&MutationState> {
        self.last_state.as_ref()
    }

    /// Takes the pending user-visible failure message, if any.
    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    /// Replaces local state with a new authoritative snapshot.
    pub fn refresh(&mut self, fresh: FullPlanner) {
        let view = Draft::from_view(&fresh).build();
        self.confirmed = view.clone();
        self.view = view;
    }

    pub fn dispatch_drag(
        &mut self,
        backend: &dyn PlannerBackend,
        source: DragSource,
        target: DropTarget,
    ) -> MutationOutcome {
        let Some(action) = DragAction::classify(source, target) else {
            debug!(
                "event=drag_dispatch module=optimistic status=ignored source={:?} target={:?}",
                source, target
            );
            return MutationOutcome::Ignored;
        };
        self.dispatch(backend, action)
    }

    pub fn dispatch(&mut self, backend: &dyn PlannerBackend, action: DragAction) -> MutationOutcome {
        let planned = match action {
            DragAction::ItemReorder { item_id, onto } => self.plan_item_reorder(item_id, onto),
            DragAction::ItemToPriority { item_id, slot } => self.plan_item_to_priority(item_id, slot),
            DragAction::PriorityReorder { priority_id, slot } => {
                self.plan_priority_reorder(priority_id, slot)
            }
            DragAction::ItemToTimeslot { item_id, start } => self.plan_item_to_timeslot(item_id, start),
        };
        self.run(backend, action.label(), planned)
    }

    pub fn toggle_item(&mut self, backend: &dyn PlannerBackend, id: ItemId) -> MutationOutcome {
        let mut draft = Draft::from_view(&self.view);
        let planned = draft.items.iter_mut().find(|item| item.id == id).map(|item| {
            item.completed = !item.completed;
            RemoteWrite::ItemCompleted {
                id,
                completed: item.completed,
            }
        });
        self.run(backend, "item toggle", planned.map(|write| (draft.build(), write)))
    }

    pub fn toggle_priority(&mut self, backend: &dyn PlannerBackend, id: PriorityId) -> MutationOutcome {
        let mut draft = Draft::from_view(&self.view);
        let planned = draft.priorities.iter_mut().find(|p| p.id == id).map(|priority| {
            priority.completed = !priority.completed;
            RemoteWrite::PriorityCompleted {
                id,
                completed: priority.completed,
            }
        });
        self.run(backend, "priority toggle", planned.map(|write| (draft.build(), write)))
    }

    pub fn toggle_time_block(
        &mut self,
        backend: &dyn PlannerBackend,
        id: TimeBlockId,
    ) -> MutationOutcome {
        let mut draft = Draft::from_view(&self.view);
        let planned = draft.blocks.iter_mut().find(|b| b.id == id).map(|block| {
            block.completed = !block.completed;
            RemoteWrite::TimeBlockCompleted {
                id,
                completed: block.completed,
            }
        });
        self.run(backend, "time block toggle", planned.map(|write| (draft.build(), write)))
    }

    fn run(
        &mut self,
        backend: &dyn PlannerBackend,
        label: &'static str,
        planned: Option<(FullPlanner, RemoteWrite)>,
    ) -> MutationOutcome {
        let Some((local, write)) = planned else {
            debug!(
                "event=mutation module=optimistic status=ignored label={}",
                label
            );
            return MutationOutcome::Ignored;
        };

        let mut mutation = PendingMutation::new(label, self.confirmed.clone());
        self.view = local;
        mutation.handle(MutationEvent::Apply);

        match write.send(backend, self.confirmed.planner.id) {
            Ok(()) => {
                mutation.handle(MutationEvent::Confirm);
                match backend.fetch() {
                    Ok(fresh) => self.refresh(fresh),
                    Err(err) => {
                        // The server took the write, so the local result is the
                        // best known server state until the next refresh.
                        warn!(
                            "event=mutation_refetch module=optimistic status=error label={} error={}",
                            label, err
                        );
                        self.confirmed = self.view.clone();
                    }
                }
                info!(
                    "event=mutation module=optimistic status=confirmed label={}",
                    label
                );
                self.last_state = Some(mutation.state().clone());
                MutationOutcome::Confirmed
            }
            Err(err) => {
                let message = format!("{label} failed: {err}");
                mutation.handle(MutationEvent::Reject(message.clone()));
                self.view = mutation.snapshot().clone();
                mutation.handle(MutationEvent::Revert);
                warn!(
                    "event=mutation module=optimistic status=reverted label={} error={}",
                    label, err
                );
                self.last_state = Some(mutation.state().clone());
                self.last_error = Some(message.clone());
                MutationOutcome::Reverted { message }
            }
        }
    }

    fn temp_id(&mut self) -> i64 {
        let id = self.next_temp_id;
        self.next_temp_id -= 1;
        id
    }

    fn plan_item_reorder(&self, item_id: ItemId, onto: ItemId) -> Option<(FullPlanner, RemoteWrite)> {
        let mut draft = Draft::from_view(&self.view);
        let from = draft.items.iter().position(|item| item.id == item_id)?;
        let to = draft.items.iter().position(|item| item.id == onto)?;
        let moved = draft.items.remove(from);
        draft.items.insert(to, moved);

        // Renumber by position; only items whose sequence changes are written.
        let updates: Vec<SequenceUpdate> = draft
            .items
            .iter_mut()
            .zip(0_i64..)
            .filter(|(item, index)| item.sequence != *index)
            .map(|(item, index)| {
                item.sequence = index;
                SequenceUpdate {
                    id: item.id,
                    sequence: index,
                }
            })
            .collect();
        if updates.is_empty() {
            return None;
        }
        Some((draft.build(), RemoteWrite::ReorderItems(updates)))
    }

    /// Mirrors the server's swap: the item ends up in `slot` only, and a
    /// displaced occupant takes the item's old slot.
    fn plan_item_to_priority(
        &mut self,
        item_id: ItemId,
        slot: Slot,
    ) -> Option<(FullPlanner, RemoteWrite)> {
        let mut draft = Draft::from_view(&self.view);
        draft.items.iter().find(|item| item.id == item_id)?;

        let source = draft.priorities.iter().position(|p| p.content.references(item_id));
        let target = draft.priorities.iter().position(|p| p.slot == slot);
        match (source, target) {
            (Some(src), Some(tgt)) if src == tgt => return None,
            (Some(src), Some(tgt)) => {
                let displaced = draft.priorities[tgt].content.clone();
                let displaced_completed = draft.priorities[tgt].completed;
                draft.priorities[tgt].content = Content::Item(item_id);
                draft.priorities[tgt].completed = draft.priorities[src].completed;
                draft.priorities[src].content = displaced;
                draft.priorities[src].completed = displaced_completed;
            }
            (Some(src), None) => draft.priorities[src].slot = slot,
            (None, Some(tgt)) => {
                draft.priorities[tgt].content = Content::Item(item_id);
                draft.priorities[tgt].completed = false;
            }
            (None, None) => {
                let planner_id = draft.planner.id;
                draft.priorities.push(Priority {
                    id: self.temp_id(),
                    planner_id,
                    slot,
                    content: Content::Item(item_id),
                    completed: false,
                    created_at: String::new(),
                    updated_at: String::new(),
                });
            }
        }
        Some((draft.build(), RemoteWrite::AssignPriority { slot, item_id }))
    }

    fn plan_priority_reorder(
        &self,
        priority_id: PriorityId,
        slot: Slot,
    ) -> Option<(FullPlanner, RemoteWrite)> {
        let mut draft = Draft::from_view(&self.view);
        let moving = draft.priorities.iter().position(|p| p.id == priority_id)?;
        let old_slot = draft.priorities[moving].slot;
        if old_slot == slot {
            return None;
        }

        let mut moves = vec![SlotMove {
            id: priority_id,
            slot,
        }];
        if let Some(occupant) = draft.priorities.iter().position(|p| p.slot == slot) {
            draft.priorities[occupant].slot = old_slot;
            moves.push(SlotMove {
                id: draft.priorities[occupant].id,
                slot: old_slot,
            });
        }
        draft.priorities[moving].slot = slot;
        Some((draft.build(), RemoteWrite::ReorderSlots(moves)))
    }

    fn plan_item_to_timeslot(
        &mut self,
        item_id: ItemId,
        start: NaiveTime,
    ) -> Option<(FullPlanner, RemoteWrite)> {
        let mut draft = Draft::from_view(&self.view);
        draft.items.iter().find(|item| item.id == item_id)?;
        let Some(end) = block_end(start, self.block_minutes) else {
            debug!(
                "event=mutation module=optimistic status=no_room start={}",
                start
            );
            return None;
        };

        let request = TimeBlockDraft {
            start,
            end,
            content: Content::Item(item_id),
            color: self.block_color,
            notes: None,
        };
        let planner_id = draft.planner.id;
        draft.blocks.push(TimeBlock {
            id: self.temp_id(),
            planner_id,
            start: request.start,
            end: request.end,
            content: request.content.clone(),
            color: request.color,
            notes: None,
            completed: false,
            created_at: String::new(),
            updated_at: String::new(),
        });
        Some((draft.build(), RemoteWrite::CreateTimeBlock(request)))
    }
}

/// End of a dropped block, clamped to the last minute of the day.
///
/// `None` when the clamped end would not come after `start`.
fn block_end(start: NaiveTime, minutes: i64) -> Option<NaiveTime> {
    let last_minute = NaiveTime::from_hms_opt(23, 59, 0)?;
    let minutes = minutes.clamp(1, MINUTES_PER_DAY);
    let (end, wrapped) = start.overflowing_add_signed(Duration::minutes(minutes));
    let end = if wrapped != 0 { last_minute } else { end };
    (end > start).then_some(end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::{Cell, RefCell};

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    fn item(id: ItemId, sequence: i64) -> Item {
        Item {
            id,
            planner_id: 1,
            text: format!("item {id}"),
            completed: false,
            referenced_by_priority: false,
            referenced_by_schedule: false,
            sequence,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn priority(id: PriorityId, slot: i64, content: Content) -> Priority {
        Priority {
            id,
            planner_id: 1,
            slot: Slot::new(slot).unwrap(),
            content,
            completed: false,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn snapshot(priorities: Vec<Priority>) -> FullPlanner {
        let planner = Planner {
            id: 1,
            user_id: "u1".into(),
            date: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            created_at: String::new(),
        };
        assemble(planner, vec![item(10, 0), item(11, 1), item(12, 2)], priorities, vec![])
    }

    /// Records writes; rejects all of them when `fail` is set.
    struct FakeBackend {
        fail: Cell<bool>,
        fetch_fails: Cell<bool>,
        fresh: FullPlanner,
        writes: RefCell<Vec<String>>,
    }

    impl FakeBackend {
        fn new(fresh: FullPlanner, fail: bool) -> Self {
            Self {
                fail: Cell::new(fail),
                fetch_fails: Cell::new(false),
                fresh,
                writes: RefCell::new(Vec::new()),
            }
        }

        fn record(&self, write: String) -> Result<(), PlannerError> {
            self.writes.borrow_mut().push(write);
            if self.fail.get() {
                Err(PlannerError::ConstraintViolation("rejected".into()))
            } else {
                Ok(())
            }
        }
    }

    impl PlannerBackend for FakeBackend {
        fn fetch(&self) -> Result<FullPlanner, PlannerError> {
            if self.fetch_fails.get() {
                return Err(PlannerError::ConstraintViolation("offline".into()));
            }
            Ok(self.fresh.clone())
        }

        fn reorder_items(&self, updates: &[SequenceUpdate]) -> Result<(), PlannerError> {
            self.record(format!("reorder {updates:?}"))
        }

        fn assign_priority(&self, _: PlannerId, slot: Slot, item_id: ItemId) -> Result<Priority, PlannerError> {
            self.record(format!("assign {item_id} to {slot}"))?;
            Ok(priority(1, slot.get(), Content::Item(item_id)))
        }

        fn reorder_priority_slots(&self, _: PlannerId, moves: &[SlotMove]) -> Result<(), PlannerError> {
            self.record(format!("slots {}", moves.len()))
        }

        fn create_time_block(&self, _: PlannerId, draft: &TimeBlockDraft) -> Result<TimeBlock, PlannerError> {
            self.record(format!("block {}-{}", draft.start, draft.end))?;
            Err(PlannerError::ConstraintViolation("not used".into()))
        }

        fn set_item_completed(&self, id: ItemId, completed: bool) -> Result<Item, PlannerError> {
            self.record(format!("item {id} completed={completed}"))?;
            Ok(item(id, 0))
        }

        fn set_priority_completed(&self, id: PriorityId, _: bool) -> Result<Priority, PlannerError> {
            self.record(format!("priority {id}"))?;
            Ok(priority(id, 1, Content::Missing))
        }

        fn set_time_block_completed(&self, id: TimeBlockId, _: bool) -> Result<TimeBlock, PlannerError> {
            self.record(format!("time block {id}"))?;
            Err(PlannerError::not_found(crate::error::EntityKind::TimeBlock, id))
        }
    }

    #[test]
    fn unrecognized_pairs_are_ignored() {
        assert_eq!(
            DragAction::classify(DragSource::Priority(1), DropTarget::Item(10)),
            None
        );
        assert_eq!(DragAction::classify(DragSource::Item(10), DropTarget::Item(10)), None);
        assert_eq!(
            DragAction::classify(DragSource::Item(10), DropTarget::Slot(Slot::FIRST)),
            Some(DragAction::ItemToPriority { item_id: 10, slot: Slot::FIRST })
        );
    }

    #[test]
    fn drag_endpoints_parse() {
        assert_eq!("item:4".parse::<DragSource>().unwrap(), DragSource::Item(4));
        assert_eq!("priority:2".parse::<DragSource>().unwrap(), DragSource::Priority(2));
        assert_eq!("slot:3".parse::<DropTarget>().unwrap(), DropTarget::Slot(Slot::new(3).unwrap()));
        assert_eq!("time:09:30".parse::<DropTarget>().unwrap(), DropTarget::TimeSlot(hm(9, 30)));
        assert!("slot:4".parse::<DropTarget>().is_err());
        assert!("block:1".parse::<DropTarget>().is_err());
    }

    #[test]
    fn state_machine_only_allows_documented_transitions() {
        let mut mutation = PendingMutation::new("test", snapshot(vec![]));
        assert!(!mutation.handle(MutationEvent::Confirm));
        assert!(mutation.handle(MutationEvent::Apply));
        assert!(mutation.handle(MutationEvent::Reject("boom".into())));
        assert!(!mutation.handle(MutationEvent::Confirm));
        assert!(mutation.handle(MutationEvent::Revert));
        assert_eq!(mutation.state(), &MutationState::Reverted { message: "boom".into() });
        assert!(mutation.state().is_terminal());
    }

    #[test]
    fn failed_assignment_reverts_whole_view() {
        let initial = snapshot(vec![priority(1, 1, Content::Item(10))]);
        let backend = FakeBackend::new(initial.clone(), true);
        let mut coordinator = Coordinator::new(initial, 60, ColorTag::Blue);
        let before = coordinator.view().clone();

        let outcome = coordinator.dispatch_drag(&backend, DragSource::Item(11), DropTarget::Slot(Slot::FIRST));

        assert!(matches!(outcome, MutationOutcome::Reverted { .. }));
        assert_eq!(coordinator.view(), &before);
        assert!(coordinator.take_error().is_some());
        assert_eq!(backend.writes.borrow().as_slice(), ["assign 11 to 1"]);
    }

    #[test]
    fn confirmed_assignment_adopts_server_snapshot() {
        let initial = snapshot(vec![]);
        let fresh = snapshot(vec![priority(7, 2, Content::Item(12))]);
        let backend = FakeBackend::new(fresh, false);
        let mut coordinator = Coordinator::new(initial, 60, ColorTag::Blue);

        let outcome = coordinator.dispatch_drag(&backend, DragSource::Item(12), DropTarget::Slot(Slot::new(2).unwrap()));

        assert_eq!(outcome, MutationOutcome::Confirmed);
        assert_eq!(coordinator.last_state(), Some(&MutationState::Confirmed));
        assert_eq!(coordinator.view().priorities[0].priority.id, 7);
        assert!(coordinator.view().item(12).unwrap().referenced_by_priority);
    }

    #[test]
    fn refresh_rederives_stale_item_flags() {
        let mut fresh = snapshot(vec![priority(1, 1, Content::Item(11))]);
        fresh.items[0].referenced_by_priority = true;
        let mut coordinator = Coordinator::new(snapshot(vec![]), 60, ColorTag::Blue);

        coordinator.refresh(fresh);

        assert!(!coordinator.view().item(10).unwrap().referenced_by_priority);
        assert!(coordinator.view().item(11).unwrap().referenced_by_priority);
    }

    #[test]
    fn item_reorder_renumbers_changed_positions() {
        let backend = FakeBackend::new(snapshot(vec![]), true);
        let mut coordinator = Coordinator::new(snapshot(vec![]), 60, ColorTag::Blue);

        coordinator.dispatch_drag(&backend, DragSource::Item(12), DropTarget::Item(10));

        let writes = backend.writes.borrow();
        assert_eq!(writes.len(), 1);
        assert!(writes[0].contains("id: 12, sequence: 0"));
        assert!(writes[0].contains("id: 10, sequence: 1"));
        assert!(writes[0].contains("id: 11, sequence: 2"));
    }

    #[test]
    fn revert_after_unfetched_confirm_keeps_the_accepted_write() {
        let backend = FakeBackend::new(snapshot(vec![]), false);
        backend.fetch_fails.set(true);
        let mut coordinator = Coordinator::new(snapshot(vec![]), 60, ColorTag::Blue);

        let outcome = coordinator.dispatch_drag(&backend, DragSource::Item(11), DropTarget::Slot(Slot::FIRST));
        assert_eq!(outcome, MutationOutcome::Confirmed);
        assert_eq!(coordinator.confirmed(), coordinator.view());

        backend.fail.set(true);
        let outcome = coordinator.toggle_item(&backend, 10);

        assert!(matches!(outcome, MutationOutcome::Reverted { .. }));
        assert!(coordinator.view().is_prioritized(11));
        assert!(!coordinator.view().item(10).unwrap().completed);
        assert_eq!(coordinator.confirmed(), coordinator.view());
    }

    #[test]
    fn dropped_block_end_is_clamped_to_the_day() {
        assert_eq!(block_end(hm(9, 0), 60), Some(hm(10, 0)));
        assert_eq!(block_end(hm(23, 30), 60), Some(hm(23, 59)));
        assert_eq!(block_end(hm(23, 59), 60), None);
        assert_eq!(block_end(hm(9, 0), i64::MAX), Some(hm(23, 59)));
    }

    #[test]
    fn drop_on_the_last_minute_is_ignored() {
        let backend = FakeBackend::new(snapshot(vec![]), false);
        let mut coordinator = Coordinator::new(snapshot(vec![]), 60, ColorTag::Blue);

        let outcome = coordinator.dispatch_drag(&backend, DragSource::Item(10), DropTarget::TimeSlot(hm(23, 59)));

        assert_eq!(outcome, MutationOutcome::Ignored);
        assert!(backend.writes.borrow().is_empty());
        assert!(coordinator.view().time_blocks.is_empty());
    }
}
