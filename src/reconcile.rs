//! Reference reconciliation between items and the slots/blocks pointing at them.
//!
//! # Invariants
//! - `Item::referenced_by_priority` is true iff a priority of the same planner
//!   references the item; `referenced_by_schedule` likewise for time blocks.
//! - The flags are a cache. [`derive_flags`] recomputes them from raw references
//!   and [`PlannerService::repair_planner`] rewrites any that drifted.
//! - An item occupies at most one priority slot per planner.
//!
//! Reference writes commit first and flags are refreshed afterwards. If the
//! refresh fails the caller gets `PlannerError::Reconciliation` and the repair
//! pass brings the flags back.

use log::{info, warn};
use std::collections::HashSet;

use crate::database::DatabaseError;
use crate::error::{EntityKind, FailedUpdate, PlannerError};
use crate::identity::RequestContext;
use crate::models::{
    Content, Item, ItemId, PlannerId, Priority, PriorityId, SequenceUpdate, Slot, SlotMove,
    TimeBlock, TimeBlockDraft, TimeBlockId, TimeBlockPatch, validate_time_range,
};
use crate::service::{PlannerService, validate_text};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferenceFlags {
    pub by_priority: bool,
    pub by_schedule: bool,
}

impl ReferenceFlags {
    pub fn cached(item: &Item) -> Self {
        Self {
            by_priority: item.referenced_by_priority,
            by_schedule: item.referenced_by_schedule,
        }
    }
}

/// Flags for `item_id` as implied by the given references of its planner.
pub fn derive_flags(item_id: ItemId, priorities: &[Priority], blocks: &[TimeBlock]) -> ReferenceFlags {
    ReferenceFlags {
        by_priority: priorities.iter().any(|p| p.content.references(item_id)),
        by_schedule: blocks.iter().any(|b| b.content.references(item_id)),
    }
}

/// Items whose cached flags disagree with the references, with the correct flags.
pub fn stale_flags(
    items: &[Item],
    priorities: &[Priority],
    blocks: &[TimeBlock],
) -> Vec<(ItemId, ReferenceFlags)> {
    items
        .iter()
        .filter_map(|item| {
            let derived = derive_flags(item.id, priorities, blocks);
            (derived != ReferenceFlags::cached(item)).then_some((item.id, derived))
        })
        .collect()
}

/// How an assignment changed the slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssignMode {
    /// The item already sat in the slot.
    Unchanged,
    /// The slot was empty or held something else, which was replaced.
    Replaced,
    /// The item left its old slot for an empty one.
    Moved,
    /// The item and the slot's previous content traded places.
    Swapped,
}

impl AssignMode {
    fn as_str(self) -> &'static str {
        match self {
            AssignMode::Unchanged => "unchanged",
            AssignMode::Replaced => "replaced",
            AssignMode::Moved => "moved",
            AssignMode::Swapped => "swapped",
        }
    }
}

impl PlannerService {
    /// Recomputes and stores the flags of one item from its planner's references.
    ///
    /// Returns `None` when the item no longer exists.
    pub(crate) fn refresh_flags(
        &self,
        user_id: &str,
        item_id: ItemId,
        step: &'static str,
    ) -> Result<Option<ReferenceFlags>, PlannerError> {
        self.store_derived_flags(user_id, item_id).map_err(|source| {
            warn!(
                "event=flags_refresh module=reconcile status=error item_id={} step={} error={}",
                item_id, step, source
            );
            PlannerError::Reconciliation {
                item_id,
                step,
                source,
            }
        })
    }

    fn store_derived_flags(
        &self,
        user_id: &str,
        item_id: ItemId,
    ) -> Result<Option<ReferenceFlags>, DatabaseError> {
        let Some(item) = self.db.get_item(user_id, item_id)? else {
            return Ok(None);
        };
        let priorities = self.db.list_priorities(user_id, item.planner_id)?;
        let blocks = self.db.list_time_blocks(user_id, item.planner_id)?;
        let flags = derive_flags(item_id, &priorities, &blocks);
        if flags != ReferenceFlags::cached(&item) {
            self.db.set_item_flags(user_id, item_id, flags)?;
        }
        Ok(Some(flags))
    }

    fn refresh_all(
        &self,
        user_id: &str,
        item_ids: impl IntoIterator<Item = ItemId>,
        step: &'static str,
    ) -> Result<(), PlannerError> {
        let mut seen = HashSet::new();
        for item_id in item_ids {
            if seen.insert(item_id) {
                self.refresh_flags(user_id, item_id, step)?;
            }
        }
        Ok(())
    }

    /// Item that must live in `planner_id` to be referenced from it.
    fn item_in_planner(
        &self,
        user_id: &str,
        item_id: ItemId,
        planner_id: PlannerId,
    ) -> Result<Item, PlannerError> {
        let item = self.owned_item(user_id, item_id)?;
        if item.planner_id != planner_id {
            return Err(PlannerError::ConstraintViolation(format!(
                "item {item_id} belongs to planner {}, not {planner_id}",
                item.planner_id
            )));
        }
        Ok(item)
    }

    /// Puts `item_id` into `slot`.
    ///
    /// An occupied slot is overwritten. If the item already holds another slot
    /// it moves, and whatever occupied `slot` takes its old place, so the item
    /// never ends up in two slots. Assigning an item to the slot it already
    /// holds changes nothing.
    pub fn assign_priority(
        &self,
        ctx: &RequestContext,
        planner_id: PlannerId,
        slot: Slot,
        item_id: ItemId,
    ) -> Result<Priority, PlannerError> {
        let user_id = ctx.user_id()?;
        self.item_in_planner(user_id, item_id, planner_id)?;

        let (priority_id, mode, displaced) =
            self.db.in_transaction(|db| -> Result<_, PlannerError> {
                let target = db.priority_in_slot(user_id, planner_id, slot)?;
                if let Some(target) = &target {
                    if target.content.references(item_id) {
                        return Ok((target.id, AssignMode::Unchanged, None));
                    }
                }

                match (db.priority_for_item(user_id, item_id)?, target) {
                    (Some(mut source), Some(mut target)) => {
                        let displaced =
                            std::mem::replace(&mut target.content, Content::Item(item_id));
                        std::mem::swap(&mut source.completed, &mut target.completed);
                        // Release the item first; the partial unique index on
                        // (planner_id, item_id) is checked per statement.
                        source.content = Content::Missing;
                        db.update_priority(user_id, &source)?;
                        db.update_priority(user_id, &target)?;
                        let displaced_item = displaced.item_id();
                        source.content = displaced;
                        db.update_priority(user_id, &source)?;
                        Ok((target.id, AssignMode::Swapped, displaced_item))
                    }
                    (Some(mut source), None) => {
                        source.slot = slot;
                        db.update_priority(user_id, &source)?;
                        Ok((source.id, AssignMode::Moved, None))
                    }
                    (None, target) => {
                        let displaced = target.and_then(|t| t.content.item_id());
                        let priority = db
                            .upsert_priority(user_id, planner_id, slot, &Content::Item(item_id))?
                            .ok_or_else(|| PlannerError::not_found(EntityKind::Planner, planner_id))?;
                        Ok((priority.id, AssignMode::Replaced, displaced))
                    }
                }
            })?;

        info!(
            "event=priority_assign module=reconcile status=ok planner_id={} slot={} item_id={} mode={}",
            planner_id,
            slot,
            item_id,
            mode.as_str()
        );
        if mode != AssignMode::Unchanged {
            self.refresh_all(user_id, std::iter::once(item_id).chain(displaced), "priority assign")?;
        }
        self.owned_priority(user_id, priority_id)
    }

    /// Puts custom text into `slot`, replacing whatever it held.
    pub fn set_priority_text(
        &self,
        ctx: &RequestContext,
        planner_id: PlannerId,
        slot: Slot,
        text: &str,
    ) -> Result<Priority, PlannerError> {
        let user_id = ctx.user_id()?;
        let content = Content::Custom(validate_text(text)?.to_string());
        let previous = self.db.priority_in_slot(user_id, planner_id, slot)?;
        let priority = self
            .db
            .upsert_priority(user_id, planner_id, slot, &content)?
            .ok_or_else(|| PlannerError::not_found(EntityKind::Planner, planner_id))?;

        info!(
            "event=priority_text module=reconcile status=ok planner_id={} slot={}",
            planner_id, slot
        );
        if let Some(item_id) = previous.and_then(|p| p.content.item_id()) {
            self.refresh_flags(user_id, item_id, "priority text")?;
        }
        Ok(priority)
    }

    /// Writes new sequences item by item.
    ///
    /// Writes are independent: one failing does not stop or undo the others.
    /// Every failed id is reported in a single `AggregateFailure`. A batch is
    /// rejected before any write when it gives two items the same sequence,
    /// spans more than one planner, or targets a sequence held by an item the
    /// batch does not move.
    pub fn reorder_items(
        &self,
        ctx: &RequestContext,
        updates: &[SequenceUpdate],
    ) -> Result<(), PlannerError> {
        let user_id = ctx.user_id()?;

        let mut sequences = HashSet::new();
        let mut ids = HashSet::new();
        for update in updates {
            if !ids.insert(update.id) {
                return Err(PlannerError::ConstraintViolation(format!(
                    "item {} appears twice in one reorder",
                    update.id
                )));
            }
            if !sequences.insert(update.sequence) {
                return Err(PlannerError::ConstraintViolation(format!(
                    "sequence {} assigned to more than one item",
                    update.sequence
                )));
            }
        }

        // Unresolvable ids stay per-row failures; the rest must share a planner.
        let resolved: Vec<Result<Item, String>> = updates
            .iter()
            .map(|update| match self.db.get_item(user_id, update.id) {
                Ok(Some(item)) => Ok(item),
                Ok(None) => Err(PlannerError::not_found(EntityKind::Item, update.id).to_string()),
                Err(err) => Err(err.to_string()),
            })
            .collect();
        self.check_reorder_target(user_id, updates, &resolved)?;

        let failed: Vec<FailedUpdate> = updates
            .iter()
            .zip(resolved)
            .filter_map(|(update, item)| {
                let reason = match item {
                    Err(reason) => reason,
                    Ok(_) => match self.db.update_item_sequence(user_id, update.id, update.sequence) {
                        Ok(true) => return None,
                        Ok(false) => PlannerError::not_found(EntityKind::Item, update.id).to_string(),
                        Err(err) => err.to_string(),
                    },
                };
                Some(FailedUpdate {
                    id: update.id,
                    reason,
                })
            })
            .collect();

        if failed.is_empty() {
            info!(
                "event=items_reorder module=reconcile status=ok count={}",
                updates.len()
            );
            return Ok(());
        }

        warn!(
            "event=items_reorder module=reconcile status=partial attempted={} failed={}",
            updates.len(),
            failed.len()
        );
        Err(PlannerError::AggregateFailure {
            attempted: updates.len(),
            failed,
        })
    }

    fn check_reorder_target(
        &self,
        user_id: &str,
        updates: &[SequenceUpdate],
        resolved: &[Result<Item, String>],
    ) -> Result<(), PlannerError> {
        let mut planners = resolved.iter().flatten().map(|item| item.planner_id);
        let Some(planner_id) = planners.next() else {
            return Ok(());
        };
        if let Some(other) = planners.find(|&id| id != planner_id) {
            warn!(
                "event=items_reorder module=reconcile status=rejected planners={},{}",
                planner_id, other
            );
            return Err(PlannerError::ConstraintViolation(format!(
                "reorder spans planners {planner_id} and {other}"
            )));
        }

        let moving: HashSet<ItemId> = updates.iter().map(|update| update.id).collect();
        let targets: HashSet<i64> = updates
            .iter()
            .zip(resolved)
            .filter(|(_, item)| item.is_ok())
            .map(|(update, _)| update.sequence)
            .collect();
        let held = self
            .db
            .list_items(user_id, planner_id)?
            .into_iter()
            .find(|item| !moving.contains(&item.id) && targets.contains(&item.sequence));
        match held {
            Some(item) => {
                warn!(
                    "event=items_reorder module=reconcile status=rejected planner_id={} sequence={}",
                    planner_id, item.sequence
                );
                Err(PlannerError::ConstraintViolation(format!(
                    "sequence {} is held by item {} outside the reorder",
                    item.sequence, item.id
                )))
            }
            None => Ok(()),
        }
    }

    /// Moves priorities to new slots in one transaction.
    ///
    /// Every target slot must be empty or vacated by another priority in the
    /// same batch, which is how two slots are swapped.
    pub fn reorder_priority_slots(
        &self,
        ctx: &RequestContext,
        planner_id: PlannerId,
        moves: &[SlotMove],
    ) -> Result<(), PlannerError> {
        let user_id = ctx.user_id()?;
        self.owned_planner(user_id, planner_id)?;

        let moving: HashSet<PriorityId> = moves.iter().map(|m| m.id).collect();
        let targets: HashSet<Slot> = moves.iter().map(|m| m.slot).collect();
        if moving.len() != moves.len() || targets.len() != moves.len() {
            return Err(PlannerError::ConstraintViolation(
                "each priority and each target slot may appear only once".to_string(),
            ));
        }

        self.db.in_transaction(|db| -> Result<(), PlannerError> {
            let current = db.list_priorities(user_id, planner_id)?;
            for id in &moving {
                if !current.iter().any(|p| p.id == *id) {
                    return Err(PlannerError::not_found(EntityKind::Priority, *id));
                }
            }
            if let Some(blocker) = current
                .iter()
                .find(|p| !moving.contains(&p.id) && targets.contains(&p.slot))
            {
                return Err(PlannerError::ConstraintViolation(format!(
                    "slot {} is held by priority {} which is not being moved",
                    blocker.slot, blocker.id
                )));
            }

            for id in &moving {
                db.park_priority_slot(user_id, *id)?;
            }
            for slot_move in moves {
                if let Some(priority) = current.iter().find(|p| p.id == slot_move.id) {
                    let mut moved = priority.clone();
                    moved.slot = slot_move.slot;
                    db.update_priority(user_id, &moved)?;
                }
            }
            Ok(())
        })?;

        info!(
            "event=priority_reorder module=reconcile status=ok planner_id={} count={}",
            planner_id,
            moves.len()
        );
        Ok(())
    }

    pub fn create_time_block(
        &self,
        ctx: &RequestContext,
        planner_id: PlannerId,
        draft: &TimeBlockDraft,
    ) -> Result<TimeBlock, PlannerError> {
        let user_id = ctx.user_id()?;
        validate_time_range(draft.start, draft.end)?;
        draft.content.ensure_occupied()?;
        if let Some(item_id) = draft.content.item_id() {
            self.item_in_planner(user_id, item_id, planner_id)?;
        }

        let block = self
            .db
            .insert_time_block(user_id, planner_id, draft)?
            .ok_or_else(|| PlannerError::not_found(EntityKind::Planner, planner_id))?;
        info!(
            "event=time_block_create module=reconcile status=ok planner_id={} block_id={} start={} end={}",
            planner_id, block.id, block.start, block.end
        );
        if let Some(item_id) = block.content.item_id() {
            self.refresh_flags(user_id, item_id, "time block create")?;
        }
        Ok(block)
    }

    /// Applies a partial edit. The merged interval is validated as a whole.
    pub fn update_time_block(
        &self,
        ctx: &RequestContext,
        id: TimeBlockId,
        patch: &TimeBlockPatch,
    ) -> Result<TimeBlock, PlannerError> {
        let user_id = ctx.user_id()?;
        let mut block = self
            .db
            .get_time_block(user_id, id)?
            .ok_or_else(|| PlannerError::not_found(EntityKind::TimeBlock, id))?;
        let previous_item = block.content.item_id();

        if let Some(start) = patch.start {
            block.start = start;
        }
        if let Some(end) = patch.end {
            block.end = end;
        }
        validate_time_range(block.start, block.end)?;

        if let Some(content) = &patch.content {
            content.ensure_occupied()?;
            if let Some(item_id) = content.item_id() {
                self.item_in_planner(user_id, item_id, block.planner_id)?;
            }
            block.content = content.clone();
        }
        if let Some(color) = patch.color {
            block.color = color;
        }
        if let Some(notes) = &patch.notes {
            block.notes = notes.clone();
        }
        if let Some(completed) = patch.completed {
            block.completed = completed;
        }

        if !self.db.update_time_block(user_id, &block)? {
            return Err(PlannerError::not_found(EntityKind::TimeBlock, id));
        }

        let current_item = block.content.item_id();
        if previous_item != current_item {
            info!(
                "event=time_block_relink module=reconcile status=ok block_id={} from={:?} to={:?}",
                id, previous_item, current_item
            );
            self.refresh_all(
                user_id,
                previous_item.into_iter().chain(current_item),
                "time block update",
            )?;
        }
        self.db
            .get_time_block(user_id, id)?
            .ok_or_else(|| PlannerError::not_found(EntityKind::TimeBlock, id))
    }

    pub fn delete_time_block(&self, ctx: &RequestContext, id: TimeBlockId) -> Result<(), PlannerError> {
        let user_id = ctx.user_id()?;
        let block = self
            .db
            .get_time_block(user_id, id)?
            .ok_or_else(|| PlannerError::not_found(EntityKind::TimeBlock, id))?;
        if !self.db.delete_time_block(user_id, id)? {
            return Err(PlannerError::not_found(EntityKind::TimeBlock, id));
        }
        info!(
            "event=time_block_delete module=reconcile status=ok planner_id={} block_id={}",
            block.planner_id, id
        );
        if let Some(item_id) = block.content.item_id() {
            self.refresh_flags(user_id, item_id, "time block delete")?;
        }
        Ok(())
    }

    /// Deletes an item. Priorities and time blocks that referenced it stay,
    /// with their content cleared to `Content::Missing`.
    pub fn delete_item(&self, ctx: &RequestContext, id: ItemId) -> Result<(), PlannerError> {
        let user_id = ctx.user_id()?;
        let item = self.owned_item(user_id, id)?;

        let (priorities, blocks) = self.db.in_transaction(|db| -> Result<_, PlannerError> {
            let cleared = db.clear_item_references(user_id, id)?;
            if !db.delete_item(user_id, id)? {
                return Err(PlannerError::not_found(EntityKind::Item, id));
            }
            Ok(cleared)
        })?;

        info!(
            "event=item_delete module=reconcile status=ok planner_id={} item_id={} priorities_cleared={} blocks_cleared={}",
            item.planner_id, id, priorities, blocks
        );
        Ok(())
    }

    /// Rewrites every drifted flag in the planner. Returns how many items changed.
    pub fn repair_planner(
        &self,
        ctx: &RequestContext,
        planner_id: PlannerId,
    ) -> Result<usize, PlannerError> {
        let user_id = ctx.user_id()?;
        self.owned_planner(user_id, planner_id)?;

        let items = self.db.list_items(user_id, planner_id)?;
        let priorities = self.db.list_priorities(user_id, planner_id)?;
        let blocks = self.db.list_time_blocks(user_id, planner_id)?;

        let stale = stale_flags(&items, &priorities, &blocks);
        for (item_id, flags) in &stale {
            self.db.set_item_flags(user_id, *item_id, *flags)?;
        }

        if stale.is_empty() {
            info!(
                "event=planner_repair module=reconcile status=ok planner_id={} repaired=0",
                planner_id
            );
        } else {
            warn!(
                "event=planner_repair module=reconcile status=repaired planner_id={} repaired={}",
                planner_id,
                stale.len()
            );
        }
        Ok(stale.len())
    }
}
