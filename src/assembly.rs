//! Full-day snapshot: planner plus its items, priorities and time blocks, with
//! every item reference resolved in process.

use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::PlannerError;
use crate::identity::RequestContext;
use crate::models::{Item, ItemId, Planner, Priority, Slot, TimeBlock};
use crate::service::PlannerService;

/// A priority with its referenced item, `None` when there is no reference or
/// it no longer resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPriority {
    pub priority: Priority,
    pub item: Option<Item>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTimeBlock {
    pub block: TimeBlock,
    pub item: Option<Item>,
}

/// Items by sequence, priorities by slot, time blocks by start time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullPlanner {
    pub planner: Planner,
    pub items: Vec<Item>,
    pub priorities: Vec<ResolvedPriority>,
    pub time_blocks: Vec<ResolvedTimeBlock>,
}

impl FullPlanner {
    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn priority_in_slot(&self, slot: Slot) -> Option<&ResolvedPriority> {
        self.priorities.iter().find(|p| p.priority.slot == slot)
    }

    /// Whether a priority currently references the item.
    ///
    /// Read from the priority list, not from the item's cached flag, which
    /// may lag behind an optimistic edit.
    pub fn is_prioritized(&self, id: ItemId) -> bool {
        self.priorities.iter().any(|p| p.priority.content.references(id))
    }

    pub fn is_scheduled(&self, id: ItemId) -> bool {
        self.time_blocks.iter().any(|b| b.block.content.references(id))
    }
}

/// Joins priorities and time blocks against the item list.
///
/// Inputs are re-sorted so the snapshot order does not depend on the caller.
pub fn assemble(
    planner: Planner,
    mut items: Vec<Item>,
    mut priorities: Vec<Priority>,
    mut blocks: Vec<TimeBlock>,
) -> FullPlanner {
    items.sort_by_key(|item| (item.sequence, item.id));
    priorities.sort_by_key(|p| p.slot);
    blocks.sort_by_key(|b| (b.start, b.id));

    let by_id: HashMap<ItemId, &Item> = items.iter().map(|item| (item.id, item)).collect();
    let resolve = |id: Option<ItemId>| id.and_then(|id| by_id.get(&id).map(|item| (*item).clone()));

    let priorities = priorities
        .into_iter()
        .map(|priority| ResolvedPriority {
            item: resolve(priority.content.item_id()),
            priority,
        })
        .collect();
    let time_blocks = blocks
        .into_iter()
        .map(|block| ResolvedTimeBlock {
            item: resolve(block.content.item_id()),
            block,
        })
        .collect();

    FullPlanner {
        planner,
        items,
        priorities,
        time_blocks,
    }
}

impl PlannerService {
    /// Loads the caller's planner for `date`, creating it when absent.
    pub fn get_full_planner(
        &self,
        ctx: &RequestContext,
        date: NaiveDate,
    ) -> Result<FullPlanner, PlannerError> {
        let planner = self.get_or_create_planner(ctx, date)?;
        let user_id = ctx.user_id()?;

        let (items, priorities, blocks) = self.db.in_transaction(|db| -> Result<_, PlannerError> {
            Ok((
                db.list_items(user_id, planner.id)?,
                db.list_priorities(user_id, planner.id)?,
                db.list_time_blocks(user_id, planner.id)?,
            ))
        })?;

        let full = assemble(planner, items, priorities, blocks);
        let unresolved = full
            .priorities
            .iter()
            .filter(|p| p.priority.content.item_id().is_some() && p.item.is_none())
            .count()
            + full
                .time_blocks
                .iter()
                .filter(|b| b.block.content.item_id().is_some() && b.item.is_none())
                .count();
        if unresolved > 0 {
            debug!(
                "event=planner_assemble module=assembly status=unresolved planner_id={} count={}",
                full.planner.id, unresolved
            );
        }
        info!(
            "event=planner_assemble module=assembly status=ok planner_id={} items={} priorities={} blocks={}",
            full.planner.id,
            full.items.len(),
            full.priorities.len(),
            full.time_blocks.len()
        );
        Ok(full)
    }
}
