//! Core operations exposed to the presentation layer.
//!
//! Every operation takes a [`RequestContext`] and fails with `Unauthenticated`
//! before touching the store when the context carries no user. Reference
//! bookkeeping lives in `reconcile`, snapshot assembly in `assembly`; both add
//! further `impl PlannerService` blocks.

use chrono::NaiveDate;
use log::{error, info};

use crate::database::{Database, DatabaseError};
use crate::error::{EntityKind, PlannerError};
use crate::identity::RequestContext;
use crate::models::{
    Content, Item, ItemId, ItemPatch, Planner, PlannerId, Priority, PriorityId, PriorityPatch,
};

pub struct PlannerService {
    pub(crate) db: Database,
}

impl PlannerService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Returns the caller's planner for `date`, creating it on first access.
    ///
    /// Two requests may both miss the read and race on the insert; the loser
    /// sees a unique violation on (user, date) and re-reads the winner's row.
    pub fn get_or_create_planner(
        &self,
        ctx: &RequestContext,
        date: NaiveDate,
    ) -> Result<Planner, PlannerError> {
        let user_id = ctx.user_id()?;
        resolve_planner(
            || self.db.find_planner(user_id, date),
            || self.db.insert_planner(user_id, date),
        )
    }

    pub(crate) fn owned_planner(
        &self,
        user_id: &str,
        planner_id: PlannerId,
    ) -> Result<Planner, PlannerError> {
        self.db
            .get_planner(user_id, planner_id)?
            .ok_or_else(|| PlannerError::not_found(EntityKind::Planner, planner_id))
    }

    pub(crate) fn owned_item(&self, user_id: &str, item_id: ItemId) -> Result<Item, PlannerError> {
        self.db
            .get_item(user_id, item_id)?
            .ok_or_else(|| PlannerError::not_found(EntityKind::Item, item_id))
    }

    pub(crate) fn owned_priority(
        &self,
        user_id: &str,
        priority_id: PriorityId,
    ) -> Result<Priority, PlannerError> {
        self.db
            .get_priority(user_id, priority_id)?
            .ok_or_else(|| PlannerError::not_found(EntityKind::Priority, priority_id))
    }

    /// Captures a new item. Without an explicit sequence it goes after the last one.
    pub fn create_item(
        &self,
        ctx: &RequestContext,
        planner_id: PlannerId,
        text: &str,
        sequence: Option<i64>,
    ) -> Result<Item, PlannerError> {
        let user_id = ctx.user_id()?;
        let text = validate_text(text)?;
        self.owned_planner(user_id, planner_id)?;

        let sequence = match sequence {
            Some(sequence) => {
                if self.db.sequence_taken(planner_id, sequence, None)? {
                    return Err(PlannerError::ConstraintViolation(format!(
                        "sequence {sequence} is already used in planner {planner_id}"
                    )));
                }
                sequence
            }
            None => self.db.max_item_sequence(planner_id)?.map_or(0, |max| max + 1),
        };

        let item = self
            .db
            .insert_item(user_id, planner_id, text, sequence)?
            .ok_or_else(|| PlannerError::not_found(EntityKind::Planner, planner_id))?;
        info!(
            "event=item_create module=service status=ok planner_id={} item_id={} sequence={}",
            planner_id, item.id, item.sequence
        );
        Ok(item)
    }

    pub fn update_item(
        &self,
        ctx: &RequestContext,
        id: ItemId,
        patch: &ItemPatch,
    ) -> Result<Item, PlannerError> {
        let user_id = ctx.user_id()?;
        let mut item = self.owned_item(user_id, id)?;

        if let Some(text) = &patch.text {
            item.text = validate_text(text)?.to_string();
        }
        if let Some(completed) = patch.completed {
            item.completed = completed;
        }
        if let Some(sequence) = patch.sequence {
            if sequence != item.sequence
                && self.db.sequence_taken(item.planner_id, sequence, Some(id))?
            {
                return Err(PlannerError::ConstraintViolation(format!(
                    "sequence {sequence} is already used in planner {}",
                    item.planner_id
                )));
            }
            item.sequence = sequence;
        }

        if !self.db.update_item(user_id, &item)? {
            return Err(PlannerError::not_found(EntityKind::Item, id));
        }
        self.owned_item(user_id, id)
    }

    /// Edits completion or swaps the slot over to custom text.
    ///
    /// Switching to custom text drops the item reference, so that item's
    /// priority flag is recomputed afterwards.
    pub fn update_priority(
        &self,
        ctx: &RequestContext,
        id: PriorityId,
        patch: &PriorityPatch,
    ) -> Result<Priority, PlannerError> {
        let user_id = ctx.user_id()?;
        let mut priority = self.owned_priority(user_id, id)?;
        let mut released = None;

        if let Some(completed) = patch.completed {
            priority.completed = completed;
        }
        if let Some(text) = &patch.custom_text {
            let content = Content::Custom(validate_text(text)?.to_string());
            released = priority.content.item_id();
            priority.content = content;
        }

        if !self.db.update_priority(user_id, &priority)? {
            return Err(PlannerError::not_found(EntityKind::Priority, id));
        }
        if let Some(item_id) = released {
            self.refresh_flags(user_id, item_id, "priority update")?;
        }
        self.owned_priority(user_id, id)
    }

    /// Clears a slot. The referenced item, if any, keeps existing.
    pub fn delete_priority(&self, ctx: &RequestContext, id: PriorityId) -> Result<(), PlannerError> {
        let user_id = ctx.user_id()?;
        let priority = self.owned_priority(user_id, id)?;
        if !self.db.delete_priority(user_id, id)? {
            return Err(PlannerError::not_found(EntityKind::Priority, id));
        }
        info!(
            "event=priority_delete module=service status=ok planner_id={} priority_id={} slot={}",
            priority.planner_id, id, priority.slot
        );
        if let Some(item_id) = priority.content.item_id() {
            self.refresh_flags(user_id, item_id, "priority delete")?;
        }
        Ok(())
    }
}

/// Read, insert on miss, and re-read when the insert lost a uniqueness race.
fn resolve_planner<F, I>(mut find: F, insert: I) -> Result<Planner, PlannerError>
where
    F: FnMut() -> Result<Option<Planner>, DatabaseError>,
    I: FnOnce() -> Result<Planner, DatabaseError>,
{
    if let Some(planner) = find()? {
        return Ok(planner);
    }

    match insert() {
        Ok(planner) => {
            info!(
                "event=planner_create module=service status=ok planner_id={} date={}",
                planner.id, planner.date
            );
            Ok(planner)
        }
        Err(err) if err.is_unique_violation() => {
            info!("event=planner_create module=service status=race_resolved");
            match find()? {
                Some(planner) => Ok(planner),
                None => Err(PlannerError::Store(err)),
            }
        }
        Err(err) => {
            error!("event=planner_create module=service status=error error={}", err);
            Err(err.into())
        }
    }
}

pub(crate) fn validate_text(text: &str) -> Result<&str, PlannerError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(PlannerError::ConstraintViolation(
            "text cannot be empty".to_string(),
        ));
    }
    Ok(trimmed)
}
