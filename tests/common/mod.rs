#![allow(dead_code)]

use chrono::{NaiveDate, NaiveTime};
use dayplan::models::{ColorTag, Content, Item, ItemId, PlannerId, TimeBlockDraft};
use dayplan::reconcile::derive_flags;
use dayplan::{Database, Planner, PlannerService, RequestContext};

pub fn service() -> PlannerService {
    PlannerService::new(Database::open_in_memory().unwrap())
}

pub fn user(id: &str) -> RequestContext {
    RequestContext::for_user(id)
}

pub fn day(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

pub fn planner(service: &PlannerService, ctx: &RequestContext) -> Planner {
    service.get_or_create_planner(ctx, day("2025-06-01")).unwrap()
}

pub fn item(service: &PlannerService, ctx: &RequestContext, planner_id: PlannerId, text: &str) -> Item {
    service.create_item(ctx, planner_id, text, None).unwrap()
}

pub fn fetch_item(service: &PlannerService, ctx: &RequestContext, id: ItemId) -> Item {
    service
        .database()
        .get_item(ctx.user_id().unwrap(), id)
        .unwrap()
        .unwrap()
}

pub fn block_for(item_id: ItemId, start: NaiveTime, end: NaiveTime) -> TimeBlockDraft {
    TimeBlockDraft {
        start,
        end,
        content: Content::Item(item_id),
        color: ColorTag::Blue,
        notes: None,
    }
}

/// Asserts every cached flag in the planner matches its stored references.
pub fn assert_flags_consistent(service: &PlannerService, ctx: &RequestContext, planner_id: PlannerId) {
    let user_id = ctx.user_id().unwrap();
    let db = service.database();
    let priorities = db.list_priorities(user_id, planner_id).unwrap();
    let blocks = db.list_time_blocks(user_id, planner_id).unwrap();
    for item in db.list_items(user_id, planner_id).unwrap() {
        let flags = derive_flags(item.id, &priorities, &blocks);
        assert_eq!(
            (item.referenced_by_priority, item.referenced_by_schedule),
            (flags.by_priority, flags.by_schedule),
            "flags of item {} drifted",
            item.id
        );
    }
}
