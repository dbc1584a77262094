use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::assembly::FullPlanner;
use crate::error::{EntityKind, PlannerError};
use crate::identity::RequestContext;
use crate::models::{
    ColorTag, Content, Item, ItemId, ItemPatch, PriorityPatch, SequenceUpdate, Slot, SlotMove,
    TimeBlockDraft, TimeBlockId, TimeBlockPatch,
};
use crate::optimistic::{
    Coordinator, DragSource, DropTarget, MutationOutcome, ParseDragError, ServiceBackend,
};
use crate::service::PlannerService;
use crate::utils::{parse_date, parse_time};

#[derive(Parser)]
#[command(name = "dayplan")]
#[command(about = "Daily planner: brain dump, three priorities and time blocks")]
#[command(version)]
pub struct Cli {
    /// Use development mode (uses separate dev config/database)
    #[arg(long)]
    pub dev: bool,

    /// Planner day (YYYY-MM-DD), defaults to today
    #[arg(short, long, global = true, value_parser = parse_date_arg)]
    pub date: Option<NaiveDate>,

    /// Act as this user instead of the configured one
    #[arg(long, global = true)]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the planner for the day (default if no subcommand)
    Show {
        /// Print the full snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an item to the brain dump
    Add {
        text: String,
        /// Explicit sequence; defaults to after the last item
        #[arg(long)]
        sequence: Option<i64>,
    },
    /// Change an item's text
    Edit { id: ItemId, text: String },
    /// Flip an item's completed flag
    Toggle { id: ItemId },
    /// Delete an item; slots and blocks pointing at it are cleared
    Remove { id: ItemId },
    /// Reorder items: list ids in the new order
    Reorder {
        #[arg(required = true)]
        ids: Vec<ItemId>,
    },
    /// Put an item into a priority slot (1-3)
    Prioritize {
        #[arg(value_parser = parse_slot_arg)]
        slot: Slot,
        item: ItemId,
    },
    /// Put custom text into a priority slot
    PriorityText {
        #[arg(value_parser = parse_slot_arg)]
        slot: Slot,
        text: String,
    },
    /// Flip a priority slot's completed flag
    TogglePriority {
        #[arg(value_parser = parse_slot_arg)]
        slot: Slot,
    },
    /// Empty a priority slot
    ClearPriority {
        #[arg(value_parser = parse_slot_arg)]
        slot: Slot,
    },
    /// Move a priority to another slot, swapping with its occupant
    MovePriority {
        #[arg(value_parser = parse_slot_arg)]
        from: Slot,
        #[arg(value_parser = parse_slot_arg)]
        to: Slot,
    },
    /// Schedule a time block (HH:MM HH:MM) for an item or custom text
    Schedule {
        #[arg(value_parser = parse_time_arg)]
        start: NaiveTime,
        #[arg(value_parser = parse_time_arg)]
        end: NaiveTime,
        #[arg(long, conflicts_with = "text", required_unless_present = "text")]
        item: Option<ItemId>,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        color: Option<ColorTag>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Edit a time block
    EditBlock {
        id: TimeBlockId,
        #[arg(long, value_parser = parse_time_arg)]
        start: Option<NaiveTime>,
        #[arg(long, value_parser = parse_time_arg)]
        end: Option<NaiveTime>,
        #[arg(long, conflicts_with = "text")]
        item: Option<ItemId>,
        #[arg(long)]
        text: Option<String>,
        #[arg(long)]
        color: Option<ColorTag>,
        #[arg(long, conflicts_with = "clear_notes")]
        notes: Option<String>,
        #[arg(long)]
        clear_notes: bool,
        /// Flip the completed flag
        #[arg(long)]
        toggle: bool,
    },
    /// Delete a time block
    Unschedule { id: TimeBlockId },
    /// Drag and drop: item:<id> or priority:<id> onto item:<id>, slot:<n> or time:<HH:MM>
    Drag { source: String, target: String },
    /// Recompute item reference flags from the stored references
    Repair,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Planner(#[from] PlannerError),
    #[error("{0}")]
    Drag(#[from] ParseDragError),
    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Priority slot {0} is empty")]
    EmptySlot(Slot),
    #[error("Change was rolled back: {0}")]
    RolledBack(String),
}

/// What every command needs: the service, the caller and the day.
pub struct CommandContext<'a> {
    pub service: &'a PlannerService,
    pub ctx: RequestContext,
    pub date: NaiveDate,
    pub block_minutes: i64,
    pub block_color: ColorTag,
}

impl CommandContext<'_> {
    fn planner_id(&self) -> Result<i64, CliError> {
        Ok(self.service.get_or_create_planner(&self.ctx, self.date)?.id)
    }

    fn full(&self) -> Result<FullPlanner, CliError> {
        Ok(self.service.get_full_planner(&self.ctx, self.date)?)
    }
}

fn parse_date_arg(value: &str) -> Result<NaiveDate, String> {
    parse_date(value).map_err(|e| format!("Invalid date format '{}': {}", value, e))
}

fn parse_time_arg(value: &str) -> Result<NaiveTime, String> {
    parse_time(value).map_err(|e| format!("Invalid time '{}' (expected HH:MM): {}", value, e))
}

fn parse_slot_arg(value: &str) -> Result<Slot, String> {
    let number: i64 = value
        .parse()
        .map_err(|_| format!("Invalid slot '{}'", value))?;
    Slot::new(number).map_err(|e| e.to_string())
}

/// Dispatch one parsed command
pub fn run_command(command: Commands, cx: &CommandContext<'_>) -> Result<(), CliError> {
    match command {
        Commands::Show { json } => handle_show(json, cx),
        Commands::Add { text, sequence } => handle_add(&text, sequence, cx),
        Commands::Edit { id, text } => handle_edit(id, text, cx),
        Commands::Toggle { id } => handle_toggle(id, cx),
        Commands::Remove { id } => handle_remove(id, cx),
        Commands::Reorder { ids } => handle_reorder(&ids, cx),
        Commands::Prioritize { slot, item } => handle_prioritize(slot, item, cx),
        Commands::PriorityText { slot, text } => handle_priority_text(slot, &text, cx),
        Commands::TogglePriority { slot } => handle_toggle_priority(slot, cx),
        Commands::ClearPriority { slot } => handle_clear_priority(slot, cx),
        Commands::MovePriority { from, to } => handle_move_priority(from, to, cx),
        Commands::Schedule {
            start,
            end,
            item,
            text,
            color,
            notes,
        } => {
            let draft = TimeBlockDraft {
                start,
                end,
                content: content_arg(item, text).unwrap_or(Content::Missing),
                color: color.unwrap_or(cx.block_color),
                notes,
            };
            handle_schedule(&draft, cx)
        }
        Commands::EditBlock {
            id,
            start,
            end,
            item,
            text,
            color,
            notes,
            clear_notes,
            toggle,
        } => {
            let mut patch = TimeBlockPatch {
                start,
                end,
                content: content_arg(item, text),
                color,
                notes: if clear_notes { Some(None) } else { notes.map(Some) },
                completed: None,
            };
            if toggle {
                let block = cx
                    .full()?
                    .time_blocks
                    .into_iter()
                    .find(|b| b.block.id == id)
                    .ok_or_else(|| PlannerError::not_found(EntityKind::TimeBlock, id))?;
                patch.completed = Some(!block.block.completed);
            }
            handle_edit_block(id, &patch, cx)
        }
        Commands::Unschedule { id } => handle_unschedule(id, cx),
        Commands::Drag { source, target } => handle_drag(&source, &target, cx),
        Commands::Repair => handle_repair(cx),
    }
}

fn content_arg(item: Option<ItemId>, text: Option<String>) -> Option<Content> {
    item.map(Content::Item).or(text.map(Content::Custom))
}

/// Handle the show command
pub fn handle_show(json: bool, cx: &CommandContext<'_>) -> Result<(), CliError> {
    let full = cx.full()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&full)?);
    } else {
        print!("{}", render_planner(&full));
    }
    Ok(())
}

/// Plain-text rendering of a planner day
pub fn render_planner(full: &FullPlanner) -> String {
    let mut out = format!("Planner {}\n\nPriorities\n", full.planner.date);
    for slot in Slot::all() {
        let line = match full.priority_in_slot(slot) {
            Some(resolved) => format!(
                "{} {}",
                checkbox(resolved.priority.completed),
                describe(&resolved.priority.content, resolved.item.as_ref().map(|i| i.text.as_str()))
            ),
            None => "[ ] -".to_string(),
        };
        out.push_str(&format!("  {slot}. {line}\n"));
    }

    out.push_str("\nSchedule\n");
    if full.time_blocks.is_empty() {
        out.push_str("  (nothing scheduled)\n");
    }
    for resolved in &full.time_blocks {
        let block = &resolved.block;
        out.push_str(&format!(
            "  #{} {}-{} {} {} ({})\n",
            block.id,
            block.start.format("%H:%M"),
            block.end.format("%H:%M"),
            checkbox(block.completed),
            describe(&block.content, resolved.item.as_ref().map(|i| i.text.as_str())),
            block.color
        ));
    }

    out.push_str("\nBrain dump\n");
    if full.items.is_empty() {
        out.push_str("  (empty)\n");
    }
    for item in &full.items {
        let mut markers = String::new();
        if full.is_prioritized(item.id) {
            markers.push_str(" *");
        }
        if full.is_scheduled(item.id) {
            markers.push_str(" @");
        }
        out.push_str(&format!(
            "  #{} {} {}{}\n",
            item.id,
            checkbox(item.completed),
            item.text,
            markers
        ));
    }
    out
}

fn checkbox(done: bool) -> &'static str {
    if done { "[x]" } else { "[ ]" }
}

fn describe(content: &Content, item_text: Option<&str>) -> String {
    match (content, item_text) {
        (Content::Item(id), Some(text)) => format!("{text} (item #{id})"),
        (Content::Item(id), None) => format!("<missing item #{id}>"),
        (Content::Custom(text), _) => text.clone(),
        (Content::Missing, _) => "<deleted item>".to_string(),
    }
}

/// Handle the add command
pub fn handle_add(text: &str, sequence: Option<i64>, cx: &CommandContext<'_>) -> Result<(), CliError> {
    let planner_id = cx.planner_id()?;
    let item = cx.service.create_item(&cx.ctx, planner_id, text, sequence)?;
    println!("Item created successfully (ID: {})", item.id);
    Ok(())
}

pub fn handle_edit(id: ItemId, text: String, cx: &CommandContext<'_>) -> Result<(), CliError> {
    let patch = ItemPatch {
        text: Some(text),
        ..ItemPatch::default()
    };
    cx.service.update_item(&cx.ctx, id, &patch)?;
    println!("Item {} updated", id);
    Ok(())
}

pub fn handle_toggle(id: ItemId, cx: &CommandContext<'_>) -> Result<(), CliError> {
    let backend = ServiceBackend::new(cx.service, cx.ctx.clone(), cx.date);
    let mut coordinator = Coordinator::load(&backend, cx.block_minutes, cx.block_color)?;
    let outcome = coordinator.toggle_item(&backend, id);
    report_outcome(outcome, &format!("Item {}", id))
}

pub fn handle_remove(id: ItemId, cx: &CommandContext<'_>) -> Result<(), CliError> {
    cx.service.delete_item(&cx.ctx, id)?;
    println!("Item {} deleted", id);
    Ok(())
}

/// Handle the reorder command; ids are given in their new order
pub fn handle_reorder(ids: &[ItemId], cx: &CommandContext<'_>) -> Result<(), CliError> {
    let updates = renumber(ids, &cx.full()?.items);
    cx.service.reorder_items(&cx.ctx, &updates)?;
    println!("Reordered {} items", updates.len());
    Ok(())
}

/// Listed ids take the first sequences, the rest of the day keeps its order
/// after them. Items already at their new sequence are left out.
fn renumber(ids: &[ItemId], items: &[Item]) -> Vec<SequenceUpdate> {
    let rest = items.iter().map(|item| item.id).filter(|id| !ids.contains(id));
    ids.iter()
        .copied()
        .chain(rest)
        .zip(0_i64..)
        .filter(|(id, sequence)| {
            items
                .iter()
                .find(|item| item.id == *id)
                .is_none_or(|item| item.sequence != *sequence)
        })
        .map(|(id, sequence)| SequenceUpdate { id, sequence })
        .collect()
}

pub fn handle_prioritize(slot: Slot, item: ItemId, cx: &CommandContext<'_>) -> Result<(), CliError> {
    let planner_id = cx.planner_id()?;
    cx.service.assign_priority(&cx.ctx, planner_id, slot, item)?;
    println!("Item {} is priority {}", item, slot);
    Ok(())
}

pub fn handle_priority_text(slot: Slot, text: &str, cx: &CommandContext<'_>) -> Result<(), CliError> {
    let planner_id = cx.planner_id()?;
    cx.service.set_priority_text(&cx.ctx, planner_id, slot, text)?;
    println!("Priority {} set", slot);
    Ok(())
}

pub fn handle_toggle_priority(slot: Slot, cx: &CommandContext<'_>) -> Result<(), CliError> {
    let full = cx.full()?;
    let priority = full
        .priority_in_slot(slot)
        .ok_or(CliError::EmptySlot(slot))?;
    let patch = PriorityPatch {
        completed: Some(!priority.priority.completed),
        ..PriorityPatch::default()
    };
    cx.service.update_priority(&cx.ctx, priority.priority.id, &patch)?;
    println!("Priority {} toggled", slot);
    Ok(())
}

pub fn handle_clear_priority(slot: Slot, cx: &CommandContext<'_>) -> Result<(), CliError> {
    let full = cx.full()?;
    let priority = full
        .priority_in_slot(slot)
        .ok_or(CliError::EmptySlot(slot))?;
    cx.service.delete_priority(&cx.ctx, priority.priority.id)?;
    println!("Priority {} cleared", slot);
    Ok(())
}

/// Handle the move-priority command; an occupied target swaps with the source
pub fn handle_move_priority(from: Slot, to: Slot, cx: &CommandContext<'_>) -> Result<(), CliError> {
    let full = cx.full()?;
    let moving = full.priority_in_slot(from).ok_or(CliError::EmptySlot(from))?;
    let mut moves = vec![SlotMove {
        id: moving.priority.id,
        slot: to,
    }];
    if let Some(occupant) = full.priority_in_slot(to) {
        if occupant.priority.id != moving.priority.id {
            moves.push(SlotMove {
                id: occupant.priority.id,
                slot: from,
            });
        }
    }
    cx.service
        .reorder_priority_slots(&cx.ctx, full.planner.id, &moves)?;
    println!("Priority {} moved to {}", from, to);
    Ok(())
}

pub fn handle_schedule(draft: &TimeBlockDraft, cx: &CommandContext<'_>) -> Result<(), CliError> {
    let planner_id = cx.planner_id()?;
    let block = cx.service.create_time_block(&cx.ctx, planner_id, draft)?;
    println!(
        "Time block created successfully (ID: {}, {}-{})",
        block.id,
        block.start.format("%H:%M"),
        block.end.format("%H:%M")
    );
    Ok(())
}

pub fn handle_edit_block(
    id: TimeBlockId,
    patch: &TimeBlockPatch,
    cx: &CommandContext<'_>,
) -> Result<(), CliError> {
    cx.service.update_time_block(&cx.ctx, id, patch)?;
    println!("Time block {} updated", id);
    Ok(())
}

pub fn handle_unschedule(id: TimeBlockId, cx: &CommandContext<'_>) -> Result<(), CliError> {
    cx.service.delete_time_block(&cx.ctx, id)?;
    println!("Time block {} deleted", id);
    Ok(())
}

/// Handle the drag command through the optimistic coordinator
pub fn handle_drag(source: &str, target: &str, cx: &CommandContext<'_>) -> Result<(), CliError> {
    let source: DragSource = source.parse()?;
    let target: DropTarget = target.parse()?;
    let backend = ServiceBackend::new(cx.service, cx.ctx.clone(), cx.date);
    let mut coordinator = Coordinator::load(&backend, cx.block_minutes, cx.block_color)?;
    let outcome = coordinator.dispatch_drag(&backend, source, target);
    report_outcome(outcome, "Drop")
}

fn report_outcome(outcome: MutationOutcome, what: &str) -> Result<(), CliError> {
    match outcome {
        MutationOutcome::Ignored => {
            println!("{} had no effect", what);
            Ok(())
        }
        MutationOutcome::Confirmed => {
            println!("{} saved", what);
            Ok(())
        }
        MutationOutcome::Reverted { message } => Err(CliError::RolledBack(message)),
    }
}

pub fn handle_repair(cx: &CommandContext<'_>) -> Result<(), CliError> {
    let planner_id = cx.planner_id()?;
    let repaired = cx.service.repair_planner(&cx.ctx, planner_id)?;
    println!("Repaired {} item(s)", repaired);
    Ok(())
}
