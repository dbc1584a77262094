use chrono::{NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub type PlannerId = i64;
pub type ItemId = i64;
pub type PriorityId = i64;
pub type TimeBlockId = i64;

/// Number of focus slots on every planner.
pub const SLOT_COUNT: i64 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("slot must be between 1 and {SLOT_COUNT}, got {0}")]
    InvalidSlot(i64),
    #[error("time block must end after it starts ({start} -> {end})")]
    InvalidTimeRange { start: NaiveTime, end: NaiveTime },
    #[error("times must have minute granularity, got {0}")]
    SubMinuteTime(NaiveTime),
    #[error("content must reference an item or carry custom text")]
    EmptyContent,
    #[error("content cannot both reference item {0} and carry custom text")]
    AmbiguousContent(ItemId),
    #[error("unknown color tag `{0}`")]
    UnknownColor(String),
}

/// One calendar day of planning for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Planner {
    pub id: PlannerId,
    pub user_id: String,
    pub date: NaiveDate,
    pub created_at: String,
}

/// A brain-dump entry.
///
/// `referenced_by_priority` and `referenced_by_schedule` are a cache of the
/// references held by priorities and time blocks of the same planner. They are
/// never written from caller input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub planner_id: PlannerId,
    pub text: String,
    pub completed: bool,
    pub referenced_by_priority: bool,
    pub referenced_by_schedule: bool,
    pub sequence: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// A focus slot number, always within `1..=SLOT_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Slot(i64);

impl Slot {
    pub const FIRST: Slot = Slot(1);

    pub fn new(value: i64) -> Result<Self, ModelError> {
        if (1..=SLOT_COUNT).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ModelError::InvalidSlot(value))
        }
    }

    pub fn get(self) -> i64 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = Slot> {
        (1..=SLOT_COUNT).map(Slot)
    }
}

impl TryFrom<i64> for Slot {
    type Error = ModelError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Slot::new(value)
    }
}

impl From<Slot> for i64 {
    fn from(slot: Slot) -> Self {
        slot.0
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a priority slot or a time block shows.
///
/// Persisted as two nullable columns (`item_id`, `custom_text`); this type keeps
/// the either/or rule out of the core logic. `Missing` is the state left behind
/// when the referenced item was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Content {
    Item(ItemId),
    Custom(String),
    Missing,
}

impl Content {
    /// Rebuilds content from its storage columns.
    pub fn from_columns(
        item_id: Option<ItemId>,
        custom_text: Option<String>,
    ) -> Result<Self, ModelError> {
        match (item_id, custom_text) {
            (Some(id), None) => Ok(Content::Item(id)),
            (None, Some(text)) => Ok(Content::Custom(text)),
            (None, None) => Ok(Content::Missing),
            (Some(id), Some(_)) => Err(ModelError::AmbiguousContent(id)),
        }
    }

    /// Splits content into its storage columns. Exactly one side is set unless missing.
    pub fn to_columns(&self) -> (Option<ItemId>, Option<&str>) {
        match self {
            Content::Item(id) => (Some(*id), None),
            Content::Custom(text) => (None, Some(text.as_str())),
            Content::Missing => (None, None),
        }
    }

    pub fn item_id(&self) -> Option<ItemId> {
        match self {
            Content::Item(id) => Some(*id),
            _ => None,
        }
    }

    pub fn references(&self, item_id: ItemId) -> bool {
        self.item_id() == Some(item_id)
    }

    /// Rejects content that would leave a new or edited slot/block empty.
    pub fn ensure_occupied(&self) -> Result<(), ModelError> {
        match self {
            Content::Item(_) => Ok(()),
            Content::Custom(text) if !text.trim().is_empty() => Ok(()),
            _ => Err(ModelError::EmptyContent),
        }
    }
}

/// Fixed palette for time blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorTag {
    #[default]
    Blue,
    Green,
    Yellow,
    Orange,
    Red,
    Purple,
    Gray,
}

impl ColorTag {
    pub const ALL: [ColorTag; 7] = [
        ColorTag::Blue,
        ColorTag::Green,
        ColorTag::Yellow,
        ColorTag::Orange,
        ColorTag::Red,
        ColorTag::Purple,
        ColorTag::Gray,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ColorTag::Blue => "blue",
            ColorTag::Green => "green",
            ColorTag::Yellow => "yellow",
            ColorTag::Orange => "orange",
            ColorTag::Red => "red",
            ColorTag::Purple => "purple",
            ColorTag::Gray => "gray",
        }
    }
}

impl FromStr for ColorTag {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ColorTag::ALL
            .into_iter()
            .find(|color| color.as_str() == wanted)
            .ok_or_else(|| ModelError::UnknownColor(s.to_string()))
    }
}

impl fmt::Display for ColorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the three focus slots of a planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Priority {
    pub id: PriorityId,
    pub planner_id: PlannerId,
    pub slot: Slot,
    pub content: Content,
    pub completed: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A scheduled interval on the planner's day. Overlaps are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBlock {
    pub id: TimeBlockId,
    pub planner_id: PlannerId,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub content: Content,
    pub color: ColorTag,
    pub notes: Option<String>,
    pub completed: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl TimeBlock {
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }
}

/// Checks a time block interval: minute granularity and `end > start`.
pub fn validate_time_range(start: NaiveTime, end: NaiveTime) -> Result<(), ModelError> {
    for time in [start, end] {
        if time.second() != 0 || time.nanosecond() != 0 {
            return Err(ModelError::SubMinuteTime(time));
        }
    }
    if end <= start {
        return Err(ModelError::InvalidTimeRange { start, end });
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPatch {
    pub text: Option<String>,
    pub completed: Option<bool>,
    pub sequence: Option<i64>,
}

/// Editable priority fields. Item assignment goes through the swap operation instead.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorityPatch {
    pub completed: Option<bool>,
    pub custom_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeBlockDraft {
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub content: Content,
    pub color: ColorTag,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeBlockPatch {
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
    pub content: Option<Content>,
    pub color: Option<ColorTag>,
    /// `Some(None)` clears the notes.
    pub notes: Option<Option<String>>,
    pub completed: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceUpdate {
    pub id: ItemId,
    pub sequence: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMove {
    pub id: PriorityId,
    pub slot: Slot,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
    }

    #[test]
    fn slot_rejects_out_of_range_values() {
        assert!(Slot::new(0).is_err());
        assert!(Slot::new(4).is_err());
        assert_eq!(Slot::new(3).unwrap().get(), 3);
        assert_eq!(Slot::all().count(), 3);
    }

    #[test]
    fn content_columns_keep_either_or_rule() {
        assert_eq!(Content::from_columns(Some(7), None).unwrap(), Content::Item(7));
        assert_eq!(
            Content::from_columns(None, Some("call mom".into())).unwrap(),
            Content::Custom("call mom".into())
        );
        assert_eq!(Content::from_columns(None, None).unwrap(), Content::Missing);
        assert_eq!(
            Content::from_columns(Some(7), Some("both".into())),
            Err(ModelError::AmbiguousContent(7))
        );
        assert_eq!(Content::Item(3).to_columns(), (Some(3), None));
    }

    #[test]
    fn blank_or_missing_content_is_not_occupied() {
        assert!(Content::Item(1).ensure_occupied().is_ok());
        assert!(Content::Custom("  ".into()).ensure_occupied().is_err());
        assert!(Content::Missing.ensure_occupied().is_err());
    }

    #[test]
    fn time_range_requires_end_after_start() {
        assert!(validate_time_range(hm(9, 0), hm(10, 0)).is_ok());
        assert!(validate_time_range(hm(10, 0), hm(10, 0)).is_err());
        assert!(validate_time_range(hm(11, 0), hm(10, 0)).is_err());
        let with_seconds = NaiveTime::from_hms_opt(9, 0, 30).unwrap();
        assert_eq!(
            validate_time_range(with_seconds, hm(10, 0)),
            Err(ModelError::SubMinuteTime(with_seconds))
        );
    }

    #[test]
    fn color_tags_parse_case_insensitively() {
        assert_eq!("Purple".parse::<ColorTag>().unwrap(), ColorTag::Purple);
        assert!("teal".parse::<ColorTag>().is_err());
    }
}
