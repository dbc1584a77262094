use chrono::{NaiveDate, NaiveTime};
use log::{error, info};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::models::{
    ColorTag, Content, Item, ItemId, Planner, PlannerId, Priority, PriorityId, Slot, TimeBlock,
    TimeBlockDraft, TimeBlockId,
};
use crate::reconcile::ReferenceFlags;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";

/// Planner ids the user owns; every scoped query filters through this.
const OWNED_PLANNERS: &str = "SELECT id FROM planners WHERE user_id = :user";

const ITEM_COLUMNS: &str = "id, planner_id, text, completed, referenced_by_priority, \
     referenced_by_schedule, sequence, created_at, updated_at";
const PRIORITY_COLUMNS: &str =
    "id, planner_id, slot, item_id, custom_text, completed, created_at, updated_at";
const TIME_BLOCK_COLUMNS: &str = "id, planner_id, start_time, end_time, item_id, custom_text, \
     color, notes, completed, created_at, updated_at";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS planners (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id         TEXT NOT NULL,
    date            TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    UNIQUE (user_id, date)
);

CREATE TABLE IF NOT EXISTS items (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    planner_id              INTEGER NOT NULL REFERENCES planners(id) ON DELETE CASCADE,
    text                    TEXT NOT NULL,
    completed               INTEGER NOT NULL DEFAULT 0,
    referenced_by_priority  INTEGER NOT NULL DEFAULT 0,
    referenced_by_schedule  INTEGER NOT NULL DEFAULT 0,
    sequence                INTEGER NOT NULL,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS priorities (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    planner_id      INTEGER NOT NULL REFERENCES planners(id) ON DELETE CASCADE,
    slot            INTEGER NOT NULL,
    item_id         INTEGER REFERENCES items(id) ON DELETE SET NULL,
    custom_text     TEXT,
    completed       INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE (planner_id, slot),
    CHECK (item_id IS NULL OR custom_text IS NULL)
);

CREATE TABLE IF NOT EXISTS time_blocks (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    planner_id      INTEGER NOT NULL REFERENCES planners(id) ON DELETE CASCADE,
    start_time      TEXT NOT NULL,
    end_time        TEXT NOT NULL,
    item_id         INTEGER REFERENCES items(id) ON DELETE SET NULL,
    custom_text     TEXT,
    color           TEXT NOT NULL,
    notes           TEXT,
    completed       INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    CHECK (item_id IS NULL OR custom_text IS NULL),
    CHECK (end_time > start_time)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_priorities_item
    ON priorities(planner_id, item_id) WHERE item_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_items_planner ON items(planner_id, sequence);
CREATE INDEX IF NOT EXISTS idx_time_blocks_planner ON time_blocks(planner_id, start_time);
CREATE INDEX IF NOT EXISTS idx_time_blocks_item ON time_blocks(item_id);
";

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    SqliteError(#[from] rusqlite::Error),
    #[error("Failed to create database directory: {0}")]
    DirectoryError(String),
}

impl DatabaseError {
    /// True when a write was rejected by a UNIQUE or PRIMARY KEY constraint.
    ///
    /// Other constraint failures (CHECK, FOREIGN KEY, NOT NULL) are not
    /// uniqueness races and must not be treated as one.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DatabaseError::SqliteError(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
                    && matches!(
                        err.extended_code,
                        rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                            | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    )
            }
            _ => false,
        }
    }
}

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database file and initialize the schema
    pub fn new(path: &str) -> Result<Self, DatabaseError> {
        let started_at = Instant::now();
        let db_path = PathBuf::from(path);

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DatabaseError::DirectoryError(e.to_string()))?;
            }
        }

        let conn = Connection::open(&db_path)?;
        Self::bootstrap(conn, "file", started_at)
    }

    /// Open a private in-memory database with the full schema
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let started_at = Instant::now();
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(conn, "memory", started_at)
    }

    fn bootstrap(conn: Connection, mode: &str, started_at: Instant) -> Result<Self, DatabaseError> {
        let db = Database { conn };
        match db.initialize_schema() {
            Ok(()) => {
                info!(
                    "event=db_open module=db status=ok mode={} duration_ms={}",
                    mode,
                    started_at.elapsed().as_millis()
                );
                Ok(db)
            }
            Err(err) => {
                error!(
                    "event=db_open module=db status=error mode={} duration_ms={} error={}",
                    mode,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn initialize_schema(&self) -> Result<(), DatabaseError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.busy_timeout(Duration::from_secs(5))?;
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get a reference to the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside one transaction; any error rolls every write back.
    ///
    /// Store methods issue single statements, so they can be composed freely in `f`.
    pub fn in_transaction<T, E>(&self, f: impl FnOnce(&Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DatabaseError>,
    {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(DatabaseError::from)?;
        let value = f(self)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(value)
    }

    // ---- planners ----

    pub fn find_planner(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Planner>, DatabaseError> {
        self.conn
            .query_row(
                "SELECT id, user_id, date, created_at FROM planners
                 WHERE user_id = ?1 AND date = ?2",
                rusqlite::params![user_id, format_date(date)],
                Self::row_to_planner,
            )
            .optional()
            .map_err(DatabaseError::from)
    }

    pub fn get_planner(
        &self,
        user_id: &str,
        id: PlannerId,
    ) -> Result<Option<Planner>, DatabaseError> {
        self.conn
            .query_row(
                "SELECT id, user_id, date, created_at FROM planners
                 WHERE id = ?1 AND user_id = ?2",
                rusqlite::params![id, user_id],
                Self::row_to_planner,
            )
            .optional()
            .map_err(DatabaseError::from)
    }

    /// Insert a planner row. Fails with a unique violation if (user, date) exists.
    pub fn insert_planner(&self, user_id: &str, date: NaiveDate) -> Result<Planner, DatabaseError> {
        let now = now();
        self.conn.execute(
            "INSERT INTO planners (user_id, date, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![user_id, format_date(date), now],
        )?;
        Ok(Planner {
            id: self.conn.last_insert_rowid(),
            user_id: user_id.to_string(),
            date,
            created_at: now,
        })
    }

    fn row_to_planner(row: &rusqlite::Row) -> Result<Planner, rusqlite::Error> {
        let date_text: String = row.get(2)?;
        Ok(Planner {
            id: row.get(0)?,
            user_id: row.get(1)?,
            date: NaiveDate::parse_from_str(&date_text, DATE_FORMAT)
                .map_err(|e| conversion_error(2, e))?,
            created_at: row.get(3)?,
        })
    }

    // ---- items ----

    /// Insert an item into an owned planner. `None` when the planner is not the user's.
    pub fn insert_item(
        &self,
        user_id: &str,
        planner_id: PlannerId,
        text: &str,
        sequence: i64,
    ) -> Result<Option<Item>, DatabaseError> {
        if self.get_planner(user_id, planner_id)?.is_none() {
            return Ok(None);
        }
        let now = now();
        self.conn.execute(
            "INSERT INTO items (planner_id, text, sequence, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![planner_id, text, sequence, now, now],
        )?;
        self.get_item(user_id, self.conn.last_insert_rowid())
    }

    pub fn get_item(&self, user_id: &str, id: ItemId) -> Result<Option<Item>, DatabaseError> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM items
                     WHERE id = :id AND planner_id IN ({OWNED_PLANNERS})"
                ),
                rusqlite::named_params! { ":id": id, ":user": user_id },
                Self::row_to_item,
            )
            .optional()
            .map_err(DatabaseError::from)
    }

    /// All items of a planner ordered by sequence ASC
    pub fn list_items(
        &self,
        user_id: &str,
        planner_id: PlannerId,
    ) -> Result<Vec<Item>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM items
             WHERE planner_id = :planner AND planner_id IN ({OWNED_PLANNERS})
             ORDER BY sequence ASC, id ASC"
        ))?;
        let items = stmt
            .query_map(
                rusqlite::named_params! { ":planner": planner_id, ":user": user_id },
                Self::row_to_item,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// Highest sequence in the planner, `None` when it has no items
    pub fn max_item_sequence(&self, planner_id: PlannerId) -> Result<Option<i64>, DatabaseError> {
        let max_sequence: Option<i64> = self.conn.query_row(
            "SELECT MAX(sequence) FROM items WHERE planner_id = ?1",
            rusqlite::params![planner_id],
            |row| row.get(0),
        )?;
        Ok(max_sequence)
    }

    /// Whether another item of the planner already uses `sequence`
    pub fn sequence_taken(
        &self,
        planner_id: PlannerId,
        sequence: i64,
        except: Option<ItemId>,
    ) -> Result<bool, DatabaseError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM items
             WHERE planner_id = ?1 AND sequence = ?2 AND (?3 IS NULL OR id <> ?3)",
            rusqlite::params![planner_id, sequence, except],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Write the user-editable item fields. Derived flags are left untouched.
    pub fn update_item(&self, user_id: &str, item: &Item) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE items SET text = :text, completed = :completed, sequence = :sequence,
                 updated_at = :now
                 WHERE id = :id AND planner_id IN ({OWNED_PLANNERS})"
            ),
            rusqlite::named_params! {
                ":text": item.text,
                ":completed": bool_to_int(item.completed),
                ":sequence": item.sequence,
                ":now": now(),
                ":id": item.id,
                ":user": user_id,
            },
        )?;
        Ok(changed > 0)
    }

    pub fn update_item_sequence(
        &self,
        user_id: &str,
        id: ItemId,
        sequence: i64,
    ) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE items SET sequence = :sequence, updated_at = :now
                 WHERE id = :id AND planner_id IN ({OWNED_PLANNERS})"
            ),
            rusqlite::named_params! {
                ":sequence": sequence,
                ":now": now(),
                ":id": id,
                ":user": user_id,
            },
        )?;
        Ok(changed > 0)
    }

    /// Overwrite the cached reference flags of one item
    pub fn set_item_flags(
        &self,
        user_id: &str,
        id: ItemId,
        flags: ReferenceFlags,
    ) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE items SET referenced_by_priority = :by_priority,
                 referenced_by_schedule = :by_schedule
                 WHERE id = :id AND planner_id IN ({OWNED_PLANNERS})"
            ),
            rusqlite::named_params! {
                ":by_priority": bool_to_int(flags.by_priority),
                ":by_schedule": bool_to_int(flags.by_schedule),
                ":id": id,
                ":user": user_id,
            },
        )?;
        Ok(changed > 0)
    }

    /// Null out every priority/time block reference to the item.
    /// Returns (priorities cleared, time blocks cleared).
    pub fn clear_item_references(
        &self,
        user_id: &str,
        item_id: ItemId,
    ) -> Result<(usize, usize), DatabaseError> {
        let now = now();
        let priorities = self.conn.execute(
            &format!(
                "UPDATE priorities SET item_id = NULL, custom_text = NULL, updated_at = :now
                 WHERE item_id = :item AND planner_id IN ({OWNED_PLANNERS})"
            ),
            rusqlite::named_params! { ":item": item_id, ":now": now, ":user": user_id },
        )?;
        let blocks = self.conn.execute(
            &format!(
                "UPDATE time_blocks SET item_id = NULL, custom_text = NULL, updated_at = :now
                 WHERE item_id = :item AND planner_id IN ({OWNED_PLANNERS})"
            ),
            rusqlite::named_params! { ":item": item_id, ":now": now, ":user": user_id },
        )?;
        Ok((priorities, blocks))
    }

    pub fn delete_item(&self, user_id: &str, id: ItemId) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            &format!("DELETE FROM items WHERE id = :id AND planner_id IN ({OWNED_PLANNERS})"),
            rusqlite::named_params! { ":id": id, ":user": user_id },
        )?;
        Ok(changed > 0)
    }

    fn row_to_item(row: &rusqlite::Row) -> Result<Item, rusqlite::Error> {
        Ok(Item {
            id: row.get(0)?,
            planner_id: row.get(1)?,
            text: row.get(2)?,
            completed: row.get::<_, i64>(3)? != 0,
            referenced_by_priority: row.get::<_, i64>(4)? != 0,
            referenced_by_schedule: row.get::<_, i64>(5)? != 0,
            sequence: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    // ---- priorities ----

    pub fn get_priority(
        &self,
        user_id: &str,
        id: PriorityId,
    ) -> Result<Option<Priority>, DatabaseError> {
        self.query_priority("id = :key", id, user_id)
    }

    pub fn priority_in_slot(
        &self,
        user_id: &str,
        planner_id: PlannerId,
        slot: Slot,
    ) -> Result<Option<Priority>, DatabaseError> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {PRIORITY_COLUMNS} FROM priorities
                     WHERE planner_id = :planner AND slot = :slot
                       AND planner_id IN ({OWNED_PLANNERS})"
                ),
                rusqlite::named_params! {
                    ":planner": planner_id,
                    ":slot": slot.get(),
                    ":user": user_id,
                },
                Self::row_to_priority,
            )
            .optional()
            .map_err(DatabaseError::from)
    }

    /// The priority that currently holds `item_id`, if any
    pub fn priority_for_item(
        &self,
        user_id: &str,
        item_id: ItemId,
    ) -> Result<Option<Priority>, DatabaseError> {
        self.query_priority("item_id = :key", item_id, user_id)
    }

    fn query_priority(
        &self,
        predicate: &str,
        key: i64,
        user_id: &str,
    ) -> Result<Option<Priority>, DatabaseError> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {PRIORITY_COLUMNS} FROM priorities
                     WHERE {predicate} AND planner_id IN ({OWNED_PLANNERS})
                     ORDER BY slot ASC LIMIT 1"
                ),
                rusqlite::named_params! { ":key": key, ":user": user_id },
                Self::row_to_priority,
            )
            .optional()
            .map_err(DatabaseError::from)
    }

    /// All priorities of a planner ordered by slot ASC
    pub fn list_priorities(
        &self,
        user_id: &str,
        planner_id: PlannerId,
    ) -> Result<Vec<Priority>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PRIORITY_COLUMNS} FROM priorities
             WHERE planner_id = :planner AND planner_id IN ({OWNED_PLANNERS})
             ORDER BY slot ASC"
        ))?;
        let priorities = stmt
            .query_map(
                rusqlite::named_params! { ":planner": planner_id, ":user": user_id },
                Self::row_to_priority,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(priorities)
    }

    /// Insert the slot, or replace its content if the slot is already occupied.
    ///
    /// Both content columns are always written, so setting one side clears the
    /// other. A replaced slot starts out not completed.
    pub fn upsert_priority(
        &self,
        user_id: &str,
        planner_id: PlannerId,
        slot: Slot,
        content: &Content,
    ) -> Result<Option<Priority>, DatabaseError> {
        if self.get_planner(user_id, planner_id)?.is_none() {
            return Ok(None);
        }
        let (item_id, custom_text) = content.to_columns();
        let now = now();
        self.conn.execute(
            "INSERT INTO priorities (planner_id, slot, item_id, custom_text, completed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6)
             ON CONFLICT(planner_id, slot) DO UPDATE SET
                item_id = excluded.item_id,
                custom_text = excluded.custom_text,
                completed = 0,
                updated_at = excluded.updated_at",
            rusqlite::params![planner_id, slot.get(), item_id, custom_text, now, now],
        )?;
        self.priority_in_slot(user_id, planner_id, slot)
    }

    /// Write slot, content and completion of an existing priority
    pub fn update_priority(&self, user_id: &str, priority: &Priority) -> Result<bool, DatabaseError> {
        let (item_id, custom_text) = priority.content.to_columns();
        let changed = self.conn.execute(
            &format!(
                "UPDATE priorities SET slot = :slot, item_id = :item, custom_text = :custom,
                 completed = :completed, updated_at = :now
                 WHERE id = :id AND planner_id IN ({OWNED_PLANNERS})"
            ),
            rusqlite::named_params! {
                ":slot": priority.slot.get(),
                ":item": item_id,
                ":custom": custom_text,
                ":completed": bool_to_int(priority.completed),
                ":now": now(),
                ":id": priority.id,
                ":user": user_id,
            },
        )?;
        Ok(changed > 0)
    }

    /// Park a priority on a slot number outside 1..=3 so its real slot can be
    /// reused within the same transaction.
    pub fn park_priority_slot(&self, user_id: &str, id: PriorityId) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE priorities SET slot = -id
                 WHERE id = :id AND planner_id IN ({OWNED_PLANNERS})"
            ),
            rusqlite::named_params! { ":id": id, ":user": user_id },
        )?;
        Ok(changed > 0)
    }

    pub fn delete_priority(&self, user_id: &str, id: PriorityId) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            &format!("DELETE FROM priorities WHERE id = :id AND planner_id IN ({OWNED_PLANNERS})"),
            rusqlite::named_params! { ":id": id, ":user": user_id },
        )?;
        Ok(changed > 0)
    }

    fn row_to_priority(row: &rusqlite::Row) -> Result<Priority, rusqlite::Error> {
        let slot: i64 = row.get(2)?;
        Ok(Priority {
            id: row.get(0)?,
            planner_id: row.get(1)?,
            slot: Slot::new(slot).map_err(|e| conversion_error(2, e))?,
            content: Content::from_columns(row.get(3)?, row.get(4)?)
                .map_err(|e| conversion_error(3, e))?,
            completed: row.get::<_, i64>(5)? != 0,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    // ---- time blocks ----

    pub fn insert_time_block(
        &self,
        user_id: &str,
        planner_id: PlannerId,
        draft: &TimeBlockDraft,
    ) -> Result<Option<TimeBlock>, DatabaseError> {
        if self.get_planner(user_id, planner_id)?.is_none() {
            return Ok(None);
        }
        let (item_id, custom_text) = draft.content.to_columns();
        let now = now();
        self.conn.execute(
            "INSERT INTO time_blocks (planner_id, start_time, end_time, item_id, custom_text,
                color, notes, completed, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9)",
            rusqlite::params![
                planner_id,
                format_time(draft.start),
                format_time(draft.end),
                item_id,
                custom_text,
                draft.color.as_str(),
                draft.notes,
                now,
                now
            ],
        )?;
        self.get_time_block(user_id, self.conn.last_insert_rowid())
    }

    pub fn get_time_block(
        &self,
        user_id: &str,
        id: TimeBlockId,
    ) -> Result<Option<TimeBlock>, DatabaseError> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {TIME_BLOCK_COLUMNS} FROM time_blocks
                     WHERE id = :id AND planner_id IN ({OWNED_PLANNERS})"
                ),
                rusqlite::named_params! { ":id": id, ":user": user_id },
                Self::row_to_time_block,
            )
            .optional()
            .map_err(DatabaseError::from)
    }

    /// All time blocks of a planner ordered by start time ASC
    pub fn list_time_blocks(
        &self,
        user_id: &str,
        planner_id: PlannerId,
    ) -> Result<Vec<TimeBlock>, DatabaseError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TIME_BLOCK_COLUMNS} FROM time_blocks
             WHERE planner_id = :planner AND planner_id IN ({OWNED_PLANNERS})
             ORDER BY start_time ASC, id ASC"
        ))?;
        let blocks = stmt
            .query_map(
                rusqlite::named_params! { ":planner": planner_id, ":user": user_id },
                Self::row_to_time_block,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(blocks)
    }

    pub fn update_time_block(&self, user_id: &str, block: &TimeBlock) -> Result<bool, DatabaseError> {
        let (item_id, custom_text) = block.content.to_columns();
        let changed = self.conn.execute(
            &format!(
                "UPDATE time_blocks SET start_time = :start, end_time = :end, item_id = :item,
                 custom_text = :custom, color = :color, notes = :notes, completed = :completed,
                 updated_at = :now
                 WHERE id = :id AND planner_id IN ({OWNED_PLANNERS})"
            ),
            rusqlite::named_params! {
                ":start": format_time(block.start),
                ":end": format_time(block.end),
                ":item": item_id,
                ":custom": custom_text,
                ":color": block.color.as_str(),
                ":notes": block.notes,
                ":completed": bool_to_int(block.completed),
                ":now": now(),
                ":id": block.id,
                ":user": user_id,
            },
        )?;
        Ok(changed > 0)
    }

    pub fn delete_time_block(&self, user_id: &str, id: TimeBlockId) -> Result<bool, DatabaseError> {
        let changed = self.conn.execute(
            &format!("DELETE FROM time_blocks WHERE id = :id AND planner_id IN ({OWNED_PLANNERS})"),
            rusqlite::named_params! { ":id": id, ":user": user_id },
        )?;
        Ok(changed > 0)
    }

    fn row_to_time_block(row: &rusqlite::Row) -> Result<TimeBlock, rusqlite::Error> {
        let start: String = row.get(2)?;
        let end: String = row.get(3)?;
        let color: String = row.get(6)?;
        Ok(TimeBlock {
            id: row.get(0)?,
            planner_id: row.get(1)?,
            start: parse_time(&start).map_err(|e| conversion_error(2, e))?,
            end: parse_time(&end).map_err(|e| conversion_error(3, e))?,
            content: Content::from_columns(row.get(4)?, row.get(5)?)
                .map_err(|e| conversion_error(4, e))?,
            color: color
                .parse::<ColorTag>()
                .map_err(|e| conversion_error(6, e))?,
            notes: row.get(7)?,
            completed: row.get::<_, i64>(8)? != 0,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

/// Default database file name inside a data directory
pub fn default_database_file(data_dir: &Path) -> PathBuf {
    data_dir.join("dayplan.db")
}

fn now() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn format_time(time: NaiveTime) -> String {
    time.format(TIME_FORMAT).to_string()
}

fn parse_time(value: &str) -> Result<NaiveTime, chrono::ParseError> {
    NaiveTime::parse_from_str(value, TIME_FORMAT)
}

fn bool_to_int(value: bool) -> i64 {
    if value { 1 } else { 0 }
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}
