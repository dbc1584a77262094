use std::fmt;
use thiserror::Error;

use crate::database::DatabaseError;
use crate::models::ModelError;

/// Entity named in a `NotFound` error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Planner,
    Item,
    Priority,
    TimeBlock,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntityKind::Planner => "planner",
            EntityKind::Item => "item",
            EntityKind::Priority => "priority",
            EntityKind::TimeBlock => "time block",
        })
    }
}

/// One write of a bulk operation that did not apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedUpdate {
    pub id: i64,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum PlannerError {
    #[error("no authenticated user for this request")]
    Unauthenticated,

    /// Absent, or owned by another user.
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: i64 },

    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("{} of {attempted} updates failed (ids: {})", .failed.len(), join_ids(.failed))]
    AggregateFailure {
        attempted: usize,
        failed: Vec<FailedUpdate>,
    },

    /// The reference write committed but the derived flags were not refreshed.
    /// A repair pass over the planner restores them.
    #[error("failed to reconcile item {item_id} after {step}: {source}")]
    Reconciliation {
        item_id: i64,
        step: &'static str,
        #[source]
        source: DatabaseError,
    },

    #[error("store error: {0}")]
    Store(#[from] DatabaseError),
}

impl PlannerError {
    pub fn not_found(kind: EntityKind, id: i64) -> Self {
        PlannerError::NotFound { kind, id }
    }

    /// Ids that did not get written, when this is an aggregate failure.
    pub fn failed_ids(&self) -> Vec<i64> {
        match self {
            PlannerError::AggregateFailure { failed, .. } => {
                failed.iter().map(|failure| failure.id).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl From<ModelError> for PlannerError {
    fn from(value: ModelError) -> Self {
        PlannerError::ConstraintViolation(value.to_string())
    }
}

impl From<rusqlite::Error> for PlannerError {
    fn from(value: rusqlite::Error) -> Self {
        PlannerError::Store(DatabaseError::from(value))
    }
}

fn join_ids(failed: &[FailedUpdate]) -> String {
    failed
        .iter()
        .map(|failure| failure.id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_failure_lists_failed_ids() {
        let err = PlannerError::AggregateFailure {
            attempted: 3,
            failed: vec![
                FailedUpdate { id: 4, reason: "item not found: 4".into() },
                FailedUpdate { id: 9, reason: "item not found: 9".into() },
            ],
        };
        assert_eq!(err.to_string(), "2 of 3 updates failed (ids: 4, 9)");
        assert_eq!(err.failed_ids(), vec![4, 9]);
    }
}
