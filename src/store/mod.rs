//! Storage seams: the durable reminder store and the patient push directory.
//!
//! The engine owns no persistence of its own — it talks to whatever the
//! surrounding application provides through these traits. A SQLite-backed
//! reference implementation ships in [`sqlite`].

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ActionLogEntry, ReminderOccurrence, ReminderStatus};

pub mod sqlite;

pub use sqlite::SqliteReminderStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Inclusive-start, exclusive-end query window.
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The write applied by a conditional state transition.
///
/// Closed set: every legal per-occurrence mutation after creation is one of
/// these. `Snoozed` carries the post-increment count; the store applies it
/// only when the stored count is exactly `count - 1`, so racing snoozes
/// cannot collapse into one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransitionEffect {
    Taken { at: DateTime<Utc> },
    Missed { at: DateTime<Utc> },
    Skipped,
    Snoozed { until: DateTime<Utc>, count: u32 },
}

/// Durable keyed storage for reminder occurrences and the action ledger.
pub trait ReminderStore: Send + Sync {
    /// Bulk-insert freshly expanded occurrences in one transaction.
    fn insert_occurrences(&self, occurrences: &[ReminderOccurrence]) -> Result<(), StoreError>;

    fn occurrence(&self, id: Uuid) -> Result<Option<ReminderOccurrence>, StoreError>;

    /// Conditionally apply `effect` when the stored status is one of
    /// `expected`, appending `log` in the same transaction. Returns the
    /// updated occurrence, or `None` when the precondition did not hold
    /// (including an unknown id — callers disambiguate via [`Self::occurrence`]).
    fn apply_transition(
        &self,
        id: Uuid,
        expected: &[ReminderStatus],
        effect: &TransitionEffect,
        log: Option<&ActionLogEntry>,
    ) -> Result<Option<ReminderOccurrence>, StoreError>;

    /// Occurrences eligible for notification at `now`: notify time reached,
    /// not yet notified, still pending, and not held back by a snooze.
    /// Sorted ascending by notify time.
    fn due_for_notification(&self, now: DateTime<Utc>) -> Result<Vec<ReminderOccurrence>, StoreError>;

    /// Bulk `pending → sent` for an attempted notification batch. Returns
    /// the number of occurrences updated.
    fn mark_notified(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Bulk `sent → missed` for occurrences scheduled before
    /// `scheduled_before`, stamping `missed_at = at`.
    fn expire_stale_sent(
        &self,
        scheduled_before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Bulk `{pending, sent} → skipped` for a prescription's occurrences
    /// scheduled after `after`. Past occurrences are left untouched.
    fn skip_pending_for_prescription(
        &self,
        prescription_id: Uuid,
        after: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Flip the prescription's expansion guard.
    fn set_reminders_generated(&self, prescription_id: Uuid) -> Result<(), StoreError>;

    /// Windowed listing for a patient, optionally restricted to `statuses`,
    /// ascending by scheduled time.
    fn occurrences_for_patient(
        &self,
        patient_id: Uuid,
        window: TimeWindow,
        statuses: Option<&[ReminderStatus]>,
    ) -> Result<Vec<ReminderOccurrence>, StoreError>;

    /// Action-log slice for adherence reporting, ascending by action time.
    fn logs_for_patient(
        &self,
        patient_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<ActionLogEntry>, StoreError>;
}

/// Lookup of a patient's registered push address.
pub trait PatientDirectory: Send + Sync {
    /// `None` when the patient has no deliverable address.
    fn push_address(&self, patient_id: Uuid) -> Result<Option<String>, StoreError>;
}
