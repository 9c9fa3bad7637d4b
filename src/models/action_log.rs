use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::ReminderAction;
use super::reminder::ReminderOccurrence;

/// Where the patient was when they acted, if the client shared it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Immutable record of one state transition — the append-only ledger the
/// adherence reports are computed from. Created exactly once per transition,
/// never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub reminder_id: Uuid,
    pub prescription_id: Uuid,
    pub medicine_name: String,
    pub dosage: String,
    /// The originally scheduled intake instant.
    pub scheduled_time: DateTime<Utc>,
    pub action: ReminderAction,
    pub action_time: DateTime<Utc>,
    /// Minutes between schedule and action; positive = late.
    pub delay_minutes: i64,
    pub notes: Option<String>,
    pub location: Option<GeoPoint>,
}

impl ActionLogEntry {
    /// Build the ledger entry for a transition on `occurrence`.
    pub fn record(
        occurrence: &ReminderOccurrence,
        action: ReminderAction,
        action_time: DateTime<Utc>,
        notes: Option<String>,
        location: Option<GeoPoint>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id: occurrence.patient_id,
            reminder_id: occurrence.id,
            prescription_id: occurrence.prescription_id,
            medicine_name: occurrence.medicine_name.clone(),
            dosage: occurrence.dosage.clone(),
            scheduled_time: occurrence.scheduled_time,
            action,
            action_time,
            delay_minutes: delay_minutes(occurrence.scheduled_time, action_time),
            notes,
            location,
        }
    }
}

/// Minutes between schedule and action, rounded to the nearest minute.
pub fn delay_minutes(scheduled: DateTime<Utc>, actioned: DateTime<Utc>) -> i64 {
    let seconds = (actioned - scheduled).num_seconds();
    (seconds as f64 / 60.0).round() as i64
}
