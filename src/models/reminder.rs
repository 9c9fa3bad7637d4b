use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{MealRelation, ReminderStatus};

/// One concrete instance of "take medicine X at time T", derived from a
/// prescription's recurring schedule.
///
/// Medicine name, dosage and instructions are snapshots taken at generation
/// time; later regimen edits do not rewrite history. Occurrences are never
/// physically deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderOccurrence {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub prescription_id: Uuid,
    /// The medicine entry within the prescription this occurrence came from.
    pub medicine_id: Uuid,
    pub medicine_name: String,
    pub dosage: String,
    pub instructions: Option<String>,
    pub meal_relation: MealRelation,
    /// The intended intake instant.
    pub scheduled_time: DateTime<Utc>,
    /// When the notification fires; never after `scheduled_time` except
    /// through an explicit snooze.
    pub notify_time: DateTime<Utc>,
    pub status: ReminderStatus,
    pub taken_at: Option<DateTime<Utc>>,
    pub missed_at: Option<DateTime<Utc>>,
    pub notification_sent: bool,
    pub notification_sent_at: Option<DateTime<Utc>>,
    /// 0..=3; the fourth snooze attempt is rejected.
    pub snooze_count: u32,
    pub snoozed_until: Option<DateTime<Utc>>,
}

impl ReminderOccurrence {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// True while an active snooze is still holding the notification back.
    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snoozed_until.is_some_and(|until| until > now)
    }
}
