//! Legal status transitions and the side effects they trigger.
//!
//! Every per-occurrence transition is a conditional update keyed by the
//! expected current status, with the ledger entry appended in the same
//! store transaction. When two writers race, the loser's precondition fails
//! and is reported as a state error — never as corrupted state.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::ReminderError;
use crate::models::{ActionLogEntry, GeoPoint, ReminderAction, ReminderOccurrence, ReminderStatus};
use crate::store::{ReminderStore, TransitionEffect};

/// Drives the per-reminder state machine over the store.
pub struct ReminderLifecycle {
    store: Arc<dyn ReminderStore>,
    config: EngineConfig,
}

impl ReminderLifecycle {
    pub fn new(store: Arc<dyn ReminderStore>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Mark an occurrence as taken.
    ///
    /// Legal from every status except `taken` — a patient confirming an
    /// intake always wins, even over an earlier auto-expiry to `missed`.
    /// A second confirmation fails with `AlreadyCompleted`.
    pub fn mark_taken(
        &self,
        id: Uuid,
        notes: Option<String>,
        location: Option<GeoPoint>,
        now: DateTime<Utc>,
    ) -> Result<ReminderOccurrence, ReminderError> {
        let current = self.require(id)?;
        if current.status == ReminderStatus::Taken {
            return Err(ReminderError::AlreadyCompleted(id));
        }

        let log = ActionLogEntry::record(&current, ReminderAction::Taken, now, notes, location);
        let expected = [
            ReminderStatus::Pending,
            ReminderStatus::Sent,
            ReminderStatus::Missed,
            ReminderStatus::Skipped,
        ];
        match self.store.apply_transition(
            id,
            &expected,
            &TransitionEffect::Taken { at: now },
            Some(&log),
        )? {
            Some(updated) => {
                info!(reminder_id = %id, delay_minutes = log.delay_minutes, "Reminder marked as taken");
                Ok(updated)
            }
            None => {
                // Raced: the occurrence reached `taken` between read and write.
                self.require(id)?;
                Err(ReminderError::AlreadyCompleted(id))
            }
        }
    }

    /// Mark an occurrence as missed. Legal from any non-terminal status.
    pub fn mark_missed(
        &self,
        id: Uuid,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ReminderOccurrence, ReminderError> {
        let current = self.require(id)?;
        if current.is_terminal() {
            return Err(ReminderError::AlreadyCompleted(id));
        }

        let log = ActionLogEntry::record(&current, ReminderAction::Missed, now, notes, None);
        let expected = [
            ReminderStatus::Pending,
            ReminderStatus::Sent,
            ReminderStatus::Skipped,
        ];
        match self.store.apply_transition(
            id,
            &expected,
            &TransitionEffect::Missed { at: now },
            Some(&log),
        )? {
            Some(updated) => {
                info!(reminder_id = %id, "Reminder marked as missed");
                Ok(updated)
            }
            None => {
                self.require(id)?;
                Err(ReminderError::AlreadyCompleted(id))
            }
        }
    }

    /// Re-arm an occurrence's notification by `minutes` (default from
    /// config). The status itself does not change: a not-yet-sent
    /// occurrence re-delivers through the scanner once the snooze elapses,
    /// an already-sent one resolves through the missed sweep.
    pub fn snooze(
        &self,
        id: Uuid,
        minutes: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<ReminderOccurrence, ReminderError> {
        let minutes = minutes.unwrap_or(self.config.snooze_minutes);
        let current = self.require(id)?;
        if current.is_terminal() {
            return Err(ReminderError::InvalidState {
                id,
                status: current.status,
            });
        }
        if current.snooze_count >= self.config.max_snoozes {
            return Err(ReminderError::SnoozeLimitExceeded(id));
        }

        let until = now + Duration::minutes(minutes);
        let count = current.snooze_count + 1;
        let log = ActionLogEntry::record(
            &current,
            ReminderAction::Snoozed,
            now,
            Some(format!("Snoozed for {minutes} minutes")),
            None,
        );
        let expected = [
            ReminderStatus::Pending,
            ReminderStatus::Sent,
            ReminderStatus::Skipped,
        ];
        match self.store.apply_transition(
            id,
            &expected,
            &TransitionEffect::Snoozed { until, count },
            Some(&log),
        )? {
            Some(updated) => {
                info!(reminder_id = %id, snooze_count = count, minutes, "Reminder snoozed");
                Ok(updated)
            }
            None => {
                let fresh = self.require(id)?;
                if fresh.is_terminal() {
                    Err(ReminderError::InvalidState {
                        id,
                        status: fresh.status,
                    })
                } else {
                    Err(ReminderError::SnoozeLimitExceeded(id))
                }
            }
        }
    }

    /// Administrative skip of a prescription's remaining schedule (the
    /// prescription was cancelled or paused). Only future `pending`/`sent`
    /// occurrences are touched; history stays intact. Bulk operation — no
    /// per-occurrence ledger entries.
    pub fn bulk_skip(
        &self,
        prescription_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, ReminderError> {
        let skipped = self
            .store
            .skip_pending_for_prescription(prescription_id, now)?;
        info!(
            prescription_id = %prescription_id,
            skipped,
            reason,
            "Bulk-skipped future reminders"
        );
        Ok(skipped)
    }

    fn require(&self, id: Uuid) -> Result<ReminderOccurrence, ReminderError> {
        self.store
            .occurrence(id)?
            .ok_or(ReminderError::NotFound {
                entity: "reminder",
                id: id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::models::MealRelation;
    use crate::store::{SqliteReminderStore, TimeWindow};

    fn at(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 10, h, mi, 0).unwrap()
    }

    fn setup(status: ReminderStatus) -> (Arc<SqliteReminderStore>, ReminderOccurrence) {
        let store = Arc::new(SqliteReminderStore::open_in_memory().unwrap());
        let scheduled = at(8, 0);
        let occ = ReminderOccurrence {
            id: Uuid::new_v4(),
            patient_id: Uuid::new_v4(),
            prescription_id: Uuid::new_v4(),
            medicine_id: Uuid::new_v4(),
            medicine_name: "Metformin".to_string(),
            dosage: "500mg".to_string(),
            instructions: None,
            meal_relation: MealRelation::WithMeal,
            scheduled_time: scheduled,
            notify_time: scheduled - Duration::minutes(5),
            status,
            taken_at: None,
            missed_at: None,
            notification_sent: status == ReminderStatus::Sent,
            notification_sent_at: None,
            snooze_count: 0,
            snoozed_until: None,
        };
        store.insert_occurrences(std::slice::from_ref(&occ)).unwrap();
        (store, occ)
    }

    fn lifecycle(store: Arc<SqliteReminderStore>) -> ReminderLifecycle {
        ReminderLifecycle::new(store, EngineConfig::default())
    }

    fn patient_logs(store: &SqliteReminderStore, patient_id: Uuid) -> Vec<ActionLogEntry> {
        store
            .logs_for_patient(
                patient_id,
                TimeWindow {
                    start: at(0, 0),
                    end: at(23, 59),
                },
            )
            .unwrap()
    }

    #[test]
    fn mark_taken_from_sent() {
        let (store, occ) = setup(ReminderStatus::Sent);
        let lc = lifecycle(store.clone());

        let updated = lc.mark_taken(occ.id, None, None, at(8, 10)).unwrap();
        assert_eq!(updated.status, ReminderStatus::Taken);
        assert_eq!(updated.taken_at, Some(at(8, 10)));

        let logs = patient_logs(&store, occ.patient_id);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, ReminderAction::Taken);
        assert_eq!(logs[0].delay_minutes, 10);
    }

    #[test]
    fn mark_taken_twice_fails() {
        let (store, occ) = setup(ReminderStatus::Sent);
        let lc = lifecycle(store);

        lc.mark_taken(occ.id, None, None, at(8, 10)).unwrap();
        let second = lc.mark_taken(occ.id, None, None, at(8, 20));
        assert!(matches!(second, Err(ReminderError::AlreadyCompleted(_))));
    }

    #[test]
    fn mark_taken_after_missed_wins() {
        // An auto-expired reminder can still be confirmed by the patient.
        let (store, occ) = setup(ReminderStatus::Sent);
        let lc = lifecycle(store);

        lc.mark_missed(occ.id, None, at(10, 30)).unwrap();
        let updated = lc.mark_taken(occ.id, None, None, at(10, 45)).unwrap();
        assert_eq!(updated.status, ReminderStatus::Taken);
    }

    #[test]
    fn mark_taken_unknown_id() {
        let (store, _) = setup(ReminderStatus::Pending);
        let lc = lifecycle(store);
        let result = lc.mark_taken(Uuid::new_v4(), None, None, at(8, 0));
        assert!(matches!(result, Err(ReminderError::NotFound { .. })));
    }

    #[test]
    fn mark_missed_from_pending() {
        let (store, occ) = setup(ReminderStatus::Pending);
        let lc = lifecycle(store.clone());

        let updated = lc
            .mark_missed(occ.id, Some("was asleep".to_string()), at(9, 0))
            .unwrap();
        assert_eq!(updated.status, ReminderStatus::Missed);
        assert_eq!(updated.missed_at, Some(at(9, 0)));

        let logs = patient_logs(&store, occ.patient_id);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, ReminderAction::Missed);
        assert_eq!(logs[0].notes.as_deref(), Some("was asleep"));
    }

    #[test]
    fn mark_missed_on_terminal_fails() {
        let (store, occ) = setup(ReminderStatus::Sent);
        let lc = lifecycle(store);

        lc.mark_taken(occ.id, None, None, at(8, 5)).unwrap();
        let result = lc.mark_missed(occ.id, None, at(9, 0));
        assert!(matches!(result, Err(ReminderError::AlreadyCompleted(_))));
    }

    #[test]
    fn snooze_rearms_notification() {
        let (store, occ) = setup(ReminderStatus::Pending);
        let lc = lifecycle(store.clone());

        let updated = lc.snooze(occ.id, None, at(7, 56)).unwrap();
        assert_eq!(updated.snooze_count, 1);
        assert_eq!(updated.snoozed_until, Some(at(8, 11)));
        assert_eq!(updated.notify_time, at(8, 11));
        assert!(!updated.notification_sent);
        assert_eq!(updated.status, ReminderStatus::Pending);

        let logs = patient_logs(&store, occ.patient_id);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, ReminderAction::Snoozed);
        assert_eq!(logs[0].notes.as_deref(), Some("Snoozed for 15 minutes"));
    }

    #[test]
    fn snooze_keeps_sent_status() {
        let (store, occ) = setup(ReminderStatus::Sent);
        let lc = lifecycle(store);

        let updated = lc.snooze(occ.id, Some(10), at(8, 2)).unwrap();
        assert_eq!(updated.status, ReminderStatus::Sent);
        assert_eq!(updated.snoozed_until, Some(at(8, 12)));
        assert!(!updated.notification_sent);
    }

    #[test]
    fn fourth_snooze_is_rejected_and_leaves_occurrence_unchanged() {
        let (store, occ) = setup(ReminderStatus::Pending);
        let lc = lifecycle(store.clone());

        lc.snooze(occ.id, Some(15), at(7, 0)).unwrap();
        lc.snooze(occ.id, Some(15), at(7, 20)).unwrap();
        let third = lc.snooze(occ.id, Some(15), at(7, 40)).unwrap();
        assert_eq!(third.snooze_count, 3);

        let fourth = lc.snooze(occ.id, Some(15), at(8, 0));
        assert!(matches!(fourth, Err(ReminderError::SnoozeLimitExceeded(_))));

        let unchanged = store.occurrence(occ.id).unwrap().unwrap();
        assert_eq!(unchanged.snooze_count, 3);
        assert_eq!(unchanged.snoozed_until, third.snoozed_until);
        // Only the three successful snoozes reached the ledger.
        assert_eq!(patient_logs(&store, occ.patient_id).len(), 3);
    }

    #[test]
    fn snooze_on_taken_is_invalid_state() {
        let (store, occ) = setup(ReminderStatus::Sent);
        let lc = lifecycle(store);

        lc.mark_taken(occ.id, None, None, at(8, 5)).unwrap();
        let result = lc.snooze(occ.id, None, at(8, 10));
        assert!(matches!(
            result,
            Err(ReminderError::InvalidState {
                status: ReminderStatus::Taken,
                ..
            })
        ));
    }

    #[test]
    fn bulk_skip_reports_count() {
        let store = Arc::new(SqliteReminderStore::open_in_memory().unwrap());
        let lc = lifecycle(store.clone());
        let patient = Uuid::new_v4();
        let rx = Uuid::new_v4();
        let now = at(12, 0);

        let mut occurrences = Vec::new();
        for offset in [-2i64, 1, 3] {
            let scheduled = now + Duration::hours(offset);
            occurrences.push(ReminderOccurrence {
                id: Uuid::new_v4(),
                patient_id: patient,
                prescription_id: rx,
                medicine_id: Uuid::new_v4(),
                medicine_name: "Metformin".to_string(),
                dosage: "500mg".to_string(),
                instructions: None,
                meal_relation: MealRelation::Anytime,
                scheduled_time: scheduled,
                notify_time: scheduled - Duration::minutes(5),
                status: ReminderStatus::Pending,
                taken_at: None,
                missed_at: None,
                notification_sent: false,
                notification_sent_at: None,
                snooze_count: 0,
                snoozed_until: None,
            });
        }
        store.insert_occurrences(&occurrences).unwrap();

        let skipped = lc.bulk_skip(rx, "prescription cancelled", now).unwrap();
        assert_eq!(skipped, 2);
        // Bulk skips write no ledger entries.
        assert!(patient_logs(&store, patient).is_empty());
    }
}
