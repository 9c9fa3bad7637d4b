//! Top-level facade wiring the engine components together.
//!
//! The surrounding application constructs one [`ReminderEngine`] per store
//! and calls it from its request handlers; the background driver returned
//! by [`ReminderEngine::start_scanner`] runs the recurring scan.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adherence::{self, AdherenceStats, DailyAdherence};
use crate::config::EngineConfig;
use crate::dispatch::NotificationDispatcher;
use crate::error::ReminderError;
use crate::gateway::{BatchOutcome, PushGateway};
use crate::lifecycle::ReminderLifecycle;
use crate::models::{GeoPoint, Prescription, ReminderOccurrence, ReminderStatus};
use crate::scanner::{start_scanner, DueReminderScanner, ScanReport, ScannerHandle};
use crate::schedule::{expand_occurrences, ExpansionOutcome};
use crate::store::{PatientDirectory, ReminderStore, TimeWindow};

/// Today's occurrences bucketed by their current state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TodaySummary {
    pub total: u32,
    pub taken: u32,
    pub missed: u32,
    pub pending: u32,
    pub snoozed: u32,
}

/// The reminder lifecycle & delivery engine.
pub struct ReminderEngine {
    store: Arc<dyn ReminderStore>,
    lifecycle: ReminderLifecycle,
    dispatcher: Arc<NotificationDispatcher>,
    scanner: Arc<DueReminderScanner>,
    config: EngineConfig,
}

impl ReminderEngine {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        directory: Arc<dyn PatientDirectory>,
        gateway: Arc<dyn PushGateway>,
        config: EngineConfig,
    ) -> Self {
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            directory,
            gateway,
        ));
        let scanner = Arc::new(DueReminderScanner::new(
            store.clone(),
            dispatcher.clone(),
            config.clone(),
        ));
        let lifecycle = ReminderLifecycle::new(store.clone(), config.clone());
        Self {
            store,
            lifecycle,
            dispatcher,
            scanner,
            config,
        }
    }

    // ═══════════════════════════════════════════
    // Schedule expansion
    // ═══════════════════════════════════════════

    /// Expand a prescription's schedule into stored occurrences.
    ///
    /// Idempotent: a second call on an already-expanded prescription is a
    /// successful no-op.
    pub fn expand_schedule(
        &self,
        prescription: &Prescription,
    ) -> Result<ExpansionOutcome, ReminderError> {
        self.expand_schedule_at(prescription, Utc::now())
    }

    pub fn expand_schedule_at(
        &self,
        prescription: &Prescription,
        now: DateTime<Utc>,
    ) -> Result<ExpansionOutcome, ReminderError> {
        if prescription.reminders_generated {
            warn!(
                prescription_id = %prescription.id,
                "Reminders already generated, skipping expansion"
            );
            return Ok(ExpansionOutcome::AlreadyExpanded);
        }

        let lead = Duration::minutes(self.config.notify_lead_minutes);
        let occurrences = expand_occurrences(prescription, now, lead);
        if !occurrences.is_empty() {
            self.store.insert_occurrences(&occurrences)?;
        }
        self.store.set_reminders_generated(prescription.id)?;
        info!(
            prescription_id = %prescription.id,
            count = occurrences.len(),
            "Generated reminder occurrences"
        );
        Ok(ExpansionOutcome::Generated(occurrences.len()))
    }

    // ═══════════════════════════════════════════
    // Patient actions
    // ═══════════════════════════════════════════

    pub fn mark_taken(
        &self,
        id: Uuid,
        notes: Option<String>,
        location: Option<GeoPoint>,
    ) -> Result<ReminderOccurrence, ReminderError> {
        self.lifecycle.mark_taken(id, notes, location, Utc::now())
    }

    pub fn mark_taken_at(
        &self,
        id: Uuid,
        notes: Option<String>,
        location: Option<GeoPoint>,
        now: DateTime<Utc>,
    ) -> Result<ReminderOccurrence, ReminderError> {
        self.lifecycle.mark_taken(id, notes, location, now)
    }

    pub fn mark_missed(
        &self,
        id: Uuid,
        notes: Option<String>,
    ) -> Result<ReminderOccurrence, ReminderError> {
        self.lifecycle.mark_missed(id, notes, Utc::now())
    }

    pub fn mark_missed_at(
        &self,
        id: Uuid,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ReminderOccurrence, ReminderError> {
        self.lifecycle.mark_missed(id, notes, now)
    }

    pub fn snooze(
        &self,
        id: Uuid,
        minutes: Option<i64>,
    ) -> Result<ReminderOccurrence, ReminderError> {
        self.lifecycle.snooze(id, minutes, Utc::now())
    }

    pub fn snooze_at(
        &self,
        id: Uuid,
        minutes: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<ReminderOccurrence, ReminderError> {
        self.lifecycle.snooze(id, minutes, now)
    }

    /// Skip a prescription's remaining future reminders (cancelled/paused).
    pub fn bulk_skip(&self, prescription_id: Uuid, reason: &str) -> Result<u64, ReminderError> {
        self.lifecycle.bulk_skip(prescription_id, reason, Utc::now())
    }

    pub fn bulk_skip_at(
        &self,
        prescription_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, ReminderError> {
        self.lifecycle.bulk_skip(prescription_id, reason, now)
    }

    // ═══════════════════════════════════════════
    // Scanning
    // ═══════════════════════════════════════════

    /// Run one scan cycle on demand (operational tooling and tests). Shares
    /// the single-flight guard with the background driver.
    pub fn run_scan_cycle(&self) -> Result<ScanReport, ReminderError> {
        self.scanner.run_cycle(Utc::now())
    }

    pub fn run_scan_cycle_at(&self, now: DateTime<Utc>) -> Result<ScanReport, ReminderError> {
        self.scanner.run_cycle(now)
    }

    /// Start the recurring background driver. Dropping the handle stops it.
    pub fn start_scanner(&self) -> ScannerHandle {
        start_scanner(self.scanner.clone())
    }

    // ═══════════════════════════════════════════
    // Reporting
    // ═══════════════════════════════════════════

    pub fn stats_for_window(
        &self,
        patient_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AdherenceStats, ReminderError> {
        let logs = self.store.logs_for_patient(patient_id, TimeWindow { start, end })?;
        Ok(adherence::summarize(&logs))
    }

    pub fn daily_breakdown(
        &self,
        patient_id: Uuid,
        last_n_days: u32,
    ) -> Result<Vec<DailyAdherence>, ReminderError> {
        self.daily_breakdown_at(patient_id, last_n_days, Utc::now())
    }

    pub fn daily_breakdown_at(
        &self,
        patient_id: Uuid,
        last_n_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<DailyAdherence>, ReminderError> {
        let window = TimeWindow {
            start: now - Duration::days(i64::from(last_n_days)),
            end: now,
        };
        let logs = self.store.logs_for_patient(patient_id, window)?;
        Ok(adherence::daily_breakdown(&logs))
    }

    /// Today's occurrences bucketed by state (UTC calendar day).
    pub fn today_summary(&self, patient_id: Uuid) -> Result<TodaySummary, ReminderError> {
        self.today_summary_at(patient_id, Utc::now())
    }

    pub fn today_summary_at(
        &self,
        patient_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TodaySummary, ReminderError> {
        let midnight = Utc
            .from_utc_datetime(&now.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default());
        let window = TimeWindow {
            start: midnight,
            end: midnight + Duration::days(1),
        };
        let occurrences = self.store.occurrences_for_patient(patient_id, window, None)?;

        let mut summary = TodaySummary {
            total: occurrences.len() as u32,
            ..TodaySummary::default()
        };
        for occ in &occurrences {
            match occ.status {
                ReminderStatus::Taken => summary.taken += 1,
                ReminderStatus::Missed => summary.missed += 1,
                _ if occ.is_snoozed(now) => summary.snoozed += 1,
                _ => summary.pending += 1,
            }
        }
        Ok(summary)
    }

    /// Open (`pending`/`sent`) occurrences within the next `hours`.
    pub fn upcoming_reminders(
        &self,
        patient_id: Uuid,
        hours: i64,
    ) -> Result<Vec<ReminderOccurrence>, ReminderError> {
        self.upcoming_reminders_at(patient_id, hours, Utc::now())
    }

    pub fn upcoming_reminders_at(
        &self,
        patient_id: Uuid,
        hours: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderOccurrence>, ReminderError> {
        let window = TimeWindow {
            start: now,
            end: now + Duration::hours(hours),
        };
        let statuses = [ReminderStatus::Pending, ReminderStatus::Sent];
        Ok(self
            .store
            .occurrences_for_patient(patient_id, window, Some(&statuses))?)
    }

    /// Windowed occurrence listing, optionally restricted to one status.
    pub fn reminders_in_range(
        &self,
        patient_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        status: Option<ReminderStatus>,
    ) -> Result<Vec<ReminderOccurrence>, ReminderError> {
        let statuses = status.map(|s| [s]);
        Ok(self.store.occurrences_for_patient(
            patient_id,
            TimeWindow { start, end },
            statuses.as_ref().map(|s| s.as_slice()),
        )?)
    }

    /// One-off notification to a single patient.
    pub fn send_custom_notification(
        &self,
        patient_id: Uuid,
        title: &str,
        body: &str,
        data: serde_json::Value,
    ) -> Result<BatchOutcome, ReminderError> {
        self.dispatcher.send_custom(patient_id, title, body, data)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;
    use crate::gateway::MockPushGateway;
    use crate::models::{
        DoseFrequency, MealRelation, MedicineRegimen, MedicineTiming, PrescriptionStatus,
    };
    use crate::store::SqliteReminderStore;

    fn at(d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, d, h, mi, 0).unwrap()
    }

    struct Fixture {
        store: Arc<SqliteReminderStore>,
        engine: ReminderEngine,
        patient_id: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteReminderStore::open_in_memory().unwrap());
        let gateway = Arc::new(MockPushGateway::delivering());
        let engine = ReminderEngine::new(
            store.clone(),
            store.clone(),
            gateway,
            EngineConfig::default(),
        );
        let patient_id = Uuid::new_v4();
        store
            .register_patient(patient_id, "Ama Mensah", Some("token-1"))
            .unwrap();
        Fixture {
            store,
            engine,
            patient_id,
        }
    }

    fn prescription(patient_id: Uuid, start: DateTime<Utc>, duration_days: u32) -> Prescription {
        let medicines = vec![MedicineRegimen {
            id: Uuid::new_v4(),
            name: "Amoxicillin".to_string(),
            dosage: "250mg".to_string(),
            frequency: DoseFrequency::OnceDaily,
            timings: vec![MedicineTiming {
                time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                meal_relation: MealRelation::AfterMeal,
            }],
            duration_days,
            instructions: None,
        }];
        let end_date = Prescription::end_date_from_medicines(start, &medicines);
        Prescription {
            id: Uuid::new_v4(),
            patient_id,
            doctor_id: Uuid::new_v4(),
            diagnosis: "Sinusitis".to_string(),
            medicines,
            start_date: start,
            end_date,
            status: PrescriptionStatus::Active,
            reminders_generated: false,
        }
    }

    #[test]
    fn expansion_is_idempotent() {
        let f = fixture();
        let rx = prescription(f.patient_id, at(10, 0, 0), 3);
        f.store.register_prescription(&rx).unwrap();

        let now = at(10, 7, 0);
        let first = f.engine.expand_schedule_at(&rx, now).unwrap();
        assert_eq!(first, ExpansionOutcome::Generated(3));

        // The stored guard is now set; a caller re-reading the prescription
        // sees the flag and the second expansion is a no-op.
        let mut reloaded = rx.clone();
        reloaded.reminders_generated = true;
        let second = f.engine.expand_schedule_at(&reloaded, now).unwrap();
        assert_eq!(second, ExpansionOutcome::AlreadyExpanded);

        let window = TimeWindow {
            start: at(10, 0, 0),
            end: at(14, 0, 0),
        };
        let stored = f
            .store
            .occurrences_for_patient(f.patient_id, window, None)
            .unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[test]
    fn expansion_of_elapsed_prescription_stores_nothing() {
        let f = fixture();
        let rx = prescription(f.patient_id, at(1, 0, 0), 2);
        f.store.register_prescription(&rx).unwrap();

        let outcome = f.engine.expand_schedule_at(&rx, at(20, 0, 0)).unwrap();
        assert_eq!(outcome, ExpansionOutcome::Generated(0));
    }

    #[test]
    fn full_cycle_expand_send_take_report() {
        let f = fixture();
        let rx = prescription(f.patient_id, at(10, 0, 0), 3);
        f.store.register_prescription(&rx).unwrap();
        f.engine.expand_schedule_at(&rx, at(10, 7, 0)).unwrap();

        // 07:55 is the notify lead for the 08:00 slot.
        let report = f.engine.run_scan_cycle_at(at(10, 7, 55)).unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 0);

        let sent = f
            .engine
            .upcoming_reminders_at(f.patient_id, 24, at(10, 7, 56))
            .unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].status, ReminderStatus::Sent);

        f.engine
            .mark_taken_at(sent[0].id, None, None, at(10, 8, 4))
            .unwrap();

        let stats = f
            .engine
            .stats_for_window(f.patient_id, at(10, 0, 0), at(11, 0, 0))
            .unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.counts.taken, 1);
        assert_eq!(stats.adherence_rate, 100);
    }

    #[test]
    fn scan_then_ignore_resolves_to_missed_and_reports() {
        let f = fixture();
        let rx = prescription(f.patient_id, at(10, 0, 0), 1);
        f.store.register_prescription(&rx).unwrap();
        f.engine.expand_schedule_at(&rx, at(10, 7, 0)).unwrap();

        f.engine.run_scan_cycle_at(at(10, 7, 55)).unwrap();
        // Two hours past the 08:00 schedule, the sweep expires it.
        let late = f.engine.run_scan_cycle_at(at(10, 10, 1)).unwrap();
        assert_eq!(late.expired_to_missed, 1);

        let summary = f.engine.today_summary_at(f.patient_id, at(10, 10, 2)).unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.missed, 1);
    }

    #[test]
    fn today_summary_buckets_by_state() {
        let f = fixture();
        let rx = prescription(f.patient_id, at(10, 0, 0), 1);
        let mut medicines = rx.medicines.clone();
        medicines[0].timings = vec![
            MedicineTiming {
                time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                meal_relation: MealRelation::Anytime,
            },
            MedicineTiming {
                time: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
                meal_relation: MealRelation::Anytime,
            },
            MedicineTiming {
                time: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
                meal_relation: MealRelation::Anytime,
            },
        ];
        let rx = Prescription { medicines, ..rx };
        f.store.register_prescription(&rx).unwrap();
        f.engine.expand_schedule_at(&rx, at(10, 6, 0)).unwrap();

        let occurrences = f
            .store
            .occurrences_for_patient(
                f.patient_id,
                TimeWindow {
                    start: at(10, 0, 0),
                    end: at(11, 0, 0),
                },
                None,
            )
            .unwrap();
        assert_eq!(occurrences.len(), 3);

        let now = at(10, 9, 0);
        f.engine
            .mark_taken_at(occurrences[0].id, None, None, at(10, 8, 2))
            .unwrap();
        f.engine
            .snooze_at(occurrences[1].id, Some(30), now)
            .unwrap();

        let summary = f.engine.today_summary_at(f.patient_id, now).unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.taken, 1);
        assert_eq!(summary.snoozed, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.missed, 0);
    }

    #[test]
    fn daily_breakdown_spans_requested_days() {
        let f = fixture();
        let rx = prescription(f.patient_id, at(8, 0, 0), 3);
        f.store.register_prescription(&rx).unwrap();
        f.engine.expand_schedule_at(&rx, at(8, 6, 0)).unwrap();

        let occurrences = f
            .store
            .occurrences_for_patient(
                f.patient_id,
                TimeWindow {
                    start: at(8, 0, 0),
                    end: at(12, 0, 0),
                },
                None,
            )
            .unwrap();
        assert_eq!(occurrences.len(), 3);

        f.engine
            .mark_taken_at(occurrences[0].id, None, None, at(8, 8, 5))
            .unwrap();
        f.engine
            .mark_missed_at(occurrences[1].id, None, at(9, 10, 0))
            .unwrap();

        let days = f
            .engine
            .daily_breakdown_at(f.patient_id, 7, at(11, 0, 0))
            .unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].taken, 1);
        assert_eq!(days[1].missed, 1);
    }

    #[test]
    fn manual_cycle_shares_single_flight_guard() {
        let f = fixture();
        // Nothing scheduled: the cycle is a quiet no-op but still exercises
        // the guard acquire/release.
        assert!(f.engine.run_scan_cycle_at(at(10, 8, 0)).is_ok());
        assert!(f.engine.run_scan_cycle_at(at(10, 8, 1)).is_ok());
    }
}
