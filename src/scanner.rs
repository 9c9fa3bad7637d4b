//! Recurring due-reminder scan: the delivery driver and the missed sweep.
//!
//! One scan cycle finds eligible occurrences, hands them to the dispatcher,
//! then sweeps over-age `sent` occurrences into `missed`. Cycles are
//! single-flight: an overlapping trigger is dropped, not queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};

use crate::config::EngineConfig;
use crate::dispatch::NotificationDispatcher;
use crate::error::ReminderError;
use crate::store::ReminderStore;

/// Sleep granularity for shutdown responsiveness.
const SLEEP_GRANULARITY_SECS: u64 = 1;

/// Counts reported by one scan cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ScanReport {
    pub sent: u32,
    pub failed: u32,
    pub skipped_no_address: u32,
    /// Stale `sent` occurrences auto-resolved to `missed` by the sweep.
    pub expired_to_missed: u64,
}

/// The recurring driver behind reminder delivery.
pub struct DueReminderScanner {
    store: Arc<dyn ReminderStore>,
    dispatcher: Arc<NotificationDispatcher>,
    config: EngineConfig,
    in_flight: AtomicBool,
}

impl DueReminderScanner {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        dispatcher: Arc<NotificationDispatcher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run one scan cycle at `now`.
    ///
    /// Rejects overlap with `CycleInFlight`; manual invocations and the
    /// background driver share the same guard.
    pub fn run_cycle(&self, now: DateTime<Utc>) -> Result<ScanReport, ReminderError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ReminderError::CycleInFlight);
        }
        let result = self.cycle(now);
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    fn cycle(&self, now: DateTime<Utc>) -> Result<ScanReport, ReminderError> {
        let mut report = ScanReport::default();

        let due = self.store.due_for_notification(now)?;
        if !due.is_empty() {
            let dispatched = self.dispatcher.dispatch_due(&due, now)?;
            report.sent = dispatched.sent;
            report.failed = dispatched.failed;
            report.skipped_no_address = dispatched.skipped_no_address;
        }

        // The sweep runs every cycle, so a delivered-but-ignored reminder
        // always reaches a terminal state.
        let cutoff = now - Duration::hours(self.config.missed_after_hours);
        report.expired_to_missed = self.store.expire_stale_sent(cutoff, now)?;
        if report.expired_to_missed > 0 {
            tracing::info!(
                expired = report.expired_to_missed,
                "Auto-marked stale sent reminders as missed"
            );
        }

        Ok(report)
    }

    fn interval_secs(&self) -> u64 {
        self.config.scan_interval_secs.max(SLEEP_GRANULARITY_SECS)
    }
}

/// Handle for the background scan driver thread.
///
/// Supports graceful shutdown via `shutdown()` or automatic cleanup on
/// `Drop`. Keep it alive for as long as the engine should keep ticking.
pub struct ScannerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl ScannerHandle {
    /// Request graceful shutdown. A cycle in progress completes, no new
    /// cycle starts.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for ScannerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Start the recurring driver on a background thread.
pub fn start_scanner(scanner: Arc<DueReminderScanner>) -> ScannerHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();

    let handle = std::thread::spawn(move || {
        tracing::info!(
            interval_secs = scanner.interval_secs(),
            "Due-reminder scanner started"
        );
        scan_loop(&scanner, &flag);
    });

    ScannerHandle {
        shutdown,
        handle: Some(handle),
    }
}

fn scan_loop(scanner: &DueReminderScanner, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        // Sleep in small increments for responsive shutdown
        for _ in 0..(scanner.interval_secs() / SLEEP_GRANULARITY_SECS) {
            if shutdown.load(Ordering::Relaxed) {
                tracing::info!("Due-reminder scanner shutting down");
                return;
            }
            std::thread::sleep(StdDuration::from_secs(SLEEP_GRANULARITY_SECS));
        }

        match scanner.run_cycle(Utc::now()) {
            Ok(report) => {
                if report.sent > 0 || report.failed > 0 {
                    tracing::info!(
                        sent = report.sent,
                        failed = report.failed,
                        "Scan cycle completed"
                    );
                }
            }
            Err(ReminderError::CycleInFlight) => {
                tracing::debug!("Scan cycle already in flight, skipping tick");
            }
            // Any other cycle error is logged and swallowed so the driver
            // keeps ticking; pending occurrences retry next cycle.
            Err(e) => {
                tracing::error!(error = %e, "Scan cycle failed");
            }
        }
    }
    tracing::info!("Due-reminder scanner shutting down");
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;
    use crate::gateway::{MockBehavior, MockPushGateway};
    use crate::models::{MealRelation, ReminderOccurrence, ReminderStatus};
    use crate::store::SqliteReminderStore;

    fn at(h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 10, h, mi, 0).unwrap()
    }

    fn occurrence(
        patient_id: Uuid,
        scheduled: DateTime<Utc>,
        status: ReminderStatus,
    ) -> ReminderOccurrence {
        ReminderOccurrence {
            id: Uuid::new_v4(),
            patient_id,
            prescription_id: Uuid::new_v4(),
            medicine_id: Uuid::new_v4(),
            medicine_name: "Metformin".to_string(),
            dosage: "500mg".to_string(),
            instructions: None,
            meal_relation: MealRelation::Anytime,
            scheduled_time: scheduled,
            notify_time: scheduled - Duration::minutes(5),
            status,
            taken_at: None,
            missed_at: None,
            notification_sent: status == ReminderStatus::Sent,
            notification_sent_at: None,
            snooze_count: 0,
            snoozed_until: None,
        }
    }

    fn scanner_with(behavior: MockBehavior) -> (Arc<SqliteReminderStore>, DueReminderScanner) {
        let store = Arc::new(SqliteReminderStore::open_in_memory().unwrap());
        let gateway = Arc::new(MockPushGateway::with_behavior(behavior));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            store.clone(),
            gateway,
        ));
        let scanner = DueReminderScanner::new(store.clone(), dispatcher, EngineConfig::default());
        (store, scanner)
    }

    #[test]
    fn cycle_sends_due_occurrence() {
        let (store, scanner) = scanner_with(MockBehavior::Deliver);
        let patient = Uuid::new_v4();
        store.register_patient(patient, "Ama", Some("token-1")).unwrap();
        let occ = occurrence(patient, at(8, 0), ReminderStatus::Pending);
        store.insert_occurrences(std::slice::from_ref(&occ)).unwrap();

        let report = scanner.run_cycle(at(7, 56)).unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 0);
        let updated = store.occurrence(occ.id).unwrap().unwrap();
        assert_eq!(updated.status, ReminderStatus::Sent);
        assert!(updated.notification_sent);
    }

    #[test]
    fn cycle_without_due_occurrences_is_quiet() {
        let (_store, scanner) = scanner_with(MockBehavior::Deliver);
        let report = scanner.run_cycle(at(8, 0)).unwrap();
        assert_eq!(report, ScanReport::default());
    }

    #[test]
    fn sweep_expires_only_past_staleness_window() {
        let (store, scanner) = scanner_with(MockBehavior::Deliver);
        let patient = Uuid::new_v4();
        store.register_patient(patient, "Ama", Some("token-1")).unwrap();

        let now = at(12, 0);
        let stale = occurrence(patient, now - Duration::minutes(121), ReminderStatus::Sent);
        let almost = occurrence(patient, now - Duration::minutes(119), ReminderStatus::Sent);
        store.insert_occurrences(&[stale.clone(), almost.clone()]).unwrap();

        let report = scanner.run_cycle(now).unwrap();

        assert_eq!(report.expired_to_missed, 1);
        let missed = store.occurrence(stale.id).unwrap().unwrap();
        assert_eq!(missed.status, ReminderStatus::Missed);
        assert_eq!(missed.missed_at, Some(now));
        assert_eq!(
            store.occurrence(almost.id).unwrap().unwrap().status,
            ReminderStatus::Sent
        );
    }

    #[test]
    fn sweep_runs_even_when_nothing_is_due() {
        let (store, scanner) = scanner_with(MockBehavior::Deliver);
        let patient = Uuid::new_v4();
        let now = at(12, 0);
        let stale = occurrence(patient, now - Duration::hours(3), ReminderStatus::Sent);
        store.insert_occurrences(std::slice::from_ref(&stale)).unwrap();

        let report = scanner.run_cycle(now).unwrap();

        assert_eq!(report.sent, 0);
        assert_eq!(report.expired_to_missed, 1);
    }

    #[test]
    fn overlapping_cycle_is_rejected() {
        let (_store, scanner) = scanner_with(MockBehavior::Deliver);

        scanner.in_flight.store(true, Ordering::SeqCst);
        let result = scanner.run_cycle(at(8, 0));
        assert!(matches!(result, Err(ReminderError::CycleInFlight)));

        // Once the active cycle releases the guard, scans run again.
        scanner.in_flight.store(false, Ordering::SeqCst);
        assert!(scanner.run_cycle(at(8, 0)).is_ok());
    }

    #[test]
    fn guard_released_after_cycle() {
        let (_store, scanner) = scanner_with(MockBehavior::Deliver);
        scanner.run_cycle(at(8, 0)).unwrap();
        assert!(!scanner.in_flight.load(Ordering::SeqCst));
    }

    #[test]
    fn transport_failure_keeps_occurrence_eligible_for_next_cycle() {
        let (store, scanner) = scanner_with(MockBehavior::TransportDown);
        let patient = Uuid::new_v4();
        store.register_patient(patient, "Ama", Some("token-1")).unwrap();
        let occ = occurrence(patient, at(8, 0), ReminderStatus::Pending);
        store.insert_occurrences(std::slice::from_ref(&occ)).unwrap();

        let report = scanner.run_cycle(at(7, 56)).unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.failed, 1);

        // Next cycle still sees it.
        assert_eq!(store.due_for_notification(at(7, 57)).unwrap().len(), 1);
    }

    #[test]
    fn shutdown_flag_sets_atomic() {
        let handle = ScannerHandle {
            shutdown: Arc::new(AtomicBool::new(false)),
            handle: None,
        };
        assert!(!handle.shutdown.load(Ordering::Relaxed));
        handle.shutdown();
        assert!(handle.shutdown.load(Ordering::Relaxed));
    }

    #[test]
    fn interval_never_below_sleep_granularity() {
        let (_store, scanner) = scanner_with(MockBehavior::Deliver);
        assert_eq!(scanner.interval_secs(), 60);

        let store = Arc::new(SqliteReminderStore::open_in_memory().unwrap());
        let gateway = Arc::new(MockPushGateway::delivering());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            store.clone(),
            store.clone(),
            gateway,
        ));
        let config = EngineConfig {
            scan_interval_secs: 0,
            ..EngineConfig::default()
        };
        let tight = DueReminderScanner::new(store, dispatcher, config);
        assert_eq!(tight.interval_secs(), SLEEP_GRANULARITY_SECS);
    }
}
