//! Adhera — reminder lifecycle & delivery engine for medication adherence.
//!
//! Expands a prescription's dosing schedule into discrete reminder
//! occurrences, drives per-reminder notification delivery with snoozing and
//! auto-expiry, and aggregates the resulting action ledger into adherence
//! reports. Durable storage and the push transport are trait seams
//! ([`store`], [`gateway`]); a SQLite store and an HTTP gateway ship as
//! reference collaborators.

pub mod adherence;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod models;
pub mod scanner;
pub mod schedule;
pub mod store;

pub use adherence::{ActionCounts, AdherenceStats, DailyAdherence};
pub use config::EngineConfig;
pub use dispatch::DispatchReport;
pub use engine::{ReminderEngine, TodaySummary};
pub use error::ReminderError;
pub use gateway::{BatchOutcome, HttpPushGateway, MockPushGateway, PushGateway, PushNotification};
pub use models::{
    ActionLogEntry, MealRelation, MedicineRegimen, MedicineTiming, Prescription,
    PrescriptionStatus, ReminderAction, ReminderOccurrence, ReminderStatus,
};
pub use scanner::{ScanReport, ScannerHandle};
pub use schedule::ExpansionOutcome;
pub use store::{PatientDirectory, ReminderStore, SqliteReminderStore, StoreError};

use tracing_subscriber::EnvFilter;

/// Initialize tracing for embedding applications that do not install their
/// own subscriber. Honors `RUST_LOG` when set.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();
}
