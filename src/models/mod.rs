//! Domain model: prescriptions, reminder occurrences, and the action ledger.

pub mod action_log;
pub mod enums;
pub mod prescription;
pub mod reminder;

pub use action_log::{delay_minutes, ActionLogEntry, GeoPoint};
pub use enums::{DoseFrequency, MealRelation, PrescriptionStatus, ReminderAction, ReminderStatus};
pub use prescription::{MedicineRegimen, MedicineTiming, Prescription};
pub use reminder::ReminderOccurrence;
