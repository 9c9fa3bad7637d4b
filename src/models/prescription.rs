use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{DoseFrequency, MealRelation, PrescriptionStatus};

/// One wall-clock intake slot for a medicine (reference timezone: UTC).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicineTiming {
    pub time: NaiveTime,
    pub meal_relation: MealRelation,
}

/// One prescribed medicine within a prescription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicineRegimen {
    pub id: Uuid,
    pub name: String,
    pub dosage: String,
    pub frequency: DoseFrequency,
    pub timings: Vec<MedicineTiming>,
    pub duration_days: u32,
    pub instructions: Option<String>,
}

/// A prescribed regimen. Owned by the surrounding application; the engine
/// reads it during schedule expansion and never mutates it beyond the
/// `reminders_generated` guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prescription {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub diagnosis: String,
    pub medicines: Vec<MedicineRegimen>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: PrescriptionStatus,
    pub reminders_generated: bool,
}

impl Prescription {
    /// End date derived from the longest medicine course.
    pub fn end_date_from_medicines(
        start: DateTime<Utc>,
        medicines: &[MedicineRegimen],
    ) -> DateTime<Utc> {
        let max_days = medicines.iter().map(|m| m.duration_days).max().unwrap_or(0);
        start + Duration::days(i64::from(max_days))
    }
}
