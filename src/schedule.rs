//! Expansion of a prescription's dosing schedule into reminder occurrences.

use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use uuid::Uuid;

use crate::models::{Prescription, ReminderOccurrence, ReminderStatus};

/// Result of a schedule expansion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionOutcome {
    /// Occurrences were generated and persisted (possibly zero for a
    /// prescription entirely in the past).
    Generated(usize),
    /// The prescription was already expanded; nothing happened.
    AlreadyExpanded,
}

/// Expand a prescription into the concrete occurrences to insert.
///
/// Pure: no store access, no clock reads. For each medicine the course runs
/// from the prescription start to `min(start + duration_days, end_date)`;
/// each timing contributes one candidate per calendar day in that span.
/// Candidates not strictly in the future at `now` are never materialized —
/// there is no back-filling. The result is ordered by scheduled time.
pub fn expand_occurrences(
    prescription: &Prescription,
    now: DateTime<Utc>,
    notify_lead: Duration,
) -> Vec<ReminderOccurrence> {
    let mut occurrences = Vec::new();
    let start_day = prescription.start_date.date_naive();

    for medicine in &prescription.medicines {
        let course_end =
            prescription.start_date + Duration::days(i64::from(medicine.duration_days));
        let effective_end = course_end.min(prescription.end_date);
        let span_days = effective_end
            .date_naive()
            .signed_duration_since(start_day)
            .num_days();

        for timing in &medicine.timings {
            let time = timing
                .time
                .with_second(0)
                .and_then(|t| t.with_nanosecond(0))
                .unwrap_or(timing.time);

            for offset in 0..=span_days {
                let day = start_day + Duration::days(offset);
                let scheduled_time = Utc.from_utc_datetime(&day.and_time(time));
                if scheduled_time <= now || scheduled_time > effective_end {
                    continue;
                }
                occurrences.push(ReminderOccurrence {
                    id: Uuid::new_v4(),
                    patient_id: prescription.patient_id,
                    prescription_id: prescription.id,
                    medicine_id: medicine.id,
                    medicine_name: medicine.name.clone(),
                    dosage: medicine.dosage.clone(),
                    instructions: medicine.instructions.clone(),
                    meal_relation: timing.meal_relation,
                    scheduled_time,
                    notify_time: scheduled_time - notify_lead,
                    status: ReminderStatus::Pending,
                    taken_at: None,
                    missed_at: None,
                    notification_sent: false,
                    notification_sent_at: None,
                    snooze_count: 0,
                    snoozed_until: None,
                });
            }
        }
    }

    occurrences.sort_by_key(|o| o.scheduled_time);
    occurrences
}
