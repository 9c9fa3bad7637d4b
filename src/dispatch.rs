//! Builds notification payloads for due reminders and reconciles delivery
//! outcomes back into occurrence state.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ReminderError;
use crate::gateway::{BatchOutcome, PushGateway, PushNotification};
use crate::models::ReminderOccurrence;
use crate::store::{PatientDirectory, ReminderStore};

const NOTIFICATION_TITLE: &str = "💊 Medicine Reminder";

/// Counts reported by one dispatch round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatchReport {
    pub sent: u32,
    pub failed: u32,
    /// Eligible occurrences whose patient has no registered push address.
    /// Not failures: they are simply not deliverable.
    pub skipped_no_address: u32,
}

/// Maps eligible occurrences to push payloads, invokes the gateway once per
/// cycle, and reconciles the aggregate outcome.
pub struct NotificationDispatcher {
    store: Arc<dyn ReminderStore>,
    directory: Arc<dyn PatientDirectory>,
    gateway: Arc<dyn PushGateway>,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        directory: Arc<dyn PatientDirectory>,
        gateway: Arc<dyn PushGateway>,
    ) -> Self {
        Self {
            store,
            directory,
            gateway,
        }
    }

    /// Send at most one notification per occurrence for this cycle.
    ///
    /// The gateway reports aggregate counts only, so reconciliation is
    /// best-effort: when anything went through, every attempted occurrence
    /// is marked notified, and the missed sweep later resolves the ones
    /// that never arrived. On total transport failure nothing is marked
    /// and the occurrences stay eligible for the next cycle.
    pub fn dispatch_due(
        &self,
        due: &[ReminderOccurrence],
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, ReminderError> {
        let mut report = DispatchReport::default();
        if due.is_empty() {
            return Ok(report);
        }

        let mut batch: Vec<PushNotification> = Vec::new();
        let mut attempted: Vec<Uuid> = Vec::new();
        for occurrence in due {
            let Some(address) = self.directory.push_address(occurrence.patient_id)? else {
                warn!(
                    patient_id = %occurrence.patient_id,
                    reminder_id = %occurrence.id,
                    "No push address registered, skipping delivery"
                );
                report.skipped_no_address += 1;
                continue;
            };
            batch.push(build_notification(occurrence, &address));
            attempted.push(occurrence.id);
        }

        if batch.is_empty() {
            return Ok(report);
        }

        match self.gateway.send_batch(&batch) {
            Ok(outcome) => {
                report.sent = outcome.success_count;
                report.failed = outcome.failure_count;
                if outcome.success_count > 0 {
                    self.store.mark_notified(&attempted, now)?;
                }
                info!(
                    sent = report.sent,
                    failed = report.failed,
                    "Dispatched reminder notifications"
                );
            }
            Err(e) => {
                report.failed = attempted.len() as u32;
                error!(
                    error = %e,
                    attempted = attempted.len(),
                    "Notification batch failed, occurrences stay eligible"
                );
            }
        }

        Ok(report)
    }

    /// One-off notification outside the reminder flow.
    pub fn send_custom(
        &self,
        patient_id: Uuid,
        title: &str,
        body: &str,
        data: serde_json::Value,
    ) -> Result<BatchOutcome, ReminderError> {
        let address =
            self.directory
                .push_address(patient_id)?
                .ok_or(ReminderError::NotFound {
                    entity: "push address",
                    id: patient_id.to_string(),
                })?;

        let notification = PushNotification {
            address,
            title: title.to_string(),
            body: body.to_string(),
            metadata: data,
        };
        let outcome = self.gateway.send_batch(std::slice::from_ref(&notification))?;
        info!(patient_id = %patient_id, "Custom notification sent");
        Ok(outcome)
    }
}

fn build_notification(occurrence: &ReminderOccurrence, address: &str) -> PushNotification {
    let body = format!(
        "Time to take {} ({}){}",
        occurrence.medicine_name,
        occurrence.dosage,
        occurrence.meal_relation.notification_suffix()
    );
    let metadata = serde_json::json!({
        "type": "medicine_reminder",
        "reminder_id": occurrence.id,
        "prescription_id": occurrence.prescription_id,
        "medicine_name": occurrence.medicine_name,
        "dosage": occurrence.dosage,
        "scheduled_time": occurrence
            .scheduled_time
            .to_rfc3339_opts(SecondsFormat::Secs, true),
    });

    PushNotification {
        address: address.to_string(),
        title: NOTIFICATION_TITLE.to_string(),
        body,
        metadata,
    }
}
