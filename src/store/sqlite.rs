//! SQLite reference implementation of the storage seams.
//!
//! Timestamps are persisted as `%Y-%m-%d %H:%M:%S` UTC text, so the
//! lexicographic comparisons in the queries are chronological. UUIDs are
//! stored as text.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use uuid::Uuid;

use super::{PatientDirectory, ReminderStore, StoreError, TimeWindow, TransitionEffect};
use crate::models::{
    ActionLogEntry, GeoPoint, MealRelation, Prescription, ReminderAction, ReminderOccurrence,
    ReminderStatus,
};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const OCCURRENCE_COLUMNS: &str = "id, patient_id, prescription_id, medicine_id, medicine_name, \
     dosage, instructions, meal_relation, scheduled_time, notify_time, status, taken_at, \
     missed_at, notification_sent, notification_sent_at, snooze_count, snoozed_until";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS patients (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    push_address    TEXT
);

CREATE TABLE IF NOT EXISTS prescriptions (
    id                   TEXT PRIMARY KEY,
    patient_id           TEXT NOT NULL,
    doctor_id            TEXT,
    diagnosis            TEXT,
    start_date           TEXT NOT NULL,
    end_date             TEXT NOT NULL,
    status               TEXT NOT NULL DEFAULT 'active',
    reminders_generated  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS reminders (
    id                    TEXT PRIMARY KEY,
    patient_id            TEXT NOT NULL,
    prescription_id       TEXT NOT NULL,
    medicine_id           TEXT NOT NULL,
    medicine_name         TEXT NOT NULL,
    dosage                TEXT NOT NULL,
    instructions          TEXT,
    meal_relation         TEXT NOT NULL DEFAULT 'anytime',
    scheduled_time        TEXT NOT NULL,
    notify_time           TEXT NOT NULL,
    status                TEXT NOT NULL DEFAULT 'pending',
    taken_at              TEXT,
    missed_at             TEXT,
    notification_sent     INTEGER NOT NULL DEFAULT 0,
    notification_sent_at  TEXT,
    snooze_count          INTEGER NOT NULL DEFAULT 0,
    snoozed_until         TEXT
);
CREATE INDEX IF NOT EXISTS idx_reminders_notify ON reminders (notify_time, status);
CREATE INDEX IF NOT EXISTS idx_reminders_patient_time ON reminders (patient_id, scheduled_time);
CREATE INDEX IF NOT EXISTS idx_reminders_patient_status
    ON reminders (patient_id, status, scheduled_time);

CREATE TABLE IF NOT EXISTS action_log (
    id               TEXT PRIMARY KEY,
    patient_id       TEXT NOT NULL,
    reminder_id      TEXT NOT NULL,
    prescription_id  TEXT NOT NULL,
    medicine_name    TEXT NOT NULL,
    dosage           TEXT NOT NULL,
    scheduled_time   TEXT NOT NULL,
    action           TEXT NOT NULL,
    action_time      TEXT NOT NULL,
    delay_minutes    INTEGER NOT NULL DEFAULT 0,
    notes            TEXT,
    latitude         REAL,
    longitude        REAL
);
CREATE INDEX IF NOT EXISTS idx_action_log_patient_time ON action_log (patient_id, action_time);
";

/// SQLite-backed store, usable both as [`ReminderStore`] and
/// [`PatientDirectory`].
pub struct SqliteReminderStore {
    conn: Mutex<Connection>,
}

impl SqliteReminderStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Host-side seeding: register a patient and their push address.
    pub fn register_patient(
        &self,
        id: Uuid,
        name: &str,
        push_address: Option<&str>,
    ) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO patients (id, name, push_address) VALUES (?1, ?2, ?3)",
            params![id.to_string(), name, push_address],
        )?;
        Ok(())
    }

    /// Host-side seeding: mirror a prescription row. The expansion guard
    /// (`reminders_generated`) lives on this row.
    pub fn register_prescription(&self, prescription: &Prescription) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO prescriptions
             (id, patient_id, doctor_id, diagnosis, start_date, end_date, status, reminders_generated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                prescription.id.to_string(),
                prescription.patient_id.to_string(),
                prescription.doctor_id.to_string(),
                prescription.diagnosis,
                format_ts(prescription.start_date),
                format_ts(prescription.end_date),
                prescription.status.as_str(),
                prescription.reminders_generated,
            ],
        )?;
        Ok(())
    }
}

// ═══════════════════════════════════════════
// Row mapping
// ═══════════════════════════════════════════

struct OccurrenceRow {
    id: String,
    patient_id: String,
    prescription_id: String,
    medicine_id: String,
    medicine_name: String,
    dosage: String,
    instructions: Option<String>,
    meal_relation: String,
    scheduled_time: String,
    notify_time: String,
    status: String,
    taken_at: Option<String>,
    missed_at: Option<String>,
    notification_sent: bool,
    notification_sent_at: Option<String>,
    snooze_count: u32,
    snoozed_until: Option<String>,
}

fn read_occurrence_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<OccurrenceRow> {
    Ok(OccurrenceRow {
        id: row.get(0)?,
        patient_id: row.get(1)?,
        prescription_id: row.get(2)?,
        medicine_id: row.get(3)?,
        medicine_name: row.get(4)?,
        dosage: row.get(5)?,
        instructions: row.get(6)?,
        meal_relation: row.get(7)?,
        scheduled_time: row.get(8)?,
        notify_time: row.get(9)?,
        status: row.get(10)?,
        taken_at: row.get(11)?,
        missed_at: row.get(12)?,
        notification_sent: row.get(13)?,
        notification_sent_at: row.get(14)?,
        snooze_count: row.get(15)?,
        snoozed_until: row.get(16)?,
    })
}

fn occurrence_from_row(row: OccurrenceRow) -> Result<ReminderOccurrence, StoreError> {
    Ok(ReminderOccurrence {
        id: parse_uuid(&row.id)?,
        patient_id: parse_uuid(&row.patient_id)?,
        prescription_id: parse_uuid(&row.prescription_id)?,
        medicine_id: parse_uuid(&row.medicine_id)?,
        medicine_name: row.medicine_name,
        dosage: row.dosage,
        instructions: row.instructions,
        meal_relation: MealRelation::from_str(&row.meal_relation)?,
        scheduled_time: parse_ts(&row.scheduled_time)?,
        notify_time: parse_ts(&row.notify_time)?,
        status: ReminderStatus::from_str(&row.status)?,
        taken_at: parse_opt_ts(row.taken_at)?,
        missed_at: parse_opt_ts(row.missed_at)?,
        notification_sent: row.notification_sent,
        notification_sent_at: parse_opt_ts(row.notification_sent_at)?,
        snooze_count: row.snooze_count,
        snoozed_until: parse_opt_ts(row.snoozed_until)?,
    })
}

fn format_ts(t: DateTime<Utc>) -> String {
    t.format(TS_FORMAT).to_string()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    chrono::NaiveDateTime::parse_from_str(s, TS_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| StoreError::ConstraintViolation(format!("invalid timestamp {s}: {e}")))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_uuid(s: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(s).map_err(|e| StoreError::ConstraintViolation(format!("invalid uuid {s}: {e}")))
}

/// Quoted SQL `IN` list from a closed status set.
fn status_list(statuses: &[ReminderStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn get_occurrence(conn: &Connection, id: Uuid) -> Result<Option<ReminderOccurrence>, StoreError> {
    let sql = format!("SELECT {OCCURRENCE_COLUMNS} FROM reminders WHERE id = ?1");
    match conn.query_row(&sql, params![id.to_string()], read_occurrence_row) {
        Ok(row) => Ok(Some(occurrence_from_row(row)?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn insert_log(conn: &Connection, entry: &ActionLogEntry) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO action_log
         (id, patient_id, reminder_id, prescription_id, medicine_name, dosage,
          scheduled_time, action, action_time, delay_minutes, notes, latitude, longitude)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            entry.id.to_string(),
            entry.patient_id.to_string(),
            entry.reminder_id.to_string(),
            entry.prescription_id.to_string(),
            entry.medicine_name,
            entry.dosage,
            format_ts(entry.scheduled_time),
            entry.action.as_str(),
            format_ts(entry.action_time),
            entry.delay_minutes,
            entry.notes,
            entry.location.map(|l| l.latitude),
            entry.location.map(|l| l.longitude),
        ],
    )?;
    Ok(())
}

// ═══════════════════════════════════════════
// Trait implementations
// ═══════════════════════════════════════════

impl ReminderStore for SqliteReminderStore {
    fn insert_occurrences(&self, occurrences: &[ReminderOccurrence]) -> Result<(), StoreError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;

        for occ in occurrences {
            tx.execute(
                &format!(
                    "INSERT INTO reminders ({OCCURRENCE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
                ),
                params![
                    occ.id.to_string(),
                    occ.patient_id.to_string(),
                    occ.prescription_id.to_string(),
                    occ.medicine_id.to_string(),
                    occ.medicine_name,
                    occ.dosage,
                    occ.instructions,
                    occ.meal_relation.as_str(),
                    format_ts(occ.scheduled_time),
                    format_ts(occ.notify_time),
                    occ.status.as_str(),
                    occ.taken_at.map(format_ts),
                    occ.missed_at.map(format_ts),
                    occ.notification_sent,
                    occ.notification_sent_at.map(format_ts),
                    occ.snooze_count,
                    occ.snoozed_until.map(format_ts),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn occurrence(&self, id: Uuid) -> Result<Option<ReminderOccurrence>, StoreError> {
        get_occurrence(&self.conn(), id)
    }

    fn apply_transition(
        &self,
        id: Uuid,
        expected: &[ReminderStatus],
        effect: &TransitionEffect,
        log: Option<&ActionLogEntry>,
    ) -> Result<Option<ReminderOccurrence>, StoreError> {
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let statuses = status_list(expected);

        let updated = match effect {
            TransitionEffect::Taken { at } => tx.execute(
                &format!(
                    "UPDATE reminders SET status = 'taken', taken_at = ?1
                     WHERE id = ?2 AND status IN ({statuses})"
                ),
                params![format_ts(*at), id.to_string()],
            )?,
            TransitionEffect::Missed { at } => tx.execute(
                &format!(
                    "UPDATE reminders SET status = 'missed', missed_at = ?1
                     WHERE id = ?2 AND status IN ({statuses})"
                ),
                params![format_ts(*at), id.to_string()],
            )?,
            TransitionEffect::Skipped => tx.execute(
                &format!(
                    "UPDATE reminders SET status = 'skipped'
                     WHERE id = ?1 AND status IN ({statuses})"
                ),
                params![id.to_string()],
            )?,
            TransitionEffect::Snoozed { until, count } => tx.execute(
                &format!(
                    "UPDATE reminders
                     SET snooze_count = ?1, snoozed_until = ?2, notify_time = ?2,
                         notification_sent = 0
                     WHERE id = ?3 AND status IN ({statuses}) AND snooze_count = ?4"
                ),
                params![count, format_ts(*until), id.to_string(), count.wrapping_sub(1)],
            )?,
        };

        if updated == 0 {
            // Precondition failed; the dropped transaction writes nothing.
            return Ok(None);
        }

        if let Some(entry) = log {
            insert_log(&tx, entry)?;
        }

        let occurrence = get_occurrence(&tx, id)?.ok_or_else(|| StoreError::NotFound {
            entity_type: "reminder".to_string(),
            id: id.to_string(),
        })?;
        tx.commit()?;
        Ok(Some(occurrence))
    }

    fn due_for_notification(&self, now: DateTime<Utc>) -> Result<Vec<ReminderOccurrence>, StoreError> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {OCCURRENCE_COLUMNS} FROM reminders
             WHERE notify_time <= ?1 AND notification_sent = 0 AND status = 'pending'
               AND (snoozed_until IS NULL OR snoozed_until <= ?1)
             ORDER BY notify_time ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![format_ts(now)], read_occurrence_row)?;

        let mut due = Vec::new();
        for row in rows {
            due.push(occurrence_from_row(row?)?);
        }
        Ok(due)
    }

    fn mark_notified(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let conn = self.conn();
        let tx = conn.unchecked_transaction()?;
        let stamp = format_ts(at);

        let mut updated = 0u64;
        for id in ids {
            updated += tx.execute(
                "UPDATE reminders
                 SET status = 'sent', notification_sent = 1, notification_sent_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![stamp, id.to_string()],
            )? as u64;
        }

        tx.commit()?;
        Ok(updated)
    }

    fn expire_stale_sent(
        &self,
        scheduled_before: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let updated = self.conn().execute(
            "UPDATE reminders SET status = 'missed', missed_at = ?1
             WHERE status = 'sent' AND scheduled_time < ?2",
            params![format_ts(at), format_ts(scheduled_before)],
        )?;
        Ok(updated as u64)
    }

    fn skip_pending_for_prescription(
        &self,
        prescription_id: Uuid,
        after: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let updated = self.conn().execute(
            "UPDATE reminders SET status = 'skipped'
             WHERE prescription_id = ?1 AND status IN ('pending', 'sent')
               AND scheduled_time > ?2",
            params![prescription_id.to_string(), format_ts(after)],
        )?;
        Ok(updated as u64)
    }

    fn set_reminders_generated(&self, prescription_id: Uuid) -> Result<(), StoreError> {
        let updated = self.conn().execute(
            "UPDATE prescriptions SET reminders_generated = 1 WHERE id = ?1",
            params![prescription_id.to_string()],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound {
                entity_type: "prescription".to_string(),
                id: prescription_id.to_string(),
            });
        }
        Ok(())
    }

    fn occurrences_for_patient(
        &self,
        patient_id: Uuid,
        window: TimeWindow,
        statuses: Option<&[ReminderStatus]>,
    ) -> Result<Vec<ReminderOccurrence>, StoreError> {
        let conn = self.conn();
        let status_clause = match statuses {
            Some(set) => format!("AND status IN ({})", status_list(set)),
            None => String::new(),
        };
        let sql = format!(
            "SELECT {OCCURRENCE_COLUMNS} FROM reminders
             WHERE patient_id = ?1 AND scheduled_time >= ?2 AND scheduled_time < ?3
             {status_clause}
             ORDER BY scheduled_time ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                patient_id.to_string(),
                format_ts(window.start),
                format_ts(window.end)
            ],
            read_occurrence_row,
        )?;

        let mut occurrences = Vec::new();
        for row in rows {
            occurrences.push(occurrence_from_row(row?)?);
        }
        Ok(occurrences)
    }

    fn logs_for_patient(
        &self,
        patient_id: Uuid,
        window: TimeWindow,
    ) -> Result<Vec<ActionLogEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, patient_id, reminder_id, prescription_id, medicine_name, dosage,
                    scheduled_time, action, action_time, delay_minutes, notes, latitude, longitude
             FROM action_log
             WHERE patient_id = ?1 AND action_time >= ?2 AND action_time < ?3
             ORDER BY action_time ASC",
        )?;
        let rows = stmt.query_map(
            params![
                patient_id.to_string(),
                format_ts(window.start),
                format_ts(window.end)
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, i64>(9)?,
                    row.get::<_, Option<String>>(10)?,
                    row.get::<_, Option<f64>>(11)?,
                    row.get::<_, Option<f64>>(12)?,
                ))
            },
        )?;

        let mut entries = Vec::new();
        for row in rows {
            let (
                id,
                patient,
                reminder,
                prescription,
                medicine_name,
                dosage,
                scheduled_time,
                action,
                action_time,
                delay_minutes,
                notes,
                latitude,
                longitude,
            ) = row?;
            let location = match (latitude, longitude) {
                (Some(latitude), Some(longitude)) => Some(GeoPoint { latitude, longitude }),
                _ => None,
            };
            entries.push(ActionLogEntry {
                id: parse_uuid(&id)?,
                patient_id: parse_uuid(&patient)?,
                reminder_id: parse_uuid(&reminder)?,
                prescription_id: parse_uuid(&prescription)?,
                medicine_name,
                dosage,
                scheduled_time: parse_ts(&scheduled_time)?,
                action: ReminderAction::from_str(&action)?,
                action_time: parse_ts(&action_time)?,
                delay_minutes,
                notes,
                location,
            });
        }
        Ok(entries)
    }
}

impl PatientDirectory for SqliteReminderStore {
    fn push_address(&self, patient_id: Uuid) -> Result<Option<String>, StoreError> {
        match self.conn().query_row(
            "SELECT push_address FROM patients WHERE id = ?1",
            params![patient_id.to_string()],
            |row| row.get::<_, Option<String>>(0),
        ) {
            Ok(address) => Ok(address),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
