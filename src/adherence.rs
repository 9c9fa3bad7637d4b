//! Read-only adherence reporting over the action ledger.
//!
//! Explicit grouping over a queried log slice; the ledger is never mutated.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{ActionLogEntry, ReminderAction};

/// Per-action counts within a reporting window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionCounts {
    pub taken: u32,
    pub missed: u32,
    pub skipped: u32,
    pub snoozed: u32,
}

/// Summary of a patient's logged actions in a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdherenceStats {
    pub total: u32,
    pub counts: ActionCounts,
    /// Rounded percentage of actions that were `taken`; 0 when the window
    /// holds no actions.
    pub adherence_rate: u32,
}

/// One calendar day of the daily breakdown (UTC reference timezone).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyAdherence {
    pub day: NaiveDate,
    pub taken: u32,
    pub missed: u32,
    pub total: u32,
}

/// Group a log slice by action kind.
pub fn summarize(entries: &[ActionLogEntry]) -> AdherenceStats {
    let mut counts = ActionCounts::default();
    for entry in entries {
        match entry.action {
            ReminderAction::Taken => counts.taken += 1,
            ReminderAction::Missed => counts.missed += 1,
            ReminderAction::Skipped => counts.skipped += 1,
            ReminderAction::Snoozed => counts.snoozed += 1,
        }
    }

    let total = entries.len() as u32;
    let adherence_rate = if total == 0 {
        0
    } else {
        ((f64::from(counts.taken) / f64::from(total)) * 100.0).round() as u32
    };

    AdherenceStats {
        total,
        counts,
        adherence_rate,
    }
}

/// Group a log slice by UTC calendar day, ascending.
pub fn daily_breakdown(entries: &[ActionLogEntry]) -> Vec<DailyAdherence> {
    let mut days: BTreeMap<NaiveDate, DailyAdherence> = BTreeMap::new();
    for entry in entries {
        let day = entry.action_time.date_naive();
        let bucket = days.entry(day).or_insert(DailyAdherence {
            day,
            taken: 0,
            missed: 0,
            total: 0,
        });
        bucket.total += 1;
        match entry.action {
            ReminderAction::Taken => bucket.taken += 1,
            ReminderAction::Missed => bucket.missed += 1,
            ReminderAction::Skipped | ReminderAction::Snoozed => {}
        }
    }
    days.into_values().collect()
}
