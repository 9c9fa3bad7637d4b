//! Engine configuration and crate-level constants.

use serde::{Deserialize, Serialize};

pub const ENGINE_NAME: &str = "Adhera";
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> String {
    "adhera=info".to_string()
}

/// Configuration for the reminder engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Minutes before the scheduled intake at which the notification fires.
    pub notify_lead_minutes: i64,
    /// Default snooze duration in minutes when the caller does not pick one.
    pub snooze_minutes: i64,
    /// Maximum snoozes per occurrence.
    pub max_snoozes: u32,
    /// Hours after the scheduled intake before an unacknowledged sent
    /// reminder is auto-resolved to missed.
    pub missed_after_hours: i64,
    /// Seconds between scan cycles of the background driver.
    pub scan_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            notify_lead_minutes: 5,
            snooze_minutes: 15,
            max_snoozes: 3,
            missed_after_hours: 2,
            scan_interval_secs: 60,
        }
    }
}
