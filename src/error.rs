//! Engine error taxonomy.
//!
//! Validation and state errors surface synchronously to the caller and are
//! never retried automatically. Transport failures inside the recurring
//! driver are logged at the cycle boundary and retried implicitly by the
//! next tick; nothing here is fatal to the driver.

use thiserror::Error;
use uuid::Uuid;

use crate::gateway::GatewayError;
use crate::models::ReminderStatus;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("Reminder {0} is already completed")]
    AlreadyCompleted(Uuid),

    #[error("Reminder {id} cannot accept this action in status {status}")]
    InvalidState { id: Uuid, status: ReminderStatus },

    #[error("Reminder {0} has reached the maximum snooze limit")]
    SnoozeLimitExceeded(Uuid),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Delivery transport error: {0}")]
    DeliveryTransport(#[from] GatewayError),

    #[error("A scan cycle is already in flight")]
    CycleInFlight,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
