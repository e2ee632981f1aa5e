//! Claimable benefit occurrences.

use perkcycle_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `benefit_statuses` table.
///
/// `is_completed`, `completed_at`, `is_not_usable` and `used_amount` belong
/// to the account holder; cycle upserts never write them. `expiry_warned_at`
/// is set once an "expiring soon" notice for the occurrence was delivered.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct BenefitStatus {
    pub id: DbId,
    pub benefit_id: DbId,
    pub user_id: DbId,
    pub cycle_start_date: Timestamp,
    pub cycle_end_date: Timestamp,
    pub occurrence_index: i32,
    pub is_completed: bool,
    pub completed_at: Option<Timestamp>,
    pub is_not_usable: bool,
    pub used_amount: Option<f64>,
    pub expiry_warned_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl BenefitStatus {
    pub fn is_protected(&self) -> bool {
        self.is_completed || self.is_not_usable
    }

    pub fn key(&self) -> StatusKey {
        StatusKey {
            benefit_id: self.benefit_id,
            user_id: self.user_id,
            cycle_start_date: self.cycle_start_date,
            occurrence_index: self.occurrence_index,
        }
    }
}

/// Unique identity of one occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StatusKey {
    pub benefit_id: DbId,
    pub user_id: DbId,
    pub cycle_start_date: Timestamp,
    pub occurrence_index: i32,
}

/// Insert-or-refresh request for one occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusUpsert {
    pub key: StatusKey,
    pub cycle_end_date: Timestamp,
}

/// Result of an upsert: the stored row and whether it was newly created.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct UpsertedStatus {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub status: BenefitStatus,
    pub created: bool,
}
