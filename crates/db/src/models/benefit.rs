//! Benefits bound to an account card.

use perkcycle_core::benefit::{BenefitDefinition, CycleSchedule, ScheduleParts};
use perkcycle_core::error::CoreError;
use perkcycle_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `benefits` table.
///
/// The schedule is stored in its loose four-column form; [`Benefit::schedule`]
/// collapses it and rejects rows that hold an illegal combination.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct Benefit {
    pub id: DbId,
    pub account_card_id: DbId,
    pub category: String,
    pub description: String,
    pub percentage: f64,
    pub max_amount: Option<f64>,
    pub frequency: String,
    pub cycle_alignment: String,
    pub fixed_cycle_start_month: Option<i32>,
    pub fixed_cycle_duration_months: Option<i32>,
    pub occurrences_in_cycle: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Benefit {
    pub fn schedule(&self) -> Result<CycleSchedule, CoreError> {
        CycleSchedule::from_parts(ScheduleParts {
            frequency: self.frequency.parse()?,
            alignment: self.cycle_alignment.parse()?,
            fixed_start_month: self.fixed_cycle_start_month,
            fixed_duration_months: self.fixed_cycle_duration_months,
        })
    }

    /// Rebuild the definition this row was bound from.
    pub fn definition(&self) -> Result<BenefitDefinition, CoreError> {
        let occurrences = u32::try_from(self.occurrences_in_cycle)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Benefit {} has invalid occurrences_in_cycle {}",
                    self.id, self.occurrences_in_cycle
                ))
            })?;

        Ok(BenefitDefinition {
            category: self.category.clone(),
            description: self.description.clone(),
            percentage: self.percentage,
            max_amount: self.max_amount,
            schedule: self.schedule()?,
            occurrences_in_cycle: occurrences,
        })
    }
}

/// A benefit plus whether the account holder has recorded state against it.
///
/// A benefit is protected when any of its statuses is completed or marked
/// not usable. Migrations never silently discard protected benefits.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct BenefitSnapshot {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub benefit: Benefit,
    pub is_protected: bool,
}
