//! Migration plans: declarative, versioned descriptions of the benefit set a
//! card product should carry from an effective date onward.
//!
//! Plans are usually authored as JSON documents:
//!
//! ```json
//! {
//!   "id": "sapphire-2025-q3",
//!   "title": "Sapphire quarterly credits",
//!   "version": 2,
//!   "cardUpdates": [{
//!     "cardName": "Sapphire Reserve",
//!     "issuer": "Chase",
//!     "newAnnualFee": 795,
//!     "effectiveDate": "2025-07-01",
//!     "benefits": [{ "category": "Dining", "description": "Q3: Jul-Sep", "frequency": "QUARTERLY",
//!                    "cycleAlignment": "CALENDAR_FIXED", "fixedCycleStartMonth": 7,
//!                    "fixedCycleDurationMonths": 3 }]
//!   }]
//! }
//! ```

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::benefit::BenefitDefinition;
use crate::error::CoreError;

/// A named, versioned set of card product updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    pub id: String,
    pub title: String,
    pub version: u32,
    pub card_updates: Vec<CardUpdate>,
}

/// The benefit set one card product should have as of `effective_date`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardUpdate {
    pub card_name: String,
    pub issuer: String,
    #[serde(default)]
    pub new_annual_fee: Option<f64>,
    pub effective_date: NaiveDate,
    #[serde(default)]
    pub benefits: Vec<BenefitDefinition>,
}

impl MigrationPlan {
    pub fn builder(id: impl Into<String>, title: impl Into<String>) -> MigrationPlanBuilder {
        MigrationPlanBuilder {
            plan: MigrationPlan {
                id: id.into(),
                title: title.into(),
                version: 1,
                card_updates: Vec::new(),
            },
        }
    }

    /// Parse and validate a JSON plan document.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let plan: MigrationPlan = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("Malformed plan document: {e}")))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Check the plan's shape. Benefit-level field rules are enforced when
    /// definitions are built, so only plan-level rules are checked here.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.id.trim().is_empty() {
            return Err(CoreError::Validation("Plan id must not be empty".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "Plan '{}' must have a title",
                self.id
            )));
        }
        if self.version == 0 {
            return Err(CoreError::Validation(format!(
                "Plan '{}' version must be at least 1",
                self.id
            )));
        }
        if self.card_updates.is_empty() {
            return Err(CoreError::Validation(format!(
                "Plan '{}' must include at least one card update",
                self.id
            )));
        }

        let mut seen = HashSet::new();
        for update in &self.card_updates {
            update.validate()?;
            if !seen.insert(update.card_name.as_str()) {
                return Err(CoreError::Validation(format!(
                    "Card '{}' appears more than once in plan '{}'",
                    update.card_name, self.id
                )));
            }
        }
        Ok(())
    }

    /// Total number of benefit definitions across all card updates.
    pub fn benefit_count(&self) -> usize {
        self.card_updates.iter().map(|u| u.benefits.len()).sum()
    }
}

impl CardUpdate {
    pub fn new(
        card_name: impl Into<String>,
        issuer: impl Into<String>,
        effective_date: NaiveDate,
    ) -> Self {
        Self {
            card_name: card_name.into(),
            issuer: issuer.into(),
            new_annual_fee: None,
            effective_date,
            benefits: Vec::new(),
        }
    }

    pub fn annual_fee(mut self, fee: f64) -> Self {
        self.new_annual_fee = Some(fee);
        self
    }

    pub fn benefit(mut self, benefit: BenefitDefinition) -> Self {
        self.benefits.push(benefit);
        self
    }

    fn validate(&self) -> Result<(), CoreError> {
        if self.card_name.trim().is_empty() {
            return Err(CoreError::Validation(
                "Card update must name a card".to_string(),
            ));
        }
        if self.issuer.trim().is_empty() {
            return Err(CoreError::Validation(format!(
                "Card '{}' must name an issuer",
                self.card_name
            )));
        }
        if self.new_annual_fee.is_some_and(|fee| fee < 0.0 || !fee.is_finite()) {
            return Err(CoreError::Validation(format!(
                "Card '{}' annual fee must be a non-negative amount",
                self.card_name
            )));
        }
        if let Some(bad) = self.benefits.iter().find(|b| b.occurrences_in_cycle == 0) {
            return Err(CoreError::Validation(format!(
                "Benefit '{}' on card '{}' must have at least one occurrence per cycle",
                bad.category, self.card_name
            )));
        }
        Ok(())
    }
}

/// Consuming builder for [`MigrationPlan`].
#[derive(Debug, Clone)]
pub struct MigrationPlanBuilder {
    plan: MigrationPlan,
}

impl MigrationPlanBuilder {
    pub fn version(mut self, version: u32) -> Self {
        self.plan.version = version;
        self
    }

    pub fn card_update(mut self, update: CardUpdate) -> Self {
        self.plan.card_updates.push(update);
        self
    }

    /// Finish and validate the plan.
    pub fn build(self) -> Result<MigrationPlan, CoreError> {
        self.plan.validate()?;
        Ok(self.plan)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::benefit::{CycleSchedule, FixedWindow, Frequency};

    fn effective() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 1).unwrap()
    }

    fn q3_dining() -> BenefitDefinition {
        BenefitDefinition::new(
            "Dining",
            "Q3: Jul-Sep dining credit",
            CycleSchedule::CalendarFixed {
                declared: Frequency::Quarterly,
                window: FixedWindow::new(7, 3).unwrap(),
            },
        )
        .max_amount(75.0)
    }

    #[test]
    fn builder_produces_valid_plan() {
        let plan = MigrationPlan::builder("sapphire-2025", "Sapphire refresh")
            .version(3)
            .card_update(
                CardUpdate::new("Sapphire Reserve", "Chase", effective())
                    .annual_fee(795.0)
                    .benefit(q3_dining())
                    .benefit(BenefitDefinition::new("Travel", "Annual travel credit", CycleSchedule::Yearly)),
            )
            .build()
            .unwrap();

        assert_eq!(plan.version, 3);
        assert_eq!(plan.benefit_count(), 2);
        assert_eq!(plan.card_updates[0].new_annual_fee, Some(795.0));
    }

    #[test]
    fn plan_without_updates_rejected() {
        let result = MigrationPlan::builder("empty", "Empty plan").build();
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("at least one card update"));
    }

    #[test]
    fn duplicate_card_rejected() {
        let result = MigrationPlan::builder("dup", "Duplicate cards")
            .card_update(CardUpdate::new("Gold", "Amex", effective()))
            .card_update(CardUpdate::new("Gold", "Amex", effective()))
            .build();
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("more than once"));
    }

    #[test]
    fn zero_version_rejected() {
        let result = MigrationPlan::builder("v0", "Version zero")
            .version(0)
            .card_update(CardUpdate::new("Gold", "Amex", effective()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn negative_fee_rejected() {
        let result = MigrationPlan::builder("fee", "Negative fee")
            .card_update(CardUpdate::new("Gold", "Amex", effective()).annual_fee(-1.0))
            .build();
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("annual fee"));
    }

    #[test]
    fn zero_occurrences_rejected() {
        let result = MigrationPlan::builder("occ", "Zero occurrences")
            .card_update(
                CardUpdate::new("Gold", "Amex", effective()).benefit(q3_dining().occurrences(0)),
            )
            .build();
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("at least one occurrence"));
    }

    #[test]
    fn parses_json_document() {
        let json = r#"{
            "id": "gold-2025",
            "title": "Gold dining refresh",
            "version": 1,
            "cardUpdates": [{
                "cardName": "Gold",
                "issuer": "Amex",
                "effectiveDate": "2025-01-01",
                "benefits": [
                    {"category": "Dining", "description": "Monthly dining credit", "frequency": "MONTHLY", "maxAmount": 10},
                    {"category": "Lounge", "description": "Two lounge passes", "frequency": "YEARLY", "occurrencesInCycle": 2}
                ]
            }]
        }"#;
        let plan = MigrationPlan::from_json(json).unwrap();
        assert_eq!(plan.card_updates.len(), 1);
        let update = &plan.card_updates[0];
        assert_eq!(update.effective_date, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(update.new_annual_fee, None);
        assert_eq!(update.benefits[1].occurrences_in_cycle, 2);
    }

    #[test]
    fn malformed_json_is_validation_error() {
        let result = MigrationPlan::from_json(r#"{"id": "x", "title": "t"}"#);
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.starts_with("Malformed plan document"));
    }

    #[test]
    fn illegal_benefit_in_json_is_validation_error() {
        let json = r#"{
            "id": "bad", "title": "Bad", "version": 1,
            "cardUpdates": [{
                "cardName": "Gold", "issuer": "Amex", "effectiveDate": "2025-01-01",
                "benefits": [{"category": "Dining", "frequency": "QUARTERLY", "cycleAlignment": "CALENDAR_FIXED"}]
            }]
        }"#;
        let result = MigrationPlan::from_json(json);
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("CALENDAR_FIXED"));
    }
}
