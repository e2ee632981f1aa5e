//! Canonical benefit templates per card product.

use chrono::NaiveDate;
use perkcycle_core::benefit::BenefitDefinition;
use perkcycle_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `card_templates` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct CardTemplate {
    pub id: DbId,
    pub card_name: String,
    pub issuer: String,
    pub annual_fee: Option<f64>,
    pub effective_date: NaiveDate,
    /// JSON array of benefit definitions in wire shape.
    pub benefits: serde_json::Value,
    pub plan_id: Option<String>,
    pub plan_version: Option<i32>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl CardTemplate {
    pub fn definitions(&self) -> Result<Vec<BenefitDefinition>, serde_json::Error> {
        serde_json::from_value(self.benefits.clone())
    }
}

/// DTO for creating or replacing a card template.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertCardTemplate {
    pub card_name: String,
    pub issuer: String,
    pub annual_fee: Option<f64>,
    pub effective_date: NaiveDate,
    pub benefits: Vec<BenefitDefinition>,
    pub plan_id: Option<String>,
    pub plan_version: Option<i32>,
}

/// Whether an upsert created the template or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateOutcome {
    Created,
    Updated,
}
