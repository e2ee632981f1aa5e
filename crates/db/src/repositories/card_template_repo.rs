//! Repository for the `card_templates` table.

use sqlx::PgPool;

use crate::models::card_template::{CardTemplate, UpsertCardTemplate};

/// Column list for `card_templates` queries.
const COLUMNS: &str = "\
    id, card_name, issuer, annual_fee, effective_date, benefits, \
    plan_id, plan_version, created_at, updated_at";

/// Provides operations for card product templates.
pub struct CardTemplateRepo;

impl CardTemplateRepo {
    /// Create the template for a card, or replace its benefit list and
    /// metadata. The boolean is `true` when the row was newly created.
    pub async fn upsert(
        pool: &PgPool,
        input: &UpsertCardTemplate,
    ) -> Result<(CardTemplate, bool), sqlx::Error> {
        let benefits = serde_json::to_value(&input.benefits)
            .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        let query = format!(
            "INSERT INTO card_templates \
                 (card_name, issuer, annual_fee, effective_date, benefits, plan_id, plan_version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (card_name) DO UPDATE SET \
                 issuer = EXCLUDED.issuer, \
                 annual_fee = COALESCE(EXCLUDED.annual_fee, card_templates.annual_fee), \
                 effective_date = EXCLUDED.effective_date, \
                 benefits = EXCLUDED.benefits, \
                 plan_id = EXCLUDED.plan_id, \
                 plan_version = EXCLUDED.plan_version \
             RETURNING {COLUMNS}, (xmax = 0) AS created"
        );
        let row = sqlx::query_as::<_, TemplateRow>(&query)
            .bind(&input.card_name)
            .bind(&input.issuer)
            .bind(input.annual_fee)
            .bind(input.effective_date)
            .bind(benefits)
            .bind(&input.plan_id)
            .bind(input.plan_version)
            .fetch_one(pool)
            .await?;
        Ok((row.template, row.created))
    }

    /// Find the template for a card product.
    pub async fn find_by_card_name(
        pool: &PgPool,
        card_name: &str,
    ) -> Result<Option<CardTemplate>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM card_templates WHERE card_name = $1");
        sqlx::query_as::<_, CardTemplate>(&query)
            .bind(card_name)
            .fetch_optional(pool)
            .await
    }
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    #[sqlx(flatten)]
    template: CardTemplate,
    created: bool,
}
