//! Repository for the `benefits` table.

use perkcycle_core::benefit::BenefitDefinition;
use perkcycle_core::types::DbId;
use sqlx::PgExecutor;

use crate::models::benefit::{Benefit, BenefitSnapshot};

/// Column list for `benefits` queries.
const COLUMNS: &str = "\
    id, account_card_id, category, description, percentage, max_amount, \
    frequency, cycle_alignment, fixed_cycle_start_month, fixed_cycle_duration_months, \
    occurrences_in_cycle, created_at, updated_at";

/// Column list qualified with the `b` alias, for joins.
const QUALIFIED_COLUMNS: &str = "\
    b.id, b.account_card_id, b.category, b.description, b.percentage, b.max_amount, \
    b.frequency, b.cycle_alignment, b.fixed_cycle_start_month, b.fixed_cycle_duration_months, \
    b.occurrences_in_cycle, b.created_at, b.updated_at";

/// Provides operations for benefits bound to account cards.
pub struct BenefitRepo;

impl BenefitRepo {
    /// Bind a benefit definition to an account card.
    pub async fn create<'e, E: PgExecutor<'e>>(
        executor: E,
        account_card_id: DbId,
        definition: &BenefitDefinition,
    ) -> Result<Benefit, sqlx::Error> {
        let parts = definition.schedule.to_parts();
        let query = format!(
            "INSERT INTO benefits \
                 (account_card_id, category, description, percentage, max_amount, \
                  frequency, cycle_alignment, fixed_cycle_start_month, \
                  fixed_cycle_duration_months, occurrences_in_cycle) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Benefit>(&query)
            .bind(account_card_id)
            .bind(&definition.category)
            .bind(&definition.description)
            .bind(definition.percentage)
            .bind(definition.max_amount)
            .bind(parts.frequency.as_str())
            .bind(parts.alignment.as_str())
            .bind(parts.fixed_start_month)
            .bind(parts.fixed_duration_months)
            .bind(definition.occurrences_in_cycle as i32)
            .fetch_one(executor)
            .await
    }

    /// Benefits of the given accounts with their protection flag, ordered by
    /// account then benefit ID.
    pub async fn list_with_protection<'e, E: PgExecutor<'e>>(
        executor: E,
        account_card_ids: &[DbId],
    ) -> Result<Vec<BenefitSnapshot>, sqlx::Error> {
        let query = format!(
            "SELECT {QUALIFIED_COLUMNS}, \
                 EXISTS ( \
                     SELECT 1 FROM benefit_statuses s \
                     WHERE s.benefit_id = b.id AND (s.is_completed OR s.is_not_usable) \
                 ) AS is_protected \
             FROM benefits b \
             WHERE b.account_card_id = ANY($1) \
             ORDER BY b.account_card_id, b.id"
        );
        sqlx::query_as::<_, BenefitSnapshot>(&query)
            .bind(account_card_ids)
            .fetch_all(executor)
            .await
    }

    /// Delete the listed benefits of one account. IDs belonging to other
    /// accounts are ignored. Returns the number of rows removed.
    pub async fn delete_for_account<'e, E: PgExecutor<'e>>(
        executor: E,
        account_card_id: DbId,
        ids: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM benefits WHERE account_card_id = $1 AND id = ANY($2)")
                .bind(account_card_id)
                .bind(ids)
                .execute(executor)
                .await?;
        Ok(result.rows_affected())
    }
}
