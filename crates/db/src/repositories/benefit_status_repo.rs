//! Repository for the `benefit_statuses` table.

use perkcycle_core::types::{DbId, Timestamp};
use sqlx::{PgExecutor, PgPool};

use crate::models::benefit_status::{BenefitStatus, StatusUpsert, UpsertedStatus};

/// Column list for `benefit_statuses` queries.
const COLUMNS: &str = "\
    id, benefit_id, user_id, cycle_start_date, cycle_end_date, occurrence_index, \
    is_completed, completed_at, is_not_usable, used_amount, expiry_warned_at, \
    created_at, updated_at";

/// Provides operations for benefit statuses.
pub struct BenefitStatusRepo;

impl BenefitStatusRepo {
    /// Insert the occurrence, or refresh only its `cycle_end_date` when the
    /// key already exists. Account-holder fields are never written here.
    pub async fn upsert<'e, E: PgExecutor<'e>>(
        executor: E,
        input: &StatusUpsert,
    ) -> Result<UpsertedStatus, sqlx::Error> {
        let query = format!(
            "INSERT INTO benefit_statuses \
                 (benefit_id, user_id, cycle_start_date, cycle_end_date, occurrence_index) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (benefit_id, user_id, cycle_start_date, occurrence_index) \
             DO UPDATE SET cycle_end_date = EXCLUDED.cycle_end_date \
             RETURNING {COLUMNS}, (xmax = 0) AS created"
        );
        sqlx::query_as::<_, UpsertedStatus>(&query)
            .bind(input.key.benefit_id)
            .bind(input.key.user_id)
            .bind(input.key.cycle_start_date)
            .bind(input.cycle_end_date)
            .bind(input.key.occurrence_index)
            .fetch_one(executor)
            .await
    }

    /// Delete every status of the listed benefits. Returns rows removed.
    pub async fn delete_for_benefits<'e, E: PgExecutor<'e>>(
        executor: E,
        benefit_ids: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM benefit_statuses WHERE benefit_id = ANY($1)")
            .bind(benefit_ids)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }

    /// All statuses of a benefit, newest cycle first.
    pub async fn list_for_benefit(
        pool: &PgPool,
        benefit_id: DbId,
    ) -> Result<Vec<BenefitStatus>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM benefit_statuses \
             WHERE benefit_id = $1 \
             ORDER BY cycle_start_date DESC, occurrence_index"
        );
        sqlx::query_as::<_, BenefitStatus>(&query)
            .bind(benefit_id)
            .fetch_all(pool)
            .await
    }

    /// Record that the account holder used this occurrence.
    /// Returns `None` if the status does not exist.
    pub async fn mark_completed(
        pool: &PgPool,
        id: DbId,
        used_amount: Option<f64>,
    ) -> Result<Option<BenefitStatus>, sqlx::Error> {
        let query = format!(
            "UPDATE benefit_statuses SET \
                 is_completed = true, \
                 completed_at = COALESCE(completed_at, NOW()), \
                 used_amount = COALESCE($2, used_amount) \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BenefitStatus>(&query)
            .bind(id)
            .bind(used_amount)
            .fetch_optional(pool)
            .await
    }

    /// Record that the account holder cannot use this occurrence.
    /// Returns `None` if the status does not exist.
    pub async fn mark_not_usable(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<BenefitStatus>, sqlx::Error> {
        let query = format!(
            "UPDATE benefit_statuses SET is_not_usable = true \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, BenefitStatus>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Stamp `expiry_warned_at` on the listed statuses that have not been
    /// warned yet. Returns rows stamped.
    pub async fn mark_expiry_warned<'e, E: PgExecutor<'e>>(
        executor: E,
        ids: &[DbId],
        warned_at: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE benefit_statuses SET expiry_warned_at = $2 \
             WHERE id = ANY($1) AND expiry_warned_at IS NULL",
        )
        .bind(ids)
        .bind(warned_at)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}
