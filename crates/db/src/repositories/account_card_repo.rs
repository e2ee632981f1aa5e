//! Repository for the `account_cards` table.

use perkcycle_core::types::DbId;
use sqlx::PgPool;

use crate::models::account_card::{AccountCard, CreateAccountCard};

/// Column list for `account_cards` queries.
const COLUMNS: &str =
    "id, user_id, card_name, opened_date, notification_email, created_at, updated_at";

/// Provides CRUD operations for account cards.
pub struct AccountCardRepo;

impl AccountCardRepo {
    /// Provision a new account card.
    pub async fn create(pool: &PgPool, input: &CreateAccountCard) -> Result<AccountCard, sqlx::Error> {
        let query = format!(
            "INSERT INTO account_cards (user_id, card_name, opened_date, notification_email) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AccountCard>(&query)
            .bind(input.user_id)
            .bind(&input.card_name)
            .bind(input.opened_date)
            .bind(&input.notification_email)
            .fetch_one(pool)
            .await
    }

    /// Find an account card by ID.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<AccountCard>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM account_cards WHERE id = $1");
        sqlx::query_as::<_, AccountCard>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// All account cards holding the given card product, ordered by ID.
    pub async fn list_by_card_name(
        pool: &PgPool,
        card_name: &str,
    ) -> Result<Vec<AccountCard>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM account_cards WHERE card_name = $1 ORDER BY id");
        sqlx::query_as::<_, AccountCard>(&query)
            .bind(card_name)
            .fetch_all(pool)
            .await
    }

    /// One keyset page of account cards with `id > after`, ordered by ID.
    pub async fn list_page(
        pool: &PgPool,
        after: Option<DbId>,
        limit: i64,
    ) -> Result<Vec<AccountCard>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM account_cards \
             WHERE id > COALESCE($1, 0) \
             ORDER BY id \
             LIMIT $2"
        );
        sqlx::query_as::<_, AccountCard>(&query)
            .bind(after)
            .bind(limit)
            .fetch_all(pool)
            .await
    }
}
