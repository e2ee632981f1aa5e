//! PostgreSQL implementation of [`BenefitStore`].

use std::time::Duration;

use async_trait::async_trait;
use perkcycle_core::benefit::BenefitDefinition;
use perkcycle_core::types::{DbId, Timestamp};
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::account_card::{AccountCard, AccountCardInstance};
use crate::models::benefit::{Benefit, BenefitSnapshot};
use crate::models::benefit_status::{StatusUpsert, UpsertedStatus};
use crate::models::card_template::{TemplateOutcome, UpsertCardTemplate};
use crate::repositories::{AccountCardRepo, BenefitRepo, BenefitStatusRepo, CardTemplateRepo};
use crate::store::{AccountTransaction, BenefitStore, StoreError};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    statement_timeout: Option<Duration>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: None,
        }
    }

    /// Bound every statement inside an account unit with `SET LOCAL
    /// statement_timeout`.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn with_benefits(
        &self,
        accounts: Vec<AccountCard>,
    ) -> Result<Vec<AccountCardInstance>, StoreError> {
        if accounts.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<DbId> = accounts.iter().map(|a| a.id).collect();
        let snapshots = BenefitRepo::list_with_protection(&self.pool, &ids).await?;
        Ok(AccountCardInstance::assemble(accounts, snapshots))
    }
}

#[async_trait]
impl BenefitStore for PgStore {
    async fn find_accounts_by_product(
        &self,
        card_name: &str,
    ) -> Result<Vec<AccountCardInstance>, StoreError> {
        let accounts = AccountCardRepo::list_by_card_name(&self.pool, card_name).await?;
        self.with_benefits(accounts).await
    }

    async fn list_accounts(
        &self,
        after: Option<DbId>,
        limit: i64,
    ) -> Result<Vec<AccountCardInstance>, StoreError> {
        let accounts = AccountCardRepo::list_page(&self.pool, after, limit).await?;
        self.with_benefits(accounts).await
    }

    async fn upsert_product_template(
        &self,
        template: &UpsertCardTemplate,
    ) -> Result<TemplateOutcome, StoreError> {
        let (row, created) = CardTemplateRepo::upsert(&self.pool, template).await?;
        tracing::info!(
            template_id = row.id,
            card_name = %row.card_name,
            created,
            "Card template upserted",
        );
        Ok(if created {
            TemplateOutcome::Created
        } else {
            TemplateOutcome::Updated
        })
    }

    async fn begin_account(
        &self,
        account_id: DbId,
    ) -> Result<Box<dyn AccountTransaction>, StoreError> {
        let mut tx = self.pool.begin().await?;

        if let Some(timeout) = self.statement_timeout {
            // SET does not accept bind parameters; the value is an integer.
            let query = format!("SET LOCAL statement_timeout = {}", timeout.as_millis());
            sqlx::query(&query).execute(&mut *tx).await?;
        }

        let locked: Option<(DbId,)> =
            sqlx::query_as("SELECT id FROM account_cards WHERE id = $1 FOR UPDATE")
                .bind(account_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(StoreError::NotFound {
                entity: "Account card",
                id: account_id,
            });
        }

        Ok(Box::new(PgAccountTransaction { tx, account_id }))
    }

    async fn upsert_status(&self, status: &StatusUpsert) -> Result<UpsertedStatus, StoreError> {
        Ok(BenefitStatusRepo::upsert(&self.pool, status).await?)
    }

    async fn mark_expiry_warned(
        &self,
        status_ids: &[DbId],
        warned_at: Timestamp,
    ) -> Result<u64, StoreError> {
        if status_ids.is_empty() {
            return Ok(0);
        }
        Ok(BenefitStatusRepo::mark_expiry_warned(&self.pool, status_ids, warned_at).await?)
    }
}

/// An open transaction holding the row lock on one account card.
pub struct PgAccountTransaction {
    tx: Transaction<'static, Postgres>,
    account_id: DbId,
}

#[async_trait]
impl AccountTransaction for PgAccountTransaction {
    async fn benefits(&mut self) -> Result<Vec<BenefitSnapshot>, StoreError> {
        Ok(BenefitRepo::list_with_protection(&mut *self.tx, &[self.account_id]).await?)
    }

    async fn create_benefit(
        &mut self,
        definition: &BenefitDefinition,
    ) -> Result<Benefit, StoreError> {
        Ok(BenefitRepo::create(&mut *self.tx, self.account_id, definition).await?)
    }

    async fn delete_statuses(&mut self, benefit_ids: &[DbId]) -> Result<u64, StoreError> {
        Ok(BenefitStatusRepo::delete_for_benefits(&mut *self.tx, benefit_ids).await?)
    }

    async fn delete_benefits(&mut self, benefit_ids: &[DbId]) -> Result<u64, StoreError> {
        Ok(BenefitRepo::delete_for_account(&mut *self.tx, self.account_id, benefit_ids).await?)
    }

    async fn upsert_status(
        &mut self,
        status: &StatusUpsert,
    ) -> Result<UpsertedStatus, StoreError> {
        Ok(BenefitStatusRepo::upsert(&mut *self.tx, status).await?)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
