//! The storage seam the migration engine and materializer depend on.
//!
//! [`BenefitStore`] covers reads and writes that stand alone.
//! [`AccountTransaction`] is one account's atomic unit: every write made
//! through it lands together on [`AccountTransaction::commit`], and dropping
//! it without committing rolls everything back.

use std::time::Duration;

use async_trait::async_trait;
use perkcycle_core::benefit::BenefitDefinition;
use perkcycle_core::types::{DbId, Timestamp};

use crate::models::account_card::AccountCardInstance;
use crate::models::benefit::{Benefit, BenefitSnapshot};
use crate::models::benefit_status::{StatusUpsert, UpsertedStatus};
use crate::models::card_template::{TemplateOutcome, UpsertCardTemplate};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The caller's deadline for a unit of work elapsed.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Invalid stored row: {0}")]
    InvalidRow(String),
}

#[async_trait]
pub trait BenefitStore: Send + Sync {
    /// Every account holding the card product, with its benefits.
    async fn find_accounts_by_product(
        &self,
        card_name: &str,
    ) -> Result<Vec<AccountCardInstance>, StoreError>;

    /// One keyset page of accounts with `id > after`, ordered by ID.
    async fn list_accounts(
        &self,
        after: Option<DbId>,
        limit: i64,
    ) -> Result<Vec<AccountCardInstance>, StoreError>;

    async fn upsert_product_template(
        &self,
        template: &UpsertCardTemplate,
    ) -> Result<TemplateOutcome, StoreError>;

    /// Open the atomic unit for one account. Fails with `NotFound` when the
    /// account no longer exists.
    async fn begin_account(
        &self,
        account_id: DbId,
    ) -> Result<Box<dyn AccountTransaction>, StoreError>;

    /// Insert the occurrence or refresh its end date, outside any account unit.
    async fn upsert_status(&self, status: &StatusUpsert) -> Result<UpsertedStatus, StoreError>;

    /// Record that an "expiring soon" notice went out for these statuses.
    /// Already-stamped statuses keep their first stamp.
    async fn mark_expiry_warned(
        &self,
        status_ids: &[DbId],
        warned_at: Timestamp,
    ) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait AccountTransaction: Send {
    /// The account's benefits as seen inside this unit.
    async fn benefits(&mut self) -> Result<Vec<BenefitSnapshot>, StoreError>;

    async fn create_benefit(&mut self, definition: &BenefitDefinition)
        -> Result<Benefit, StoreError>;

    /// Delete every status of the listed benefits. Returns rows removed.
    async fn delete_statuses(&mut self, benefit_ids: &[DbId]) -> Result<u64, StoreError>;

    /// Delete the listed benefits of this account. Returns rows removed.
    async fn delete_benefits(&mut self, benefit_ids: &[DbId]) -> Result<u64, StoreError>;

    async fn upsert_status(&mut self, status: &StatusUpsert)
        -> Result<UpsertedStatus, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

impl std::fmt::Debug for dyn AccountTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccountTransaction")
    }
}
