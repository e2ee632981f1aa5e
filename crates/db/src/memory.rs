//! In-memory [`BenefitStore`] for tests and local runs without PostgreSQL.
//!
//! An account unit works on a private copy of that account's benefits and
//! statuses and swaps it in on commit. Dropping the unit discards the copy.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use perkcycle_core::benefit::BenefitDefinition;
use perkcycle_core::types::{DbId, Timestamp};

use crate::models::account_card::{AccountCard, AccountCardInstance, CreateAccountCard};
use crate::models::benefit::{Benefit, BenefitSnapshot};
use crate::models::benefit_status::{BenefitStatus, StatusUpsert, UpsertedStatus};
use crate::models::card_template::{TemplateOutcome, UpsertCardTemplate};
use crate::store::{AccountTransaction, BenefitStore, StoreError};

#[derive(Default)]
struct MemoryState {
    accounts: BTreeMap<DbId, AccountCard>,
    benefits: BTreeMap<DbId, Benefit>,
    statuses: BTreeMap<DbId, BenefitStatus>,
    templates: BTreeMap<String, UpsertCardTemplate>,
    failing_accounts: HashSet<DbId>,
    failing_status_benefits: HashSet<DbId>,
}

impl MemoryState {
    fn snapshots_for(&self, account_id: DbId) -> Vec<BenefitSnapshot> {
        self.benefits
            .values()
            .filter(|b| b.account_card_id == account_id)
            .map(|b| BenefitSnapshot {
                benefit: b.clone(),
                is_protected: is_protected(&self.statuses, b.id),
            })
            .collect()
    }

    fn instances(&self, accounts: Vec<AccountCard>) -> Vec<AccountCardInstance> {
        accounts
            .into_iter()
            .map(|account| AccountCardInstance {
                benefits: self.snapshots_for(account.id),
                account,
            })
            .collect()
    }
}

fn is_protected(statuses: &BTreeMap<DbId, BenefitStatus>, benefit_id: DbId) -> bool {
    statuses
        .values()
        .any(|s| s.benefit_id == benefit_id && s.is_protected())
}

/// Insert-or-refresh with the same rules as the SQL upsert: only
/// `cycle_end_date` changes on conflict.
fn upsert_into(
    statuses: &mut BTreeMap<DbId, BenefitStatus>,
    ids: &AtomicI64,
    input: &StatusUpsert,
) -> UpsertedStatus {
    let now = Utc::now();
    if let Some(existing) = statuses.values_mut().find(|s| s.key() == input.key) {
        existing.cycle_end_date = input.cycle_end_date;
        existing.updated_at = now;
        return UpsertedStatus {
            status: existing.clone(),
            created: false,
        };
    }

    let status = BenefitStatus {
        id: ids.fetch_add(1, Ordering::SeqCst),
        benefit_id: input.key.benefit_id,
        user_id: input.key.user_id,
        cycle_start_date: input.key.cycle_start_date,
        cycle_end_date: input.cycle_end_date,
        occurrence_index: input.key.occurrence_index,
        is_completed: false,
        completed_at: None,
        is_not_usable: false,
        used_amount: None,
        expiry_warned_at: None,
        created_at: now,
        updated_at: now,
    };
    statuses.insert(status.id, status.clone());
    UpsertedStatus {
        status,
        created: true,
    }
}

fn injected_failure(what: &str, id: DbId) -> StoreError {
    StoreError::Database(sqlx::Error::Protocol(format!("injected failure: {what} {id}")))
}

#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    ids: Arc<AtomicI64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            ids: Arc::new(AtomicI64::new(1)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(&self) -> DbId {
        self.ids.fetch_add(1, Ordering::SeqCst)
    }

    // -- seeding --------------------------------------------------------------

    pub fn insert_account(&self, input: CreateAccountCard) -> AccountCard {
        let now = Utc::now();
        let account = AccountCard {
            id: self.next_id(),
            user_id: input.user_id,
            card_name: input.card_name,
            opened_date: input.opened_date,
            notification_email: input.notification_email,
            created_at: now,
            updated_at: now,
        };
        self.state().accounts.insert(account.id, account.clone());
        account
    }

    pub fn insert_benefit(&self, account_id: DbId, definition: &BenefitDefinition) -> Benefit {
        let benefit = new_benefit(self.next_id(), account_id, definition);
        self.state().benefits.insert(benefit.id, benefit.clone());
        benefit
    }

    /// Store a benefit row exactly as given, apart from a fresh ID. Used to
    /// seed rows whose schedule columns are inconsistent.
    pub fn insert_benefit_row(&self, mut benefit: Benefit) -> Benefit {
        benefit.id = self.next_id();
        self.state().benefits.insert(benefit.id, benefit.clone());
        benefit
    }

    pub fn seed_status(&self, input: &StatusUpsert) -> BenefitStatus {
        upsert_into(&mut self.state().statuses, &self.ids, input).status
    }

    /// Returns `false` if the status does not exist.
    pub fn mark_completed(&self, status_id: DbId, used_amount: Option<f64>) -> bool {
        let mut state = self.state();
        let Some(status) = state.statuses.get_mut(&status_id) else {
            return false;
        };
        status.is_completed = true;
        status.completed_at.get_or_insert_with(Utc::now);
        if used_amount.is_some() {
            status.used_amount = used_amount;
        }
        true
    }

    /// Returns `false` if the status does not exist.
    pub fn mark_not_usable(&self, status_id: DbId) -> bool {
        match self.state().statuses.get_mut(&status_id) {
            Some(status) => {
                status.is_not_usable = true;
                true
            }
            None => false,
        }
    }

    // -- failure injection ----------------------------------------------------

    /// Make every commit of this account's unit fail.
    pub fn fail_transactions_for(&self, account_id: DbId) {
        self.state().failing_accounts.insert(account_id);
    }

    /// Make every standalone status upsert for this benefit fail.
    pub fn fail_status_upserts_for(&self, benefit_id: DbId) {
        self.state().failing_status_benefits.insert(benefit_id);
    }

    // -- inspection -----------------------------------------------------------

    pub fn benefits_for(&self, account_id: DbId) -> Vec<Benefit> {
        self.state()
            .benefits
            .values()
            .filter(|b| b.account_card_id == account_id)
            .cloned()
            .collect()
    }

    pub fn statuses_for(&self, benefit_id: DbId) -> Vec<BenefitStatus> {
        self.state()
            .statuses
            .values()
            .filter(|s| s.benefit_id == benefit_id)
            .cloned()
            .collect()
    }

    pub fn statuses(&self) -> Vec<BenefitStatus> {
        self.state().statuses.values().cloned().collect()
    }

    pub fn template(&self, card_name: &str) -> Option<UpsertCardTemplate> {
        self.state().templates.get(card_name).cloned()
    }
}

fn new_benefit(id: DbId, account_card_id: DbId, definition: &BenefitDefinition) -> Benefit {
    let parts = definition.schedule.to_parts();
    let now = Utc::now();
    Benefit {
        id,
        account_card_id,
        category: definition.category.clone(),
        description: definition.description.clone(),
        percentage: definition.percentage,
        max_amount: definition.max_amount,
        frequency: parts.frequency.as_str().to_string(),
        cycle_alignment: parts.alignment.as_str().to_string(),
        fixed_cycle_start_month: parts.fixed_start_month,
        fixed_cycle_duration_months: parts.fixed_duration_months,
        occurrences_in_cycle: definition.occurrences_in_cycle as i32,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl BenefitStore for MemoryStore {
    async fn find_accounts_by_product(
        &self,
        card_name: &str,
    ) -> Result<Vec<AccountCardInstance>, StoreError> {
        let state = self.state();
        let accounts = state
            .accounts
            .values()
            .filter(|a| a.card_name == card_name)
            .cloned()
            .collect();
        Ok(state.instances(accounts))
    }

    async fn list_accounts(
        &self,
        after: Option<DbId>,
        limit: i64,
    ) -> Result<Vec<AccountCardInstance>, StoreError> {
        let state = self.state();
        let after = after.unwrap_or(0);
        let accounts = state
            .accounts
            .range(after + 1..)
            .map(|(_, a)| a.clone())
            .take(usize::try_from(limit).unwrap_or(0))
            .collect();
        Ok(state.instances(accounts))
    }

    async fn upsert_product_template(
        &self,
        template: &UpsertCardTemplate,
    ) -> Result<TemplateOutcome, StoreError> {
        let previous = self
            .state()
            .templates
            .insert(template.card_name.clone(), template.clone());
        Ok(match previous {
            Some(_) => TemplateOutcome::Updated,
            None => TemplateOutcome::Created,
        })
    }

    async fn begin_account(
        &self,
        account_id: DbId,
    ) -> Result<Box<dyn AccountTransaction>, StoreError> {
        let state = self.state();
        if !state.accounts.contains_key(&account_id) {
            return Err(StoreError::NotFound {
                entity: "Account card",
                id: account_id,
            });
        }

        let benefits: BTreeMap<DbId, Benefit> = state
            .benefits
            .iter()
            .filter(|(_, b)| b.account_card_id == account_id)
            .map(|(id, b)| (*id, b.clone()))
            .collect();
        let statuses = state
            .statuses
            .iter()
            .filter(|(_, s)| benefits.contains_key(&s.benefit_id))
            .map(|(id, s)| (*id, s.clone()))
            .collect();

        Ok(Box::new(MemoryAccountTransaction {
            store: self.clone(),
            account_id,
            original_benefits: benefits.keys().copied().collect(),
            benefits,
            statuses,
        }))
    }

    async fn upsert_status(&self, status: &StatusUpsert) -> Result<UpsertedStatus, StoreError> {
        let mut state = self.state();
        if state.failing_status_benefits.contains(&status.key.benefit_id) {
            return Err(injected_failure("status upsert for benefit", status.key.benefit_id));
        }
        Ok(upsert_into(&mut state.statuses, &self.ids, status))
    }

    async fn mark_expiry_warned(
        &self,
        status_ids: &[DbId],
        warned_at: Timestamp,
    ) -> Result<u64, StoreError> {
        let mut state = self.state();
        let mut marked = 0;
        for id in status_ids {
            if let Some(status) = state.statuses.get_mut(id) {
                if status.expiry_warned_at.is_none() {
                    status.expiry_warned_at = Some(warned_at);
                    marked += 1;
                }
            }
        }
        Ok(marked)
    }
}

struct MemoryAccountTransaction {
    store: MemoryStore,
    account_id: DbId,
    original_benefits: HashSet<DbId>,
    benefits: BTreeMap<DbId, Benefit>,
    statuses: BTreeMap<DbId, BenefitStatus>,
}

#[async_trait]
impl AccountTransaction for MemoryAccountTransaction {
    async fn benefits(&mut self) -> Result<Vec<BenefitSnapshot>, StoreError> {
        Ok(self
            .benefits
            .values()
            .map(|b| BenefitSnapshot {
                benefit: b.clone(),
                is_protected: is_protected(&self.statuses, b.id),
            })
            .collect())
    }

    async fn create_benefit(
        &mut self,
        definition: &BenefitDefinition,
    ) -> Result<Benefit, StoreError> {
        let benefit = new_benefit(self.store.next_id(), self.account_id, definition);
        self.benefits.insert(benefit.id, benefit.clone());
        Ok(benefit)
    }

    async fn delete_statuses(&mut self, benefit_ids: &[DbId]) -> Result<u64, StoreError> {
        let before = self.statuses.len();
        self.statuses.retain(|_, s| !benefit_ids.contains(&s.benefit_id));
        Ok((before - self.statuses.len()) as u64)
    }

    async fn delete_benefits(&mut self, benefit_ids: &[DbId]) -> Result<u64, StoreError> {
        let before = self.benefits.len();
        self.benefits.retain(|id, _| !benefit_ids.contains(id));
        Ok((before - self.benefits.len()) as u64)
    }

    async fn upsert_status(
        &mut self,
        status: &StatusUpsert,
    ) -> Result<UpsertedStatus, StoreError> {
        if !self.benefits.contains_key(&status.key.benefit_id) {
            return Err(StoreError::NotFound {
                entity: "Benefit",
                id: status.key.benefit_id,
            });
        }
        Ok(upsert_into(&mut self.statuses, &self.store.ids, status))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut state = self.store.state();
        if state.failing_accounts.contains(&self.account_id) {
            return Err(injected_failure("commit for account", self.account_id));
        }

        state
            .statuses
            .retain(|_, s| !self.original_benefits.contains(&s.benefit_id));
        state
            .benefits
            .retain(|id, _| !self.original_benefits.contains(id));
        state.benefits.extend(self.benefits.clone());
        state.statuses.extend(self.statuses.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate};
    use perkcycle_core::benefit::CycleSchedule;

    use super::*;
    use crate::models::benefit_status::StatusKey;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn seeded() -> (MemoryStore, AccountCard, Benefit) {
        let store = MemoryStore::new();
        let account = store.insert_account(CreateAccountCard {
            user_id: 7,
            card_name: "Gold".into(),
            opened_date: NaiveDate::from_ymd_opt(2020, 3, 15),
            notification_email: None,
        });
        let benefit = store.insert_benefit(
            account.id,
            &BenefitDefinition::new("Dining", "Monthly dining credit", CycleSchedule::Monthly),
        );
        (store, account, benefit)
    }

    fn upsert_for(benefit: &Benefit, start: &str, end: &str) -> StatusUpsert {
        StatusUpsert {
            key: StatusKey {
                benefit_id: benefit.id,
                user_id: 7,
                cycle_start_date: at(start),
                occurrence_index: 0,
            },
            cycle_end_date: at(end),
        }
    }

    #[tokio::test]
    async fn upsert_refreshes_end_date_only() {
        let (store, _, benefit) = seeded();
        let first = store
            .upsert_status(&upsert_for(&benefit, "2025-01-01T00:00:00Z", "2025-01-30T00:00:00Z"))
            .await
            .unwrap();
        assert!(first.created);
        assert!(store.mark_completed(first.status.id, Some(10.0)));

        let second = store
            .upsert_status(&upsert_for(&benefit, "2025-01-01T00:00:00Z", "2025-01-31T23:59:59Z"))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.status.id, first.status.id);
        assert_eq!(second.status.cycle_end_date, at("2025-01-31T23:59:59Z"));
        assert!(second.status.is_completed);
        assert_eq!(second.status.used_amount, Some(10.0));
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let (store, account, benefit) = seeded();
        {
            let mut tx = store.begin_account(account.id).await.unwrap();
            tx.delete_benefits(&[benefit.id]).await.unwrap();
            tx.create_benefit(&BenefitDefinition::new("Travel", "Annual", CycleSchedule::Yearly))
                .await
                .unwrap();
        }
        let benefits = store.benefits_for(account.id);
        assert_eq!(benefits.len(), 1);
        assert_eq!(benefits[0].id, benefit.id);
    }

    #[tokio::test]
    async fn commit_swaps_in_staged_rows() {
        let (store, account, benefit) = seeded();
        store.seed_status(&upsert_for(&benefit, "2025-01-01T00:00:00Z", "2025-01-31T00:00:00Z"));

        let mut tx = store.begin_account(account.id).await.unwrap();
        tx.delete_statuses(&[benefit.id]).await.unwrap();
        tx.delete_benefits(&[benefit.id]).await.unwrap();
        let created = tx
            .create_benefit(&BenefitDefinition::new("Travel", "Annual", CycleSchedule::Yearly))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let benefits = store.benefits_for(account.id);
        assert_eq!(benefits.len(), 1);
        assert_eq!(benefits[0].id, created.id);
        assert!(store.statuses_for(benefit.id).is_empty());
    }

    #[tokio::test]
    async fn injected_commit_failure_leaves_state_untouched() {
        let (store, account, benefit) = seeded();
        store.fail_transactions_for(account.id);

        let mut tx = store.begin_account(account.id).await.unwrap();
        tx.delete_benefits(&[benefit.id]).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert_eq!(store.benefits_for(account.id).len(), 1);
    }

    #[tokio::test]
    async fn begin_on_missing_account_is_not_found() {
        let store = MemoryStore::new();
        let result = store.begin_account(99).await;
        assert!(matches!(result, Err(StoreError::NotFound { id: 99, .. })));
    }

    #[tokio::test]
    async fn list_accounts_pages_by_id() {
        let store = MemoryStore::new();
        let ids: Vec<DbId> = (0..5)
            .map(|i| {
                store
                    .insert_account(CreateAccountCard {
                        user_id: i,
                        card_name: "Gold".into(),
                        opened_date: None,
                        notification_email: None,
                    })
                    .id
            })
            .collect();

        let first = store.list_accounts(None, 2).await.unwrap();
        assert_eq!(first.iter().map(|i| i.id()).collect::<Vec<_>>(), ids[..2]);
        let rest = store.list_accounts(Some(ids[1]), 10).await.unwrap();
        assert_eq!(rest.iter().map(|i| i.id()).collect::<Vec<_>>(), ids[2..]);
    }
}
