//! Account card ownership rows and the assembled per-account view.

use chrono::NaiveDate;
use perkcycle_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::benefit::BenefitSnapshot;

/// A row from the `account_cards` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct AccountCard {
    pub id: DbId,
    pub user_id: DbId,
    pub card_name: String,
    /// Absent for legacy accounts; anniversary-anchored cycles need it.
    pub opened_date: Option<NaiveDate>,
    pub notification_email: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for provisioning an account card.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccountCard {
    pub user_id: DbId,
    pub card_name: String,
    pub opened_date: Option<NaiveDate>,
    pub notification_email: Option<String>,
}

/// An account card together with its bound benefits, in `id` order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountCardInstance {
    pub account: AccountCard,
    pub benefits: Vec<BenefitSnapshot>,
}

impl AccountCardInstance {
    /// Attach benefit snapshots to their accounts, preserving account order.
    pub fn assemble(accounts: Vec<AccountCard>, snapshots: Vec<BenefitSnapshot>) -> Vec<Self> {
        let mut instances: Vec<Self> = accounts
            .into_iter()
            .map(|account| Self {
                account,
                benefits: Vec::new(),
            })
            .collect();

        for snapshot in snapshots {
            if let Some(instance) = instances
                .iter_mut()
                .find(|i| i.account.id == snapshot.benefit.account_card_id)
            {
                instance.benefits.push(snapshot);
            }
        }
        instances
    }

    pub fn id(&self) -> DbId {
        self.account.id
    }
}
