// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Marketplace purchase orchestration.
//!
//! A purchase is: catalog lookup, expiration computation, ledger charge,
//! purchase record, notification. The charge is the point of no return —
//! if the record insert fails afterwards, the charge stays committed and
//! the failure is surfaced as [`LedgerError::PurchaseRecordFailure`] so an
//! operator can recreate the record from the transaction log. Re-crediting
//! automatically would risk double-crediting when only the insert
//! acknowledgement was lost.

use crate::base::{AccountId, PurchaseId, TransactionId};
use crate::catalog::Catalog;
use crate::error::LedgerError;
use crate::ledger::{ChargeRequest, Ledger};
use crate::notify::{Notification, Notifier};
use crate::transaction::{Metadata, Transaction};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::error;

/// Purchase lifecycle state.
///
/// `Active -> Expired` is time-driven and evaluated at read time;
/// `Active -> Cancelled` is an explicit action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseStatus {
    Active,
    Expired,
    Cancelled,
}

/// A marketplace purchase record, created only after the ledger debit
/// committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: PurchaseId,
    pub account_id: AccountId,
    pub product_id: String,
    pub product_name: String,
    pub points_spent: i64,
    pub purchased_at: DateTime<Utc>,
    /// `None` means the purchase never expires.
    pub expires_at: Option<DateTime<Utc>>,
    pub status: PurchaseStatus,
    /// The committed ledger debit backing this purchase.
    pub transaction_id: TransactionId,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl Purchase {
    /// Status with expiry evaluated against `now`.
    pub fn effective_status(&self, now: DateTime<Utc>) -> PurchaseStatus {
        match (self.status, self.expires_at) {
            (PurchaseStatus::Active, Some(expires_at)) if expires_at <= now => {
                PurchaseStatus::Expired
            }
            (status, _) => status,
        }
    }
}

/// Purchase store rejected a write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("purchase store error: {0}")]
pub struct PurchaseStoreError(pub String);

/// Persistence seam for purchase records.
pub trait PurchaseStore: Send + Sync {
    fn insert(&self, purchase: Purchase) -> Result<(), PurchaseStoreError>;
    fn get(&self, id: PurchaseId) -> Option<Purchase>;
    /// All purchases for an account, oldest first.
    fn account_purchases(&self, account_id: &AccountId) -> Vec<Purchase>;
}

/// In-memory purchase store.
#[derive(Debug, Default)]
pub struct InMemoryPurchaseStore {
    by_id: DashMap<PurchaseId, Purchase>,
    by_account: DashMap<AccountId, Vec<PurchaseId>>,
}

impl InMemoryPurchaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PurchaseStore for InMemoryPurchaseStore {
    fn insert(&self, purchase: Purchase) -> Result<(), PurchaseStoreError> {
        self.by_account
            .entry(purchase.account_id.clone())
            .or_default()
            .push(purchase.id);
        self.by_id.insert(purchase.id, purchase);
        Ok(())
    }

    fn get(&self, id: PurchaseId) -> Option<Purchase> {
        self.by_id.get(&id).map(|entry| entry.value().clone())
    }

    fn account_purchases(&self, account_id: &AccountId) -> Vec<Purchase> {
        self.by_account
            .get(account_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.by_id.get(id).map(|entry| entry.value().clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Result of a successful purchase.
#[derive(Debug, Clone)]
pub struct PurchaseReceipt {
    pub purchase: Purchase,
    pub transaction: Arc<Transaction>,
    /// Point balance after the charge.
    pub balance: i64,
}

/// Validates a product, charges the ledger, and records the purchase.
pub struct Marketplace {
    ledger: Arc<Ledger>,
    catalog: Arc<dyn Catalog>,
    store: Arc<dyn PurchaseStore>,
    notifier: Notifier,
    next_purchase_id: AtomicU64,
}

impl Marketplace {
    pub fn new(
        ledger: Arc<Ledger>,
        catalog: Arc<dyn Catalog>,
        store: Arc<dyn PurchaseStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            ledger,
            catalog,
            store,
            notifier,
            next_purchase_id: AtomicU64::new(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn PurchaseStore> {
        &self.store
    }

    /// Purchases `product_id` for `account_id`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::ProductNotFound`] - unknown or unavailable product;
    ///   checked before any mutation.
    /// - [`LedgerError::InsufficientBalance`] - carries the current balance
    ///   and required amount for client display.
    /// - [`LedgerError::PurchaseRecordFailure`] - charge committed but the
    ///   record insert failed; points remain spent.
    pub fn purchase(
        &self,
        account_id: &AccountId,
        product_id: &str,
        metadata: Metadata,
        idempotency_key: Option<String>,
    ) -> Result<PurchaseReceipt, LedgerError> {
        let product = self
            .catalog
            .product(product_id)
            .filter(|product| product.available)
            .ok_or_else(|| LedgerError::ProductNotFound(product_id.to_string()))?;

        let purchase_id = PurchaseId(self.next_purchase_id.fetch_add(1, Ordering::Relaxed));

        let mut charge_metadata = metadata.clone();
        charge_metadata.insert(
            "purchase_id".to_string(),
            serde_json::json!(purchase_id.0),
        );
        charge_metadata.insert("product_id".to_string(), serde_json::json!(product.id));

        let mut request = ChargeRequest::new(
            account_id.clone(),
            product.points_cost,
            format!("marketplace_{}", product.id),
        )
        .description(format!("Purchased: {}", product.name))
        .metadata(charge_metadata);
        if let Some(key) = idempotency_key {
            request = request.idempotency_key(key);
        }

        let transaction = self.ledger.charge(request)?;

        // An idempotent retry returns the original transaction; its metadata
        // points at the purchase record the first attempt created.
        if let Some(existing_id) = transaction
            .metadata
            .get("purchase_id")
            .and_then(|value| value.as_u64())
            .filter(|id| *id != purchase_id.0)
        {
            if let Some(existing) = self.store.get(PurchaseId(existing_id)) {
                return Ok(PurchaseReceipt {
                    balance: transaction.balance_after,
                    purchase: existing,
                    transaction,
                });
            }
        }

        let purchase = Purchase {
            id: purchase_id,
            account_id: account_id.clone(),
            product_id: product.id.clone(),
            product_name: product.name.clone(),
            points_spent: product.points_cost,
            purchased_at: transaction.timestamp,
            expires_at: product.duration.expires_at(transaction.timestamp),
            status: PurchaseStatus::Active,
            transaction_id: transaction.id,
            metadata,
        };

        if let Err(err) = self.store.insert(purchase.clone()) {
            error!(
                account = %account_id,
                transaction = %transaction.id,
                %err,
                "purchase record creation failed after charge committed"
            );
            return Err(LedgerError::PurchaseRecordFailure {
                transaction_id: transaction.id,
            });
        }

        self.notifier.send(Notification {
            account_id: account_id.clone(),
            kind: "purchase".to_string(),
            title: "Purchase complete".to_string(),
            message: format!("You purchased {}", product.name),
            action_link: Some(format!("/purchases/{}", purchase.id)),
        });

        Ok(PurchaseReceipt {
            balance: transaction.balance_after,
            purchase,
            transaction,
        })
    }

    /// Purchases for an account with expiry evaluated at read time.
    pub fn account_purchases(&self, account_id: &AccountId) -> Vec<Purchase> {
        let now = self.ledger.now();
        self.store
            .account_purchases(account_id)
            .into_iter()
            .map(|mut purchase| {
                purchase.status = purchase.effective_status(now);
                purchase
            })
            .collect()
    }
}
