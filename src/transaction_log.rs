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

//! Append-only transaction log.
//!
//! The log is the source of truth for history and auditing: the account
//! balance must always equal the sum of the account's entries. Appends
//! happen inside the owning account's commit section, so entries for one
//! account are totally ordered; entries for different accounts append
//! concurrently without coordination.

use crate::base::{AccountId, Clock, TransactionId};
use crate::transaction::{Metadata, Transaction, TransactionKind};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fields the ledger supplies for a new entry; the log assigns the id and
/// timestamp.
pub(crate) struct TransactionDraft {
    pub account_id: AccountId,
    pub kind: TransactionKind,
    pub amount: i64,
    pub source: String,
    pub description: String,
    pub balance_before: i64,
    pub balance_after: i64,
    pub metadata: Metadata,
    pub idempotency_key: Option<String>,
}

/// Thread-safe append-only store of ledger transactions.
#[derive(Debug)]
pub struct TransactionLog {
    /// Monotonic id sequence; ids are globally unique, never reused.
    next_id: AtomicU64,

    /// Entries by id for O(1) lookup.
    by_id: DashMap<TransactionId, Arc<Transaction>>,

    /// Per-account history in append (= commit) order.
    by_account: DashMap<AccountId, Vec<Arc<Transaction>>>,

    /// Idempotency index: (account, key) to the entry that registered it.
    by_key: DashMap<(AccountId, String), Arc<Transaction>>,
}

impl TransactionLog {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            by_id: DashMap::new(),
            by_account: DashMap::new(),
            by_key: DashMap::new(),
        }
    }

    /// Appends an entry and returns it.
    ///
    /// Must only be called while holding the account's commit lock: the
    /// per-account history order and the timestamp clamp both rely on
    /// appends for one account being serialized.
    pub(crate) fn append(&self, clock: &dyn Clock, draft: TransactionDraft) -> Arc<Transaction> {
        debug_assert_eq!(
            draft.balance_after,
            draft.balance_before + draft.amount,
            "ledger entry must balance"
        );

        let id = TransactionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut history = self.by_account.entry(draft.account_id.clone()).or_default();

        // Clamp so per-account timestamps never run backwards, even if the
        // wall clock does.
        let now = clock.now();
        let timestamp = match history.last() {
            Some(prev) if prev.timestamp > now => prev.timestamp,
            _ => now,
        };

        let transaction = Arc::new(Transaction {
            id,
            account_id: draft.account_id.clone(),
            kind: draft.kind,
            amount: draft.amount,
            source: draft.source,
            description: draft.description,
            balance_before: draft.balance_before,
            balance_after: draft.balance_after,
            timestamp,
            metadata: draft.metadata,
            idempotency_key: draft.idempotency_key,
        });

        history.push(Arc::clone(&transaction));
        drop(history);

        self.by_id.insert(id, Arc::clone(&transaction));
        if let Some(key) = &transaction.idempotency_key {
            self.by_key.insert(
                (draft.account_id, key.clone()),
                Arc::clone(&transaction),
            );
        }

        transaction
    }

    /// Looks up an entry by id.
    pub fn get(&self, id: TransactionId) -> Option<Arc<Transaction>> {
        self.by_id.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// The entry registered under `(account, key)`, if any.
    pub fn find_by_idempotency_key(
        &self,
        account_id: &AccountId,
        key: &str,
    ) -> Option<Arc<Transaction>> {
        self.by_key
            .get(&(account_id.clone(), key.to_string()))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Full history for an account in commit order.
    pub fn account_transactions(&self, account_id: &AccountId) -> Vec<Arc<Transaction>> {
        self.by_account
            .get(account_id)
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    /// Entries for an account with `timestamp >= since`, in commit order.
    pub fn transactions_since(
        &self,
        account_id: &AccountId,
        since: DateTime<Utc>,
    ) -> Vec<Arc<Transaction>> {
        self.by_account
            .get(account_id)
            .map(|history| {
                history
                    .iter()
                    .filter(|tx| tx.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sum of conversion magnitudes for an account since `since`.
    ///
    /// This is the monthly-cap input: `abs(amount)` over CONVERSION entries.
    pub fn conversion_total_since(&self, account_id: &AccountId, since: DateTime<Utc>) -> i64 {
        self.by_account
            .get(account_id)
            .map(|history| {
                history
                    .iter()
                    .filter(|tx| tx.kind == TransactionKind::Conversion && tx.timestamp >= since)
                    .map(|tx| tx.magnitude())
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Replays an account's history: the balance the log alone implies.
    ///
    /// Reconciliation invariant: this always equals the live account balance.
    pub fn replayed_balance(&self, account_id: &AccountId) -> i64 {
        self.by_account
            .get(account_id)
            .map(|history| history.iter().map(|tx| tx.amount).sum())
            .unwrap_or(0)
    }

    pub fn account_transaction_count(&self, account_id: &AccountId) -> usize {
        self.by_account
            .get(account_id)
            .map(|history| history.len())
            .unwrap_or(0)
    }

    /// Total number of entries across all accounts.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
