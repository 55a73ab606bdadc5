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

//! Ledger service: the atomic balance primitives.
//!
//! The [`Ledger`] is the only component permitted to mutate account
//! balances. It exposes two public primitives, [`Ledger::charge`] and
//! [`Ledger::credit`], plus a crate-internal conversion primitive reached
//! through [`ConversionEngine`](crate::ConversionEngine).
//!
//! # Commit protocol
//!
//! Every mutation runs a snapshot/validate/commit cycle:
//!
//! 1. Snapshot `(balance, version)` without holding the account lock.
//! 2. Validate against the snapshot (insufficient balance fails here,
//!    before any mutation).
//! 3. Commit under the account mutex only if the version is unchanged; the
//!    balance write and the transaction-log append happen inside the same
//!    critical section.
//! 4. On a version conflict, retry from the snapshot, up to a bounded
//!    budget; exhaustion fails with `ConcurrentModification`.
//!
//! Two concurrent charges against the same balance therefore serialize:
//! one commits, the other's version check fails, and its retry sees the
//! reduced balance. The balance can never go negative.
//!
//! # Idempotency
//!
//! Both primitives accept an optional idempotency key. The key is looked up
//! at the top of every retry iteration and registered inside the committed
//! critical section, so a duplicate submission either observes the existing
//! transaction directly or loses the version race, retries, and then
//! observes it. Either way exactly one transaction is created.

use crate::account::{Account, AccountData, BalanceSnapshot};
use crate::base::{AccountId, Clock, SystemClock};
use crate::error::LedgerError;
use crate::transaction::{CreditKind, Metadata, Transaction, TransactionKind};
use crate::transaction_log::{TransactionDraft, TransactionLog};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A debit request: spend `amount` points from an account.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub account_id: AccountId,
    /// Points to debit; must be strictly positive.
    pub amount: i64,
    pub source: String,
    pub description: String,
    pub metadata: Metadata,
    pub idempotency_key: Option<String>,
}

impl ChargeRequest {
    pub fn new(account_id: impl Into<AccountId>, amount: i64, source: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            amount,
            source: source.into(),
            description: String::new(),
            metadata: Metadata::new(),
            idempotency_key: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// A credit request: add `amount` points to an account.
#[derive(Debug, Clone)]
pub struct CreditRequest {
    pub account_id: AccountId,
    /// Points to credit; must be strictly positive.
    pub amount: i64,
    pub kind: CreditKind,
    pub source: String,
    pub description: String,
    pub metadata: Metadata,
    pub idempotency_key: Option<String>,
}

impl CreditRequest {
    pub fn new(
        account_id: impl Into<AccountId>,
        amount: i64,
        kind: CreditKind,
        source: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            amount,
            kind,
            source: source.into(),
            description: String::new(),
            metadata: Metadata::new(),
            idempotency_key: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// Crate-internal conversion debit; built by the conversion engine after
/// policy checks pass.
pub(crate) struct ConversionDebit {
    pub account_id: AccountId,
    pub points: i64,
    pub credit_amount: Decimal,
    pub source: String,
    pub description: String,
    pub metadata: Metadata,
    pub idempotency_key: Option<String>,
}

/// The points ledger: account store plus transaction log.
///
/// # Invariants
///
/// - An account's balance always equals the sum of its log entries.
/// - Transactions for one account are linearized: each entry's
///   `balance_before` equals the previous entry's `balance_after`.
/// - Accounts are created implicitly with zero balance and never deleted.
pub struct Ledger {
    /// Accounts indexed by id.
    accounts: DashMap<AccountId, Arc<Account>>,
    /// Append-only audit trail.
    log: TransactionLog,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    /// Bounded optimistic-retry budget before `ConcurrentModification`.
    const MAX_COMMIT_ATTEMPTS: u32 = 8;

    /// Bounded wait for the account lock before `Timeout`.
    const LOCK_TIMEOUT: Duration = Duration::from_millis(250);

    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Ledger {
            accounts: DashMap::new(),
            log: TransactionLog::new(),
            clock,
        }
    }

    /// Current time from the ledger's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Read access to the append-only transaction log.
    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    /// Retrieves an account by id; `None` if it has never been touched.
    pub fn account(&self, account_id: &AccountId) -> Option<Arc<Account>> {
        self.accounts
            .get(account_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Iterates over all accounts, in no particular order.
    pub fn accounts(&self) -> impl Iterator<Item = Arc<Account>> + '_ {
        self.accounts.iter().map(|entry| Arc::clone(entry.value()))
    }

    /// Current balance for an account.
    pub fn balance(&self, account_id: &AccountId) -> Result<i64, LedgerError> {
        self.account(account_id)
            .map(|account| account.balance())
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.clone()))
    }

    /// Current subscription credit for an account.
    pub fn subscription_credit(&self, account_id: &AccountId) -> Result<Decimal, LedgerError> {
        self.account(account_id)
            .map(|account| account.subscription_credit())
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.clone()))
    }

    /// Debits points from an account.
    ///
    /// Atomically validates `balance >= amount` and commits the decrement
    /// together with a `SPEND` log entry (`amount = -request.amount`).
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - amount is zero or negative.
    /// - [`LedgerError::InsufficientBalance`] - balance is too low; carries
    ///   the current balance and the required amount, and nothing mutates.
    /// - [`LedgerError::ConcurrentModification`] - retry budget exhausted.
    /// - [`LedgerError::Timeout`] - account lock not acquired in time.
    pub fn charge(&self, request: ChargeRequest) -> Result<Arc<Transaction>, LedgerError> {
        if request.amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        self.commit_loop(
            &request.account_id,
            request.idempotency_key.as_deref(),
            |snapshot| {
                if snapshot.balance < request.amount {
                    Err(LedgerError::InsufficientBalance {
                        balance: snapshot.balance,
                        required: request.amount,
                    })
                } else {
                    Ok(())
                }
            },
            |data| {
                let before = data.balance;
                data.spend(request.amount)?;
                Ok(self.log.append(
                    self.clock.as_ref(),
                    TransactionDraft {
                        account_id: request.account_id.clone(),
                        kind: TransactionKind::Spend,
                        amount: -request.amount,
                        source: request.source.clone(),
                        description: request.description.clone(),
                        balance_before: before,
                        balance_after: data.balance,
                        metadata: request.metadata.clone(),
                        idempotency_key: request.idempotency_key.clone(),
                    },
                ))
            },
        )
    }

    /// Credits points to an account (`EARN` or `REFUND`).
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - amount is zero or negative; no
    ///   mutation is attempted.
    /// - [`LedgerError::ConcurrentModification`] / [`LedgerError::Timeout`] -
    ///   as for [`Ledger::charge`].
    pub fn credit(&self, request: CreditRequest) -> Result<Arc<Transaction>, LedgerError> {
        if request.amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        self.commit_loop(
            &request.account_id,
            request.idempotency_key.as_deref(),
            |_| Ok(()),
            |data| {
                let before = data.balance;
                data.credit(request.amount)?;
                Ok(self.log.append(
                    self.clock.as_ref(),
                    TransactionDraft {
                        account_id: request.account_id.clone(),
                        kind: request.kind.kind(),
                        amount: request.amount,
                        source: request.source.clone(),
                        description: request.description.clone(),
                        balance_before: before,
                        balance_after: data.balance,
                        metadata: request.metadata.clone(),
                        idempotency_key: request.idempotency_key.clone(),
                    },
                ))
            },
        )
    }

    /// Conversion primitive: debits points and increments subscription
    /// credit as one atomic unit, logging a `CONVERSION` entry whose
    /// metadata records the derived credit amount.
    ///
    /// Policy checks (minimum, monthly cap) live in
    /// [`ConversionEngine`](crate::ConversionEngine), which is the only
    /// caller.
    pub(crate) fn convert(
        &self,
        request: ConversionDebit,
    ) -> Result<Arc<Transaction>, LedgerError> {
        if request.points <= 0 || request.credit_amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }

        self.commit_loop(
            &request.account_id,
            request.idempotency_key.as_deref(),
            |snapshot| {
                if snapshot.balance < request.points {
                    Err(LedgerError::InsufficientBalance {
                        balance: snapshot.balance,
                        required: request.points,
                    })
                } else {
                    Ok(())
                }
            },
            |data| {
                let before = data.balance;
                data.convert(request.points, request.credit_amount)?;

                let mut metadata = request.metadata.clone();
                metadata.insert(
                    "credit_amount".to_string(),
                    serde_json::Value::String(request.credit_amount.to_string()),
                );

                Ok(self.log.append(
                    self.clock.as_ref(),
                    TransactionDraft {
                        account_id: request.account_id.clone(),
                        kind: TransactionKind::Conversion,
                        amount: -request.points,
                        source: request.source.clone(),
                        description: request.description.clone(),
                        balance_before: before,
                        balance_after: data.balance,
                        metadata,
                        idempotency_key: request.idempotency_key.clone(),
                    },
                ))
            },
        )
    }

    /// The balance implied by replaying the account's log entries.
    ///
    /// Always equals [`Ledger::balance`]; exposed for audits and tests.
    pub fn reconstructed_balance(&self, account_id: &AccountId) -> i64 {
        self.log.replayed_balance(account_id)
    }

    /// Gets the account, creating it with zero balance on first touch.
    fn get_or_create(&self, account_id: &AccountId) -> Arc<Account> {
        let entry = self
            .accounts
            .entry(account_id.clone())
            .or_insert_with(|| Arc::new(Account::new(account_id.clone())));
        Arc::clone(entry.value())
    }

    /// Snapshot/validate/commit cycle shared by the three primitives.
    fn commit_loop(
        &self,
        account_id: &AccountId,
        idempotency_key: Option<&str>,
        validate: impl Fn(BalanceSnapshot) -> Result<(), LedgerError>,
        apply: impl Fn(&mut AccountData) -> Result<Arc<Transaction>, LedgerError>,
    ) -> Result<Arc<Transaction>, LedgerError> {
        let account = self.get_or_create(account_id);

        for _ in 0..Self::MAX_COMMIT_ATTEMPTS {
            // A retried request may have committed on a previous attempt or
            // on another thread; return the recorded transaction as-is.
            if let Some(key) = idempotency_key {
                if let Some(existing) = self.log.find_by_idempotency_key(account_id, key) {
                    return Ok(existing);
                }
            }

            let snapshot = account.snapshot();
            if let Err(err) = validate(snapshot) {
                // A concurrent retry with the same key may have committed
                // between the key lookup and this snapshot; prefer the
                // recorded transaction over a stale validation failure.
                if let Some(key) = idempotency_key {
                    if let Some(existing) = self.log.find_by_idempotency_key(account_id, key) {
                        return Ok(existing);
                    }
                }
                return Err(err);
            }

            if let Some(transaction) =
                account.commit_if(snapshot.version, Self::LOCK_TIMEOUT, &apply)?
            {
                return Ok(transaction);
            }
            // Version moved between snapshot and lock; re-read and retry.
        }

        warn!(account = %account_id, "commit retry budget exhausted");
        Err(LedgerError::ConcurrentModification)
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}
