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

//! Read-only activity summaries over the transaction log.
//!
//! Reporting only: the aggregator tolerates staleness and must never be
//! used to authorize a charge.

use crate::base::{AccountId, start_of_month};
use crate::error::LedgerError;
use crate::ledger::Ledger;
use crate::transaction::TransactionKind;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

/// Totals for one slice of an account's history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActivityTotals {
    pub earned: i64,
    pub spent: i64,
    pub refunded: i64,
    pub converted: i64,
}

impl ActivityTotals {
    fn add(&mut self, kind: TransactionKind, magnitude: i64) {
        match kind {
            TransactionKind::Earn => self.earned += magnitude,
            TransactionKind::Spend => self.spent += magnitude,
            TransactionKind::Refund => self.refunded += magnitude,
            TransactionKind::Conversion => self.converted += magnitude,
        }
    }
}

/// Account activity summary: lifetime and current-calendar-month totals
/// plus the live balances.
#[derive(Debug, Clone, Serialize)]
pub struct ActivitySummary {
    pub account_id: AccountId,
    pub balance: i64,
    pub subscription_credit: Decimal,
    pub lifetime: ActivityTotals,
    pub month: ActivityTotals,
    pub transaction_count: usize,
}

/// Folds the transaction log into per-account summaries.
pub struct Analytics {
    ledger: Arc<Ledger>,
}

impl Analytics {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Summarizes an account's history.
    ///
    /// # Errors
    ///
    /// [`LedgerError::AccountNotFound`] if the account has never been
    /// touched by a balance-affecting operation.
    pub fn summarize(&self, account_id: &AccountId) -> Result<ActivitySummary, LedgerError> {
        let account = self
            .ledger
            .account(account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.clone()))?;

        let month_start = start_of_month(self.ledger.now());
        let transactions = self.ledger.log().account_transactions(account_id);

        let mut lifetime = ActivityTotals::default();
        let mut month = ActivityTotals::default();
        for tx in &transactions {
            lifetime.add(tx.kind, tx.magnitude());
            if tx.timestamp >= month_start {
                month.add(tx.kind, tx.magnitude());
            }
        }

        Ok(ActivitySummary {
            account_id: account_id.clone(),
            balance: account.balance(),
            subscription_credit: account.subscription_credit(),
            lifetime,
            month,
            transaction_count: transactions.len(),
        })
    }
}
