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

//! Account state: the materialized balance projection.
//!
//! An [`Account`] holds the current point balance and derived subscription
//! credit behind a per-account mutex. Every committed mutation bumps the
//! version counter, which is the optimistic-concurrency token the ledger's
//! commit loop checks.
//!
//! # Example
//!
//! ```
//! use points_ledger_rs::{AccountId, Ledger};
//!
//! let ledger = Ledger::new();
//! assert!(ledger.account(&AccountId::from("fresh")).is_none());
//! ```

use crate::base::AccountId;
use crate::error::LedgerError;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::time::Duration;

/// Point-in-time view used by the ledger's snapshot/validate/commit cycle.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BalanceSnapshot {
    pub balance: i64,
    pub version: u64,
}

#[derive(Debug)]
pub(crate) struct AccountData {
    account_id: AccountId,
    pub(crate) balance: i64,
    pub(crate) subscription_credit: Decimal,
    version: u64,
}

impl AccountData {
    fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            balance: 0,
            subscription_credit: Decimal::ZERO,
            version: 0,
        }
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.balance >= 0,
            "Invariant violated: balance went negative: {}",
            self.balance
        );
        debug_assert!(
            self.subscription_credit >= Decimal::ZERO,
            "Invariant violated: subscription credit went negative: {}",
            self.subscription_credit
        );
    }

    /// Debits points from the balance.
    pub(crate) fn spend(&mut self, amount: i64) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if self.balance < amount {
            return Err(LedgerError::InsufficientBalance {
                balance: self.balance,
                required: amount,
            });
        }
        self.balance -= amount;
        self.version += 1;
        self.assert_invariants();
        Ok(())
    }

    /// Credits points to the balance.
    pub(crate) fn credit(&mut self, amount: i64) -> Result<(), LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        self.balance += amount;
        self.version += 1;
        self.assert_invariants();
        Ok(())
    }

    /// Debits points and increments subscription credit as one mutation.
    pub(crate) fn convert(&mut self, points: i64, credit: Decimal) -> Result<(), LedgerError> {
        if points <= 0 || credit <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if self.balance < points {
            return Err(LedgerError::InsufficientBalance {
                balance: self.balance,
                required: points,
            });
        }
        self.balance -= points;
        self.subscription_credit += credit;
        self.version += 1;
        self.assert_invariants();
        Ok(())
    }
}

/// A single account's balance projection.
///
/// Only the [`Ledger`](crate::Ledger) mutates account state; everything else
/// reads through the accessor methods.
#[derive(Debug)]
pub struct Account {
    inner: Mutex<AccountData>,
}

impl Account {
    /// Subscription credit is currency-denominated; serialize at cents.
    const CREDIT_PRECISION: u32 = 2;

    pub(crate) fn new(account_id: AccountId) -> Self {
        Self {
            inner: Mutex::new(AccountData::new(account_id)),
        }
    }

    pub fn account_id(&self) -> AccountId {
        self.inner.lock().account_id.clone()
    }

    pub fn balance(&self) -> i64 {
        self.inner.lock().balance
    }

    pub fn subscription_credit(&self) -> Decimal {
        self.inner.lock().subscription_credit
    }

    /// Mutation counter; bumped on every committed charge/credit/conversion.
    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    pub(crate) fn snapshot(&self) -> BalanceSnapshot {
        let data = self.inner.lock();
        BalanceSnapshot {
            balance: data.balance,
            version: data.version,
        }
    }

    /// Runs `apply` under the account lock only if the version still equals
    /// `expected`.
    ///
    /// Returns `Ok(None)` when another writer committed in between (the
    /// caller re-reads and retries), `Err(LedgerError::Timeout)` when the
    /// lock could not be acquired within `timeout`. The closure's mutation
    /// and the transaction-log append it performs are one atomic unit from
    /// every other thread's point of view.
    pub(crate) fn commit_if<T>(
        &self,
        expected: u64,
        timeout: Duration,
        apply: impl FnOnce(&mut AccountData) -> Result<T, LedgerError>,
    ) -> Result<Option<T>, LedgerError> {
        let mut data = self.inner.try_lock_for(timeout).ok_or(LedgerError::Timeout)?;
        if data.version != expected {
            return Ok(None);
        }
        let value = apply(&mut data)?;
        data.assert_invariants();
        Ok(Some(value))
    }
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.lock();
        let mut state = serializer.serialize_struct("Account", 3)?;
        state.serialize_field("account", &data.account_id)?;
        state.serialize_field("balance", &data.balance)?;
        state.serialize_field(
            "subscription_credit",
            &data
                .subscription_credit
                .round_dp(Account::CREDIT_PRECISION),
        )?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // === AccountData Internal Tests ===
    // These test the private AccountData methods directly.

    #[test]
    fn spend_debits_balance() {
        let mut data = AccountData::new(AccountId::from("a"));
        data.credit(500).unwrap();
        data.spend(200).unwrap();
        assert_eq!(data.balance, 300);
    }

    #[test]
    fn spend_insufficient_reports_balance_and_required() {
        let mut data = AccountData::new(AccountId::from("a"));
        data.credit(40).unwrap();
        let result = data.spend(60);
        assert_eq!(
            result,
            Err(LedgerError::InsufficientBalance {
                balance: 40,
                required: 60
            })
        );
        assert_eq!(data.balance, 40);
    }

    #[test]
    fn non_positive_amounts_rejected() {
        let mut data = AccountData::new(AccountId::from("a"));
        assert_eq!(data.credit(0), Err(LedgerError::InvalidAmount));
        assert_eq!(data.credit(-5), Err(LedgerError::InvalidAmount));
        assert_eq!(data.spend(0), Err(LedgerError::InvalidAmount));
        assert_eq!(data.spend(-5), Err(LedgerError::InvalidAmount));
        assert_eq!(data.version, 0);
    }

    #[test]
    fn convert_moves_points_into_credit() {
        let mut data = AccountData::new(AccountId::from("a"));
        data.credit(2000).unwrap();
        data.convert(1500, dec!(15.00)).unwrap();
        assert_eq!(data.balance, 500);
        assert_eq!(data.subscription_credit, dec!(15.00));
    }

    #[test]
    fn convert_insufficient_leaves_state_unchanged() {
        let mut data = AccountData::new(AccountId::from("a"));
        data.credit(100).unwrap();
        let result = data.convert(200, dec!(2.00));
        assert_eq!(
            result,
            Err(LedgerError::InsufficientBalance {
                balance: 100,
                required: 200
            })
        );
        assert_eq!(data.balance, 100);
        assert_eq!(data.subscription_credit, Decimal::ZERO);
    }

    #[test]
    fn every_mutation_bumps_version() {
        let mut data = AccountData::new(AccountId::from("a"));
        data.credit(1000).unwrap();
        data.spend(100).unwrap();
        data.convert(100, dec!(1.00)).unwrap();
        assert_eq!(data.version, 3);
    }

    // === Commit Gate Tests ===

    #[test]
    fn commit_if_rejects_stale_version() {
        let account = Account::new(AccountId::from("a"));
        let snapshot = account.snapshot();

        account
            .commit_if(snapshot.version, Duration::from_millis(50), |data| {
                data.credit(100)
            })
            .unwrap()
            .expect("first commit applies");

        // Same expected version again: the commit must be refused.
        let stale = account
            .commit_if(snapshot.version, Duration::from_millis(50), |data| {
                data.credit(100)
            })
            .unwrap();
        assert!(stale.is_none());
        assert_eq!(account.balance(), 100);
    }

    // === Serialization Tests ===

    #[test]
    fn serializer_rounds_credit_to_cents() {
        let account = Account::new(AccountId::from("acct-1"));
        {
            let mut data = account.inner.lock();
            data.balance = 300;
            // 15.005 rounds to 15.00 under banker's rounding
            data.subscription_credit = dec!(15.005);
        }

        let json = serde_json::to_string(&account).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["account"], "acct-1");
        assert_eq!(parsed["balance"], 300);
        assert_eq!(parsed["subscription_credit"].as_str().unwrap(), "15.00");
    }

    #[test]
    fn serializer_preserves_cent_precision() {
        let account = Account::new(AccountId::from("acct-2"));
        {
            let mut data = account.inner.lock();
            data.balance = 42;
            data.subscription_credit = dec!(7.25);
        }

        let json = serde_json::to_string(&account).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["subscription_credit"].as_str().unwrap(), "7.25");
    }
}
