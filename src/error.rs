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

//! Error types for ledger operations.

use crate::base::{AccountId, TransactionId};
use thiserror::Error;

/// Ledger operation errors.
///
/// Validation errors are returned before any mutation is attempted.
/// [`LedgerError::PurchaseRecordFailure`] is the one variant raised *after*
/// a ledger mutation committed; the transaction log remains authoritative
/// and the charge is never rolled back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Account has never been touched by a balance-affecting operation
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// Product is absent from the catalog or marked unavailable
    #[error("product not found or unavailable: {0}")]
    ProductNotFound(String),

    /// Charge exceeds the available balance
    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance { balance: i64, required: i64 },

    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Conversion request is below the configured minimum
    #[error("conversion below minimum of {minimum} points")]
    ConversionBelowMinimum { minimum: i64 },

    /// Conversion would exceed the monthly cap
    #[error("monthly conversion cap exceeded, {remaining} points remaining")]
    ConversionExceedsMonthlyCap { remaining: i64 },

    /// Optimistic commit lost the race too many times
    #[error("concurrent modification, retries exhausted")]
    ConcurrentModification,

    /// Account lock could not be acquired within the bounded budget
    #[error("timed out waiting for account")]
    Timeout,

    /// Charge committed but the purchase record could not be created
    #[error("purchase record creation failed after transaction {transaction_id} committed")]
    PurchaseRecordFailure { transaction_id: TransactionId },
}

#[cfg(test)]
mod tests {
    use super::LedgerError;
    use crate::base::{AccountId, TransactionId};

    #[test]
    fn error_display_messages() {
        assert_eq!(
            LedgerError::AccountNotFound(AccountId::from("acct-9")).to_string(),
            "account not found: acct-9"
        );
        assert_eq!(
            LedgerError::ProductNotFound("boost".to_string()).to_string(),
            "product not found or unavailable: boost"
        );
        assert_eq!(
            LedgerError::InsufficientBalance {
                balance: 40,
                required: 60
            }
            .to_string(),
            "insufficient balance: have 40, need 60"
        );
        assert_eq!(
            LedgerError::InvalidAmount.to_string(),
            "invalid amount (must be positive)"
        );
        assert_eq!(
            LedgerError::ConversionBelowMinimum { minimum: 100 }.to_string(),
            "conversion below minimum of 100 points"
        );
        assert_eq!(
            LedgerError::ConversionExceedsMonthlyCap { remaining: 1000 }.to_string(),
            "monthly conversion cap exceeded, 1000 points remaining"
        );
        assert_eq!(
            LedgerError::ConcurrentModification.to_string(),
            "concurrent modification, retries exhausted"
        );
        assert_eq!(LedgerError::Timeout.to_string(), "timed out waiting for account");
        assert_eq!(
            LedgerError::PurchaseRecordFailure {
                transaction_id: TransactionId(7)
            }
            .to_string(),
            "purchase record creation failed after transaction 7 committed"
        );
    }

    #[test]
    fn errors_are_cloneable() {
        let error = LedgerError::InsufficientBalance {
            balance: 10,
            required: 20,
        };
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
