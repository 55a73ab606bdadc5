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

//! Points-to-credit conversion policy.
//!
//! The engine enforces the minimum-conversion and calendar-month-cap rules
//! before invoking the ledger's conversion primitive. The cap check is
//! read-then-decide against a log that can grow concurrently: it is a soft
//! limit, and a pair of racing conversions can overshoot it by at most one
//! request. The point debit itself remains strictly atomic.

use crate::base::{AccountId, start_of_month};
use crate::error::LedgerError;
use crate::ledger::{ConversionDebit, Ledger};
use crate::transaction::{Metadata, Transaction};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Static conversion configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionPolicy {
    /// Points per one currency unit of subscription credit.
    pub points_per_usd: i64,
    /// Smallest convertible request, in points.
    pub minimum_points: i64,
    /// Calendar-month conversion cap, in points.
    pub monthly_cap_points: i64,
}

impl Default for ConversionPolicy {
    fn default() -> Self {
        Self {
            points_per_usd: 100,
            minimum_points: 100,
            monthly_cap_points: 10_000,
        }
    }
}

/// Result of a successful conversion.
#[derive(Debug, Clone)]
pub struct ConversionReceipt {
    pub transaction: Arc<Transaction>,
    /// Subscription credit derived from the converted points.
    pub credit_amount: Decimal,
    /// Point balance after the debit.
    pub balance: i64,
    /// Subscription credit balance after the increment.
    pub subscription_credit: Decimal,
}

/// Decides whether a conversion is allowed, then drives the ledger.
pub struct ConversionEngine {
    ledger: Arc<Ledger>,
    policy: ConversionPolicy,
}

impl ConversionEngine {
    /// Subscription credit is cent-denominated.
    const CREDIT_PRECISION: u32 = 2;

    /// # Panics
    ///
    /// Panics if `policy.points_per_usd` is not positive.
    pub fn new(ledger: Arc<Ledger>, policy: ConversionPolicy) -> Self {
        assert!(policy.points_per_usd > 0, "points_per_usd must be positive");
        Self { ledger, policy }
    }

    pub fn policy(&self) -> &ConversionPolicy {
        &self.policy
    }

    /// Points still convertible this calendar month.
    pub fn remaining_allowance(&self, account_id: &AccountId) -> i64 {
        let since = start_of_month(self.ledger.now());
        let used = self.ledger.log().conversion_total_since(account_id, since);
        (self.policy.monthly_cap_points - used).max(0)
    }

    /// Converts `points` into subscription credit.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - points is zero or negative.
    /// - [`LedgerError::ConversionBelowMinimum`] - under the minimum.
    /// - [`LedgerError::ConversionExceedsMonthlyCap`] - over the cap;
    ///   carries the remaining allowance.
    /// - [`LedgerError::InsufficientBalance`] - balance below `points`.
    ///
    /// All policy rejections happen before any mutation.
    pub fn convert(
        &self,
        account_id: &AccountId,
        points: i64,
        idempotency_key: Option<String>,
    ) -> Result<ConversionReceipt, LedgerError> {
        if points <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if points < self.policy.minimum_points {
            return Err(LedgerError::ConversionBelowMinimum {
                minimum: self.policy.minimum_points,
            });
        }

        let since = start_of_month(self.ledger.now());
        let used = self.ledger.log().conversion_total_since(account_id, since);
        if used + points > self.policy.monthly_cap_points {
            return Err(LedgerError::ConversionExceedsMonthlyCap {
                remaining: (self.policy.monthly_cap_points - used).max(0),
            });
        }

        // Rescaled to cents: 1500 points at 100/USD is 15.00, not 15.
        let mut credit_amount = Decimal::from(points) / Decimal::from(self.policy.points_per_usd);
        credit_amount.rescale(Self::CREDIT_PRECISION);

        let mut metadata = Metadata::new();
        metadata.insert("points".to_string(), serde_json::json!(points));
        metadata.insert(
            "points_per_usd".to_string(),
            serde_json::json!(self.policy.points_per_usd),
        );

        let transaction = self.ledger.convert(ConversionDebit {
            account_id: account_id.clone(),
            points,
            credit_amount,
            source: "points_to_credits".to_string(),
            description: format!("Converted {points} points to subscription credit"),
            metadata,
            idempotency_key,
        })?;

        let subscription_credit = self
            .ledger
            .subscription_credit(account_id)
            .unwrap_or(credit_amount);

        Ok(ConversionReceipt {
            balance: transaction.balance_after,
            transaction,
            credit_amount,
            subscription_credit,
        })
    }
}
