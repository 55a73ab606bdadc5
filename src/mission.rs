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

//! Mission funding cost calculation.
//!
//! Funding a mission charges the creator for the base cost, the full reward
//! pool, and the platform fee in one ledger debit. Insufficient balance
//! aborts funding entirely; no partially funded mission exists.

use crate::base::AccountId;
use crate::error::LedgerError;
use crate::ledger::{ChargeRequest, Ledger};
use crate::transaction::{Metadata, Transaction};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::Arc;

/// Fixed base cost of creating a mission, in points.
pub const DEFAULT_BASE_POINTS: i64 = 50;

/// Platform fee charged on the reward pool.
pub const DEFAULT_FEE_RATE: Decimal = dec!(0.2);

/// Cost breakdown for funding a mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MissionFunding {
    pub base_points: i64,
    pub reward_points: i64,
    pub max_participants: i64,
    /// `reward_points * max_participants`.
    pub reward_pool: i64,
    /// `ceil(reward_pool * fee_rate)`.
    pub platform_fee: i64,
    /// `base_points + reward_pool + platform_fee`.
    pub total_cost: i64,
}

impl MissionFunding {
    /// Computes the funding breakdown.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidAmount`] for negative reward points,
    /// non-positive participant counts, or arithmetic overflow.
    pub fn quote(
        base_points: i64,
        reward_points: i64,
        max_participants: i64,
        fee_rate: Decimal,
    ) -> Result<Self, LedgerError> {
        if base_points < 0 || reward_points < 0 || max_participants <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let reward_pool = reward_points
            .checked_mul(max_participants)
            .ok_or(LedgerError::InvalidAmount)?;

        let platform_fee = (Decimal::from(reward_pool) * fee_rate)
            .ceil()
            .to_i64()
            .ok_or(LedgerError::InvalidAmount)?;

        let total_cost = base_points
            .checked_add(reward_pool)
            .and_then(|sum| sum.checked_add(platform_fee))
            .ok_or(LedgerError::InvalidAmount)?;

        Ok(Self {
            base_points,
            reward_points,
            max_participants,
            reward_pool,
            platform_fee,
            total_cost,
        })
    }
}

/// Result of successfully funding a mission.
#[derive(Debug, Clone)]
pub struct FundingReceipt {
    pub funding: MissionFunding,
    pub transaction: Arc<Transaction>,
    /// Point balance after the charge.
    pub balance: i64,
}

/// Charges mission creators through the ledger.
pub struct MissionFunder {
    ledger: Arc<Ledger>,
    base_points: i64,
    fee_rate: Decimal,
}

impl MissionFunder {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            ledger,
            base_points: DEFAULT_BASE_POINTS,
            fee_rate: DEFAULT_FEE_RATE,
        }
    }

    pub fn with_base_points(mut self, base_points: i64) -> Self {
        self.base_points = base_points;
        self
    }

    /// # Panics
    ///
    /// Panics on a negative fee rate.
    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        assert!(fee_rate >= Decimal::ZERO, "fee rate must be non-negative");
        self.fee_rate = fee_rate;
        self
    }

    /// Quotes the cost without charging.
    pub fn quote(
        &self,
        reward_points: i64,
        max_participants: i64,
    ) -> Result<MissionFunding, LedgerError> {
        MissionFunding::quote(self.base_points, reward_points, max_participants, self.fee_rate)
    }

    /// Computes the total cost and charges it in one ledger debit.
    ///
    /// On [`LedgerError::InsufficientBalance`] nothing is charged and the
    /// caller must abort mission creation.
    pub fn fund(
        &self,
        account_id: &AccountId,
        reward_points: i64,
        max_participants: i64,
        idempotency_key: Option<String>,
    ) -> Result<FundingReceipt, LedgerError> {
        let funding = self.quote(reward_points, max_participants)?;

        let mut metadata = Metadata::new();
        metadata.insert(
            "breakdown".to_string(),
            serde_json::json!({
                "base_points": funding.base_points,
                "reward_pool": funding.reward_pool,
                "platform_fee": funding.platform_fee,
                "total_cost": funding.total_cost,
            }),
        );

        let mut request = ChargeRequest::new(account_id.clone(), funding.total_cost, "mission_creation")
            .description(format!(
                "Mission funding: {} base + {} reward pool + {} fee",
                funding.base_points, funding.reward_pool, funding.platform_fee
            ))
            .metadata(metadata);
        if let Some(key) = idempotency_key {
            request = request.idempotency_key(key);
        }

        let transaction = self.ledger.charge(request)?;

        Ok(FundingReceipt {
            balance: transaction.balance_after,
            funding,
            transaction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_matches_fee_formula() {
        let funding = MissionFunding::quote(50, 20, 10, DEFAULT_FEE_RATE).unwrap();
        assert_eq!(funding.reward_pool, 200);
        assert_eq!(funding.platform_fee, 40);
        assert_eq!(funding.total_cost, 290);
    }

    #[test]
    fn fee_rounds_up() {
        // pool 33 * 0.2 = 6.6 -> fee 7
        let funding = MissionFunding::quote(50, 11, 3, DEFAULT_FEE_RATE).unwrap();
        assert_eq!(funding.reward_pool, 33);
        assert_eq!(funding.platform_fee, 7);
        assert_eq!(funding.total_cost, 90);
    }

    #[test]
    fn zero_reward_pool_costs_base_only() {
        let funding = MissionFunding::quote(50, 0, 5, DEFAULT_FEE_RATE).unwrap();
        assert_eq!(funding.reward_pool, 0);
        assert_eq!(funding.platform_fee, 0);
        assert_eq!(funding.total_cost, 50);
    }

    #[test]
    fn invalid_inputs_rejected() {
        assert_eq!(
            MissionFunding::quote(50, -1, 10, DEFAULT_FEE_RATE),
            Err(LedgerError::InvalidAmount)
        );
        assert_eq!(
            MissionFunding::quote(50, 20, 0, DEFAULT_FEE_RATE),
            Err(LedgerError::InvalidAmount)
        );
        assert_eq!(
            MissionFunding::quote(-1, 20, 10, DEFAULT_FEE_RATE),
            Err(LedgerError::InvalidAmount)
        );
    }

    #[test]
    fn overflow_is_an_error_not_a_panic() {
        assert_eq!(
            MissionFunding::quote(50, i64::MAX, 2, DEFAULT_FEE_RATE),
            Err(LedgerError::InvalidAmount)
        );
    }
}
