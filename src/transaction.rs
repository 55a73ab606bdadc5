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

//! Immutable ledger transaction records.
//!
//! Every balance mutation appends exactly one [`Transaction`]. Amounts are
//! signed: credits are positive, debits negative. A conversion is a debit
//! whose metadata records the derived subscription-credit amount.

use crate::base::{AccountId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Opaque key/value bag attached to a transaction (purchase id, product id,
/// conversion breakdown, mission cost breakdown).
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Transaction classification, stored with the wire names the rest of the
/// platform uses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Earn,
    Spend,
    Refund,
    Conversion,
}

/// The credit-side kinds accepted by [`Ledger::credit`](crate::Ledger::credit).
///
/// Conversions are excluded: the conversion primitive pairs the point debit
/// with the subscription-credit increment and cannot be issued as a plain
/// credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditKind {
    Earn,
    Refund,
}

impl CreditKind {
    pub(crate) fn kind(self) -> TransactionKind {
        match self {
            CreditKind::Earn => TransactionKind::Earn,
            CreditKind::Refund => TransactionKind::Refund,
        }
    }
}

/// A single immutable ledger entry.
///
/// # Invariants
///
/// - `balance_after == balance_before + amount`.
/// - `timestamp` is monotonically non-decreasing per account in log order.
/// - Once appended, an entry is never modified or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub kind: TransactionKind,
    /// Signed point amount: positive = credit, negative = debit.
    pub amount: i64,
    /// Machine-readable origin tag, e.g. `marketplace_<productId>`.
    pub source: String,
    pub description: String,
    pub balance_before: i64,
    pub balance_after: i64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl Transaction {
    /// Unsigned size of the entry.
    pub fn magnitude(&self) -> i64 {
        self.amount.abs()
    }

    pub fn is_credit(&self) -> bool {
        self.amount > 0
    }

    pub fn is_debit(&self) -> bool {
        self.amount < 0
    }
}
