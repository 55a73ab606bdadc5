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

//! Refund processing.
//!
//! Refunds are always additive: mission cancellations, rejected
//! participations, and manual corrections credit points back with a
//! `REFUND` entry. A refund is never a debit.

use crate::base::AccountId;
use crate::error::LedgerError;
use crate::ledger::{CreditRequest, Ledger};
use crate::transaction::{CreditKind, Metadata, Transaction};
use std::sync::Arc;

/// Issues refund credits through the ledger.
pub struct RefundProcessor {
    ledger: Arc<Ledger>,
}

impl RefundProcessor {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Credits `amount` points back to the account.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidAmount`] for zero or negative amounts; nothing
    /// mutates.
    pub fn refund(
        &self,
        account_id: &AccountId,
        amount: i64,
        source: impl Into<String>,
        description: impl Into<String>,
        metadata: Metadata,
        idempotency_key: Option<String>,
    ) -> Result<Arc<Transaction>, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let mut request = CreditRequest::new(account_id.clone(), amount, CreditKind::Refund, source)
            .description(description)
            .metadata(metadata);
        if let Some(key) = idempotency_key {
            request = request.idempotency_key(key);
        }

        self.ledger.credit(request)
    }
}
