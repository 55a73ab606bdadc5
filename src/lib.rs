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

//! # Points Ledger
//!
//! This library provides a points ledger and marketplace transaction engine:
//! per-account point balances mutated through atomic charge/credit
//! primitives, with an append-only transaction log from which every balance
//! is reconstructible.
//!
//! ## Core Components
//!
//! - [`Ledger`]: the only component that mutates balances; atomic
//!   [`Ledger::charge`] / [`Ledger::credit`] primitives with idempotency keys
//! - [`TransactionLog`]: append-only audit trail, queryable per account
//! - [`ConversionEngine`]: points-to-credit conversions under minimum and
//!   monthly-cap policy
//! - [`Marketplace`]: catalog-validated purchases with expiration handling
//! - [`MissionFunder`]: mission cost breakdown (base + reward pool + fee)
//! - [`RefundProcessor`]: additive refund credits
//! - [`Analytics`]: read-only activity summaries
//! - [`Notifier`]: fire-and-forget notification dispatch
//!
//! ## Example
//!
//! ```
//! use points_ledger_rs::{AccountId, ChargeRequest, CreditKind, CreditRequest, Ledger};
//!
//! let ledger = Ledger::new();
//! let account = AccountId::from("acct-1");
//!
//! // Earn some points (account is created implicitly)
//! ledger
//!     .credit(CreditRequest::new(account.clone(), 500, CreditKind::Earn, "mission_reward"))
//!     .unwrap();
//!
//! // Spend some of them
//! let tx = ledger
//!     .charge(ChargeRequest::new(account.clone(), 200, "marketplace_boost"))
//!     .unwrap();
//!
//! assert_eq!(tx.balance_before, 500);
//! assert_eq!(tx.balance_after, 300);
//! assert_eq!(ledger.balance(&account).unwrap(), 300);
//! ```
//!
//! ## Thread Safety
//!
//! The ledger is safe under arbitrary concurrent invocation, including
//! against the same account: commits run a version-checked
//! snapshot/validate/commit cycle, so concurrent charges serialize and the
//! balance can never go negative.

pub mod account;
mod analytics;
mod base;
mod catalog;
pub mod error;
mod ledger;
mod marketplace;
mod mission;
mod notify;
mod policy;
mod refund;
mod transaction;
mod transaction_log;

pub use account::Account;
pub use analytics::{ActivitySummary, ActivityTotals, Analytics};
pub use base::{AccountId, Clock, PurchaseId, SystemClock, TransactionId};
pub use catalog::{Catalog, InvalidDuration, Product, ProductDuration, StaticCatalog};
pub use error::LedgerError;
pub use ledger::{ChargeRequest, CreditRequest, Ledger};
pub use marketplace::{
    InMemoryPurchaseStore, Marketplace, Purchase, PurchaseReceipt, PurchaseStatus, PurchaseStore,
    PurchaseStoreError,
};
pub use mission::{
    DEFAULT_BASE_POINTS, DEFAULT_FEE_RATE, FundingReceipt, MissionFunder, MissionFunding,
};
pub use notify::{DeliveryError, LogSink, Notification, NotificationSink, Notifier};
pub use policy::{ConversionEngine, ConversionPolicy, ConversionReceipt};
pub use refund::RefundProcessor;
pub use transaction::{CreditKind, Metadata, Transaction, TransactionKind};
pub use transaction_log::TransactionLog;
