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

//! End-to-end scenarios for the ledger call sites: marketplace purchases,
//! conversions, mission funding, refunds, and analytics.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use points_ledger_rs::{
    AccountId, Analytics, Catalog, ChargeRequest, Clock, ConversionEngine, ConversionPolicy,
    CreditKind, CreditRequest, DeliveryError, InMemoryPurchaseStore, Ledger, LedgerError, LogSink,
    Marketplace, Metadata, MissionFunder, Notification, NotificationSink, Notifier, Product,
    ProductDuration, Purchase, PurchaseStatus, PurchaseStore, PurchaseStoreError, RefundProcessor,
    StaticCatalog, TransactionKind,
};
use rust_decimal_macros::dec;
use std::sync::Arc;

// === Test Support ===

/// Controllable clock for calendar-sensitive tests.
struct TestClock {
    now: Mutex<DateTime<Utc>>,
}

impl TestClock {
    fn starting_at(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self { now: Mutex::new(now) })
    }

    fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Store whose writes always fail, for the compensation path.
struct BrokenStore;

impl PurchaseStore for BrokenStore {
    fn insert(&self, _purchase: Purchase) -> Result<(), PurchaseStoreError> {
        Err(PurchaseStoreError("datastore unavailable".to_string()))
    }

    fn get(&self, _id: points_ledger_rs::PurchaseId) -> Option<Purchase> {
        None
    }

    fn account_purchases(&self, _account_id: &AccountId) -> Vec<Purchase> {
        Vec::new()
    }
}

/// Sink that always fails, to prove notifications never break a purchase.
struct BrokenSink;

impl NotificationSink for BrokenSink {
    fn deliver(&self, _notification: &Notification) -> Result<(), DeliveryError> {
        Err(DeliveryError("push gateway down".to_string()))
    }
}

fn acct(id: &str) -> AccountId {
    AccountId::from(id)
}

fn earn(ledger: &Ledger, id: &str, amount: i64) {
    ledger
        .credit(CreditRequest::new(acct(id), amount, CreditKind::Earn, "test_grant"))
        .unwrap();
}

fn catalog() -> Arc<StaticCatalog> {
    Arc::new(StaticCatalog::with_products([
        Product {
            id: "boost-week".to_string(),
            name: "Profile Boost".to_string(),
            points_cost: 200,
            duration: ProductDuration::Weeks(1),
            available: true,
        },
        Product {
            id: "premium-month".to_string(),
            name: "Premium Badge".to_string(),
            points_cost: 500,
            duration: ProductDuration::Months(1),
            available: true,
        },
        Product {
            id: "founder".to_string(),
            name: "Founder Badge".to_string(),
            points_cost: 1000,
            duration: ProductDuration::Permanent,
            available: true,
        },
        Product {
            id: "retired".to_string(),
            name: "Retired Perk".to_string(),
            points_cost: 100,
            duration: ProductDuration::Permanent,
            available: false,
        },
    ]))
}

fn marketplace(ledger: &Arc<Ledger>) -> Marketplace {
    Marketplace::new(
        Arc::clone(ledger),
        catalog(),
        Arc::new(InMemoryPurchaseStore::new()),
        Notifier::spawn(Arc::new(LogSink)),
    )
}

// === Purchase Scenarios ===

#[test]
fn purchase_debits_and_records() {
    let ledger = Arc::new(Ledger::new());
    let market = marketplace(&ledger);
    earn(&ledger, "acct-1", 500);

    let receipt = market
        .purchase(&acct("acct-1"), "boost-week", Metadata::new(), None)
        .unwrap();

    assert_eq!(receipt.balance, 300);
    assert_eq!(receipt.transaction.kind, TransactionKind::Spend);
    assert_eq!(receipt.transaction.amount, -200);
    assert_eq!(receipt.transaction.balance_before, 500);
    assert_eq!(receipt.transaction.balance_after, 300);
    assert_eq!(receipt.transaction.source, "marketplace_boost-week");
    assert_eq!(receipt.transaction.description, "Purchased: Profile Boost");

    let purchase = &receipt.purchase;
    assert_eq!(purchase.points_spent, 200);
    assert_eq!(purchase.product_id, "boost-week");
    assert_eq!(purchase.status, PurchaseStatus::Active);
    assert_eq!(purchase.transaction_id, receipt.transaction.id);
    assert_eq!(
        purchase.expires_at,
        Some(purchase.purchased_at + Duration::weeks(1))
    );

    let stored = market.account_purchases(&acct("acct-1"));
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, purchase.id);
}

#[test]
fn unknown_product_fails_before_any_charge() {
    let ledger = Arc::new(Ledger::new());
    let market = marketplace(&ledger);
    earn(&ledger, "acct-1", 500);

    let result = market.purchase(&acct("acct-1"), "no-such-thing", Metadata::new(), None);
    assert_eq!(
        result.unwrap_err(),
        LedgerError::ProductNotFound("no-such-thing".to_string())
    );
    assert_eq!(ledger.balance(&acct("acct-1")).unwrap(), 500);
}

#[test]
fn unavailable_product_is_treated_as_not_found() {
    let ledger = Arc::new(Ledger::new());
    let market = marketplace(&ledger);
    earn(&ledger, "acct-1", 500);

    let result = market.purchase(&acct("acct-1"), "retired", Metadata::new(), None);
    assert_eq!(
        result.unwrap_err(),
        LedgerError::ProductNotFound("retired".to_string())
    );
}

#[test]
fn purchase_with_insufficient_balance_reports_detail() {
    let ledger = Arc::new(Ledger::new());
    let market = marketplace(&ledger);
    earn(&ledger, "acct-1", 150);

    let result = market.purchase(&acct("acct-1"), "boost-week", Metadata::new(), None);
    assert_eq!(
        result.unwrap_err(),
        LedgerError::InsufficientBalance {
            balance: 150,
            required: 200
        }
    );
    assert_eq!(ledger.balance(&acct("acct-1")).unwrap(), 150);
    assert!(market.account_purchases(&acct("acct-1")).is_empty());
}

#[test]
fn permanent_product_never_expires() {
    let ledger = Arc::new(Ledger::new());
    let market = marketplace(&ledger);
    earn(&ledger, "acct-1", 1000);

    let receipt = market
        .purchase(&acct("acct-1"), "founder", Metadata::new(), None)
        .unwrap();
    assert_eq!(receipt.purchase.expires_at, None);
    assert_eq!(
        receipt.purchase.effective_status(Utc::now() + Duration::days(10_000)),
        PurchaseStatus::Active
    );
}

#[test]
fn expiry_is_evaluated_at_read_time() {
    let clock = TestClock::starting_at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
    let ledger = Arc::new(Ledger::with_clock(clock.clone()));
    let market = marketplace(&ledger);
    earn(&ledger, "acct-1", 500);

    market
        .purchase(&acct("acct-1"), "boost-week", Metadata::new(), None)
        .unwrap();

    let active = market.account_purchases(&acct("acct-1"));
    assert_eq!(active[0].status, PurchaseStatus::Active);

    clock.advance(Duration::weeks(2));

    let expired = market.account_purchases(&acct("acct-1"));
    assert_eq!(expired[0].status, PurchaseStatus::Expired);
}

#[test]
fn record_failure_surfaces_but_charge_stands() {
    let ledger = Arc::new(Ledger::new());
    let market = Marketplace::new(
        Arc::clone(&ledger),
        catalog(),
        Arc::new(BrokenStore),
        Notifier::spawn(Arc::new(LogSink)),
    );
    earn(&ledger, "acct-1", 500);

    let result = market.purchase(&acct("acct-1"), "boost-week", Metadata::new(), None);
    let err = result.unwrap_err();
    let LedgerError::PurchaseRecordFailure { transaction_id } = err else {
        panic!("expected PurchaseRecordFailure, got {err:?}");
    };

    // Points stay spent; the committed transaction is the operator's
    // source of truth for recreating the record.
    assert_eq!(ledger.balance(&acct("acct-1")).unwrap(), 300);
    let tx = ledger.log().get(transaction_id).unwrap();
    assert_eq!(tx.amount, -200);
}

#[test]
fn notification_failure_never_fails_the_purchase() {
    let ledger = Arc::new(Ledger::new());
    let market = Marketplace::new(
        Arc::clone(&ledger),
        catalog(),
        Arc::new(InMemoryPurchaseStore::new()),
        Notifier::spawn(Arc::new(BrokenSink)),
    );
    earn(&ledger, "acct-1", 500);

    let receipt = market
        .purchase(&acct("acct-1"), "boost-week", Metadata::new(), None)
        .unwrap();
    assert_eq!(receipt.balance, 300);
}

#[test]
fn retried_purchase_reuses_transaction_and_record() {
    let ledger = Arc::new(Ledger::new());
    let market = marketplace(&ledger);
    earn(&ledger, "acct-1", 500);

    let first = market
        .purchase(
            &acct("acct-1"),
            "boost-week",
            Metadata::new(),
            Some("req-1".to_string()),
        )
        .unwrap();
    let second = market
        .purchase(
            &acct("acct-1"),
            "boost-week",
            Metadata::new(),
            Some("req-1".to_string()),
        )
        .unwrap();

    assert_eq!(first.transaction.id, second.transaction.id);
    assert_eq!(first.purchase.id, second.purchase.id);
    assert_eq!(ledger.balance(&acct("acct-1")).unwrap(), 300);
    assert_eq!(market.account_purchases(&acct("acct-1")).len(), 1);
}

// === Conversion Scenarios ===

#[test]
fn conversion_debits_points_and_credits_subscription() {
    let ledger = Arc::new(Ledger::new());
    let engine = ConversionEngine::new(Arc::clone(&ledger), ConversionPolicy::default());
    earn(&ledger, "acct-1", 2000);

    let receipt = engine.convert(&acct("acct-1"), 1500, None).unwrap();

    assert_eq!(receipt.credit_amount, dec!(15.00));
    assert_eq!(receipt.balance, 500);
    assert_eq!(receipt.subscription_credit, dec!(15.00));

    let tx = &receipt.transaction;
    assert_eq!(tx.kind, TransactionKind::Conversion);
    assert_eq!(tx.amount, -1500);
    assert_eq!(tx.source, "points_to_credits");
    assert_eq!(
        tx.metadata.get("credit_amount").and_then(|v| v.as_str()),
        Some("15.00")
    );

    assert_eq!(ledger.subscription_credit(&acct("acct-1")).unwrap(), dec!(15.00));
}

#[test]
fn conversion_below_minimum_is_rejected() {
    let ledger = Arc::new(Ledger::new());
    let engine = ConversionEngine::new(Arc::clone(&ledger), ConversionPolicy::default());
    earn(&ledger, "acct-1", 2000);

    let result = engine.convert(&acct("acct-1"), 50, None);
    assert_eq!(
        result.unwrap_err(),
        LedgerError::ConversionBelowMinimum { minimum: 100 }
    );
    assert_eq!(ledger.balance(&acct("acct-1")).unwrap(), 2000);
}

#[test]
fn conversion_with_insufficient_balance_fails_atomically() {
    let ledger = Arc::new(Ledger::new());
    let engine = ConversionEngine::new(Arc::clone(&ledger), ConversionPolicy::default());
    earn(&ledger, "acct-1", 100);

    let result = engine.convert(&acct("acct-1"), 500, None);
    assert_eq!(
        result.unwrap_err(),
        LedgerError::InsufficientBalance {
            balance: 100,
            required: 500
        }
    );

    // Neither side of the conversion happened
    assert_eq!(ledger.balance(&acct("acct-1")).unwrap(), 100);
    assert_eq!(
        ledger.subscription_credit(&acct("acct-1")).unwrap(),
        dec!(0)
    );
}

#[test]
fn monthly_cap_reports_remaining_allowance() {
    let ledger = Arc::new(Ledger::new());
    let engine = ConversionEngine::new(Arc::clone(&ledger), ConversionPolicy::default());
    earn(&ledger, "acct-1", 20_000);

    // Use up 9000 of the 10_000 cap
    engine.convert(&acct("acct-1"), 4500, None).unwrap();
    engine.convert(&acct("acct-1"), 4500, None).unwrap();
    assert_eq!(engine.remaining_allowance(&acct("acct-1")), 1000);

    // 2000 would exceed the cap
    let result = engine.convert(&acct("acct-1"), 2000, None);
    assert_eq!(
        result.unwrap_err(),
        LedgerError::ConversionExceedsMonthlyCap { remaining: 1000 }
    );

    // Exactly filling the cap still succeeds
    engine.convert(&acct("acct-1"), 1000, None).unwrap();
    assert_eq!(engine.remaining_allowance(&acct("acct-1")), 0);

    // And the next conversion is rejected outright
    let result = engine.convert(&acct("acct-1"), 100, None);
    assert_eq!(
        result.unwrap_err(),
        LedgerError::ConversionExceedsMonthlyCap { remaining: 0 }
    );
}

#[test]
fn cap_resets_with_the_calendar_month() {
    let clock = TestClock::starting_at(Utc.with_ymd_and_hms(2025, 6, 20, 12, 0, 0).unwrap());
    let ledger = Arc::new(Ledger::with_clock(clock.clone()));
    let engine = ConversionEngine::new(Arc::clone(&ledger), ConversionPolicy::default());
    earn(&ledger, "acct-1", 40_000);

    engine.convert(&acct("acct-1"), 10_000, None).unwrap();
    assert_eq!(engine.remaining_allowance(&acct("acct-1")), 0);

    // Crossing into July forgets June's conversions
    clock.advance(Duration::days(15));
    assert_eq!(engine.remaining_allowance(&acct("acct-1")), 10_000);
    engine.convert(&acct("acct-1"), 2000, None).unwrap();
    assert_eq!(engine.remaining_allowance(&acct("acct-1")), 8000);
}

#[test]
fn custom_policy_rates_apply() {
    let ledger = Arc::new(Ledger::new());
    let engine = ConversionEngine::new(
        Arc::clone(&ledger),
        ConversionPolicy {
            points_per_usd: 200,
            minimum_points: 400,
            monthly_cap_points: 5000,
        },
    );
    earn(&ledger, "acct-1", 5000);

    assert_eq!(
        engine.convert(&acct("acct-1"), 300, None).unwrap_err(),
        LedgerError::ConversionBelowMinimum { minimum: 400 }
    );

    let receipt = engine.convert(&acct("acct-1"), 500, None).unwrap();
    assert_eq!(receipt.credit_amount, dec!(2.50));
}

// === Mission Funding Scenarios ===

#[test]
fn mission_funding_charges_full_breakdown() {
    let ledger = Arc::new(Ledger::new());
    let funder = MissionFunder::new(Arc::clone(&ledger));
    earn(&ledger, "biz-1", 1000);

    let receipt = funder.fund(&acct("biz-1"), 20, 10, None).unwrap();

    assert_eq!(receipt.funding.reward_pool, 200);
    assert_eq!(receipt.funding.platform_fee, 40);
    assert_eq!(receipt.funding.total_cost, 290);
    assert_eq!(receipt.balance, 710);

    let tx = &receipt.transaction;
    assert_eq!(tx.source, "mission_creation");
    assert_eq!(tx.amount, -290);
    let breakdown = tx.metadata.get("breakdown").unwrap();
    assert_eq!(breakdown["total_cost"], 290);
    assert_eq!(breakdown["platform_fee"], 40);
}

#[test]
fn underfunded_mission_is_aborted_entirely() {
    let ledger = Arc::new(Ledger::new());
    let funder = MissionFunder::new(Arc::clone(&ledger));
    earn(&ledger, "biz-1", 289);

    let result = funder.fund(&acct("biz-1"), 20, 10, None);
    assert_eq!(
        result.unwrap_err(),
        LedgerError::InsufficientBalance {
            balance: 289,
            required: 290
        }
    );
    assert_eq!(ledger.balance(&acct("biz-1")).unwrap(), 289);
    assert_eq!(ledger.log().account_transaction_count(&acct("biz-1")), 1);
}

// === Refund Scenarios ===

#[test]
fn refund_is_additive() {
    let ledger = Arc::new(Ledger::new());
    let refunds = RefundProcessor::new(Arc::clone(&ledger));
    earn(&ledger, "acct-1", 100);

    let tx = refunds
        .refund(
            &acct("acct-1"),
            50,
            "mission_cancelled",
            "Mission cancelled before start",
            Metadata::new(),
            None,
        )
        .unwrap();

    assert_eq!(tx.kind, TransactionKind::Refund);
    assert_eq!(tx.amount, 50);
    assert_eq!(tx.balance_before, 100);
    assert_eq!(tx.balance_after, 150);
}

#[test]
fn non_positive_refund_is_rejected_without_mutation() {
    let ledger = Arc::new(Ledger::new());
    let refunds = RefundProcessor::new(Arc::clone(&ledger));
    earn(&ledger, "acct-1", 100);

    for amount in [0, -50] {
        let result = refunds.refund(
            &acct("acct-1"),
            amount,
            "mission_cancelled",
            "bogus",
            Metadata::new(),
            None,
        );
        assert_eq!(result.unwrap_err(), LedgerError::InvalidAmount);
    }
    assert_eq!(ledger.balance(&acct("acct-1")).unwrap(), 100);
    assert_eq!(ledger.log().account_transaction_count(&acct("acct-1")), 1);
}

// === Analytics ===

#[test]
fn analytics_folds_the_log_by_kind() {
    let ledger = Arc::new(Ledger::new());
    let engine = ConversionEngine::new(Arc::clone(&ledger), ConversionPolicy::default());
    let refunds = RefundProcessor::new(Arc::clone(&ledger));
    let analytics = Analytics::new(Arc::clone(&ledger));

    earn(&ledger, "acct-1", 3000);
    ledger
        .charge(ChargeRequest::new("acct-1", 400, "marketplace_boost"))
        .unwrap();
    refunds
        .refund(&acct("acct-1"), 100, "support", "correction", Metadata::new(), None)
        .unwrap();
    engine.convert(&acct("acct-1"), 500, None).unwrap();

    let summary = analytics.summarize(&acct("acct-1")).unwrap();
    assert_eq!(summary.lifetime.earned, 3000);
    assert_eq!(summary.lifetime.spent, 400);
    assert_eq!(summary.lifetime.refunded, 100);
    assert_eq!(summary.lifetime.converted, 500);
    assert_eq!(summary.transaction_count, 4);
    assert_eq!(summary.balance, 2200);
    assert_eq!(summary.subscription_credit, dec!(5.00));
    // Everything above happened this month
    assert_eq!(summary.month.earned, 3000);
    assert_eq!(summary.month.converted, 500);

    assert_eq!(
        analytics.summarize(&acct("ghost")).unwrap_err(),
        LedgerError::AccountNotFound(acct("ghost"))
    );
}

#[test]
fn analytics_month_slice_excludes_previous_months() {
    let clock = TestClock::starting_at(Utc.with_ymd_and_hms(2025, 5, 28, 0, 0, 0).unwrap());
    let ledger = Arc::new(Ledger::with_clock(clock.clone()));
    let analytics = Analytics::new(Arc::clone(&ledger));

    earn(&ledger, "acct-1", 1000);
    clock.advance(Duration::days(10)); // into June

    ledger
        .charge(ChargeRequest::new("acct-1", 250, "marketplace_boost"))
        .unwrap();

    let summary = analytics.summarize(&acct("acct-1")).unwrap();
    assert_eq!(summary.lifetime.earned, 1000);
    assert_eq!(summary.lifetime.spent, 250);
    assert_eq!(summary.month.earned, 0);
    assert_eq!(summary.month.spent, 250);
}

// === Catalog seam ===

#[test]
fn catalog_trait_objects_are_usable() {
    let boxed: Arc<dyn Catalog> = catalog();
    assert!(boxed.product("boost-week").is_some());
    assert!(boxed.product("nope").is_none());
}
