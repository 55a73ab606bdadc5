//! Simple REST API server example for the points ledger.
//!
//! Run with: `cargo run --example server`
//!
//! ## Endpoints
//!
//! - `POST /earn` - Credit points to an account
//! - `POST /purchases` - Purchase a catalog product
//! - `POST /conversions` - Convert points to subscription credit
//! - `POST /missions` - Fund a mission (base + reward pool + fee)
//! - `POST /refunds` - Refund points
//! - `GET /accounts/{id}` - Account balances
//! - `GET /accounts/{id}/activity` - Activity summary
//! - `GET /accounts/{id}/purchases` - Purchase history
//!
//! ## Example Usage
//!
//! ```bash
//! # Earn points
//! curl -X POST http://localhost:3000/earn \
//!   -H "Content-Type: application/json" \
//!   -d '{"account_id": "acct-1", "amount": 1000, "source": "mission_reward"}'
//!
//! # Purchase a product
//! curl -X POST http://localhost:3000/purchases \
//!   -H "Content-Type: application/json" \
//!   -d '{"account_id": "acct-1", "product_id": "boost-week"}'
//!
//! # Check the account
//! curl http://localhost:3000/accounts/acct-1
//! ```

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use points_ledger_rs::{
    AccountId, ActivitySummary, Analytics, ConversionEngine, ConversionPolicy, CreditKind,
    CreditRequest, InMemoryPurchaseStore, Ledger, LedgerError, LogSink, Marketplace, Metadata,
    MissionFunder, Notifier, Product, ProductDuration, Purchase, RefundProcessor, StaticCatalog,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct EarnRequest {
    pub account_id: String,
    pub amount: i64,
    pub source: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub account_id: String,
    pub product_id: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConversionRequest {
    pub account_id: String,
    pub points: i64,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MissionRequest {
    pub account_id: String,
    pub reward_points: i64,
    pub max_participants: i64,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub account_id: String,
    pub amount: i64,
    pub source: String,
    #[serde(default)]
    pub description: String,
}

/// Response body for transaction-producing endpoints.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub transaction_id: u64,
    pub balance: i64,
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub purchase: Purchase,
    pub transaction_id: u64,
    pub balance: i64,
}

#[derive(Debug, Serialize)]
pub struct ConversionResponse {
    pub transaction_id: u64,
    pub credit_amount: Decimal,
    pub balance: i64,
    pub subscription_credit: Decimal,
}

#[derive(Debug, Serialize)]
pub struct MissionResponse {
    pub transaction_id: u64,
    pub reward_pool: i64,
    pub platform_fee: i64,
    pub total_cost: i64,
    pub balance: i64,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub account: String,
    pub balance: i64,
    pub subscription_credit: Decimal,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state: the ledger plus its orchestrators.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub conversions: Arc<ConversionEngine>,
    pub marketplace: Arc<Marketplace>,
    pub missions: Arc<MissionFunder>,
    pub refunds: Arc<RefundProcessor>,
    pub analytics: Arc<Analytics>,
}

// === Error Handling ===

/// Wrapper for converting `LedgerError` into HTTP responses.
pub struct AppError(LedgerError);

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            LedgerError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
            LedgerError::ProductNotFound(_) => (StatusCode::NOT_FOUND, "PRODUCT_NOT_FOUND"),
            LedgerError::InsufficientBalance { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE")
            }
            LedgerError::InvalidAmount => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
            LedgerError::ConversionBelowMinimum { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "CONVERSION_BELOW_MINIMUM")
            }
            LedgerError::ConversionExceedsMonthlyCap { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "CONVERSION_EXCEEDS_MONTHLY_CAP")
            }
            LedgerError::ConcurrentModification => (StatusCode::CONFLICT, "CONCURRENT_MODIFICATION"),
            LedgerError::Timeout => (StatusCode::SERVICE_UNAVAILABLE, "TIMEOUT"),
            LedgerError::PurchaseRecordFailure { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PURCHASE_RECORD_FAILURE")
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

// === Handlers ===

/// POST /earn - Credit points.
async fn earn(
    State(state): State<AppState>,
    Json(request): Json<EarnRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    let tx = state.ledger.credit(
        CreditRequest::new(
            AccountId(request.account_id),
            request.amount,
            CreditKind::Earn,
            request.source,
        )
        .description(request.description),
    )?;

    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse {
            transaction_id: tx.id.0,
            balance: tx.balance_after,
        }),
    ))
}

/// POST /purchases - Purchase a catalog product.
async fn create_purchase(
    State(state): State<AppState>,
    Json(request): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseResponse>), AppError> {
    let receipt = state.marketplace.purchase(
        &AccountId(request.account_id),
        &request.product_id,
        Metadata::new(),
        request.idempotency_key,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(PurchaseResponse {
            transaction_id: receipt.transaction.id.0,
            balance: receipt.balance,
            purchase: receipt.purchase,
        }),
    ))
}

/// POST /conversions - Convert points to subscription credit.
async fn create_conversion(
    State(state): State<AppState>,
    Json(request): Json<ConversionRequest>,
) -> Result<(StatusCode, Json<ConversionResponse>), AppError> {
    let receipt = state.conversions.convert(
        &AccountId(request.account_id),
        request.points,
        request.idempotency_key,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(ConversionResponse {
            transaction_id: receipt.transaction.id.0,
            credit_amount: receipt.credit_amount,
            balance: receipt.balance,
            subscription_credit: receipt.subscription_credit,
        }),
    ))
}

/// POST /missions - Fund a mission.
async fn fund_mission(
    State(state): State<AppState>,
    Json(request): Json<MissionRequest>,
) -> Result<(StatusCode, Json<MissionResponse>), AppError> {
    let receipt = state.missions.fund(
        &AccountId(request.account_id),
        request.reward_points,
        request.max_participants,
        request.idempotency_key,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(MissionResponse {
            transaction_id: receipt.transaction.id.0,
            reward_pool: receipt.funding.reward_pool,
            platform_fee: receipt.funding.platform_fee,
            total_cost: receipt.funding.total_cost,
            balance: receipt.balance,
        }),
    ))
}

/// POST /refunds - Refund points.
async fn create_refund(
    State(state): State<AppState>,
    Json(request): Json<RefundRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), AppError> {
    let tx = state.refunds.refund(
        &AccountId(request.account_id),
        request.amount,
        request.source,
        request.description,
        Metadata::new(),
        None,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(TransactionResponse {
            transaction_id: tx.id.0,
            balance: tx.balance_after,
        }),
    ))
}

/// GET /accounts/{id} - Account balances.
async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AccountResponse>, AppError> {
    let account_id = AccountId(id);
    let balance = state.ledger.balance(&account_id)?;
    let subscription_credit = state.ledger.subscription_credit(&account_id)?;

    Ok(Json(AccountResponse {
        account: account_id.0,
        balance,
        subscription_credit: subscription_credit.round_dp(2),
    }))
}

/// GET /accounts/{id}/activity - Activity summary.
async fn get_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActivitySummary>, AppError> {
    let summary = state.analytics.summarize(&AccountId(id))?;
    Ok(Json(summary))
}

/// GET /accounts/{id}/purchases - Purchase history with read-time expiry.
async fn list_purchases(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Vec<Purchase>> {
    Json(state.marketplace.account_purchases(&AccountId(id)))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/earn", post(earn))
        .route("/purchases", post(create_purchase))
        .route("/conversions", post(create_conversion))
        .route("/missions", post(fund_mission))
        .route("/refunds", post(create_refund))
        .route("/accounts/{id}", get(get_account))
        .route("/accounts/{id}/activity", get(get_activity))
        .route("/accounts/{id}/purchases", get(list_purchases))
        .with_state(state)
}

fn demo_catalog() -> StaticCatalog {
    StaticCatalog::with_products([
        Product {
            id: "boost-week".to_string(),
            name: "Profile Boost (1 week)".to_string(),
            points_cost: 200,
            duration: ProductDuration::Weeks(1),
            available: true,
        },
        Product {
            id: "premium-month".to_string(),
            name: "Premium Badge (1 month)".to_string(),
            points_cost: 500,
            duration: ProductDuration::Months(1),
            available: true,
        },
        Product {
            id: "founder-badge".to_string(),
            name: "Founder Badge".to_string(),
            points_cost: 1000,
            duration: ProductDuration::Permanent,
            available: true,
        },
    ])
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let ledger = Arc::new(Ledger::new());
    let notifier = Notifier::spawn(Arc::new(LogSink));
    let store = Arc::new(InMemoryPurchaseStore::new());

    let state = AppState {
        conversions: Arc::new(ConversionEngine::new(
            Arc::clone(&ledger),
            ConversionPolicy::default(),
        )),
        marketplace: Arc::new(Marketplace::new(
            Arc::clone(&ledger),
            Arc::new(demo_catalog()),
            store,
            notifier,
        )),
        missions: Arc::new(MissionFunder::new(Arc::clone(&ledger))),
        refunds: Arc::new(RefundProcessor::new(Arc::clone(&ledger))),
        analytics: Arc::new(Analytics::new(Arc::clone(&ledger))),
        ledger,
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Points ledger API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  POST /earn                     - Credit points");
    println!("  POST /purchases                - Purchase a product");
    println!("  POST /conversions              - Convert points to credit");
    println!("  POST /missions                 - Fund a mission");
    println!("  POST /refunds                  - Refund points");
    println!("  GET  /accounts/:id             - Account balances");
    println!("  GET  /accounts/:id/activity    - Activity summary");
    println!("  GET  /accounts/:id/purchases   - Purchase history");

    axum::serve(listener, app).await.unwrap();
}
