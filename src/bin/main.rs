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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use points_ledger_rs::{
    AccountId, ChargeRequest, ConversionEngine, ConversionPolicy, CreditKind, CreditRequest,
    Ledger, RefundProcessor,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

/// Points Ledger - Replay ledger operation CSV files
///
/// Reads operations from a CSV file, replays them through the ledger, and
/// outputs final account states to stdout. Supports earns, spends, refunds,
/// and points-to-credit conversions.
#[derive(Parser, Debug)]
#[command(name = "points-ledger-rs")]
#[command(about = "Replays a points-ledger operation CSV", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: type,account,amount,source,description
    /// Example: cargo run -- operations.csv > accounts.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Points per currency unit for conversions
    #[arg(long, default_value_t = 100)]
    points_per_usd: i64,

    /// Minimum convertible amount, in points
    #[arg(long, default_value_t = 100)]
    min_conversion: i64,

    /// Calendar-month conversion cap, in points
    #[arg(long, default_value_t = 10_000)]
    monthly_cap: i64,
}

fn main() {
    // Log to stderr so stdout stays valid CSV
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let policy = ConversionPolicy {
        points_per_usd: args.points_per_usd,
        minimum_points: args.min_conversion,
        monthly_cap_points: args.monthly_cap,
    };

    let ledger = match replay_operations(BufReader::new(file), policy) {
        Ok(ledger) => ledger,
        Err(e) => {
            eprintln!("Error replaying operations: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_accounts(&ledger, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, account, amount, source, description`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    op_type: String,
    account: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<i64>,
    #[serde(default)]
    source: String,
    #[serde(default)]
    description: String,
}

/// One parsed ledger operation.
#[derive(Debug)]
enum Operation {
    Earn {
        account: AccountId,
        amount: i64,
        source: String,
        description: String,
    },
    Spend {
        account: AccountId,
        amount: i64,
        source: String,
        description: String,
    },
    Refund {
        account: AccountId,
        amount: i64,
        source: String,
        description: String,
    },
    Convert {
        account: AccountId,
        amount: i64,
    },
}

impl CsvRecord {
    /// Converts the CSV record into an operation.
    ///
    /// Returns `None` for unknown operation types or missing amounts.
    fn into_operation(self) -> Option<Operation> {
        let account = AccountId(self.account);
        let amount = self.amount?;

        match self.op_type.to_lowercase().as_str() {
            "earn" => Some(Operation::Earn {
                account,
                amount,
                source: self.source,
                description: self.description,
            }),
            "spend" => Some(Operation::Spend {
                account,
                amount,
                source: self.source,
                description: self.description,
            }),
            "refund" => Some(Operation::Refund {
                account,
                amount,
                source: self.source,
                description: self.description,
            }),
            "convert" => Some(Operation::Convert { account, amount }),
            _ => None,
        }
    }
}

/// Replays operations from a CSV reader through the full component stack.
///
/// Streaming parse: arbitrarily large files are handled without loading
/// everything into memory. Malformed rows and failed operations are skipped
/// (logged in debug builds) so one bad row never poisons the replay.
///
/// # CSV Format
///
/// Expected columns: `type, account, amount, source, description`
/// - `type`: earn, spend, refund, or convert
/// - `account`: opaque account id
/// - `amount`: points (positive integer)
/// - `source`, `description`: optional context, ignored for convert
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn replay_operations<R: Read>(
    reader: R,
    policy: ConversionPolicy,
) -> Result<Arc<Ledger>, csv::Error> {
    let ledger = Arc::new(Ledger::new());
    let conversions = ConversionEngine::new(Arc::clone(&ledger), policy);
    let refunds = RefundProcessor::new(Arc::clone(&ledger));

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true) // Allow missing source/description fields
        .has_headers(true)
        .from_reader(reader);

    for result in rdr.deserialize::<CsvRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!("skipping malformed row: {e}");
                continue;
            }
        };

        let Some(op) = record.into_operation() else {
            tracing::debug!("skipping invalid operation record");
            continue;
        };

        let outcome = match op {
            Operation::Earn {
                account,
                amount,
                source,
                description,
            } => ledger
                .credit(
                    CreditRequest::new(account, amount, CreditKind::Earn, source)
                        .description(description),
                )
                .map(|_| ()),
            Operation::Spend {
                account,
                amount,
                source,
                description,
            } => ledger
                .charge(ChargeRequest::new(account, amount, source).description(description))
                .map(|_| ()),
            Operation::Refund {
                account,
                amount,
                source,
                description,
            } => refunds
                .refund(&account, amount, source, description, Default::default(), None)
                .map(|_| ()),
            Operation::Convert { account, amount } => {
                conversions.convert(&account, amount, None).map(|_| ())
            }
        };

        if let Err(e) = outcome {
            tracing::debug!("skipping failed operation: {e}");
        }
    }

    Ok(ledger)
}

/// Final account state row.
#[derive(Debug, Serialize)]
struct AccountRecord {
    account: String,
    balance: i64,
    subscription_credit: Decimal,
    transactions: usize,
}

/// Writes final account states to a CSV writer.
///
/// Output columns: `account, balance, subscription_credit, transactions`,
/// sorted by account id for deterministic output.
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_accounts<W: Write>(ledger: &Ledger, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    let mut records: Vec<AccountRecord> = ledger
        .accounts()
        .map(|account| {
            let account_id = account.account_id();
            AccountRecord {
                transactions: ledger.log().account_transaction_count(&account_id),
                account: account_id.0,
                balance: account.balance(),
                subscription_credit: account.subscription_credit().round_dp(2),
            }
        })
        .collect();
    records.sort_by(|a, b| a.account.cmp(&b.account));

    for record in records {
        wtr.serialize(record)?;
    }

    wtr.flush()?;
    Ok(())
}
