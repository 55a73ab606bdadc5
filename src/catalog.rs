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

//! Product catalog interface.
//!
//! The catalog is external, static configuration; the marketplace only
//! reads it. [`StaticCatalog`] is the in-memory implementation used by the
//! binary, the demo server, and tests.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// How long a purchased product stays active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductDuration {
    Weeks(u32),
    Months(u32),
    Permanent,
}

/// Unrecognized product duration string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized product duration: {0:?}")]
pub struct InvalidDuration(pub String);

impl ProductDuration {
    /// Expiration instant for a purchase made at `from`; `None` means the
    /// purchase never expires.
    ///
    /// Week arithmetic is exact (`n * 7 * 24h`). Month arithmetic follows
    /// the calendar: Jan 31 + 1 month clamps to Feb 28/29, and December
    /// rolls the year over. Out-of-range results (beyond chrono's year
    /// bounds) saturate to no expiry.
    pub fn expires_at(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            ProductDuration::Weeks(n) => Some(from + chrono::Duration::weeks(i64::from(*n))),
            ProductDuration::Months(n) => from.checked_add_months(Months::new(*n)),
            ProductDuration::Permanent => None,
        }
    }
}

impl FromStr for ProductDuration {
    type Err = InvalidDuration;

    /// Parses the catalog's duration strings: `"<n> week(s)"`,
    /// `"<n> month(s)"`, or `"permanent"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let mut parts = lowered.split_whitespace();

        match (parts.next(), parts.next(), parts.next()) {
            (Some("permanent"), None, None) => Ok(ProductDuration::Permanent),
            (Some(count), Some(unit), None) => {
                let n: u32 = count.parse().map_err(|_| InvalidDuration(s.to_string()))?;
                if n == 0 {
                    return Err(InvalidDuration(s.to_string()));
                }
                match unit {
                    "week" | "weeks" => Ok(ProductDuration::Weeks(n)),
                    "month" | "months" => Ok(ProductDuration::Months(n)),
                    _ => Err(InvalidDuration(s.to_string())),
                }
            }
            _ => Err(InvalidDuration(s.to_string())),
        }
    }
}

/// A marketplace product definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub points_cost: i64,
    pub duration: ProductDuration,
    pub available: bool,
}

/// Read-only product lookup.
pub trait Catalog: Send + Sync {
    /// Returns the product, available or not; `None` if unknown.
    fn product(&self, product_id: &str) -> Option<Product>;
}

/// In-memory catalog backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    products: HashMap<String, Product>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        Self {
            products: products
                .into_iter()
                .map(|product| (product.id.clone(), product))
                .collect(),
        }
    }

    pub fn insert(&mut self, product: Product) {
        self.products.insert(product.id.clone(), product);
    }
}

impl Catalog for StaticCatalog {
    fn product(&self, product_id: &str) -> Option<Product> {
        self.products.get(product_id).cloned()
    }
}
