//! External source boundary for the settlement engine.
//!
//! This module defines **only** the source traits and their error type.
//! No orchestration, no persistence, no settlement arithmetic belong
//! here; the concrete ERP-backed implementation lives in [`erp`].
//!
//! Implementations must be object-safe (`Arc<dyn SalesSource>`) and
//! `Send + Sync` so the runtime can fan calls out across task boundaries.

pub mod erp;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};

use cbk_schemas::{MaterialMap, ProductId, PurchaseReceipt, Revenue};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a source implementation may return. Any of these aborts the
/// submission that needed the data; none is retried here.
#[derive(Debug)]
pub enum SourceError {
    /// Network or transport failure.
    Transport(String),
    /// The upstream API returned an application-level error.
    Api { message: String },
    /// A response payload could not be decoded.
    Decode(String),
    /// A required configuration value (e.g. API key) is missing.
    Config(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Transport(msg) => write!(f, "transport error: {msg}"),
            SourceError::Api { message } => write!(f, "source api error: {message}"),
            SourceError::Decode(msg) => write!(f, "decode error: {msg}"),
            SourceError::Config(msg) => write!(f, "config error: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Point-of-sale data for a settlement period.
#[async_trait::async_trait]
pub trait SalesSource: Send + Sync {
    /// Channel-segmented revenue with per-product quantities for
    /// `[from, to)`.
    async fn fetch_revenue(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Revenue, SourceError>;

    /// Quantities sold of specific products within `[from, to)` — the
    /// narrow query gap adjustment fans out per stale field.
    async fn fetch_product_sales(
        &self,
        products: &[ProductId],
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<BTreeMap<ProductId, f64>, SourceError>;
}

/// Goods received during a settlement period.
#[async_trait::async_trait]
pub trait PurchaseSource: Send + Sync {
    /// Received quantities per material with weighted-average unit cost
    /// across the matching orders.
    async fn fetch_received(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PurchaseReceipt>, SourceError>;
}

/// Best-effort push of final closing stock after a settlement persists.
/// A failure here is reported to the caller but never fails the
/// settlement; there is no distributed transaction across this boundary.
#[async_trait::async_trait]
pub trait InventorySync: Send + Sync {
    async fn push_closing_stock(
        &self,
        at: DateTime<Utc>,
        stock: &MaterialMap,
    ) -> Result<(), SourceError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cbk_schemas::MaterialId;

    struct MockSales {
        revenue: Revenue,
    }

    #[async_trait::async_trait]
    impl SalesSource for MockSales {
        async fn fetch_revenue(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Revenue, SourceError> {
            Ok(self.revenue.clone())
        }

        async fn fetch_product_sales(
            &self,
            _products: &[ProductId],
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<BTreeMap<ProductId, f64>, SourceError> {
            Ok(BTreeMap::new())
        }
    }

    struct FailingSync;

    #[async_trait::async_trait]
    impl InventorySync for FailingSync {
        async fn push_closing_stock(
            &self,
            _at: DateTime<Utc>,
            _stock: &MaterialMap,
        ) -> Result<(), SourceError> {
            Err(SourceError::Transport("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn traits_are_object_safe() {
        let mut revenue = Revenue::default();
        revenue.total = 420.0;
        let sales: std::sync::Arc<dyn SalesSource> =
            std::sync::Arc::new(MockSales { revenue });
        let now = Utc::now();
        let got = sales.fetch_revenue(now, now).await.unwrap();
        assert_eq!(got.total, 420.0);

        let sync: std::sync::Arc<dyn InventorySync> = std::sync::Arc::new(FailingSync);
        let stock: MaterialMap = [(MaterialId(1097), 1.0)].into_iter().collect();
        let err = sync.push_closing_stock(now, &stock).await.unwrap_err();
        assert_eq!(err.to_string(), "transport error: connection refused");
    }

    #[test]
    fn source_error_display() {
        let err = SourceError::Api {
            message: "session expired".to_string(),
        };
        assert_eq!(err.to_string(), "source api error: session expired");
        assert_eq!(
            SourceError::Decode("bad json".to_string()).to_string(),
            "decode error: bad json"
        );
    }
}
