//! Market data provider: live price lookups and full-market snapshots.
//!
//! Best-effort by contract. A provider may omit symbols it cannot quote this
//! tick; callers skip those units and try again next tick.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::{MarketSnapshot, Quote};

/// Source of live prices for the monitor and the scanner.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Latest prices for the given symbols. Symbols without a quote are
    /// absent from the map, never an error.
    async fn latest_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>>;

    /// Snapshot of the whole tradable market, used by the opportunity scan.
    async fn snapshot(&self) -> Result<MarketSnapshot>;
}

#[derive(Debug, Deserialize)]
struct QuoteRow {
    symbol: String,
    price: Decimal,
    #[serde(default)]
    change_24h_percent: Decimal,
    #[serde(default)]
    volume_24h: Decimal,
}

/// HTTP quote provider against a configurable endpoint.
pub struct HttpQuoteProvider {
    client: reqwest::Client,
    base_url: String,
}

impl HttpQuoteProvider {
    pub fn new(base_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, base_url })
    }

    /// Read the endpoint from `QUOTE_API_URL`.
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("QUOTE_API_URL").context("QUOTE_API_URL not set")?;
        Self::new(base_url)
    }

    async fn fetch_quotes(&self, symbols: Option<&[String]>) -> Result<Vec<QuoteRow>> {
        let mut request = self.client.get(format!("{}/quotes", self.base_url));
        if let Some(symbols) = symbols {
            request = request.query(&[("symbols", symbols.join(","))]);
        }

        let rows: Vec<QuoteRow> = request
            .send()
            .await
            .context("Quote request failed")?
            .error_for_status()
            .context("Quote endpoint returned an error")?
            .json()
            .await
            .context("Malformed quote response")?;

        debug!(count = rows.len(), "Fetched quotes");
        Ok(rows)
    }
}

#[async_trait]
impl MarketDataProvider for HttpQuoteProvider {
    async fn latest_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = self.fetch_quotes(Some(symbols)).await?;
        Ok(rows.into_iter().map(|r| (r.symbol, r.price)).collect())
    }

    async fn snapshot(&self) -> Result<MarketSnapshot> {
        let rows = self.fetch_quotes(None).await?;
        let quotes = rows
            .into_iter()
            .map(|r| {
                (
                    r.symbol,
                    Quote {
                        price: r.price,
                        change_24h_percent: r.change_24h_percent,
                        volume_24h: r.volume_24h,
                    },
                )
            })
            .collect();

        Ok(MarketSnapshot {
            quotes,
            taken_at: Some(Utc::now()),
        })
    }
}

/// Fixed in-memory provider for dry runs and tests.
#[derive(Default)]
pub struct StaticProvider {
    quotes: RwLock<HashMap<String, Quote>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_quote(&self, symbol: &str, quote: Quote) {
        self.quotes.write().await.insert(symbol.to_string(), quote);
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.set_quote(
            symbol,
            Quote {
                price,
                change_24h_percent: Decimal::ZERO,
                volume_24h: Decimal::ZERO,
            },
        )
        .await;
    }
}

#[async_trait]
impl MarketDataProvider for StaticProvider {
    async fn latest_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        let quotes = self.quotes.read().await;
        Ok(symbols
            .iter()
            .filter_map(|s| quotes.get(s).map(|q| (s.clone(), q.price)))
            .collect())
    }

    async fn snapshot(&self) -> Result<MarketSnapshot> {
        Ok(MarketSnapshot {
            quotes: self.quotes.read().await.clone(),
            taken_at: Some(Utc::now()),
        })
    }
}
