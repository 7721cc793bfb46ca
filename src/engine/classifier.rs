//! Scan classifier: turns a market snapshot into symbol -> risk bucket
//! assignments.
//!
//! The scheduler treats classification as a single fallible operation with a
//! declared provenance. The AI-backed implementation is best-effort and
//! rate-limited upstream; the heuristic one always succeeds at lower quality.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{MarketSnapshot, RiskBucket, ScanResult, ScanSource, Strategy};

/// Assigns every quotable symbol to one of the fixed risk buckets.
#[async_trait]
pub trait ScanClassifier: Send + Sync {
    /// Provenance tag recorded on the resulting report.
    fn source(&self) -> ScanSource;

    async fn classify(
        &self,
        snapshot: &MarketSnapshot,
        strategy_catalog: &[Strategy],
    ) -> Result<Vec<ScanResult>>;
}

/// Local fallback classifier bucketing by 24h volatility bands.
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    fn bucket_for(change_24h_percent: Decimal) -> RiskBucket {
        let swing = change_24h_percent.abs();
        if swing < dec!(2) {
            RiskBucket::Conservative
        } else if swing < dec!(5) {
            RiskBucket::Balanced
        } else if swing < dec!(10) {
            RiskBucket::Aggressive
        } else {
            RiskBucket::Speculative
        }
    }

    /// Catalog entry whose stop loss best matches the bucket's risk level,
    /// mentioned in the reason so users know which exits to pair with.
    fn suggested_strategy(bucket: RiskBucket, catalog: &[Strategy]) -> Option<&Strategy> {
        let target_stop = match bucket {
            RiskBucket::Conservative => dec!(3),
            RiskBucket::Balanced => dec!(5),
            RiskBucket::Aggressive | RiskBucket::Speculative => dec!(10),
        };
        catalog.iter().min_by_key(|s| {
            (s.stop_loss_percent - target_stop).abs()
        })
    }
}

#[async_trait]
impl ScanClassifier for HeuristicClassifier {
    fn source(&self) -> ScanSource {
        ScanSource::Heuristic
    }

    async fn classify(
        &self,
        snapshot: &MarketSnapshot,
        strategy_catalog: &[Strategy],
    ) -> Result<Vec<ScanResult>> {
        let mut results = Vec::with_capacity(snapshot.quotes.len());

        for symbol in snapshot.symbols() {
            let quote = &snapshot.quotes[&symbol];
            let bucket = Self::bucket_for(quote.change_24h_percent);

            let mut reason = format!(
                "24h move {}% at price {}",
                quote.change_24h_percent.round_dp(2),
                quote.price
            );
            if let Some(strategy) = Self::suggested_strategy(bucket, strategy_catalog) {
                reason.push_str(&format!("; pairs with {} exits", strategy.name));
            }

            results.push(ScanResult {
                symbol,
                bucket,
                reason,
            });
        }

        Ok(results)
    }
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    symbols: Vec<SymbolRow<'a>>,
    strategies: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct SymbolRow<'a> {
    symbol: &'a str,
    price: Decimal,
    change_24h_percent: Decimal,
    volume_24h: Decimal,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    assignments: Vec<Assignment>,
}

#[derive(Debug, Deserialize)]
struct Assignment {
    symbol: String,
    bucket: String,
    #[serde(default)]
    reason: String,
}

/// AI-backed classifier calling a configured classification endpoint.
pub struct AiClassifier {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl AiClassifier {
    pub fn new(endpoint: String, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    /// Read `SCANNER_AI_URL` (required) and `SCANNER_AI_KEY` (optional).
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("SCANNER_AI_URL").context("SCANNER_AI_URL not set")?;
        let api_key = std::env::var("SCANNER_AI_KEY").ok();
        Self::new(endpoint, api_key)
    }
}

#[async_trait]
impl ScanClassifier for AiClassifier {
    fn source(&self) -> ScanSource {
        ScanSource::Ai
    }

    async fn classify(
        &self,
        snapshot: &MarketSnapshot,
        strategy_catalog: &[Strategy],
    ) -> Result<Vec<ScanResult>> {
        let request = ClassifyRequest {
            symbols: snapshot
                .quotes
                .iter()
                .map(|(symbol, q)| SymbolRow {
                    symbol,
                    price: q.price,
                    change_24h_percent: q.change_24h_percent,
                    volume_24h: q.volume_24h,
                })
                .collect(),
            strategies: strategy_catalog.iter().map(|s| s.name.as_str()).collect(),
        };

        let mut http_request = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response: ClassifyResponse = http_request
            .send()
            .await
            .context("Classification request failed")?
            .error_for_status()
            .context("Classification endpoint returned an error")?
            .json()
            .await
            .context("Malformed classification response")?;

        Ok(validate_assignments(snapshot, response.assignments))
    }
}

/// Keep only assignments for symbols we actually quoted, with bucket names we
/// recognize. A sloppy provider degrades the report instead of failing it.
fn validate_assignments(snapshot: &MarketSnapshot, assignments: Vec<Assignment>) -> Vec<ScanResult> {
    let mut results = Vec::with_capacity(assignments.len());

    for assignment in assignments {
        if !snapshot.quotes.contains_key(&assignment.symbol) {
            warn!(symbol = %assignment.symbol, "Dropping assignment for unquoted symbol");
            continue;
        }
        let Some(bucket) = RiskBucket::parse(&assignment.bucket) else {
            warn!(
                symbol = %assignment.symbol,
                bucket = %assignment.bucket,
                "Dropping assignment with unknown bucket"
            );
            continue;
        };
        results.push(ScanResult {
            symbol: assignment.symbol,
            bucket,
            reason: assignment.reason,
        });
    }

    debug!(count = results.len(), "Validated classifier assignments");
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Quote;

    fn snapshot_with(entries: &[(&str, Decimal)]) -> MarketSnapshot {
        let mut snapshot = MarketSnapshot::default();
        for (symbol, change) in entries {
            snapshot.quotes.insert(
                symbol.to_string(),
                Quote {
                    price: dec!(100),
                    change_24h_percent: *change,
                    volume_24h: dec!(10000),
                },
            );
        }
        snapshot
    }

    #[tokio::test]
    async fn test_heuristic_bucket_bands() {
        let snapshot = snapshot_with(&[
            ("CALM", dec!(0.5)),
            ("MILD", dec!(-3)),
            ("WILD", dec!(7)),
            ("MOON", dec!(25)),
        ]);

        let results = HeuristicClassifier
            .classify(&snapshot, &Strategy::seed_catalog())
            .await
            .unwrap();

        let bucket_of = |symbol: &str| {
            results
                .iter()
                .find(|r| r.symbol == symbol)
                .map(|r| r.bucket)
                .unwrap()
        };
        assert_eq!(bucket_of("CALM"), RiskBucket::Conservative);
        assert_eq!(bucket_of("MILD"), RiskBucket::Balanced);
        assert_eq!(bucket_of("WILD"), RiskBucket::Aggressive);
        assert_eq!(bucket_of("MOON"), RiskBucket::Speculative);
    }

    #[tokio::test]
    async fn test_heuristic_is_ordered_and_total() {
        let snapshot = snapshot_with(&[("B", dec!(1)), ("A", dec!(1)), ("C", dec!(1))]);
        let results = HeuristicClassifier
            .classify(&snapshot, &[])
            .await
            .unwrap();

        let symbols: Vec<_> = results.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_validation_drops_bad_assignments() {
        let snapshot = snapshot_with(&[("ACME", dec!(1))]);
        let assignments = vec![
            Assignment {
                symbol: "ACME".to_string(),
                bucket: "balanced".to_string(),
                reason: "ok".to_string(),
            },
            Assignment {
                symbol: "GHOST".to_string(),
                bucket: "balanced".to_string(),
                reason: "not quoted".to_string(),
            },
            Assignment {
                symbol: "ACME".to_string(),
                bucket: "galactic".to_string(),
                reason: "no such bucket".to_string(),
            },
        ];

        let results = validate_assignments(&snapshot, assignments);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].bucket, RiskBucket::Balanced);
    }
}
