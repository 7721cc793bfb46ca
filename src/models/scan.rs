//! Opportunity scan types: market snapshots, risk buckets, and daily reports.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Live quote for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub price: Decimal,

    /// 24h price change in percent
    #[serde(default)]
    pub change_24h_percent: Decimal,

    /// 24h traded volume in quote currency
    #[serde(default)]
    pub volume_24h: Decimal,
}

/// Point-in-time view of the tradable market, keyed by symbol.
///
/// Best-effort: symbols the provider could not quote are simply absent.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub quotes: HashMap<String, Quote>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl MarketSnapshot {
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<_> = self.quotes.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

/// Fixed risk categories an instrument can be assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskBucket {
    Conservative,
    Balanced,
    Aggressive,
    Speculative,
}

impl RiskBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskBucket::Conservative => "conservative",
            RiskBucket::Balanced => "balanced",
            RiskBucket::Aggressive => "aggressive",
            RiskBucket::Speculative => "speculative",
        }
    }

    pub fn parse(s: &str) -> Option<RiskBucket> {
        match s.to_lowercase().as_str() {
            "conservative" => Some(RiskBucket::Conservative),
            "balanced" => Some(RiskBucket::Balanced),
            "aggressive" => Some(RiskBucket::Aggressive),
            "speculative" => Some(RiskBucket::Speculative),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a scan report came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanSource {
    Ai,
    Heuristic,
}

impl ScanSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanSource::Ai => "ai",
            ScanSource::Heuristic => "heuristic",
        }
    }

    pub fn parse(s: &str) -> Option<ScanSource> {
        match s.to_lowercase().as_str() {
            "ai" => Some(ScanSource::Ai),
            "heuristic" => Some(ScanSource::Heuristic),
            _ => None,
        }
    }
}

/// One symbol's bucket assignment within a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub symbol: String,
    pub bucket: RiskBucket,
    pub reason: String,
}

/// The day's classification of the market, scoped to one championship.
///
/// Exactly one report is current per championship per day; a report is
/// immutable once written except for its error field being updated on a
/// failed re-attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub championship_id: String,
    pub results: Vec<ScanResult>,
    pub source: ScanSource,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScanReport {
    pub fn new(championship_id: String, results: Vec<ScanResult>, source: ScanSource) -> Self {
        Self {
            championship_id,
            results,
            source,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    /// Empty placeholder written when a scan fails with no cache to fall back
    /// on, so the system has a well-defined "last attempt" marker.
    pub fn empty_placeholder(championship_id: String, error: impl Into<String>) -> Self {
        Self {
            championship_id,
            results: Vec::new(),
            source: ScanSource::Heuristic,
            error_message: Some(error.into()),
            created_at: Utc::now(),
        }
    }

    /// A report with no results or a recorded error is a failed attempt that
    /// warrants a retry within the same day.
    pub fn is_failed_attempt(&self) -> bool {
        self.results.is_empty() || self.error_message.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_round_trip() {
        for bucket in [
            RiskBucket::Conservative,
            RiskBucket::Balanced,
            RiskBucket::Aggressive,
            RiskBucket::Speculative,
        ] {
            assert_eq!(RiskBucket::parse(bucket.as_str()), Some(bucket));
        }
        assert_eq!(RiskBucket::parse("yolo"), None);
    }

    #[test]
    fn test_failed_attempt_detection() {
        let ok = ScanReport::new(
            "cup".to_string(),
            vec![ScanResult {
                symbol: "ACME".to_string(),
                bucket: RiskBucket::Balanced,
                reason: "steady".to_string(),
            }],
            ScanSource::Ai,
        );
        assert!(!ok.is_failed_attempt());

        // A successful scan that found nothing still counts as an attempt,
        // but the scheduler treats zero results as retry-worthy.
        let empty = ScanReport::new("cup".to_string(), Vec::new(), ScanSource::Ai);
        assert!(empty.is_failed_attempt());

        let failed = ScanReport::empty_placeholder("cup".to_string(), "provider down");
        assert!(failed.is_failed_attempt());
        assert_eq!(failed.source, ScanSource::Heuristic);
    }
}
