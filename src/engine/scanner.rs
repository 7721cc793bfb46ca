//! Scan scheduler: decides when the daily opportunity scan is due, guards
//! against concurrent runs, and recovers from classifier failures.
//!
//! The scheduler owns the one piece of explicit mutual exclusion in the
//! system: a per-process in-flight flag. Everything else converges through
//! idempotent re-reads of the cached report.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, TimeZone, Timelike, Utc};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::classifier::ScanClassifier;
use super::InFlight;
use crate::db::Database;
use crate::market::MarketDataProvider;
use crate::models::{ScanReport, ScanResult, ScanSource};

/// Hour of day (local time) the daily scan window opens.
pub const DEFAULT_TARGET_HOUR: u32 = 8;

/// Seconds added past the target hour when arming the daily timer, so the
/// firing lands safely inside the window.
const REARM_BUFFER_SECS: i64 = 60;

/// In-memory scan state published for consumers after every decision.
#[derive(Debug, Clone, Default)]
pub struct ScanState {
    pub results: Vec<ScanResult>,
    pub source: Option<ScanSource>,
    pub error_message: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl ScanState {
    fn from_report(report: &ScanReport) -> Self {
        Self {
            results: report.results.clone(),
            source: Some(report.source),
            error_message: report.error_message.clone(),
            timestamp: Some(report.created_at),
        }
    }
}

/// Whether a new scan attempt is warranted given the cached report.
///
/// True when any of: no cached report; the cached report's local calendar
/// date is not today; it is from today but predates the target hour which has
/// since passed; or it is from today past the target hour but recorded a
/// failed attempt (zero results or an error).
pub fn should_run_new_scan(
    cached: Option<&ScanReport>,
    now: DateTime<Local>,
    target_hour: u32,
) -> bool {
    let Some(report) = cached else {
        return true;
    };

    let report_local = report.created_at.with_timezone(&Local);
    if report_local.date_naive() != now.date_naive() {
        return true;
    }
    if report_local.hour() < target_hour && now.hour() >= target_hour {
        return true;
    }
    if now.hour() >= target_hour && report.is_failed_attempt() {
        return true;
    }
    false
}

/// A stale cache alone is not enough: the scan window must also be open, so a
/// restart at 03:00 with yesterday's cache waits for the target hour.
pub fn scan_due(cached: Option<&ScanReport>, now: DateTime<Local>, target_hour: u32) -> bool {
    should_run_new_scan(cached, now, target_hour) && now.hour() >= target_hour
}

/// Time until the next scan timer firing: today's target hour if still ahead,
/// otherwise tomorrow's, plus a small buffer. Computed from wall-clock so a
/// process restarted at an arbitrary time re-arms correctly.
pub fn next_scan_delay(now: DateTime<Local>, target_hour: u32) -> std::time::Duration {
    let today_target = Local
        .with_ymd_and_hms(now.year(), now.month(), now.day(), target_hour, 0, 0)
        .single()
        .unwrap_or(now);

    let mut next = today_target + ChronoDuration::seconds(REARM_BUFFER_SECS);
    if next <= now {
        next += ChronoDuration::days(1);
    }

    (next - now).to_std().unwrap_or_default()
}

/// Periodic opportunity scan runner, one per agent process.
pub struct ScanScheduler {
    db: Arc<Database>,
    provider: Arc<dyn MarketDataProvider>,
    classifier: Arc<dyn ScanClassifier>,
    target_hour: u32,

    // The single explicit lock in the system; a request arriving while a scan
    // is in flight is dropped, not queued.
    scan_in_flight: AtomicBool,

    state: RwLock<ScanState>,
}

impl ScanScheduler {
    pub fn new(
        db: Arc<Database>,
        provider: Arc<dyn MarketDataProvider>,
        classifier: Arc<dyn ScanClassifier>,
        target_hour: u32,
    ) -> Self {
        Self {
            db,
            provider,
            classifier,
            target_hour,
            scan_in_flight: AtomicBool::new(false),
            state: RwLock::new(ScanState::default()),
        }
    }

    /// Currently published scan state.
    pub async fn state(&self) -> ScanState {
        self.state.read().await.clone()
    }

    pub fn target_hour(&self) -> u32 {
        self.target_hour
    }

    /// Run the scheduling decision for a championship at the current wall
    /// clock. Returns whether a new scan actually executed.
    pub async fn check_and_run(&self, championship_id: &str) -> Result<bool> {
        self.check_and_run_at(championship_id, Local::now()).await
    }

    async fn check_and_run_at(&self, championship_id: &str, now: DateTime<Local>) -> Result<bool> {
        let cached = match self.db.get_scan_report(championship_id).await {
            Ok(cached) => cached,
            Err(e) => {
                // Treat an unreadable cache as absent; the decision below
                // re-reads storage next tick anyway.
                warn!(error = %e, "Failed to load cached scan report");
                None
            }
        };

        if !scan_due(cached.as_ref(), now, self.target_hour) {
            debug!(
                championship = %championship_id,
                cached = cached.is_some(),
                "No scan due"
            );
            self.publish(cached.as_ref()).await;
            return Ok(false);
        }

        let Some(_guard) = InFlight::try_acquire(&self.scan_in_flight) else {
            debug!(championship = %championship_id, "Scan already in flight, dropping request");
            return Ok(false);
        };

        info!(championship = %championship_id, "Running opportunity scan");
        match self.run_scan(championship_id, now).await {
            Ok(report) => {
                // Persisted even with zero results so the attempt timestamp
                // prevents immediate re-triggering.
                if let Err(e) = self.db.save_scan_report(&report).await {
                    error!(error = %e, "Failed to persist scan report");
                }
                info!(
                    championship = %championship_id,
                    results = report.results.len(),
                    source = report.source.as_str(),
                    "Scan complete"
                );
                self.publish(Some(&report)).await;
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, championship = %championship_id, "Scan failed");
                self.record_failure(championship_id, &e.to_string(), now).await;
                Ok(false)
            }
        }
    }

    async fn run_scan(&self, championship_id: &str, now: DateTime<Local>) -> Result<ScanReport> {
        let snapshot = self.provider.snapshot().await?;
        let catalog = self.db.get_strategies().await?;
        let results = self.classifier.classify(&snapshot, &catalog).await?;

        // Stamped with the decision time so freshness checks compare against
        // the same clock that gated this run.
        let mut report = ScanReport::new(
            championship_id.to_string(),
            results,
            self.classifier.source(),
        );
        report.created_at = now.with_timezone(&Utc);
        Ok(report)
    }

    /// Failure path: re-surface the last good cache with only its error field
    /// overwritten, or synthesize an empty placeholder when no cache exists.
    /// Either way the stored error marks the attempt so the next check
    /// retries.
    async fn record_failure(&self, championship_id: &str, error: &str, now: DateTime<Local>) {
        let fallback = match self.db.get_scan_report(championship_id).await {
            Ok(Some(mut cached)) => {
                // The cached report stays immutable apart from its error field
                cached.error_message = Some(error.to_string());
                cached
            }
            Ok(None) => {
                let mut placeholder =
                    ScanReport::empty_placeholder(championship_id.to_string(), error);
                placeholder.created_at = now.with_timezone(&Utc);
                placeholder
            }
            Err(e) => {
                warn!(error = %e, "Failed to reload cache after scan failure");
                let mut placeholder =
                    ScanReport::empty_placeholder(championship_id.to_string(), error);
                placeholder.created_at = now.with_timezone(&Utc);
                placeholder
            }
        };

        if let Err(e) = self.db.save_scan_report(&fallback).await {
            error!(error = %e, "Failed to persist scan failure marker");
        }
        self.publish(Some(&fallback)).await;
    }

    async fn publish(&self, report: Option<&ScanReport>) {
        let mut state = self.state.write().await;
        *state = report.map(ScanState::from_report).unwrap_or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::classifier::HeuristicClassifier;
    use crate::market::StaticProvider;
    use crate::models::{MarketSnapshot, RiskBucket, Strategy};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    fn local_today_at(hour: u32, minute: u32) -> DateTime<Local> {
        let now = Local::now();
        Local
            .with_ymd_and_hms(now.year(), now.month(), now.day(), hour, minute, 0)
            .single()
            .expect("unambiguous local time")
    }

    fn report_at(local: DateTime<Local>, failed: bool) -> ScanReport {
        let mut report = ScanReport::new(
            "cup".to_string(),
            vec![ScanResult {
                symbol: "ACME".to_string(),
                bucket: RiskBucket::Balanced,
                reason: "steady".to_string(),
            }],
            ScanSource::Ai,
        );
        report.created_at = local.with_timezone(&Utc);
        if failed {
            report.results.clear();
            report.error_message = Some("provider down".to_string());
        }
        report
    }

    #[test]
    fn test_no_cache_means_scan() {
        assert!(should_run_new_scan(None, local_today_at(9, 0), 8));
        // ...but execution still waits for the window
        assert!(!scan_due(None, local_today_at(7, 0), 8));
    }

    #[test]
    fn test_fresh_pre_hour_report_before_window() {
        // Cached today 06:00, now 07:00: not due yet
        let report = report_at(local_today_at(6, 0), false);
        assert!(!should_run_new_scan(Some(&report), local_today_at(7, 0), 8));
        assert!(!scan_due(Some(&report), local_today_at(7, 0), 8));
    }

    #[test]
    fn test_fresh_pre_hour_report_after_window() {
        // Cached today 06:00, now 09:00: produced before the window opened
        let report = report_at(local_today_at(6, 0), false);
        assert!(should_run_new_scan(Some(&report), local_today_at(9, 0), 8));
        assert!(scan_due(Some(&report), local_today_at(9, 0), 8));
    }

    #[test]
    fn test_post_hour_report_is_final_for_the_day() {
        let report = report_at(local_today_at(8, 5), false);
        assert!(!should_run_new_scan(Some(&report), local_today_at(11, 0), 8));
    }

    #[test]
    fn test_failed_post_hour_report_retries() {
        let report = report_at(local_today_at(8, 5), true);
        assert!(should_run_new_scan(Some(&report), local_today_at(11, 0), 8));
    }

    #[test]
    fn test_yesterday_report_is_stale() {
        let yesterday = local_today_at(10, 0) - ChronoDuration::days(1);
        let report = report_at(yesterday, false);

        assert!(should_run_new_scan(Some(&report), local_today_at(9, 0), 8));
        // Stale, but pre-window: decision true, execution gated
        assert!(should_run_new_scan(Some(&report), local_today_at(7, 30), 8));
        assert!(!scan_due(Some(&report), local_today_at(7, 30), 8));
    }

    #[test]
    fn test_next_scan_delay_wall_clock() {
        let before = local_today_at(6, 0);
        let delay = next_scan_delay(before, 8);
        // 06:00 -> 08:01 is two hours and the buffer
        assert_eq!(delay.as_secs(), 2 * 3600 + 60);

        let after = local_today_at(9, 0);
        let delay = next_scan_delay(after, 8);
        // 09:00 -> tomorrow 08:01
        assert_eq!(delay.as_secs(), 23 * 3600 + 60);
    }

    #[test]
    fn test_in_flight_guard_is_exclusive_and_releases() {
        let flag = AtomicBool::new(false);
        let guard = InFlight::try_acquire(&flag);
        assert!(guard.is_some());
        assert!(InFlight::try_acquire(&flag).is_none());

        drop(guard);
        assert!(InFlight::try_acquire(&flag).is_some());
    }

    struct FailingClassifier;

    #[async_trait]
    impl ScanClassifier for FailingClassifier {
        fn source(&self) -> ScanSource {
            ScanSource::Ai
        }

        async fn classify(
            &self,
            _snapshot: &MarketSnapshot,
            _catalog: &[Strategy],
        ) -> Result<Vec<ScanResult>> {
            anyhow::bail!("model unavailable")
        }
    }

    use crate::db::memory_db_url;

    async fn scheduler_with(
        classifier: Arc<dyn ScanClassifier>,
    ) -> (ScanScheduler, Arc<Database>) {
        let db = Arc::new(Database::new(&memory_db_url()).await.unwrap());
        let provider = Arc::new(StaticProvider::new());
        provider.set_price("ACME", dec!(100)).await;
        (
            ScanScheduler::new(db.clone(), provider, classifier, 8),
            db,
        )
    }

    #[tokio::test]
    async fn test_successful_scan_runs_once_per_window() {
        let (scheduler, db) = scheduler_with(Arc::new(HeuristicClassifier)).await;
        let now = local_today_at(9, 0);

        let ran = scheduler.check_and_run_at("cup", now).await.unwrap();
        assert!(ran);

        let report = db.get_scan_report("cup").await.unwrap().unwrap();
        assert_eq!(report.source, ScanSource::Heuristic);
        assert_eq!(report.results.len(), 1);

        // Checked again within the same minute: the fresh report blocks it
        let ran = scheduler
            .check_and_run_at("cup", now + ChronoDuration::seconds(30))
            .await
            .unwrap();
        assert!(!ran);

        let state = scheduler.state().await;
        assert_eq!(state.results.len(), 1);
        assert_eq!(state.source, Some(ScanSource::Heuristic));
        assert!(state.error_message.is_none());
    }

    #[tokio::test]
    async fn test_failure_with_no_cache_writes_placeholder() {
        let (scheduler, db) = scheduler_with(Arc::new(FailingClassifier)).await;

        let ran = scheduler
            .check_and_run_at("cup", local_today_at(9, 0))
            .await
            .unwrap();
        assert!(!ran);

        let marker = db.get_scan_report("cup").await.unwrap().unwrap();
        assert_eq!(marker.source, ScanSource::Heuristic);
        assert!(marker.results.is_empty());
        assert!(marker.error_message.as_deref().unwrap().contains("model unavailable"));

        let state = scheduler.state().await;
        assert!(state.error_message.is_some());
    }

    #[tokio::test]
    async fn test_failure_annotates_last_good_cache() {
        let (scheduler, db) = scheduler_with(Arc::new(FailingClassifier)).await;

        // Yesterday's good report is in the cache
        let yesterday = local_today_at(9, 0) - ChronoDuration::days(1);
        db.save_scan_report(&report_at(yesterday, false)).await.unwrap();

        scheduler
            .check_and_run_at("cup", local_today_at(9, 0))
            .await
            .unwrap();

        let cached = db.get_scan_report("cup").await.unwrap().unwrap();
        // Results survive; only the error field was overwritten
        assert_eq!(cached.results.len(), 1);
        assert_eq!(cached.source, ScanSource::Ai);
        assert!(cached.error_message.as_deref().unwrap().contains("model unavailable"));

        // The published state re-surfaces the last good results alongside the error
        let state = scheduler.state().await;
        assert_eq!(state.results.len(), 1);
        assert!(state.error_message.is_some());
    }

    #[tokio::test]
    async fn test_pre_window_check_publishes_without_running() {
        let (scheduler, db) = scheduler_with(Arc::new(HeuristicClassifier)).await;
        let pre = local_today_at(6, 30);
        db.save_scan_report(&report_at(pre, false)).await.unwrap();

        let ran = scheduler
            .check_and_run_at("cup", local_today_at(7, 0))
            .await
            .unwrap();
        assert!(!ran);

        // Cached content still published for consumers
        let state = scheduler.state().await;
        assert_eq!(state.results.len(), 1);
    }
}
