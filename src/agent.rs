//! Agent runner: wires the position monitor and scan scheduler onto one
//! event loop and keeps them ticking until the session ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Local;
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::db::Database;
use crate::engine::{
    next_scan_delay, PositionMonitor, ScanClassifier, ScanScheduler, ScanState, SessionContext,
    SessionHandle, DEFAULT_TARGET_HOUR,
};
use crate::market::{MarketDataProvider, TradeExecutor};

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub user_id: String,

    pub championship_id: String,

    /// Monitor pass cadence in seconds
    pub monitor_interval_secs: u64,

    /// Local hour of day the daily scan window opens
    pub scan_hour: u32,

    pub database_url: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            championship_id: String::new(),
            monitor_interval_secs: 15,
            scan_hour: DEFAULT_TARGET_HOUR,
            database_url: "sqlite:./tradearena.db?mode=rwc".to_string(),
        }
    }
}

/// Autonomous agent for one active session.
///
/// The monitor and scheduler are two independently-ticking tasks multiplexed
/// on one execution context; either may suspend on I/O without blocking the
/// other's next slot. They touch disjoint data (positions vs. scan reports),
/// so their interleaving needs no coordination.
pub struct Agent {
    config: AgentConfig,
    session: Arc<SessionHandle>,
    monitor: PositionMonitor,
    scheduler: Arc<ScanScheduler>,
    shutdown: Arc<AtomicBool>,
}

impl Agent {
    pub async fn new(
        config: AgentConfig,
        provider: Arc<dyn MarketDataProvider>,
        executor: Arc<dyn TradeExecutor>,
        classifier: Arc<dyn ScanClassifier>,
    ) -> Result<Self> {
        let db = Arc::new(Database::new(&config.database_url).await?);

        let session = Arc::new(SessionHandle::new(SessionContext {
            user_id: config.user_id.clone(),
            championship_id: config.championship_id.clone(),
        }));

        let monitor = PositionMonitor::new(
            db.clone(),
            provider.clone(),
            executor,
            session.clone(),
        );
        let scheduler = Arc::new(ScanScheduler::new(
            db,
            provider,
            classifier,
            config.scan_hour,
        ));

        Ok(Self {
            config,
            session,
            monitor,
            scheduler,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// Currently published scan state.
    pub async fn scan_state(&self) -> ScanState {
        self.scheduler.state().await
    }

    /// Switch the active session. In-flight work for the old context is
    /// discarded before any write lands.
    pub async fn switch_context(&self, user_id: String, championship_id: String) {
        info!(user = %user_id, championship = %championship_id, "Switching session context");
        self.session
            .switch(SessionContext {
                user_id,
                championship_id,
            })
            .await;
    }

    /// Main loop. Runs until ctrl_c or the shutdown flag is set.
    pub async fn run(&self) -> Result<()> {
        info!(
            user = %self.config.user_id,
            championship = %self.config.championship_id,
            interval = self.config.monitor_interval_secs,
            scan_hour = self.config.scan_hour,
            "Starting agent"
        );

        // App-level tick at startup: the scheduler decides whether a scan is
        // already due (e.g. the process restarted after the target hour).
        self.run_scan_check().await;

        let mut monitor_interval =
            interval(Duration::from_secs(self.config.monitor_interval_secs));
        let mut scan_timer = Box::pin(tokio::time::sleep(next_scan_delay(
            Local::now(),
            self.config.scan_hour,
        )));

        while !self.shutdown.load(Ordering::SeqCst) {
            tokio::select! {
                _ = monitor_interval.tick() => {
                    match self.monitor.tick().await {
                        Ok(Some(summary)) if summary.exits > 0 => {
                            info!(exits = summary.exits, "Automated exits executed");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            // Never fatal; the next tick re-reads everything
                            error!(error = %e, "Monitor pass failed");
                        }
                    }
                }
                _ = &mut scan_timer => {
                    self.run_scan_check().await;
                    // Re-arm from wall clock rather than assuming exactly 24h
                    let delay = next_scan_delay(Local::now(), self.config.scan_hour);
                    debug!(secs = delay.as_secs(), "Scan timer re-armed");
                    scan_timer = Box::pin(tokio::time::sleep(delay));
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    self.shutdown.store(true, Ordering::SeqCst);
                }
            }
        }

        info!("Agent stopped");
        Ok(())
    }

    async fn run_scan_check(&self) {
        let (context, _) = self.session.current().await;
        if let Err(e) = self.scheduler.check_and_run(&context.championship_id).await {
            error!(error = %e, "Scan check failed");
        }
    }
}
