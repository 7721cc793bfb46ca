//! Position monitor driver: the periodic loop that applies the rule engine to
//! every open holding and executes the exits it decides.
//!
//! The driver never trusts in-memory copies across ticks. Every pass re-reads
//! holdings, strategies, and prices from their sources, so repeated or delayed
//! ticks converge on the same state instead of diverging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::rules;
use super::InFlight;
use crate::db::Database;
use crate::market::{MarketDataProvider, TradeExecutor};
use crate::models::{AuditEntry, Strategy};

/// Strategy applied when neither the holding nor the user picked one.
pub const FALLBACK_STRATEGY_ID: &str = "balanced";

/// The (user, championship) pair the agent is currently working for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub user_id: String,
    pub championship_id: String,
}

/// Shared handle to the active session. Switching contexts bumps a generation
/// counter; in-flight work re-checks it before writing so results computed
/// for a stale context are discarded rather than persisted.
pub struct SessionHandle {
    context: RwLock<SessionContext>,
    generation: AtomicU64,
}

impl SessionHandle {
    pub fn new(context: SessionContext) -> Self {
        Self {
            context: RwLock::new(context),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn current(&self) -> (SessionContext, u64) {
        let context = self.context.read().await.clone();
        (context, self.generation.load(Ordering::SeqCst))
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Replace the active context (user logged out, championship changed).
    pub async fn switch(&self, context: SessionContext) {
        let mut current = self.context.write().await;
        *current = context;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// What one monitor pass did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Holdings evaluated against their strategy
    pub evaluated: usize,
    /// Holdings skipped for lack of a live price
    pub skipped: usize,
    /// Exits executed successfully
    pub exits: usize,
    /// Exits that triggered but failed to execute
    pub failed_exits: usize,
}

/// Periodic driver over the active session's holdings.
pub struct PositionMonitor {
    db: Arc<Database>,
    provider: Arc<dyn MarketDataProvider>,
    executor: Arc<dyn TradeExecutor>,
    session: Arc<SessionHandle>,

    // The driver must not overlap itself; a tick arriving while one is still
    // completing is skipped, and the next one re-reads fresh state anyway.
    tick_in_flight: std::sync::atomic::AtomicBool,
}

impl PositionMonitor {
    pub fn new(
        db: Arc<Database>,
        provider: Arc<dyn MarketDataProvider>,
        executor: Arc<dyn TradeExecutor>,
        session: Arc<SessionHandle>,
    ) -> Self {
        Self {
            db,
            provider,
            executor,
            session,
            tick_in_flight: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Run one monitoring pass. Returns None when a previous pass was still
    /// in flight and this one was skipped.
    pub async fn tick(&self) -> Result<Option<TickSummary>> {
        let Some(_guard) = InFlight::try_acquire(&self.tick_in_flight) else {
            debug!("Previous monitor pass still running, skipping tick");
            return Ok(None);
        };

        let (context, generation) = self.session.current().await;
        let summary = self.run_pass(&context, generation).await?;

        debug!(
            evaluated = summary.evaluated,
            skipped = summary.skipped,
            exits = summary.exits,
            "Monitor pass complete"
        );
        Ok(Some(summary))
    }

    async fn run_pass(&self, context: &SessionContext, generation: u64) -> Result<TickSummary> {
        let mut summary = TickSummary::default();

        // Authoritative state, fresh every pass: trades may have happened
        // out-of-band since the last tick.
        let holdings = self
            .db
            .get_holdings(&context.user_id, &context.championship_id)
            .await?;
        if holdings.is_empty() {
            return Ok(summary);
        }

        let strategies: HashMap<String, Strategy> = self
            .db
            .get_strategies()
            .await?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();
        let default_strategy_id = self
            .db
            .get_default_strategy(&context.user_id)
            .await?
            .unwrap_or_else(|| FALLBACK_STRATEGY_ID.to_string());

        let symbols: Vec<String> = holdings.iter().map(|h| h.symbol.clone()).collect();
        let prices = match self.provider.latest_prices(&symbols).await {
            Ok(prices) => prices,
            Err(e) => {
                // Transient fetch failure: skip the whole pass, try next tick
                warn!(error = %e, "Price fetch failed, skipping monitor pass");
                return Ok(summary);
            }
        };

        // Sequential on purpose: audit-log ordering stays deterministic
        // within a tick.
        for holding in &holdings {
            let Some(&price) = prices.get(&holding.symbol) else {
                debug!(symbol = %holding.symbol, "No price this tick, skipping holding");
                summary.skipped += 1;
                continue;
            };

            let strategy_id = holding
                .strategy_id
                .as_deref()
                .unwrap_or(&default_strategy_id);
            let Some(strategy) = strategies.get(strategy_id) else {
                warn!(
                    symbol = %holding.symbol,
                    strategy = %strategy_id,
                    "Unknown strategy, skipping holding"
                );
                summary.skipped += 1;
                continue;
            };

            let decision = rules::evaluate(holding, price, strategy);
            summary.evaluated += 1;

            // The session may have changed while we were suspended on I/O;
            // writes for a stale context are discarded.
            if self.session.generation() != generation {
                info!("Session context changed mid-pass, discarding remaining results");
                return Ok(summary);
            }

            if Some(decision.new_peak_price) != holding.peak_price {
                if let Err(e) = self
                    .db
                    .update_peak_price(
                        &holding.user_id,
                        &holding.championship_id,
                        &holding.symbol,
                        decision.new_peak_price,
                    )
                    .await
                {
                    // Self-heals: next tick recomputes the peak from scratch
                    warn!(symbol = %holding.symbol, error = %e, "Failed to persist peak price");
                }
            }

            if !decision.is_sell() {
                continue;
            }

            let quantity = decision.trade_quantity.unwrap_or(holding.quantity);
            let trigger = decision
                .reason
                .split(':')
                .next()
                .unwrap_or("exit")
                .to_string();

            info!(
                symbol = %holding.symbol,
                trigger = %trigger,
                price = %price,
                "Exit triggered"
            );

            let entry = AuditEntry {
                user_id: holding.user_id.clone(),
                championship_id: holding.championship_id.clone(),
                symbol: holding.symbol.clone(),
                trigger,
                strategy_name: strategy.name.clone(),
                reasoning: decision.reason.clone(),
                created_at: Utc::now(),
            };
            if let Err(e) = self.db.add_audit_entry(&entry).await {
                warn!(symbol = %holding.symbol, error = %e, "Failed to write audit entry");
            }

            // One failed exit must never abort the rest of the portfolio
            match self.executor.close_position(holding, quantity, price).await {
                Ok(tx) => {
                    if self.session.generation() != generation {
                        info!("Session context changed during execution, discarding result");
                        return Ok(summary);
                    }
                    if let Err(e) = self.db.record_transaction(&tx).await {
                        error!(symbol = %holding.symbol, error = %e, "Failed to record transaction");
                    }
                    if let Err(e) = self
                        .db
                        .close_holding(
                            &holding.user_id,
                            &holding.championship_id,
                            &holding.symbol,
                        )
                        .await
                    {
                        error!(symbol = %holding.symbol, error = %e, "Failed to close holding");
                    }
                    summary.exits += 1;
                }
                Err(e) => {
                    // Position stays open; the trigger persists, so the next
                    // tick retries implicitly.
                    error!(symbol = %holding.symbol, error = %e, "Exit execution failed");
                    summary.failed_exits += 1;
                }
            }
        }

        Ok(summary)
    }
}
