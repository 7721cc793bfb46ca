//! Championship trading agent
//!
//! Monitors a user's holdings against their exit strategies and runs the
//! daily market opportunity scan, fully unattended.

mod agent;
mod db;
mod engine;
mod market;
mod models;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use crate::agent::{Agent, AgentConfig};
use crate::db::Database;
use crate::engine::{
    AiClassifier, HeuristicClassifier, ScanClassifier, ScanScheduler, DEFAULT_TARGET_HOUR,
};
use crate::market::{
    HttpQuoteProvider, MarketDataProvider, SimulatedExecutor, StaticProvider, TradeExecutor,
};
use crate::models::Holding;

/// Championship trading agent CLI.
#[derive(Parser)]
#[command(name = "tradearena")]
#[command(about = "Autonomous exit agent and opportunity scanner for trading championships", long_about = None)]
struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "sqlite:./tradearena.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the autonomous agent for a session
    Run {
        /// User id the agent trades for
        #[arg(short, long)]
        user: String,

        /// Championship the session is scoped to
        #[arg(short, long)]
        championship: String,

        /// Monitor interval in seconds
        #[arg(short, long, default_value = "15")]
        interval: u64,

        /// Local hour of day the daily scan window opens
        #[arg(long, default_value_t = DEFAULT_TARGET_HOUR)]
        scan_hour: u32,
    },

    /// Record a buy into the virtual book
    Buy {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        championship: String,

        symbol: String,

        #[arg(short, long)]
        quantity: f64,

        #[arg(short, long)]
        price: f64,

        /// Strategy override for this holding
        #[arg(short, long)]
        strategy: Option<String>,
    },

    /// Manually close a holding at a given price
    Close {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        championship: String,

        symbol: String,

        #[arg(short, long)]
        price: f64,
    },

    /// Show open holdings for a session
    Holdings {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        championship: String,
    },

    /// List the strategy catalog
    Strategies,

    /// Set a user's default strategy
    SetDefault {
        #[arg(short, long)]
        user: String,

        /// Strategy id from the catalog
        strategy: String,
    },

    /// Force a scan scheduling decision right now
    Scan {
        #[arg(short, long)]
        championship: String,
    },

    /// Show the current scan report for a championship
    Report {
        #[arg(short, long)]
        championship: String,
    },

    /// Show recent automated-exit audit entries
    Audit {
        #[arg(short, long)]
        user: String,

        #[arg(short, long)]
        championship: String,

        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

/// Live quotes when `QUOTE_API_URL` is configured, an empty static provider
/// otherwise (every holding is then skipped for lack of a price).
fn build_provider() -> Arc<dyn MarketDataProvider> {
    match HttpQuoteProvider::from_env() {
        Ok(provider) => Arc::new(provider),
        Err(_) => {
            warn!("QUOTE_API_URL not set; running without live quotes");
            Arc::new(StaticProvider::new())
        }
    }
}

/// AI classification when `SCANNER_AI_URL` is configured, the local heuristic
/// otherwise.
fn build_classifier() -> Arc<dyn ScanClassifier> {
    match AiClassifier::from_env() {
        Ok(classifier) => Arc::new(classifier),
        Err(_) => {
            info!("SCANNER_AI_URL not set; using heuristic classifier");
            Arc::new(HeuristicClassifier)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run {
            user,
            championship,
            interval,
            scan_hour,
        } => {
            if scan_hour > 23 {
                anyhow::bail!("scan hour must be between 0 and 23");
            }

            let config = AgentConfig {
                user_id: user.clone(),
                championship_id: championship.clone(),
                monitor_interval_secs: interval,
                scan_hour,
                database_url: cli.database.clone(),
            };

            let agent = Agent::new(
                config,
                build_provider(),
                Arc::new(SimulatedExecutor),
                build_classifier(),
            )
            .await?;

            println!("\n=== Championship Trading Agent ===");
            println!("User:            {}", user);
            println!("Championship:    {}", championship);
            println!("Monitor every:   {}s", interval);
            println!("Scan window:     {:02}:00 local", scan_hour);
            println!("\nPress Ctrl+C to stop.\n");

            if let Err(e) = agent.run().await {
                tracing::error!(error = %e, "Agent error");
            }
        }

        Commands::Buy {
            user,
            championship,
            symbol,
            quantity,
            price,
            strategy,
        } => {
            let db = Database::new(&cli.database).await?;

            let mut holding = Holding::new(
                user.clone(),
                championship.clone(),
                symbol.to_uppercase(),
                Decimal::try_from(quantity)?,
                Decimal::try_from(price)?,
            );
            holding.strategy_id = strategy;
            db.save_holding(&holding).await?;

            println!(
                "Bought {} {} @ {} for {} in {}",
                quantity, holding.symbol, price, user, championship
            );
        }

        Commands::Close {
            user,
            championship,
            symbol,
            price,
        } => {
            let db = Database::new(&cli.database).await?;
            let symbol = symbol.to_uppercase();
            let price = Decimal::try_from(price)?;

            let holdings = db.get_holdings(&user, &championship).await?;
            let holding = holdings
                .iter()
                .find(|h| h.symbol == symbol)
                .ok_or_else(|| anyhow::anyhow!("No open holding in {}", symbol))?;

            let executor = SimulatedExecutor;
            let tx = executor.close_position(holding, holding.quantity, price).await?;
            db.record_transaction(&tx).await?;
            db.close_holding(&user, &championship, &symbol).await?;

            println!(
                "Closed {} {} @ {} (P&L: {})",
                holding.quantity,
                symbol,
                price,
                holding.unrealized_pnl(price)
            );
        }

        Commands::Holdings { user, championship } => {
            let db = Database::new(&cli.database).await?;
            let holdings = db.get_holdings(&user, &championship).await?;

            if holdings.is_empty() {
                println!("No open holdings for {} in {}.", user, championship);
                return Ok(());
            }

            println!(
                "\n{:<10} {:>12} {:>12} {:>12} {:<12}",
                "SYMBOL", "QTY", "AVG", "PEAK", "STRATEGY"
            );
            println!("{}", "-".repeat(62));

            for h in &holdings {
                println!(
                    "{:<10} {:>12} {:>12} {:>12} {:<12}",
                    h.symbol,
                    h.quantity,
                    h.average_price,
                    h.peak_price
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    h.strategy_id.as_deref().unwrap_or("(default)")
                );
            }
        }

        Commands::Strategies => {
            let db = Database::new(&cli.database).await?;
            let strategies = db.get_strategies().await?;

            for s in &strategies {
                println!("\n=== {} ({}) ===", s.name, s.id);
                println!("Stop loss: {}%", s.stop_loss_percent);
                for tier in s.tiers_descending() {
                    println!(
                        "  Tier: gain > {}%, trailing drop {}%",
                        tier.gain_threshold_percent, tier.trailing_drop_percent
                    );
                }
            }
        }

        Commands::SetDefault { user, strategy } => {
            let db = Database::new(&cli.database).await?;

            let known = db.get_strategies().await?;
            if !known.iter().any(|s| s.id == strategy) {
                anyhow::bail!("Unknown strategy id: {}", strategy);
            }

            db.set_default_strategy(&user, &strategy).await?;
            println!("Default strategy for {} is now {}", user, strategy);
        }

        Commands::Scan { championship } => {
            let db = Arc::new(Database::new(&cli.database).await?);
            let scheduler = ScanScheduler::new(
                db,
                build_provider(),
                build_classifier(),
                DEFAULT_TARGET_HOUR,
            );

            let ran = scheduler.check_and_run(&championship).await?;
            let state = scheduler.state().await;

            if ran {
                println!("Scan executed: {} results", state.results.len());
            } else {
                println!("No scan executed (cached report still current or window closed)");
            }
            if let Some(error) = state.error_message {
                println!("Last attempt error: {}", error);
            }
        }

        Commands::Report { championship } => {
            let db = Database::new(&cli.database).await?;
            let report = match db.get_scan_report(&championship).await? {
                Some(report) => report,
                None => {
                    println!("No scan report for {} yet.", championship);
                    return Ok(());
                }
            };

            println!("\n=== Scan Report: {} ===", championship);
            println!("Source:    {}", report.source.as_str());
            println!("Created:   {}", report.created_at);
            if let Some(error) = &report.error_message {
                println!("Error:     {}", error);
            }

            println!("\n{:<10} {:<14} REASON", "SYMBOL", "BUCKET");
            println!("{}", "-".repeat(70));
            for r in &report.results {
                println!(
                    "{:<10} {:<14} {}",
                    r.symbol,
                    r.bucket.as_str(),
                    truncate(&r.reason, 44)
                );
            }
        }

        Commands::Audit {
            user,
            championship,
            limit,
        } => {
            let db = Database::new(&cli.database).await?;
            let entries = db.get_audit_log(&user, &championship, limit).await?;

            if entries.is_empty() {
                println!("No audit entries for {} in {}.", user, championship);
                return Ok(());
            }

            for e in &entries {
                println!(
                    "[{}] {} {} ({}): {}",
                    e.created_at, e.symbol, e.trigger_label, e.strategy_name, e.reasoning
                );
            }
        }
    }

    Ok(())
}

/// Truncate a string with ellipsis if too long. Cuts on a char boundary;
/// classifier reasons are free text and may contain multi-byte characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::truncate;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("0123456789", 8), "01234...");

        // Multi-byte text must not be cut mid-character
        let accented = "é".repeat(31);
        let cut = truncate(&accented, 44);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 44);
        assert_eq!(cut, format!("{}...", "é".repeat(20)));
    }
}
