//! Database persistence for the championship book and scan cache.
//!
//! Stores everything the agent re-reads each tick:
//! - Holdings per (user, championship) pair
//! - The strategy catalog and per-user defaults
//! - The audit log written before every automated exit
//! - Transactions produced by executed exits
//! - One cached scan report per championship
//!
//! All writes are idempotent upserts so a retried tick converges instead of
//! diverging.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::models::{
    AuditEntry, Holding, ScanReport, ScanResult, ScanSource, Strategy, TradeSide, Transaction,
};

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,
}

/// Stored holding row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredHolding {
    pub user_id: String,
    pub championship_id: String,
    pub symbol: String,
    pub quantity: f64,
    pub average_price: f64,
    pub peak_price: Option<f64>,
    pub strategy_id: Option<String>,
    pub opened_at: String,
}

/// Stored strategy row; tiers are kept as a JSON column.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredStrategy {
    pub id: String,
    pub name: String,
    pub stop_loss_percent: f64,
    pub tiers: String,
}

/// Stored scan report row; results are kept as a JSON column so a report is
/// saved and superseded atomically.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredScanReport {
    pub championship_id: String,
    pub source: String,
    pub error_message: Option<String>,
    pub results: String,
    pub created_at: String,
}

/// Stored audit log row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredAuditEntry {
    pub id: i64,
    pub user_id: String,
    pub championship_id: String,
    pub symbol: String,
    pub trigger_label: String,
    pub strategy_name: String,
    pub reasoning: String,
    pub created_at: String,
}

/// Stored transaction row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredTransaction {
    pub id: String,
    pub user_id: String,
    pub championship_id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: f64,
    pub price: f64,
    pub executed_at: String,
}

impl Database {
    /// Create a new database connection and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;
        db.seed_strategies().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS strategies (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                stop_loss_percent REAL NOT NULL,
                tiers TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS holdings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                championship_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                quantity REAL NOT NULL,
                average_price REAL NOT NULL,
                peak_price REAL,
                strategy_id TEXT,
                opened_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                closed_at TEXT,
                UNIQUE(user_id, championship_id, symbol)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                championship_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity REAL NOT NULL,
                price REAL NOT NULL,
                executed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                championship_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                trigger_label TEXT NOT NULL,
                strategy_name TEXT NOT NULL,
                reasoning TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_reports (
                championship_id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                error_message TEXT,
                results TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_settings (
                user_id TEXT PRIMARY KEY,
                default_strategy_id TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_holdings_owner ON holdings(user_id, championship_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audit_owner ON audit_log(user_id, championship_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transactions_owner ON transactions(user_id, championship_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert the built-in strategy catalog if those ids are not present.
    async fn seed_strategies(&self) -> Result<()> {
        for strategy in Strategy::seed_catalog() {
            let tiers = serde_json::to_string(&strategy.tiers)?;
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO strategies (id, name, stop_loss_percent, tiers)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&strategy.id)
            .bind(&strategy.name)
            .bind(strategy.stop_loss_percent.to_f64().unwrap_or(0.0))
            .bind(tiers)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    // ==================== Strategies ====================

    /// Get the full strategy catalog.
    pub async fn get_strategies(&self) -> Result<Vec<Strategy>> {
        let rows = sqlx::query_as::<_, StoredStrategy>("SELECT * FROM strategies ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch strategies")?;

        rows.into_iter().map(convert_strategy).collect()
    }

    /// Save or replace a strategy.
    pub async fn save_strategy(&self, strategy: &Strategy) -> Result<()> {
        let tiers = serde_json::to_string(&strategy.tiers)?;
        sqlx::query(
            r#"
            INSERT INTO strategies (id, name, stop_loss_percent, tiers)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                stop_loss_percent = excluded.stop_loss_percent,
                tiers = excluded.tiers
            "#,
        )
        .bind(&strategy.id)
        .bind(&strategy.name)
        .bind(strategy.stop_loss_percent.to_f64().unwrap_or(0.0))
        .bind(tiers)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Set a user's default strategy.
    pub async fn set_default_strategy(&self, user_id: &str, strategy_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_settings (user_id, default_strategy_id, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(user_id) DO UPDATE SET
                default_strategy_id = excluded.default_strategy_id,
                updated_at = datetime('now')
            "#,
        )
        .bind(user_id)
        .bind(strategy_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a user's default strategy id, if one was chosen.
    pub async fn get_default_strategy(&self, user_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT default_strategy_id FROM user_settings WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(id,)| id))
    }

    // ==================== Holdings ====================

    /// Get all open holdings for a (user, championship) pair.
    pub async fn get_holdings(&self, user_id: &str, championship_id: &str) -> Result<Vec<Holding>> {
        let rows = sqlx::query_as::<_, StoredHolding>(
            r#"
            SELECT user_id, championship_id, symbol, quantity, average_price,
                   peak_price, strategy_id, opened_at
            FROM holdings
            WHERE user_id = ? AND championship_id = ? AND closed_at IS NULL AND quantity > 0.0001
            ORDER BY symbol
            "#,
        )
        .bind(user_id)
        .bind(championship_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch holdings")?;

        rows.into_iter().map(convert_holding).collect()
    }

    /// Save a holding, averaging in on conflict (a repeat buy in the same
    /// symbol adjusts size and entry price rather than duplicating the row).
    pub async fn save_holding(&self, holding: &Holding) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO holdings (user_id, championship_id, symbol, quantity, average_price, peak_price, strategy_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, championship_id, symbol) DO UPDATE SET
                average_price = (holdings.average_price * holdings.quantity + excluded.average_price * excluded.quantity)
                               / (holdings.quantity + excluded.quantity),
                quantity = holdings.quantity + excluded.quantity,
                strategy_id = COALESCE(excluded.strategy_id, holdings.strategy_id),
                closed_at = NULL,
                updated_at = datetime('now')
            "#,
        )
        .bind(&holding.user_id)
        .bind(&holding.championship_id)
        .bind(&holding.symbol)
        .bind(holding.quantity.to_f64().unwrap_or(0.0))
        .bind(holding.average_price.to_f64().unwrap_or(0.0))
        .bind(holding.peak_price.and_then(|p| p.to_f64()))
        .bind(holding.strategy_id.as_deref())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Write through an updated peak price. The monotonic high-water mark is
    /// enforced here too: a lower value never overwrites a higher one.
    pub async fn update_peak_price(
        &self,
        user_id: &str,
        championship_id: &str,
        symbol: &str,
        peak_price: Decimal,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE holdings SET
                peak_price = MAX(COALESCE(peak_price, 0), ?),
                updated_at = datetime('now')
            WHERE user_id = ? AND championship_id = ? AND symbol = ? AND closed_at IS NULL
            "#,
        )
        .bind(peak_price.to_f64().unwrap_or(0.0))
        .bind(user_id)
        .bind(championship_id)
        .bind(symbol)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Close a holding after a full exit.
    pub async fn close_holding(
        &self,
        user_id: &str,
        championship_id: &str,
        symbol: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE holdings SET
                quantity = 0,
                closed_at = datetime('now'),
                updated_at = datetime('now')
            WHERE user_id = ? AND championship_id = ? AND symbol = ? AND closed_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(championship_id)
        .bind(symbol)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== Transactions ====================

    /// Record an executed transaction. Keyed by id, so a retried write is a
    /// no-op.
    pub async fn record_transaction(&self, tx: &Transaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO transactions (id, user_id, championship_id, symbol, side, quantity, price, executed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&tx.id)
        .bind(&tx.user_id)
        .bind(&tx.championship_id)
        .bind(&tx.symbol)
        .bind(tx.side.as_str())
        .bind(tx.quantity.to_f64().unwrap_or(0.0))
        .bind(tx.price.to_f64().unwrap_or(0.0))
        .bind(tx.executed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get recent transactions for a (user, championship) pair.
    pub async fn get_transactions(
        &self,
        user_id: &str,
        championship_id: &str,
        limit: i64,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, StoredTransaction>(
            r#"
            SELECT * FROM transactions
            WHERE user_id = ? AND championship_id = ?
            ORDER BY executed_at DESC LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(championship_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch transactions")?;

        rows.into_iter().map(convert_transaction).collect()
    }

    // ==================== Audit Log ====================

    /// Append an audit log entry.
    pub async fn add_audit_entry(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (user_id, championship_id, symbol, trigger_label, strategy_name, reasoning, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.user_id)
        .bind(&entry.championship_id)
        .bind(&entry.symbol)
        .bind(&entry.trigger)
        .bind(&entry.strategy_name)
        .bind(&entry.reasoning)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get recent audit entries, newest first.
    pub async fn get_audit_log(
        &self,
        user_id: &str,
        championship_id: &str,
        limit: i64,
    ) -> Result<Vec<StoredAuditEntry>> {
        sqlx::query_as::<_, StoredAuditEntry>(
            r#"
            SELECT * FROM audit_log
            WHERE user_id = ? AND championship_id = ?
            ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(championship_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch audit log")
    }

    // ==================== Scan Reports ====================

    /// Get the cached scan report for a championship, if any.
    pub async fn get_scan_report(&self, championship_id: &str) -> Result<Option<ScanReport>> {
        let row = sqlx::query_as::<_, StoredScanReport>(
            "SELECT * FROM scan_reports WHERE championship_id = ?",
        )
        .bind(championship_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch scan report")?;

        row.map(convert_scan_report).transpose()
    }

    /// Save a scan report, superseding any previous one for the championship.
    pub async fn save_scan_report(&self, report: &ScanReport) -> Result<()> {
        let results = serde_json::to_string(&report.results)?;
        sqlx::query(
            r#"
            INSERT INTO scan_reports (championship_id, source, error_message, results, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(championship_id) DO UPDATE SET
                source = excluded.source,
                error_message = excluded.error_message,
                results = excluded.results,
                created_at = excluded.created_at
            "#,
        )
        .bind(&report.championship_id)
        .bind(report.source.as_str())
        .bind(report.error_message.as_deref())
        .bind(results)
        .bind(report.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get the connection pool (for advanced queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn convert_holding(row: StoredHolding) -> Result<Holding> {
    Ok(Holding {
        user_id: row.user_id,
        championship_id: row.championship_id,
        symbol: row.symbol,
        quantity: Decimal::try_from(row.quantity)?,
        average_price: Decimal::try_from(row.average_price)?,
        peak_price: row.peak_price.map(Decimal::try_from).transpose()?,
        strategy_id: row.strategy_id,
        opened_at: parse_timestamp(&row.opened_at),
    })
}

fn convert_strategy(row: StoredStrategy) -> Result<Strategy> {
    Ok(Strategy {
        id: row.id,
        name: row.name,
        stop_loss_percent: Decimal::try_from(row.stop_loss_percent)?,
        tiers: serde_json::from_str(&row.tiers).context("Malformed tier JSON")?,
    })
}

fn convert_transaction(row: StoredTransaction) -> Result<Transaction> {
    Ok(Transaction {
        id: row.id,
        user_id: row.user_id,
        championship_id: row.championship_id,
        symbol: row.symbol,
        side: TradeSide::parse(&row.side)
            .ok_or_else(|| anyhow::anyhow!("Unknown trade side: {}", row.side))?,
        quantity: Decimal::try_from(row.quantity)?,
        price: Decimal::try_from(row.price)?,
        executed_at: parse_timestamp(&row.executed_at),
    })
}

fn convert_scan_report(row: StoredScanReport) -> Result<ScanReport> {
    let results: Vec<ScanResult> =
        serde_json::from_str(&row.results).context("Malformed scan result JSON")?;
    Ok(ScanReport {
        championship_id: row.championship_id,
        results,
        source: ScanSource::parse(&row.source)
            .ok_or_else(|| anyhow::anyhow!("Unknown scan source: {}", row.source))?,
        error_message: row.error_message,
        created_at: parse_timestamp(&row.created_at),
    })
}

/// Uniquely named shared-cache memory database URL. The `file:` URI form with
/// `cache=shared` is what makes every pooled connection open the same
/// database; a plain `sqlite::memory:` gives each connection its own.
#[cfg(test)]
pub(crate) fn memory_db_url() -> String {
    format!(
        "sqlite:file:{}?mode=memory&cache=shared",
        uuid::Uuid::new_v4()
    )
}
