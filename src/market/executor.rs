//! Trade executor: turns an exit decision into a fill.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;

use crate::models::{Holding, TradeSide, Transaction};

/// Executes position closes against the championship's virtual book.
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    /// Close (part of) a holding at the given price, returning the resulting
    /// transaction. Errors leave the position open; the triggering condition
    /// persists, so the next tick retries implicitly.
    async fn close_position(
        &self,
        holding: &Holding,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Transaction>;
}

/// Virtual-fill executor: every close fills in full at the observed price.
pub struct SimulatedExecutor;

#[async_trait]
impl TradeExecutor for SimulatedExecutor {
    async fn close_position(
        &self,
        holding: &Holding,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<Transaction> {
        let tx = Transaction {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: holding.user_id.clone(),
            championship_id: holding.championship_id.clone(),
            symbol: holding.symbol.clone(),
            side: TradeSide::Sell,
            quantity,
            price,
            executed_at: Utc::now(),
        };

        info!(
            symbol = %tx.symbol,
            quantity = %tx.quantity,
            price = %tx.price,
            pnl = %holding.unrealized_pnl(price),
            "Filled virtual close"
        );

        Ok(tx)
    }
}
