//! Holding model: a user's open position in one symbol within one championship.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An open position, owned per (user, championship) pair.
///
/// `peak_price` is the highest price observed since the position was opened
/// and is monotonically non-decreasing except on close. Only the monitor
/// driver advances it; user trades never lower it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holding {
    pub user_id: String,

    pub championship_id: String,

    pub symbol: String,

    /// Number of units held
    pub quantity: Decimal,

    /// Average entry price per unit
    pub average_price: Decimal,

    /// Highest observed price since open; None until the first monitor pass
    pub peak_price: Option<Decimal>,

    /// Holding-specific strategy override; None means the user's default
    pub strategy_id: Option<String>,

    #[serde(default = "Utc::now")]
    pub opened_at: DateTime<Utc>,
}

impl Holding {
    pub fn new(
        user_id: String,
        championship_id: String,
        symbol: String,
        quantity: Decimal,
        average_price: Decimal,
    ) -> Self {
        Self {
            user_id,
            championship_id,
            symbol,
            quantity,
            average_price,
            peak_price: None,
            strategy_id: None,
            opened_at: Utc::now(),
        }
    }

    /// Cost basis of the position.
    pub fn cost_basis(&self) -> Decimal {
        self.quantity * self.average_price
    }

    /// Unrealized P&L at the given price.
    pub fn unrealized_pnl(&self, current_price: Decimal) -> Decimal {
        (current_price - self.average_price) * self.quantity
    }

    /// Unrealized gain as a percentage of average entry price.
    pub fn gain_percent(&self, current_price: Decimal) -> Decimal {
        if self.average_price.is_zero() {
            return Decimal::ZERO;
        }
        (current_price - self.average_price) / self.average_price * Decimal::ONE_HUNDRED
    }
}
