//! Rule engine output and the audit trail it leaves behind.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What the rule engine decided for one holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentAction {
    Hold,
    Sell,
}

/// Output of one rule evaluation. Ephemeral: it drives a side effect and is
/// logged, never persisted as an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentDecision {
    pub action: AgentAction,

    /// Human-readable trigger description
    pub reason: String,

    /// Updated high-water mark, returned even on Hold so callers persist it
    pub new_peak_price: Decimal,

    /// Full position size; set only on Sell (partial exits are not modeled)
    pub trade_quantity: Option<Decimal>,
}

impl AgentDecision {
    pub fn hold(reason: impl Into<String>, new_peak_price: Decimal) -> Self {
        Self {
            action: AgentAction::Hold,
            reason: reason.into(),
            new_peak_price,
            trade_quantity: None,
        }
    }

    pub fn sell(reason: impl Into<String>, new_peak_price: Decimal, quantity: Decimal) -> Self {
        Self {
            action: AgentAction::Sell,
            reason: reason.into(),
            new_peak_price,
            trade_quantity: Some(quantity),
        }
    }

    pub fn is_sell(&self) -> bool {
        self.action == AgentAction::Sell
    }
}

/// Audit log entry written before every automated exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub user_id: String,
    pub championship_id: String,
    pub symbol: String,

    /// Short trigger label, e.g. "stop loss" or "take profit tier 2"
    pub trigger: String,

    pub strategy_name: String,

    /// Full reasoning text from the decision
    pub reasoning: String,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}
