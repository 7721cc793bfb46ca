//! Data models for holdings, strategies, decisions, scans, and transactions.

mod decision;
mod holding;
mod scan;
mod strategy;
mod transaction;

pub use decision::{AgentAction, AgentDecision, AuditEntry};
pub use holding::Holding;
pub use scan::{MarketSnapshot, Quote, RiskBucket, ScanReport, ScanResult, ScanSource};
pub use strategy::{Strategy, TakeProfitTier};
pub use transaction::{TradeSide, Transaction};
