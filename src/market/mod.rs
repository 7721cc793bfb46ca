//! External market collaborators: quote provider and trade executor.

mod executor;
mod provider;

pub use executor::{SimulatedExecutor, TradeExecutor};
pub use provider::{HttpQuoteProvider, MarketDataProvider, StaticProvider};
