//! Exit strategy model: a hard stop loss plus trailing take-profit tiers.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// A trailing take-profit tier.
///
/// The tier activates once unrealized gain exceeds `gain_threshold_percent`
/// (strictly), and exits once price has retraced `trailing_drop_percent` or
/// more from the post-activation peak. A tier with a zero trailing drop fires
/// the moment its gain threshold is exceeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitTier {
    /// Unrealized gain (percent of average entry price) that arms this tier
    pub gain_threshold_percent: Decimal,

    /// Retracement from peak (percent of peak) that triggers the exit
    pub trailing_drop_percent: Decimal,
}

/// Named, immutable exit rule set. Referenced by id from holdings; many
/// holdings may share one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    pub id: String,

    pub name: String,

    /// Hard exit threshold below average entry price, in percent
    pub stop_loss_percent: Decimal,

    /// Take-profit tiers; evaluated highest gain threshold first
    pub tiers: Vec<TakeProfitTier>,
}

impl Strategy {
    /// Tiers sorted by gain threshold descending, the order the rule engine
    /// evaluates them in.
    pub fn tiers_descending(&self) -> Vec<TakeProfitTier> {
        let mut tiers = self.tiers.clone();
        tiers.sort_by(|a, b| b.gain_threshold_percent.cmp(&a.gain_threshold_percent));
        tiers
    }

    /// Built-in catalog inserted into a fresh database so the agent is usable
    /// before any custom strategies exist.
    pub fn seed_catalog() -> Vec<Strategy> {
        vec![
            Strategy {
                id: "conservative".to_string(),
                name: "Conservative".to_string(),
                stop_loss_percent: dec!(3),
                tiers: vec![
                    TakeProfitTier {
                        gain_threshold_percent: dec!(4),
                        trailing_drop_percent: dec!(1),
                    },
                    TakeProfitTier {
                        gain_threshold_percent: dec!(8),
                        trailing_drop_percent: dec!(0.5),
                    },
                ],
            },
            Strategy {
                id: "balanced".to_string(),
                name: "Balanced".to_string(),
                stop_loss_percent: dec!(5),
                tiers: vec![
                    TakeProfitTier {
                        gain_threshold_percent: dec!(5),
                        trailing_drop_percent: dec!(2),
                    },
                    TakeProfitTier {
                        gain_threshold_percent: dec!(10),
                        trailing_drop_percent: dec!(1.5),
                    },
                ],
            },
            Strategy {
                id: "aggressive".to_string(),
                name: "Aggressive".to_string(),
                stop_loss_percent: dec!(10),
                tiers: vec![
                    TakeProfitTier {
                        gain_threshold_percent: dec!(15),
                        trailing_drop_percent: dec!(4),
                    },
                    TakeProfitTier {
                        gain_threshold_percent: dec!(30),
                        trailing_drop_percent: dec!(2.5),
                    },
                ],
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tiers_descending_order() {
        let strategy = Strategy {
            id: "s".to_string(),
            name: "S".to_string(),
            stop_loss_percent: dec!(5),
            tiers: vec![
                TakeProfitTier {
                    gain_threshold_percent: dec!(5),
                    trailing_drop_percent: dec!(2),
                },
                TakeProfitTier {
                    gain_threshold_percent: dec!(10),
                    trailing_drop_percent: dec!(1.5),
                },
            ],
        };

        let sorted = strategy.tiers_descending();
        assert_eq!(sorted[0].gain_threshold_percent, dec!(10));
        assert_eq!(sorted[1].gain_threshold_percent, dec!(5));
    }

    #[test]
    fn test_seed_catalog_ids_unique() {
        let catalog = Strategy::seed_catalog();
        let mut ids: Vec<_> = catalog.iter().map(|s| s.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), catalog.len());
    }
}
