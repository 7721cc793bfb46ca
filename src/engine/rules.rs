//! Rule engine: one holding, a live price, and a strategy in; one decision out.
//!
//! Pure and deterministic. No I/O, no hidden state beyond the three inputs,
//! so the driver can re-run it on every tick and converge.

use rust_decimal::Decimal;

use crate::models::{AgentDecision, Holding, Strategy};

/// Evaluate a holding against its strategy at the given live price.
///
/// Order of checks is load-bearing: the hard stop loss always wins ties with
/// take-profit tiers, and tiers are consulted highest gain threshold first
/// with the first match ending evaluation. Even on Hold the returned decision
/// carries the updated peak so callers persist the high-water mark.
pub fn evaluate(holding: &Holding, current_price: Decimal, strategy: &Strategy) -> AgentDecision {
    let peak = holding
        .peak_price
        .unwrap_or(current_price)
        .max(current_price);

    // Hard stop: checked before any tier, capital preservation first.
    let stop_floor = holding.average_price
        * (Decimal::ONE - strategy.stop_loss_percent / Decimal::ONE_HUNDRED);
    if current_price < stop_floor {
        let reason = format!(
            "stop loss: price {} fell below {} ({}% under avg entry {})",
            current_price, stop_floor, strategy.stop_loss_percent, holding.average_price
        );
        return AgentDecision::sell(reason, peak, holding.quantity);
    }

    let gain_percent = holding.gain_percent(current_price);
    let drop_percent = if peak.is_zero() {
        Decimal::ZERO
    } else {
        (peak - current_price) / peak * Decimal::ONE_HUNDRED
    };

    // Gain must strictly exceed the threshold; the drop check is inclusive so
    // a zero-trail tier fires at threshold touch.
    for tier in strategy.tiers_descending() {
        if gain_percent > tier.gain_threshold_percent
            && drop_percent >= tier.trailing_drop_percent
        {
            let reason = format!(
                "take profit tier (gain > {}%, trail {}%): gain {}%, retraced {}% from peak {}",
                tier.gain_threshold_percent,
                tier.trailing_drop_percent,
                gain_percent.round_dp(2),
                drop_percent.round_dp(2),
                peak
            );
            return AgentDecision::sell(reason, peak, holding.quantity);
        }
    }

    AgentDecision::hold("no exit condition met", peak)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentAction, TakeProfitTier};
    use rust_decimal_macros::dec;

    fn make_holding(avg: Decimal, peak: Option<Decimal>) -> Holding {
        let mut holding = Holding::new(
            "alice".to_string(),
            "summer-cup".to_string(),
            "ACME".to_string(),
            dec!(10),
            avg,
        );
        holding.peak_price = peak;
        holding
    }

    fn make_strategy() -> Strategy {
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
        }
    }

    #[test]
    fn test_stop_loss_fires_below_floor() {
        // avg 100, stop 5% -> floor 95; 94 is below
        let holding = make_holding(dec!(100), Some(dec!(115)));
        let decision = evaluate(&holding, dec!(94), &make_strategy());

        assert_eq!(decision.action, AgentAction::Sell);
        assert!(decision.reason.contains("stop loss"));
        assert_eq!(decision.trade_quantity, Some(dec!(10)));
    }

    #[test]
    fn test_stop_loss_wins_over_tiers() {
        // Pathological strategy where a tier would also match a deep drop;
        // the stop loss is checked first regardless.
        let strategy = Strategy {
            stop_loss_percent: dec!(5),
            tiers: vec![TakeProfitTier {
                gain_threshold_percent: dec!(-20),
                trailing_drop_percent: dec!(1),
            }],
            ..make_strategy()
        };
        let holding = make_holding(dec!(100), Some(dec!(120)));
        let decision = evaluate(&holding, dec!(90), &strategy);

        assert!(decision.reason.contains("stop loss"));
    }

    #[test]
    fn test_at_exact_stop_floor_holds() {
        // Floor is exclusive: price must fall strictly below it
        let holding = make_holding(dec!(100), None);
        let decision = evaluate(&holding, dec!(95), &make_strategy());
        assert_eq!(decision.action, AgentAction::Hold);
    }

    #[test]
    fn test_highest_tier_wins() {
        // avg 100, peak 115, price 112:
        // gain = 12% > 10, drop = (115-112)/115 = 2.6% >= 1.5 -> tier 2 sells.
        let holding = make_holding(dec!(100), Some(dec!(115)));
        let decision = evaluate(&holding, dec!(112), &make_strategy());

        assert_eq!(decision.action, AgentAction::Sell);
        assert!(decision.reason.contains("gain > 10%"));
        assert_eq!(decision.new_peak_price, dec!(115));
    }

    #[test]
    fn test_no_sell_below_gain_threshold() {
        // gain exactly at the threshold is not "exceeded": strict comparison
        let holding = make_holding(dec!(100), Some(dec!(105)));
        let decision = evaluate(&holding, dec!(105), &make_strategy());
        assert_eq!(decision.action, AgentAction::Hold);
    }

    #[test]
    fn test_lower_tier_fires_when_higher_does_not() {
        // gain = 7% (>5, not >10), drop from peak 110 to 107 = 2.7% >= 2
        let holding = make_holding(dec!(100), Some(dec!(110)));
        let decision = evaluate(&holding, dec!(107), &make_strategy());

        assert_eq!(decision.action, AgentAction::Sell);
        assert!(decision.reason.contains("gain > 5%"));
    }

    #[test]
    fn test_zero_trail_tier_fires_at_threshold_touch() {
        let strategy = Strategy {
            tiers: vec![TakeProfitTier {
                gain_threshold_percent: dec!(5),
                trailing_drop_percent: dec!(0),
            }],
            ..make_strategy()
        };
        // Price at fresh peak, no retracement at all
        let holding = make_holding(dec!(100), None);
        let decision = evaluate(&holding, dec!(106), &strategy);

        assert_eq!(decision.action, AgentAction::Sell);
    }

    #[test]
    fn test_hold_still_advances_peak() {
        let holding = make_holding(dec!(100), Some(dec!(103)));
        let decision = evaluate(&holding, dec!(104), &make_strategy());

        assert_eq!(decision.action, AgentAction::Hold);
        assert_eq!(decision.new_peak_price, dec!(104));
    }

    #[test]
    fn test_peak_never_decreases() {
        let holding = make_holding(dec!(100), Some(dec!(110)));
        let decision = evaluate(&holding, dec!(101), &make_strategy());
        assert_eq!(decision.new_peak_price, dec!(110));

        // With no stored peak, the current price seeds it
        let fresh = make_holding(dec!(100), None);
        let decision = evaluate(&fresh, dec!(101), &make_strategy());
        assert_eq!(decision.new_peak_price, dec!(101));
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let holding = make_holding(dec!(100), Some(dec!(115)));
        let strategy = make_strategy();
        let first = evaluate(&holding, dec!(112), &strategy);
        let second = evaluate(&holding, dec!(112), &strategy);
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_tiers_means_hold_unless_stopped() {
        let strategy = Strategy {
            tiers: Vec::new(),
            ..make_strategy()
        };
        let holding = make_holding(dec!(100), None);
        assert_eq!(
            evaluate(&holding, dec!(150), &strategy).action,
            AgentAction::Hold
        );
        assert_eq!(
            evaluate(&holding, dec!(90), &strategy).action,
            AgentAction::Sell
        );
    }
}
