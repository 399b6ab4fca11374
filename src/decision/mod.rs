//! Decision engine (spec §4.4): turns raw opportunity economics into an
//! explicit EXECUTE/SKIP call with full reasoning, independent of whether
//! the opportunity came from a CEX cycle or a DEX pool path.

use std::collections::HashMap;

use crate::model::VolatilityWindow;

/// Dust-trade floor in USD, regardless of config.
pub const MIN_POSITION_USD: f64 = 10.0;
/// Per-leg notional floor in USD, regardless of config.
pub const LEG_MIN_NOTIONAL_USD: f64 = 5.0;

#[derive(Debug, Clone)]
pub struct DecisionEngineConfig {
    pub min_profit_threshold_pct: f64,
    pub max_position_usd: f64,
    pub expected_maker_legs: Option<u32>,
    pub max_concurrent_trades: Option<u32>,
    pub cooldown_seconds: Option<f64>,
    pub volatility_window_size: Option<usize>,
    pub sigma_multiplier: Option<f64>,
}

impl Default for DecisionEngineConfig {
    fn default() -> Self {
        Self {
            min_profit_threshold_pct: 0.0,
            max_position_usd: 10_000.0,
            expected_maker_legs: None,
            max_concurrent_trades: None,
            cooldown_seconds: None,
            volatility_window_size: None,
            sigma_multiplier: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LegNotional {
    pub notional_usd: f64,
}

/// Everything the engine needs to evaluate one opportunity. All percentages
/// are plain floats (0.25 means 0.25%, never 25.0 or 0.0025).
#[derive(Debug, Clone, Default)]
pub struct OpportunityInput {
    pub gross_pct: f64,
    pub fees_pct: f64,
    pub slip_pct: f64,
    pub gas_pct: f64,
    pub size_usd: f64,
    pub depth_limited_size_usd: Option<f64>,
    pub actual_maker_legs: Option<u32>,
    pub current_concurrent_trades: u32,
    pub seconds_since_last_trade: Option<f64>,
    pub exchange_ready: bool,
    pub legs: Vec<LegNotional>,
    pub has_quote: bool,
    pub has_gas_estimate: bool,
}

impl OpportunityInput {
    pub fn new(gross_pct: f64, fees_pct: f64, slip_pct: f64, gas_pct: f64, size_usd: f64) -> Self {
        Self {
            gross_pct,
            fees_pct,
            slip_pct,
            gas_pct,
            size_usd,
            exchange_ready: true,
            has_quote: true,
            has_gas_estimate: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Execute,
    Skip,
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub action: Action,
    pub reasons: Vec<String>,
    pub metrics: HashMap<String, f64>,
}

impl Decision {
    pub fn is_execute(&self) -> bool {
        self.action == Action::Execute
    }
}

pub struct DecisionEngine {
    config: DecisionEngineConfig,
    volatility_monitor: Option<VolatilityWindow>,
}

impl DecisionEngine {
    pub fn new(config: DecisionEngineConfig) -> Self {
        let volatility_monitor = match (config.volatility_window_size, config.sigma_multiplier) {
            (Some(window), Some(_)) => Some(VolatilityWindow::new(window)),
            _ => None,
        };
        Self {
            config,
            volatility_monitor,
        }
    }

    pub fn evaluate_opportunity(&mut self, input: OpportunityInput) -> Decision {
        let net_pct = input.gross_pct - input.fees_pct - input.slip_pct - input.gas_pct;

        // Feed the volatility monitor unconditionally, win or lose.
        if let Some(monitor) = self.volatility_monitor.as_mut() {
            monitor.observe(net_pct);
        }

        let mut effective_threshold = self.config.min_profit_threshold_pct;
        let mut using_dynamic = false;
        if let (Some(monitor), Some(sigma_multiplier)) =
            (self.volatility_monitor.as_ref(), self.config.sigma_multiplier)
        {
            if monitor.is_ready() {
                if let Some(dynamic) = monitor.dynamic_threshold(sigma_multiplier) {
                    effective_threshold = dynamic;
                    using_dynamic = true;
                }
            }
        }

        let breakeven_gross_pct = effective_threshold + input.fees_pct + input.slip_pct + input.gas_pct;

        let mut metrics = HashMap::new();
        metrics.insert("gross_pct".into(), input.gross_pct);
        metrics.insert("net_pct".into(), net_pct);
        metrics.insert("breakeven_gross_pct".into(), breakeven_gross_pct);
        metrics.insert("fees_pct".into(), input.fees_pct);
        metrics.insert("slip_pct".into(), input.slip_pct);
        metrics.insert("gas_pct".into(), input.gas_pct);
        metrics.insert("size_usd".into(), input.size_usd);

        if let Some(monitor) = self.volatility_monitor.as_ref() {
            metrics.insert("volatility_window_count".into(), monitor.count() as f64);
            metrics.insert("using_dynamic_threshold".into(), if using_dynamic { 1.0 } else { 0.0 });
            metrics.insert("effective_threshold_pct".into(), effective_threshold);
            if let Some(sigma) = monitor.sigma() {
                metrics.insert("volatility_sigma".into(), sigma);
            }
            if let Some(mean) = monitor.mean() {
                metrics.insert("volatility_moving_avg".into(), mean);
            }
        }

        let mut reasons = Vec::new();

        // Check 1: net profit vs effective threshold.
        if net_pct < effective_threshold {
            let suffix = if using_dynamic { " (dynamic)" } else { "" };
            reasons.push(format!(
                "threshold: net {net_pct:.4}% < {effective_threshold:.4}%{suffix}"
            ));
        }

        // Check 2: position size bounds.
        if input.size_usd < MIN_POSITION_USD {
            reasons.push(format!("size: ${:.2} < min ${MIN_POSITION_USD:.2}", input.size_usd));
        }
        if input.size_usd > self.config.max_position_usd {
            reasons.push(format!(
                "size: ${:.2} > max ${:.2}",
                input.size_usd, self.config.max_position_usd
            ));
        }

        // Check 3: depth-limited size.
        if let Some(depth_limited) = input.depth_limited_size_usd {
            if depth_limited < MIN_POSITION_USD {
                reasons.push(format!(
                    "depth: reduced to ${depth_limited:.2} < min ${MIN_POSITION_USD:.2}"
                ));
            }
            metrics.insert("depth_limited_size_usd".into(), depth_limited);
        }

        // Check 4: per-leg notional minimums.
        for (i, leg) in input.legs.iter().enumerate() {
            if leg.notional_usd < LEG_MIN_NOTIONAL_USD {
                reasons.push(format!(
                    "leg{}: notional ${:.2} < min ${LEG_MIN_NOTIONAL_USD:.2}",
                    i + 1,
                    leg.notional_usd
                ));
            }
        }

        // Check 5: expected maker legs.
        if let (Some(expected), Some(actual)) = (self.config.expected_maker_legs, input.actual_maker_legs) {
            if actual < expected {
                reasons.push(format!("maker_legs: {actual} < expected {expected}"));
            }
            metrics.insert("actual_maker_legs".into(), actual as f64);
        }

        // Check 6: concurrent trade limit.
        if let Some(max_concurrent) = self.config.max_concurrent_trades {
            if input.current_concurrent_trades >= max_concurrent {
                reasons.push(format!(
                    "concurrent: {} >= max {max_concurrent}",
                    input.current_concurrent_trades
                ));
            }
        }

        // Check 7: cooldown.
        if let (Some(cooldown), Some(since_last)) = (self.config.cooldown_seconds, input.seconds_since_last_trade) {
            if since_last < cooldown {
                reasons.push(format!("cooldown: {since_last:.1}s < {cooldown:.1}s"));
            }
        }

        // Check 8: exchange connectivity.
        if !input.exchange_ready {
            reasons.push("exchange: not ready".to_string());
        }

        // Check 9: quote availability.
        if !input.has_quote {
            reasons.push("quote: missing".to_string());
        }

        // Check 10: gas estimate availability.
        if !input.has_gas_estimate {
            reasons.push("gas: estimate missing".to_string());
        }

        let action = if reasons.is_empty() { Action::Execute } else { Action::Skip };
        Decision { action, reasons, metrics }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(min_profit: f64, max_position: f64) -> DecisionEngine {
        DecisionEngine::new(DecisionEngineConfig {
            min_profit_threshold_pct: min_profit,
            max_position_usd: max_position,
            ..Default::default()
        })
    }

    #[test]
    fn executes_when_all_checks_pass() {
        let mut e = engine(0.1, 10_000.0);
        let decision = e.evaluate_opportunity(OpportunityInput::new(0.5, 0.1, 0.05, 0.0, 100.0));
        assert!(decision.is_execute());
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn skips_below_threshold() {
        let mut e = engine(0.5, 10_000.0);
        let decision = e.evaluate_opportunity(OpportunityInput::new(0.3, 0.1, 0.05, 0.0, 100.0));
        assert_eq!(decision.action, Action::Skip);
        assert!(decision.reasons.iter().any(|r| r.starts_with("threshold")));
    }

    #[test]
    fn skips_dust_trade() {
        let mut e = engine(0.0, 10_000.0);
        let decision = e.evaluate_opportunity(OpportunityInput::new(5.0, 0.0, 0.0, 0.0, 5.0));
        assert!(decision.reasons.iter().any(|r| r.starts_with("size")));
    }

    #[test]
    fn skips_above_max_position() {
        let mut e = engine(0.0, 1_000.0);
        let decision = e.evaluate_opportunity(OpportunityInput::new(5.0, 0.0, 0.0, 0.0, 2_000.0));
        assert!(decision.reasons.iter().any(|r| r.contains("max")));
    }

    #[test]
    fn skips_on_missing_quote_and_gas_for_dex() {
        let mut e = engine(0.0, 10_000.0);
        let mut input = OpportunityInput::new(5.0, 0.0, 0.0, 0.0, 100.0);
        input.has_quote = false;
        input.has_gas_estimate = false;
        let decision = e.evaluate_opportunity(input);
        assert!(decision.reasons.contains(&"quote: missing".to_string()));
        assert!(decision.reasons.contains(&"gas: estimate missing".to_string()));
    }

    #[test]
    fn dynamic_threshold_kicks_in_once_window_is_ready() {
        let mut e = DecisionEngine::new(DecisionEngineConfig {
            min_profit_threshold_pct: 0.0,
            max_position_usd: 10_000.0,
            volatility_window_size: Some(3),
            sigma_multiplier: Some(1.0),
            ..Default::default()
        });

        // Feed 3 observations to make the window ready; keep net_pct well
        // above 0 so these don't themselves get skipped on threshold.
        for gross in [1.0, 1.0, 1.0] {
            let decision = e.evaluate_opportunity(OpportunityInput::new(gross, 0.0, 0.0, 0.0, 100.0));
            assert!(decision.is_execute());
        }

        let decision = e.evaluate_opportunity(OpportunityInput::new(1.0, 0.0, 0.0, 0.0, 100.0));
        assert_eq!(decision.metrics.get("using_dynamic_threshold"), Some(&1.0));
    }

    #[test]
    fn per_leg_notional_floor_enforced() {
        let mut e = engine(0.0, 10_000.0);
        let mut input = OpportunityInput::new(5.0, 0.0, 0.0, 0.0, 100.0);
        input.legs = vec![LegNotional { notional_usd: 50.0 }, LegNotional { notional_usd: 1.0 }];
        let decision = e.evaluate_opportunity(input);
        assert!(decision.reasons.iter().any(|r| r.starts_with("leg2")));
    }

    #[test]
    fn cooldown_and_concurrency_checks() {
        let mut e = DecisionEngine::new(DecisionEngineConfig {
            min_profit_threshold_pct: 0.0,
            max_position_usd: 10_000.0,
            max_concurrent_trades: Some(2),
            cooldown_seconds: Some(30.0),
            ..Default::default()
        });
        let mut input = OpportunityInput::new(5.0, 0.0, 0.0, 0.0, 100.0);
        input.current_concurrent_trades = 2;
        input.seconds_since_last_trade = Some(5.0);
        let decision = e.evaluate_opportunity(input);
        assert!(decision.reasons.iter().any(|r| r.starts_with("concurrent")));
        assert!(decision.reasons.iter().any(|r| r.starts_with("cooldown")));
    }
}
