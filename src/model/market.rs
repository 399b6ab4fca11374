use serde::{Deserialize, Serialize};

use super::currency::Currency;

/// An ordered trading pair `base/quote`, e.g. `BTC/USDT`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub base: Currency,
    pub quote: Currency,
    /// Minimum order amount, in base-currency units.
    pub min_amount: f64,
    /// Minimum order notional, in quote-currency units.
    pub min_notional: f64,
    pub taker_fee: f64,
    pub maker_fee: f64,
    pub price_precision: u32,
    pub amount_precision: u32,
}

impl Market {
    pub fn symbol(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }

    /// Whether an order of `amount` (base units) at `price` clears both
    /// venue minimums.
    pub fn meets_minimums(&self, amount: f64, price: f64) -> bool {
        amount >= self.min_amount && amount * price >= self.min_notional
    }
}

/// Which side of a market a leg trades, resolved from the direction the
/// cycle needs (`source -> target`) against the two possible venue symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

/// Resolve the side and market symbol needed to trade `source -> target`
/// given the set of markets known to the venue.
///
/// If `target/source` exists, we buy `target` on that market. Otherwise, if
/// `source/target` exists, we sell `source` on that market. If neither
/// exists, the leg cannot be executed.
pub fn resolve_direction(
    markets: &std::collections::HashMap<String, Market>,
    source: &Currency,
    target: &Currency,
) -> Option<(String, Side)> {
    let target_source = format!("{target}/{source}");
    if markets.contains_key(&target_source) {
        return Some((target_source, Side::Buy));
    }
    let source_target = format!("{source}/{target}");
    if markets.contains_key(&source_target) {
        return Some((source_target, Side::Sell));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn mkt(base: &str, quote: &str) -> Market {
        Market {
            base: Currency::new(base).unwrap(),
            quote: Currency::new(quote).unwrap(),
            min_amount: 0.0,
            min_notional: 0.0,
            taker_fee: 0.001,
            maker_fee: 0.0008,
            price_precision: 2,
            amount_precision: 6,
        }
    }

    #[test]
    fn resolves_buy_direction() {
        let mut markets = HashMap::new();
        markets.insert("ETH/BTC".to_string(), mkt("ETH", "BTC"));
        let (symbol, side) = resolve_direction(
            &markets,
            &Currency::new("BTC").unwrap(),
            &Currency::new("ETH").unwrap(),
        )
        .unwrap();
        assert_eq!(symbol, "ETH/BTC");
        assert_eq!(side, Side::Buy);
    }

    #[test]
    fn resolves_sell_direction() {
        let mut markets = HashMap::new();
        markets.insert("BTC/ETH".to_string(), mkt("BTC", "ETH"));
        let (symbol, side) = resolve_direction(
            &markets,
            &Currency::new("BTC").unwrap(),
            &Currency::new("ETH").unwrap(),
        )
        .unwrap();
        assert_eq!(symbol, "BTC/ETH");
        assert_eq!(side, Side::Sell);
    }

    #[test]
    fn missing_direction_is_none() {
        let markets = HashMap::new();
        assert!(resolve_direction(
            &markets,
            &Currency::new("BTC").unwrap(),
            &Currency::new("ETH").unwrap()
        )
        .is_none());
    }
}
