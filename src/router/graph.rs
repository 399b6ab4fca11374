//! Directed multigraph of currencies built from active venue markets
//! (spec §4.8), rebuilt on demand with a short TTL.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use petgraph::graph::{DiGraph, NodeIndex};

use crate::model::{Currency, Market, Side};

#[derive(Debug, Clone)]
pub struct RouteEdge {
    pub symbol: String,
    pub side: Side,
    pub taker_fee: f64,
}

pub struct CurrencyGraph {
    graph: DiGraph<Currency, RouteEdge>,
    index: HashMap<Currency, NodeIndex>,
    built_at: Instant,
}

impl CurrencyGraph {
    /// `Q -> B` (buy side) and `B -> Q` (sell side) for every market
    /// `B/Q`, excluding blacklisted symbols.
    pub fn build(markets: &HashMap<String, Market>, blacklist: &HashSet<String>) -> Self {
        let mut graph = DiGraph::new();
        let mut index: HashMap<Currency, NodeIndex> = HashMap::new();

        let mut node_for = |graph: &mut DiGraph<Currency, RouteEdge>, index: &mut HashMap<Currency, NodeIndex>, c: &Currency| -> NodeIndex {
            *index.entry(c.clone()).or_insert_with(|| graph.add_node(c.clone()))
        };

        for market in markets.values() {
            let symbol = market.symbol();
            if blacklist.contains(&symbol) {
                continue;
            }
            let base_idx = node_for(&mut graph, &mut index, &market.base);
            let quote_idx = node_for(&mut graph, &mut index, &market.quote);

            graph.add_edge(
                quote_idx,
                base_idx,
                RouteEdge {
                    symbol: symbol.clone(),
                    side: Side::Buy,
                    taker_fee: market.taker_fee,
                },
            );
            graph.add_edge(
                base_idx,
                quote_idx,
                RouteEdge {
                    symbol,
                    side: Side::Sell,
                    taker_fee: market.taker_fee,
                },
            );
        }

        Self { graph, index, built_at: Instant::now() }
    }

    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.built_at.elapsed() >= ttl
    }

    pub fn node_index(&self, currency: &Currency) -> Option<NodeIndex> {
        self.index.get(currency).copied()
    }

    pub fn graph(&self) -> &DiGraph<Currency, RouteEdge> {
        &self.graph
    }

    pub fn contains(&self, currency: &Currency) -> bool {
        self.index.contains_key(currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(base: &str, quote: &str) -> Market {
        Market {
            base: Currency::new(base).unwrap(),
            quote: Currency::new(quote).unwrap(),
            min_amount: 0.0,
            min_notional: 0.0,
            taker_fee: 0.001,
            maker_fee: 0.0008,
            price_precision: 8,
            amount_precision: 8,
        }
    }

    #[test]
    fn build_adds_both_directions_per_market() {
        let mut markets = HashMap::new();
        markets.insert("BTC/USDT".to_string(), market("BTC", "USDT"));
        let graph = CurrencyGraph::build(&markets, &HashSet::new());

        assert_eq!(graph.graph().edge_count(), 2);
        assert!(graph.contains(&Currency::new("BTC").unwrap()));
        assert!(graph.contains(&Currency::new("USDT").unwrap()));
    }

    #[test]
    fn blacklisted_symbols_are_excluded() {
        let mut markets = HashMap::new();
        markets.insert("BTC/USDT".to_string(), market("BTC", "USDT"));
        let mut blacklist = HashSet::new();
        blacklist.insert("BTC/USDT".to_string());
        let graph = CurrencyGraph::build(&markets, &blacklist);
        assert_eq!(graph.graph().edge_count(), 0);
    }
}
