//! Recovery router execution (spec §4.8): converts a stranded currency
//! balance into one of a configured set of stable targets, trying the
//! highest-scoring path first and falling back on leg failure.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::coordinator::OrderCoordinator;
use crate::model::{Currency, Market, OrderState, OrderType};
use crate::venues::Venue;

use super::graph::CurrencyGraph;
use super::pathfind::{k_shortest_simple_paths, GraphPath};
use super::scoring::{self, ScoringWeights};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketCondition {
    Normal,
    Volatile,
    Extreme,
}

impl MarketCondition {
    /// Both VOLATILE and EXTREME relax the single-leg cap by 50% for the
    /// attempt, letting panic-sell clear a position at a worse price
    /// rather than get stuck refusing every path.
    fn cap_relaxation(self) -> f64 {
        match self {
            MarketCondition::Normal => 1.0,
            MarketCondition::Volatile | MarketCondition::Extreme => 1.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub targets: Vec<Currency>,
    pub preferred_intermediaries: Vec<Currency>,
    pub max_hops: usize,
    pub k_paths: usize,
    pub single_leg_slippage_cap_bps: f64,
    pub multi_leg_slippage_cap_bps: f64,
    pub weights: ScoringWeights,
    pub max_attempts: usize,
    pub partial_fill_threshold: f64,
    pub impact_coef: f64,
    pub graph_ttl: Duration,
    pub blacklist_duration: Duration,
}

#[derive(Debug, Clone)]
pub struct RouterStep {
    pub symbol: String,
    pub side: crate::model::Side,
    pub in_amount: f64,
    pub out_amount: f64,
    pub slippage_bps: f64,
    pub success: bool,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RouterResult {
    pub success: bool,
    pub final_amount: f64,
    pub final_currency: Currency,
    pub steps: Vec<RouterStep>,
}

pub struct Router {
    config: RouterConfig,
    graph: Mutex<Option<CurrencyGraph>>,
    blacklist: Mutex<HashMap<String, Instant>>,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            graph: Mutex::new(None),
            blacklist: Mutex::new(HashMap::new()),
        }
    }

    async fn active_blacklist(&self) -> HashSet<String> {
        let now = Instant::now();
        let mut map = self.blacklist.lock().await;
        map.retain(|_, until| *until > now);
        map.keys().cloned().collect()
    }

    async fn blacklist_symbol(&self, symbol: &str) {
        let until = Instant::now() + self.config.blacklist_duration;
        self.blacklist.lock().await.insert(symbol.to_string(), until);
    }

    async fn ensure_graph(&self, markets: &HashMap<String, Market>) {
        let mut guard = self.graph.lock().await;
        let stale = guard.as_ref().map(|g| g.is_stale(self.config.graph_ttl)).unwrap_or(true);
        if stale {
            let blacklist = self.active_blacklist().await;
            *guard = Some(CurrencyGraph::build(markets, &blacklist));
        }
    }

    /// Candidate paths to every target, plus explicit paths through each
    /// preferred intermediary (spec §4.8 step 2).
    async fn candidate_paths(&self, from: &Currency) -> Vec<GraphPath> {
        let guard = self.graph.lock().await;
        let Some(graph) = guard.as_ref() else { return Vec::new() };
        let Some(from_idx) = graph.node_index(from) else { return Vec::new() };

        let mut all = Vec::new();
        for target in &self.config.targets {
            if target == from {
                continue;
            }
            let Some(target_idx) = graph.node_index(target) else { continue };
            all.extend(k_shortest_simple_paths(graph.graph(), from_idx, target_idx, self.config.k_paths, self.config.max_hops));
        }

        for intermediary in &self.config.preferred_intermediaries {
            if intermediary == from {
                continue;
            }
            let Some(mid_idx) = graph.node_index(intermediary) else { continue };
            let first_leg = k_shortest_simple_paths(graph.graph(), from_idx, mid_idx, 1, self.config.max_hops);
            let Some(first_leg) = first_leg.into_iter().next() else { continue };

            for target in &self.config.targets {
                if target == intermediary || target == from {
                    continue;
                }
                let Some(target_idx) = graph.node_index(target) else { continue };
                let second_leg = k_shortest_simple_paths(graph.graph(), mid_idx, target_idx, 1, self.config.max_hops);
                if let Some(second_leg) = second_leg.into_iter().next() {
                    let total_hops = first_leg.hops() + second_leg.hops();
                    if total_hops > self.config.max_hops {
                        continue;
                    }
                    let mut nodes = first_leg.nodes.clone();
                    nodes.extend(second_leg.nodes.iter().skip(1));
                    let mut edges = first_leg.edges.clone();
                    edges.extend(second_leg.edges.clone());
                    all.push(GraphPath {
                        nodes,
                        edges,
                        cost: first_leg.cost + second_leg.cost,
                    });
                }
            }
        }
        all
    }

    /// Converts `amount` of `from` into one of the configured stable
    /// targets. Tries up to `max_attempts` distinct paths, replanning from
    /// whatever currency execution is left holding after a failed leg.
    pub async fn convert(
        &self,
        venue: &Mutex<Box<dyn Venue>>,
        coordinator: &OrderCoordinator,
        markets: &HashMap<String, Market>,
        from: Currency,
        amount: f64,
        condition: MarketCondition,
    ) -> RouterResult {
        if self.config.targets.contains(&from) {
            return RouterResult {
                success: true,
                final_amount: amount,
                final_currency: from,
                steps: Vec::new(),
            };
        }

        self.ensure_graph(markets).await;

        let mut current_currency = from;
        let mut current_amount = amount;
        let mut steps = Vec::new();
        let mut tried_edge_sets: Vec<Vec<petgraph::graph::EdgeIndex>> = Vec::new();
        let single_leg_cap = self.config.single_leg_slippage_cap_bps * condition.cap_relaxation();

        for attempt in 0..self.config.max_attempts {
            if self.config.targets.contains(&current_currency) {
                return RouterResult {
                    success: true,
                    final_amount: current_amount,
                    final_currency: current_currency,
                    steps,
                };
            }

            let candidates = self.candidate_paths(&current_currency).await;
            let guard = self.graph.lock().await;
            let Some(graph) = guard.as_ref() else { break };

            let mut scored: Vec<(f64, GraphPath)> = candidates
                .into_iter()
                .filter(|p| !tried_edge_sets.contains(&p.edges))
                .map(|p| {
                    let s = scoring::score(self.config.weights, p.hops(), self.config.max_hops, 0.0, self.config.multi_leg_slippage_cap_bps);
                    (s, p)
                })
                .collect();
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

            let Some((_, path)) = scored.into_iter().next() else {
                drop(guard);
                break;
            };
            tried_edge_sets.push(path.edges.clone());

            let leg_currencies: Vec<Currency> = path.nodes.iter().map(|idx| graph.graph()[*idx].clone()).collect();
            let leg_edges: Vec<_> = path.edges.iter().map(|idx| graph.graph()[*idx].clone()).collect();
            drop(guard);

            info!(attempt, hops = leg_edges.len(), from = %current_currency, "router attempting path");

            let mut path_failed = false;
            for (i, edge) in leg_edges.iter().enumerate() {
                let market = markets.get(&edge.symbol);
                let Some(market) = market else {
                    steps.push(failed_step(&edge.symbol, edge.side, current_amount, "market not found"));
                    path_failed = true;
                    break;
                };

                let ticker = match venue.lock().await.fetch_ticker(&edge.symbol).await {
                    Ok(t) => t,
                    Err(err) => {
                        steps.push(failed_step(&edge.symbol, edge.side, current_amount, &err.to_string()));
                        self.blacklist_symbol(&edge.symbol).await;
                        path_failed = true;
                        break;
                    }
                };

                let notional_usd = current_amount * ticker.last;
                let estimated_slippage = scoring::estimate_leg_slippage_bps(notional_usd, ticker.volume, ticker.last, self.config.impact_coef);
                if estimated_slippage > single_leg_cap {
                    steps.push(failed_step(&edge.symbol, edge.side, current_amount, "single-leg slippage cap exceeded"));
                    path_failed = true;
                    break;
                }

                let order_amount = match edge.side {
                    crate::model::Side::Buy => current_amount / ticker.ask,
                    crate::model::Side::Sell => current_amount,
                };
                if !market.meets_minimums(order_amount, ticker.ask.max(ticker.bid)) {
                    steps.push(failed_step(&edge.symbol, edge.side, current_amount, "below venue minimum"));
                    path_failed = true;
                    break;
                }

                let placed = coordinator
                    .place_order(venue, &edge.symbol, edge.side, order_amount, OrderType::Market, None)
                    .await;
                if placed.state == OrderState::Failed {
                    steps.push(failed_step(&edge.symbol, edge.side, current_amount, placed.error_message.as_deref().unwrap_or("placement failed")));
                    self.blacklist_symbol(&edge.symbol).await;
                    path_failed = true;
                    break;
                }

                let filled = coordinator.monitor_order(venue, &placed, Duration::from_secs(30)).await;
                let success = filled.filled_amount >= self.config.partial_fill_threshold * filled.requested_amount;
                let out_amount = match edge.side {
                    crate::model::Side::Buy => filled.filled_amount,
                    crate::model::Side::Sell => filled.filled_amount * filled.average_fill_price.unwrap_or(ticker.bid),
                };

                steps.push(RouterStep {
                    symbol: edge.symbol.clone(),
                    side: edge.side,
                    in_amount: current_amount,
                    out_amount,
                    slippage_bps: estimated_slippage,
                    success,
                    error_message: if success { None } else { Some("insufficient fill".to_string()) },
                    timestamp: Utc::now(),
                });

                if !success {
                    warn!(symbol = %edge.symbol, "router leg insufficient fill, aborting path");
                    self.blacklist_symbol(&edge.symbol).await;
                    path_failed = true;
                    break;
                }

                current_amount = out_amount;
                current_currency = leg_currencies[i + 1].clone();
            }

            if !path_failed && self.config.targets.contains(&current_currency) {
                return RouterResult {
                    success: true,
                    final_amount: current_amount,
                    final_currency: current_currency,
                    steps,
                };
            }
        }

        RouterResult {
            success: self.config.targets.contains(&current_currency),
            final_amount: current_amount,
            final_currency: current_currency,
            steps,
        }
    }
}

fn failed_step(symbol: &str, side: crate::model::Side, in_amount: f64, error: &str) -> RouterStep {
    RouterStep {
        symbol: symbol.to_string(),
        side,
        in_amount,
        out_amount: 0.0,
        slippage_bps: 0.0,
        success: false,
        error_message: Some(error.to_string()),
        timestamp: Utc::now(),
    }
}
