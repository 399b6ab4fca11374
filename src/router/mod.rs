//! Recovery router: converts a stranded currency balance into a stable
//! target through the cheapest safe path the live market graph admits
//! (spec §4.8).

pub mod execute;
pub mod graph;
pub mod pathfind;
pub mod scoring;

pub use execute::{MarketCondition, Router, RouterConfig, RouterResult, RouterStep};
pub use graph::{CurrencyGraph, RouteEdge};
pub use pathfind::{k_shortest_simple_paths, GraphPath};
pub use scoring::ScoringWeights;
