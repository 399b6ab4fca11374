//! K shortest simple paths over the currency graph via Yen's algorithm
//! composed from a hand-rolled Dijkstra (petgraph has no built-in
//! k-shortest-paths primitive) — spec §4.8.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

use super::graph::RouteEdge;
use crate::model::Currency;

#[derive(Debug, Clone)]
pub struct GraphPath {
    pub nodes: Vec<NodeIndex>,
    pub edges: Vec<EdgeIndex>,
    pub cost: f64,
}

impl GraphPath {
    pub fn hops(&self) -> usize {
        self.edges.len()
    }
}

#[derive(PartialEq)]
struct HeapEntry {
    cost: f64,
    node: NodeIndex,
}

impl Eq for HeapEntry {}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.cost.partial_cmp(&self.cost).unwrap_or(Ordering::Equal)
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn dijkstra_with_exclusion(
    graph: &DiGraph<Currency, RouteEdge>,
    start: NodeIndex,
    target: NodeIndex,
    excluded_nodes: &HashSet<NodeIndex>,
    excluded_edges: &HashSet<EdgeIndex>,
) -> Option<GraphPath> {
    let mut dist: HashMap<NodeIndex, f64> = HashMap::new();
    let mut prev: HashMap<NodeIndex, (NodeIndex, EdgeIndex)> = HashMap::new();
    let mut heap = BinaryHeap::new();

    dist.insert(start, 0.0);
    heap.push(HeapEntry { cost: 0.0, node: start });

    while let Some(HeapEntry { cost, node }) = heap.pop() {
        if node == target {
            break;
        }
        if cost > *dist.get(&node).unwrap_or(&f64::INFINITY) {
            continue;
        }
        for edge_ref in graph.edges_directed(node, Direction::Outgoing) {
            let edge_id = edge_ref.id();
            let next = edge_ref.target();
            if excluded_edges.contains(&edge_id) || excluded_nodes.contains(&next) {
                continue;
            }
            let weight = edge_ref.weight();
            let next_cost = cost + weight.taker_fee + 1e-6;
            if next_cost < *dist.get(&next).unwrap_or(&f64::INFINITY) {
                dist.insert(next, next_cost);
                prev.insert(next, (node, edge_id));
                heap.push(HeapEntry { cost: next_cost, node: next });
            }
        }
    }

    if !dist.contains_key(&target) {
        return None;
    }

    let mut nodes = vec![target];
    let mut edges = Vec::new();
    let mut cur = target;
    while cur != start {
        let (p, e) = prev.get(&cur)?;
        edges.push(*e);
        cur = *p;
        nodes.push(cur);
    }
    nodes.reverse();
    edges.reverse();

    Some(GraphPath { nodes, edges, cost: dist[&target] })
}

/// Yen's algorithm: the first path is the global shortest; each
/// subsequent path is the shortest deviation from a previously accepted
/// path at some spur node, with that spur's previously-used edge removed.
pub fn k_shortest_simple_paths(graph: &DiGraph<Currency, RouteEdge>, start: NodeIndex, target: NodeIndex, k: usize, max_hops: usize) -> Vec<GraphPath> {
    let mut accepted: Vec<GraphPath> = Vec::new();
    let Some(first) = dijkstra_with_exclusion(graph, start, target, &HashSet::new(), &HashSet::new()) else {
        return accepted;
    };
    if first.hops() <= max_hops {
        accepted.push(first);
    } else {
        return accepted;
    }

    let mut candidates: Vec<GraphPath> = Vec::new();

    while accepted.len() < k {
        let last = accepted.last().unwrap().clone();
        for i in 0..last.nodes.len().saturating_sub(1) {
            let spur_node = last.nodes[i];
            let root_nodes: HashSet<NodeIndex> = last.nodes[..i].iter().copied().collect();

            let mut excluded_edges = HashSet::new();
            for path in accepted.iter().chain(candidates.iter()) {
                if path.nodes.len() > i && path.nodes[..=i] == last.nodes[..=i] {
                    if let Some(edge) = path.edges.get(i) {
                        excluded_edges.insert(*edge);
                    }
                }
            }

            if let Some(spur_path) = dijkstra_with_exclusion(graph, spur_node, target, &root_nodes, &excluded_edges) {
                let mut nodes = last.nodes[..i].to_vec();
                nodes.extend(spur_path.nodes);
                let mut edges = last.edges[..i].to_vec();
                edges.extend(spur_path.edges);
                let root_cost: f64 = last.edges[..i].len() as f64 * 1e-6;
                let cost = root_cost + spur_path.cost;

                let total = GraphPath { nodes, edges, cost };
                if total.hops() <= max_hops && !accepted.iter().any(|p| p.edges == total.edges) && !candidates.iter().any(|p| p.edges == total.edges) {
                    candidates.push(total);
                }
            }
        }

        candidates.sort_by(|a, b| a.cost.partial_cmp(&b.cost).unwrap_or(Ordering::Equal));
        if candidates.is_empty() {
            break;
        }
        accepted.push(candidates.remove(0));
    }

    accepted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cur(s: &str) -> Currency {
        Currency::new(s).unwrap()
    }

    fn build_diamond() -> (DiGraph<Currency, RouteEdge>, NodeIndex, NodeIndex) {
        let mut graph = DiGraph::new();
        let a = graph.add_node(cur("A"));
        let b = graph.add_node(cur("B"));
        let c = graph.add_node(cur("C"));
        let d = graph.add_node(cur("D"));
        graph.add_edge(a, b, RouteEdge { symbol: "B/A".into(), side: crate::model::Side::Buy, taker_fee: 0.001 });
        graph.add_edge(b, d, RouteEdge { symbol: "D/B".into(), side: crate::model::Side::Buy, taker_fee: 0.001 });
        graph.add_edge(a, c, RouteEdge { symbol: "C/A".into(), side: crate::model::Side::Buy, taker_fee: 0.002 });
        graph.add_edge(c, d, RouteEdge { symbol: "D/C".into(), side: crate::model::Side::Buy, taker_fee: 0.002 });
        (graph, a, d)
    }

    #[test]
    fn finds_cheapest_path_first() {
        let (graph, a, d) = build_diamond();
        let paths = k_shortest_simple_paths(&graph, a, d, 1, 5);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].hops(), 2);
    }

    #[test]
    fn finds_multiple_distinct_simple_paths() {
        let (graph, a, d) = build_diamond();
        let paths = k_shortest_simple_paths(&graph, a, d, 2, 5);
        assert_eq!(paths.len(), 2);
        assert_ne!(paths[0].edges, paths[1].edges);
    }

    #[test]
    fn respects_max_hops_bound() {
        let (graph, a, d) = build_diamond();
        let paths = k_shortest_simple_paths(&graph, a, d, 4, 1);
        assert!(paths.is_empty());
    }

    #[test]
    fn returns_empty_when_no_path_exists() {
        let mut graph: DiGraph<Currency, RouteEdge> = DiGraph::new();
        let a = graph.add_node(cur("A"));
        let z = graph.add_node(cur("Z"));
        let paths = k_shortest_simple_paths(&graph, a, z, 3, 5);
        assert!(paths.is_empty());
    }
}
