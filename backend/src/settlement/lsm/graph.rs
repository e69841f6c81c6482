//! Aggregated payment graph over Queue-2
//!
//! Vertices are agents with queued obligations, indexed in lexicographic
//! order; an edge `s -> r` aggregates every unsettled Queue-2 transaction
//! from `s` to `r` (total amount plus transaction ids in queue order).
//! All maps are `BTreeMap` so iteration, and therefore every cycle
//! enumeration, is deterministic.

use crate::models::state::SimulationState;
use std::collections::{BTreeMap, BTreeSet};

/// Aggregated flow from one agent to another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Edge {
    pub total: i64,
    pub tx_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AggregatedGraph {
    agent_to_index: BTreeMap<String, usize>,
    index_to_agent: Vec<String>,
    /// sender_idx -> receiver_idx -> edge
    adj: BTreeMap<usize, BTreeMap<usize, Edge>>,
}

impl AggregatedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot Queue-2, skipping ids in `exclude`
    pub fn from_queue(state: &SimulationState, exclude: &BTreeSet<String>) -> Self {
        let mut graph = Self::new();
        let live: Vec<_> = state
            .rtgs_queue()
            .iter()
            .filter(|id| !exclude.contains(*id))
            .filter_map(|id| state.transaction(id))
            .filter(|tx| !tx.is_settled())
            .collect();

        let agents: BTreeSet<&str> = live
            .iter()
            .flat_map(|tx| [tx.sender_id(), tx.receiver_id()])
            .collect();
        for (idx, agent_id) in agents.into_iter().enumerate() {
            graph.agent_to_index.insert(agent_id.to_string(), idx);
            graph.index_to_agent.push(agent_id.to_string());
        }

        for tx in live {
            let s = graph.agent_to_index[tx.sender_id()];
            let r = graph.agent_to_index[tx.receiver_id()];
            let edge = graph.adj.entry(s).or_default().entry(r).or_default();
            edge.total = edge.total.saturating_add(tx.remaining_amount());
            edge.tx_ids.push(tx.id().to_string());
        }
        graph
    }

    pub fn vertex_count(&self) -> usize {
        self.index_to_agent.len()
    }

    pub fn edge_count(&self) -> usize {
        self.adj.values().map(BTreeMap::len).sum()
    }

    pub fn agent(&self, idx: usize) -> Option<&str> {
        self.index_to_agent.get(idx).map(String::as_str)
    }

    pub fn index_of(&self, agent_id: &str) -> Option<usize> {
        self.agent_to_index.get(agent_id).copied()
    }

    pub fn edge_by_index(&self, from: usize, to: usize) -> Option<&Edge> {
        self.adj.get(&from).and_then(|n| n.get(&to))
    }

    pub fn edge(&self, from: &str, to: &str) -> Option<&Edge> {
        self.edge_by_index(self.index_of(from)?, self.index_of(to)?)
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edge(from, to).is_some()
    }

    /// Outgoing neighbours in index order
    pub fn out_neighbors(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        self.adj
            .get(&idx)
            .into_iter()
            .flat_map(|n| n.keys().copied())
    }

    /// Unordered pairs `(a, b)`, `a < b`, with flows in both directions
    pub fn bilateral_pairs(&self) -> Vec<(usize, usize)> {
        let mut pairs = Vec::new();
        for (&a, neighbors) in &self.adj {
            for &b in neighbors.keys() {
                if a < b && self.edge_by_index(b, a).is_some() {
                    pairs.push((a, b));
                }
            }
        }
        pairs
    }

    /// Simple cycles of length `3..=max_len`, at most `limit` of them.
    ///
    /// Each cycle is reported once, rotated so that its smallest vertex
    /// comes first. Enumeration order is lexicographic in vertex index.
    pub fn find_cycles(&self, max_len: usize, limit: usize) -> Vec<Vec<usize>> {
        let mut cycles = Vec::new();
        if max_len < 3 || limit == 0 {
            return cycles;
        }
        for start in 0..self.vertex_count() {
            let mut path = vec![start];
            self.extend_path(start, &mut path, max_len, limit, &mut cycles);
            if cycles.len() >= limit {
                break;
            }
        }
        cycles
    }

    fn extend_path(
        &self,
        start: usize,
        path: &mut Vec<usize>,
        max_len: usize,
        limit: usize,
        cycles: &mut Vec<Vec<usize>>,
    ) {
        let Some(&current) = path.last() else {
            return;
        };
        for next in self.out_neighbors(current) {
            if cycles.len() >= limit {
                return;
            }
            if next == start {
                if path.len() >= 3 {
                    cycles.push(path.clone());
                }
                continue;
            }
            // Only vertices above the start, so each cycle has one rotation
            if next < start || path.contains(&next) || path.len() >= max_len {
                continue;
            }
            path.push(next);
            self.extend_path(start, path, max_len, limit, cycles);
            path.pop();
        }
    }
}
