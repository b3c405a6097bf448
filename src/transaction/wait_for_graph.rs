use std::collections::{BTreeMap, BTreeSet};

use crate::common::types::TxnId;

/// The deadlock detector's wait-for graph: an edge u -> v means transaction
/// u waits on a lock transaction v holds. Ordered maps keep the DFS
/// deterministic across detection passes.
#[derive(Debug, Default)]
pub(crate) struct WaitForGraph {
    edges: BTreeMap<TxnId, BTreeSet<TxnId>>,
}

impl WaitForGraph {
    pub(crate) fn new() -> Self {
        Self {
            edges: BTreeMap::new(),
        }
    }

    pub(crate) fn add_edge(&mut self, from: TxnId, to: TxnId) {
        if from != to {
            self.edges.entry(from).or_default().insert(to);
        }
    }

    pub(crate) fn remove_transaction(&mut self, txn_id: TxnId) {
        self.edges.remove(&txn_id);
        for targets in self.edges.values_mut() {
            targets.remove(&txn_id);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Find a cycle, if any, starting the search from the lowest txn id.
    /// Returns the transactions on the cycle.
    pub(crate) fn find_cycle(&self) -> Option<Vec<TxnId>> {
        let mut visited: BTreeSet<TxnId> = BTreeSet::new();

        for &start in self.edges.keys() {
            if visited.contains(&start) {
                continue;
            }
            let mut path: Vec<TxnId> = Vec::new();
            if let Some(cycle) = self.dfs(start, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn dfs(
        &self,
        node: TxnId,
        visited: &mut BTreeSet<TxnId>,
        path: &mut Vec<TxnId>,
    ) -> Option<Vec<TxnId>> {
        if let Some(position) = path.iter().position(|&n| n == node) {
            return Some(path[position..].to_vec());
        }
        if visited.contains(&node) {
            return None;
        }
        visited.insert(node);
        path.push(node);

        if let Some(targets) = self.edges.get(&node) {
            for &next in targets {
                if let Some(cycle) = self.dfs(next, visited, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_cycle() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        graph.add_edge(1, 3);
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn test_two_cycle() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 1);
        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle.len(), 2);
        assert!(cycle.contains(&1) && cycle.contains(&2));
    }

    #[test]
    fn test_removing_victim_breaks_cycle() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(1, 2);
        graph.add_edge(2, 3);
        graph.add_edge(3, 1);
        assert!(graph.find_cycle().is_some());
        graph.remove_transaction(3);
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn test_self_edges_are_ignored() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(5, 5);
        assert!(graph.find_cycle().is_none());
        assert!(graph.is_empty());
    }
}
