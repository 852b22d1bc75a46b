//! Snapshot and restore of the mutable part of a graph.

use crate::{GraphKind, ProgressionGraph};
use prog_core::{NodeId, RestoreError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Saved progress of one node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    pub id: NodeId,
    /// Banked points, never above the node's cost.
    pub progress: u32,
    pub activated: bool,
}

/// Saved state of a whole graph. Nodes missing from `nodes` restore as fresh.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphState {
    /// Must match the graph restored into.
    pub kind: GraphKind,
    /// Nodes with progress or activation, in id order.
    pub nodes: Vec<NodeState>,
    /// Activated ids, prerequisites before dependents.
    pub activation_order: Vec<NodeId>,
    /// Must be unlockable in the restored graph.
    pub current_target: Option<NodeId>,
}

impl<P> ProgressionGraph<P> {
    /// Capture progress, activation order and target. Only nodes that moved
    /// are recorded.
    pub fn state(&self) -> GraphState {
        GraphState {
            kind: self.kind,
            nodes: self
                .nodes
                .values()
                .filter(|n| n.progress > 0 || n.activated)
                .map(|n| NodeState {
                    id: n.id,
                    progress: n.progress,
                    activated: n.activated,
                })
                .collect(),
            activation_order: self.activated.clone(),
            current_target: self.current_target,
        }
    }

    /// Replace all mutable state with `state`.
    ///
    /// The saved state is checked against the graph's static structure first;
    /// on error nothing changes. No events are emitted.
    pub fn restore(&mut self, state: &GraphState) -> Result<(), RestoreError> {
        if state.kind != self.kind {
            return Err(RestoreError::WrongKind {
                expected: self.kind.to_string(),
                found: state.kind.to_string(),
            });
        }
        let mut staged: BTreeMap<NodeId, (u32, bool)> = BTreeMap::new();
        for s in &state.nodes {
            let node = self
                .nodes
                .get(&s.id)
                .ok_or(RestoreError::UnknownNode(s.id))?;
            if s.progress > node.cost {
                return Err(RestoreError::Inconsistent(format!(
                    "node {} progress {} exceeds cost {}",
                    s.id, s.progress, node.cost
                )));
            }
            if s.activated && s.progress < node.cost {
                return Err(RestoreError::Inconsistent(format!(
                    "node {} activated below cost",
                    s.id
                )));
            }
            if staged.insert(s.id, (s.progress, s.activated)).is_some() {
                return Err(RestoreError::Inconsistent(format!(
                    "node {} saved twice",
                    s.id
                )));
            }
        }

        let activated: BTreeSet<NodeId> = staged
            .iter()
            .filter(|(_, (_, a))| *a)
            .map(|(id, _)| *id)
            .collect();
        let mut seen: BTreeSet<NodeId> = BTreeSet::new();
        for id in &state.activation_order {
            let node = self.nodes.get(id).ok_or(RestoreError::UnknownNode(*id))?;
            if !activated.contains(id) || !seen.insert(*id) {
                return Err(RestoreError::Inconsistent(format!(
                    "activation order entry {id} does not match node flags"
                )));
            }
            if let Some(p) = node.prerequisites.iter().find(|p| !seen.contains(*p)) {
                return Err(RestoreError::Inconsistent(format!(
                    "node {id} activated before prerequisite {p}"
                )));
            }
        }
        if seen.len() != activated.len() {
            return Err(RestoreError::Inconsistent(
                "activation order is missing activated nodes".to_string(),
            ));
        }
        if let Some(t) = state.current_target {
            let node = self.nodes.get(&t).ok_or(RestoreError::UnknownNode(t))?;
            let unlockable =
                !activated.contains(&t) && node.prerequisites.iter().all(|p| activated.contains(p));
            if !unlockable {
                return Err(RestoreError::Inconsistent(format!(
                    "target {t} is not unlockable"
                )));
            }
        }

        for node in self.nodes.values_mut() {
            let (progress, activated) = staged.get(&node.id).copied().unwrap_or((0, false));
            node.progress = progress;
            node.activated = activated;
        }
        self.activated = state.activation_order.clone();
        self.current_target = state.current_target;
        debug!(kind = %self.kind, activated = self.activated.len(), "graph restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prog_core::{Era, NodeDef};
    use rust_decimal::Decimal;

    fn tree() -> ProgressionGraph<()> {
        let defs: Vec<NodeDef<()>> = [(1, 10, vec![]), (2, 10, vec![1]), (3, 20, vec![2])]
            .into_iter()
            .map(|(id, cost, pre): (u32, u32, Vec<u32>)| NodeDef {
                id: NodeId(id),
                name: format!("N{id}"),
                cost,
                prerequisites: pre.into_iter().map(NodeId).collect(),
                effect: String::new(),
                era: Era::Ancient,
                payload: (),
            })
            .collect();
        ProgressionGraph::new(GraphKind::Civic, defs).unwrap()
    }

    #[test]
    fn state_restores_into_a_fresh_graph() {
        let mut g = tree();
        g.set_current_target(NodeId(1));
        g.add_progress(10);
        g.add_boost(NodeId(3), Decimal::new(5, 1));
        g.set_current_target(NodeId(2));
        g.add_progress(4);
        let saved = g.state();

        let mut fresh = tree();
        fresh.restore(&saved).unwrap();
        assert_eq!(fresh.state(), saved);
        assert_eq!(fresh.progress(NodeId(3)), 10);
        assert_eq!(fresh.current_target(), Some(NodeId(2)));
        assert!(fresh.is_activated(NodeId(1)));
    }

    #[test]
    fn rejects_inconsistent_states_without_touching_the_graph() {
        let mut g = tree();
        let bad = GraphState {
            kind: GraphKind::Civic,
            nodes: vec![NodeState {
                id: NodeId(2),
                progress: 10,
                activated: true,
            }],
            activation_order: vec![NodeId(2)],
            current_target: None,
        };
        assert!(matches!(g.restore(&bad), Err(RestoreError::Inconsistent(_))));

        let unknown = GraphState {
            kind: GraphKind::Civic,
            nodes: vec![NodeState {
                id: NodeId(77),
                progress: 1,
                activated: false,
            }],
            activation_order: vec![],
            current_target: None,
        };
        assert_eq!(g.restore(&unknown), Err(RestoreError::UnknownNode(NodeId(77))));

        let wrong_kind = GraphState {
            kind: GraphKind::Technology,
            ..g.state()
        };
        assert!(matches!(
            g.restore(&wrong_kind),
            Err(RestoreError::WrongKind { .. })
        ));
        assert!(g.activated_ids().is_empty());
    }
}
