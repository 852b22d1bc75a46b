#![deny(warnings)]

//! Resource-fed unlock graphs.
//!
//! A [`ProgressionGraph`] owns a fixed set of nodes wired into a DAG of
//! prerequisites. Points flow into a single current target each turn; boosts
//! grant a share of a node's cost directly. When a node completes, any
//! dependent whose banked progress already covers its cost and whose
//! prerequisites are now all done activates too, transitively.
//!
//! The technology and civic trees are both instances of this type and differ
//! only in their node payload ([`TechPayload`] / [`CivicPayload`]).

mod state;

pub use state::{GraphState, NodeState};

use prog_core::{
    validate_graph, CivicPayload, EventChannel, NodeDef, NodeId, SubscriptionId, TechPayload,
    ValidationError,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use tracing::{debug, info};

/// Which tree a graph models.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphKind {
    Technology,
    Civic,
}

impl fmt::Display for GraphKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphKind::Technology => f.write_str("technology"),
            GraphKind::Civic => f.write_str("civic"),
        }
    }
}

/// Notifications emitted by a graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GraphEvent {
    /// A node completed, directly or through the cascade.
    Activated {
        id: NodeId,
        name: String,
        /// Free-text effect from the node definition.
        effect: String,
    },
    /// Points were banked on a node.
    ProgressChanged {
        id: NodeId,
        /// Banked points after the change.
        progress: u32,
        cost: u32,
    },
    /// A boost was granted, announced before its progress change.
    Boosted { id: NodeId, name: String },
}

/// A node together with its mutable progress.
///
/// Invariants: `progress <= cost`, and `activated` implies `progress >= cost`.
#[derive(Clone, Debug)]
pub struct Node<P> {
    id: NodeId,
    name: String,
    cost: u32,
    progress: u32,
    activated: bool,
    prerequisites: BTreeSet<NodeId>,
    dependents: BTreeSet<NodeId>,
    effect: String,
    payload: P,
}

impl<P> Node<P> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn progress(&self) -> u32 {
        self.progress
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    pub fn prerequisites(&self) -> &BTreeSet<NodeId> {
        &self.prerequisites
    }

    pub fn dependents(&self) -> &BTreeSet<NodeId> {
        &self.dependents
    }

    pub fn effect(&self) -> &str {
        &self.effect
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    /// Points still needed to reach the cost.
    pub fn remaining(&self) -> u32 {
        self.cost - self.progress
    }
}

/// DAG unlock engine with a single current target and cascading activation.
#[derive(Debug)]
pub struct ProgressionGraph<P> {
    kind: GraphKind,
    nodes: BTreeMap<NodeId, Node<P>>,
    activated: Vec<NodeId>,
    current_target: Option<NodeId>,
    channel: EventChannel<GraphEvent>,
}

/// Technology tree.
pub type TechGraph = ProgressionGraph<TechPayload>;
/// Civic / culture tree.
pub type CivicGraph = ProgressionGraph<CivicPayload>;

impl<P> ProgressionGraph<P> {
    /// Build a graph from validated definitions. Node ids are fixed from here on.
    pub fn new(kind: GraphKind, defs: Vec<NodeDef<P>>) -> Result<Self, ValidationError> {
        validate_graph(&defs)?;
        let mut nodes: BTreeMap<NodeId, Node<P>> = BTreeMap::new();
        let mut dependents: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        for def in defs {
            for p in &def.prerequisites {
                dependents.entry(*p).or_default().insert(def.id);
            }
            nodes.insert(
                def.id,
                Node {
                    id: def.id,
                    name: def.name,
                    cost: def.cost,
                    progress: 0,
                    activated: false,
                    prerequisites: def.prerequisites.into_iter().collect(),
                    dependents: BTreeSet::new(),
                    effect: def.effect,
                    payload: def.payload,
                },
            );
        }
        for (id, deps) in dependents {
            if let Some(node) = nodes.get_mut(&id) {
                node.dependents = deps;
            }
        }
        debug!(%kind, nodes = nodes.len(), "graph built");
        Ok(Self {
            kind,
            nodes,
            activated: Vec::new(),
            current_target: None,
            channel: EventChannel::new(),
        })
    }

    pub fn kind(&self) -> GraphKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Known, not yet activated, and every prerequisite activated.
    pub fn is_unlockable(&self, id: NodeId) -> bool {
        match self.nodes.get(&id) {
            Some(node) => !node.activated && self.prerequisites_met(node),
            None => false,
        }
    }

    pub fn is_activated(&self, id: NodeId) -> bool {
        self.nodes.get(&id).map(|n| n.activated).unwrap_or(false)
    }

    pub fn current_target(&self) -> Option<NodeId> {
        self.current_target
    }

    /// Point future progress at `id`. Progress banked in other nodes is kept.
    pub fn set_current_target(&mut self, id: NodeId) -> bool {
        if !self.is_unlockable(id) {
            debug!(kind = %self.kind, node = %id, "target rejected");
            return false;
        }
        self.current_target = Some(id);
        debug!(kind = %self.kind, node = %id, "target set");
        true
    }

    pub fn clear_current_target(&mut self) {
        self.current_target = None;
    }

    /// Add per-turn points to the current target, activating it once full.
    pub fn add_progress(&mut self, points: i64) {
        if points <= 0 {
            return;
        }
        let Some(id) = self.current_target else {
            return;
        };
        let gained = u32::try_from(points).unwrap_or(u32::MAX);
        let Some((progress, cost)) = self.bank(id, gained) else {
            return;
        };
        if progress >= cost && self.is_unlockable(id) {
            self.activate(id);
        }
    }

    /// Grant `floor(cost * fraction)` points to `id` regardless of the current
    /// target.
    ///
    /// Progress banks on any known node that is not yet activated, even one
    /// still gated by prerequisites; activation waits for those prerequisites
    /// and then happens through the cascade. Returns `false` when nothing was
    /// applied.
    pub fn add_boost(&mut self, id: NodeId, fraction: Decimal) -> bool {
        if fraction <= Decimal::ZERO {
            return false;
        }
        let (grant, name) = match self.nodes.get(&id) {
            Some(node) if !node.activated => {
                let grant = Decimal::from(node.cost)
                    .checked_mul(fraction)
                    .and_then(|d| d.floor().to_u32())
                    .unwrap_or(u32::MAX);
                (grant, node.name.clone())
            }
            _ => {
                debug!(kind = %self.kind, node = %id, "boost ignored");
                return false;
            }
        };
        info!(kind = %self.kind, node = %id, grant, "boost applied");
        self.channel.emit(&GraphEvent::Boosted { id, name });
        let Some((progress, cost)) = self.bank(id, grant) else {
            return false;
        };
        if progress >= cost && self.is_unlockable(id) {
            self.activate(id);
        }
        true
    }

    /// Ids of every unlockable node, in id order.
    pub fn unlockable_ids(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| !n.activated && self.prerequisites_met(n))
            .map(|n| n.id)
            .collect()
    }

    /// Activated ids in activation order.
    pub fn activated_ids(&self) -> &[NodeId] {
        &self.activated
    }

    pub fn node(&self, id: NodeId) -> Option<&Node<P>> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node<P>> {
        self.nodes.values()
    }

    /// Banked progress; 0 for unknown ids.
    pub fn progress(&self, id: NodeId) -> u32 {
        self.nodes.get(&id).map(|n| n.progress).unwrap_or(0)
    }

    /// Node cost; 0 for unknown ids.
    pub fn cost(&self, id: NodeId) -> u32 {
        self.nodes.get(&id).map(|n| n.cost).unwrap_or(0)
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&GraphEvent) + 'static,
    {
        self.channel.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.channel.unsubscribe(id)
    }

    fn prerequisites_met(&self, node: &Node<P>) -> bool {
        node.prerequisites.iter().all(|p| self.is_activated(*p))
    }

    /// Add clamped progress to a non-activated node and announce it.
    fn bank(&mut self, id: NodeId, points: u32) -> Option<(u32, u32)> {
        let node = self.nodes.get_mut(&id)?;
        if node.activated {
            return None;
        }
        node.progress = node.progress.saturating_add(points).min(node.cost);
        let (progress, cost) = (node.progress, node.cost);
        self.channel
            .emit(&GraphEvent::ProgressChanged { id, progress, cost });
        Some((progress, cost))
    }

    /// Activate `id`, then walk dependents breadth-first and activate every
    /// one that is already paid for and whose prerequisites are all done.
    fn activate(&mut self, id: NodeId) {
        self.mark_activated(id);
        let mut worklist = VecDeque::from([id]);
        while let Some(done) = worklist.pop_front() {
            let dependents: Vec<NodeId> = self
                .nodes
                .get(&done)
                .map(|n| n.dependents.iter().copied().collect())
                .unwrap_or_default();
            for d in dependents {
                let ready = self
                    .nodes
                    .get(&d)
                    .map(|n| !n.activated && n.progress >= n.cost && self.prerequisites_met(n))
                    .unwrap_or(false);
                if ready {
                    debug!(kind = %self.kind, node = %d, via = %done, "cascade");
                    self.mark_activated(d);
                    worklist.push_back(d);
                }
            }
        }
    }

    fn mark_activated(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(&id) else {
            return;
        };
        node.activated = true;
        self.activated.push(id);
        if self.current_target == Some(id) {
            self.current_target = None;
        }
        info!(kind = %self.kind, node = %id, name = %node.name, "node activated");
        let event = GraphEvent::Activated {
            id,
            name: node.name.clone(),
            effect: node.effect.clone(),
        };
        self.channel.emit(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prog_core::Era;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn def(id: u32, cost: u32, prereqs: &[u32]) -> NodeDef<()> {
        NodeDef {
            id: NodeId(id),
            name: format!("N{id}"),
            cost,
            prerequisites: prereqs.iter().map(|p| NodeId(*p)).collect(),
            effect: format!("effect {id}"),
            era: Era::Ancient,
            payload: (),
        }
    }

    fn graph(defs: Vec<NodeDef<()>>) -> ProgressionGraph<()> {
        ProgressionGraph::new(GraphKind::Technology, defs).unwrap()
    }

    fn recorder(g: &mut ProgressionGraph<()>) -> Rc<RefCell<Vec<GraphEvent>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        g.subscribe(move |e| sink.borrow_mut().push(e.clone()));
        log
    }

    fn activations(log: &Rc<RefCell<Vec<GraphEvent>>>) -> Vec<NodeId> {
        log.borrow()
            .iter()
            .filter_map(|e| match e {
                GraphEvent::Activated { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    fn half() -> Decimal {
        Decimal::new(5, 1)
    }

    #[test]
    fn roots_are_unlockable_from_construction() {
        let g = graph(vec![def(1, 10, &[]), def(2, 10, &[1])]);
        assert!(g.is_unlockable(NodeId(1)));
        assert!(!g.is_unlockable(NodeId(2)));
        assert!(!g.is_unlockable(NodeId(99)));
        assert_eq!(g.unlockable_ids(), vec![NodeId(1)]);
    }

    #[test]
    fn unknown_ids_give_sentinels() {
        let g = graph(vec![def(1, 10, &[])]);
        assert!(g.node(NodeId(5)).is_none());
        assert_eq!(g.progress(NodeId(5)), 0);
        assert_eq!(g.cost(NodeId(5)), 0);
        assert!(!g.is_activated(NodeId(5)));
    }

    #[test]
    fn target_rejections_leave_state_unchanged() {
        let mut g = graph(vec![def(1, 10, &[]), def(2, 10, &[1])]);
        assert!(!g.set_current_target(NodeId(2)));
        assert!(!g.set_current_target(NodeId(42)));
        assert_eq!(g.current_target(), None);

        assert!(g.set_current_target(NodeId(1)));
        g.add_progress(10);
        assert!(g.is_activated(NodeId(1)));
        assert_eq!(g.current_target(), None);
        assert!(!g.set_current_target(NodeId(1)));
        assert_eq!(g.current_target(), None);
        assert_eq!(g.progress(NodeId(1)), 10);
    }

    #[test]
    fn progress_goes_to_target_only_and_clamps() {
        let mut g = graph(vec![def(1, 30, &[]), def(2, 30, &[])]);
        let log = recorder(&mut g);
        g.add_progress(5);
        assert_eq!(g.progress(NodeId(1)), 0);
        assert!(log.borrow().is_empty());

        g.set_current_target(NodeId(1));
        g.add_progress(0);
        g.add_progress(-3);
        assert_eq!(g.progress(NodeId(1)), 0);
        g.add_progress(12);
        assert_eq!(g.progress(NodeId(1)), 12);
        assert_eq!(g.progress(NodeId(2)), 0);

        // switching target keeps what was banked
        g.set_current_target(NodeId(2));
        g.add_progress(7);
        assert_eq!(g.progress(NodeId(1)), 12);
        assert_eq!(g.progress(NodeId(2)), 7);
        g.add_progress(1_000);
        assert_eq!(g.progress(NodeId(2)), 30);
        assert!(g.is_activated(NodeId(2)));
        assert_eq!(activations(&log), vec![NodeId(2)]);
    }

    #[test]
    fn two_half_boosts_activate_once() {
        let mut g = graph(vec![def(1, 50, &[])]);
        let log = recorder(&mut g);
        assert!(g.add_boost(NodeId(1), half()));
        assert_eq!(g.progress(NodeId(1)), 25);
        assert!(!g.is_activated(NodeId(1)));
        assert!(g.add_boost(NodeId(1), half()));
        assert!(g.is_activated(NodeId(1)));
        assert_eq!(activations(&log), vec![NodeId(1)]);
        // boosting an activated node is a no-op
        assert!(!g.add_boost(NodeId(1), half()));
        assert_eq!(activations(&log), vec![NodeId(1)]);
    }

    #[test]
    fn boost_floors_the_grant() {
        let mut g = graph(vec![def(1, 33, &[])]);
        g.add_boost(NodeId(1), half());
        assert_eq!(g.progress(NodeId(1)), 16);
        assert!(!g.add_boost(NodeId(1), Decimal::ZERO));
        assert!(!g.add_boost(NodeId(9), half()));
    }

    #[test]
    fn banked_progress_cascades_when_prerequisite_completes() {
        let mut g = graph(vec![def(1, 10, &[]), def(2, 10, &[1])]);
        let log = recorder(&mut g);
        g.add_boost(NodeId(2), Decimal::new(3, 0));
        assert_eq!(g.progress(NodeId(2)), 10);
        assert!(!g.is_activated(NodeId(2)));

        g.set_current_target(NodeId(1));
        g.add_progress(10);
        assert!(g.is_activated(NodeId(1)));
        assert!(g.is_activated(NodeId(2)));
        assert_eq!(activations(&log), vec![NodeId(1), NodeId(2)]);
        assert_eq!(g.activated_ids(), &[NodeId(1), NodeId(2)]);
    }

    #[test]
    fn cascade_is_transitive_and_waits_for_all_prerequisites() {
        // 1 -> 2 -> 4, 3 -> 4, 4 -> 5
        let mut g = graph(vec![
            def(1, 10, &[]),
            def(2, 10, &[1]),
            def(3, 10, &[]),
            def(4, 10, &[2, 3]),
            def(5, 10, &[4]),
        ]);
        let log = recorder(&mut g);
        for id in [2, 4, 5] {
            g.add_boost(NodeId(id), Decimal::ONE);
        }
        g.set_current_target(NodeId(1));
        g.add_progress(10);
        // 3 is still missing, so 4 and 5 stay locked
        assert_eq!(activations(&log), vec![NodeId(1), NodeId(2)]);
        assert!(!g.is_activated(NodeId(4)));

        g.set_current_target(NodeId(3));
        g.add_progress(10);
        assert_eq!(
            activations(&log),
            vec![NodeId(1), NodeId(2), NodeId(3), NodeId(4), NodeId(5)]
        );
        assert!(g.unlockable_ids().is_empty());
    }

    #[test]
    fn unsubscribed_listener_hears_nothing() {
        let mut g = graph(vec![def(1, 10, &[])]);
        let log = Rc::new(RefCell::new(0u32));
        let sink = log.clone();
        let sub = g.subscribe(move |_| *sink.borrow_mut() += 1);
        assert!(g.unsubscribe(sub));
        g.add_boost(NodeId(1), Decimal::ONE);
        assert_eq!(*log.borrow(), 0);
        assert!(!g.unsubscribe(sub));
    }

    #[test]
    fn progress_event_carries_cost() {
        let mut g = graph(vec![def(1, 40, &[])]);
        let log = recorder(&mut g);
        g.set_current_target(NodeId(1));
        g.add_progress(15);
        assert_eq!(
            log.borrow().as_slice(),
            &[GraphEvent::ProgressChanged {
                id: NodeId(1),
                progress: 15,
                cost: 40
            }]
        );
    }

    #[derive(Clone, Debug)]
    enum Op {
        Target(u32),
        Progress(i64),
        Boost(u32, i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..8).prop_map(Op::Target),
            (-5i64..40).prop_map(Op::Progress),
            (0u32..8, 1i64..12).prop_map(|(id, tenths)| Op::Boost(id, tenths)),
        ]
    }

    proptest! {
        #[test]
        fn invariants_hold_under_random_play(ops in proptest::collection::vec(op(), 0..60)) {
            let mut g = graph(vec![
                def(0, 20, &[]),
                def(1, 15, &[0]),
                def(2, 25, &[0]),
                def(3, 10, &[1, 2]),
                def(4, 30, &[]),
                def(5, 12, &[3, 4]),
                def(6, 8, &[5]),
            ]);
            let log = recorder(&mut g);
            for op in ops {
                match op {
                    Op::Target(id) => { g.set_current_target(NodeId(id)); }
                    Op::Progress(p) => g.add_progress(p),
                    Op::Boost(id, tenths) => { g.add_boost(NodeId(id), Decimal::new(tenths, 1)); }
                }
                for n in g.nodes() {
                    prop_assert!(n.progress() <= n.cost());
                    if n.is_activated() {
                        prop_assert!(n.progress() >= n.cost());
                        for p in n.prerequisites() {
                            prop_assert!(g.is_activated(*p));
                        }
                    }
                }
                if let Some(t) = g.current_target() {
                    prop_assert!(g.is_unlockable(t));
                }
            }
            // one Activated event per activated node, in the same order
            prop_assert_eq!(activations(&log), g.activated_ids().to_vec());
            // prerequisites always precede their dependents
            let order = g.activated_ids();
            for (i, id) in order.iter().enumerate() {
                if let Some(n) = g.node(*id) {
                    for p in n.prerequisites() {
                        prop_assert!(order[..i].contains(p));
                    }
                }
            }
        }
    }
}
