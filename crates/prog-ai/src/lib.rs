#![deny(warnings)]

//! Advisor heuristics used by the autopilot.

use prog_core::{CardId, Government, NodeId, PolicyCategory};
use prog_graph::ProgressionGraph;
use prog_policy::PolicySlotCardSystem;
use std::collections::BTreeSet;
use tracing::debug;

/// An equip the advisor recommends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PolicyMove {
    pub card: CardId,
    pub category: PolicyCategory,
    pub slot: u8,
}

/// A candidate target and the points it still needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TargetPick {
    pub id: NodeId,
    pub remaining: u32,
}

/// Unlockable node with the fewest points left to pay; lowest id on ties.
pub fn pick_target<P>(graph: &ProgressionGraph<P>) -> Option<TargetPick> {
    graph
        .unlockable_ids()
        .into_iter()
        .filter_map(|id| graph.node(id))
        .map(|n| TargetPick {
            id: n.id(),
            remaining: n.remaining(),
        })
        .min_by_key(|p| (p.remaining, p.id))
}

/// Fill every empty slot with the strongest available compatible card of the
/// slot's category. Existing equips are left alone.
pub fn plan_policies(system: &PolicySlotCardSystem) -> Vec<PolicyMove> {
    let mut moves = Vec::new();
    for category in PolicyCategory::ALL {
        let free = system.free_slots(category);
        if free.is_empty() {
            continue;
        }
        let mut candidates: Vec<_> = system
            .available(Some(category))
            .into_iter()
            .filter(|c| system.is_compatible(c.id()))
            .collect();
        candidates.sort_by_key(|c| (std::cmp::Reverse(c.total_magnitude()), c.id()));
        for (slot, card) in free.into_iter().zip(candidates) {
            moves.push(PolicyMove {
                card: card.id(),
                category,
                slot,
            });
        }
    }
    debug!(moves = moves.len(), "policy plan");
    moves
}

/// Latest government in the unlocked set that ranks above `current`.
pub fn pick_government(
    unlocked: &BTreeSet<Government>,
    current: Government,
) -> Option<Government> {
    unlocked.range(current..).next_back().copied().filter(|g| *g > current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prog_core::{CardEffect, EffectKind, Era, NodeDef, PolicyCardDef, Rarity};
    use prog_graph::GraphKind;
    use rust_decimal::Decimal;

    fn def(id: u32, cost: u32, prereqs: &[u32]) -> NodeDef<()> {
        NodeDef {
            id: NodeId(id),
            name: format!("N{id}"),
            cost,
            prerequisites: prereqs.iter().map(|p| NodeId(*p)).collect(),
            effect: String::new(),
            era: Era::Ancient,
            payload: (),
        }
    }

    fn card(id: u32, category: PolicyCategory, magnitude: i32) -> PolicyCardDef {
        PolicyCardDef {
            id: CardId(id),
            name: format!("Card {id}"),
            category,
            rarity: Rarity::Common,
            era: Era::Ancient,
            source: None,
            effects: vec![CardEffect {
                kind: EffectKind::Production,
                magnitude,
                target: "cities".into(),
                condition: None,
            }],
            compatible_governments: BTreeSet::new(),
        }
    }

    #[test]
    fn picks_cheapest_remaining() {
        let mut g = ProgressionGraph::new(
            GraphKind::Technology,
            vec![def(1, 30, &[]), def(2, 20, &[]), def(3, 5, &[1])],
        )
        .unwrap();
        assert_eq!(pick_target(&g).map(|s| s.id), Some(NodeId(2)));
        // half of 30 banked leaves 15, less than node 2's 20
        g.add_boost(NodeId(1), Decimal::new(5, 1));
        assert_eq!(
            pick_target(&g),
            Some(TargetPick {
                id: NodeId(1),
                remaining: 15
            })
        );
    }

    #[test]
    fn nothing_to_pick_when_done() {
        let mut g = ProgressionGraph::new(GraphKind::Civic, vec![def(1, 10, &[])]).unwrap();
        g.set_current_target(NodeId(1));
        g.add_progress(10);
        assert_eq!(pick_target(&g), None);
    }

    #[test]
    fn fills_free_slots_strongest_first() {
        let mut theo = card(4, PolicyCategory::Military, 99);
        theo.compatible_governments = [Government::Theocracy].into_iter().collect();
        let mut s = PolicySlotCardSystem::new(
            vec![
                card(1, PolicyCategory::Military, 1),
                card(2, PolicyCategory::Military, 5),
                card(3, PolicyCategory::Economic, 2),
                theo,
            ],
            vec![],
            || Government::Chiefdom,
            |_| vec![],
        )
        .unwrap();
        s.set_capacity(PolicyCategory::Military, 1);
        s.set_capacity(PolicyCategory::Economic, 2);
        let plan = plan_policies(&s);
        assert_eq!(
            plan,
            vec![
                PolicyMove {
                    card: CardId(2),
                    category: PolicyCategory::Military,
                    slot: 0
                },
                PolicyMove {
                    card: CardId(3),
                    category: PolicyCategory::Economic,
                    slot: 0
                },
            ]
        );
        for m in plan {
            assert!(s.equip(m.card, m.category, m.slot));
        }
        assert!(plan_policies(&s).is_empty());
    }

    #[test]
    fn prefers_the_most_advanced_unlocked_government() {
        let unlocked: BTreeSet<Government> = [
            Government::Chiefdom,
            Government::Autocracy,
            Government::Theocracy,
        ]
        .into_iter()
        .collect();
        assert_eq!(
            pick_government(&unlocked, Government::Chiefdom),
            Some(Government::Theocracy)
        );
        assert_eq!(pick_government(&unlocked, Government::Theocracy), None);
        assert_eq!(pick_government(&BTreeSet::new(), Government::Chiefdom), None);
    }
}
