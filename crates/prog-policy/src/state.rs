//! Snapshot and restore of card flags, capacities and the slot table.

use crate::PolicySlotCardSystem;
use prog_core::{CardId, EquippedPolicy, RestoreError, SlotCounts};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Saved flags of one card.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardState {
    pub id: CardId,
    pub unlocked: bool,
    /// Equipped in some slot; implies `unlocked`.
    pub active: bool,
}

/// Saved state of the policy system. Cards missing from `cards` restore as
/// locked and inactive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyState {
    /// Cards that are unlocked or active, in id order.
    pub cards: Vec<CardState>,
    /// Slot count per category.
    pub capacity: SlotCounts,
    /// Slot table; one entry per active card.
    pub equipped: Vec<EquippedPolicy>,
    /// Every unlocked card, in the order it was unlocked.
    pub unlock_order: Vec<CardId>,
}

impl PolicySlotCardSystem {
    pub fn state(&self) -> PolicyState {
        PolicyState {
            cards: self
                .cards
                .values()
                .filter(|c| c.unlocked || c.active)
                .map(|c| CardState {
                    id: c.def.id,
                    unlocked: c.unlocked,
                    active: c.active,
                })
                .collect(),
            capacity: self.capacity,
            equipped: self.equipped.clone(),
            unlock_order: self.unlock_order.clone(),
        }
    }

    /// Replace all mutable state with `state` after checking it against the
    /// catalog. On error nothing changes. No events are emitted and combos
    /// are not re-evaluated.
    pub fn restore(&mut self, state: &PolicyState) -> Result<(), RestoreError> {
        let mut staged: BTreeMap<CardId, (bool, bool)> = BTreeMap::new();
        for s in &state.cards {
            if !self.cards.contains_key(&s.id) {
                return Err(RestoreError::UnknownCard(s.id));
            }
            if s.active && !s.unlocked {
                return Err(RestoreError::Inconsistent(format!(
                    "card {} active but locked",
                    s.id
                )));
            }
            if staged.insert(s.id, (s.unlocked, s.active)).is_some() {
                return Err(RestoreError::Inconsistent(format!(
                    "card {} saved twice",
                    s.id
                )));
            }
        }

        let mut slotted: BTreeSet<CardId> = BTreeSet::new();
        let mut slots = BTreeSet::new();
        for e in &state.equipped {
            let card = self
                .cards
                .get(&e.card)
                .ok_or(RestoreError::UnknownCard(e.card))?;
            let active = staged.get(&e.card).map(|(_, a)| *a).unwrap_or(false);
            if !active || card.def.category != e.category {
                return Err(RestoreError::Inconsistent(format!(
                    "equipped card {} does not match its flags or category",
                    e.card
                )));
            }
            if e.slot >= state.capacity.get(e.category) {
                return Err(RestoreError::Inconsistent(format!(
                    "card {} sits in {} slot {} beyond capacity",
                    e.card, e.category, e.slot
                )));
            }
            if !slotted.insert(e.card) || !slots.insert((e.category, e.slot)) {
                return Err(RestoreError::Inconsistent(format!(
                    "card {} or its slot appears twice",
                    e.card
                )));
            }
        }
        let active_count = staged.values().filter(|(_, a)| *a).count();
        if active_count != slotted.len() {
            return Err(RestoreError::Inconsistent(
                "active cards do not match the slot table".to_string(),
            ));
        }

        let unlocked: BTreeSet<CardId> = staged
            .iter()
            .filter(|(_, (u, _))| *u)
            .map(|(id, _)| *id)
            .collect();
        let order: BTreeSet<CardId> = state.unlock_order.iter().copied().collect();
        if order != unlocked || order.len() != state.unlock_order.len() {
            return Err(RestoreError::Inconsistent(
                "unlock order does not match unlocked cards".to_string(),
            ));
        }

        for card in self.cards.values_mut() {
            let (unlocked, active) = staged.get(&card.def.id).copied().unwrap_or((false, false));
            card.unlocked = unlocked;
            card.active = active;
        }
        self.capacity = state.capacity;
        self.equipped = state.equipped.clone();
        self.unlock_order = state.unlock_order.clone();
        debug!(equipped = self.equipped.len(), "policy state restored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prog_core::{Era, Government, NodeId, PolicyCardDef, PolicyCategory, Rarity};

    fn system() -> PolicySlotCardSystem {
        let cards: Vec<PolicyCardDef> = [
            (1, PolicyCategory::Military, None),
            (2, PolicyCategory::Economic, None),
            (3, PolicyCategory::Economic, Some(NodeId(4))),
        ]
        .into_iter()
        .map(|(id, category, source)| PolicyCardDef {
            id: CardId(id),
            name: format!("Card {id}"),
            category,
            rarity: Rarity::Rare,
            era: Era::Classical,
            source,
            effects: vec![],
            compatible_governments: BTreeSet::new(),
        })
        .collect();
        PolicySlotCardSystem::new(cards, vec![], || Government::Chiefdom, |_| vec![]).unwrap()
    }

    #[test]
    fn state_restores_into_a_fresh_system() {
        let mut s = system();
        s.set_capacity(PolicyCategory::Economic, 2);
        s.unlock_card(CardId(3));
        assert!(s.equip(CardId(3), PolicyCategory::Economic, 1));
        let saved = s.state();

        let mut fresh = system();
        fresh.restore(&saved).unwrap();
        assert_eq!(fresh.state(), saved);
        assert_eq!(fresh.occupant(PolicyCategory::Economic, 1), Some(CardId(3)));
        assert!(fresh.card(CardId(3)).unwrap().is_active());
    }

    #[test]
    fn rejects_slot_beyond_capacity() {
        let mut s = system();
        let bad = PolicyState {
            cards: vec![CardState {
                id: CardId(1),
                unlocked: true,
                active: true,
            }],
            capacity: SlotCounts::default(),
            equipped: vec![EquippedPolicy {
                card: CardId(1),
                category: PolicyCategory::Military,
                slot: 0,
            }],
            unlock_order: vec![CardId(1)],
        };
        assert!(matches!(s.restore(&bad), Err(RestoreError::Inconsistent(_))));
        // untouched: card 2 still unlocked from construction
        assert!(s.card(CardId(2)).unwrap().is_unlocked());
    }

    #[test]
    fn rejects_active_card_missing_from_table() {
        let mut s = system();
        let bad = PolicyState {
            cards: vec![CardState {
                id: CardId(2),
                unlocked: true,
                active: true,
            }],
            capacity: SlotCounts::default(),
            equipped: vec![],
            unlock_order: vec![CardId(2)],
        };
        assert!(s.restore(&bad).is_err());
    }
}
