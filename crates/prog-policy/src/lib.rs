#![deny(warnings)]

//! Policy cards and the slots they are equipped into.
//!
//! The system owns a fixed card catalog, per-category slot capacities, the
//! table of equipped cards and a list of combos. Capacities and card unlocks
//! are pushed in from outside (normally from civic activations); the current
//! government is polled through an accessor supplied at construction.
//!
//! Combos are not remembered as "triggered": after every equip, unequip or
//! eviction each combo whose cards are all equipped is announced again.

mod state;

pub use state::{CardState, PolicyState};

use prog_core::{
    validate_catalog, CardId, EquippedPolicy, EventChannel, Government, NodeId, PolicyCardDef,
    PolicyCategory, PolicyCombo, SlotCounts, SubscriptionId, ValidationError,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

/// Notifications emitted by the policy system.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyEvent {
    CardUnlocked { id: CardId, name: String },
    Equipped {
        card: CardId,
        category: PolicyCategory,
        /// Index within the category's slots.
        slot: u8,
    },
    /// Sent for explicit unequips and for capacity evictions alike.
    Unequipped {
        card: CardId,
        category: PolicyCategory,
        /// Slot the card was removed from.
        slot: u8,
    },
    /// Every card of the combo is equipped.
    ComboTriggered {
        name: String,
        /// Required cards in id order.
        cards: Vec<CardId>,
    },
}

/// Why an equip request was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EquipRejection {
    #[error("unknown card {0}")]
    UnknownCard(CardId),
    #[error("card {0} is not unlocked")]
    Locked(CardId),
    #[error("card {0} is already equipped")]
    AlreadyActive(CardId),
    #[error("{card} card cannot go into a {slot} slot")]
    CategoryMismatch {
        card: PolicyCategory,
        slot: PolicyCategory,
    },
    #[error("slot {slot} is out of range (capacity {capacity})")]
    SlotOutOfRange { slot: u8, capacity: u8 },
    #[error("slot is occupied by card {0}")]
    SlotOccupied(CardId),
    #[error("card is not compatible with {0:?}")]
    Incompatible(Government),
}

/// A catalog card with its mutable flags. `active` implies `unlocked`.
#[derive(Clone, Debug)]
pub struct PolicyCard {
    def: PolicyCardDef,
    unlocked: bool,
    active: bool,
}

impl PolicyCard {
    pub fn id(&self) -> CardId {
        self.def.id
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn category(&self) -> PolicyCategory {
        self.def.category
    }

    pub fn def(&self) -> &PolicyCardDef {
        &self.def
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Sum of effect magnitudes, a rough strength score.
    pub fn total_magnitude(&self) -> i64 {
        self.def.effects.iter().map(|e| i64::from(e.magnitude)).sum()
    }
}

type GovernmentFn = Box<dyn Fn() -> Government>;
type CardsForNodeFn = Box<dyn Fn(NodeId) -> Vec<CardId>>;

/// Slot allocation, compatibility and combo detection for policy cards.
pub struct PolicySlotCardSystem {
    cards: BTreeMap<CardId, PolicyCard>,
    capacity: SlotCounts,
    equipped: Vec<EquippedPolicy>,
    combos: Vec<PolicyCombo>,
    unlock_order: Vec<CardId>,
    government: GovernmentFn,
    cards_for_node: CardsForNodeFn,
    channel: EventChannel<PolicyEvent>,
}

impl fmt::Debug for PolicySlotCardSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicySlotCardSystem")
            .field("cards", &self.cards.len())
            .field("capacity", &self.capacity)
            .field("equipped", &self.equipped)
            .field("combos", &self.combos.len())
            .finish()
    }
}

impl PolicySlotCardSystem {
    /// Build the system. Cards without a source node start unlocked; every
    /// capacity starts at zero.
    pub fn new<G, F>(
        cards: Vec<PolicyCardDef>,
        combos: Vec<PolicyCombo>,
        government: G,
        cards_for_node: F,
    ) -> Result<Self, ValidationError>
    where
        G: Fn() -> Government + 'static,
        F: Fn(NodeId) -> Vec<CardId> + 'static,
    {
        validate_catalog(&cards, &combos)?;
        let mut unlock_order = Vec::new();
        let cards = cards
            .into_iter()
            .map(|def| {
                let unlocked = def.source.is_none();
                if unlocked {
                    unlock_order.push(def.id);
                }
                (
                    def.id,
                    PolicyCard {
                        def,
                        unlocked,
                        active: false,
                    },
                )
            })
            .collect();
        Ok(Self {
            cards,
            capacity: SlotCounts::default(),
            equipped: Vec::new(),
            combos,
            unlock_order,
            government: Box::new(government),
            cards_for_node: Box::new(cards_for_node),
            channel: EventChannel::new(),
        })
    }

    pub fn capacity(&self, category: PolicyCategory) -> u8 {
        self.capacity.get(category)
    }

    pub fn capacities(&self) -> SlotCounts {
        self.capacity
    }

    /// Set the slot count of `category`, evicting any card whose slot index
    /// no longer fits.
    pub fn set_capacity(&mut self, category: PolicyCategory, count: u8) {
        let previous = self.capacity.get(category);
        self.capacity.set(category, count);
        if count != previous {
            info!(%category, previous, count, "slot capacity changed");
        }
        let mut evicted: Vec<EquippedPolicy> = Vec::new();
        self.equipped.retain(|e| {
            let keep = e.category != category || e.slot < count;
            if !keep {
                evicted.push(*e);
            }
            keep
        });
        if evicted.is_empty() {
            return;
        }
        evicted.sort_by_key(|e| e.slot);
        for e in evicted {
            if let Some(card) = self.cards.get_mut(&e.card) {
                card.active = false;
            }
            info!(card = %e.card, %category, slot = e.slot, "card evicted");
            self.channel.emit(&PolicyEvent::Unequipped {
                card: e.card,
                category: e.category,
                slot: e.slot,
            });
        }
        self.check_combos();
    }

    /// Mark a card unlocked. `false` if unknown or already unlocked.
    pub fn unlock_card(&mut self, id: CardId) -> bool {
        let Some(card) = self.cards.get_mut(&id) else {
            debug!(card = %id, "unlock of unknown card");
            return false;
        };
        if card.unlocked {
            return false;
        }
        card.unlocked = true;
        self.unlock_order.push(id);
        info!(card = %id, name = %card.def.name, "card unlocked");
        let event = PolicyEvent::CardUnlocked {
            id,
            name: card.def.name.clone(),
        };
        self.channel.emit(&event);
        true
    }

    /// Unlock every card listed by civic node `node`. Returns how many were new.
    pub fn unlock_cards_for_node(&mut self, node: NodeId) -> usize {
        let ids = (self.cards_for_node)(node);
        ids.into_iter().filter(|id| self.unlock_card(*id)).count()
    }

    /// Equip a card, reporting why on refusal.
    ///
    /// The card's category must equal the slot category exactly; wildcard
    /// cards go into wildcard slots only.
    pub fn try_equip(
        &mut self,
        id: CardId,
        category: PolicyCategory,
        slot: u8,
    ) -> Result<(), EquipRejection> {
        let card = self.cards.get(&id).ok_or(EquipRejection::UnknownCard(id))?;
        if !card.unlocked {
            return Err(EquipRejection::Locked(id));
        }
        if card.active {
            return Err(EquipRejection::AlreadyActive(id));
        }
        if card.def.category != category {
            return Err(EquipRejection::CategoryMismatch {
                card: card.def.category,
                slot: category,
            });
        }
        let capacity = self.capacity.get(category);
        if slot >= capacity {
            return Err(EquipRejection::SlotOutOfRange { slot, capacity });
        }
        if let Some(other) = self.occupant(category, slot) {
            return Err(EquipRejection::SlotOccupied(other));
        }
        let government = (self.government)();
        if !Self::allows(card, government) {
            return Err(EquipRejection::Incompatible(government));
        }

        self.equipped.push(EquippedPolicy {
            card: id,
            category,
            slot,
        });
        if let Some(card) = self.cards.get_mut(&id) {
            card.active = true;
        }
        info!(card = %id, %category, slot, "card equipped");
        self.channel.emit(&PolicyEvent::Equipped {
            card: id,
            category,
            slot,
        });
        self.check_combos();
        Ok(())
    }

    /// Equip a card into `(category, slot)`.
    pub fn equip(&mut self, id: CardId, category: PolicyCategory, slot: u8) -> bool {
        match self.try_equip(id, category, slot) {
            Ok(()) => true,
            Err(reason) => {
                debug!(card = %id, %category, slot, %reason, "equip rejected");
                false
            }
        }
    }

    /// Remove a card from its slot. `false` if it is not equipped.
    pub fn unequip(&mut self, id: CardId) -> bool {
        let Some(pos) = self.equipped.iter().position(|e| e.card == id) else {
            return false;
        };
        let e = self.equipped.remove(pos);
        if let Some(card) = self.cards.get_mut(&id) {
            card.active = false;
        }
        info!(card = %id, category = %e.category, slot = e.slot, "card unequipped");
        self.channel.emit(&PolicyEvent::Unequipped {
            card: e.card,
            category: e.category,
            slot: e.slot,
        });
        self.check_combos();
        true
    }

    /// Whether the card may be used under the current government.
    pub fn is_compatible(&self, id: CardId) -> bool {
        match self.cards.get(&id) {
            Some(card) => Self::allows(card, (self.government)()),
            None => false,
        }
    }

    pub fn current_government(&self) -> Government {
        (self.government)()
    }

    pub fn equipped(&self) -> &[EquippedPolicy] {
        &self.equipped
    }

    /// Unlocked cards, in the order they were unlocked.
    pub fn unlocked(&self) -> Vec<&PolicyCard> {
        self.unlock_order
            .iter()
            .filter_map(|id| self.cards.get(id))
            .collect()
    }

    /// Unlocked cards not currently equipped, optionally of one category.
    pub fn available(&self, category: Option<PolicyCategory>) -> Vec<&PolicyCard> {
        self.cards
            .values()
            .filter(|c| c.unlocked && !c.active)
            .filter(|c| category.map_or(true, |cat| c.def.category == cat))
            .collect()
    }

    pub fn card(&self, id: CardId) -> Option<&PolicyCard> {
        self.cards.get(&id)
    }

    pub fn cards(&self) -> impl Iterator<Item = &PolicyCard> {
        self.cards.values()
    }

    pub fn combos(&self) -> &[PolicyCombo] {
        &self.combos
    }

    /// Card sitting in `(category, slot)`, if any.
    pub fn occupant(&self, category: PolicyCategory, slot: u8) -> Option<CardId> {
        self.equipped
            .iter()
            .find(|e| e.category == category && e.slot == slot)
            .map(|e| e.card)
    }

    /// Empty slot indices of `category` below its capacity.
    pub fn free_slots(&self, category: PolicyCategory) -> Vec<u8> {
        (0..self.capacity.get(category))
            .filter(|s| self.occupant(category, *s).is_none())
            .collect()
    }

    /// Announce every combo whose cards are all equipped. Returns their names.
    pub fn check_combos(&mut self) -> Vec<String> {
        let equipped: BTreeSet<CardId> = self.equipped.iter().map(|e| e.card).collect();
        let mut fired = Vec::new();
        for combo in &self.combos {
            if combo.cards.is_subset(&equipped) {
                info!(combo = %combo.name, "combo triggered");
                self.channel.emit(&PolicyEvent::ComboTriggered {
                    name: combo.name.clone(),
                    cards: combo.cards.iter().copied().collect(),
                });
                fired.push(combo.name.clone());
            }
        }
        fired
    }

    pub fn subscribe<F>(&mut self, listener: F) -> SubscriptionId
    where
        F: FnMut(&PolicyEvent) + 'static,
    {
        self.channel.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.channel.unsubscribe(id)
    }

    fn allows(card: &PolicyCard, government: Government) -> bool {
        card.def.compatible_governments.is_empty()
            || card.def.compatible_governments.contains(&government)
    }
}
