#![deny(warnings)]

//! Core domain models and invariants for the progression engine.
//!
//! This crate defines the serializable definition types shared by the
//! technology and civic graphs and the policy card system, together with
//! validation helpers that guarantee basic structural invariants before any
//! engine is built from them.

pub mod channel;

pub use channel::{EventChannel, SubscriptionId};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use thiserror::Error;

/// Identifier of a node in a progression graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a policy card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CardId(pub u32);

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The four fixed policy card and slot categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PolicyCategory {
    Military,
    Economic,
    Diplomatic,
    /// Wildcard cards only go into wildcard slots.
    Wildcard,
}

impl PolicyCategory {
    pub const ALL: [PolicyCategory; 4] = [
        PolicyCategory::Military,
        PolicyCategory::Economic,
        PolicyCategory::Diplomatic,
        PolicyCategory::Wildcard,
    ];
}

impl fmt::Display for PolicyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PolicyCategory::Military => "military",
            PolicyCategory::Economic => "economic",
            PolicyCategory::Diplomatic => "diplomatic",
            PolicyCategory::Wildcard => "wildcard",
        };
        f.write_str(s)
    }
}

/// Per-category slot counts.
///
/// Used both for the live slot capacity of the policy system and for the
/// slot grants carried by civic nodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotCounts {
    pub military: u8,
    pub economic: u8,
    pub diplomatic: u8,
    pub wildcard: u8,
}

impl SlotCounts {
    pub fn get(&self, category: PolicyCategory) -> u8 {
        match category {
            PolicyCategory::Military => self.military,
            PolicyCategory::Economic => self.economic,
            PolicyCategory::Diplomatic => self.diplomatic,
            PolicyCategory::Wildcard => self.wildcard,
        }
    }

    pub fn set(&mut self, category: PolicyCategory, count: u8) {
        let slot = match category {
            PolicyCategory::Military => &mut self.military,
            PolicyCategory::Economic => &mut self.economic,
            PolicyCategory::Diplomatic => &mut self.diplomatic,
            PolicyCategory::Wildcard => &mut self.wildcard,
        };
        *slot = count;
    }

    /// Sum over all categories.
    pub fn total(&self) -> u32 {
        PolicyCategory::ALL
            .iter()
            .map(|c| u32::from(self.get(*c)))
            .sum()
    }

    /// Category-wise maximum of `self` and `other`.
    pub fn max_with(&self, other: &SlotCounts) -> SlotCounts {
        let mut out = *self;
        for c in PolicyCategory::ALL {
            out.set(c, self.get(c).max(other.get(c)));
        }
        out
    }
}

/// Form of government. Polled by the policy system for card compatibility.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Government {
    #[default]
    Chiefdom,
    Autocracy,
    Oligarchy,
    ClassicalRepublic,
    Monarchy,
    Theocracy,
    MerchantRepublic,
    Communism,
    Fascism,
    Democracy,
}

/// Cosmetic rarity of a policy card.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rarity {
    #[default]
    Common,
    Rare,
    Epic,
    Legendary,
}

/// Historical era a card or node belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Era {
    #[default]
    Ancient,
    Classical,
    Medieval,
    Renaissance,
    Industrial,
    Modern,
    Atomic,
    Information,
}

/// What a card effect modifies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectKind {
    Yield,
    Combat,
    Production,
    Growth,
    Loyalty,
    Influence,
    Experience,
}

/// A single effect descriptor on a policy card.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CardEffect {
    pub kind: EffectKind,
    /// Signed strength, in percent or flat points depending on `kind`.
    pub magnitude: i32,
    /// What the effect applies to, e.g. "Gold" or "melee units".
    pub target: String,
    /// Free-text activation condition; `None` means always on.
    #[serde(default)]
    pub condition: Option<String>,
}

/// Static definition of a graph node, carrying a kind-specific payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDef<P> {
    pub id: NodeId,
    pub name: String,
    /// Total cost in points (> 0).
    pub cost: u32,
    #[serde(default)]
    pub prerequisites: Vec<NodeId>,
    /// Free-text effect description shown on activation.
    #[serde(default)]
    pub effect: String,
    #[serde(default)]
    pub era: Era,
    #[serde(default)]
    pub payload: P,
}

/// Payload of technology nodes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechPayload {
    /// Names of units, buildings and improvements made available.
    pub unlocks: Vec<String>,
}

/// Payload of civic nodes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CivicPayload {
    /// Policy cards unlocked when the civic activates.
    pub policy_cards: Vec<CardId>,
    /// Governments that become adoptable.
    pub governments: Vec<Government>,
    /// Total slots per category available once this civic is done.
    pub slot_grants: SlotCounts,
}

/// Static definition of a policy card.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyCardDef {
    pub id: CardId,
    pub name: String,
    pub category: PolicyCategory,
    #[serde(default)]
    pub rarity: Rarity,
    #[serde(default)]
    pub era: Era,
    /// Civic node that unlocks the card; `None` means always available.
    #[serde(default)]
    pub source: Option<NodeId>,
    #[serde(default)]
    pub effects: Vec<CardEffect>,
    /// Empty set means compatible with every government.
    #[serde(default)]
    pub compatible_governments: BTreeSet<Government>,
}

/// A card placed in a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquippedPolicy {
    pub card: CardId,
    pub category: PolicyCategory,
    pub slot: u8,
}

/// Named set of cards that triggers a bonus when all are equipped at once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyCombo {
    pub name: String,
    pub cards: BTreeSet<CardId>,
}

/// Session-level tunables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Share of a node's cost granted by a boost (eureka / inspiration).
    pub boost_fraction: Decimal,
    /// Chance per turn and per graph of a random boost; 0 disables it.
    pub boost_chance_per_turn: f32,
    /// Seed for deterministic RNG.
    pub rng_seed: u64,
    pub starting_government: Government,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            boost_fraction: Decimal::new(5, 1),
            boost_chance_per_turn: 0.0,
            rng_seed: 42,
            starting_government: Government::Chiefdom,
        }
    }
}

/// Validation errors for definition invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("duplicate node id {0}")]
    DuplicateNode(NodeId),
    #[error("node {0} has zero cost")]
    ZeroCost(NodeId),
    #[error("node {node} requires unknown node {prerequisite}")]
    UnknownPrerequisite { node: NodeId, prerequisite: NodeId },
    /// Some node sits on a prerequisite cycle.
    #[error("prerequisite cycle through node {0}")]
    Cycle(NodeId),
    #[error("duplicate card id {0}")]
    DuplicateCard(CardId),
    #[error("{context} references unknown card {card}")]
    UnknownCard { context: String, card: CardId },
    #[error("combo '{0}' requires no cards")]
    EmptyCombo(String),
    /// Card source and civic payload disagree.
    #[error("card {card} and civic node {node} disagree on who unlocks it")]
    CardSourceMismatch { card: CardId, node: NodeId },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Errors raised when a saved state does not fit the engine it is restored into.
#[derive(Debug, Error, PartialEq)]
pub enum RestoreError {
    #[error("saved state refers to unknown node {0}")]
    UnknownNode(NodeId),
    #[error("saved state refers to unknown card {0}")]
    UnknownCard(CardId),
    #[error("saved state is for a {expected} graph, found {found}")]
    WrongKind { expected: String, found: String },
    #[error("inconsistent saved state: {0}")]
    Inconsistent(String),
}

/// Validate a set of node definitions: unique ids, positive costs, known
/// prerequisites and an acyclic prerequisite relation.
pub fn validate_graph<P>(defs: &[NodeDef<P>]) -> Result<(), ValidationError> {
    let mut id_map: BTreeMap<NodeId, &NodeDef<P>> = BTreeMap::new();
    for n in defs {
        if n.cost == 0 {
            return Err(ValidationError::ZeroCost(n.id));
        }
        if id_map.insert(n.id, n).is_some() {
            return Err(ValidationError::DuplicateNode(n.id));
        }
    }
    for n in defs {
        for dep in &n.prerequisites {
            if !id_map.contains_key(dep) {
                return Err(ValidationError::UnknownPrerequisite {
                    node: n.id,
                    prerequisite: *dep,
                });
            }
        }
    }

    // Kahn's algorithm; anything left unvisited is on a cycle.
    let mut indegree: BTreeMap<NodeId, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    for n in defs {
        let prereqs: BTreeSet<NodeId> = n.prerequisites.iter().copied().collect();
        indegree.insert(n.id, prereqs.len());
        for p in prereqs {
            dependents.entry(p).or_default().push(n.id);
        }
    }
    let mut ready: VecDeque<NodeId> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0usize;
    while let Some(id) = ready.pop_front() {
        visited += 1;
        for d in dependents.get(&id).map(Vec::as_slice).unwrap_or_default() {
            if let Some(deg) = indegree.get_mut(d) {
                *deg -= 1;
                if *deg == 0 {
                    ready.push_back(*d);
                }
            }
        }
    }
    if visited != indegree.len() {
        if let Some((id, _)) = indegree.iter().find(|(_, d)| **d > 0) {
            return Err(ValidationError::Cycle(*id));
        }
    }
    Ok(())
}

/// Validate a card catalog and the combos defined over it.
pub fn validate_catalog(
    cards: &[PolicyCardDef],
    combos: &[PolicyCombo],
) -> Result<(), ValidationError> {
    let mut ids = BTreeSet::new();
    for c in cards {
        if !ids.insert(c.id) {
            return Err(ValidationError::DuplicateCard(c.id));
        }
    }
    for combo in combos {
        if combo.cards.is_empty() {
            return Err(ValidationError::EmptyCombo(combo.name.clone()));
        }
        for card in &combo.cards {
            if !ids.contains(card) {
                return Err(ValidationError::UnknownCard {
                    context: format!("combo '{}'", combo.name),
                    card: *card,
                });
            }
        }
    }
    Ok(())
}

/// Validate session tunables.
pub fn validate_config(cfg: &SessionConfig) -> Result<(), ValidationError> {
    if cfg.boost_fraction <= Decimal::ZERO || cfg.boost_fraction > Decimal::ONE {
        return Err(ValidationError::InvalidConfig(format!(
            "boost_fraction must be in (0, 1], got {}",
            cfg.boost_fraction
        )));
    }
    if !cfg.boost_chance_per_turn.is_finite() || !(0.0..=1.0).contains(&cfg.boost_chance_per_turn)
    {
        return Err(ValidationError::InvalidConfig(format!(
            "boost_chance_per_turn must be in [0, 1], got {}",
            cfg.boost_chance_per_turn
        )));
    }
    Ok(())
}
