#![deny(warnings)]

//! Session runtime: both progression graphs and the policy system wired
//! together, plus the turn loop, seeded random boosts and the autopilot.
//!
//! The civic graph drives the policy system through its event channel. When
//! a civic activates, slot capacities grow to that civic's grants, its cards
//! unlock and its governments become adoptable. The graph never borrows the
//! policy system directly; the listener holds shared handles instead.

use content::{ContentError, ContentPack};
use persistence::{PersistenceError, SessionSnapshot, SNAPSHOT_VERSION};
use prog_core::{
    validate_config, CardId, Government, NodeId, PolicyCategory, RestoreError, SessionConfig,
    ValidationError,
};
use prog_graph::{CivicGraph, GraphEvent, GraphKind, TechGraph};
use prog_policy::{EquipRejection, PolicyEvent, PolicySlotCardSystem};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::cell::{Cell, Ref, RefCell};
use std::collections::BTreeSet;
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Points produced in one turn.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TurnYields {
    /// Fed to the technology graph's current target.
    pub science: i64,
    /// Fed to the civic graph's current target.
    pub culture: i64,
}

/// What happened since the previous report, in event order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TurnReport {
    /// Turn number after the turn ended.
    pub turn: u32,
    /// Technologies activated, cascades included.
    pub technologies: Vec<NodeId>,
    /// Civics activated, cascades included.
    pub civics: Vec<NodeId>,
    /// Boosted nodes and the graph they belong to.
    pub boosts: Vec<(GraphKind, NodeId)>,
    /// Cards unlocked by civic activations.
    pub cards_unlocked: Vec<CardId>,
    /// Governments that became adoptable.
    pub governments_unlocked: Vec<Government>,
    /// Names of combos announced, repeats included.
    pub combos: Vec<String>,
}

impl TurnReport {
    pub fn is_quiet(&self) -> bool {
        self.technologies.is_empty()
            && self.civics.is_empty()
            && self.boosts.is_empty()
            && self.cards_unlocked.is_empty()
            && self.governments_unlocked.is_empty()
            && self.combos.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("snapshot was taken on content pack '{found}', session runs '{expected}'")]
    ContentMismatch { expected: String, found: String },
}

/// One player's progression state.
pub struct Session {
    content_id: String,
    config: SessionConfig,
    turn: u32,
    tech: TechGraph,
    civics: CivicGraph,
    policies: Rc<RefCell<PolicySlotCardSystem>>,
    government: Rc<Cell<Government>>,
    unlocked_governments: Rc<RefCell<BTreeSet<Government>>>,
    journal: Rc<RefCell<TurnReport>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("content_id", &self.content_id)
            .field("turn", &self.turn)
            .field("government", &self.government.get())
            .field("tech_activated", &self.tech.activated_ids().len())
            .field("civics_activated", &self.civics.activated_ids().len())
            .finish()
    }
}

impl Session {
    /// Build a fresh session on `pack`.
    pub fn new(pack: &ContentPack, config: SessionConfig) -> Result<Self, SessionError> {
        validate_config(&config)?;
        content::validate(pack)?;

        let government = Rc::new(Cell::new(config.starting_government));
        let unlocked_governments = Rc::new(RefCell::new(
            [Government::Chiefdom, config.starting_government]
                .into_iter()
                .collect::<BTreeSet<_>>(),
        ));
        let journal = Rc::new(RefCell::new(TurnReport::default()));

        let cards_by_node = pack.cards_by_node();
        let gov = Rc::clone(&government);
        let mut policies = PolicySlotCardSystem::new(
            pack.policies.clone(),
            pack.combos.clone(),
            move || gov.get(),
            move |node| cards_by_node.get(&node).cloned().unwrap_or_default(),
        )?;
        let log = Rc::clone(&journal);
        policies.subscribe(move |event| match event {
            PolicyEvent::CardUnlocked { id, .. } => log.borrow_mut().cards_unlocked.push(*id),
            PolicyEvent::ComboTriggered { name, .. } => log.borrow_mut().combos.push(name.clone()),
            PolicyEvent::Equipped { .. } | PolicyEvent::Unequipped { .. } => {}
        });
        let policies = Rc::new(RefCell::new(policies));

        let mut tech = TechGraph::new(GraphKind::Technology, pack.technologies.clone())?;
        let log = Rc::clone(&journal);
        tech.subscribe(move |event| match event {
            GraphEvent::Activated { id, .. } => log.borrow_mut().technologies.push(*id),
            GraphEvent::Boosted { id, .. } => {
                log.borrow_mut().boosts.push((GraphKind::Technology, *id))
            }
            GraphEvent::ProgressChanged { .. } => {}
        });

        let mut civics = CivicGraph::new(GraphKind::Civic, pack.civics.clone())?;
        let payloads = pack.civic_payloads();
        let log = Rc::clone(&journal);
        let system = Rc::clone(&policies);
        let adoptable = Rc::clone(&unlocked_governments);
        civics.subscribe(move |event| {
            let id = match event {
                GraphEvent::Activated { id, .. } => *id,
                GraphEvent::Boosted { id, .. } => {
                    log.borrow_mut().boosts.push((GraphKind::Civic, *id));
                    return;
                }
                GraphEvent::ProgressChanged { .. } => return,
            };
            log.borrow_mut().civics.push(id);
            let Some(payload) = payloads.get(&id) else {
                return;
            };
            {
                let mut system = system.borrow_mut();
                let grown = system.capacities().max_with(&payload.slot_grants);
                for category in PolicyCategory::ALL {
                    if grown.get(category) != system.capacity(category) {
                        system.set_capacity(category, grown.get(category));
                    }
                }
                system.unlock_cards_for_node(id);
            }
            for g in &payload.governments {
                if adoptable.borrow_mut().insert(*g) {
                    info!(government = ?g, civic = %id, "government unlocked");
                    log.borrow_mut().governments_unlocked.push(*g);
                }
            }
        });

        info!(pack = %pack.meta.id, seed = config.rng_seed, "session started");
        Ok(Self {
            content_id: pack.meta.id.clone(),
            config,
            turn: 0,
            tech,
            civics,
            policies,
            government,
            unlocked_governments,
            journal,
        })
    }

    /// Build a session on `pack` and restore `snapshot` into it.
    pub fn from_snapshot(
        pack: &ContentPack,
        config: SessionConfig,
        snapshot: &SessionSnapshot,
    ) -> Result<Self, SessionError> {
        let mut session = Self::new(
            pack,
            SessionConfig {
                rng_seed: snapshot.rng_seed,
                ..config
            },
        )?;
        session.restore(snapshot)?;
        Ok(session)
    }

    pub fn turn(&self) -> u32 {
        self.turn
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    pub fn tech(&self) -> &TechGraph {
        &self.tech
    }

    pub fn civics(&self) -> &CivicGraph {
        &self.civics
    }

    /// Borrow the policy system. Do not hold the guard across calls that
    /// mutate the session.
    pub fn policies(&self) -> Ref<'_, PolicySlotCardSystem> {
        self.policies.borrow()
    }

    pub fn government(&self) -> Government {
        self.government.get()
    }

    pub fn unlocked_governments(&self) -> BTreeSet<Government> {
        self.unlocked_governments.borrow().clone()
    }

    pub fn set_tech_target(&mut self, id: NodeId) -> bool {
        self.tech.set_current_target(id)
    }

    pub fn set_civic_target(&mut self, id: NodeId) -> bool {
        self.civics.set_current_target(id)
    }

    /// Eureka: grant the configured share of a technology's cost.
    pub fn boost_tech(&mut self, id: NodeId) -> bool {
        self.tech.add_boost(id, self.config.boost_fraction)
    }

    /// Inspiration: grant the configured share of a civic's cost.
    pub fn boost_civic(&mut self, id: NodeId) -> bool {
        self.civics.add_boost(id, self.config.boost_fraction)
    }

    pub fn try_equip(
        &mut self,
        card: CardId,
        category: PolicyCategory,
        slot: u8,
    ) -> Result<(), EquipRejection> {
        self.policies.borrow_mut().try_equip(card, category, slot)
    }

    pub fn equip(&mut self, card: CardId, category: PolicyCategory, slot: u8) -> bool {
        self.policies.borrow_mut().equip(card, category, slot)
    }

    pub fn unequip(&mut self, card: CardId) -> bool {
        self.policies.borrow_mut().unequip(card)
    }

    /// Adopt an unlocked government. Equipped cards stay in place even when
    /// they are not compatible with the new government.
    pub fn set_government(&mut self, government: Government) -> bool {
        if !self.unlocked_governments.borrow().contains(&government) {
            debug!(?government, "government not unlocked");
            return false;
        }
        if self.government.get() != government {
            info!(from = ?self.government.get(), to = ?government, "government changed");
            self.government.set(government);
        }
        true
    }

    /// Apply one turn of yields, roll random boosts and advance the counter.
    pub fn end_turn(&mut self, yields: TurnYields) -> TurnReport {
        self.tech.add_progress(yields.science);
        self.civics.add_progress(yields.culture);
        self.roll_boosts();
        self.turn += 1;
        let report = self.take_report();
        debug!(
            turn = report.turn,
            technologies = report.technologies.len(),
            civics = report.civics.len(),
            combos = report.combos.len(),
            "turn ended"
        );
        report
    }

    /// Pick targets where none is set, end the turn, then adopt the best new
    /// government and fill empty policy slots.
    pub fn autopilot_turn(&mut self, yields: TurnYields) -> TurnReport {
        if self.tech.current_target().is_none() {
            if let Some(pick) = prog_ai::pick_target(&self.tech) {
                self.tech.set_current_target(pick.id);
            }
        }
        if self.civics.current_target().is_none() {
            if let Some(pick) = prog_ai::pick_target(&self.civics) {
                self.civics.set_current_target(pick.id);
            }
        }
        let mut report = self.end_turn(yields);

        let unlocked = self.unlocked_governments();
        if let Some(g) = prog_ai::pick_government(&unlocked, self.government.get()) {
            self.set_government(g);
        }
        let plan = prog_ai::plan_policies(&self.policies.borrow());
        for m in plan {
            if !self.equip(m.card, m.category, m.slot) {
                warn!(card = %m.card, category = %m.category, slot = m.slot, "planned equip refused");
            }
        }
        let late = self.take_report();
        report.combos.extend(late.combos);
        report
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            content_id: self.content_id.clone(),
            turn: self.turn,
            rng_seed: self.config.rng_seed,
            government: self.government.get(),
            unlocked_governments: self.unlocked_governments.borrow().clone(),
            technology: self.tech.state(),
            civics: self.civics.state(),
            policies: self.policies.borrow().state(),
        }
    }

    /// Replace all mutable state with `snapshot`. On error the session is
    /// left as it was. No events are emitted.
    pub fn restore(&mut self, snapshot: &SessionSnapshot) -> Result<(), SessionError> {
        if snapshot.content_id != self.content_id {
            return Err(SessionError::ContentMismatch {
                expected: self.content_id.clone(),
                found: snapshot.content_id.clone(),
            });
        }
        if !snapshot.unlocked_governments.contains(&snapshot.government) {
            return Err(RestoreError::Inconsistent(format!(
                "government {:?} is not unlocked",
                snapshot.government
            ))
            .into());
        }
        let before = self.snapshot();
        if let Err(e) = self.restore_parts(snapshot) {
            if let Err(rollback) = self.restore_parts(&before) {
                warn!(%rollback, "rollback failed");
            }
            return Err(e.into());
        }
        self.turn = snapshot.turn;
        self.config.rng_seed = snapshot.rng_seed;
        self.government.set(snapshot.government);
        *self.unlocked_governments.borrow_mut() = snapshot.unlocked_governments.clone();
        *self.journal.borrow_mut() = TurnReport::default();
        info!(turn = self.turn, "session restored");
        Ok(())
    }

    /// Save a JSON snapshot to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SessionError> {
        persistence::save_json(path, &self.snapshot())?;
        Ok(())
    }

    /// Load a JSON snapshot from `path` into a fresh session on `pack`.
    pub fn load<P: AsRef<Path>>(
        pack: &ContentPack,
        config: SessionConfig,
        path: P,
    ) -> Result<Self, SessionError> {
        let snapshot = persistence::load_json(path)?;
        Self::from_snapshot(pack, config, &snapshot)
    }

    fn restore_parts(&mut self, snapshot: &SessionSnapshot) -> Result<(), RestoreError> {
        self.tech.restore(&snapshot.technology)?;
        self.civics.restore(&snapshot.civics)?;
        self.policies.borrow_mut().restore(&snapshot.policies)
    }

    /// Each graph independently rolls for a boost on a random unlockable
    /// node. The stream is derived from the seed and the turn number so a
    /// restored session rolls the same boosts.
    fn roll_boosts(&mut self) {
        let chance = self.config.boost_chance_per_turn;
        if chance <= 0.0 {
            return;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(
            self.config
                .rng_seed
                .wrapping_add(u64::from(self.turn).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        );
        let fraction = self.config.boost_fraction;
        if rng.gen::<f32>() < chance {
            if let Some(id) = self.tech.unlockable_ids().choose(&mut rng).copied() {
                self.tech.add_boost(id, fraction);
            }
        }
        if rng.gen::<f32>() < chance {
            if let Some(id) = self.civics.unlockable_ids().choose(&mut rng).copied() {
                self.civics.add_boost(id, fraction);
            }
        }
    }

    fn take_report(&mut self) -> TurnReport {
        let mut report = std::mem::take(&mut *self.journal.borrow_mut());
        report.turn = self.turn;
        report
    }
}
