#![deny(warnings)]

//! Content packs: YAML definitions for both graphs and the policy catalog.
//!
//! A pack is a directory holding `pack.yaml`, `technology.yaml`,
//! `civics.yaml` and `policies.yaml`. A built-in pack is compiled into the
//! crate so the engine can run without any files on disk.

use prog_core::{
    validate_catalog, validate_graph, CardId, CivicPayload, NodeDef, NodeId, PolicyCardDef,
    PolicyCombo, TechPayload, ValidationError,
};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Schema version this build understands.
pub const SCHEMA_VERSION: u32 = 1;

/// Metadata for a content pack.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackMeta {
    pub id: String,
    pub name: String,
    pub version: String,
    pub schema_version: u32,
    #[serde(default)]
    pub description: Option<String>,
}

/// Fully parsed and validated content.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentPack {
    pub meta: PackMeta,
    pub technologies: Vec<NodeDef<TechPayload>>,
    pub civics: Vec<NodeDef<CivicPayload>>,
    pub policies: Vec<PolicyCardDef>,
    pub combos: Vec<PolicyCombo>,
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    cards: Vec<PolicyCardDef>,
    #[serde(default)]
    combos: Vec<PolicyCombo>,
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("io error reading {file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{file}: {message}")]
    Yaml { file: String, message: String },
    #[error("pack schema version {found} is not supported (expected {expected})")]
    Schema { found: u32, expected: u32 },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

const BUILTIN_PACK: &str = include_str!("../../../assets/content/pack.yaml");
const BUILTIN_TECHNOLOGY: &str = include_str!("../../../assets/content/technology.yaml");
const BUILTIN_CIVICS: &str = include_str!("../../../assets/content/civics.yaml");
const BUILTIN_POLICIES: &str = include_str!("../../../assets/content/policies.yaml");

/// The pack shipped with the engine.
pub fn builtin() -> Result<ContentPack, ContentError> {
    parse(
        BUILTIN_PACK,
        BUILTIN_TECHNOLOGY,
        BUILTIN_CIVICS,
        BUILTIN_POLICIES,
    )
}

/// Load and validate a pack directory.
pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<ContentPack, ContentError> {
    let dir = dir.as_ref();
    let read = |name: &str| {
        let path = dir.join(name);
        fs::read_to_string(&path).map_err(|source| ContentError::Io {
            file: path.display().to_string(),
            source,
        })
    };
    let pack = parse(
        &read("pack.yaml")?,
        &read("technology.yaml")?,
        &read("civics.yaml")?,
        &read("policies.yaml")?,
    )?;
    info!(pack = %pack.meta.id, dir = %dir.display(), "content pack loaded");
    Ok(pack)
}

fn yaml<T: serde::de::DeserializeOwned>(file: &str, text: &str) -> Result<T, ContentError> {
    serde_yaml::from_str(text).map_err(|e| ContentError::Yaml {
        file: file.to_string(),
        message: e.to_string(),
    })
}

/// Parse the four pack documents and validate the result.
pub fn parse(
    pack: &str,
    technology: &str,
    civics: &str,
    policies: &str,
) -> Result<ContentPack, ContentError> {
    let meta: PackMeta = yaml("pack.yaml", pack)?;
    if meta.schema_version != SCHEMA_VERSION {
        return Err(ContentError::Schema {
            found: meta.schema_version,
            expected: SCHEMA_VERSION,
        });
    }
    let technologies: Vec<NodeDef<TechPayload>> = yaml("technology.yaml", technology)?;
    let civics: Vec<NodeDef<CivicPayload>> = yaml("civics.yaml", civics)?;
    let policy_file: PolicyFile = yaml("policies.yaml", policies)?;
    let pack = ContentPack {
        meta,
        technologies,
        civics,
        policies: policy_file.cards,
        combos: policy_file.combos,
    };
    validate(&pack)?;
    debug!(
        technologies = pack.technologies.len(),
        civics = pack.civics.len(),
        cards = pack.policies.len(),
        combos = pack.combos.len(),
        "content pack parsed"
    );
    Ok(pack)
}

/// Structural checks on each part plus cross-references between civics and
/// cards: every card a civic lists must exist and name that civic as its
/// source, and every sourced card must be listed by its civic.
pub fn validate(pack: &ContentPack) -> Result<(), ValidationError> {
    validate_graph(&pack.technologies)?;
    validate_graph(&pack.civics)?;
    validate_catalog(&pack.policies, &pack.combos)?;

    let cards: BTreeMap<CardId, &PolicyCardDef> =
        pack.policies.iter().map(|c| (c.id, c)).collect();
    let civic_ids: BTreeSet<NodeId> = pack.civics.iter().map(|n| n.id).collect();
    let mut listed: BTreeSet<(CardId, NodeId)> = BTreeSet::new();
    for civic in &pack.civics {
        for card in &civic.payload.policy_cards {
            let def = cards.get(card).ok_or_else(|| ValidationError::UnknownCard {
                context: format!("civic '{}'", civic.name),
                card: *card,
            })?;
            if def.source != Some(civic.id) {
                return Err(ValidationError::CardSourceMismatch {
                    card: *card,
                    node: civic.id,
                });
            }
            listed.insert((*card, civic.id));
        }
    }
    for def in &pack.policies {
        if let Some(node) = def.source {
            if !civic_ids.contains(&node) || !listed.contains(&(def.id, node)) {
                return Err(ValidationError::CardSourceMismatch { card: def.id, node });
            }
        }
    }
    Ok(())
}

impl ContentPack {
    /// Cards unlocked by each civic node, in payload order.
    pub fn cards_by_node(&self) -> BTreeMap<NodeId, Vec<CardId>> {
        self.civics
            .iter()
            .filter(|n| !n.payload.policy_cards.is_empty())
            .map(|n| (n.id, n.payload.policy_cards.clone()))
            .collect()
    }

    /// Civic payloads keyed by node id.
    pub fn civic_payloads(&self) -> BTreeMap<NodeId, CivicPayload> {
        self.civics
            .iter()
            .map(|n| (n.id, n.payload.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prog_core::{Government, PolicyCategory};

    #[test]
    fn builtin_pack_is_valid() {
        let pack = builtin().unwrap();
        assert_eq!(pack.meta.schema_version, SCHEMA_VERSION);
        assert!(!pack.technologies.is_empty());
        assert!(!pack.civics.is_empty());
        assert!(pack.policies.iter().any(|c| c.source.is_none()));
        let code_of_laws = &pack.civics[0];
        assert_eq!(code_of_laws.payload.slot_grants.get(PolicyCategory::Military), 1);
        assert!(pack
            .civics
            .iter()
            .any(|c| c.payload.governments.contains(&Government::Theocracy)));
    }

    #[test]
    fn cards_by_node_matches_sources() {
        let pack = builtin().unwrap();
        for (node, cards) in pack.cards_by_node() {
            for card in cards {
                let def = pack.policies.iter().find(|c| c.id == card).unwrap();
                assert_eq!(def.source, Some(node));
            }
        }
    }

    #[test]
    fn rejects_unknown_schema() {
        let err = parse(
            "id: x\nname: X\nversion: '1'\nschema_version: 9\n",
            "[]",
            "[]",
            "cards: []\n",
        )
        .unwrap_err();
        assert!(matches!(err, ContentError::Schema { found: 9, .. }));
    }

    #[test]
    fn rejects_source_mismatch() {
        let civics = "- id: 1\n  name: A\n  cost: 5\n  payload:\n    policy_cards: [1]\n";
        let cards = "cards:\n  - id: 1\n    name: C\n    category: Military\n    source: 2\n";
        let err = parse(BUILTIN_PACK, "[]", civics, cards).unwrap_err();
        assert!(matches!(
            err,
            ContentError::Validation(ValidationError::CardSourceMismatch { .. })
        ));

        let unlisted = "cards:\n  - id: 1\n    name: C\n    category: Military\n    source: 1\n";
        let civics = "- id: 1\n  name: A\n  cost: 5\n";
        let err = parse(BUILTIN_PACK, "[]", civics, unlisted).unwrap_err();
        assert!(matches!(
            err,
            ContentError::Validation(ValidationError::CardSourceMismatch { .. })
        ));
    }

    #[test]
    fn reports_yaml_errors_with_file_name() {
        let err = parse(BUILTIN_PACK, "- id: [", "[]", "cards: []").unwrap_err();
        match err {
            ContentError::Yaml { file, .. } => assert_eq!(file, "technology.yaml"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn load_dir_reads_all_four_files() {
        let dir = std::env::temp_dir().join(format!("prog-content-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("pack.yaml"), BUILTIN_PACK).unwrap();
        fs::write(dir.join("technology.yaml"), BUILTIN_TECHNOLOGY).unwrap();
        fs::write(dir.join("civics.yaml"), BUILTIN_CIVICS).unwrap();
        fs::write(dir.join("policies.yaml"), BUILTIN_POLICIES).unwrap();
        let pack = load_dir(&dir).unwrap();
        assert_eq!(pack, builtin().unwrap());
        fs::remove_file(dir.join("policies.yaml")).unwrap();
        assert!(matches!(load_dir(&dir), Err(ContentError::Io { .. })));
        let _ = fs::remove_dir_all(&dir);
    }
}
