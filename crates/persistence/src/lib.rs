#![deny(warnings)]

//! Persistence layer: session snapshots in JSON (saves) and bincode (compact).
//!
//! A snapshot holds only mutable state. Static content (node costs, card
//! catalog) is reloaded from the content pack and the snapshot is restored on
//! top of it.

use prog_core::Government;
use prog_graph::GraphState;
use prog_policy::PolicyState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to resume a session on the same content pack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    /// Content pack the snapshot was taken against.
    pub content_id: String,
    pub turn: u32,
    pub rng_seed: u64,
    pub government: Government,
    pub unlocked_governments: BTreeSet<Government>,
    pub technology: GraphState,
    pub civics: GraphState,
    pub policies: PolicyState,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("unsupported snapshot version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
}

/// Returns the default path used for local saves.
pub fn default_save_path() -> &'static str {
    "./saves/session.json"
}

/// Leading field shared by every snapshot version.
#[derive(Deserialize)]
struct Header {
    version: u32,
}

fn check_version(version: u32) -> Result<(), PersistenceError> {
    if version != SNAPSHOT_VERSION {
        return Err(PersistenceError::Version {
            found: version,
            expected: SNAPSHOT_VERSION,
        });
    }
    Ok(())
}

pub fn to_json(snap: &SessionSnapshot) -> Result<String, PersistenceError> {
    Ok(serde_json::to_string_pretty(snap)?)
}

/// Decode a JSON save. The version is checked before the body, so a save
/// from another format version fails with [`PersistenceError::Version`].
pub fn from_json(text: &str) -> Result<SessionSnapshot, PersistenceError> {
    let header: Header = serde_json::from_str(text)?;
    check_version(header.version)?;
    Ok(serde_json::from_str(text)?)
}

pub fn to_bincode(snap: &SessionSnapshot) -> Result<Vec<u8>, PersistenceError> {
    Ok(bincode::serialize(snap)?)
}

/// Decode a bincode save; `version` is the leading `u32`.
pub fn from_bincode(bytes: &[u8]) -> Result<SessionSnapshot, PersistenceError> {
    let version: u32 = bincode::deserialize(bytes)?;
    check_version(version)?;
    Ok(bincode::deserialize(bytes)?)
}

/// Write a JSON save, creating parent directories as needed.
pub fn save_json<P: AsRef<Path>>(path: P, snap: &SessionSnapshot) -> Result<(), PersistenceError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, to_json(snap)?)?;
    info!(path = %path.display(), turn = snap.turn, "session saved");
    Ok(())
}

pub fn load_json<P: AsRef<Path>>(path: P) -> Result<SessionSnapshot, PersistenceError> {
    let path = path.as_ref();
    let snap = from_json(&fs::read_to_string(path)?)?;
    info!(path = %path.display(), turn = snap.turn, "session loaded");
    Ok(snap)
}
