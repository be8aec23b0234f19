use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

use super::OutcomePool;

/// Serialized form of the entropy engine, written to its own JSON
/// file independently of the relational scoring state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntropySnapshot {
    pub current_day: usize,
    pub game_pools: BTreeMap<i64, BTreeMap<i64, OutcomePool>>,
    pub closed_games: Vec<i64>,
    pub game_close_times: BTreeMap<i64, DateTime<Utc>>,
    pub ebdr_scores: Vec<f64>,
}

/// Read a snapshot if the file exists. `Ok(None)` means no file;
/// parse and IO problems surface as errors for the caller to log.
pub fn read_snapshot(path: &Path) -> AppResult<Option<EntropySnapshot>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    let snapshot = serde_json::from_str(&raw)?;
    Ok(Some(snapshot))
}

/// Write the snapshot via a temp file + rename so a crash mid-write
/// never leaves a truncated state file behind.
pub fn write_snapshot(path: &Path, snapshot: &EntropySnapshot) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let raw = serde_json::to_string(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, raw)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
