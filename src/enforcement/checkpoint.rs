// src/enforcement/checkpoint.rs
//!
//! Snapshots of the applied artifact set, taken before every update so the
//! watchdog can roll back to the last configuration that worked.
//!
//! Each checkpoint is one JSON file `<seq>-<label>.json` in the checkpoint
//! directory. The zero-padded sequence number gives creation order; files
//! still carrying the temporary-write marker are never listed.

use super::applier::EnforcementApplier;
use super::state::{AgentState, EnforcementState};
use crate::error::{AgentError, Result};
use crate::persist::{TEMP_MARKER, read_json, write_json};
use crate::policy::compiler::CompiledArtifact;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckpointId(pub u64);

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub state: EnforcementState,
    pub firewall_active: bool,
    /// `None` when nothing had been applied yet.
    pub artifact: Option<CompiledArtifact>,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Captures the currently applied artifacts and state.
    pub fn save(&self, label: &str, current: &AgentState) -> Result<CheckpointId> {
        let id = CheckpointId(self.latest()?.map(|id| id.0 + 1).unwrap_or(1));
        let checkpoint = Checkpoint {
            id,
            label: label.to_string(),
            created_at: Utc::now(),
            state: current.state,
            firewall_active: current.firewall_active,
            artifact: current.applied.clone(),
        };
        let path = self.dir.join(file_name(id, label));
        write_json(&path, &checkpoint).map_err(|e| {
            AgentError::CheckpointError(format!("Failed to write {}: {}", path.display(), e))
        })?;
        log::debug!("Saved checkpoint {} ({})", id, label);
        Ok(id)
    }

    /// Checkpoint ids, oldest first.
    pub fn list(&self) -> Result<Vec<CheckpointId>> {
        Ok(self.entries()?.into_iter().map(|(id, _)| id).collect())
    }

    pub fn latest(&self) -> Result<Option<CheckpointId>> {
        Ok(self.list()?.pop())
    }

    pub fn load(&self, id: CheckpointId) -> Result<Checkpoint> {
        let path = self
            .entries()?
            .into_iter()
            .find(|(candidate, _)| *candidate == id)
            .map(|(_, path)| path)
            .ok_or_else(|| AgentError::CheckpointError(format!("Checkpoint {} not found", id)))?;
        read_json::<Checkpoint>(&path)
            .map_err(|e| AgentError::CheckpointError(format!("Corrupt checkpoint {}: {}", id, e)))?
            .ok_or_else(|| AgentError::CheckpointError(format!("Checkpoint {} vanished", id)))
    }

    /// Re-applies checkpoint `id`. `Ok(false)` means the artifacts went in
    /// but the resolver still fails verification.
    pub fn restore(&self, id: CheckpointId, applier: &EnforcementApplier) -> Result<bool> {
        let checkpoint = self.load(id)?;
        let artifact = checkpoint.artifact.as_ref().ok_or_else(|| {
            AgentError::CheckpointError(format!("Checkpoint {} holds no artifacts", id))
        })?;
        log::info!("Restoring checkpoint {} ({})", id, checkpoint.label);
        let report = applier.apply_all(artifact, checkpoint.firewall_active)?;
        Ok(report.healthy())
    }

    /// Removes all but the newest `keep` checkpoints.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let entries = self.entries()?;
        let excess = entries.len().saturating_sub(keep);
        for (id, path) in entries.into_iter().take(excess) {
            fs::remove_file(&path).map_err(|e| {
                AgentError::CheckpointError(format!("Failed to prune {}: {}", id, e))
            })?;
        }
        Ok(excess)
    }

    fn entries(&self) -> Result<Vec<(CheckpointId, PathBuf)>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut entries: Vec<(CheckpointId, PathBuf)> = read_dir
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                parse_file_name(&name).map(|id| (id, entry.path()))
            })
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        Ok(entries)
    }
}

fn file_name(id: CheckpointId, label: &str) -> String {
    let label: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{:020}-{}.json", id.0, label)
}

fn parse_file_name(name: &str) -> Option<CheckpointId> {
    if name.contains(TEMP_MARKER) {
        return None;
    }
    let stem = name.strip_suffix(".json")?;
    let (seq, _label) = stem.split_once('-')?;
    seq.parse().ok().map(CheckpointId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_sanitizes_label() {
        assert_eq!(
            file_name(CheckpointId(7), "pre update/x"),
            "00000000000000000007-pre_update_x.json"
        );
        assert_eq!(
            parse_file_name("00000000000000000007-pre_update_x.json"),
            Some(CheckpointId(7))
        );
    }

    #[test]
    fn test_temp_files_are_not_checkpoints() {
        assert_eq!(
            parse_file_name("00000000000000000003-pre-update.json.tmp.42.1"),
            None
        );
        assert_eq!(parse_file_name("notes.txt"), None);
    }
}
