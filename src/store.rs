//! Snapshot Store (spec §4.E, §6): a single `state.json` document holding
//! the live Instance set plus an orthogonal app-state object.
//!
//! Grounded on `ccm-daemon/src/persistence.rs`'s save/load shape, collapsed
//! from that file's per-session-directory scheme (`meta.json` +
//! `history.bin` under `~/.ccm/sessions/<id>/`) into the single JSON-array
//! file spec §4.E pins explicitly.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// `status` as persisted — spec §6 pins the exact integer encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum InstanceStatus {
    Running,
    Ready,
    Loading,
    Paused,
}

impl From<InstanceStatus> for i32 {
    fn from(s: InstanceStatus) -> i32 {
        match s {
            InstanceStatus::Running => 0,
            InstanceStatus::Ready => 1,
            InstanceStatus::Loading => 2,
            InstanceStatus::Paused => 3,
        }
    }
}

impl TryFrom<i32> for InstanceStatus {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(InstanceStatus::Running),
            1 => Ok(InstanceStatus::Ready),
            2 => Ok(InstanceStatus::Loading),
            3 => Ok(InstanceStatus::Paused),
            other => Err(format!("unknown instance status code {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeDescriptor {
    pub repo_path: PathBuf,
    pub worktree_path: PathBuf,
    pub session_name: String,
    pub branch_name: String,
    pub base_commit_sha: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiffStatsRecord {
    pub added: usize,
    pub removed: usize,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub title: String,
    pub path: PathBuf,
    pub branch: String,
    pub status: InstanceStatus,
    pub height: u16,
    pub width: u16,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub auto_yes: bool,
    pub program: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub worktree: Option<WorktreeDescriptor>,
    #[serde(default)]
    pub diff_stats: DiffStatsRecord,
}

/// Bitmask of help screens the user has already seen (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppState {
    #[serde(default)]
    pub help_screens_seen: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct StateFile {
    #[serde(default)]
    instances: Vec<SnapshotRecord>,
    #[serde(default)]
    app_state: AppState,
}

/// Single-writer JSON document store under `<config_dir>/state.json`.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read(&self) -> Result<StateFile, StoreError> {
        if !self.path.exists() {
            return Ok(StateFile::default());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|e| StoreError::ReadFile {
            path: self.path.clone(),
            source: e,
        })?;
        if raw.trim().is_empty() {
            return Ok(StateFile::default());
        }
        serde_json::from_str(&raw).map_err(StoreError::from)
    }

    fn write(&self, state: &StateFile) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::CreateDir)?;
        }
        let serialized = serde_json::to_string_pretty(state)?;
        std::fs::write(&self.path, serialized).map_err(|e| StoreError::WriteFile {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Overwrite with the serialized array (only Started Instances).
    pub fn save_instances(&self, records: &[SnapshotRecord]) -> Result<(), StoreError> {
        let mut state = self.read()?;
        state.instances = records.to_vec();
        self.write(&state)
    }

    pub fn load_instances(&self) -> Result<Vec<SnapshotRecord>, StoreError> {
        Ok(self.read()?.instances)
    }

    /// Rewrite excluding one entry; fails if the title is unknown.
    pub fn delete_instance(&self, title: &str) -> Result<(), StoreError> {
        let mut state = self.read()?;
        let before = state.instances.len();
        state.instances.retain(|r| r.title != title);
        if state.instances.len() == before {
            return Err(StoreError::NotFound(title.to_string()));
        }
        self.write(&state)
    }

    pub fn delete_all_instances(&self) -> Result<(), StoreError> {
        let mut state = self.read()?;
        state.instances.clear();
        self.write(&state)
    }

    pub fn load_app_state(&self) -> Result<AppState, StoreError> {
        Ok(self.read()?.app_state)
    }

    pub fn save_app_state(&self, app_state: AppState) -> Result<(), StoreError> {
        let mut state = self.read()?;
        state.app_state = app_state;
        self.write(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_record(title: &str) -> SnapshotRecord {
        let now = chrono::Utc::now();
        SnapshotRecord {
            title: title.to_string(),
            path: PathBuf::from("/tmp/repo"),
            branch: format!("session/{title}"),
            status: InstanceStatus::Running,
            height: 24,
            width: 80,
            created_at: now,
            updated_at: now,
            auto_yes: false,
            program: "claude".to_string(),
            worktree: None,
            diff_stats: DiffStatsRecord::default(),
        }
    }

    #[test]
    fn round_trips_instances() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));

        let records = vec![sample_record("demo"), sample_record("other")];
        store.save_instances(&records).unwrap();

        let loaded = store.load_instances().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].title, "demo");
    }

    #[test]
    fn delete_unknown_title_errors() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));
        store.save_instances(&[sample_record("demo")]).unwrap();

        let err = store.delete_instance("nope").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn delete_known_title_removes_only_that_entry() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));
        store
            .save_instances(&[sample_record("demo"), sample_record("other")])
            .unwrap();

        store.delete_instance("demo").unwrap();
        let remaining = store.load_instances().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].title, "other");
    }

    #[test]
    fn app_state_persists_independently_of_instances() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("state.json"));
        store.save_instances(&[sample_record("demo")]).unwrap();
        store
            .save_app_state(AppState {
                help_screens_seen: 0b101,
            })
            .unwrap();

        assert_eq!(store.load_instances().unwrap().len(), 1);
        assert_eq!(store.load_app_state().unwrap().help_screens_seen, 0b101);
    }

    #[test]
    fn status_encodes_to_spec_pinned_integers() {
        assert_eq!(i32::from(InstanceStatus::Running), 0);
        assert_eq!(i32::from(InstanceStatus::Ready), 1);
        assert_eq!(i32::from(InstanceStatus::Loading), 2);
        assert_eq!(i32::from(InstanceStatus::Paused), 3);
    }
}
