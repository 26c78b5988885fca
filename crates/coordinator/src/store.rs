//! Checkpoint persistence.
//!
//! A store maps run ids to serialized snapshots. Writes are atomic per key;
//! the engine guarantees a single writer per run id.

use async_trait::async_trait;
use scanue_common::{Result, ScanueError, WorkflowState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Version written into every snapshot.
pub const SCHEMA_VERSION: u32 = 1;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn put(&self, run_id: &str, snapshot: Vec<u8>) -> Result<()>;

    /// Fails with `NotFound` when nothing is stored under `run_id`.
    async fn get(&self, run_id: &str) -> Result<Vec<u8>>;

    /// Every stored run id, in no particular order.
    async fn run_ids(&self) -> Result<Vec<String>>;
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    schema_version: u32,
    state: &'a WorkflowState,
}

#[derive(Deserialize)]
struct Snapshot {
    schema_version: u32,
    state: WorkflowState,
}

pub fn encode_snapshot(state: &WorkflowState) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&SnapshotRef {
        schema_version: SCHEMA_VERSION,
        state,
    })?)
}

/// Decode a snapshot for an engine running `specialists`.
///
/// Results for specialists that are no longer configured are dropped; newly
/// configured specialists simply have no result yet.
pub fn decode_snapshot(bytes: &[u8], specialists: &[String]) -> Result<WorkflowState> {
    let snapshot: Snapshot = serde_json::from_slice(bytes)?;
    if snapshot.schema_version > SCHEMA_VERSION {
        return Err(ScanueError::Store(format!(
            "snapshot schema version {} is newer than supported version {}",
            snapshot.schema_version, SCHEMA_VERSION
        )));
    }

    let mut state = snapshot.state;
    state.retain_specialists(specialists);
    Ok(state)
}

/// Process-local store, mostly for tests.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    snapshots: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, run_id: &str, snapshot: Vec<u8>) -> Result<()> {
        self.snapshots
            .write()
            .await
            .insert(run_id.to_string(), snapshot);
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Vec<u8>> {
        self.snapshots
            .read()
            .await
            .get(run_id)
            .cloned()
            .ok_or_else(|| ScanueError::NotFound(run_id.to_string()))
    }

    async fn run_ids(&self) -> Result<Vec<String>> {
        Ok(self.snapshots.read().await.keys().cloned().collect())
    }
}

/// One JSON file per run under a directory.
///
/// Each write goes to a temporary file that is then renamed over the old
/// snapshot, so readers see either the previous or the new version.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Open (and create if needed) the snapshot directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Opened file checkpoint store");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> Result<PathBuf> {
        validate_run_id(run_id)?;
        Ok(self.dir.join(format!("{run_id}.json")))
    }
}

/// Run ids become file names, so only `[A-Za-z0-9_-]` is accepted.
fn validate_run_id(run_id: &str) -> Result<()> {
    let valid = !run_id.is_empty()
        && run_id.len() <= 128
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ScanueError::Store(format!("invalid run id: {run_id:?}")))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, run_id: &str, snapshot: Vec<u8>) -> Result<()> {
        let path = self.path_for(run_id)?;
        let tmp = path.with_extension("json.tmp");

        tokio::fs::write(&tmp, &snapshot).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(run_id, bytes = snapshot.len(), "Snapshot written");
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(run_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ScanueError::NotFound(run_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn run_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".json")) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }
}
