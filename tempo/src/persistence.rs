use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use tempo_ipc::StoredSnapshot;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Durable home of the timer snapshot.
pub trait SnapshotStore: Send + 'static {
    /// Queue a write. Must not block; failures are the store's problem.
    fn save(&self, snapshot: StoredSnapshot);
}

/// JSON file store with a single background writer.
///
/// Writes leave in the order they were queued, so an older snapshot can
/// never land after a newer one.
pub struct Persistence {
    tx: mpsc::UnboundedSender<StoredSnapshot>,
}

impl Persistence {
    pub fn default_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "tempo", "tempo")
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

        Ok(proj_dirs.data_dir().join("state.json"))
    }

    pub fn load(path: &Path) -> Result<Option<StoredSnapshot>> {
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot at {:?}", path))?;
        let snapshot = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse snapshot at {:?}", path))?;
        Ok(Some(snapshot))
    }

    /// Load for startup. A broken snapshot only costs the last known
    /// countdown, so it is logged and treated as missing.
    pub fn recover(path: &Path) -> Option<StoredSnapshot> {
        match Self::load(path) {
            Ok(recovered) => recovered,
            Err(e) => {
                warn!("Ignoring unreadable snapshot: {:#}", e);
                None
            }
        }
    }

    /// Start the writer task. The task ends once the store is dropped and
    /// every queued write has been handled.
    pub fn open(path: PathBuf) -> Result<(Self, JoinHandle<()>)> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {:?}", parent))?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(path, rx));
        Ok((Self { tx }, writer))
    }
}

impl SnapshotStore for Persistence {
    fn save(&self, snapshot: StoredSnapshot) {
        if self.tx.send(snapshot).is_err() {
            warn!("Snapshot writer has stopped, dropping write");
        }
    }
}

async fn write_loop(path: PathBuf, mut rx: mpsc::UnboundedReceiver<StoredSnapshot>) {
    while let Some(mut snapshot) = rx.recv().await {
        // Behind? Only the newest queued record matters.
        while let Ok(newer) = rx.try_recv() {
            snapshot = newer;
        }
        if let Err(e) = write_atomic(&path, &snapshot).await {
            warn!("Failed to persist timer snapshot: {:#}", e);
        }
    }
    debug!("Snapshot writer finished");
}

async fn write_atomic(path: &Path, snapshot: &StoredSnapshot) -> Result<()> {
    let json = serde_json::to_vec_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("Failed to write {:?}", tmp))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move snapshot into {:?}", path))?;
    Ok(())
}

#[cfg(test)]
pub(crate) use memory::MemoryStore;
