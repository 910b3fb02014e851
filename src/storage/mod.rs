//! Atomic, crash-safe, profile-isolated persistence of the session graph.
//!
//! Save protocol: write `.tmp` (mode 0600) → fsync (warn-only) → rotate
//! backups → rename. Load falls back through the backup generations on
//! parse errors. Stale `.tmp` files are swept on startup.

mod watcher;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::ProfilePaths;
use crate::error::{DeckError, Result};
use crate::session::{DEFAULT_GROUP, Group, InstanceRecord};

pub use watcher::StorageWatcher;

pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub instances: Vec<InstanceRecord>,
    pub groups: Vec<Group>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

pub struct Storage {
    paths: ProfilePaths,
    backup_count: usize,
}

impl Storage {
    pub fn new(paths: ProfilePaths, backup_count: usize) -> Self {
        Self {
            paths,
            backup_count,
        }
    }

    pub fn paths(&self) -> &ProfilePaths {
        &self.paths
    }

    /// Sweep `.tmp` leftovers from interrupted writes. Call once at
    /// process start, before the first load.
    pub async fn init(&self) -> Result<()> {
        self.paths.ensure_dirs().await?;
        for dir in [&self.paths.profile_dir, &self.paths.observations_dir] {
            let Ok(mut entries) = fs::read_dir(dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "tmp") {
                    debug!(path = %path.display(), "removing interrupted write");
                    let _ = fs::remove_file(&path).await;
                }
            }
        }
        Ok(())
    }

    /// The canonical write path. A groups-less save does not exist: it
    /// would lose group topology.
    pub async fn save_with_groups(
        &self,
        instances: &[InstanceRecord],
        groups: &[Group],
    ) -> Result<()> {
        let snapshot = Snapshot {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            instances: instances.to_vec(),
            groups: groups.to_vec(),
            extra: serde_json::Map::new(),
        };
        let payload = serde_json::to_vec_pretty(&snapshot)?;
        self.write_rotated(&self.paths.sessions_file(), &payload)
            .await
    }

    /// Atomic write with backup rotation. On any failure before the
    /// rename, the previous file is untouched.
    async fn write_rotated(&self, path: &Path, payload: &[u8]) -> Result<()> {
        let tmp_path = tmp_sibling(path);
        write_owner_only(&tmp_path, payload).await?;
        fsync_best_effort(&tmp_path).await;
        self.rotate_backups(path).await;
        finalize_rename(&tmp_path, path).await
    }

    /// Shift `backups/<file>.{n}` up by one and move the current file to
    /// generation 1. Oldest generation falls off the end.
    async fn rotate_backups(&self, path: &Path) {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        if !path.exists() {
            return;
        }

        for generation in (1..self.backup_count).rev() {
            let from = self.paths.backup_file(file_name, generation);
            let to = self.paths.backup_file(file_name, generation + 1);
            if from.exists() {
                let _ = fs::rename(&from, &to).await;
            }
        }
        let first = self.paths.backup_file(file_name, 1);
        if let Err(e) = fs::copy(path, &first).await {
            warn!(error = %e, "backup rotation failed");
        }
    }

    /// Load the snapshot, falling back through backups on parse errors.
    /// A missing file is an empty deck, not an error. Sessions referencing
    /// a missing group are re-parented to the default group.
    pub async fn load(&self) -> Result<Snapshot> {
        let primary = self.paths.sessions_file();
        if !primary.exists() {
            return Ok(Snapshot {
                schema_version: SCHEMA_VERSION,
                saved_at: Utc::now(),
                instances: Vec::new(),
                groups: Vec::new(),
                extra: serde_json::Map::new(),
            });
        }

        let mut candidates = vec![primary.clone()];
        let file_name = "sessions.json";
        for generation in 1..=self.backup_count {
            candidates.push(self.paths.backup_file(file_name, generation));
        }

        let mut last_err: Option<DeckError> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            if !candidate.exists() {
                continue;
            }
            match read_snapshot(candidate).await {
                Ok(mut snapshot) => {
                    if i > 0 {
                        warn!(
                            backup = %candidate.display(),
                            "sessions.json corrupted, recovered from backup"
                        );
                    }
                    reparent_orphans(&mut snapshot);
                    return Ok(snapshot);
                }
                Err(e) => {
                    warn!(path = %candidate.display(), error = %e, "snapshot unreadable");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| DeckError::Corrupted { path: primary }))
    }
}

async fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let data = fs::read(path).await?;
    Ok(serde_json::from_slice(&data)?)
}

/// Orphaned sessions are kept, not dropped: they move to the default
/// group.
fn reparent_orphans(snapshot: &mut Snapshot) {
    let known: std::collections::HashSet<&str> =
        snapshot.groups.iter().map(|g| g.path.as_str()).collect();
    for record in &mut snapshot.instances {
        if record.group_path != DEFAULT_GROUP && !known.contains(record.group_path.as_str()) {
            warn!(
                session = %record.id,
                group = %record.group_path,
                "group missing, re-parenting to default"
            );
            record.group_path = DEFAULT_GROUP.to_string();
        }
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Shared tmp → fsync(warn-only) → rename protocol for side files that do
/// not carry backup generations (watch goals, observations).
pub async fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    let tmp_path = tmp_sibling(path);
    write_owner_only(&tmp_path, payload).await?;
    fsync_best_effort(&tmp_path).await;
    finalize_rename(&tmp_path, path).await
}

/// fsync before rename; a failed sync still leaves rename safer than an
/// in-place write.
async fn fsync_best_effort(tmp_path: &Path) {
    let sync_target = tmp_path.to_path_buf();
    let synced = tokio::task::spawn_blocking(move || {
        std::fs::File::open(&sync_target).and_then(|file| file.sync_all())
    })
    .await;
    match synced {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "fsync failed on temp file"),
        Err(e) => warn!(error = %e, "fsync task failed"),
    }
}

async fn finalize_rename(tmp_path: &Path, path: &Path) -> Result<()> {
    fs::rename(tmp_path, path)
        .await
        .map_err(|e| DeckError::Storage(format!("failed to finalize {}: {e}", path.display())))?;
    debug!(path = %path.display(), "atomic write completed");
    Ok(())
}

#[cfg(unix)]
async fn write_owner_only(path: &Path, payload: &[u8]) -> Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let path = path.to_path_buf();
    let payload = payload.to_vec();
    tokio::task::spawn_blocking(move || -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)?;
        file.write_all(&payload)?;
        Ok(())
    })
    .await
    .map_err(|e| DeckError::Storage(format!("write task failed: {e}")))?
}

#[cfg(not(unix))]
async fn write_owner_only(path: &Path, payload: &[u8]) -> Result<()> {
    fs::write(path, payload).await?;
    Ok(())
}
