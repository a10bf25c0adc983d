//! Purpose: Persist session namespaces as one snapshot file per session key.
//! Exports: `StateStore`, `Snapshot`, `SnapshotInfo`, `SNAPSHOT_SCHEMA`.
//! Role: Durable boundary between in-memory sessions and the state directory.
//! Invariants: Saves are atomic (temp file, fsync, rename); readers never see partial files.
//! Invariants: Unparseable files or unknown schemas load as `Corrupt`, never as data.
//! Invariants: A state-dir path that exists but is not a directory is `InvalidStateDir`.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::error::{Error, ErrorKind, map_io_error_kind};
use crate::core::value::Namespace;
use crate::state_paths::{
    KeyResolveError, STATE_EXTENSION, key_from_state_path, resolve_state_path,
};

pub type ApiResult<T> = Result<T, Error>;

pub const SNAPSHOT_SCHEMA: &str = "notebridge.namespace.v1";

/// On-disk envelope around a namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema: String,
    pub key: String,
    pub saved_at: String,
    pub namespace: Namespace,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<String>,
}

#[derive(Clone, Debug)]
pub struct StateStore {
    state_dir: PathBuf,
}

impl StateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Creates the state directory (with parents) when missing.
    pub fn ensure_dir(&self) -> ApiResult<&Path> {
        match fs::metadata(&self.state_dir) {
            Ok(meta) if meta.is_dir() => Ok(&self.state_dir),
            Ok(_) => Err(Error::new(ErrorKind::InvalidStateDir)
                .with_message("state directory path is not a directory")
                .with_path(&self.state_dir)
                .with_hint("Point state-dir at a directory or remove the file in the way.")),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(&self.state_dir).map_err(|err| {
                    Error::new(ErrorKind::InvalidStateDir)
                        .with_message("failed to create state directory")
                        .with_path(&self.state_dir)
                        .with_source(err)
                })?;
                tracing::debug!(dir = %self.state_dir.display(), "created state directory");
                Ok(&self.state_dir)
            }
            Err(err) => Err(Error::new(ErrorKind::InvalidStateDir)
                .with_message("failed to inspect state directory")
                .with_path(&self.state_dir)
                .with_source(err)),
        }
    }

    pub fn path_for(&self, key: &str) -> ApiResult<PathBuf> {
        resolve_state_path(key, &self.state_dir).map_err(|err| map_key_resolve_error(err, key))
    }

    /// Writes the namespace for `key`, replacing any earlier snapshot.
    pub fn save(&self, key: &str, namespace: &Namespace) -> ApiResult<PathBuf> {
        let path = self.path_for(key)?;
        self.ensure_dir()?;

        let snapshot = Snapshot {
            schema: SNAPSHOT_SCHEMA.to_string(),
            key: key.to_string(),
            saved_at: now_rfc3339(),
            namespace: namespace.clone(),
        };
        let payload = serde_json::to_vec(&snapshot).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode snapshot")
                .with_key(key)
                .with_source(err)
        })?;

        let tmp = path.with_extension(format!("{STATE_EXTENSION}.{}.tmp", std::process::id()));
        if let Err(err) = write_synced(&tmp, &payload) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::new(ErrorKind::Io)
                .with_message("failed to write snapshot")
                .with_key(key)
                .with_path(&tmp)
                .with_source(err));
        }
        fs::rename(&tmp, &path).map_err(|err| {
            let _ = fs::remove_file(&tmp);
            Error::new(ErrorKind::Io)
                .with_message("failed to move snapshot into place")
                .with_key(key)
                .with_path(&path)
                .with_source(err)
        })?;

        tracing::debug!(session = %key, entries = namespace.len(), "saved snapshot");
        Ok(path)
    }

    /// Returns `None` when no snapshot exists for `key`.
    pub fn load(&self, key: &str) -> ApiResult<Option<Namespace>> {
        Ok(self.read_snapshot(key)?.map(|snapshot| snapshot.namespace))
    }

    pub fn read_snapshot(&self, key: &str) -> ApiResult<Option<Snapshot>> {
        let path = self.path_for(key)?;
        self.ensure_dir()?;

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::new(ErrorKind::Io)
                    .with_message("failed to read snapshot")
                    .with_key(key)
                    .with_path(&path)
                    .with_source(err));
            }
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("snapshot is not a valid namespace encoding")
                .with_key(key)
                .with_path(&path)
                .with_source(err)
        })?;
        if snapshot.schema != SNAPSHOT_SCHEMA {
            return Err(Error::new(ErrorKind::Corrupt)
                .with_message(format!("unsupported snapshot schema: {}", snapshot.schema))
                .with_key(key)
                .with_path(&path));
        }
        Ok(Some(snapshot))
    }

    pub fn list(&self) -> ApiResult<Vec<SnapshotInfo>> {
        let dir = self.ensure_dir()?;
        let entries = fs::read_dir(dir).map_err(|err| {
            Error::new(map_io_error_kind(&err))
                .with_message("failed to read state directory")
                .with_path(dir)
                .with_source(err)
        })?;

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read state directory entry")
                    .with_path(dir)
                    .with_source(err)
            })?;
            let path = entry.path();
            let Some(key) = key_from_state_path(&path) else {
                continue;
            };
            let meta = entry.metadata().map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to stat snapshot")
                    .with_path(&path)
                    .with_source(err)
            })?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().ok().and_then(|time| {
                OffsetDateTime::from(time).format(&Rfc3339).ok()
            });
            snapshots.push(SnapshotInfo {
                key,
                path,
                size: meta.len(),
                modified,
            });
        }
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(snapshots)
    }

    /// Removes the snapshot for `key`; returns false when there was none.
    pub fn delete(&self, key: &str) -> ApiResult<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(Error::new(ErrorKind::Io)
                .with_message("failed to delete snapshot")
                .with_key(key)
                .with_path(&path)
                .with_source(err)),
        }
    }
}

fn write_synced(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(payload)?;
    file.sync_all()
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

fn map_key_resolve_error(err: KeyResolveError, key: &str) -> Error {
    let message = match err {
        KeyResolveError::Empty => "session key must not be empty",
        KeyResolveError::ContainsPathSeparator => "session key must not contain path separators",
        KeyResolveError::Reserved => "session key must not be `.` or `..`",
    };
    Error::new(ErrorKind::Usage).with_message(message).with_key(key)
}
