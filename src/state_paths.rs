//! Purpose: Shared state-directory and session-key path resolution helpers.
//! Exports: `DEFAULT_STATE_DIR`, `STATE_EXTENSION`, `resolve_state_path`.
//! Role: Keep store, CLI, and server path semantics aligned from one source.
//! Invariants: Default state directory remains `notebridge/states` (relative).
//! Invariants: Session keys must name a single file inside the state directory.

use std::path::{Path, PathBuf};

pub const DEFAULT_STATE_DIR: &str = "notebridge/states";
pub const STATE_EXTENSION: &str = "state";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum KeyResolveError {
    Empty,
    ContainsPathSeparator,
    Reserved,
}

pub(crate) fn resolve_state_path(key: &str, state_dir: &Path) -> Result<PathBuf, KeyResolveError> {
    if key.is_empty() {
        return Err(KeyResolveError::Empty);
    }
    if key.contains(['/', '\\', '\0']) {
        return Err(KeyResolveError::ContainsPathSeparator);
    }
    if key == "." || key == ".." {
        return Err(KeyResolveError::Reserved);
    }
    Ok(state_dir.join(format!("{key}.{STATE_EXTENSION}")))
}

pub(crate) fn key_from_state_path(path: &Path) -> Option<String> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(STATE_EXTENSION) {
        return None;
    }
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}
