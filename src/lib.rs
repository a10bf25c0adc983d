//! Purpose: Library crate behind the `notebridge` binary and host integrations.
//! Exports: `core` (values, channels, engine seam, containers), `api` (registry, store, interpreter).
//! Role: Turns synchronous line-oriented engines into per-note request/response sessions.
//! Invariants: Interpreting never fails to the caller; failures surface as Error-status results.
//! Invariants: Session state is shared across processes only through the state directory.
pub mod api;
pub mod core;
pub mod script;
mod state_paths;
