//! Purpose: Define the public Rust API boundary for notebridge.
//! Exports: Interpreter facade, session registry, state store, and core types hosts need.
//! Role: Public, additive-only surface; internal helpers stay private.
//! Invariants: Hosts obtain containers only through `SessionRegistry`.
//! Invariants: Snapshot files are read and written only through `StateStore`.

mod interpreter;
mod registry;
mod store;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::channel::TextChannel;
pub use crate::core::container::SessionContainer;
pub use crate::core::engine::{Engine, EngineFactory};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::result::{InterpretResult, ResultKind, Status};
pub use crate::core::translate::translate;
pub use crate::core::value::{Namespace, Value};
pub use crate::state_paths::{DEFAULT_STATE_DIR, STATE_EXTENSION};
pub use interpreter::{
    EAGER_SAVE_KEY, FormType, InterpreterConfig, NotebookInterpreter, STATE_DIR_KEY,
};
pub use registry::{SessionHandle, SessionRegistry, ShutdownReport};
pub use store::{ApiResult, SNAPSHOT_SCHEMA, Snapshot, SnapshotInfo, StateStore};
