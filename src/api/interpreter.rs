//! Purpose: Host-facing notebook interpreter facade and its configuration.
//! Exports: `NotebookInterpreter`, `InterpreterConfig`, `FormType`, property keys.
//! Role: Maps note ids onto registry sessions and exposes the host lifecycle calls.
//! Invariants: `interpret` always returns a well-formed result; it never errors or panics.
//! Invariants: `open` and `cancel` are no-ops; `close` persists then tears down every session.

use std::path::PathBuf;
use std::sync::Arc;

use crate::api::registry::{SessionRegistry, ShutdownReport};
use crate::api::store::{ApiResult, StateStore};
use crate::core::engine::EngineFactory;
use crate::core::error::{Error, ErrorKind};
use crate::core::result::InterpretResult;
use crate::state_paths::DEFAULT_STATE_DIR;

pub const STATE_DIR_KEY: &str = "state-dir";
pub const EAGER_SAVE_KEY: &str = "eager-save";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InterpreterConfig {
    pub state_dir: PathBuf,
    pub eager_save: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            eager_save: true,
        }
    }
}

impl InterpreterConfig {
    /// Reads `state-dir` and `eager-save` from host properties; other keys are ignored.
    pub fn from_properties<'a, I>(properties: I) -> ApiResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in properties {
            match key {
                STATE_DIR_KEY => {
                    let value = value.trim();
                    if value.is_empty() {
                        return Err(Error::new(ErrorKind::Usage)
                            .with_message("state-dir must not be empty")
                            .with_hint(format!("Omit it to use the default ({DEFAULT_STATE_DIR}).")));
                    }
                    config.state_dir = PathBuf::from(value);
                }
                EAGER_SAVE_KEY => config.eager_save = parse_bool(key, value)?,
                other => tracing::debug!(property = other, "ignoring unknown interpreter property"),
            }
        }
        Ok(config)
    }

    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    pub fn with_eager_save(mut self, eager_save: bool) -> Self {
        self.eager_save = eager_save;
        self
    }
}

fn parse_bool(key: &str, value: &str) -> ApiResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(Error::new(ErrorKind::Usage)
            .with_message(format!("invalid boolean for {key}: {value}"))
            .with_hint("Use true or false.")),
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FormType {
    Simple,
}

pub struct NotebookInterpreter {
    config: InterpreterConfig,
    registry: SessionRegistry,
}

impl NotebookInterpreter {
    pub fn new(config: InterpreterConfig, factory: Arc<dyn EngineFactory>) -> Self {
        let registry = SessionRegistry::new(StateStore::new(&config.state_dir), factory)
            .with_eager_save(config.eager_save);
        Self { config, registry }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn open(&self) {}

    pub fn interpret(&self, note_id: &str, text: &str) -> InterpretResult {
        self.registry.interpret(note_id, text)
    }

    /// Engines run to completion; there is nothing to interrupt.
    pub fn cancel(&self, note_id: &str) {
        tracing::debug!(session = %note_id, "cancel requested; engines cannot be interrupted");
    }

    pub fn close(&self) -> ShutdownReport {
        tracing::info!("closing interpreter");
        self.registry.shutdown()
    }

    pub fn progress(&self, _note_id: &str) -> u8 {
        0
    }

    pub fn completion(&self, note_id: &str, buffer: &str, cursor: usize) -> Vec<String> {
        self.registry.completion(note_id, buffer, cursor)
    }

    pub fn form_type(&self) -> FormType {
        FormType::Simple
    }
}

#[cfg(test)]
mod tests {
    use super::{InterpreterConfig, NotebookInterpreter};
    use crate::core::error::ErrorKind;
    use crate::core::result::Status;
    use crate::script::script_engine_factory;
    use std::path::PathBuf;

    #[test]
    fn properties_override_defaults() {
        let config = InterpreterConfig::from_properties([
            ("state-dir", "/var/lib/notes"),
            ("eager-save", "False"),
            ("zeppelin.interpreter.output.limit", "102400"),
        ])
        .expect("config");
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/notes"));
        assert!(!config.eager_save);

        let defaults = InterpreterConfig::from_properties(std::iter::empty()).expect("config");
        assert_eq!(defaults, InterpreterConfig::default());
        assert_eq!(defaults.state_dir, PathBuf::from("notebridge/states"));
    }

    #[test]
    fn bad_properties_are_usage_errors() {
        let err = InterpreterConfig::from_properties([("eager-save", "sometimes")])
            .expect_err("bad bool");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = InterpreterConfig::from_properties([("state-dir", "  ")]).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn lifecycle_persists_on_close() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = InterpreterConfig::default()
            .with_state_dir(dir.path())
            .with_eager_save(false);
        let interpreter = NotebookInterpreter::new(config.clone(), script_engine_factory());
        interpreter.open();
        assert_eq!(interpreter.interpret("2A94M5J1Z", "x = 1").status, Status::Success);
        interpreter.cancel("2A94M5J1Z");
        assert_eq!(interpreter.progress("2A94M5J1Z"), 0);
        assert!(interpreter.close().is_clean());

        let reopened = NotebookInterpreter::new(config, script_engine_factory());
        assert_eq!(reopened.interpret("2A94M5J1Z", "show x").payload, "1\n");
    }

    #[test]
    fn invalid_state_dir_does_not_break_interpret() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("states");
        std::fs::write(&blocker, b"file").expect("write");
        let interpreter = NotebookInterpreter::new(
            InterpreterConfig::default().with_state_dir(&blocker),
            script_engine_factory(),
        );

        let result = interpreter.interpret("n", "print hi");
        assert_eq!(result.status, Status::Success);
        assert_eq!(result.payload, "hi\n");

        let report = interpreter.close();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].1.kind(), ErrorKind::InvalidStateDir);
    }
}
