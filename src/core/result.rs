// Per-call interpreter result returned to the notebook side.
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Text,
    Table,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InterpretResult {
    pub status: Status,
    pub kind: ResultKind,
    pub payload: String,
}

impl InterpretResult {
    pub fn text(payload: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            kind: ResultKind::Text,
            payload: payload.into(),
        }
    }

    pub fn table(payload: impl Into<String>) -> Self {
        Self {
            status: Status::Success,
            kind: ResultKind::Table,
            payload: payload.into(),
        }
    }

    pub fn error(diagnostic: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            kind: ResultKind::Text,
            payload: diagnostic.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}
