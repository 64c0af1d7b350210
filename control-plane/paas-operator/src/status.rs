use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageLevel::Info => write!(f, "INFO"),
            MessageLevel::Warn => write!(f, "WARN"),
            MessageLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// One outcome reported during a reconcile pass.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub level: MessageLevel,
    /// Symbolic verb: create, update, find, delete, reconcile, ...
    pub operation: String,
    pub target_kind: String,
    pub target: String,
    pub detail: String,
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} {} {}: {}",
            self.level, self.operation, self.target_kind, self.target, self.detail
        )
    }
}

/// Per-pass report of everything the operator did to converge one Paas.
/// Cleared at the start of each pass; never an accumulating history.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(transparent)]
pub struct StatusLog(Vec<StatusMessage>);

impl StatusLog {
    pub fn append(
        &mut self,
        level: MessageLevel,
        operation: impl Into<String>,
        target_kind: impl Into<String>,
        target: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.0.push(StatusMessage {
            level,
            operation: operation.into(),
            target_kind: target_kind.into(),
            target: target.into(),
            detail: detail.into(),
        });
    }

    pub fn info(
        &mut self,
        operation: impl Into<String>,
        target_kind: impl Into<String>,
        target: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.append(MessageLevel::Info, operation, target_kind, target, detail);
    }

    pub fn error(
        &mut self,
        operation: impl Into<String>,
        target_kind: impl Into<String>,
        target: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.append(MessageLevel::Error, operation, target_kind, target, detail);
    }

    pub fn truncate(&mut self) {
        self.0.clear();
    }

    pub fn messages(&self) -> &[StatusMessage] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|m| m.level == MessageLevel::Error)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatusMessage> {
        self.0.iter()
    }
}
