// SPDX-License-Identifier: MIT

//! Typed error handling for the applet engine
//!
//! Flow failures and cancellations are control outcomes, not errors. Everything
//! here is either a static authoring problem found when a tree is finalized or
//! an engine error raised while a run is in progress.

use crate::engine::applet::{AppletId, NodeId};
use thiserror::Error;

/// Top-level error type for the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// The tree violates an authoring invariant
    #[error("Static check failed: {0}")]
    Static(#[from] StaticError),

    /// A consumer asked for a referent that was never registered in this run
    #[error("Referent '{name}' is not registered (consumer {node})")]
    UnresolvedReference { name: String, node: NodeId },

    /// A second producer tried to bind a name already bound in this run
    #[error("Referent '{name}' already bound by {bound_by}, rebinding attempted by {node}")]
    ReferentRewritten {
        name: String,
        bound_by: NodeId,
        node: NodeId,
    },

    /// An applet declared a referent slot its result does not fill
    #[error("{node} produced no value for referent slot {slot}")]
    MissingReferentSlot { node: NodeId, slot: u8 },

    /// No behaviour registered for the applet id
    #[error("Applet {0} is not registered")]
    UnknownApplet(AppletId),

    /// Error raised by a criterion or action supplied by a collaborator
    #[error("Applet {applet} at {node} failed: {message}")]
    Applet {
        applet: AppletId,
        node: NodeId,
        message: String,
    },

    /// The run was halted
    #[error("Run cancelled")]
    Cancelled,

    #[error("Task {0:016x} not found")]
    TaskNotFound(u64),

    #[error("Task '{title}' ({checksum:016x}) is already enabled")]
    DuplicateTask { title: String, checksum: u64 },

    /// A tree was used before `finalize` accepted it
    #[error("Applet tree is not finalized")]
    NotFinalized,

    /// Configuration errors (invalid env vars, bad config file)
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error wrapper for compatibility
    #[error("{0}")]
    Other(String),
}

/// A tree shape problem, reported with the offending node
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code} at {node} (applet {applet})")]
pub struct StaticError {
    pub node: NodeId,
    pub applet: AppletId,
    pub code: StaticErrorCode,
}

/// Symbolic static error codes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StaticErrorCode {
    #[error("ELSEIF_NOT_FOLLOWING_DO")]
    ElseIfNotFollowingDo,

    #[error("MAXIMUM_DEPTH_EXCEEDED({0})")]
    MaximumDepthExceeded(usize),

    /// Referenced name has no producer earlier in evaluation order
    #[error("UNRESOLVED_REFERENCE({0})")]
    UnresolvedReference(String),

    #[error("BREAK_OUTSIDE_REPEAT")]
    BreakOutsideRepeat,

    #[error("WHEN_OUTSIDE_ROOT")]
    WhenOutsideRoot,

    /// A node kind that cannot live under its parent (e.g. an action inside `When`)
    #[error("MISPLACED_CHILD")]
    MisplacedChild,

    #[error("UNKNOWN_APPLET")]
    UnknownApplet,

    #[error("MISSING_REPEAT_COUNT")]
    MissingRepeatCount,
}

impl EngineError {
    /// Create an applet error from a collaborator failure
    pub fn applet(applet: AppletId, node: NodeId, message: impl Into<String>) -> Self {
        Self::Applet {
            applet,
            node,
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create from a generic error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl StaticError {
    pub fn new(node: NodeId, applet: AppletId, code: StaticErrorCode) -> Self {
        Self { node, applet, code }
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

// Convert from Box<dyn Error> for compatibility with collaborator code
impl From<Box<dyn std::error::Error + Send + Sync>> for EngineError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_error_display_carries_code_and_node() {
        let err = StaticError::new(
            NodeId(4),
            AppletId(0x04),
            StaticErrorCode::ElseIfNotFollowingDo,
        );
        let text = err.to_string();
        assert!(text.contains("ELSEIF_NOT_FOLLOWING_DO"));
        assert!(text.contains("node #4"));
    }

    #[test]
    fn test_static_error_converts_into_engine_error() {
        let err: EngineError = StaticError::new(
            NodeId(1),
            AppletId(0x06),
            StaticErrorCode::MissingRepeatCount,
        )
        .into();
        assert!(matches!(err, EngineError::Static(_)));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_boxed_error_conversion() {
        let boxed: Box<dyn std::error::Error + Send + Sync> = "boom".into();
        let err: EngineError = boxed.into();
        assert_eq!(err.to_string(), "boom");
    }
}
