//! Typed failures surfaced by the bot core.
//!
//! These travel inside [`anyhow::Error`] like every other error in the crate, and can be
//! recovered with `err.downcast_ref::<BotError>()` wherever a caller needs to branch on them.

use std::time::Duration;

use thiserror::Error;

/// The failures the core reports to its callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BotError {
    /// The inbound event has an origin type the normalizer does not understand.
    #[error("unrecognized event kind: {0}")]
    UnrecognizedEventKind(String),

    /// A mention marker was present but its identity could not be parsed.
    ///
    /// Callers treat this as "no mention".
    #[error("malformed mention marker: {0}")]
    MalformedMention(String),

    /// A persisted record (rule or session) does not exist, or is soft-deleted.
    #[error("record not found: {0}")]
    RecordNotFound(String),

    /// A rule cannot move because it is already first (or last) among live rules.
    #[error("rule {0} has no live neighbor in that direction")]
    NoNeighbor(i64),

    /// The tool endpoint exists but is not in the `Connected` state.
    #[error("tool endpoint `{0}` is not connected")]
    NotConnected(String),

    /// The tool name is not in the current catalog.
    #[error("unknown tool `{0}`")]
    UnknownTool(String),

    /// A field listed as `required` in the tool's input schema is absent.
    #[error("tool `{tool}` is missing required argument `{argument}`")]
    MissingArgument { tool: String, argument: String },

    /// The tool call did not resolve before the timer fired.
    #[error("tool `{tool}` timed out after {timeout:?}")]
    ToolTimeout { tool: String, timeout: Duration },

    /// Transport setup or catalog discovery failed.
    #[error("failed to connect to tool endpoint `{endpoint}`: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },
}

/// Helpers for branching on a [`BotError`] carried inside an [`anyhow::Error`].
pub trait BotErrorExt {
    /// Returns the typed bot error, if this error is one.
    fn bot_error(&self) -> Option<&BotError>;
}

impl BotErrorExt for anyhow::Error {
    fn bot_error(&self) -> Option<&BotError> {
        self.downcast_ref::<BotError>()
    }
}

// Tests.
