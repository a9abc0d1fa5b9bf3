//! Error Types
//!
//! Every fallible operation in the runtime returns [`Result`]. The variants
//! fall into three groups:
//!
//! - **Usage errors** are programmer mistakes: a duplicate side-effect key,
//!   a send through a sink while its render pass is still running, a
//!   capability call on a frozen render context. They are fatal and never
//!   retried.
//! - **Workflow failures** come from user code (`initial_state`, `render`,
//!   `on_props_changed`, `snapshot_state`) and propagate synchronously out of
//!   whatever call triggered them.
//! - **Side-effect failures** are reported to the owning runtime scope and end
//!   the driver loop.

use thiserror::Error;

/// Boxed error produced by workflow code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the workflow runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Two side effects were declared with the same key in one render pass.
    #[error("side effect key {key:?} was declared twice in one render pass")]
    DuplicateSideEffectKey { key: String },

    /// The same child slot (identity + key) was rendered twice in one pass.
    #[error("child {id} was rendered twice in one render pass")]
    DuplicateChildKey { id: String },

    /// A render-time capability was used after its render pass returned.
    #[error("render context is frozen: `{operation}` needs a running render pass")]
    ContextFrozen { operation: &'static str },

    /// An action was sent while the render pass that produced the sink was
    /// still running.
    #[error("action `{action}` was sent during the render pass")]
    SendDuringRender { action: String },

    /// A child slot matched by identity holds a workflow of another type.
    #[error("child {id} matched an existing slot holding a different workflow type")]
    IdentityMismatch { id: String },

    /// `render` was called while the previous render context was never frozen.
    #[error("{session} was rendered again before its previous render context was frozen")]
    RenderReentered { session: String },

    /// A one-shot continuation or terminal result was completed twice.
    #[error("{what} was already completed")]
    AlreadyCompleted { what: &'static str },

    /// An interceptor handed a value of the wrong type to its continuation.
    #[error("interceptor passed a value of the wrong type to `{hook}`: expected {expected}")]
    InterceptorTypeMismatch {
        hook: &'static str,
        expected: &'static str,
    },

    /// The node was used after it was cancelled.
    #[error("{session} has been cancelled")]
    SessionCancelled { session: String },

    /// A task had to be spawned outside of a tokio runtime.
    #[error("`{operation}` requires a running tokio runtime")]
    NoRuntime { operation: &'static str },

    /// A side-effect task returned an error.
    #[error("side effect {key:?} failed")]
    SideEffect {
        key: String,
        #[source]
        source: Box<Error>,
    },

    /// A side-effect task panicked.
    #[error("side effect {key:?} panicked: {message}")]
    SideEffectPanicked { key: String, message: String },

    /// A snapshot could not be serialized.
    #[error("failed to encode snapshot")]
    SnapshotEncode(#[from] rmp_serde::encode::Error),

    /// Snapshot bytes could not be parsed.
    #[error("failed to decode snapshot")]
    SnapshotDecode(#[from] rmp_serde::decode::Error),

    /// Configuration could not be parsed.
    #[error("invalid runtime configuration")]
    Config(#[from] serde_json::Error),

    /// Failure raised by workflow code.
    #[error("{0}")]
    Workflow(#[source] BoxError),
}

impl Error {
    /// Wrap an arbitrary error raised by workflow code.
    pub fn workflow(error: impl Into<BoxError>) -> Self {
        Error::Workflow(error.into())
    }

    /// Build a workflow failure from a plain message.
    pub fn msg(message: impl std::fmt::Display) -> Self {
        Error::Workflow(message.to_string().into())
    }

    /// Returns true for programmer errors that indicate misuse of the runtime.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::DuplicateSideEffectKey { .. }
                | Error::DuplicateChildKey { .. }
                | Error::IdentityMismatch { .. }
                | Error::ContextFrozen { .. }
                | Error::SendDuringRender { .. }
                | Error::RenderReentered { .. }
                | Error::AlreadyCompleted { .. }
                | Error::InterceptorTypeMismatch { .. }
                | Error::SessionCancelled { .. }
                | Error::NoRuntime { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_side_effect_message_names_key() {
        let err = Error::DuplicateSideEffectKey {
            key: "same".to_string(),
        };
        assert!(err.to_string().contains("\"same\""));
        assert!(err.is_usage());
    }

    #[test]
    fn workflow_errors_are_not_usage_errors() {
        let err = Error::msg("boom");
        assert_eq!(err.to_string(), "boom");
        assert!(!err.is_usage());
    }

    #[test]
    fn side_effect_error_keeps_source() {
        use std::error::Error as _;

        let err = Error::SideEffect {
            key: "poll".to_string(),
            source: Box::new(Error::msg("timeout")),
        };
        assert_eq!(err.source().map(|s| s.to_string()), Some("timeout".to_string()));
    }
}
