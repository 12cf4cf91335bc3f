//! Unified error handling for the community GraphRAG core.
//!
//! One crate-wide error enum covers the whole taxonomy: caller-fixable
//! configuration mistakes, unmet preconditions, missing resources, and
//! collaborator failures. Batch operations never surface these as a whole;
//! they report per-item results instead.

use std::time::Duration;

use thiserror::Error;

/// Main error type for the community GraphRAG core.
#[derive(Debug, Error)]
pub enum GraphRagError {
    /// Invalid algorithm, level, strategy, or configuration value.
    /// Caller-fixable; never retried.
    #[error("configuration error: {message}")]
    Config {
        /// What was invalid and what the acceptable values are.
        message: String,
    },

    /// The graph snapshot has no nodes, so there is nothing to partition.
    #[error("empty graph: snapshot {version} contains no nodes")]
    EmptyGraph {
        /// Version of the offending snapshot.
        version: String,
    },

    /// An operation needs a partition but detection has never run.
    #[error("not ready: no community partition installed; run detect_communities first")]
    NotReady,

    /// A referenced resource does not exist in the active version.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Resource kind, e.g. "community".
        resource: String,
        /// The identifier that failed to resolve.
        id: String,
    },

    /// The text-generation output could not be parsed into a structured
    /// summary, even after the stricter retry prompt.
    #[error("summary generation failed for community {community_id}: {message}")]
    SummaryGeneration {
        /// Community whose summary could not be produced.
        community_id: u64,
        /// Why parsing failed.
        message: String,
    },

    /// Text-generation collaborator failure (after the one-retry policy).
    #[error("generation error: {message}")]
    Generation {
        /// Underlying failure description.
        message: String,
    },

    /// Graph storage collaborator failure. Storage is inside the trust
    /// boundary, so these propagate without implicit retry.
    #[error("storage error: {message}")]
    Storage {
        /// Underlying failure description.
        message: String,
    },

    /// A bounded operation exceeded its deadline.
    #[error("operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// Operation name for diagnostics.
        operation: String,
        /// The deadline that was exceeded.
        duration: Duration,
    },

    /// I/O failure, typically while loading configuration.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON decode failure outside the summary-parse retry path.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphRagError {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        GraphRagError::Config {
            message: message.into(),
        }
    }

    /// Whether the caller may reasonably retry the same call unchanged.
    /// Configuration and precondition errors need a different call instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GraphRagError::Generation { .. }
                | GraphRagError::Timeout { .. }
                | GraphRagError::Storage { .. }
        )
    }

    /// Error category for logging and metrics.
    pub fn category(&self) -> &'static str {
        match self {
            GraphRagError::Config { .. } => "config",
            GraphRagError::EmptyGraph { .. } => "empty_graph",
            GraphRagError::NotReady => "not_ready",
            GraphRagError::NotFound { .. } => "not_found",
            GraphRagError::SummaryGeneration { .. } => "summary_generation",
            GraphRagError::Generation { .. } => "generation",
            GraphRagError::Storage { .. } => "storage",
            GraphRagError::Timeout { .. } => "timeout",
            GraphRagError::Io(_) => "io",
            GraphRagError::Json(_) => "json",
        }
    }
}

/// Convenient Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphRagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = GraphRagError::NotFound {
            resource: "community".to_string(),
            id: "42".to_string(),
        };
        assert_eq!(format!("{err}"), "community not found: 42");
    }

    #[test]
    fn retryability_split() {
        assert!(!GraphRagError::config("bad algorithm").is_retryable());
        assert!(!GraphRagError::NotReady.is_retryable());
        assert!(GraphRagError::Generation {
            message: "connection reset".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn categories_are_stable() {
        let err = GraphRagError::EmptyGraph {
            version: "v1".to_string(),
        };
        assert_eq!(err.category(), "empty_graph");
    }
}
