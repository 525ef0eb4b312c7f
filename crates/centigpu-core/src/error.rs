//! Error handling for centigpu
//!
//! Provides a unified error type and result type for use across all centigpu
//! components. Placement failures (`NodeUnknown`, `InsufficientResource`,
//! `MalformedPod`, `MalformedPlan`) are per-node filter outcomes and never
//! abort a whole request; `Conflict` is recovered internally by the bind
//! retry; `Invariant` marks a programmer error and is never caught.

use crate::types::ResourceAxis;

/// Result type alias for centigpu operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for centigpu
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// Node not present in the cluster cache
    #[error("unknown node {0}")]
    NodeUnknown(String),

    /// Fit failed on a node; names the axis and card the pod did not fit on
    #[error("gpu {axis} insufficient on card {card}")]
    InsufficientResource { axis: ResourceAxis, card: usize },

    /// Pod resource requests are unparseable
    #[error("malformed pod {pod}: {reason}")]
    MalformedPod { pod: String, reason: String },

    /// Pod plan annotation is unparseable or inconsistent with its demand
    #[error("malformed plan for pod {pod}: {reason}")]
    MalformedPlan { pod: String, reason: String },

    /// Optimistic-concurrency conflict on a cluster write
    #[error("conflict: {0}")]
    Conflict(String),

    /// Terminal failure to update the pod or create the binding
    #[error("bind failed: {0}")]
    BindIo(String),

    /// Internal invariant violated; indicates a bug, fail loud
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create an unknown-node error
    pub fn node_unknown(name: impl Into<String>) -> Self {
        Self::NodeUnknown(name.into())
    }

    /// Create an insufficient-resource error for a card
    pub fn insufficient(axis: ResourceAxis, card: usize) -> Self {
        Self::InsufficientResource { axis, card }
    }

    /// Create a malformed-pod error
    pub fn malformed_pod(pod: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPod {
            pod: pod.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed-plan error
    pub fn malformed_plan(pod: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPlan {
            pod: pod.into(),
            reason: reason.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a bind I/O error
    pub fn bind_io(msg: impl Into<String>) -> Self {
        Self::BindIo(msg.into())
    }

    /// Create an invariant-violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Check if this error is the optimistic-concurrency conflict that the
    /// bind path recovers from once
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Short label for this error kind, used as the metric label on
    /// failure counters
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidConfiguration(_) => "configuration",
            Error::NodeUnknown(_) => "node_unknown",
            Error::InsufficientResource { .. } => "insufficient_resource",
            Error::MalformedPod { .. } => "malformed_pod",
            Error::MalformedPlan { .. } => "malformed_plan",
            Error::Conflict(_) => "conflict",
            Error::BindIo(_) => "bind_io",
            Error::Invariant(_) => "invariant",
            Error::Network(_) => "network",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Other(_) => "other",
        }
    }
}
