//! Centralized error type for the signal node.
//!
//! `NodeError` consolidates the failure modes described in the propagation policy: invalid
//! configuration, invalid site descriptors, transient database unavailability, malformed
//! signal plans, and unsupported operations. Using `thiserror` keeps each variant's message
//! close to its definition and lets callers use `?` freely.

use thiserror::Error;

/// Convenience alias for results using the node's error type.
pub type NodeResult<T> = std::result::Result<T, NodeError>;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("site descriptor invalid: {0}")]
    DescriptorInvalid(String),

    #[error("database unavailable: {0}")]
    DbUnavailable(String),

    #[error("query failed: {0}")]
    QueryFailed(String),

    #[error("signal plan malformed: {0}")]
    PlanMalformed(String),

    #[error("target phase {0} not found in either ring")]
    TargetNotFound(i32),

    #[error("target phase {0} present in both rings")]
    TargetAmbiguous(i32),

    #[error("operation not supported: {0}")]
    NotSupported(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = NodeError::TargetNotFound(4);
        assert_eq!(err.to_string(), "target phase 4 not found in either ring");

        let err = NodeError::TargetAmbiguous(4);
        assert_eq!(err.to_string(), "target phase 4 present in both rings");
    }

    #[test]
    fn not_supported_carries_message() {
        let err = NodeError::NotSupported("manual data source has no signal data".into());
        assert!(err.to_string().contains("manual data source"));
    }
}
