//! Error types for the node scheduler and its collaborators.

use thiserror::Error;

/// A node job configuration that cannot be scheduled.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("node_id must not be empty")]
    EmptyNodeId,

    #[error("frequency for node {node_id} must be greater than 0 seconds (got {frequency})")]
    NonPositiveFrequency { node_id: String, frequency: i64 },

    #[error("parameter '{name}' of node {node_id} has min {min} greater than max {max}")]
    InvertedRange {
        node_id: String,
        name: String,
        min: f64,
        max: f64,
    },

    #[error("parameter '{name}' of node {node_id} has a non-finite bound")]
    NonFiniteBound { node_id: String, name: String },
}

/// Per-node scheduler outcomes and subscription failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchedulerError {
    #[error("Task for node_id {0} is already running.")]
    AlreadyRunning(String),

    #[error("Task for node_id {0} is not running.")]
    NotRunning(String),

    #[error("Node {0} not found")]
    UnknownNode(String),

    #[error("No active tasks found.")]
    NoActiveJobs,

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl SchedulerError {
    /// HTTP-equivalent status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            SchedulerError::AlreadyRunning(_) | SchedulerError::NotRunning(_) => 400,
            SchedulerError::UnknownNode(_) | SchedulerError::NoActiveJobs => 404,
            SchedulerError::Validation(_) => 422,
        }
    }
}

/// Failures reported by a [`NodeStore`](crate::store::NodeStore).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Node store unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to load node seed file: {0}")]
    Seed(String),
}

/// Failures while appending to or reading a delivery log.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Delivery log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Delivery log encoding error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_error_status_codes() {
        assert_eq!(SchedulerError::AlreadyRunning("a".into()).status_code(), 400);
        assert_eq!(SchedulerError::NotRunning("a".into()).status_code(), 400);
        assert_eq!(SchedulerError::UnknownNode("a".into()).status_code(), 404);
        assert_eq!(SchedulerError::NoActiveJobs.status_code(), 404);
        assert_eq!(
            SchedulerError::from(ValidationError::EmptyNodeId).status_code(),
            422
        );
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            SchedulerError::AlreadyRunning("WQ-01".into()).to_string(),
            "Task for node_id WQ-01 is already running."
        );
        let err = ValidationError::InvertedRange {
            node_id: "WQ-01".into(),
            name: "pm10".into(),
            min: 60.0,
            max: 10.0,
        };
        assert!(err.to_string().contains("pm10"));
        assert!(err.to_string().contains("greater than max"));
    }
}
