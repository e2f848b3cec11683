//! Scenario error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::SchedulerError;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("IO error when reading `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Scenario file parsing error")]
    Toml(#[from] toml::de::Error),

    #[error("node id `{0}` is declared twice")]
    DuplicateNode(String),

    /// `at` names the referring entry, e.g. `node "spinner"` or `step 3`.
    #[error("{at} refers to unknown node `{id}`")]
    UnknownNode { id: String, at: String },

    #[error("node `{id}`: {reason}")]
    BadNode { id: String, reason: String },

    #[error("step {index}: {reason}")]
    BadStep { index: usize, reason: String },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl ScenarioError {
    pub(super) fn bad_step(index: usize, reason: impl Into<String>) -> Self {
        Self::BadStep {
            index,
            reason: reason.into(),
        }
    }

    pub(super) fn bad_node(id: &str, reason: impl Into<String>) -> Self {
        Self::BadNode {
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}
