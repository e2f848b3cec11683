//! Error types shared by the scheduler and its hosts.

use std::fmt;

use thiserror::Error;

use super::{NodeId, TaskId, Token};

/// A fatal failure produced by a render step or a rejected dependency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderError {
    message: String,
    /// Rejected token this failure originated from, if any.
    token: Option<Token>,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            token: None,
        }
    }

    pub fn rejected(token: Token, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            token: Some(token),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn token(&self) -> Option<Token> {
        self.token
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.token {
            Some(token) => write!(f, "{} (dependency {token} rejected)", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RenderError {}

/// Errors surfaced to the host by flush calls.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A failure no error boundary handled; the task was aborted.
    #[error("render task {task} failed at node `{name}` ({node})")]
    Uncaught {
        task: TaskId,
        node: NodeId,
        name: String,
        #[source]
        error: RenderError,
    },

    #[error("node {0} does not exist or is unmounted")]
    UnknownNode(NodeId),
}
