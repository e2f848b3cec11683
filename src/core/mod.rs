//! Core types - pure abstractions shared across the codebase.

mod error;
mod ids;
mod priority;

pub use error::{RenderError, SchedulerError};
pub use ids::{BoundaryId, NodeId, TaskHandle, TaskId, Token};
pub use priority::Priority;
