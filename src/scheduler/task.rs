//! Render tasks and their lifecycle.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::clock::Time;
use crate::core::{NodeId, Priority, RenderError, TaskId, Token};
use crate::executor::Memo;

/// Lifecycle state of a render task.
///
/// ```text
/// Pending ──pass──▶ Committed
///    │  ▲
///    │  └─settled── Blocked
///    └──newer request── Superseded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Queued or running.
    Pending,
    /// Waiting on at least one dependency or deadline.
    Blocked,
    /// Fully rendered and published.
    Committed,
    /// Replaced by a newer request for the same root and priority.
    Superseded,
    /// Aborted by a failure no error boundary handled.
    Failed,
}

impl TaskStatus {
    /// Still able to produce a commit.
    #[inline]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Pending | Self::Blocked)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Blocked => "blocked",
            Self::Committed => "committed",
            Self::Superseded => "superseded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug)]
pub(super) struct RenderTask {
    pub id: TaskId,
    pub root: NodeId,
    pub priority: Priority,
    pub expiration: Time,
    /// Submission order, used as the queue tie-breaker.
    pub seq: u64,
    pub status: TaskStatus,
    pub memo: Memo,
    /// Node each token of the last pass suspended at.
    pub suspended: FxHashMap<Token, NodeId>,
    /// Nodes whose dependency was rejected. They fail on every later pass.
    pub rejected: FxHashMap<NodeId, RenderError>,
    pub passes: u32,
    pub commits: u32,
}

impl RenderTask {
    pub fn new(id: TaskId, root: NodeId, priority: Priority, expiration: Time) -> Self {
        Self {
            id,
            root,
            priority,
            expiration,
            seq: id.raw(),
            status: TaskStatus::Pending,
            memo: Memo::default(),
            suspended: FxHashMap::default(),
            rejected: FxHashMap::default(),
            passes: 0,
            commits: 0,
        }
    }

    pub fn info(&self, blocked_on: Vec<Token>) -> TaskInfo {
        TaskInfo {
            id: self.id,
            root: self.root,
            priority: self.priority,
            expiration: self.expiration,
            status: self.status,
            blocked_on,
            passes: self.passes,
            commits: self.commits,
        }
    }
}

/// Snapshot of a task for hosts and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub root: NodeId,
    pub priority: Priority,
    pub expiration: Time,
    pub status: TaskStatus,
    /// Data tokens still outstanding.
    pub blocked_on: Vec<Token>,
    pub passes: u32,
    pub commits: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_pending() {
        let task = RenderTask::new(TaskId(4), NodeId(0), Priority::Normal, Time(100));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.seq, 4);
        let info = task.info(Vec::new());
        assert!(info.status.is_live());
        assert_eq!(info.priority, Priority::Normal);
    }

    #[test]
    fn test_terminal_states_are_not_live() {
        for status in [
            TaskStatus::Committed,
            TaskStatus::Superseded,
            TaskStatus::Failed,
        ] {
            assert!(!status.is_live(), "{status} should be terminal");
        }
    }
}
