//! Commit gate.
//!
//! Decides whether a finished pass may become visible and publishes it.
//! Published output is kept per root: the next pass of that root reads it to
//! retain content behind fallbacks and holes.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::clock::Time;
use crate::core::{NodeId, Priority, TaskId};
use crate::executor::{OutputNode, PassResult};

/// Host callback invoked for every commit.
pub type CommitHook = Box<dyn FnMut(&Commit)>;

/// A published, consistent view of one root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Position in the commit sequence, starting at 1.
    pub seq: u64,
    pub task: TaskId,
    pub root: NodeId,
    pub priority: Priority,
    pub at: Time,
    /// A fallback is visible because its deadline passed.
    pub forced: bool,
    /// Some content is still suspended (holes or fallbacks).
    pub partial: bool,
    /// `None` when the root itself had nothing to show.
    pub tree: Option<OutputNode>,
}

impl Commit {
    pub fn visible_texts(&self) -> Vec<&str> {
        self.tree
            .as_ref()
            .map(OutputNode::visible_texts)
            .unwrap_or_default()
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} ({}) [{}]",
            self.seq,
            self.task,
            self.priority,
            self.visible_texts().join(", ")
        )?;
        if self.forced {
            f.write_str(" forced")?;
        }
        if self.partial {
            f.write_str(" partial")?;
        }
        Ok(())
    }
}

/// What to do with a finished pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Commit,
    /// Leave visible output unchanged.
    Hold,
    /// A failure escaped every error boundary.
    Abort,
}

impl Verdict {
    pub fn of(result: &PassResult, priority: Priority) -> Self {
        if result.uncaught.is_some() {
            return Self::Abort;
        }
        let allowed = if priority.is_sync() {
            result.sync_committable()
        } else {
            // Uncaptured holes may commit; a waiting boundary may not.
            result.pending.is_empty()
        };
        if allowed { Self::Commit } else { Self::Hold }
    }
}

struct Published {
    commit: Commit,
    index: FxHashMap<NodeId, OutputNode>,
}

#[derive(Default)]
pub struct CommitGate {
    published: FxHashMap<NodeId, Published>,
    hooks: Vec<CommitHook>,
    next_seq: u64,
}

impl fmt::Debug for CommitGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitGate")
            .field("roots", &self.published.len())
            .field("hooks", &self.hooks.len())
            .field("commits", &self.next_seq)
            .finish()
    }
}

impl CommitGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, hook: CommitHook) {
        self.hooks.push(hook);
    }

    /// Publish `output` for `root` and notify subscribers.
    pub fn publish(&mut self, mut commit: Commit) -> &Commit {
        self.next_seq += 1;
        commit.seq = self.next_seq;
        for hook in &mut self.hooks {
            hook(&commit);
        }

        let index = commit
            .tree
            .as_ref()
            .map(OutputNode::index)
            .unwrap_or_default();
        let root = commit.root;
        let entry = Published { commit, index };
        &self.published.entry(root).insert_entry(entry).into_mut().commit
    }

    /// Latest commit of `root`.
    pub fn committed(&self, root: NodeId) -> Option<&Commit> {
        self.published.get(&root).map(|p| &p.commit)
    }

    /// Committed output of `root`, by node.
    pub fn prior(&self, root: NodeId) -> Option<&FxHashMap<NodeId, OutputNode>> {
        self.published.get(&root).map(|p| &p.index)
    }

    /// Number of commits so far.
    pub fn count(&self) -> u64 {
        self.next_seq
    }
}
