//! Scheduler context.
//!
//! Owns every arena (tree, boundaries, tasks, tokens) and drives passes:
//!
//! ```text
//! schedule ──▶ WorkQueue ──pop──▶ Pass::step … ──▶ CommitGate ──▶ on_commit
//!                  ▲                                   │
//!                  └──── registry drain ◀── Settler ◀──┘ (suspensions park here)
//! ```
//!
//! Settlements and due timers are only applied when the scheduler looks for
//! the next task, never in the middle of a pass.

mod task;

pub use task::{TaskInfo, TaskStatus};

use rustc_hash::FxHashMap;

use crate::boundary::{Boundary, BoundaryMode, BoundaryUpdate};
use crate::clock::{Time, VirtualClock};
use crate::commit::{Commit, CommitGate, Verdict};
use crate::config::SchedulerConfig;
use crate::core::{NodeId, Priority, RenderError, SchedulerError, TaskHandle, TaskId, Token};
use crate::debug;
use crate::executor::{Pass, PassInput, PassResult};
use crate::queue::WorkQueue;
use crate::registry::{DependencyRegistry, Outcome, ResourceCache, Settler, Wake};
use crate::tree::{Node, Tree};

use task::RenderTask;

/// Which queued work a flush may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    All,
    Sync,
}

/// Summary of one flush or slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Passes started.
    pub passes: usize,
    pub commits: usize,
    /// Render steps executed.
    pub steps: usize,
    /// Stopped because the budget ran out while work remained.
    pub yielded: bool,
}

pub struct Scheduler {
    config: SchedulerConfig,
    clock: VirtualClock,
    tree: Tree,
    registry: DependencyRegistry,
    queue: WorkQueue,
    tasks: FxHashMap<TaskId, RenderTask>,
    /// Live task per (root, priority).
    subjects: FxHashMap<(NodeId, Priority), TaskId>,
    next_task: u64,
    current: Option<Pass>,
    gate: CommitGate,
    resources: ResourceCache,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.clock.now())
            .field("nodes", &self.tree.len())
            .field("tasks", &self.tasks.len())
            .field("queued", &self.queue.len())
            .field("running", &self.current.as_ref().map(Pass::task))
            .field("gate", &self.gate)
            .finish()
    }
}

impl Scheduler {
    /// Scheduler with an empty tree. Build content through [`Self::tree_mut`].
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_tree(Tree::new(), config)
    }

    pub fn with_tree(tree: Tree, config: SchedulerConfig) -> Self {
        let registry = DependencyRegistry::new();
        let resources = ResourceCache::new(registry.settler());
        Self {
            clock: VirtualClock::new(config.clock.clone()),
            config,
            tree,
            registry,
            queue: WorkQueue::new(),
            tasks: FxHashMap::default(),
            subjects: FxHashMap::default(),
            next_task: 0,
            current: None,
            gate: CommitGate::new(),
            resources,
        }
    }

    // =========================================================================
    // Host API
    // =========================================================================

    /// Register a callback invoked once per commit.
    pub fn on_commit<F>(&mut self, publish: F)
    where
        F: FnMut(&Commit) + 'static,
    {
        self.gate.subscribe(Box::new(publish));
    }

    /// Request a render of `root`. A live request for the same root and
    /// priority is superseded.
    pub fn schedule(&mut self, root: NodeId, priority: Priority) -> Result<TaskHandle, SchedulerError> {
        if !self.tree.contains(root) {
            return Err(SchedulerError::UnknownNode(root));
        }
        if let Some(old) = self.subjects.get(&(root, priority)).copied() {
            debug!("queue"; "{} superseded", old);
            self.retire(old, TaskStatus::Superseded);
        }

        self.next_task += 1;
        let id = TaskId(self.next_task);
        let expiration = self.clock.expiration_for(priority);
        let task = RenderTask::new(id, root, priority, expiration);
        self.queue.push(id, priority, expiration, task.seq);
        self.tasks.insert(id, task);
        self.subjects.insert((root, priority), id);
        debug!(
            "queue"; "{} `{}` at {} (expires {})",
            id, self.tree.name(root), priority, expiration
        );

        self.preempt(priority);
        Ok(id)
    }

    /// Run queued work until nothing is runnable.
    pub fn flush_all(&mut self) -> Result<FlushReport, SchedulerError> {
        self.run(Lane::All, None)
    }

    /// Run `thunk`, then resolve every Sync task it queued before returning.
    pub fn flush_sync<R>(
        &mut self,
        thunk: impl FnOnce(&mut Self) -> R,
    ) -> Result<R, SchedulerError> {
        let value = thunk(self);
        self.run(Lane::Sync, None)?;
        Ok(value)
    }

    /// Run at most `budget` render steps of non-sync work. Sync passes
    /// ignore the budget.
    pub fn work(&mut self, budget: usize) -> Result<FlushReport, SchedulerError> {
        self.run(Lane::All, Some(budget))
    }

    /// One cooperative slice of `executor.slice_budget` steps.
    pub fn tick(&mut self) -> Result<FlushReport, SchedulerError> {
        self.work(self.config.executor.slice_budget)
    }

    pub fn advance_time(&mut self, delta: u64) -> Time {
        self.clock.advance(delta)
    }

    pub fn now(&self) -> Time {
        self.clock.now()
    }

    /// Handle for settling tokens from anywhere.
    pub fn settler(&self) -> Settler {
        self.registry.settler()
    }

    /// Settle `token`. Takes effect when the scheduler next looks for work.
    pub fn settle(&self, token: Token, outcome: Outcome) {
        self.registry.settler().settle(token, outcome);
    }

    /// Resource cache wired to this scheduler's settler. Clones share entries.
    pub fn resources(&self) -> ResourceCache {
        self.resources.clone()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Mutable tree access. Any in-progress pass is discarded and re-queued,
    /// and memoized outputs are dropped.
    pub fn tree_mut(&mut self) -> &mut Tree {
        self.interrupt();
        for task in self.tasks.values_mut() {
            task.memo.clear();
        }
        &mut self.tree
    }

    /// Unmount `node` and retire tasks rooted inside it.
    pub fn unmount(&mut self, node: NodeId) -> Result<Vec<NodeId>, SchedulerError> {
        let removed = self.tree_mut().unmount(node)?;
        let orphans: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| t.status.is_live() && removed.contains(&t.root))
            .map(|t| t.id)
            .collect();
        for id in orphans {
            self.retire(id, TaskStatus::Superseded);
        }
        Ok(removed)
    }

    pub fn task_status(&self, task: TaskHandle) -> Option<TaskStatus> {
        self.tasks.get(&task).map(|t| t.status)
    }

    pub fn task_info(&self, task: TaskHandle) -> Option<TaskInfo> {
        self.tasks
            .get(&task)
            .map(|t| t.info(self.registry.blocked_on(task)))
    }

    pub fn boundary(&self, node: NodeId) -> Option<&Boundary> {
        self.tree.boundary_of(node)
    }

    pub fn boundary_mode(&self, node: NodeId) -> Option<BoundaryMode> {
        self.boundary(node).map(Boundary::mode)
    }

    /// Latest commit of `root`.
    pub fn committed(&self, root: NodeId) -> Option<&Commit> {
        self.gate.committed(root)
    }

    pub fn commit_count(&self) -> u64 {
        self.gate.count()
    }

    /// Something is queued or a pass is in progress.
    pub fn has_pending_work(&self) -> bool {
        self.current.is_some() || !self.queue.is_empty()
    }

    /// Earliest timer any live task waits for.
    pub fn next_deadline(&self) -> Option<Time> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Blocked)
            .filter_map(|t| self.registry.next_timer(t.id))
            .min()
    }

    // =========================================================================
    // Driving passes
    // =========================================================================

    fn run(&mut self, lane: Lane, mut budget: Option<usize>) -> Result<FlushReport, SchedulerError> {
        let mut report = FlushReport::default();
        loop {
            if self.current.is_none() {
                self.pump();
                let next = if lane == Lane::Sync || budget == Some(0) {
                    self.queue.pop_sync()
                } else {
                    self.queue.pop()
                };
                let Some(id) = next else {
                    report.yielded = lane == Lane::All && !self.queue.is_empty();
                    break;
                };
                if !self.begin(id) {
                    continue;
                }
                report.passes += 1;
            }

            let Some(pass) = self.current.as_mut() else {
                continue;
            };
            let sync = pass.priority().is_sync();
            if lane == Lane::Sync && !sync {
                break;
            }

            let mut input = PassInput {
                tree: &self.tree,
                registry: &mut self.registry,
                prior: self.gate.prior(pass.root()),
                defaults: &self.config.boundary,
                now: self.clock.now(),
            };
            let mut done = pass.is_done();
            while !done {
                if !sync && budget == Some(0) {
                    report.yielded = true;
                    return Ok(report);
                }
                done = pass.step(&mut input);
                report.steps += 1;
                if let Some(left) = budget.as_mut() {
                    *left = left.saturating_sub(1);
                }
            }

            if let Some(pass) = self.current.take() {
                self.complete(pass, &mut report)?;
            }
        }
        Ok(report)
    }

    /// Start a pass for `id`. Returns `false` when the task cannot run.
    fn begin(&mut self, id: TaskId) -> bool {
        let Some(task) = self.tasks.get(&id) else {
            return false;
        };
        if !task.status.is_live() {
            return false;
        }
        if !self.tree.contains(task.root) {
            self.retire(id, TaskStatus::Superseded);
            return false;
        }

        self.registry.release(id);
        let Some(task) = self.tasks.get_mut(&id) else {
            return false;
        };
        task.status = TaskStatus::Pending;
        task.passes += 1;
        debug!(
            "sched"; "begin {} `{}` ({}, pass {})",
            id, self.tree.name(task.root), task.priority, task.passes
        );
        let memo = std::mem::take(&mut task.memo);
        let pass = Pass::new(id, task.root, task.priority, task.expiration, memo)
            .with_rejections(task.rejected.clone());
        self.current = Some(pass);
        true
    }

    fn complete(&mut self, pass: Pass, report: &mut FlushReport) -> Result<(), SchedulerError> {
        let (id, root, priority) = (pass.task(), pass.root(), pass.priority());
        let mut result = pass.finish();
        let verdict = Verdict::of(&result, priority);

        if let Some((node, error)) = result.uncaught.take() {
            self.retire(id, TaskStatus::Failed);
            debug!("error"; "{} aborted at `{}`: {}", id, self.tree.name(node), error);
            return Err(SchedulerError::Uncaught {
                task: id,
                node,
                name: self.tree.name(node).to_string(),
                error,
            });
        }

        let committed = verdict == Verdict::Commit;
        self.apply_updates(&result.updates, committed);
        if committed {
            let commit = Commit {
                seq: 0,
                task: id,
                root,
                priority,
                at: self.clock.now(),
                forced: result.forced,
                partial: !result.suspensions.is_empty(),
                tree: result.output.take(),
            };
            let published = self.gate.publish(commit);
            debug!("commit"; "{}", published);
            report.commits += 1;
        } else {
            debug!(
                "commit"; "{} held: {} suspended, {} boundaries waiting",
                id, result.suspensions.len(), result.pending.len()
            );
        }

        let wakes = self.park(id, &result);
        let waiting = self.registry.is_waiting(id);
        let Some(task) = self.tasks.get_mut(&id) else {
            return Ok(());
        };
        task.memo = std::mem::take(&mut result.memo);
        if committed {
            task.commits += 1;
        }

        if committed && result.is_complete() {
            task.status = TaskStatus::Committed;
            task.memo.clear();
            if self.subjects.get(&(root, priority)) == Some(&id) {
                self.subjects.remove(&(root, priority));
            }
        } else if waiting {
            task.status = TaskStatus::Blocked;
            debug!("suspend"; "{} blocked on {:?}", id, self.registry.blocked_on(id));
        }

        self.wake(wakes);
        if !waiting && self.task_status(id).is_some_and(TaskStatus::is_live) {
            // Everything it suspended on already settled.
            self.requeue(id);
        }
        Ok(())
    }

    /// Record the waits and deadlines of a finished pass.
    fn park(&mut self, id: TaskId, result: &PassResult) -> Vec<Wake> {
        let mut wakes = Vec::new();
        let mut suspended = FxHashMap::default();
        for suspension in &result.suspensions {
            suspended.insert(suspension.token, suspension.node);
            // Already settled: the next pass reports it at the node.
            if !self.registry.wait(id, suspension.token) {
                wakes.push(Wake::Retry(id));
            }
        }
        for pending in &result.pending {
            if let Some(at) = pending.wake_at {
                self.registry.timer(id, at);
            }
        }
        if let Some(task) = self.tasks.get_mut(&id) {
            task.suspended = suspended;
        }
        wakes
    }

    fn apply_updates(&mut self, updates: &[BoundaryUpdate], committed: bool) {
        for update in updates {
            let Some(id) = self.tree.node(update.node).and_then(Node::boundary) else {
                continue;
            };
            let Some(state) = self.tree.boundary_mut(id) else {
                continue;
            };
            let applied = if committed {
                Some(*update)
            } else {
                update.uncommitted(state.mode())
            };
            if let Some(update) = applied {
                if update.next != state.mode() {
                    debug!("boundary"; "{} {:?} -> {:?}", update.node, state.mode(), update.next);
                }
                state.apply(&update);
            }
        }
    }

    // =========================================================================
    // Task bookkeeping
    // =========================================================================

    /// Apply pending settlements and due timers.
    fn pump(&mut self) {
        let wakes = self.registry.drain(self.clock.now());
        self.wake(wakes);
    }

    fn wake(&mut self, wakes: Vec<Wake>) {
        for wake in wakes {
            match wake {
                Wake::Retry(id) => self.requeue(id),
                Wake::Fail(id, error) => self.reject(id, error),
            }
        }
    }

    /// Fail the node that suspended on the rejected token. The task runs
    /// again right away so the failure reaches an error boundary or aborts
    /// the task; it is never retried as if the data had arrived.
    fn reject(&mut self, id: TaskId, error: RenderError) {
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        let Some(node) = error.token().and_then(|token| task.suspended.get(&token).copied()) else {
            return;
        };
        debug!("error"; "{} dependency of {} failed: {}", id, node, error);
        task.rejected.insert(node, error);
        self.requeue(id);
    }

    /// Make a live task eligible again at its original priority. Sync work
    /// continues at `Normal`, since only `flush_sync` runs sync passes.
    fn requeue(&mut self, id: TaskId) {
        let running = self.current.as_ref().is_some_and(|p| p.task() == id);
        let Some(task) = self.tasks.get(&id) else {
            return;
        };
        if !task.status.is_live() || running || self.queue.contains(id) {
            return;
        }

        let (root, from) = (task.root, task.priority);
        let to = from.retry();
        if to != from {
            if let Some(&other) = self.subjects.get(&(root, to))
                && other != id
            {
                // A newer request at that priority already covers the root.
                self.retire(id, TaskStatus::Superseded);
                return;
            }
            if self.subjects.get(&(root, from)) == Some(&id) {
                self.subjects.remove(&(root, from));
            }
            self.subjects.insert((root, to), id);
        }

        let expiration = if to != from {
            self.clock.expiration_for(to)
        } else {
            task.expiration
        };
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        task.priority = to;
        task.expiration = expiration;
        task.status = TaskStatus::Pending;
        self.queue.push(id, to, expiration, task.seq);
        debug!("sched"; "retry {} at {}", id, to);
    }

    /// Discard the in-progress pass if strictly lower than `priority`.
    fn preempt(&mut self, priority: Priority) {
        if self
            .current
            .as_ref()
            .is_some_and(|pass| priority > pass.priority())
        {
            debug!("sched"; "preempted by {} work", priority);
            self.interrupt();
        }
    }

    /// Drop the in-progress pass and queue its task to start over.
    fn interrupt(&mut self) {
        let Some(pass) = self.current.take() else {
            return;
        };
        let id = pass.task();
        drop(pass);
        if let Some(task) = self.tasks.get_mut(&id) {
            task.memo.clear();
            self.queue.push(id, task.priority, task.expiration, task.seq);
        }
    }

    fn retire(&mut self, id: TaskId, status: TaskStatus) {
        if self.current.as_ref().is_some_and(|p| p.task() == id) {
            self.current = None;
        }
        self.queue.remove(id);
        self.registry.release(id);
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };
        task.status = status;
        task.memo.clear();
        if self.subjects.get(&(task.root, task.priority)) == Some(&id) {
            self.subjects.remove(&(task.root, task.priority));
        }
    }
}
