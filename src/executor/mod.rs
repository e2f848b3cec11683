//! Render task executor.
//!
//! A [`Pass`] walks the tree from a task's root with an explicit frame stack,
//! one frame per [`Pass::step`]. Because all traversal state lives in the
//! pass, the scheduler can stop between any two steps and resume later, or
//! drop the pass entirely when it is preempted.
//!
//! # Suspension routing
//!
//! A suspended node goes to the enclosing suspense boundaries that are still
//! rendering primary content, up to the nearest one rendering its fallback:
//!
//! - one of them already captured in this pass → the outermost such one
//! - otherwise → the innermost one
//! - none, but a fallback is being rendered → that fallback is blocked
//! - nothing at all → uncaptured hole
//!
//! Failures go to the nearest error boundary still rendering its primary
//! content, or abort the pass. A node whose dependency was rejected fails
//! in place of rendering on the task's next pass.

mod output;

pub use output::OutputNode;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::boundary::{
    BoundaryMode, BoundaryUpdate, CaptureFacts, Deadlines, Resolution, decide,
};
use crate::clock::Time;
use crate::config::BoundaryConfig;
use crate::core::{BoundaryId, NodeId, Priority, RenderError, TaskId, Token};
use crate::debug;
use crate::registry::DependencyRegistry;
use crate::tree::{DisplayMode, Node, NodeKind, RenderContext, RenderOutcome, Tree};

/// Ready outputs of a task, reused by its later passes.
pub type Memo = FxHashMap<NodeId, MemoEntry>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoEntry {
    mode: DisplayMode,
    text: String,
}

/// Everything a step reads or mutates outside the pass itself.
pub struct PassInput<'a> {
    pub tree: &'a Tree,
    pub registry: &'a mut DependencyRegistry,
    /// Last committed output of the task's root, by node.
    pub prior: Option<&'a FxHashMap<NodeId, OutputNode>>,
    pub defaults: &'a BoundaryConfig,
    pub now: Time,
}

impl PassInput<'_> {
    fn prior(&self, node: NodeId) -> Option<&OutputNode> {
        self.prior.and_then(|p| p.get(&node))
    }
}

/// Where a suspension was routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Primary content of a suspense boundary.
    Boundary(NodeId),
    /// Fallback content of a suspense boundary.
    Fallback(NodeId),
    /// One node with no boundary above it.
    Node(NodeId),
}

/// A node that suspended during the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suspension {
    pub node: NodeId,
    pub token: Token,
    pub region: Region,
}

/// A captured boundary that may not show its fallback yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingBoundary {
    pub node: NodeId,
    /// When to look again; `None` for sync work that cannot wait.
    pub wake_at: Option<Time>,
}

// =============================================================================
// Frames and scopes
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Frame {
    Enter(NodeId),
    /// Attach the innermost open output node to its parent.
    Close,
    PrimaryDone(NodeId),
    FallbackDone(NodeId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Suspense(BoundaryId),
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Primary,
    Fallback,
}

/// Lengths of the pass records when a scope was entered.
#[derive(Debug, Clone, Copy)]
struct Marks {
    suspensions: usize,
    updates: usize,
    pending: usize,
    open: usize,
    stack: usize,
}

/// An enclosing boundary that is being rendered.
#[derive(Debug)]
struct Scope {
    node: NodeId,
    kind: ScopeKind,
    phase: Phase,
    captured: bool,
    fallback_blocked: bool,
    error: Option<RenderError>,
    deadlines: Option<Deadlines>,
    marks: Marks,
}

// =============================================================================
// Pass
// =============================================================================

/// One traversal of a task's subtree.
#[derive(Debug)]
pub struct Pass {
    task: TaskId,
    root: NodeId,
    priority: Priority,
    expiration: Time,
    stack: Vec<Frame>,
    open: Vec<OutputNode>,
    scopes: Vec<Scope>,
    output: Option<OutputNode>,
    suspensions: Vec<Suspension>,
    pending: Vec<PendingBoundary>,
    updates: Vec<BoundaryUpdate>,
    forced: bool,
    memo: Memo,
    next_memo: Memo,
    /// Nodes that fail instead of rendering.
    rejected: FxHashMap<NodeId, RenderError>,
    uncaught: Option<(NodeId, RenderError)>,
    steps: usize,
}

/// What a finished pass produced.
#[derive(Debug)]
pub struct PassResult {
    pub output: Option<OutputNode>,
    pub suspensions: Vec<Suspension>,
    pub pending: Vec<PendingBoundary>,
    pub updates: Vec<BoundaryUpdate>,
    /// Some fallback is shown because a deadline passed.
    pub forced: bool,
    pub memo: Memo,
    pub uncaught: Option<(NodeId, RenderError)>,
    pub steps: usize,
}

impl PassResult {
    /// Nothing suspended and no boundary is waiting.
    pub fn is_complete(&self) -> bool {
        self.suspensions.is_empty() && self.pending.is_empty()
    }

    /// Whether sync work may commit this output: every suspension is shown
    /// behind a fallback that itself rendered.
    pub fn sync_committable(&self) -> bool {
        self.pending.is_empty()
            && self
                .suspensions
                .iter()
                .all(|s| matches!(s.region, Region::Boundary(_)))
    }
}

impl Pass {
    pub fn new(task: TaskId, root: NodeId, priority: Priority, expiration: Time, memo: Memo) -> Self {
        Self {
            task,
            root,
            priority,
            expiration,
            stack: vec![Frame::Enter(root)],
            open: Vec::new(),
            scopes: Vec::new(),
            output: None,
            suspensions: Vec::new(),
            pending: Vec::new(),
            updates: Vec::new(),
            forced: false,
            memo,
            next_memo: Memo::default(),
            rejected: FxHashMap::default(),
            uncaught: None,
            steps: 0,
        }
    }

    /// Fail `rejected` nodes with their dependency's error instead of
    /// calling their render step.
    pub fn with_rejections(mut self, rejected: FxHashMap<NodeId, RenderError>) -> Self {
        self.rejected = rejected;
        self
    }

    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn is_done(&self) -> bool {
        self.stack.is_empty()
    }

    /// Run one frame. Returns `true` once the pass is finished.
    pub fn step(&mut self, input: &mut PassInput<'_>) -> bool {
        let Some(frame) = self.stack.pop() else {
            return true;
        };
        self.steps += 1;
        match frame {
            Frame::Enter(node) => self.enter(node, input),
            Frame::Close => self.close(),
            Frame::PrimaryDone(node) => self.primary_done(node, input),
            Frame::FallbackDone(node) => self.fallback_done(node, input),
        }
        self.stack.is_empty()
    }

    pub fn finish(self) -> PassResult {
        PassResult {
            output: self.output,
            suspensions: self.suspensions,
            pending: self.pending,
            updates: self.updates,
            forced: self.forced,
            memo: self.next_memo,
            uncaught: self.uncaught,
            steps: self.steps,
        }
    }

    // =========================================================================
    // Frames
    // =========================================================================

    fn enter(&mut self, node: NodeId, input: &mut PassInput<'_>) {
        let tree = input.tree;
        let Some(entry) = tree.node(node) else {
            return;
        };
        let kind = match entry.kind() {
            NodeKind::Element(_) => return self.render(node, entry, input),
            NodeKind::Suspense(boundary) => ScopeKind::Suspense(*boundary),
            NodeKind::ErrorBoundary => ScopeKind::Error,
        };

        self.open.push(OutputNode::new(node, entry.name(), ""));
        self.stack.push(Frame::PrimaryDone(node));
        let marks = self.marks();
        self.scopes.push(Scope {
            node,
            kind,
            phase: Phase::Primary,
            captured: false,
            fallback_blocked: false,
            error: None,
            deadlines: None,
            marks,
        });
        self.push_children(entry.children());
    }

    fn render(&mut self, node: NodeId, entry: &Node, input: &mut PassInput<'_>) {
        let NodeKind::Element(render) = entry.kind() else {
            return;
        };
        if let Some(error) = self.rejected.get(&node) {
            let error = error.clone();
            return self.fail(node, error);
        }
        let mode = self.display_mode(input.now);
        let error = self.caught_error().cloned();

        let memoized = match self.memo.get(&node) {
            Some(hit) if error.is_none() && hit.mode == mode => Some(hit.text.clone()),
            _ => None,
        };
        let outcome = match memoized {
            Some(text) => RenderOutcome::Ready(text),
            None => {
                let mut ctx = RenderContext {
                    node,
                    name: entry.name(),
                    now: input.now,
                    priority: self.priority,
                    mode,
                    error: error.as_ref(),
                    mint: input.registry.mint_mut(),
                };
                render(&mut ctx)
            }
        };

        match outcome {
            RenderOutcome::Ready(text) => {
                if error.is_none() {
                    self.next_memo.insert(
                        node,
                        MemoEntry {
                            mode,
                            text: text.clone(),
                        },
                    );
                }
                self.open.push(OutputNode::new(node, entry.name(), text));
                self.stack.push(Frame::Close);
                self.push_children(entry.children());
            }
            RenderOutcome::Suspended(token) if input.registry.is_settled(token) => {
                let error =
                    RenderError::new(format!("suspended on dependency {token} that already settled"));
                self.fail(node, error);
            }
            RenderOutcome::Suspended(token) => self.suspend(node, token, input),
            RenderOutcome::Failed(error) => self.fail(node, error),
        }
    }

    fn close(&mut self) {
        if let Some(done) = self.open.pop() {
            self.attach(done);
        }
    }

    fn primary_done(&mut self, node: NodeId, input: &mut PassInput<'_>) {
        let Some(scope) = self.scopes.last() else {
            return;
        };
        let (kind, marks, captured, failed) =
            (scope.kind, scope.marks, scope.captured, scope.error.is_some());

        match kind {
            ScopeKind::Suspense(boundary) if captured => {
                // Capturing discards the primary subtree, including whatever
                // boundaries nested inside it decided.
                self.updates.truncate(marks.updates);
                self.pending.truncate(marks.pending);
                for suspension in &mut self.suspensions[marks.suspensions..] {
                    suspension.region = Region::Boundary(node);
                }

                let deadlines = input.tree.boundary(boundary).map(|state| {
                    Deadlines::compute(state, input.defaults, self.priority, self.expiration, input.now)
                });
                if let Some(scope) = self.scopes.last_mut() {
                    scope.phase = Phase::Fallback;
                    scope.deadlines = deadlines;
                }
                self.begin_fallback(node, input.tree);
            }
            ScopeKind::Suspense(boundary) => {
                let leaving = input
                    .tree
                    .boundary(boundary)
                    .is_some_and(|state| state.mode() != BoundaryMode::Idle);
                if leaving {
                    self.updates.push(BoundaryUpdate {
                        node,
                        task: self.task,
                        next: BoundaryMode::Idle,
                        captured_at: input.now,
                        did_expire: false,
                    });
                }
                self.scopes.pop();
                self.close();
            }
            ScopeKind::Error if failed => {
                self.suspensions.truncate(marks.suspensions);
                self.updates.truncate(marks.updates);
                self.pending.truncate(marks.pending);
                if let Some(scope) = self.scopes.last_mut() {
                    scope.phase = Phase::Fallback;
                }
                self.begin_fallback(node, input.tree);
            }
            ScopeKind::Error => {
                self.scopes.pop();
                self.close();
            }
        }
    }

    fn begin_fallback(&mut self, node: NodeId, tree: &Tree) {
        if let Some(out) = self.open.last_mut() {
            out.children.clear();
        }
        self.stack.push(Frame::FallbackDone(node));
        if let Some(entry) = tree.node(node) {
            self.push_children(entry.fallback());
        }
    }

    fn fallback_done(&mut self, node: NodeId, input: &mut PassInput<'_>) {
        let Some(scope) = self.scopes.pop() else {
            return;
        };
        let ScopeKind::Suspense(boundary) = scope.kind else {
            self.close();
            return;
        };
        let (Some(state), Some(deadlines)) = (input.tree.boundary(boundary), scope.deadlines) else {
            self.close();
            return;
        };

        let facts = CaptureFacts {
            priority: self.priority,
            expiration: self.expiration,
            now: input.now,
            fallback_blocked: scope.fallback_blocked,
        };
        let resolution = decide(state, &deadlines, &facts);
        debug!("boundary"; "{} ({}) -> {:?}", input.tree.name(node), node, resolution);

        match resolution {
            Resolution::ShowFallback { forced } => {
                self.forced |= forced;
                self.updates.push(BoundaryUpdate {
                    node,
                    task: self.task,
                    next: BoundaryMode::ShowingFallback,
                    captured_at: deadlines.captured_at,
                    did_expire: forced,
                });
                let retained = self.retained_primary(node, input);
                if let Some(out) = self.open.last_mut() {
                    let fallback = std::mem::replace(&mut out.children, retained);
                    out.children.extend(fallback);
                }
                self.close();
            }
            Resolution::Wait { .. } | Resolution::SyncBlocked => {
                let wake_at = match resolution {
                    Resolution::Wait { wake_at } => Some(wake_at),
                    _ => None,
                };
                self.pending.push(PendingBoundary { node, wake_at });
                self.updates.push(BoundaryUpdate {
                    node,
                    task: self.task,
                    next: BoundaryMode::Capturing,
                    captured_at: deadlines.captured_at,
                    did_expire: false,
                });
                // Keep whatever the boundary showed before.
                self.open.pop();
                if let Some(previous) = input.prior(node) {
                    self.attach(previous.clone());
                }
            }
        }
    }

    /// Previously committed primary content of `node`, hidden.
    fn retained_primary(&self, node: NodeId, input: &PassInput<'_>) -> Vec<OutputNode> {
        let Some(previous) = input.prior(node) else {
            return Vec::new();
        };
        let fallback = input.tree.node(node).map(Node::fallback).unwrap_or_default();
        previous
            .children
            .iter()
            .filter(|child| !fallback.contains(&child.node))
            .map(OutputNode::retained)
            .collect()
    }

    // =========================================================================
    // Suspension and failure
    // =========================================================================

    fn suspend(&mut self, node: NodeId, token: Token, input: &PassInput<'_>) {
        let region = self.route(node);
        debug!("suspend"; "{} ({}) on {} -> {:?}", input.tree.name(node), node, token, region);
        self.suspensions.push(Suspension {
            node,
            token,
            region,
        });

        // Uncaptured hole: keep the last committed output, hidden.
        if let Some(previous) = input.prior(node) {
            self.attach(previous.retained());
        }
    }

    fn route(&mut self, node: NodeId) -> Region {
        let mut candidates: SmallVec<[usize; 4]> = SmallVec::new();
        let mut fallback_owner = None;
        for (i, scope) in self.scopes.iter().enumerate().rev() {
            if scope.kind == ScopeKind::Error {
                continue;
            }
            match scope.phase {
                Phase::Primary => candidates.push(i),
                Phase::Fallback => {
                    fallback_owner = Some(i);
                    break;
                }
            }
        }

        // `candidates` runs innermost to outermost.
        let target = candidates
            .iter()
            .rev()
            .find(|i| self.scopes[**i].captured)
            .or(candidates.first())
            .copied();
        if let Some(i) = target {
            let scope = &mut self.scopes[i];
            scope.captured = true;
            return Region::Boundary(scope.node);
        }
        if let Some(i) = fallback_owner {
            let scope = &mut self.scopes[i];
            scope.fallback_blocked = true;
            return Region::Fallback(scope.node);
        }
        Region::Node(node)
    }

    fn fail(&mut self, node: NodeId, error: RenderError) {
        let handler = self
            .scopes
            .iter()
            .rposition(|s| s.kind == ScopeKind::Error && s.phase == Phase::Primary);
        let Some(i) = handler else {
            debug!("error"; "{} uncaught: {}", node, error);
            self.uncaught = Some((node, error));
            self.stack.clear();
            return;
        };

        // Unwind to the handler; its primary content is discarded anyway.
        let marks = self.scopes[i].marks;
        self.scopes[i].error.get_or_insert(error);
        self.scopes.truncate(i + 1);
        self.open.truncate(marks.open);
        self.stack.truncate(marks.stack);
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn marks(&self) -> Marks {
        Marks {
            suspensions: self.suspensions.len(),
            updates: self.updates.len(),
            pending: self.pending.len(),
            open: self.open.len(),
            stack: self.stack.len(),
        }
    }

    fn push_children(&mut self, children: &[NodeId]) {
        self.stack
            .extend(children.iter().rev().map(|child| Frame::Enter(*child)));
    }

    fn attach(&mut self, out: OutputNode) {
        match self.open.last_mut() {
            Some(parent) => parent.children.push(out),
            None => self.output = Some(out),
        }
    }

    /// Mode of the innermost suspense boundary being rendered.
    fn display_mode(&self, now: Time) -> DisplayMode {
        let innermost = self
            .scopes
            .iter()
            .rev()
            .find(|s| matches!(s.kind, ScopeKind::Suspense(_)));
        match innermost {
            Some(scope) if scope.phase == Phase::Fallback => DisplayMode::Loading {
                did_expire: scope.deadlines.is_some_and(|d| d.expired(now)),
            },
            _ => DisplayMode::Primary,
        }
    }

    /// Failure an enclosing error boundary is rendering its fallback for.
    fn caught_error(&self) -> Option<&RenderError> {
        self.scopes
            .iter()
            .rev()
            .find(|s| s.kind == ScopeKind::Error)
            .filter(|s| s.phase == Phase::Fallback)
            .and_then(|s| s.error.as_ref())
    }
}

#[cfg(test)]
mod tests;
