//! Node arena the scheduler renders from.
//!
//! Nodes own their child lists; parents are plain indices, so bubbling a
//! suspension upward is an index walk. Boundary state lives in a second
//! arena keyed by [`BoundaryId`] and survives every re-render of the same
//! node until the node is unmounted.
//!
//! ```text
//! app ─┬─ header
//!      └─ <suspense feed> ─┬─ primary:  post, post
//!                          └─ fallback: spinner
//! ```

mod render;

pub use render::{DisplayMode, RenderContext, RenderFn, RenderOutcome};

use smallvec::SmallVec;

use crate::boundary::{Boundary, BoundaryProps};
use crate::core::{BoundaryId, NodeId, SchedulerError};

/// Which child list of its parent a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Primary,
    /// Alternate content, rendered only by boundaries.
    Fallback,
}

/// Where to attach a new node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Detached entry node, usable as a task root.
    Root,
    Child(NodeId),
    Fallback(NodeId),
}

impl From<NodeId> for Position {
    fn from(parent: NodeId) -> Self {
        Self::Child(parent)
    }
}

pub enum NodeKind {
    Element(RenderFn),
    Suspense(BoundaryId),
    ErrorBoundary,
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Element(_) => "element",
            Self::Suspense(_) => "suspense",
            Self::ErrorBoundary => "error-boundary",
        }
    }
}

impl std::fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Suspense(id) => write!(f, "Suspense({id})"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug)]
pub struct Node {
    name: String,
    parent: Option<NodeId>,
    slot: Slot,
    kind: NodeKind,
    children: SmallVec<[NodeId; 4]>,
    fallback: SmallVec<[NodeId; 2]>,
    mounted: bool,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn fallback(&self) -> &[NodeId] {
        &self.fallback
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn boundary(&self) -> Option<BoundaryId> {
        match self.kind {
            NodeKind::Suspense(id) => Some(id),
            _ => None,
        }
    }
}

/// Arena of nodes plus the boundary state they own.
#[derive(Debug, Default)]
pub struct Tree {
    nodes: Vec<Node>,
    boundaries: Vec<Option<Boundary>>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Add an element whose render step is `render`.
    pub fn element<F>(
        &mut self,
        at: impl Into<Position>,
        name: impl Into<String>,
        render: F,
    ) -> Result<NodeId, SchedulerError>
    where
        F: Fn(&mut RenderContext<'_>) -> RenderOutcome + 'static,
    {
        self.insert(at.into(), name.into(), NodeKind::Element(Box::new(render)))
    }

    /// Add an element that always renders `text`.
    pub fn text(
        &mut self,
        at: impl Into<Position>,
        name: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<NodeId, SchedulerError> {
        let text = text.into();
        self.element(at, name, move |_| RenderOutcome::Ready(text.clone()))
    }

    /// Add a structural element with empty output.
    pub fn group(
        &mut self,
        at: impl Into<Position>,
        name: impl Into<String>,
    ) -> Result<NodeId, SchedulerError> {
        self.element(at, name, |_| RenderOutcome::Ready(String::new()))
    }

    /// Add a suspense boundary. Its children are the primary content; use
    /// [`Position::Fallback`] to add fallback content.
    pub fn suspense(
        &mut self,
        at: impl Into<Position>,
        name: impl Into<String>,
        props: BoundaryProps,
    ) -> Result<NodeId, SchedulerError> {
        let boundary = BoundaryId(self.boundaries.len() as u32);
        let node = self.insert(at.into(), name.into(), NodeKind::Suspense(boundary))?;
        self.boundaries.push(Some(Boundary::new(node, props)));
        Ok(node)
    }

    /// Add an error boundary. Its fallback renders in place of the primary
    /// content when a failure bubbles up to it.
    pub fn error_boundary(
        &mut self,
        at: impl Into<Position>,
        name: impl Into<String>,
    ) -> Result<NodeId, SchedulerError> {
        self.insert(at.into(), name.into(), NodeKind::ErrorBoundary)
    }

    fn insert(
        &mut self,
        at: Position,
        name: String,
        kind: NodeKind,
    ) -> Result<NodeId, SchedulerError> {
        let id = NodeId(self.nodes.len() as u32);
        let (parent, slot) = match at {
            Position::Root => (None, Slot::Primary),
            Position::Child(parent) => (Some(parent), Slot::Primary),
            Position::Fallback(parent) => (Some(parent), Slot::Fallback),
        };

        if let Some(parent) = parent {
            let node = self
                .nodes
                .get_mut(parent.index())
                .filter(|n| n.mounted)
                .ok_or(SchedulerError::UnknownNode(parent))?;
            match slot {
                Slot::Primary => node.children.push(id),
                Slot::Fallback => node.fallback.push(id),
            }
        }

        self.nodes.push(Node {
            name,
            parent,
            slot,
            kind,
            children: SmallVec::new(),
            fallback: SmallVec::new(),
            mounted: true,
        });
        Ok(id)
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Replace an element's render step.
    pub fn set_render<F>(&mut self, node: NodeId, render: F) -> Result<(), SchedulerError>
    where
        F: Fn(&mut RenderContext<'_>) -> RenderOutcome + 'static,
    {
        let entry = self.get_mut(node)?;
        entry.kind = NodeKind::Element(Box::new(render));
        Ok(())
    }

    /// Detach `node` and its subtree. Boundaries inside are destroyed.
    /// Returns every node that was unmounted.
    pub fn unmount(&mut self, node: NodeId) -> Result<Vec<NodeId>, SchedulerError> {
        let parent = self.get(node)?.parent;
        if let Some(parent) = parent.and_then(|p| self.nodes.get_mut(p.index())) {
            parent.children.retain(|c| *c != node);
            parent.fallback.retain(|c| *c != node);
        }

        let mut removed = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let Some(entry) = self.nodes.get_mut(id.index()) else {
                continue;
            };
            entry.mounted = false;
            stack.extend(entry.children.iter().chain(entry.fallback.iter()).copied());
            if let NodeKind::Suspense(boundary) = entry.kind
                && let Some(slot) = self.boundaries.get_mut(boundary.index())
            {
                *slot = None;
            }
            removed.push(id);
        }
        Ok(removed)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get(&self, node: NodeId) -> Result<&Node, SchedulerError> {
        self.nodes
            .get(node.index())
            .filter(|n| n.mounted)
            .ok_or(SchedulerError::UnknownNode(node))
    }

    fn get_mut(&mut self, node: NodeId) -> Result<&mut Node, SchedulerError> {
        self.nodes
            .get_mut(node.index())
            .filter(|n| n.mounted)
            .ok_or(SchedulerError::UnknownNode(node))
    }

    /// Mounted node, or `None` for unknown/unmounted handles.
    pub fn node(&self, node: NodeId) -> Option<&Node> {
        self.get(node).ok()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.node(node).is_some()
    }

    pub fn name(&self, node: NodeId) -> &str {
        self.nodes
            .get(node.index())
            .map(|n| n.name.as_str())
            .unwrap_or("?")
    }

    pub fn boundary(&self, id: BoundaryId) -> Option<&Boundary> {
        self.boundaries.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn boundary_mut(&mut self, id: BoundaryId) -> Option<&mut Boundary> {
        self.boundaries.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Boundary state owned by a suspense node.
    pub fn boundary_of(&self, node: NodeId) -> Option<&Boundary> {
        self.node(node)
            .and_then(Node::boundary)
            .and_then(|id| self.boundary(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
