//! Render-step contract between the scheduler and host content.

use crate::clock::Time;
use crate::core::{NodeId, Priority, RenderError, Token};
use crate::registry::TokenMint;

/// Host render function attached to an element node.
pub type RenderFn = Box<dyn Fn(&mut RenderContext<'_>) -> RenderOutcome>;

/// Result of one render step.
///
/// Suspension is a plain variant: the executor branches on it and moves on
/// to the next sibling, nothing unwinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Output for this node; children render next.
    Ready(String),
    /// Not ready until `Token` settles. The subtree is skipped this pass.
    Suspended(Token),
    /// Fatal failure, handled by the nearest error boundary.
    Failed(RenderError),
}

impl RenderOutcome {
    pub fn ready(output: impl Into<String>) -> Self {
        Self::Ready(output.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(RenderError::new(message))
    }
}

/// Alternate-view flag a boundary exposes to the content it renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DisplayMode {
    /// Primary content is being rendered.
    #[default]
    Primary,
    /// Fallback content is being rendered for a suspended boundary.
    Loading {
        /// The boundary's deadline passed and the fallback is forced.
        did_expire: bool,
    },
}

impl DisplayMode {
    #[inline]
    pub const fn is_loading(self) -> bool {
        matches!(self, Self::Loading { .. })
    }

    #[inline]
    pub const fn did_expire(self) -> bool {
        matches!(self, Self::Loading { did_expire: true })
    }
}

/// What a render step can see and do.
pub struct RenderContext<'a> {
    pub(crate) node: NodeId,
    pub(crate) name: &'a str,
    pub(crate) now: Time,
    pub(crate) priority: Priority,
    pub(crate) mode: DisplayMode,
    pub(crate) error: Option<&'a RenderError>,
    pub(crate) mint: &'a mut TokenMint,
}

impl RenderContext<'_> {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Virtual time of the pass.
    pub fn now(&self) -> Time {
        self.now
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Display mode of the nearest enclosing suspense boundary.
    pub fn display_mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn is_loading(&self) -> bool {
        self.mode.is_loading()
    }

    pub fn did_expire(&self) -> bool {
        self.mode.did_expire()
    }

    /// Failure being replaced, when rendering an error boundary's fallback.
    pub fn error(&self) -> Option<&RenderError> {
        self.error
    }

    /// Create a fresh dependency token to suspend on.
    pub fn new_token(&mut self) -> Token {
        self.mint.mint()
    }
}
