//! Scripted scenarios.
//!
//! A scenario file declares a tree and a script of host actions. Nodes are
//! listed parents first; steps run in order.
//!
//! ```toml
//! [[node]]
//! id = "page"
//!
//! [[node]]
//! id = "feed"
//! parent = "page"
//! kind = "suspense"
//! debounce = 100
//!
//! [[node]]
//! id = "spinner"
//! parent = "feed"
//! slot = "fallback"
//! text = "Loading..."
//!
//! [[node]]
//! id = "posts"
//! parent = "feed"
//! resource = "posts"
//!
//! [[step]]
//! schedule = "page"
//!
//! [[step]]
//! flush = true
//!
//! [[step]]
//! resolve = "posts"
//! value = "3 posts"
//! ```
//!
//! Element text may use `{value}` (the resource value) and `{error}` (the
//! failure an error boundary caught).

mod error;
mod runner;

pub use error::ScenarioError;
pub use runner::{RunSummary, Runner};

use std::fmt;
use std::{fs, path::Path};

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::boundary::BoundaryProps;
use crate::core::{NodeId, Priority, RenderError};
use crate::log;
use crate::registry::ResourceCache;
use crate::scheduler::Scheduler;
use crate::tree::{Position, RenderContext, RenderOutcome, Tree};

// ============================================================================
// nodes
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKindSpec {
    #[default]
    Element,
    Suspense,
    Error,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotSpec {
    #[default]
    Primary,
    Fallback,
}

/// One `[[node]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub parent: Option<String>,
    #[serde(default)]
    pub slot: SlotSpec,
    #[serde(default)]
    pub kind: NodeKindSpec,
    /// Fixed output, or the template for `resource`.
    pub text: Option<String>,
    /// Resource key the element reads.
    pub resource: Option<String>,
    /// The element always fails with this message.
    pub fail: Option<String>,
    pub debounce: Option<u64>,
    pub timeout: Option<u64>,
}

impl NodeSpec {
    fn check(&self) -> Result<(), ScenarioError> {
        let id = self.id.as_str();
        if id.is_empty() {
            return Err(ScenarioError::bad_node(id, "id must not be empty"));
        }
        match self.kind {
            NodeKindSpec::Element => {
                if self.debounce.is_some() || self.timeout.is_some() {
                    return Err(ScenarioError::bad_node(
                        id,
                        "`debounce` and `timeout` only apply to suspense boundaries",
                    ));
                }
                if self.fail.is_some() && self.resource.is_some() {
                    return Err(ScenarioError::bad_node(id, "`fail` and `resource` are exclusive"));
                }
            }
            NodeKindSpec::Suspense | NodeKindSpec::Error => {
                if self.text.is_some() || self.resource.is_some() || self.fail.is_some() {
                    return Err(ScenarioError::bad_node(
                        id,
                        "boundaries have no content of their own",
                    ));
                }
                if self.kind == NodeKindSpec::Error
                    && (self.debounce.is_some() || self.timeout.is_some())
                {
                    return Err(ScenarioError::bad_node(
                        id,
                        "`debounce` and `timeout` only apply to suspense boundaries",
                    ));
                }
            }
        }
        if self.parent.is_none() && self.slot == SlotSpec::Fallback {
            return Err(ScenarioError::bad_node(id, "a root node has no fallback slot"));
        }
        Ok(())
    }

    fn props(&self) -> BoundaryProps {
        let mut props = BoundaryProps::default();
        if let Some(ticks) = self.debounce {
            props = props.debounce(ticks);
        }
        if let Some(ticks) = self.timeout {
            props = props.timeout(ticks);
        }
        props
    }

    fn insert(
        &self,
        tree: &mut Tree,
        at: Position,
        cache: &ResourceCache,
    ) -> Result<NodeId, ScenarioError> {
        let name = self.id.clone();
        let node = match self.kind {
            NodeKindSpec::Suspense => tree.suspense(at, name, self.props())?,
            NodeKindSpec::Error => tree.error_boundary(at, name)?,
            NodeKindSpec::Element => match (&self.fail, &self.resource, &self.text) {
                (Some(message), _, _) => {
                    let message = message.clone();
                    tree.element(at, name, move |_| RenderOutcome::failed(message.clone()))?
                }
                (None, Some(key), template) => {
                    let (key, template, cache) = (key.clone(), template.clone(), cache.clone());
                    tree.element(at, name, move |ctx| match cache.read(ctx, &key) {
                        RenderOutcome::Ready(value) => RenderOutcome::Ready(match &template {
                            Some(template) => fill(template, ctx, &value),
                            None => value,
                        }),
                        other => other,
                    })?
                }
                (None, None, Some(text)) => {
                    let text = text.clone();
                    tree.element(at, name, move |ctx| RenderOutcome::Ready(fill(&text, ctx, "")))?
                }
                (None, None, None) => tree.group(at, name)?,
            },
        };
        Ok(node)
    }
}

fn fill(template: &str, ctx: &RenderContext<'_>, value: &str) -> String {
    let mut out = template.replace("{value}", value);
    if out.contains("{error}") {
        let message = ctx.error().map(RenderError::message).unwrap_or_default();
        out = out.replace("{error}", message);
    }
    out
}

// ============================================================================
// steps
// ============================================================================

/// One `[[step]]` entry as written. Exactly one action key must be set.
#[derive(Debug, Clone, Default, Deserialize)]
struct StepSpec {
    schedule: Option<String>,
    priority: Option<Priority>,
    flush: Option<bool>,
    flush_sync: Option<String>,
    advance: Option<u64>,
    work: Option<usize>,
    resolve: Option<String>,
    value: Option<String>,
    reject: Option<String>,
    message: Option<String>,
    invalidate: Option<String>,
}

impl StepSpec {
    fn into_step(self, index: usize) -> Result<Step, ScenarioError> {
        let mut actions = Vec::new();
        if let Some(root) = self.schedule {
            actions.push(Step::Schedule {
                root,
                priority: self.priority.unwrap_or(Priority::Normal),
            });
        } else if self.priority.is_some() {
            return Err(ScenarioError::bad_step(index, "`priority` needs `schedule`"));
        }
        match self.flush {
            Some(true) => actions.push(Step::Flush),
            Some(false) | None => {}
        }
        if let Some(root) = self.flush_sync {
            actions.push(Step::FlushSync { root });
        }
        if let Some(ticks) = self.advance {
            actions.push(Step::Advance(ticks));
        }
        if let Some(budget) = self.work {
            actions.push(Step::Work(budget));
        }
        if let Some(key) = self.resolve {
            actions.push(Step::Resolve {
                key,
                value: self.value.unwrap_or_default(),
            });
        }
        if let Some(key) = self.reject {
            actions.push(Step::Reject {
                key,
                message: self.message.unwrap_or_else(|| "rejected".to_string()),
            });
        }
        if let Some(key) = self.invalidate {
            actions.push(Step::Invalidate(key));
        }

        match actions.len() {
            0 => Err(ScenarioError::bad_step(index, "no action given")),
            1 => actions
                .pop()
                .ok_or_else(|| ScenarioError::bad_step(index, "no action given")),
            n => Err(ScenarioError::bad_step(
                index,
                format!("{n} actions given, expected one"),
            )),
        }
    }
}

/// A host action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Schedule { root: String, priority: Priority },
    Flush,
    /// Schedule `root` at `Sync` inside `flush_sync`.
    FlushSync { root: String },
    Advance(u64),
    /// Run at most this many render steps.
    Work(usize),
    Resolve { key: String, value: String },
    Reject { key: String, message: String },
    /// Drop a cached resource so the next read suspends again.
    Invalidate(String),
}

impl Step {
    /// Node this step refers to.
    pub fn root(&self) -> Option<&str> {
        match self {
            Self::Schedule { root, .. } | Self::FlushSync { root } => Some(root.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schedule { root, priority } => write!(f, "schedule `{root}` ({priority})"),
            Self::Flush => f.write_str("flush"),
            Self::FlushSync { root } => write!(f, "flush_sync `{root}`"),
            Self::Advance(ticks) => write!(f, "advance {ticks}"),
            Self::Work(budget) => write!(f, "work {budget}"),
            Self::Resolve { key, value } => write!(f, "resolve `{key}` = {value:?}"),
            Self::Reject { key, message } => write!(f, "reject `{key}`: {message}"),
            Self::Invalidate(key) => write!(f, "invalidate `{key}`"),
        }
    }
}

// ============================================================================
// scenario
// ============================================================================

#[derive(Debug, Deserialize)]
struct ScenarioFile {
    #[serde(default, rename = "node")]
    nodes: Vec<NodeSpec>,
    #[serde(default, rename = "step")]
    steps: Vec<StepSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scenario {
    pub nodes: Vec<NodeSpec>,
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Parse and validate a scenario.
    pub fn from_str(content: &str) -> Result<Self, ScenarioError> {
        let (scenario, ignored) = Self::parse_with_ignored(content)?;
        if !ignored.is_empty() {
            log!("warning"; "unknown fields in scenario, ignoring: {}", ignored.join(", "));
        }
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn from_path(path: &Path) -> Result<Self, ScenarioError> {
        let content =
            fs::read_to_string(path).map_err(|err| ScenarioError::Io(path.to_path_buf(), err))?;
        let (scenario, ignored) = Self::parse_with_ignored(&content)?;
        if !ignored.is_empty() {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "scenario".to_string());
            log!("warning"; "unknown fields in {}, ignoring: {}", name, ignored.join(", "));
        }
        scenario.validate()?;
        Ok(scenario)
    }

    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>), ScenarioError> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let file: ScenarioFile = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })?;

        let steps = file
            .steps
            .into_iter()
            .enumerate()
            .map(|(i, step)| step.into_step(i + 1))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((
            Self {
                nodes: file.nodes,
                steps,
            },
            ignored,
        ))
    }

    /// Check ids, parent order and step references.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let mut kinds: FxHashMap<&str, NodeKindSpec> = FxHashMap::default();
        for node in &self.nodes {
            node.check()?;
            if let Some(parent) = &node.parent {
                let Some(&kind) = kinds.get(parent.as_str()) else {
                    return Err(ScenarioError::UnknownNode {
                        id: parent.clone(),
                        at: format!("node `{}`", node.id),
                    });
                };
                if node.slot == SlotSpec::Fallback && kind == NodeKindSpec::Element {
                    return Err(ScenarioError::bad_node(
                        &node.id,
                        format!("`{parent}` is not a boundary and has no fallback slot"),
                    ));
                }
            }
            if kinds.insert(&node.id, node.kind).is_some() {
                return Err(ScenarioError::DuplicateNode(node.id.clone()));
            }
        }

        for (i, step) in self.steps.iter().enumerate() {
            if let Some(root) = step.root()
                && !kinds.contains_key(root)
            {
                return Err(ScenarioError::UnknownNode {
                    id: root.to_string(),
                    at: format!("step {}", i + 1),
                });
            }
        }
        Ok(())
    }

    /// Add every node to `scheduler`'s tree. Returns scenario ids by node.
    pub fn build(&self, scheduler: &mut Scheduler) -> Result<FxHashMap<String, NodeId>, ScenarioError> {
        let cache = scheduler.resources();
        let tree = scheduler.tree_mut();
        let mut ids: FxHashMap<String, NodeId> = FxHashMap::default();

        for node in &self.nodes {
            let at = match &node.parent {
                None => Position::Root,
                Some(parent) => {
                    let &parent_id =
                        ids.get(parent.as_str())
                            .ok_or_else(|| ScenarioError::UnknownNode {
                                id: parent.clone(),
                                at: format!("node `{}`", node.id),
                            })?;
                    match node.slot {
                        SlotSpec::Primary => Position::Child(parent_id),
                        SlotSpec::Fallback => Position::Fallback(parent_id),
                    }
                }
            };
            let id = node.insert(tree, at, &cache)?;
            ids.insert(node.id.clone(), id);
        }
        Ok(ids)
    }
}

// ============================================================================
// tests
// ============================================================================
