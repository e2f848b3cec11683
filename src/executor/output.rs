//! Rendered output tree.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::core::NodeId;

/// One rendered node. Hidden nodes are retained content that is kept in the
/// output but not shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputNode {
    pub node: NodeId,
    pub name: String,
    pub text: String,
    pub hidden: bool,
    pub children: Vec<OutputNode>,
}

impl OutputNode {
    pub fn new(node: NodeId, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            node,
            name: name.into(),
            text: text.into(),
            hidden: false,
            children: Vec::new(),
        }
    }

    /// Copy of this subtree marked hidden.
    pub fn retained(&self) -> Self {
        Self {
            hidden: true,
            ..self.clone()
        }
    }

    /// Non-empty texts of visible nodes, depth first.
    pub fn visible_texts(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_visible(&mut out);
        out
    }

    fn collect_visible<'a>(&'a self, out: &mut Vec<&'a str>) {
        if self.hidden {
            return;
        }
        if !self.text.is_empty() {
            out.push(&self.text);
        }
        for child in &self.children {
            child.collect_visible(out);
        }
    }

    /// First node named `name`, visible or not.
    pub fn find(&self, name: &str) -> Option<&OutputNode> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Whether some node named `name` is visible.
    pub fn shows(&self, name: &str) -> bool {
        if self.hidden {
            return false;
        }
        self.name == name || self.children.iter().any(|c| c.shows(name))
    }

    /// Map every node in this subtree to its output.
    pub(crate) fn index(&self) -> FxHashMap<NodeId, OutputNode> {
        let mut map = FxHashMap::default();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            map.insert(node.node, node.clone());
            stack.extend(node.children.iter());
        }
        map
    }
}

impl fmt::Display for OutputNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.visible_texts().join(", "))
    }
}
