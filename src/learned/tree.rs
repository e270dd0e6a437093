//! Decision tree arena
//!
//! Nodes reference each other by id only. A tree is built in memory with
//! local ids and later persisted as rows; loading a persisted tree rebuilds
//! the same arena keyed by row id.

use super::candidates::SplitCandidate;
use super::features::{Criterion, Feature, Label};
use crate::error::{Error, Result};
use crate::models::Attribute;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type NodeId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTreeNode {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub true_child_id: Option<NodeId>,
    pub false_child_id: Option<NodeId>,
    pub feature: Feature,
    /// Exact-match key or statistical bucket name
    pub criteria: String,
    pub true_label: Option<Label>,
    pub false_label: Option<Label>,
    pub approved: bool,
    pub automated: bool,
    /// Share (0-100) of flagged training examples that were truly erroneous; root only
    pub confidence: f64,
    pub last_flag_count: i64,
    pub suggested_feature: Option<Attribute>,
    pub suggested_value: Option<String>,
    pub description: Option<String>,
}

impl DecisionTreeNode {
    pub fn new(candidate: &SplitCandidate) -> Self {
        Self {
            id: 0,
            parent_id: None,
            true_child_id: None,
            false_child_id: None,
            feature: candidate.feature,
            criteria: candidate.criterion.as_str().to_string(),
            true_label: None,
            false_label: None,
            approved: false,
            automated: false,
            confidence: 0.0,
            last_flag_count: 0,
            suggested_feature: None,
            suggested_value: None,
            description: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn candidate(&self) -> Result<SplitCandidate> {
        Ok(SplitCandidate::new(
            self.feature,
            Criterion::parse(self.feature, &self.criteria)?,
        ))
    }

    pub fn child(&self, side: bool) -> Option<NodeId> {
        if side {
            self.true_child_id
        } else {
            self.false_child_id
        }
    }

    pub fn label(&self, side: bool) -> Option<Label> {
        if side {
            self.true_label
        } else {
            self.false_label
        }
    }

    /// Make a branch terminal with `label`
    pub fn set_terminal(&mut self, side: bool, label: Label) {
        if side {
            self.true_child_id = None;
            self.true_label = Some(label);
        } else {
            self.false_child_id = None;
            self.false_label = Some(label);
        }
    }

    /// Expand a branch into `child`
    pub fn set_child(&mut self, side: bool, child: NodeId) {
        if side {
            self.true_label = None;
            self.true_child_id = Some(child);
        } else {
            self.false_label = None;
            self.false_child_id = Some(child);
        }
    }
}

/// One tree: a root and its descendants, keyed by id
#[derive(Debug, Clone, Serialize)]
pub struct DecisionTree {
    root: NodeId,
    nodes: BTreeMap<NodeId, DecisionTreeNode>,
}

impl DecisionTree {
    pub fn new(mut root: DecisionTreeNode) -> Self {
        root.id = 1;
        root.parent_id = None;
        let mut nodes = BTreeMap::new();
        nodes.insert(root.id, root);
        Self { root: 1, nodes }
    }

    /// Rebuild a tree from persisted rows, checking parent/child linkage
    pub fn from_nodes(root: NodeId, rows: Vec<DecisionTreeNode>) -> Result<Self> {
        let nodes: BTreeMap<NodeId, DecisionTreeNode> = rows.into_iter().map(|n| (n.id, n)).collect();
        let tree = Self { root, nodes };
        tree.check_linkage()?;
        Ok(tree)
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn root(&self) -> &DecisionTreeNode {
        &self.nodes[&self.root]
    }

    pub fn root_mut(&mut self) -> &mut DecisionTreeNode {
        self.nodes
            .get_mut(&self.root)
            .expect("root is never removed from its tree")
    }

    pub fn get(&self, id: NodeId) -> Option<&DecisionTreeNode> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut DecisionTreeNode> {
        self.nodes.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DecisionTreeNode> {
        self.nodes.values()
    }

    /// Attach `child` under `parent`'s `side` branch and return its id
    pub fn add_child(&mut self, parent: NodeId, side: bool, mut child: DecisionTreeNode) -> Result<NodeId> {
        let id = self.nodes.keys().next_back().copied().unwrap_or(0) + 1;
        child.id = id;
        child.parent_id = Some(parent);
        self.nodes
            .get_mut(&parent)
            .ok_or_else(|| Error::NotFound(format!("node {}", parent)))?
            .set_child(side, id);
        self.nodes.insert(id, child);
        Ok(id)
    }

    /// Remove a leaf-level node, turning its parent's branch terminal with `label`
    pub fn collapse_into_parent(&mut self, id: NodeId, label: Label) -> Result<()> {
        let node = self
            .nodes
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))?;
        let parent_id = node
            .parent_id
            .ok_or_else(|| Error::NotFound(format!("parent of node {}", id)))?;
        let parent = self
            .nodes
            .get_mut(&parent_id)
            .ok_or_else(|| Error::NotFound(format!("node {}", parent_id)))?;
        let side = parent.true_child_id == Some(id);
        parent.set_terminal(side, label);
        Ok(())
    }

    /// Replace every id with `offset + id`, keeping the structure intact
    pub fn shifted(&self, offset: NodeId) -> Self {
        let shift = |id: Option<NodeId>| id.map(|i| i + offset);
        let nodes = self
            .nodes
            .values()
            .map(|n| {
                let mut n = n.clone();
                n.id += offset;
                n.parent_id = shift(n.parent_id);
                n.true_child_id = shift(n.true_child_id);
                n.false_child_id = shift(n.false_child_id);
                (n.id, n)
            })
            .collect();
        Self {
            root: self.root + offset,
            nodes,
        }
    }

    /// Nodes in breadth-first order from the root, parents before children
    pub fn breadth_first(&self) -> Vec<&DecisionTreeNode> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue = std::collections::VecDeque::from([self.root]);
        while let Some(id) = queue.pop_front() {
            if let Some(node) = self.nodes.get(&id) {
                order.push(node);
                queue.extend(node.true_child_id);
                queue.extend(node.false_child_id);
            }
        }
        order
    }

    pub fn depth(&self) -> usize {
        fn walk(tree: &DecisionTree, id: NodeId) -> usize {
            match tree.get(id) {
                Some(node) => {
                    1 + [node.true_child_id, node.false_child_id]
                        .iter()
                        .flatten()
                        .map(|c| walk(tree, *c))
                        .max()
                        .unwrap_or(0)
                }
                None => 0,
            }
        }
        walk(self, self.root)
    }

    fn check_linkage(&self) -> Result<()> {
        let root = self
            .nodes
            .get(&self.root)
            .ok_or_else(|| Error::NotFound(format!("tree {}", self.root)))?;
        if !root.is_root() {
            return Err(Error::NotFound(format!("node {} is not a tree root", self.root)));
        }
        for node in self.nodes.values() {
            for child in [node.true_child_id, node.false_child_id].into_iter().flatten() {
                let linked = self.nodes.get(&child).map(|c| c.parent_id) == Some(Some(node.id));
                if !linked {
                    return Err(Error::MalformedTree(format!(
                        "child {} of node {} in tree {}",
                        child, node.id, self.root
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every branch is exactly one of child or terminal label
    pub fn is_well_formed(&self) -> bool {
        self.check_linkage().is_ok()
            && self.nodes.values().all(|n| {
                (n.true_child_id.is_some() ^ n.true_label.is_some())
                    && (n.false_child_id.is_some() ^ n.false_label.is_some())
            })
    }
}
