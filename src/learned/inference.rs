//! Replaying a tree against examples

use super::features::{Example, Label};
use super::split::partition;
use super::tree::{DecisionTree, NodeId};
use crate::error::{Error, Result};
use crate::models::Snapshot;

/// Examples grouped by the label a tree assigned them
#[derive(Debug)]
pub struct Classification<'a, T> {
    pub valid: Vec<&'a T>,
    pub erroneous: Vec<&'a T>,
}

impl<'a, T> Default for Classification<'a, T> {
    fn default() -> Self {
        Self {
            valid: Vec::new(),
            erroneous: Vec::new(),
        }
    }
}

impl<'a, T> Classification<'a, T> {
    fn assign(&mut self, label: Label, examples: &[&'a T]) {
        match label {
            Label::Valid => self.valid.extend_from_slice(examples),
            Label::Erroneous => self.erroneous.extend_from_slice(examples),
        }
    }

    fn absorb(&mut self, other: Classification<'a, T>) {
        self.valid.extend(other.valid);
        self.erroneous.extend(other.erroneous);
    }
}

/// Classify examples by walking the subtree rooted at `node_id`.
///
/// Each branch either hands its examples to a terminal label or recurses into
/// its child with just the examples that reached it. Bucket statistics are
/// recomputed at every node from the examples reaching that node.
pub fn split_on_node<'a, T: Example>(
    tree: &DecisionTree,
    node_id: NodeId,
    examples: &[&'a T],
) -> Result<Classification<'a, T>> {
    let mut classified = Classification::default();
    if examples.is_empty() {
        return Ok(classified);
    }

    let node = tree
        .get(node_id)
        .ok_or_else(|| Error::NotFound(format!("node {}", node_id)))?;
    let split = partition(&node.candidate()?, examples);

    for (side, branch) in [(true, split.true_set.as_slice()), (false, split.false_set.as_slice())] {
        match (node.label(side), node.child(side)) {
            (Some(label), _) => classified.assign(label, branch),
            (None, Some(child)) => classified.absorb(split_on_node(tree, child, branch)?),
            (None, None) => {
                return Err(Error::MalformedTree(format!(
                    "{} branch of node {} has neither label nor child",
                    side, node_id
                )))
            }
        }
    }

    Ok(classified)
}

/// Snapshots a tree classifies as ERRONEOUS
pub fn flagged<'a>(tree: &DecisionTree, snapshots: &'a [Snapshot]) -> Result<Vec<&'a Snapshot>> {
    let refs: Vec<&Snapshot> = snapshots.iter().collect();
    Ok(split_on_node(tree, tree.root_id(), &refs)?.erroneous)
}

/// Whether a tree objects to a single candidate record
pub fn objects_to(tree: &DecisionTree, candidate: &Snapshot) -> Result<bool> {
    let classified = split_on_node(tree, tree.root_id(), &[candidate])?;
    Ok(classified.erroneous.len() == 1)
}
