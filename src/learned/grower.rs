//! Tree growth
//!
//! Breadth-first expansion from the root: each frontier node re-runs the best
//! split search over the examples that reached each of its branches. Growth
//! stops per the configured [`StoppingPolicy`], when a branch is pure or empty,
//! when a split would not separate anything, or at the depth cap.

use super::candidates::SplitCandidate;
use super::features::{Label, TrainingExample};
use super::inference::split_on_node;
use super::split::{best_split, majority_label, Partition};
use super::tree::{DecisionTree, DecisionTreeNode, NodeId};
use crate::config::{EngineConfig, StoppingPolicy};
use crate::error::{Error, Result};
use crate::models::Attribute;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct GrowthParams {
    pub stopping_policy: StoppingPolicy,
    pub max_depth: usize,
    pub suggestion_threshold: f64,
}

impl From<&EngineConfig> for GrowthParams {
    fn from(config: &EngineConfig) -> Self {
        Self {
            stopping_policy: config.stopping_policy,
            max_depth: config.max_depth,
            suggestion_threshold: config.suggestion_threshold,
        }
    }
}

impl Default for GrowthParams {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrowthState {
    Pending,
    Expanding,
    Done,
}

struct Frontier<'a> {
    id: NodeId,
    depth: usize,
    split: Partition<'a, TrainingExample>,
}

/// Grows one decision tree over a fixed candidate universe
pub struct TreeGrower<'c> {
    candidates: &'c [SplitCandidate],
    params: GrowthParams,
    state: GrowthState,
}

impl<'c> TreeGrower<'c> {
    pub fn new(candidates: &'c [SplitCandidate], params: GrowthParams) -> Self {
        Self {
            candidates,
            params,
            state: GrowthState::Pending,
        }
    }

    pub fn state(&self) -> GrowthState {
        self.state
    }

    /// Grow, score and annotate one (unpruned) tree
    pub fn grow(&mut self, examples: &[&TrainingExample]) -> Result<DecisionTree> {
        let (candidate, split, impurity) =
            best_split(self.candidates, examples).ok_or(Error::NoCandidateSplit)?;

        let mut root = DecisionTreeNode::new(&candidate);
        root.true_label = Some(majority_label(&split.true_set));
        root.false_label = Some(majority_label(&split.false_set));
        debug!(feature = %candidate.feature, criteria = %candidate.criterion, impurity, "root split");

        let mut tree = DecisionTree::new(root);
        let mut queue = VecDeque::from([Frontier {
            id: tree.root_id(),
            depth: 1,
            split,
        }]);
        self.state = GrowthState::Expanding;

        let mut finished = false;
        while let Some(frontier) = queue.pop_front() {
            for side in [true, false] {
                if finished {
                    break;
                }
                if let Some(next) = self.expand(&mut tree, &frontier, side, &mut finished)? {
                    queue.push_back(next);
                }
            }
            if finished {
                break;
            }
        }
        self.state = GrowthState::Done;

        let score = score_tree(&tree, examples)?;
        annotate_root(&mut tree, &score, self.params.suggestion_threshold);
        debug!(
            nodes = tree.len(),
            depth = tree.depth(),
            confidence = tree.root().confidence,
            "tree grown"
        );
        Ok(tree)
    }

    /// Try to replace one terminal branch of a frontier node with a child split
    fn expand<'a>(
        &self,
        tree: &mut DecisionTree,
        frontier: &Frontier<'a>,
        side: bool,
        finished: &mut bool,
    ) -> Result<Option<Frontier<'a>>> {
        let branch = frontier.split.branch(side);
        if is_settled(branch) {
            let erroneous_leaf = !branch.is_empty() && majority_label(branch) == Label::Erroneous;
            if erroneous_leaf && self.params.stopping_policy == StoppingPolicy::FirstErroneousMajority {
                *finished = true;
            }
            return Ok(None);
        }
        if frontier.depth >= self.params.max_depth {
            return Ok(None);
        }

        let (candidate, split, impurity) =
            best_split(self.candidates, branch).ok_or(Error::NoCandidateSplit)?;
        if split.true_set.is_empty() || split.false_set.is_empty() {
            return Ok(None);
        }

        let mut child = DecisionTreeNode::new(&candidate);
        let true_label = majority_label(&split.true_set);
        let false_label = majority_label(&split.false_set);
        child.true_label = Some(true_label);
        child.false_label = Some(false_label);

        let id = tree.add_child(frontier.id, side, child)?;
        debug!(
            parent = frontier.id,
            side,
            feature = %candidate.feature,
            criteria = %candidate.criterion,
            impurity,
            "child split"
        );

        let keep_expanding = match self.params.stopping_policy {
            StoppingPolicy::FirstErroneousMajority => {
                if true_label == Label::Erroneous || false_label == Label::Erroneous {
                    *finished = true;
                    false
                } else {
                    true
                }
            }
            StoppingPolicy::Purity => impurity > 0.0,
        };

        Ok(keep_expanding.then(|| Frontier {
            id,
            depth: frontier.depth + 1,
            split,
        }))
    }
}

/// A branch needs no further split when it is empty or holds a single label
fn is_settled(examples: &[&TrainingExample]) -> bool {
    match examples.first() {
        None => true,
        Some(first) => examples.iter().all(|e| e.label == first.label),
    }
}

/// How a tree performs on a labelled example set
#[derive(Debug, Clone, Serialize)]
pub struct TreeScore<'a> {
    /// Flagged examples that really are erroneous
    pub true_positives: Vec<&'a TrainingExample>,
    /// Number of flagged examples that are actually valid
    pub false_positives: usize,
    /// 100 * tp / (tp + fp); 0 when nothing is flagged
    pub confidence: f64,
}

pub fn score_tree<'a>(tree: &DecisionTree, examples: &[&'a TrainingExample]) -> Result<TreeScore<'a>> {
    let classified = split_on_node(tree, tree.root_id(), examples)?;
    let (true_positives, false_positives): (Vec<_>, Vec<_>) = classified
        .erroneous
        .into_iter()
        .partition(|e| e.label == Label::Erroneous);

    let flagged = true_positives.len() + false_positives.len();
    let confidence = if flagged == 0 {
        0.0
    } else {
        100.0 * true_positives.len() as f64 / flagged as f64
    };

    Ok(TreeScore {
        true_positives,
        false_positives: false_positives.len(),
        confidence,
    })
}

/// Most likely (field, corrected value) behind the flagged errors.
///
/// A field is suggested when it accounts for more than `threshold` of the true
/// positives; a value is suggested when, among those, one correction does.
pub fn suggest_correction(
    true_positives: &[&TrainingExample],
    threshold: f64,
) -> (Option<Attribute>, Option<String>) {
    let Some((field, count)) = dominant(true_positives.iter().filter_map(|e| e.erroneous_field)) else {
        return (None, None);
    };
    if count as f64 / true_positives.len() as f64 <= threshold {
        return (None, None);
    }

    let corrections: Vec<String> = true_positives
        .iter()
        .filter(|e| e.erroneous_field == Some(field))
        .filter_map(|e| e.correction.as_ref().map(|c| c.to_string()))
        .collect();
    let value = dominant(corrections.iter().cloned())
        .filter(|(_, n)| *n as f64 / corrections.len() as f64 > threshold)
        .map(|(v, _)| v);

    (Some(field), value)
}

/// Most frequent item with its count; equal counts go to the first seen
fn dominant<K: std::hash::Hash + Eq>(items: impl Iterator<Item = K>) -> Option<(K, usize)> {
    let mut tally: HashMap<K, (usize, usize)> = HashMap::new();
    for (seen, item) in items.enumerate() {
        tally.entry(item).or_insert((seen, 0)).1 += 1;
    }
    tally
        .into_iter()
        .max_by(|(_, (first_a, n_a)), (_, (first_b, n_b))| {
            n_a.cmp(n_b).then(first_b.cmp(first_a))
        })
        .map(|(item, (_, n))| (item, n))
}

/// Record confidence and suggested correction on the tree root
pub fn annotate_root(tree: &mut DecisionTree, score: &TreeScore<'_>, threshold: f64) {
    let (feature, value) = suggest_correction(&score.true_positives, threshold);
    let root = tree.root_mut();
    root.confidence = score.confidence;
    root.suggested_feature = feature;
    root.suggested_value = value;
}
