//! Forest management: iterative residual coverage
//!
//! Each iteration grows one tree on all VALID examples plus the ERRONEOUS
//! examples no kept tree explains yet. A kept tree removes its true
//! positives from that residual; a tree explaining too little is discarded
//! and its root split is not offered again during the run.

use super::candidates::{exclude, SplitCandidate};
use super::features::{Label, TrainingExample};
use super::grower::{annotate_root, score_tree, GrowthParams, TreeGrower};
use super::history::TrainingData;
use super::inference::split_on_node;
use super::prune::prune;
use super::tree::{DecisionTree, NodeId};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Summary of one forest run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ForestReport {
    pub iterations: usize,
    /// Persisted root ids, filled in once the kept trees are stored
    pub kept_tree_ids: Vec<NodeId>,
    pub discarded: usize,
    /// Growth attempts that could not produce a tree
    pub failures: Vec<String>,
    pub total_errors: usize,
    pub residual_errors: usize,
    /// Share of held-out ERRONEOUS examples flagged by any kept tree
    pub test_recall: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ForestManager {
    params: GrowthParams,
    max_iterations: usize,
    residual_stop_fraction: f64,
    min_contribution: f64,
}

impl From<&EngineConfig> for ForestManager {
    fn from(config: &EngineConfig) -> Self {
        Self {
            params: GrowthParams::from(config),
            max_iterations: config.max_iterations,
            residual_stop_fraction: config.residual_stop_fraction,
            min_contribution: config.min_contribution,
        }
    }
}

impl ForestManager {
    /// Grow the forest for one run. Returns the kept (pruned, annotated) trees
    pub fn grow(
        &self,
        data: &TrainingData,
        candidates: &[SplitCandidate],
    ) -> Result<(Vec<DecisionTree>, ForestReport)> {
        let valid: Vec<&TrainingExample> = data.training_with(Label::Valid).collect();
        let mut residual: Vec<&TrainingExample> = data.training_with(Label::Erroneous).collect();

        let mut report = ForestReport {
            total_errors: residual.len(),
            ..Default::default()
        };
        let mut kept = Vec::new();
        let mut rejected: HashSet<SplitCandidate> = HashSet::new();

        info!(
            valid = valid.len(),
            erroneous = report.total_errors,
            candidates = candidates.len(),
            "🌲 forest run starting"
        );

        while report.iterations < self.max_iterations {
            let floor = self.residual_stop_fraction * report.total_errors as f64;
            if residual.is_empty() || (residual.len() as f64) < floor {
                break;
            }
            report.iterations += 1;

            let available = exclude(candidates, &rejected);
            let examples: Vec<&TrainingExample> =
                valid.iter().chain(residual.iter()).copied().collect();

            let mut tree = match TreeGrower::new(&available, self.params).grow(&examples) {
                Ok(tree) => tree,
                Err(Error::NoCandidateSplit) => {
                    warn!(iteration = report.iterations, "no candidate split left, ending run");
                    report
                        .failures
                        .push(format!("iteration {}: no candidate split", report.iterations));
                    break;
                }
                Err(e) => return Err(e),
            };
            prune(&mut tree)?;

            let score = score_tree(&tree, &examples)?;
            annotate_root(&mut tree, &score, self.params.suggestion_threshold);
            let explained = score.true_positives.len();
            let contribution = explained as f64 / report.total_errors as f64;

            if explained == 0 || contribution < self.min_contribution {
                let root_split = tree.root().candidate()?;
                debug!(
                    iteration = report.iterations,
                    feature = %root_split.feature,
                    criteria = %root_split.criterion,
                    contribution,
                    "tree discarded"
                );
                rejected.insert(root_split);
                report.discarded += 1;
                continue;
            }

            let explained_set: HashSet<*const TrainingExample> = score
                .true_positives
                .iter()
                .map(|e| *e as *const TrainingExample)
                .collect();
            residual.retain(|e| !explained_set.contains(&(*e as *const TrainingExample)));

            info!(
                iteration = report.iterations,
                nodes = tree.len(),
                explained,
                false_positives = score.false_positives,
                confidence = tree.root().confidence,
                residual = residual.len(),
                "tree kept"
            );
            kept.push(tree);
        }

        report.residual_errors = residual.len();
        report.test_recall = test_recall(&kept, &data.test)?;

        info!(
            iterations = report.iterations,
            kept = kept.len(),
            discarded = report.discarded,
            residual = report.residual_errors,
            test_recall = ?report.test_recall,
            "🌲 forest run finished"
        );
        Ok((kept, report))
    }
}

/// Share of held-out ERRONEOUS examples flagged by at least one tree
fn test_recall(trees: &[DecisionTree], test: &[TrainingExample]) -> Result<Option<f64>> {
    let erroneous = test.iter().filter(|e| e.label == Label::Erroneous).count();
    if erroneous == 0 {
        return Ok(None);
    }

    let examples: Vec<&TrainingExample> = test.iter().collect();
    let mut caught: HashSet<*const TrainingExample> = HashSet::new();
    for tree in trees {
        let classified = split_on_node(tree, tree.root_id(), &examples)?;
        caught.extend(
            classified
                .erroneous
                .iter()
                .filter(|e| e.label == Label::Erroneous)
                .map(|e| *e as *const TrainingExample),
        );
    }
    Ok(Some(caught.len() as f64 / erroneous as f64))
}
