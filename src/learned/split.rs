//! Impurity evaluation and example partitioning
//!
//! Statistical edge cases never surface as errors: an empty partition has
//! impurity 0, and a bucket test over two or fewer examples sends the whole
//! set down the true branch since a standard deviation is undefined there.

use super::candidates::SplitCandidate;
use super::features::{Bucket, Criterion, Example, Feature, Label};
use statrs::statistics::Statistics;

/// Examples routed down each branch of a split
#[derive(Debug)]
pub struct Partition<'a, T> {
    pub true_set: Vec<&'a T>,
    pub false_set: Vec<&'a T>,
}

impl<'a, T> Partition<'a, T> {
    pub fn len(&self) -> usize {
        self.true_set.len() + self.false_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn branch(&self, side: bool) -> &[&'a T] {
        if side {
            &self.true_set
        } else {
            &self.false_set
        }
    }
}

/// Mean and standard deviation of a numeric feature.
///
/// Computed over the VALID examples of a labelled set, or over the whole set
/// when no example carries a label (records at inference time). `None` when
/// fewer than two values are available.
pub fn feature_stats<T: Example>(feature: Feature, examples: &[&T]) -> Option<(f64, f64)> {
    let valid: Vec<f64> = examples
        .iter()
        .filter(|e| e.label() == Some(Label::Valid))
        .map(|e| feature.numeric_value(e.snapshot()))
        .collect();

    let labelled = examples.iter().any(|e| e.label().is_some());
    let values = if labelled {
        valid
    } else {
        examples
            .iter()
            .map(|e| feature.numeric_value(e.snapshot()))
            .collect()
    };

    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().mean();
    let std = values.iter().std_dev();
    if mean.is_finite() && std.is_finite() {
        Some((mean, std))
    } else {
        None
    }
}

/// Partition examples by a (feature, criterion) test
pub fn partition<'a, T: Example>(candidate: &SplitCandidate, examples: &[&'a T]) -> Partition<'a, T> {
    match &candidate.criterion {
        Criterion::Equals(key) => {
            let (true_set, false_set) = examples
                .iter()
                .copied()
                .partition(|e| candidate.feature.text_value(e.snapshot()) == key.as_str());
            Partition { true_set, false_set }
        }
        Criterion::Bucket(bucket) => partition_bucket(candidate.feature, *bucket, examples),
    }
}

fn partition_bucket<'a, T: Example>(feature: Feature, bucket: Bucket, examples: &[&'a T]) -> Partition<'a, T> {
    let stats = if examples.len() > 2 {
        feature_stats(feature, examples)
    } else {
        None
    };

    match stats {
        Some((mean, std)) => {
            let (true_set, false_set) = examples
                .iter()
                .copied()
                .partition(|e| bucket.contains(feature.numeric_value(e.snapshot()), mean, std));
            Partition { true_set, false_set }
        }
        None => Partition {
            true_set: examples.to_vec(),
            false_set: Vec::new(),
        },
    }
}

/// (#VALID, #ERRONEOUS) among the labelled examples of a set
pub fn label_counts<T: Example>(examples: &[&T]) -> (usize, usize) {
    examples.iter().fold((0, 0), |(v, e), x| match x.label() {
        Some(Label::Valid) => (v + 1, e),
        Some(Label::Erroneous) => (v, e + 1),
        None => (v, e),
    })
}

/// Gini impurity 2p(1-p) of one branch, p = share of VALID; 0 when pure or empty
pub fn gini<T: Example>(examples: &[&T]) -> f64 {
    let (valid, erroneous) = label_counts(examples);
    if valid == 0 || erroneous == 0 {
        return 0.0;
    }
    let p = valid as f64 / (valid + erroneous) as f64;
    2.0 * p * (1.0 - p)
}

/// Size-weighted Gini impurity of a split, in [0, 1]
pub fn weighted_impurity<T: Example>(true_set: &[&T], false_set: &[&T]) -> f64 {
    let total = true_set.len() + false_set.len();
    if total == 0 {
        return 0.0;
    }
    let alpha = true_set.len() as f64 / total as f64;
    alpha * gini(true_set) + (1.0 - alpha) * gini(false_set)
}

/// Majority label of a branch; VALID wins ties (including the empty branch)
pub fn majority_label<T: Example>(examples: &[&T]) -> Label {
    let (valid, erroneous) = label_counts(examples);
    if erroneous > valid {
        Label::Erroneous
    } else {
        Label::Valid
    }
}

/// Lowest-impurity candidate; the first one enumerated wins ties
pub fn best_split<'a, T: Example>(
    candidates: &[SplitCandidate],
    examples: &[&'a T],
) -> Option<(SplitCandidate, Partition<'a, T>, f64)> {
    let mut best: Option<(&SplitCandidate, f64)> = None;
    for candidate in candidates {
        let split = partition(candidate, examples);
        let impurity = weighted_impurity(&split.true_set, &split.false_set);
        if best.map_or(true, |(_, b)| impurity < b) {
            best = Some((candidate, impurity));
        }
    }

    best.map(|(candidate, impurity)| {
        let split = partition(candidate, examples);
        (candidate.clone(), split, impurity)
    })
}
