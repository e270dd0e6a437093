//! Learned-behaviour engine
//!
//! Reconstructs labelled examples from the correction history of records,
//! grows a forest of Gini decision trees over them and replays persisted
//! trees against new or recent records.

pub mod candidates;
pub mod features;
pub mod forest;
pub mod grower;
pub mod history;
pub mod inference;
pub mod prune;
pub mod split;
pub mod tree;

pub use candidates::{generate_candidates, ReferenceRegistry, SplitCandidate};
pub use features::{Bucket, Criterion, Example, Feature, Label, TrainingExample};
pub use forest::{ForestManager, ForestReport};
pub use grower::{GrowthParams, TreeGrower};
pub use history::{compile_data, reconstruct_history, TrainingData};
pub use inference::{split_on_node, Classification};
pub use tree::{DecisionTree, DecisionTreeNode, NodeId};
