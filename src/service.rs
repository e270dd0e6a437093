//! Learned-behaviour service
//!
//! The surface callers use: trigger a forest run, browse and edit persisted
//! trees, and check records against them.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::learned::candidates::{candidates_from_registry, ReferenceRegistry};
use crate::learned::forest::{ForestManager, ForestReport};
use crate::learned::history::compile_data;
use crate::learned::inference::{flagged, objects_to};
use crate::learned::tree::{DecisionTreeNode, NodeId};
use crate::models::{Action, Snapshot};
use crate::storage::{Database, NodeUpdate, RecordSource};
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tracing::{debug, info};

pub struct LearnedBehaviour {
    db: Database,
    registry: Arc<dyn ReferenceRegistry>,
    config: EngineConfig,
    /// Held for the duration of a forest run
    run_lock: Mutex<()>,
}

impl LearnedBehaviour {
    /// Service whose reference registry is the database itself
    pub fn new(db: Database, config: EngineConfig) -> Self {
        let registry = Arc::new(db.clone());
        Self::with_registry(db, registry, config)
    }

    pub fn with_registry(
        db: Database,
        registry: Arc<dyn ReferenceRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            registry,
            config,
            run_lock: Mutex::new(()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the forest manager end to end and persist its trees.
    ///
    /// Unapproved trees from earlier runs are replaced in the same
    /// transaction that stores the new ones. A second call while a run is in
    /// flight fails with [`Error::ConcurrentRunConflict`].
    pub fn grow_trees(&self) -> Result<ForestReport> {
        let _run = self.run_lock.try_lock().ok_or(Error::ConcurrentRunConflict)?;

        let records = self.db.training_population(self.config.population_id_cutoff)?;
        let mut rng = match self.config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let data = compile_data(&records, self.config.train_fraction, &mut rng);
        info!(
            records = records.len(),
            training = data.training.len(),
            test = data.test.len(),
            "training data compiled"
        );

        let candidates = candidates_from_registry(self.registry.as_ref())?;
        let (trees, mut report) = ForestManager::from(&self.config).grow(&data, &candidates)?;
        report.kept_tree_ids = self.db.replace_unapproved_trees(&trees)?;

        info!(trees = ?report.kept_tree_ids, "✅ trees persisted");
        Ok(report)
    }

    /// Roots of every persisted tree
    pub fn index_trees(&self) -> Result<Vec<DecisionTreeNode>> {
        self.db.tree_roots()
    }

    /// Audit actions attributed to a tree
    pub fn index_node_actions(&self, tree_id: NodeId) -> Result<Vec<Action>> {
        self.tree_root(tree_id)?;
        self.db.actions_for_tree(tree_id)
    }

    /// Recent records the tree classifies as ERRONEOUS.
    ///
    /// Records the root's `last_flag_count` as a side effect.
    pub fn get_flags(&self, tree_id: NodeId) -> Result<Vec<Snapshot>> {
        let tree = self.db.load_tree(tree_id)?;
        let since = Utc::now().date_naive() - Duration::days(self.config.flag_window_days);
        let recent = self.db.recent_snapshots(since)?;

        let flags: Vec<Snapshot> = flagged(&tree, &recent)?.into_iter().cloned().collect();
        self.db.set_last_flag_count(tree_id, flags.len() as i64)?;

        info!(tree_id, checked = recent.len(), flagged = flags.len(), "flags computed");
        Ok(flags)
    }

    /// Approved trees that object to `candidate`
    pub fn verify_derivative(&self, candidate: &Snapshot) -> Result<Vec<NodeId>> {
        let mut objections = Vec::new();
        for root in self.db.approved_roots()? {
            let tree = self.db.load_tree(root.id)?;
            if objects_to(&tree, candidate)? {
                objections.push(root.id);
            }
        }
        debug!(objections = objections.len(), "derivative verified");
        Ok(objections)
    }

    pub fn get_node(&self, node_id: NodeId) -> Result<DecisionTreeNode> {
        self.db.get_node(node_id)
    }

    /// Edit a node's mutable fields. Approval applies to whole trees, so it
    /// is only accepted on a root id.
    pub fn update_node(&self, node_id: NodeId, update: &NodeUpdate) -> Result<DecisionTreeNode> {
        if update.approved.is_some() {
            self.tree_root(node_id)?;
        }
        let node = self.db.update_node(node_id, update)?;
        info!(node_id, approved = node.approved, automated = node.automated, "node updated");
        Ok(node)
    }

    fn tree_root(&self, tree_id: NodeId) -> Result<DecisionTreeNode> {
        let node = self.db.get_node(tree_id)?;
        if !node.is_root() {
            return Err(Error::NotFound(format!("tree {}", tree_id)));
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learned::candidates::SplitCandidate;
    use crate::learned::features::{Criterion, Feature, Label};
    use crate::learned::tree::DecisionTree;
    use crate::models::{AttrValue, Attribute};
    use chrono::NaiveDate;

    fn snapshot(buyer: &str, quantity: i64) -> Snapshot {
        let today = Utc::now().date_naive();
        Snapshot {
            id: 0,
            buying_party: buyer.into(),
            selling_party: "GZED20".into(),
            asset: "Stocks".into(),
            quantity,
            strike_price: 12.5,
            currency_code: "USD".into(),
            date_of_trade: today,
            maturity_date: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
        }
    }

    fn service() -> LearnedBehaviour {
        let db = Database::in_memory().expect("Failed to create database");
        let config = EngineConfig {
            train_fraction: 1.0,
            rng_seed: Some(7),
            ..Default::default()
        };
        LearnedBehaviour::new(db, config)
    }

    fn buyer_tree() -> DecisionTree {
        let mut root = DecisionTreeNode::new(&SplitCandidate::new(
            Feature::BuyingParty,
            Criterion::Equals("BORK11".into()),
        ));
        root.true_label = Some(Label::Erroneous);
        root.false_label = Some(Label::Valid);
        DecisionTree::new(root)
    }

    fn approve(service: &LearnedBehaviour, id: NodeId) {
        service
            .update_node(
                id,
                &NodeUpdate {
                    approved: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn test_verify_without_approved_trees_is_empty() {
        let service = service();
        service.db.replace_unapproved_trees(&[buyer_tree()]).unwrap();
        assert!(service.verify_derivative(&snapshot("BORK11", 1)).unwrap().is_empty());
    }

    #[test]
    fn test_verify_against_approved_tree() {
        let service = service();
        let root = service.db.replace_unapproved_trees(&[buyer_tree()]).unwrap()[0];
        approve(&service, root);

        assert_eq!(service.verify_derivative(&snapshot("BORK11", 1)).unwrap(), vec![root]);
        assert!(service.verify_derivative(&snapshot("AMBT33", 1)).unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_run_is_rejected() {
        let service = service();
        let _held = service.run_lock.lock();
        assert!(matches!(service.grow_trees(), Err(Error::ConcurrentRunConflict)));
    }

    #[test]
    fn test_unknown_tree_is_not_found() {
        let service = service();
        assert!(matches!(service.get_flags(42), Err(Error::NotFound(_))));
        assert!(matches!(service.get_node(42), Err(Error::NotFound(_))));
        assert!(matches!(service.index_node_actions(42), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_approval_is_limited_to_roots() {
        let service = service();
        let mut tree = buyer_tree();
        let mut child = DecisionTreeNode::new(&SplitCandidate::new(
            Feature::SellingParty,
            Criterion::Equals("GZED20".into()),
        ));
        child.true_label = Some(Label::Erroneous);
        child.false_label = Some(Label::Valid);
        tree.root_mut().false_label = None;
        tree.add_child(tree.root_id(), false, child).unwrap();
        let root = service.db.replace_unapproved_trees(&[tree]).unwrap()[0];
        let child_id = service.get_node(root).unwrap().false_child_id.unwrap();

        let approval = NodeUpdate {
            approved: Some(true),
            ..Default::default()
        };
        assert!(matches!(service.update_node(child_id, &approval), Err(Error::NotFound(_))));
        assert!(!service.get_node(child_id).unwrap().approved);

        let described = NodeUpdate {
            description: Some("seller check".into()),
            ..Default::default()
        };
        let child = service.update_node(child_id, &described).unwrap();
        assert_eq!(child.description.as_deref(), Some("seller check"));
        assert!(service.update_node(root, &approval).unwrap().approved);
    }

    #[test]
    fn test_grow_then_flag_recent_records() {
        let service = service();
        let db = service.database();
        db.add_company("AMBT33", "Ambit").unwrap();
        db.add_company("GZED20", "Gazed").unwrap();
        db.add_product("Stocks").unwrap();

        for i in 0..30 {
            db.insert_derivative(&snapshot("AMBT33", 100 + i % 3), Some(1)).unwrap();
        }
        for _ in 0..10 {
            let id = db.insert_derivative(&snapshot("AMBT33", 5000), Some(1)).unwrap();
            db.update_derivative(id, Some(2), &[(Attribute::Quantity, AttrValue::Int(100))], None)
                .unwrap();
        }

        let report = service.grow_trees().unwrap();
        assert_eq!(report.total_errors, 10);
        assert_eq!(report.kept_tree_ids.len(), 1);
        assert_eq!(report.residual_errors, 0);

        let root_id = report.kept_tree_ids[0];
        let root = service.get_node(root_id).unwrap();
        assert_eq!(root.feature, Feature::Quantity);
        assert_eq!(root.criteria, "3_to_inf_std");
        assert_eq!(root.suggested_feature, Some(Attribute::Quantity));
        assert_eq!(root.suggested_value.as_deref(), Some("100"));
        assert_eq!(service.index_trees().unwrap().len(), 1);

        db.insert_derivative(&snapshot("AMBT33", 5000), Some(3)).unwrap();
        let flags = service.get_flags(root_id).unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].quantity, 5000);
        assert_eq!(service.get_node(root_id).unwrap().last_flag_count, 1);

        db.update_derivative(flags[0].id, Some(2), &[(Attribute::Quantity, AttrValue::Int(100))], Some(root_id))
            .unwrap();
        assert_eq!(service.index_node_actions(root_id).unwrap().len(), 1);
    }
}
