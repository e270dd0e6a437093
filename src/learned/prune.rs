//! Post-order pruning
//!
//! A node whose two branches end in the same label decides nothing; it is
//! removed and its parent's branch becomes that label. Children are pruned
//! first so collapses cascade upwards. The root has no parent and is kept.

use super::tree::{DecisionTree, NodeId};
use crate::error::{Error, Result};
use tracing::debug;

/// Prune a tree in place, returning the number of nodes removed
pub fn prune(tree: &mut DecisionTree) -> Result<usize> {
    let removed = prune_node(tree, tree.root_id())?;
    if removed > 0 {
        debug!(removed, remaining = tree.len(), "tree pruned");
    }
    Ok(removed)
}

fn prune_node(tree: &mut DecisionTree, id: NodeId) -> Result<usize> {
    let node = tree
        .get(id)
        .ok_or_else(|| Error::NotFound(format!("node {}", id)))?;
    let children = [node.true_child_id, node.false_child_id];

    let mut removed = 0;
    for child in children.into_iter().flatten() {
        removed += prune_node(tree, child)?;
    }

    let node = tree
        .get(id)
        .ok_or_else(|| Error::NotFound(format!("node {}", id)))?;
    if let (Some(on_true), Some(on_false), false) = (node.true_label, node.false_label, node.is_root()) {
        if on_true == on_false {
            tree.collapse_into_parent(id, on_true)?;
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learned::candidates::SplitCandidate;
    use crate::learned::features::{Criterion, Feature, Label};
    use crate::learned::inference::split_on_node;
    use crate::learned::tree::DecisionTreeNode;
    use crate::models::Snapshot;
    use chrono::NaiveDate;

    fn node(feature: Feature, key: &str, labels: (Option<Label>, Option<Label>)) -> DecisionTreeNode {
        let mut n = DecisionTreeNode::new(&SplitCandidate::new(feature, Criterion::Equals(key.into())));
        n.true_label = labels.0;
        n.false_label = labels.1;
        n
    }

    /// root(buyer=A) -> true: mid(seller=B) -> true: leaf(asset=X) [ERR, ERR]
    ///                                        false: VALID
    ///                false: leaf(seller=C) [VALID, VALID]
    fn cascading_tree() -> DecisionTree {
        let mut tree = DecisionTree::new(node(Feature::BuyingParty, "A", (None, None)));
        let root = tree.root_id();
        let mid = tree
            .add_child(root, true, node(Feature::SellingParty, "B", (None, Some(Label::Valid))))
            .unwrap();
        tree.add_child(
            mid,
            true,
            node(Feature::Asset, "X", (Some(Label::Erroneous), Some(Label::Erroneous))),
        )
        .unwrap();
        tree.add_child(
            root,
            false,
            node(Feature::SellingParty, "C", (Some(Label::Valid), Some(Label::Valid))),
        )
        .unwrap();
        tree
    }

    fn snapshot(buyer: &str, seller: &str, asset: &str) -> Snapshot {
        Snapshot {
            id: 0,
            buying_party: buyer.into(),
            selling_party: seller.into(),
            asset: asset.into(),
            quantity: 1,
            strike_price: 1.0,
            currency_code: "USD".into(),
            date_of_trade: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            maturity_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        }
    }

    #[test]
    fn test_equal_leaves_collapse_upwards() {
        let mut tree = cascading_tree();
        assert_eq!(tree.len(), 4);

        let removed = prune(&mut tree).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(tree.len(), 2);
        assert!(tree.is_well_formed());

        let root = tree.root();
        assert_eq!(root.false_label, Some(Label::Valid));
        let mid = tree.get(root.true_child_id.unwrap()).unwrap();
        assert_eq!(mid.true_label, Some(Label::Erroneous));
        assert_eq!(mid.false_label, Some(Label::Valid));
    }

    #[test]
    fn test_pruning_preserves_classification() {
        let snapshots: Vec<Snapshot> = [
            ("A", "B", "X"),
            ("A", "B", "Y"),
            ("A", "Q", "X"),
            ("Z", "C", "X"),
            ("Z", "Q", "Y"),
        ]
        .iter()
        .map(|(b, s, a)| snapshot(b, s, a))
        .collect();
        let refs: Vec<&Snapshot> = snapshots.iter().collect();

        let mut tree = cascading_tree();
        let before = split_on_node(&tree, tree.root_id(), &refs).unwrap();
        prune(&mut tree).unwrap();
        let after = split_on_node(&tree, tree.root_id(), &refs).unwrap();

        let ids = |v: &Vec<&Snapshot>| -> Vec<String> {
            let mut keys: Vec<String> = v
                .iter()
                .map(|s| format!("{}{}{}", s.buying_party, s.selling_party, s.asset))
                .collect();
            keys.sort();
            keys
        };
        assert_eq!(ids(&before.erroneous), ids(&after.erroneous));
        assert_eq!(ids(&before.valid), ids(&after.valid));
        assert_eq!(ids(&after.erroneous), vec!["ABX".to_string(), "ABY".to_string()]);
    }

    #[test]
    fn test_root_is_never_removed() {
        let mut tree = DecisionTree::new(node(
            Feature::Asset,
            "X",
            (Some(Label::Valid), Some(Label::Valid)),
        ));
        assert_eq!(prune(&mut tree).unwrap(), 0);
        assert_eq!(tree.len(), 1);
    }
}
