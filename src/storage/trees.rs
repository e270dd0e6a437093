//! Decision tree graph persistence
//!
//! Each node is one row. A grown tree is written in a single transaction so
//! readers see either none or all of its nodes.

use super::{bad_column, Database};
use crate::error::{Error, Result};
use crate::learned::features::{Feature, Label};
use crate::learned::tree::{DecisionTree, DecisionTreeNode, NodeId};
use crate::models::Attribute;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const NODE_COLUMNS: &str = "id, parent_id, true_child_id, false_child_id, feature, criteria, \
     true_label, false_label, approved, automated, confidence, last_flag_count, \
     suggested_feature, suggested_value, description";

const SUBTREE_SQL: &str = "WITH RECURSIVE subtree(id) AS (
        SELECT ?1
        UNION ALL
        SELECT n.id FROM decision_tree_node n JOIN subtree s ON n.parent_id = s.id
    )";

/// The externally mutable fields of a node; structure is write-once
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeUpdate {
    pub description: Option<String>,
    pub approved: Option<bool>,
    pub automated: Option<bool>,
    pub suggested_feature: Option<Attribute>,
    pub suggested_value: Option<String>,
}

impl NodeUpdate {
    fn apply(&self, node: &mut DecisionTreeNode) {
        if let Some(description) = &self.description {
            node.description = Some(description.clone());
        }
        if let Some(approved) = self.approved {
            node.approved = approved;
        }
        if let Some(automated) = self.automated {
            node.automated = automated;
        }
        if let Some(feature) = self.suggested_feature {
            node.suggested_feature = Some(feature);
        }
        if let Some(value) = &self.suggested_value {
            node.suggested_value = Some(value.clone());
        }
    }
}

fn row_to_node(row: &Row) -> rusqlite::Result<DecisionTreeNode> {
    let label = |idx: usize| -> rusqlite::Result<Option<Label>> {
        let raw: Option<String> = row.get(idx)?;
        raw.map(|s| Label::parse(&s).ok_or_else(|| bad_column(idx, format!("label {}", s))))
            .transpose()
    };

    let feature: String = row.get(4)?;
    let feature =
        Feature::parse(&feature).ok_or_else(|| bad_column(4, format!("feature {}", feature)))?;
    let suggested_feature: Option<String> = row.get(12)?;
    let suggested_feature = suggested_feature
        .map(|s| s.parse::<Attribute>().map_err(|_| bad_column(12, format!("attribute {}", s))))
        .transpose()?;

    Ok(DecisionTreeNode {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        true_child_id: row.get(2)?,
        false_child_id: row.get(3)?,
        feature,
        criteria: row.get(5)?,
        true_label: label(6)?,
        false_label: label(7)?,
        approved: row.get(8)?,
        automated: row.get(9)?,
        confidence: row.get(10)?,
        last_flag_count: row.get(11)?,
        suggested_feature,
        suggested_value: row.get(13)?,
        description: row.get(14)?,
    })
}

fn insert_node(conn: &Connection, node: &DecisionTreeNode) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO decision_tree_node ({}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            NODE_COLUMNS
        ),
        params![
            node.id,
            node.parent_id,
            node.true_child_id,
            node.false_child_id,
            node.feature.as_str(),
            &node.criteria,
            node.true_label.map(|l| l.as_str()),
            node.false_label.map(|l| l.as_str()),
            node.approved,
            node.automated,
            node.confidence,
            node.last_flag_count,
            node.suggested_feature.map(|a| a.as_str()),
            &node.suggested_value,
            &node.description,
        ],
    )?;
    Ok(())
}

fn load_node(conn: &Connection, id: NodeId) -> Result<DecisionTreeNode> {
    conn.query_row(
        &format!("SELECT {} FROM decision_tree_node WHERE id = ?1", NODE_COLUMNS),
        params![id],
        row_to_node,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("node {}", id)))
}

fn delete_subtree(conn: &Connection, root: NodeId) -> Result<usize> {
    let removed = conn.execute(
        &format!(
            "{} DELETE FROM decision_tree_node WHERE id IN (SELECT id FROM subtree)",
            SUBTREE_SQL
        ),
        params![root],
    )?;
    Ok(removed)
}

/// Highest id ever handed out, so deleted ids are never reused
fn id_watermark(conn: &Connection) -> Result<NodeId> {
    let watermark = conn.query_row(
        "SELECT MAX(
            COALESCE((SELECT seq FROM sqlite_sequence WHERE name = 'decision_tree_node'), 0),
            COALESCE((SELECT MAX(id) FROM decision_tree_node), 0)
        )",
        [],
        |row| row.get(0),
    )?;
    Ok(watermark)
}

impl Database {
    /// Drop every unapproved tree and persist `trees` in their place.
    ///
    /// Both happen in one transaction. Returns the persisted root ids in the
    /// order the trees were given.
    pub fn replace_unapproved_trees(&self, trees: &[DecisionTree]) -> Result<Vec<NodeId>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let stale: Vec<NodeId> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM decision_tree_node WHERE parent_id IS NULL AND approved = 0",
            )?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids
        };
        let mut removed = 0;
        for root in &stale {
            removed += delete_subtree(&tx, *root)?;
        }

        let mut offset = id_watermark(&tx)?;
        let mut roots = Vec::with_capacity(trees.len());
        for tree in trees {
            let persisted = tree.shifted(offset);
            for node in persisted.nodes() {
                insert_node(&tx, node)?;
            }
            roots.push(persisted.root_id());
            offset = persisted.nodes().map(|n| n.id).max().unwrap_or(offset);
        }

        tx.commit()?;
        info!(
            stale_trees = stale.len(),
            removed_nodes = removed,
            new_trees = roots.len(),
            "tree graph replaced"
        );
        Ok(roots)
    }

    pub fn delete_tree(&self, root: NodeId) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let node = load_node(&tx, root)?;
        if !node.is_root() {
            return Err(Error::NotFound(format!("tree {}", root)));
        }
        let removed = delete_subtree(&tx, root)?;
        tx.commit()?;
        debug!(root, removed, "tree deleted");
        Ok(removed)
    }

    /// Every tree root, approved or not
    pub fn tree_roots(&self) -> Result<Vec<DecisionTreeNode>> {
        self.query_nodes("WHERE parent_id IS NULL ORDER BY id")
    }

    pub fn approved_roots(&self) -> Result<Vec<DecisionTreeNode>> {
        self.query_nodes("WHERE parent_id IS NULL AND approved = 1 ORDER BY id")
    }

    pub fn get_node(&self, id: NodeId) -> Result<DecisionTreeNode> {
        let conn = self.conn.lock();
        load_node(&conn, id)
    }

    /// Load the whole tree rooted at `root`
    pub fn load_tree(&self, root: NodeId) -> Result<DecisionTree> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "{} SELECT {} FROM decision_tree_node WHERE id IN (SELECT id FROM subtree)",
            SUBTREE_SQL, NODE_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![root], row_to_node)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if rows.is_empty() {
            return Err(Error::NotFound(format!("tree {}", root)));
        }
        DecisionTree::from_nodes(root, rows)
    }

    /// Apply the mutable fields of `update` and return the stored node
    pub fn update_node(&self, id: NodeId, update: &NodeUpdate) -> Result<DecisionTreeNode> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut node = load_node(&tx, id)?;
        update.apply(&mut node);
        tx.execute(
            "UPDATE decision_tree_node SET description = ?2, approved = ?3, automated = ?4,
             suggested_feature = ?5, suggested_value = ?6
             WHERE id = ?1",
            params![
                id,
                &node.description,
                node.approved,
                node.automated,
                node.suggested_feature.map(|a| a.as_str()),
                &node.suggested_value,
            ],
        )?;
        tx.commit()?;
        Ok(node)
    }

    pub fn set_last_flag_count(&self, root: NodeId, count: i64) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE decision_tree_node SET last_flag_count = ?2 WHERE id = ?1",
            params![root, count],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("node {}", root)));
        }
        Ok(())
    }

    fn query_nodes(&self, filter: &str) -> Result<Vec<DecisionTreeNode>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM decision_tree_node {}",
            NODE_COLUMNS, filter
        ))?;
        let nodes = stmt
            .query_map([], row_to_node)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learned::candidates::SplitCandidate;
    use crate::learned::features::{Bucket, Criterion};

    fn sample_tree() -> DecisionTree {
        let mut root = DecisionTreeNode::new(&SplitCandidate::new(
            Feature::BuyingParty,
            Criterion::Equals("AMBT33".into()),
        ));
        root.false_label = Some(Label::Valid);
        root.confidence = 80.0;
        let mut tree = DecisionTree::new(root);

        let mut child = DecisionTreeNode::new(&SplitCandidate::new(
            Feature::Quantity,
            Criterion::Bucket(Bucket::ThreeToInfStd),
        ));
        child.true_label = Some(Label::Erroneous);
        child.false_label = Some(Label::Valid);
        tree.add_child(tree.root_id(), true, child).unwrap();
        tree
    }

    #[test]
    fn test_persist_and_load_tree() {
        let db = Database::in_memory().expect("Failed to create database");
        let roots = db.replace_unapproved_trees(&[sample_tree(), sample_tree()]).unwrap();
        assert_eq!(roots.len(), 2);
        assert_ne!(roots[0], roots[1]);

        let loaded = db.load_tree(roots[1]).unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.is_well_formed());
        assert_eq!(loaded.root().confidence, 80.0);
        let child = loaded.get(loaded.root().true_child_id.unwrap()).unwrap();
        assert_eq!(child.criteria, "3_to_inf_std");

        assert_eq!(db.tree_roots().unwrap().len(), 2);
    }

    #[test]
    fn test_unapproved_trees_are_replaced() {
        let db = Database::in_memory().expect("Failed to create database");
        let first = db.replace_unapproved_trees(&[sample_tree(), sample_tree()]).unwrap();
        db.update_node(
            first[0],
            &NodeUpdate {
                approved: Some(true),
                ..Default::default()
            },
        )
        .unwrap();

        let second = db.replace_unapproved_trees(&[sample_tree()]).unwrap();
        let roots: Vec<NodeId> = db.tree_roots().unwrap().iter().map(|n| n.id).collect();
        assert_eq!(roots, vec![first[0], second[0]]);
        assert!(second[0] > first[1]);
        assert!(matches!(db.load_tree(first[1]), Err(Error::NotFound(_))));
        assert_eq!(db.approved_roots().unwrap().len(), 1);
    }

    #[test]
    fn test_update_node_touches_only_mutable_fields() {
        let db = Database::in_memory().expect("Failed to create database");
        let root = db.replace_unapproved_trees(&[sample_tree()]).unwrap()[0];

        let update: NodeUpdate = serde_json::from_str(
            r#"{"description": "buyer AMBT33 oversized", "automated": true, "suggested_feature": "quantity"}"#,
        )
        .unwrap();
        let node = db.update_node(root, &update).unwrap();
        assert_eq!(node.description.as_deref(), Some("buyer AMBT33 oversized"));
        assert!(node.automated);
        assert!(!node.approved);
        assert_eq!(node.suggested_feature, Some(Attribute::Quantity));
        assert_eq!(node.feature, Feature::BuyingParty);

        assert!(serde_json::from_str::<NodeUpdate>(r#"{"feature": "asset"}"#).is_err());
        assert!(matches!(
            db.update_node(9999, &NodeUpdate::default()),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_and_flag_count() {
        let db = Database::in_memory().expect("Failed to create database");
        let root = db.replace_unapproved_trees(&[sample_tree()]).unwrap()[0];
        db.set_last_flag_count(root, 12).unwrap();
        assert_eq!(db.get_node(root).unwrap().last_flag_count, 12);

        let child = db.get_node(root).unwrap().true_child_id.unwrap();
        assert!(db.delete_tree(child).is_err());
        assert_eq!(db.delete_tree(root).unwrap(), 2);
        assert!(db.tree_roots().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_label_column_is_reported() {
        let db = Database::in_memory().expect("Failed to create database");
        let root = db.replace_unapproved_trees(&[sample_tree()]).unwrap()[0];
        db.conn
            .lock()
            .execute(
                "UPDATE decision_tree_node SET false_label = 'MAYBE' WHERE id = ?1",
                params![root],
            )
            .unwrap();

        match db.get_node(root) {
            Err(Error::Database(rusqlite::Error::FromSqlConversionFailure(_, _, source))) => {
                assert!(matches!(
                    source.downcast_ref::<Error>(),
                    Some(Error::MalformedColumn(_))
                ));
            }
            other => panic!("expected a malformed column, got {:?}", other),
        }
    }
}
