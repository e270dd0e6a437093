//! Record store: derivatives, their audit actions and the reference registries

use super::{bad_column, Database};
use crate::error::{Error, Result};
use crate::learned::candidates::ReferenceRegistry;
use crate::models::{
    parse_update_log, Action, ActionType, AttrValue, Attribute, DerivativeRecord, Snapshot,
    UpdateEntry,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use tracing::debug;

const DATE_FORMAT: &str = "%Y-%m-%d";
/// Fixed-width on write so text order matches time order
const TIMESTAMP_WRITE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const SNAPSHOT_COLUMNS: &str = "id, buying_party, selling_party, asset, quantity, strike_price, \
     currency_code, date_of_trade, maturity_date";

const ACTION_COLUMNS: &str = "id, derivative_id, user_id, type, timestamp, update_log, tree_id";

/// Read access to the record population used for training and flagging
pub trait RecordSource: Send + Sync {
    /// Non-deleted records with `id <= id_cutoff`, each with its actions oldest first
    fn training_population(&self, id_cutoff: i64) -> Result<Vec<DerivativeRecord>>;
    /// Non-deleted records traded on or after `since`
    fn recent_snapshots(&self, since: NaiveDate) -> Result<Vec<Snapshot>>;
}

fn row_to_snapshot(row: &Row) -> rusqlite::Result<Snapshot> {
    let date = |idx: usize| -> rusqlite::Result<NaiveDate> {
        let s: String = row.get(idx)?;
        NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|_| bad_column(idx, format!("date {}", s)))
    };
    Ok(Snapshot {
        id: row.get(0)?,
        buying_party: row.get(1)?,
        selling_party: row.get(2)?,
        asset: row.get(3)?,
        quantity: row.get(4)?,
        strike_price: row.get(5)?,
        currency_code: row.get(6)?,
        date_of_trade: date(7)?,
        maturity_date: date(8)?,
    })
}

fn row_to_action(row: &Row) -> rusqlite::Result<Action> {
    let kind: String = row.get(3)?;
    let action_type =
        ActionType::parse(&kind).ok_or_else(|| bad_column(3, format!("action type {}", kind)))?;
    let timestamp: String = row.get(4)?;
    let timestamp = NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT)
        .map_err(|_| bad_column(4, format!("timestamp {}", timestamp)))?;
    let update_log: Option<String> = row.get(5)?;
    let update_log = match update_log {
        Some(json) if !json.is_empty() => {
            parse_update_log(&json).map_err(|e| bad_column(5, e.to_string()))?
        }
        _ => Vec::new(),
    };

    Ok(Action {
        id: row.get(0)?,
        derivative_id: row.get(1)?,
        user_id: row.get(2)?,
        action_type,
        timestamp,
        update_log,
        tree_id: row.get(6)?,
    })
}

fn insert_action(
    conn: &Connection,
    derivative_id: i64,
    user_id: Option<i64>,
    action_type: ActionType,
    update_log: &[UpdateEntry],
    tree_id: Option<i64>,
) -> Result<i64> {
    let log = if update_log.is_empty() {
        None
    } else {
        Some(serde_json::to_string(update_log)?)
    };
    conn.execute(
        "INSERT INTO action (derivative_id, user_id, type, timestamp, update_log, tree_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            derivative_id,
            user_id,
            action_type.as_str(),
            Utc::now().naive_utc().format(TIMESTAMP_WRITE_FORMAT).to_string(),
            log,
            tree_id,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn load_snapshot(conn: &Connection, id: i64) -> Result<Snapshot> {
    conn.query_row(
        &format!("SELECT {} FROM derivative WHERE id = ?1 AND deleted = 0", SNAPSHOT_COLUMNS),
        params![id],
        row_to_snapshot,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("derivative {}", id)))
}

impl Database {
    /// Store a new derivative and log its ADD action
    pub fn insert_derivative(&self, snapshot: &Snapshot, user_id: Option<i64>) -> Result<i64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO derivative
             (buying_party, selling_party, asset, quantity, strike_price, currency_code,
              date_of_trade, maturity_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &snapshot.buying_party,
                &snapshot.selling_party,
                &snapshot.asset,
                snapshot.quantity,
                snapshot.strike_price,
                &snapshot.currency_code,
                snapshot.date_of_trade.format(DATE_FORMAT).to_string(),
                snapshot.maturity_date.format(DATE_FORMAT).to_string(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        insert_action(&tx, id, user_id, ActionType::Add, &[], None)?;
        tx.commit()?;
        Ok(id)
    }

    /// Apply corrections to a derivative and log them as one UPDATE action.
    ///
    /// `tree_id` attributes the correction to the tree that flagged the record.
    pub fn update_derivative(
        &self,
        id: i64,
        user_id: Option<i64>,
        updates: &[(Attribute, AttrValue)],
        tree_id: Option<i64>,
    ) -> Result<Snapshot> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let mut snapshot = load_snapshot(&tx, id)?;
        let mut log = Vec::with_capacity(updates.len());
        for (attribute, value) in updates {
            let old_value = snapshot.get(*attribute);
            snapshot.set(*attribute, value)?;
            log.push(UpdateEntry {
                attribute: attribute.as_str().to_string(),
                old_value,
                new_value: snapshot.get(*attribute),
            });
        }

        tx.execute(
            "UPDATE derivative SET buying_party = ?2, selling_party = ?3, asset = ?4,
             quantity = ?5, strike_price = ?6, currency_code = ?7, date_of_trade = ?8,
             maturity_date = ?9, modified = 1
             WHERE id = ?1",
            params![
                id,
                &snapshot.buying_party,
                &snapshot.selling_party,
                &snapshot.asset,
                snapshot.quantity,
                snapshot.strike_price,
                &snapshot.currency_code,
                snapshot.date_of_trade.format(DATE_FORMAT).to_string(),
                snapshot.maturity_date.format(DATE_FORMAT).to_string(),
            ],
        )?;
        insert_action(&tx, id, user_id, ActionType::Update, &log, tree_id)?;
        tx.commit()?;

        debug!(derivative_id = id, changes = log.len(), "derivative updated");
        Ok(snapshot)
    }

    /// Mark a derivative deleted and log the DELETE action
    pub fn delete_derivative(&self, id: i64, user_id: Option<i64>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE derivative SET deleted = 1 WHERE id = ?1 AND deleted = 0",
            params![id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("derivative {}", id)));
        }
        insert_action(&tx, id, user_id, ActionType::Delete, &[], None)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_derivative(&self, id: i64) -> Result<Snapshot> {
        let conn = self.conn.lock();
        load_snapshot(&conn, id)
    }

    /// Actions of one derivative, oldest first
    pub fn actions_for_derivative(&self, derivative_id: i64) -> Result<Vec<Action>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM action WHERE derivative_id = ?1 ORDER BY timestamp ASC, id ASC",
            ACTION_COLUMNS
        ))?;
        let actions = stmt
            .query_map(params![derivative_id], row_to_action)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(actions)
    }

    /// Audit actions attributed to a tree
    pub fn actions_for_tree(&self, tree_id: i64) -> Result<Vec<Action>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM action WHERE tree_id = ?1 ORDER BY timestamp DESC, id DESC",
            ACTION_COLUMNS
        ))?;
        let actions = stmt
            .query_map(params![tree_id], row_to_action)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(actions)
    }

    pub fn add_company(&self, code: &str, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO company (id, name) VALUES (?1, ?2)",
            params![code, name],
        )?;
        Ok(())
    }

    pub fn add_product(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("INSERT OR IGNORE INTO product (name) VALUES (?1)", params![name])?;
        Ok(())
    }

    fn column_values(&self, sql: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let values = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(values)
    }
}

impl RecordSource for Database {
    fn training_population(&self, id_cutoff: i64) -> Result<Vec<DerivativeRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM derivative WHERE id <= ?1 AND deleted = 0 ORDER BY id",
            SNAPSHOT_COLUMNS
        ))?;
        let snapshots = stmt
            .query_map(params![id_cutoff], row_to_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM action WHERE derivative_id <= ?1
             ORDER BY derivative_id, timestamp ASC, id ASC",
            ACTION_COLUMNS
        ))?;
        let mut actions: HashMap<i64, Vec<Action>> = HashMap::new();
        for action in stmt.query_map(params![id_cutoff], row_to_action)? {
            let action = action?;
            actions.entry(action.derivative_id).or_default().push(action);
        }

        Ok(snapshots
            .into_iter()
            .map(|snapshot| DerivativeRecord {
                actions: actions.remove(&snapshot.id).unwrap_or_default(),
                snapshot,
            })
            .collect())
    }

    fn recent_snapshots(&self, since: NaiveDate) -> Result<Vec<Snapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM derivative WHERE deleted = 0 AND date_of_trade >= ?1 ORDER BY id",
            SNAPSHOT_COLUMNS
        ))?;
        let snapshots = stmt
            .query_map(params![since.format(DATE_FORMAT).to_string()], row_to_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }
}

impl ReferenceRegistry for Database {
    fn counterparty_codes(&self) -> Result<Vec<String>> {
        self.column_values("SELECT DISTINCT id FROM company ORDER BY id")
    }

    fn asset_names(&self) -> Result<Vec<String>> {
        self.column_values("SELECT DISTINCT name FROM product ORDER BY name")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(buyer: &str, traded: (i32, u32, u32)) -> Snapshot {
        Snapshot {
            id: 0,
            buying_party: buyer.into(),
            selling_party: "GZED20".into(),
            asset: "Stocks".into(),
            quantity: 10,
            strike_price: 2.5,
            currency_code: "USD".into(),
            date_of_trade: NaiveDate::from_ymd_opt(traded.0, traded.1, traded.2).unwrap(),
            maturity_date: NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = Database::in_memory().expect("Failed to create database");
        let id = db.insert_derivative(&snapshot("ABC", (2024, 1, 1)), Some(1)).unwrap();

        let stored = db.get_derivative(id).unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.buying_party, "ABC");

        let actions = db.actions_for_derivative(id).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, ActionType::Add);
    }

    #[test]
    fn test_update_logs_old_and_new_values() {
        let db = Database::in_memory().expect("Failed to create database");
        let id = db.insert_derivative(&snapshot("ABC", (2024, 1, 1)), Some(1)).unwrap();
        let updated = db
            .update_derivative(id, Some(2), &[(Attribute::BuyingParty, "XYZ".into())], Some(7))
            .unwrap();
        assert_eq!(updated.buying_party, "XYZ");

        let actions = db.actions_for_derivative(id).unwrap();
        assert_eq!(actions.len(), 2);
        let update = &actions[1];
        assert_eq!(update.action_type, ActionType::Update);
        assert_eq!(update.update_log[0].attribute, "buying_party");
        assert_eq!(update.update_log[0].old_value, AttrValue::Text("ABC".into()));
        assert_eq!(update.update_log[0].new_value, AttrValue::Text("XYZ".into()));

        let attributed = db.actions_for_tree(7).unwrap();
        assert_eq!(attributed.len(), 1);
        assert_eq!(attributed[0].id, update.id);
    }

    #[test]
    fn test_population_excludes_deleted_and_cutoff() {
        let db = Database::in_memory().expect("Failed to create database");
        let a = db.insert_derivative(&snapshot("A", (2024, 1, 1)), None).unwrap();
        let b = db.insert_derivative(&snapshot("B", (2024, 1, 1)), None).unwrap();
        let c = db.insert_derivative(&snapshot("C", (2024, 1, 1)), None).unwrap();
        db.delete_derivative(b, None).unwrap();
        assert!(matches!(db.delete_derivative(b, None), Err(Error::NotFound(_))));

        let population = db.training_population(a.max(b)).unwrap();
        let ids: Vec<i64> = population.iter().map(|r| r.snapshot.id).collect();
        assert_eq!(ids, vec![a]);
        assert_eq!(population[0].actions.len(), 1);

        assert_eq!(db.training_population(c).unwrap().len(), 2);
    }

    #[test]
    fn test_recent_snapshots_window() {
        let db = Database::in_memory().expect("Failed to create database");
        db.insert_derivative(&snapshot("OLD", (2023, 5, 1)), None).unwrap();
        db.insert_derivative(&snapshot("NEW", (2024, 5, 20)), None).unwrap();

        let recent = db
            .recent_snapshots(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap())
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].buying_party, "NEW");
    }

    #[test]
    fn test_registry() {
        let db = Database::in_memory().expect("Failed to create database");
        db.add_company("GZED20", "Gazed").unwrap();
        db.add_company("AMBT33", "Ambit").unwrap();
        db.add_product("Stocks").unwrap();
        db.add_product("Stocks").unwrap();

        assert_eq!(db.counterparty_codes().unwrap(), vec!["AMBT33", "GZED20"]);
        assert_eq!(db.asset_names().unwrap(), vec!["Stocks"]);
    }
}
