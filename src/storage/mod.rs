//! SQLite persistence
//!
//! One connection guarded by a mutex backs the record store (derivatives and
//! their audit actions), the reference registries and the decision tree graph.
//! Writes that must be seen together run inside a single transaction.

pub mod derivatives;
pub mod trees;

use crate::error::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{types::Type, Connection, OpenFlags};
use std::sync::Arc;
use tracing::{info, warn};

pub use derivatives::RecordSource;
pub use trees::NodeUpdate;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS derivative (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    buying_party TEXT NOT NULL,
    selling_party TEXT NOT NULL,
    asset TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    strike_price REAL NOT NULL,
    currency_code TEXT NOT NULL,
    date_of_trade TEXT NOT NULL,
    maturity_date TEXT NOT NULL,
    modified INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_derivative_trade_date
    ON derivative(date_of_trade DESC) WHERE deleted = 0;

CREATE TABLE IF NOT EXISTS action (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    derivative_id INTEGER NOT NULL,
    user_id INTEGER,
    type TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    update_log TEXT,
    tree_id INTEGER
);

CREATE INDEX IF NOT EXISTS idx_action_derivative
    ON action(derivative_id, timestamp ASC, id ASC);

CREATE INDEX IF NOT EXISTS idx_action_tree
    ON action(tree_id) WHERE tree_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS company (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS product (
    name TEXT PRIMARY KEY
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS decision_tree_node (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    parent_id INTEGER,
    true_child_id INTEGER,
    false_child_id INTEGER,
    feature TEXT NOT NULL,
    criteria TEXT NOT NULL,
    true_label TEXT,
    false_label TEXT,
    approved INTEGER NOT NULL DEFAULT 0,
    automated INTEGER NOT NULL DEFAULT 0,
    confidence REAL NOT NULL DEFAULT 0,
    last_flag_count INTEGER NOT NULL DEFAULT 0,
    suggested_feature TEXT,
    suggested_value TEXT,
    description TEXT
);

CREATE INDEX IF NOT EXISTS idx_tree_node_parent
    ON decision_tree_node(parent_id);
"#;

/// Shared handle to the backing database
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(db_path, flags)?;
        conn.execute_batch(SCHEMA_SQL)?;

        if db_path != ":memory:" {
            let journal_mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .unwrap_or_default();
            if journal_mode.to_lowercase() != "wal" {
                warn!("WAL mode not active, journal_mode = {}", journal_mode);
            }
        }

        let trees: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM decision_tree_node WHERE parent_id IS NULL",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);
        info!(path = db_path, trees, "database initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }
}

/// Map a text column that failed to parse into a rusqlite conversion error
pub(crate) fn bad_column(idx: usize, what: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(Error::MalformedColumn(what)))
}
