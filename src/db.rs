// 🗄️ SQLite Store - enriched roster table + run log + raw query access
//
// The enriched roster is written as ONE table (replaced every run):
//   passthrough columns → TEXT (empty cells become NULL)
//   flag columns        → INTEGER 0/1
// Each run also appends a row to `validation_runs`.

use crate::engine::ValidationResult;
use crate::error::{PipelineError, PipelineResult};
use crate::materialize::{EnrichedRoster, RosterSink, FLAG_COLUMNS};
use chrono::{DateTime, Utc};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_TABLE: &str = "provider_roster";

/// Run log table, owned by the store
pub const RUNS_TABLE: &str = "validation_runs";

/// Names the roster table may not take: the run log and SQLite internals
pub fn is_reserved_table(name: &str) -> bool {
    let name = name.trim().to_lowercase();
    name == RUNS_TABLE || name.starts_with("sqlite_")
}

/// One validation run, as logged in `validation_runs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub as_of: DateTime<Utc>,
    pub cutoff: f64,
    pub table_name: String,
    pub rows: i64,
    pub license_found: i64,
    pub license_active: i64,
    pub identifier_found: i64,
}

impl RunRecord {
    /// New run id; counts are filled from the enriched roster
    pub fn new(
        started_at: DateTime<Utc>,
        as_of: DateTime<Utc>,
        cutoff: f64,
        table_name: &str,
        roster: &EnrichedRoster,
    ) -> Self {
        let count = |f: fn(&ValidationResult) -> bool| roster.results().filter(|r| f(*r)).count() as i64;

        RunRecord {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at,
            finished_at: Utc::now(),
            as_of,
            cutoff,
            table_name: table_name.to_string(),
            rows: roster.len() as i64,
            license_found: count(|r| r.license_found),
            license_active: count(|r| r.license_active),
            identifier_found: count(|r| r.identifier_found),
        }
    }
}

pub fn setup_database(conn: &Connection) -> PipelineResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS validation_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            as_of TEXT NOT NULL,
            cutoff REAL NOT NULL,
            table_name TEXT NOT NULL,
            row_count INTEGER NOT NULL,
            license_found INTEGER NOT NULL,
            license_active INTEGER NOT NULL,
            identifier_found INTEGER NOT NULL
        )",
        [],
    )?;

    Ok(())
}

/// SQLite implementation of the storage boundary
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    table: String,
}

impl SqliteStore {
    /// Open a database file (":memory:" for an in-memory store)
    pub fn open(path: &Path, table: &str) -> PipelineResult<Self> {
        let conn = if path == Path::new(":memory:") {
            Connection::open_in_memory()?
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let conn = Connection::open(path)?;
            // WAL for crash recovery on file databases
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn
        };

        Self::from_connection(conn, table)
    }

    pub fn in_memory(table: &str) -> PipelineResult<Self> {
        Self::from_connection(Connection::open_in_memory()?, table)
    }

    pub fn from_connection(conn: Connection, table: &str) -> PipelineResult<Self> {
        if table.trim().is_empty() {
            return Err(PipelineError::Config("output table name is empty".to_string()));
        }
        if is_reserved_table(table) {
            return Err(PipelineError::Config(format!("output table name '{}' is reserved", table)));
        }
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn,
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    pub fn record_run(&self, run: &RunRecord) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO validation_runs (
                run_id, started_at, finished_at, as_of, cutoff, table_name,
                row_count, license_found, license_active, identifier_found
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run.run_id,
                run.started_at.to_rfc3339(),
                run.finished_at.to_rfc3339(),
                run.as_of.to_rfc3339(),
                run.cutoff,
                run.table_name,
                run.rows,
                run.license_found,
                run.license_active,
                run.identifier_found,
            ],
        )?;

        Ok(())
    }
}

impl RosterSink for SqliteStore {
    fn store(&mut self, roster: &EnrichedRoster) -> PipelineResult<usize> {
        let columns: Vec<String> = unique_columns(&roster.columns, &FLAG_COLUMNS)
            .into_iter()
            .chain(FLAG_COLUMNS.iter().map(|c| c.to_string()))
            .collect();
        let passthrough = roster.columns.len();

        let definitions: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let sql_type = if i < passthrough { "TEXT" } else { "INTEGER NOT NULL" };
                format!("{} {}", quote_identifier(c), sql_type)
            })
            .collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let table = quote_identifier(&self.table);

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({});",
            definitions.join(", ")
        ))?;

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.iter().map(|c| quote_identifier(c)).collect::<Vec<_>>().join(", "),
                placeholders.join(", ")
            ))?;

            for row in &roster.rows {
                let values = row
                    .attributes
                    .iter()
                    .map(|cell| {
                        if cell.is_empty() {
                            Value::Null
                        } else {
                            Value::Text(cell.clone())
                        }
                    })
                    .chain(row.flag_values().into_iter().map(Value::Integer));
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        info!(table = %self.table, rows = roster.len(), "enriched roster stored");
        Ok(roster.len())
    }
}

/// `"name"` with embedded quotes doubled
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Blank and repeated labels get positional / numeric suffixes.
/// `reserved` names are never handed out, so a clashing label is renamed.
fn unique_columns(columns: &[String], reserved: &[&str]) -> Vec<String> {
    let mut seen: HashSet<String> = reserved.iter().map(|r| r.to_lowercase()).collect();

    columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let base = if c.trim().is_empty() {
                format!("column_{}", i + 1)
            } else {
                c.to_lowercase()
            };
            let mut candidate = base.clone();
            let mut n = 2;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{}_{}", base, n);
                n += 1;
            }
            if candidate != *c {
                debug!(original = %c, renamed = %candidate, "column renamed for storage");
            }
            candidate
        })
        .collect()
}

// ============================================================================
// QUERY BOUNDARY
// ============================================================================

/// Run one SQL statement and return each row as a JSON object
pub fn execute_query(
    conn: &Connection,
    sql: &str,
) -> PipelineResult<Vec<serde_json::Map<String, serde_json::Value>>> {
    let mut stmt = conn.prepare(sql)?;
    let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();

    while let Some(row) = rows.next()? {
        let mut object = serde_json::Map::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            object.insert(name.clone(), json_value(row.get_ref(i)?));
        }
        out.push(object);
    }

    Ok(out)
}

fn json_value(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::json!(i),
        ValueRef::Real(f) => serde_json::json!(f),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(format!("<{} bytes>", b.len())),
    }
}

/// Every table with its columns and declared types:
///
/// ```text
/// Table 'provider_roster':
///   - full_name (TEXT)
/// ```
pub fn describe_schema(conn: &Connection) -> PipelineResult<String> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut schema = String::new();
    for table in tables {
        schema.push_str(&format!("Table '{}':\n", table));

        let mut info = conn.prepare(&format!("PRAGMA table_info({})", quote_identifier(&table)))?;
        let columns = info
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        for (name, sql_type) in columns {
            schema.push_str(&format!("  - {} ({})\n", name, sql_type));
        }
    }

    Ok(schema)
}

/// Claimed state and flags of every stored row, in storage order
pub fn load_flags(
    conn: &Connection,
    table: &str,
    state_column: &str,
) -> PipelineResult<Vec<(String, ValidationResult)>> {
    let [found, active, npi] = FLAG_COLUMNS.map(quote_identifier);
    let sql = format!(
        "SELECT {}, {found}, {active}, {npi} FROM {} ORDER BY rowid",
        quote_identifier(state_column),
        quote_identifier(table),
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            let state: Option<String> = row.get(0)?;
            Ok((
                state.unwrap_or_default(),
                ValidationResult {
                    license_found: row.get::<_, i64>(1)? != 0,
                    license_active: row.get::<_, i64>(2)? != 0,
                    identifier_found: row.get::<_, i64>(3)? != 0,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Runs in reverse chronological order
pub fn get_runs(conn: &Connection) -> PipelineResult<Vec<RunRecord>> {
    let mut stmt = conn.prepare(
        "SELECT run_id, started_at, finished_at, as_of, cutoff, table_name,
                row_count, license_found, license_active, identifier_found
         FROM validation_runs
         ORDER BY id DESC",
    )?;

    let parse_time = |s: String| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| rusqlite::Error::InvalidQuery)
    };

    let runs = stmt
        .query_map([], |row| {
            Ok(RunRecord {
                run_id: row.get(0)?,
                started_at: parse_time(row.get(1)?)?,
                finished_at: parse_time(row.get(2)?)?,
                as_of: parse_time(row.get(3)?)?,
                cutoff: row.get(4)?,
                table_name: row.get(5)?,
                rows: row.get(6)?,
                license_found: row.get(7)?,
                license_active: row.get(8)?,
                identifier_found: row.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(runs)
}
