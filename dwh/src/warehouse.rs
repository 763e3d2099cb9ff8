//! Warehouse - the single DuckDB connection every phase runs on.
//!
//! Statements run in autocommit mode unless a caller brackets them with
//! [`Warehouse::begin`] / [`Warehouse::commit`].

use chrono::{DateTime, NaiveDate};
use duckdb::{
    params,
    types::{TimeUnit, Value},
    Connection,
};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::is_remote;
use crate::schema::{quote_ident, quote_literal, TABLES};
use crate::{Config, Error, Result};

/// Name of the secret granting the warehouse read access to object storage.
pub const SOURCE_SECRET_NAME: &str = "dwh_sources";

/// Result of an ad-hoc query, every value rendered as text.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    /// Per column: every non-null value is a number.
    pub numeric: Vec<bool>,
    pub rows: Vec<Vec<String>>,
}

/// Row count of one pipeline table.
#[derive(Debug, Clone, Serialize)]
pub struct TableCount {
    pub table: &'static str,
    pub role: String,
    /// None when the table does not exist.
    pub rows: Option<i64>,
}

/// An open warehouse connection.
pub struct Warehouse {
    config: Config,
    conn: Connection,
    remote_ready: bool,
}

impl Warehouse {
    /// Connect to the configured database and apply session settings.
    pub fn open(config: &Config) -> Result<Self> {
        let target = config.display_target().to_string();
        let conn = if config.cluster.database == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(config.connection_target())
        }
        .map_err(|source| Error::Connection {
            target: target.clone(),
            source,
        })?;

        for sql in session_settings(config) {
            conn.execute(&sql, [])
                .map_err(|source| Error::Connection {
                    target: target.clone(),
                    source,
                })?;
        }

        info!(database = %target, "connected to warehouse");

        Ok(Self {
            config: config.clone(),
            conn,
            remote_ready: false,
        })
    }

    /// Get config reference.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Underlying DuckDB connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Execute one statement, returning the number of rows changed.
    pub fn execute(&self, sql: &str) -> std::result::Result<usize, duckdb::Error> {
        debug!(sql, "execute");
        self.conn.execute(sql, [])
    }

    pub fn begin(&self) -> std::result::Result<(), duckdb::Error> {
        self.conn.execute("BEGIN TRANSACTION", []).map(|_| ())
    }

    pub fn commit(&self) -> std::result::Result<(), duckdb::Error> {
        self.conn.execute("COMMIT", []).map(|_| ())
    }

    pub fn rollback(&self) -> std::result::Result<(), duckdb::Error> {
        self.conn.execute("ROLLBACK", []).map(|_| ())
    }

    /// Load httpfs and register the read secret, once per connection.
    ///
    /// Local sources need neither, so nothing is installed for them.
    pub fn ensure_source_access(&mut self) -> Result<()> {
        if self.remote_ready || !self.config.has_remote_sources() {
            return Ok(());
        }
        for sql in source_access_statements(&self.config) {
            self.conn
                .execute(&sql, [])
                .map_err(Error::SourceAccess)?;
        }
        info!(
            role = self.config.iam_role.as_ref().map(|r| r.arn.as_str()).unwrap_or("<credential chain>"),
            "object storage access prepared"
        );
        self.remote_ready = true;
        Ok(())
    }

    /// Check whether a table exists in the main schema.
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM information_schema.tables WHERE table_schema = 'main' AND table_name = ?",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Count rows in a table.
    pub fn row_count(&self, name: &str) -> Result<i64> {
        let sql = format!("SELECT count(*) FROM {}", quote_ident(name));
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    /// Row counts of all seven tables, in schema order.
    pub fn table_counts(&self) -> Result<Vec<TableCount>> {
        TABLES
            .iter()
            .map(|table| {
                let rows = if self.table_exists(table.name)? {
                    Some(self.row_count(table.name)?)
                } else {
                    None
                };
                Ok(TableCount {
                    table: table.name,
                    role: table.role.to_string(),
                    rows,
                })
            })
            .collect()
    }

    /// Run ad-hoc SQL for the operator and render the rows as text.
    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        debug!(sql, "query");
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let columns = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();

        let mut numeric = vec![true; columns.len()];
        let mut rendered = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(columns.len());
            for (i, is_numeric) in numeric.iter_mut().enumerate() {
                let value: Value = row.get(i)?;
                *is_numeric &= is_number(&value) || matches!(value, Value::Null);
                cells.push(render_value(value));
            }
            rendered.push(cells);
        }

        Ok(QueryResult {
            columns,
            numeric,
            rows: rendered,
        })
    }
}

/// SET statements applied right after connecting.
fn session_settings(config: &Config) -> Vec<String> {
    let mut settings = Vec::new();
    if let Some(threads) = config.cluster.threads {
        settings.push(format!("SET threads = {}", threads));
    }
    if let Some(limit) = &config.cluster.memory_limit {
        settings.push(format!("SET memory_limit = {}", quote_literal(limit)));
    }
    settings
}

/// Statements that let the warehouse read object storage on its own.
///
/// The configured role is handed to the credential chain so the warehouse
/// assumes it directly; the pipeline never sees the data bytes.
pub fn source_access_statements(config: &Config) -> Vec<String> {
    let mut statements = vec!["INSTALL httpfs".to_string(), "LOAD httpfs".to_string()];

    let s3_like = [&config.s3.log_data, &config.s3.log_jsonpath, &config.s3.song_data]
        .iter()
        .any(|loc| is_remote(loc) && !loc.to_ascii_lowercase().starts_with("http"));
    if !s3_like {
        return statements;
    }

    statements.push("INSTALL aws".to_string());
    statements.push("LOAD aws".to_string());

    let mut options = vec!["TYPE s3".to_string(), "PROVIDER credential_chain".to_string()];
    if let Some(role) = &config.iam_role {
        options.push("CHAIN 'sts'".to_string());
        options.push(format!("ASSUME_ROLE_ARN {}", quote_literal(&role.arn)));
    }
    if let Some(region) = &config.s3.region {
        options.push(format!("REGION {}", quote_literal(region)));
    }
    statements.push(format!(
        "CREATE OR REPLACE SECRET {} ({})",
        SOURCE_SECRET_NAME,
        options.join(", ")
    ));
    statements
}

fn is_number(value: &Value) -> bool {
    matches!(
        value,
        Value::SmallInt(_)
            | Value::Int(_)
            | Value::BigInt(_)
            | Value::HugeInt(_)
            | Value::Double(_)
            | Value::Decimal(_)
    )
}

/// Text for one cell. Covers the types the pipeline tables and their
/// aggregates produce; anything else falls back to its debug form.
fn render_value(value: Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Text(s) => s,
        Value::Boolean(b) => b.to_string(),
        Value::SmallInt(n) => n.to_string(),
        Value::Int(n) => n.to_string(),
        Value::BigInt(n) => n.to_string(),
        Value::HugeInt(n) => n.to_string(),
        Value::Double(f) => f.to_string(),
        Value::Decimal(d) => d.to_string(),
        Value::Timestamp(unit, raw) => render_timestamp(unit, raw),
        Value::Date32(days) => NaiveDate::from_num_days_from_ce_opt(days + EPOCH_DAYS_FROM_CE)
            .map(|d| d.to_string())
            .unwrap_or_else(|| format!("<date {}>", days)),
        Value::List(items) => {
            let items: Vec<String> = items.into_iter().map(render_value).collect();
            format!("[{}]", items.join(", "))
        }
        other => format!("{:?}", other),
    }
}

/// Days from 0001-01-01 to 1970-01-01.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Whole seconds, the resolution start_time is built at.
fn render_timestamp(unit: TimeUnit, raw: i64) -> String {
    let micros = match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    };
    DateTime::from_timestamp_micros(micros)
        .map(|dt| dt.naive_utc().format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| format!("<timestamp {}>", raw))
}
