//! Error types for warehouse operations.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Could not connect to warehouse {target}: {source}")]
    Connection {
        target: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("Could not prepare object storage access: {0}")]
    SourceAccess(#[source] duckdb::Error),

    #[error("DDL failed for table {table}: {source}")]
    Schema {
        table: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("Bulk load into {table} failed: {source}")]
    LoadSql {
        table: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("Bulk load into {table} failed: {message}")]
    Load { table: String, message: String },

    #[error("Transaction for {phase} phase failed: {source}")]
    Transaction {
        phase: String,
        #[source]
        source: duckdb::Error,
    },

    #[error("Transform into {table} failed: {source}")]
    Transform {
        table: String,
        #[source]
        source: duckdb::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
