//! Song play warehouse: star-schema provisioning and ETL over DuckDB.
//!
//! Two phases share one connection:
//! 1. [`create_tables`] drops and recreates the staging, fact and dimension tables.
//! 2. [`etl`] bulk loads raw JSON into staging ([`load`]) and populates the
//!    star schema with set-based inserts ([`transform`]).

pub mod config;
pub mod create_tables;
pub mod error;
pub mod etl;
pub mod load;
pub mod pipeline;
pub mod schema;
pub mod transform;
pub mod warehouse;

pub use config::{CommitMode, Config};
pub use error::{Error, Result};
pub use etl::EtlOptions;
pub use pipeline::{Phase, PhaseReport, Statement, StepReport};
pub use schema::{TableDef, TableRole, TABLES};
pub use warehouse::{QueryResult, TableCount, Warehouse};
