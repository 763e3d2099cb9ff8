//! Schema manager: drops and recreates the seven pipeline tables.
//!
//! All drops run before any create. Dropping is idempotent (`IF EXISTS`), so
//! running the schema phase twice leaves the same catalog as running it once.

use crate::pipeline::{execute_phase, Phase, PhaseReport, Statement};
use crate::schema::TABLES;
use crate::{Result, Warehouse};

/// DROP statements for every table (and the identity sequence after its table).
pub fn drop_statements() -> Vec<Statement> {
    let mut statements = Vec::new();
    for table in TABLES.iter() {
        statements.push(Statement::new(
            table.name,
            format!("drop {}", table.name),
            table.drop_table_sql(),
        ));
        if let Some(sql) = table.drop_sequence_sql() {
            statements.push(Statement::new(
                table.name,
                format!("drop {} identity sequence", table.name),
                sql,
            ));
        }
    }
    statements
}

/// CREATE statements for every table, with its sequence and sort-key index.
pub fn create_statements() -> Vec<Statement> {
    let mut statements = Vec::new();
    for table in TABLES.iter() {
        if let Some(sql) = table.create_sequence_sql() {
            statements.push(Statement::new(
                table.name,
                format!("create {} identity sequence", table.name),
                sql,
            ));
        }
        statements.push(Statement::new(
            table.name,
            format!("create {}", table.name),
            table.create_table_sql(),
        ));
        if let Some(sql) = table.create_index_sql() {
            statements.push(Statement::new(
                table.name,
                format!("index {} sort key", table.name),
                sql,
            ));
        }
    }
    statements
}

pub fn drop_tables(warehouse: &Warehouse) -> Result<PhaseReport> {
    execute_phase(warehouse, Phase::DropTables, &drop_statements())
}

pub fn create_tables(warehouse: &Warehouse) -> Result<PhaseReport> {
    execute_phase(warehouse, Phase::CreateTables, &create_statements())
}

/// Drop everything, then create everything.
pub fn reset_schema(warehouse: &Warehouse) -> Result<Vec<PhaseReport>> {
    let dropped = drop_tables(warehouse)?;
    let created = create_tables(warehouse)?;
    Ok(vec![dropped, created])
}
