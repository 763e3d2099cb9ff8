//! Sequential statement execution shared by every phase.
//!
//! A phase is an ordered list of statements run on one connection. Each
//! statement either commits on its own ([`CommitMode::Statement`]) or the
//! whole phase shares one transaction ([`CommitMode::Phase`]). The first
//! failure stops the phase; nothing is retried.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::config::CommitMode;
use crate::{Error, Result, Warehouse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    DropTables,
    CreateTables,
    LoadStaging,
    InsertTables,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::DropTables,
        Phase::CreateTables,
        Phase::LoadStaging,
        Phase::InsertTables,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::DropTables => "drop",
            Phase::CreateTables => "create",
            Phase::LoadStaging => "load",
            Phase::InsertTables => "insert",
        }
    }

    /// Wrap a statement failure in the error kind for this phase.
    fn statement_error(&self, table: &str, source: duckdb::Error) -> Error {
        let table = table.to_string();
        match self {
            Phase::DropTables | Phase::CreateTables => Error::Schema { table, source },
            Phase::LoadStaging => Error::LoadSql { table, source },
            Phase::InsertTables => Error::Transform { table, source },
        }
    }

    fn transaction_error(&self, source: duckdb::Error) -> Error {
        Error::Transaction {
            phase: self.name().to_string(),
            source,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Phase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Phase::ALL
            .into_iter()
            .find(|p| p.name() == s.to_lowercase())
            .ok_or_else(|| {
                Error::Config(format!(
                    "Unknown phase '{}': expected drop, create, load or insert",
                    s
                ))
            })
    }
}

/// One SQL statement of a phase.
#[derive(Debug, Clone)]
pub struct Statement {
    /// Table the statement targets.
    pub table: &'static str,
    /// Short description for logs and reports, e.g. "copy events_staging".
    pub label: String,
    pub sql: String,
}

impl Statement {
    pub fn new(table: &'static str, label: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            table,
            label: label.into(),
            sql: sql.into(),
        }
    }
}

/// Outcome of one executed statement.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub table: &'static str,
    pub label: String,
    /// Rows inserted or deleted; 0 for DDL.
    pub rows: usize,
    pub elapsed_ms: u128,
}

/// Outcome of a whole phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub commit: CommitMode,
    pub steps: Vec<StepReport>,
}

impl PhaseReport {
    /// Total rows changed by statements targeting a table.
    pub fn rows_for(&self, table: &str) -> usize {
        self.steps
            .iter()
            .filter(|s| s.table == table)
            .map(|s| s.rows)
            .sum()
    }

    pub fn total_rows(&self) -> usize {
        self.steps.iter().map(|s| s.rows).sum()
    }
}

impl fmt::Display for PhaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} phase: {} statements, {} rows ({} commit)",
            self.phase,
            self.steps.len(),
            self.total_rows(),
            self.commit
        )
    }
}

/// Execute the statements of a phase strictly in order.
pub fn execute_phase(
    warehouse: &Warehouse,
    phase: Phase,
    statements: &[Statement],
) -> Result<PhaseReport> {
    let commit = warehouse.config().pipeline.commit;
    let span = info_span!("phase", phase = phase.name());
    let _guard = span.enter();

    info!(statements = statements.len(), commit = %commit, "phase started");

    if commit == CommitMode::Phase {
        warehouse.begin().map_err(|e| phase.transaction_error(e))?;
    }

    match run_statements(warehouse, phase, statements) {
        Ok(steps) => {
            if commit == CommitMode::Phase {
                warehouse.commit().map_err(|e| phase.transaction_error(e))?;
            }
            let report = PhaseReport {
                phase,
                commit,
                steps,
            };
            info!(rows = report.total_rows(), "phase finished");
            Ok(report)
        }
        Err(e) => {
            if commit == CommitMode::Phase {
                warn!("rolling back {} phase", phase);
                if let Err(rollback_err) = warehouse.rollback() {
                    warn!(error = %rollback_err, "rollback failed");
                }
            }
            Err(e)
        }
    }
}

fn run_statements(
    warehouse: &Warehouse,
    phase: Phase,
    statements: &[Statement],
) -> Result<Vec<StepReport>> {
    let mut steps = Vec::with_capacity(statements.len());
    for statement in statements {
        let started = Instant::now();
        debug!(label = %statement.label, "running statement");

        let rows = warehouse
            .execute(&statement.sql)
            .map_err(|e| phase.statement_error(statement.table, e))?;

        let elapsed_ms = started.elapsed().as_millis();
        info!(table = statement.table, rows, elapsed_ms = elapsed_ms as u64, "{}", statement.label);

        steps.push(StepReport {
            table: statement.table,
            label: statement.label.clone(),
            rows,
            elapsed_ms,
        });
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::tests::memory_config;

    fn statements() -> Vec<Statement> {
        vec![
            Statement::new("t", "insert t", "INSERT INTO t VALUES (1), (2)"),
            Statement::new("u", "insert u", "INSERT INTO u VALUES (3)"),
        ]
    }

    fn setup(commit: CommitMode) -> Warehouse {
        let mut config = memory_config();
        config.pipeline.commit = commit;
        let wh = Warehouse::open(&config).unwrap();
        wh.execute("CREATE TABLE t (x INTEGER)").unwrap();
        wh
    }

    #[test]
    fn test_execute_phase_reports_rows() {
        let wh = setup(CommitMode::Statement);
        wh.execute("CREATE TABLE u (x INTEGER)").unwrap();

        let report = execute_phase(&wh, Phase::InsertTables, &statements()).unwrap();
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.rows_for("t"), 2);
        assert_eq!(report.rows_for("u"), 1);
        assert_eq!(report.total_rows(), 3);
        assert_eq!(
            report.to_string(),
            "insert phase: 2 statements, 3 rows (statement commit)"
        );
    }

    #[test]
    fn test_statement_mode_keeps_earlier_commits() {
        // Table u is missing, so the second statement fails.
        let wh = setup(CommitMode::Statement);

        let result = execute_phase(&wh, Phase::InsertTables, &statements());
        match result {
            Err(Error::Transform { table, .. }) => assert_eq!(table, "u"),
            other => panic!("expected transform error, got {:?}", other.map(|r| r.steps.len())),
        }
        assert_eq!(wh.row_count("t").unwrap(), 2);
    }

    #[test]
    fn test_phase_mode_rolls_back() {
        let wh = setup(CommitMode::Phase);

        let result = execute_phase(&wh, Phase::InsertTables, &statements());
        assert!(matches!(result, Err(Error::Transform { .. })));
        assert_eq!(wh.row_count("t").unwrap(), 0);

        // Connection is usable again after the rollback
        wh.execute("INSERT INTO t VALUES (9)").unwrap();
        assert_eq!(wh.row_count("t").unwrap(), 1);
    }

    #[test]
    fn test_phase_mode_commits_on_success() {
        let wh = setup(CommitMode::Phase);
        wh.execute("CREATE TABLE u (x INTEGER)").unwrap();

        execute_phase(&wh, Phase::InsertTables, &statements()).unwrap();
        assert_eq!(wh.row_count("t").unwrap(), 2);
        assert_eq!(wh.row_count("u").unwrap(), 1);
    }

    #[test]
    fn test_error_kind_follows_phase() {
        let wh = setup(CommitMode::Statement);
        let bad = [Statement::new("nope", "bad", "INSERT INTO nope VALUES (1)")];

        assert!(matches!(
            execute_phase(&wh, Phase::CreateTables, &bad),
            Err(Error::Schema { .. })
        ));
        assert!(matches!(
            execute_phase(&wh, Phase::LoadStaging, &bad),
            Err(Error::LoadSql { .. })
        ));
    }

    #[test]
    fn test_phase_from_str() {
        assert_eq!("load".parse::<Phase>().unwrap(), Phase::LoadStaging);
        assert_eq!("INSERT".parse::<Phase>().unwrap(), Phase::InsertTables);
        assert!("transform".parse::<Phase>().is_err());
    }
}
