//! CLI command implementations.

use std::path::Path;

use tracing::debug;

use dwh::config::resolve_config_path;
use dwh::{create_tables as schema_manager, etl as runner, load, transform};
use dwh::{Config, EtlOptions, Phase, PhaseReport, Statement, TableDef, Warehouse, TABLES};

/// Widest a query cell prints before it is clipped.
const MAX_CELL_WIDTH: usize = 48;

fn open(config_path: Option<&Path>) -> dwh::Result<Warehouse> {
    let path = resolve_config_path(config_path)?;
    debug!(config = %path.display(), "using config");
    Warehouse::open(&Config::load_from(&path)?)
}

fn print_report(report: &PhaseReport) {
    println!("{}", report);
    for step in &report.steps {
        println!(
            "  {:<48} {:>10} rows {:>8} ms",
            step.label, step.rows, step.elapsed_ms
        );
    }
}

/// Write a template config file.
pub fn init(config_path: Option<&Path>, force: bool) -> dwh::Result<()> {
    let path = resolve_config_path(config_path)?;

    if path.exists() && !force {
        println!("Config already exists at {}", path.display());
        println!("Use --force to overwrite it");
        return Ok(());
    }

    Config::template().save(&path)?;
    println!("Wrote config template to {}", path.display());
    println!("Edit [s3] and [iam_role] before running `dwh run`.");
    Ok(())
}

/// Drop and recreate all tables.
pub fn create_tables(config_path: Option<&Path>) -> dwh::Result<()> {
    let warehouse = open(config_path)?;
    for report in schema_manager::reset_schema(&warehouse)? {
        print_report(&report);
    }
    Ok(())
}

/// Load staging and populate the star schema.
pub fn etl(config_path: Option<&Path>, skip_load: bool) -> dwh::Result<()> {
    let mut warehouse = open(config_path)?;
    for report in runner::run(&mut warehouse, &EtlOptions { skip_load })? {
        print_report(&report);
    }
    Ok(())
}

/// Create tables, then run the ETL on the same connection.
pub fn run(config_path: Option<&Path>) -> dwh::Result<()> {
    let mut warehouse = open(config_path)?;
    let mut reports = schema_manager::reset_schema(&warehouse)?;
    reports.extend(runner::run(&mut warehouse, &EtlOptions::default())?);
    for report in &reports {
        print_report(report);
    }
    Ok(())
}

/// Print the SQL for one phase or all of them.
pub fn plan(config_path: Option<&Path>, phase: Option<&str>) -> dwh::Result<()> {
    let phases: Vec<Phase> = match phase {
        Some(name) => vec![name.parse()?],
        None => Phase::ALL.to_vec(),
    };

    // Only the load phase needs a connection, to read the jsonpaths file.
    let warehouse = if phases.contains(&Phase::LoadStaging) {
        let mut wh = open(config_path)?;
        wh.ensure_source_access()?;
        Some(wh)
    } else {
        None
    };

    for phase in phases {
        let statements: Vec<Statement> = match phase {
            Phase::DropTables => schema_manager::drop_statements(),
            Phase::CreateTables => schema_manager::create_statements(),
            Phase::InsertTables => transform::insert_statements(),
            Phase::LoadStaging => match &warehouse {
                Some(wh) => load::load_statements(wh)?,
                None => Vec::new(),
            },
        };

        println!("-- phase: {}", phase);
        for statement in statements {
            println!("-- {}", statement.label);
            println!("{};", statement.sql);
            println!();
        }
    }
    Ok(())
}

/// Print row counts for every pipeline table.
pub fn status(config_path: Option<&Path>, format: &str) -> dwh::Result<()> {
    let warehouse = open(config_path)?;
    let counts = warehouse.table_counts()?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&counts)
                .map_err(|e| dwh::Error::Config(format!("Failed to serialize status: {}", e)))?;
            println!("{}", json);
        }
        "table" => {
            println!("Warehouse: {}", warehouse.config().display_target());
            println!();
            println!("{:<16} {:<10} {:>12}", "TABLE", "ROLE", "ROWS");
            println!("{}", "-".repeat(40));
            for count in &counts {
                let rows = count
                    .rows
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "(missing)".to_string());
                println!("{:<16} {:<10} {:>12}", count.table, count.role, rows);
            }
        }
        other => {
            return Err(dwh::Error::Config(format!(
                "Unknown format '{}': expected table or json",
                other
            )))
        }
    }
    Ok(())
}

/// List the table model, or the columns of one table.
pub fn tables(name: Option<&str>) -> dwh::Result<()> {
    if let Some(name) = name {
        let table = TableDef::find(name)
            .ok_or_else(|| dwh::Error::Config(format!("Unknown table '{}'", name)))?;
        println!("{} ({})", table.name, table.role);
        println!();
        for column in table.columns {
            let mut flags = Vec::new();
            if column.not_null {
                flags.push("not null");
            }
            if column.identity {
                flags.push("identity");
            }
            if table.sort_key == Some(column.name) {
                flags.push("sort key");
            }
            println!("  {:<16} {:<10} {}", column.name, column.data_type.sql(), flags.join(", "));
        }
        return Ok(());
    }

    println!(
        "{:<16} {:<10} {:>7}  {:<14} {}",
        "TABLE", "ROLE", "COLUMNS", "SORT KEY", "DISTRIBUTION"
    );
    println!("{}", "-".repeat(70));
    for table in TABLES.iter() {
        println!(
            "{:<16} {:<10} {:>7}  {:<14} {}",
            table.name,
            table.role,
            table.columns.len(),
            table.sort_key.unwrap_or("-"),
            table.distribution
        );
    }
    Ok(())
}

/// Run ad-hoc SQL and print the rows, numbers right-aligned.
pub fn query(config_path: Option<&Path>, sql: &str) -> dwh::Result<()> {
    let result = open(config_path)?.query(sql)?;

    if result.rows.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let widths: Vec<usize> = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            result
                .rows
                .iter()
                .map(|row| row[i].chars().count())
                .fold(name.chars().count(), usize::max)
                .min(MAX_CELL_WIDTH)
        })
        .collect();

    print_cells(&result.columns, &widths, &result.numeric);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    println!("  {}", rule.join("  "));
    for row in &result.rows {
        print_cells(row, &widths, &result.numeric);
    }

    let n = result.rows.len();
    println!("({} {})", n, if n == 1 { "row" } else { "rows" });
    Ok(())
}

fn print_cells(cells: &[String], widths: &[usize], numeric: &[bool]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .zip(numeric)
        .map(|((cell, &width), &right)| {
            let cell = clip(cell, width);
            if right {
                format!("{:>width$}", cell)
            } else {
                format!("{:<width$}", cell)
            }
        })
        .collect();
    println!("  {}", line.join("  ").trim_end());
}

fn clip(cell: &str, width: usize) -> String {
    if cell.chars().count() <= width {
        return cell.to_string();
    }
    let mut clipped: String = cell.chars().take(width.saturating_sub(1)).collect();
    clipped.push('~');
    clipped
}
