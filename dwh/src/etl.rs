//! Load-and-transform runner: bulk load staging, then populate the star schema.

use tracing::info;

use crate::load::load_staging_tables;
use crate::pipeline::PhaseReport;
use crate::transform::insert_tables;
use crate::{Result, Warehouse};

/// Options for an ETL run.
#[derive(Debug, Default, Clone)]
pub struct EtlOptions {
    /// Transform whatever is already staged without loading again.
    pub skip_load: bool,
}

/// Run the load phase then the transform phase.
///
/// A load failure stops the run before any transform executes.
pub fn run(warehouse: &mut Warehouse, opts: &EtlOptions) -> Result<Vec<PhaseReport>> {
    let mut reports = Vec::with_capacity(2);
    if opts.skip_load {
        info!("skipping bulk load");
    } else {
        reports.push(load_staging_tables(warehouse)?);
    }
    reports.push(insert_tables(warehouse)?);
    Ok(reports)
}
