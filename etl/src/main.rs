//! dwh: provision the song play warehouse and run the ETL.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "dwh")]
#[command(about = "Song play warehouse - create tables, bulk load JSON, build the star schema")]
#[command(version)]
struct Cli {
    /// Path to config file (default: $DWH_CONFIG, ./dwh.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging (includes full SQL text)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a template config file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Drop and recreate all staging, fact and dimension tables
    CreateTables,

    /// Bulk load staging tables, then populate the star schema
    Etl {
        /// Transform what is already staged without loading again
        #[arg(long)]
        skip_load: bool,
    },

    /// Create tables then run the ETL
    Run,

    /// Print the SQL a phase would run, without running it
    Plan {
        /// Phase: drop, create, load, insert (default: all)
        #[arg(short, long)]
        phase: Option<String>,
    },

    /// Show row counts for every pipeline table
    Status {
        /// Output format: table, json
        #[arg(short = 'f', long = "format", default_value = "table")]
        format: String,
    },

    /// List table definitions and layout hints
    Tables {
        /// Show the columns of one table
        name: Option<String>,
    },

    /// Execute a SQL query against the warehouse
    #[command(visible_alias = "q")]
    Query {
        /// SQL query to execute
        sql: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config_path = cli.config.as_deref();
    let result = match cli.command {
        Commands::Init { force } => commands::init(config_path, force),
        Commands::CreateTables => commands::create_tables(config_path),
        Commands::Etl { skip_load } => commands::etl(config_path, skip_load),
        Commands::Run => commands::run(config_path),
        Commands::Plan { phase } => commands::plan(config_path, phase.as_deref()),
        Commands::Status { format } => commands::status(config_path, &format),
        Commands::Tables { name } => commands::tables(name.as_deref()),
        Commands::Query { sql } => commands::query(config_path, &sql),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
