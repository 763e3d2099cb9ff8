//! Configuration for the warehouse pipeline.
//!
//! Config file resolution order:
//! 1. Explicit path passed to resolve_config_path()
//! 2. DWH_CONFIG environment variable
//! 3. ./dwh.toml in the working directory
//! 4. Platform config directory (e.g. ~/.config/dwh/dwh.toml)

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable naming the config file.
pub const DWH_CONFIG_VAR: &str = "DWH_CONFIG";

/// Config file name looked up in the working and platform config directories.
pub const CONFIG_FILE_NAME: &str = "dwh.toml";

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Warehouse connection.
    pub cluster: ClusterConfig,

    /// Raw JSON sources.
    pub s3: SourceConfig,

    /// Role the warehouse assumes to read the sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iam_role: Option<IamRoleConfig>,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Warehouse connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Database file path, ":memory:", or a MotherDuck "md:<name>" URI.
    pub database: String,

    /// MotherDuck access token (only used with "md:" databases).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Worker threads the warehouse may use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,

    /// Memory limit, e.g. "4GB".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
}

/// Locations of the raw JSON data.
///
/// Paths may be local files, globs, or object storage URLs (s3://, gs://, https://).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Event log records (newline-delimited JSON).
    pub log_data: String,

    /// jsonpaths file mapping event log fields onto events_staging columns.
    pub log_jsonpath: String,

    /// Song catalog records.
    pub song_data: String,

    /// Object storage region.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IamRoleConfig {
    pub arn: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub commit: CommitMode,

    /// Empty each staging table right before it is bulk loaded.
    #[serde(default)]
    pub truncate_staging: bool,
}

/// When statements of a phase become durable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitMode {
    /// Every statement commits on its own. A failure leaves earlier statements applied.
    #[default]
    Statement,
    /// A phase runs in one transaction and is rolled back on the first failure.
    Phase,
}

impl fmt::Display for CommitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitMode::Statement => write!(f, "statement"),
            CommitMode::Phase => write!(f, "phase"),
        }
    }
}

impl FromStr for CommitMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "statement" => Ok(CommitMode::Statement),
            "phase" => Ok(CommitMode::Phase),
            _ => Err(Error::Config(format!(
                "Invalid commit mode '{}': expected 'statement' or 'phase'",
                s
            ))),
        }
    }
}

const REMOTE_SCHEMES: &[&str] = &[
    "s3://", "s3a://", "s3n://", "gs://", "gcs://", "r2://", "http://", "https://",
];

/// Whether a source location must be fetched through httpfs.
pub fn is_remote(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    REMOTE_SCHEMES.iter().any(|scheme| lower.starts_with(scheme))
}

impl Config {
    /// Create a config with the given database and sources, defaults elsewhere.
    pub fn new(database: impl Into<String>, sources: SourceConfig) -> Self {
        Self {
            cluster: ClusterConfig {
                database: database.into(),
                token: None,
                threads: None,
                memory_limit: None,
            },
            s3: sources,
            iam_role: None,
            pipeline: PipelineConfig::default(),
        }
    }

    /// Template written by `dwh init`, pointing at the public song play dataset.
    pub fn template() -> Self {
        let mut config = Self::new(
            "sparkify.duckdb",
            SourceConfig {
                log_data: "s3://udacity-dend/log_data/*/*/*.json".to_string(),
                log_jsonpath: "s3://udacity-dend/log_json_path.json".to_string(),
                song_data: "s3://udacity-dend/song_data/*/*/*/*.json".to_string(),
                region: Some("us-west-2".to_string()),
            },
        );
        config.iam_role = Some(IamRoleConfig {
            arn: "arn:aws:iam::123456789012:role/dwhRole".to_string(),
        });
        config
    }

    /// Load config from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config as TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject configs the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.database.trim().is_empty() {
            return Err(Error::Config("cluster.database must not be empty".to_string()));
        }

        let sources = [
            ("s3.log_data", &self.s3.log_data),
            ("s3.log_jsonpath", &self.s3.log_jsonpath),
            ("s3.song_data", &self.s3.song_data),
        ];
        for (key, value) in sources {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{} must not be empty", key)));
            }
        }

        if let Some(role) = &self.iam_role {
            if !role.arn.starts_with("arn:") {
                return Err(Error::Config(format!(
                    "iam_role.arn must be an ARN (arn:...), got '{}'",
                    role.arn
                )));
            }
        }

        if self.cluster.threads == Some(0) {
            return Err(Error::Config("cluster.threads must be at least 1".to_string()));
        }

        Ok(())
    }

    /// Whether any source lives in object storage.
    pub fn has_remote_sources(&self) -> bool {
        is_remote(&self.s3.log_data)
            || is_remote(&self.s3.log_jsonpath)
            || is_remote(&self.s3.song_data)
    }

    /// Whether the database is hosted on MotherDuck.
    pub fn is_motherduck(&self) -> bool {
        self.cluster.database.starts_with("md:")
    }

    /// Connection target handed to DuckDB, token included for MotherDuck.
    pub fn connection_target(&self) -> String {
        match (&self.cluster.token, self.is_motherduck()) {
            (Some(token), true) => {
                let sep = if self.cluster.database.contains('?') { '&' } else { '?' };
                format!("{}{}motherduck_token={}", self.cluster.database, sep, token)
            }
            _ => self.cluster.database.clone(),
        }
    }

    /// Connection target safe to print or log.
    pub fn display_target(&self) -> &str {
        &self.cluster.database
    }
}

/// Resolve the config file path using the standard resolution order.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    // 1. Explicit path
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    // 2. Environment variable
    if let Ok(path) = std::env::var(DWH_CONFIG_VAR) {
        return Ok(PathBuf::from(path));
    }

    // 3. Working directory
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Ok(local);
    }

    // 4. Platform config directory
    if let Some(proj_dirs) = ProjectDirs::from("", "", "dwh") {
        return Ok(proj_dirs.config_dir().join(CONFIG_FILE_NAME));
    }

    Err(Error::Config(
        "Could not determine config location; pass --config or set DWH_CONFIG".to_string(),
    ))
}
