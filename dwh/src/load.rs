//! Bulk load of raw JSON into the staging tables.
//!
//! The warehouse reads the sources itself (`read_json` / `read_json_objects`),
//! so no row data passes through this process. Two field-mapping styles are
//! supported:
//!
//! - **jsonpaths**: a file `{"jsonpaths": ["$['artist']", "$.auth", ...]}`
//!   whose expressions map positionally onto the target columns.
//! - **auto**: JSON keys are matched to column names; absent keys load as
//!   NULL and unknown keys are ignored.

use std::fmt;

use duckdb::types::Value;
use tracing::info;

use crate::pipeline::{execute_phase, Phase, PhaseReport, Statement};
use crate::schema::{quote_literal, ColumnType, TableDef, EVENTS_STAGING, SONGS_STAGING};
use crate::{Config, Error, Result, Warehouse};

/// How source fields are mapped onto staging columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonFormat {
    /// Location of a jsonpaths file.
    JsonPaths(String),
    Auto,
}

/// One bulk copy: source location into a staging table.
#[derive(Debug, Clone)]
pub struct CopyCommand {
    pub table: &'static TableDef,
    pub source: String,
    pub format: JsonFormat,
}

/// The two copies the pipeline runs, events first.
pub fn copy_commands(config: &Config) -> Vec<CopyCommand> {
    vec![
        CopyCommand {
            table: &EVENTS_STAGING,
            source: config.s3.log_data.clone(),
            format: JsonFormat::JsonPaths(config.s3.log_jsonpath.clone()),
        },
        CopyCommand {
            table: &SONGS_STAGING,
            source: config.s3.song_data.clone(),
            format: JsonFormat::Auto,
        },
    ]
}

impl CopyCommand {
    /// Render the INSERT ... SELECT that performs this copy.
    ///
    /// For jsonpaths copies the mapping file is read through the warehouse.
    pub fn render(&self, warehouse: &Warehouse) -> Result<String> {
        match &self.format {
            JsonFormat::JsonPaths(location) => {
                let expressions = read_json_paths(warehouse, self.table.name, location)?;
                self.render_with_paths(&expressions)
            }
            JsonFormat::Auto => Ok(self.render_auto()),
        }
    }

    /// Render a jsonpaths copy from already-read path expressions.
    pub fn render_with_paths(&self, expressions: &[String]) -> Result<String> {
        if expressions.len() != self.table.columns.len() {
            return Err(Error::Load {
                table: self.table.name.to_string(),
                message: format!(
                    "jsonpaths file has {} expressions but {} has {} columns",
                    expressions.len(),
                    self.table.name,
                    self.table.columns.len()
                ),
            });
        }

        let mut projections = Vec::with_capacity(expressions.len());
        for (column, expr) in self.table.columns.iter().zip(expressions) {
            let path = parse_json_path(expr).map_err(|message| Error::Load {
                table: self.table.name.to_string(),
                message: format!("invalid jsonpath '{}': {}", expr, message),
            })?;
            let extracted = format!("json ->> {}", quote_literal(&path.to_string()));
            projections.push(cast_text(&extracted, column.data_type));
        }

        Ok(format!(
            "INSERT INTO {} ({})\nSELECT\n    {}\nFROM read_json_objects({}, format = 'auto')",
            self.table.quoted_name(),
            self.table.column_list(),
            projections.join(",\n    "),
            quote_literal(&self.source)
        ))
    }

    fn render_auto(&self) -> String {
        let column_types: Vec<String> = self
            .table
            .columns
            .iter()
            .map(|c| format!("{}: {}", quote_literal(c.name), quote_literal(c.data_type.sql())))
            .collect();

        format!(
            "INSERT INTO {} ({})\nSELECT {}\nFROM read_json({}, format = 'auto', columns = {{{}}})",
            self.table.quoted_name(),
            self.table.column_list(),
            self.table.column_list(),
            quote_literal(&self.source),
            column_types.join(", ")
        )
    }
}

/// Cast text pulled out of a JSON document to the column type.
///
/// BIGINT goes through DOUBLE so exponent notation (1.5e12) loads.
fn cast_text(expr: &str, data_type: ColumnType) -> String {
    match data_type {
        ColumnType::BigInt => format!("CAST(CAST({} AS DOUBLE) AS BIGINT)", expr),
        other => format!("CAST({} AS {})", expr, other.sql()),
    }
}

/// Read the expression list out of a jsonpaths file.
pub fn read_json_paths(warehouse: &Warehouse, table: &str, location: &str) -> Result<Vec<String>> {
    let sql = format!(
        "SELECT jsonpaths FROM read_json({}, format = 'auto', columns = {{'jsonpaths': 'VARCHAR[]'}})",
        quote_literal(location)
    );
    let load_err = |source: duckdb::Error| Error::LoadSql {
        table: table.to_string(),
        source,
    };

    let mut stmt = warehouse.connection().prepare(&sql).map_err(load_err)?;
    let documents: Vec<Value> = stmt
        .query_map([], |row| row.get::<_, Value>(0))
        .map_err(load_err)?
        .collect::<std::result::Result<_, _>>()
        .map_err(load_err)?;

    let malformed = |message: String| Error::Load {
        table: table.to_string(),
        message: format!("jsonpaths file {}: {}", location, message),
    };

    match documents.as_slice() {
        [Value::List(items)] => items
            .iter()
            .map(|item| match item {
                Value::Text(s) => Ok(s.clone()),
                other => Err(malformed(format!("expected string expression, got {:?}", other))),
            })
            .collect(),
        [Value::Null] => Err(malformed("missing \"jsonpaths\" array".to_string())),
        [other] => Err(malformed(format!("\"jsonpaths\" must be an array, got {:?}", other))),
        [] => Err(malformed("file is empty".to_string())),
        docs => Err(malformed(format!("expected one document, found {}", docs.len()))),
    }
}

/// Statements for the load phase, rendered against the live warehouse.
pub fn load_statements(warehouse: &Warehouse) -> Result<Vec<Statement>> {
    let config = warehouse.config();
    let mut statements = Vec::new();
    for copy in copy_commands(config) {
        if config.pipeline.truncate_staging {
            statements.push(Statement::new(
                copy.table.name,
                format!("truncate {}", copy.table.name),
                format!("DELETE FROM {}", copy.table.quoted_name()),
            ));
        }
        statements.push(Statement::new(
            copy.table.name,
            format!("copy {} from {}", copy.table.name, copy.source),
            copy.render(warehouse)?,
        ));
    }
    Ok(statements)
}

/// Bulk load both staging tables.
pub fn load_staging_tables(warehouse: &mut Warehouse) -> Result<PhaseReport> {
    warehouse.ensure_source_access()?;
    let statements = load_statements(warehouse)?;
    let report = execute_phase(warehouse, Phase::LoadStaging, &statements)?;
    info!(
        events = report.rows_for(EVENTS_STAGING.name),
        songs = report.rows_for(SONGS_STAGING.name),
        "staging loaded"
    );
    Ok(report)
}

/// One step of a JSON path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed jsonpaths expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    pub segments: Vec<PathSegment>,
}

/// Renders in DuckDB path syntax, keys always quoted: `$."a"[0]`.
impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for segment in &self.segments {
            match segment {
                PathSegment::Key(key) => write!(f, ".\"{}\"", key)?,
                PathSegment::Index(i) => write!(f, "[{}]", i)?,
            }
        }
        Ok(())
    }
}

/// Parse a jsonpaths expression: `$.a.b`, `$['a']["b"]`, `$.a[0]`.
pub fn parse_json_path(expr: &str) -> std::result::Result<JsonPath, String> {
    let mut chars = expr.trim().chars().peekable();
    if chars.next() != Some('$') {
        return Err("must start with '$'".to_string());
    }

    let mut segments = Vec::new();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                let mut key = String::new();
                while let Some(&next) = chars.peek() {
                    if next == '.' || next == '[' {
                        break;
                    }
                    key.push(next);
                    chars.next();
                }
                if key.is_empty() {
                    return Err("empty key after '.'".to_string());
                }
                segments.push(PathSegment::Key(key));
            }
            '[' => match chars.peek() {
                Some(&quote) if quote == '\'' || quote == '"' => {
                    chars.next();
                    let mut key = String::new();
                    loop {
                        match chars.next() {
                            Some(c) if c == quote => break,
                            Some(c) => key.push(c),
                            None => return Err("unterminated quoted key".to_string()),
                        }
                    }
                    if chars.next() != Some(']') {
                        return Err("expected ']' after quoted key".to_string());
                    }
                    segments.push(PathSegment::Key(key));
                }
                _ => {
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(c) if c.is_ascii_digit() => digits.push(c),
                            Some(c) => return Err(format!("unexpected '{}' in index", c)),
                            None => return Err("unterminated index".to_string()),
                        }
                    }
                    let index = digits
                        .parse()
                        .map_err(|_| "empty array index".to_string())?;
                    segments.push(PathSegment::Index(index));
                }
            },
            other => return Err(format!("unexpected '{}'", other)),
        }
    }

    if segments.is_empty() {
        return Err("path selects the whole document".to_string());
    }
    // Keys are rendered inside double quotes, which DuckDB paths cannot escape.
    let quoted = segments
        .iter()
        .any(|s| matches!(s, PathSegment::Key(key) if key.contains('"')));
    if quoted {
        return Err("keys must not contain '\"'".to_string());
    }
    Ok(JsonPath { segments })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommitMode;
    use crate::create_tables::reset_schema;
    use crate::warehouse::tests::memory_config;
    use std::path::Path;
    use tempfile::TempDir;

    const EVENT_PATHS: [&str; 18] = [
        "$['artist']", "$['auth']", "$['firstName']", "$['gender']", "$['itemInSession']",
        "$['lastName']", "$['length']", "$['level']", "$['location']", "$['method']",
        "$['page']", "$['registration']", "$['sessionId']", "$['song']", "$['status']",
        "$['ts']", "$['userAgent']", "$['userId']",
    ];

    fn write_fixtures(dir: &Path) -> Config {
        std::fs::create_dir_all(dir.join("log_data")).unwrap();
        std::fs::create_dir_all(dir.join("song_data/A/B")).unwrap();

        let paths: Vec<String> = EVENT_PATHS.iter().map(|p| format!("\"{}\"", p)).collect();
        std::fs::write(
            dir.join("log_json_path.json"),
            format!("{{\"jsonpaths\": [{}]}}", paths.join(", ")),
        )
        .unwrap();

        std::fs::write(
            dir.join("log_data/2018-11-14-events.json"),
            concat!(
                r#"{"artist":"Queen","auth":"Logged In","firstName":"Jayden","gender":"M","itemInSession":3,"lastName":"Fox","length":354.3,"level":"free","location":"New Orleans-Metairie, LA","method":"PUT","page":"NextSong","registration":1.541033612796e+12,"sessionId":522,"song":"Bohemian Rhapsody","status":200,"ts":1542242481796,"userAgent":"Mozilla/5.0","userId":"10"}"#,
                "\n",
                r#"{"artist":null,"auth":"Logged In","firstName":"Jayden","gender":"M","itemInSession":4,"lastName":"Fox","length":null,"level":"free","location":"New Orleans-Metairie, LA","method":"GET","page":"Home","registration":1.541033612796e+12,"sessionId":522,"song":null,"status":200,"ts":1542242490000,"userAgent":"Mozilla/5.0","userId":"10"}"#,
                "\n"
            ),
        )
        .unwrap();

        std::fs::write(
            dir.join("song_data/A/B/TRAAAAW128F429D538.json"),
            r#"{"num_songs": 1, "artist_id": "AR558FS1187FB45658", "artist_latitude": null, "artist_longitude": null, "artist_location": "", "artist_name": "Queen", "song_id": "SOBONKR12A58A7A7E0", "title": "Bohemian Rhapsody", "duration": 354.3, "year": 1975, "extra": "ignored"}"#,
        )
        .unwrap();

        Config::new(
            ":memory:",
            crate::config::SourceConfig {
                log_data: dir.join("log_data/*.json").display().to_string(),
                log_jsonpath: dir.join("log_json_path.json").display().to_string(),
                song_data: dir.join("song_data/*/*/*.json").display().to_string(),
                region: None,
            },
        )
    }

    #[test]
    fn test_parse_bracket_and_dot_paths() {
        assert_eq!(
            parse_json_path("$['artist']").unwrap().segments,
            vec![PathSegment::Key("artist".to_string())]
        );
        assert_eq!(
            parse_json_path("$.song.title").unwrap().segments,
            vec![
                PathSegment::Key("song".to_string()),
                PathSegment::Key("title".to_string())
            ]
        );
        assert_eq!(
            parse_json_path("$[\"tags\"][2]").unwrap().segments,
            vec![PathSegment::Key("tags".to_string()), PathSegment::Index(2)]
        );
    }

    #[test]
    fn test_parse_rejects_bad_paths() {
        assert!(parse_json_path("artist").is_err());
        assert!(parse_json_path("$").is_err());
        assert!(parse_json_path("$.").is_err());
        assert!(parse_json_path("$['artist'").is_err());
        assert!(parse_json_path("$[x]").is_err());
        assert!(parse_json_path("$[]").is_err());
    }

    #[test]
    fn test_parse_rejects_double_quote_in_key() {
        assert!(parse_json_path(r#"$['say "hi"']"#).is_err());
        assert!(parse_json_path(r#"$.a"b"#).is_err());
        assert_eq!(
            parse_json_path(r#"$["it's"]"#).unwrap().to_string(),
            r#"$."it's""#
        );
    }

    #[test]
    fn test_render_with_paths_rejects_double_quote_in_key() {
        let copy = &copy_commands(&Config::template())[0];
        let mut paths: Vec<String> = EVENT_PATHS.iter().map(|s| s.to_string()).collect();
        paths[0] = r#"$['art"ist']"#.to_string();
        assert!(matches!(
            copy.render_with_paths(&paths),
            Err(Error::Load { .. })
        ));
    }

    #[test]
    fn test_path_renders_duckdb_syntax() {
        let path = parse_json_path("$['user Agent'][0].x").unwrap();
        assert_eq!(path.to_string(), "$.\"user Agent\"[0].\"x\"");
    }

    #[test]
    fn test_copy_commands_from_config() {
        let config = Config::template();
        let copies = copy_commands(&config);
        assert_eq!(copies.len(), 2);
        assert_eq!(copies[0].table.name, "events_staging");
        assert_eq!(
            copies[0].format,
            JsonFormat::JsonPaths("s3://udacity-dend/log_json_path.json".to_string())
        );
        assert_eq!(copies[1].table.name, "songs_staging");
        assert_eq!(copies[1].format, JsonFormat::Auto);
    }

    #[test]
    fn test_render_with_paths_casts_types() {
        let copy = &copy_commands(&Config::template())[0];
        let paths: Vec<String> = EVENT_PATHS.iter().map(|s| s.to_string()).collect();
        let sql = copy.render_with_paths(&paths).unwrap();

        assert!(sql.starts_with("INSERT INTO \"events_staging\" (\"artist\""));
        assert!(sql.contains("CAST(json ->> '$.\"itemInSession\"' AS INTEGER)"));
        assert!(sql.contains("CAST(CAST(json ->> '$.\"ts\"' AS DOUBLE) AS BIGINT)"));
        assert!(sql.ends_with("FROM read_json_objects('s3://udacity-dend/log_data/*/*/*.json', format = 'auto')"));
    }

    #[test]
    fn test_render_with_paths_count_mismatch() {
        let copy = &copy_commands(&Config::template())[0];
        let result = copy.render_with_paths(&["$.artist".to_string()]);
        match result {
            Err(Error::Load { table, message }) => {
                assert_eq!(table, "events_staging");
                assert!(message.contains("1 expressions"));
            }
            other => panic!("expected load error, got {:?}", other),
        }
    }

    #[test]
    fn test_render_auto() {
        let copy = &copy_commands(&Config::template())[1];
        let sql = copy.render_auto();
        assert!(sql.contains("columns = {'num_songs': 'INTEGER', 'artist_id': 'VARCHAR'"));
        assert!(sql.contains("read_json('s3://udacity-dend/song_data/*/*/*/*.json', format = 'auto'"));
    }

    #[test]
    fn test_read_json_paths_from_file() {
        let tmp = TempDir::new().unwrap();
        let config = write_fixtures(tmp.path());
        let wh = Warehouse::open(&config).unwrap();

        let paths = read_json_paths(&wh, "events_staging", &config.s3.log_jsonpath).unwrap();
        assert_eq!(paths.len(), 18);
        assert_eq!(paths[0], "$['artist']");
        assert_eq!(paths[17], "$['userId']");
    }

    #[test]
    fn test_read_json_paths_without_array() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("paths.json");
        std::fs::write(&path, r#"{"paths": ["$.a"]}"#).unwrap();
        let wh = Warehouse::open(&memory_config()).unwrap();

        let result = read_json_paths(&wh, "events_staging", &path.display().to_string());
        assert!(matches!(result, Err(Error::Load { .. })));
    }

    #[test]
    fn test_load_staging_tables() {
        let tmp = TempDir::new().unwrap();
        let config = write_fixtures(tmp.path());
        let mut wh = Warehouse::open(&config).unwrap();
        reset_schema(&wh).unwrap();

        let report = load_staging_tables(&mut wh).unwrap();
        assert_eq!(report.rows_for("events_staging"), 2);
        assert_eq!(report.rows_for("songs_staging"), 1);

        let (ts, user_id, registration): (i64, String, i64) = wh
            .connection()
            .query_row(
                "SELECT ts, \"userId\", registration FROM events_staging WHERE page = 'NextSong'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(ts, 1542242481796);
        assert_eq!(user_id, "10");
        assert_eq!(registration, 1541033612796);

        let (name, lat): (String, Option<f64>) = wh
            .connection()
            .query_row("SELECT artist_name, artist_latitude FROM songs_staging", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(name, "Queen");
        assert_eq!(lat, None);
    }

    #[test]
    fn test_load_appends_unless_truncating() {
        let tmp = TempDir::new().unwrap();
        let mut config = write_fixtures(tmp.path());
        let mut wh = Warehouse::open(&config).unwrap();
        reset_schema(&wh).unwrap();

        load_staging_tables(&mut wh).unwrap();
        load_staging_tables(&mut wh).unwrap();
        assert_eq!(wh.row_count("events_staging").unwrap(), 4);
        drop(wh);

        config.pipeline.truncate_staging = true;
        let mut wh = Warehouse::open(&config).unwrap();
        reset_schema(&wh).unwrap();
        load_staging_tables(&mut wh).unwrap();
        let report = load_staging_tables(&mut wh).unwrap();
        assert_eq!(wh.row_count("events_staging").unwrap(), 2);
        assert_eq!(report.steps.len(), 4);
    }

    #[test]
    fn test_missing_source_aborts_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = write_fixtures(tmp.path());
        config.s3.song_data = tmp.path().join("nowhere/*.json").display().to_string();
        let mut wh = Warehouse::open(&config).unwrap();
        reset_schema(&wh).unwrap();

        match load_staging_tables(&mut wh) {
            Err(Error::LoadSql { table, .. }) => assert_eq!(table, "songs_staging"),
            other => panic!("expected load error, got {:?}", other.map(|r| r.steps.len())),
        }
        // Statement commits: the events copy already landed.
        assert_eq!(wh.row_count("events_staging").unwrap(), 2);
    }

    #[test]
    fn test_missing_source_rolls_back_in_phase_mode() {
        let tmp = TempDir::new().unwrap();
        let mut config = write_fixtures(tmp.path());
        config.s3.song_data = tmp.path().join("nowhere/*.json").display().to_string();
        config.pipeline.commit = CommitMode::Phase;
        let mut wh = Warehouse::open(&config).unwrap();
        reset_schema(&wh).unwrap();

        assert!(load_staging_tables(&mut wh).is_err());
        assert_eq!(wh.row_count("events_staging").unwrap(), 0);
    }

    #[test]
    fn test_malformed_json_aborts_load() {
        let tmp = TempDir::new().unwrap();
        let config = write_fixtures(tmp.path());
        std::fs::write(tmp.path().join("log_data/broken.json"), "{\"artist\": ").unwrap();
        let mut wh = Warehouse::open(&config).unwrap();
        reset_schema(&wh).unwrap();

        assert!(matches!(
            load_staging_tables(&mut wh),
            Err(Error::LoadSql { .. })
        ));
    }
}
