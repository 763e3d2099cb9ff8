//! Table definitions for the song play star schema.
//!
//! Two staging tables hold raw JSON as loaded. One fact table and four
//! dimension tables are derived from them. There are no foreign keys, so
//! the order of [`TABLES`] only matters for readability of the DDL log.

use std::fmt;

/// What a table is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableRole {
    Staging,
    Fact,
    Dimension,
}

impl fmt::Display for TableRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableRole::Staging => write!(f, "staging"),
            TableRole::Fact => write!(f, "fact"),
            TableRole::Dimension => write!(f, "dimension"),
        }
    }
}

/// Column data type as declared in DDL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Varchar,
    SmallInt,
    Integer,
    BigInt,
    Double,
    Timestamp,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Varchar => "VARCHAR",
            ColumnType::SmallInt => "SMALLINT",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }
}

/// Physical distribution hint carried over from the cluster layout.
///
/// DuckDB runs on a single node, so this is informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    Key(&'static str),
    All,
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distribution::Key(col) => write!(f, "key({})", col),
            Distribution::All => write!(f, "all"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    pub data_type: ColumnType,
    pub not_null: bool,
    /// Filled from a sequence starting at 0.
    pub identity: bool,
}

const fn col(name: &'static str, data_type: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        data_type,
        not_null: false,
        identity: false,
    }
}

const fn required(name: &'static str, data_type: ColumnType) -> ColumnDef {
    ColumnDef {
        name,
        data_type,
        not_null: true,
        identity: false,
    }
}

const fn identity(name: &'static str) -> ColumnDef {
    ColumnDef {
        name,
        data_type: ColumnType::Integer,
        not_null: true,
        identity: true,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    pub name: &'static str,
    pub role: TableRole,
    pub columns: &'static [ColumnDef],
    pub sort_key: Option<&'static str>,
    pub distribution: Distribution,
}

use ColumnType::*;

pub const EVENTS_STAGING: TableDef = TableDef {
    name: "events_staging",
    role: TableRole::Staging,
    columns: &[
        col("artist", Varchar),
        col("auth", Varchar),
        col("firstName", Varchar),
        col("gender", Varchar),
        col("itemInSession", Integer),
        col("lastName", Varchar),
        col("length", Double),
        col("level", Varchar),
        col("location", Varchar),
        col("method", Varchar),
        col("page", Varchar),
        col("registration", BigInt),
        col("sessionId", Integer),
        col("song", Varchar),
        col("status", Integer),
        col("ts", BigInt),
        col("userAgent", Varchar),
        col("userId", Varchar),
    ],
    sort_key: None,
    distribution: Distribution::Key("artist"),
};

pub const SONGS_STAGING: TableDef = TableDef {
    name: "songs_staging",
    role: TableRole::Staging,
    columns: &[
        col("num_songs", Integer),
        col("artist_id", Varchar),
        col("artist_latitude", Double),
        col("artist_longitude", Double),
        col("artist_location", Varchar),
        col("artist_name", Varchar),
        col("song_id", Varchar),
        col("title", Varchar),
        col("duration", Double),
        col("year", Integer),
    ],
    sort_key: None,
    distribution: Distribution::Key("artist_name"),
};

pub const SONGPLAYS: TableDef = TableDef {
    name: "songplays",
    role: TableRole::Fact,
    columns: &[
        identity("songplays_id"),
        col("start_time", Timestamp),
        required("user_id", Integer),
        col("level", Varchar),
        required("song_id", Varchar),
        required("artist_id", Varchar),
        required("session_id", Integer),
        col("location", Varchar),
        col("user_agent", Varchar),
    ],
    sort_key: Some("start_time"),
    distribution: Distribution::Key("song_id"),
};

pub const USERS: TableDef = TableDef {
    name: "users",
    role: TableRole::Dimension,
    columns: &[
        required("user_id", Integer),
        col("first_name", Varchar),
        col("last_name", Varchar),
        col("gender", Varchar),
        col("level", Varchar),
    ],
    sort_key: Some("first_name"),
    distribution: Distribution::All,
};

pub const SONGS: TableDef = TableDef {
    name: "songs",
    role: TableRole::Dimension,
    columns: &[
        required("song_id", Varchar),
        col("artist_id", Varchar),
        col("title", Varchar),
        col("year", Integer),
        col("duration", Double),
    ],
    sort_key: Some("title"),
    distribution: Distribution::Key("song_id"),
};

pub const ARTISTS: TableDef = TableDef {
    name: "artists",
    role: TableRole::Dimension,
    columns: &[
        required("artist_id", Varchar),
        col("name", Varchar),
        col("location", Varchar),
        col("latitude", Double),
        col("longitude", Double),
    ],
    sort_key: Some("name"),
    distribution: Distribution::All,
};

pub const TIME: TableDef = TableDef {
    name: "time",
    role: TableRole::Dimension,
    columns: &[
        col("start_time", Timestamp),
        col("hour", SmallInt),
        col("day", SmallInt),
        col("month", SmallInt),
        col("year", SmallInt),
        col("weekday", SmallInt),
    ],
    sort_key: Some("start_time"),
    distribution: Distribution::All,
};

/// Every table the pipeline owns, in drop/create order.
pub static TABLES: [TableDef; 7] = [
    EVENTS_STAGING,
    SONGS_STAGING,
    SONGPLAYS,
    USERS,
    SONGS,
    ARTISTS,
    TIME,
];

/// Quote an identifier for DuckDB.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for DuckDB.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl TableDef {
    /// Look up a table by name.
    pub fn find(name: &str) -> Option<&'static TableDef> {
        TABLES.iter().find(|t| t.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Comma-separated, quoted column list.
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_ident(c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn quoted_name(&self) -> String {
        quote_ident(self.name)
    }

    /// Name of the sequence backing the identity column, if there is one.
    pub fn identity_sequence(&self) -> Option<String> {
        self.columns
            .iter()
            .find(|c| c.identity)
            .map(|c| format!("{}_{}_seq", self.name, c.name))
    }

    pub fn drop_table_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quoted_name())
    }

    /// Dropped after the table, since the column default depends on it.
    pub fn drop_sequence_sql(&self) -> Option<String> {
        self.identity_sequence()
            .map(|seq| format!("DROP SEQUENCE IF EXISTS {}", quote_ident(&seq)))
    }

    pub fn create_sequence_sql(&self) -> Option<String> {
        self.identity_sequence().map(|seq| {
            format!(
                "CREATE SEQUENCE IF NOT EXISTS {} START WITH 0 MINVALUE 0",
                quote_ident(&seq)
            )
        })
    }

    pub fn create_table_sql(&self) -> String {
        let sequence = self.identity_sequence();
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("    {:<20} {}", quote_ident(c.name), c.data_type.sql());
                if c.not_null {
                    def.push_str(" NOT NULL");
                }
                if let (true, Some(seq)) = (c.identity, sequence.as_deref()) {
                    def.push_str(&format!(" DEFAULT nextval({})", quote_literal(seq)));
                }
                def
            })
            .collect();

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
            self.quoted_name(),
            columns.join(",\n")
        )
    }

    /// Sort keys become plain secondary indexes.
    pub fn create_index_sql(&self) -> Option<String> {
        self.sort_key.map(|key| {
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&format!("{}_{}_idx", self.name, key)),
                self.quoted_name(),
                quote_ident(key)
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seven_tables_in_order() {
        let names: Vec<_> = TABLES.iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["events_staging", "songs_staging", "songplays", "users", "songs", "artists", "time"]
        );
    }

    #[test]
    fn test_roles() {
        assert_eq!(TABLES.iter().filter(|t| t.role == TableRole::Staging).count(), 2);
        assert_eq!(TABLES.iter().filter(|t| t.role == TableRole::Fact).count(), 1);
        assert_eq!(TABLES.iter().filter(|t| t.role == TableRole::Dimension).count(), 4);
    }

    #[test]
    fn test_layout_keys_name_real_columns() {
        for table in TABLES.iter() {
            if let Some(key) = table.sort_key {
                assert!(table.column(key).is_some(), "{} sort key {}", table.name, key);
            }
            if let Distribution::Key(key) = table.distribution {
                assert!(table.column(key).is_some(), "{} dist key {}", table.name, key);
            }
        }
    }

    #[test]
    fn test_songplays_ddl() {
        let sql = SONGPLAYS.create_table_sql();
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"songplays\" ("));
        assert!(sql.contains("DEFAULT nextval('songplays_songplays_id_seq')"));
        assert!(sql.contains("\"user_id\""));
        for required in ["user_id", "song_id", "artist_id", "session_id"] {
            assert!(SONGPLAYS.column(required).unwrap().not_null, "{}", required);
        }
        assert_eq!(
            SONGPLAYS.create_sequence_sql().unwrap(),
            "CREATE SEQUENCE IF NOT EXISTS \"songplays_songplays_id_seq\" START WITH 0 MINVALUE 0"
        );
    }

    #[test]
    fn test_only_songplays_has_identity() {
        let with_identity: Vec<_> = TABLES
            .iter()
            .filter(|t| t.identity_sequence().is_some())
            .map(|t| t.name)
            .collect();
        assert_eq!(with_identity, vec!["songplays"]);
        assert!(USERS.drop_sequence_sql().is_none());
    }

    #[test]
    fn test_time_table_is_quoted() {
        assert_eq!(TIME.drop_table_sql(), "DROP TABLE IF EXISTS \"time\"");
        assert_eq!(
            TIME.create_index_sql().unwrap(),
            "CREATE INDEX IF NOT EXISTS \"time_start_time_idx\" ON \"time\" (\"start_time\")"
        );
    }

    #[test]
    fn test_staging_has_no_index() {
        assert!(EVENTS_STAGING.create_index_sql().is_none());
        assert!(SONGS_STAGING.create_index_sql().is_none());
    }

    #[test]
    fn test_quote_helpers() {
        assert_eq!(quote_ident("firstName"), "\"firstName\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }

    #[test]
    fn test_find() {
        assert_eq!(TableDef::find("users").unwrap().columns.len(), 5);
        assert!(TableDef::find("plays").is_none());
    }
}
