//! Set-based transforms from staging into the star schema.
//!
//! Only `NextSong` events describe a song being played; every other page
//! (Home, Login, PageView, ...) is ignored for songplays, users and time.
//! `start_time` is the epoch plus whole seconds of `ts`; milliseconds are
//! truncated by integer division.
//!
//! Weekday follows DuckDB's `dow`: Sunday = 0 through Saturday = 6.

use tracing::info;

use crate::pipeline::{execute_phase, Phase, PhaseReport, Statement};
use crate::schema::{ARTISTS, SONGPLAYS, SONGS, TIME, USERS};
use crate::{Result, Warehouse};

/// Page value marking a song play in the event log.
pub const NEXT_SONG_PAGE: &str = "NextSong";

// Events whose artist has no exact match in the catalog are dropped by the join.
const SONGPLAY_INSERT: &str = r#"
INSERT INTO "songplays" (
    "start_time", "user_id", "level", "song_id",
    "artist_id", "session_id", "location", "user_agent"
)
SELECT DISTINCT
    TIMESTAMP '1970-01-01 00:00:00' + to_seconds(es."ts" // 1000) AS start_time,
    CAST(es."userId" AS INTEGER) AS user_id,
    es."level" AS level,
    ss."song_id" AS song_id,
    ss."artist_id" AS artist_id,
    es."sessionId" AS session_id,
    es."location" AS location,
    es."userAgent" AS user_agent
FROM "events_staging" AS es
JOIN "songs_staging" AS ss ON es."artist" = ss."artist_name"
WHERE es."page" = 'NextSong'
"#;

const USER_INSERT: &str = r#"
INSERT INTO "users" ("user_id", "first_name", "last_name", "gender", "level")
SELECT DISTINCT
    CAST("userId" AS INTEGER) AS user_id,
    "firstName" AS first_name,
    "lastName" AS last_name,
    "gender",
    "level"
FROM "events_staging"
WHERE "page" = 'NextSong'
"#;

const SONG_INSERT: &str = r#"
INSERT INTO "songs" ("song_id", "artist_id", "title", "year", "duration")
SELECT DISTINCT
    "song_id",
    "artist_id",
    "title",
    "year",
    "duration"
FROM "songs_staging"
"#;

const ARTIST_INSERT: &str = r#"
INSERT INTO "artists" ("artist_id", "name", "location", "latitude", "longitude")
SELECT DISTINCT
    "artist_id",
    "artist_name" AS name,
    "artist_location" AS location,
    "artist_latitude" AS latitude,
    "artist_longitude" AS longitude
FROM "songs_staging"
"#;

const TIME_INSERT: &str = r#"
INSERT INTO "time" ("start_time", "hour", "day", "month", "year", "weekday")
SELECT DISTINCT
    start_time,
    extract(hour FROM start_time) AS hour,
    extract(day FROM start_time) AS day,
    extract(month FROM start_time) AS month,
    extract(year FROM start_time) AS year,
    extract(dow FROM start_time) AS weekday
FROM (
    SELECT TIMESTAMP '1970-01-01 00:00:00' + to_seconds("ts" // 1000) AS start_time
    FROM "events_staging"
    WHERE "page" = 'NextSong'
) AS plays
"#;

/// The five inserts, in execution order.
pub fn insert_statements() -> Vec<Statement> {
    [
        (SONGPLAYS.name, SONGPLAY_INSERT),
        (USERS.name, USER_INSERT),
        (SONGS.name, SONG_INSERT),
        (ARTISTS.name, ARTIST_INSERT),
        (TIME.name, TIME_INSERT),
    ]
    .into_iter()
    .map(|(table, sql)| Statement::new(table, format!("insert {}", table), sql.trim()))
    .collect()
}

/// Populate the fact and dimension tables from staging.
pub fn insert_tables(warehouse: &Warehouse) -> Result<PhaseReport> {
    let report = execute_phase(warehouse, Phase::InsertTables, &insert_statements())?;
    info!(
        songplays = report.rows_for(SONGPLAYS.name),
        users = report.rows_for(USERS.name),
        "star schema populated"
    );
    Ok(report)
}
