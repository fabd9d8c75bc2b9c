//! Observation storage
//!
//! Observations live in one SQLite table, `epimetric`, with one row per issue of each
//! observation. Connections are short lived: each request or metadata task opens its own.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{named_params, Connection, Row};
use time::OffsetDateTime;

use crate::error::EpidataError;
use crate::models::Observation;
use crate::query_builder::Query;
use crate::types::{Missing, TimeType};

/// Observation table name
pub const TABLE: &str = "epimetric";

/// Fields read into an [Observation]
pub const OBSERVATION_FIELDS: [&str; 15] = [
    "source",
    "signal",
    "time_type",
    "time_value",
    "geo_type",
    "geo_value",
    "issue",
    "lag",
    "value",
    "stderr",
    "sample_size",
    "direction",
    "missing_value",
    "missing_stderr",
    "missing_sample_size",
];

/// How long a connection waits for a locked database
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS epimetric (
    source TEXT NOT NULL,
    signal TEXT NOT NULL,
    time_type TEXT NOT NULL,
    time_value INTEGER NOT NULL,
    geo_type TEXT NOT NULL,
    geo_value TEXT NOT NULL,
    issue INTEGER NOT NULL,
    lag INTEGER NOT NULL,
    value REAL,
    stderr REAL,
    sample_size REAL,
    missing_value INTEGER NOT NULL DEFAULT 0,
    missing_stderr INTEGER NOT NULL DEFAULT 0,
    missing_sample_size INTEGER NOT NULL DEFAULT 0,
    direction INTEGER,
    value_updated_timestamp INTEGER NOT NULL,
    UNIQUE (source, signal, time_type, time_value, geo_type, geo_value, issue)
);
CREATE INDEX IF NOT EXISTS epimetric_by_signal
    ON epimetric (source, signal, time_type, geo_type, geo_value, time_value, issue);
CREATE INDEX IF NOT EXISTS epimetric_by_geo
    ON epimetric (geo_type, geo_value, time_type, time_value);
";

const UPSERT: &str = "
INSERT INTO epimetric (
    source, signal, time_type, time_value, geo_type, geo_value, issue, lag,
    value, stderr, sample_size, missing_value, missing_stderr, missing_sample_size,
    direction, value_updated_timestamp
) VALUES (
    :source, :signal, :time_type, :time_value, :geo_type, :geo_value, :issue, :lag,
    :value, :stderr, :sample_size, :missing_value, :missing_stderr, :missing_sample_size,
    :direction, :value_updated_timestamp
)
ON CONFLICT (source, signal, time_type, time_value, geo_type, geo_value, issue) DO UPDATE SET
    lag = excluded.lag,
    value = excluded.value,
    stderr = excluded.stderr,
    sample_size = excluded.sample_size,
    missing_value = excluded.missing_value,
    missing_stderr = excluded.missing_stderr,
    missing_sample_size = excluded.missing_sample_size,
    direction = excluded.direction,
    value_updated_timestamp = excluded.value_updated_timestamp
";

impl FromSql for TimeType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|_| FromSqlError::InvalidType)
    }
}

impl ToSql for TimeType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for Missing {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = value.as_i64()?;
        u8::try_from(code)
            .ok()
            .and_then(|code| Missing::try_from(code).ok())
            .ok_or(FromSqlError::OutOfRange(code))
    }
}

impl ToSql for Missing {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(i64::from(self.code())))
    }
}

/// Handle to the observation database
#[derive(Clone, Debug)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> Self {
        Database {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a new connection.
    pub fn connect(&self) -> Result<Connection, EpidataError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Create the schema if it does not exist.
    pub fn initialize(&self) -> Result<(), EpidataError> {
        let conn = self.connect()?;
        create_schema(&conn)?;
        tracing::info!(path = %self.path.display(), "database initialised");
        Ok(())
    }
}

pub fn create_schema(conn: &Connection) -> Result<(), EpidataError> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Insert or update observations.
///
/// Each row is normalised before it is stored: an issue earlier than the time value (or no
/// issue) is clamped to the time value, the lag is recomputed from the issue, and missing codes
/// are made consistent with the values.
///
/// Returns the number of rows written.
pub fn insert_observations(
    conn: &mut Connection,
    rows: &[Observation],
) -> Result<usize, EpidataError> {
    let timestamp = OffsetDateTime::now_utc().unix_timestamp();
    let tx = conn.transaction()?;
    let mut written = 0;
    {
        let mut stmt = tx.prepare(UPSERT)?;
        for row in rows {
            let issue = row.issue().unwrap_or(row.time_value).max(row.time_value);
            let lag = row.time_type.lag(issue, row.time_value).ok_or(
                EpidataError::InvalidTimeValue {
                    time_type: row.time_type,
                    value: row.time_value,
                },
            )?;
            written += stmt.execute(named_params! {
                ":source": row.source,
                ":signal": row.signal,
                ":time_type": row.time_type,
                ":time_value": row.time_value,
                ":geo_type": row.geo_type,
                ":geo_value": row.geo_value,
                ":issue": issue,
                ":lag": lag,
                ":value": row.value,
                ":stderr": row.stderr,
                ":sample_size": row.sample_size,
                ":missing_value": row.missing_value.coerce(row.value),
                ":missing_stderr": row.missing_stderr.coerce(row.stderr),
                ":missing_sample_size": row.missing_sample_size.coerce(row.sample_size),
                ":direction": row.direction,
                ":value_updated_timestamp": timestamp,
            })?;
        }
    }
    tx.commit()?;
    Ok(written)
}

fn row_to_observation(row: &Row<'_>) -> rusqlite::Result<Observation> {
    let source: String = row.get("source")?;
    let signal: String = row.get("signal")?;
    let geo_type: String = row.get("geo_type")?;
    let geo_value: String = row.get("geo_value")?;
    let mut observation = Observation::new(
        &source,
        &signal,
        row.get("time_type")?,
        row.get("time_value")?,
        &geo_type,
        &geo_value,
    )
    .with_issue(row.get("issue")?);
    observation.value = row.get("value")?;
    observation.stderr = row.get("stderr")?;
    observation.sample_size = row.get("sample_size")?;
    observation.direction = row.get("direction")?;
    observation.missing_value = row.get("missing_value")?;
    observation.missing_stderr = row.get("missing_stderr")?;
    observation.missing_sample_size = row.get("missing_sample_size")?;
    Ok(observation)
}

/// Execute a query selecting [OBSERVATION_FIELDS].
pub fn fetch_observations(
    conn: &Connection,
    query: &Query,
) -> Result<Vec<Observation>, EpidataError> {
    let mut stmt = conn.prepare(&query.sql)?;
    let params = query.params.as_named();
    let rows = stmt.query_map(params.as_slice(), row_to_observation)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}
