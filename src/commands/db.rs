use crate::commands::settings::state_dir;
use crate::models::server::CanonicalRecord;
use crate::models::snapshot::{EcosystemSnapshot, StoredSnapshot};
use rusqlite::{params, Connection, OptionalExtension, Result};

const DB_SCHEMA_VERSION: i64 = 2;

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;",
    )?;

    let mut version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        apply_migration_1(conn)?;
        version = 1;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version < 2 {
        apply_migration_2(conn)?;
        version = 2;
        conn.pragma_update(None, "user_version", version)?;
    }

    if version > DB_SCHEMA_VERSION {
        log::warn!("state.db schema v{version} is newer than v{DB_SCHEMA_VERSION}; continuing");
    }

    Ok(())
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS servers (
            server_id TEXT PRIMARY KEY,
            name TEXT,
            source_kind TEXT NOT NULL,
            health_score INTEGER NOT NULL DEFAULT 0,
            activity_level TEXT NOT NULL DEFAULT 'Unknown',
            popularity_tier TEXT NOT NULL DEFAULT 'Emerging',
            repo_stars INTEGER,
            total_downloads_week INTEGER NOT NULL DEFAULT 0,
            record_json TEXT NOT NULL DEFAULT '{}',
            updated_at INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS ecosystem_snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            snapshot_date TEXT NOT NULL,
            total_servers INTEGER NOT NULL,
            active_percentage REAL NOT NULL DEFAULT 0,
            total_stars INTEGER NOT NULL DEFAULT 0,
            total_downloads_week INTEGER NOT NULL DEFAULT 0,
            snapshot_json TEXT NOT NULL DEFAULT '{}'
        );
        ",
    )
}

fn apply_migration_2(conn: &Connection) -> Result<()> {
    add_column_if_missing(conn, "ecosystem_snapshots", "run_id TEXT NOT NULL DEFAULT ''")?;
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_servers_health ON servers(health_score);
        CREATE INDEX IF NOT EXISTS idx_ecosystem_snapshots_timestamp ON ecosystem_snapshots(timestamp);
        ",
    )
}

fn add_column_if_missing(conn: &Connection, table: &str, column_def: &str) -> Result<()> {
    let column_name = column_def
        .split_whitespace()
        .next()
        .unwrap_or(column_def)
        .to_string();

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .filter_map(|res| res.ok())
        .any(|name| name == column_name);

    if !exists {
        conn.execute(&format!("ALTER TABLE {table} ADD COLUMN {column_def}"), [])?;
    }

    Ok(())
}

/// SQLite integers are signed; counts past `i64::MAX` are stored as `i64::MAX`.
fn sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub fn get_db_connection(workspace_path: &str) -> crate::errors::PipelineResult<Connection> {
    let dir = state_dir(workspace_path);
    std::fs::create_dir_all(&dir)?;
    let conn = Connection::open(dir.join("state.db"))?;
    initialize_schema(&conn)?;
    Ok(conn)
}

/// Replaces the stored canonical table with `records` in one transaction.
pub fn replace_servers(conn: &Connection, records: &[CanonicalRecord]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM servers", [])?;
    let now = chrono::Utc::now().timestamp();

    for record in records {
        let record_json = serde_json::to_string(record).unwrap_or_else(|e| {
            log::warn!("Storing server {} without its record blob: {e}", record.server_id);
            "{}".to_string()
        });
        tx.execute(
            "
            INSERT INTO servers (
                server_id,
                name,
                source_kind,
                health_score,
                activity_level,
                popularity_tier,
                repo_stars,
                total_downloads_week,
                record_json,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
            params![
                record.server_id,
                record.name,
                record.source_kind.as_str(),
                i64::from(record.health_score),
                record.activity_level.as_str(),
                record.popularity_tier.as_str(),
                record.repo_stars.map(sql_int),
                sql_int(record.total_downloads_week),
                record_json,
                now,
            ],
        )?;
    }

    tx.commit()
}

pub fn load_servers(conn: &Connection) -> Result<Vec<CanonicalRecord>> {
    let mut stmt = conn.prepare("SELECT server_id, record_json FROM servers ORDER BY server_id ASC")?;
    let records = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .filter_map(|r| r.ok())
        .filter_map(|(server_id, json)| match serde_json::from_str::<CanonicalRecord>(&json) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Skipping unreadable stored server {server_id}: {e}");
                None
            }
        })
        .collect();

    Ok(records)
}

pub fn load_server(conn: &Connection, server_id: &str) -> Result<Option<CanonicalRecord>> {
    let json: Option<String> = conn
        .query_row(
            "SELECT record_json FROM servers WHERE server_id = ?1",
            params![server_id],
            |row| row.get(0),
        )
        .optional()?;

    Ok(json.and_then(|j| match serde_json::from_str(&j) {
        Ok(record) => Some(record),
        Err(e) => {
            log::warn!("Stored server {server_id} is unreadable: {e}");
            None
        }
    }))
}

pub fn insert_ecosystem_snapshot(conn: &Connection, snapshot: &EcosystemSnapshot) -> Result<StoredSnapshot> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();
    let snapshot_json = serde_json::to_string(snapshot).unwrap_or_else(|e| {
        log::warn!("Storing snapshot {run_id} without its JSON blob: {e}");
        "{}".to_string()
    });

    conn.execute(
        "INSERT INTO ecosystem_snapshots (run_id, timestamp, snapshot_date, total_servers, active_percentage, total_stars, total_downloads_week, snapshot_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run_id,
            now,
            snapshot.snapshot_date.to_string(),
            sql_int(snapshot.total_servers as u64),
            snapshot.active_percentage,
            sql_int(snapshot.total_stars),
            sql_int(snapshot.total_downloads_week),
            snapshot_json,
        ],
    )?;

    Ok(StoredSnapshot {
        id: conn.last_insert_rowid(),
        run_id,
        timestamp: now,
        snapshot: snapshot.clone(),
    })
}

/// Snapshot history, oldest first.
pub fn load_ecosystem_snapshots(conn: &Connection) -> Result<Vec<StoredSnapshot>> {
    let mut stmt = conn.prepare(
        "SELECT id, run_id, timestamp, snapshot_json FROM ecosystem_snapshots ORDER BY timestamp ASC, id ASC",
    )?;

    let snapshots = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .filter_map(|r| r.ok())
        .filter_map(|(id, run_id, timestamp, json)| {
            serde_json::from_str::<EcosystemSnapshot>(&json)
                .ok()
                .map(|snapshot| StoredSnapshot {
                    id,
                    run_id,
                    timestamp,
                    snapshot,
                })
        })
        .collect();

    Ok(snapshots)
}

pub fn get_server(workspace_path: &str, server_id: &str) -> crate::errors::PipelineResult<Option<CanonicalRecord>> {
    let conn = get_db_connection(workspace_path)?;
    Ok(load_server(&conn, server_id)?)
}

pub fn get_ecosystem_snapshots(workspace_path: &str) -> crate::errors::PipelineResult<Vec<StoredSnapshot>> {
    let conn = get_db_connection(workspace_path)?;
    Ok(load_ecosystem_snapshots(&conn)?)
}
