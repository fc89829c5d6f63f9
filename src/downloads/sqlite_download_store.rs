use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::models::DownloadRecord;
use super::store::{DownloadCounterStore, DownloadRecordStore};
use crate::sqlite_persistence::{open_database, Table, VersionedSchema};

const BASE_DB_VERSION: u32 = 417;

const DOWNLOAD_RECORD_TABLE_V_0: Table = Table {
    name: "download_record",
    schema: "CREATE TABLE download_record (token TEXT NOT NULL UNIQUE, source_path TEXT NOT NULL, login_required INTEGER NOT NULL, created INTEGER DEFAULT (cast(strftime('%s','now') as int)), updated INTEGER DEFAULT (cast(strftime('%s','now') as int)), PRIMARY KEY (token));",
    columns: &["token", "source_path", "login_required", "created", "updated"],
    indices: &[],
};
const DOWNLOAD_COUNT_TABLE_V_0: Table = Table {
    name: "download_count",
    schema: "CREATE TABLE download_count (name TEXT NOT NULL UNIQUE, count INTEGER NOT NULL DEFAULT 0, updated INTEGER DEFAULT (cast(strftime('%s','now') as int)), PRIMARY KEY (name));",
    columns: &["name", "count", "updated"],
    indices: &[],
};

const VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[DOWNLOAD_RECORD_TABLE_V_0, DOWNLOAD_COUNT_TABLE_V_0],
}];

pub struct SqliteDownloadStore {
    conn: Mutex<Connection>,
}

impl SqliteDownloadStore {
    pub fn new<T: AsRef<Path>>(db_path: T) -> Result<Self> {
        let conn = open_database(db_path, VERSIONED_SCHEMAS, BASE_DB_VERSION)?;
        Ok(SqliteDownloadStore {
            conn: Mutex::new(conn),
        })
    }
}

impl DownloadRecordStore for SqliteDownloadStore {
    fn get_record(&self, token: &str) -> Result<Option<DownloadRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT token, source_path, login_required FROM download_record WHERE token = ?1",
        )?;
        let record = stmt
            .query_row(params![token], |row| {
                Ok(DownloadRecord {
                    token: row.get(0)?,
                    source_path: row.get(1)?,
                    login_required: row.get::<_, i64>(2)? != 0,
                })
            })
            .optional()?;
        Ok(record)
    }

    fn upsert_record(&self, record: &DownloadRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO download_record (token, source_path, login_required)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(token) DO UPDATE SET
                source_path = ?2,
                login_required = ?3,
                updated = cast(strftime('%s','now') as int)",
            params![record.token, record.source_path, record.login_required as i64],
        )
        .with_context(|| format!("Failed to upsert download record {}", record.token))?;
        Ok(())
    }
}

impl DownloadCounterStore for SqliteDownloadStore {
    fn increment_and_persist(&self, name: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO download_count (name, count) VALUES (?1, 1)
             ON CONFLICT(name) DO UPDATE SET
                count = count + 1,
                updated = cast(strftime('%s','now') as int)",
            params![name],
        )
        .with_context(|| format!("Failed to increment download count for {}", name))?;

        let count: i64 = conn.query_row(
            "SELECT count FROM download_count WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn get_count(&self, name: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: Option<i64> = conn
            .query_row(
                "SELECT count FROM download_count WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0) as u64)
    }

    fn get_all_counts(&self) -> Result<Vec<(String, u64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT name, count FROM download_count ORDER BY name ASC")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }
}
