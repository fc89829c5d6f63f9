use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::path::Path;

/// One table of a schema version: the creation SQL plus the column names the
/// created table is expected to have, used to validate databases opened from
/// disk.
pub struct Table {
    pub name: &'static str,
    pub schema: &'static str,
    pub columns: &'static [&'static str],
    pub indices: &'static [&'static str],
}

pub struct VersionedSchema {
    pub version: u32,
    pub tables: &'static [Table],
}

impl VersionedSchema {
    fn create(&self, conn: &Connection, base_version: u32) -> Result<()> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        for table in self.tables {
            conn.execute(table.schema, [])
                .with_context(|| format!("Failed to create table {}", table.name))?;
            for index in table.indices {
                conn.execute(index, [])?;
            }
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", base_version + self.version),
            [],
        )?;
        Ok(())
    }

    fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", table.name))?;
            let columns: Vec<String> = stmt
                .query_map([], |row| row.get(1))?
                .collect::<Result<_, _>>()?;

            if columns != table.columns {
                bail!(
                    "Schema validation failed for table {}: found columns {:?}, expected {:?}",
                    table.name,
                    columns,
                    table.columns
                );
            }
        }
        Ok(())
    }
}

/// Opens a SQLite database, creating the latest schema when the file does
/// not exist yet, or validating the stored version when it does.
pub fn open_database<T: AsRef<Path>>(
    db_path: T,
    schemas: &[VersionedSchema],
    base_version: u32,
) -> Result<Connection> {
    let latest = schemas
        .last()
        .context("At least one schema version is required")?;

    if !db_path.as_ref().exists() {
        let conn = Connection::open(db_path)?;
        latest.create(&conn, base_version)?;
        return Ok(conn);
    }

    let conn = Connection::open_with_flags(
        db_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
            | rusqlite::OpenFlags::SQLITE_OPEN_URI
            | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    let stored_version: u32 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .context("Failed to read database version")?;

    match stored_version.checked_sub(base_version) {
        Some(version) if version == latest.version => latest.validate(&conn)?,
        _ => bail!(
            "Unknown database version {} (expected {})",
            stored_version,
            base_version + latest.version
        ),
    }

    Ok(conn)
}
