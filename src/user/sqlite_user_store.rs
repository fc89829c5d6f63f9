use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::auth::{
    AuthToken, AuthTokenValue, GateHasher, UserAuthCredentials, UsernamePasswordCredentials,
};
use super::user_store::{UserAuthCredentialsStore, UserAuthTokenStore, UserStore};
use crate::sqlite_persistence::{open_database, Table, VersionedSchema};

const BASE_DB_VERSION: u32 = 293;

const USER_TABLE_V_0: Table = Table {
    name: "user",
    schema: "CREATE TABLE user (id INTEGER UNIQUE, handle TEXT NOT NULL UNIQUE, created INTEGER DEFAULT (cast(strftime('%s','now') as int)), PRIMARY KEY (id));",
    columns: &["id", "handle", "created"],
    indices: &["CREATE INDEX user_handle_index ON user (handle);"],
};
const AUTH_TOKEN_TABLE_V_0: Table = Table {
    name: "auth_token",
    schema: "CREATE TABLE auth_token (user_id INTEGER NOT NULL REFERENCES user (id) ON DELETE CASCADE, value TEXT NOT NULL UNIQUE, created INTEGER NOT NULL, last_used INTEGER);",
    columns: &["user_id", "value", "created", "last_used"],
    indices: &["CREATE INDEX auth_token_value_index ON auth_token (value);"],
};
const USER_PASSWORD_CREDENTIALS_TABLE_V_0: Table = Table {
    name: "user_password_credentials",
    schema: "CREATE TABLE user_password_credentials (user_id INTEGER NOT NULL UNIQUE REFERENCES user (id) ON DELETE CASCADE, salt TEXT NOT NULL, hash TEXT NOT NULL, hasher TEXT NOT NULL, created INTEGER NOT NULL, last_tried INTEGER, last_used INTEGER);",
    columns: &["user_id", "salt", "hash", "hasher", "created", "last_tried", "last_used"],
    indices: &[],
};

const VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        USER_TABLE_V_0,
        AUTH_TOKEN_TABLE_V_0,
        USER_PASSWORD_CREDENTIALS_TABLE_V_0,
    ],
}];

fn to_unix_secs(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}

fn from_unix_secs(secs: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64)
}

pub struct SqliteUserStore {
    conn: Mutex<Connection>,
}

impl SqliteUserStore {
    pub fn new<T: AsRef<Path>>(db_path: T) -> Result<Self> {
        let conn = open_database(db_path, VERSIONED_SCHEMAS, BASE_DB_VERSION)?;
        Ok(SqliteUserStore {
            conn: Mutex::new(conn),
        })
    }
}

impl UserStore for SqliteUserStore {
    fn create_user(&self, user_handle: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO user (handle) VALUES (?1)",
            params![user_handle],
        )
        .with_context(|| format!("Failed to create user {}", user_handle))?;
        Ok(conn.last_insert_rowid() as usize)
    }

    fn get_user_id(&self, user_handle: &str) -> Result<Option<usize>> {
        let conn = self.conn.lock().unwrap();
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM user WHERE handle = ?1",
                params![user_handle],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(|id| id as usize))
    }

    fn get_user_handle(&self, user_id: usize) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let handle: Option<String> = conn
            .query_row(
                "SELECT handle FROM user WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(handle)
    }

    fn get_all_user_handles(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT handle FROM user ORDER BY id ASC")?;
        let handles = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(handles)
    }
}

impl UserAuthCredentialsStore for SqliteUserStore {
    fn get_user_auth_credentials(&self, user_handle: &str) -> Result<Option<UserAuthCredentials>> {
        let conn = self.conn.lock().unwrap();

        let user_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM user WHERE handle = ?1",
                params![user_handle],
                |row| row.get(0),
            )
            .optional()?;
        let user_id = match user_id {
            None => return Ok(None),
            Some(id) => id as usize,
        };

        let username_password = conn
            .query_row(
                "SELECT salt, hash, hasher, created, last_tried, last_used
                 FROM user_password_credentials WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, Option<i64>>(5)?,
                    ))
                },
            )
            .optional()?
            .map(|(salt, hash, hasher, created, last_tried, last_used)| {
                Ok::<_, anyhow::Error>(UsernamePasswordCredentials {
                    user_id,
                    salt,
                    hash,
                    hasher: GateHasher::from_str(&hasher)?,
                    created: from_unix_secs(created),
                    last_tried: last_tried.map(from_unix_secs),
                    last_used: last_used.map(from_unix_secs),
                })
            })
            .transpose()?;

        Ok(Some(UserAuthCredentials {
            user_id,
            username_password,
        }))
    }

    fn update_user_auth_credentials(&self, credentials: UserAuthCredentials) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        match credentials.username_password {
            Some(password) => {
                conn.execute(
                    "INSERT INTO user_password_credentials (user_id, salt, hash, hasher, created, last_tried, last_used)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                     ON CONFLICT(user_id) DO UPDATE SET
                        salt = ?2, hash = ?3, hasher = ?4, created = ?5, last_tried = ?6, last_used = ?7",
                    params![
                        credentials.user_id,
                        password.salt,
                        password.hash,
                        password.hasher.to_string(),
                        to_unix_secs(password.created),
                        password.last_tried.map(to_unix_secs),
                        password.last_used.map(to_unix_secs),
                    ],
                )?;
            }
            None => {
                conn.execute(
                    "DELETE FROM user_password_credentials WHERE user_id = ?1",
                    params![credentials.user_id],
                )?;
            }
        }
        Ok(())
    }

    fn delete_user_auth_credentials(&self, user_id: usize) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM user_password_credentials WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(())
    }
}

impl UserAuthTokenStore for SqliteUserStore {
    fn get_user_auth_token(&self, token: &AuthTokenValue) -> Result<Option<AuthToken>> {
        let conn = self.conn.lock().unwrap();
        let auth_token = conn
            .query_row(
                "SELECT user_id, created, last_used FROM auth_token WHERE value = ?1",
                params![token.0],
                |row| {
                    Ok(AuthToken {
                        user_id: row.get::<_, i64>(0)? as usize,
                        created: from_unix_secs(row.get(1)?),
                        last_used: row.get::<_, Option<i64>>(2)?.map(from_unix_secs),
                        value: token.clone(),
                    })
                },
            )
            .optional()?;
        Ok(auth_token)
    }

    fn delete_user_auth_token(&self, token: &AuthTokenValue) -> Result<Option<AuthToken>> {
        let existing = self.get_user_auth_token(token)?;
        if existing.is_some() {
            let conn = self.conn.lock().unwrap();
            conn.execute("DELETE FROM auth_token WHERE value = ?1", params![token.0])?;
        }
        Ok(existing)
    }

    fn update_user_auth_token_last_used_timestamp(&self, token: &AuthTokenValue) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE auth_token SET last_used = cast(strftime('%s','now') as int) WHERE value = ?1",
            params![token.0],
        )?;
        Ok(())
    }

    fn add_user_auth_token(&self, token: AuthToken) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO auth_token (user_id, value, created, last_used) VALUES (?1, ?2, ?3, ?4)",
            params![
                token.user_id,
                token.value.0,
                to_unix_secs(token.created),
                token.last_used.map(to_unix_secs),
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use tempfile::TempDir;

    fn create_tmp_store() -> (SqliteUserStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteUserStore::new(temp_dir.path().join("user.db")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn creates_users() {
        let (store, _temp_dir) = create_tmp_store();

        let user_id = store.create_user("test_user").unwrap();
        assert_eq!(user_id, 1);
        assert_eq!(store.get_user_id("test_user").unwrap(), Some(1));
        assert_eq!(
            store.get_user_handle(user_id).unwrap(),
            Some("test_user".to_owned())
        );

        assert!(store.create_user("test_user").is_err());
    }

    #[test]
    fn lists_user_handles() {
        let (store, _temp_dir) = create_tmp_store();
        store.create_user("a").unwrap();
        store.create_user("b").unwrap();
        assert_eq!(
            store.get_all_user_handles().unwrap(),
            vec!["a".to_owned(), "b".to_owned()]
        );
    }

    #[test]
    fn round_trips_password_credentials() {
        let (store, _temp_dir) = create_tmp_store();
        let user_id = store.create_user("test_user").unwrap();

        let loaded = store.get_user_auth_credentials("test_user").unwrap().unwrap();
        assert!(loaded.username_password.is_none());

        let hasher = GateHasher::Argon2;
        let salt = hasher.generate_b64_salt();
        let hash = hasher.hash(b"pw", &salt).unwrap();
        store
            .update_user_auth_credentials(UserAuthCredentials {
                user_id,
                username_password: Some(UsernamePasswordCredentials {
                    user_id,
                    salt: salt.clone(),
                    hash: hash.clone(),
                    hasher,
                    created: SystemTime::now(),
                    last_tried: None,
                    last_used: None,
                }),
            })
            .unwrap();

        let loaded = store.get_user_auth_credentials("test_user").unwrap().unwrap();
        let password = loaded.username_password.unwrap();
        assert_eq!(password.salt, salt);
        assert_eq!(password.hash, hash);

        store.delete_user_auth_credentials(user_id).unwrap();
        let loaded = store.get_user_auth_credentials("test_user").unwrap().unwrap();
        assert!(loaded.username_password.is_none());
    }

    #[test]
    fn missing_user_has_no_credentials() {
        let (store, _temp_dir) = create_tmp_store();
        assert!(store.get_user_auth_credentials("nobody").unwrap().is_none());
    }

    #[test]
    fn round_trips_auth_tokens() {
        let (store, _temp_dir) = create_tmp_store();
        let user_id = store.create_user("test_user").unwrap();

        let token = AuthToken {
            user_id,
            created: SystemTime::now(),
            last_used: None,
            value: AuthTokenValue::generate(),
        };
        store.add_user_auth_token(token.clone()).unwrap();

        let loaded = store.get_user_auth_token(&token.value).unwrap().unwrap();
        assert_eq!(loaded.user_id, user_id);
        assert!(loaded.last_used.is_none());

        store
            .update_user_auth_token_last_used_timestamp(&token.value)
            .unwrap();
        let loaded = store.get_user_auth_token(&token.value).unwrap().unwrap();
        assert!(loaded.last_used.is_some());

        let deleted = store.delete_user_auth_token(&token.value).unwrap();
        assert!(deleted.is_some());
        assert!(store.get_user_auth_token(&token.value).unwrap().is_none());
    }

    #[test]
    fn cannot_add_token_for_missing_user() {
        let (store, _temp_dir) = create_tmp_store();
        let token = AuthToken {
            user_id: 99,
            created: SystemTime::now(),
            last_used: None,
            value: AuthTokenValue::generate(),
        };
        assert!(store.add_user_auth_token(token).is_err());
    }
}
