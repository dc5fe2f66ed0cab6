// Local durable memory
// SQLite behind a mutex. Every write commits before returning, so a read
// issued after a write always sees it.

use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection};

use super::migrations;
use super::models::{HistoryEntry, MemoryProfile, Role};

/// Owns the SQLite connection for profile and history
pub struct MemoryStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl MemoryStore {
    /// Open (creating if needed) the store at the given path
    pub fn open(db_path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&db_path).context("Failed to open database")?;

        conn.execute("PRAGMA foreign_keys = ON", [])
            .context("Failed to enable foreign keys")?;

        migrations::run_migrations(&conn).context("Failed to run database migrations")?;

        log::info!("Memory store initialized at: {:?}", db_path);

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Execute a function with access to the database connection
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to lock database connection: {}", e))?;
        f(&conn)
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Full profile, consistent with the last committed write
    pub fn read_profile(&self) -> Result<MemoryProfile> {
        self.with_connection(read_profile_impl)
    }

    /// Upsert one profile entry; durable once this returns
    pub fn write_key(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.with_connection(|conn| write_key_impl(conn, key, value))
    }

    /// Empty the profile
    pub fn clear_profile(&self) -> Result<()> {
        self.with_connection(clear_profile_impl)
    }

    /// Append a timestamped transcript line; no cap at write time
    pub fn append_history(&self, role: Role, text: &str) -> Result<()> {
        self.with_connection(|conn| append_history_impl(conn, role, text))
    }

    /// Last `limit` entries in ascending timestamp order
    pub fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.with_connection(|conn| recent_history_impl(conn, limit))
    }

    /// Wipe the transcript
    pub fn clear_history(&self) -> Result<()> {
        self.with_connection(clear_history_impl)
    }
}

fn read_profile_impl(conn: &Connection) -> Result<MemoryProfile> {
    let mut stmt = conn
        .prepare("SELECT key, value FROM profile")
        .context("Failed to prepare read_profile query")?;

    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .context("Failed to query profile")?;

    let mut profile = MemoryProfile::new();
    for row in rows {
        let (key, raw) = row.context("Failed to read profile row")?;
        // Values are stored as JSON text; anything unparsable reads back as a plain string
        let value = serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw));
        profile.insert(key, value);
    }

    Ok(profile)
}

fn write_key_impl(conn: &Connection, key: &str, value: &serde_json::Value) -> Result<()> {
    let raw = serde_json::to_string(value).context("Failed to serialize profile value")?;

    conn.execute(
        r#"
        INSERT INTO profile (key, value, updated_at)
        VALUES (?1, ?2, datetime('now'))
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = datetime('now')
        "#,
        params![key, raw],
    )
    .context("Failed to write profile key")?;

    Ok(())
}

fn clear_profile_impl(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM profile", [])
        .context("Failed to clear profile")?;
    Ok(())
}

fn append_history_impl(conn: &Connection, role: Role, text: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO history (role, text, timestamp) VALUES (?1, ?2, ?3)",
        params![role.as_str(), text, Utc::now().timestamp_millis()],
    )
    .context("Failed to append history")?;
    Ok(())
}

fn recent_history_impl(conn: &Connection, limit: usize) -> Result<Vec<HistoryEntry>> {
    // Fetch newest-first by rowid (insertion order breaks timestamp ties),
    // then flip to ascending for the caller
    let mut stmt = conn
        .prepare("SELECT role, text, timestamp FROM history ORDER BY id DESC LIMIT ?1")
        .context("Failed to prepare recent_history query")?;

    let rows = stmt
        .query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })
        .context("Failed to query history")?;

    let mut entries = Vec::new();
    for row in rows {
        let (role, text, millis) = row.context("Failed to read history row")?;
        let timestamp = Utc.timestamp_millis_opt(millis).single().unwrap_or_default();
        entries.push(HistoryEntry {
            role: Role::parse(&role),
            text,
            timestamp,
        });
    }

    entries.reverse();
    Ok(entries)
}

fn clear_history_impl(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM history", [])
        .context("Failed to clear history")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    fn create_test_store() -> (TempDir, MemoryStore) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let store = MemoryStore::open(db_path).unwrap();
        (dir, store)
    }

    #[test]
    fn test_store_creation() {
        let (_dir, store) = create_test_store();
        assert!(store.db_path().exists());

        store
            .with_connection(|conn| {
                let count: i32 =
                    conn.query_row("SELECT COUNT(*) FROM profile", [], |row| row.get(0))?;
                assert_eq!(count, 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_empty_profile_reads_empty() {
        let (_dir, store) = create_test_store();
        assert!(store.read_profile().unwrap().is_empty());
    }

    #[test]
    fn test_last_write_wins() {
        let (_dir, store) = create_test_store();

        store.write_key("name", &json!("A")).unwrap();
        store.write_key("name", &json!("B")).unwrap();

        let profile = store.read_profile().unwrap();
        assert_eq!(profile["name"], json!("B"));
        assert_eq!(profile.len(), 1);
    }

    #[test]
    fn test_structured_values_round_trip() {
        let (_dir, store) = create_test_store();

        let value = json!({"city": "Lisbon", "pets": ["cat", "dog"], "age": 34});
        store.write_key("facts", &value).unwrap();

        let profile = store.read_profile().unwrap();
        assert_eq!(profile["facts"], value);
    }

    #[test]
    fn test_clear_profile() {
        let (_dir, store) = create_test_store();

        store.write_key("a", &json!(1)).unwrap();
        store.write_key("b", &json!(2)).unwrap();
        store.clear_profile().unwrap();

        assert!(store.read_profile().unwrap().is_empty());
    }

    #[test]
    fn test_history_window_ascending() {
        let (_dir, store) = create_test_store();

        for i in 0..10 {
            let role = if i % 2 == 0 { Role::User } else { Role::Model };
            store.append_history(role, &format!("msg{}", i)).unwrap();
        }

        let window = store.recent_history(4).unwrap();
        assert_eq!(window.len(), 4);
        let texts: Vec<&str> = window.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["msg6", "msg7", "msg8", "msg9"]);

        for pair in window.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn test_history_window_larger_than_rows() {
        let (_dir, store) = create_test_store();

        store.append_history(Role::User, "only one").unwrap();
        let window = store.recent_history(50).unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].role, Role::User);
    }

    #[test]
    fn test_clear_history() {
        let (_dir, store) = create_test_store();

        store.append_history(Role::User, "hello").unwrap();
        store.clear_history().unwrap();
        assert!(store.recent_history(10).unwrap().is_empty());
    }
}
