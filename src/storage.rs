use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Local bookkeeping database. Holds viewer identities only; feed data is
/// never persisted here.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct Viewer {
    pub id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("storage: enable foreign keys")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn upsert_viewer(&self, mut viewer: Viewer) -> Result<()> {
        if viewer.id.is_empty() {
            bail!("storage: viewer id required");
        }
        let now = Utc::now();
        if viewer.created_at.timestamp() == 0 {
            viewer.created_at = now;
        }
        viewer.updated_at = now;

        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO viewers (id, display_name, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(id) DO UPDATE SET
  display_name = excluded.display_name,
  updated_at = excluded.updated_at
"#,
            params![
                viewer.id,
                viewer.display_name,
                viewer.created_at.timestamp(),
                viewer.updated_at.timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn list_viewers(&self) -> Result<Vec<Viewer>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, display_name, created_at, updated_at FROM viewers ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([], viewer_from_row)?;
        let mut viewers = Vec::new();
        for viewer in rows {
            viewers.push(viewer?);
        }
        Ok(viewers)
    }

    pub fn get_viewer(&self, id: &str) -> Result<Option<Viewer>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, display_name, created_at, updated_at FROM viewers WHERE id = ?1",
            params![id],
            viewer_from_row,
        )
        .optional()
        .context("storage: load viewer")
    }

    pub fn set_active_viewer(&self, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO active_viewer (slot, viewer_id) VALUES (0, ?1)
ON CONFLICT(slot) DO UPDATE SET viewer_id = excluded.viewer_id
"#,
            params![id],
        )?;
        Ok(())
    }

    pub fn active_viewer(&self) -> Result<Option<Viewer>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT v.id, v.display_name, v.created_at, v.updated_at
FROM active_viewer a JOIN viewers v ON v.id = a.viewer_id
WHERE a.slot = 0
"#,
            [],
            viewer_from_row,
        )
        .optional()
        .context("storage: load active viewer")
    }

    pub fn clear_active_viewer(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM active_viewer WHERE slot = 0", [])?;
        Ok(())
    }
}

fn viewer_from_row(row: &Row<'_>) -> rusqlite::Result<Viewer> {
    Ok(Viewer {
        id: row.get(0)?,
        display_name: row.get(1)?,
        created_at: timestamp(row.get(2)?),
        updated_at: timestamp(row.get(3)?),
    })
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS viewers (
  id TEXT PRIMARY KEY,
  display_name TEXT NOT NULL DEFAULT '',
  created_at INTEGER NOT NULL,
  updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS active_viewer (
  slot INTEGER PRIMARY KEY CHECK (slot = 0),
  viewer_id TEXT NOT NULL REFERENCES viewers(id) ON DELETE CASCADE
);
"#,
    )
    .context("storage: run migrations")
}

fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("reelix").join("reelix.db"))
}
