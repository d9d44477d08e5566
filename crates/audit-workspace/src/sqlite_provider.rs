//! SQLite-backed provider for hosts without directory handles.

use async_trait::async_trait;
use audit_types::{
    AccessMode, Attachment, AuditRecord, AuditSummary, ProviderKind, StorageError, StorageProvider,
    StorageStats,
};
use rusqlite::{params, OptionalExtension};
use std::path::{Path, PathBuf};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audits (
    id TEXT PRIMARY KEY,
    body TEXT NOT NULL,
    client_name TEXT NOT NULL,
    last_modified TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attachments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    audit_id TEXT NOT NULL,
    question_id TEXT NOT NULL,
    relative_path TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    size INTEGER NOT NULL,
    data BLOB NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (audit_id, relative_path)
);

CREATE TABLE IF NOT EXISTS checkpoints (
    name TEXT PRIMARY KEY,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_attachments_audit ON attachments(audit_id);
"#;

fn map_err(e: rusqlite::Error) -> StorageError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StorageError::Conflict(e.to_string())
        }
        other => StorageError::Database(other.to_string()),
    }
}

/// Local transactional store. Always ready; there is no permission to lose.
pub struct SqliteStorageProvider {
    conn: std::sync::Mutex<rusqlite::Connection>,
    path: Option<PathBuf>,
}

impl SqliteStorageProvider {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let conn = rusqlite::Connection::open(path).map_err(map_err)?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = rusqlite::Connection::open_in_memory().map_err(map_err)?;
        Self::init(conn, None)
    }

    fn init(conn: rusqlite::Connection, path: Option<PathBuf>) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA).map_err(map_err)?;
        tracing::info!(path = ?path, "sqlite storage provider opened");
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
            path,
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StorageError::Database(format!("failed to acquire lock: {}", e)))?;
        f(&conn).map_err(map_err)
    }
}

#[async_trait]
impl StorageProvider for SqliteStorageProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LocalDatabase
    }

    fn ready(&self) -> bool {
        true
    }

    fn location(&self) -> Option<PathBuf> {
        self.path.clone()
    }

    async fn ensure_permission(&self, _mode: AccessMode) -> Result<bool, StorageError> {
        Ok(true)
    }

    async fn save_audit(&self, record: &AuditRecord) -> Result<(), StorageError> {
        let body = serde_json::to_string(record)?;
        let last_modified = record.metadata.last_modified.to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO audits (id, body, client_name, last_modified) VALUES (?1, ?2, ?3, ?4)",
                params![record.id, body, record.metadata.client_name, last_modified],
            )
        })?;
        tracing::debug!(audit_id = %record.id, "audit saved to local database");
        Ok(())
    }

    async fn load_audit(&self, id: &str) -> Result<Option<AuditRecord>, StorageError> {
        let body: Option<String> = self.with_conn(|conn| {
            conn.query_row("SELECT body FROM audits WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
        })?;
        match body {
            Some(body) => {
                let mut record: AuditRecord = serde_json::from_str(&body)?;
                record.refresh_metrics();
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Attachment blobs are kept; only the record row goes.
    async fn delete_audit(&self, id: &str) -> Result<bool, StorageError> {
        let n = self.with_conn(|conn| conn.execute("DELETE FROM audits WHERE id = ?1", params![id]))?;
        Ok(n > 0)
    }

    async fn list_audits(&self) -> Result<Vec<AuditSummary>, StorageError> {
        let bodies: Vec<String> = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT body FROM audits ORDER BY last_modified DESC")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect()
        })?;
        let mut out = Vec::with_capacity(bodies.len());
        for body in bodies {
            match serde_json::from_str::<AuditRecord>(&body) {
                Ok(mut record) => {
                    record.refresh_metrics();
                    out.push(record.summary());
                }
                Err(e) => tracing::warn!(error = %e, "skipping unreadable audit row"),
            }
        }
        Ok(out)
    }

    async fn save_attachment(
        &self,
        audit_id: &str,
        attachment: &Attachment,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        let created_at = attachment.uploaded_at.to_rfc3339();
        let row_id = self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO attachments (audit_id, question_id, relative_path, mime_type, size, data, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    audit_id,
                    attachment.question_id,
                    attachment.relative_path,
                    attachment.mime_type,
                    bytes.len() as i64,
                    bytes,
                    created_at,
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(id)
        })?;
        tracing::info!(
            audit_id = %audit_id,
            question_id = %attachment.question_id,
            row_id,
            size = bytes.len(),
            "attachment stored in local database"
        );
        Ok(format!("attachments/{}", row_id))
    }

    async fn load_attachment(
        &self,
        audit_id: &str,
        attachment: &Attachment,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT data FROM attachments WHERE audit_id = ?1 AND relative_path = ?2",
                params![audit_id, attachment.relative_path],
                |row| row.get(0),
            )
            .optional()
        })
    }

    async fn write_checkpoint(
        &self,
        file_name: &str,
        contents: &str,
    ) -> Result<String, StorageError> {
        let now = chrono::Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO checkpoints (name, body, created_at) VALUES (?1, ?2, ?3)",
                params![file_name, contents, now],
            )
        })?;
        Ok(format!("checkpoints/{}", file_name))
    }

    async fn list_checkpoints(&self) -> Result<Vec<String>, StorageError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM checkpoints")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
    }

    async fn read_checkpoint(&self, file_name: &str) -> Result<String, StorageError> {
        let body: Option<String> = self.with_conn(|conn| {
            conn.query_row(
                "SELECT body FROM checkpoints WHERE name = ?1",
                params![file_name],
                |row| row.get(0),
            )
            .optional()
        })?;
        body.ok_or_else(|| StorageError::NotFound(file_name.to_string()))
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        let (audits, attachments, attachment_bytes, checkpoints) = self.with_conn(|conn| {
            let audits: i64 = conn.query_row("SELECT COUNT(*) FROM audits", [], |r| r.get(0))?;
            let (attachments, bytes): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM attachments",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?;
            let checkpoints: i64 =
                conn.query_row("SELECT COUNT(*) FROM checkpoints", [], |r| r.get(0))?;
            Ok((audits, attachments, bytes, checkpoints))
        })?;
        Ok(StorageStats {
            provider: ProviderKind::LocalDatabase,
            audits: audits as usize,
            attachments: attachments as usize,
            attachment_bytes: attachment_bytes as u64,
            checkpoints: checkpoints as usize,
        })
    }
}
