//! Provider backed by the user-selected directory tree.

use crate::layout::{resolve_relative, Subtree};
use crate::manager::WorkspaceManager;
use async_trait::async_trait;
use audit_types::{
    AccessMode, Attachment, AuditRecord, AuditSummary, ProviderKind, StorageError, StorageProvider,
    StorageStats,
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

const AUDIT_FILE_PREFIX: &str = "audit_";
const JSON_EXT: &str = ".json";

fn audit_file_name(id: &str) -> String {
    format!("{}{}{}", AUDIT_FILE_PREFIX, id, JSON_EXT)
}

/// True for names the checkpoint writer produces.
pub fn is_checkpoint_name(name: &str) -> bool {
    name.ends_with(JSON_EXT) && name.contains("checkpoint_")
}

/// Reads and writes through the [`WorkspaceManager`]; never keeps a path of its own.
pub struct DirectoryStorageProvider {
    workspace: Arc<WorkspaceManager>,
}

impl DirectoryStorageProvider {
    pub fn new(workspace: Arc<WorkspaceManager>) -> Self {
        Self { workspace }
    }

    pub fn workspace(&self) -> &Arc<WorkspaceManager> {
        &self.workspace
    }

    fn audit_path(&self, id: &str) -> Result<PathBuf, StorageError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(StorageError::Other(format!("invalid audit id '{}'", id)));
        }
        Ok(self.workspace.audit_dir()?.join(audit_file_name(id)))
    }

    fn attachment_path(&self, attachment: &Attachment) -> Result<PathBuf, StorageError> {
        let root = self.workspace.audit_dir()?;
        resolve_relative(&root, &attachment.relative_path).ok_or_else(|| {
            StorageError::Other(format!(
                "invalid attachment path '{}'",
                attachment.relative_path
            ))
        })
    }

    /// Create-only write: an existing file is a `Conflict`, never overwritten.
    async fn write_new(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::Conflict(path.display().to_string()));
            }
            Err(e) => return Err(StorageError::io(path, e)),
        };
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(e) = written {
            // Leave no truncated file behind.
            let _ = tokio::fs::remove_file(path).await;
            return Err(StorageError::io(path, e));
        }
        Ok(())
    }

    /// Replace `path` atomically through a sibling temp file.
    async fn write_replace(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StorageError::io(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(path, e));
        }
        Ok(())
    }

    async fn file_names(dir: &Path) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(StorageError::io(dir, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(dir, e))?
        {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                names.push(name);
            }
        }
        Ok(names)
    }

    async fn dir_usage(dir: &Path) -> Result<(usize, u64), StorageError> {
        let mut count = 0;
        let mut bytes = 0;
        for name in Self::file_names(dir).await? {
            let path = dir.join(&name);
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                count += 1;
                bytes += meta.len();
            }
        }
        Ok((count, bytes))
    }
}

#[async_trait]
impl StorageProvider for DirectoryStorageProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Directory
    }

    fn ready(&self) -> bool {
        self.workspace.ready()
    }

    fn location(&self) -> Option<PathBuf> {
        self.workspace.handle().map(|h| h.audit_dir.clone())
    }

    async fn ensure_permission(&self, mode: AccessMode) -> Result<bool, StorageError> {
        if self.workspace.handle().is_none() {
            return Err(StorageError::NotConnected);
        }
        Ok(self.workspace.ensure_permission(mode).await)
    }

    async fn save_audit(&self, record: &AuditRecord) -> Result<(), StorageError> {
        let path = self.audit_path(&record.id)?;
        let json = serde_json::to_vec_pretty(record)?;
        Self::write_replace(&path, &json).await?;
        tracing::debug!(audit_id = %record.id, path = %path.display(), "audit saved to workspace");
        Ok(())
    }

    async fn load_audit(&self, id: &str) -> Result<Option<AuditRecord>, StorageError> {
        let path = self.audit_path(id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&path, e)),
        };
        let mut record: AuditRecord = serde_json::from_slice(&bytes)?;
        record.refresh_metrics();
        Ok(Some(record))
    }

    async fn delete_audit(&self, id: &str) -> Result<bool, StorageError> {
        let path = self.audit_path(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    async fn list_audits(&self) -> Result<Vec<AuditSummary>, StorageError> {
        let dir = self.workspace.audit_dir()?;
        let mut out = Vec::new();
        for name in Self::file_names(&dir).await? {
            let Some(id) = name
                .strip_prefix(AUDIT_FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(JSON_EXT))
            else {
                continue;
            };
            match self.load_audit(id).await {
                Ok(Some(record)) => out.push(record.summary()),
                Ok(None) => {}
                Err(e) => tracing::warn!(file = %name, error = %e, "skipping unreadable audit file"),
            }
        }
        out.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(out)
    }

    async fn save_attachment(
        &self,
        audit_id: &str,
        attachment: &Attachment,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        let path = self.attachment_path(attachment)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }
        Self::write_new(&path, bytes).await?;
        tracing::info!(
            audit_id = %audit_id,
            question_id = %attachment.question_id,
            path = %path.display(),
            size = bytes.len(),
            "attachment written"
        );
        Ok(path.display().to_string())
    }

    async fn load_attachment(
        &self,
        _audit_id: &str,
        attachment: &Attachment,
    ) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.attachment_path(attachment)?;
        match tokio::fs::read(&path).await {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    async fn write_checkpoint(
        &self,
        file_name: &str,
        contents: &str,
    ) -> Result<String, StorageError> {
        let dir = self.workspace.dir(Subtree::Export)?;
        let path = resolve_relative(&dir, file_name)
            .ok_or_else(|| StorageError::Other(format!("invalid checkpoint name '{}'", file_name)))?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;
        Self::write_new(&path, contents.as_bytes()).await?;
        Ok(path.display().to_string())
    }

    async fn list_checkpoints(&self) -> Result<Vec<String>, StorageError> {
        let dir = self.workspace.dir(Subtree::Export)?;
        Ok(Self::file_names(&dir)
            .await?
            .into_iter()
            .filter(|n| is_checkpoint_name(n))
            .collect())
    }

    async fn read_checkpoint(&self, file_name: &str) -> Result<String, StorageError> {
        let dir = self.workspace.dir(Subtree::Export)?;
        let path = resolve_relative(&dir, file_name)
            .ok_or_else(|| StorageError::NotFound(file_name.to_string()))?;
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(file_name.to_string()))
            }
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        let audits = self.list_audits().await?.len();
        let mut attachments = 0;
        let mut attachment_bytes = 0;
        for subtree in [Subtree::Photos, Subtree::Documents, Subtree::Minutes] {
            let (count, bytes) = Self::dir_usage(&self.workspace.dir(subtree)?).await?;
            attachments += count;
            attachment_bytes += bytes;
        }
        let checkpoints = self.list_checkpoints().await?.len();
        Ok(StorageStats {
            provider: ProviderKind::Directory,
            audits,
            attachments,
            attachment_bytes,
            checkpoints,
        })
    }

    async fn report_write_failure(&self) {
        self.workspace.report_write_failure().await;
    }
}
