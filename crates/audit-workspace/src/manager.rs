//! WorkspaceManager: sole owner of the authoritative directory handle.

use crate::host::{DirectoryHost, PermissionState, PickPurpose};
use crate::layout::{audit_dir_name, parse_audit_dir_year, sanitize_dir_component, Subtree};
use audit_types::{AccessMode, StorageError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceStatus {
    Disconnected,
    Connected,
    /// A handle exists but access was lost; a re-grant reconnects it.
    PermissionExpired,
}

/// Live reference to one audit directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceHandle {
    pub client_name: String,
    pub year: String,
    pub client_dir: PathBuf,
    pub audit_dir: PathBuf,
}

impl WorkspaceHandle {
    pub fn subtree(&self, subtree: Subtree) -> PathBuf {
        self.audit_dir.join(subtree.relative())
    }
}

/// Snapshot published to observers on every transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceState {
    pub status: WorkspaceStatus,
    pub handle: Option<Arc<WorkspaceHandle>>,
}

impl WorkspaceState {
    fn disconnected() -> Self {
        Self {
            status: WorkspaceStatus::Disconnected,
            handle: None,
        }
    }
}

/// Owns the workspace lifecycle:
/// `Disconnected -> Connected -> PermissionExpired -> Connected -> Disconnected`.
///
/// Consumers never keep the handle; they ask for a sub-directory per operation through
/// [`WorkspaceManager::dir`], so a disconnect is observed immediately.
pub struct WorkspaceManager {
    host: Arc<dyn DirectoryHost>,
    scheme: String,
    state: watch::Sender<WorkspaceState>,
}

impl WorkspaceManager {
    pub fn new(host: Arc<dyn DirectoryHost>, scheme: impl Into<String>) -> Self {
        let (state, _) = watch::channel(WorkspaceState::disconnected());
        Self {
            host,
            scheme: scheme.into(),
            state,
        }
    }

    pub fn host(&self) -> &Arc<dyn DirectoryHost> {
        &self.host
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Observers are notified synchronously on every transition.
    pub fn subscribe(&self) -> watch::Receiver<WorkspaceState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> WorkspaceState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> WorkspaceStatus {
        self.state.borrow().status
    }

    pub fn ready(&self) -> bool {
        self.status() == WorkspaceStatus::Connected
    }

    pub fn handle(&self) -> Option<Arc<WorkspaceHandle>> {
        self.state.borrow().handle.clone()
    }

    fn transition(&self, next: WorkspaceState) {
        let previous = self.state.borrow().status;
        tracing::info!(
            from = ?previous,
            to = ?next.status,
            audit_dir = ?next.handle.as_ref().map(|h| h.audit_dir.display().to_string()),
            "workspace transition"
        );
        self.state.send_replace(next);
    }

    fn connect(&self, handle: WorkspaceHandle) -> Arc<WorkspaceHandle> {
        let handle = Arc::new(handle);
        self.transition(WorkspaceState {
            status: WorkspaceStatus::Connected,
            handle: Some(Arc::clone(&handle)),
        });
        handle
    }

    async fn pick(&self, purpose: PickPurpose) -> Result<PathBuf, StorageError> {
        match self.host.pick_directory(purpose).await? {
            Some(path) => Ok(path),
            None => {
                tracing::info!(?purpose, "directory selection aborted");
                Err(StorageError::UserAborted)
            }
        }
    }

    /// Query, then request if needed. Leaves the state machine untouched.
    async fn acquire(&self, dir: &Path, mode: AccessMode) -> bool {
        match self.host.query_permission(dir, mode).await {
            PermissionState::Granted => true,
            _ => self.host.request_permission(dir, mode).await == PermissionState::Granted,
        }
    }

    async fn require(&self, dir: &Path, mode: AccessMode) -> Result<(), StorageError> {
        if self.acquire(dir, mode).await {
            Ok(())
        } else {
            Err(StorageError::PermissionDenied {
                path: dir.to_path_buf(),
                mode,
            })
        }
    }

    async fn create_subtrees(audit_dir: &Path) -> Result<(), StorageError> {
        for subtree in Subtree::ALL {
            let dir = audit_dir.join(subtree.relative());
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StorageError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Prompt for a parent directory and create `<client>/<year>_Audit_<scheme>/` with its fixed
    /// subtree. Re-running against an existing tree reuses it without touching its content.
    pub async fn create_new(
        &self,
        client_name: &str,
        year: i32,
    ) -> Result<Arc<WorkspaceHandle>, StorageError> {
        let client = sanitize_dir_component(client_name);
        if client.is_empty() {
            return Err(StorageError::Other("client name is required".to_string()));
        }
        if !(1000..=9999).contains(&year) {
            return Err(StorageError::Other(format!("invalid audit year {}", year)));
        }

        let parent = self.pick(PickPurpose::ParentDirectory).await?;
        self.require(&parent, AccessMode::ReadWrite).await?;

        let client_dir = parent.join(&client);
        let audit_dir = client_dir.join(audit_dir_name(year, &self.scheme));
        Self::create_subtrees(&audit_dir).await?;

        Ok(self.connect(WorkspaceHandle {
            client_name: client_name.trim().to_string(),
            year: format!("{:04}", year),
            client_dir,
            audit_dir,
        }))
    }

    /// Prompt for a client directory and attach to one of its `<year>_Audit_<scheme>` children:
    /// `expected_year` when present, otherwise the greatest name.
    pub async fn resume_existing(
        &self,
        client_name: &str,
        expected_year: Option<i32>,
    ) -> Result<Arc<WorkspaceHandle>, StorageError> {
        let client_dir = self.pick(PickPurpose::ClientDirectory).await?;
        self.require(&client_dir, AccessMode::ReadWrite).await?;

        let mut candidates: Vec<(String, String)> = Vec::new();
        let mut entries = tokio::fs::read_dir(&client_dir)
            .await
            .map_err(|e| StorageError::io(&client_dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&client_dir, e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            if let Some(year) = parse_audit_dir_year(&name, &self.scheme) {
                candidates.push((name.clone(), year.to_string()));
            }
        }

        let expected = expected_year.map(|y| format!("{:04}", y));
        let chosen = expected
            .as_ref()
            .and_then(|y| candidates.iter().find(|(_, year)| year == y))
            .or_else(|| candidates.iter().max_by(|a, b| a.0.cmp(&b.0)))
            .cloned();
        let Some((dir_name, year)) = chosen else {
            return Err(StorageError::NotFound(format!(
                "no <year>_Audit_{} directory in {}",
                self.scheme,
                client_dir.display()
            )));
        };
        if let Some(y) = &expected {
            if *y != year {
                tracing::warn!(expected = %y, using = %year, "expected audit year not found, using most recent");
            }
        }

        let audit_dir = client_dir.join(&dir_name);
        Self::create_subtrees(&audit_dir).await?;

        let client_name = match client_name.trim() {
            "" => client_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            name => name.to_string(),
        };
        Ok(self.connect(WorkspaceHandle {
            client_name,
            year,
            client_dir,
            audit_dir,
        }))
    }

    /// Check the grant on the live audit directory, re-requesting it when missing.
    ///
    /// `false` means the caller's operation must fail. Moves between `Connected` and
    /// `PermissionExpired` as the grant comes and goes.
    pub async fn ensure_permission(&self, mode: AccessMode) -> bool {
        let Some(handle) = self.handle() else {
            return false;
        };
        let granted = self.acquire(&handle.audit_dir, mode).await;
        // A disconnect or a new workspace may have happened while we waited.
        let current = self.state();
        let same_handle = current
            .handle
            .as_ref()
            .map(|h| Arc::ptr_eq(h, &handle))
            .unwrap_or(false);
        if !same_handle {
            return granted && current.status == WorkspaceStatus::Connected;
        }
        match (granted, current.status) {
            (true, WorkspaceStatus::PermissionExpired) => {
                self.transition(WorkspaceState {
                    status: WorkspaceStatus::Connected,
                    handle: Some(handle),
                });
            }
            (false, WorkspaceStatus::Connected) => {
                tracing::warn!(path = %handle.audit_dir.display(), %mode, "workspace permission lost");
                self.transition(WorkspaceState {
                    status: WorkspaceStatus::PermissionExpired,
                    handle: Some(handle),
                });
            }
            _ => {}
        }
        granted
    }

    /// Re-verify access after a failed write.
    pub async fn report_write_failure(&self) {
        if !self.ensure_permission(AccessMode::ReadWrite).await {
            tracing::warn!("write failed and workspace permission could not be renewed");
        }
    }

    /// Forget the handle. Files are not touched.
    pub fn disconnect(&self) {
        if self.status() == WorkspaceStatus::Disconnected {
            return;
        }
        self.transition(WorkspaceState::disconnected());
    }

    /// Current absolute path of `subtree`.
    pub fn dir(&self, subtree: Subtree) -> Result<PathBuf, StorageError> {
        Ok(self.live_handle()?.subtree(subtree))
    }

    pub fn audit_dir(&self) -> Result<PathBuf, StorageError> {
        Ok(self.live_handle()?.audit_dir.clone())
    }

    fn live_handle(&self) -> Result<Arc<WorkspaceHandle>, StorageError> {
        let state = self.state.borrow();
        match (&state.handle, state.status) {
            (Some(h), WorkspaceStatus::Connected) => Ok(Arc::clone(h)),
            (Some(h), WorkspaceStatus::PermissionExpired) => Err(StorageError::PermissionDenied {
                path: h.audit_dir.clone(),
                mode: AccessMode::ReadWrite,
            }),
            _ => Err(StorageError::NotConnected),
        }
    }
}
