//! Host platform seam: directory prompts and access grants.

use async_trait::async_trait;
use audit_types::{AccessMode, HostCapabilities, StorageError};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Why the host is asked for a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickPurpose {
    /// Parent under which a new client tree is created.
    ParentDirectory,
    /// An existing client directory to resume.
    ClientDirectory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// Not decided yet; a request may prompt the user.
    Prompt,
}

/// Platform services the workspace depends on.
#[async_trait]
pub trait DirectoryHost: Send + Sync {
    fn capabilities(&self) -> HostCapabilities;

    /// `Ok(None)` when the user dismissed the picker.
    async fn pick_directory(&self, purpose: PickPurpose) -> Result<Option<PathBuf>, StorageError>;

    async fn query_permission(&self, dir: &Path, mode: AccessMode) -> PermissionState;

    async fn request_permission(&self, dir: &Path, mode: AccessMode) -> PermissionState;
}

/// Host for a native process: the "prompt" is answered by a path offered beforehand (from a
/// CLI flag or an API request), and grants come from file-system metadata.
pub struct NativeDirectoryHost {
    offered: Mutex<Option<PathBuf>>,
    touch_form_factor: bool,
}

impl NativeDirectoryHost {
    pub fn new() -> Self {
        Self {
            offered: Mutex::new(None),
            touch_form_factor: false,
        }
    }

    /// Answer the next prompt with `path`. Without an offer the prompt reads as dismissed.
    pub fn offer(&self, path: impl Into<PathBuf>) {
        *self.offered.lock().unwrap_or_else(PoisonError::into_inner) = Some(path.into());
    }

    pub fn clear_offer(&self) {
        self.offered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    async fn grant_for(dir: &Path, mode: AccessMode) -> PermissionState {
        match tokio::fs::metadata(dir).await {
            Ok(meta) if meta.is_dir() => match mode {
                AccessMode::Read => PermissionState::Granted,
                AccessMode::ReadWrite if meta.permissions().readonly() => PermissionState::Denied,
                AccessMode::ReadWrite => PermissionState::Granted,
            },
            Ok(_) => PermissionState::Denied,
            Err(e) => {
                tracing::debug!(path = %dir.display(), error = %e, "permission query failed");
                PermissionState::Denied
            }
        }
    }
}

impl Default for NativeDirectoryHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectoryHost for NativeDirectoryHost {
    fn capabilities(&self) -> HostCapabilities {
        HostCapabilities {
            directory_handles: true,
            touch_form_factor: self.touch_form_factor,
        }
    }

    async fn pick_directory(&self, purpose: PickPurpose) -> Result<Option<PathBuf>, StorageError> {
        let offered = self
            .offered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(path) = offered else {
            tracing::debug!(?purpose, "no directory offered, treating prompt as dismissed");
            return Ok(None);
        };
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(Some(path)),
            Ok(_) => Err(StorageError::NotFound(format!(
                "{} is not a directory",
                path.display()
            ))),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    async fn query_permission(&self, dir: &Path, mode: AccessMode) -> PermissionState {
        Self::grant_for(dir, mode).await
    }

    async fn request_permission(&self, dir: &Path, mode: AccessMode) -> PermissionState {
        // Native processes cannot be granted more than the file system already allows.
        Self::grant_for(dir, mode).await
    }
}
