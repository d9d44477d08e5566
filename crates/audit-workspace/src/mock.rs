//! Scriptable host for tests: queued picker answers and a switchable grant.

use crate::host::{DirectoryHost, PermissionState, PickPurpose};
use async_trait::async_trait;
use audit_types::{AccessMode, HostCapabilities, StorageError};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

pub struct MockDirectoryHost {
    picks: Mutex<VecDeque<Option<PathBuf>>>,
    permission: Mutex<PermissionState>,
    grant_on_request: Mutex<bool>,
    requests: AtomicUsize,
    capabilities: HostCapabilities,
}

impl MockDirectoryHost {
    pub fn new() -> Self {
        Self::with_capabilities(HostCapabilities {
            directory_handles: true,
            touch_form_factor: false,
        })
    }

    pub fn with_capabilities(capabilities: HostCapabilities) -> Self {
        Self {
            picks: Mutex::new(VecDeque::new()),
            permission: Mutex::new(PermissionState::Granted),
            grant_on_request: Mutex::new(true),
            requests: AtomicUsize::new(0),
            capabilities,
        }
    }

    /// Queue the next picker answer.
    pub fn push_pick(&self, path: impl Into<PathBuf>) {
        self.lock_picks().push_back(Some(path.into()));
    }

    /// Queue a dismissed picker.
    pub fn push_dismissed(&self) {
        self.lock_picks().push_back(None);
    }

    pub fn set_permission(&self, state: PermissionState) {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Whether a permission request re-grants access.
    pub fn set_grant_on_request(&self, grant: bool) {
        *self
            .grant_on_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = grant;
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn lock_picks(&self) -> std::sync::MutexGuard<'_, VecDeque<Option<PathBuf>>> {
        self.picks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn permission(&self) -> PermissionState {
        *self.permission.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockDirectoryHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectoryHost for MockDirectoryHost {
    fn capabilities(&self) -> HostCapabilities {
        self.capabilities
    }

    async fn pick_directory(&self, _purpose: PickPurpose) -> Result<Option<PathBuf>, StorageError> {
        Ok(self.lock_picks().pop_front().flatten())
    }

    async fn query_permission(&self, _dir: &Path, _mode: AccessMode) -> PermissionState {
        self.permission()
    }

    async fn request_permission(&self, _dir: &Path, _mode: AccessMode) -> PermissionState {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let grant = *self
            .grant_on_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if grant {
            self.set_permission(PermissionState::Granted);
        }
        self.permission()
    }
}
