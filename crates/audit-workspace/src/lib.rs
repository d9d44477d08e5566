//! The authoritative workspace: directory lifecycle, storage backends, attachments, and
//! checkpoints.
//!
//! [`WorkspaceManager`] is the only owner of the selected directory. Providers and stores ask it
//! for paths per operation and never keep their own.

pub mod adapter;
pub mod attachments;
pub mod checkpoint;
pub mod directory_provider;
pub mod host;
pub mod layout;
pub mod manager;
pub mod mock;
pub mod sqlite_provider;

pub use adapter::{choose_provider_kind, StorageProviderAdapter};
pub use attachments::{check_limits, AttachmentStore, RemovedAttachment};
pub use checkpoint::{checkpoint_file_name, CheckpointManager, SavedCheckpoint};
pub use directory_provider::DirectoryStorageProvider;
pub use host::{DirectoryHost, NativeDirectoryHost, PermissionState, PickPurpose};
pub use layout::Subtree;
pub use manager::{WorkspaceHandle, WorkspaceManager, WorkspaceState, WorkspaceStatus};
pub use mock::MockDirectoryHost;
pub use sqlite_provider::SqliteStorageProvider;
