//! Core types, status normalization, and storage traits for the audit store.
//!
//! Record JSON uses camelCase field names so backups and checkpoints stay compatible with the
//! UI collaborators that read them.

mod attachment;
mod config;
mod record;
mod status;
mod traits;

pub use attachment::*;
pub use config::*;
pub use record::*;
pub use status::*;
pub use traits::*;
