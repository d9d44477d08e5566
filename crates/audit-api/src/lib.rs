//! HTTP surface over the audit store.

pub mod server;
