//! AutoSaveScheduler: listens to state changes and feeds the debounced sink.

use crate::sink::{DebouncedSink, SaveStatus};
use audit_backup::keys::{audit_key, ACTIVE_AUDIT_KEY, AUDITS_KEY};
use audit_state::{AuditStateStore, StateChange};
use audit_types::BackupStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// What a pending autosave write covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SaveTarget {
    /// The active record under its per-record key.
    ActiveRecord,
    /// The full collection under the collection key.
    RecordList,
}

/// Background listener that turns every committed state change into debounced backup writes.
pub struct AutoSaveScheduler {
    sink: DebouncedSink<SaveTarget>,
    task: JoinHandle<()>,
}

impl AutoSaveScheduler {
    /// Subscribe to `state` and start listening. Must be called inside a tokio runtime.
    pub fn spawn(
        state: Arc<AuditStateStore>,
        backup: Arc<dyn BackupStore>,
        quiet: Duration,
        linger: Duration,
    ) -> Self {
        let sink = DebouncedSink::new(backup, quiet, linger);
        let mut rx = state.subscribe();
        let worker_sink = sink.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => handle_change(&state, &worker_sink, change).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "autosave lagged behind state changes");
                        schedule_active(&state, &worker_sink);
                        schedule_list(&state, &worker_sink);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { sink, task }
    }

    pub fn status(&self) -> watch::Receiver<SaveStatus> {
        self.sink.status()
    }

    pub fn current_status(&self) -> SaveStatus {
        self.sink.current_status()
    }

    /// Write everything pending now (e.g. on shutdown).
    pub async fn flush(&self) {
        self.sink.flush().await;
    }
}

impl Drop for AutoSaveScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn schedule_active(state: &AuditStateStore, sink: &DebouncedSink<SaveTarget>) {
    if let Some(record) = state.active() {
        sink.schedule(SaveTarget::ActiveRecord, audit_key(&record.id), record);
    }
}

fn schedule_list(state: &AuditStateStore, sink: &DebouncedSink<SaveTarget>) {
    sink.schedule(
        SaveTarget::RecordList,
        AUDITS_KEY.to_string(),
        state.records(),
    );
}

async fn handle_change(
    state: &AuditStateStore,
    sink: &DebouncedSink<SaveTarget>,
    change: StateChange,
) {
    match change {
        StateChange::Created(_)
        | StateChange::Updated(_)
        | StateChange::Imported(_)
        | StateChange::Restored => {
            schedule_active(state, sink);
            schedule_list(state, sink);
        }
        StateChange::Deleted(id) => {
            let key = audit_key(&id);
            sink.cancel_key(&key);
            sink.remove_now(&key).await;
            schedule_list(state, sink);
        }
        StateChange::ActiveChanged(active) => {
            // Land the previous active record before its target is reused.
            sink.flush_target(&SaveTarget::ActiveRecord).await;
            match active {
                Some(id) => sink.write_now(ACTIVE_AUDIT_KEY, &id).await,
                None => sink.remove_now(ACTIVE_AUDIT_KEY).await,
            }
            schedule_active(state, sink);
        }
    }
}
