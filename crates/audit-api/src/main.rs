//! Audit store REST API server.

use audit_api::server::{self, AppState};
use audit_autosave::AutoSaveScheduler;
use audit_backup::JsonFileBackupStore;
use audit_state::AuditStateStore;
use audit_types::{BackupStore, StorageConfig};
use audit_workspace::{DirectoryHost, NativeDirectoryHost, StorageProviderAdapter, WorkspaceManager};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = StorageConfig::from_env();
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let backup: Arc<dyn BackupStore> = Arc::new(
        JsonFileBackupStore::open(config.backup_path(), config.backup_quota_bytes).await?,
    );
    let state = Arc::new(AuditStateStore::new());
    let report = state.restore(backup.as_ref()).await?;
    tracing::info!(
        outcome = ?report.outcome,
        records = report.records,
        active = ?report.active_id,
        "startup restore finished"
    );
    let autosave = AutoSaveScheduler::spawn(
        Arc::clone(&state),
        backup,
        Duration::from_millis(config.autosave_quiet_ms),
        Duration::from_millis(config.saved_linger_ms),
    );

    let host = Arc::new(NativeDirectoryHost::new());
    let capabilities = config.capabilities(host.capabilities());
    let workspace = Arc::new(WorkspaceManager::new(
        Arc::clone(&host) as Arc<dyn DirectoryHost>,
        config.scheme.clone(),
    ));
    let provider =
        StorageProviderAdapter::select(capabilities, Arc::clone(&workspace), &config.database_path())?;

    let addr: SocketAddr = config.listen.parse()?;
    let app_state = Arc::new(AppState::new(
        config, state, host, workspace, provider, autosave,
    ));
    let app = server::router(Arc::clone(&app_state));

    tracing::info!("audit API listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
    })
    .await?;

    app_state.autosave.flush().await;
    Ok(())
}
