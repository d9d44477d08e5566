//! Axum server and routes.

use audit_autosave::AutoSaveScheduler;
use audit_state::AuditStateStore;
use audit_types::{
    normalize, AccessMode, AttachmentCategory, IncomingFile, NewAudit, QuestionEvidence, StateError,
    StorageConfig, StorageError,
};
use audit_workspace::{
    AttachmentStore, CheckpointManager, NativeDirectoryHost, StorageProviderAdapter,
    WorkspaceManager,
};
use axum::{
    extract::{Path, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Envelope every route answers with. The HTTP status is always 200; `code` carries the outcome.
#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

type Reply = Json<ApiResponse>;

fn ok<T: Serialize>(data: T) -> Reply {
    match serde_json::to_value(data) {
        Ok(value) => Json(ApiResponse {
            code: 200,
            message: "Success".to_string(),
            data: Some(value),
        }),
        Err(e) => Json(ApiResponse {
            code: 500,
            message: e.to_string(),
            data: None,
        }),
    }
}

fn bad_request(message: impl Into<String>) -> Reply {
    Json(ApiResponse {
        code: 400,
        message: message.into(),
        data: None,
    })
}

fn error_code(e: &StorageError) -> i32 {
    match e {
        StorageError::UserAborted => 200,
        StorageError::Serialization(_) => 400,
        StorageError::PermissionDenied { .. } => 403,
        StorageError::NotFound(_) | StorageError::State(StateError::UnknownRecord(_)) => 404,
        StorageError::NotConnected
        | StorageError::Conflict(_)
        | StorageError::State(StateError::NotActive { .. }) => 409,
        StorageError::LimitExceeded(_) => 413,
        StorageError::Backup(_) => 507,
        StorageError::Io { .. } | StorageError::Database(_) | StorageError::Other(_) => 500,
    }
}

/// A dismissed prompt is reported as an outcome, not an error.
fn fail(e: StorageError) -> Reply {
    if e.is_user_aborted() {
        return Json(ApiResponse {
            code: 200,
            message: "Selection aborted".to_string(),
            data: Some(serde_json::json!({ "aborted": true })),
        });
    }
    let mut data = serde_json::json!({ "error": e.code() });
    if let StorageError::LimitExceeded(violation) = &e {
        data["violation"] = serde_json::to_value(violation).unwrap_or_default();
    }
    tracing::debug!(error = %e, code = e.code(), "request failed");
    Json(ApiResponse {
        code: error_code(&e),
        message: e.to_string(),
        data: Some(data),
    })
}

fn reply<T: Serialize>(result: Result<T, StorageError>) -> Reply {
    match result {
        Ok(data) => ok(data),
        Err(e) => fail(e),
    }
}

pub struct AppState {
    pub config: StorageConfig,
    pub state: Arc<AuditStateStore>,
    pub host: Arc<NativeDirectoryHost>,
    pub workspace: Arc<WorkspaceManager>,
    pub provider: StorageProviderAdapter,
    pub attachments: AttachmentStore,
    pub checkpoints: CheckpointManager,
    pub autosave: AutoSaveScheduler,
    /// Offer-then-pick must not interleave between requests.
    prompt_lock: tokio::sync::Mutex<()>,
}

impl AppState {
    pub fn new(
        config: StorageConfig,
        state: Arc<AuditStateStore>,
        host: Arc<NativeDirectoryHost>,
        workspace: Arc<WorkspaceManager>,
        provider: StorageProviderAdapter,
        autosave: AutoSaveScheduler,
    ) -> Self {
        let attachments =
            AttachmentStore::new(provider.provider(), Arc::clone(&state), config.limits);
        let checkpoints = CheckpointManager::new(provider.provider());
        Self {
            config,
            state,
            host,
            workspace,
            provider,
            attachments,
            checkpoints,
            autosave,
            prompt_lock: tokio::sync::Mutex::new(()),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/audits", get(handle_list_audits).post(handle_create_audit))
        .route("/audits/import", post(handle_import))
        .route("/audits/active", get(handle_active_audit))
        .route(
            "/audits/active/questions/:question_id",
            put(handle_update_question),
        )
        .route("/audits/:id", delete(handle_delete_audit))
        .route("/audits/:id/duplicate", post(handle_duplicate_audit))
        .route("/audits/:id/activate", post(handle_activate_audit))
        .route("/workspace", get(handle_workspace_status))
        .route("/workspace/create", post(handle_workspace_create))
        .route("/workspace/resume", post(handle_workspace_resume))
        .route("/workspace/disconnect", post(handle_workspace_disconnect))
        .route("/workspace/save", post(handle_workspace_save))
        .route(
            "/attachments/:question_id",
            get(handle_list_attachments).post(handle_add_attachments),
        )
        .route(
            "/attachments/:question_id/stats",
            get(handle_attachment_stats),
        )
        .route(
            "/attachments/:question_id/:index",
            delete(handle_remove_attachment),
        )
        .route(
            "/checkpoints",
            get(handle_list_checkpoints).post(handle_save_checkpoint),
        )
        .route("/checkpoints/latest", get(handle_latest_checkpoint))
        .route("/storage/stats", get(handle_storage_stats))
        .route("/autosave/status", get(handle_autosave_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn handle_health() -> &'static str {
    "ok"
}

// ---------------------------------------------------------------------------
// Audits
// ---------------------------------------------------------------------------

async fn handle_list_audits(State(app): State<Arc<AppState>>) -> Reply {
    ok(app.state.summaries())
}

async fn handle_create_audit(
    State(app): State<Arc<AppState>>,
    Json(req): Json<NewAudit>,
) -> Reply {
    if req.client_name.trim().is_empty() {
        return bad_request("clientName is required");
    }
    ok(app.state.create(req))
}

async fn handle_import(
    State(app): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Reply {
    let ids = app.state.import_json(&body.to_string());
    reply(ids.map(|ids| serde_json::json!({ "imported": ids })))
}

async fn handle_active_audit(State(app): State<Arc<AppState>>) -> Reply {
    reply(
        app.state
            .active()
            .ok_or_else(|| StorageError::NotFound("no active audit".to_string())),
    )
}

async fn handle_delete_audit(State(app): State<Arc<AppState>>, Path(id): Path<String>) -> Reply {
    if app.state.delete(&id) {
        ok(serde_json::json!({ "deleted": id, "activeId": app.state.active_id() }))
    } else {
        fail(StateError::UnknownRecord(id).into())
    }
}

async fn handle_duplicate_audit(
    State(app): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Reply {
    reply(
        app.state
            .duplicate(&id)
            .ok_or_else(|| StateError::UnknownRecord(id).into()),
    )
}

async fn handle_activate_audit(
    State(app): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Reply {
    if app.state.switch_active(&id) {
        ok(serde_json::json!({ "activeId": id }))
    } else {
        fail(StateError::UnknownRecord(id).into())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionUpdate {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub evidence: Option<QuestionEvidence>,
}

async fn handle_update_question(
    State(app): State<Arc<AppState>>,
    Path(question_id): Path<String>,
    Json(req): Json<QuestionUpdate>,
) -> Reply {
    let Some(active) = app.state.active() else {
        return fail(StorageError::NotFound("no active audit".to_string()));
    };
    if active.question(&question_id).is_none() {
        return fail(StorageError::NotFound(format!("question {}", question_id)));
    }
    let qid = question_id.clone();
    let result = app.state.update(&active.id, move |mut record| {
        if let Some(q) = record.question_mut(&qid) {
            if let Some(status) = req.status.as_deref() {
                q.status = normalize(Some(status));
            }
            if let Some(notes) = req.notes {
                q.notes = notes;
            }
            if let Some(evidence) = req.evidence {
                q.evidence = evidence;
            }
        }
        record
    });
    match result {
        Ok(issues) => {
            let record = app.state.get(&active.id);
            ok(serde_json::json!({
                "question": record.as_ref().and_then(|r| r.question(&question_id)),
                "metrics": record.as_ref().map(|r| &r.metrics),
                "issues": issues,
            }))
        }
        Err(e) => fail(e.into()),
    }
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkspaceRequest {
    pub client_name: String,
    pub year: i32,
    /// Answer to the directory prompt; absent means the prompt was dismissed.
    #[serde(default)]
    pub parent_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeWorkspaceRequest {
    #[serde(default)]
    pub client_name: String,
    #[serde(default)]
    pub expected_year: Option<i32>,
    #[serde(default)]
    pub client_dir: Option<PathBuf>,
}

fn offer(app: &AppState, dir: Option<PathBuf>) {
    match dir {
        Some(dir) => app.host.offer(dir),
        None => app.host.clear_offer(),
    }
}

async fn handle_workspace_create(
    State(app): State<Arc<AppState>>,
    Json(req): Json<CreateWorkspaceRequest>,
) -> Reply {
    let _prompt = app.prompt_lock.lock().await;
    offer(&app, req.parent_dir);
    reply(app.workspace.create_new(&req.client_name, req.year).await)
}

async fn handle_workspace_resume(
    State(app): State<Arc<AppState>>,
    Json(req): Json<ResumeWorkspaceRequest>,
) -> Reply {
    let _prompt = app.prompt_lock.lock().await;
    offer(&app, req.client_dir);
    reply(
        app.workspace
            .resume_existing(&req.client_name, req.expected_year)
            .await,
    )
}

async fn handle_workspace_status(State(app): State<Arc<AppState>>) -> Reply {
    let ws = app.workspace.state();
    let provider = app.provider.provider();
    ok(serde_json::json!({
        "status": ws.status,
        "handle": ws.handle,
        "ready": provider.ready(),
        "provider": app.provider.kind(),
        "location": provider.location(),
    }))
}

async fn handle_workspace_disconnect(State(app): State<Arc<AppState>>) -> Reply {
    app.workspace.disconnect();
    ok(serde_json::json!({ "status": app.workspace.status() }))
}

/// Write the active record into the authoritative store.
async fn handle_workspace_save(State(app): State<Arc<AppState>>) -> Reply {
    let Some(record) = app.state.active() else {
        return fail(StorageError::NotFound("no active audit".to_string()));
    };
    let provider = app.provider.provider();
    if !provider.connected() {
        return fail(StorageError::NotConnected);
    }
    match provider.ensure_permission(AccessMode::ReadWrite).await {
        Ok(true) => {}
        Ok(false) => {
            return fail(StorageError::PermissionDenied {
                path: provider.location().unwrap_or_default(),
                mode: AccessMode::ReadWrite,
            })
        }
        Err(e) => return fail(e),
    }
    match provider.save_audit(&record).await {
        Ok(()) => ok(serde_json::json!({ "saved": record.id })),
        Err(e) => {
            provider.report_write_failure().await;
            fail(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFile {
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    /// Base64 (standard alphabet) file content.
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub category: String,
    pub files: Vec<UploadFile>,
}

async fn handle_add_attachments(
    State(app): State<Arc<AppState>>,
    Path(question_id): Path<String>,
    Json(req): Json<UploadRequest>,
) -> Reply {
    let Some(category) = AttachmentCategory::parse(&req.category) else {
        return bad_request(format!("unknown attachment category '{}'", req.category));
    };
    let mut files = Vec::with_capacity(req.files.len());
    for f in req.files {
        match base64::engine::general_purpose::STANDARD.decode(f.data.as_bytes()) {
            Ok(bytes) => files.push(IncomingFile::new(f.name, f.mime_type, bytes)),
            Err(e) => return bad_request(format!("file '{}' is not valid base64: {}", f.name, e)),
        }
    }
    reply(app.attachments.add(&question_id, category, files).await)
}

async fn handle_list_attachments(
    State(app): State<Arc<AppState>>,
    Path(question_id): Path<String>,
) -> Reply {
    reply(app.attachments.list(&question_id))
}

async fn handle_attachment_stats(
    State(app): State<Arc<AppState>>,
    Path(question_id): Path<String>,
) -> Reply {
    reply(app.attachments.stats(&question_id))
}

async fn handle_remove_attachment(
    State(app): State<Arc<AppState>>,
    Path((question_id, index)): Path<(String, usize)>,
) -> Reply {
    reply(app.attachments.remove(&question_id, index))
}

// ---------------------------------------------------------------------------
// Checkpoints and status
// ---------------------------------------------------------------------------

async fn handle_save_checkpoint(State(app): State<Arc<AppState>>) -> Reply {
    let Some(record) = app.state.active() else {
        return fail(StorageError::NotFound("no active audit".to_string()));
    };
    reply(app.checkpoints.save(&record).await)
}

async fn handle_list_checkpoints(State(app): State<Arc<AppState>>) -> Reply {
    reply(app.checkpoints.list().await)
}

/// `data` is `null` when no checkpoint exists.
async fn handle_latest_checkpoint(State(app): State<Arc<AppState>>) -> Reply {
    reply(app.checkpoints.load_latest().await)
}

async fn handle_storage_stats(State(app): State<Arc<AppState>>) -> Reply {
    reply(app.provider.provider().stats().await)
}

async fn handle_autosave_status(State(app): State<Arc<AppState>>) -> Reply {
    ok(app.autosave.current_status())
}
