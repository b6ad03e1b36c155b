use crate::backup;
use crate::ipc::error::ok;
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::helpers::HandlerErr;
use crate::ipc::types::{AppState, Request};
use crate::session::require_teacher;
use serde_json::json;
use std::path::PathBuf;

fn required_path(req: &Request, key: &str) -> Result<PathBuf, HandlerErr> {
    match req.params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(PathBuf::from(v.trim())),
        _ => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

fn target_workspace(state: &AppState, req: &Request) -> Result<PathBuf, HandlerErr> {
    req.params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn export_bundle(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_teacher(req.session.as_ref())?;
    let out = required_path(req, "outPath")?;
    let workspace_path = target_workspace(state, req)?;

    let export = backup::export_workspace_bundle(&workspace_path, &out).map_err(|e| {
        HandlerErr::new("bundle_failed", format!("{e:#}"))
            .with_details(json!({ "path": out.to_string_lossy() }))
    })?;

    Ok(json!({
        "ok": true,
        "path": out.to_string_lossy(),
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "dbSha256": export.db_sha256,
    }))
}

fn import_bundle(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_teacher(req.session.as_ref())?;
    let src = required_path(req, "inPath")?;
    let workspace_path = target_workspace(state, req)?;
    if !src.is_file() {
        return Err(HandlerErr::new("not_found", "bundle file not found")
            .with_details(json!({ "path": src.to_string_lossy() })));
    }

    // The open connection must be released before the database file is replaced.
    let previous = state.workspace.clone();
    state.db = None;

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            if let Some(prev) = previous {
                if let Err(reopen) = open_workspace(state, &prev) {
                    tracing::warn!("failed to reopen workspace after import error: {reopen:#}");
                }
            }
            return Err(HandlerErr::new("bundle_failed", format!("{e:#}"))
                .with_details(json!({ "path": src.to_string_lossy() })));
        }
    };

    open_workspace(state, &workspace_path)
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;

    Ok(json!({
        "ok": true,
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected,
        "dbSha256": import.db_sha256,
    }))
}

fn respond(
    req: &Request,
    result: Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportWorkspaceBundle" => Some(respond(req, export_bundle(state, req))),
        "backup.importWorkspaceBundle" => Some(respond(req, import_bundle(state, req))),
        _ => None,
    }
}
