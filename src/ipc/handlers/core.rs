use crate::dates;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono_tz::Tz;
use rusqlite::Connection;
use serde_json::json;
use std::path::{Path, PathBuf};

const TIMEZONE_SETTING: &str = "workspace.timezone";

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "timezone": state.tz.name(),
            "today": dates::format_date(dates::today_in(state.tz)),
        }),
    )
}

/// Dates already stored were normalized in the zone recorded on first open,
/// so that zone wins over the configured one for an existing workspace.
fn resolve_workspace_tz(conn: &Connection, configured: Tz) -> anyhow::Result<Tz> {
    let recorded = db::settings_get_json(conn, TIMEZONE_SETTING)?
        .and_then(|v| v.as_str().map(|s| s.to_string()));
    match recorded {
        Some(name) => {
            let tz = dates::parse_timezone(&name).map_err(anyhow::Error::msg)?;
            if tz != configured {
                tracing::warn!(
                    recorded = %tz.name(),
                    configured = %configured.name(),
                    "workspace keeps the time zone it was created with"
                );
            }
            Ok(tz)
        }
        None => {
            db::settings_set_json(conn, TIMEZONE_SETTING, &json!(configured.name()))?;
            Ok(configured)
        }
    }
}

pub fn open_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(path)?;
    let configured = state.config.tz()?;
    let tz = resolve_workspace_tz(&conn, configured)?;
    tracing::info!(workspace = %path.to_string_lossy(), timezone = %tz.name(), "workspace opened");
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    state.tz = tz;
    Ok(())
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match open_workspace(state, &path) {
        Ok(()) => ok(
            &req.id,
            json!({
                "workspacePath": path.to_string_lossy(),
                "timezone": state.tz.name(),
            }),
        ),
        Err(e) => err(&req.id, "db_open_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
