use crate::ipc::handlers::attendance::stats_to_json;
use crate::ipc::handlers::students::parse_student_fields;
use crate::ipc::helpers::{student_json, with_workspace, Ctx, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::require_session;
use crate::stats;
use crate::store::{AttendanceStore, RecordFilter};
use serde_json::json;

fn profile_get(ctx: &Ctx<'_>) -> Result<serde_json::Value, HandlerErr> {
    let session = require_session(ctx.session)?;
    let store = ctx.store();
    let roster = store.find_students()?;
    let Some(profile) = session.find_own_profile(&roster) else {
        return Ok(json!({ "profile": null, "stats": null, "history": [] }));
    };
    let records = store.find_records(&RecordFilter::all())?;
    let s = stats::compute_stats(&profile.id, &records);
    Ok(json!({
        "profile": student_json(profile),
        "stats": stats_to_json(profile, &s),
        "history": stats::student_history(&profile.id, &records),
    }))
}

fn profile_save(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session = require_session(ctx.session)?;
    let mut store = ctx.store();
    let roster = store.find_students()?;
    let (student, created) = match session.find_own_profile(&roster) {
        Some(current) => {
            let fields = parse_student_fields(params, Some(current))?;
            (store.update_student(&current.id, &fields)?, false)
        }
        None => {
            let fields = parse_student_fields(params, None)?;
            (store.create_student(&fields)?, true)
        }
    };
    tracing::info!(
        username = %session.username,
        email = ?session.email,
        student_id = %student.id,
        created,
        "profile saved"
    );
    Ok(json!({ "created": created, "profile": student_json(&student) }))
}

fn handle_profile_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_workspace(state, req, |ctx, _| profile_get(ctx))
}

fn handle_profile_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_workspace(state, req, profile_save)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "profile.get" => Some(handle_profile_get(state, req)),
        "profile.save" => Some(handle_profile_save(state, req)),
        _ => None,
    }
}
