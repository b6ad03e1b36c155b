use crate::dates;
use crate::ipc::helpers::{
    get_optional_status, get_optional_str, get_required_date, get_required_str,
    get_student_ref, record_json, with_workspace, Ctx, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceStatus, CellKey, RecordFields, Student};
use crate::reconcile::{self, CellAction, CellFailure, ReconcilePlan, SheetRange};
use crate::session::require_teacher;
use crate::stats;
use crate::store::{AttendanceStore, RecordFilter, StoreError};
use serde_json::json;
use std::collections::HashMap;

fn students_by_id(roster: &[Student]) -> HashMap<&str, &Student> {
    roster.iter().map(|s| (s.id.as_str(), s)).collect()
}

fn attendance_list(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let populate = params
        .get("populate")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let store = ctx.store();
    let records = store.find_records(&RecordFilter::all())?;
    let roster = if populate {
        store.find_students()?
    } else {
        Vec::new()
    };
    let by_id = students_by_id(&roster);
    let rows: Vec<serde_json::Value> = records
        .iter()
        .map(|r| record_json(r, by_id.get(r.student_id.as_str()).copied()))
        .collect();
    Ok(json!({ "records": rows }))
}

/// A duplicate create is recoverable: the caller can retry as an update once
/// it knows the id already holding the cell.
fn duplicate_cell_err<S: AttendanceStore>(store: &S, fields: &RecordFields, e: StoreError) -> HandlerErr {
    let existing_id = store
        .find_records(&RecordFilter {
            student_id: Some(fields.student_id.clone()),
            date: Some(fields.date),
        })
        .ok()
        .and_then(|rows| rows.into_iter().next())
        .map(|r| r.id);
    HandlerErr::new("conflict", e.to_string()).with_details(json!({
        "studentId": fields.student_id,
        "date": dates::format_date(fields.date),
        "existingId": existing_id,
    }))
}

fn attendance_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_teacher(ctx.session)?;
    let student_id = get_student_ref(params, "student")?
        .ok_or_else(|| HandlerErr::bad_params("missing student"))?;
    let fields = RecordFields {
        student_id,
        date: get_required_date(params, "date", ctx.tz)?,
        status: get_optional_status(params, "status")?.unwrap_or_default(),
    };
    let mut store = ctx.store();
    match store.create_record(&fields) {
        Ok(record) => Ok(json!({ "record": record_json(&record, None) })),
        Err(e @ StoreError::UniqueViolation { .. }) => Err(duplicate_cell_err(&store, &fields, e)),
        Err(e) => Err(e.into()),
    }
}

fn attendance_update(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_teacher(ctx.session)?;
    let record_id = get_required_str(params, "recordId")?;
    let mut store = ctx.store();
    let Some(current) = store.find_record(&record_id)? else {
        return Err(HandlerErr::new("not_found", "attendance record not found"));
    };
    let date = match get_optional_str(params, "date") {
        Some(raw) => dates::parse_wire_date(&raw, ctx.tz)
            .map_err(|e| HandlerErr::bad_params(format!("date: {}", e)))?,
        None => current.date,
    };
    let fields = RecordFields {
        student_id: get_student_ref(params, "student")?.unwrap_or(current.student_id),
        date,
        status: get_optional_status(params, "status")?.unwrap_or(current.status),
    };
    match store.update_record(&record_id, &fields) {
        Ok(record) => Ok(json!({ "record": record_json(&record, None) })),
        Err(e @ StoreError::UniqueViolation { .. }) => Err(duplicate_cell_err(&store, &fields, e)),
        Err(e) => Err(e.into()),
    }
}

fn attendance_delete(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_teacher(ctx.session)?;
    let record_id = get_required_str(params, "recordId")?;
    ctx.store().delete_record(&record_id)?;
    Ok(json!({ "ok": true }))
}

fn attendance_delete_by_date(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_teacher(ctx.session)?;
    let date = get_required_date(params, "date", ctx.tz)?;
    let deleted = ctx.store().delete_records_on(date)?;
    tracing::info!(date = %date, deleted, "attendance deleted for date");
    Ok(json!({ "date": dates::format_date(date), "deleted": deleted }))
}

fn attendance_by_date(ctx: &Ctx<'_>) -> Result<serde_json::Value, HandlerErr> {
    let store = ctx.store();
    let records = store.find_records(&RecordFilter::all())?;
    let roster = store.find_students()?;
    let by_id = students_by_id(&roster);
    let days: Vec<serde_json::Value> = stats::group_by_date(&records)
        .into_iter()
        .map(|(date, rows)| {
            let rows: Vec<serde_json::Value> = rows
                .into_iter()
                .map(|r| {
                    json!({
                        "id": r.id,
                        "studentId": r.student_id,
                        "studentName": by_id.get(r.student_id.as_str()).map(|s| s.name.clone()),
                        "status": r.status,
                    })
                })
                .collect();
            json!({ "date": dates::format_date(date), "records": rows })
        })
        .collect();
    Ok(json!({ "days": days }))
}

/// Validates the range and roster, then reconciles against one snapshot.
/// Nothing is written here.
fn build_sheet(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<(SheetRange, Vec<Student>, ReconcilePlan), HandlerErr> {
    let today = ctx.today();
    let range = SheetRange::parse(
        get_optional_str(params, "startDate").as_deref(),
        get_optional_str(params, "endDate").as_deref(),
        ctx.tz,
        today,
        ctx.config.max_sheet_days,
    )?;
    let store = ctx.store();
    let roster: Vec<Student> = store
        .find_students()?
        .into_iter()
        .filter(|s| s.has_valid_id())
        .collect();
    if roster.is_empty() {
        return Err(HandlerErr::new(
            "empty_roster",
            "no students found; add students first",
        ));
    }
    let existing = store.find_records(&RecordFilter::all())?;
    let plan = reconcile::reconcile(&roster, &range.dates(), &existing, today);
    Ok((range, roster, plan))
}

fn attendance_sheet_open(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_teacher(ctx.session)?;
    let (range, roster, plan) = build_sheet(ctx, params)?;
    let days = range.dates();

    let mut counts: HashMap<CellAction, usize> = HashMap::new();
    for cell in plan.cells() {
        *counts.entry(cell.action).or_default() += 1;
    }

    let rows: Vec<serde_json::Value> = roster
        .iter()
        .map(|s| {
            let cells: Vec<serde_json::Value> = days
                .iter()
                .filter_map(|&d| plan.get(&CellKey::new(s.id.clone(), d)))
                .map(|c| {
                    json!({
                        "date": dates::format_date(c.date),
                        "status": c.status,
                        "action": c.action,
                        "existingId": c.existing_id,
                        "editable": c.editable,
                    })
                })
                .collect();
            json!({
                "studentId": s.id,
                "name": s.name,
                "rollNo": s.roll_no,
                "cells": cells,
            })
        })
        .collect();

    Ok(json!({
        "startDate": dates::format_date(range.start),
        "endDate": dates::format_date(range.end),
        "today": dates::format_date(ctx.today()),
        "dates": days.iter().map(|d| dates::format_date(*d)).collect::<Vec<_>>(),
        "rows": rows,
        "cellCount": plan.len(),
        "summary": {
            "create": counts.get(&CellAction::Create).copied().unwrap_or(0),
            "update": counts.get(&CellAction::Update).copied().unwrap_or(0),
            "noop": counts.get(&CellAction::Noop).copied().unwrap_or(0),
        }
    }))
}

fn edit_failure(student_id: &str, date: &str, code: &str, message: impl Into<String>) -> CellFailure {
    CellFailure {
        student_id: student_id.to_string(),
        date: date.to_string(),
        code: code.to_string(),
        message: message.into(),
    }
}

/// Applies caller edits onto a freshly reconciled plan. A rejected edit that
/// names a sheet cell removes that cell from the plan, so it is reported once
/// as a failure and never written with its default status.
fn apply_edits(
    plan: &mut ReconcilePlan,
    edits: &[serde_json::Value],
    ctx: &Ctx<'_>,
) -> Vec<CellFailure> {
    let mut rejected = Vec::new();
    for (i, edit) in edits.iter().enumerate() {
        let student_id = edit
            .get("studentId")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        let raw_date = edit.get("date").and_then(|v| v.as_str()).unwrap_or("").trim();
        if student_id.is_empty() {
            rejected.push(edit_failure(
                student_id,
                raw_date,
                "bad_params",
                format!("edit at index {} missing studentId", i),
            ));
            continue;
        }
        let date = match dates::parse_wire_date(raw_date, ctx.tz) {
            Ok(d) => d,
            Err(e) => {
                rejected.push(edit_failure(student_id, raw_date, "bad_params", e.to_string()));
                continue;
            }
        };
        let key = CellKey::new(student_id, date);
        let day = dates::format_date(date);
        let status = match edit
            .get("status")
            .and_then(|v| v.as_str())
            .map(|s| s.parse::<AttendanceStatus>())
        {
            Some(Ok(s)) => s,
            Some(Err(msg)) => {
                plan.exclude(&key);
                rejected.push(edit_failure(student_id, &day, "bad_params", msg));
                continue;
            }
            None => {
                plan.exclude(&key);
                rejected.push(edit_failure(
                    student_id,
                    &day,
                    "bad_params",
                    format!("edit at index {} missing status", i),
                ));
                continue;
            }
        };
        if let Err(e) = plan.set_status(&key, status) {
            plan.exclude(&key);
            rejected.push(edit_failure(student_id, &day, e.code(), e.to_string()));
        }
    }
    rejected
}

fn attendance_sheet_commit(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    require_teacher(ctx.session)?;
    let edits: &[serde_json::Value] = match params.get("cells") {
        None | Some(serde_json::Value::Null) => &[],
        Some(v) => v
            .as_array()
            .map(|a| a.as_slice())
            .ok_or_else(|| HandlerErr::bad_params("cells must be an array"))?,
    };
    if edits.len() > ctx.config.max_commit_cells {
        return Err(HandlerErr::bad_params(
            format!(
                "commit payload exceeds max cells: {} > {}",
                edits.len(),
                ctx.config.max_commit_cells
            ),
        ));
    }

    let (range, _roster, mut plan) = build_sheet(ctx, params)?;
    let rejected = apply_edits(&mut plan, edits, ctx);

    let mut store = ctx.store();
    let mut summary = reconcile::commit_plan(&mut store, &plan);
    summary.failures.extend(rejected);

    tracing::info!(
        start = %range.start,
        end = %range.end,
        created = summary.created,
        updated = summary.updated,
        skipped = summary.skipped,
        not_attempted = summary.not_attempted,
        failed = summary.failed(),
        "attendance sheet committed"
    );

    Ok(json!({
        "ok": summary.is_clean(),
        "created": summary.created,
        "updated": summary.updated,
        "skipped": summary.skipped,
        "notAttempted": summary.not_attempted,
        "failed": summary.failed(),
        "errors": summary.failures,
    }))
}

fn stats_json(student: Option<&Student>, student_id: &str, s: &stats::AttendanceStats) -> serde_json::Value {
    json!({
        "studentId": student_id,
        "name": student.map(|st| st.name.clone()),
        "rollNo": student.map(|st| st.roll_no.clone()),
        "totalDays": s.total_days,
        "present": s.present,
        "absent": s.absent,
        "leave": s.leave,
        "recordedDays": s.recorded_days,
        "missingDays": s.missing_days,
        "effectivePresent": s.effective_present,
        "percentage": s.percentage,
        "percentageText": s.percentage_text(),
    })
}

pub fn stats_to_json(student: &Student, s: &stats::AttendanceStats) -> serde_json::Value {
    stats_json(Some(student), &student.id, s)
}

fn attendance_stats(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let store = ctx.store();
    let records = store.find_records(&RecordFilter::all())?;
    let roster = store.find_students()?;

    if let Some(student_id) = get_optional_str(params, "studentId") {
        let Some(student) = roster.iter().find(|s| s.id == student_id) else {
            return Err(HandlerErr::new("not_found", "student not found"));
        };
        let s = stats::compute_stats(&student.id, &records);
        return Ok(json!({
            "totalDays": s.total_days,
            "students": [stats_to_json(student, &s)],
        }));
    }

    let by_id = students_by_id(&roster);
    let rows: Vec<serde_json::Value> = stats::compute_roster_stats(&roster, &records)
        .iter()
        .map(|(id, s)| stats_json(by_id.get(id.as_str()).copied(), id, s))
        .collect();
    Ok(json!({
        "totalDays": stats::system_dates(&records).len(),
        "students": rows,
    }))
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_workspace(state, req, attendance_list)
}

fn handle_attendance_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_workspace(state, req, attendance_create)
}

fn handle_attendance_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_workspace(state, req, attendance_update)
}

fn handle_attendance_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_workspace(state, req, attendance_delete)
}

fn handle_attendance_delete_by_date(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_workspace(state, req, attendance_delete_by_date)
}

fn handle_attendance_by_date(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_workspace(state, req, |ctx, _| attendance_by_date(ctx))
}

fn handle_attendance_sheet_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_workspace(state, req, attendance_sheet_open)
}

fn handle_attendance_sheet_commit(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_workspace(state, req, attendance_sheet_commit)
}

fn handle_attendance_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_workspace(state, req, attendance_stats)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.list" => Some(handle_attendance_list(state, req)),
        "attendance.create" => Some(handle_attendance_create(state, req)),
        "attendance.update" => Some(handle_attendance_update(state, req)),
        "attendance.delete" => Some(handle_attendance_delete(state, req)),
        "attendance.deleteByDate" => Some(handle_attendance_delete_by_date(state, req)),
        "attendance.byDate" => Some(handle_attendance_by_date(state, req)),
        "attendance.sheetOpen" => Some(handle_attendance_sheet_open(state, req)),
        "attendance.sheetCommit" => Some(handle_attendance_sheet_commit(state, req)),
        "attendance.stats" => Some(handle_attendance_stats(state, req)),
        _ => None,
    }
}
