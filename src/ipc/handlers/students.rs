use crate::ipc::helpers::{
    get_optional_str, get_required_str, student_json, with_workspace, Ctx, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Student, StudentFields};
use crate::session::require_teacher;
use crate::store::AttendanceStore;
use serde_json::json;

/// Builds writable fields from `params`, falling back to `base` for keys the
/// caller left out. Without a base every required key must be present.
pub fn parse_student_fields(
    params: &serde_json::Value,
    base: Option<&Student>,
) -> Result<StudentFields, HandlerErr> {
    let pick = |key: &str, current: Option<&String>| -> Result<String, HandlerErr> {
        match (params.get(key), current) {
            (None, Some(c)) => Ok(c.clone()),
            _ => get_required_str(params, key),
        }
    };
    let name = pick("name", base.map(|s| &s.name))?;
    let roll_no = pick("rollNo", base.map(|s| &s.roll_no))?;
    let class_name = pick("class", base.map(|s| &s.class_name))?;
    let section = match params.get("section") {
        Some(_) => get_optional_str(params, "section"),
        None => base.and_then(|s| s.section.clone()),
    };
    Ok(StudentFields {
        name,
        roll_no,
        class_name,
        section,
    })
}

fn conflict_on_roll_no(e: HandlerErr, roll_no: &str) -> HandlerErr {
    if e.code == "conflict" {
        return HandlerErr::new("conflict", format!("roll number {} is already taken", roll_no))
            .with_details(json!({ "rollNo": roll_no }));
    }
    e
}

fn students_list(ctx: &Ctx<'_>) -> Result<serde_json::Value, HandlerErr> {
    let students = ctx.store().find_students()?;
    let rows: Vec<serde_json::Value> = students.iter().map(student_json).collect();
    Ok(json!({ "students": rows }))
}

fn students_create(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_teacher(ctx.session)?;
    let fields = parse_student_fields(params, None)?;
    let student = ctx
        .store()
        .create_student(&fields)
        .map_err(|e| conflict_on_roll_no(e.into(), &fields.roll_no))?;
    tracing::info!(student_id = %student.id, roll_no = %student.roll_no, "student created");
    Ok(json!({ "studentId": student.id, "student": student_json(&student) }))
}

fn students_update(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_teacher(ctx.session)?;
    let student_id = get_required_str(params, "studentId")?;
    let patch = params
        .get("patch")
        .filter(|v| v.is_object())
        .ok_or_else(|| HandlerErr::bad_params("missing patch"))?;
    let mut store = ctx.store();
    let Some(current) = store.find_student(&student_id)? else {
        return Err(HandlerErr::new("not_found", "student not found"));
    };
    let fields = parse_student_fields(patch, Some(&current))?;
    let student = store
        .update_student(&student_id, &fields)
        .map_err(|e| conflict_on_roll_no(e.into(), &fields.roll_no))?;
    Ok(json!({ "student": student_json(&student) }))
}

fn students_delete(ctx: &Ctx<'_>, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_teacher(ctx.session)?;
    let student_id = get_required_str(params, "studentId")?;
    ctx.store().delete_student(&student_id)?;
    tracing::info!(student_id = %student_id, "student deleted with their attendance");
    Ok(json!({ "ok": true }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_workspace(state, req, |ctx, _| students_list(ctx))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_workspace(state, req, students_create)
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_workspace(state, req, students_update)
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_workspace(state, req, students_delete)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_requires_every_field_but_section() {
        let fields = parse_student_fields(
            &json!({ "name": " Asha ", "rollNo": "12", "class": "8", "section": "" }),
            None,
        )
        .expect("fields");
        assert_eq!(fields.name, "Asha");
        assert_eq!(fields.section, None);

        let missing = parse_student_fields(&json!({ "name": "Asha", "class": "8" }), None);
        assert!(matches!(missing, Err(e) if e.message == "missing rollNo"));
    }

    #[test]
    fn patch_keeps_unspecified_fields() {
        let base = Student {
            id: "s1".to_string(),
            name: "Asha".to_string(),
            roll_no: "12".to_string(),
            class_name: "8".to_string(),
            section: Some("B".to_string()),
        };
        let fields = parse_student_fields(&json!({ "class": "9" }), Some(&base)).expect("patch");
        assert_eq!(fields.name, "Asha");
        assert_eq!(fields.class_name, "9");
        assert_eq!(fields.section.as_deref(), Some("B"));

        let cleared = parse_student_fields(&json!({ "section": null }), Some(&base)).expect("patch");
        assert_eq!(cleared.section, None);

        let blanked = parse_student_fields(&json!({ "name": "  " }), Some(&base));
        assert!(blanked.is_err());
    }
}
