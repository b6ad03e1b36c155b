use chrono::NaiveDate;
use chrono_tz::Tz;
use rusqlite::Connection;
use serde_json::json;

use crate::config::AttendConfig;
use crate::dates;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceRecord, AttendanceStatus, Student, StudentRef};
use crate::reconcile::RangeError;
use crate::session::{Forbidden, Session};
use crate::store::{SqliteStore, StoreError};

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        let code = match &e {
            StoreError::UniqueViolation { .. } => "conflict",
            StoreError::NotFound { .. } => "not_found",
            StoreError::Constraint(_) => "db_update_failed",
            StoreError::Unavailable(_) => "store_unavailable",
            StoreError::Query(_) => "db_query_failed",
        };
        HandlerErr::new(code, e.to_string())
    }
}

impl From<Forbidden> for HandlerErr {
    fn from(e: Forbidden) -> Self {
        HandlerErr::new("forbidden", e.0)
    }
}

impl From<RangeError> for HandlerErr {
    fn from(e: RangeError) -> Self {
        HandlerErr::bad_params(e.to_string())
    }
}

/// Everything a handler needs once a workspace is open.
pub struct Ctx<'a> {
    pub conn: &'a Connection,
    pub config: &'a AttendConfig,
    pub tz: Tz,
    pub session: Option<&'a Session>,
}

impl<'a> Ctx<'a> {
    pub fn store(&self) -> SqliteStore<'a> {
        SqliteStore::new(self.conn)
    }

    pub fn today(&self) -> NaiveDate {
        dates::today_in(self.tz)
    }
}

pub fn with_workspace<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Ctx<'_>, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let ctx = Ctx {
        conn,
        config: &state.config,
        tz: state.tz,
        session: req.session.as_ref(),
    };
    match f(&ctx, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => {
            tracing::debug!(method = %req.method, code = error.code, "request failed: {}", error.message);
            error.response(&req.id)
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    get_optional_str(params, key).ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Trimmed string parameter; blank counts as absent.
pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn get_required_date(
    params: &serde_json::Value,
    key: &str,
    tz: Tz,
) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    dates::parse_wire_date(&raw, tz)
        .map_err(|e| HandlerErr::bad_params(format!("{}: {}", key, e)))
}

pub fn get_optional_status(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<AttendanceStatus>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::bad_params(format!("{} must be a string", key)));
            };
            s.parse::<AttendanceStatus>()
                .map(Some)
                .map_err(HandlerErr::bad_params)
        }
    }
}

/// Reads a student reference (bare id or populated object) as a plain id.
pub fn get_student_ref(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => {
            let parsed: StudentRef = serde_json::from_value(v.clone()).map_err(|_| {
                HandlerErr::bad_params(format!("{} must be an id or a student object", key))
            })?;
            parsed
                .into_id()
                .map(Some)
                .ok_or_else(|| HandlerErr::bad_params(format!("{} has an empty id", key)))
        }
    }
}

pub fn student_json(s: &Student) -> serde_json::Value {
    json!(s)
}

pub fn record_json(r: &AttendanceRecord, populated: Option<&Student>) -> serde_json::Value {
    let student = match populated {
        Some(s) => student_json(s),
        None => json!(r.student_id),
    };
    json!({
        "id": r.id,
        "student": student,
        "date": dates::format_date(r.date),
        "status": r.status,
    })
}
