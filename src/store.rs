use crate::model::{AttendanceRecord, AttendanceStatus, RecordFields, Student, StudentFields};
use chrono::NaiveDate;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} already exists for {key}")]
    UniqueViolation { entity: &'static str, key: String },
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("constraint failed: {0}")]
    Constraint(String),
    /// The store cannot serve any further request; callers stop issuing work.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::UniqueViolation { .. } => "unique_violation",
            StoreError::NotFound { .. } => "not_found",
            StoreError::Constraint(_) => "constraint_failed",
            StoreError::Unavailable(_) => "store_unavailable",
            StoreError::Query(_) => "db_query_failed",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    fn from_sqlite(e: rusqlite::Error, entity: &'static str, key: impl Into<String>) -> Self {
        if let rusqlite::Error::SqliteFailure(f, msg) = &e {
            match f.code {
                ErrorCode::ConstraintViolation => {
                    if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    {
                        return StoreError::UniqueViolation {
                            entity,
                            key: key.into(),
                        };
                    }
                    return StoreError::Constraint(
                        msg.clone().unwrap_or_else(|| f.to_string()),
                    );
                }
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::NotADatabase
                | ErrorCode::DiskFull
                | ErrorCode::ReadOnly => return StoreError::Unavailable(e.to_string()),
                _ => {}
            }
        }
        StoreError::Query(e.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub student_id: Option<String>,
    pub date: Option<NaiveDate>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }
}

/// Persistence for students and attendance records.
///
/// Implementations must reject a second record for the same
/// `(student_id, date)` with [`StoreError::UniqueViolation`].
pub trait AttendanceStore {
    fn find_students(&self) -> Result<Vec<Student>, StoreError>;
    fn find_student(&self, id: &str) -> Result<Option<Student>, StoreError>;
    fn create_student(&mut self, fields: &StudentFields) -> Result<Student, StoreError>;
    fn update_student(&mut self, id: &str, fields: &StudentFields) -> Result<Student, StoreError>;
    fn delete_student(&mut self, id: &str) -> Result<(), StoreError>;

    fn find_records(&self, filter: &RecordFilter) -> Result<Vec<AttendanceRecord>, StoreError>;
    fn find_record(&self, id: &str) -> Result<Option<AttendanceRecord>, StoreError>;
    fn create_record(&mut self, fields: &RecordFields) -> Result<AttendanceRecord, StoreError>;
    fn update_record(
        &mut self,
        id: &str,
        fields: &RecordFields,
    ) -> Result<AttendanceRecord, StoreError>;
    fn delete_record(&mut self, id: &str) -> Result<(), StoreError>;
    fn delete_records_on(&mut self, date: NaiveDate) -> Result<usize, StoreError>;
}

pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        name: r.get(1)?,
        roll_no: r.get(2)?,
        class_name: r.get(3)?,
        section: r.get(4)?,
    })
}

fn record_from_row(r: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let raw_date: String = r.get(2)?;
    let date = NaiveDate::parse_from_str(&raw_date, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let raw_status: String = r.get(3)?;
    let status = raw_status.parse::<AttendanceStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })?;
    Ok(AttendanceRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        date,
        status,
    })
}

fn record_key(fields: &RecordFields) -> String {
    format!("student {} on {}", fields.student_id, fields.date)
}

impl AttendanceStore for SqliteStore<'_> {
    fn find_students(&self) -> Result<Vec<Student>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, roll_no, class_name, section
                 FROM students
                 ORDER BY roll_no, name",
            )
            .map_err(|e| StoreError::from_sqlite(e, "student", "*"))?;
        stmt.query_map([], student_from_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| StoreError::from_sqlite(e, "student", "*"))
    }

    fn find_student(&self, id: &str) -> Result<Option<Student>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, name, roll_no, class_name, section FROM students WHERE id = ?",
                [id],
                student_from_row,
            )
            .optional()
            .map_err(|e| StoreError::from_sqlite(e, "student", id))
    }

    fn create_student(&mut self, fields: &StudentFields) -> Result<Student, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO students(id, name, roll_no, class_name, section)
                 VALUES(?, ?, ?, ?, ?)",
                (
                    &id,
                    &fields.name,
                    &fields.roll_no,
                    &fields.class_name,
                    &fields.section,
                ),
            )
            .map_err(|e| {
                StoreError::from_sqlite(e, "student", format!("roll no {}", fields.roll_no))
            })?;
        Ok(Student {
            id,
            name: fields.name.clone(),
            roll_no: fields.roll_no.clone(),
            class_name: fields.class_name.clone(),
            section: fields.section.clone(),
        })
    }

    fn update_student(&mut self, id: &str, fields: &StudentFields) -> Result<Student, StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE students
                 SET name = ?, roll_no = ?, class_name = ?, section = ?
                 WHERE id = ?",
                (
                    &fields.name,
                    &fields.roll_no,
                    &fields.class_name,
                    &fields.section,
                    id,
                ),
            )
            .map_err(|e| {
                StoreError::from_sqlite(e, "student", format!("roll no {}", fields.roll_no))
            })?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "student",
                id: id.to_string(),
            });
        }
        Ok(Student {
            id: id.to_string(),
            name: fields.name.clone(),
            roll_no: fields.roll_no.clone(),
            class_name: fields.class_name.clone(),
            section: fields.section.clone(),
        })
    }

    fn delete_student(&mut self, id: &str) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM students WHERE id = ?", [id])
            .map_err(|e| StoreError::from_sqlite(e, "student", id))?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "student",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn find_records(&self, filter: &RecordFilter) -> Result<Vec<AttendanceRecord>, StoreError> {
        let date = filter.date.map(|d| d.format("%Y-%m-%d").to_string());
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, student_id, date, status
                 FROM attendance
                 WHERE (?1 IS NULL OR student_id = ?1)
                   AND (?2 IS NULL OR date = ?2)
                 ORDER BY date, student_id",
            )
            .map_err(|e| StoreError::from_sqlite(e, "attendance", "*"))?;
        stmt.query_map((&filter.student_id, &date), record_from_row)
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(|e| StoreError::from_sqlite(e, "attendance", "*"))
    }

    fn find_record(&self, id: &str) -> Result<Option<AttendanceRecord>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, student_id, date, status FROM attendance WHERE id = ?",
                [id],
                record_from_row,
            )
            .optional()
            .map_err(|e| StoreError::from_sqlite(e, "attendance", id))
    }

    fn create_record(&mut self, fields: &RecordFields) -> Result<AttendanceRecord, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO attendance(id, student_id, date, status) VALUES(?, ?, ?, ?)",
                (
                    &id,
                    &fields.student_id,
                    fields.date.format("%Y-%m-%d").to_string(),
                    fields.status.as_str(),
                ),
            )
            .map_err(|e| StoreError::from_sqlite(e, "attendance", record_key(fields)))?;
        Ok(AttendanceRecord {
            id,
            student_id: fields.student_id.clone(),
            date: fields.date,
            status: fields.status,
        })
    }

    fn update_record(
        &mut self,
        id: &str,
        fields: &RecordFields,
    ) -> Result<AttendanceRecord, StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE attendance SET student_id = ?, date = ?, status = ? WHERE id = ?",
                (
                    &fields.student_id,
                    fields.date.format("%Y-%m-%d").to_string(),
                    fields.status.as_str(),
                    id,
                ),
            )
            .map_err(|e| StoreError::from_sqlite(e, "attendance", record_key(fields)))?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "attendance",
                id: id.to_string(),
            });
        }
        Ok(AttendanceRecord {
            id: id.to_string(),
            student_id: fields.student_id.clone(),
            date: fields.date,
            status: fields.status,
        })
    }

    fn delete_record(&mut self, id: &str) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM attendance WHERE id = ?", [id])
            .map_err(|e| StoreError::from_sqlite(e, "attendance", id))?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "attendance",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn delete_records_on(&mut self, date: NaiveDate) -> Result<usize, StoreError> {
        let key = date.format("%Y-%m-%d").to_string();
        self.conn
            .execute("DELETE FROM attendance WHERE date = ?", [&key])
            .map_err(|e| StoreError::from_sqlite(e, "attendance", key.clone()))
    }
}
