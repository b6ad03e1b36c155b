use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    #[default]
    Present,
    Absent,
    Leave,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Leave => "leave",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "leave" => Ok(AttendanceStatus::Leave),
            other => Err(format!(
                "status must be present, absent or leave (got {:?})",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub roll_no: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub section: Option<String>,
}

impl Student {
    pub fn has_valid_id(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

/// Writable student columns. `roll_no` must be unique across the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentFields {
    pub name: String,
    pub roll_no: String,
    pub class_name: String,
    pub section: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

impl AttendanceRecord {
    pub fn key(&self) -> CellKey {
        CellKey::new(self.student_id.clone(), self.date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFields {
    pub student_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub student_id: String,
    pub date: NaiveDate,
}

impl CellKey {
    pub fn new(student_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            student_id: student_id.into(),
            date,
        }
    }
}

/// A student reference as it appears on the wire: either a bare id or a
/// populated student object. Callers only ever see the id.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StudentRef {
    Id(String),
    Populated(PopulatedStudent),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PopulatedStudent {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
}

impl StudentRef {
    pub fn into_id(self) -> Option<String> {
        let id = match self {
            StudentRef::Id(id) => id,
            StudentRef::Populated(p) => p.id,
        };
        let id = id.trim().to_string();
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }
}
