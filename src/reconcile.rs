use crate::dates;
use crate::model::{AttendanceRecord, AttendanceStatus, CellKey, RecordFields, Student};
use crate::store::{AttendanceStore, StoreError};
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Per-cell default used by the attendance sheet: Sundays are leave days.
///
/// Statistics count every missing day as present instead; see `stats`.
pub fn default_status(date: NaiveDate) -> AttendanceStatus {
    if dates::is_sunday(date) {
        AttendanceStatus::Leave
    } else {
        AttendanceStatus::Present
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("select both a start date and an end date")]
    MissingEndpoint,
    #[error("{field}: {source}")]
    BadDate {
        field: &'static str,
        source: dates::DateError,
    },
    #[error("start date must not be after end date")]
    StartAfterEnd,
    #[error("start date cannot be in the future")]
    StartInFuture,
    #[error("range spans {days} days; at most {max} are allowed")]
    TooLong { days: usize, max: usize },
}

/// A validated, inclusive sheet range. The end may lie in the future so a
/// whole month can be laid out; only the start is bounded by `today`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SheetRange {
    pub fn parse(
        start: Option<&str>,
        end: Option<&str>,
        tz: Tz,
        today: NaiveDate,
        max_days: usize,
    ) -> Result<Self, RangeError> {
        let (Some(start), Some(end)) = (
            start.filter(|s| !s.trim().is_empty()),
            end.filter(|s| !s.trim().is_empty()),
        ) else {
            return Err(RangeError::MissingEndpoint);
        };
        let start = dates::parse_wire_date(start, tz).map_err(|source| RangeError::BadDate {
            field: "startDate",
            source,
        })?;
        let end = dates::parse_wire_date(end, tz).map_err(|source| RangeError::BadDate {
            field: "endDate",
            source,
        })?;
        if start > today {
            return Err(RangeError::StartInFuture);
        }
        if start > end {
            return Err(RangeError::StartAfterEnd);
        }
        let days = (end - start).num_days() as usize + 1;
        if days > max_days {
            return Err(RangeError::TooLong {
                days,
                max: max_days,
            });
        }
        Ok(Self { start, end })
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        dates::date_range(self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CellAction {
    Create,
    Update,
    Noop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCell {
    pub student_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub action: CellAction,
    pub existing_id: Option<String>,
    pub editable: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("no sheet cell for student {} on {}", .0.student_id, .0.date)]
    NotInPlan(CellKey),
    #[error("{} is in the future and cannot be marked yet", .0.date)]
    NotEditable(CellKey),
}

impl PlanError {
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::NotInPlan(_) => "not_in_plan",
            PlanError::NotEditable(_) => "not_editable",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcilePlan {
    cells: BTreeMap<CellKey, PlanCell>,
}

impl ReconcilePlan {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn get(&self, key: &CellKey) -> Option<&PlanCell> {
        self.cells.get(key)
    }

    pub fn cells(&self) -> impl Iterator<Item = &PlanCell> {
        self.cells.values()
    }

    /// Overrides the effective status of one editable cell. The action stays
    /// what reconciliation decided (create or update).
    pub fn set_status(&mut self, key: &CellKey, status: AttendanceStatus) -> Result<(), PlanError> {
        let Some(cell) = self.cells.get_mut(key) else {
            return Err(PlanError::NotInPlan(key.clone()));
        };
        if !cell.editable {
            return Err(PlanError::NotEditable(key.clone()));
        }
        cell.status = status;
        Ok(())
    }

    /// Drops a cell from the plan so a commit neither writes nor counts it.
    pub fn exclude(&mut self, key: &CellKey) -> Option<PlanCell> {
        self.cells.remove(key)
    }
}

/// Computes the effective status and the store action for every
/// `(student, date)` cell of a sheet.
///
/// `dates` is expected to be contiguous and ascending. Cells dated after
/// `today` are kept for display but marked non-editable with a `Noop` action.
pub fn reconcile(
    roster: &[Student],
    dates: &[NaiveDate],
    existing: &[AttendanceRecord],
    today: NaiveDate,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    if roster.is_empty() || dates.is_empty() {
        return plan;
    }

    let by_cell: HashMap<CellKey, &AttendanceRecord> =
        existing.iter().map(|r| (r.key(), r)).collect();

    for student in roster.iter().filter(|s| s.has_valid_id()) {
        for &date in dates {
            let key = CellKey::new(student.id.clone(), date);
            let found = by_cell.get(&key);
            let editable = date <= today;
            let (status, mut action, existing_id) = match found {
                Some(r) => (r.status, CellAction::Update, Some(r.id.clone())),
                None => (default_status(date), CellAction::Create, None),
            };
            if !editable {
                action = CellAction::Noop;
            }
            plan.cells.insert(
                key,
                PlanCell {
                    student_id: student.id.clone(),
                    date,
                    status,
                    action,
                    existing_id,
                    editable,
                },
            );
        }
    }
    plan
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellFailure {
    pub student_id: String,
    pub date: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub not_attempted: usize,
    pub failures: Vec<CellFailure>,
}

impl CommitSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.not_attempted == 0
    }
}

/// Writes every actionable cell independently.
///
/// There is no transaction around the batch: a failing cell is recorded and
/// the rest proceed, and committed cells stay committed. A fatal store error
/// stops issuing work; whatever was left is counted as not attempted.
/// Uniqueness violations are reported, never retried.
pub fn commit_plan<S: AttendanceStore + ?Sized>(store: &mut S, plan: &ReconcilePlan) -> CommitSummary {
    let mut summary = CommitSummary::default();
    let mut halted = false;

    for cell in plan.cells() {
        if cell.action == CellAction::Noop {
            summary.skipped += 1;
            continue;
        }
        if halted {
            summary.not_attempted += 1;
            continue;
        }
        let fields = RecordFields {
            student_id: cell.student_id.clone(),
            date: cell.date,
            status: cell.status,
        };
        let result = match (cell.action, cell.existing_id.as_deref()) {
            (CellAction::Update, Some(id)) => store.update_record(id, &fields).map(|_| false),
            _ => store.create_record(&fields).map(|_| true),
        };
        match result {
            Ok(true) => summary.created += 1,
            Ok(false) => summary.updated += 1,
            Err(e) => {
                tracing::warn!(
                    student_id = %cell.student_id,
                    date = %cell.date,
                    code = e.code(),
                    "attendance cell commit failed: {e}"
                );
                if e.is_fatal() {
                    halted = true;
                }
                summary.failures.push(cell_failure(cell, &e));
            }
        }
    }
    summary
}

fn cell_failure(cell: &PlanCell, e: &StoreError) -> CellFailure {
    CellFailure {
        student_id: cell.student_id.clone(),
        date: dates::format_date(cell.date),
        code: e.code().to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StudentFields;
    use crate::store::RecordFilter;
    use pretty_assertions::assert_eq;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).expect("valid date")
    }

    fn student(id: &str) -> Student {
        Student {
            id: id.to_string(),
            name: format!("Student {}", id),
            roll_no: id.to_string(),
            class_name: "8".to_string(),
            section: None,
        }
    }

    fn record(id: &str, student_id: &str, date: NaiveDate, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord {
            id: id.to_string(),
            student_id: student_id.to_string(),
            date,
            status,
        }
    }

    /// In-memory store that can be told to fail on particular cells.
    #[derive(Default)]
    struct FakeStore {
        records: Vec<AttendanceRecord>,
        next_id: usize,
        fail_on: Vec<(CellKey, fn() -> StoreError)>,
        calls: usize,
    }

    impl FakeStore {
        fn injected(&self, fields: &RecordFields) -> Option<StoreError> {
            let key = CellKey::new(fields.student_id.clone(), fields.date);
            self.fail_on.iter().find(|(k, _)| *k == key).map(|(_, f)| f())
        }
    }

    impl AttendanceStore for FakeStore {
        fn find_students(&self) -> Result<Vec<Student>, StoreError> {
            Ok(Vec::new())
        }
        fn find_student(&self, _id: &str) -> Result<Option<Student>, StoreError> {
            Ok(None)
        }
        fn create_student(&mut self, _fields: &StudentFields) -> Result<Student, StoreError> {
            Err(StoreError::Query("unsupported".to_string()))
        }
        fn update_student(&mut self, id: &str, _fields: &StudentFields) -> Result<Student, StoreError> {
            Err(StoreError::NotFound { entity: "student", id: id.to_string() })
        }
        fn delete_student(&mut self, id: &str) -> Result<(), StoreError> {
            Err(StoreError::NotFound { entity: "student", id: id.to_string() })
        }
        fn find_records(&self, _filter: &RecordFilter) -> Result<Vec<AttendanceRecord>, StoreError> {
            Ok(self.records.clone())
        }
        fn find_record(&self, id: &str) -> Result<Option<AttendanceRecord>, StoreError> {
            Ok(self.records.iter().find(|r| r.id == id).cloned())
        }
        fn create_record(&mut self, fields: &RecordFields) -> Result<AttendanceRecord, StoreError> {
            self.calls += 1;
            if let Some(e) = self.injected(fields) {
                return Err(e);
            }
            if self
                .records
                .iter()
                .any(|r| r.student_id == fields.student_id && r.date == fields.date)
            {
                return Err(StoreError::UniqueViolation {
                    entity: "attendance",
                    key: fields.student_id.clone(),
                });
            }
            self.next_id += 1;
            let r = record(&format!("r{}", self.next_id), &fields.student_id, fields.date, fields.status);
            self.records.push(r.clone());
            Ok(r)
        }
        fn update_record(&mut self, id: &str, fields: &RecordFields) -> Result<AttendanceRecord, StoreError> {
            self.calls += 1;
            if let Some(e) = self.injected(fields) {
                return Err(e);
            }
            let Some(r) = self.records.iter_mut().find(|r| r.id == id) else {
                return Err(StoreError::NotFound { entity: "attendance", id: id.to_string() });
            };
            r.status = fields.status;
            Ok(r.clone())
        }
        fn delete_record(&mut self, id: &str) -> Result<(), StoreError> {
            self.records.retain(|r| r.id != id);
            Ok(())
        }
        fn delete_records_on(&mut self, date: NaiveDate) -> Result<usize, StoreError> {
            let before = self.records.len();
            self.records.retain(|r| r.date != date);
            Ok(before - self.records.len())
        }
    }

    #[test]
    fn sheet_range_validation_fails_fast() {
        let today = d(2024, 1, 15);
        let parse = |s: Option<&str>, e: Option<&str>| SheetRange::parse(s, e, Tz::UTC, today, 62);

        assert_eq!(parse(None, Some("2024-01-10")), Err(RangeError::MissingEndpoint));
        assert_eq!(parse(Some(""), Some("2024-01-10")), Err(RangeError::MissingEndpoint));
        assert_eq!(
            parse(Some("2024-01-10"), Some("2024-01-09")),
            Err(RangeError::StartAfterEnd)
        );
        assert_eq!(
            parse(Some("2024-01-16"), Some("2024-01-20")),
            Err(RangeError::StartInFuture)
        );
        assert!(matches!(
            parse(Some("yesterday"), Some("2024-01-20")),
            Err(RangeError::BadDate { field: "startDate", .. })
        ));
        assert_eq!(
            parse(Some("2023-01-01"), Some("2024-01-01")),
            Err(RangeError::TooLong { days: 366, max: 62 })
        );

        let month = parse(Some("2024-01-01"), Some("2024-01-31")).expect("january");
        assert_eq!(month.dates().len(), 31);
        assert_eq!(month.dates()[0], d(2024, 1, 1));
    }

    #[test]
    fn default_status_is_leave_only_on_sundays() {
        let week = dates::date_range(d(2024, 1, 1), d(2024, 1, 14));
        for day in week {
            let expected = if dates::is_sunday(day) {
                AttendanceStatus::Leave
            } else {
                AttendanceStatus::Present
            };
            assert_eq!(default_status(day), expected, "{}", day);
        }
    }

    #[test]
    fn fresh_sheet_creates_every_cell_with_defaults() {
        let roster = vec![student("A"), student("B")];
        let days = vec![d(2024, 1, 7), d(2024, 1, 8)];
        let plan = reconcile(&roster, &days, &[], d(2024, 1, 31));

        let got: Vec<(String, NaiveDate, AttendanceStatus, CellAction)> = plan
            .cells()
            .map(|c| (c.student_id.clone(), c.date, c.status, c.action))
            .collect();
        assert_eq!(
            got,
            vec![
                ("A".to_string(), d(2024, 1, 7), AttendanceStatus::Leave, CellAction::Create),
                ("A".to_string(), d(2024, 1, 8), AttendanceStatus::Present, CellAction::Create),
                ("B".to_string(), d(2024, 1, 7), AttendanceStatus::Leave, CellAction::Create),
                ("B".to_string(), d(2024, 1, 8), AttendanceStatus::Present, CellAction::Create),
            ]
        );
        assert!(plan.cells().all(|c| c.editable && c.existing_id.is_none()));
    }

    #[test]
    fn existing_records_become_updates_with_stored_status() {
        let roster = vec![student("A")];
        let days = vec![d(2024, 1, 7), d(2024, 1, 8)];
        let existing = vec![record("r1", "A", d(2024, 1, 7), AttendanceStatus::Absent)];
        let plan = reconcile(&roster, &days, &existing, d(2024, 1, 31));

        let sunday = plan.get(&CellKey::new("A", d(2024, 1, 7))).expect("cell");
        assert_eq!(sunday.status, AttendanceStatus::Absent);
        assert_eq!(sunday.action, CellAction::Update);
        assert_eq!(sunday.existing_id.as_deref(), Some("r1"));

        let monday = plan.get(&CellKey::new("A", d(2024, 1, 8))).expect("cell");
        assert_eq!(monday.action, CellAction::Create);
    }

    #[test]
    fn empty_inputs_and_invalid_roster_ids_yield_nothing() {
        let days = vec![d(2024, 1, 8)];
        assert!(reconcile(&[], &days, &[], d(2024, 1, 31)).is_empty());
        assert!(reconcile(&[student("A")], &[], &[], d(2024, 1, 31)).is_empty());

        let reversed = dates::date_range(d(2024, 1, 9), d(2024, 1, 8));
        assert!(reconcile(&[student("A")], &reversed, &[], d(2024, 1, 31)).is_empty());

        let plan = reconcile(&[student(""), student("  "), student("B")], &days, &[], d(2024, 1, 31));
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn future_cells_are_display_only() {
        let roster = vec![student("A")];
        let days = dates::date_range(d(2024, 1, 8), d(2024, 1, 10));
        let existing = vec![record("r9", "A", d(2024, 1, 10), AttendanceStatus::Absent)];
        let mut plan = reconcile(&roster, &days, &existing, d(2024, 1, 8));

        let today = plan.get(&CellKey::new("A", d(2024, 1, 8))).expect("cell");
        assert!(today.editable);
        assert_eq!(today.action, CellAction::Create);

        let tomorrow = plan.get(&CellKey::new("A", d(2024, 1, 9))).expect("cell");
        assert!(!tomorrow.editable);
        assert_eq!(tomorrow.action, CellAction::Noop);
        assert_eq!(tomorrow.status, AttendanceStatus::Present);

        let stored_future = plan.get(&CellKey::new("A", d(2024, 1, 10))).expect("cell");
        assert_eq!(stored_future.status, AttendanceStatus::Absent);
        assert_eq!(stored_future.action, CellAction::Noop);

        assert_eq!(
            plan.set_status(&CellKey::new("A", d(2024, 1, 9)), AttendanceStatus::Absent),
            Err(PlanError::NotEditable(CellKey::new("A", d(2024, 1, 9))))
        );
        assert_eq!(
            plan.set_status(&CellKey::new("Z", d(2024, 1, 8)), AttendanceStatus::Absent)
                .map_err(|e| e.code()),
            Err("not_in_plan")
        );
    }

    #[test]
    fn commit_then_refetch_matches_plan() {
        let roster = vec![student("A"), student("B")];
        let days = dates::date_range(d(2024, 1, 6), d(2024, 1, 9));
        let mut store = FakeStore::default();
        store.records.push(record("old", "B", d(2024, 1, 8), AttendanceStatus::Leave));

        let existing = store.find_records(&RecordFilter::all()).expect("fetch");
        let mut plan = reconcile(&roster, &days, &existing, d(2024, 1, 8));
        plan.set_status(&CellKey::new("A", d(2024, 1, 6)), AttendanceStatus::Absent)
            .expect("edit");
        plan.set_status(&CellKey::new("B", d(2024, 1, 8)), AttendanceStatus::Present)
            .expect("edit");

        let summary = commit_plan(&mut store, &plan);
        assert_eq!(summary.created, 5);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.skipped, 2);
        assert!(summary.is_clean());

        let after = store.find_records(&RecordFilter::all()).expect("refetch");
        for cell in plan.cells().filter(|c| c.editable) {
            let stored = after
                .iter()
                .find(|r| r.student_id == cell.student_id && r.date == cell.date)
                .expect("stored cell");
            assert_eq!(stored.status, cell.status, "{} {}", cell.student_id, cell.date);
        }
    }

    #[test]
    fn excluded_cells_are_neither_written_nor_counted() {
        let roster = vec![student("A"), student("B")];
        let days = vec![d(2024, 1, 8)];
        let mut store = FakeStore::default();

        let mut plan = reconcile(&roster, &days, &[], d(2024, 1, 8));
        let dropped = plan.exclude(&CellKey::new("A", d(2024, 1, 8))).expect("cell");
        assert_eq!(dropped.action, CellAction::Create);
        assert!(plan.exclude(&CellKey::new("A", d(2024, 1, 8))).is_none());

        let summary = commit_plan(&mut store, &plan);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, 0);
        assert_eq!(store.calls, 1);
        assert_eq!(store.records[0].student_id, "B");
    }

    #[test]
    fn per_cell_failures_do_not_block_or_roll_back_others() {
        let roster = vec![student("A"), student("B")];
        let days = vec![d(2024, 1, 8)];
        let mut store = FakeStore::default();
        let duplicate: fn() -> StoreError = || StoreError::UniqueViolation {
            entity: "attendance",
            key: "A".to_string(),
        };
        store.fail_on.push((CellKey::new("A", d(2024, 1, 8)), duplicate));

        let plan = reconcile(&roster, &days, &[], d(2024, 1, 8));
        let summary = commit_plan(&mut store, &plan);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.failures[0].code, "unique_violation");
        assert_eq!(summary.failures[0].date, "2024-01-08");
        // No automatic retry after the violation.
        assert_eq!(store.calls, 2);
        assert_eq!(store.records.len(), 1);
    }

    #[test]
    fn fatal_error_stops_issuing_remaining_cells() {
        let roster = vec![student("A"), student("B"), student("C")];
        let days = vec![d(2024, 1, 8)];
        let mut store = FakeStore::default();
        let io_error: fn() -> StoreError = || StoreError::Unavailable("disk I/O error".to_string());
        store.fail_on.push((CellKey::new("B", d(2024, 1, 8)), io_error));

        let plan = reconcile(&roster, &days, &[], d(2024, 1, 8));
        let summary = commit_plan(&mut store, &plan);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed(), 1);
        assert_eq!(summary.not_attempted, 1);
        assert_eq!(store.calls, 2);
        assert_eq!(store.records[0].student_id, "A");
    }
}
