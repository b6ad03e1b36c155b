use crate::model::{AttendanceRecord, AttendanceStatus, Student};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub total_days: usize,
    pub present: usize,
    pub absent: usize,
    pub leave: usize,
    pub recorded_days: usize,
    pub missing_days: usize,
    pub effective_present: usize,
    pub percentage: f64,
}

impl AttendanceStats {
    /// Two-decimal rendering, e.g. `"80.00"`.
    pub fn percentage_text(&self) -> String {
        format!("{:.2}", self.percentage)
    }
}

pub fn round_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Distinct calendar dates across every record in the system. This is the
/// shared denominator: all students are scored against the same day count.
pub fn system_dates(all_records: &[AttendanceRecord]) -> BTreeSet<NaiveDate> {
    all_records.iter().map(|r| r.date).collect()
}

pub fn compute_stats(student_id: &str, all_records: &[AttendanceRecord]) -> AttendanceStats {
    stats_against(student_id, system_dates(all_records).len(), all_records)
}

/// Stats for every roster student, computing the shared day set once.
pub fn compute_roster_stats(
    roster: &[Student],
    all_records: &[AttendanceRecord],
) -> Vec<(String, AttendanceStats)> {
    let total_days = system_dates(all_records).len();
    roster
        .iter()
        .filter(|s| s.has_valid_id())
        .map(|s| (s.id.clone(), stats_against(&s.id, total_days, all_records)))
        .collect()
}

// A day this student has no record for counts as present, Sunday or not.
// This differs from the sheet default in `reconcile::default_status` and both
// are kept as observed.
fn stats_against(
    student_id: &str,
    total_days: usize,
    all_records: &[AttendanceRecord],
) -> AttendanceStats {
    let (mut present, mut absent, mut leave) = (0usize, 0usize, 0usize);
    for r in all_records.iter().filter(|r| r.student_id == student_id) {
        match r.status {
            AttendanceStatus::Present => present += 1,
            AttendanceStatus::Absent => absent += 1,
            AttendanceStatus::Leave => leave += 1,
        }
    }
    let recorded_days = present + absent + leave;
    let missing_days = total_days.saturating_sub(recorded_days);
    let effective_present = present + missing_days;
    let percentage = if total_days > 0 {
        round_2_decimals(effective_present as f64 / total_days as f64 * 100.0)
    } else {
        0.0
    };

    AttendanceStats {
        total_days,
        present,
        absent,
        leave,
        recorded_days,
        missing_days,
        effective_present,
        percentage,
    }
}

/// One row of a student's day-by-day history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryDay {
    #[serde(serialize_with = "serialize_day")]
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub recorded: bool,
}

fn serialize_day<S: serde::Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&date.format("%Y-%m-%d"))
}

/// Every system date, most recent first, with the student's stored status.
/// Unrecorded days read as present, matching the percentage above.
pub fn student_history(student_id: &str, all_records: &[AttendanceRecord]) -> Vec<HistoryDay> {
    let own: BTreeMap<NaiveDate, AttendanceStatus> = all_records
        .iter()
        .filter(|r| r.student_id == student_id)
        .map(|r| (r.date, r.status))
        .collect();
    system_dates(all_records)
        .into_iter()
        .rev()
        .map(|date| match own.get(&date) {
            Some(&status) => HistoryDay {
                date,
                status,
                recorded: true,
            },
            None => HistoryDay {
                date,
                status: AttendanceStatus::Present,
                recorded: false,
            },
        })
        .collect()
}

/// Records grouped by date, most recent date first.
pub fn group_by_date(records: &[AttendanceRecord]) -> Vec<(NaiveDate, Vec<&AttendanceRecord>)> {
    let mut grouped: BTreeMap<NaiveDate, Vec<&AttendanceRecord>> = BTreeMap::new();
    for r in records {
        grouped.entry(r.date).or_default().push(r);
    }
    grouped.into_iter().rev().collect()
}
