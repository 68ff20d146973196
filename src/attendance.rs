//! Attendance ledger: one row per (student, subject, date).

use crate::config::AttendancePolicy;
use crate::db;
use crate::error::{unique_or_db, SchoolError, SchoolResult};
use crate::model::AttendanceStatus;
use crate::roster;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbsenceAdvisory {
    None,
    Warning,
    Critical,
}

impl AbsenceAdvisory {
    pub fn for_count(absences: i64, policy: &AttendancePolicy) -> Self {
        if absences >= policy.penalty_absences {
            Self::Critical
        } else if absences >= policy.warning_absences {
            Self::Warning
        } else {
            Self::None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAttendance<'a> {
    pub student_id: &'a str,
    pub subject_id: &'a str,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub marked_by: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub id: String,
    pub absences: i64,
    pub advisory: AbsenceAdvisory,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub roll_number: String,
    pub subject_id: String,
    pub subject_name: String,
    pub date: String,
    pub status: String,
    pub recorded_at: String,
    pub marked_by: Option<String>,
}

const ROW_SELECT: &str = "SELECT a.id, a.student_id, u.username, u.first_name, u.last_name,
        s.roll_number, a.subject_id, sub.name, a.date, a.status, a.recorded_at, a.marked_by
     FROM attendance a
     JOIN students s ON s.id = a.student_id
     JOIN users u ON u.id = s.user_id
     JOIN subjects sub ON sub.id = a.subject_id";

fn row_from(r: &Row<'_>) -> rusqlite::Result<AttendanceRow> {
    let username: String = r.get(2)?;
    let first: String = r.get(3)?;
    let last: String = r.get(4)?;
    Ok(AttendanceRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: roster::full_name(&first, &last, &username),
        roll_number: r.get(5)?,
        subject_id: r.get(6)?,
        subject_name: r.get(7)?,
        date: r.get(8)?,
        status: r.get(9)?,
        recorded_at: r.get(10)?,
        marked_by: r.get(11)?,
    })
}

/// Inserts a fresh attendance row. A second entry for the same student,
/// subject and day is rejected rather than overwritten.
pub fn record(
    conn: &Connection,
    new: &NewAttendance<'_>,
    today: NaiveDate,
    now: DateTime<Utc>,
    policy: &AttendancePolicy,
) -> SchoolResult<Recorded> {
    if new.date > today {
        return Err(SchoolError::FutureDate { date: new.date });
    }
    roster::require_enrollment(conn, new.student_id, new.subject_id)?;
    if let Some(by) = new.marked_by {
        roster::require_user(conn, by)?;
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO attendance(id, student_id, subject_id, date, status, recorded_at, marked_by)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            new.student_id,
            new.subject_id,
            db::date_key(new.date),
            new.status.as_str(),
            db::timestamp(now),
            new.marked_by,
        ),
    )
    .map_err(|e| {
        unique_or_db(e, || {
            format!(
                "attendance for {} already marked on {}",
                new.student_id,
                db::date_key(new.date)
            )
        })
    })?;

    let absences = absence_count(conn, new.student_id, new.subject_id)?;
    let advisory = AbsenceAdvisory::for_count(absences, policy);
    if advisory != AbsenceAdvisory::None {
        tracing::warn!(
            student_id = new.student_id,
            subject_id = new.subject_id,
            absences,
            advisory = advisory.as_str(),
            "absence threshold reached"
        );
    }
    Ok(Recorded {
        id,
        absences,
        advisory,
    })
}

#[derive(Debug)]
pub struct ClassMarkResult {
    pub student_id: String,
    pub outcome: SchoolResult<Recorded>,
}

pub struct ClassMark<'a> {
    pub subject_id: &'a str,
    pub date: NaiveDate,
    pub statuses: &'a HashMap<String, AttendanceStatus>,
    pub marked_by: Option<&'a str>,
}

/// Records one subject's attendance for a whole classroom. Rows that fail
/// (already marked, not enrolled) are reported per student; the rest commit.
pub fn mark_class(
    conn: &Connection,
    batch: &ClassMark<'_>,
    today: NaiveDate,
    now: DateTime<Utc>,
    policy: &AttendancePolicy,
) -> SchoolResult<Vec<ClassMarkResult>> {
    let ClassMark {
        subject_id,
        date,
        statuses,
        marked_by,
    } = *batch;
    if date > today {
        return Err(SchoolError::FutureDate { date });
    }
    roster::get_subject(conn, subject_id)?;

    let mut student_ids: Vec<&String> = statuses.keys().collect();
    student_ids.sort();

    let tx = conn.unchecked_transaction()?;
    let mut results = Vec::with_capacity(student_ids.len());
    for student_id in student_ids {
        let status = statuses[student_id];
        let outcome = record(
            &tx,
            &NewAttendance {
                student_id,
                subject_id,
                date,
                status,
                marked_by,
            },
            today,
            now,
            policy,
        );
        if let Err(SchoolError::Db(e)) = outcome {
            // Storage failure: abandon the whole batch.
            return Err(SchoolError::Db(e));
        }
        results.push(ClassMarkResult {
            student_id: student_id.clone(),
            outcome,
        });
    }
    tx.commit()?;
    Ok(results)
}

pub struct MarkedPresent {
    pub id: String,
    pub previous: Option<AttendanceStatus>,
}

/// Idempotent present mark used by QR scans. An existing row for the day is
/// flipped to present; a row that is already present is left untouched.
pub fn mark_present(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    date: NaiveDate,
    marked_by: Option<&str>,
    now: DateTime<Utc>,
) -> SchoolResult<MarkedPresent> {
    let date_key = db::date_key(date);
    let previous = conn
        .query_row(
            "SELECT status FROM attendance WHERE student_id = ? AND subject_id = ? AND date = ?",
            (student_id, subject_id, &date_key),
            |r| r.get::<_, String>(0),
        )
        .optional()?
        .and_then(|s| AttendanceStatus::parse(&s));

    // A row already marked present keeps its marker.
    let id: String = conn.query_row(
        "INSERT INTO attendance(id, student_id, subject_id, date, status, recorded_at, marked_by)
         VALUES(?, ?, ?, ?, 'present', ?, ?)
         ON CONFLICT(student_id, subject_id, date) DO UPDATE SET
           marked_by = CASE WHEN status = 'present' THEN marked_by ELSE excluded.marked_by END,
           status = 'present'
         RETURNING id",
        (
            Uuid::new_v4().to_string(),
            student_id,
            subject_id,
            &date_key,
            db::timestamp(now),
            marked_by,
        ),
        |r| r.get(0),
    )?;
    Ok(MarkedPresent { id, previous })
}

pub fn update_status(
    conn: &Connection,
    attendance_id: &str,
    status: AttendanceStatus,
) -> SchoolResult<AttendanceRow> {
    let changed = conn.execute(
        "UPDATE attendance SET status = ? WHERE id = ?",
        (status.as_str(), attendance_id),
    )?;
    if changed == 0 {
        return Err(SchoolError::NotFound("attendance"));
    }
    get(conn, attendance_id)
}

pub fn delete(conn: &Connection, attendance_id: &str) -> SchoolResult<()> {
    if conn.execute("DELETE FROM attendance WHERE id = ?", [attendance_id])? == 0 {
        return Err(SchoolError::NotFound("attendance"));
    }
    Ok(())
}

pub fn get(conn: &Connection, attendance_id: &str) -> SchoolResult<AttendanceRow> {
    conn.query_row(
        &format!("{} WHERE a.id = ?", ROW_SELECT),
        [attendance_id],
        row_from,
    )
    .optional()?
    .ok_or(SchoolError::NotFound("attendance"))
}

#[derive(Debug, Clone, Default)]
pub struct AttendanceFilter<'a> {
    pub date: Option<NaiveDate>,
    pub classroom_id: Option<&'a str>,
    pub subject_id: Option<&'a str>,
    pub student_id: Option<&'a str>,
}

pub fn list(conn: &Connection, filter: &AttendanceFilter<'_>) -> SchoolResult<Vec<AttendanceRow>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE (?1 IS NULL OR a.date = ?1)
           AND (?2 IS NULL OR sub.classroom_id = ?2)
           AND (?3 IS NULL OR a.subject_id = ?3)
           AND (?4 IS NULL OR a.student_id = ?4)
         ORDER BY a.date DESC, s.roll_number, sub.name",
        ROW_SELECT
    ))?;
    let rows = stmt
        .query_map(
            (
                filter.date.map(db::date_key),
                filter.classroom_id,
                filter.subject_id,
                filter.student_id,
            ),
            row_from,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Absences of one student in one subject, across all dates.
pub fn absence_count(conn: &Connection, student_id: &str, subject_id: &str) -> SchoolResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM attendance
         WHERE student_id = ? AND subject_id = ? AND status = 'absent'",
        (student_id, subject_id),
        |r| r.get(0),
    )?)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub total: i64,
    pub present: i64,
    pub absent: i64,
    pub late: i64,
    pub excused: i64,
}

impl StatusCounts {
    fn add(&mut self, status: &str, n: i64) {
        self.total += n;
        match AttendanceStatus::parse(status) {
            Some(AttendanceStatus::Present) => self.present += n,
            Some(AttendanceStatus::Absent) => self.absent += n,
            Some(AttendanceStatus::Late) => self.late += n,
            Some(AttendanceStatus::Excused) => self.excused += n,
            None => {}
        }
    }

    /// Present share of all marks, rounded to one decimal.
    pub fn present_rate(&self) -> f64 {
        crate::grading::percent(self.present as usize, self.total as usize)
    }
}

/// Status tallies for a student, optionally restricted to one subject and an
/// inclusive date window.
pub fn student_counts(
    conn: &Connection,
    student_id: &str,
    subject_id: Option<&str>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> SchoolResult<StatusCounts> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM attendance
         WHERE student_id = ?1
           AND (?2 IS NULL OR subject_id = ?2)
           AND (?3 IS NULL OR date >= ?3)
           AND (?4 IS NULL OR date <= ?4)
         GROUP BY status",
    )?;
    let mut rows = stmt.query((
        student_id,
        subject_id,
        from.map(db::date_key),
        to.map(db::date_key),
    ))?;
    let mut counts = StatusCounts::default();
    while let Some(row) = rows.next()? {
        let status: String = row.get(0)?;
        let n: i64 = row.get(1)?;
        counts.add(&status, n);
    }
    Ok(counts)
}

/// Tallies per day within `[from, to]`, school-wide.
pub fn daily_counts(
    conn: &Connection,
    from: NaiveDate,
    to: NaiveDate,
) -> SchoolResult<Vec<(NaiveDate, StatusCounts)>> {
    let mut stmt = conn.prepare(
        "SELECT date, status, COUNT(*) FROM attendance
         WHERE date >= ? AND date <= ?
         GROUP BY date, status
         ORDER BY date",
    )?;
    let mut rows = stmt.query((db::date_key(from), db::date_key(to)))?;
    let mut out: Vec<(NaiveDate, StatusCounts)> = Vec::new();
    while let Some(row) = rows.next()? {
        let raw: String = row.get(0)?;
        let Some(date) = db::parse_date_key(&raw) else {
            continue;
        };
        let status: String = row.get(1)?;
        let n: i64 = row.get(2)?;
        match out.last_mut() {
            Some((d, counts)) if *d == date => counts.add(&status, n),
            _ => {
                let mut counts = StatusCounts::default();
                counts.add(&status, n);
                out.push((date, counts));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::fixtures::*;
    use chrono::Duration;

    fn mark(
        conn: &Connection,
        school: &School,
        date: NaiveDate,
        status: AttendanceStatus,
    ) -> SchoolResult<Recorded> {
        record(
            conn,
            &NewAttendance {
                student_id: &school.student_id,
                subject_id: &school.subject_id,
                date,
                status,
                marked_by: Some(school.teacher_id.as_str()),
            },
            today(),
            now(),
            &AttendancePolicy::default(),
        )
    }

    #[test]
    fn second_mark_for_same_day_is_a_duplicate() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        mark(&conn, &school, today(), AttendanceStatus::Present).expect("first");
        let again = mark(&conn, &school, today(), AttendanceStatus::Absent);
        assert!(matches!(again, Err(SchoolError::DuplicateEntry(_))));
        let rows = list(&conn, &AttendanceFilter::default()).expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "present");
    }

    #[test]
    fn future_dates_are_rejected_and_nothing_is_stored() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        let tomorrow = today() + Duration::days(1);
        let res = mark(&conn, &school, tomorrow, AttendanceStatus::Present);
        assert!(matches!(res, Err(SchoolError::FutureDate { date }) if date == tomorrow));
        assert!(list(&conn, &AttendanceFilter::default()).expect("list").is_empty());
    }

    #[test]
    fn advisory_escalates_with_absences() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        let day = |n: i64| today() - Duration::days(n);

        let r = mark(&conn, &school, day(3), AttendanceStatus::Absent).expect("1");
        assert_eq!((r.absences, r.advisory), (1, AbsenceAdvisory::None));
        let r = mark(&conn, &school, day(2), AttendanceStatus::Late).expect("late");
        assert_eq!((r.absences, r.advisory), (1, AbsenceAdvisory::None));
        let r = mark(&conn, &school, day(1), AttendanceStatus::Absent).expect("2");
        assert_eq!((r.absences, r.advisory), (2, AbsenceAdvisory::Warning));
        let r = mark(&conn, &school, day(0), AttendanceStatus::Absent).expect("3");
        assert_eq!((r.absences, r.advisory), (3, AbsenceAdvisory::Critical));
    }

    #[test]
    fn outsider_cannot_be_marked() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        let outsider = student(&conn, "student9", "S-009", &school.other_classroom_id);
        let res = record(
            &conn,
            &NewAttendance {
                student_id: &outsider,
                subject_id: &school.subject_id,
                date: today(),
                status: AttendanceStatus::Present,
                marked_by: None,
            },
            today(),
            now(),
            &AttendancePolicy::default(),
        );
        assert!(matches!(res, Err(SchoolError::BadParams(_))));
    }

    #[test]
    fn mark_class_reports_duplicates_and_keeps_the_rest() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        let second = student(&conn, "student2", "S-002", &school.classroom_id);
        mark(&conn, &school, today(), AttendanceStatus::Late).expect("pre-marked");

        let mut statuses = HashMap::new();
        statuses.insert(school.student_id.clone(), AttendanceStatus::Present);
        statuses.insert(second.clone(), AttendanceStatus::Absent);
        let results = mark_class(
            &conn,
            &ClassMark {
                subject_id: &school.subject_id,
                date: today(),
                statuses: &statuses,
                marked_by: None,
            },
            today(),
            now(),
            &AttendancePolicy::default(),
        )
        .expect("mark class");

        let by_id: HashMap<_, _> = results.iter().map(|r| (r.student_id.clone(), &r.outcome)).collect();
        assert!(matches!(by_id[&school.student_id], Err(SchoolError::DuplicateEntry(_))));
        assert!(by_id[&second].is_ok());
        assert_eq!(absence_count(&conn, &second, &school.subject_id).expect("count"), 1);
    }

    #[test]
    fn mark_present_is_idempotent() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        let first = mark_present(&conn, &school.student_id, &school.subject_id, today(), None, now())
            .expect("first");
        assert_eq!(first.previous, None);
        let second = mark_present(&conn, &school.student_id, &school.subject_id, today(), None, now())
            .expect("second");
        assert_eq!(second.id, first.id);
        assert_eq!(second.previous, Some(AttendanceStatus::Present));
        assert_eq!(list(&conn, &AttendanceFilter::default()).expect("list").len(), 1);
    }

    #[test]
    fn mark_present_takes_over_a_row_written_elsewhere() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        conn.execute(
            "INSERT INTO attendance(id, student_id, subject_id, date, status, recorded_at, marked_by)
             VALUES('elsewhere', ?, ?, ?, 'absent', '2026-03-02T08:00:00.000Z', NULL)",
            (&school.student_id, &school.subject_id, db::date_key(today())),
        )
        .expect("seed row");

        let marked = mark_present(
            &conn,
            &school.student_id,
            &school.subject_id,
            today(),
            Some(school.teacher_id.as_str()),
            now(),
        )
        .expect("mark");
        assert_eq!(marked.id, "elsewhere");
        assert_eq!(marked.previous, Some(AttendanceStatus::Absent));
        let row = get(&conn, "elsewhere").expect("row");
        assert_eq!(row.status, "present");
        assert_eq!(row.marked_by.as_deref(), Some(school.teacher_id.as_str()));
        assert_eq!(absence_count(&conn, &school.student_id, &school.subject_id).expect("count"), 0);
    }

    #[test]
    fn update_and_delete_require_existing_rows() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        let r = mark(&conn, &school, today(), AttendanceStatus::Absent).expect("mark");
        let row = update_status(&conn, &r.id, AttendanceStatus::Excused).expect("update");
        assert_eq!(row.status, "excused");
        assert_eq!(absence_count(&conn, &school.student_id, &school.subject_id).expect("count"), 0);
        delete(&conn, &r.id).expect("delete");
        assert!(matches!(delete(&conn, &r.id), Err(SchoolError::NotFound("attendance"))));
        assert!(matches!(
            update_status(&conn, "nope", AttendanceStatus::Present),
            Err(SchoolError::NotFound("attendance"))
        ));
    }

    #[test]
    fn counts_group_by_status_and_day() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        let yesterday = today() - Duration::days(1);
        mark(&conn, &school, yesterday, AttendanceStatus::Absent).expect("y");
        mark(&conn, &school, today(), AttendanceStatus::Present).expect("t");

        let counts = student_counts(&conn, &school.student_id, None, None, None).expect("counts");
        assert_eq!(counts.total, 2);
        assert_eq!(counts.present, 1);
        assert_eq!(counts.present_rate(), 50.0);

        let daily = daily_counts(&conn, yesterday, today()).expect("daily");
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].0, yesterday);
        assert_eq!(daily[0].1.absent, 1);
    }
}
