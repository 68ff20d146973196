//! Score ledger: one score per (student, subject, exam type), graded on write.

use crate::attendance;
use crate::config::AttendancePolicy;
use crate::db;
use crate::error::{SchoolError, SchoolResult};
use crate::grading::{letter_grade, round_off_2_decimals, LetterGrade};
use crate::model::ExamType;
use crate::roster;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ScoreEntry<'a> {
    pub student_id: &'a str,
    pub subject_id: &'a str,
    pub exam_type: ExamType,
    pub score: f64,
    pub recorded_by: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct ScoreOutcome {
    pub id: String,
    pub raw_score: f64,
    pub score: f64,
    pub grade: LetterGrade,
    pub absences: i64,
    pub penalized: bool,
    pub created: bool,
}

pub fn check_range(score: f64) -> SchoolResult<()> {
    // NaN fails `contains` as well.
    if !(0.0..=100.0).contains(&score) {
        return Err(SchoolError::OutOfRange { value: score });
    }
    Ok(())
}

/// Score after the attendance penalty: zero once the absence threshold is
/// reached, otherwise the raw score at two decimals.
pub fn effective_score(raw: f64, absences: i64, policy: &AttendancePolicy) -> (f64, bool) {
    if absences >= policy.penalty_absences {
        (0.0, true)
    } else {
        (round_off_2_decimals(raw), false)
    }
}

/// Creates or replaces the score for the entry's key. The stored grade is
/// always derived from the stored score.
pub fn upsert(
    conn: &Connection,
    entry: &ScoreEntry<'_>,
    now: DateTime<Utc>,
    policy: &AttendancePolicy,
) -> SchoolResult<ScoreOutcome> {
    check_range(entry.score)?;
    roster::require_enrollment(conn, entry.student_id, entry.subject_id)?;
    if let Some(by) = entry.recorded_by {
        roster::require_user(conn, by)?;
    }

    let absences = attendance::absence_count(conn, entry.student_id, entry.subject_id)?;
    let (score, penalized) = effective_score(entry.score, absences, policy);
    let grade = letter_grade(score);

    // A concurrent writer may have claimed the key; the conflict branch keeps
    // its id and recorded_at.
    let fresh_id = Uuid::new_v4().to_string();
    let id: String = conn.query_row(
        "INSERT INTO scores(id, student_id, subject_id, exam_type, score, grade, recorded_at, recorded_by)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, exam_type) DO UPDATE SET
           score = excluded.score,
           grade = excluded.grade,
           recorded_by = excluded.recorded_by
         RETURNING id",
        (
            &fresh_id,
            entry.student_id,
            entry.subject_id,
            entry.exam_type.as_str(),
            score,
            grade.as_str(),
            db::timestamp(now),
            entry.recorded_by,
        ),
        |r| r.get(0),
    )?;
    let created = id == fresh_id;

    if penalized {
        tracing::info!(
            student_id = entry.student_id,
            subject_id = entry.subject_id,
            exam_type = entry.exam_type.as_str(),
            absences,
            raw_score = entry.score,
            "attendance penalty applied"
        );
    }
    Ok(ScoreOutcome {
        id,
        raw_score: entry.score,
        score,
        grade,
        absences,
        penalized,
        created,
    })
}

#[derive(Debug)]
pub struct BulkLine {
    pub student_id: String,
    pub subject_id: String,
    pub outcome: SchoolResult<ScoreOutcome>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEntry {
    pub student_id: String,
    pub subject_id: String,
    pub score: f64,
}

/// Upserts many scores of one exam type for a classroom. Each line stands on
/// its own; storage failures abort the batch.
pub fn bulk_upsert(
    conn: &Connection,
    classroom_id: &str,
    exam_type: ExamType,
    entries: &[BulkEntry],
    recorded_by: Option<&str>,
    now: DateTime<Utc>,
    policy: &AttendancePolicy,
) -> SchoolResult<Vec<BulkLine>> {
    roster::require_classroom(conn, classroom_id)?;
    let tx = conn.unchecked_transaction()?;
    let mut lines = Vec::with_capacity(entries.len());
    for e in entries {
        let outcome = in_classroom(&tx, classroom_id, &e.subject_id).and_then(|()| {
            upsert(
                &tx,
                &ScoreEntry {
                    student_id: &e.student_id,
                    subject_id: &e.subject_id,
                    exam_type,
                    score: e.score,
                    recorded_by,
                },
                now,
                policy,
            )
        });
        if let Err(SchoolError::Db(err)) = outcome {
            return Err(SchoolError::Db(err));
        }
        lines.push(BulkLine {
            student_id: e.student_id.clone(),
            subject_id: e.subject_id.clone(),
            outcome,
        });
    }
    tx.commit()?;
    Ok(lines)
}

fn in_classroom(conn: &Connection, classroom_id: &str, subject_id: &str) -> SchoolResult<()> {
    let subject = roster::get_subject(conn, subject_id)?;
    if subject.classroom_id != classroom_id {
        return Err(SchoolError::bad_params("subject is not taught in this classroom"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRow {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub roll_number: String,
    pub subject_id: String,
    pub subject_name: String,
    pub exam_type: String,
    pub score: f64,
    pub grade: String,
    pub recorded_at: String,
}

const ROW_SELECT: &str = "SELECT sc.id, sc.student_id, u.username, u.first_name, u.last_name,
        st.roll_number, sc.subject_id, sub.name, sc.exam_type, sc.score, sc.grade, sc.recorded_at
     FROM scores sc
     JOIN students st ON st.id = sc.student_id
     JOIN users u ON u.id = st.user_id
     JOIN subjects sub ON sub.id = sc.subject_id";

fn row_from(r: &Row<'_>) -> rusqlite::Result<ScoreRow> {
    let username: String = r.get(2)?;
    let first: String = r.get(3)?;
    let last: String = r.get(4)?;
    Ok(ScoreRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        student_name: roster::full_name(&first, &last, &username),
        roll_number: r.get(5)?,
        subject_id: r.get(6)?,
        subject_name: r.get(7)?,
        exam_type: r.get(8)?,
        score: r.get(9)?,
        grade: r.get(10)?,
        recorded_at: r.get(11)?,
    })
}

#[derive(Debug, Clone, Default)]
pub struct ScoreFilter<'a> {
    pub classroom_id: Option<&'a str>,
    pub subject_id: Option<&'a str>,
    pub student_id: Option<&'a str>,
    pub exam_type: Option<ExamType>,
}

pub fn list(conn: &Connection, filter: &ScoreFilter<'_>) -> SchoolResult<Vec<ScoreRow>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE (?1 IS NULL OR sub.classroom_id = ?1)
           AND (?2 IS NULL OR sc.subject_id = ?2)
           AND (?3 IS NULL OR sc.student_id = ?3)
           AND (?4 IS NULL OR sc.exam_type = ?4)
         ORDER BY st.roll_number, sub.name, sc.exam_type",
        ROW_SELECT
    ))?;
    let rows = stmt
        .query_map(
            (
                filter.classroom_id,
                filter.subject_id,
                filter.student_id,
                filter.exam_type.map(ExamType::as_str),
            ),
            row_from,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
