use crate::config::{self, AttendancePolicy};
use crate::grading::letter_grade;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_enum, get_optional_enum, get_optional_str, get_required_f64, get_required_str, now,
    with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::ExamType;
use crate::scores::{self, BulkEntry, ScoreEntry, ScoreFilter};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::BTreeSet;

fn penalty_warning(absences: i64) -> String {
    format!(
        "score forced to 0.00: {} absences reached the attendance penalty threshold",
        absences
    )
}

fn scores_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let exam_type = get_enum(params, "examType", ExamType::parse)?;
    let score = get_required_f64(params, "score")?;
    let recorded_by = get_optional_str(params, "recordedBy")?;
    let policy: AttendancePolicy = config::load(conn)?;

    let out = scores::upsert(
        conn,
        &ScoreEntry {
            student_id: &student_id,
            subject_id: &subject_id,
            exam_type,
            score,
            recorded_by: recorded_by.as_deref(),
        },
        now(),
        &policy,
    )?;
    Ok(json!({
        "scoreId": out.id,
        "created": out.created,
        "rawScore": out.raw_score,
        "score": out.score,
        "grade": out.grade.as_str(),
        "absences": out.absences,
        "penalized": out.penalized,
        "warning": out.penalized.then(|| penalty_warning(out.absences)),
    }))
}

fn scores_bulk_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let exam_type = get_enum(params, "examType", ExamType::parse)?;
    let recorded_by = get_optional_str(params, "recordedBy")?;
    let Some(raw) = params.get("entries").filter(|v| v.is_array()) else {
        return Err(HandlerErr::bad_params("entries must be an array"));
    };
    let entries: Vec<BulkEntry> = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid entries: {}", e)))?;
    let policy: AttendancePolicy = config::load(conn)?;

    let lines = scores::bulk_upsert(
        conn,
        &classroom_id,
        exam_type,
        &entries,
        recorded_by.as_deref(),
        now(),
        &policy,
    )?;

    let mut saved = 0usize;
    let mut errors = Vec::new();
    let mut penalized = BTreeSet::new();
    for line in lines {
        match line.outcome {
            Ok(out) => {
                saved += 1;
                if out.penalized {
                    penalized.insert(line.student_id);
                }
            }
            Err(e) => {
                let e = HandlerErr::from(e);
                errors.push(json!({
                    "studentId": line.student_id,
                    "subjectId": line.subject_id,
                    "code": e.code,
                    "message": e.message,
                }));
            }
        }
    }
    // One warning per student, however many of their lines were zeroed.
    let warnings: Vec<Value> = penalized
        .into_iter()
        .map(|student_id| {
            json!({
                "studentId": student_id,
                "message": "score forced to 0.00 by the attendance penalty",
            })
        })
        .collect();
    Ok(json!({
        "saved": saved,
        "errors": errors,
        "warnings": warnings,
    }))
}

fn scores_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_optional_str(params, "classroomId")?;
    let subject_id = get_optional_str(params, "subjectId")?;
    let student_id = get_optional_str(params, "studentId")?;
    let exam_type = get_optional_enum(params, "examType", ExamType::parse)?;
    let rows = scores::list(
        conn,
        &ScoreFilter {
            classroom_id: classroom_id.as_deref(),
            subject_id: subject_id.as_deref(),
            student_id: student_id.as_deref(),
            exam_type,
        },
    )?;
    Ok(json!({ "scores": rows }))
}

fn grades_letter(_conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let score = get_required_f64(params, "score")?;
    scores::check_range(score)?;
    let grade = letter_grade(score);
    Ok(json!({
        "score": score,
        "grade": grade.as_str(),
        "passing": grade.is_passing(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "scores.upsert" => scores_upsert,
        "scores.bulkUpsert" => scores_bulk_upsert,
        "scores.list" => scores_list,
        "grades.letter" => grades_letter,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
