use crate::attendance::{self, AbsenceAdvisory, AttendanceFilter, ClassMark, NewAttendance};
use crate::config::{self, AttendancePolicy};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_enum, get_optional_date, get_optional_str, get_required_str, now, today, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::AttendanceStatus;
use crate::roster;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;

fn attendance_record(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let status = get_enum(params, "status", AttendanceStatus::parse)?;
    let marked_by = get_optional_str(params, "markedBy")?;
    let today = today();
    let date = get_optional_date(params, "date")?.unwrap_or(today);
    let policy: AttendancePolicy = config::load(conn)?;

    let recorded = attendance::record(
        conn,
        &NewAttendance {
            student_id: &student_id,
            subject_id: &subject_id,
            date,
            status,
            marked_by: marked_by.as_deref(),
        },
        today,
        now(),
        &policy,
    )?;
    Ok(json!({
        "attendanceId": recorded.id,
        "date": date.to_string(),
        "status": status.as_str(),
        "absences": recorded.absences,
        "advisory": recorded.advisory.as_str(),
    }))
}

fn attendance_mark_class(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let marked_by = get_optional_str(params, "markedBy")?;
    let today = today();
    let date = get_optional_date(params, "date")?.unwrap_or(today);
    let Some(raw) = params.get("statuses").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("statuses must be an object"));
    };
    let mut statuses = HashMap::with_capacity(raw.len());
    for (student_id, v) in raw {
        let status = v
            .as_str()
            .and_then(AttendanceStatus::parse)
            .ok_or_else(|| HandlerErr::bad_params(format!("invalid status for {}", student_id)))?;
        statuses.insert(student_id.clone(), status);
    }

    let subject = roster::get_subject(conn, &subject_id)?;
    if subject.classroom_id != classroom_id {
        return Err(HandlerErr::bad_params("subject is not taught in this classroom"));
    }
    let policy: AttendancePolicy = config::load(conn)?;

    let results = attendance::mark_class(
        conn,
        &ClassMark {
            subject_id: &subject_id,
            date,
            statuses: &statuses,
            marked_by: marked_by.as_deref(),
        },
        today,
        now(),
        &policy,
    )?;

    let mut recorded = Vec::new();
    let mut errors = Vec::new();
    for r in results {
        match r.outcome {
            Ok(rec) => recorded.push(json!({
                "studentId": r.student_id,
                "attendanceId": rec.id,
                "absences": rec.absences,
                "advisory": rec.advisory.as_str(),
            })),
            Err(e) => {
                let e = HandlerErr::from(e);
                errors.push(json!({
                    "studentId": r.student_id,
                    "code": e.code,
                    "message": e.message,
                }));
            }
        }
    }
    tracing::info!(
        classroom_id = %classroom_id,
        subject_id = %subject_id,
        recorded = recorded.len(),
        failed = errors.len(),
        "class attendance marked"
    );
    Ok(json!({
        "date": date.to_string(),
        "recorded": recorded,
        "errors": errors,
    }))
}

fn attendance_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let attendance_id = get_required_str(params, "attendanceId")?;
    let status = get_enum(params, "status", AttendanceStatus::parse)?;
    let row = attendance::update_status(conn, &attendance_id, status)?;
    Ok(json!({ "attendance": row }))
}

fn attendance_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let attendance_id = get_required_str(params, "attendanceId")?;
    attendance::delete(conn, &attendance_id)?;
    Ok(json!({ "ok": true }))
}

fn attendance_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let date = get_optional_date(params, "date")?;
    let classroom_id = get_optional_str(params, "classroomId")?;
    let subject_id = get_optional_str(params, "subjectId")?;
    let student_id = get_optional_str(params, "studentId")?;
    let rows = attendance::list(
        conn,
        &AttendanceFilter {
            date,
            classroom_id: classroom_id.as_deref(),
            subject_id: subject_id.as_deref(),
            student_id: student_id.as_deref(),
        },
    )?;
    Ok(json!({ "records": rows }))
}

fn attendance_absences(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    roster::require_enrollment(conn, &student_id, &subject_id)?;
    let policy: AttendancePolicy = config::load(conn)?;
    let absences = attendance::absence_count(conn, &student_id, &subject_id)?;
    Ok(json!({
        "absences": absences,
        "advisory": AbsenceAdvisory::for_count(absences, &policy).as_str(),
        "penaltyAbsences": policy.penalty_absences,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "attendance.record" => attendance_record,
        "attendance.markClass" => attendance_mark_class,
        "attendance.update" => attendance_update,
        "attendance.delete" => attendance_delete,
        "attendance.list" => attendance_list,
        "attendance.absences" => attendance_absences,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
