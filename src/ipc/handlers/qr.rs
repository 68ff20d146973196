use crate::config::{self, QrPolicy};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_i64, get_optional_str, get_required_str, now, today, with_db};
use crate::ipc::types::{AppState, Request};
use crate::qr::{self, NewSession};
use chrono::Duration;
use rusqlite::Connection;
use serde_json::{json, Value};

fn qr_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let subject_id = get_optional_str(params, "subjectId")?;
    let created_by = get_required_str(params, "createdBy")?;
    let policy: QrPolicy = config::load(conn)?;
    let minutes = match get_optional_i64(params, "validMinutes")? {
        Some(m) if !(1..=60).contains(&m) => {
            return Err(HandlerErr::bad_params("validMinutes must be in 1..=60"));
        }
        Some(m) => m,
        None => policy.validity_minutes,
    };

    let session = qr::create(
        conn,
        &NewSession {
            created_by: &created_by,
            classroom_id: &classroom_id,
            subject_id: subject_id.as_deref(),
            valid_for: Duration::minutes(minutes),
        },
        now(),
    )?;
    Ok(json!({ "session": session }))
}

fn qr_active(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let session = qr::active(conn, now())?;
    Ok(json!({ "session": session }))
}

fn qr_close(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let closed = qr::close(conn, &session_id)?;
    if closed {
        tracing::info!(session_id = %session_id, "qr session closed");
    }
    Ok(json!({ "closed": closed }))
}

fn qr_scan(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let token = get_required_str(params, "token")?;
    let user_id = get_required_str(params, "userId")?;
    let out = qr::scan(conn, &token, &user_id, now(), today())?;
    Ok(json!({
        "sessionId": out.session_id,
        "attendanceId": out.attendance_id,
        "studentId": out.student_id,
        "subjectId": out.subject_id,
        "date": out.date.to_string(),
        "status": "present",
        "alreadyRecorded": out.already_recorded,
        "previousStatus": out.previous_status.map(|s| s.as_str()),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "qr.create" => qr_create,
        "qr.active" => qr_active,
        "qr.close" => qr_close,
        "qr.scan" => qr_scan,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
