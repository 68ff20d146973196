use crate::config::{self, GradingPolicy};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_date, get_optional_i64, get_optional_str, get_required_str, today, with_db};
use crate::ipc::types::{AppState, Request};
use crate::reports;
use rusqlite::Connection;
use serde_json::{json, Value};

const DEFAULT_TREND_DAYS: i64 = 30;

fn reports_report_card(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    Ok(json!(reports::report_card(conn, &student_id)?))
}

fn reports_student_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let as_of = get_optional_date(params, "today")?.unwrap_or_else(today);
    Ok(json!(reports::student_summary(conn, &student_id, as_of)?))
}

fn reports_performance(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_optional_str(params, "classroomId")?;
    let policy: GradingPolicy = config::load(conn)?;
    Ok(json!(reports::performance(conn, classroom_id.as_deref(), &policy)?))
}

fn reports_attendance_trend(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let days = get_optional_i64(params, "days")?.unwrap_or(DEFAULT_TREND_DAYS);
    let as_of = get_optional_date(params, "today")?.unwrap_or_else(today);
    Ok(json!(reports::attendance_trend(conn, days, as_of)?))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "reports.reportCard" => reports_report_card,
        "reports.studentSummary" => reports_student_summary,
        "reports.performance" => reports_performance,
        "reports.attendanceTrend" => reports_attendance_trend,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
