use crate::config::{self, AttendancePolicy, GradingPolicy, PolicySection, QrPolicy};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Attendance,
    Qr,
    Grading,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "attendance" => Some(Self::Attendance),
            "qr" => Some(Self::Qr),
            "grading" => Some(Self::Grading),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Attendance => "attendance",
            Self::Qr => "qr",
            Self::Grading => "grading",
        }
    }
}

fn load_json<P: PolicySection>(conn: &Connection) -> Result<Value, HandlerErr> {
    let section: P = config::load(conn)?;
    Ok(json!(section))
}

fn update_json<P: PolicySection>(conn: &Connection, patch: &Map<String, Value>) -> Result<Value, HandlerErr> {
    let next: P = config::update(conn, patch)?;
    Ok(json!(next))
}

fn setup_get(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({
        "attendance": load_json::<AttendancePolicy>(conn)?,
        "qr": load_json::<QrPolicy>(conn)?,
        "grading": load_json::<GradingPolicy>(conn)?,
    }))
}

fn setup_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_raw = get_required_str(params, "section")?;
    let Some(section) = SetupSection::parse(&section_raw) else {
        return Err(HandlerErr::bad_params("unknown section"));
    };
    let Some(patch) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };

    let value = match section {
        SetupSection::Attendance => update_json::<AttendancePolicy>(conn, patch)?,
        SetupSection::Qr => update_json::<QrPolicy>(conn, patch)?,
        SetupSection::Grading => update_json::<GradingPolicy>(conn, patch)?,
    };
    tracing::info!(section = section.name(), "setup updated");
    Ok(json!({ "section": section.name(), "value": value }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "setup.get" => setup_get,
        "setup.update" => setup_update,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
