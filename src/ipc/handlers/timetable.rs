use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_enum, get_optional_enum, get_optional_str, get_required_i64, get_required_str, with_db};
use crate::ipc::types::{AppState, Request};
use crate::model::SchoolDay;
use crate::timetable::{self, EntryFilter, Slot};
use rusqlite::Connection;
use serde_json::{json, Value};

fn periods_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let number = get_required_i64(params, "number")?;
    let start = get_required_str(params, "startTime")?;
    let end = get_required_str(params, "endTime")?;
    let period = timetable::create_period(conn, number, &start, &end)?;
    Ok(json!({ "period": period }))
}

fn periods_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "periods": timetable::list_periods(conn)? }))
}

struct SlotParams {
    classroom_id: String,
    subject_id: String,
    teacher_user_id: String,
    day: SchoolDay,
    period_id: String,
}

impl SlotParams {
    fn read(params: &Value) -> Result<Self, HandlerErr> {
        Ok(Self {
            classroom_id: get_required_str(params, "classroomId")?,
            subject_id: get_required_str(params, "subjectId")?,
            teacher_user_id: get_required_str(params, "teacherUserId")?,
            day: get_enum(params, "day", SchoolDay::parse)?,
            period_id: get_required_str(params, "periodId")?,
        })
    }

    fn slot(&self) -> Slot<'_> {
        Slot {
            classroom_id: &self.classroom_id,
            subject_id: &self.subject_id,
            teacher_user_id: &self.teacher_user_id,
            day: self.day,
            period_id: &self.period_id,
        }
    }
}

fn timetable_assign(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let p = SlotParams::read(params)?;
    let entry = timetable::assign(conn, &p.slot())?;
    Ok(json!({ "entry": entry }))
}

fn timetable_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let entry_id = get_required_str(params, "entryId")?;
    let p = SlotParams::read(params)?;
    let entry = timetable::update(conn, &entry_id, &p.slot())?;
    Ok(json!({ "entry": entry }))
}

fn timetable_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let entry_id = get_required_str(params, "entryId")?;
    timetable::delete(conn, &entry_id)?;
    Ok(json!({ "ok": true }))
}

fn timetable_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_optional_str(params, "classroomId")?;
    let teacher_user_id = get_optional_str(params, "teacherUserId")?;
    let day = get_optional_enum(params, "day", SchoolDay::parse)?;
    let entries = timetable::list(
        conn,
        &EntryFilter {
            classroom_id: classroom_id.as_deref(),
            teacher_user_id: teacher_user_id.as_deref(),
            day,
        },
    )?;
    Ok(json!({ "entries": entries }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "periods.create" => periods_create,
        "periods.list" => periods_list,
        "timetable.assign" => timetable_assign,
        "timetable.update" => timetable_update,
        "timetable.delete" => timetable_delete,
        "timetable.list" => timetable_list,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
