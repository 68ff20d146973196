//! Bell periods and the weekly timetable grid.

use crate::error::{unique_or_db, SchoolError, SchoolResult};
use crate::model::{Role, SchoolDay};
use crate::roster;
use chrono::NaiveTime;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodRow {
    pub id: String,
    pub number: i64,
    pub start_time: String,
    pub end_time: String,
}

fn parse_clock(s: &str, field: &str) -> SchoolResult<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|_| SchoolError::bad_params(format!("{} must be HH:MM", field)))
}

pub fn create_period(conn: &Connection, number: i64, start: &str, end: &str) -> SchoolResult<PeriodRow> {
    if number < 1 {
        return Err(SchoolError::bad_params("period number must be positive"));
    }
    let start_t = parse_clock(start, "startTime")?;
    let end_t = parse_clock(end, "endTime")?;
    if end_t <= start_t {
        return Err(SchoolError::bad_params("endTime must be after startTime"));
    }
    let row = PeriodRow {
        id: Uuid::new_v4().to_string(),
        number,
        start_time: start_t.format("%H:%M").to_string(),
        end_time: end_t.format("%H:%M").to_string(),
    };
    conn.execute(
        "INSERT INTO periods(id, number, start_time, end_time) VALUES(?, ?, ?, ?)",
        (&row.id, row.number, &row.start_time, &row.end_time),
    )
    .map_err(|e| unique_or_db(e, || format!("period {} already exists", number)))?;
    Ok(row)
}

pub fn list_periods(conn: &Connection) -> SchoolResult<Vec<PeriodRow>> {
    let mut stmt = conn.prepare("SELECT id, number, start_time, end_time FROM periods ORDER BY number")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(PeriodRow {
                id: r.get(0)?,
                number: r.get(1)?,
                start_time: r.get(2)?,
                end_time: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRow {
    pub id: String,
    pub classroom_id: String,
    pub classroom_name: String,
    pub subject_id: String,
    pub subject_name: String,
    pub teacher_user_id: String,
    pub teacher_name: String,
    pub day: String,
    pub period_id: String,
    pub period_number: i64,
    pub start_time: String,
    pub end_time: String,
}

const ENTRY_SELECT: &str = "SELECT e.id, e.classroom_id, c.name, e.subject_id, sub.name,
        e.teacher_user_id, t.username, t.first_name, t.last_name,
        e.day, e.period_id, p.number, p.start_time, p.end_time
     FROM timetable_entries e
     JOIN classrooms c ON c.id = e.classroom_id
     JOIN subjects sub ON sub.id = e.subject_id
     JOIN users t ON t.id = e.teacher_user_id
     JOIN periods p ON p.id = e.period_id";

fn entry_from(r: &Row<'_>) -> rusqlite::Result<EntryRow> {
    let username: String = r.get(6)?;
    let first: String = r.get(7)?;
    let last: String = r.get(8)?;
    let day: i64 = r.get(9)?;
    Ok(EntryRow {
        id: r.get(0)?,
        classroom_id: r.get(1)?,
        classroom_name: r.get(2)?,
        subject_id: r.get(3)?,
        subject_name: r.get(4)?,
        teacher_user_id: r.get(5)?,
        teacher_name: roster::full_name(&first, &last, &username),
        day: SchoolDay::from_ordinal(day)
            .map(SchoolDay::as_str)
            .unwrap_or("unknown")
            .to_string(),
        period_id: r.get(10)?,
        period_number: r.get(11)?,
        start_time: r.get(12)?,
        end_time: r.get(13)?,
    })
}

#[derive(Debug, Clone)]
pub struct Slot<'a> {
    pub classroom_id: &'a str,
    pub subject_id: &'a str,
    pub teacher_user_id: &'a str,
    pub day: SchoolDay,
    pub period_id: &'a str,
}

fn validate_slot(conn: &Connection, slot: &Slot<'_>) -> SchoolResult<()> {
    roster::require_classroom(conn, slot.classroom_id)?;
    let subject = roster::get_subject(conn, slot.subject_id)?;
    if subject.classroom_id != slot.classroom_id {
        return Err(SchoolError::bad_params("subject is not taught in this classroom"));
    }
    if roster::user_role(conn, slot.teacher_user_id)? != Role::Teacher {
        return Err(SchoolError::bad_params("user must have the teacher role"));
    }
    let period_exists = conn
        .query_row("SELECT 1 FROM periods WHERE id = ?", [slot.period_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !period_exists {
        return Err(SchoolError::NotFound("period"));
    }
    Ok(())
}

fn slot_conflict(e: rusqlite::Error) -> SchoolError {
    match unique_or_db(e, String::new) {
        SchoolError::DuplicateEntry(_) => {
            SchoolError::Conflict("classroom already has a lesson in this period".to_string())
        }
        other => other,
    }
}

pub fn assign(conn: &Connection, slot: &Slot<'_>) -> SchoolResult<EntryRow> {
    validate_slot(conn, slot)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO timetable_entries(id, classroom_id, subject_id, teacher_user_id, day, period_id)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            slot.classroom_id,
            slot.subject_id,
            slot.teacher_user_id,
            slot.day.ordinal(),
            slot.period_id,
        ),
    )
    .map_err(slot_conflict)?;
    get_entry(conn, &id)
}

/// Moves or reassigns an entry. Its own current slot never counts as a clash.
pub fn update(conn: &Connection, entry_id: &str, slot: &Slot<'_>) -> SchoolResult<EntryRow> {
    get_entry(conn, entry_id)?;
    validate_slot(conn, slot)?;
    conn.execute(
        "UPDATE timetable_entries
         SET classroom_id = ?, subject_id = ?, teacher_user_id = ?, day = ?, period_id = ?
         WHERE id = ?",
        (
            slot.classroom_id,
            slot.subject_id,
            slot.teacher_user_id,
            slot.day.ordinal(),
            slot.period_id,
            entry_id,
        ),
    )
    .map_err(slot_conflict)?;
    get_entry(conn, entry_id)
}

pub fn delete(conn: &Connection, entry_id: &str) -> SchoolResult<()> {
    if conn.execute("DELETE FROM timetable_entries WHERE id = ?", [entry_id])? == 0 {
        return Err(SchoolError::NotFound("timetable entry"));
    }
    Ok(())
}

pub fn get_entry(conn: &Connection, entry_id: &str) -> SchoolResult<EntryRow> {
    conn.query_row(&format!("{} WHERE e.id = ?", ENTRY_SELECT), [entry_id], entry_from)
        .optional()?
        .ok_or(SchoolError::NotFound("timetable entry"))
}

#[derive(Debug, Clone, Default)]
pub struct EntryFilter<'a> {
    pub classroom_id: Option<&'a str>,
    pub teacher_user_id: Option<&'a str>,
    pub day: Option<SchoolDay>,
}

pub fn list(conn: &Connection, filter: &EntryFilter<'_>) -> SchoolResult<Vec<EntryRow>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE (?1 IS NULL OR e.classroom_id = ?1)
           AND (?2 IS NULL OR e.teacher_user_id = ?2)
           AND (?3 IS NULL OR e.day = ?3)
         ORDER BY e.day, p.number, c.name",
        ENTRY_SELECT
    ))?;
    let rows = stmt
        .query_map(
            (
                filter.classroom_id,
                filter.teacher_user_id,
                filter.day.map(SchoolDay::ordinal),
            ),
            entry_from,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
