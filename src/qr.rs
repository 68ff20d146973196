//! QR attendance sessions. At most one session is active school-wide; a scan
//! against the active session marks the scanning student present.

use crate::attendance;
use crate::db;
use crate::error::{SchoolError, SchoolResult};
use crate::model::AttendanceStatus;
use crate::roster;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrState {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrSession {
    pub id: String,
    pub created_by: String,
    pub classroom_id: String,
    pub subject_id: Option<String>,
    pub token: String,
    pub expires_at: String,
    pub created_at: String,
    pub is_active: bool,
}

impl QrSession {
    /// A session flagged active whose expiry has passed is already inactive.
    pub fn state(&self, now: DateTime<Utc>) -> QrState {
        let live = db::parse_timestamp(&self.expires_at)
            .map(|exp| now < exp)
            .unwrap_or(false);
        if self.is_active && live {
            QrState::Active
        } else {
            QrState::Inactive
        }
    }
}

const SESSION_COLUMNS: &str =
    "id, created_by, classroom_id, subject_id, token, expires_at, created_at, is_active";

fn session_from(r: &Row<'_>) -> rusqlite::Result<QrSession> {
    Ok(QrSession {
        id: r.get(0)?,
        created_by: r.get(1)?,
        classroom_id: r.get(2)?,
        subject_id: r.get(3)?,
        token: r.get(4)?,
        expires_at: r.get(5)?,
        created_at: r.get(6)?,
        is_active: r.get::<_, i64>(7)? != 0,
    })
}

/// 64 hex chars: SHA-256 over a fresh random id and the issue instant.
pub fn issue_token(now: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub struct NewSession<'a> {
    pub created_by: &'a str,
    pub classroom_id: &'a str,
    pub subject_id: Option<&'a str>,
    pub valid_for: Duration,
}

/// Opens a new session, deactivating any session that was active. The two
/// writes commit together so there is never a moment with two active rows.
pub fn create(conn: &Connection, new: &NewSession<'_>, now: DateTime<Utc>) -> SchoolResult<QrSession> {
    if new.valid_for <= Duration::zero() {
        return Err(SchoolError::bad_params("session validity must be positive"));
    }
    roster::require_user(conn, new.created_by)?;
    roster::require_classroom(conn, new.classroom_id)?;
    if let Some(sid) = new.subject_id {
        let subject = roster::get_subject(conn, sid)?;
        if subject.classroom_id != new.classroom_id {
            return Err(SchoolError::bad_params("subject is not taught in this classroom"));
        }
    }

    let session = QrSession {
        id: Uuid::new_v4().to_string(),
        created_by: new.created_by.to_string(),
        classroom_id: new.classroom_id.to_string(),
        subject_id: new.subject_id.map(str::to_string),
        token: issue_token(now),
        expires_at: db::timestamp(now + new.valid_for),
        created_at: db::timestamp(now),
        is_active: true,
    };

    let tx = conn.unchecked_transaction()?;
    let replaced = tx.execute("UPDATE qr_sessions SET is_active = 0 WHERE is_active = 1", [])?;
    tx.execute(
        &format!(
            "INSERT INTO qr_sessions({}) VALUES(?, ?, ?, ?, ?, ?, ?, 1)",
            SESSION_COLUMNS
        ),
        (
            &session.id,
            &session.created_by,
            &session.classroom_id,
            session.subject_id.as_deref(),
            &session.token,
            &session.expires_at,
            &session.created_at,
        ),
    )?;
    tx.commit()?;

    tracing::info!(
        session_id = %session.id,
        classroom_id = %session.classroom_id,
        expires_at = %session.expires_at,
        replaced,
        "qr session opened"
    );
    Ok(session)
}

/// Flips every active session whose expiry has passed.
pub fn expire_stale(conn: &Connection, now: DateTime<Utc>) -> SchoolResult<usize> {
    let n = conn.execute(
        "UPDATE qr_sessions SET is_active = 0 WHERE is_active = 1 AND expires_at <= ?",
        [db::timestamp(now)],
    )?;
    if n > 0 {
        tracing::debug!(expired = n, "qr sessions expired");
    }
    Ok(n)
}

pub fn active(conn: &Connection, now: DateTime<Utc>) -> SchoolResult<Option<QrSession>> {
    expire_stale(conn, now)?;
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM qr_sessions WHERE is_active = 1", SESSION_COLUMNS),
            [],
            session_from,
        )
        .optional()?)
}

/// Returns false when the session exists but was already inactive.
pub fn close(conn: &Connection, session_id: &str) -> SchoolResult<bool> {
    let changed = conn.execute(
        "UPDATE qr_sessions SET is_active = 0 WHERE id = ? AND is_active = 1",
        [session_id],
    )?;
    if changed > 0 {
        return Ok(true);
    }
    let exists = conn
        .query_row("SELECT 1 FROM qr_sessions WHERE id = ?", [session_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if exists {
        Ok(false)
    } else {
        Err(SchoolError::NotFound("qr session"))
    }
}

#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub session_id: String,
    pub attendance_id: String,
    pub student_id: String,
    pub subject_id: String,
    pub date: NaiveDate,
    pub already_recorded: bool,
    pub previous_status: Option<AttendanceStatus>,
}

/// Resolves a scanned token for a student login and marks them present for
/// today. Scanning twice is harmless.
pub fn scan(
    conn: &Connection,
    token: &str,
    user_id: &str,
    now: DateTime<Utc>,
    today: NaiveDate,
) -> SchoolResult<ScanOutcome> {
    let token = token.trim();
    if token.is_empty() {
        return Err(SchoolError::InvalidOrExpiredToken);
    }
    let session = conn
        .query_row(
            &format!("SELECT {} FROM qr_sessions WHERE token = ?", SESSION_COLUMNS),
            [token],
            session_from,
        )
        .optional()?
        .ok_or(SchoolError::InvalidOrExpiredToken)?;
    if session.state(now) != QrState::Active {
        if session.is_active {
            conn.execute("UPDATE qr_sessions SET is_active = 0 WHERE id = ?", [&session.id])?;
        }
        return Err(SchoolError::InvalidOrExpiredToken);
    }

    let student = roster::student_for_user(conn, user_id)?.ok_or(SchoolError::NotFound("student profile"))?;
    let subject_id = session
        .subject_id
        .clone()
        .ok_or_else(|| SchoolError::bad_params("session has no subject; attendance cannot be recorded"))?;
    if student.classroom_id.as_deref() != Some(session.classroom_id.as_str()) {
        return Err(SchoolError::bad_params("student is not in the session's classroom"));
    }

    let marked = attendance::mark_present(
        conn,
        &student.id,
        &subject_id,
        today,
        Some(session.created_by.as_str()),
        now,
    )?;
    let already_recorded = marked.previous == Some(AttendanceStatus::Present);
    tracing::info!(
        session_id = %session.id,
        student_id = %student.id,
        already_recorded,
        "qr scan accepted"
    );
    Ok(ScanOutcome {
        session_id: session.id,
        attendance_id: marked.id,
        student_id: student.id,
        subject_id,
        date: today,
        already_recorded,
        previous_status: marked.previous,
    })
}
