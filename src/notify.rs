//! Notification fan-out. A send resolves its selector once and writes one
//! unread row per recipient in the same transaction as the notification.

use crate::db;
use crate::error::{SchoolError, SchoolResult};
use crate::model::RecipientSelector;
use crate::roster;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

pub fn resolve_recipients(conn: &Connection, selector: &RecipientSelector) -> SchoolResult<Vec<String>> {
    let (sql, arg): (&str, Option<&str>) = match selector {
        RecipientSelector::All => ("SELECT id FROM users ORDER BY username", None),
        RecipientSelector::Students => (
            "SELECT id FROM users WHERE role = 'student' ORDER BY username",
            None,
        ),
        RecipientSelector::Teachers => (
            "SELECT id FROM users WHERE role = 'teacher' ORDER BY username",
            None,
        ),
        RecipientSelector::Class(classroom_id) => {
            roster::require_classroom(conn, classroom_id)?;
            (
                "SELECT u.id FROM users u
                 JOIN students s ON s.user_id = u.id
                 WHERE u.role = 'student' AND s.classroom_id = ?
                 ORDER BY u.username",
                Some(classroom_id.as_str()),
            )
        }
        RecipientSelector::Individual(user_id) => {
            roster::require_user(conn, user_id)?;
            return Ok(vec![user_id.clone()]);
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let ids = match arg {
        Some(a) => stmt.query_map([a], |r| r.get(0))?.collect::<Result<Vec<String>, _>>()?,
        None => stmt.query_map([], |r| r.get(0))?.collect::<Result<Vec<String>, _>>()?,
    };
    Ok(ids)
}

pub struct Outgoing<'a> {
    pub title: &'a str,
    pub message: &'a str,
    pub selector: &'a RecipientSelector,
    pub sender_id: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct Sent {
    pub notification_id: String,
    pub recipients: usize,
}

pub fn send(conn: &Connection, out: &Outgoing<'_>, now: DateTime<Utc>) -> SchoolResult<Sent> {
    let title = out.title.trim();
    let message = out.message.trim();
    if title.is_empty() || message.is_empty() {
        return Err(SchoolError::bad_params("title and message are required"));
    }
    if let Some(sender) = out.sender_id {
        roster::require_user(conn, sender)?;
    }

    let tx = conn.unchecked_transaction()?;
    let recipients = resolve_recipients(&tx, out.selector)?;
    let notification_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO notifications(id, title, message, recipient_type, specific_class_id, specific_user_id, sender_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &notification_id,
            title,
            message,
            out.selector.kind(),
            out.selector.class_id(),
            out.selector.user_id(),
            out.sender_id,
            db::timestamp(now),
        ),
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO notification_reads(id, notification_id, user_id, is_read) VALUES(?, ?, ?, 0)",
        )?;
        for user_id in &recipients {
            stmt.execute((Uuid::new_v4().to_string(), &notification_id, user_id))?;
        }
    }
    tx.commit()?;

    tracing::info!(
        notification_id = %notification_id,
        recipient_type = out.selector.kind(),
        recipients = recipients.len(),
        "notification sent"
    );
    Ok(Sent {
        notification_id,
        recipients: recipients.len(),
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentItem {
    pub id: String,
    pub title: String,
    pub message: String,
    pub recipient_type: String,
    pub specific_class_id: Option<String>,
    pub specific_user_id: Option<String>,
    pub sender_id: Option<String>,
    pub created_at: String,
    pub recipient_count: i64,
    pub read_count: i64,
}

/// Everything sent, newest first, with delivery and read tallies.
pub fn history(conn: &Connection) -> SchoolResult<Vec<SentItem>> {
    let mut stmt = conn.prepare(
        "SELECT n.id, n.title, n.message, n.recipient_type, n.specific_class_id,
                n.specific_user_id, n.sender_id, n.created_at,
                (SELECT COUNT(*) FROM notification_reads r WHERE r.notification_id = n.id),
                (SELECT COUNT(*) FROM notification_reads r WHERE r.notification_id = n.id AND r.is_read = 1)
         FROM notifications n
         ORDER BY n.created_at DESC, n.rowid DESC",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(SentItem {
                id: r.get(0)?,
                title: r.get(1)?,
                message: r.get(2)?,
                recipient_type: r.get(3)?,
                specific_class_id: r.get(4)?,
                specific_user_id: r.get(5)?,
                sender_id: r.get(6)?,
                created_at: r.get(7)?,
                recipient_count: r.get(8)?,
                read_count: r.get(9)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxItem {
    pub read_state_id: String,
    pub notification_id: String,
    pub title: String,
    pub message: String,
    pub sender_id: Option<String>,
    pub created_at: String,
    pub is_read: bool,
    pub read_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inbox {
    pub items: Vec<InboxItem>,
    pub unread: usize,
}

pub fn inbox(conn: &Connection, user_id: &str) -> SchoolResult<Inbox> {
    roster::require_user(conn, user_id)?;
    let mut stmt = conn.prepare(
        "SELECT r.id, n.id, n.title, n.message, n.sender_id, n.created_at, r.is_read, r.read_at
         FROM notification_reads r
         JOIN notifications n ON n.id = r.notification_id
         WHERE r.user_id = ?
         ORDER BY n.created_at DESC, n.rowid DESC",
    )?;
    let items = stmt
        .query_map([user_id], |r| {
            Ok(InboxItem {
                read_state_id: r.get(0)?,
                notification_id: r.get(1)?,
                title: r.get(2)?,
                message: r.get(3)?,
                sender_id: r.get(4)?,
                created_at: r.get(5)?,
                is_read: r.get::<_, i64>(6)? != 0,
                read_at: r.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let unread = items.iter().filter(|i| !i.is_read).count();
    Ok(Inbox { items, unread })
}

/// Marks one read-state row read. Rows belonging to someone else look the
/// same as missing ones. Returns false if it was already read.
pub fn mark_read(conn: &Connection, read_state_id: &str, user_id: &str, now: DateTime<Utc>) -> SchoolResult<bool> {
    let is_read: i64 = conn
        .query_row(
            "SELECT is_read FROM notification_reads WHERE id = ? AND user_id = ?",
            (read_state_id, user_id),
            |r| r.get(0),
        )
        .optional()?
        .ok_or(SchoolError::NotFound("notification"))?;
    if is_read != 0 {
        return Ok(false);
    }
    conn.execute(
        "UPDATE notification_reads SET is_read = 1, read_at = ? WHERE id = ? AND user_id = ?",
        (db::timestamp(now), read_state_id, user_id),
    )?;
    Ok(true)
}

pub fn mark_all_read(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> SchoolResult<usize> {
    roster::require_user(conn, user_id)?;
    Ok(conn.execute(
        "UPDATE notification_reads SET is_read = 1, read_at = ? WHERE user_id = ? AND is_read = 0",
        (db::timestamp(now), user_id),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::roster::fixtures::*;

    fn send_to(conn: &Connection, selector: RecipientSelector) -> SchoolResult<Sent> {
        send(
            conn,
            &Outgoing {
                title: "Exam week",
                message: "Bring pencils",
                selector: &selector,
                sender_id: None,
            },
            now(),
        )
    }

    #[test]
    fn class_selector_reaches_exactly_the_class_students() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        student(&conn, "student2", "S-002", &school.classroom_id);
        student(&conn, "student3", "S-003", &school.other_classroom_id);
        user(&conn, "parent1", Role::Parent);

        let sent = send_to(&conn, RecipientSelector::Class(school.classroom_id.clone())).expect("send");
        assert_eq!(sent.recipients, 2);
        let rows: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM notification_reads WHERE notification_id = ?",
                [&sent.notification_id],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(rows, 2);
    }

    #[test]
    fn role_selectors_and_all() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        user(&conn, "admin1", Role::Admin);
        assert_eq!(send_to(&conn, RecipientSelector::All).expect("all").recipients, 3);
        assert_eq!(send_to(&conn, RecipientSelector::Students).expect("s").recipients, 1);
        assert_eq!(send_to(&conn, RecipientSelector::Teachers).expect("t").recipients, 1);
        let one = send_to(&conn, RecipientSelector::Individual(school.teacher_id.clone())).expect("one");
        assert_eq!(one.recipients, 1);
    }

    #[test]
    fn unknown_targets_write_nothing() {
        let conn = db::open_in_memory();
        school(&conn);
        assert!(matches!(
            send_to(&conn, RecipientSelector::Class("nope".into())),
            Err(SchoolError::NotFound("classroom"))
        ));
        assert!(matches!(
            send_to(&conn, RecipientSelector::Individual("nope".into())),
            Err(SchoolError::NotFound("user"))
        ));
        assert!(history(&conn).expect("history").is_empty());
    }

    #[test]
    fn read_state_is_per_user() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        let student_user = roster::get_student(&conn, &school.student_id).expect("student").user_id;
        send_to(&conn, RecipientSelector::All).expect("send");

        let inbox_s = inbox(&conn, &student_user).expect("inbox");
        assert_eq!(inbox_s.unread, 1);
        let rsid = inbox_s.items[0].read_state_id.clone();

        assert!(matches!(
            mark_read(&conn, &rsid, &school.teacher_id, now()),
            Err(SchoolError::NotFound(_))
        ));
        assert!(mark_read(&conn, &rsid, &student_user, now()).expect("read"));
        assert!(!mark_read(&conn, &rsid, &student_user, now()).expect("again"));

        assert_eq!(inbox(&conn, &student_user).expect("inbox").unread, 0);
        assert_eq!(inbox(&conn, &school.teacher_id).expect("inbox").unread, 1);

        assert_eq!(mark_all_read(&conn, &school.teacher_id, now()).expect("all"), 1);
        let h = history(&conn).expect("history");
        assert_eq!(h[0].recipient_count, 2);
        assert_eq!(h[0].read_count, 2);
    }

    #[test]
    fn blank_title_is_rejected() {
        let conn = db::open_in_memory();
        school(&conn);
        let res = send(
            &conn,
            &Outgoing {
                title: "  ",
                message: "x",
                selector: &RecipientSelector::All,
                sender_id: None,
            },
            now(),
        );
        assert!(matches!(res, Err(SchoolError::BadParams(_))));
    }
}
