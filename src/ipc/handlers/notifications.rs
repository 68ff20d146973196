use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_str, get_required_str, now, with_db};
use crate::ipc::types::{AppState, Request};
use crate::model::RecipientSelector;
use crate::notify::{self, Outgoing};
use rusqlite::Connection;
use serde_json::{json, Value};

/// `{type, classroomId?, userId?}`
fn parse_selector(v: Option<&Value>) -> Result<RecipientSelector, HandlerErr> {
    let Some(v) = v.filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("recipients must be an object"));
    };
    let kind = get_required_str(v, "type")?;
    match kind.trim().to_ascii_lowercase().as_str() {
        "all" => Ok(RecipientSelector::All),
        "students" => Ok(RecipientSelector::Students),
        "teachers" => Ok(RecipientSelector::Teachers),
        "class" => Ok(RecipientSelector::Class(get_required_str(v, "classroomId")?)),
        "individual" => Ok(RecipientSelector::Individual(get_required_str(v, "userId")?)),
        _ => Err(HandlerErr::bad_params(format!("unknown recipient type '{}'", kind))),
    }
}

fn notifications_send(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    let message = get_required_str(params, "message")?;
    let selector = parse_selector(params.get("recipients"))?;
    let sender_id = get_optional_str(params, "senderId")?;
    let sent = notify::send(
        conn,
        &Outgoing {
            title: &title,
            message: &message,
            selector: &selector,
            sender_id: sender_id.as_deref(),
        },
        now(),
    )?;
    Ok(json!({
        "notificationId": sent.notification_id,
        "recipients": sent.recipients,
    }))
}

fn notifications_history(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "notifications": notify::history(conn)? }))
}

fn notifications_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let inbox = notify::inbox(conn, &user_id)?;
    Ok(json!(inbox))
}

fn notifications_mark_read(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let read_state_id = get_required_str(params, "readStateId")?;
    let user_id = get_required_str(params, "userId")?;
    let changed = notify::mark_read(conn, &read_state_id, &user_id, now())?;
    Ok(json!({ "updated": usize::from(changed) }))
}

fn notifications_mark_all_read(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let updated = notify::mark_all_read(conn, &user_id, now())?;
    Ok(json!({ "updated": updated }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "notifications.send" => notifications_send,
        "notifications.history" => notifications_history,
        "notifications.list" => notifications_list,
        "notifications.markRead" => notifications_mark_read,
        "notifications.markAllRead" => notifications_mark_all_read,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
