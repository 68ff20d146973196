mod common;

use common::{create_student, create_user, seed_school, Sidecar};
use serde_json::json;

#[test]
fn class_selector_reaches_only_enrolled_students() {
    let mut s = Sidecar::with_workspace("schoold-notify-class");
    let school = seed_school(&mut s);
    let (_, second_user) = create_student(&mut s, "student2", "S-002", &school.classroom_id);
    let (_, outsider_user) = create_student(&mut s, "student9", "S-009", &school.other_classroom_id);

    let sent = s.ok(
        "notifications.send",
        json!({
            "title": "Field trip",
            "message": "Bring a packed lunch on Friday.",
            "recipients": { "type": "class", "classroomId": school.classroom_id },
            "senderId": school.teacher_id,
        }),
    );
    assert_eq!(sent["recipients"].as_u64(), Some(2));

    for user in [&school.student_user_id, &second_user] {
        let inbox = s.ok("notifications.list", json!({ "userId": user }));
        assert_eq!(inbox["items"].as_array().map(|a| a.len()), Some(1));
        assert_eq!(inbox["unread"].as_u64(), Some(1));
        assert_eq!(inbox["items"][0]["title"].as_str(), Some("Field trip"));
    }
    let inbox = s.ok("notifications.list", json!({ "userId": outsider_user }));
    assert_eq!(inbox["items"].as_array().map(|a| a.len()), Some(0));

    let history = s.ok("notifications.history", json!({}));
    let rows = history["notifications"].as_array().expect("history");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["recipientType"].as_str(), Some("class"));
    assert_eq!(rows[0]["recipientCount"].as_i64(), Some(2));
    assert_eq!(rows[0]["readCount"].as_i64(), Some(0));
}

#[test]
fn read_state_belongs_to_its_recipient() {
    let mut s = Sidecar::with_workspace("schoold-notify-read");
    let school = seed_school(&mut s);
    let parent = create_user(&mut s, "parent1", "parent");

    s.ok(
        "notifications.send",
        json!({
            "title": "Exam week",
            "message": "Finals start Monday.",
            "recipients": { "type": "individual", "userId": school.student_user_id },
        }),
    );
    s.ok(
        "notifications.send",
        json!({
            "title": "Holiday",
            "message": "School is closed Thursday.",
            "recipients": { "type": "all" },
        }),
    );

    let inbox = s.ok("notifications.list", json!({ "userId": school.student_user_id }));
    assert_eq!(inbox["unread"].as_u64(), Some(2));
    let read_state_id = inbox["items"][0]["readStateId"]
        .as_str()
        .expect("read state id")
        .to_string();

    assert_eq!(
        s.err_code(
            "notifications.markRead",
            json!({ "readStateId": read_state_id, "userId": parent }),
        ),
        "not_found"
    );
    let first = s.ok(
        "notifications.markRead",
        json!({ "readStateId": read_state_id, "userId": school.student_user_id }),
    );
    assert_eq!(first["updated"].as_u64(), Some(1));
    let repeat = s.ok(
        "notifications.markRead",
        json!({ "readStateId": read_state_id, "userId": school.student_user_id }),
    );
    assert_eq!(repeat["updated"].as_u64(), Some(0));

    let all = s.ok("notifications.markAllRead", json!({ "userId": school.student_user_id }));
    assert_eq!(all["updated"].as_u64(), Some(1));
    let inbox = s.ok("notifications.list", json!({ "userId": school.student_user_id }));
    assert_eq!(inbox["unread"].as_u64(), Some(0));

    // The parent still has the broadcast unread.
    let inbox = s.ok("notifications.list", json!({ "userId": parent }));
    assert_eq!(inbox["unread"].as_u64(), Some(1));
}

#[test]
fn send_validates_selector_and_body() {
    let mut s = Sidecar::with_workspace("schoold-notify-invalid");
    let school = seed_school(&mut s);
    assert_eq!(
        s.err_code(
            "notifications.send",
            json!({ "title": "x", "message": "y", "recipients": { "type": "everyone" } }),
        ),
        "bad_params"
    );
    assert_eq!(
        s.err_code(
            "notifications.send",
            json!({ "title": "x", "message": "y", "recipients": { "type": "class", "classroomId": "missing" } }),
        ),
        "not_found"
    );
    assert_eq!(
        s.err_code(
            "notifications.send",
            json!({ "title": "  ", "message": "y", "recipients": { "type": "individual", "userId": school.teacher_id } }),
        ),
        "bad_params"
    );
}
