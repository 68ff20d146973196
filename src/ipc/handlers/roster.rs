use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_enum, get_optional_enum, get_optional_str, get_required_str, now, today, with_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Gender, Role};
use crate::roster::{self, ImportRow, NewStudent, NewUser};
use rusqlite::Connection;
use serde_json::{json, Value};

fn users_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let username = get_required_str(params, "username")?;
    let first_name = get_optional_str(params, "firstName")?.unwrap_or_default();
    let last_name = get_optional_str(params, "lastName")?.unwrap_or_default();
    let email = get_optional_str(params, "email")?.unwrap_or_default();
    let role = get_enum(params, "role", Role::parse)?;
    let gender = get_optional_enum(params, "gender", Gender::parse)?;
    let phone = get_optional_str(params, "phone")?;
    let user = roster::create_user(
        conn,
        &NewUser {
            username: &username,
            first_name: &first_name,
            last_name: &last_name,
            email: &email,
            role,
            gender,
            phone: phone.as_deref(),
        },
        now(),
    )?;
    tracing::info!(user_id = %user.id, role = role.as_str(), "user created");
    Ok(json!({ "user": user }))
}

fn users_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let role = get_optional_enum(params, "role", Role::parse)?;
    let users = roster::list_users(conn, role)?;
    Ok(json!({ "users": users }))
}

fn users_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    Ok(json!({ "user": roster::get_user(conn, &user_id)? }))
}

fn teachers_register(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let employee_id = get_required_str(params, "employeeId")?;
    let user = roster::register_teacher(conn, &user_id, &employee_id)?;
    Ok(json!({ "user": user }))
}

fn classrooms_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let class = roster::create_classroom(conn, &name)?;
    Ok(json!({ "classroom": class }))
}

fn classrooms_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "classrooms": roster::list_classrooms(conn)? }))
}

fn classrooms_rename(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let name = get_required_str(params, "name")?;
    roster::rename_classroom(conn, &classroom_id, &name)?;
    Ok(json!({ "ok": true }))
}

fn classrooms_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let name = roster::delete_classroom(conn, &classroom_id)?;
    tracing::info!(classroom_id = %classroom_id, name = %name, "classroom deleted");
    Ok(json!({ "ok": true, "name": name }))
}

fn sections_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_required_str(params, "classroomId")?;
    let name = get_required_str(params, "name")?;
    let section = roster::create_section(conn, &classroom_id, &name)?;
    Ok(json!({ "section": section }))
}

fn sections_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    roster::delete_section(conn, &section_id)?;
    Ok(json!({ "ok": true }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let roll_number = get_required_str(params, "rollNumber")?;
    let classroom_id = get_optional_str(params, "classroomId")?;
    let section_id = get_optional_str(params, "sectionId")?;
    let student = roster::create_student(
        conn,
        &NewStudent {
            user_id: &user_id,
            roll_number: &roll_number,
            classroom_id: classroom_id.as_deref(),
            section_id: section_id.as_deref(),
        },
        today(),
    )?;
    Ok(json!({ "student": student }))
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_optional_str(params, "classroomId")?;
    let students = roster::list_students(conn, classroom_id.as_deref())?;
    Ok(json!({ "students": students }))
}

fn students_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    Ok(json!({ "student": roster::get_student(conn, &student_id)? }))
}

fn students_promote(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let classroom_id = get_required_str(params, "classroomId")?;
    let section_id = get_optional_str(params, "sectionId")?;
    let student = roster::promote_student(conn, &student_id, &classroom_id, section_id.as_deref())?;
    Ok(json!({ "student": student }))
}

fn students_bulk_import(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let Some(raw) = params.get("rows").filter(|v| v.is_array()) else {
        return Err(HandlerErr::bad_params("rows must be an array"));
    };
    let rows: Vec<ImportRow> = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid rows: {}", e)))?;
    let report = roster::bulk_import(conn, &rows, now(), today())?;
    Ok(json!(report))
}

fn parents_link_child(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let parent_user_id = get_required_str(params, "parentUserId")?;
    let student_id = get_required_str(params, "studentId")?;
    roster::link_child(conn, &parent_user_id, &student_id)?;
    Ok(json!({ "ok": true }))
}

fn parents_children(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let parent_user_id = get_required_str(params, "parentUserId")?;
    Ok(json!({ "children": roster::children_of(conn, &parent_user_id)? }))
}

fn subjects_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let classroom_id = get_required_str(params, "classroomId")?;
    let teacher = get_optional_str(params, "teacherUserId")?;
    let subject = roster::create_subject(conn, &name, &classroom_id, teacher.as_deref())?;
    Ok(json!({ "subject": subject }))
}

fn subjects_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let classroom_id = get_optional_str(params, "classroomId")?;
    Ok(json!({ "subjects": roster::list_subjects(conn, classroom_id.as_deref())? }))
}

fn subjects_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let name = get_optional_str(params, "name")?;
    // Present-but-null clears the teacher; absent leaves it alone.
    let teacher = if params.get("teacherUserId").is_some() {
        Some(get_optional_str(params, "teacherUserId")?)
    } else {
        None
    };
    let subject = roster::update_subject(
        conn,
        &subject_id,
        name.as_deref(),
        teacher.as_ref().map(|t| t.as_deref()),
    )?;
    Ok(json!({ "subject": subject }))
}

fn subjects_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let name = roster::delete_subject(conn, &subject_id)?;
    Ok(json!({ "ok": true, "name": name }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "users.create" => users_create,
        "users.list" => users_list,
        "users.get" => users_get,
        "teachers.register" => teachers_register,
        "classrooms.create" => classrooms_create,
        "classrooms.list" => classrooms_list,
        "classrooms.rename" => classrooms_rename,
        "classrooms.delete" => classrooms_delete,
        "sections.create" => sections_create,
        "sections.delete" => sections_delete,
        "students.create" => students_create,
        "students.list" => students_list,
        "students.get" => students_get,
        "students.promote" => students_promote,
        "students.bulkImport" => students_bulk_import,
        "parents.linkChild" => parents_link_child,
        "parents.children" => parents_children,
        "subjects.create" => subjects_create,
        "subjects.list" => subjects_list,
        "subjects.update" => subjects_update,
        "subjects.delete" => subjects_delete,
        _ => return None,
    };
    Some(with_db(state, req, handler))
}
