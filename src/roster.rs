//! Users, classrooms, sections, students, parents and subjects.

use crate::db;
use crate::error::{unique_or_db, SchoolError, SchoolResult};
use crate::model::{is_valid_code, is_valid_phone, Gender, Role};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub email: String,
    pub role: String,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub employee_id: Option<String>,
    pub date_joined: String,
}

#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
    pub role: Role,
    pub gender: Option<Gender>,
    pub phone: Option<&'a str>,
}

pub fn full_name(first: &str, last: &str, fallback: &str) -> String {
    let name = format!("{} {}", first.trim(), last.trim()).trim().to_string();
    if name.is_empty() {
        fallback.to_string()
    } else {
        name
    }
}

const USER_COLUMNS: &str =
    "id, username, first_name, last_name, email, role, gender, phone, employee_id, date_joined";

fn user_from_row(r: &Row<'_>) -> rusqlite::Result<UserRow> {
    let username: String = r.get(1)?;
    let first_name: String = r.get(2)?;
    let last_name: String = r.get(3)?;
    Ok(UserRow {
        id: r.get(0)?,
        full_name: full_name(&first_name, &last_name, &username),
        username,
        first_name,
        last_name,
        email: r.get(4)?,
        role: r.get(5)?,
        gender: r.get(6)?,
        phone: r.get(7)?,
        employee_id: r.get(8)?,
        date_joined: r.get(9)?,
    })
}

pub fn create_user(conn: &Connection, new: &NewUser<'_>, now: DateTime<Utc>) -> SchoolResult<UserRow> {
    let username = new.username.trim();
    if username.is_empty() {
        return Err(SchoolError::bad_params("username must not be empty"));
    }
    let phone = new.phone.map(str::trim).filter(|p| !p.is_empty());
    if let Some(p) = phone {
        if !is_valid_phone(p) {
            return Err(SchoolError::bad_params("phone number has invalid characters"));
        }
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users(id, username, first_name, last_name, email, role, gender, phone, date_joined)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            username,
            new.first_name.trim(),
            new.last_name.trim(),
            new.email.trim(),
            new.role.as_str(),
            new.gender.map(Gender::as_str),
            phone,
            db::timestamp(now),
        ),
    )
    .map_err(|e| unique_or_db(e, || format!("username '{}' already exists", username)))?;
    get_user(conn, &id)
}

pub fn get_user(conn: &Connection, user_id: &str) -> SchoolResult<UserRow> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS),
        [user_id],
        user_from_row,
    )
    .optional()?
    .ok_or(SchoolError::NotFound("user"))
}

pub fn list_users(conn: &Connection, role: Option<Role>) -> SchoolResult<Vec<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users
         WHERE (?1 IS NULL OR role = ?1)
         ORDER BY date_joined DESC, username",
        USER_COLUMNS
    ))?;
    let rows = stmt
        .query_map([role.map(Role::as_str)], user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn user_role(conn: &Connection, user_id: &str) -> SchoolResult<Role> {
    let raw: String = conn
        .query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| r.get(0))
        .optional()?
        .ok_or(SchoolError::NotFound("user"))?;
    Role::parse(&raw).ok_or_else(|| SchoolError::bad_params(format!("unknown role '{}'", raw)))
}

pub fn require_user(conn: &Connection, user_id: &str) -> SchoolResult<()> {
    user_role(conn, user_id).map(|_| ())
}

/// Promotes an existing user to teacher with an employee id.
pub fn register_teacher(conn: &Connection, user_id: &str, employee_id: &str) -> SchoolResult<UserRow> {
    let employee_id = employee_id.trim();
    if !is_valid_code(employee_id) {
        return Err(SchoolError::bad_params(
            "employee id must contain only A-Z, 0-9 and '-'",
        ));
    }
    if user_role(conn, user_id)? == Role::Admin {
        return Err(SchoolError::bad_params("admins cannot be registered as teachers"));
    }
    conn.execute(
        "UPDATE users SET role = 'teacher', employee_id = ? WHERE id = ?",
        (employee_id, user_id),
    )
    .map_err(|e| unique_or_db(e, || format!("employee id '{}' already taken", employee_id)))?;
    get_user(conn, user_id)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRow {
    pub id: String,
    pub classroom_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassroomRow {
    pub id: String,
    pub name: String,
    pub student_count: i64,
    pub subject_count: i64,
    pub sections: Vec<SectionRow>,
}

pub fn require_classroom(conn: &Connection, classroom_id: &str) -> SchoolResult<String> {
    conn.query_row(
        "SELECT name FROM classrooms WHERE id = ?",
        [classroom_id],
        |r| r.get(0),
    )
    .optional()?
    .ok_or(SchoolError::NotFound("classroom"))
}

fn clean_name(name: &str, what: &str) -> SchoolResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(SchoolError::bad_params(format!("{} name must not be empty", what)));
    }
    Ok(name.to_string())
}

pub fn create_classroom(conn: &Connection, name: &str) -> SchoolResult<ClassroomRow> {
    let name = clean_name(name, "class")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classrooms(id, name) VALUES(?, ?)",
        (&id, &name),
    )
    .map_err(|e| unique_or_db(e, || format!("class '{}' already exists", name)))?;
    Ok(ClassroomRow {
        id,
        name,
        student_count: 0,
        subject_count: 0,
        sections: Vec::new(),
    })
}

pub fn list_classrooms(conn: &Connection) -> SchoolResult<Vec<ClassroomRow>> {
    // Correlated subqueries keep the counts from multiplying across joins.
    let mut stmt = conn.prepare(
        "SELECT
           c.id,
           c.name,
           (SELECT COUNT(*) FROM students s WHERE s.classroom_id = c.id),
           (SELECT COUNT(*) FROM subjects sub WHERE sub.classroom_id = c.id)
         FROM classrooms c
         ORDER BY c.name",
    )?;
    let mut classes = stmt
        .query_map([], |r| {
            Ok(ClassroomRow {
                id: r.get(0)?,
                name: r.get(1)?,
                student_count: r.get(2)?,
                subject_count: r.get(3)?,
                sections: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut sec_stmt =
        conn.prepare("SELECT id, classroom_id, name FROM sections WHERE classroom_id = ? ORDER BY name")?;
    for class in classes.iter_mut() {
        class.sections = sec_stmt
            .query_map([&class.id], |r| {
                Ok(SectionRow {
                    id: r.get(0)?,
                    classroom_id: r.get(1)?,
                    name: r.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
    }
    Ok(classes)
}

pub fn rename_classroom(conn: &Connection, classroom_id: &str, name: &str) -> SchoolResult<()> {
    let name = clean_name(name, "class")?;
    let changed = conn
        .execute(
            "UPDATE classrooms SET name = ? WHERE id = ?",
            (&name, classroom_id),
        )
        .map_err(|e| unique_or_db(e, || format!("class name '{}' already taken", name)))?;
    if changed == 0 {
        return Err(SchoolError::NotFound("classroom"));
    }
    Ok(())
}

pub fn delete_classroom(conn: &Connection, classroom_id: &str) -> SchoolResult<String> {
    let name = require_classroom(conn, classroom_id)?;
    conn.execute("DELETE FROM classrooms WHERE id = ?", [classroom_id])?;
    Ok(name)
}

pub fn create_section(conn: &Connection, classroom_id: &str, name: &str) -> SchoolResult<SectionRow> {
    let name = clean_name(name, "section")?;
    require_classroom(conn, classroom_id)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sections(id, classroom_id, name) VALUES(?, ?, ?)",
        (&id, classroom_id, &name),
    )
    .map_err(|e| unique_or_db(e, || "section already exists in this class".to_string()))?;
    Ok(SectionRow {
        id,
        classroom_id: classroom_id.to_string(),
        name,
    })
}

pub fn delete_section(conn: &Connection, section_id: &str) -> SchoolResult<()> {
    if conn.execute("DELETE FROM sections WHERE id = ?", [section_id])? == 0 {
        return Err(SchoolError::NotFound("section"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub full_name: String,
    pub roll_number: String,
    pub classroom_id: Option<String>,
    pub classroom_name: Option<String>,
    pub section_id: Option<String>,
    pub section_name: Option<String>,
    pub admission_date: String,
    pub promoted: bool,
}

const STUDENT_SELECT: &str = "SELECT s.id, s.user_id, u.username, u.first_name, u.last_name,
        s.roll_number, s.classroom_id, c.name, s.section_id, sec.name,
        s.admission_date, s.promoted
     FROM students s
     JOIN users u ON u.id = s.user_id
     LEFT JOIN classrooms c ON c.id = s.classroom_id
     LEFT JOIN sections sec ON sec.id = s.section_id";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<StudentRow> {
    let username: String = r.get(2)?;
    let first: String = r.get(3)?;
    let last: String = r.get(4)?;
    Ok(StudentRow {
        id: r.get(0)?,
        user_id: r.get(1)?,
        full_name: full_name(&first, &last, &username),
        username,
        roll_number: r.get(5)?,
        classroom_id: r.get(6)?,
        classroom_name: r.get(7)?,
        section_id: r.get(8)?,
        section_name: r.get(9)?,
        admission_date: r.get(10)?,
        promoted: r.get::<_, i64>(11)? != 0,
    })
}

#[derive(Debug, Clone)]
pub struct NewStudent<'a> {
    pub user_id: &'a str,
    pub roll_number: &'a str,
    pub classroom_id: Option<&'a str>,
    pub section_id: Option<&'a str>,
}

pub fn create_student(conn: &Connection, new: &NewStudent<'_>, today: NaiveDate) -> SchoolResult<StudentRow> {
    let roll = new.roll_number.trim();
    if !is_valid_code(roll) {
        return Err(SchoolError::bad_params(
            "roll number must contain only A-Z, 0-9 and '-'",
        ));
    }
    if user_role(conn, new.user_id)? != Role::Student {
        return Err(SchoolError::bad_params("user must have the student role"));
    }

    let mut classroom_id = new.classroom_id.map(str::to_string);
    if let Some(cid) = classroom_id.as_deref() {
        require_classroom(conn, cid)?;
    }
    if let Some(sid) = new.section_id {
        let section_class: String = conn
            .query_row(
                "SELECT classroom_id FROM sections WHERE id = ?",
                [sid],
                |r| r.get(0),
            )
            .optional()?
            .ok_or(SchoolError::NotFound("section"))?;
        match classroom_id.as_deref() {
            Some(cid) if cid != section_class => {
                return Err(SchoolError::bad_params("section does not belong to the classroom"));
            }
            Some(_) => {}
            None => classroom_id = Some(section_class),
        }
    }

    let taken: bool = conn
        .query_row(
            "SELECT 1 FROM students WHERE roll_number = ?",
            [roll],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if taken {
        return Err(SchoolError::DuplicateEntry(format!(
            "roll number '{}' already exists",
            roll
        )));
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, user_id, roll_number, classroom_id, section_id, admission_date)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            new.user_id,
            roll,
            classroom_id.as_deref(),
            new.section_id,
            db::date_key(today),
        ),
    )
    .map_err(|e| unique_or_db(e, || "user already has a student profile".to_string()))?;
    get_student(conn, &id)
}

pub fn get_student(conn: &Connection, student_id: &str) -> SchoolResult<StudentRow> {
    conn.query_row(
        &format!("{} WHERE s.id = ?", STUDENT_SELECT),
        [student_id],
        student_from_row,
    )
    .optional()?
    .ok_or(SchoolError::NotFound("student"))
}

pub fn list_students(conn: &Connection, classroom_id: Option<&str>) -> SchoolResult<Vec<StudentRow>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE (?1 IS NULL OR s.classroom_id = ?1)
         ORDER BY c.name, sec.name, s.roll_number",
        STUDENT_SELECT
    ))?;
    let rows = stmt
        .query_map([classroom_id], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The student profile attached to a login, if any.
pub fn student_for_user(conn: &Connection, user_id: &str) -> SchoolResult<Option<StudentRow>> {
    Ok(conn
        .query_row(
            &format!("{} WHERE s.user_id = ?", STUDENT_SELECT),
            [user_id],
            student_from_row,
        )
        .optional()?)
}

/// Moves a student into another classroom and flags them as promoted.
/// Their existing attendance and scores stay with the old subjects.
pub fn promote_student(
    conn: &Connection,
    student_id: &str,
    classroom_id: &str,
    section_id: Option<&str>,
) -> SchoolResult<StudentRow> {
    let current = get_student(conn, student_id)?;
    require_classroom(conn, classroom_id)?;
    if current.classroom_id.as_deref() == Some(classroom_id) {
        return Err(SchoolError::bad_params("student is already in this classroom"));
    }
    if let Some(sid) = section_id {
        let section_class: String = conn
            .query_row("SELECT classroom_id FROM sections WHERE id = ?", [sid], |r| r.get(0))
            .optional()?
            .ok_or(SchoolError::NotFound("section"))?;
        if section_class != classroom_id {
            return Err(SchoolError::bad_params("section does not belong to the classroom"));
        }
    }
    conn.execute(
        "UPDATE students SET classroom_id = ?, section_id = ?, promoted = 1 WHERE id = ?",
        (classroom_id, section_id, student_id),
    )?;
    tracing::info!(
        student_id,
        from = current.classroom_id.as_deref().unwrap_or("-"),
        to = classroom_id,
        "student promoted"
    );
    get_student(conn, student_id)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRow {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roll_number: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub section: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportError {
    pub row: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported: usize,
    pub errors: Vec<ImportError>,
}

/// Creates a student login and profile per row. Each row commits on its own so
/// a bad row leaves no half-created user behind and does not stop the rest.
pub fn bulk_import(
    conn: &Connection,
    rows: &[ImportRow],
    now: DateTime<Utc>,
    today: NaiveDate,
) -> SchoolResult<ImportReport> {
    let mut report = ImportReport::default();
    for (i, row) in rows.iter().enumerate() {
        let tx = conn.unchecked_transaction()?;
        match import_one(&tx, row, now, today) {
            Ok(()) => {
                tx.commit()?;
                report.imported += 1;
            }
            Err(e) => {
                drop(tx);
                report.errors.push(ImportError {
                    row: i + 1,
                    message: e.to_string(),
                });
            }
        }
    }
    tracing::info!(
        imported = report.imported,
        failed = report.errors.len(),
        "student bulk import finished"
    );
    Ok(report)
}

fn import_one(conn: &Connection, row: &ImportRow, now: DateTime<Utc>, today: NaiveDate) -> SchoolResult<()> {
    if row.username.trim().is_empty() {
        return Err(SchoolError::bad_params("username missing"));
    }
    let classroom_id: String = conn
        .query_row(
            "SELECT id FROM classrooms WHERE name = ?",
            [row.class.trim()],
            |r| r.get(0),
        )
        .optional()?
        .ok_or(SchoolError::NotFound("classroom"))?;
    let section_id: String = conn
        .query_row(
            "SELECT id FROM sections WHERE classroom_id = ? AND name = ?",
            (&classroom_id, row.section.trim()),
            |r| r.get(0),
        )
        .optional()?
        .ok_or(SchoolError::NotFound("section"))?;
    let user = create_user(
        conn,
        &NewUser {
            username: &row.username,
            first_name: &row.first_name,
            last_name: &row.last_name,
            email: &row.email,
            role: Role::Student,
            gender: None,
            phone: None,
        },
        now,
    )?;
    create_student(
        conn,
        &NewStudent {
            user_id: &user.id,
            roll_number: &row.roll_number,
            classroom_id: Some(classroom_id.as_str()),
            section_id: Some(section_id.as_str()),
        },
        today,
    )?;
    Ok(())
}

pub fn link_child(conn: &Connection, parent_user_id: &str, student_id: &str) -> SchoolResult<()> {
    if user_role(conn, parent_user_id)? != Role::Parent {
        return Err(SchoolError::bad_params("user must have the parent role"));
    }
    get_student(conn, student_id)?;
    conn.execute(
        "INSERT OR IGNORE INTO parent_children(parent_user_id, student_id) VALUES(?, ?)",
        (parent_user_id, student_id),
    )?;
    Ok(())
}

pub fn children_of(conn: &Connection, parent_user_id: &str) -> SchoolResult<Vec<StudentRow>> {
    require_user(conn, parent_user_id)?;
    let mut stmt = conn.prepare(&format!(
        "{} JOIN parent_children pc ON pc.student_id = s.id
         WHERE pc.parent_user_id = ?
         ORDER BY s.roll_number",
        STUDENT_SELECT
    ))?;
    let rows = stmt
        .query_map([parent_user_id], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRow {
    pub id: String,
    pub name: String,
    pub classroom_id: String,
    pub classroom_name: String,
    pub teacher_user_id: Option<String>,
    pub teacher_name: Option<String>,
}

const SUBJECT_SELECT: &str = "SELECT sub.id, sub.name, sub.classroom_id, c.name,
        sub.teacher_user_id, t.username, t.first_name, t.last_name
     FROM subjects sub
     JOIN classrooms c ON c.id = sub.classroom_id
     LEFT JOIN users t ON t.id = sub.teacher_user_id";

fn subject_from_row(r: &Row<'_>) -> rusqlite::Result<SubjectRow> {
    let teacher_username: Option<String> = r.get(5)?;
    let teacher_name = match teacher_username {
        Some(u) => {
            let first: String = r.get(6)?;
            let last: String = r.get(7)?;
            Some(full_name(&first, &last, &u))
        }
        None => None,
    };
    Ok(SubjectRow {
        id: r.get(0)?,
        name: r.get(1)?,
        classroom_id: r.get(2)?,
        classroom_name: r.get(3)?,
        teacher_user_id: r.get(4)?,
        teacher_name,
    })
}

fn require_teacher(conn: &Connection, user_id: &str) -> SchoolResult<()> {
    if user_role(conn, user_id)? != Role::Teacher {
        return Err(SchoolError::bad_params("user must have the teacher role"));
    }
    Ok(())
}

pub fn create_subject(
    conn: &Connection,
    name: &str,
    classroom_id: &str,
    teacher_user_id: Option<&str>,
) -> SchoolResult<SubjectRow> {
    let name = clean_name(name, "subject")?;
    require_classroom(conn, classroom_id)?;
    if let Some(t) = teacher_user_id {
        require_teacher(conn, t)?;
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name, classroom_id, teacher_user_id) VALUES(?, ?, ?, ?)",
        (&id, &name, classroom_id, teacher_user_id),
    )
    .map_err(|e| unique_or_db(e, || format!("'{}' already exists in this class", name)))?;
    get_subject(conn, &id)
}

pub fn get_subject(conn: &Connection, subject_id: &str) -> SchoolResult<SubjectRow> {
    conn.query_row(
        &format!("{} WHERE sub.id = ?", SUBJECT_SELECT),
        [subject_id],
        subject_from_row,
    )
    .optional()?
    .ok_or(SchoolError::NotFound("subject"))
}

pub fn list_subjects(conn: &Connection, classroom_id: Option<&str>) -> SchoolResult<Vec<SubjectRow>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE (?1 IS NULL OR sub.classroom_id = ?1) ORDER BY c.name, sub.name",
        SUBJECT_SELECT
    ))?;
    let rows = stmt
        .query_map([classroom_id], subject_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// `teacher`: `None` leaves the teacher alone, `Some(None)` clears it.
pub fn update_subject(
    conn: &Connection,
    subject_id: &str,
    name: Option<&str>,
    teacher: Option<Option<&str>>,
) -> SchoolResult<SubjectRow> {
    let current = get_subject(conn, subject_id)?;
    let name = match name {
        Some(n) => clean_name(n, "subject")?,
        None => current.name.clone(),
    };
    let teacher_id = match teacher {
        Some(Some(t)) => {
            require_teacher(conn, t)?;
            Some(t.to_string())
        }
        Some(None) => None,
        None => current.teacher_user_id.clone(),
    };
    conn.execute(
        "UPDATE subjects SET name = ?, teacher_user_id = ? WHERE id = ?",
        (&name, teacher_id.as_deref(), subject_id),
    )
    .map_err(|e| unique_or_db(e, || format!("'{}' already exists in this class", name)))?;
    get_subject(conn, subject_id)
}

pub fn delete_subject(conn: &Connection, subject_id: &str) -> SchoolResult<String> {
    let subject = get_subject(conn, subject_id)?;
    conn.execute("DELETE FROM subjects WHERE id = ?", [subject_id])?;
    Ok(subject.name)
}

/// Checks both ids exist and that the subject is taught in the student's
/// classroom.
pub fn require_enrollment(conn: &Connection, student_id: &str, subject_id: &str) -> SchoolResult<()> {
    let student_class: Option<String> = conn
        .query_row(
            "SELECT classroom_id FROM students WHERE id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or(SchoolError::NotFound("student"))?;
    let subject_class: String = conn
        .query_row(
            "SELECT classroom_id FROM subjects WHERE id = ?",
            [subject_id],
            |r| r.get(0),
        )
        .optional()?
        .ok_or(SchoolError::NotFound("subject"))?;
    if student_class.as_deref() != Some(subject_class.as_str()) {
        return Err(SchoolError::bad_params(
            "student is not enrolled in the subject's classroom",
        ));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn classroom_names_are_unique_ignoring_case() {
        let conn = db::open_in_memory();
        create_classroom(&conn, "Grade 10").expect("class");
        let dup = create_classroom(&conn, "grade 10");
        assert!(matches!(dup, Err(SchoolError::DuplicateEntry(_))));
    }

    #[test]
    fn roll_numbers_are_validated_and_unique() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        let uid = user(&conn, "student2", Role::Student);
        let bad = create_student(
            &conn,
            &NewStudent {
                user_id: &uid,
                roll_number: "s 2",
                classroom_id: Some(school.classroom_id.as_str()),
                section_id: None,
            },
            today(),
        );
        assert!(matches!(bad, Err(SchoolError::BadParams(_))));
        let dup = create_student(
            &conn,
            &NewStudent {
                user_id: &uid,
                roll_number: "S-001",
                classroom_id: Some(school.classroom_id.as_str()),
                section_id: None,
            },
            today(),
        );
        assert!(matches!(dup, Err(SchoolError::DuplicateEntry(_))));
    }

    #[test]
    fn section_implies_classroom() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        let section = create_section(&conn, &school.other_classroom_id, "A").expect("section");
        let uid = user(&conn, "student2", Role::Student);
        let s = create_student(
            &conn,
            &NewStudent {
                user_id: &uid,
                roll_number: "S-002",
                classroom_id: None,
                section_id: Some(section.id.as_str()),
            },
            today(),
        )
        .expect("student");
        assert_eq!(s.classroom_id.as_deref(), Some(school.other_classroom_id.as_str()));
        assert_eq!(s.section_name.as_deref(), Some("A"));
    }

    #[test]
    fn bulk_import_keeps_good_rows_and_reports_bad_ones() {
        let conn = db::open_in_memory();
        let class = create_classroom(&conn, "Grade 9").expect("class");
        create_section(&conn, &class.id, "B").expect("section");
        let rows = vec![
            ImportRow {
                username: "ana".into(),
                first_name: "Ana".into(),
                last_name: "Lee".into(),
                email: String::new(),
                roll_number: "G9-01".into(),
                class: "grade 9".into(),
                section: "b".into(),
            },
            ImportRow {
                username: "bo".into(),
                first_name: "Bo".into(),
                last_name: String::new(),
                email: String::new(),
                roll_number: "bad roll".into(),
                class: "Grade 9".into(),
                section: "B".into(),
            },
            ImportRow {
                username: String::new(),
                first_name: String::new(),
                last_name: String::new(),
                email: String::new(),
                roll_number: "G9-03".into(),
                class: "Grade 9".into(),
                section: "B".into(),
            },
        ];
        let report = bulk_import(&conn, &rows, now(), today()).expect("import");
        assert_eq!(report.imported, 1);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors[0].row, 2);
        // The failed row's user must not linger.
        let users = list_users(&conn, Some(Role::Student)).expect("users");
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].username, "ana");
    }

    #[test]
    fn enrollment_requires_matching_classroom() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        require_enrollment(&conn, &school.student_id, &school.subject_id).expect("enrolled");
        let outsider = student(&conn, "student9", "S-009", &school.other_classroom_id);
        assert!(matches!(
            require_enrollment(&conn, &outsider, &school.subject_id),
            Err(SchoolError::BadParams(_))
        ));
        assert!(matches!(
            require_enrollment(&conn, "missing", &school.subject_id),
            Err(SchoolError::NotFound("student"))
        ));
    }

    #[test]
    fn promotion_moves_student_and_sets_flag() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        assert!(!get_student(&conn, &school.student_id).expect("student").promoted);

        let again = promote_student(&conn, &school.student_id, &school.classroom_id, None);
        assert!(matches!(again, Err(SchoolError::BadParams(_))));
        let wrong_section = create_section(&conn, &school.classroom_id, "A").expect("section");
        let mismatched = promote_student(
            &conn,
            &school.student_id,
            &school.other_classroom_id,
            Some(wrong_section.id.as_str()),
        );
        assert!(matches!(mismatched, Err(SchoolError::BadParams(_))));

        let section = create_section(&conn, &school.other_classroom_id, "B").expect("section");
        let moved = promote_student(
            &conn,
            &school.student_id,
            &school.other_classroom_id,
            Some(section.id.as_str()),
        )
        .expect("promote");
        assert!(moved.promoted);
        assert_eq!(moved.classroom_id.as_deref(), Some(school.other_classroom_id.as_str()));
        assert_eq!(moved.section_name.as_deref(), Some("B"));
        // The old subject no longer counts the student as enrolled.
        assert!(matches!(
            require_enrollment(&conn, &school.student_id, &school.subject_id),
            Err(SchoolError::BadParams(_))
        ));
    }
}
