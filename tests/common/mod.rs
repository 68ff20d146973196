#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub struct Sidecar {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
    workspace: Option<PathBuf>,
    next_id: u64,
}

impl Sidecar {
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_schoold");
        let mut child = Command::new(exe)
            .env_remove("SCHOOLD_WORKSPACE")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn schoold");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout),
            workspace: None,
            next_id: 0,
        }
    }

    /// Spawns the daemon and selects a fresh workspace.
    pub fn with_workspace(prefix: &str) -> Self {
        let mut s = Self::spawn();
        let ws = temp_dir(prefix);
        s.ok("workspace.select", json!({ "path": ws.to_string_lossy() }));
        s.workspace = Some(ws);
        s
    }

    pub fn send_raw(&mut self, line: &str) -> serde_json::Value {
        let stdin = self.stdin.as_mut().expect("stdin open");
        writeln!(stdin, "{}", line).expect("write request");
        stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response");
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Asserts failure and returns the error code.
    pub fn err_code(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .expect("error code")
            .to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        drop(self.stdin.take());
        let _ = self.child.wait();
        if let Some(ws) = self.workspace.take() {
            let _ = std::fs::remove_dir_all(ws);
        }
    }
}

pub fn str_at<'a>(v: &'a serde_json::Value, path: &[&str]) -> &'a str {
    let mut cur = v;
    for key in path {
        cur = cur.get(*key).unwrap_or_else(|| panic!("missing {} in {}", key, v));
    }
    cur.as_str().unwrap_or_else(|| panic!("{:?} is not a string in {}", path, v))
}

pub struct School {
    pub classroom_id: String,
    pub other_classroom_id: String,
    pub teacher_id: String,
    pub subject_id: String,
    pub student_id: String,
    pub student_user_id: String,
}

pub fn create_user(s: &mut Sidecar, username: &str, role: &str) -> String {
    let res = s.ok(
        "users.create",
        json!({ "username": username, "firstName": username, "role": role }),
    );
    str_at(&res, &["user", "id"]).to_string()
}

/// Returns (studentId, userId).
pub fn create_student(s: &mut Sidecar, username: &str, roll: &str, classroom_id: &str) -> (String, String) {
    let user_id = create_user(s, username, "student");
    let res = s.ok(
        "students.create",
        json!({ "userId": user_id, "rollNumber": roll, "classroomId": classroom_id }),
    );
    (str_at(&res, &["student", "id"]).to_string(), user_id)
}

pub fn seed_school(s: &mut Sidecar) -> School {
    let c = s.ok("classrooms.create", json!({ "name": "Grade 10" }));
    let classroom_id = str_at(&c, &["classroom", "id"]).to_string();
    let c2 = s.ok("classrooms.create", json!({ "name": "Grade 11" }));
    let other_classroom_id = str_at(&c2, &["classroom", "id"]).to_string();

    let teacher_id = create_user(s, "teacher1", "teacher");
    s.ok(
        "teachers.register",
        json!({ "userId": teacher_id, "employeeId": "EMP-001" }),
    );
    let sub = s.ok(
        "subjects.create",
        json!({ "name": "Math", "classroomId": classroom_id, "teacherUserId": teacher_id }),
    );
    let subject_id = str_at(&sub, &["subject", "id"]).to_string();
    let (student_id, student_user_id) = create_student(s, "student1", "S-001", &classroom_id);
    School {
        classroom_id,
        other_classroom_id,
        teacher_id,
        subject_id,
        student_id,
        student_user_id,
    }
}
