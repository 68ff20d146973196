//! Read-only aggregates over the ledgers. Every letter shown here comes from
//! `grading::letter_grade`.

use crate::attendance::{self, StatusCounts};
use crate::config::GradingPolicy;
use crate::db;
use crate::error::{SchoolError, SchoolResult};
use crate::grading::{letter_grade, mean, percent, round_off_1_decimal, LetterGrade};
use crate::model::ExamType;
use crate::roster::{self, StudentRow};
use chrono::{Datelike, Duration, NaiveDate};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectReport {
    pub subject_id: String,
    pub subject_name: String,
    pub midterm: Option<f64>,
    #[serde(rename = "final")]
    pub final_exam: Option<f64>,
    pub quiz: Option<f64>,
    pub assignment: Option<f64>,
    pub average: Option<f64>,
    pub grade: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCard {
    pub student: StudentRow,
    pub subjects: Vec<SubjectReport>,
    pub overall_average: Option<f64>,
    pub overall_grade: Option<String>,
}

fn graded(avg: Option<f64>) -> (Option<f64>, Option<String>) {
    let avg = avg.map(round_off_1_decimal);
    (avg, avg.map(|a| letter_grade(a).to_string()))
}

/// (subject_id, exam_type) -> score for one student.
fn student_scores(conn: &Connection, student_id: &str) -> SchoolResult<HashMap<(String, String), f64>> {
    let mut stmt = conn.prepare("SELECT subject_id, exam_type, score FROM scores WHERE student_id = ?")?;
    let mut rows = stmt.query([student_id])?;
    let mut out = HashMap::new();
    while let Some(r) = rows.next()? {
        out.insert((r.get(0)?, r.get(1)?), r.get(2)?);
    }
    Ok(out)
}

pub fn report_card(conn: &Connection, student_id: &str) -> SchoolResult<ReportCard> {
    let student = roster::get_student(conn, student_id)?;
    let scores = student_scores(conn, student_id)?;
    let subjects = match student.classroom_id.as_deref() {
        Some(cid) => roster::list_subjects(conn, Some(cid))?,
        None => Vec::new(),
    };

    let pick = |subject_id: &str, exam: ExamType| {
        scores
            .get(&(subject_id.to_string(), exam.as_str().to_string()))
            .copied()
    };
    let mut reports = Vec::with_capacity(subjects.len());
    let mut averages = Vec::new();
    for s in subjects {
        let midterm = pick(&s.id, ExamType::Midterm);
        let final_exam = pick(&s.id, ExamType::Final);
        let quiz = pick(&s.id, ExamType::Quiz);
        let assignment = pick(&s.id, ExamType::Assignment);
        let present: Vec<f64> = [midterm, final_exam, quiz, assignment]
            .into_iter()
            .flatten()
            .collect();
        let (average, grade) = graded(mean(&present));
        // Unscored subjects stay out of the overall mean instead of counting as zero.
        if let Some(a) = average {
            averages.push(a);
        }
        reports.push(SubjectReport {
            subject_id: s.id,
            subject_name: s.name,
            midterm,
            final_exam,
            quiz,
            assignment,
            average,
            grade,
        });
    }
    let (overall_average, overall_grade) = graded(mean(&averages));
    Ok(ReportCard {
        student,
        subjects: reports,
        overall_average,
        overall_grade,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAverage {
    pub subject_id: String,
    pub subject_name: String,
    pub average: Option<f64>,
    pub grade: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub student: StudentRow,
    pub overall_average: Option<f64>,
    pub overall_grade: Option<String>,
    pub month_attendance: StatusCounts,
    pub month_attendance_rate: f64,
    pub subjects: Vec<SubjectAverage>,
}

pub fn student_summary(conn: &Connection, student_id: &str, today: NaiveDate) -> SchoolResult<StudentSummary> {
    let student = roster::get_student(conn, student_id)?;
    let scores = student_scores(conn, student_id)?;
    let all: Vec<f64> = scores.values().copied().collect();
    let (overall_average, overall_grade) = graded(mean(&all));

    let month_start = today.with_day(1).unwrap_or(today);
    let month_attendance = attendance::student_counts(conn, student_id, None, Some(month_start), Some(today))?;
    let month_attendance_rate = month_attendance.present_rate();

    let subjects = match student.classroom_id.as_deref() {
        Some(cid) => roster::list_subjects(conn, Some(cid))?,
        None => Vec::new(),
    };
    let subjects = subjects
        .into_iter()
        .map(|s| {
            let vals: Vec<f64> = scores
                .iter()
                .filter(|((sid, _), _)| *sid == s.id)
                .map(|(_, v)| *v)
                .collect();
            let (average, grade) = graded(mean(&vals));
            SubjectAverage {
                subject_id: s.id,
                subject_name: s.name,
                average,
                grade,
            }
        })
        .collect();

    Ok(StudentSummary {
        student,
        overall_average,
        overall_grade,
        month_attendance,
        month_attendance_rate,
        subjects,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub student_id: String,
    pub full_name: String,
    pub roll_number: String,
    pub classroom_name: Option<String>,
    pub average: f64,
    pub grade: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    pub student_count: usize,
    pub average_score: Option<f64>,
    pub pass_rate: f64,
    pub at_risk: Vec<RankedStudent>,
    pub subject_averages: Vec<SubjectAverage>,
    pub top: Vec<RankedStudent>,
    pub bottom: Vec<RankedStudent>,
    pub grade_distribution: BTreeMap<String, usize>,
}

const RANK_LIMIT: usize = 10;

pub fn performance(
    conn: &Connection,
    classroom_id: Option<&str>,
    policy: &GradingPolicy,
) -> SchoolResult<Performance> {
    if let Some(cid) = classroom_id {
        roster::require_classroom(conn, cid)?;
    }
    let students = roster::list_students(conn, classroom_id)?;

    let mut stmt = conn.prepare(
        "SELECT sc.student_id, sc.subject_id, sc.score
         FROM scores sc
         JOIN students st ON st.id = sc.student_id
         WHERE (?1 IS NULL OR st.classroom_id = ?1)",
    )?;
    let mut rows = stmt.query([classroom_id])?;
    let mut by_student: HashMap<String, Vec<f64>> = HashMap::new();
    let mut by_subject: HashMap<String, Vec<f64>> = HashMap::new();
    let mut all = Vec::new();
    while let Some(r) = rows.next()? {
        let student_id: String = r.get(0)?;
        let subject_id: String = r.get(1)?;
        let score: f64 = r.get(2)?;
        by_student.entry(student_id).or_default().push(score);
        by_subject.entry(subject_id).or_default().push(score);
        all.push(score);
    }

    let passing = all.iter().filter(|s| **s >= policy.pass_mark).count();
    let pass_rate = percent(passing, all.len());
    let average_score = mean(&all).map(round_off_1_decimal);

    let mut grade_distribution: BTreeMap<String, usize> = LetterGrade::ALL
        .iter()
        .map(|g| (g.to_string(), 0))
        .collect();
    for s in &all {
        *grade_distribution
            .entry(letter_grade(*s).to_string())
            .or_default() += 1;
    }

    let mut ranked: Vec<RankedStudent> = students
        .iter()
        .filter_map(|st| {
            let avg = mean(by_student.get(&st.id)?)?;
            let avg = round_off_1_decimal(avg);
            Some(RankedStudent {
                student_id: st.id.clone(),
                full_name: st.full_name.clone(),
                roll_number: st.roll_number.clone(),
                classroom_name: st.classroom_name.clone(),
                average: avg,
                grade: letter_grade(avg).to_string(),
            })
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.average
            .total_cmp(&a.average)
            .then_with(|| a.roll_number.cmp(&b.roll_number))
    });

    let at_risk = ranked
        .iter()
        .filter(|r| r.average < policy.at_risk_below)
        .cloned()
        .collect();
    let top = ranked.iter().take(RANK_LIMIT).cloned().collect();
    let bottom = ranked.iter().rev().take(RANK_LIMIT).cloned().collect();

    let subject_averages = roster::list_subjects(conn, classroom_id)?
        .into_iter()
        .map(|s| {
            let (average, grade) = graded(by_subject.get(&s.id).and_then(|v| mean(v)));
            SubjectAverage {
                subject_id: s.id,
                subject_name: s.name,
                average,
                grade,
            }
        })
        .collect();

    Ok(Performance {
        student_count: students.len(),
        average_score,
        pass_rate,
        at_risk,
        subject_averages,
        top,
        bottom,
        grade_distribution,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendDay {
    pub date: String,
    #[serde(flatten)]
    pub counts: StatusCounts,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceTrend {
    pub from: String,
    pub to: String,
    pub days: Vec<TrendDay>,
    pub attendance_rate: f64,
}

/// One row per calendar day of the window ending `today`, zero-filled.
pub fn attendance_trend(conn: &Connection, days: i64, today: NaiveDate) -> SchoolResult<AttendanceTrend> {
    if !(1..=366).contains(&days) {
        return Err(SchoolError::bad_params("days must be in 1..=366"));
    }
    let from = today - Duration::days(days - 1);
    let recorded: HashMap<NaiveDate, StatusCounts> =
        attendance::daily_counts(conn, from, today)?.into_iter().collect();

    let mut out = Vec::with_capacity(days as usize);
    let mut present = 0;
    let mut total = 0;
    let mut day = from;
    while day <= today {
        let counts = recorded.get(&day).cloned().unwrap_or_default();
        present += counts.present;
        total += counts.total;
        out.push(TrendDay {
            date: db::date_key(day),
            counts,
        });
        day += Duration::days(1);
    }
    Ok(AttendanceTrend {
        from: db::date_key(from),
        to: db::date_key(today),
        days: out,
        attendance_rate: percent(present as usize, total as usize),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::{record, NewAttendance};
    use crate::config::AttendancePolicy;
    use crate::model::AttendanceStatus;
    use crate::roster::fixtures::*;
    use crate::scores::{upsert, ScoreEntry};

    fn score(conn: &Connection, student_id: &str, subject_id: &str, exam: ExamType, value: f64) {
        upsert(
            conn,
            &ScoreEntry {
                student_id,
                subject_id,
                exam_type: exam,
                score: value,
                recorded_by: None,
            },
            now(),
            &AttendancePolicy::default(),
        )
        .expect("score");
    }

    #[test]
    fn report_card_averages_present_columns() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        let science = roster::create_subject(&conn, "Science", &school.classroom_id, None).expect("sci");
        score(&conn, &school.student_id, &school.subject_id, ExamType::Midterm, 80.0);
        score(&conn, &school.student_id, &school.subject_id, ExamType::Final, 91.0);
        score(&conn, &school.student_id, &school.subject_id, ExamType::Monthly, 10.0);

        let card = report_card(&conn, &school.student_id).expect("card");
        assert_eq!(card.subjects.len(), 2);
        let math = card.subjects.iter().find(|s| s.subject_name == "Math").expect("math");
        assert_eq!(math.average, Some(85.5));
        assert_eq!(math.grade.as_deref(), Some("B+"));
        assert_eq!(math.quiz, None);
        let sci = card.subjects.iter().find(|s| s.subject_id == science.id).expect("sci");
        assert_eq!(sci.average, None);
        assert_eq!(card.overall_average, Some(85.5));

        let json = serde_json::to_value(&card).expect("json");
        assert_eq!(json["subjects"][0]["final"], serde_json::json!(91.0));
    }

    #[test]
    fn report_card_without_any_scores_has_no_overall() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        roster::create_subject(&conn, "Science", &school.classroom_id, None).expect("sci");

        let card = report_card(&conn, &school.student_id).expect("card");
        assert_eq!(card.subjects.len(), 2);
        assert!(card.subjects.iter().all(|s| s.average.is_none()));
        assert_eq!(card.overall_average, None);
        assert_eq!(card.overall_grade, None);
    }

    #[test]
    fn summary_counts_this_month_only() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        let last_month = NaiveDate::from_ymd_opt(2026, 2, 20).expect("date");
        for (date, status) in [
            (last_month, AttendanceStatus::Absent),
            (today(), AttendanceStatus::Present),
        ] {
            record(
                &conn,
                &NewAttendance {
                    student_id: &school.student_id,
                    subject_id: &school.subject_id,
                    date,
                    status,
                    marked_by: None,
                },
                today(),
                now(),
                &AttendancePolicy::default(),
            )
            .expect("record");
        }
        score(&conn, &school.student_id, &school.subject_id, ExamType::Quiz, 64.0);
        let summary = student_summary(&conn, &school.student_id, today()).expect("summary");
        assert_eq!(summary.month_attendance.total, 1);
        assert_eq!(summary.month_attendance_rate, 100.0);
        assert_eq!(summary.overall_grade.as_deref(), Some("C-"));
    }

    #[test]
    fn summary_ignores_marks_after_the_given_day() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        for (day, status) in [
            ((2026, 2, 10), AttendanceStatus::Present),
            ((2026, 2, 20), AttendanceStatus::Absent),
            ((2026, 3, 1), AttendanceStatus::Absent),
        ] {
            let date = NaiveDate::from_ymd_opt(day.0, day.1, day.2).expect("date");
            record(
                &conn,
                &NewAttendance {
                    student_id: &school.student_id,
                    subject_id: &school.subject_id,
                    date,
                    status,
                    marked_by: None,
                },
                today(),
                now(),
                &AttendancePolicy::default(),
            )
            .expect("record");
        }
        let as_of = NaiveDate::from_ymd_opt(2026, 2, 15).expect("date");
        let summary = student_summary(&conn, &school.student_id, as_of).expect("summary");
        assert_eq!(summary.month_attendance.total, 1);
        assert_eq!(summary.month_attendance.present, 1);
        assert_eq!(summary.month_attendance.absent, 0);
        assert_eq!(summary.month_attendance_rate, 100.0);
    }

    #[test]
    fn performance_ranks_and_flags_at_risk() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        let second = student(&conn, "student2", "S-002", &school.classroom_id);
        // Enrolled but unscored: counted, never ranked.
        student(&conn, "student3", "S-003", &school.classroom_id);
        score(&conn, &school.student_id, &school.subject_id, ExamType::Quiz, 92.0);
        score(&conn, &second, &school.subject_id, ExamType::Quiz, 55.0);

        let perf = performance(&conn, Some(&school.classroom_id), &GradingPolicy::default())
            .expect("performance");
        assert_eq!(perf.student_count, 3);
        assert_eq!(perf.average_score, Some(73.5));
        assert_eq!(perf.pass_rate, 50.0);
        assert_eq!(perf.top[0].student_id, school.student_id);
        assert_eq!(perf.bottom[0].student_id, second);
        assert_eq!(perf.at_risk.len(), 1);
        assert_eq!(perf.grade_distribution["A-"], 1);
        assert_eq!(perf.grade_distribution["D"], 1);
        assert_eq!(perf.grade_distribution["A"], 0);
        assert_eq!(perf.subject_averages[0].average, Some(73.5));
    }

    #[test]
    fn trend_fills_every_day_in_window() {
        let conn = db::open_in_memory();
        let school = school(&conn);
        record(
            &conn,
            &NewAttendance {
                student_id: &school.student_id,
                subject_id: &school.subject_id,
                date: today() - Duration::days(2),
                status: AttendanceStatus::Absent,
                marked_by: None,
            },
            today(),
            now(),
            &AttendancePolicy::default(),
        )
        .expect("record");
        let trend = attendance_trend(&conn, 7, today()).expect("trend");
        assert_eq!(trend.days.len(), 7);
        assert_eq!(trend.to, "2026-03-02");
        assert_eq!(trend.days[4].counts.absent, 1);
        assert_eq!(trend.attendance_rate, 0.0);
        assert!(matches!(
            attendance_trend(&conn, 0, today()),
            Err(SchoolError::BadParams(_))
        ));
    }
}
