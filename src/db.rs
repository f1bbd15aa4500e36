use anyhow::{bail, Context};
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{
    ClassSectionRow, GradeRecord, ScopeKind, ScopeMeta, SemesterRow, StudentRef, StudentRow,
    SubjectRef, SubjectRow,
};

pub const OVERALL_SCOPE_NAME: &str = "Overall System Statistics";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

async fn upsert_student(
    pool: &PgPool,
    first_name: &str,
    last_name: &str,
    email: &str,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO gradebook.students (id, first_name, last_name, email)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE
        SET first_name = EXCLUDED.first_name, last_name = EXCLUDED.last_name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_subject(
    pool: &PgPool,
    name: &str,
    coefficient: Option<f64>,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO gradebook.subjects (id, name, coefficient)
        VALUES ($1, $2, $3)
        ON CONFLICT (name) DO UPDATE
        SET coefficient = COALESCE(EXCLUDED.coefficient, gradebook.subjects.coefficient)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(coefficient)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

async fn upsert_semester(pool: &PgPool, name: &str) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO gradebook.semesters (id, name)
        VALUES ($1, $2)
        ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

struct NewGrade<'a> {
    student_id: Uuid,
    subject_id: Uuid,
    semester_id: Option<Uuid>,
    score: Option<f64>,
    comments: Option<&'a str>,
    date_assigned: NaiveDate,
    source_key: &'a str,
}

async fn insert_grade(pool: &PgPool, grade: NewGrade<'_>) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO gradebook.grades
        (id, student_id, subject_id, semester_id, score, comments, date_assigned, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(grade.student_id)
    .bind(grade.subject_id)
    .bind(grade.semester_id)
    .bind(grade.score)
    .bind(grade.comments)
    .bind(grade.date_assigned)
    .bind(grade.source_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = [
        ("Avery", "Lee", "avery.lee@example.edu"),
        ("Jules", "Moreno", "jules.moreno@example.edu"),
        ("Kiara", "Patel", "kiara.patel@example.edu"),
        ("Noah", "Okafor", "noah.okafor@example.edu"),
    ];
    let subjects = [
        ("Mathematics", Some(3.0)),
        ("Physics", Some(2.0)),
        ("History", Some(1.0)),
        ("Studio Art", None),
    ];

    for (first_name, last_name, email) in students {
        upsert_student(pool, first_name, last_name, email).await?;
    }
    for (name, coefficient) in subjects {
        upsert_subject(pool, name, coefficient).await?;
    }
    let fall = upsert_semester(pool, "Fall 2025").await?;
    let spring = upsert_semester(pool, "Spring 2026").await?;

    let maths = find_subject(pool, "Mathematics").await?;
    let section_id: Uuid = sqlx::query(
        r#"
        INSERT INTO gradebook.class_sections (id, name, subject_id, semester_id)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (name) DO UPDATE SET subject_id = EXCLUDED.subject_id
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind("MATH-201 Spring 2026")
    .bind(maths.id)
    .bind(spring)
    .fetch_one(pool)
    .await?
    .get("id");

    for (_, _, email) in students {
        let student = find_student(pool, email).await?;
        sqlx::query(
            r#"
            INSERT INTO gradebook.enrollments (class_section_id, student_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(section_id)
        .bind(student.id)
        .execute(pool)
        .await?;
    }

    #[rustfmt::skip]
    let grades = [
        ("seed-001", "avery.lee@example.edu", "Mathematics", spring, Some(88.0), "Strong proofs"),
        ("seed-002", "avery.lee@example.edu", "Physics", spring, Some(74.0), "Lab report late"),
        ("seed-003", "avery.lee@example.edu", "Studio Art", spring, Some(95.0), "Portfolio review"),
        ("seed-004", "jules.moreno@example.edu", "Mathematics", spring, Some(58.0), "Retake"),
        ("seed-005", "jules.moreno@example.edu", "History", fall, Some(81.0), "Reform essay"),
        ("seed-006", "kiara.patel@example.edu", "Mathematics", spring, Some(93.5), "Midterm"),
        ("seed-007", "kiara.patel@example.edu", "Physics", fall, Some(67.0), "Quiz 2"),
        ("seed-008", "kiara.patel@example.edu", "History", fall, None, "Excused absence"),
    ];

    for (source_key, email, subject, semester_id, score, comments) in grades {
        let student = find_student(pool, email).await?;
        let subject = find_subject(pool, subject).await?;
        insert_grade(
            pool,
            NewGrade {
                student_id: student.id,
                subject_id: subject.id,
                semester_id: Some(semester_id),
                score,
                comments: Some(comments),
                date_assigned: NaiveDate::from_ymd_opt(2026, 2, 2).context("invalid date")?,
                source_key,
            },
        )
        .await?;
    }

    info!(
        students = students.len(),
        grades = grades.len(),
        "seed data applied"
    );
    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        first_name: String,
        last_name: String,
        email: String,
        subject: String,
        coefficient: Option<f64>,
        semester: Option<String>,
        score: Option<f64>,
        date_assigned: NaiveDate,
        comments: Option<String>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("invalid row {}", line + 1))?;
        if let Some(score) = row.score {
            if !(0.0..=100.0).contains(&score) {
                bail!("row {}: score {score} is outside 0-100", line + 1);
            }
        }

        let student_id = upsert_student(pool, &row.first_name, &row.last_name, &row.email).await?;
        let subject_id = upsert_subject(pool, &row.subject, row.coefficient).await?;
        let semester_id = match row.semester.as_deref() {
            Some(name) => Some(upsert_semester(pool, name).await?),
            None => None,
        };

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let created = insert_grade(
            pool,
            NewGrade {
                student_id,
                subject_id,
                semester_id,
                score: row.score,
                comments: row.comments.as_deref(),
                date_assigned: row.date_assigned,
                source_key: &source_key,
            },
        )
        .await?;

        if created {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn find_student(pool: &PgPool, email: &str) -> anyhow::Result<StudentRow> {
    let row = sqlx::query(
        "SELECT id, first_name || ' ' || last_name AS full_name, email \
         FROM gradebook.students WHERE email = $1",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        bail!("student not found with email: {email}");
    };

    Ok(StudentRow {
        id: row.get("id"),
        full_name: row.get("full_name"),
        email: row.get("email"),
    })
}

pub async fn find_subject(pool: &PgPool, name: &str) -> anyhow::Result<SubjectRow> {
    let row = sqlx::query(
        "SELECT id, name, coefficient FROM gradebook.subjects WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        bail!("subject not found with name: {name}");
    };

    Ok(SubjectRow {
        id: row.get("id"),
        name: row.get("name"),
        coefficient: row.get("coefficient"),
    })
}

pub async fn find_semester(pool: &PgPool, name: &str) -> anyhow::Result<SemesterRow> {
    let row = sqlx::query("SELECT id, name FROM gradebook.semesters WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        bail!("semester not found with name: {name}");
    };

    Ok(SemesterRow {
        id: row.get("id"),
        name: row.get("name"),
    })
}

async fn find_optional_semester(
    pool: &PgPool,
    name: Option<&str>,
) -> anyhow::Result<Option<SemesterRow>> {
    match name {
        Some(name) => Ok(Some(find_semester(pool, name).await?)),
        None => Ok(None),
    }
}

pub async fn find_class_section(pool: &PgPool, name: &str) -> anyhow::Result<ClassSectionRow> {
    let row = sqlx::query(
        r#"
        SELECT cs.id, cs.name,
               su.id AS subject_id, su.name AS subject_name, su.coefficient,
               se.id AS semester_id, se.name AS semester_name,
               (SELECT COUNT(*) FROM gradebook.enrollments e
                WHERE e.class_section_id = cs.id) AS enrolled
        FROM gradebook.class_sections cs
        JOIN gradebook.subjects su ON su.id = cs.subject_id
        JOIN gradebook.semesters se ON se.id = cs.semester_id
        WHERE cs.name = $1
        "#,
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        bail!("class section not found with name: {name}");
    };

    let enrolled: i64 = row.get("enrolled");
    Ok(ClassSectionRow {
        id: row.get("id"),
        name: row.get("name"),
        subject: SubjectRow {
            id: row.get("subject_id"),
            name: row.get("subject_name"),
            coefficient: row.get("coefficient"),
        },
        semester: SemesterRow {
            id: row.get("semester_id"),
            name: row.get("semester_name"),
        },
        enrolled_students: usize::try_from(enrolled).context("negative enrollment count")?,
    })
}

pub async fn enrolled_class_names(pool: &PgPool, student_id: Uuid) -> anyhow::Result<Vec<String>> {
    let rows = sqlx::query(
        r#"
        SELECT cs.name
        FROM gradebook.enrollments e
        JOIN gradebook.class_sections cs ON cs.id = e.class_section_id
        WHERE e.student_id = $1
        ORDER BY cs.name
        "#,
    )
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(|row| row.get("name")).collect())
}

/// Identity filters for a grade fetch; unset fields do not restrict.
#[derive(Debug, Default, Clone, Copy)]
pub struct GradeFilter {
    pub student_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub semester_id: Option<Uuid>,
    pub class_section_id: Option<Uuid>,
}

impl GradeFilter {
    fn where_clause(&self) -> (String, Vec<Uuid>) {
        let mut clause = String::from(" WHERE TRUE");
        let mut binds = Vec::new();

        if let Some(id) = self.student_id {
            binds.push(id);
            clause.push_str(&format!(" AND g.student_id = ${}", binds.len()));
        }
        if let Some(id) = self.subject_id {
            binds.push(id);
            clause.push_str(&format!(" AND g.subject_id = ${}", binds.len()));
        }
        if let Some(id) = self.semester_id {
            binds.push(id);
            clause.push_str(&format!(" AND g.semester_id = ${}", binds.len()));
        }
        if let Some(id) = self.class_section_id {
            binds.push(id);
            clause.push_str(&format!(
                " AND EXISTS (SELECT 1 FROM gradebook.enrollments e \
                 WHERE e.student_id = g.student_id AND e.class_section_id = ${})",
                binds.len()
            ));
        }

        (clause, binds)
    }
}

fn grade_from_row(row: &PgRow) -> GradeRecord {
    let first_name: String = row.get("first_name");
    let last_name: String = row.get("last_name");

    GradeRecord {
        score: row.get("score"),
        subject: Some(SubjectRef {
            id: row.get("subject_id"),
            name: row.get("subject_name"),
            coefficient: row.get("coefficient"),
        }),
        student: StudentRef {
            id: row.get("student_id"),
            display_name: format!("{first_name} {last_name}"),
        },
        semester_id: row.get("semester_id"),
        semester_name: row.get("semester_name"),
        date_assigned: row.get("date_assigned"),
        comments: row.get("comments"),
    }
}

const GRADE_SELECT: &str = "SELECT g.score, g.comments, g.date_assigned, g.semester_id, \
     se.name AS semester_name, st.id AS student_id, st.first_name, st.last_name, \
     su.id AS subject_id, su.name AS subject_name, su.coefficient \
     FROM gradebook.grades g \
     JOIN gradebook.students st ON st.id = g.student_id \
     JOIN gradebook.subjects su ON su.id = g.subject_id \
     LEFT JOIN gradebook.semesters se ON se.id = g.semester_id";

const GRADE_ORDER: &str = " ORDER BY st.last_name, st.first_name, su.name, g.date_assigned";

pub async fn fetch_grades(pool: &PgPool, filter: &GradeFilter) -> anyhow::Result<Vec<GradeRecord>> {
    let (clause, binds) = filter.where_clause();
    let query = format!("{GRADE_SELECT}{clause}{GRADE_ORDER}");
    let mut rows = sqlx::query(&query);
    for id in binds {
        rows = rows.bind(id);
    }

    let records = rows.fetch_all(pool).await?;
    Ok(records.iter().map(grade_from_row).collect())
}

/// Which population to load, identified by the names users type on the command line.
#[derive(Debug, Clone, Copy)]
pub enum ScopeSelection<'a> {
    Student {
        email: &'a str,
        semester: Option<&'a str>,
    },
    Subject {
        name: &'a str,
        semester: Option<&'a str>,
    },
    Class {
        name: &'a str,
    },
    Semester {
        name: &'a str,
    },
    Overall,
}

/// Resolves a selection into scope metadata plus the grade records it covers.
///
/// Unknown students, subjects, semesters or class sections are rejected here so the
/// aggregation step only ever sees a valid scope.
pub async fn load_scope(
    pool: &PgPool,
    selection: ScopeSelection<'_>,
) -> anyhow::Result<(ScopeMeta, Vec<GradeRecord>)> {
    let (scope, filter) = match selection {
        ScopeSelection::Student { email, semester } => {
            let student = find_student(pool, email).await?;
            let semester = find_optional_semester(pool, semester).await?;
            let mut scope = ScopeMeta::new(ScopeKind::Student, Some(student.id), student.full_name);
            if let Some(semester) = &semester {
                scope = scope.with_semester(semester.id, semester.name.clone());
            }
            let filter = GradeFilter {
                student_id: Some(student.id),
                semester_id: semester.map(|s| s.id),
                ..GradeFilter::default()
            };
            (scope, filter)
        }
        ScopeSelection::Subject { name, semester } => {
            let subject = find_subject(pool, name).await?;
            let semester = find_optional_semester(pool, semester).await?;
            let mut scope = ScopeMeta::new(ScopeKind::Subject, Some(subject.id), subject.name);
            if let Some(semester) = &semester {
                scope = scope.with_semester(semester.id, semester.name.clone());
            }
            let filter = GradeFilter {
                subject_id: Some(subject.id),
                semester_id: semester.map(|s| s.id),
                ..GradeFilter::default()
            };
            (scope, filter)
        }
        ScopeSelection::Class { name } => {
            let section = find_class_section(pool, name).await?;
            if section.enrolled_students == 0 {
                warn!(
                    class_section = %section.name,
                    "no students enrolled in class section"
                );
            }
            let scope = ScopeMeta::new(
                ScopeKind::Class,
                Some(section.id),
                format!("{} ({})", section.subject.name, section.semester.name),
            )
            .with_semester(section.semester.id, section.semester.name.clone())
            .with_enrollment(section.enrolled_students);
            let filter = GradeFilter {
                subject_id: Some(section.subject.id),
                semester_id: Some(section.semester.id),
                class_section_id: Some(section.id),
                ..GradeFilter::default()
            };
            (scope, filter)
        }
        ScopeSelection::Semester { name } => {
            let semester = find_semester(pool, name).await?;
            let scope = ScopeMeta::new(ScopeKind::Semester, Some(semester.id), &semester.name)
                .with_semester(semester.id, semester.name);
            let filter = GradeFilter {
                semester_id: Some(semester.id),
                ..GradeFilter::default()
            };
            (scope, filter)
        }
        ScopeSelection::Overall => (
            ScopeMeta::new(ScopeKind::Overall, None, OVERALL_SCOPE_NAME),
            GradeFilter::default(),
        ),
    };

    let records = if scope.kind == ScopeKind::Class && scope.enrolled_students == Some(0) {
        Vec::new()
    } else {
        fetch_grades(pool, &filter).await?
    };

    info!(
        scope = %scope.kind,
        scope_id = ?scope.id,
        records = records.len(),
        "loaded grade records for scope"
    );

    Ok((scope, records))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_has_no_binds() {
        let (clause, binds) = GradeFilter::default().where_clause();
        assert_eq!(clause, " WHERE TRUE");
        assert!(binds.is_empty());
    }

    #[test]
    fn filter_numbers_placeholders_in_order() {
        let student = Uuid::new_v4();
        let semester = Uuid::new_v4();
        let filter = GradeFilter {
            student_id: Some(student),
            semester_id: Some(semester),
            ..GradeFilter::default()
        };

        let (clause, binds) = filter.where_clause();
        assert_eq!(
            clause,
            " WHERE TRUE AND g.student_id = $1 AND g.semester_id = $2"
        );
        assert_eq!(binds, vec![student, semester]);
    }

    #[test]
    fn class_filter_restricts_to_enrollment() {
        let section = Uuid::new_v4();
        let subject = Uuid::new_v4();
        let filter = GradeFilter {
            subject_id: Some(subject),
            class_section_id: Some(section),
            ..GradeFilter::default()
        };

        let (clause, binds) = filter.where_clause();
        assert!(clause.contains("g.subject_id = $1"));
        assert!(clause.contains("e.class_section_id = $2"));
        assert_eq!(binds, vec![subject, section]);
    }
}
