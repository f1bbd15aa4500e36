use std::collections::BTreeMap;
use std::fmt::Write;

use crate::average;
use crate::models::{
    GradeRecord, LetterGrade, ScopeStatistics, StudentRow, StudentSummary, SubjectGrades,
};

/// Groups a student's grades by subject and attaches the per-subject and weighted averages.
pub fn build_student_summary(
    student: &StudentRow,
    enrolled_classes: Vec<String>,
    records: &[GradeRecord],
) -> StudentSummary {
    let averages = average::all_subject_averages(records);
    let mut grouped: BTreeMap<String, Vec<GradeRecord>> = BTreeMap::new();

    for record in records {
        if let Some(subject) = &record.subject {
            grouped
                .entry(subject.name.clone())
                .or_default()
                .push(record.clone());
        }
    }

    let subjects = grouped
        .into_iter()
        .filter_map(|(subject_name, grades)| {
            // subjects whose grades are all unscored have no average
            let average = *averages.get(&subject_name)?;
            Some(SubjectGrades {
                subject_name,
                average,
                grades,
            })
        })
        .collect();

    StudentSummary {
        student_id: student.id,
        student_name: student.full_name.clone(),
        email: student.email.clone(),
        enrolled_classes,
        subjects,
        overall_average: average::overall_average(records),
    }
}

pub fn render_student_summary(summary: &StudentSummary) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "{} <{}> overall average {}",
        summary.student_name, summary.email, summary.overall_average
    );

    if !summary.enrolled_classes.is_empty() {
        let _ = writeln!(
            output,
            "Enrolled in: {}",
            summary.enrolled_classes.join(", ")
        );
    }

    if summary.subjects.is_empty() {
        let _ = writeln!(output, "No graded subjects.");
        return output;
    }

    for subject in &summary.subjects {
        let _ = writeln!(
            output,
            "- {}: average {:.2} across {} grades",
            subject.subject_name,
            subject.average,
            subject.grades.len()
        );
        for grade in &subject.grades {
            let score = grade
                .score
                .map(|score| format!("{score:.1}"))
                .unwrap_or_else(|| "ungraded".to_string());
            let _ = writeln!(
                output,
                "    {} {}{}",
                grade.date_assigned,
                score,
                grade
                    .comments
                    .as_deref()
                    .map(|note| format!(" ({note})"))
                    .unwrap_or_default()
            );
        }
    }

    output
}

pub fn build_report(stats: &ScopeStatistics) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Grade Statistics Report");
    match &stats.semester_name {
        Some(semester) => {
            let _ = writeln!(
                output,
                "Generated for {} {} ({})",
                stats.scope_kind, stats.scope_name, semester
            );
        }
        None => {
            let _ = writeln!(
                output,
                "Generated for {} {}",
                stats.scope_kind, stats.scope_name
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");

    if stats.total_grades == 0 {
        let _ = writeln!(output, "No grades recorded for this scope.");
    }

    let _ = writeln!(output, "- Grades: {}", stats.total_grades);
    let _ = writeln!(output, "- Students: {}", stats.total_students);
    let _ = writeln!(output, "- Subjects: {}", stats.total_subjects);
    let _ = writeln!(output, "- Average: {:.2}", stats.average_score);
    let _ = writeln!(output, "- Median: {:.2}", stats.median_score);
    let _ = writeln!(
        output,
        "- Range: {:.2} to {:.2}",
        stats.min_score, stats.max_score
    );
    let _ = writeln!(
        output,
        "- Standard deviation: {:.2}",
        stats.standard_deviation
    );
    let _ = writeln!(
        output,
        "- Passing: {} of {} ({:.1}%), failing: {}",
        stats.passing_grades, stats.total_grades, stats.passing_rate, stats.failing_grades
    );

    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "## Letter Distribution ({} grades)",
        stats.grade_distribution.total()
    );
    for letter in LetterGrade::ALL {
        let _ = writeln!(output, "- {}: {}", letter, stats.grade_distribution.count(letter));
    }

    if let Some(subjects) = &stats.subject_averages {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Subject Averages");

        if subjects.is_empty() {
            let _ = writeln!(output, "No graded subjects in this scope.");
        } else {
            for (subject, average) in subjects {
                let _ = writeln!(output, "- {}: {:.2}", subject, average);
            }
        }
    }

    if let Some(students) = &stats.top_student_averages {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Top Students");

        if students.is_empty() {
            let _ = writeln!(output, "No graded students in this scope.");
        } else {
            for (rank, student) in students.iter().enumerate() {
                let _ = writeln!(
                    output,
                    "{}. {} {:.2}",
                    rank + 1,
                    student.student_name,
                    student.average
                );
            }
        }
    }

    output
}

/// Writes one CSV row per grade.
pub fn write_grades_csv<W: std::io::Write>(
    writer: W,
    records: &[GradeRecord],
) -> anyhow::Result<()> {
    #[derive(serde::Serialize)]
    struct CsvRow<'a> {
        student_id: String,
        student_name: &'a str,
        subject: &'a str,
        score: Option<f64>,
        date_assigned: chrono::NaiveDate,
        semester: &'a str,
        comments: &'a str,
    }

    let mut csv_writer = csv::Writer::from_writer(writer);

    for record in records {
        csv_writer.serialize(CsvRow {
            student_id: record.student.id.to_string(),
            student_name: &record.student.display_name,
            subject: record
                .subject
                .as_ref()
                .map(|subject| subject.name.as_str())
                .unwrap_or(""),
            score: record.score,
            date_assigned: record.date_assigned,
            semester: record.semester_name.as_deref().unwrap_or(""),
            comments: record.comments.as_deref().unwrap_or(""),
        })?;
    }

    csv_writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::average::tests::{grade, student, subject};
    use crate::models::{OverallAverage, ScopeKind, ScopeMeta};
    use crate::statistics;
    use uuid::Uuid;

    fn avery_row() -> StudentRow {
        StudentRow {
            id: Uuid::new_v4(),
            full_name: "Avery Lee".to_string(),
            email: "avery.lee@example.edu".to_string(),
        }
    }

    #[test]
    fn summary_groups_grades_by_subject() {
        let avery = student("Avery Lee");
        let math = subject("Math", Some(2.0));
        let physics = subject("Physics", Some(1.0));
        let records = vec![
            grade(&avery, &math, Some(80.0)),
            grade(&avery, &physics, Some(60.0)),
            grade(&avery, &physics, None),
        ];

        let summary = build_student_summary(&avery_row(), vec!["MATH-201".to_string()], &records);
        assert_eq!(summary.subjects.len(), 2);
        assert_eq!(summary.subjects[0].subject_name, "Math");
        assert_eq!(summary.subjects[1].grades.len(), 2);
        assert_eq!(summary.subjects[1].average, 60.0);
        assert!(matches!(summary.overall_average, OverallAverage::Value(_)));

        let text = render_student_summary(&summary);
        assert!(text.contains("overall average 73.33"));
        assert!(text.contains("ungraded"));
        assert!(text.contains("Enrolled in: MATH-201"));
    }

    #[test]
    fn summary_merges_same_named_subjects() {
        let avery = student("Avery Lee");
        let first = subject("Math", Some(1.0));
        let second = subject("Math", Some(2.0));
        let records = vec![
            grade(&avery, &first, Some(10.0)),
            grade(&avery, &second, Some(90.0)),
        ];

        let summary = build_student_summary(&avery_row(), Vec::new(), &records);
        assert_eq!(summary.subjects.len(), 1);
        assert_eq!(summary.subjects[0].grades.len(), 2);
        assert_eq!(summary.subjects[0].average, 50.0);
    }

    #[test]
    fn summary_without_grades_shows_not_available() {
        let summary = build_student_summary(&avery_row(), Vec::new(), &[]);
        assert_eq!(summary.overall_average, OverallAverage::NoData);

        let text = render_student_summary(&summary);
        assert!(text.contains("overall average N/A"));
        assert!(text.contains("No graded subjects."));
    }

    #[test]
    fn report_lists_sections_for_scope() {
        let math = subject("Math", Some(1.0));
        let records = vec![
            grade(&student("Avery Lee"), &math, Some(95.0)),
            grade(&student("Jules Moreno"), &math, Some(40.0)),
        ];
        let scope = ScopeMeta::new(ScopeKind::Semester, Some(Uuid::new_v4()), "Spring 2026")
            .with_semester(Uuid::new_v4(), "Spring 2026");
        let report = build_report(&statistics::aggregate(&records, &scope));

        assert!(report.contains("Generated for semester Spring 2026 (Spring 2026)"));
        assert!(report.contains("- Average: 67.50"));
        assert!(report.contains("- Passing: 1 of 2 (50.0%), failing: 1"));
        assert!(report.contains("- A: 1"));
        assert!(report.contains("- F: 1"));
        assert!(report.contains("- Math: 67.50"));
        assert!(report.contains("1. Avery Lee 95.00"));
    }

    #[test]
    fn report_for_empty_scope_omits_absent_sections() {
        let scope = ScopeMeta::new(ScopeKind::Subject, Some(Uuid::new_v4()), "History");
        let report = build_report(&statistics::aggregate(&[], &scope));

        assert!(report.contains("No grades recorded for this scope."));
        assert!(report.contains("- Average: 0.00"));
        assert!(!report.contains("## Subject Averages"));
        assert!(report.contains("No graded students in this scope."));
    }

    #[test]
    fn csv_export_writes_header_and_rows() {
        let avery = student("Avery Lee");
        let math = subject("Math", Some(1.0));
        let mut graded = grade(&avery, &math, Some(88.5));
        graded.comments = Some("Midterm".to_string());
        let records = vec![graded, grade(&avery, &math, None)];

        let mut buffer = Vec::new();
        write_grades_csv(&mut buffer, &records).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "student_id,student_name,subject,score,date_assigned,semester,comments"
        );
        assert_eq!(lines.len(), 3);
        let graded_row = "Avery Lee,Math,88.5,2026-01-15,,Midterm";
        assert!(lines[1].ends_with(graded_row));
        assert!(lines[2].ends_with("Avery Lee,Math,,2026-01-15,,"));
    }
}
