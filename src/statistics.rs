//! Distributional statistics over the grade records of one scope.
//!
//! Callers fetch records already filtered to the scope; nothing here filters by
//! student, subject or semester. An empty scope yields all-zero statistics.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use uuid::Uuid;

use crate::models::{
    GradeDistribution, GradeRecord, LetterGrade, ScopeKind, ScopeMeta, ScopeStatistics,
    StudentAverage,
};

pub const A_THRESHOLD: f64 = 90.0;
pub const B_THRESHOLD: f64 = 80.0;
pub const C_THRESHOLD: f64 = 70.0;
pub const D_THRESHOLD: f64 = 60.0;
pub const PASSING_THRESHOLD: f64 = 60.0;
pub const MAX_TOP_STUDENTS: usize = 5;

pub fn letter_grade(score: f64) -> LetterGrade {
    match score {
        s if s >= A_THRESHOLD => LetterGrade::A,
        s if s >= B_THRESHOLD => LetterGrade::B,
        s if s >= C_THRESHOLD => LetterGrade::C,
        s if s >= D_THRESHOLD => LetterGrade::D,
        _ => LetterGrade::F,
    }
}

/// Builds the statistics for a scope, applying the per-scope assembly rules.
pub fn aggregate(records: &[GradeRecord], scope: &ScopeMeta) -> ScopeStatistics {
    let mut stats = basic_statistics(records, scope);

    match scope.kind {
        ScopeKind::Student => {
            stats.subject_averages = Some(subject_averages(records));
            stats.total_students = 1;
            stats.total_subjects = distinct_subjects(records);
        }
        ScopeKind::Subject => {
            stats.top_student_averages = Some(top_student_averages(records));
            stats.total_students = distinct_students(records);
            stats.total_subjects = 1;
        }
        ScopeKind::Class => {
            stats.top_student_averages = Some(top_student_averages(records));
            stats.total_students = scope
                .enrolled_students
                .unwrap_or_else(|| distinct_students(records));
            stats.total_subjects = 1;
        }
        ScopeKind::Semester | ScopeKind::Overall => {
            stats.subject_averages = Some(subject_averages(records));
            stats.top_student_averages = Some(top_student_averages(records));
            stats.total_students = distinct_students(records);
            stats.total_subjects = distinct_subjects(records);
        }
    }

    stats
}

fn basic_statistics(records: &[GradeRecord], scope: &ScopeMeta) -> ScopeStatistics {
    let mut scores: Vec<f64> = records.iter().filter_map(|record| record.score).collect();

    let mut stats = ScopeStatistics {
        average_score: 0.0,
        median_score: 0.0,
        min_score: 0.0,
        max_score: 0.0,
        standard_deviation: 0.0,
        total_grades: scores.len(),
        total_students: 0,
        total_subjects: 0,
        passing_grades: 0,
        failing_grades: 0,
        passing_rate: 0.0,
        grade_distribution: GradeDistribution::default(),
        subject_averages: None,
        top_student_averages: None,
        scope_kind: scope.kind,
        scope_id: scope.id,
        scope_name: scope.name.clone(),
        semester_id: scope.semester_id,
        semester_name: scope.semester_name.clone(),
    };

    if scores.is_empty() {
        return stats;
    }

    let n = scores.len();
    let average = scores.iter().sum::<f64>() / n as f64;
    scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    stats.average_score = average;
    stats.median_score = if n % 2 == 0 {
        (scores[n / 2 - 1] + scores[n / 2]) / 2.0
    } else {
        scores[n / 2]
    };
    stats.min_score = scores[0];
    stats.max_score = scores[n - 1];

    let variance = scores
        .iter()
        .map(|score| (score - average).powi(2))
        .sum::<f64>()
        / n as f64;
    stats.standard_deviation = variance.sqrt();

    stats.passing_grades = scores
        .iter()
        .filter(|score| **score >= PASSING_THRESHOLD)
        .count();
    stats.failing_grades = n - stats.passing_grades;
    stats.passing_rate = stats.passing_grades as f64 / n as f64 * 100.0;

    for score in &scores {
        stats.grade_distribution.record(letter_grade(*score));
    }

    stats
}

/// Mean score per subject name; subjects that share a name merge into one mean.
pub fn subject_averages(records: &[GradeRecord]) -> BTreeMap<String, f64> {
    let mut groups: BTreeMap<&str, (f64, usize)> = BTreeMap::new();

    for record in records {
        let (Some(score), Some(subject)) = (record.score, record.subject.as_ref()) else {
            continue;
        };
        let entry = groups.entry(subject.name.as_str()).or_insert((0.0, 0));
        entry.0 += score;
        entry.1 += 1;
    }

    groups
        .into_iter()
        .map(|(name, (sum, n))| (name.to_string(), sum / n as f64))
        .collect()
}

/// Highest student means, descending; ties fall back to display name, then student id.
pub fn top_student_averages(records: &[GradeRecord]) -> Vec<StudentAverage> {
    let mut groups: HashMap<Uuid, (&str, f64, usize)> = HashMap::new();

    for record in records {
        let Some(score) = record.score else {
            continue;
        };
        let entry = groups
            .entry(record.student.id)
            .or_insert((record.student.display_name.as_str(), 0.0, 0));
        entry.1 += score;
        entry.2 += 1;
    }

    let mut averages: Vec<StudentAverage> = groups
        .into_iter()
        .map(|(student_id, (name, total, count))| StudentAverage {
            student_id,
            student_name: name.to_string(),
            average: total / count as f64,
        })
        .collect();

    averages.sort_by(|a, b| {
        b.average
            .partial_cmp(&a.average)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.student_name.cmp(&b.student_name))
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    averages.truncate(MAX_TOP_STUDENTS);
    averages
}

fn distinct_students(records: &[GradeRecord]) -> usize {
    records
        .iter()
        .map(|record| record.student.id)
        .collect::<HashSet<_>>()
        .len()
}

fn distinct_subjects(records: &[GradeRecord]) -> usize {
    records
        .iter()
        .filter_map(|record| record.subject.as_ref().map(|subject| subject.id))
        .collect::<HashSet<_>>()
        .len()
}
