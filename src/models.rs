use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectRef {
    pub id: Uuid,
    pub name: String,
    pub coefficient: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentRef {
    pub id: Uuid,
    pub display_name: String,
}

/// A single grade as handed over by the persistence layer.
///
/// A record without a score is ignored by every calculation. A record whose
/// subject has no positive coefficient still counts everywhere except the
/// weighted overall average.
#[derive(Debug, Clone, Serialize)]
pub struct GradeRecord {
    pub score: Option<f64>,
    pub subject: Option<SubjectRef>,
    pub student: StudentRef,
    pub semester_id: Option<Uuid>,
    pub semester_name: Option<String>,
    pub date_assigned: NaiveDate,
    pub comments: Option<String>,
}

/// Outcome of a weighted overall average.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum OverallAverage {
    /// No record had both a score and a subject.
    NoData,
    /// Records exist but every subject coefficient was absent or non-positive.
    NotComputable,
    Value(f64),
}

impl OverallAverage {
    /// Numeric view used by report consumers: `None` for no data, NaN when not computable.
    pub fn to_f64(self) -> Option<f64> {
        match self {
            OverallAverage::NoData => None,
            OverallAverage::NotComputable => Some(f64::NAN),
            OverallAverage::Value(value) => Some(value),
        }
    }
}

impl fmt::Display for OverallAverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_f64() {
            None => write!(f, "N/A"),
            Some(value) if value.is_nan() => write!(f, "NaN"),
            Some(value) => write!(f, "{value:.2}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Student,
    Subject,
    Class,
    Semester,
    Overall,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScopeKind::Student => "student",
            ScopeKind::Subject => "subject",
            ScopeKind::Class => "class",
            ScopeKind::Semester => "semester",
            ScopeKind::Overall => "overall",
        };
        f.write_str(label)
    }
}

/// Identity of the population a statistics run covers.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeMeta {
    pub kind: ScopeKind,
    pub id: Option<Uuid>,
    pub name: String,
    pub semester_id: Option<Uuid>,
    pub semester_name: Option<String>,
    /// Enrollment size of a class section; only read for class scopes.
    pub enrolled_students: Option<usize>,
}

impl ScopeMeta {
    pub fn new(kind: ScopeKind, id: Option<Uuid>, name: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            name: name.into(),
            semester_id: None,
            semester_name: None,
            enrolled_students: None,
        }
    }

    pub fn with_semester(mut self, id: Uuid, name: impl Into<String>) -> Self {
        self.semester_id = Some(id);
        self.semester_name = Some(name.into());
        self
    }

    pub fn with_enrollment(mut self, enrolled: usize) -> Self {
        self.enrolled_students = Some(enrolled);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    F,
}

impl LetterGrade {
    pub const ALL: [LetterGrade; 5] = [
        LetterGrade::A,
        LetterGrade::B,
        LetterGrade::C,
        LetterGrade::D,
        LetterGrade::F,
    ];
}

impl fmt::Display for LetterGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Letter histogram; all five buckets are always present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GradeDistribution {
    #[serde(rename = "A")]
    pub a: usize,
    #[serde(rename = "B")]
    pub b: usize,
    #[serde(rename = "C")]
    pub c: usize,
    #[serde(rename = "D")]
    pub d: usize,
    #[serde(rename = "F")]
    pub f: usize,
}

impl GradeDistribution {
    pub fn record(&mut self, letter: LetterGrade) {
        *self.bucket_mut(letter) += 1;
    }

    pub fn count(&self, letter: LetterGrade) -> usize {
        match letter {
            LetterGrade::A => self.a,
            LetterGrade::B => self.b,
            LetterGrade::C => self.c,
            LetterGrade::D => self.d,
            LetterGrade::F => self.f,
        }
    }

    pub fn total(&self) -> usize {
        self.a + self.b + self.c + self.d + self.f
    }

    fn bucket_mut(&mut self, letter: LetterGrade) -> &mut usize {
        match letter {
            LetterGrade::A => &mut self.a,
            LetterGrade::B => &mut self.b,
            LetterGrade::C => &mut self.c,
            LetterGrade::D => &mut self.d,
            LetterGrade::F => &mut self.f,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentAverage {
    pub student_id: Uuid,
    pub student_name: String,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeStatistics {
    pub average_score: f64,
    pub median_score: f64,
    pub min_score: f64,
    pub max_score: f64,
    pub standard_deviation: f64,
    pub total_grades: usize,
    pub total_students: usize,
    pub total_subjects: usize,
    pub passing_grades: usize,
    pub failing_grades: usize,
    pub passing_rate: f64,
    pub grade_distribution: GradeDistribution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_averages: Option<BTreeMap<String, f64>>,
    /// Sorted by descending average, at most five entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_student_averages: Option<Vec<StudentAverage>>,
    pub scope_kind: ScopeKind,
    pub scope_id: Option<Uuid>,
    pub scope_name: String,
    pub semester_id: Option<Uuid>,
    pub semester_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectGrades {
    pub subject_name: String,
    pub average: f64,
    pub grades: Vec<GradeRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentSummary {
    pub student_id: Uuid,
    pub student_name: String,
    pub email: String,
    pub enrolled_classes: Vec<String>,
    pub subjects: Vec<SubjectGrades>,
    pub overall_average: OverallAverage,
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct SubjectRow {
    pub id: Uuid,
    pub name: String,
    pub coefficient: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SemesterRow {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct ClassSectionRow {
    pub id: Uuid,
    pub name: String,
    pub subject: SubjectRow,
    pub semester: SemesterRow,
    pub enrolled_students: usize,
}
