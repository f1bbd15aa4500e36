use std::collections::{BTreeMap, HashMap};

use tracing::warn;
use uuid::Uuid;

use crate::models::{GradeRecord, OverallAverage, SubjectRef};

struct SubjectTally<'a> {
    subject: &'a SubjectRef,
    total: f64,
    count: usize,
}

impl SubjectTally<'_> {
    fn mean(&self) -> f64 {
        self.total / self.count as f64
    }
}

/// Groups scored records by subject id, skipping records without a score or subject.
fn tally_by_subject(records: &[GradeRecord]) -> HashMap<Uuid, SubjectTally<'_>> {
    let mut tallies: HashMap<Uuid, SubjectTally<'_>> = HashMap::new();

    for record in records {
        let (Some(score), Some(subject)) = (record.score, record.subject.as_ref()) else {
            continue;
        };

        let entry = tallies.entry(subject.id).or_insert_with(|| SubjectTally {
            subject,
            total: 0.0,
            count: 0,
        });
        entry.total += score;
        entry.count += 1;
    }

    tallies
}

/// Coefficient-weighted average of a student's per-subject means.
pub fn overall_average(records: &[GradeRecord]) -> OverallAverage {
    let tallies = tally_by_subject(records);
    if tallies.is_empty() {
        return OverallAverage::NoData;
    }

    let mut weighted_sum = 0.0;
    let mut weight_sum = 0.0;

    for tally in tallies.values() {
        let coefficient = match tally.subject.coefficient {
            Some(value) if value > 0.0 => value,
            other => {
                warn!(
                    subject = %tally.subject.name,
                    subject_id = %tally.subject.id,
                    coefficient = ?other,
                    "invalid coefficient, subject skipped for overall average"
                );
                continue;
            }
        };

        weighted_sum += tally.mean() * coefficient;
        weight_sum += coefficient;
    }

    if weight_sum == 0.0 {
        warn!("coefficient sum is zero, weighted average not computable");
        return OverallAverage::NotComputable;
    }

    OverallAverage::Value(weighted_sum / weight_sum)
}

/// Simple mean of one subject's scores; `None` when the subject has no scored records.
pub fn subject_average(records: &[GradeRecord], subject_id: Uuid) -> Option<f64> {
    let scores: Vec<f64> = records
        .iter()
        .filter(|record| {
            record
                .subject
                .as_ref()
                .is_some_and(|subject| subject.id == subject_id)
        })
        .filter_map(|record| record.score)
        .collect();

    if scores.is_empty() {
        return None;
    }

    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

/// Simple mean per subject name; subjects that share a name merge into one mean.
pub fn all_subject_averages(records: &[GradeRecord]) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<&str, (f64, usize)> = BTreeMap::new();

    for record in records {
        let (Some(score), Some(subject)) = (record.score, record.subject.as_ref()) else {
            continue;
        };
        let entry = sums.entry(subject.name.as_str()).or_insert((0.0, 0));
        entry.0 += score;
        entry.1 += 1;
    }

    sums.into_iter()
        .map(|(name, (sum, n))| (name.to_string(), sum / n as f64))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::StudentRef;
    use chrono::NaiveDate;

    pub(crate) fn subject(name: &str, coefficient: Option<f64>) -> SubjectRef {
        SubjectRef {
            id: Uuid::new_v4(),
            name: name.to_string(),
            coefficient,
        }
    }

    pub(crate) fn student(name: &str) -> StudentRef {
        StudentRef {
            id: Uuid::new_v4(),
            display_name: name.to_string(),
        }
    }

    pub(crate) fn grade(
        student: &StudentRef,
        subject: &SubjectRef,
        score: Option<f64>,
    ) -> GradeRecord {
        GradeRecord {
            score,
            subject: Some(subject.clone()),
            student: student.clone(),
            semester_id: None,
            semester_name: None,
            date_assigned: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            comments: None,
        }
    }

    #[test]
    fn weights_subject_means_by_coefficient() {
        let avery = student("Avery Lee");
        let math = subject("Math", Some(2.0));
        let physics = subject("Physics", Some(1.0));
        let records = vec![
            grade(&avery, &math, Some(80.0)),
            grade(&avery, &physics, Some(60.0)),
        ];

        match overall_average(&records) {
            OverallAverage::Value(value) => assert!((value - 220.0 / 3.0).abs() < 1e-9),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn averages_within_subject_before_weighting() {
        let avery = student("Avery Lee");
        let math = subject("Math", Some(3.0));
        let history = subject("History", Some(1.0));
        let records = vec![
            grade(&avery, &math, Some(70.0)),
            grade(&avery, &math, Some(90.0)),
            grade(&avery, &math, Some(80.0)),
            grade(&avery, &history, Some(40.0)),
        ];

        // math mean 80 weighted 3, history 40 weighted 1
        assert_eq!(overall_average(&records), OverallAverage::Value(70.0));
    }

    #[test]
    fn single_subject_matches_its_mean_for_any_coefficient() {
        let avery = student("Avery Lee");
        for coefficient in [0.5, 1.0, 4.0] {
            let math = subject("Math", Some(coefficient));
            let records = vec![
                grade(&avery, &math, Some(55.0)),
                grade(&avery, &math, Some(65.0)),
            ];
            assert_eq!(overall_average(&records), OverallAverage::Value(60.0));
        }
    }

    #[test]
    fn skips_invalid_coefficients() {
        let avery = student("Avery Lee");
        let math = subject("Math", Some(2.0));
        let art = subject("Art", Some(0.0));
        let music = subject("Music", None);
        let records = vec![
            grade(&avery, &math, Some(75.0)),
            grade(&avery, &art, Some(10.0)),
            grade(&avery, &music, Some(20.0)),
        ];

        assert_eq!(overall_average(&records), OverallAverage::Value(75.0));
    }

    #[test]
    fn all_invalid_coefficients_are_not_computable() {
        let avery = student("Avery Lee");
        let art = subject("Art", Some(0.0));
        let music = subject("Music", None);
        let records = vec![
            grade(&avery, &art, Some(88.0)),
            grade(&avery, &music, Some(91.0)),
        ];

        let result = overall_average(&records);
        assert_eq!(result, OverallAverage::NotComputable);
        assert!(result.to_f64().is_some_and(f64::is_nan));
    }

    #[test]
    fn no_scored_records_is_no_data() {
        let avery = student("Avery Lee");
        let math = subject("Math", Some(1.0));
        assert_eq!(overall_average(&[]), OverallAverage::NoData);

        let unscored = vec![grade(&avery, &math, None)];
        assert_eq!(overall_average(&unscored), OverallAverage::NoData);
        assert_eq!(OverallAverage::NoData.to_f64(), None);
    }

    #[test]
    fn records_without_subject_are_ignored() {
        let avery = student("Avery Lee");
        let math = subject("Math", Some(1.0));
        let mut orphan = grade(&avery, &math, Some(10.0));
        orphan.subject = None;
        let records = vec![orphan, grade(&avery, &math, Some(90.0))];

        assert_eq!(overall_average(&records), OverallAverage::Value(90.0));
    }

    #[test]
    fn overall_average_stays_between_subject_means() {
        let avery = student("Avery Lee");
        let subjects = [
            subject("Math", Some(4.0)),
            subject("Physics", Some(2.5)),
            subject("History", Some(1.0)),
        ];
        let records = vec![
            grade(&avery, &subjects[0], Some(92.0)),
            grade(&avery, &subjects[0], Some(68.0)),
            grade(&avery, &subjects[1], Some(45.0)),
            grade(&avery, &subjects[2], Some(77.0)),
        ];

        let means = all_subject_averages(&records);
        let low = means.values().cloned().fold(f64::INFINITY, f64::min);
        let high = means.values().cloned().fold(f64::NEG_INFINITY, f64::max);
        let OverallAverage::Value(value) = overall_average(&records) else {
            panic!("expected a value");
        };
        assert!(value >= low && value <= high);
    }

    #[test]
    fn subject_average_filters_by_subject() {
        let avery = student("Avery Lee");
        let math = subject("Math", Some(2.0));
        let physics = subject("Physics", Some(1.0));
        let records = vec![
            grade(&avery, &math, Some(80.0)),
            grade(&avery, &math, Some(100.0)),
            grade(&avery, &math, None),
            grade(&avery, &physics, Some(10.0)),
        ];

        assert_eq!(subject_average(&records, math.id), Some(90.0));
        assert_eq!(subject_average(&records, Uuid::new_v4()), None);
    }

    #[test]
    fn same_named_subjects_merge_into_one_average() {
        let avery = student("Avery Lee");
        let first = subject("Math", Some(1.0));
        let second = subject("Math", Some(2.0));
        let records = vec![
            grade(&avery, &first, Some(10.0)),
            grade(&avery, &second, Some(90.0)),
        ];

        for _ in 0..50 {
            let averages = all_subject_averages(&records);
            assert_eq!(averages.len(), 1);
            assert_eq!(averages["Math"], 50.0);
        }
    }

    #[test]
    fn subject_averages_include_zero_coefficient_subjects() {
        let avery = student("Avery Lee");
        let math = subject("Math", Some(2.0));
        let art = subject("Art", Some(0.0));
        let records = vec![
            grade(&avery, &math, Some(80.0)),
            grade(&avery, &art, Some(50.0)),
            grade(&avery, &art, Some(70.0)),
        ];

        let averages = all_subject_averages(&records);
        assert_eq!(averages.len(), 2);
        assert_eq!(averages["Math"], 80.0);
        assert_eq!(averages["Art"], 60.0);
        assert!(all_subject_averages(&[]).is_empty());
    }
}
