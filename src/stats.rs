use std::str::FromStr;

use crate::error::{AnalyticsError, Result};
use crate::models::{
    LevelCounts, ScoreLevel, ScoreRecord, StatisticsSnapshot, Subject, SubjectStatistics,
    SUBJECT_COUNT,
};

pub const ALL_SELECTOR: &str = "all";

/// One pass over every record. Counters are the only state; nothing is
/// allocated per record.
pub fn compute_snapshot(records: &[ScoreRecord]) -> StatisticsSnapshot {
    let mut subjects = [LevelCounts::default(); SUBJECT_COUNT];
    let mut total_records = 0u64;

    for record in records {
        total_records += 1;
        for subject in Subject::ALL {
            if let Some(score) = record.score(subject) {
                subjects[subject.index()].record(score);
            }
        }
    }

    StatisticsSnapshot {
        subjects,
        total_records,
    }
}

/// A validated subject × level projection. `"all"` anywhere in a list
/// selects everything for that axis.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsFilter {
    pub subjects: Vec<Subject>,
    pub levels: Vec<ScoreLevel>,
}

impl StatisticsFilter {
    pub fn parse(subjects: &[String], levels: &[String]) -> Result<Self> {
        Ok(Self {
            subjects: parse_selection(subjects, &Subject::ALL, "subjects")?,
            levels: parse_selection(levels, &ScoreLevel::ALL, "levels")?,
        })
    }

    /// Pure projection of an already computed snapshot; each selected
    /// subject keeps its total.
    pub fn apply(&self, snapshot: &StatisticsSnapshot) -> Vec<SubjectStatistics> {
        self.subjects
            .iter()
            .map(|subject| {
                let counts = snapshot.subject(*subject);
                SubjectStatistics {
                    subject: *subject,
                    total: counts.total,
                    levels: self
                        .levels
                        .iter()
                        .map(|level| (*level, counts.get(*level)))
                        .collect(),
                }
            })
            .collect()
    }
}

pub fn filter_snapshot(
    snapshot: &StatisticsSnapshot,
    subjects: &[String],
    levels: &[String],
) -> Result<Vec<SubjectStatistics>> {
    Ok(StatisticsFilter::parse(subjects, levels)?.apply(snapshot))
}

fn parse_selection<T>(raw: &[String], all: &[T], axis: &'static str) -> Result<Vec<T>>
where
    T: FromStr<Err = AnalyticsError> + Copy + PartialEq,
{
    if raw.is_empty() {
        return Err(AnalyticsError::EmptySelection(axis));
    }

    if raw.iter().any(|value| value.trim() == ALL_SELECTOR) {
        return Ok(all.to_vec());
    }

    let mut selected: Vec<T> = Vec::with_capacity(raw.len());
    for value in raw {
        let parsed = value.parse::<T>()?;
        if !selected.contains(&parsed) {
            selected.push(parsed);
        }
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn math_only(id: &str, score: f64) -> ScoreRecord {
        ScoreRecord::new(id).with_score(Subject::Toan, score)
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn buckets_one_score_per_level() {
        let records = vec![
            math_only("01000001", 9.0),
            math_only("01000002", 7.0),
            math_only("01000003", 5.0),
            math_only("01000004", 3.0),
        ];

        let snapshot = compute_snapshot(&records);
        let toan = snapshot.subject(Subject::Toan);
        assert_eq!(toan.excellent, 1);
        assert_eq!(toan.good, 1);
        assert_eq!(toan.average, 1);
        assert_eq!(toan.poor, 1);
        assert_eq!(toan.total, 4);
        assert_eq!(snapshot.total_records, 4);
    }

    #[test]
    fn absent_scores_count_toward_grand_total_only() {
        let records = vec![
            ScoreRecord::new("01000001")
                .with_score(Subject::Toan, 8.0)
                .with_score(Subject::NguVan, 4.0),
            ScoreRecord::new("01000002").with_score(Subject::Gdcd, 6.0),
            ScoreRecord::new("01000003"),
        ];

        let snapshot = compute_snapshot(&records);
        assert_eq!(snapshot.total_records, 3);
        assert_eq!(snapshot.subject(Subject::Toan).total, 1);
        assert_eq!(snapshot.subject(Subject::NguVan).average, 1);
        assert_eq!(snapshot.subject(Subject::Gdcd).good, 1);
        assert_eq!(snapshot.subject(Subject::SinhHoc), &LevelCounts::default());

        for subject in Subject::ALL {
            let counts = snapshot.subject(subject);
            assert_eq!(counts.bucket_sum(), counts.total);
            assert!(counts.total <= snapshot.total_records);
        }
    }

    #[test]
    fn repeated_passes_agree() {
        let records: Vec<ScoreRecord> = (0..500)
            .map(|i| {
                let mut record = ScoreRecord::new(format!("{:08}", i));
                for (offset, subject) in Subject::ALL.into_iter().enumerate() {
                    if (i + offset) % 4 != 0 {
                        record.set_score(subject, Some(((i * 7 + offset * 3) % 41) as f64 / 4.0));
                    }
                }
                record
            })
            .collect();

        let first = compute_snapshot(&records);
        let second = compute_snapshot(&records);
        assert_eq!(first, second);
        for subject in Subject::ALL {
            assert_eq!(first.subject(subject).bucket_sum(), first.subject(subject).total);
        }
    }

    #[test]
    fn filter_keeps_total_and_requested_levels() {
        let snapshot = compute_snapshot(&[math_only("01000001", 9.0), math_only("01000002", 2.0)]);

        let filtered =
            filter_snapshot(&snapshot, &strings(&["toan"]), &strings(&["excellent", "poor"]))
                .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].subject, Subject::Toan);
        assert_eq!(filtered[0].total, 2);
        assert_eq!(
            filtered[0].levels,
            vec![(ScoreLevel::Excellent, 1), (ScoreLevel::Poor, 1)]
        );
    }

    #[test]
    fn all_selector_expands_both_axes() {
        let snapshot = compute_snapshot(&[math_only("01000001", 6.5)]);
        let filtered = filter_snapshot(&snapshot, &strings(&["all"]), &strings(&["all"])).unwrap();
        assert_eq!(filtered.len(), SUBJECT_COUNT);
        assert!(filtered.iter().all(|entry| entry.levels.len() == 4));
    }

    #[test]
    fn filter_rejects_empty_and_unknown_selections() {
        let snapshot = compute_snapshot(&[]);
        assert!(matches!(
            filter_snapshot(&snapshot, &[], &strings(&["all"])),
            Err(AnalyticsError::EmptySelection("subjects"))
        ));
        assert!(matches!(
            filter_snapshot(&snapshot, &strings(&["toan", "latin"]), &strings(&["all"])),
            Err(AnalyticsError::InvalidSubject(name)) if name == "latin"
        ));
        assert!(matches!(
            filter_snapshot(&snapshot, &strings(&["all"]), &strings(&["stellar"])),
            Err(AnalyticsError::InvalidLevel(_))
        ));
    }
}
