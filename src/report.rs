use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::models::{Category, RankingEntry, ScoreLevel, StatisticsSnapshot, Subject};

fn share(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 * 100.0 / total as f64
    }
}

pub fn build_report(
    generated_at: DateTime<Utc>,
    snapshot: &StatisticsSnapshot,
    tops: &[(Category, Vec<RankingEntry>)],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Exam Score Report");
    let _ = writeln!(
        output,
        "Generated {} over {} score records",
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        snapshot.total_records
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Level Distribution");

    if snapshot.total_records == 0 {
        let _ = writeln!(output, "No score records loaded.");
    } else {
        let _ = writeln!(
            output,
            "| Subject | Sat | {} | {} | {} | {} |",
            ScoreLevel::Excellent.label(),
            ScoreLevel::Good.label(),
            ScoreLevel::Average.label(),
            ScoreLevel::Poor.label()
        );
        let _ = writeln!(output, "|---|---:|---:|---:|---:|---:|");
        for subject in Subject::ALL {
            let counts = snapshot.subject(subject);
            let _ = write!(output, "| {} | {} |", subject.display_name(), counts.total);
            for level in ScoreLevel::ALL {
                let count = counts.get(level);
                let _ = write!(output, " {} ({:.1}%) |", count, share(count, counts.total));
            }
            let _ = writeln!(output);
        }
    }

    for (category, entries) in tops {
        let subjects: Vec<&str> = category
            .subjects()
            .iter()
            .map(|subject| subject.display_name())
            .collect();

        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "## {} ({})",
            category.display_name(),
            subjects.join(" + ")
        );

        if entries.is_empty() {
            let _ = writeln!(output, "No students sat every subject of this category.");
            continue;
        }

        for entry in entries {
            let _ = writeln!(
                output,
                "{}. {} total {:.2} ({:.2} / {:.2} / {:.2})",
                entry.rank,
                entry.student_id,
                entry.total_score,
                entry.scores[0],
                entry.scores[1],
                entry.scores[2]
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScoreRecord;
    use crate::ranking::compute_ranking;
    use crate::stats::compute_snapshot;
    use chrono::TimeZone;

    #[test]
    fn report_lists_distribution_and_rankings() {
        let records = vec![
            ScoreRecord::new("01000001")
                .with_score(Subject::Toan, 9.0)
                .with_score(Subject::VatLi, 8.5)
                .with_score(Subject::HoaHoc, 8.0),
            ScoreRecord::new("01000002").with_score(Subject::Toan, 3.0),
        ];
        let snapshot = compute_snapshot(&records);
        let tops: Vec<(Category, Vec<RankingEntry>)> = Category::ALL
            .into_iter()
            .map(|category| (category, compute_ranking(&records, category)))
            .collect();
        let generated_at = Utc.with_ymd_and_hms(2024, 7, 17, 8, 30, 0).unwrap();

        let report = build_report(generated_at, &snapshot, &tops);

        assert!(report.contains("Generated 2024-07-17 08:30 UTC over 2 score records"));
        assert!(report.contains("| Toán | 2 | 1 (50.0%) | 0 (0.0%) | 0 (0.0%) | 1 (50.0%) |"));
        assert!(report.contains("## Khối A (Toán + Vật Lý + Hóa Học)"));
        assert!(report.contains("1. 01000001 total 25.50 (9.00 / 8.50 / 8.00)"));
        assert!(report.contains("No students sat every subject of this category."));
    }

    #[test]
    fn empty_store_gets_a_placeholder() {
        let snapshot = compute_snapshot(&[]);
        let report = build_report(Utc::now(), &snapshot, &[]);
        assert!(report.contains("No score records loaded."));
    }
}
