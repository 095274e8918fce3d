use std::cmp::Ordering;

use crate::models::{Category, CategoryRank, RankingEntry, RankingPage, ScoreRecord};

pub const MIN_TOP_K: usize = 1;
pub const MAX_TOP_K: usize = 1000;
/// Membership only looks at this many leading ranks.
pub const MEMBERSHIP_WINDOW: usize = 10;
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Full ordering of every record that has all three scores of `category`.
/// Ties on total are broken by ascending student id.
pub fn compute_ranking(records: &[ScoreRecord], category: Category) -> Vec<RankingEntry> {
    let mut qualifying: Vec<(&str, [f64; 3], f64)> = records
        .iter()
        .filter_map(|record| {
            let scores = record.category_scores(category)?;
            let total = scores[0] + scores[1] + scores[2];
            Some((record.student_id.as_str(), scores, total))
        })
        .collect();

    qualifying.sort_by(|a, b| compare_desc(a.2, b.2).then_with(|| a.0.cmp(b.0)));

    qualifying
        .into_iter()
        .enumerate()
        .map(|(position, (student_id, scores, total_score))| RankingEntry {
            student_id: student_id.to_string(),
            scores,
            total_score,
            rank: position as u32 + 1,
        })
        .collect()
}

fn compare_desc(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

pub fn clamp_k(k: usize) -> usize {
    k.clamp(MIN_TOP_K, MAX_TOP_K)
}

pub fn top_k(ranking: &[RankingEntry], k: usize) -> &[RankingEntry] {
    let end = clamp_k(k).min(ranking.len());
    &ranking[..end]
}

/// Filters by `min_total` before truncating. Ranks keep their position in
/// the unfiltered ordering.
pub fn top_k_with_minimum(ranking: &[RankingEntry], k: usize, min_total: f64) -> Vec<RankingEntry> {
    ranking
        .iter()
        .filter(|entry| entry.total_score >= min_total)
        .take(clamp_k(k))
        .cloned()
        .collect()
}

/// Applies the optional minimum, counts what remains, then returns the
/// `skip..skip + take` window of it. `take` is clamped like `k`.
pub fn page(
    ranking: &[RankingEntry],
    category: Category,
    min_total: Option<f64>,
    skip: usize,
    take: usize,
) -> RankingPage {
    let take = clamp_k(take);
    let passes = |entry: &&RankingEntry| min_total.map_or(true, |minimum| entry.total_score >= minimum);
    let total = ranking.iter().filter(passes).count();
    let entries = ranking
        .iter()
        .filter(passes)
        .skip(skip)
        .take(take)
        .cloned()
        .collect();

    RankingPage {
        category,
        total,
        skip,
        take,
        entries,
    }
}

pub fn rank_within_window(
    ranking: &[RankingEntry],
    category: Category,
    student_id: &str,
) -> Option<CategoryRank> {
    ranking
        .iter()
        .take(MEMBERSHIP_WINDOW)
        .find(|entry| entry.student_id == student_id)
        .map(|entry| CategoryRank {
            category,
            rank: entry.rank,
            total_score: entry.total_score,
        })
}

pub fn membership<'a, I>(rankings: I, student_id: &str) -> Vec<CategoryRank>
where
    I: IntoIterator<Item = (Category, &'a [RankingEntry])>,
{
    rankings
        .into_iter()
        .filter_map(|(category, ranking)| rank_within_window(ranking, category, student_id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Subject;

    fn block_a(id: &str, toan: f64, vat_li: f64, hoa_hoc: f64) -> ScoreRecord {
        ScoreRecord::new(id)
            .with_score(Subject::Toan, toan)
            .with_score(Subject::VatLi, vat_li)
            .with_score(Subject::HoaHoc, hoa_hoc)
    }

    fn sample_records() -> Vec<ScoreRecord> {
        vec![
            block_a("01000003", 5.0, 5.0, 5.0),
            block_a("01000001", 9.0, 9.0, 9.0),
            ScoreRecord::new("01000004")
                .with_score(Subject::Toan, 10.0)
                .with_score(Subject::HoaHoc, 10.0),
            block_a("01000002", 8.0, 7.0, 6.0),
        ]
    }

    #[test]
    fn top_two_of_block_a() {
        let ranking = compute_ranking(&sample_records(), Category::A);
        let top = top_k(&ranking, 2);

        assert_eq!(top.len(), 2);
        assert_eq!(top[0].student_id, "01000001");
        assert_eq!(top[0].total_score, 27.0);
        assert_eq!(top[0].rank, 1);
        assert_eq!(top[1].student_id, "01000002");
        assert_eq!(top[1].total_score, 21.0);
        assert_eq!(top[1].rank, 2);
    }

    #[test]
    fn records_missing_a_component_are_excluded() {
        let ranking = compute_ranking(&sample_records(), Category::A);
        assert_eq!(ranking.len(), 3);
        assert!(ranking.iter().all(|entry| entry.student_id != "01000004"));
    }

    #[test]
    fn minimum_filter_drops_low_totals_without_reranking() {
        let ranking = compute_ranking(&sample_records(), Category::A);
        let filtered = top_k_with_minimum(&ranking, 10, 16.0);
        let totals: Vec<f64> = filtered.iter().map(|entry| entry.total_score).collect();
        assert_eq!(totals, vec![27.0, 21.0]);

        let upper = top_k_with_minimum(&ranking, 10, 0.0)
            .into_iter()
            .filter(|entry| entry.total_score < 20.0)
            .collect::<Vec<_>>();
        assert_eq!(upper.len(), 1);
        assert_eq!(upper[0].rank, 3);
    }

    #[test]
    fn ranks_are_contiguous_and_totals_non_increasing() {
        let records: Vec<ScoreRecord> = (0..200)
            .map(|i| {
                let base = (i % 11) as f64;
                block_a(&format!("{:08}", 1000 - i), base, 10.0 - base, (i % 3) as f64)
            })
            .collect();

        for category in Category::ALL {
            let ranking = compute_ranking(&records, category);
            for (position, entry) in ranking.iter().enumerate() {
                assert_eq!(entry.rank as usize, position + 1);
            }
            for pair in ranking.windows(2) {
                assert!(pair[0].total_score >= pair[1].total_score);
            }
        }
    }

    #[test]
    fn ties_break_on_ascending_student_id() {
        let records = vec![
            block_a("01000009", 8.0, 8.0, 8.0),
            block_a("01000005", 8.0, 8.0, 8.0),
            block_a("01000007", 8.0, 8.0, 8.0),
        ];
        let ids: Vec<String> = compute_ranking(&records, Category::A)
            .into_iter()
            .map(|entry| entry.student_id)
            .collect();
        assert_eq!(ids, vec!["01000005", "01000007", "01000009"]);

        let mut reversed = records.clone();
        reversed.reverse();
        assert_eq!(
            compute_ranking(&records, Category::A),
            compute_ranking(&reversed, Category::A)
        );
    }

    #[test]
    fn k_is_clamped() {
        let ranking = compute_ranking(&sample_records(), Category::A);
        assert_eq!(top_k(&ranking, 0).len(), 1);
        assert_eq!(top_k(&ranking, 5000).len(), 3);
        assert_eq!(clamp_k(5000), MAX_TOP_K);
    }

    #[test]
    fn pages_count_filtered_entries_and_keep_ranks() {
        let ranking = compute_ranking(&sample_records(), Category::A);

        let first = page(&ranking, Category::A, None, 0, 2);
        assert_eq!(first.total, 3);
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.entries[0].rank, 1);

        let rest = page(&ranking, Category::A, Some(16.0), 1, 10);
        assert_eq!(rest.total, 2);
        assert_eq!(rest.skip, 1);
        assert_eq!(rest.entries.len(), 1);
        assert_eq!(rest.entries[0].rank, 2);

        let past_end = page(&ranking, Category::A, None, 50, 10);
        assert_eq!(past_end.total, 3);
        assert!(past_end.entries.is_empty());

        assert_eq!(page(&ranking, Category::A, None, 0, 0).take, MIN_TOP_K);
    }

    #[test]
    fn membership_only_sees_the_top_ten() {
        let records: Vec<ScoreRecord> = (0..12)
            .map(|i| {
                let score = 10.0 - i as f64 * 0.25;
                block_a(&format!("{:08}", i + 1), score, score, score)
            })
            .collect();
        let ranking = compute_ranking(&records, Category::A);

        let ninth = &ranking[8].student_id;
        let twelfth = &ranking[11].student_id;
        let rankings = [(Category::A, ranking.as_slice())];

        let found = membership(rankings, ninth);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rank, 9);
        assert!(membership(rankings, twelfth).is_empty());
    }
}
