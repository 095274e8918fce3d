use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AnalyticsError;

pub const SUBJECT_COUNT: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subject {
    Toan,
    NguVan,
    NgoaiNgu,
    VatLi,
    HoaHoc,
    SinhHoc,
    LichSu,
    DiaLi,
    Gdcd,
}

impl Subject {
    /// Column order of the score sheet; also the index order of snapshot counters.
    pub const ALL: [Subject; SUBJECT_COUNT] = [
        Subject::Toan,
        Subject::NguVan,
        Subject::NgoaiNgu,
        Subject::VatLi,
        Subject::HoaHoc,
        Subject::SinhHoc,
        Subject::LichSu,
        Subject::DiaLi,
        Subject::Gdcd,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Subject::Toan => "toan",
            Subject::NguVan => "ngu_van",
            Subject::NgoaiNgu => "ngoai_ngu",
            Subject::VatLi => "vat_li",
            Subject::HoaHoc => "hoa_hoc",
            Subject::SinhHoc => "sinh_hoc",
            Subject::LichSu => "lich_su",
            Subject::DiaLi => "dia_li",
            Subject::Gdcd => "gdcd",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Subject::Toan => "Toán",
            Subject::NguVan => "Ngữ Văn",
            Subject::NgoaiNgu => "Ngoại Ngữ",
            Subject::VatLi => "Vật Lý",
            Subject::HoaHoc => "Hóa Học",
            Subject::SinhHoc => "Sinh Học",
            Subject::LichSu => "Lịch Sử",
            Subject::DiaLi => "Địa Lý",
            Subject::Gdcd => "GDCD",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Subject {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Subject::ALL
            .into_iter()
            .find(|subject| subject.key() == wanted)
            .ok_or_else(|| AnalyticsError::InvalidSubject(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreLevel {
    Excellent,
    Good,
    Average,
    Poor,
}

impl ScoreLevel {
    pub const ALL: [ScoreLevel; 4] = [
        ScoreLevel::Excellent,
        ScoreLevel::Good,
        ScoreLevel::Average,
        ScoreLevel::Poor,
    ];

    /// Buckets are half-open: 8, 6 and 4 are the inclusive lower bounds.
    pub fn classify(score: f64) -> ScoreLevel {
        if score >= 8.0 {
            ScoreLevel::Excellent
        } else if score >= 6.0 {
            ScoreLevel::Good
        } else if score >= 4.0 {
            ScoreLevel::Average
        } else {
            ScoreLevel::Poor
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            ScoreLevel::Excellent => "excellent",
            ScoreLevel::Good => "good",
            ScoreLevel::Average => "average",
            ScoreLevel::Poor => "poor",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ScoreLevel::Excellent => "Xuất sắc (>= 8)",
            ScoreLevel::Good => "Khá (6-8)",
            ScoreLevel::Average => "Trung bình (4-6)",
            ScoreLevel::Poor => "Yếu (< 4)",
        }
    }
}

impl fmt::Display for ScoreLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ScoreLevel {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ScoreLevel::ALL
            .into_iter()
            .find(|level| level.key() == wanted)
            .ok_or_else(|| AnalyticsError::InvalidLevel(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    A,
    B,
    C,
    D,
}

/// Subject triple per category, indexed by `Category as usize`.
const CATEGORY_SUBJECTS: [(Category, [Subject; 3]); 4] = [
    (Category::A, [Subject::Toan, Subject::VatLi, Subject::HoaHoc]),
    (Category::B, [Subject::Toan, Subject::HoaHoc, Subject::SinhHoc]),
    (Category::C, [Subject::NguVan, Subject::LichSu, Subject::DiaLi]),
    (Category::D, [Subject::Toan, Subject::NguVan, Subject::NgoaiNgu]),
];

impl Category {
    pub const ALL: [Category; 4] = [Category::A, Category::B, Category::C, Category::D];

    pub fn subjects(self) -> [Subject; 3] {
        CATEGORY_SUBJECTS[self as usize].1
    }

    pub fn code(self) -> &'static str {
        match self {
            Category::A => "A",
            Category::B => "B",
            Category::C => "C",
            Category::D => "D",
        }
    }

    pub fn display_name(self) -> String {
        format!("Khối {}", self.code())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Category {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::ALL
            .into_iter()
            .find(|category| category.code().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| AnalyticsError::InvalidCategory(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub student_id: String,
    pub toan: Option<f64>,
    pub ngu_van: Option<f64>,
    pub ngoai_ngu: Option<f64>,
    pub vat_li: Option<f64>,
    pub hoa_hoc: Option<f64>,
    pub sinh_hoc: Option<f64>,
    pub lich_su: Option<f64>,
    pub dia_li: Option<f64>,
    pub gdcd: Option<f64>,
    pub foreign_language_code: Option<String>,
}

impl ScoreRecord {
    pub fn new(student_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            toan: None,
            ngu_van: None,
            ngoai_ngu: None,
            vat_li: None,
            hoa_hoc: None,
            sinh_hoc: None,
            lich_su: None,
            dia_li: None,
            gdcd: None,
            foreign_language_code: None,
        }
    }

    pub fn score(&self, subject: Subject) -> Option<f64> {
        match subject {
            Subject::Toan => self.toan,
            Subject::NguVan => self.ngu_van,
            Subject::NgoaiNgu => self.ngoai_ngu,
            Subject::VatLi => self.vat_li,
            Subject::HoaHoc => self.hoa_hoc,
            Subject::SinhHoc => self.sinh_hoc,
            Subject::LichSu => self.lich_su,
            Subject::DiaLi => self.dia_li,
            Subject::Gdcd => self.gdcd,
        }
    }

    pub fn set_score(&mut self, subject: Subject, value: Option<f64>) {
        let slot = match subject {
            Subject::Toan => &mut self.toan,
            Subject::NguVan => &mut self.ngu_van,
            Subject::NgoaiNgu => &mut self.ngoai_ngu,
            Subject::VatLi => &mut self.vat_li,
            Subject::HoaHoc => &mut self.hoa_hoc,
            Subject::SinhHoc => &mut self.sinh_hoc,
            Subject::LichSu => &mut self.lich_su,
            Subject::DiaLi => &mut self.dia_li,
            Subject::Gdcd => &mut self.gdcd,
        };
        *slot = value;
    }

    pub fn with_score(mut self, subject: Subject, value: f64) -> Self {
        self.set_score(subject, Some(value));
        self
    }

    /// The three component scores of `category`, or `None` if any is absent.
    pub fn category_scores(&self, category: Category) -> Option<[f64; 3]> {
        let [first, second, third] = category.subjects();
        Some([
            self.score(first)?,
            self.score(second)?,
            self.score(third)?,
        ])
    }

    pub fn category_total(&self, category: Category) -> Option<f64> {
        self.category_scores(category)
            .map(|scores| scores.iter().sum())
    }

    /// Mean of the non-absent scores, rounded to two decimals.
    pub fn average(&self) -> Option<f64> {
        let (sum, count) = Subject::ALL
            .iter()
            .filter_map(|subject| self.score(*subject))
            .fold((0.0, 0u32), |(sum, count), score| (sum + score, count + 1));

        if count == 0 {
            None
        } else {
            Some((sum / count as f64 * 100.0).round() / 100.0)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    pub excellent: u64,
    pub good: u64,
    pub average: u64,
    pub poor: u64,
    pub total: u64,
}

impl LevelCounts {
    pub fn record(&mut self, score: f64) {
        self.total += 1;
        match ScoreLevel::classify(score) {
            ScoreLevel::Excellent => self.excellent += 1,
            ScoreLevel::Good => self.good += 1,
            ScoreLevel::Average => self.average += 1,
            ScoreLevel::Poor => self.poor += 1,
        }
    }

    pub fn get(&self, level: ScoreLevel) -> u64 {
        match level {
            ScoreLevel::Excellent => self.excellent,
            ScoreLevel::Good => self.good,
            ScoreLevel::Average => self.average,
            ScoreLevel::Poor => self.poor,
        }
    }

    pub fn bucket_sum(&self) -> u64 {
        self.excellent + self.good + self.average + self.poor
    }
}

/// Result of one full aggregation pass. Replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub subjects: [LevelCounts; SUBJECT_COUNT],
    pub total_records: u64,
}

impl StatisticsSnapshot {
    pub fn subject(&self, subject: Subject) -> &LevelCounts {
        &self.subjects[subject.index()]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub student_id: String,
    pub scores: [f64; 3],
    pub total_score: f64,
    pub rank: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRank {
    pub category: Category,
    pub rank: u32,
    pub total_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryInfo {
    pub category: Category,
    pub name: String,
    pub subjects: [Subject; 3],
}

impl From<Category> for CategoryInfo {
    fn from(category: Category) -> Self {
        Self {
            category,
            name: category.display_name(),
            subjects: category.subjects(),
        }
    }
}

/// One page of a category ordering. `total` counts every entry that passed
/// the minimum filter, before paging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingPage {
    pub category: Category,
    pub total: usize,
    pub skip: usize,
    pub take: usize,
    pub entries: Vec<RankingEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectInfo {
    pub key: &'static str,
    pub name: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelInfo {
    pub key: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    pub subjects: Vec<SubjectInfo>,
    pub levels: Vec<LevelInfo>,
    pub categories: Vec<CategoryInfo>,
}

impl Metadata {
    pub fn build() -> Self {
        Self {
            subjects: Subject::ALL
                .into_iter()
                .map(|subject| SubjectInfo {
                    key: subject.key(),
                    name: subject.display_name(),
                })
                .collect(),
            levels: ScoreLevel::ALL
                .into_iter()
                .map(|level| LevelInfo {
                    key: level.key(),
                    label: level.label(),
                })
                .collect(),
            categories: Category::ALL.into_iter().map(CategoryInfo::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectStatistics {
    pub subject: Subject,
    pub total: u64,
    pub levels: Vec<(ScoreLevel, u64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_boundaries_are_half_open() {
        assert_eq!(ScoreLevel::classify(10.0), ScoreLevel::Excellent);
        assert_eq!(ScoreLevel::classify(8.0), ScoreLevel::Excellent);
        assert_eq!(ScoreLevel::classify(7.99), ScoreLevel::Good);
        assert_eq!(ScoreLevel::classify(6.0), ScoreLevel::Good);
        assert_eq!(ScoreLevel::classify(5.75), ScoreLevel::Average);
        assert_eq!(ScoreLevel::classify(4.0), ScoreLevel::Average);
        assert_eq!(ScoreLevel::classify(3.99), ScoreLevel::Poor);
        assert_eq!(ScoreLevel::classify(0.0), ScoreLevel::Poor);
    }

    #[test]
    fn categories_map_to_their_subject_triples() {
        assert_eq!(
            Category::A.subjects(),
            [Subject::Toan, Subject::VatLi, Subject::HoaHoc]
        );
        assert_eq!(
            Category::B.subjects(),
            [Subject::Toan, Subject::HoaHoc, Subject::SinhHoc]
        );
        assert_eq!(
            Category::C.subjects(),
            [Subject::NguVan, Subject::LichSu, Subject::DiaLi]
        );
        assert_eq!(
            Category::D.subjects(),
            [Subject::Toan, Subject::NguVan, Subject::NgoaiNgu]
        );
    }

    #[test]
    fn parses_codes_and_rejects_unknown_ones() {
        assert_eq!("b".parse::<Category>().ok(), Some(Category::B));
        assert!(matches!(
            "E".parse::<Category>(),
            Err(AnalyticsError::InvalidCategory(code)) if code == "E"
        ));
        assert_eq!("vat_li".parse::<Subject>().ok(), Some(Subject::VatLi));
        assert!("physics".parse::<Subject>().is_err());
        assert_eq!("poor".parse::<ScoreLevel>().ok(), Some(ScoreLevel::Poor));
        assert!("great".parse::<ScoreLevel>().is_err());
    }

    #[test]
    fn category_total_requires_every_component() {
        let record = ScoreRecord::new("01000001")
            .with_score(Subject::Toan, 8.5)
            .with_score(Subject::VatLi, 7.25)
            .with_score(Subject::HoaHoc, 9.0)
            .with_score(Subject::NguVan, 6.0);

        assert_eq!(record.category_total(Category::A), Some(24.75));
        assert_eq!(record.category_total(Category::B), None);
        assert_eq!(record.category_total(Category::D), None);
    }

    #[test]
    fn average_ignores_absent_scores_and_rounds() {
        let record = ScoreRecord::new("01000002")
            .with_score(Subject::Toan, 7.0)
            .with_score(Subject::NguVan, 6.0)
            .with_score(Subject::Gdcd, 6.0);
        assert_eq!(record.average(), Some(6.33));
        assert_eq!(ScoreRecord::new("01000003").average(), None);
    }

    #[test]
    fn subject_serializes_as_its_key() {
        let json = serde_json::to_string(&Subject::NgoaiNgu).unwrap();
        assert_eq!(json, "\"ngoai_ngu\"");
    }
}
