use anyhow::{bail, Context};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::info;

use crate::error::Result;
use crate::models::{ScoreRecord, Subject};
use crate::store::RecordStore;

const IMPORT_BATCH_SIZE: usize = 500;

const SELECT_RECORDS: &str = "SELECT student_id, toan, ngu_van, ngoai_ngu, vat_li, hoa_hoc, \
     sinh_hoc, lich_su, dia_li, gdcd, foreign_language_code \
     FROM exam_analytics.score_records";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn count_records(pool: &PgPool) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM exam_analytics.score_records")
        .fetch_one(pool)
        .await?
        .get("count");
    Ok(count)
}

fn record_from_row(row: &PgRow) -> ScoreRecord {
    let mut record = ScoreRecord::new(row.get::<String, _>("student_id"));
    for subject in Subject::ALL {
        record.set_score(subject, row.get(subject.key()));
    }
    record.foreign_language_code = row.get("foreign_language_code");
    record
}

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn scan_all(&self) -> Result<Vec<ScoreRecord>> {
        let query = format!("{SELECT_RECORDS} ORDER BY student_id");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn find_by_student_id(&self, student_id: &str) -> Result<Option<ScoreRecord>> {
        let query = format!("{SELECT_RECORDS} WHERE student_id = $1");
        let row = sqlx::query(&query)
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(record_from_row))
    }
}

#[derive(serde::Deserialize)]
struct CsvRow {
    sbd: String,
    toan: Option<f64>,
    ngu_van: Option<f64>,
    ngoai_ngu: Option<f64>,
    vat_li: Option<f64>,
    hoa_hoc: Option<f64>,
    sinh_hoc: Option<f64>,
    lich_su: Option<f64>,
    dia_li: Option<f64>,
    gdcd: Option<f64>,
    ma_ngoai_ngu: Option<String>,
}

impl CsvRow {
    fn into_record(self, line: usize) -> anyhow::Result<ScoreRecord> {
        if self.sbd.is_empty() {
            bail!("line {line}: missing student id");
        }

        let mut record = ScoreRecord::new(self.sbd);
        let scores = [
            (Subject::Toan, self.toan),
            (Subject::NguVan, self.ngu_van),
            (Subject::NgoaiNgu, self.ngoai_ngu),
            (Subject::VatLi, self.vat_li),
            (Subject::HoaHoc, self.hoa_hoc),
            (Subject::SinhHoc, self.sinh_hoc),
            (Subject::LichSu, self.lich_su),
            (Subject::DiaLi, self.dia_li),
            (Subject::Gdcd, self.gdcd),
        ];
        for (subject, score) in scores {
            if let Some(value) = score {
                if !(0.0..=10.0).contains(&value) {
                    bail!("line {line}: {subject} score {value} is outside 0-10");
                }
            }
            record.set_score(subject, score);
        }
        record.foreign_language_code = self.ma_ngoai_ngu;
        Ok(record)
    }
}

pub fn read_csv(csv_path: &std::path::Path) -> anyhow::Result<Vec<ScoreRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;

    let mut records = Vec::new();
    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        // header is line 1
        let line = index + 2;
        let row = result.with_context(|| format!("line {line}: malformed row"))?;
        records.push(row.into_record(line)?);
    }
    Ok(records)
}

async fn upsert_batch(pool: &PgPool, batch: &[ScoreRecord]) -> anyhow::Result<u64> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO exam_analytics.score_records \
         (student_id, toan, ngu_van, ngoai_ngu, vat_li, hoa_hoc, sinh_hoc, lich_su, dia_li, gdcd, \
         foreign_language_code) ",
    );

    builder.push_values(batch, |mut row, record| {
        row.push_bind(record.student_id.clone());
        for subject in Subject::ALL {
            row.push_bind(record.score(subject));
        }
        row.push_bind(record.foreign_language_code.clone());
    });

    builder.push(
        " ON CONFLICT (student_id) DO UPDATE SET \
         toan = EXCLUDED.toan, ngu_van = EXCLUDED.ngu_van, ngoai_ngu = EXCLUDED.ngoai_ngu, \
         vat_li = EXCLUDED.vat_li, hoa_hoc = EXCLUDED.hoa_hoc, sinh_hoc = EXCLUDED.sinh_hoc, \
         lich_su = EXCLUDED.lich_su, dia_li = EXCLUDED.dia_li, gdcd = EXCLUDED.gdcd, \
         foreign_language_code = EXCLUDED.foreign_language_code",
    );

    let result = builder.build().execute(pool).await?;
    Ok(result.rows_affected())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let records = read_csv(csv_path)?;
    let total = records.len();
    let mut written = 0usize;

    for batch in records.chunks(IMPORT_BATCH_SIZE) {
        written += upsert_batch(pool, batch)
            .await
            .context("failed to write score batch")? as usize;
        info!(written, total, "import progress");
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(name: &str, body: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("{name}-{}.csv", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    const HEADER: &str = "sbd,toan,ngu_van,ngoai_ngu,vat_li,hoa_hoc,sinh_hoc,lich_su,dia_li,gdcd,ma_ngoai_ngu\n";

    #[test]
    fn blank_cells_become_absent_scores() {
        let path = write_csv(
            "blank-cells",
            &format!("{HEADER}01000001,8.4,6.75,,7,,,,,,\n01000002,, 5.5,4.2,,,,7.25,6,8.5,N1\n"),
        );
        let records = read_csv(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].toan, Some(8.4));
        assert_eq!(records[0].ngoai_ngu, None);
        assert_eq!(records[0].vat_li, Some(7.0));
        assert_eq!(records[0].foreign_language_code, None);
        assert_eq!(records[1].toan, None);
        assert_eq!(records[1].ngu_van, Some(5.5));
        assert_eq!(records[1].foreign_language_code.as_deref(), Some("N1"));
    }

    #[test]
    fn out_of_range_score_names_the_line() {
        let path = write_csv(
            "out-of-range",
            &format!("{HEADER}01000001,8,7,6,,,,,,,\n01000002,11,,,,,,,,,\n"),
        );
        let err = read_csv(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        let message = err.to_string();
        assert!(message.contains("line 3"), "{message}");
        assert!(message.contains("toan"), "{message}");
    }
}
