use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{AnalyticsError, Result};
use crate::models::ScoreRecord;

/// Read side of the score record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Every record, ordered by student id.
    async fn scan_all(&self) -> Result<Vec<ScoreRecord>>;

    async fn find_by_student_id(&self, student_id: &str) -> Result<Option<ScoreRecord>>;
}

/// Record store held in process memory. Counts how often it is queried.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<String, ScoreRecord>>,
    unavailable: AtomicBool,
    scans: AtomicUsize,
    lookups: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new(records: impl IntoIterator<Item = ScoreRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.student_id.clone(), record))
            .collect();
        Self {
            records: RwLock::new(records),
            ..Self::default()
        }
    }

    pub async fn upsert(&self, record: ScoreRecord) {
        self.records
            .write()
            .await
            .insert(record.student_id.clone(), record);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(AnalyticsError::DataSourceUnavailable(
                "record store offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn scan_all(&self) -> Result<Vec<ScoreRecord>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn find_by_student_id(&self, student_id: &str) -> Result<Option<ScoreRecord>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.records.read().await.get(student_id).cloned())
    }
}
