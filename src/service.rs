//! Analytics orchestrator: cache-first reads over the aggregation and
//! ranking engines, write-back on miss, coarse invalidation.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::{CacheAside, CacheLookup};
use crate::error::{AnalyticsError, Result};
use crate::models::{
    Category, CategoryRank, Metadata, RankingEntry, RankingPage, ScoreRecord, StatisticsSnapshot,
    SubjectStatistics,
};
use crate::ranking;
use crate::stats::{self, StatisticsFilter};
use crate::store::RecordStore;

pub const STATISTICS_KEY: &str = "stats:full";

fn ranking_key(category: Category) -> String {
    format!("top_scores:{category}")
}

fn student_key(student_id: &str) -> String {
    format!("student:{student_id}")
}

/// Student ids are exactly eight ASCII digits.
pub fn validate_student_id(student_id: &str) -> Result<&str> {
    let trimmed = student_id.trim();
    if trimmed.len() == 8 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        Ok(trimmed)
    } else {
        Err(AnalyticsError::InvalidStudentId(student_id.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationScope {
    Category(Category),
    All,
}

impl FromStr for InvalidationScope {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(InvalidationScope::All)
        } else {
            s.parse().map(InvalidationScope::Category)
        }
    }
}

#[derive(Clone)]
pub struct AnalyticsService {
    store: Arc<dyn RecordStore>,
    cache: CacheAside,
    ttl: Duration,
    /// Background cache writes still in flight.
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl AnalyticsService {
    pub fn new(store: Arc<dyn RecordStore>, cache: CacheAside, ttl: Duration) -> Self {
        Self {
            store,
            cache,
            ttl,
            pending: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub async fn statistics_snapshot(&self) -> Result<StatisticsSnapshot> {
        if let CacheLookup::Hit(snapshot) = self.cache.get(STATISTICS_KEY).await {
            debug!("statistics cache hit");
            return Ok(snapshot);
        }

        debug!("statistics cache miss, scanning records");
        let records = self.store.scan_all().await?;
        let snapshot = stats::compute_snapshot(&records);
        self.populate_in_background(STATISTICS_KEY.to_string(), snapshot.clone())
            .await;
        Ok(snapshot)
    }

    /// Writes to the cache on a spawned task. The caller's response never
    /// waits on, or fails because of, this write. `shutdown` drains it.
    async fn populate_in_background<T>(&self, key: String, value: T)
    where
        T: Serialize + Send + Sync + 'static,
    {
        let cache = self.cache.clone();
        let ttl = self.ttl;
        let mut pending = self.pending.lock().await;
        while pending.try_join_next().is_some() {}
        pending.spawn(async move {
            let written = cache.set(&key, &value, ttl).await;
            if written {
                info!(key = %key, "cache populated");
            } else {
                warn!(key = %key, "cache population skipped");
            }
        });
    }

    /// Waits up to `grace` for background cache writes, then abandons the
    /// rest. Returns how many writes were abandoned.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        let mut pending = self.pending.lock().await;
        let drain = async {
            while let Some(joined) = pending.join_next().await {
                if let Err(err) = joined {
                    warn!(error = %err, "background cache write failed");
                }
            }
        };
        if tokio::time::timeout(grace, drain).await.is_ok() {
            return 0;
        }
        let abandoned = pending.len();
        pending.abort_all();
        warn!(abandoned, "background cache writes abandoned at shutdown");
        abandoned
    }

    pub async fn filter_statistics(
        &self,
        subjects: &[String],
        levels: &[String],
    ) -> Result<Vec<SubjectStatistics>> {
        let filter = StatisticsFilter::parse(subjects, levels)?;
        let snapshot = self.statistics_snapshot().await?;
        Ok(filter.apply(&snapshot))
    }

    async fn cached_ranking(&self, category: Category) -> Option<Vec<RankingEntry>> {
        match self.cache.get(&ranking_key(category)).await {
            CacheLookup::Hit(ranking) => {
                debug!(%category, "ranking cache hit");
                Some(ranking)
            }
            CacheLookup::Absent | CacheLookup::Miss => None,
        }
    }

    async fn store_ranking(&self, category: Category, ranking: &[RankingEntry]) {
        if self.cache.set(&ranking_key(category), &ranking, self.ttl).await {
            info!(%category, entries = ranking.len(), "ranking cached");
        }
    }

    /// The complete ordering for `category`; later requests with any `k`
    /// or minimum are served from the same cached sequence.
    pub async fn full_ranking(&self, category: Category) -> Result<Vec<RankingEntry>> {
        if let Some(ranking) = self.cached_ranking(category).await {
            return Ok(ranking);
        }

        debug!(%category, "ranking cache miss, scanning records");
        let records = self.store.scan_all().await?;
        let ranking = ranking::compute_ranking(&records, category);
        self.store_ranking(category, &ranking).await;
        Ok(ranking)
    }

    pub async fn category_ranking(
        &self,
        category: Category,
        k: usize,
        min_total: Option<f64>,
    ) -> Result<Vec<RankingEntry>> {
        let ranking = self.full_ranking(category).await?;
        Ok(match min_total {
            Some(minimum) => ranking::top_k_with_minimum(&ranking, k, minimum),
            None => ranking::top_k(&ranking, k).to_vec(),
        })
    }

    /// Paged listing over the cached ordering. Ranks are those of the
    /// unfiltered ordering.
    pub async fn category_page(
        &self,
        category: Category,
        min_total: Option<f64>,
        skip: usize,
        take: usize,
    ) -> Result<RankingPage> {
        let ranking = self.full_ranking(category).await?;
        Ok(ranking::page(&ranking, category, min_total, skip, take))
    }

    pub async fn all_categories_top(&self, k: usize) -> Result<Vec<(Category, Vec<RankingEntry>)>> {
        let mut tops = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            tops.push((category, self.category_ranking(category, k, None).await?));
        }
        Ok(tops)
    }

    /// Categories in which the student sits within the top ten. Categories
    /// missing from the cache are computed from a single shared scan.
    pub async fn student_membership(&self, student_id: &str) -> Result<Vec<CategoryRank>> {
        let student_id = validate_student_id(student_id)?;

        let mut rankings = Vec::with_capacity(Category::ALL.len());
        let mut records: Option<Vec<ScoreRecord>> = None;

        for category in Category::ALL {
            let ranking = match self.cached_ranking(category).await {
                Some(ranking) => ranking,
                None => {
                    if records.is_none() {
                        records = Some(self.store.scan_all().await?);
                    }
                    let scanned = records.as_deref().unwrap_or_default();
                    let ranking = ranking::compute_ranking(scanned, category);
                    self.store_ranking(category, &ranking).await;
                    ranking
                }
            };
            rankings.push((category, ranking));
        }

        Ok(ranking::membership(
            rankings
                .iter()
                .map(|(category, ranking)| (*category, ranking.as_slice())),
            student_id,
        ))
    }

    /// Point lookup with negative caching: a confirmed-missing student is
    /// remembered, so repeat lookups do not reach the record store.
    pub async fn lookup_student(&self, student_id: &str) -> Result<ScoreRecord> {
        let student_id = validate_student_id(student_id)?;
        let key = student_key(student_id);

        match self.cache.get::<ScoreRecord>(&key).await {
            CacheLookup::Hit(record) => return Ok(record),
            CacheLookup::Absent => {
                debug!(student_id, "negative cache hit");
                return Err(AnalyticsError::StudentNotFound(student_id.to_string()));
            }
            CacheLookup::Miss => {}
        }

        match self.store.find_by_student_id(student_id).await? {
            Some(record) => {
                self.cache.set(&key, &record, self.ttl).await;
                Ok(record)
            }
            None => {
                self.cache.set_absent(&key, self.ttl).await;
                Err(AnalyticsError::StudentNotFound(student_id.to_string()))
            }
        }
    }

    /// Called by the ingestion side after bulk changes; the cache cannot
    /// detect staleness itself. `All` flushes the whole namespace, including
    /// the snapshot and negative lookups.
    pub async fn invalidate(&self, scope: InvalidationScope) -> bool {
        let done = match scope {
            InvalidationScope::Category(category) => self.cache.delete(&ranking_key(category)).await,
            InvalidationScope::All => self.cache.delete_namespace().await,
        };
        info!(?scope, done, "cache invalidated");
        done
    }

    /// Subjects, levels and categories. Static, so it needs no record store.
    pub fn metadata() -> Metadata {
        Metadata::build()
    }
}
